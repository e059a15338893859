pub mod clock;
pub mod params;
pub mod scenario;
pub mod weather;

pub use clock::{sim_datetime, SimClock};
pub use params::PhysicsParams;
pub use scenario::{Scenario, ScenarioState};
pub use weather::{air_enthalpy, WeatherConfig, WeatherModel, WeatherState};
