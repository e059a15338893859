use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::campus::Campus;
use crate::config::{AppConfig, CampusSize, UnitSystem};
use crate::equipment::EquipCtx;
use crate::error::SimResult;
use crate::points::{PointRegistry, PointValue};
use crate::sim::{sim_datetime, PhysicsParams, Scenario, ScenarioState, SimClock, WeatherModel};
use crate::sim::weather::WeatherConfig;

pub const TICK_QUANTUM: f64 = 1.0;
const MAX_CATCHUP: usize = 10;

/// Static description of what the assembler built, for API summaries.
#[derive(Debug, Clone, Serialize)]
pub struct BuildingInfo {
    pub id: usize,
    pub path: String,
    pub display_name: String,
    pub ahu_count: usize,
    pub vav_count: usize,
    pub square_footage: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Topology {
    pub campus_size: CampusSize,
    pub buildings: Vec<BuildingInfo>,
    pub chillers: usize,
    pub boilers: usize,
    pub cooling_towers: usize,
    pub pumps: usize,
    pub solar_arrays: usize,
    pub generators: usize,
    pub has_datacenter: bool,
    pub has_wastewater: bool,
}

impl Topology {
    fn from_campus(size: CampusSize, campus: &Campus) -> Self {
        Self {
            campus_size: size,
            buildings: campus
                .buildings
                .iter()
                .map(|b| BuildingInfo {
                    id: b.id,
                    path: b.path.clone(),
                    display_name: b.display_name.clone(),
                    ahu_count: b.air_handlers.len(),
                    vav_count: b.vav_count(),
                    square_footage: b.square_footage,
                })
                .collect(),
            chillers: campus.plant.chillers.len(),
            boilers: campus.plant.boilers.len(),
            cooling_towers: campus.plant.cooling_towers.len(),
            pumps: campus.plant.chw_pumps.len()
                + campus.plant.hw_pumps.len()
                + campus.plant.cw_pumps.len(),
            solar_arrays: campus.electrical.solar_arrays.len(),
            generators: campus.electrical.generators.len(),
            has_datacenter: campus.data_center.is_some(),
            has_wastewater: campus.wastewater.is_some(),
        }
    }
}

/// Process-wide simulation state shared by the tick driver and every
/// protocol server. Protocol surfaces only read points and place
/// overrides; present values are owned by the tick task.
pub struct World {
    pub cfg: AppConfig,
    pub registry: PointRegistry,
    pub clock: SimClock,
    pub topology: Topology,
    params: RwLock<PhysicsParams>,
    scenario: RwLock<ScenarioState>,
    unit_system: RwLock<UnitSystem>,
    /// Simulated time of the last published tick. Override expiries key
    /// off this so they stay coherent with the tick loop.
    sim_time: AtomicU64,
}

impl World {
    pub fn sim_now(&self) -> f64 {
        f64::from_bits(self.sim_time.load(Ordering::Acquire))
    }

    fn set_sim_now(&self, now: f64) {
        self.sim_time.store(now.to_bits(), Ordering::Release);
    }

    pub fn params(&self) -> PhysicsParams {
        *self.params.read().expect("params lock")
    }

    pub fn set_params(&self, params: PhysicsParams) {
        *self.params.write().expect("params lock") = params.clamped();
    }

    pub fn scenario(&self) -> ScenarioState {
        *self.scenario.read().expect("scenario lock")
    }

    pub fn set_scenario(&self, scenario: Scenario) {
        let state = ScenarioState::new(scenario, self.sim_now());
        *self.scenario.write().expect("scenario lock") = state;
        info!(scenario = scenario.as_str(), "scenario changed");
    }

    pub fn unit_system(&self) -> UnitSystem {
        *self.unit_system.read().expect("unit lock")
    }

    pub fn set_unit_system(&self, system: UnitSystem) {
        *self.unit_system.write().expect("unit lock") = system;
    }

    /// Place an override. Single entry point shared by every protocol so
    /// their write semantics cannot drift apart.
    pub fn override_point(
        &self,
        path: &str,
        value: f64,
        priority: u8,
        source: &str,
        duration_seconds: Option<f64>,
    ) -> SimResult<()> {
        let result = self.registry.override_point(
            path,
            value,
            priority,
            source,
            duration_seconds,
            self.sim_now(),
        );
        if result.is_ok() {
            info!(path, value, priority, source, "override set");
        }
        result
    }

    pub fn release_point(&self, path: &str, priority: Option<u8>) -> SimResult<bool> {
        let released = self.registry.release(path, priority)?;
        if released {
            info!(path, ?priority, "override released");
        }
        Ok(released)
    }
}

/// The simulation engine: owns the equipment (exclusively) and drives it
/// one deterministic tick at a time.
pub struct Engine {
    pub world: Arc<World>,
    campus: Campus,
    weather: WeatherModel,
    rng: StdRng,
    last_tick: f64,
}

impl Engine {
    pub fn new(cfg: AppConfig) -> Result<Self> {
        let (campus, registry) = crate::campus::assemble(&cfg)?;
        let topology = Topology::from_campus(cfg.campus_size, &campus);
        let weather = WeatherModel::new(WeatherConfig::new(cfg.geo_lat, cfg.seed));
        let rng = StdRng::seed_from_u64(cfg.seed.wrapping_mul(0x9e37_79b9));
        let world = Arc::new(World {
            registry,
            clock: SimClock::new(cfg.simulation_speed),
            topology,
            params: RwLock::new(PhysicsParams::default()),
            scenario: RwLock::new(ScenarioState::new(Scenario::Normal, 0.0)),
            unit_system: RwLock::new(cfg.unit_system),
            sim_time: AtomicU64::new(0.0_f64.to_bits()),
            cfg,
        });
        Ok(Self {
            world,
            campus,
            weather,
            rng,
            last_tick: 0.0,
        })
    }

    pub fn world(&self) -> Arc<World> {
        self.world.clone()
    }

    /// Run exactly one tick at simulated time `now`.
    pub fn tick(&mut self, now: f64) {
        let world = &self.world;
        world.set_sim_now(now);
        world.registry.expire(now);

        let scenario = world.scenario();
        self.weather.advance(now, &scenario);

        let mut grid_available = !scenario.grid_lost(now);
        if scenario.scenario == Scenario::Windstorm && self.rng.gen_bool(0.08) {
            grid_available = false;
        }
        // A forced grid_connected point wins over the scenario
        if let Some(v) = world
            .registry
            .override_f64("Electrical.MainMeter.grid_connected")
        {
            grid_available = v != 0.0;
        }

        let params = world.params();
        let weather_state = self.weather.state().clone();
        let ctx = EquipCtx {
            weather: &weather_state,
            params: &params,
            registry: &world.registry,
            sim_now: now,
            date: sim_datetime(now),
            grid_available,
        };

        let mut batch: Vec<(String, PointValue)> = Vec::with_capacity(64);
        batch.push(("Weather.oat".into(), weather_state.oat.into()));
        batch.push(("Weather.humidity".into(), weather_state.humidity.into()));
        batch.push(("Weather.wet_bulb".into(), weather_state.wet_bulb.into()));
        batch.push(("Weather.dew_point".into(), weather_state.dew_point.into()));
        batch.push(("Weather.enthalpy".into(), weather_state.enthalpy.into()));
        batch.push(("Weather.pressure".into(), weather_state.pressure.into()));
        batch.push((
            "Weather.solar_irradiance".into(),
            weather_state.solar_irradiance.into(),
        ));
        batch.push(("Weather.wind_speed".into(), weather_state.wind_speed.into()));
        batch.push(("Weather.cloud_cover".into(), weather_state.cloud_cover.into()));

        self.campus
            .advance(TICK_QUANTUM, scenario.scenario, &ctx, &mut batch);

        world.registry.publish_tick(batch);
        self.last_tick = now;
    }

    /// Advance `seconds` whole ticks from the last tick time. Used by
    /// tests and the catch-up loop.
    pub fn run_for(&mut self, seconds: usize) {
        for _ in 0..seconds {
            let next = self.last_tick + TICK_QUANTUM;
            self.tick(next);
        }
    }

    pub fn last_tick(&self) -> f64 {
        self.last_tick
    }

    /// Spawn the real-time loop: wake frequently, run however many whole
    /// simulated seconds have elapsed, bounded by the catch-up cap.
    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(100));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let now = self.world.clock.sim_now();
                let mut ran = 0usize;
                while now - self.last_tick >= TICK_QUANTUM && ran < MAX_CATCHUP {
                    let next = self.last_tick + TICK_QUANTUM;
                    self.tick(next);
                    ran += 1;
                }
                if now - self.last_tick >= TICK_QUANTUM {
                    // Hopelessly behind (laptop slept, huge speed change):
                    // jump instead of replaying the gap
                    debug!(
                        behind = now - self.last_tick,
                        "tick driver skipping ahead"
                    );
                    self.last_tick = now.floor();
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(size: CampusSize) -> Engine {
        let cfg = AppConfig {
            campus_size: size,
            ..AppConfig::default()
        };
        Engine::new(cfg).unwrap()
    }

    #[test]
    fn tick_publishes_weather_and_equipment() {
        let mut eng = engine(CampusSize::Small);
        eng.run_for(5);
        let world = eng.world();
        let oat = world.registry.effective_f64("Weather.oat").unwrap();
        assert!(oat > -40.0 && oat < 130.0);
        let room = world
            .registry
            .effective_f64("Building_1.AHU_1.VAV_101.room_temp")
            .unwrap();
        assert!(room > 55.0 && room < 95.0);
    }

    #[test]
    fn expired_override_clears_on_next_tick() {
        let mut eng = engine(CampusSize::Small);
        eng.run_for(1);
        let world = eng.world();
        world
            .registry
            .override_point(
                "Building_1.AHU_1.VAV_101.damper_position",
                100.0,
                4,
                "test",
                Some(60.0),
                eng.last_tick(),
            )
            .unwrap();
        eng.run_for(30);
        assert_eq!(
            world
                .registry
                .effective_f64("Building_1.AHU_1.VAV_101.damper_position")
                .unwrap(),
            100.0
        );
        eng.run_for(31);
        let reading = world
            .registry
            .read("Building_1.AHU_1.VAV_101.damper_position")
            .unwrap();
        assert!(!reading.overridden);
    }

    #[test]
    fn override_entry_point_validates() {
        let eng = engine(CampusSize::Small);
        let world = eng.world();
        assert!(world
            .override_point("Building_1.AHU_1.VAV_101.cooling_setpoint", 72.0, 8, "t", None)
            .is_ok());
        assert!(world
            .override_point("Building_1.AHU_1.VAV_101.room_temp", 72.0, 8, "t", None)
            .is_err());
        assert!(world
            .override_point("Missing.point", 1.0, 8, "t", None)
            .is_err());
        assert!(world
            .override_point("Building_1.AHU_1.VAV_101.cooling_setpoint", 72.0, 0, "t", None)
            .is_err());
    }

    #[test]
    fn topology_summary_matches_profile() {
        let eng = engine(CampusSize::Medium);
        let topo = &eng.world.topology;
        assert_eq!(topo.buildings.len(), 5);
        assert_eq!(topo.chillers, 2);
        assert!(topo.has_datacenter);
        assert!(topo.has_wastewater);
    }
}
