use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::SimError;

/// Weather/disaster scenario shaping the world until switched back to
/// `Normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scenario {
    Normal,
    Snow,
    Rainstorm,
    Windstorm,
    Thunderstorm,
    Heatwave,
}

impl Scenario {
    pub const ALL: [Scenario; 6] = [
        Scenario::Normal,
        Scenario::Snow,
        Scenario::Rainstorm,
        Scenario::Windstorm,
        Scenario::Thunderstorm,
        Scenario::Heatwave,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scenario::Normal => "Normal",
            Scenario::Snow => "Snow",
            Scenario::Rainstorm => "Rainstorm",
            Scenario::Windstorm => "Windstorm",
            Scenario::Thunderstorm => "Thunderstorm",
            Scenario::Heatwave => "Heatwave",
        }
    }
}

impl FromStr for Scenario {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scenario::ALL
            .iter()
            .copied()
            .find(|sc| sc.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| SimError::BadScenario(s.to_string()))
    }
}

/// Active scenario plus the simulated second it started; effects that ramp
/// (Thunderstorm grid trip after 15 s) key off the elapsed time.
#[derive(Debug, Clone, Copy)]
pub struct ScenarioState {
    pub scenario: Scenario,
    pub started_sim: f64,
}

impl ScenarioState {
    pub fn new(scenario: Scenario, started_sim: f64) -> Self {
        Self {
            scenario,
            started_sim,
        }
    }

    pub fn elapsed(&self, sim_now: f64) -> f64 {
        (sim_now - self.started_sim).max(0.0)
    }

    /// Whether the utility feed is lost under the current scenario.
    /// Windstorm flickers are decided per-tick by the caller's rng; this
    /// covers the deterministic cases.
    pub fn grid_lost(&self, sim_now: f64) -> bool {
        matches!(self.scenario, Scenario::Thunderstorm) && self.elapsed(sim_now) > 15.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("snow".parse::<Scenario>().unwrap(), Scenario::Snow);
        assert_eq!("HEATWAVE".parse::<Scenario>().unwrap(), Scenario::Heatwave);
        assert!(matches!(
            "blizzard".parse::<Scenario>(),
            Err(SimError::BadScenario(_))
        ));
    }

    #[test]
    fn thunderstorm_drops_grid_after_delay() {
        let st = ScenarioState::new(Scenario::Thunderstorm, 100.0);
        assert!(!st.grid_lost(110.0));
        assert!(st.grid_lost(116.0));
        let normal = ScenarioState::new(Scenario::Normal, 100.0);
        assert!(!normal.grid_lost(1000.0));
    }
}
