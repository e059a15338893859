pub mod datacenter;
pub mod electrical;
pub mod hvac;
pub mod plant;
pub mod wastewater;

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::Serialize;

use crate::points::{PointRegistry, PointValue};
use crate::sim::{PhysicsParams, WeatherState};

/// Inputs shared by every equipment model during one tick. The tick driver
/// computes cross-equipment couplings (demands, loop temperatures) and
/// passes them explicitly; models never reach into each other.
pub struct EquipCtx<'a> {
    pub weather: &'a WeatherState,
    pub params: &'a PhysicsParams,
    pub registry: &'a PointRegistry,
    pub sim_now: f64,
    pub date: NaiveDateTime,
    /// Utility feed state after scenario effects and overrides.
    pub grid_available: bool,
}

impl EquipCtx<'_> {
    /// Client override for a point this model owns, if one is active.
    /// Models consult this where the commanded value must steer the
    /// physics (a chiller forced off must stop cooling).
    pub fn override_f64(&self, path: &str) -> Option<f64> {
        self.registry.override_f64(path)
    }

    /// Fraction of the day elapsed (0 = midnight, 0.5 = noon).
    pub fn time_of_day(&self) -> f64 {
        (self.date.hour() as f64 + self.date.minute() as f64 / 60.0) / 24.0
    }
}

/// Batch of present-value writes accumulated during one tick and published
/// together at the tick boundary.
pub type PointBatch = Vec<(String, PointValue)>;

/// Bounded first-order response toward a target.
pub fn first_order(x: f64, target: f64, dt: f64, tau: f64) -> f64 {
    if tau <= 0.0 {
        return target;
    }
    x + (target - x) * (dt / tau).min(1.0)
}

/// Slew a command toward a target at a maximum rate (units per second).
pub fn slew(x: f64, target: f64, dt: f64, rate_per_sec: f64) -> f64 {
    let max_change = rate_per_sec * dt;
    if x < target {
        (x + max_change).min(target)
    } else {
        (x - max_change).max(target)
    }
}

pub fn pct(v: f64) -> f64 {
    v.clamp(0.0, 100.0)
}

/// Occupancy state a zone runs in. `Auto` resolves from the campus
/// schedule each tick; the explicit modes pin it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OccupancyMode {
    Auto,
    Occupied,
    Unoccupied,
    Warmup,
    Cooldown,
}

impl OccupancyMode {
    pub fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(OccupancyMode::Auto),
            1 => Some(OccupancyMode::Occupied),
            2 => Some(OccupancyMode::Unoccupied),
            3 => Some(OccupancyMode::Warmup),
            4 => Some(OccupancyMode::Cooldown),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            OccupancyMode::Auto => 0,
            OccupancyMode::Occupied => 1,
            OccupancyMode::Unoccupied => 2,
            OccupancyMode::Warmup => 3,
            OccupancyMode::Cooldown => 4,
        }
    }
}

/// Campus occupancy schedule: weekdays 07:00-18:00 occupied, with warmup
/// and cooldown shoulders. Weekends unoccupied.
pub fn scheduled_mode(date: &NaiveDateTime) -> OccupancyMode {
    let weekday = date.weekday().num_days_from_monday();
    if weekday >= 5 {
        return OccupancyMode::Unoccupied;
    }
    let hour = date.hour() as f64 + date.minute() as f64 / 60.0;
    match hour {
        h if (5.0..7.0).contains(&h) => OccupancyMode::Warmup,
        h if (7.0..18.0).contains(&h) => OccupancyMode::Occupied,
        h if (18.0..20.0).contains(&h) => OccupancyMode::Cooldown,
        _ => OccupancyMode::Unoccupied,
    }
}

/// Setpoint offsets (cooling, heating) a mode applies to the zone's base
/// setpoints.
pub fn mode_setpoint_offsets(mode: OccupancyMode) -> (f64, f64) {
    match mode {
        OccupancyMode::Auto | OccupancyMode::Occupied => (0.0, 0.0),
        OccupancyMode::Unoccupied => (5.0, -5.0),
        OccupancyMode::Warmup => (2.0, -1.0),
        OccupancyMode::Cooldown => (2.0, -2.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(weekday_date: (i32, u32, u32), h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(weekday_date.0, weekday_date.1, weekday_date.2)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn first_order_is_bounded() {
        // dt >> tau must land exactly on target, not overshoot
        assert_eq!(first_order(0.0, 10.0, 100.0, 1.0), 10.0);
        let mid = first_order(0.0, 10.0, 1.0, 2.0);
        assert!(mid > 0.0 && mid < 10.0);
    }

    #[test]
    fn slew_limits_rate() {
        assert_eq!(slew(0.0, 100.0, 1.0, 5.0), 5.0);
        assert_eq!(slew(100.0, 0.0, 1.0, 5.0), 95.0);
        assert_eq!(slew(99.0, 100.0, 1.0, 5.0), 100.0);
    }

    #[test]
    fn weekday_schedule_phases() {
        // 2024-01-03 is a Wednesday
        assert_eq!(scheduled_mode(&at((2024, 1, 3), 6, 0)), OccupancyMode::Warmup);
        assert_eq!(
            scheduled_mode(&at((2024, 1, 3), 12, 0)),
            OccupancyMode::Occupied
        );
        assert_eq!(
            scheduled_mode(&at((2024, 1, 3), 19, 0)),
            OccupancyMode::Cooldown
        );
        assert_eq!(
            scheduled_mode(&at((2024, 1, 3), 23, 0)),
            OccupancyMode::Unoccupied
        );
        // 2024-01-06 is a Saturday
        assert_eq!(
            scheduled_mode(&at((2024, 1, 6), 12, 0)),
            OccupancyMode::Unoccupied
        );
    }
}
