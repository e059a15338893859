use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use std::sync::Mutex;
use std::time::Instant;

/// Calendar instant the simulated world boots into: a summer weekday at
/// noon, so a fresh campus has occupied buildings and a live cooling
/// plant. Weather and occupancy schedules derive from this epoch plus
/// elapsed simulated seconds.
pub fn sim_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 7, 1)
        .expect("valid date")
        .and_hms_opt(12, 0, 0)
        .expect("valid time")
}

#[derive(Debug)]
struct ClockState {
    start_wall: Instant,
    start_sim: f64,
    speed: f64,
}

/// Simulated clock running at a configurable multiple of wall time.
///
/// `set_speed` rebases the origin so `sim_now()` is continuous across the
/// change; readers never observe a jump.
#[derive(Debug)]
pub struct SimClock {
    state: Mutex<ClockState>,
}

impl SimClock {
    pub fn new(speed: f64) -> Self {
        Self {
            state: Mutex::new(ClockState {
                start_wall: Instant::now(),
                start_sim: 0.0,
                speed: speed.max(0.0),
            }),
        }
    }

    /// Simulated seconds since the epoch.
    pub fn sim_now(&self) -> f64 {
        let state = self.state.lock().expect("clock lock");
        state.start_sim + state.start_wall.elapsed().as_secs_f64() * state.speed
    }

    pub fn speed(&self) -> f64 {
        self.state.lock().expect("clock lock").speed
    }

    pub fn set_speed(&self, speed: f64) {
        let mut state = self.state.lock().expect("clock lock");
        let now_sim = state.start_sim + state.start_wall.elapsed().as_secs_f64() * state.speed;
        state.start_sim = now_sim;
        state.start_wall = Instant::now();
        state.speed = speed.max(0.0);
    }

    /// Calendar form of the current simulated instant.
    pub fn sim_date(&self) -> NaiveDateTime {
        sim_datetime(self.sim_now())
    }
}

/// Calendar form of an arbitrary simulated second offset.
pub fn sim_datetime(sim_seconds: f64) -> NaiveDateTime {
    sim_epoch() + TimeDelta::milliseconds((sim_seconds * 1000.0) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn sim_time_advances_with_wall_time() {
        let clock = SimClock::new(100.0);
        let t0 = clock.sim_now();
        sleep(Duration::from_millis(20));
        let t1 = clock.sim_now();
        assert!(t1 > t0);
        // 20ms of wall time at 100x is ~2 simulated seconds
        assert!(t1 - t0 >= 1.0);
    }

    #[test]
    fn set_speed_is_continuous() {
        let clock = SimClock::new(50.0);
        sleep(Duration::from_millis(10));
        let before = clock.sim_now();
        clock.set_speed(1.0);
        let after = clock.sim_now();
        // rebasing must not jump the clock backwards or far forwards
        assert!(after >= before);
        assert!(after - before < 1.0);
    }

    #[test]
    fn sim_datetime_maps_epoch() {
        let at = sim_datetime(0.0);
        assert_eq!(at, sim_epoch());
        let later = sim_datetime(3600.0);
        assert_eq!((later - at).num_seconds(), 3600);
    }
}
