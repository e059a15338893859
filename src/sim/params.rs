use serde::{Deserialize, Serialize};

/// Physics tuning multipliers. Each scales the corresponding physical term
/// wherever it appears in an equipment model; there are no other tuning
/// knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PhysicsParams {
    pub thermal_mass: f64,
    pub envelope_ua: f64,
    pub internal_gains: f64,
    pub solar_gain: f64,
    pub vav_gains: f64,
    pub equipment_efficiency: f64,
}

impl Default for PhysicsParams {
    fn default() -> Self {
        Self {
            thermal_mass: 1.0,
            envelope_ua: 1.0,
            internal_gains: 1.0,
            solar_gain: 1.0,
            vav_gains: 1.0,
            equipment_efficiency: 1.0,
        }
    }
}

impl PhysicsParams {
    pub const MIN: f64 = 0.1;
    pub const MAX: f64 = 10.0;

    /// Clamp every multiplier into its allowed band.
    pub fn clamped(mut self) -> Self {
        for v in [
            &mut self.thermal_mass,
            &mut self.envelope_ua,
            &mut self.internal_gains,
            &mut self.solar_gain,
            &mut self.vav_gains,
            &mut self.equipment_efficiency,
        ] {
            if !v.is_finite() {
                *v = 1.0;
            }
            *v = v.clamp(Self::MIN, Self::MAX);
        }
        self
    }
}

// Base physical constants the multipliers scale. Values follow typical
// light-commercial construction.
pub const ZONE_THERMAL_MASS_BTU_F: f64 = 1000.0;
pub const ZONE_ENVELOPE_UA_BTU_HR_F: f64 = 10.0;
pub const INTERNAL_GAIN_OCCUPIED_BTU_HR: f64 = 15.0;
pub const INTERNAL_GAIN_UNOCCUPIED_BTU_HR: f64 = 2.0;
pub const SOLAR_GAIN_FACTOR_BTU_HR: f64 = 8.0;
pub const CHILLER_KW_PER_TON: f64 = 0.6;
pub const CHW_SUPPLY_SETPOINT_F: f64 = 44.0;
pub const HW_SUPPLY_SETPOINT_F: f64 = 180.0;
pub const BOILER_EFFICIENCY: f64 = 0.85;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_unity() {
        let p = PhysicsParams::default();
        assert_eq!(p.thermal_mass, 1.0);
        assert_eq!(p.equipment_efficiency, 1.0);
    }

    #[test]
    fn clamp_bounds_out_of_range() {
        let p = PhysicsParams {
            thermal_mass: 0.0,
            envelope_ua: 100.0,
            internal_gains: f64::NAN,
            ..Default::default()
        }
        .clamped();
        assert_eq!(p.thermal_mass, PhysicsParams::MIN);
        assert_eq!(p.envelope_ua, PhysicsParams::MAX);
        assert_eq!(p.internal_gains, 1.0);
    }
}
