use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{
    first_order, mode_setpoint_offsets, pct, scheduled_mode, slew, EquipCtx, OccupancyMode,
    PointBatch,
};
use crate::points::{PointKind, PointValue, RegistryBuilder};
use crate::sim::air_enthalpy;
use crate::sim::params::{
    INTERNAL_GAIN_OCCUPIED_BTU_HR, INTERNAL_GAIN_UNOCCUPIED_BTU_HR, SOLAR_GAIN_FACTOR_BTU_HR,
    ZONE_ENVELOPE_UA_BTU_HR_F, ZONE_THERMAL_MASS_BTU_F,
};

const ZONE_COOLING_CAPACITY: f64 = 50.0;
const REHEAT_MAX_DELTA_F: f64 = 20.0;
const DAMPER_SLEW_PCT_PER_SEC: f64 = 1.0;
const ECONOMIZER_HIGH_LIMIT_F: f64 = 70.0;
const MIN_OA_PCT: f64 = 15.0;

/// Variable air volume box serving one zone. Owns the zone's thermal state
/// and the damper/reheat control loop.
pub struct Vav {
    pub path: String,
    pub zone_name: String,
    pub room_temp: f64,
    pub cooling_setpoint: f64,
    pub heating_setpoint: f64,
    pub discharge_air_temp: f64,
    pub damper_position: f64,
    pub reheat_valve: f64,
    pub cfm_min: f64,
    pub cfm_max: f64,
    pub mode: OccupancyMode,
    pub fault: bool,
    cool_integ: f64,
}

impl Vav {
    pub fn new(path: String, zone_name: String, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let room_temp = 71.0 + rng.gen_range(0.0..2.0);
        Self {
            path,
            zone_name,
            room_temp,
            cooling_setpoint: 74.0,
            heating_setpoint: 70.0,
            discharge_air_temp: 55.0,
            damper_position: 20.0,
            reheat_valve: 0.0,
            cfm_min: 100.0,
            cfm_max: 500.0,
            mode: OccupancyMode::Auto,
            fault: false,
            cool_integ: 0.0,
        }
    }

    fn pt(&self, name: &str) -> String {
        format!("{}.{}", self.path, name)
    }

    pub fn register_points(&self, b: &mut RegistryBuilder) {
        b.register(
            self.pt("room_temp"),
            PointKind::Analog,
            "°F",
            false,
            self.room_temp.into(),
        );
        b.register(
            self.pt("discharge_air_temp"),
            PointKind::Analog,
            "°F",
            false,
            self.discharge_air_temp.into(),
        );
        b.register(
            self.pt("cooling_setpoint"),
            PointKind::Analog,
            "°F",
            true,
            self.cooling_setpoint.into(),
        );
        b.register(
            self.pt("heating_setpoint"),
            PointKind::Analog,
            "°F",
            true,
            self.heating_setpoint.into(),
        );
        b.register(
            self.pt("damper_position"),
            PointKind::Analog,
            "%",
            true,
            self.damper_position.into(),
        );
        b.register(
            self.pt("reheat_valve"),
            PointKind::Analog,
            "%",
            true,
            self.reheat_valve.into(),
        );
        b.register(
            self.pt("airflow_cfm"),
            PointKind::Analog,
            "CFM",
            false,
            self.cfm_actual().into(),
        );
        b.register(
            self.pt("occupancy_mode"),
            PointKind::MultiState,
            "",
            true,
            PointValue::MultiState(0),
        );
        b.register(
            self.pt("occupied"),
            PointKind::Binary,
            "",
            false,
            PointValue::Binary(false),
        );
        b.register(
            self.pt("fault"),
            PointKind::Binary,
            "",
            false,
            PointValue::Binary(false),
        );
    }

    pub fn cfm_actual(&self) -> f64 {
        self.cfm_min + (self.cfm_max - self.cfm_min) * self.damper_position / 100.0
    }

    /// Reheat coil load at the current valve position (MBH).
    pub fn reheat_mbh(&self) -> f64 {
        10.0 * self.reheat_valve / 100.0
    }

    fn effective_mode(&self, ctx: &EquipCtx) -> OccupancyMode {
        let commanded = ctx
            .override_f64(&self.pt("occupancy_mode"))
            .and_then(|raw| OccupancyMode::from_u16(raw as u16))
            .unwrap_or(OccupancyMode::Auto);
        match commanded {
            OccupancyMode::Auto => scheduled_mode(&ctx.date),
            pinned => pinned,
        }
    }

    pub fn advance(&mut self, dt: f64, supply_air_temp: f64, ctx: &EquipCtx) {
        let sat = if (35.0..=120.0).contains(&supply_air_temp) {
            supply_air_temp
        } else {
            self.fault = true;
            supply_air_temp.clamp(35.0, 120.0)
        };

        self.mode = self.effective_mode(ctx);
        let (cool_off, heat_off) = mode_setpoint_offsets(self.mode);
        let cooling_sp = ctx
            .override_f64(&self.pt("cooling_setpoint"))
            .unwrap_or(self.cooling_setpoint)
            + cool_off;
        let heating_sp = ctx
            .override_f64(&self.pt("heating_setpoint"))
            .unwrap_or(self.heating_setpoint)
            + heat_off;

        // Discharge air lags the duct, then reheat lifts it.
        self.discharge_air_temp = first_order(self.discharge_air_temp, sat, dt, 10.0);
        if self.reheat_valve > 0.0 {
            self.discharge_air_temp += REHEAT_MAX_DELTA_F * self.reheat_valve / 100.0;
        }

        let temp_delta = self.zone_temp_delta(sat, ctx, dt);
        self.room_temp += temp_delta;
        if !(55.0..=95.0).contains(&self.room_temp) {
            self.room_temp = self.room_temp.clamp(55.0, 95.0);
        }

        let cooling_error = self.room_temp - cooling_sp;
        let heating_error = heating_sp - self.room_temp;
        let gain = ctx.params.vav_gains;
        let min_damper = (self.cfm_min / self.cfm_max) * 100.0;

        match ctx.override_f64(&self.pt("damper_position")) {
            Some(cmd) => {
                self.damper_position = pct(cmd);
                self.cool_integ = 0.0;
            }
            None => {
                let target = if cooling_error > 0.0 {
                    self.cool_integ =
                        (self.cool_integ + cooling_error * dt * 0.05 * gain).clamp(0.0, 40.0);
                    pct(min_damper + cooling_error * 20.0 * gain + self.cool_integ)
                } else {
                    self.cool_integ = (self.cool_integ - dt * 0.2).max(0.0);
                    min_damper
                };
                self.damper_position =
                    slew(self.damper_position, target, dt, DAMPER_SLEW_PCT_PER_SEC);
            }
        }

        match ctx.override_f64(&self.pt("reheat_valve")) {
            Some(cmd) => self.reheat_valve = pct(cmd),
            None => {
                // Heating only runs against minimum airflow, inside the deadband
                if heating_error > 0.5 && self.damper_position <= min_damper + 5.0 {
                    let target = pct(heating_error * 25.0 * gain);
                    self.reheat_valve = slew(self.reheat_valve, target, dt, 0.5);
                } else {
                    self.reheat_valve = slew(self.reheat_valve, 0.0, dt, 0.6);
                }
            }
        }
        self.damper_position = pct(self.damper_position);
        self.reheat_valve = pct(self.reheat_valve);
    }

    fn zone_temp_delta(&self, sat: f64, ctx: &EquipCtx, dt: f64) -> f64 {
        let p = ctx.params;
        let w = ctx.weather;
        let cfm_frac = self.damper_position / 100.0;

        let supply_air_heat = ZONE_COOLING_CAPACITY * cfm_frac * (sat - self.room_temp) / 10.0;
        let reheat_heat = if self.reheat_valve > 0.0 {
            ZONE_COOLING_CAPACITY * cfm_frac * (REHEAT_MAX_DELTA_F * self.reheat_valve / 100.0)
                / 10.0
        } else {
            0.0
        };
        let envelope_heat =
            ZONE_ENVELOPE_UA_BTU_HR_F * p.envelope_ua * (w.oat - self.room_temp) / 60.0;

        let occupancy = match self.mode {
            OccupancyMode::Occupied | OccupancyMode::Auto => 1.0,
            OccupancyMode::Warmup | OccupancyMode::Cooldown => 0.3,
            OccupancyMode::Unoccupied => 0.0,
        };
        let internal = (INTERNAL_GAIN_UNOCCUPIED_BTU_HR
            + (INTERNAL_GAIN_OCCUPIED_BTU_HR - INTERNAL_GAIN_UNOCCUPIED_BTU_HR) * occupancy)
            * p.internal_gains
            / 60.0;

        let solar = SOLAR_GAIN_FACTOR_BTU_HR * (w.solar_irradiance / 1000.0) * p.solar_gain / 60.0;

        let net = supply_air_heat + reheat_heat + envelope_heat + internal + solar;
        net / (ZONE_THERMAL_MASS_BTU_F * p.thermal_mass) * dt
    }

    pub fn publish(&self, out: &mut PointBatch) {
        out.push((self.pt("room_temp"), self.room_temp.into()));
        out.push((self.pt("discharge_air_temp"), self.discharge_air_temp.into()));
        out.push((self.pt("cooling_setpoint"), self.cooling_setpoint.into()));
        out.push((self.pt("heating_setpoint"), self.heating_setpoint.into()));
        out.push((self.pt("damper_position"), self.damper_position.into()));
        out.push((self.pt("reheat_valve"), self.reheat_valve.into()));
        out.push((self.pt("airflow_cfm"), self.cfm_actual().into()));
        out.push((
            self.pt("occupancy_mode"),
            PointValue::MultiState(self.mode.as_u16()),
        ));
        out.push((
            self.pt("occupied"),
            PointValue::Binary(matches!(
                self.mode,
                OccupancyMode::Occupied | OccupancyMode::Warmup
            )),
        ));
        out.push((self.pt("fault"), PointValue::Binary(self.fault)));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AhuKind {
    VariableVolume,
    FullOutsideAir,
}

/// Air handler: mixes return and outside air, tempers it against the plant
/// loops, and serves its VAV boxes.
pub struct Ahu {
    pub path: String,
    pub kind: AhuKind,
    pub supply_temp: f64,
    pub supply_temp_setpoint: f64,
    pub fan_status: bool,
    pub fan_speed: f64,
    pub return_temp: f64,
    pub mixed_air_temp: f64,
    pub outside_air_damper: f64,
    pub filter_dp: f64,
    pub cooling_valve: f64,
    pub heating_valve: f64,
    pub fan_kw: f64,
    pub fault: bool,
    vav_count: usize,
    rng: StdRng,
}

impl Ahu {
    pub fn new(path: String, kind: AhuKind, vav_count: usize, seed: u64) -> Self {
        Self {
            path,
            kind,
            supply_temp: 55.0,
            supply_temp_setpoint: 55.0,
            fan_status: true,
            fan_speed: 60.0,
            return_temp: 72.0,
            mixed_air_temp: 65.0,
            outside_air_damper: MIN_OA_PCT,
            filter_dp: 0.5,
            cooling_valve: 0.0,
            heating_valve: 0.0,
            fan_kw: 0.0,
            fault: false,
            vav_count,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn pt(&self, name: &str) -> String {
        format!("{}.{}", self.path, name)
    }

    pub fn register_points(&self, b: &mut RegistryBuilder) {
        b.register(
            self.pt("supply_temp"),
            PointKind::Analog,
            "°F",
            false,
            self.supply_temp.into(),
        );
        b.register(
            self.pt("supply_temp_setpoint"),
            PointKind::Analog,
            "°F",
            true,
            self.supply_temp_setpoint.into(),
        );
        b.register(
            self.pt("fan_status"),
            PointKind::Binary,
            "",
            true,
            PointValue::Binary(self.fan_status),
        );
        b.register(
            self.pt("fan_speed"),
            PointKind::Analog,
            "%",
            true,
            self.fan_speed.into(),
        );
        b.register(
            self.pt("return_temp"),
            PointKind::Analog,
            "°F",
            false,
            self.return_temp.into(),
        );
        b.register(
            self.pt("mixed_air_temp"),
            PointKind::Analog,
            "°F",
            false,
            self.mixed_air_temp.into(),
        );
        b.register(
            self.pt("outside_air_damper"),
            PointKind::Analog,
            "%",
            true,
            self.outside_air_damper.into(),
        );
        b.register(
            self.pt("filter_dp"),
            PointKind::Analog,
            "inWC",
            false,
            self.filter_dp.into(),
        );
        b.register(
            self.pt("cooling_valve"),
            PointKind::Analog,
            "%",
            true,
            self.cooling_valve.into(),
        );
        b.register(
            self.pt("heating_valve"),
            PointKind::Analog,
            "%",
            true,
            self.heating_valve.into(),
        );
        b.register(
            self.pt("fan_kw"),
            PointKind::Analog,
            "kW",
            false,
            self.fan_kw.into(),
        );
        b.register(
            self.pt("fault"),
            PointKind::Binary,
            "",
            false,
            PointValue::Binary(false),
        );
    }

    /// Chilled-water coil load at the current valve position (tons).
    pub fn cooling_tons(&self) -> f64 {
        if self.cooling_valve <= 0.0 || !self.fan_status {
            return 0.0;
        }
        let coil_gpm = 30.0 * self.cooling_valve / 100.0;
        let delta_t = (self.mixed_air_temp - self.supply_temp).clamp(0.0, 10.0);
        coil_gpm * delta_t / 24.0
    }

    /// Hot-water coil load at the current valve position (MBH).
    pub fn heating_mbh(&self) -> f64 {
        if !self.fan_status {
            return 0.0;
        }
        500.0 * self.heating_valve / 100.0
    }

    #[allow(clippy::too_many_arguments)]
    pub fn advance(
        &mut self,
        dt: f64,
        zone_avg_temp: Option<f64>,
        worst_vav_damper: f64,
        chw_supply_temp: f64,
        hw_supply_temp: f64,
        ctx: &EquipCtx,
    ) {
        let oat = ctx.weather.oat;
        if !(-40.0..=130.0).contains(&oat) {
            self.fault = true;
        }
        let oat = oat.clamp(-40.0, 130.0);

        if let Some(cmd) = ctx.override_f64(&self.pt("fan_status")) {
            self.fan_status = cmd != 0.0;
        }

        match zone_avg_temp {
            Some(avg) => self.return_temp = avg,
            None => self.return_temp = first_order(self.return_temp, 72.0, dt, 600.0),
        }

        if !self.fan_status {
            self.fan_speed = 0.0;
            self.fan_kw = 0.0;
            self.cooling_valve = slew(self.cooling_valve, 0.0, dt, 2.0);
            self.heating_valve = slew(self.heating_valve, 0.0, dt, 2.0);
            self.supply_temp = first_order(self.supply_temp, self.return_temp, dt, 120.0);
            self.publish_noise();
            return;
        }

        // Economizer: free cooling when outside air is the cheaper sink
        match ctx.override_f64(&self.pt("outside_air_damper")) {
            Some(cmd) => self.outside_air_damper = pct(cmd),
            None => {
                self.outside_air_damper = match self.kind {
                    AhuKind::FullOutsideAir => 100.0,
                    AhuKind::VariableVolume => {
                        let return_enthalpy = air_enthalpy(self.return_temp, 50.0);
                        let econ_ok = ctx.weather.enthalpy < return_enthalpy
                            && oat < ECONOMIZER_HIGH_LIMIT_F;
                        if econ_ok && oat < self.return_temp - 2.0 {
                            pct(MIN_OA_PCT + (self.return_temp - oat) * 8.0)
                        } else {
                            MIN_OA_PCT
                        }
                    }
                }
            }
        }

        let oa_frac = self.outside_air_damper / 100.0;
        self.mixed_air_temp = match self.kind {
            AhuKind::FullOutsideAir => oat,
            AhuKind::VariableVolume => oat * oa_frac + self.return_temp * (1.0 - oa_frac),
        };

        // Supply setpoint resets warmer in cool weather
        self.supply_temp_setpoint = match ctx.override_f64(&self.pt("supply_temp_setpoint")) {
            Some(cmd) => cmd.clamp(45.0, 75.0),
            None => (55.0 + ((70.0 - oat) * 0.15).max(0.0)).clamp(52.0, 65.0),
        };
        let target_supply = self.supply_temp_setpoint;

        match ctx.override_f64(&self.pt("cooling_valve")) {
            Some(cmd) => self.cooling_valve = pct(cmd),
            None => {
                if self.mixed_air_temp > target_supply + 1.0 {
                    let needed = self.mixed_air_temp - target_supply;
                    self.cooling_valve =
                        slew(self.cooling_valve, pct(needed / 25.0 * 100.0), dt, 2.0);
                } else {
                    self.cooling_valve = slew(self.cooling_valve, 0.0, dt, 0.4);
                }
            }
        }
        match ctx.override_f64(&self.pt("heating_valve")) {
            Some(cmd) => self.heating_valve = pct(cmd),
            None => {
                if self.mixed_air_temp < target_supply - 1.0 {
                    let needed = target_supply - self.mixed_air_temp;
                    self.heating_valve =
                        slew(self.heating_valve, pct(needed / 30.0 * 100.0), dt, 2.0);
                } else {
                    self.heating_valve = slew(self.heating_valve, 0.0, dt, 0.4);
                }
            }
        }

        // Coil heat transfer against loop temperatures
        let temp_after_cooling = if self.cooling_valve > 0.0 {
            let max_delta = (self.mixed_air_temp - chw_supply_temp).max(0.0) * 0.85;
            self.mixed_air_temp - max_delta * self.cooling_valve / 100.0
        } else {
            self.mixed_air_temp
        };
        let temp_after_heating = if self.heating_valve > 0.0 {
            let max_delta = (hw_supply_temp - temp_after_cooling).max(0.0) * 0.7;
            temp_after_cooling + max_delta * (self.heating_valve / 100.0) * 0.5
        } else {
            temp_after_cooling
        };

        match ctx.override_f64(&self.pt("fan_speed")) {
            Some(cmd) => self.fan_speed = pct(cmd),
            None => {
                let target = worst_vav_damper.clamp(30.0, 100.0);
                self.fan_speed = slew(self.fan_speed, target, dt, 2.0);
            }
        }

        let fan_heat = 1.5 * self.fan_speed / 100.0;
        self.supply_temp = (temp_after_heating + fan_heat).clamp(40.0, 95.0);

        let fan_hp = self.vav_count.max(1) as f64 * 0.3;
        self.fan_kw =
            fan_hp * 0.75 * (self.fan_speed / 100.0).powi(3) / ctx.params.equipment_efficiency;

        // Filter loads faster during occupied hours
        let load_factor = if matches!(
            scheduled_mode(&ctx.date),
            OccupancyMode::Occupied | OccupancyMode::Warmup
        ) {
            1.0
        } else {
            0.3
        };
        self.filter_dp =
            (self.filter_dp + self.rng.gen_range(0.0..0.00002) * dt * load_factor).min(2.5);

        self.publish_noise();
    }

    fn publish_noise(&mut self) {
        let noise = self.rng.gen_range(-0.05..0.05);
        self.supply_temp += noise;
    }

    pub fn publish(&self, out: &mut PointBatch) {
        out.push((self.pt("supply_temp"), self.supply_temp.into()));
        out.push((
            self.pt("supply_temp_setpoint"),
            self.supply_temp_setpoint.into(),
        ));
        out.push((self.pt("fan_status"), PointValue::Binary(self.fan_status)));
        out.push((self.pt("fan_speed"), self.fan_speed.into()));
        out.push((self.pt("return_temp"), self.return_temp.into()));
        out.push((self.pt("mixed_air_temp"), self.mixed_air_temp.into()));
        out.push((self.pt("outside_air_damper"), self.outside_air_damper.into()));
        out.push((self.pt("filter_dp"), self.filter_dp.into()));
        out.push((self.pt("cooling_valve"), self.cooling_valve.into()));
        out.push((self.pt("heating_valve"), self.heating_valve.into()));
        out.push((self.pt("fan_kw"), self.fan_kw.into()));
        out.push((self.pt("fault"), PointValue::Binary(self.fault)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::points::RegistryBuilder;
    use crate::sim::scenario::{Scenario, ScenarioState};
    use crate::sim::{sim_datetime, PhysicsParams, WeatherConfig, WeatherModel};

    fn test_ctx<'a>(
        weather: &'a crate::sim::WeatherState,
        params: &'a PhysicsParams,
        registry: &'a crate::points::PointRegistry,
        sim_now: f64,
    ) -> EquipCtx<'a> {
        EquipCtx {
            weather,
            params,
            registry,
            sim_now,
            date: sim_datetime(sim_now),
            grid_available: true,
        }
    }

    fn hot_weather() -> crate::sim::WeatherState {
        // Epoch is a July noon; Heatwave pushes it well above the
        // economizer high limit
        let mut model = WeatherModel::new(WeatherConfig::new(36.16, 1));
        model.advance(60.0, &ScenarioState::new(Scenario::Heatwave, 0.0));
        model.state().clone()
    }

    #[test]
    fn warm_zone_opens_damper() {
        let mut vav = Vav::new("B.A.VAV_101".into(), "Office".into(), 1);
        vav.room_temp = 78.0;
        let mut builder = RegistryBuilder::default();
        vav.register_points(&mut builder);
        let registry = builder.build();
        let weather = hot_weather();
        let params = PhysicsParams::default();
        let ctx = test_ctx(&weather, &params, &registry, 0.0);

        let initial = vav.damper_position;
        for _ in 0..120 {
            vav.advance(1.0, 55.0, &ctx);
        }
        assert!(vav.damper_position > initial);
        assert!(vav.reheat_valve == 0.0);
    }

    #[test]
    fn cold_zone_drives_reheat_at_min_airflow() {
        let mut vav = Vav::new("B.A.VAV_101".into(), "Office".into(), 1);
        vav.room_temp = 64.0;
        let mut builder = RegistryBuilder::default();
        vav.register_points(&mut builder);
        let registry = builder.build();
        let mut model = WeatherModel::new(WeatherConfig::new(36.16, 1));
        model.advance(20.0, &ScenarioState::new(Scenario::Snow, 0.0));
        let weather = model.state().clone();
        let params = PhysicsParams::default();
        let ctx = test_ctx(&weather, &params, &registry, 0.0);

        for _ in 0..120 {
            vav.advance(1.0, 55.0, &ctx);
        }
        assert!(vav.reheat_valve > 0.0);
        let min_damper = vav.cfm_min / vav.cfm_max * 100.0;
        assert!(vav.damper_position <= min_damper + 5.0);
    }

    #[test]
    fn damper_override_pins_position() {
        let mut vav = Vav::new("B.A.VAV_101".into(), "Office".into(), 1);
        vav.room_temp = 80.0;
        let mut builder = RegistryBuilder::default();
        vav.register_points(&mut builder);
        let registry = builder.build();
        registry
            .override_point("B.A.VAV_101.damper_position", 100.0, 4, "test", None, 0.0)
            .unwrap();
        let weather = hot_weather();
        let params = PhysicsParams::default();
        let ctx = test_ctx(&weather, &params, &registry, 0.0);
        vav.advance(1.0, 55.0, &ctx);
        assert_eq!(vav.damper_position, 100.0);
    }

    #[test]
    fn economizer_stays_at_minimum_in_heat() {
        let mut ahu = Ahu::new("B.AHU_1".into(), AhuKind::VariableVolume, 5, 2);
        let mut builder = RegistryBuilder::default();
        ahu.register_points(&mut builder);
        let registry = builder.build();
        let weather = hot_weather();
        let params = PhysicsParams::default();
        let ctx = test_ctx(&weather, &params, &registry, 0.0);

        for _ in 0..60 {
            ahu.advance(1.0, Some(74.0), 80.0, 44.0, 180.0, &ctx);
        }
        assert_eq!(ahu.outside_air_damper, MIN_OA_PCT);
        assert!(ahu.cooling_valve > 0.0);
        assert!(ahu.supply_temp < ahu.mixed_air_temp);
    }

    #[test]
    fn full_oa_unit_keeps_damper_open() {
        let mut ahu = Ahu::new("B.AHU_2".into(), AhuKind::FullOutsideAir, 0, 3);
        let mut builder = RegistryBuilder::default();
        ahu.register_points(&mut builder);
        let registry = builder.build();
        let weather = hot_weather();
        let params = PhysicsParams::default();
        let ctx = test_ctx(&weather, &params, &registry, 0.0);
        ahu.advance(1.0, None, 50.0, 44.0, 180.0, &ctx);
        assert_eq!(ahu.outside_air_damper, 100.0);
    }

    #[test]
    fn fan_follows_worst_zone_damper() {
        let mut ahu = Ahu::new("B.AHU_1".into(), AhuKind::VariableVolume, 5, 2);
        let mut builder = RegistryBuilder::default();
        ahu.register_points(&mut builder);
        let registry = builder.build();
        let weather = hot_weather();
        let params = PhysicsParams::default();
        let ctx = test_ctx(&weather, &params, &registry, 0.0);
        for _ in 0..120 {
            ahu.advance(1.0, Some(74.0), 95.0, 44.0, 180.0, &ctx);
        }
        assert!(ahu.fan_speed > 90.0);
        assert!(ahu.fan_kw > 0.0);
    }
}
