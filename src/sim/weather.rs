use chrono::{Datelike, Timelike};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use super::clock::sim_datetime;
use super::scenario::{Scenario, ScenarioState};

const STANDARD_PRESSURE_INHG: f64 = 29.92;

/// Full outdoor conditions for one tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherState {
    /// Outside air temperature (°F)
    pub oat: f64,
    /// Relative humidity (%)
    pub humidity: f64,
    /// Wet bulb temperature (°F)
    pub wet_bulb: f64,
    /// Dew point temperature (°F)
    pub dew_point: f64,
    /// Moist air enthalpy (BTU/lb)
    pub enthalpy: f64,
    /// Barometric pressure (inHg)
    pub pressure: f64,
    /// Horizontal solar irradiance (W/m²)
    pub solar_irradiance: f64,
    /// Wind speed (mph)
    pub wind_speed: f64,
    /// Cloud cover fraction (0-1)
    pub cloud_cover: f64,
}

impl Default for WeatherState {
    fn default() -> Self {
        psychrometrics(70.0, 50.0, STANDARD_PRESSURE_INHG).with_sky(0.0, 5.0, 0.1)
    }
}

impl WeatherState {
    fn with_sky(mut self, irradiance: f64, wind: f64, clouds: f64) -> Self {
        self.solar_irradiance = irradiance;
        self.wind_speed = wind;
        self.cloud_cover = clouds;
        self
    }
}

/// Saturation vapor pressure, dew point, humidity ratio, enthalpy and wet
/// bulb from dry bulb + RH, using the Magnus formula and Stull's wet-bulb
/// approximation.
pub fn psychrometrics(t_f: f64, rh: f64, pressure_inhg: f64) -> WeatherState {
    let rh = rh.clamp(0.1, 100.0);
    let t_c = (t_f - 32.0) * 5.0 / 9.0;

    // Saturation and actual vapor pressure (hPa)
    let es = 6.112 * ((17.67 * t_c) / (t_c + 243.5)).exp();
    let e = es * (rh / 100.0);

    let dew_point = {
        let alpha = (e / 6.112).ln();
        let t_dp_c = (alpha * 243.5) / (17.67 - alpha);
        t_dp_c * 9.0 / 5.0 + 32.0
    };

    // Humidity ratio, lb water / lb dry air
    let p_atm_hpa = pressure_inhg * 33.8639;
    let w = 0.622 * e / (p_atm_hpa - e).max(1.0);

    let enthalpy = 0.24 * t_f + w * (1061.0 + 0.444 * t_f);

    // Stull (2011) wet bulb approximation, valid over normal HVAC ranges
    let wet_bulb = {
        let t_wb_c = t_c * (0.151977 * (rh + 8.313659).sqrt()).atan() + (t_c + rh).atan()
            - (rh - 1.676331).atan()
            + 0.00391838 * rh.powf(1.5) * (0.023101 * rh).atan()
            - 4.686035;
        t_wb_c * 9.0 / 5.0 + 32.0
    };

    WeatherState {
        oat: t_f,
        humidity: rh,
        wet_bulb,
        dew_point,
        enthalpy,
        pressure: pressure_inhg,
        solar_irradiance: 0.0,
        wind_speed: 0.0,
        cloud_cover: 0.0,
    }
}

/// Moist air enthalpy (BTU/lb) for economizer comparisons.
pub fn air_enthalpy(t_f: f64, rh: f64) -> f64 {
    psychrometrics(t_f, rh, STANDARD_PRESSURE_INHG).enthalpy
}

#[derive(Debug, Clone)]
pub struct WeatherConfig {
    pub geo_lat: f64,
    pub base_temp_f: f64,
    pub daily_swing_f: f64,
    pub seed: u64,
}

impl WeatherConfig {
    pub fn new(geo_lat: f64, seed: u64) -> Self {
        Self {
            geo_lat,
            base_temp_f: 70.0,
            daily_swing_f: 20.0,
            seed,
        }
    }
}

/// Synthetic weather generator: seasonal + diurnal baseline shaped by the
/// active scenario.
pub struct WeatherModel {
    cfg: WeatherConfig,
    rng: StdRng,
    state: WeatherState,
    cloud_target: f64,
    next_cloud_resample: f64,
}

impl WeatherModel {
    pub fn new(cfg: WeatherConfig) -> Self {
        let rng = StdRng::seed_from_u64(cfg.seed);
        Self {
            cfg,
            rng,
            state: WeatherState::default(),
            cloud_target: 0.15,
            next_cloud_resample: 0.0,
        }
    }

    pub fn state(&self) -> &WeatherState {
        &self.state
    }

    /// Baseline OAT at a simulated instant, before scenario shaping.
    fn baseline_oat(&self, sim_now: f64) -> f64 {
        let date = sim_datetime(sim_now);
        let day_of_year = date.ordinal() as f64;
        let hour = date.hour() as f64 + date.minute() as f64 / 60.0;

        // Season peaks near the summer solstice; latitude cools the annual mean.
        let seasonal = self.cfg.daily_swing_f * (2.0 * PI * (day_of_year - 172.0) / 365.0).cos();
        let adjusted_base =
            self.cfg.base_temp_f + seasonal - (self.cfg.geo_lat.abs() - 30.0) * 0.5;

        // Diurnal wave: peak at 15:00, trough at 03:00.
        let wave = ((hour - 15.0) * 2.0 * PI / 24.0).cos();
        adjusted_base + wave * self.cfg.daily_swing_f / 2.0
    }

    fn baseline_rh(&self, sim_now: f64) -> f64 {
        let date = sim_datetime(sim_now);
        let hour = date.hour() as f64 + date.minute() as f64 / 60.0;
        // RH runs inverse to temperature: ~90% pre-dawn, ~50% mid-afternoon.
        let rh_wave = ((hour - 5.0) * 2.0 * PI / 24.0).cos();
        (70.0 + 20.0 * rh_wave).clamp(0.0, 100.0)
    }

    fn clear_sky_irradiance(&self, sim_now: f64) -> f64 {
        let date = sim_datetime(sim_now);
        let hour = date.hour() as f64 + date.minute() as f64 / 60.0;
        let time_of_day = hour / 24.0;
        if !(0.25..0.75).contains(&time_of_day) {
            return 0.0;
        }
        let sun_angle = ((time_of_day - 0.25) * 2.0 * PI).sin().max(0.0);
        let day_of_year = date.ordinal() as f64;
        let seasonal = 0.75 + 0.25 * (2.0 * PI * (day_of_year - 172.0) / 365.0).cos();
        let latitude_derate = 1.0 - (self.cfg.geo_lat.abs() / 90.0) * 0.3;
        1000.0 * sun_angle * seasonal * latitude_derate
    }

    /// Advance to `sim_now`, producing the next conditions.
    pub fn advance(&mut self, sim_now: f64, scenario: &ScenarioState) {
        if sim_now >= self.next_cloud_resample {
            self.cloud_target = self.rng.gen_range(0.0..0.4);
            self.next_cloud_resample = sim_now + 600.0;
        }
        let mut clouds =
            self.state.cloud_cover + (self.cloud_target - self.state.cloud_cover) * 0.05;
        let mut oat = self.baseline_oat(sim_now);
        let mut rh = self.baseline_rh(sim_now);
        let mut wind = 5.0 + 5.0 * ((sim_now / 3600.0).sin().abs());

        match scenario.scenario {
            Scenario::Normal => {}
            Scenario::Snow => {
                // Freezing band regardless of season
                oat = (25.0 + (scenario.elapsed(sim_now) / 20.0).sin() * 2.0).clamp(20.0, 30.0);
                rh = rh.max(80.0);
                clouds = clouds.max(0.9);
            }
            Scenario::Rainstorm => {
                oat = oat.min(62.0);
                rh = rh.max(90.0);
                clouds = clouds.max(0.9);
                wind = wind.max(12.0);
            }
            Scenario::Windstorm => {
                oat += self.rng.gen_range(-3.0..3.0);
                wind = self.rng.gen_range(25.0..45.0);
            }
            Scenario::Thunderstorm => {
                let drop = (scenario.elapsed(sim_now) * 0.2).min(15.0);
                oat -= drop;
                rh = rh.max(85.0);
                clouds = clouds.max(0.95);
                wind = wind.max(20.0);
            }
            Scenario::Heatwave => {
                oat = (oat + 15.0).min(110.0);
                rh = rh.max(55.0);
                clouds = clouds.min(0.1);
            }
        }

        let irradiance = self.clear_sky_irradiance(sim_now) * (1.0 - clouds * 0.8);
        self.state =
            psychrometrics(oat, rh, STANDARD_PRESSURE_INHG).with_sky(irradiance, wind, clouds);
    }
}
