use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{first_order, pct, EquipCtx, PointBatch};
use crate::points::{PointKind, PointValue, RegistryBuilder};
use crate::sim::Scenario;

/// Utility revenue meter at the campus service entrance. Readings are
/// measurements, except `grid_connected` which clients may force open to
/// exercise outage behavior.
pub struct Meter {
    pub path: String,
    pub kw: f64,
    pub kvar: f64,
    pub kva: f64,
    pub power_factor: f64,
    pub voltage_a: f64,
    pub voltage_b: f64,
    pub voltage_c: f64,
    pub current_a: f64,
    pub current_b: f64,
    pub current_c: f64,
    pub frequency: f64,
    pub kwh_total: f64,
    pub demand_kw: f64,
    pub peak_demand_kw: f64,
    pub grid_connected: bool,
    rng: StdRng,
}

impl Meter {
    pub fn new(path: String, seed: u64) -> Self {
        Self {
            path,
            kw: 0.0,
            kvar: 0.0,
            kva: 0.0,
            power_factor: 0.95,
            voltage_a: 277.0,
            voltage_b: 277.0,
            voltage_c: 277.0,
            current_a: 0.0,
            current_b: 0.0,
            current_c: 0.0,
            frequency: 60.0,
            kwh_total: 0.0,
            demand_kw: 0.0,
            peak_demand_kw: 0.0,
            grid_connected: true,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn pt(&self, name: &str) -> String {
        format!("{}.{}", self.path, name)
    }

    pub fn register_points(&self, b: &mut RegistryBuilder) {
        b.register(self.pt("kw"), PointKind::Analog, "kW", false, 0.0.into());
        b.register(self.pt("kvar"), PointKind::Analog, "kVAR", false, 0.0.into());
        b.register(self.pt("kva"), PointKind::Analog, "kVA", false, 0.0.into());
        b.register(
            self.pt("power_factor"),
            PointKind::Analog,
            "",
            false,
            self.power_factor.into(),
        );
        for phase in ["voltage_a", "voltage_b", "voltage_c"] {
            b.register(self.pt(phase), PointKind::Analog, "V", false, 277.0.into());
        }
        for phase in ["current_a", "current_b", "current_c"] {
            b.register(self.pt(phase), PointKind::Analog, "A", false, 0.0.into());
        }
        b.register(
            self.pt("frequency"),
            PointKind::Analog,
            "Hz",
            false,
            60.0.into(),
        );
        b.register(
            self.pt("kwh_total"),
            PointKind::Analog,
            "kWh",
            false,
            0.0.into(),
        );
        b.register(
            self.pt("demand_kw"),
            PointKind::Analog,
            "kW",
            false,
            0.0.into(),
        );
        b.register(
            self.pt("peak_demand_kw"),
            PointKind::Analog,
            "kW",
            false,
            0.0.into(),
        );
        b.register(
            self.pt("grid_connected"),
            PointKind::Binary,
            "",
            true,
            PointValue::Binary(true),
        );
    }

    pub fn advance(&mut self, dt: f64, import_kw: f64, scenario: Scenario, ctx: &EquipCtx) {
        self.grid_connected = ctx.grid_available;

        if !self.grid_connected {
            self.kw = 0.0;
            self.kvar = 0.0;
            self.kva = 0.0;
            self.current_a = 0.0;
            self.current_b = 0.0;
            self.current_c = 0.0;
            self.voltage_a = 0.0;
            self.voltage_b = 0.0;
            self.voltage_c = 0.0;
            self.frequency = 0.0;
            return;
        }

        self.kw = import_kw.max(0.0);
        self.kvar = self.kw * (self.power_factor.acos()).tan();
        self.kva = (self.kw.powi(2) + self.kvar.powi(2)).sqrt();

        if self.kva > 0.0 {
            let amps = self.kva * 1000.0 / (3.0_f64.sqrt() * 480.0);
            self.current_a = amps + self.rng.gen_range(-2.0..2.0);
            self.current_b = amps + self.rng.gen_range(-2.0..2.0);
            self.current_c = amps + self.rng.gen_range(-2.0..2.0);
        } else {
            self.current_a = 0.0;
            self.current_b = 0.0;
            self.current_c = 0.0;
        }

        // Thunderstorm brownouts sag voltage and frequency before the trip
        let (v_sag, f_sag) = if scenario == Scenario::Thunderstorm && self.rng.gen_bool(0.2) {
            (self.rng.gen_range(15.0..40.0), self.rng.gen_range(0.3..0.8))
        } else {
            (0.0, 0.0)
        };
        self.voltage_a = 277.0 - v_sag + self.rng.gen_range(-3.0..3.0);
        self.voltage_b = 277.0 - v_sag + self.rng.gen_range(-3.0..3.0);
        self.voltage_c = 277.0 - v_sag + self.rng.gen_range(-3.0..3.0);
        self.frequency = 60.0 - f_sag + self.rng.gen_range(-0.02..0.02);

        self.kwh_total += self.kw * dt / 3600.0;
        self.demand_kw = self.kw * 0.1 + self.demand_kw * 0.9;
        self.peak_demand_kw = self.peak_demand_kw.max(self.demand_kw);
    }

    pub fn publish(&self, out: &mut PointBatch) {
        out.push((self.pt("kw"), self.kw.into()));
        out.push((self.pt("kvar"), self.kvar.into()));
        out.push((self.pt("kva"), self.kva.into()));
        out.push((self.pt("power_factor"), self.power_factor.into()));
        out.push((self.pt("voltage_a"), self.voltage_a.into()));
        out.push((self.pt("voltage_b"), self.voltage_b.into()));
        out.push((self.pt("voltage_c"), self.voltage_c.into()));
        out.push((self.pt("current_a"), self.current_a.into()));
        out.push((self.pt("current_b"), self.current_b.into()));
        out.push((self.pt("current_c"), self.current_c.into()));
        out.push((self.pt("frequency"), self.frequency.into()));
        out.push((self.pt("kwh_total"), self.kwh_total.into()));
        out.push((self.pt("demand_kw"), self.demand_kw.into()));
        out.push((self.pt("peak_demand_kw"), self.peak_demand_kw.into()));
        out.push((
            self.pt("grid_connected"),
            PointValue::Binary(self.grid_connected),
        ));
    }
}

pub struct SolarArray {
    pub path: String,
    pub capacity_kw: f64,
    pub output_kw: f64,
    pub output_kwh_total: f64,
    pub panel_temp: f64,
    pub irradiance_w_m2: f64,
    pub producing: bool,
    pub fault: bool,
}

impl SolarArray {
    pub fn new(path: String, capacity_kw: f64) -> Self {
        Self {
            path,
            capacity_kw,
            output_kw: 0.0,
            output_kwh_total: 0.0,
            panel_temp: 77.0,
            irradiance_w_m2: 0.0,
            producing: false,
            fault: false,
        }
    }

    fn pt(&self, name: &str) -> String {
        format!("{}.{}", self.path, name)
    }

    pub fn register_points(&self, b: &mut RegistryBuilder) {
        b.register(
            self.pt("status"),
            PointKind::Binary,
            "",
            true,
            PointValue::Binary(false),
        );
        b.register(
            self.pt("output_kw"),
            PointKind::Analog,
            "kW",
            false,
            0.0.into(),
        );
        b.register(
            self.pt("output_kwh_total"),
            PointKind::Analog,
            "kWh",
            false,
            0.0.into(),
        );
        b.register(
            self.pt("panel_temp"),
            PointKind::Analog,
            "°F",
            false,
            77.0.into(),
        );
        b.register(
            self.pt("irradiance_w_m2"),
            PointKind::Analog,
            "W/m²",
            false,
            0.0.into(),
        );
        b.register(
            self.pt("fault"),
            PointKind::Binary,
            "",
            false,
            PointValue::Binary(false),
        );
    }

    pub fn advance(&mut self, dt: f64, ctx: &EquipCtx) {
        // Curtailment: status forced to 0 shuts the inverter down
        let curtailed = ctx
            .override_f64(&self.pt("status"))
            .map_or(false, |v| v == 0.0);
        if curtailed || self.fault {
            self.output_kw = 0.0;
            self.producing = false;
            return;
        }

        self.irradiance_w_m2 = ctx.weather.solar_irradiance;
        self.panel_temp = ctx.weather.oat + self.irradiance_w_m2 / 50.0;
        // -0.4% output per °F above the 77°F rating point
        let temp_derate = (1.0 - ((self.panel_temp - 77.0).max(0.0) * 0.004)).max(0.0);
        let inverter_efficiency = 0.96;

        self.output_kw = self.capacity_kw
            * (self.irradiance_w_m2 / 1000.0).clamp(0.0, 1.0)
            * temp_derate
            * inverter_efficiency;
        self.producing = self.output_kw > 0.0;
        self.output_kwh_total += self.output_kw * dt / 3600.0;
    }

    pub fn publish(&self, out: &mut PointBatch) {
        out.push((self.pt("status"), PointValue::Binary(self.producing)));
        out.push((self.pt("output_kw"), self.output_kw.into()));
        out.push((self.pt("output_kwh_total"), self.output_kwh_total.into()));
        out.push((self.pt("panel_temp"), self.panel_temp.into()));
        out.push((self.pt("irradiance_w_m2"), self.irradiance_w_m2.into()));
        out.push((self.pt("fault"), PointValue::Binary(self.fault)));
    }
}

/// UPS run states: Online -> OnBattery on grid loss, back Online on
/// restore, OnBattery -> Depleted when the battery empties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsState {
    Online,
    OnBattery,
    Depleted,
}

impl UpsState {
    fn as_u16(self) -> u16 {
        match self {
            UpsState::Online => 0,
            UpsState::OnBattery => 1,
            UpsState::Depleted => 2,
        }
    }
}

pub struct Ups {
    pub path: String,
    pub capacity_kva: f64,
    pub capacity_kwh: f64,
    pub state: UpsState,
    pub load_kw: f64,
    pub load_pct: f64,
    pub battery_pct: f64,
    pub battery_runtime_min: f64,
    pub fault: bool,
}

impl Ups {
    pub fn new(path: String, capacity_kva: f64, capacity_kwh: f64) -> Self {
        Self {
            path,
            capacity_kva,
            capacity_kwh,
            state: UpsState::Online,
            load_kw: 0.0,
            load_pct: 0.0,
            battery_pct: 100.0,
            battery_runtime_min: 30.0,
            fault: false,
        }
    }

    fn pt(&self, name: &str) -> String {
        format!("{}.{}", self.path, name)
    }

    pub fn register_points(&self, b: &mut RegistryBuilder) {
        b.register(
            self.pt("status"),
            PointKind::MultiState,
            "",
            false,
            PointValue::MultiState(0),
        );
        b.register(
            self.pt("load_kw"),
            PointKind::Analog,
            "kW",
            false,
            0.0.into(),
        );
        b.register(
            self.pt("load_pct"),
            PointKind::Analog,
            "%",
            false,
            0.0.into(),
        );
        b.register(
            self.pt("battery_pct"),
            PointKind::Analog,
            "%",
            false,
            100.0.into(),
        );
        b.register(
            self.pt("battery_runtime_min"),
            PointKind::Analog,
            "min",
            false,
            30.0.into(),
        );
        b.register(
            self.pt("fault"),
            PointKind::Binary,
            "",
            false,
            PointValue::Binary(false),
        );
    }

    pub fn advance(&mut self, dt: f64, load_kw: f64, ctx: &EquipCtx) {
        self.load_kw = load_kw.max(0.0);
        self.load_pct = pct(self.load_kw / (self.capacity_kva * 0.9).max(0.1) * 100.0);

        self.state = match (self.state, ctx.grid_available) {
            (_, true) => UpsState::Online,
            (UpsState::Online, false) => UpsState::OnBattery,
            (UpsState::OnBattery, false) => {
                if self.battery_pct <= 0.0 {
                    UpsState::Depleted
                } else {
                    UpsState::OnBattery
                }
            }
            (UpsState::Depleted, false) => UpsState::Depleted,
        };

        match self.state {
            UpsState::OnBattery => {
                let drain_pct = self.load_kw / self.capacity_kwh.max(0.1) / 3600.0 * dt * 100.0;
                self.battery_pct = (self.battery_pct - drain_pct).max(0.0);
                if self.battery_pct <= 0.0 {
                    self.state = UpsState::Depleted;
                }
            }
            UpsState::Online => {
                self.battery_pct = (self.battery_pct + dt / 60.0 * 2.0).min(100.0);
            }
            UpsState::Depleted => {}
        }

        if self.load_kw > 0.0 {
            self.battery_runtime_min =
                self.battery_pct / 100.0 * self.capacity_kwh / self.load_kw * 60.0;
        }
    }

    pub fn publish(&self, out: &mut PointBatch) {
        out.push((
            self.pt("status"),
            PointValue::MultiState(self.state.as_u16()),
        ));
        out.push((self.pt("load_kw"), self.load_kw.into()));
        out.push((self.pt("load_pct"), self.load_pct.into()));
        out.push((self.pt("battery_pct"), self.battery_pct.into()));
        out.push((self.pt("battery_runtime_min"), self.battery_runtime_min.into()));
        out.push((self.pt("fault"), PointValue::Binary(self.fault)));
    }
}

/// Generator run states with a 60-second dwell on the shutdown path to
/// prevent short cycling; startup is paced by the grid-loss confirmation
/// delay instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    Off,
    Starting,
    Running,
    Cooldown,
}

impl GeneratorState {
    fn as_u16(self) -> u16 {
        match self {
            GeneratorState::Off => 0,
            GeneratorState::Starting => 1,
            GeneratorState::Running => 2,
            GeneratorState::Cooldown => 3,
        }
    }
}

const GRID_LOSS_CONFIRM_SECONDS: f64 = 4.0;
const GENERATOR_CRANK_SECONDS: f64 = 5.0;
const GENERATOR_MIN_STATE_SECONDS: f64 = 60.0;

pub struct Generator {
    pub path: String,
    pub capacity_kw: f64,
    pub state: GeneratorState,
    pub output_kw: f64,
    pub fuel_level_pct: f64,
    pub fuel_rate_gph: f64,
    pub runtime_hours: f64,
    pub coolant_temp: f64,
    pub fault: bool,
    state_timer: f64,
    grid_loss_timer: f64,
}

impl Generator {
    pub fn new(path: String, capacity_kw: f64) -> Self {
        Self {
            path,
            capacity_kw,
            state: GeneratorState::Off,
            output_kw: 0.0,
            fuel_level_pct: 100.0,
            fuel_rate_gph: 0.0,
            runtime_hours: 0.0,
            coolant_temp: 80.0,
            fault: false,
            state_timer: 1.0e9,
            grid_loss_timer: 0.0,
        }
    }

    fn pt(&self, name: &str) -> String {
        format!("{}.{}", self.path, name)
    }

    pub fn register_points(&self, b: &mut RegistryBuilder) {
        b.register(
            self.pt("status"),
            PointKind::MultiState,
            "",
            true,
            PointValue::MultiState(0),
        );
        b.register(
            self.pt("output_kw"),
            PointKind::Analog,
            "kW",
            false,
            0.0.into(),
        );
        b.register(
            self.pt("fuel_level_pct"),
            PointKind::Analog,
            "%",
            false,
            100.0.into(),
        );
        b.register(
            self.pt("fuel_rate_gph"),
            PointKind::Analog,
            "GPH",
            false,
            0.0.into(),
        );
        b.register(
            self.pt("runtime_hours"),
            PointKind::Analog,
            "h",
            false,
            0.0.into(),
        );
        b.register(
            self.pt("coolant_temp"),
            PointKind::Analog,
            "°F",
            false,
            self.coolant_temp.into(),
        );
        b.register(
            self.pt("fault"),
            PointKind::Binary,
            "",
            false,
            PointValue::Binary(false),
        );
    }

    pub fn advance(&mut self, dt: f64, demand_kw: f64, ctx: &EquipCtx) {
        self.state_timer += dt;
        if ctx.grid_available {
            self.grid_loss_timer = 0.0;
        } else {
            self.grid_loss_timer += dt;
        }

        // Manual start/stop beats the automatic transfer logic
        let manual = ctx.override_f64(&self.pt("status"));
        match manual {
            Some(v) if v >= 1.0 => {
                if matches!(self.state, GeneratorState::Off | GeneratorState::Cooldown) {
                    self.state = GeneratorState::Starting;
                    self.state_timer = 0.0;
                }
            }
            Some(_) => {
                if !matches!(self.state, GeneratorState::Off) {
                    self.state = GeneratorState::Off;
                    self.state_timer = 0.0;
                }
            }
            None => self.step_state(),
        }

        if self.state == GeneratorState::Starting && self.state_timer >= GENERATOR_CRANK_SECONDS {
            self.state = GeneratorState::Running;
            self.state_timer = 0.0;
        }
        if self.state == GeneratorState::Cooldown
            && self.state_timer >= GENERATOR_MIN_STATE_SECONDS
        {
            self.state = GeneratorState::Off;
            self.state_timer = 0.0;
        }

        if self.state == GeneratorState::Running && !self.fault && self.fuel_level_pct > 0.0 {
            let target = demand_kw.clamp(0.0, self.capacity_kw);
            self.output_kw = first_order(self.output_kw, target, dt, 2.0);

            // ~7 gal/hr per 100 kW of output, against a 500 gal tank
            self.fuel_rate_gph = self.output_kw / 100.0 * 7.0;
            self.fuel_level_pct =
                (self.fuel_level_pct - self.fuel_rate_gph * dt / 3600.0 / 5.0).max(0.0);
            self.runtime_hours += dt / 3600.0;
            let load_pct = self.output_kw / self.capacity_kw.max(1.0);
            self.coolant_temp = first_order(self.coolant_temp, 180.0 + load_pct * 30.0, dt, 60.0);
        } else {
            self.output_kw = first_order(self.output_kw, 0.0, dt, 2.0);
            self.fuel_rate_gph = 0.0;
            self.coolant_temp = first_order(self.coolant_temp, ctx.weather.oat + 10.0, dt, 600.0);
        }
    }

    fn step_state(&mut self) {
        match self.state {
            GeneratorState::Off => {
                if self.grid_loss_timer >= GRID_LOSS_CONFIRM_SECONDS {
                    self.state = GeneratorState::Starting;
                    self.state_timer = 0.0;
                }
            }
            GeneratorState::Running => {
                if self.grid_loss_timer == 0.0 && self.state_timer >= GENERATOR_MIN_STATE_SECONDS {
                    self.state = GeneratorState::Cooldown;
                    self.state_timer = 0.0;
                }
            }
            GeneratorState::Cooldown => {
                if self.grid_loss_timer > 0.0 {
                    // Outage returned during cooldown; go straight back on line
                    self.state = GeneratorState::Running;
                    self.state_timer = 0.0;
                }
            }
            GeneratorState::Starting => {}
        }
    }

    pub fn publish(&self, out: &mut PointBatch) {
        out.push((
            self.pt("status"),
            PointValue::MultiState(self.state.as_u16()),
        ));
        out.push((self.pt("output_kw"), self.output_kw.into()));
        out.push((self.pt("fuel_level_pct"), self.fuel_level_pct.into()));
        out.push((self.pt("fuel_rate_gph"), self.fuel_rate_gph.into()));
        out.push((self.pt("runtime_hours"), self.runtime_hours.into()));
        out.push((self.pt("coolant_temp"), self.coolant_temp.into()));
        out.push((self.pt("fault"), PointValue::Binary(self.fault)));
    }
}

pub struct Transformer {
    pub path: String,
    pub capacity_kva: f64,
    pub load_kva: f64,
    pub load_pct: f64,
    pub winding_temp: f64,
    pub oil_temp: f64,
    pub tap_position: i64,
    pub secondary_voltage: f64,
    pub fault: bool,
}

impl Transformer {
    pub fn new(path: String, capacity_kva: f64) -> Self {
        Self {
            path,
            capacity_kva,
            load_kva: 0.0,
            load_pct: 0.0,
            winding_temp: 85.0,
            oil_temp: 75.0,
            tap_position: 0,
            secondary_voltage: 480.0,
            fault: false,
        }
    }

    fn pt(&self, name: &str) -> String {
        format!("{}.{}", self.path, name)
    }

    pub fn register_points(&self, b: &mut RegistryBuilder) {
        b.register(
            self.pt("load_kva"),
            PointKind::Analog,
            "kVA",
            false,
            0.0.into(),
        );
        b.register(
            self.pt("load_pct"),
            PointKind::Analog,
            "%",
            false,
            0.0.into(),
        );
        b.register(
            self.pt("winding_temp"),
            PointKind::Analog,
            "°F",
            false,
            self.winding_temp.into(),
        );
        b.register(
            self.pt("oil_temp"),
            PointKind::Analog,
            "°F",
            false,
            self.oil_temp.into(),
        );
        b.register(
            self.pt("tap_position"),
            PointKind::Analog,
            "",
            true,
            0.0.into(),
        );
        b.register(
            self.pt("secondary_voltage"),
            PointKind::Analog,
            "V",
            false,
            480.0.into(),
        );
        b.register(
            self.pt("fault"),
            PointKind::Binary,
            "",
            false,
            PointValue::Binary(false),
        );
    }

    pub fn advance(&mut self, dt: f64, load_kva: f64, ctx: &EquipCtx) {
        if let Some(tap) = ctx.override_f64(&self.pt("tap_position")) {
            self.tap_position = (tap as i64).clamp(-5, 5);
        }
        self.load_kva = load_kva.max(0.0);
        self.load_pct = pct(self.load_kva / self.capacity_kva.max(1.0) * 100.0);

        let temp_rise = (self.load_pct / 100.0).powi(2) * 90.0;
        self.winding_temp =
            first_order(self.winding_temp, ctx.weather.oat + 36.0 + temp_rise, dt, 900.0);
        self.oil_temp =
            first_order(self.oil_temp, ctx.weather.oat + 18.0 + temp_rise * 0.7, dt, 1800.0);

        let tap_adjustment = self.tap_position as f64 * 0.025;
        let load_drop = self.load_pct / 100.0 * 0.02;
        self.secondary_voltage = 480.0 * (1.0 + tap_adjustment - load_drop);
    }

    pub fn publish(&self, out: &mut PointBatch) {
        out.push((self.pt("load_kva"), self.load_kva.into()));
        out.push((self.pt("load_pct"), self.load_pct.into()));
        out.push((self.pt("winding_temp"), self.winding_temp.into()));
        out.push((self.pt("oil_temp"), self.oil_temp.into()));
        out.push((self.pt("tap_position"), (self.tap_position as f64).into()));
        out.push((self.pt("secondary_voltage"), self.secondary_voltage.into()));
        out.push((self.pt("fault"), PointValue::Binary(self.fault)));
    }
}

/// Campus electrical service: meter, on-site generation and critical-power
/// gear, plus the system-level balance points.
pub struct ElectricalSystem {
    pub path: String,
    pub main_meter: Meter,
    pub solar_arrays: Vec<SolarArray>,
    pub ups_systems: Vec<Ups>,
    pub generators: Vec<Generator>,
    pub transformers: Vec<Transformer>,
    pub total_demand_kw: f64,
    pub solar_kw: f64,
    pub generation_kw: f64,
    pub grid_import_kw: f64,
}

impl ElectricalSystem {
    pub fn new(path: String, seed: u64) -> Self {
        let main_meter = Meter::new(format!("{path}.MainMeter"), seed.wrapping_add(101));
        Self {
            path,
            main_meter,
            solar_arrays: Vec::new(),
            ups_systems: Vec::new(),
            generators: Vec::new(),
            transformers: Vec::new(),
            total_demand_kw: 0.0,
            solar_kw: 0.0,
            generation_kw: 0.0,
            grid_import_kw: 0.0,
        }
    }

    fn pt(&self, name: &str) -> String {
        format!("{}.{}", self.path, name)
    }

    pub fn register_points(&self, b: &mut RegistryBuilder) {
        self.main_meter.register_points(b);
        for solar in &self.solar_arrays {
            solar.register_points(b);
        }
        for ups in &self.ups_systems {
            ups.register_points(b);
        }
        for generator in &self.generators {
            generator.register_points(b);
        }
        for transformer in &self.transformers {
            transformer.register_points(b);
        }
        b.register(
            self.pt("total_demand_kw"),
            PointKind::Analog,
            "kW",
            false,
            0.0.into(),
        );
        b.register(
            self.pt("solar_kw"),
            PointKind::Analog,
            "kW",
            false,
            0.0.into(),
        );
        b.register(
            self.pt("generation_kw"),
            PointKind::Analog,
            "kW",
            false,
            0.0.into(),
        );
        b.register(
            self.pt("grid_import_kw"),
            PointKind::Analog,
            "kW",
            false,
            0.0.into(),
        );
    }

    pub fn advance(&mut self, dt: f64, campus_load_kw: f64, scenario: Scenario, ctx: &EquipCtx) {
        self.total_demand_kw = campus_load_kw.max(0.0);

        self.solar_kw = 0.0;
        for solar in &mut self.solar_arrays {
            solar.advance(dt, ctx);
            self.solar_kw += solar.output_kw;
        }

        self.grid_import_kw = if ctx.grid_available {
            (self.total_demand_kw - self.solar_kw).max(0.0)
        } else {
            0.0
        };

        self.main_meter.advance(dt, self.grid_import_kw, scenario, ctx);

        for transformer in &mut self.transformers {
            transformer.advance(dt, self.grid_import_kw * 1.05, ctx);
        }

        let ups_count = self.ups_systems.len().max(1);
        for ups in &mut self.ups_systems {
            // Roughly 30% of campus load rides the critical bus
            let ups_load = self.total_demand_kw * 0.3 / ups_count as f64;
            ups.advance(dt, ups_load, ctx);
        }

        self.generation_kw = 0.0;
        let gen_count = self.generators.len().max(1);
        for generator in &mut self.generators {
            generator.advance(dt, self.total_demand_kw / gen_count as f64, ctx);
            self.generation_kw += generator.output_kw;
        }
    }

    pub fn publish(&self, out: &mut PointBatch) {
        self.main_meter.publish(out);
        for solar in &self.solar_arrays {
            solar.publish(out);
        }
        for ups in &self.ups_systems {
            ups.publish(out);
        }
        for generator in &self.generators {
            generator.publish(out);
        }
        for transformer in &self.transformers {
            transformer.publish(out);
        }
        out.push((self.pt("total_demand_kw"), self.total_demand_kw.into()));
        out.push((self.pt("solar_kw"), self.solar_kw.into()));
        out.push((self.pt("generation_kw"), self.generation_kw.into()));
        out.push((self.pt("grid_import_kw"), self.grid_import_kw.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::points::RegistryBuilder;
    use crate::sim::scenario::ScenarioState;
    use crate::sim::{sim_datetime, PhysicsParams, WeatherConfig, WeatherModel};

    fn system() -> (ElectricalSystem, crate::points::PointRegistry) {
        let mut sys = ElectricalSystem::new("Electrical".into(), 9);
        sys.solar_arrays
            .push(SolarArray::new("Electrical.Solar_1".into(), 200.0));
        sys.ups_systems
            .push(Ups::new("Electrical.UPS_1".into(), 100.0, 50.0));
        sys.generators
            .push(Generator::new("Electrical.Generator_1".into(), 750.0));
        sys.transformers
            .push(Transformer::new("Electrical.Transformer_1".into(), 1500.0));
        let mut builder = RegistryBuilder::default();
        sys.register_points(&mut builder);
        (sys, builder.build())
    }

    fn run(
        sys: &mut ElectricalSystem,
        registry: &crate::points::PointRegistry,
        load_kw: f64,
        grid_available: bool,
        seconds: usize,
        start: f64,
    ) {
        let mut weather_model = WeatherModel::new(WeatherConfig::new(36.16, 3));
        weather_model.advance(start, &ScenarioState::new(Scenario::Normal, 0.0));
        let weather = weather_model.state().clone();
        let params = PhysicsParams::default();
        for i in 0..seconds {
            let sim_now = start + i as f64;
            let ctx = EquipCtx {
                weather: &weather,
                params: &params,
                registry,
                sim_now,
                date: sim_datetime(sim_now),
                grid_available,
            };
            sys.advance(1.0, load_kw, Scenario::Normal, &ctx);
        }
    }

    #[test]
    fn solar_offsets_grid_import_at_noon() {
        let (mut sys, registry) = system();
        // Epoch is noon on Jan 1; irradiance is present
        run(&mut sys, &registry, 500.0, true, 10, 0.0);
        assert!(sys.solar_kw > 0.0);
        assert!(sys.grid_import_kw < 500.0);
        assert!((sys.grid_import_kw + sys.solar_kw - 500.0).abs() < 1.0);
        assert!(sys.main_meter.kwh_total > 0.0);
    }

    #[test]
    fn grid_loss_flips_ups_to_battery_immediately() {
        let (mut sys, registry) = system();
        run(&mut sys, &registry, 500.0, true, 5, 0.0);
        assert_eq!(sys.ups_systems[0].state, UpsState::Online);
        run(&mut sys, &registry, 500.0, false, 1, 5.0);
        assert_eq!(sys.ups_systems[0].state, UpsState::OnBattery);
        assert!(sys.ups_systems[0].battery_pct < 100.0);
    }

    #[test]
    fn generator_reaches_running_within_ten_seconds_of_loss() {
        let (mut sys, registry) = system();
        run(&mut sys, &registry, 500.0, true, 5, 0.0);
        assert_eq!(sys.generators[0].state, GeneratorState::Off);

        run(&mut sys, &registry, 500.0, false, 10, 5.0);
        assert_eq!(sys.generators[0].state, GeneratorState::Running);

        // By T+15s the set carries at least 80% of the lost load
        run(&mut sys, &registry, 500.0, false, 5, 15.0);
        assert!(sys.generators[0].output_kw >= 0.8 * 500.0);
        assert!(sys.generators[0].fuel_level_pct < 100.0);
    }

    #[test]
    fn meter_reads_zero_while_disconnected() {
        let (mut sys, registry) = system();
        run(&mut sys, &registry, 500.0, false, 10, 0.0);
        assert_eq!(sys.main_meter.kw, 0.0);
        assert_eq!(sys.main_meter.frequency, 0.0);
        assert!(!sys.main_meter.grid_connected);
    }

    #[test]
    fn battery_depletes_under_sustained_outage() {
        let (mut sys, registry) = system();
        sys.ups_systems[0].capacity_kwh = 0.05;
        // 150 kW of critical load on a 0.05 kWh string empties in ~1 s
        run(&mut sys, &registry, 500.0, false, 30, 0.0);
        assert_eq!(sys.ups_systems[0].state, UpsState::Depleted);
        assert_eq!(sys.ups_systems[0].battery_pct, 0.0);
    }
}
