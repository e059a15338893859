use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{first_order, pct, slew, EquipCtx, PointBatch};
use crate::points::{PointKind, PointValue, RegistryBuilder};

pub struct ServerRack {
    pub path: String,
    pub nominal_it_kw: f64,
    pub it_load_kw: f64,
    pub inlet_temp: f64,
    pub outlet_temp: f64,
    pub pdu_a_kw: f64,
    pub pdu_b_kw: f64,
    pub utilization_pct: f64,
    pub fault: bool,
    rng: StdRng,
}

impl ServerRack {
    pub fn new(path: String, nominal_it_kw: f64, seed: u64) -> Self {
        Self {
            path,
            nominal_it_kw,
            it_load_kw: nominal_it_kw,
            inlet_temp: 68.0,
            outlet_temp: 88.0,
            pdu_a_kw: nominal_it_kw / 2.0,
            pdu_b_kw: nominal_it_kw / 2.0,
            utilization_pct: 60.0,
            fault: false,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn pt(&self, name: &str) -> String {
        format!("{}.{}", self.path, name)
    }

    pub fn register_points(&self, b: &mut RegistryBuilder) {
        b.register(
            self.pt("it_load_kw"),
            PointKind::Analog,
            "kW",
            false,
            self.it_load_kw.into(),
        );
        b.register(
            self.pt("inlet_temp"),
            PointKind::Analog,
            "°F",
            false,
            self.inlet_temp.into(),
        );
        b.register(
            self.pt("outlet_temp"),
            PointKind::Analog,
            "°F",
            false,
            self.outlet_temp.into(),
        );
        b.register(
            self.pt("pdu_a_kw"),
            PointKind::Analog,
            "kW",
            false,
            self.pdu_a_kw.into(),
        );
        b.register(
            self.pt("pdu_b_kw"),
            PointKind::Analog,
            "kW",
            false,
            self.pdu_b_kw.into(),
        );
        b.register(
            self.pt("utilization_pct"),
            PointKind::Analog,
            "%",
            false,
            self.utilization_pct.into(),
        );
        b.register(
            self.pt("fault"),
            PointKind::Binary,
            "",
            false,
            PointValue::Binary(false),
        );
    }

    pub fn advance(&mut self, dt: f64, crac_supply_temp: f64, _ctx: &EquipCtx) {
        self.utilization_pct = pct(first_order(
            self.utilization_pct,
            self.rng.gen_range(50.0..90.0),
            dt,
            300.0,
        ));
        self.it_load_kw = self.nominal_it_kw * (0.5 + self.utilization_pct / 200.0);

        let split = 0.5 + self.rng.gen_range(-0.05..0.05);
        self.pdu_a_kw = self.it_load_kw * split;
        self.pdu_b_kw = self.it_load_kw - self.pdu_a_kw;

        // Recirculation lifts the inlet above the cold-aisle supply
        let recirculation = 2.0 + self.rng.gen_range(0.0..2.0);
        self.inlet_temp = (crac_supply_temp + recirculation).clamp(40.0, 150.0);
        self.outlet_temp = (self.inlet_temp + self.it_load_kw * 2.0).clamp(40.0, 200.0);
        if self.inlet_temp >= 150.0 {
            self.fault = true;
        }
    }

    pub fn publish(&self, out: &mut PointBatch) {
        out.push((self.pt("it_load_kw"), self.it_load_kw.into()));
        out.push((self.pt("inlet_temp"), self.inlet_temp.into()));
        out.push((self.pt("outlet_temp"), self.outlet_temp.into()));
        out.push((self.pt("pdu_a_kw"), self.pdu_a_kw.into()));
        out.push((self.pt("pdu_b_kw"), self.pdu_b_kw.into()));
        out.push((self.pt("utilization_pct"), self.utilization_pct.into()));
        out.push((self.pt("fault"), PointValue::Binary(self.fault)));
    }
}

pub struct Crac {
    pub path: String,
    pub capacity_tons: f64,
    pub status: bool,
    pub supply_air_temp: f64,
    pub supply_air_setpoint: f64,
    pub return_air_temp: f64,
    pub fan_speed_pct: f64,
    pub cooling_output_pct: f64,
    pub kw: f64,
    pub fault: bool,
}

impl Crac {
    pub fn new(path: String, capacity_tons: f64) -> Self {
        Self {
            path,
            capacity_tons,
            status: true,
            supply_air_temp: 62.0,
            supply_air_setpoint: 68.0,
            return_air_temp: 80.0,
            fan_speed_pct: 75.0,
            cooling_output_pct: 50.0,
            kw: 0.0,
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
            PointValue::Binary(true),
        );
        b.register(
            self.pt("supply_air_temp"),
            PointKind::Analog,
            "°F",
            true,
            self.supply_air_temp.into(),
        );
        b.register(
            self.pt("supply_air_setpoint"),
            PointKind::Analog,
            "°F",
            true,
            self.supply_air_setpoint.into(),
        );
        b.register(
            self.pt("return_air_temp"),
            PointKind::Analog,
            "°F",
            false,
            self.return_air_temp.into(),
        );
        b.register(
            self.pt("fan_speed_pct"),
            PointKind::Analog,
            "%",
            true,
            self.fan_speed_pct.into(),
        );
        b.register(
            self.pt("cooling_output_pct"),
            PointKind::Analog,
            "%",
            false,
            self.cooling_output_pct.into(),
        );
        b.register(self.pt("kw"), PointKind::Analog, "kW", false, 0.0.into());
        b.register(
            self.pt("fault"),
            PointKind::Binary,
            "",
            false,
            PointValue::Binary(false),
        );
    }

    /// Sequence against the room's average rack inlet: run harder while
    /// inlets sit above setpoint.
    pub fn advance(&mut self, dt: f64, heat_load_kw: f64, average_inlet_temp: f64, ctx: &EquipCtx) {
        if let Some(cmd) = ctx.override_f64(&self.pt("status")) {
            self.status = cmd != 0.0;
        }
        self.supply_air_setpoint = ctx
            .override_f64(&self.pt("supply_air_setpoint"))
            .unwrap_or(self.supply_air_setpoint)
            .clamp(55.0, 80.0);

        if self.status && !self.fault {
            let required_tons = heat_load_kw / 3.517;
            let base_output = pct(required_tons / self.capacity_tons.max(0.1) * 100.0);
            // Inlet error trims output around the load-following baseline
            let inlet_error = average_inlet_temp - self.supply_air_setpoint;
            self.cooling_output_pct =
                pct(first_order(self.cooling_output_pct, base_output + inlet_error * 5.0, dt, 30.0));

            self.fan_speed_pct = match ctx.override_f64(&self.pt("fan_speed_pct")) {
                Some(cmd) => pct(cmd),
                None => pct(50.0 + self.cooling_output_pct / 2.0),
            };

            let target_supply = match ctx.override_f64(&self.pt("supply_air_temp")) {
                Some(cmd) => cmd.clamp(50.0, 80.0),
                None => self.supply_air_setpoint - 10.0 + (self.cooling_output_pct / 100.0) * 5.0,
            };
            self.supply_air_temp = first_order(self.supply_air_temp, target_supply, dt, 60.0);
            self.return_air_temp = self.supply_air_temp + heat_load_kw / 2.0;
            self.kw = self.cooling_output_pct / 100.0 * self.capacity_tons * 1.2
                / ctx.params.equipment_efficiency;
        } else {
            self.cooling_output_pct = slew(self.cooling_output_pct, 0.0, dt, 5.0);
            self.fan_speed_pct = 0.0;
            self.kw = 0.0;
            self.supply_air_temp = first_order(self.supply_air_temp, self.return_air_temp, dt, 120.0);
        }
    }

    pub fn publish(&self, out: &mut PointBatch) {
        out.push((self.pt("status"), PointValue::Binary(self.status)));
        out.push((self.pt("supply_air_temp"), self.supply_air_temp.into()));
        out.push((
            self.pt("supply_air_setpoint"),
            self.supply_air_setpoint.into(),
        ));
        out.push((self.pt("return_air_temp"), self.return_air_temp.into()));
        out.push((self.pt("fan_speed_pct"), self.fan_speed_pct.into()));
        out.push((self.pt("cooling_output_pct"), self.cooling_output_pct.into()));
        out.push((self.pt("kw"), self.kw.into()));
        out.push((self.pt("fault"), PointValue::Binary(self.fault)));
    }
}

/// Data hall: racks plus the CRAC fleet cooling them. PUE compares total
/// input power to useful IT power.
pub struct DataCenter {
    pub path: String,
    pub server_racks: Vec<ServerRack>,
    pub crac_units: Vec<Crac>,
    pub total_it_load_kw: f64,
    pub total_cooling_kw: f64,
    pub total_kw: f64,
    pub pue: f64,
    pub average_inlet_temp: f64,
    pub average_outlet_temp: f64,
}

impl DataCenter {
    pub fn new(path: String) -> Self {
        Self {
            path,
            server_racks: Vec::new(),
            crac_units: Vec::new(),
            total_it_load_kw: 0.0,
            total_cooling_kw: 0.0,
            total_kw: 0.0,
            pue: 1.5,
            average_inlet_temp: 68.0,
            average_outlet_temp: 85.0,
        }
    }

    fn pt(&self, name: &str) -> String {
        format!("{}.{}", self.path, name)
    }

    pub fn register_points(&self, b: &mut RegistryBuilder) {
        for rack in &self.server_racks {
            rack.register_points(b);
        }
        for crac in &self.crac_units {
            crac.register_points(b);
        }
        b.register(
            self.pt("total_it_load_kw"),
            PointKind::Analog,
            "kW",
            false,
            0.0.into(),
        );
        b.register(
            self.pt("total_cooling_kw"),
            PointKind::Analog,
            "kW",
            false,
            0.0.into(),
        );
        b.register(
            self.pt("total_kw"),
            PointKind::Analog,
            "kW",
            false,
            0.0.into(),
        );
        b.register(self.pt("pue"), PointKind::Analog, "", false, 1.5.into());
        b.register(
            self.pt("average_inlet_temp"),
            PointKind::Analog,
            "°F",
            false,
            68.0.into(),
        );
        b.register(
            self.pt("average_outlet_temp"),
            PointKind::Analog,
            "°F",
            false,
            85.0.into(),
        );
    }

    pub fn advance(&mut self, dt: f64, ctx: &EquipCtx) {
        let running_supply: Vec<f64> = self
            .crac_units
            .iter()
            .filter(|c| c.status)
            .map(|c| c.supply_air_temp)
            .collect();
        let avg_supply = if running_supply.is_empty() {
            // No cooling: the room floats up
            self.average_outlet_temp
        } else {
            running_supply.iter().sum::<f64>() / running_supply.len() as f64
        };

        self.total_it_load_kw = 0.0;
        let mut inlet_sum = 0.0;
        let mut outlet_sum = 0.0;
        for rack in &mut self.server_racks {
            rack.advance(dt, avg_supply, ctx);
            self.total_it_load_kw += rack.it_load_kw;
            inlet_sum += rack.inlet_temp;
            outlet_sum += rack.outlet_temp;
        }
        if !self.server_racks.is_empty() {
            self.average_inlet_temp = inlet_sum / self.server_racks.len() as f64;
            self.average_outlet_temp = outlet_sum / self.server_racks.len() as f64;
        }

        self.total_cooling_kw = 0.0;
        let heat_per_crac = self.total_it_load_kw / self.crac_units.len().max(1) as f64;
        let avg_inlet = self.average_inlet_temp;
        for crac in &mut self.crac_units {
            crac.advance(dt, heat_per_crac, avg_inlet, ctx);
            self.total_cooling_kw += crac.kw;
        }

        self.total_kw = self.total_it_load_kw + self.total_cooling_kw;
        self.pue = self.total_kw / self.total_it_load_kw.max(1.0);
    }

    pub fn publish(&self, out: &mut PointBatch) {
        for rack in &self.server_racks {
            rack.publish(out);
        }
        for crac in &self.crac_units {
            crac.publish(out);
        }
        out.push((self.pt("total_it_load_kw"), self.total_it_load_kw.into()));
        out.push((self.pt("total_cooling_kw"), self.total_cooling_kw.into()));
        out.push((self.pt("total_kw"), self.total_kw.into()));
        out.push((self.pt("pue"), self.pue.into()));
        out.push((self.pt("average_inlet_temp"), self.average_inlet_temp.into()));
        out.push((
            self.pt("average_outlet_temp"),
            self.average_outlet_temp.into(),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::points::RegistryBuilder;
    use crate::sim::scenario::{Scenario, ScenarioState};
    use crate::sim::{sim_datetime, PhysicsParams, WeatherConfig, WeatherModel};

    fn datacenter() -> (DataCenter, crate::points::PointRegistry) {
        let mut dc = DataCenter::new("DataCenter".into());
        for i in 1..=4 {
            dc.server_racks.push(ServerRack::new(
                format!("DataCenter.Rack_{i}"),
                10.0,
                40 + i as u64,
            ));
        }
        for i in 1..=2 {
            dc.crac_units
                .push(Crac::new(format!("DataCenter.CRAC_{i}"), 20.0));
        }
        let mut builder = RegistryBuilder::default();
        dc.register_points(&mut builder);
        (dc, builder.build())
    }

    fn run(dc: &mut DataCenter, registry: &crate::points::PointRegistry, seconds: usize) {
        let mut model = WeatherModel::new(WeatherConfig::new(36.16, 5));
        model.advance(0.0, &ScenarioState::new(Scenario::Normal, 0.0));
        let weather = model.state().clone();
        let params = PhysicsParams::default();
        for i in 0..seconds {
            let ctx = EquipCtx {
                weather: &weather,
                params: &params,
                registry,
                sim_now: i as f64,
                date: sim_datetime(i as f64),
                grid_available: true,
            };
            dc.advance(1.0, &ctx);
        }
    }

    #[test]
    fn pue_reflects_cooling_overhead() {
        let (mut dc, registry) = datacenter();
        run(&mut dc, &registry, 300);
        assert!(dc.total_it_load_kw > 0.0);
        assert!(dc.total_cooling_kw > 0.0);
        assert!(dc.pue > 1.0 && dc.pue < 2.5, "pue was {}", dc.pue);
    }

    #[test]
    fn rack_inlet_sits_above_crac_supply() {
        let (mut dc, registry) = datacenter();
        run(&mut dc, &registry, 300);
        let supply = dc.crac_units[0].supply_air_temp;
        assert!(dc.average_inlet_temp > supply);
        assert!(dc.average_outlet_temp > dc.average_inlet_temp);
    }

    #[test]
    fn crac_shutdown_lets_room_heat_up() {
        let (mut dc, registry) = datacenter();
        run(&mut dc, &registry, 120);
        let baseline = dc.average_inlet_temp;
        for i in 1..=2 {
            registry
                .override_point(&format!("DataCenter.CRAC_{i}.status"), 0.0, 8, "test", None, 0.0)
                .unwrap();
        }
        run(&mut dc, &registry, 300);
        assert!(dc.average_inlet_temp > baseline + 5.0);
    }
}
