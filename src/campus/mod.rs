use tracing::info;

use crate::config::{AppConfig, CampusSize};
use crate::equipment::datacenter::{Crac, DataCenter, ServerRack};
use crate::equipment::electrical::{ElectricalSystem, Generator, SolarArray, Transformer, Ups};
use crate::equipment::hvac::{Ahu, AhuKind, Vav};
use crate::equipment::plant::{Boiler, CentralPlant, Chiller, CoolingTower, Pump, PumpLoop};
use crate::equipment::wastewater::{
    AerationBlower, Clarifier, LiftStation, UvDisinfection, WastewaterFacility,
};
use crate::equipment::{EquipCtx, OccupancyMode, PointBatch, scheduled_mode};
use crate::error::{SimError, SimResult};
use crate::points::{PointKind, PointRegistry, RegistryBuilder};
use crate::sim::Scenario;

const ZONE_NAMES: &[&str] = &[
    "Office", "Conference Room", "Break Room", "Storage", "IT Room", "Reception", "Lobby",
    "Restroom", "Kitchen", "Training Room", "Open Office", "Lab", "Clinic", "Copy Room",
    "Hallway", "Mechanical Room",
];

const BUILDING_NAMES: &[&str] = &[
    "Main Building",
    "North Tower",
    "South Tower",
    "East Wing",
    "West Wing",
    "Engineering",
    "Research Center",
    "Student Center",
    "Library",
    "Science Hall",
    "Arts Building",
    "Medical Center",
    "Recreation Center",
    "Dining Hall",
    "Technology Center",
    "Business School",
    "Law School",
    "Dormitory",
    "Faculty Building",
    "Innovation Hub",
];

/// One air handler and the VAV boxes it serves.
pub struct AirHandler {
    pub ahu: Ahu,
    pub vavs: Vec<Vav>,
}

pub struct Building {
    pub id: usize,
    pub path: String,
    pub display_name: String,
    pub air_handlers: Vec<AirHandler>,
    pub square_footage: f64,
}

impl Building {
    /// Lighting and plug loads, scaled by the occupancy phase.
    pub fn base_load_kw(&self, mode: OccupancyMode) -> f64 {
        let occupancy = match mode {
            OccupancyMode::Occupied | OccupancyMode::Auto => 1.0,
            OccupancyMode::Warmup | OccupancyMode::Cooldown => 0.5,
            OccupancyMode::Unoccupied => 0.15,
        };
        // ~1 W/sqft base plus 1.5 W/sqft when people are in
        self.square_footage * (0.001 + 0.0015 * occupancy)
    }

    pub fn vav_count(&self) -> usize {
        self.air_handlers.iter().map(|a| a.vavs.len()).sum()
    }
}

struct SizeProfile {
    buildings: usize,
    ahus_per_building: usize,
    vavs_per_ahu: usize,
    chillers: usize,
    chiller_tons: f64,
    boilers: usize,
    boiler_mbh: f64,
    towers: usize,
    pumps_per_loop: usize,
    has_datacenter: bool,
    has_wastewater: bool,
    solar_arrays: usize,
    solar_kw: f64,
    generators: usize,
    generator_kw: f64,
}

impl SizeProfile {
    fn for_size(size: CampusSize) -> Self {
        match size {
            CampusSize::Small => Self {
                buildings: 1,
                ahus_per_building: 2,
                vavs_per_ahu: 5,
                chillers: 1,
                chiller_tons: 300.0,
                boilers: 1,
                boiler_mbh: 2000.0,
                towers: 1,
                pumps_per_loop: 1,
                has_datacenter: false,
                has_wastewater: false,
                solar_arrays: 1,
                solar_kw: 50.0,
                generators: 1,
                generator_kw: 500.0,
            },
            CampusSize::Medium => Self {
                buildings: 5,
                ahus_per_building: 3,
                vavs_per_ahu: 8,
                chillers: 2,
                chiller_tons: 400.0,
                boilers: 2,
                boiler_mbh: 3000.0,
                towers: 2,
                pumps_per_loop: 2,
                has_datacenter: true,
                has_wastewater: true,
                solar_arrays: 2,
                solar_kw: 200.0,
                generators: 2,
                generator_kw: 750.0,
            },
            CampusSize::Large => Self {
                buildings: 20,
                ahus_per_building: 4,
                vavs_per_ahu: 10,
                chillers: 4,
                chiller_tons: 500.0,
                boilers: 3,
                boiler_mbh: 4000.0,
                towers: 4,
                pumps_per_loop: 3,
                has_datacenter: true,
                has_wastewater: true,
                solar_arrays: 4,
                solar_kw: 250.0,
                generators: 3,
                generator_kw: 1000.0,
            },
        }
    }
}

/// The whole simulated world: buildings, central plant, electrical service
/// and the optional data center / wastewater facilities.
pub struct Campus {
    pub size: CampusSize,
    pub buildings: Vec<Building>,
    pub plant: CentralPlant,
    pub electrical: ElectricalSystem,
    pub data_center: Option<DataCenter>,
    pub wastewater: Option<WastewaterFacility>,
    pub ahu_fan_kw: f64,
    pub building_base_kw: f64,
    pub total_demand_kw: f64,
}

impl Campus {
    /// Advance every equipment model one tick, in dependency order, and
    /// collect the tick's present-value batch.
    pub fn advance(&mut self, dt: f64, scenario: Scenario, ctx: &EquipCtx, out: &mut PointBatch) {
        let chw_supply = self.plant.chw_supply_temp;
        let hw_supply = self.plant.hw_supply_temp;

        // Zones, then air handlers; demands roll up for the plant
        let mut cooling_tons = 0.0;
        let mut heating_mbh = 0.0;
        self.ahu_fan_kw = 0.0;
        for building in &mut self.buildings {
            for handler in &mut building.air_handlers {
                let supply_temp = handler.ahu.supply_temp;
                let mut worst_damper: f64 = 0.0;
                let mut temp_sum = 0.0;
                for vav in &mut handler.vavs {
                    vav.advance(dt, supply_temp, ctx);
                    worst_damper = worst_damper.max(vav.damper_position);
                    temp_sum += vav.room_temp;
                    heating_mbh += vav.reheat_mbh();
                }
                let zone_avg = if handler.vavs.is_empty() {
                    None
                } else {
                    Some(temp_sum / handler.vavs.len() as f64)
                };
                let worst = if handler.vavs.is_empty() { 50.0 } else { worst_damper };
                handler
                    .ahu
                    .advance(dt, zone_avg, worst, chw_supply, hw_supply, ctx);
                cooling_tons += handler.ahu.cooling_tons();
                heating_mbh += handler.ahu.heating_mbh();
                self.ahu_fan_kw += handler.ahu.fan_kw;
            }
        }

        // Piping losses keep the hot loop firing in cold weather even
        // before zone reheat demand shows up
        if ctx.weather.oat < 45.0 {
            heating_mbh += self.buildings.len() as f64 * 20.0;
        }

        self.plant.advance(dt, cooling_tons, heating_mbh, ctx);

        let mode = scheduled_mode(&ctx.date);
        self.building_base_kw = self.buildings.iter().map(|b| b.base_load_kw(mode)).sum();

        let mut dc_kw = 0.0;
        if let Some(dc) = &mut self.data_center {
            dc.advance(dt, ctx);
            dc_kw = dc.total_kw;
        }
        let mut ww_kw = 0.0;
        if let Some(ww) = &mut self.wastewater {
            ww.advance(dt, ctx);
            ww_kw = ww.total_kw;
        }

        self.total_demand_kw =
            self.plant.total_plant_kw + self.ahu_fan_kw + self.building_base_kw + dc_kw + ww_kw;
        self.electrical
            .advance(dt, self.total_demand_kw, scenario, ctx);

        self.publish(out);
    }

    fn publish(&self, out: &mut PointBatch) {
        for building in &self.buildings {
            for handler in &building.air_handlers {
                handler.ahu.publish(out);
                for vav in &handler.vavs {
                    vav.publish(out);
                }
            }
        }
        self.plant.publish(out);
        self.electrical.publish(out);
        if let Some(dc) = &self.data_center {
            dc.publish(out);
        }
        if let Some(ww) = &self.wastewater {
            ww.publish(out);
        }
        out.push(("Campus.plant_kw".to_string(), self.plant.total_plant_kw.into()));
        out.push((
            "Campus.total_tons".to_string(),
            self.plant.total_cooling_tons.into(),
        ));
        out.push((
            "Campus.grid_import_kw".to_string(),
            self.electrical.grid_import_kw.into(),
        ));
        out.push((
            "Campus.total_demand_kw".to_string(),
            self.total_demand_kw.into(),
        ));
    }
}

/// Build the campus for a size profile and register every exposed field as
/// a point. Returns the world plus its finished registry.
pub fn assemble(config: &AppConfig) -> SimResult<(Campus, PointRegistry)> {
    let profile = SizeProfile::for_size(config.campus_size);
    let seed = config.seed;

    let mut buildings = Vec::with_capacity(profile.buildings);
    for b in 0..profile.buildings {
        let building_id = b + 1;
        let path = format!("Building_{building_id}");
        let mut air_handlers = Vec::with_capacity(profile.ahus_per_building);
        for a in 0..profile.ahus_per_building {
            let ahu_id = a + 1;
            let ahu_path = format!("{path}.AHU_{ahu_id}");
            // The last unit in larger buildings is a dedicated outside-air
            // handler with no boxes of its own
            let full_oa = profile.ahus_per_building >= 3 && a == profile.ahus_per_building - 1;
            let (kind, vav_count) = if full_oa {
                (AhuKind::FullOutsideAir, 0)
            } else {
                (AhuKind::VariableVolume, profile.vavs_per_ahu)
            };
            let mut vavs = Vec::with_capacity(vav_count);
            for v in 0..vav_count {
                let vav_number = ahu_id * 100 + v + 1;
                let zone = format!(
                    "{} {}",
                    ZONE_NAMES[(b + a + v) % ZONE_NAMES.len()],
                    vav_number
                );
                vavs.push(Vav::new(
                    format!("{ahu_path}.VAV_{vav_number}"),
                    zone,
                    seed.wrapping_add((b * 1000 + a * 100 + v) as u64),
                ));
            }
            air_handlers.push(AirHandler {
                ahu: Ahu::new(
                    ahu_path,
                    kind,
                    vav_count,
                    seed.wrapping_add((b * 1000 + a * 100 + 77) as u64),
                ),
                vavs,
            });
        }
        buildings.push(Building {
            id: building_id,
            path,
            display_name: BUILDING_NAMES[b % BUILDING_NAMES.len()].to_string(),
            air_handlers,
            square_footage: 40_000.0 + (b as f64 % 4.0) * 15_000.0,
        });
    }

    let mut plant = CentralPlant::new("CentralPlant".to_string());
    for i in 0..profile.chillers {
        plant.chillers.push(Chiller::new(
            format!("CentralPlant.Chiller_{}", i + 1),
            i,
            profile.chiller_tons,
        ));
    }
    for i in 0..profile.boilers {
        plant.boilers.push(Boiler::new(
            format!("CentralPlant.Boiler_{}", i + 1),
            profile.boiler_mbh,
        ));
    }
    for i in 0..profile.towers {
        plant.cooling_towers.push(CoolingTower::new(
            format!("CentralPlant.CoolingTower_{}", i + 1),
            profile.chiller_tons * 1.2,
        ));
    }
    for i in 0..profile.pumps_per_loop {
        plant.chw_pumps.push(Pump::new(
            format!("CentralPlant.Pump_CHW_{}", i + 1),
            PumpLoop::ChilledWater,
            profile.chiller_tons * 2.4,
        ));
        plant.hw_pumps.push(Pump::new(
            format!("CentralPlant.Pump_HW_{}", i + 1),
            PumpLoop::HotWater,
            profile.boiler_mbh / 10.0,
        ));
        plant.cw_pumps.push(Pump::new(
            format!("CentralPlant.Pump_CW_{}", i + 1),
            PumpLoop::CondenserWater,
            profile.chiller_tons * 3.0,
        ));
    }

    let mut electrical = ElectricalSystem::new("Electrical".to_string(), seed);
    for i in 0..profile.solar_arrays {
        electrical.solar_arrays.push(SolarArray::new(
            format!("Electrical.Solar_{}", i + 1),
            profile.solar_kw,
        ));
    }
    for i in 0..profile.generators {
        electrical.generators.push(Generator::new(
            format!("Electrical.Generator_{}", i + 1),
            profile.generator_kw,
        ));
        electrical.ups_systems.push(Ups::new(
            format!("Electrical.UPS_{}", i + 1),
            200.0,
            100.0,
        ));
        electrical.transformers.push(Transformer::new(
            format!("Electrical.Transformer_{}", i + 1),
            2000.0,
        ));
    }

    let data_center = profile.has_datacenter.then(|| {
        let mut dc = DataCenter::new("DataCenter".to_string());
        let racks = if profile.buildings >= 10 { 8 } else { 4 };
        for i in 0..racks {
            dc.server_racks.push(ServerRack::new(
                format!("DataCenter.Rack_{}", i + 1),
                10.0,
                seed.wrapping_add(5000 + i as u64),
            ));
        }
        for i in 0..(racks / 2).max(1) {
            dc.crac_units
                .push(Crac::new(format!("DataCenter.CRAC_{}", i + 1), 20.0));
        }
        dc
    });

    let wastewater = profile.has_wastewater.then(|| {
        let mut ww = WastewaterFacility::new("Wastewater".to_string(), seed.wrapping_add(9000));
        ww.lift_stations
            .push(LiftStation::new("Wastewater.LiftStation_1".to_string(), 2));
        for i in 0..2 {
            ww.blowers.push(AerationBlower::new(
                format!("Wastewater.Blower_{}", i + 1),
                2000.0,
            ));
        }
        for i in 0..2 {
            ww.clarifiers
                .push(Clarifier::new(format!("Wastewater.Clarifier_{}", i + 1)));
        }
        ww.uv_systems
            .push(UvDisinfection::new("Wastewater.UV_1".to_string()));
        ww
    });

    let campus = Campus {
        size: config.campus_size,
        buildings,
        plant,
        electrical,
        data_center,
        wastewater,
        ahu_fan_kw: 0.0,
        building_base_kw: 0.0,
        total_demand_kw: 0.0,
    };

    validate_topology(&campus)?;

    let mut builder = RegistryBuilder::default();
    register_weather_points(&mut builder);
    for building in &campus.buildings {
        for handler in &building.air_handlers {
            handler.ahu.register_points(&mut builder);
            for vav in &handler.vavs {
                vav.register_points(&mut builder);
            }
        }
    }
    campus.plant.register_points(&mut builder);
    campus.electrical.register_points(&mut builder);
    if let Some(dc) = &campus.data_center {
        dc.register_points(&mut builder);
    }
    if let Some(ww) = &campus.wastewater {
        ww.register_points(&mut builder);
    }
    for aggregate in [
        "Campus.plant_kw",
        "Campus.total_tons",
        "Campus.grid_import_kw",
        "Campus.total_demand_kw",
    ] {
        builder.register(aggregate, PointKind::Analog, "", false, 0.0.into());
    }

    let registry = builder.build();
    info!(
        size = ?config.campus_size,
        buildings = campus.buildings.len(),
        points = registry.len(),
        "campus assembled"
    );
    Ok((campus, registry))
}

fn register_weather_points(b: &mut RegistryBuilder) {
    let fields: [(&str, &'static str, f64); 9] = [
        ("Weather.oat", "°F", 70.0),
        ("Weather.humidity", "%", 50.0),
        ("Weather.wet_bulb", "°F", 60.0),
        ("Weather.dew_point", "°F", 50.0),
        ("Weather.enthalpy", "BTU/lb", 28.0),
        ("Weather.pressure", "inHg", 29.92),
        ("Weather.solar_irradiance", "W/m²", 0.0),
        ("Weather.wind_speed", "mph", 5.0),
        ("Weather.cloud_cover", "", 0.1),
    ];
    for (path, units, initial) in fields {
        b.register(path, PointKind::Analog, units, false, initial.into());
    }
}

/// Startup topology checks; any violation is fatal.
fn validate_topology(campus: &Campus) -> SimResult<()> {
    for building in &campus.buildings {
        if building.air_handlers.is_empty() {
            return Err(SimError::BadTopology(format!(
                "{} has no air handlers",
                building.path
            )));
        }
        for handler in &building.air_handlers {
            if handler.vavs.is_empty() && handler.ahu.kind != AhuKind::FullOutsideAir {
                return Err(SimError::BadTopology(format!(
                    "{} serves no VAV boxes and is not 100% outside air",
                    handler.ahu.path
                )));
            }
        }
    }
    if !campus.plant.chillers.is_empty() && campus.plant.cooling_towers.is_empty() {
        return Err(SimError::BadTopology(
            "chillers have no condenser-side cooling tower".to_string(),
        ));
    }
    if !campus.plant.chillers.is_empty()
        && (campus.plant.chw_pumps.is_empty() || campus.plant.cw_pumps.is_empty())
    {
        return Err(SimError::BadTopology(
            "chilled water loop is missing pumps".to_string(),
        ));
    }
    if !campus.plant.boilers.is_empty() && campus.plant.hw_pumps.is_empty() {
        return Err(SimError::BadTopology(
            "hot water loop is missing pumps".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(size: CampusSize) -> AppConfig {
        AppConfig {
            campus_size: size,
            ..AppConfig::default()
        }
    }

    #[test]
    fn small_campus_assembles() {
        let (campus, registry) = assemble(&config(CampusSize::Small)).unwrap();
        assert_eq!(campus.buildings.len(), 1);
        assert!(campus.data_center.is_none());
        assert!(campus.wastewater.is_none());
        assert!(registry.contains("Building_1.AHU_1.VAV_101.room_temp"));
        assert!(registry.contains("CentralPlant.Chiller_1.chw_supply_temp"));
        assert!(registry.contains("Weather.oat"));
        assert!(registry.len() > 100);
    }

    #[test]
    fn medium_campus_has_two_chillers_and_facilities() {
        let (campus, registry) = assemble(&config(CampusSize::Medium)).unwrap();
        assert_eq!(campus.buildings.len(), 5);
        assert_eq!(campus.plant.chillers.len(), 2);
        assert!(campus.data_center.is_some());
        assert!(campus.wastewater.is_some());
        assert!(registry.contains("CentralPlant.Chiller_2.load_percent"));
        assert!(registry.contains("Electrical.MainMeter.grid_connected"));
        assert!(registry.contains("DataCenter.pue"));
        assert!(registry.contains("Wastewater.dissolved_oxygen_mg_l"));
    }

    #[test]
    fn large_campus_scales_out() {
        let (campus, registry) = assemble(&config(CampusSize::Large)).unwrap();
        assert_eq!(campus.buildings.len(), 20);
        assert_eq!(campus.plant.chillers.len(), 4);
        assert!(registry.len() > 5000);
    }

    #[test]
    fn full_oa_handlers_have_no_boxes() {
        let (campus, _) = assemble(&config(CampusSize::Medium)).unwrap();
        let last = campus.buildings[0].air_handlers.last().unwrap();
        assert_eq!(last.ahu.kind, AhuKind::FullOutsideAir);
        assert!(last.vavs.is_empty());
    }

    #[test]
    fn topology_validation_catches_missing_tower() {
        let (mut campus, _) = assemble(&config(CampusSize::Small)).unwrap();
        campus.plant.cooling_towers.clear();
        assert!(matches!(
            validate_topology(&campus),
            Err(SimError::BadTopology(_))
        ));
    }
}
