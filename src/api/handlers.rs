use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::auth::{AdminSession, AuthSession};
use super::error::ApiError;
use super::ApiState;
use crate::config::UnitSystem;
use crate::error::SimError;
use crate::points::{PointReading, PointValue};
use crate::sim::{sim_datetime, PhysicsParams, Scenario};

// Dashboard comfort thresholds for the zone summary
const HOT_ZONE_F: f64 = 76.0;
const COLD_ZONE_F: f64 = 68.0;

/// Unit conversion happens only here, at presentation. Internal state and
/// all field protocols carry US units.
fn display_value(value: &PointValue, units: &str, system: UnitSystem) -> (Value, String) {
    let raw = match value {
        PointValue::Analog(v) => *v,
        other => return (json!(other), units.to_string()),
    };
    if system == UnitSystem::Us {
        return (json!(raw), units.to_string());
    }
    let (converted, label) = match units {
        "°F" => ((raw - 32.0) * 5.0 / 9.0, "°C"),
        "GPM" => (raw * 0.0630902, "L/s"),
        "CFM" => (raw * 1.699, "m³/h"),
        "CFH" => (raw * 0.0283168, "m³/h"),
        "inWC" => (raw * 249.089, "Pa"),
        "inHg" => (raw * 33.8639, "hPa"),
        "BTU/lb" => (raw * 2.326, "kJ/kg"),
        "PSI" => (raw * 6.89476, "kPa"),
        "mph" => (raw * 1.60934, "km/h"),
        "ft" => (raw * 0.3048, "m"),
        "MGD" => (raw * 3785.41, "m³/d"),
        _ => (raw, units),
    };
    (json!(converted), label.to_string())
}

fn reading_json(reading: &PointReading, system: UnitSystem) -> Value {
    let (value, units) = display_value(&reading.value, reading.units, system);
    let mut obj = Map::new();
    obj.insert("value".into(), value);
    obj.insert("units".into(), json!(units));
    obj.insert("writable".into(), json!(reading.writable));
    obj.insert("overridden".into(), json!(reading.overridden));
    if let Some(pr) = reading.override_priority {
        obj.insert("override_priority".into(), json!(pr));
    }
    Value::Object(obj)
}

fn insert_nested(node: &mut Map<String, Value>, segments: &[&str], leaf: Value) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        node.insert(first.to_string(), leaf);
        return;
    }
    let entry = node
        .entry(first.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if let Some(child) = entry.as_object_mut() {
        insert_nested(child, rest, leaf);
    }
}

/// Group a registry snapshot into nested JSON by path segment, e.g.
/// `CentralPlant.Chiller_1.kw` lands at `{"Chiller_1": {"kw": {...}}}`.
fn grouped_view(state: &ApiState, prefix: &str) -> Value {
    let system = state.world.unit_system();
    let snapshot = state.world.registry.snapshot(Some(prefix));
    let mut root = Map::new();
    for (path, reading) in &snapshot {
        let rest = match path.strip_prefix(prefix).and_then(|r| r.strip_prefix('.')) {
            Some(rest) => rest,
            None => continue,
        };
        let segments: Vec<&str> = rest.split('.').collect();
        insert_nested(&mut root, &segments, reading_json(reading, system));
    }
    Value::Object(root)
}

pub async fn get_status(
    State(state): State<ApiState>,
    AuthSession(_): AuthSession,
) -> Result<impl IntoResponse, ApiError> {
    let world = &state.world;
    let registry = &world.registry;
    let sim_now = world.sim_now();

    let mut hot_zones = 0usize;
    let mut cold_zones = 0usize;
    let mut zone_count = 0usize;
    for (path, reading) in registry.snapshot(None) {
        if !path.ends_with(".room_temp") {
            continue;
        }
        zone_count += 1;
        if let Some(temp) = reading.value.as_f64() {
            if temp > HOT_ZONE_F {
                hot_zones += 1;
            } else if temp < COLD_ZONE_F {
                cold_zones += 1;
            }
        }
    }

    let read = |path: &str| registry.effective_f64(path).unwrap_or(0.0);
    Ok(Json(json!({
        "sim_time": sim_now,
        "sim_date": sim_datetime(sim_now).to_string(),
        "simulation_speed": world.clock.speed(),
        "scenario": world.scenario().scenario.as_str(),
        "campus_size": world.topology.campus_size,
        "unit_system": world.unit_system(),
        "point_count": registry.len(),
        "weather": {
            "oat": read("Weather.oat"),
            "humidity": read("Weather.humidity"),
            "wet_bulb": read("Weather.wet_bulb"),
            "solar_irradiance": read("Weather.solar_irradiance"),
        },
        "plant": {
            "chw_supply_temp": read("CentralPlant.CHW_supply_temp"),
            "hw_supply_temp": read("CentralPlant.HW_supply_temp"),
            "total_cooling_tons": read("CentralPlant.total_cooling_tons"),
            "total_heating_mbh": read("CentralPlant.total_heating_mbh"),
            "total_plant_kw": read("CentralPlant.total_plant_kw"),
        },
        "electrical": {
            "total_demand_kw": read("Electrical.total_demand_kw"),
            "grid_import_kw": read("Electrical.grid_import_kw"),
            "solar_kw": read("Electrical.solar_kw"),
            "grid_connected": read("Electrical.MainMeter.grid_connected") != 0.0,
        },
        "zones": {
            "total": zone_count,
            "hot": hot_zones,
            "cold": cold_zones,
        },
        "topology": &world.topology,
    })))
}

pub async fn get_plant(
    State(state): State<ApiState>,
    AuthSession(_): AuthSession,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(grouped_view(&state, "CentralPlant")))
}

pub async fn get_electrical(
    State(state): State<ApiState>,
    AuthSession(_): AuthSession,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(grouped_view(&state, "Electrical")))
}

pub async fn get_buildings(
    State(state): State<ApiState>,
    AuthSession(_): AuthSession,
) -> Result<impl IntoResponse, ApiError> {
    let world = &state.world;
    let buildings: Vec<Value> = world
        .topology
        .buildings
        .iter()
        .map(|b| {
            json!({
                "id": b.id,
                "path": b.path,
                "display_name": b.display_name,
                "ahu_count": b.ahu_count,
                "vav_count": b.vav_count,
                "square_footage": b.square_footage,
            })
        })
        .collect();
    Ok(Json(json!({ "buildings": buildings })))
}

pub async fn get_building(
    State(state): State<ApiState>,
    AuthSession(_): AuthSession,
    Path(id): Path<usize>,
) -> Result<impl IntoResponse, ApiError> {
    let prefix = format!("Building_{id}");
    if !state
        .world
        .topology
        .buildings
        .iter()
        .any(|b| b.path == prefix)
    {
        return Err(ApiError(SimError::UnknownPoint(prefix)));
    }
    Ok(Json(grouped_view(&state, &prefix)))
}

pub async fn get_datacenter(
    State(state): State<ApiState>,
    AuthSession(_): AuthSession,
) -> Result<impl IntoResponse, ApiError> {
    if !state.world.topology.has_datacenter {
        return Err(ApiError(SimError::UnknownPoint("DataCenter".into())));
    }
    Ok(Json(grouped_view(&state, "DataCenter")))
}

pub async fn get_wastewater(
    State(state): State<ApiState>,
    AuthSession(_): AuthSession,
) -> Result<impl IntoResponse, ApiError> {
    if !state.world.topology.has_wastewater {
        return Err(ApiError(SimError::UnknownPoint("Wastewater".into())));
    }
    Ok(Json(grouped_view(&state, "Wastewater")))
}

pub async fn get_points(
    State(state): State<ApiState>,
    AuthSession(_): AuthSession,
) -> Result<impl IntoResponse, ApiError> {
    let system = state.world.unit_system();
    let snapshot = state.world.registry.snapshot(None);
    let mut out = Map::new();
    for (path, reading) in &snapshot {
        out.insert(path.clone(), reading_json(reading, system));
    }
    Ok(Json(Value::Object(out)))
}

pub async fn get_overrides(
    State(state): State<ApiState>,
    AuthSession(_): AuthSession,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.world.registry.overrides_map()))
}

pub async fn get_override_info(
    State(state): State<ApiState>,
    AuthSession(_): AuthSession,
    Path(path): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.world.registry.contains(&path) {
        return Err(ApiError(SimError::UnknownPoint(path)));
    }
    let map = state.world.registry.overrides_map();
    Ok(Json(json!({
        "point_path": path,
        "overrides": map.get(&path),
    })))
}

#[derive(Debug, Deserialize)]
pub struct SetOverrideRequest {
    pub point_path: String,
    pub value: Value,
    pub priority: u8,
    pub duration_seconds: Option<f64>,
}

pub async fn set_override(
    State(state): State<ApiState>,
    AdminSession(session): AdminSession,
    Json(req): Json<SetOverrideRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let raw = match &req.value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ApiError(SimError::BadType(req.point_path.clone())))?,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => return Err(ApiError(SimError::BadType(req.point_path.clone()))),
    };
    state.world.override_point(
        &req.point_path,
        raw,
        req.priority,
        &format!("http:{}", session.user),
        req.duration_seconds,
    )?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct ReleaseOverrideRequest {
    pub point_path: String,
    pub priority: Option<u8>,
}

pub async fn release_override(
    State(state): State<ApiState>,
    AdminSession(_): AdminSession,
    Json(req): Json<ReleaseOverrideRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let released = state
        .world
        .release_point(&req.point_path, req.priority)?;
    Ok(Json(json!({ "ok": true, "released": released })))
}

pub async fn get_parameters(
    State(state): State<ApiState>,
    AuthSession(_): AuthSession,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.world.params()))
}

pub async fn set_parameters(
    State(state): State<ApiState>,
    AdminSession(_): AdminSession,
    Json(params): Json<PhysicsParams>,
) -> Result<impl IntoResponse, ApiError> {
    state.world.set_params(params);
    Ok(Json(state.world.params()))
}

#[derive(Debug, Deserialize)]
pub struct ScenarioRequest {
    pub scenario: String,
}

pub async fn set_scenario(
    State(state): State<ApiState>,
    AdminSession(_): AdminSession,
    Json(req): Json<ScenarioRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let scenario: Scenario = req.scenario.parse()?;
    state.world.set_scenario(scenario);
    Ok(Json(json!({ "scenario": scenario.as_str() })))
}

#[derive(Debug, Deserialize)]
pub struct UnitSystemRequest {
    pub unit_system: UnitSystem,
}

pub async fn set_unit_system(
    State(state): State<ApiState>,
    AdminSession(_): AdminSession,
    Json(req): Json<UnitSystemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.world.set_unit_system(req.unit_system);
    Ok(Json(json!({ "unit_system": req.unit_system })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_display_converts_temperature() {
        let (value, units) = display_value(&PointValue::Analog(212.0), "°F", UnitSystem::Metric);
        assert!((value.as_f64().unwrap() - 100.0).abs() < 1e-9);
        assert_eq!(units, "°C");
    }

    #[test]
    fn us_display_is_identity() {
        let (value, units) = display_value(&PointValue::Analog(44.0), "°F", UnitSystem::Us);
        assert_eq!(value.as_f64().unwrap(), 44.0);
        assert_eq!(units, "°F");
    }

    #[test]
    fn unknown_units_pass_through() {
        let (value, units) = display_value(&PointValue::Analog(1.5), "kW", UnitSystem::Metric);
        assert_eq!(value.as_f64().unwrap(), 1.5);
        assert_eq!(units, "kW");
    }

    #[test]
    fn binary_values_are_not_converted() {
        let (value, _) = display_value(&PointValue::Binary(true), "", UnitSystem::Metric);
        assert_eq!(value, json!(true));
    }
}
