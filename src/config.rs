use anyhow::{Context, Result};
use figment::{providers::Env, Figment};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use validator::Validate;

/// Top-level application configuration.
///
/// Loaded from the environment; every key has a usable default so the
/// simulator starts with no configuration at all.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AppConfig {
    #[serde(default = "default_campus_size")]
    pub campus_size: CampusSize,

    /// Simulated seconds advanced per wall-clock second.
    #[serde(default = "default_simulation_speed")]
    #[validate(range(min = 0.1, max = 1000.0))]
    pub simulation_speed: f64,

    /// Campus latitude in decimal degrees; drives solar angle and season.
    #[serde(default = "default_geo_lat")]
    #[validate(range(min = -90.0, max = 90.0))]
    pub geo_lat: f64,

    #[serde(default = "default_unit_system")]
    pub unit_system: UnitSystem,

    /// BACnet device instance for the gateway device object.
    #[serde(default = "default_device_id")]
    #[validate(range(min = 1, max = 4194302))]
    pub device_id: u32,

    #[serde(default = "default_http_port")]
    pub http_port: u16,

    #[serde(default = "default_modbus_port")]
    pub modbus_port: u16,

    #[serde(default = "default_bacnet_port")]
    pub bacnet_port: u16,

    #[serde(default = "default_bacnet_sc_port")]
    pub bacnet_sc_port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_admin_user")]
    #[validate(length(min = 1))]
    pub admin_user: String,

    #[serde(default = "default_admin_password")]
    #[validate(length(min = 1))]
    pub admin_password: String,

    #[serde(default = "default_viewer_user")]
    pub viewer_user: String,

    #[serde(default = "default_viewer_password")]
    pub viewer_password: String,

    /// Seed for every stochastic term in the world; identical seeds replay
    /// identical simulations.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum CampusSize {
    Small,
    Medium,
    Large,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum UnitSystem {
    #[serde(rename = "US", alias = "us")]
    Us,
    #[serde(alias = "METRIC", alias = "metric")]
    Metric,
}

fn default_campus_size() -> CampusSize {
    CampusSize::Medium
}
fn default_simulation_speed() -> f64 {
    1.0
}
fn default_geo_lat() -> f64 {
    36.16
}
fn default_unit_system() -> UnitSystem {
    UnitSystem::Us
}
fn default_device_id() -> u32 {
    389999
}
fn default_http_port() -> u16 {
    8080
}
fn default_modbus_port() -> u16 {
    5020
}
fn default_bacnet_port() -> u16 {
    47808
}
fn default_bacnet_sc_port() -> u16 {
    8443
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_admin_user() -> String {
    "admin".to_string()
}
fn default_admin_password() -> String {
    "admin".to_string()
}
fn default_viewer_user() -> String {
    "viewer".to_string()
}
fn default_viewer_password() -> String {
    "viewer".to_string()
}
fn default_seed() -> u64 {
    42
}

impl AppConfig {
    /// Load configuration from environment variables (`CAMPUS_SIZE`,
    /// `SIMULATION_SPEED`, `GEO_LAT`, `UNIT_SYSTEM`, `DEVICE_ID`,
    /// `HTTP_PORT`, `MODBUS_PORT`, `BACNET_PORT`, `BACNET_SC_PORT`,
    /// `ADMIN_USER`, `ADMIN_PASSWORD`, ...).
    pub fn load() -> Result<Self> {
        let config: AppConfig = Figment::new()
            .merge(
                Env::raw()
                    .only(&[
                        "CAMPUS_SIZE",
                        "SIMULATION_SPEED",
                        "GEO_LAT",
                        "UNIT_SYSTEM",
                        "DEVICE_ID",
                        "HTTP_PORT",
                        "MODBUS_PORT",
                        "BACNET_PORT",
                        "BACNET_SC_PORT",
                        "HOST",
                        "ADMIN_USER",
                        "ADMIN_PASSWORD",
                        "VIEWER_USER",
                        "VIEWER_PASSWORD",
                        "SEED",
                    ])
                    .map(|key| key.as_str().to_ascii_lowercase().into()),
            )
            .extract()
            .context("failed to parse configuration")?;

        config
            .validate()
            .context("configuration validation failed")?;

        Ok(config)
    }

    pub fn http_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.http_port)
            .parse()
            .context("failed to parse HTTP socket address")
    }

    pub fn modbus_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.modbus_port)
            .parse()
            .context("failed to parse Modbus socket address")
    }

    pub fn bacnet_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.bacnet_port)
            .parse()
            .context("failed to parse BACnet socket address")
    }

    pub fn bacnet_sc_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.bacnet_sc_port)
            .parse()
            .context("failed to parse BACnet/SC socket address")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            campus_size: default_campus_size(),
            simulation_speed: default_simulation_speed(),
            geo_lat: default_geo_lat(),
            unit_system: default_unit_system(),
            device_id: default_device_id(),
            http_port: default_http_port(),
            modbus_port: default_modbus_port(),
            bacnet_port: default_bacnet_port(),
            bacnet_sc_port: default_bacnet_sc_port(),
            host: default_host(),
            admin_user: default_admin_user(),
            admin_password: default_admin_password(),
            viewer_user: default_viewer_user(),
            viewer_password: default_viewer_password(),
            seed: default_seed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.modbus_port, 5020);
        assert_eq!(cfg.bacnet_port, 47808);
        assert_eq!(cfg.device_id, 389999);
    }

    #[test]
    fn socket_addrs_parse() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.http_addr().unwrap().port(), 8080);
        assert_eq!(cfg.modbus_addr().unwrap().port(), 5020);
    }

    #[test]
    fn campus_size_deserializes() {
        let size: CampusSize = serde_json::from_str("\"Large\"").unwrap();
        assert_eq!(size, CampusSize::Large);
    }

    #[test]
    fn unit_system_deserializes_uppercase() {
        let us: UnitSystem = serde_json::from_str("\"US\"").unwrap();
        assert_eq!(us, UnitSystem::Us);
        let metric: UnitSystem = serde_json::from_str("\"METRIC\"").unwrap();
        assert_eq!(metric, UnitSystem::Metric);
    }
}
