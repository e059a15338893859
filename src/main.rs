use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use basim::api::{self, ApiState};
use basim::config::AppConfig;
use basim::engine::Engine;
use basim::protocols::bacnet::{BacnetIpServer, BacnetScState, ObjectMap};
use basim::protocols::modbus::{ModbusServer, RegisterMap};
use basim::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();

    let cfg = AppConfig::load()?;
    let engine = Engine::new(cfg.clone())?;
    let world = engine.world();

    // Protocol address maps come out of the finished registry, before any
    // listener binds
    let register_map = Arc::new(RegisterMap::from_registry(&world.registry));
    let objects = Arc::new(ObjectMap::from_registry(&world.registry));

    let modbus = ModbusServer::new(world.clone(), register_map);
    modbus.serve(cfg.modbus_addr()?).await?;

    let bacnet = BacnetIpServer::new(world.clone(), objects.clone(), cfg.device_id);
    bacnet.serve(cfg.bacnet_addr()?).await?;

    let sc_state = BacnetScState::new(world.clone(), objects, cfg.device_id);
    basim::protocols::bacnet::serve_sc(sc_state, cfg.bacnet_sc_addr()?).await?;

    engine.spawn();

    let api_state = ApiState::new(world.clone());
    let app = api::router(api_state);
    let addr = cfg.http_addr()?;
    info!(%addr, "starting BASim campus simulator");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await?;

    warn!("shutdown complete");
    Ok(())
}
