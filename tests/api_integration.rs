//! HTTP API integration tests: auth, views, overrides and admin
//! endpoints, exercised in-process against the axum router.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use basim::api::{self, ApiState};
use basim::config::{AppConfig, CampusSize};
use basim::engine::Engine;

fn test_app() -> (Router, Engine) {
    let cfg = AppConfig {
        campus_size: CampusSize::Medium,
        ..AppConfig::default()
    };
    let mut engine = Engine::new(cfg).unwrap();
    engine.run_for(60);
    let state = ApiState::new(engine.world());
    (api::router(state), engine)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn login(app: &Router, username: &str, password: &str) -> String {
    let response = app
        .clone()
        .oneshot(
            Request::post("/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "username": username, "password": password }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("session cookie")
        .to_str()
        .unwrap();
    cookie.split(';').next().unwrap().to_string()
}

fn get(path: &str, cookie: &str) -> Request<Body> {
    Request::get(path)
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap()
}

fn post(path: &str, cookie: &str, body: Value) -> Request<Body> {
    Request::post(path)
        .header(header::COOKIE, cookie)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn unauthenticated_requests_are_rejected() {
    let (app, _engine) = test_app();
    let response = app
        .clone()
        .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn bad_credentials_are_rejected() {
    let (app, _engine) = test_app();
    let response = app
        .clone()
        .oneshot(
            Request::post("/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "username": "admin", "password": "wrong" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn status_reports_world_summary() {
    let (app, _engine) = test_app();
    let cookie = login(&app, "admin", "admin").await;
    let response = app.clone().oneshot(get("/api/status", &cookie)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["scenario"], "Normal");
    assert!(body["point_count"].as_u64().unwrap() > 100);
    assert!(body["weather"]["oat"].as_f64().unwrap() > -40.0);
    assert_eq!(body["topology"]["buildings"].as_array().unwrap().len(), 5);
    assert!(body["zones"]["total"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn viewer_can_read_but_not_write() {
    let (app, _engine) = test_app();
    let cookie = login(&app, "viewer", "viewer").await;

    let response = app.clone().oneshot(get("/api/plant", &cookie)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(post(
            "/api/override/set",
            &cookie,
            json!({
                "point_path": "CentralPlant.Chiller_1.chw_supply_temp",
                "value": 45.0,
                "priority": 8
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn override_set_and_release_round_trip() {
    let (app, engine) = test_app();
    let cookie = login(&app, "admin", "admin").await;
    let path = "CentralPlant.Chiller_1.chw_supply_temp";
    let before = engine.world.registry.effective_f64(path).unwrap();

    let response = app
        .clone()
        .oneshot(post(
            "/api/override/set",
            &cookie,
            json!({ "point_path": path, "value": 45.0, "priority": 8 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // /api/plant reflects the override
    let response = app.clone().oneshot(get("/api/plant", &cookie)).await.unwrap();
    let body = body_json(response).await;
    let point = &body["Chiller_1"]["chw_supply_temp"];
    assert_eq!(point["value"].as_f64().unwrap(), 45.0);
    assert_eq!(point["overridden"], json!(true));

    // /api/overrides lists the slot
    let response = app
        .clone()
        .oneshot(get("/api/overrides", &cookie))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body[path]["8"]["value"].as_f64().unwrap(), 45.0);

    // release restores the pre-override value
    let response = app
        .clone()
        .oneshot(post(
            "/api/override/release",
            &cookie,
            json!({ "point_path": path, "priority": 8 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let after = engine.world.registry.effective_f64(path).unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn override_on_unknown_point_is_404() {
    let (app, _engine) = test_app();
    let cookie = login(&app, "admin", "admin").await;
    let response = app
        .clone()
        .oneshot(post(
            "/api/override/set",
            &cookie,
            json!({ "point_path": "Nothing.here", "value": 1.0, "priority": 8 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn override_with_bad_priority_is_400() {
    let (app, _engine) = test_app();
    let cookie = login(&app, "admin", "admin").await;
    let response = app
        .clone()
        .oneshot(post(
            "/api/override/set",
            &cookie,
            json!({
                "point_path": "CentralPlant.Chiller_1.chw_supply_temp",
                "value": 45.0,
                "priority": 17
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn scenario_admin_endpoint_validates_names() {
    let (app, engine) = test_app();
    let cookie = login(&app, "admin", "admin").await;

    let response = app
        .clone()
        .oneshot(post(
            "/api/admin/scenario",
            &cookie,
            json!({ "scenario": "Heatwave" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        engine.world.scenario().scenario.as_str(),
        "Heatwave"
    );

    let response = app
        .clone()
        .oneshot(post(
            "/api/admin/scenario",
            &cookie,
            json!({ "scenario": "Sharknado" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unit_system_round_trip_preserves_display_values() {
    let (app, _engine) = test_app();
    let cookie = login(&app, "admin", "admin").await;

    let read_supply = |app: Router, cookie: String| async move {
        let response = app.oneshot(get("/api/plant", &cookie)).await.unwrap();
        let body = body_json(response).await;
        body["Chiller_1"]["chw_supply_temp"]["value"]
            .as_f64()
            .unwrap()
    };

    let us_before = read_supply(app.clone(), cookie.clone()).await;

    for system in ["METRIC", "US"] {
        let response = app
            .clone()
            .oneshot(post(
                "/api/admin/unit-system",
                &cookie,
                json!({ "unit_system": system }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let us_after = read_supply(app.clone(), cookie.clone()).await;
    assert_eq!(us_before.to_bits(), us_after.to_bits());
}

#[tokio::test]
async fn physics_parameters_round_trip() {
    let (app, engine) = test_app();
    let cookie = login(&app, "admin", "admin").await;

    let response = app
        .clone()
        .oneshot(post(
            "/api/admin/parameters",
            &cookie,
            json!({ "thermal_mass": 2.0, "equipment_efficiency": 0.8 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let params = engine.world.params();
    assert_eq!(params.thermal_mass, 2.0);
    assert_eq!(params.equipment_efficiency, 0.8);
    // unspecified multipliers keep their defaults
    assert_eq!(params.solar_gain, 1.0);
}

#[tokio::test]
async fn building_views_cover_topology() {
    let (app, _engine) = test_app();
    let cookie = login(&app, "admin", "admin").await;

    let response = app
        .clone()
        .oneshot(get("/api/buildings", &cookie))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["buildings"].as_array().unwrap().len(), 5);

    let response = app
        .clone()
        .oneshot(get("/api/building/1", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["AHU_1"]["VAV_101"]["room_temp"]["value"].is_number());

    let response = app
        .clone()
        .oneshot(get("/api/building/99", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn logout_invalidates_the_session() {
    let (app, _engine) = test_app();
    let cookie = login(&app, "admin", "admin").await;

    let response = app
        .clone()
        .oneshot(
            Request::post("/logout")
                .header(header::COOKIE, cookie.clone())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.clone().oneshot(get("/api/status", &cookie)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
