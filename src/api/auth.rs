use axum::{
    extract::{FromRequestParts, State},
    http::{header, request::Parts, HeaderMap},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use super::error::ApiError;
use super::ApiState;
use crate::error::SimError;

pub const SESSION_COOKIE: &str = "basim_session";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Viewer,
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub user: String,
    pub role: Role,
}

/// In-memory session table; everything is forgotten on restart.
pub type SessionStore = Arc<RwLock<HashMap<Uuid, Session>>>;

fn session_id_from_headers(headers: &HeaderMap) -> Option<Uuid> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        if name == SESSION_COOKIE {
            Uuid::parse_str(value).ok()
        } else {
            None
        }
    })
}

/// Any authenticated principal.
pub struct AuthSession(pub Session);

/// An authenticated principal with the admin role; required on all write
/// endpoints.
pub struct AdminSession(pub Session);

#[axum::async_trait]
impl FromRequestParts<ApiState> for AuthSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ApiState,
    ) -> Result<Self, Self::Rejection> {
        let sid = session_id_from_headers(&parts.headers)
            .ok_or(ApiError(SimError::NotAuthenticated))?;
        let sessions = state.sessions.read().await;
        sessions
            .get(&sid)
            .cloned()
            .map(AuthSession)
            .ok_or(ApiError(SimError::NotAuthenticated))
    }
}

#[axum::async_trait]
impl FromRequestParts<ApiState> for AdminSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ApiState,
    ) -> Result<Self, Self::Rejection> {
        let AuthSession(session) = AuthSession::from_request_parts(parts, state).await?;
        if session.role != Role::Admin {
            return Err(ApiError(SimError::Forbidden));
        }
        Ok(AdminSession(session))
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

pub async fn login(
    State(state): State<ApiState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let cfg = &state.world.cfg;
    let role = if req.username == cfg.admin_user && req.password == cfg.admin_password {
        Role::Admin
    } else if req.username == cfg.viewer_user && req.password == cfg.viewer_password {
        Role::Viewer
    } else {
        return Err(ApiError(SimError::NotAuthenticated));
    };

    let sid = Uuid::new_v4();
    state.sessions.write().await.insert(
        sid,
        Session {
            user: req.username.clone(),
            role,
        },
    );
    info!(user = %req.username, ?role, "login");

    let cookie = format!("{SESSION_COOKIE}={sid}; HttpOnly; SameSite=Lax; Path=/");
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(serde_json::json!({ "user": req.username, "role": role })),
    ))
}

pub async fn logout(State(state): State<ApiState>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(sid) = session_id_from_headers(&headers) {
        state.sessions.write().await.remove(&sid);
    }
    let cookie = format!("{SESSION_COOKIE}=; Max-Age=0; Path=/");
    (
        [(header::SET_COOKIE, cookie)],
        Json(serde_json::json!({ "ok": true })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn parses_session_cookie_among_others() {
        let mut headers = HeaderMap::new();
        let sid = Uuid::new_v4();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("theme=dark; {SESSION_COOKIE}={sid}; other=1")).unwrap(),
        );
        assert_eq!(session_id_from_headers(&headers), Some(sid));
    }

    #[test]
    fn missing_or_malformed_cookie_is_none() {
        let headers = HeaderMap::new();
        assert_eq!(session_id_from_headers(&headers), None);

        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("basim_session=not-a-uuid"),
        );
        assert_eq!(session_id_from_headers(&headers), None);
    }
}
