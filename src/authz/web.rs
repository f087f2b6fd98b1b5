use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::authz::cache::CacheKind;
use crate::authz::engine::Engine;
use crate::authz::errors::AuthzError;
use crate::authz::types::{CheckRequest, Decision, DecisionReason};

pub fn router(engine: Engine) -> Router {
    Router::new()
        .route("/v1/check", post(handle_check))
        .route("/v1/subjects/{subject}/rls", get(handle_rls))
        .route("/v1/subjects/{subject}/roles", get(handle_roles))
        .route("/v1/subjects/{subject}/permissions", get(handle_permissions))
        .route("/v1/cache/flush", post(handle_flush))
        .route("/healthz", get(health))
        .with_state(engine)
}

/// Only persistence failures surface as 500; every other deny, cancelled
/// checks included, is a 403.
fn decision_status(decision: &Decision) -> StatusCode {
    if decision.allowed {
        return StatusCode::OK;
    }
    match decision.reason {
        Some(DecisionReason::InternalError) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::FORBIDDEN,
    }
}

async fn handle_check(
    State(engine): State<Engine>,
    Json(req): Json<CheckRequest>,
) -> impl IntoResponse {
    let Some(subject) = req.subject.filter(|s| !s.is_empty()) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(Decision::deny(DecisionReason::Unauthorized)),
        );
    };

    let ctx = CancellationToken::new();
    let decision = engine
        .check(
            &ctx,
            &subject,
            &req.object,
            &req.action,
            req.attributes.as_ref(),
        )
        .await;
    (decision_status(&decision), Json(decision))
}

async fn handle_rls(State(engine): State<Engine>, Path(subject): Path<String>) -> impl IntoResponse {
    match engine
        .rls_payload_for(&CancellationToken::new(), &subject)
        .await
    {
        Ok(payload) => Json(payload).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Serialize)]
struct RolesResponse {
    roles: Vec<String>,
}

async fn handle_roles(
    State(engine): State<Engine>,
    Path(subject): Path<String>,
) -> impl IntoResponse {
    match engine.roles_for(&CancellationToken::new(), &subject).await {
        Ok(roles) => Json(RolesResponse { roles }).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn handle_permissions(
    State(engine): State<Engine>,
    Path(subject): Path<String>,
) -> impl IntoResponse {
    match engine
        .permissions_for(&CancellationToken::new(), &subject)
        .await
    {
        Ok(permissions) => Json(permissions).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
struct FlushRequest {
    #[serde(default)]
    kind: Option<CacheKind>,
}

/// An empty body flushes every cache.
async fn handle_flush(State(engine): State<Engine>, body: Bytes) -> impl IntoResponse {
    let req = if body.is_empty() {
        FlushRequest::default()
    } else {
        match serde_json::from_slice::<FlushRequest>(&body) {
            Ok(req) => req,
            Err(e) => {
                return AuthzError::InvalidInput(format!("flush request: {e}")).into_response()
            }
        }
    };
    let kind = req.kind.unwrap_or_default();
    engine.flush_cache(Some(kind));
    (StatusCode::OK, Json(serde_json::json!({ "flushed": kind }))).into_response()
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
