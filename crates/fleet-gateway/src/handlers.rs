//! HTTP handlers for the fleet observability surface.

use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use fleet_common::metrics::RedactedComponentHealth;
use fleet_common::{ComponentHealth, Error};
use fleet_remediation::ActorContext;

use crate::server::AppState;
use crate::websocket;

/// Wraps a [`fleet_common::Error`] so it can implement [`IntoResponse`]
/// without violating the orphan rule, per the status-code mapping in
/// `Error::http_status`.
pub struct ApiError {
    error: Error,
    action_id: Option<Uuid>,
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self { error, action_id: None }
    }
}

impl ApiError {
    fn for_action(error: Error, action_id: Uuid) -> Self {
        Self {
            error,
            action_id: Some(action_id),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = match &self.error {
            Error::Conflict { current_status, .. } => json!({
                "error": self.error.to_string(),
                "actionId": self.action_id,
                "currentStatus": current_status,
            }),
            _ => json!({ "error": self.error.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

pub fn create_router(gateway: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(health_ready))
        .route("/health/ready/detail", get(health_ready_detail))
        .route("/api/remediation/actions/:id/approve", post(approve_action))
        .route("/api/remediation/actions/:id/reject", post(reject_action))
        .route("/api/remediation/actions/:id/execute", post(execute_action))
        .route("/api/webhooks/event-types", get(webhook_event_types))
        .route("/ws", get(websocket::ws_handler))
        .route("/api/events/stream", get(websocket::sse_handler))
        .with_state(gateway)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "timestamp": Utc::now() }))
}

#[derive(Serialize)]
struct ReadyResponse<C: Serialize> {
    status: fleet_common::HealthLevel,
    checks: HashMap<String, C>,
}

async fn health_ready(State(gateway): State<AppState>) -> impl IntoResponse {
    let status = gateway.health.readiness().await;
    let checks = status.checks.iter().map(|(name, c)| (name.clone(), c.redacted())).collect::<HashMap<String, RedactedComponentHealth>>();
    Json(ReadyResponse {
        status: status.overall,
        checks,
    })
}

async fn health_ready_detail(State(gateway): State<AppState>, headers: HeaderMap) -> Response {
    if !gateway.authorize_admin(bearer_token(&headers).as_deref()) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "unauthorized" }))).into_response();
    }
    let status = gateway.health.readiness().await;
    let checks = status.checks.clone();
    Json(ReadyResponse::<ComponentHealth> {
        status: status.overall,
        checks,
    })
    .into_response()
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string())
}

fn actor_context(headers: &HeaderMap) -> ActorContext {
    let request_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .unwrap_or_else(Uuid::new_v4);
    let ip_address = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string());
    ActorContext {
        user_id: None,
        username: None,
        request_id,
        ip_address,
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApproveRequest {
    approved_by: String,
}

async fn approve_action(
    State(gateway): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<ApproveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = actor_context(&headers);
    let action = gateway
        .remediation
        .approve(id, body.approved_by, &ctx)
        .map_err(|e| ApiError::for_action(e, id))?;
    Ok(Json(json!({ "success": true, "actionId": action.id, "status": action.status.to_string() })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RejectRequest {
    rejected_by: String,
    reason: String,
}

async fn reject_action(
    State(gateway): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<RejectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = actor_context(&headers);
    let action = gateway
        .remediation
        .reject(id, body.rejected_by, body.reason, &ctx)
        .map_err(|e| ApiError::for_action(e, id))?;
    Ok(Json(json!({ "success": true, "actionId": action.id, "status": action.status.to_string() })))
}

async fn execute_action(
    State(gateway): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = actor_context(&headers);
    let action = gateway
        .remediation
        .execute(id, &ctx)
        .await
        .map_err(|e| ApiError::for_action(e, id))?;
    Ok(Json(json!({ "success": true, "actionId": action.id, "status": action.status.to_string() })))
}

#[derive(Serialize)]
struct EventTypeDescriptor {
    #[serde(rename = "type")]
    event_type: &'static str,
    description: &'static str,
}

async fn webhook_event_types() -> impl IntoResponse {
    let types = vec![
        EventTypeDescriptor {
            event_type: "insight.created",
            description: "A new insight was recorded during a monitoring cycle.",
        },
        EventTypeDescriptor {
            event_type: "anomaly.detected",
            description: "A statistical or hard-threshold anomaly was flagged.",
        },
        EventTypeDescriptor {
            event_type: "container.state_change",
            description: "A container transitioned between running states.",
        },
        EventTypeDescriptor {
            event_type: "remediation.requested",
            description: "A remediation action was created and is pending approval.",
        },
        EventTypeDescriptor {
            event_type: "remediation.approved",
            description: "A remediation action was approved.",
        },
        EventTypeDescriptor {
            event_type: "remediation.rejected",
            description: "A remediation action was rejected.",
        },
        EventTypeDescriptor {
            event_type: "remediation.completed",
            description: "A remediation action finished executing, successfully or not.",
        },
        EventTypeDescriptor {
            event_type: "remediation.*",
            description: "Wildcard subscription to every remediation.* event.",
        },
        EventTypeDescriptor {
            event_type: "*",
            description: "Wildcard subscription to every event type.",
        },
    ];
    Json(types)
}
