//! Route handlers.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use super::error::{ApiError, CallbackAck, Surface};
use crate::app::{Broker, JobResponse, RegistryStatus};
use crate::domain::{CallbackPayload, JobRequest};
use crate::origin::RequestMeta;

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
}

/// `POST /api/execute`
pub async fn execute(
    State(broker): State<Arc<Broker>>,
    body: Result<Json<JobRequest>, JsonRejection>,
) -> Result<Json<JobResponse>, ApiError> {
    let Json(request) = body.map_err(|e| {
        tracing::warn!(error = %e, "rejected job body");
        ApiError::bad_request(format!("Invalid request body: {}", e.body_text()), Surface::Submit)
    })?;

    broker
        .submit(request)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_relay(e, Surface::Submit))
}

/// `POST <callback-path>`
///
/// Origin is checked before the query and body are read. The body is parsed by hand so
/// that a malformed payload still gets the `{ success: false, ... }` shape.
pub async fn callback(
    State(broker): State<Arc<Broker>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    query: Result<Query<CallbackQuery>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CallbackAck>, ApiError> {
    let meta = RequestMeta::from_headers(&headers, peer.map(|ConnectInfo(addr)| addr.ip()));
    broker
        .authorize_callback(&meta)
        .map_err(|e| ApiError::from_relay(e, Surface::Callback))?;

    // 壊れた query を「id なし」と読むと最古の waiter に誤配送する
    let Query(query) = query.map_err(|e| {
        tracing::warn!(error = %e, "rejected callback query");
        ApiError::bad_request(
            format!("Invalid callback query: {}", e.body_text()),
            Surface::Callback,
        )
    })?;

    let payload: CallbackPayload = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(error = %e, "rejected callback body");
        ApiError::bad_request(format!("Invalid callback body: {e}"), Surface::Callback)
    })?;

    let receipt = broker
        .deliver_callback(query.request_id.as_deref(), &payload)
        .map_err(|e| ApiError::from_relay(e, Surface::Callback))?;

    tracing::info!(
        request_id = %receipt.request_id,
        matched_by = ?receipt.matched_by,
        "callback delivered"
    );
    Ok(Json(CallbackAck::ok()))
}

/// `OPTIONS` on any route.
pub async fn preflight() -> StatusCode {
    StatusCode::OK
}

pub async fn execute_method_not_allowed() -> impl IntoResponse {
    ApiError::method_not_allowed(Surface::Submit)
}

pub async fn callback_method_not_allowed() -> impl IntoResponse {
    ApiError::method_not_allowed(Surface::Callback)
}

pub async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

pub async fn status(State(broker): State<Arc<Broker>>) -> Json<RegistryStatus> {
    Json(broker.status())
}
