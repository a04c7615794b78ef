use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::{
    application::error::ErrorReport,
    monitor::{ConnectionStatus, MetricsSnapshot},
};

use super::HttpState;

const SOURCE: &str = "infra::http::ops";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct MetricsParams {
    detailed: Option<String>,
}

impl MetricsParams {
    fn detailed(&self) -> bool {
        self.detailed.as_deref() == Some("true")
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MetricsReport {
    status: &'static str,
    timestamp: String,
    connection: ConnectionStatus,
    metrics: MetricsSnapshot,
    #[serde(rename = "activeIPs", skip_serializing_if = "Option::is_none")]
    active_ips: Option<BTreeMap<String, u64>>,
}

pub(super) async fn store_metrics(
    State(state): State<HttpState>,
    Query(params): Query<MetricsParams>,
) -> Response {
    let connection = state.monitor.test_connection().await;
    if !connection.connected {
        let message = connection.message.clone();
        return failure("Store connection failed", message);
    }

    let Some(metrics) = state.monitor.collect().await else {
        return failure(
            "Failed to collect store metrics",
            "the store INFO reply could not be read",
        );
    };

    let active_ips = if params.detailed() {
        Some(state.monitor.active_identities().await)
    } else {
        None
    };

    let timestamp = match OffsetDateTime::now_utc().format(&Rfc3339) {
        Ok(timestamp) => timestamp,
        Err(err) => return failure("Internal server error", err.to_string()),
    };

    Json(MetricsReport {
        status: "success",
        timestamp,
        connection,
        metrics,
        active_ips,
    })
    .into_response()
}

pub(super) async fn store_health(State(state): State<HttpState>) -> Response {
    let connection = state.monitor.test_connection().await;
    if connection.connected {
        return StatusCode::NO_CONTENT.into_response();
    }

    let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
    ErrorReport::from_message(SOURCE, StatusCode::SERVICE_UNAVAILABLE, connection.message)
        .attach(&mut response);
    response
}

fn failure(error: &'static str, message: impl Into<String>) -> Response {
    let message = message.into();
    let status = StatusCode::INTERNAL_SERVER_ERROR;
    let body = Json(json!({ "error": error, "message": message }));
    let mut response = (status, body).into_response();
    ErrorReport::from_message(SOURCE, status, message).attach(&mut response);
    response
}
