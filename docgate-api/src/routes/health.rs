/// Liveness and readiness report
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
///
/// # Response
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "database": "connected",
///   "operations": [
///     { "name": "face-detect", "configured": true },
///     { "name": "qr-masking", "configured": false }
///   ]
/// }
/// ```
///
/// `status` is `degraded` when the store does not answer. Unconfigured
/// operations do not degrade the status; calls to them fail with 503.

use crate::{app::AppState, error::ApiResult};
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `healthy` or `degraded`
    pub status: String,

    pub version: String,

    /// `connected` or `disconnected`
    pub database: String,

    pub operations: Vec<OperationStatus>,
}

/// Whether an operation has an upstream behind it
#[derive(Debug, Serialize, Deserialize)]
pub struct OperationStatus {
    pub name: String,
    pub configured: bool,
}

pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let store_up = match state.stores.accounts.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Store ping failed");
            false
        }
    };

    let catalog = state.orchestrator.catalog();
    let operations = catalog
        .descriptors()
        .iter()
        .map(|d| OperationStatus {
            name: d.name.to_string(),
            configured: catalog.is_configured(d.name),
        })
        .collect();

    Ok(Json(HealthResponse {
        status: if store_up { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: if store_up { "connected" } else { "disconnected" }.to_string(),
        operations,
    }))
}
