//! Batch trigger for the bump engine

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::{info, instrument};

use crate::api::server::AppState;
use crate::error::RentError;

#[derive(Debug, Default, Deserialize)]
pub struct BumpParams {
    pub secret: Option<String>,
}

/// GET /bump?secret=<secret>
#[instrument(skip_all)]
pub async fn trigger(State(state): State<AppState>, Query(params): Query<BumpParams>) -> Response {
    let secret = &state.config.bump.secret;
    if secret.is_empty() || params.secret.as_deref() != Some(secret.as_str()) {
        return RentError::Unauthorized.into_response();
    }

    info!("Bump run triggered");
    let report = state.engine.run().await;
    let status = if report.error.is_some() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };

    (status, Json(report)).into_response()
}
