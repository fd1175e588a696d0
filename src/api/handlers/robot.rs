//! Robot state endpoints
//!
//! `GET /robot` is the admin surface (status and pause controls), `POST /robot` is
//! where a tenant's own client reports its robot toggle.

use axum::extract::{Query, State};
use axum::Json;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument};

use crate::api::server::AppState;
use crate::error::{Result, RentError};
use crate::models::{Eligibility, TenantPatch, TenantRecord};

#[derive(Debug, Default, Deserialize)]
pub struct AdminParams {
    pub admin: Option<String>,
    pub action: Option<String>,
    pub user: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportParams {
    pub u: Option<String>,
}

/// Body of a tenant self-report
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotReport {
    pub robot_on: Option<bool>,
    pub robot_paused: Option<bool>,
}

/// One row of the admin status listing
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantStatus {
    pub id: String,
    pub name: String,
    pub active: bool,
    pub robot_on: bool,
    pub robot_paused: bool,
    pub eligibility: Eligibility,
    pub cookie_age_hours: Option<f64>,
}

/// GET /robot?admin=<secret>&action=...
#[instrument(skip_all)]
pub async fn admin(
    State(state): State<AppState>,
    Query(params): Query<AdminParams>,
) -> Result<Json<Value>> {
    let secret = &state.config.admin.secret;
    if secret.is_empty() || params.admin.as_deref() != Some(secret.as_str()) {
        return Err(RentError::Unauthorized);
    }

    let action = params.action.as_deref().unwrap_or_default();
    match action {
        "status" => status(&state).await,
        "pause" | "resume" => {
            let user = params
                .user
                .as_deref()
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .ok_or_else(|| RentError::MissingParameter("user".to_string()))?;
            set_paused(&state, user, action == "pause").await
        }
        "pauseAll" | "resumeAll" => set_all_paused(&state, action == "pauseAll").await,
        other => Err(RentError::UnknownAction(other.to_string())),
    }
}

/// POST /robot?u=<tenant>
#[instrument(skip_all)]
pub async fn report(
    State(state): State<AppState>,
    Query(params): Query<ReportParams>,
    body: Bytes,
) -> Result<Json<Value>> {
    let tenant_id = params
        .u
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| RentError::MissingParameter("u".to_string()))?;

    let report: RobotReport = if body.iter().all(u8::is_ascii_whitespace) {
        RobotReport::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| RentError::InvalidRequest(format!("Invalid robot report: {}", e)))?
    };

    if state.store.tenant(tenant_id).await?.is_none() {
        return Err(RentError::UnknownTenant(tenant_id.to_string()));
    }

    let patch = TenantPatch::robot_state(report.robot_on, report.robot_paused);
    if !patch.is_empty() {
        state.store.patch_tenant(tenant_id, &patch).await?;
        state.cache.invalidate(tenant_id);
    }

    Ok(Json(json!({ "ok": true })))
}

async fn status(state: &AppState) -> Result<Json<Value>> {
    let now = state.clock.now();
    let tenants: Vec<TenantStatus> = state
        .store
        .all_tenants()
        .await?
        .into_iter()
        .map(|(id, record)| tenant_status(state, id, &record, now))
        .collect();

    Ok(Json(json!({ "tenants": tenants })))
}

fn tenant_status(
    state: &AppState,
    id: String,
    record: &TenantRecord,
    now: chrono::DateTime<chrono::Utc>,
) -> TenantStatus {
    TenantStatus {
        name: record.display_name(&id).to_string(),
        active: record.active,
        robot_on: record.robot_on != Some(false),
        robot_paused: record.robot_paused == Some(true),
        eligibility: record.bump_eligibility(
            now,
            state.config.proxy.rental_offset,
            state.config.bump.cookie_max_age,
        ),
        cookie_age_hours: record
            .cookie_age(now)
            .map(|age| (age.num_minutes() as f64 / 6.0).round() / 10.0),
        id,
    }
}

async fn set_paused(state: &AppState, tenant_id: &str, paused: bool) -> Result<Json<Value>> {
    if state.store.tenant(tenant_id).await?.is_none() {
        return Err(RentError::NotFound(format!("tenant {}", tenant_id)));
    }

    state
        .store
        .patch_tenant(tenant_id, &TenantPatch::paused(paused))
        .await?;
    state.cache.invalidate(tenant_id);
    info!(tenant = %tenant_id, paused, "Robot pause state changed");

    Ok(Json(json!({ "user": tenant_id, "robotPaused": paused })))
}

async fn set_all_paused(state: &AppState, paused: bool) -> Result<Json<Value>> {
    let tenants = state.store.all_tenants().await?;
    let patch = TenantPatch::paused(paused);

    for tenant_id in tenants.keys() {
        state.store.patch_tenant(tenant_id, &patch).await?;
    }
    state.cache.invalidate_all();
    info!(count = tenants.len(), paused, "Robot pause state changed for all tenants");

    Ok(Json(json!({ "updated": tenants.len(), "robotPaused": paused })))
}
