/// Usage analytics endpoints
///
/// # Endpoints
///
/// Admin only:
///
/// - `GET /api/v1/usage/services?start_date=&end_date=`
/// - `GET /api/v1/usage/users?start_date=&end_date=`
/// - `GET /api/v1/usage/service-users?service=&start_date=&end_date=`
/// - `GET /api/v1/usage/users/:user_id/history?limit=&skip=`
/// - `GET /api/v1/usage/services/:service/history?limit=&skip=`
///
/// Signed token:
///
/// - `GET /api/v1/usage/me?limit=&skip=`
///
/// Dates accept RFC 3339 timestamps or plain `YYYY-MM-DD`. A plain end date
/// covers that whole day.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use docgate_shared::{
    auth::middleware::AuthContext,
    models::usage::{
        DateRange, UsageAggregate, UsageDimension, UsageFilter, UsageRecord, DEFAULT_HISTORY_LIMIT,
        MAX_HISTORY_LIMIT,
    },
};
use serde::{Deserialize, Serialize};

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};

/// Date range query parameters
#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,

    /// Restricts `service-users` to one service
    pub service: Option<String>,
}

/// Pagination query parameters
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    pub skip: Option<i64>,
}

/// Echo of the applied date range
#[derive(Debug, Serialize)]
pub struct DateRangeEcho {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

/// Aggregate statistics response
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub stats: Vec<UsageAggregate>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_services: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_users: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_records: Option<usize>,

    pub date_range: DateRangeEcho,
}

/// Applied pagination
#[derive(Debug, Serialize)]
pub struct Pagination {
    pub limit: i64,
    pub skip: i64,
}

/// History response
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    pub usage_history: Vec<UsageRecord>,
    pub total_records: usize,
    pub pagination: Pagination,
}

/// Per-service totals
pub async fn service_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> ApiResult<Json<StatsResponse>> {
    let range = parse_range(&query)?;
    let stats = state.stores.usage.aggregate_by(UsageDimension::Operation, range).await?;

    Ok(Json(StatsResponse {
        total_services: Some(stats.len()),
        total_users: None,
        total_records: None,
        date_range: echo(range),
        stats,
    }))
}

/// Per-account totals
pub async fn user_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> ApiResult<Json<StatsResponse>> {
    let range = parse_range(&query)?;
    let stats = state.stores.usage.aggregate_by(UsageDimension::User, range).await?;

    Ok(Json(StatsResponse {
        total_services: None,
        total_users: Some(stats.len()),
        total_records: None,
        date_range: echo(range),
        stats,
    }))
}

/// Per (service, account) totals
pub async fn service_user_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> ApiResult<Json<StatsResponse>> {
    let range = parse_range(&query)?;
    let mut stats = state
        .stores
        .usage
        .aggregate_by(UsageDimension::OperationAndUser, range)
        .await?;

    if let Some(service) = query.service.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        stats.retain(|row| row.service_name.as_deref() == Some(service));
    }

    Ok(Json(StatsResponse {
        total_services: None,
        total_users: None,
        total_records: Some(stats.len()),
        date_range: echo(range),
        stats,
    }))
}

pub async fn user_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HistoryResponse>> {
    let pagination = paginate(&query)?;
    let usage_history = state
        .stores
        .usage
        .history(UsageFilter::for_user(user_id.clone()), pagination.limit, pagination.skip)
        .await?;

    Ok(Json(HistoryResponse {
        user_id: Some(user_id),
        service_name: None,
        total_records: usage_history.len(),
        usage_history,
        pagination,
    }))
}

pub async fn service_history(
    State(state): State<AppState>,
    Path(service): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HistoryResponse>> {
    let pagination = paginate(&query)?;
    let usage_history = state
        .stores
        .usage
        .history(UsageFilter::for_operation(service.clone()), pagination.limit, pagination.skip)
        .await?;

    Ok(Json(HistoryResponse {
        user_id: None,
        service_name: Some(service),
        total_records: usage_history.len(),
        usage_history,
        pagination,
    }))
}

/// The caller's own history
pub async fn my_history(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HistoryResponse>> {
    let pagination = paginate(&query)?;
    let account = state.accounts.ensure_account(&auth.identity).await?;
    let usage_history = state
        .stores
        .usage
        .history(UsageFilter::for_user(account.user_id.clone()), pagination.limit, pagination.skip)
        .await?;

    Ok(Json(HistoryResponse {
        user_id: Some(account.user_id),
        service_name: None,
        total_records: usage_history.len(),
        usage_history,
        pagination,
    }))
}

fn paginate(query: &HistoryQuery) -> ApiResult<Pagination> {
    let skip = query.skip.unwrap_or(0);
    if skip < 0 {
        return Err(ApiError::BadRequest("skip must not be negative".to_string()));
    }

    let limit = match query.limit {
        Some(limit) if limit < 1 => {
            return Err(ApiError::BadRequest("limit must be at least 1".to_string()));
        }
        Some(limit) => limit.min(MAX_HISTORY_LIMIT),
        None => DEFAULT_HISTORY_LIMIT,
    };

    Ok(Pagination { limit, skip })
}

fn parse_range(query: &StatsQuery) -> ApiResult<DateRange> {
    let start = query
        .start_date
        .as_deref()
        .map(|raw| parse_date(raw, "start_date", false))
        .transpose()?;
    let end = query
        .end_date
        .as_deref()
        .map(|raw| parse_date(raw, "end_date", true))
        .transpose()?;

    if let (Some(start), Some(end)) = (start, end) {
        if start >= end {
            return Err(ApiError::BadRequest("start_date must be before end_date".to_string()));
        }
    }

    Ok(DateRange { start, end })
}

/// Parses RFC 3339 or `YYYY-MM-DD`; a plain end date means the next midnight
fn parse_date(raw: &str, field: &str, is_end: bool) -> ApiResult<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }

    let day = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("Invalid {}: expected RFC 3339 or YYYY-MM-DD", field)))?;
    let day = if is_end { day + Duration::days(1) } else { day };

    day.and_hms_opt(0, 0, 0)
        .map(|at| at.and_utc())
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid {}", field)))
}

fn echo(range: DateRange) -> DateRangeEcho {
    DateRangeEcho {
        start_date: range.start,
        end_date: range.end,
    }
}
