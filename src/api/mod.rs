//! HTTP API endpoints: GET /suburb, GET /crimeRate/{suburb},
//! GET /crimeRateSummary/{suburb}, GET /crimeCategory.
//!
//! Read-only. Each request opens its own connection on a blocking
//! worker and drops it with the response.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::db::{CategoryRow, CrimeDb, RateFilter, RateRow, SuburbRow, SummaryRow};

#[derive(Clone)]
pub struct AppState {
    db_path: Arc<PathBuf>,
}

impl AppState {
    pub fn new(db_path: PathBuf) -> Self {
        Self {
            db_path: Arc::new(db_path),
        }
    }
}

// ── Request/response types ───────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ApiError {
    error: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuburbEntry {
    pub suburb_id: i64,
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryEntry {
    pub crime_category_id: i64,
    pub offence: String,
    pub subcategory: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateEntry {
    pub name: String,
    pub offence: String,
    pub subcategory: String,
    pub start_date: String,
    pub end_date: String,
    pub rate: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryEntry {
    pub name: String,
    pub offence: String,
    pub subcategory: String,
    pub rate: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateParams {
    start_date: Option<String>,
    end_date: Option<String>,
    crime_category_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryParams {
    start_date: Option<String>,
    end_date: Option<String>,
}

impl From<SuburbRow> for SuburbEntry {
    fn from(row: SuburbRow) -> Self {
        Self {
            suburb_id: row.suburb_id,
            name: row.name,
        }
    }
}

impl From<CategoryRow> for CategoryEntry {
    fn from(row: CategoryRow) -> Self {
        Self {
            crime_category_id: row.crime_category_id,
            offence: row.offence,
            subcategory: row.subcategory,
        }
    }
}

impl From<RateRow> for RateEntry {
    fn from(row: RateRow) -> Self {
        Self {
            name: row.name,
            offence: row.offence,
            subcategory: row.subcategory,
            start_date: row.start_date,
            end_date: row.end_date,
            rate: row.rate,
        }
    }
}

impl From<SummaryRow> for SummaryEntry {
    fn from(row: SummaryRow) -> Self {
        Self {
            name: row.name,
            offence: row.offence,
            subcategory: row.subcategory,
            rate: row.rate,
        }
    }
}

// ── Errors and validation ────────────────────────────────────────

fn api_error(status: StatusCode, msg: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (status, Json(ApiError { error: msg.into() }))
}

fn db_error(err: rusqlite::Error) -> (StatusCode, Json<ApiError>) {
    warn!(error = %err, "database error");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "database error")
}

/// Parses a date parameter and re-renders it zero-padded, so the
/// string comparisons in the store always see canonical ISO text.
fn canonical_date(name: &str, value: &str) -> Result<String, (StatusCode, Json<ApiError>)> {
    match NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        Ok(date) => Ok(date.format("%Y-%m-%d").to_string()),
        Err(_) => Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("{name} must be an ISO date (YYYY-MM-DD), got `{value}`"),
        )),
    }
}

fn parse_category_id(raw: &str) -> Result<i64, (StatusCode, Json<ApiError>)> {
    raw.parse().map_err(|_| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("crimeCategoryId must be an integer, got `{raw}`"),
        )
    })
}

async fn run_query<T, F>(
    db_path: Arc<PathBuf>,
    query: F,
) -> Result<T, (StatusCode, Json<ApiError>)>
where
    T: Send + 'static,
    F: FnOnce(&CrimeDb) -> rusqlite::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let db = CrimeDb::open(&db_path).map_err(db_error)?;
        query(&db).map_err(db_error)
    })
    .await
    .map_err(|err| api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("join: {err}")))?
}

// ── Handlers ─────────────────────────────────────────────────────

async fn list_suburbs(State(state): State<AppState>) -> ApiResult<Vec<SuburbEntry>> {
    let rows = run_query(state.db_path.clone(), |db| db.suburbs()).await?;
    Ok(Json(rows.into_iter().map(SuburbEntry::from).collect()))
}

async fn list_categories(State(state): State<AppState>) -> ApiResult<Vec<CategoryEntry>> {
    let rows = run_query(state.db_path.clone(), |db| db.categories()).await?;
    Ok(Json(rows.into_iter().map(CategoryEntry::from).collect()))
}

async fn crime_rate(
    State(state): State<AppState>,
    Path(suburb): Path<String>,
    Query(params): Query<RateParams>,
) -> ApiResult<Vec<RateEntry>> {
    let start_date = match &params.start_date {
        Some(raw) => Some(canonical_date("startDate", raw)?),
        None => None,
    };
    let end_date = match &params.end_date {
        Some(raw) => Some(canonical_date("endDate", raw)?),
        None => None,
    };
    let category_id = match &params.crime_category_id {
        Some(raw) => Some(parse_category_id(raw)?),
        None => None,
    };

    let filter = RateFilter {
        start_date,
        end_date,
        category_id,
    };
    let rows = run_query(state.db_path.clone(), move |db| {
        db.rates_for_suburb(&suburb, &filter)
    })
    .await?;
    Ok(Json(rows.into_iter().map(RateEntry::from).collect()))
}

async fn crime_rate_summary(
    State(state): State<AppState>,
    Path(suburb): Path<String>,
    Query(params): Query<SummaryParams>,
) -> ApiResult<Vec<SummaryEntry>> {
    let start_date = match &params.start_date {
        Some(raw) => Some(canonical_date("startDate", raw)?),
        None => None,
    };
    let end_date = match &params.end_date {
        Some(raw) => Some(canonical_date("endDate", raw)?),
        None => None,
    };

    let rows = run_query(state.db_path.clone(), move |db| {
        db.summary_for_suburb(&suburb, start_date.as_deref(), end_date.as_deref())
    })
    .await?;
    Ok(Json(rows.into_iter().map(SummaryEntry::from).collect()))
}

// ── Router and server ────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/suburb", get(list_suburbs))
        .route("/crimeRate/{suburb}", get(crime_rate))
        .route("/crimeRateSummary/{suburb}", get(crime_rate_summary))
        .route("/crimeCategory", get(list_categories))
        .with_state(state)
}

pub async fn serve(db_path: PathBuf, bind: &str) -> std::io::Result<()> {
    let app = router(AppState::new(db_path));
    let listener = TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "ctrl-c handler failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dates_are_canonicalized_to_padded_iso() {
        assert_eq!(
            canonical_date("startDate", "2000-01-01").expect("valid"),
            "2000-01-01"
        );
        assert_eq!(
            canonical_date("startDate", "2000-1-5").expect("valid"),
            "2000-01-05"
        );
        assert!(canonical_date("startDate", "2000-13-01").is_err());
        assert!(canonical_date("startDate", "01/01/2000").is_err());
        assert!(canonical_date("endDate", "not-a-date").is_err());
        assert!(canonical_date("endDate", "").is_err());
    }

    #[test]
    fn category_id_must_be_an_integer() {
        assert_eq!(parse_category_id("12").expect("integer"), 12);
        assert!(parse_category_id("twelve").is_err());
        assert!(parse_category_id("1.5").is_err());
    }
}
