use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::health::{age_secs, get_health};
use crate::db::models::{ListingRow, MarketEventRow, PlayerSampleRow};
use crate::db::queries::{self, EventFilter, PricePoint, RosterSnapshot};
use crate::error::AppError;
use crate::scheduler::registry::JobLatency;
use crate::scheduler::JobRegistry;
use crate::types::{now_ns, EventType};

const DEFAULT_EVENT_LIMIT: i64 = 100;
const MAX_EVENT_LIMIT: i64 = 1000;

#[derive(Clone)]
pub struct ApiState {
    pub pool: sqlx::SqlitePool,
    pub registry: Arc<JobRegistry>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/listings/:name", get(get_listings))
        .route("/listings/:name/at", get(get_listings_at))
        .route("/listings/:name/history", get(get_price_history))
        .route("/events", get(get_events))
        .route("/scrape/latest", get(get_latest_scrape))
        .route("/players/latest", get(get_latest_players))
        .route("/roster/latest", get(get_latest_roster))
        .route("/health", get(get_health))
        .route("/stats/cycles", get(get_stats_cycles))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct AtQuery {
    pub ts: i64,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub since: Option<i64>,
}

#[derive(Deserialize, Default)]
pub struct EventsQuery {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct EventResponse {
    pub id: i64,
    pub timestamp: i64,
    pub event_type: String,
    pub canonical_name: String,
    pub item_id: i64,
    pub detail: serde_json::Value,
}

impl TryFrom<MarketEventRow> for EventResponse {
    type Error = AppError;

    fn try_from(r: MarketEventRow) -> Result<Self, Self::Error> {
        Ok(Self {
            detail: serde_json::from_str(&r.detail)?,
            id: r.id,
            timestamp: r.timestamp,
            event_type: r.event_type,
            canonical_name: r.canonical_name,
            item_id: r.item_id,
        })
    }
}

#[derive(Serialize)]
pub struct LatestScrapeResponse {
    pub last_scraped_at: Option<i64>,
    pub age_secs: Option<f64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_listings(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<ListingRow>>, AppError> {
    Ok(Json(queries::current_listings(&state.pool, &name).await?))
}

async fn get_listings_at(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(params): Query<AtQuery>,
) -> Result<Json<Vec<ListingRow>>, AppError> {
    Ok(Json(queries::listings_at(&state.pool, &name, params.ts).await?))
}

async fn get_price_history(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<Vec<PricePoint>>, AppError> {
    let since = params.since.unwrap_or(0);
    Ok(Json(queries::price_history(&state.pool, &name, since).await?))
}

async fn get_events(
    State(state): State<ApiState>,
    Query(params): Query<EventsQuery>,
) -> Result<Json<Vec<EventResponse>>, AppError> {
    let event_type = params
        .event_type
        .as_deref()
        .map(str::parse::<EventType>)
        .transpose()
        .map_err(AppError::BadRequest)?;

    let filter = EventFilter {
        canonical_name: params.name,
        event_type,
        limit: params
            .limit
            .unwrap_or(DEFAULT_EVENT_LIMIT)
            .clamp(1, MAX_EVENT_LIMIT),
    };

    let events = queries::events(&state.pool, &filter)
        .await?
        .into_iter()
        .map(EventResponse::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(events))
}

async fn get_latest_scrape(
    State(state): State<ApiState>,
) -> Result<Json<LatestScrapeResponse>, AppError> {
    let last = queries::latest_scrape(&state.pool).await?;
    Ok(Json(LatestScrapeResponse {
        last_scraped_at: last,
        age_secs: last.map(|ts| age_secs(ts, now_ns())),
    }))
}

async fn get_latest_players(
    State(state): State<ApiState>,
) -> Result<Json<Option<PlayerSampleRow>>, AppError> {
    Ok(Json(queries::latest_player_sample(&state.pool).await?))
}

async fn get_latest_roster(
    State(state): State<ApiState>,
) -> Result<Json<Option<RosterSnapshot>>, AppError> {
    Ok(Json(queries::latest_roster(&state.pool).await?))
}

async fn get_stats_cycles(State(state): State<ApiState>) -> Json<Vec<JobLatency>> {
    Json(state.registry.latency())
}
