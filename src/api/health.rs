//! `/health`: job registry snapshot plus scrape ledger staleness.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::api::routes::ApiState;
use crate::db::queries;
use crate::error::AppError;
use crate::scheduler::JobStatus;
use crate::types::now_ns;

#[derive(Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when any job's last cycle failed.
    pub status: &'static str,
    pub last_scrape_at: Option<i64>,
    pub scrape_age_secs: Option<f64>,
    pub jobs: Vec<JobStatus>,
}

pub async fn get_health(State(state): State<ApiState>) -> Result<Json<HealthResponse>, AppError> {
    let jobs = state.registry.snapshot();
    let last_scrape_at = queries::latest_scrape(&state.pool).await?;

    Ok(Json(HealthResponse {
        status: overall(&jobs),
        last_scrape_at,
        scrape_age_secs: last_scrape_at.map(|ts| age_secs(ts, now_ns())),
        jobs,
    }))
}

fn overall(jobs: &[JobStatus]) -> &'static str {
    if jobs.iter().any(|j| j.consecutive_failures > 0) {
        "degraded"
    } else {
        "ok"
    }
}

pub fn age_secs(ts_ns: i64, now_ns: i64) -> f64 {
    (now_ns - ts_ns).max(0) as f64 / 1e9
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::db;
    use crate::scheduler::JobRegistry;

    #[test]
    fn age_is_never_negative() {
        assert_eq!(age_secs(3_000_000_000, 5_000_000_000), 2.0);
        assert_eq!(age_secs(5, 1), 0.0);
    }

    #[tokio::test]
    async fn reports_failing_job_as_degraded() {
        let pool = db::test_pool().await;
        let registry = JobRegistry::new();
        registry.register("market");
        registry.register("players");
        registry.start("players", 1);
        registry.finish("players", Err("connection refused".into()), 2, Duration::from_millis(3));
        registry.idle("players");

        let state = ApiState { pool, registry };
        let Json(resp) = get_health(State(state)).await.unwrap();
        assert_eq!(resp.status, "degraded");
        assert_eq!(resp.last_scrape_at, None);
        assert_eq!(resp.jobs.len(), 2);
        assert_eq!(resp.jobs[1].last_error.as_deref(), Some("connection refused"));
    }
}
