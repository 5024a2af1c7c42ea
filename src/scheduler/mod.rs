//! Fixed-interval job runner. Each job gets its own task, so a job's cycles never
//! overlap while different jobs run side by side against the same pool.

pub mod registry;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::types::now_ns;

pub use registry::{JobRegistry, JobState, JobStatus};

/// Smallest accepted period; `tokio::time::interval` panics on zero.
const MIN_PERIOD: Duration = Duration::from_millis(1);

#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;
    fn interval(&self) -> Duration;
    /// One complete cycle. An error leaves nothing behind and is retried next tick.
    async fn run_cycle(&self) -> Result<()>;
}

pub struct Scheduler {
    registry: Arc<JobRegistry>,
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(registry: Arc<JobRegistry>, token: CancellationToken) -> Self {
        Self {
            registry,
            token,
            handles: Vec::new(),
        }
    }

    /// Start ticking `job`. The first cycle runs immediately.
    pub fn spawn(&mut self, job: Arc<dyn Job>) {
        self.registry.register(job.name());
        info!(job = job.name(), period_secs = job.interval().as_secs_f64(), "Job scheduled");

        let registry = Arc::clone(&self.registry);
        let token = self.token.clone();
        self.handles
            .push(tokio::spawn(async move { run_job(job, registry, token).await }));
    }

    /// Stop starting cycles and wait for the in-flight ones.
    pub async fn shutdown(self) {
        self.token.cancel();
        self.drain().await;
    }

    /// Wait for every job task to exit. Only returns once the token is cancelled.
    pub async fn drain(self) {
        for res in futures_util::future::join_all(self.handles).await {
            if let Err(e) = res {
                error!("Job task panicked: {e}");
            }
        }
        info!("Scheduler drained");
    }
}

async fn run_job(job: Arc<dyn Job>, registry: Arc<JobRegistry>, token: CancellationToken) {
    let mut ticker = interval(job.interval().max(MIN_PERIOD));
    // A slow cycle pushes the schedule back instead of firing a burst of catch-up ticks.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        // Not raced against the token: an in-flight cycle always runs to completion.
        run_once(job.as_ref(), &registry).await;
    }

    info!(job = job.name(), "Job stopped");
}

/// One cycle through the Idle → Running → Committed | Failed → Idle state machine.
/// Returns whether the cycle committed.
pub async fn run_once(job: &dyn Job, registry: &JobRegistry) -> bool {
    let name = job.name();
    registry.start(name, now_ns());
    let started = Instant::now();

    let result = job.run_cycle().await;
    let elapsed = started.elapsed();

    let committed = match result {
        Ok(()) => {
            debug!(job = name, elapsed_ms = elapsed.as_millis() as u64, "Cycle committed");
            registry.finish(name, Ok(()), now_ns(), elapsed);
            true
        }
        Err(e) => {
            registry.finish(name, Err(e.to_string()), now_ns(), elapsed);
            let streak = registry.status(name).map_or(1, |s| s.consecutive_failures);
            error!(
                job = name,
                fetch_failure = e.is_fetch_failure(),
                consecutive_failures = streak,
                elapsed_ms = elapsed.as_millis() as u64,
                "Cycle failed: {e}"
            );
            false
        }
    };

    registry.idle(name);
    committed
}
