//! Cron job scheduling
//!
//! Owns a registry of cron-style jobs, tracks which ticks are in flight, and
//! provides a two-phase graceful drain on shutdown. Tick handlers are plain
//! async functions: the scheduler awaits the tick future directly, so the
//! running marker is simply "the tick future has not resolved yet". A
//! handler cannot forget to signal completion, but one that never resolves
//! leaves its job visibly running until the drain timeout fires.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Job identity in the registry
pub type JobId = String;

/// A tick handler: invoked on every cron fire, awaited to completion.
pub type TickHandler = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Hook fired when a job is stopped and removed from the registry.
pub type CompletionHook = Arc<dyn Fn() + Send + Sync>;

/// Jobs whose next fire is closer than this are left running through
/// shutdown phase 1 so their tick completes.
const GRACE_WINDOW: chrono::Duration = chrono::Duration::seconds(1);
/// Default phase-2 poll interval
const DRAIN_POLL: Duration = Duration::from_secs(1);
/// Default phase-2 overall timeout
const DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Scheduler-level errors, kept distinct from workflow error codes.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Shutdown timed out with ticks still running: {pending:?}")]
    ShutdownTimeout { pending: Vec<JobId> },

    #[error("Cron scheduler error: {0}")]
    Cron(#[from] JobSchedulerError),

    #[error("Unknown job: {0}")]
    UnknownJob(JobId),
}

/// Specification of one scheduled job
#[derive(Clone)]
pub struct JobSpec {
    /// Six-field cron expression (seconds first)
    pub cron_expression: String,
    /// Remove the job from the registry after its first completed tick
    pub run_once: bool,
    /// Arm the cron trigger at `schedule()` time instead of `start_jobs()`
    pub start_immediately: bool,
    pub on_tick: TickHandler,
    pub on_complete: Option<CompletionHook>,
}

impl JobSpec {
    pub fn new<F, Fut>(cron_expression: impl Into<String>, on_tick: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            cron_expression: cron_expression.into(),
            run_once: false,
            start_immediately: false,
            on_tick: Arc::new(move || Box::pin(on_tick()) as BoxFuture<'static, ()>),
            on_complete: None,
        }
    }

    pub fn run_once(mut self) -> Self {
        self.run_once = true;
        self
    }

    pub fn start_immediately(mut self) -> Self {
        self.start_immediately = true;
        self
    }

    pub fn on_complete<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(hook));
        self
    }
}

struct RegisteredJob {
    spec: JobSpec,
    /// Armed cron trigger, if any
    trigger: Option<Uuid>,
}

/// Cron job scheduler with graceful drain.
pub struct Scheduler {
    inner: JobScheduler,
    jobs: Arc<DashMap<JobId, RegisteredJob>>,
    /// Ids with a tick currently executing. A simple last-write-wins flag:
    /// overlapping ticks of the same job are not prevented, the second tick
    /// silently overwrites the marker (at-most-one observed, not enforced).
    running: Arc<DashMap<JobId, ()>>,
    started: AtomicBool,
    drain_poll: Duration,
    drain_timeout: Duration,
}

impl Scheduler {
    pub async fn new() -> Result<Self, SchedulerError> {
        Self::with_drain(DRAIN_POLL, DRAIN_TIMEOUT).await
    }

    /// Custom drain cadence, mainly for tests.
    pub async fn with_drain(
        drain_poll: Duration,
        drain_timeout: Duration,
    ) -> Result<Self, SchedulerError> {
        Ok(Self {
            inner: JobScheduler::new().await?,
            jobs: Arc::new(DashMap::new()),
            running: Arc::new(DashMap::new()),
            started: AtomicBool::new(false),
            drain_poll,
            drain_timeout,
        })
    }

    /// Register a job. A second `schedule` with the same id overwrites the
    /// previous registration (last write wins) and disarms its trigger.
    pub async fn schedule(
        &self,
        id: impl Into<JobId>,
        spec: JobSpec,
    ) -> Result<(), SchedulerError> {
        let id = id.into();

        if let Some((_, previous)) = self.jobs.remove(&id) {
            warn!("Job {} re-scheduled, previous registration dropped", id);
            if let Some(uuid) = previous.trigger {
                let mut sched = self.inner.clone();
                let _ = sched.remove(&uuid).await;
            }
        }

        let start_now = spec.start_immediately;
        self.jobs.insert(id.clone(), RegisteredJob { spec, trigger: None });
        debug!("Job {} registered", id);

        if start_now {
            self.arm(&id).await?;
            self.ensure_started().await?;
        }
        Ok(())
    }

    /// Start every registered job's cron trigger. Idempotent: already-armed
    /// jobs are left alone.
    pub async fn start_jobs(&self) -> Result<(), SchedulerError> {
        let unarmed: Vec<JobId> = self
            .jobs
            .iter()
            .filter(|e| e.value().trigger.is_none())
            .map(|e| e.key().clone())
            .collect();

        for id in unarmed {
            self.arm(&id).await?;
        }
        self.ensure_started().await
    }

    /// Two-phase graceful shutdown.
    ///
    /// Phase 1 disarms and removes every job whose next fire is outside the
    /// grace window; jobs about to fire are left so their tick completes.
    /// Phase 2 polls the running markers until empty, or fails with
    /// [`SchedulerError::ShutdownTimeout`] after the drain timeout.
    pub async fn stop_jobs(&self) -> Result<(), SchedulerError> {
        info!("Stopping jobs ({} registered)", self.jobs.len());

        let registered: Vec<(JobId, Option<Uuid>)> = self
            .jobs
            .iter()
            .map(|e| (e.key().clone(), e.value().trigger))
            .collect();

        let mut sched = self.inner.clone();
        let now = chrono::Utc::now();

        for (id, trigger) in registered {
            // Never-armed registrations have no pending fire and are removed
            // outright.
            if let Some(uuid) = trigger {
                let next = sched.next_tick_for_job(uuid).await.unwrap_or(None);
                let imminent = next.map(|t| t - now < GRACE_WINDOW).unwrap_or(false);
                if imminent {
                    debug!("Job {} fires within the grace window, leaving it to finish", id);
                    continue;
                }
                let _ = sched.remove(&uuid).await;
            }

            if let Some((_, job)) = self.jobs.remove(&id) {
                debug!("Job {} stopped and removed", id);
                if let Some(hook) = job.spec.on_complete {
                    hook();
                }
            }
        }

        let deadline = tokio::time::Instant::now() + self.drain_timeout;
        loop {
            if self.running.is_empty() {
                info!("All job ticks drained");
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                let pending: Vec<JobId> =
                    self.running.iter().map(|e| e.key().clone()).collect();
                warn!("Shutdown drain timed out, still running: {:?}", pending);
                return Err(SchedulerError::ShutdownTimeout { pending });
            }
            tokio::time::sleep(self.drain_poll).await;
        }
    }

    /// Whether a tick is currently executing for `id`.
    pub fn is_running(&self, id: &str) -> bool {
        self.running.contains_key(id)
    }

    /// Whether `id` is present in the registry.
    pub fn is_registered(&self, id: &str) -> bool {
        self.jobs.contains_key(id)
    }

    /// Registered job count.
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Arm the cron trigger for a registered job.
    async fn arm(&self, id: &str) -> Result<(), SchedulerError> {
        let (expr, run_once, on_tick, on_complete) = {
            let entry = self
                .jobs
                .get(id)
                .ok_or_else(|| SchedulerError::UnknownJob(id.to_string()))?;
            (
                entry.spec.cron_expression.clone(),
                entry.spec.run_once,
                entry.spec.on_tick.clone(),
                entry.spec.on_complete.clone(),
            )
        };

        let job_id = id.to_string();
        let jobs = self.jobs.clone();
        let running = self.running.clone();
        // Exactly-once guard for run-once removal, even with overlapping ticks.
        let removed = Arc::new(AtomicBool::new(false));

        let job = Job::new_async(expr.as_str(), move |uuid, sched| {
            let job_id = job_id.clone();
            let jobs = jobs.clone();
            let running = running.clone();
            let on_tick = on_tick.clone();
            let on_complete = on_complete.clone();
            let removed = removed.clone();
            let mut sched = sched;

            Box::pin(async move {
                // Marker set before the handler runs, cleared when its future
                // resolves. Last write wins on overlap.
                running.insert(job_id.clone(), ());
                debug!("Job {} tick started", job_id);

                on_tick().await;

                running.remove(&job_id);
                debug!("Job {} tick completed", job_id);

                if run_once && !removed.swap(true, Ordering::SeqCst) {
                    let _ = sched.remove(&uuid).await;
                    jobs.remove(&job_id);
                    if let Some(hook) = on_complete {
                        hook();
                    }
                    info!("Run-once job {} completed and removed", job_id);
                }
            })
        })?;

        let uuid = {
            let mut sched = self.inner.clone();
            sched.add(job).await?
        };
        if let Some(mut entry) = self.jobs.get_mut(id) {
            entry.trigger = Some(uuid);
        }
        debug!("Job {} armed ({})", id, expr);
        Ok(())
    }

    async fn ensure_started(&self) -> Result<(), SchedulerError> {
        if !self.started.swap(true, Ordering::SeqCst) {
            let mut sched = self.inner.clone();
            sched.start().await?;
            info!("Cron scheduler started");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use tokio::sync::Notify;

    use super::*;

    const EVERY_SECOND: &str = "* * * * * *";

    async fn wait_until<F: Fn() -> bool>(cond: F, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        while tokio::time::Instant::now() < deadline {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        cond()
    }

    #[tokio::test]
    async fn run_once_job_removes_itself_after_completion() {
        let scheduler = Scheduler::with_drain(Duration::from_millis(100), Duration::from_secs(5))
            .await
            .unwrap();

        let ticked = Arc::new(Notify::new());
        let completed = Arc::new(AtomicBool::new(false));

        let ticked_in_job = ticked.clone();
        let completed_hook = completed.clone();
        let spec = JobSpec::new(EVERY_SECOND, move || {
            let ticked = ticked_in_job.clone();
            async move {
                ticked.notify_one();
            }
        })
        .run_once()
        .on_complete(move || completed_hook.store(true, Ordering::SeqCst));

        scheduler.schedule("one-shot-sync", spec).await.unwrap();
        assert!(scheduler.is_registered("one-shot-sync"));

        scheduler.start_jobs().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), ticked.notified())
            .await
            .expect("job never ticked");

        assert!(
            wait_until(
                || !scheduler.is_registered("one-shot-sync")
                    && !scheduler.is_running("one-shot-sync"),
                Duration::from_secs(3)
            )
            .await
        );
        assert!(completed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stop_jobs_waits_for_in_flight_tick() {
        let scheduler = Scheduler::with_drain(Duration::from_millis(100), Duration::from_secs(10))
            .await
            .unwrap();

        let started = Arc::new(Notify::new());
        let finished = Arc::new(AtomicBool::new(false));

        let started_in_job = started.clone();
        let finished_in_job = finished.clone();
        let spec = JobSpec::new(EVERY_SECOND, move || {
            let started = started_in_job.clone();
            let finished = finished_in_job.clone();
            async move {
                started.notify_one();
                tokio::time::sleep(Duration::from_millis(1500)).await;
                finished.store(true, Ordering::SeqCst);
            }
        })
        .run_once();

        scheduler.schedule("slow-tick", spec).await.unwrap();
        scheduler.start_jobs().await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), started.notified())
            .await
            .expect("tick never started");
        assert!(scheduler.is_running("slow-tick"));

        scheduler.stop_jobs().await.unwrap();
        // stop_jobs resolved, so the tick must have finished first.
        assert!(finished.load(Ordering::SeqCst));
        assert!(!scheduler.is_running("slow-tick"));
    }

    #[tokio::test]
    async fn stop_jobs_times_out_on_stuck_tick() {
        let scheduler = Scheduler::with_drain(Duration::from_millis(100), Duration::from_secs(1))
            .await
            .unwrap();

        let started = Arc::new(Notify::new());
        let started_in_job = started.clone();
        let spec = JobSpec::new(EVERY_SECOND, move || {
            let started = started_in_job.clone();
            async move {
                started.notify_one();
                // Simulates a handler that never completes.
                futures::future::pending::<()>().await;
            }
        });

        scheduler.schedule("stuck", spec).await.unwrap();
        scheduler.start_jobs().await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), started.notified())
            .await
            .expect("tick never started");

        match scheduler.stop_jobs().await {
            Err(SchedulerError::ShutdownTimeout { pending }) => {
                assert_eq!(pending, vec!["stuck".to_string()]);
            }
            other => panic!("expected shutdown timeout, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn stop_jobs_removes_jobs_with_distant_next_fire() {
        let scheduler = Scheduler::new().await.unwrap();

        let completed = Arc::new(AtomicBool::new(false));
        let completed_hook = completed.clone();
        // Fires once a year, far outside the grace window.
        let spec = JobSpec::new("0 0 0 1 1 *", || async {})
            .on_complete(move || completed_hook.store(true, Ordering::SeqCst));

        scheduler.schedule("yearly", spec).await.unwrap();
        scheduler.start_jobs().await.unwrap();
        assert!(scheduler.is_registered("yearly"));

        scheduler.stop_jobs().await.unwrap();

        assert!(!scheduler.is_registered("yearly"));
        assert_eq!(scheduler.job_count(), 0);
        assert!(completed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stop_jobs_removes_never_started_registrations() {
        let scheduler = Scheduler::new().await.unwrap();

        let completed = Arc::new(AtomicBool::new(false));
        let completed_hook = completed.clone();
        let spec = JobSpec::new(EVERY_SECOND, || async {})
            .on_complete(move || completed_hook.store(true, Ordering::SeqCst));

        // Registered but never armed: start_jobs() is not called.
        scheduler.schedule("parked", spec).await.unwrap();

        scheduler.stop_jobs().await.unwrap();

        assert!(!scheduler.is_registered("parked"));
        assert!(completed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn scheduling_same_id_twice_overwrites() {
        let scheduler = Scheduler::new().await.unwrap();

        let first_ticks = Arc::new(AtomicU32::new(0));
        let second_ticks = Arc::new(AtomicU32::new(0));

        let first = first_ticks.clone();
        scheduler
            .schedule(
                "dedup",
                JobSpec::new(EVERY_SECOND, move || {
                    let first = first.clone();
                    async move {
                        first.fetch_add(1, Ordering::SeqCst);
                    }
                }),
            )
            .await
            .unwrap();

        let second = second_ticks.clone();
        scheduler
            .schedule(
                "dedup",
                JobSpec::new(EVERY_SECOND, move || {
                    let second = second.clone();
                    async move {
                        second.fetch_add(1, Ordering::SeqCst);
                    }
                }),
            )
            .await
            .unwrap();

        assert_eq!(scheduler.job_count(), 1);

        scheduler.start_jobs().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2200)).await;

        // Only the second registration's handler runs.
        assert_eq!(first_ticks.load(Ordering::SeqCst), 0);
        assert!(second_ticks.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn start_jobs_is_idempotent() {
        let scheduler = Scheduler::new().await.unwrap();

        let ticks = Arc::new(AtomicU32::new(0));
        let ticks_in_job = ticks.clone();
        scheduler
            .schedule(
                "steady",
                JobSpec::new(EVERY_SECOND, move || {
                    let ticks = ticks_in_job.clone();
                    async move {
                        ticks.fetch_add(1, Ordering::SeqCst);
                    }
                }),
            )
            .await
            .unwrap();

        scheduler.start_jobs().await.unwrap();
        scheduler.start_jobs().await.unwrap();

        tokio::time::sleep(Duration::from_millis(2200)).await;
        let observed = ticks.load(Ordering::SeqCst);

        // One trigger fires roughly once a second; a duplicate trigger would
        // double that.
        assert!(observed >= 1 && observed <= 3, "observed {} ticks", observed);
    }
}
