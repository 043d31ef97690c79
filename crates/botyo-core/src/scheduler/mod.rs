//! Runs scheduled-task modules on cron or fixed-interval schedules.
//!
//! - A task never runs concurrently with itself: a firing while the previous
//!   run is still in flight is skipped and logged.
//! - A failing run is logged; the task stays scheduled.
//! - `stop()` cancels timers and signals in-flight runs through their
//!   `CancellationToken`; their outcome is ignored.

pub mod cron;

use std::{
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Local;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::{
    task::JoinHandle,
    time::{sleep, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

pub use self::cron::CronExpr;
use crate::{
    module::{ModuleContext, Runtime, ScheduledTaskModule},
    Error, Result,
};

/// When a task fires.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Schedule {
    Cron(String),
    Interval(Duration),
}

impl Schedule {
    /// A cron string or a number of milliseconds.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(expr) => Ok(Schedule::Cron(expr.clone())),
            Value::Number(n) => n
                .as_u64()
                .map(|ms| Schedule::Interval(Duration::from_millis(ms)))
                .ok_or_else(|| Error::Config(format!("invalid interval: {n}"))),
            other => Err(Error::Config(format!(
                "schedule must be a cron string or milliseconds, got {other}"
            ))),
        }
    }
}

type Planned = (Arc<dyn ScheduledTaskModule>, ModuleContext, Trigger, bool);

enum Trigger {
    Cron(CronExpr),
    Interval(Duration),
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    rt: Arc<Runtime>,
    tasks: Vec<Arc<dyn ScheduledTaskModule>>,
    state: Mutex<SchedulerState>,
}

#[derive(Default)]
struct SchedulerState {
    jobs: HashMap<String, JobEntry>,
    cancel: Option<CancellationToken>,
}

struct JobEntry {
    job: Arc<Job>,
    handle: JoinHandle<()>,
}

struct Job {
    task: Arc<dyn ScheduledTaskModule>,
    ctx: ModuleContext,
    running: AtomicBool,
    skipped: AtomicU64,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(rt: Arc<Runtime>, tasks: Vec<Arc<dyn ScheduledTaskModule>>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                rt,
                tasks,
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    /// Check every enabled task's schedule without starting anything.
    /// Returns the number of tasks `start` would schedule.
    pub fn validate(&self) -> Result<usize> {
        Ok(self.plan()?.len())
    }

    /// Schedule every enabled task. Returns the number of scheduled tasks.
    /// Nothing is scheduled when any task has an invalid schedule.
    pub fn start(&self) -> Result<usize> {
        self.stop();
        let planned = self.plan()?;

        let root = CancellationToken::new();
        let mut st = self.inner.state.lock();
        st.cancel = Some(root.clone());
        for (task, ctx, trigger, on_start) in planned {
            let job = Arc::new(Job {
                task: task.clone(),
                ctx,
                running: AtomicBool::new(false),
                skipped: AtomicU64::new(0),
                cancel: root.child_token(),
            });
            let handle = tokio::spawn(job_loop(job.clone(), trigger, on_start));
            st.jobs.insert(task.name().to_string(), JobEntry { job, handle });
        }

        let scheduled = st.jobs.len();
        tracing::info!(tasks = scheduled, "scheduler started");
        Ok(scheduled)
    }

    fn plan(&self) -> Result<Vec<Planned>> {
        let mut planned = Vec::new();
        for task in &self.inner.tasks {
            let ctx = ModuleContext::new(self.inner.rt.clone(), task.name());
            if !ctx.configuration().is_enabled() {
                tracing::info!(task = %task.name(), "skipping disabled task");
                continue;
            }

            let trigger = match task.schedule(&ctx)? {
                Schedule::Cron(expr) => {
                    let cron = CronExpr::parse(&expr).map_err(|e| {
                        Error::Config(format!(
                            "invalid cron expression '{expr}' of task '{}': {e}",
                            task.name()
                        ))
                    })?;
                    if cron.next_after(Local::now()).is_none() {
                        return Err(Error::Config(format!(
                            "cron expression '{expr}' of task '{}' never fires",
                            task.name()
                        )));
                    }
                    Trigger::Cron(cron)
                }
                Schedule::Interval(period) if period.is_zero() => {
                    return Err(Error::Config(format!(
                        "interval of task '{}' must be greater than zero",
                        task.name()
                    )))
                }
                Schedule::Interval(period) => Trigger::Interval(period),
            };
            let on_start = task.should_execute_on_start(&ctx);
            planned.push((task.clone(), ctx, trigger, on_start));
        }

        Ok(planned)
    }

    /// Cancel all timers and signal in-flight runs. Safe to call repeatedly.
    pub fn stop(&self) {
        let mut st = self.inner.state.lock();
        if let Some(cancel) = st.cancel.take() {
            cancel.cancel();
        }
        let stopped = st.jobs.len();
        for (_, entry) in st.jobs.drain() {
            entry.handle.abort();
        }
        if stopped > 0 {
            tracing::info!(tasks = stopped, "scheduler stopped");
        }
    }

    /// Whether a run of `task` is in flight.
    pub fn is_running(&self, task: &str) -> bool {
        self.inner
            .state
            .lock()
            .jobs
            .get(task)
            .is_some_and(|e| e.job.running.load(Ordering::Acquire))
    }

    /// Firings of `task` skipped because a run was still in flight.
    pub fn skipped_runs(&self, task: &str) -> u64 {
        self.inner
            .state
            .lock()
            .jobs
            .get(task)
            .map_or(0, |e| e.job.skipped.load(Ordering::Relaxed))
    }

    pub fn scheduled_tasks(&self) -> Vec<String> {
        self.inner.state.lock().jobs.keys().cloned().collect()
    }
}

async fn job_loop(job: Arc<Job>, trigger: Trigger, on_start: bool) {
    if on_start {
        job.fire();
    }

    match trigger {
        Trigger::Interval(period) => {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = job.cancel.cancelled() => break,
                    _ = ticker.tick() => job.fire(),
                }
            }
        }
        Trigger::Cron(expr) => loop {
            let now = Local::now();
            let Some(next) = expr.next_after(now) else {
                tracing::warn!(task = %job.task.name(), "cron expression has no next run");
                break;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = job.cancel.cancelled() => break,
                _ = sleep(wait) => job.fire(),
            }
        },
    }
}

impl Job {
    fn fire(self: &Arc<Self>) {
        let name = self.task.name();
        if self.running.swap(true, Ordering::AcqRel) {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(task = %name, "previous run is still in progress, skipping");
            return;
        }

        let job = self.clone();
        tokio::spawn(async move {
            let name = job.task.name();
            tracing::info!(task = %name, "task started");

            let outcome = AssertUnwindSafe(job.task.execute(&job.ctx, job.cancel.clone()))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(anyhow::anyhow!("task panicked")));

            if job.cancel.is_cancelled() {
                tracing::debug!(task = %name, "ignoring outcome of cancelled run");
            } else {
                match outcome {
                    Ok(()) => tracing::info!(task = %name, "task finished"),
                    Err(e) => tracing::error!(task = %name, "task failed: {e:#}"),
                }
            }
            job.running.store(false, Ordering::Release);
        });
    }
}
