//! Per-pair periodic triggers. One job per enabled pair, firing the pair
//! cycle on its configured interval. `coalesce` is modeled by
//! `MissedTickBehavior::Skip`: a tardy tick never queues a burst of
//! catch-up firings, it just fires once and resyncs to the period.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::engine::{PairCycle, PairLockRegistry};
use crate::types::{Interval, TradingPair};

fn job_id(pair_id: i64) -> String {
    format!("pair_{pair_id}")
}

/// Parses a `schedule_interval` string into a firing period. `<N>m` is
/// taken literally; anything else is looked up against the fixed
/// [`Interval`] table, defaulting to 4 hours for unknown strings.
fn parse_trigger(spec: &str) -> Duration {
    if let Some(digits) = spec.strip_suffix('m') {
        if let Ok(minutes) = digits.parse::<u64>() {
            return Duration::from_secs(minutes * 60);
        }
    }
    let hours = Interval::from_str(spec).map(|i| i.to_hours()).unwrap_or(4.0);
    Duration::from_secs_f64(hours * 3600.0)
}

struct JobHandle {
    name: String,
    trigger: String,
    next_run: Arc<RwLock<DateTime<Utc>>>,
    cancel: Arc<Notify>,
    task: JoinHandle<()>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub name: String,
    pub next_run: DateTime<Utc>,
    pub trigger: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub job_count: usize,
    pub jobs: Vec<JobInfo>,
}

/// A cooperative, in-process scheduler: each job is a `tokio::spawn`ed task
/// ticking on its own interval and invoking the shared [`PairCycle`] through
/// the shared [`PairLockRegistry`], which enforces overlap-skip per pair.
pub struct Scheduler {
    cycle: Arc<PairCycle>,
    registry: Arc<PairLockRegistry>,
    jobs: RwLock<HashMap<i64, JobHandle>>,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new(cycle: Arc<PairCycle>, registry: Arc<PairLockRegistry>) -> Self {
        Self {
            cycle,
            registry,
            jobs: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Schedules every enabled pair, then marks the scheduler running. Must
    /// run after the position reconciler completes.
    pub async fn start(&self, pairs: &[TradingPair]) {
        for pair in pairs {
            self.schedule_pair(pair).await;
        }
        self.running.store(true, Ordering::Release);
        info!(job_count = pairs.len(), "scheduler started");
    }

    /// Adds or replaces the job for `pair`. Idempotent: an existing job for
    /// the same pair id is removed first, matching "add_job(replace_existing=true)".
    pub async fn schedule_pair(&self, pair: &TradingPair) {
        self.remove_job(pair.id).await;

        let period = parse_trigger(&pair.schedule_interval);
        let next_run = Arc::new(RwLock::new(Utc::now() + chrono::Duration::from_std(period).unwrap_or_default()));
        let cancel = Arc::new(Notify::new());

        let cycle = self.cycle.clone();
        let registry = self.registry.clone();
        let pair_id = pair.id;
        let cancel_task = cancel.clone();
        let next_run_task = next_run.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        *next_run_task.write().await = Utc::now() + chrono::Duration::from_std(period).unwrap_or_default();
                        match registry.try_acquire(pair_id).await {
                            Some(_guard) => cycle.run(pair_id).await,
                            None => {
                                warn!(pair_id, "skipped cycle, previous run still in progress");
                                cycle.log_skipped_overlap(pair_id).await;
                            }
                        }
                    }
                    _ = cancel_task.notified() => break,
                }
            }
        });

        self.jobs.write().await.insert(
            pair.id,
            JobHandle {
                name: pair.name.clone(),
                trigger: pair.schedule_interval.clone(),
                next_run,
                cancel,
                task,
            },
        );
        info!(pair = %pair.name, interval = %pair.schedule_interval, "scheduled pair job");
    }

    /// Removes the job for `pair_id`, if one exists.
    pub async fn remove_job(&self, pair_id: i64) {
        if let Some(handle) = self.jobs.write().await.remove(&pair_id) {
            handle.cancel.notify_one();
            handle.task.abort();
            info!(pair_id, "removed job");
        }
    }

    pub async fn status(&self) -> SchedulerStatus {
        let jobs = self.jobs.read().await;
        let mut infos = Vec::with_capacity(jobs.len());
        for (pair_id, handle) in jobs.iter() {
            infos.push(JobInfo {
                id: job_id(*pair_id),
                name: handle.name.clone(),
                next_run: *handle.next_run.read().await,
                trigger: handle.trigger.clone(),
            });
        }
        SchedulerStatus {
            running: self.running.load(Ordering::Acquire),
            job_count: infos.len(),
            jobs: infos,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minute_suffix_is_taken_literally() {
        assert_eq!(parse_trigger("15m"), Duration::from_secs(900));
        assert_eq!(parse_trigger("5m"), Duration::from_secs(300));
    }

    #[test]
    fn known_interval_falls_back_to_table() {
        assert_eq!(parse_trigger("4h"), Duration::from_secs(14400));
        assert_eq!(parse_trigger("1d"), Duration::from_secs(86400));
    }

    #[test]
    fn unknown_interval_defaults_to_four_hours() {
        assert_eq!(parse_trigger("nonsense"), Duration::from_secs(14400));
    }
}
