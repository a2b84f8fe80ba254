//! Per-monitor probe scheduling.
//!
//! Grounded in the teacher's `actors::service_monitor` pair: each active
//! monitor gets its own owned `tokio::task` ticking on its configured
//! interval (`ServiceMonitorActor::run`'s `tokio::select!` loop), addressed
//! through a small handle (`ServiceHandle`). The scheduler itself keeps only
//! a map from monitor id to that handle, reconciling it against the Store
//! on a 30s ticker, at boot, and on demand.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::events::EventBus;
use crate::probe;
use crate::store::{clamp_interval, Store};

const RECONCILE_PERIOD: StdDuration = StdDuration::from_secs(30);
const BOOT_SWEEP_PAUSE: StdDuration = StdDuration::from_millis(500);

/// Per-monitor job: an owned ticking task plus the interval it was started
/// with, so reconciliation can tell "unchanged" from "needs replacement"
/// without re-reading the task itself.
struct Job {
    handle: JoinHandle<()>,
    interval_seconds: i64,
}

struct SchedulerInner {
    jobs: HashMap<i64, Job>,
}

/// Owns the monitor->job map and the shared dependencies every job needs.
/// Cloned cheaply (all fields behind `Arc`) so the boot sweep, the
/// reconcile ticker and on-demand calls can all hold a handle.
#[derive(Clone)]
pub struct Scheduler {
    store: Store,
    events: Arc<EventBus>,
    client: reqwest::Client,
    // The per-monitor jobs map is guarded by a plain mutex per the spec's
    // concurrency rules; it must never be held across a probe invocation,
    // so every lock scope here ends before any `.await` on probe work.
    inner: Arc<Mutex<SchedulerInner>>,
    // Serializes `reconcile()` calls themselves (ticker vs. on-demand)
    // without serializing probes.
    reconcile_lock: Arc<AsyncMutex<()>>,
}

impl Scheduler {
    pub fn new(store: Store, events: Arc<EventBus>, client: reqwest::Client) -> Self {
        Self {
            store,
            events,
            client,
            inner: Arc::new(Mutex::new(SchedulerInner {
                jobs: HashMap::new(),
            })),
            reconcile_lock: Arc::new(AsyncMutex::new(())),
        }
    }

    fn spawn_job(&self, monitor_id: i64, interval_seconds: i64) -> Job {
        let store = self.store.clone();
        let events = Arc::clone(&self.events);
        let client = self.client.clone();
        let period = StdDuration::from_secs(interval_seconds.max(1) as u64);

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                probe::probe(&store, &events, &client, monitor_id).await;
            }
        });

        Job {
            handle,
            interval_seconds,
        }
    }

    /// Runs one sequential sweep over all unpaused monitors with a brief
    /// inter-probe pause, used once at boot before the steady-state loop
    /// and reconciliation ticker take over.
    #[instrument(skip(self))]
    pub async fn boot_sweep(&self) {
        let monitors = match self.store.list_monitors().await {
            Ok(m) => m,
            Err(err) => {
                warn!(error = %err, "boot sweep: failed to list monitors");
                return;
            }
        };
        for monitor in monitors.into_iter().filter(|m| !m.paused) {
            probe::probe(&self.store, &self.events, &self.client, monitor.id).await;
            sleep(BOOT_SWEEP_PAUSE).await;
        }
        info!("boot sweep complete");
    }

    /// Brings the job map in line with the Store: creates jobs for newly
    /// unpaused monitors, stops jobs for paused/deleted monitors, and
    /// replaces jobs whose configured interval changed.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) {
        let _guard = self.reconcile_lock.lock().await;

        let monitors = match self.store.list_monitors().await {
            Ok(m) => m,
            Err(err) => {
                warn!(error = %err, "reconcile: failed to list monitors");
                return;
            }
        };

        let mut desired: HashMap<i64, i64> = HashMap::new();
        for m in &monitors {
            if !m.paused {
                desired.insert(m.id, clamp_interval(m.check_interval_seconds));
            }
        }

        // Collect the diff while holding the lock only long enough to read
        // and mutate the map; never across an `.await`.
        let mut to_spawn: Vec<i64> = Vec::new();
        let mut to_drop: Vec<JoinHandle<()>> = Vec::new();
        let mut to_replace: Vec<i64> = Vec::new();

        {
            let mut inner = self.inner.lock().unwrap();
            let existing_ids: Vec<i64> = inner.jobs.keys().copied().collect();

            for id in existing_ids {
                match desired.get(&id) {
                    None => {
                        if let Some(job) = inner.jobs.remove(&id) {
                            job.handle.abort();
                        }
                    }
                    Some(&want_interval) => {
                        let differs = inner
                            .jobs
                            .get(&id)
                            .map(|job| job.interval_seconds != want_interval)
                            .unwrap_or(false);
                        if differs {
                            if let Some(job) = inner.jobs.remove(&id) {
                                to_drop.push(job.handle);
                            }
                            to_replace.push(id);
                        }
                    }
                }
            }

            for (&id, _) in desired.iter() {
                if !inner.jobs.contains_key(&id) {
                    to_spawn.push(id);
                }
            }
        }

        for handle in to_drop {
            handle.abort();
        }

        for id in to_spawn.into_iter().chain(to_replace) {
            let Some(&want_interval) = desired.get(&id) else {
                continue;
            };
            let job = self.spawn_job(id, want_interval);
            self.inner.lock().unwrap().jobs.insert(id, job);
            debug!(monitor_id = id, interval = want_interval, "scheduler job (re)started");
        }
    }

    /// Spawns the periodic reconciliation ticker. The returned handle is
    /// aborted on shutdown.
    pub fn spawn_reconcile_loop(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(RECONCILE_PERIOD);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.reconcile().await;
            }
        })
    }

    pub fn active_job_count(&self) -> usize {
        self.inner.lock().unwrap().jobs.len()
    }

    pub async fn shutdown(&self) {
        let jobs: Vec<JoinHandle<()>> = {
            let mut inner = self.inner.lock().unwrap();
            inner.jobs.drain().map(|(_, job)| job.handle).collect()
        };
        for handle in jobs {
            handle.abort();
        }
    }
}
