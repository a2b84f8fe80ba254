//! Daily purge + compaction pipeline.
//!
//! Grounded in the teacher's `StorageActor` cleanup loop (daily interval,
//! batch-bounded transactional work) but reshaped around two ordered phases
//! instead of one: purge the old tail, then compact the middle window into
//! hourly buckets.

use chrono::{DateTime, Duration as ChronoDuration, Local, Utc};
use std::time::Duration as StdDuration;
use tokio::time::interval;
use tracing::{info, instrument, warn};

use crate::error::NanoResult;
use crate::store::{CheckBucket, Store};

const PURGE_HORIZON_DAYS: i64 = 365;
const COMPACT_LOWER_BOUND_DAYS: i64 = 7;
const COMPACT_UPPER_BOUND_HOURS: i64 = 24;
const COMPACTION_BATCH_SIZE: usize = 25;
const RUN_INTERVAL: StdDuration = StdDuration::from_secs(24 * 60 * 60);

/// Runs the purge phase, then the compaction phase, against a single `now`
/// shared by both so they stay consistent within one run.
#[instrument(skip(store))]
pub async fn run(store: &Store, now: DateTime<Utc>) -> NanoResult<()> {
    let purge_before = now - ChronoDuration::days(PURGE_HORIZON_DAYS);
    let purged = store.delete_samples_older_than(purge_before).await?;
    info!(purged, "retention: purged samples past the 365-day horizon");

    let compact_from = now - ChronoDuration::days(COMPACT_LOWER_BOUND_DAYS);
    let compact_to = now - ChronoDuration::hours(COMPACT_UPPER_BOUND_HOURS);
    if compact_from >= compact_to {
        return Ok(());
    }

    let buckets = store.aggregate_samples_between(compact_from, compact_to).await?;
    let bucket_count = buckets.len();
    let mut upserted = 0usize;
    for batch in buckets.chunks(COMPACTION_BATCH_SIZE) {
        match upsert_batch(store, batch).await {
            Ok(()) => upserted += batch.len(),
            Err(err) => warn!(error = %err, batch_size = batch.len(), "retention: batch upsert failed, skipping"),
        }
    }
    info!(bucket_count, upserted, "retention: compaction aggregates written");

    let compacted = store.delete_samples_older_than(compact_to).await?;
    info!(compacted, "retention: deleted samples past the 7-day raw horizon");

    Ok(())
}

async fn upsert_batch(store: &Store, batch: &[CheckBucket]) -> NanoResult<()> {
    for bucket in batch {
        store.upsert_bucket(bucket).await?;
    }
    Ok(())
}

/// Seconds from now until the next local midnight (§4.D: "run daily at
/// 00:00 local time"). Always positive; returns a full day when called
/// exactly at midnight.
fn seconds_until_next_local_midnight() -> u64 {
    let now = Local::now();
    let tomorrow_midnight = (now + ChronoDuration::days(1))
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
        .and_local_timezone(now.timezone())
        .single()
        .unwrap_or_else(|| now + ChronoDuration::days(1));
    (tomorrow_midnight - now).num_seconds().max(0) as u64
}

/// Spawns the daily ticker, phased to fire at local midnight rather than
/// 24h after process start: sleeps until the next midnight once, then ticks
/// every 24h from there. Callers that want an immediate run at boot should
/// call `run` directly rather than relying on this loop's first tick.
pub fn spawn_daily_loop(store: Store) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let initial_delay = seconds_until_next_local_midnight();
        info!(initial_delay, "retention: sleeping until next local midnight");
        tokio::time::sleep(StdDuration::from_secs(initial_delay)).await;

        let mut ticker = interval(RUN_INTERVAL);
        loop {
            if let Err(err) = run(&store, Utc::now()).await {
                warn!(error = %err, "retention run failed");
            }
            ticker.tick().await;
        }
    })
}
