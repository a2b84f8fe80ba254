//! Typed persistence for monitors, raw check samples and hourly buckets.
//!
//! A single SQLite-backed `Store` is the sole owner of persisted state;
//! every other component mutates the database through the methods here.
//! Aggregations (fleet stats, uptime, bucket compaction) are pushed into
//! SQL rather than scanned in application memory.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::error::{NanoError, NanoResult};

pub const MIN_INTERVAL_SECONDS: i64 = 10;
pub const MAX_INTERVAL_SECONDS: i64 = 3600;

/// Clamp a requested check interval into the allowed `[10, 3600]` range.
pub fn clamp_interval(seconds: i64) -> i64 {
    seconds.clamp(MIN_INTERVAL_SECONDS, MAX_INTERVAL_SECONDS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    Unknown,
    Up,
    Down,
}

impl MonitorStatus {
    fn as_str(&self) -> &'static str {
        match self {
            MonitorStatus::Unknown => "unknown",
            MonitorStatus::Up => "up",
            MonitorStatus::Down => "down",
        }
    }
}

impl FromStr for MonitorStatus {
    type Err = NanoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(MonitorStatus::Unknown),
            "up" => Ok(MonitorStatus::Up),
            "down" => Ok(MonitorStatus::Down),
            other => Err(NanoError::Persistence(format!(
                "unknown monitor status in database: {other}"
            ))),
        }
    }
}

/// A configured monitor plus its cached runtime state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monitor {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub check_interval_seconds: i64,
    pub paused: bool,
    pub is_third_party: bool,
    pub icon: String,
    pub config_hash: String,
    pub status: MonitorStatus,
    pub last_response_time_ms: i64,
    pub uptime_percent_24h: f64,
    pub last_check_label: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when creating a monitor (§4.A `create_monitor`).
#[derive(Debug, Clone, Default)]
pub struct NewMonitor {
    pub name: String,
    pub url: String,
    pub icon: String,
    pub is_third_party: bool,
    pub check_interval_seconds: i64,
    /// Non-empty iff this monitor is owned by the config reconciler.
    pub config_hash: String,
}

/// The three disjoint shapes `update_monitor` accepts. A full edit, a
/// pause toggle, or a runtime-only refresh written by the probe executor.
#[derive(Debug, Clone)]
pub enum MonitorPatch {
    Edit {
        name: String,
        url: String,
        icon: String,
        check_interval_seconds: i64,
        is_third_party: bool,
    },
    Pause(bool),
    Runtime {
        status: MonitorStatus,
        last_response_time_ms: i64,
        uptime_percent_24h: f64,
        last_check_label: String,
    },
}

/// An immutable observation of one probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSample {
    pub monitor_id: i64,
    pub created_at: DateTime<Utc>,
    pub status: MonitorStatus,
    pub response_time_ms: i64,
}

/// An hourly aggregate produced by the retention pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckBucket {
    pub monitor_id: i64,
    pub bucket_hour_unix: i64,
    pub total: i64,
    pub up: i64,
    pub avg_rt: Option<f64>,
    pub min_rt: Option<i64>,
    pub max_rt: Option<i64>,
}

/// Count + up-count over a trailing window, used for uptime percentage.
#[derive(Debug, Clone, Copy, Default)]
pub struct UptimeCounts {
    pub total: i64,
    pub up: i64,
}

/// Raw aggregates behind `/api/stats`; divided into percentages by the
/// stats engine rather than here, so the store stays a thin SQL boundary.
#[derive(Debug, Clone, Copy, Default)]
pub struct FleetStatsRaw {
    pub unpaused_count: i64,
    pub up_count: i64,
    pub down_count: i64,
    pub sum_uptime: f64,
    pub avg_rt_24h: f64,
}

fn millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

/// Cheap to clone: `SqlitePool` is an `Arc`-backed connection pool handle.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> NanoResult<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| NanoError::Persistence(format!("creating db directory: {e}")))?;
        }

        info!("opening database at {}", db_path.display());

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        debug!("running migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn in_memory() -> NanoResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    fn row_to_monitor(row: &sqlx::sqlite::SqliteRow) -> NanoResult<Monitor> {
        let status_str: String = row.get("status");
        Ok(Monitor {
            id: row.get("id"),
            name: row.get("name"),
            url: row.get("url"),
            check_interval_seconds: row.get("check_interval_seconds"),
            paused: row.get::<i64, _>("paused") != 0,
            is_third_party: row.get::<i64, _>("is_third_party") != 0,
            icon: row.get("icon"),
            config_hash: row.get("config_hash"),
            status: status_str.parse()?,
            last_response_time_ms: row.get("last_response_time_ms"),
            uptime_percent_24h: row.get("uptime_percent_24h"),
            last_check_label: row.get("last_check_label"),
            created_at: from_millis(row.get("created_at")),
            updated_at: from_millis(row.get("updated_at")),
        })
    }

    #[instrument(skip(self))]
    pub async fn list_monitors(&self) -> NanoResult<Vec<Monitor>> {
        let rows = sqlx::query("SELECT * FROM monitors ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_monitor).collect()
    }

    #[instrument(skip(self))]
    pub async fn get_monitor(&self, id: i64) -> NanoResult<Monitor> {
        let row = sqlx::query("SELECT * FROM monitors WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| NanoError::NotFound(format!("monitor {id}")))?;
        Self::row_to_monitor(&row)
    }

    #[instrument(skip(self, fields))]
    pub async fn create_monitor(&self, fields: NewMonitor) -> NanoResult<Monitor> {
        if fields.name.trim().is_empty() || fields.url.trim().is_empty() {
            return Err(NanoError::Validation(
                "name and url must be non-empty".to_string(),
            ));
        }

        let now = Utc::now();
        let now_ms = millis(now);
        let interval = clamp_interval(fields.check_interval_seconds);

        let id = sqlx::query(
            r#"
            INSERT INTO monitors (
                name, url, check_interval_seconds, paused, is_third_party, icon,
                config_hash, status, last_response_time_ms, uptime_percent_24h,
                last_check_label, created_at, updated_at
            ) VALUES (?, ?, ?, 0, ?, ?, ?, 'unknown', 0, 0, '', ?, ?)
            "#,
        )
        .bind(&fields.name)
        .bind(&fields.url)
        .bind(interval)
        .bind(fields.is_third_party as i64)
        .bind(&fields.icon)
        .bind(&fields.config_hash)
        .bind(now_ms)
        .bind(now_ms)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        self.get_monitor(id).await
    }

    #[instrument(skip(self, patch))]
    pub async fn update_monitor(
        &self,
        id: i64,
        patch: MonitorPatch,
        now: DateTime<Utc>,
    ) -> NanoResult<Monitor> {
        let now_ms = millis(now);
        match patch {
            MonitorPatch::Edit {
                name,
                url,
                icon,
                check_interval_seconds,
                is_third_party,
            } => {
                if name.trim().is_empty() || url.trim().is_empty() {
                    return Err(NanoError::Validation(
                        "name and url must be non-empty".to_string(),
                    ));
                }
                let interval = clamp_interval(check_interval_seconds);
                let affected = sqlx::query(
                    r#"
                    UPDATE monitors SET
                        name = ?, url = ?, icon = ?, check_interval_seconds = ?,
                        is_third_party = ?, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&name)
                .bind(&url)
                .bind(&icon)
                .bind(interval)
                .bind(is_third_party as i64)
                .bind(now_ms)
                .bind(id)
                .execute(&self.pool)
                .await?
                .rows_affected();
                if affected == 0 {
                    return Err(NanoError::NotFound(format!("monitor {id}")));
                }
            }
            MonitorPatch::Pause(paused) => {
                let affected = sqlx::query(
                    "UPDATE monitors SET paused = ?, updated_at = ? WHERE id = ?",
                )
                .bind(paused as i64)
                .bind(now_ms)
                .bind(id)
                .execute(&self.pool)
                .await?
                .rows_affected();
                if affected == 0 {
                    return Err(NanoError::NotFound(format!("monitor {id}")));
                }
            }
            MonitorPatch::Runtime {
                status,
                last_response_time_ms,
                uptime_percent_24h,
                last_check_label,
            } => {
                let affected = sqlx::query(
                    r#"
                    UPDATE monitors SET
                        status = ?, last_response_time_ms = ?, uptime_percent_24h = ?,
                        last_check_label = ?, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(status.as_str())
                .bind(last_response_time_ms)
                .bind(uptime_percent_24h)
                .bind(&last_check_label)
                .bind(now_ms)
                .bind(id)
                .execute(&self.pool)
                .await?
                .rows_affected();
                if affected == 0 {
                    return Err(NanoError::NotFound(format!("monitor {id}")));
                }
            }
        }
        self.get_monitor(id).await
    }

    /// Stamps the config-reconciler's hash onto an existing monitor row
    /// without touching any other field. Used when a YAML entry matches an
    /// existing `(name, url)` row by identity but arrived under a new hash.
    #[instrument(skip(self))]
    pub async fn set_config_hash(&self, id: i64, hash: &str) -> NanoResult<()> {
        let affected = sqlx::query("UPDATE monitors SET config_hash = ? WHERE id = ?")
            .bind(hash)
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(NanoError::NotFound(format!("monitor {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_monitor(&self, id: i64) -> NanoResult<()> {
        let affected = sqlx::query("DELETE FROM monitors WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(NanoError::NotFound(format!("monitor {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn insert_sample(
        &self,
        monitor_id: i64,
        status: MonitorStatus,
        response_time_ms: i64,
        at: DateTime<Utc>,
    ) -> NanoResult<()> {
        sqlx::query(
            "INSERT INTO samples (monitor_id, created_at, status, response_time_ms) VALUES (?, ?, ?, ?)",
        )
        .bind(monitor_id)
        .bind(millis(at))
        .bind(status.as_str())
        .bind(response_time_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn samples_in_range(
        &self,
        monitor_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: i64,
    ) -> NanoResult<Vec<CheckSample>> {
        let rows = sqlx::query(
            r#"
            SELECT monitor_id, created_at, status, response_time_ms
            FROM samples
            WHERE monitor_id = ? AND created_at >= ? AND created_at <= ?
            ORDER BY created_at ASC
            LIMIT ?
            "#,
        )
        .bind(monitor_id)
        .bind(millis(from))
        .bind(millis(to))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let status: String = row.get("status");
                Ok(CheckSample {
                    monitor_id: row.get("monitor_id"),
                    created_at: from_millis(row.get("created_at")),
                    status: status.parse()?,
                    response_time_ms: row.get("response_time_ms"),
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    pub async fn uptime_24h(
        &self,
        monitor_id: i64,
        now: DateTime<Utc>,
    ) -> NanoResult<UptimeCounts> {
        let since = millis(now - chrono::Duration::hours(24));
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE status = 'up') AS up
            FROM samples
            WHERE monitor_id = ? AND created_at >= ?
            "#,
        )
        .bind(monitor_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(UptimeCounts {
            total: row.get("total"),
            up: row.get("up"),
        })
    }

    #[instrument(skip(self))]
    pub async fn fleet_stats(&self, now: DateTime<Utc>) -> NanoResult<FleetStatsRaw> {
        let counts = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE paused = 0) AS unpaused_count,
                COUNT(*) FILTER (WHERE paused = 0 AND status = 'up') AS up_count,
                COUNT(*) FILTER (WHERE paused = 0 AND status = 'down') AS down_count,
                COALESCE(SUM(CASE WHEN paused = 0 THEN uptime_percent_24h ELSE 0 END), 0.0) AS sum_uptime
            FROM monitors
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let since = millis(now - chrono::Duration::hours(24));
        let sample_avg: Option<f64> = sqlx::query(
            r#"
            SELECT AVG(response_time_ms) AS avg_rt
            FROM samples
            WHERE status = 'up' AND response_time_ms > 0 AND created_at >= ?
            "#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?
        .get("avg_rt");

        let avg_rt_24h = match sample_avg {
            Some(v) => v,
            None => {
                let fallback: Option<f64> = sqlx::query(
                    r#"
                    SELECT AVG(last_response_time_ms) AS avg_rt
                    FROM monitors
                    WHERE paused = 0 AND status = 'up' AND last_response_time_ms > 0
                    "#,
                )
                .fetch_one(&self.pool)
                .await?
                .get("avg_rt");
                fallback.unwrap_or(0.0)
            }
        };

        Ok(FleetStatsRaw {
            unpaused_count: counts.get("unpaused_count"),
            up_count: counts.get("up_count"),
            down_count: counts.get("down_count"),
            sum_uptime: counts.get("sum_uptime"),
            avg_rt_24h,
        })
    }

    #[instrument(skip(self, bucket))]
    pub async fn upsert_bucket(&self, bucket: &CheckBucket) -> NanoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO buckets (monitor_id, bucket_hour, total, up, avg_rt, min_rt, max_rt)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (monitor_id, bucket_hour) DO UPDATE SET
                total = excluded.total,
                up = excluded.up,
                avg_rt = excluded.avg_rt,
                min_rt = excluded.min_rt,
                max_rt = excluded.max_rt
            "#,
        )
        .bind(bucket.monitor_id)
        .bind(bucket.bucket_hour_unix)
        .bind(bucket.total)
        .bind(bucket.up)
        .bind(bucket.avg_rt)
        .bind(bucket.min_rt)
        .bind(bucket.max_rt)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// `GROUP BY (monitor_id, hour_of(created_at))` over `[from, to)`.
    #[instrument(skip(self))]
    pub async fn aggregate_samples_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> NanoResult<Vec<CheckBucket>> {
        let rows = sqlx::query(
            r#"
            SELECT
                monitor_id,
                (created_at / 3600000) * 3600 AS bucket_hour,
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 'up') AS up,
                AVG(CASE WHEN response_time_ms > 0 THEN response_time_ms END) AS avg_rt,
                MIN(CASE WHEN response_time_ms > 0 THEN response_time_ms END) AS min_rt,
                MAX(CASE WHEN response_time_ms > 0 THEN response_time_ms END) AS max_rt
            FROM samples
            WHERE created_at >= ? AND created_at < ?
            GROUP BY monitor_id, bucket_hour
            "#,
        )
        .bind(millis(from))
        .bind(millis(to))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| CheckBucket {
                monitor_id: row.get("monitor_id"),
                bucket_hour_unix: row.get("bucket_hour"),
                total: row.get("total"),
                up: row.get("up"),
                avg_rt: row.get("avg_rt"),
                min_rt: row.get("min_rt"),
                max_rt: row.get("max_rt"),
            })
            .collect())
    }

    /// Reads compacted buckets in `[from, to)`, used by the stats engine to
    /// answer history queries wider than the raw-sample retention horizon.
    #[instrument(skip(self))]
    pub async fn buckets_in_range(
        &self,
        monitor_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: i64,
    ) -> NanoResult<Vec<CheckBucket>> {
        let rows = sqlx::query(
            r#"
            SELECT monitor_id, bucket_hour, total, up, avg_rt, min_rt, max_rt
            FROM buckets
            WHERE monitor_id = ? AND bucket_hour >= ? AND bucket_hour < ?
            ORDER BY bucket_hour ASC
            LIMIT ?
            "#,
        )
        .bind(monitor_id)
        .bind(from.timestamp())
        .bind(to.timestamp())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| CheckBucket {
                monitor_id: row.get("monitor_id"),
                bucket_hour_unix: row.get("bucket_hour"),
                total: row.get("total"),
                up: row.get("up"),
                avg_rt: row.get("avg_rt"),
                min_rt: row.get("min_rt"),
                max_rt: row.get("max_rt"),
            })
            .collect())
    }

    #[instrument(skip(self))]
    pub async fn delete_samples_older_than(&self, t: DateTime<Utc>) -> NanoResult<u64> {
        let result = sqlx::query("DELETE FROM samples WHERE created_at < ?")
            .bind(millis(t))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
