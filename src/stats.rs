//! Fleet and per-monitor statistics.
//!
//! All aggregation happens in SQL (`Store::fleet_stats`, `Store::uptime_24h`,
//! `Store::buckets_in_range`) the way the teacher's `sqlite::calculate_uptime`
//! does a single-query `COUNT`/`SUM CASE WHEN` aggregation rather than
//! scanning rows in application memory. This module only shapes the raw
//! numbers the Store returns into the response-level values.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use crate::error::NanoResult;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FleetStats {
    pub overall_uptime: f64,
    pub services_up: i64,
    pub services_down: i64,
    pub avg_response_time_ms: f64,
}

pub async fn fleet_stats(store: &Store, now: DateTime<Utc>) -> NanoResult<FleetStats> {
    let raw = store.fleet_stats(now).await?;
    let overall_uptime = if raw.unpaused_count > 0 {
        raw.sum_uptime / raw.unpaused_count as f64
    } else {
        0.0
    };
    Ok(FleetStats {
        overall_uptime,
        services_up: raw.up_count,
        services_down: raw.down_count,
        avg_response_time_ms: raw.avg_rt_24h,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryRange {
    OneHour,
    TwelveHours,
    TwentyFourHours,
    OneWeek,
    OneYear,
}

impl HistoryRange {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "1h" => HistoryRange::OneHour,
            "12h" => HistoryRange::TwelveHours,
            "1w" => HistoryRange::OneWeek,
            "1y" => HistoryRange::OneYear,
            _ => HistoryRange::TwentyFourHours,
        }
    }

    fn window(&self) -> chrono::Duration {
        match self {
            HistoryRange::OneHour => chrono::Duration::hours(1),
            HistoryRange::TwelveHours => chrono::Duration::hours(12),
            HistoryRange::TwentyFourHours => chrono::Duration::hours(24),
            HistoryRange::OneWeek => chrono::Duration::weeks(1),
            HistoryRange::OneYear => chrono::Duration::days(365),
        }
    }

    fn limit(&self) -> i64 {
        match self {
            HistoryRange::OneHour => 60,
            HistoryRange::TwelveHours => 144,
            HistoryRange::TwentyFourHours => 288,
            HistoryRange::OneWeek => 168,
            HistoryRange::OneYear => 365,
        }
    }

    /// Ranges wider than 7 days are answered from compacted hourly buckets
    /// rather than raw samples, which retention only keeps for 7 days.
    fn uses_buckets(&self) -> bool {
        matches!(self, HistoryRange::OneYear)
    }

    fn label_format(&self) -> &'static str {
        match self {
            HistoryRange::OneHour | HistoryRange::TwelveHours | HistoryRange::TwentyFourHours => {
                "%H:%M"
            }
            HistoryRange::OneWeek | HistoryRange::OneYear => "%b %d",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryPoint {
    pub timestamp: DateTime<Utc>,
    pub response_time_ms: i64,
    pub label: String,
}

pub async fn history(
    store: &Store,
    monitor_id: i64,
    range: HistoryRange,
    now: DateTime<Utc>,
) -> NanoResult<Vec<HistoryPoint>> {
    let from = now - range.window();
    let fmt = range.label_format();

    if range.uses_buckets() {
        let buckets = store
            .buckets_in_range(monitor_id, from, now, range.limit())
            .await?;
        Ok(buckets
            .into_iter()
            .map(|b| {
                let timestamp = Utc
                    .timestamp_opt(b.bucket_hour_unix, 0)
                    .single()
                    .unwrap_or(now);
                HistoryPoint {
                    timestamp,
                    response_time_ms: b.avg_rt.map(|v| v.round() as i64).unwrap_or(0),
                    label: timestamp.format(fmt).to_string(),
                }
            })
            .collect())
    } else {
        let samples = store
            .samples_in_range(monitor_id, from, now, range.limit())
            .await?;
        Ok(samples
            .into_iter()
            .map(|s| HistoryPoint {
                timestamp: s.created_at,
                response_time_ms: s.response_time_ms,
                label: s.created_at.format(fmt).to_string(),
            })
            .collect())
    }
}
