//! The single-check executor.
//!
//! Grounded in the teacher's `ServiceMonitorActor::perform_check` pipeline:
//! build a request, time it, classify the response, persist the outcome.
//! Unlike the teacher's per-monitor actor, a `Probe` here is stateless and
//! reentrant; the scheduler owns the one-job-per-monitor invariant.

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, CACHE_CONTROL, PRAGMA};
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};
use url::Url;

use std::sync::Arc;

use crate::events::{EventBus, EventKind};
use crate::store::{MonitorPatch, MonitorStatus, Store};

const USER_AGENT: &str = "NanoStatus/1.0";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const TOTAL_TIMEOUT: Duration = Duration::from_secs(10);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const POOL_MAX_IDLE_PER_HOST: usize = 10;
const PING_SYNTHETIC_LATENCY_MS: i64 = 10;

/// Builds the single pooled client shared by every probe in the process.
pub fn build_client() -> reqwest::Client {
    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));

    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(TOTAL_TIMEOUT)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .build()
        .expect("static client configuration is always valid")
}

#[derive(Debug, Clone, Copy)]
struct Outcome {
    status: MonitorStatus,
    response_time_ms: i64,
}

/// Classifies a target URL before any network I/O happens.
enum Target {
    /// `ping://...` — a coarse stub, no network I/O performed.
    Ping,
    /// A URL to issue a real HTTP GET against.
    Http(Url),
    /// Empty host or otherwise unparsable.
    Malformed,
}

fn classify_target(raw_url: &str) -> Target {
    if raw_url.starts_with("ping://") {
        return Target::Ping;
    }

    let with_scheme = if raw_url.contains("://") {
        raw_url.to_string()
    } else {
        format!("https://{raw_url}")
    };

    match Url::parse(&with_scheme) {
        Ok(url) if url.host_str().is_some_and(|h| !h.is_empty()) => Target::Http(url),
        _ => Target::Malformed,
    }
}

async fn issue_request(client: &reqwest::Client, url: &Url) -> Outcome {
    let start = Instant::now();
    match client.get(url.clone()).send().await {
        Ok(response) => {
            let elapsed_ms = start.elapsed().as_millis() as i64;
            // Body is never read; dropping the response closes it.
            let status = response.status();
            drop(response);
            if (200..400).contains(&status.as_u16()) {
                Outcome {
                    status: MonitorStatus::Up,
                    response_time_ms: elapsed_ms,
                }
            } else {
                Outcome {
                    status: MonitorStatus::Down,
                    response_time_ms: 0,
                }
            }
        }
        Err(err) => {
            warn!(error = %err, url = %url, "probe transport error");
            Outcome {
                status: MonitorStatus::Down,
                response_time_ms: 0,
            }
        }
    }
}

fn format_last_check_label(now: DateTime<Utc>, since: DateTime<Utc>) -> String {
    let elapsed = (now - since).num_seconds().max(0);
    if elapsed < 60 {
        "just now".to_string()
    } else if elapsed < 3600 {
        format!("{}m ago", elapsed / 60)
    } else if elapsed < 86_400 {
        format!("{}h ago", elapsed / 3600)
    } else {
        format!("{}d ago", elapsed / 86_400)
    }
}

/// Runs a single check for `monitor_id`, persisting the sample and the
/// refreshed monitor row and publishing the resulting update. Silently
/// returns if the monitor is missing or paused; DB errors are logged and
/// swallowed so a single bad probe never brings down the scheduler.
#[instrument(skip(store, events, client))]
pub async fn probe(store: &Store, events: &Arc<EventBus>, client: &reqwest::Client, monitor_id: i64) {
    let monitor = match store.get_monitor(monitor_id).await {
        Ok(m) => m,
        Err(err) => {
            debug!(%monitor_id, error = %err, "skipping probe: monitor not found");
            return;
        }
    };
    if monitor.paused {
        return;
    }

    let now = Utc::now();
    let outcome = match classify_target(&monitor.url) {
        Target::Ping => Outcome {
            status: MonitorStatus::Up,
            response_time_ms: PING_SYNTHETIC_LATENCY_MS,
        },
        Target::Malformed => Outcome {
            status: MonitorStatus::Down,
            response_time_ms: 0,
        },
        Target::Http(url) => issue_request(client, &url).await,
    };

    if let Err(err) = store
        .insert_sample(monitor_id, outcome.status, outcome.response_time_ms, now)
        .await
    {
        warn!(%monitor_id, error = %err, "failed to persist check sample");
    }

    let uptime = match store.uptime_24h(monitor_id, now).await {
        Ok(counts) if counts.total > 0 => 100.0 * counts.up as f64 / counts.total as f64,
        Ok(_) => match outcome.status {
            MonitorStatus::Up => 100.0,
            MonitorStatus::Down | MonitorStatus::Unknown => 0.0,
        },
        Err(err) => {
            warn!(%monitor_id, error = %err, "failed to recompute uptime, keeping prior value");
            monitor.uptime_percent_24h
        }
    };

    let last_check_label = format_last_check_label(now, monitor.updated_at);

    let updated = match store
        .update_monitor(
            monitor_id,
            MonitorPatch::Runtime {
                status: outcome.status,
                last_response_time_ms: outcome.response_time_ms,
                uptime_percent_24h: uptime,
                last_check_label,
            },
            now,
        )
        .await
    {
        Ok(m) => m,
        Err(err) => {
            warn!(%monitor_id, error = %err, "failed to write runtime patch after probe");
            return;
        }
    };

    let dto = crate::api::types::MonitorDto::from(&updated);
    events.publish(EventKind::MonitorUpdate, serde_json::to_value(&dto).unwrap_or_default());
    events.publish_stats_debounced(store);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_ping_scheme_without_parsing() {
        assert!(matches!(classify_target("ping://1.1.1.1"), Target::Ping));
    }

    #[test]
    fn classifies_missing_scheme_as_https() {
        match classify_target("example.com") {
            Target::Http(url) => assert_eq!(url.scheme(), "https"),
            _ => panic!("expected Http target"),
        }
    }

    #[test]
    fn classifies_explicit_scheme_as_given() {
        match classify_target("http://example.com") {
            Target::Http(url) => assert_eq!(url.scheme(), "http"),
            _ => panic!("expected Http target"),
        }
    }

    #[test]
    fn classifies_empty_host_as_malformed() {
        assert!(matches!(classify_target("https://"), Target::Malformed));
    }

    #[test]
    fn label_thresholds() {
        let now = Utc::now();
        assert_eq!(format_last_check_label(now, now - chrono::Duration::seconds(5)), "just now");
        assert_eq!(format_last_check_label(now, now - chrono::Duration::minutes(3)), "3m ago");
        assert_eq!(format_last_check_label(now, now - chrono::Duration::hours(2)), "2h ago");
        assert_eq!(format_last_check_label(now, now - chrono::Duration::days(2)), "2d ago");
    }
}
