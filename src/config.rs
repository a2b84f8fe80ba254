//! Process configuration and the declarative monitor-list reconciler.
//!
//! Grounded in the teacher's `config.rs`: typed, validated configuration
//! structs with `#[serde(default)]` optional fields, read the same way the
//! teacher's `read_config_file` reads JSON, except this crate's declarative
//! input is YAML (`serde_yaml`) per the external interface.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{NanoError, NanoResult};
use crate::events::{EventBus, EventKind};
use crate::store::{clamp_interval, Monitor, MonitorPatch, NewMonitor, Store};

/// Process-level configuration, read from environment variables the way
/// the teacher's `util.rs` reads `AGENT_PORT`/`AGENT_ADDR`/`AGENT_SECRET`.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub log_level: String,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            db_path: PathBuf::from("./nanostatus.db"),
            log_level: "info".to_string(),
        }
    }
}

impl ProcessConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port);
        let db_path = std::env::var("DB_PATH")
            .ok()
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);
        let log_level = std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level);
        Self {
            port,
            db_path,
            log_level,
        }
    }

    /// `monitors.yaml` is discovered next to the database file.
    pub fn monitors_yaml_path(&self) -> PathBuf {
        self.db_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .join("monitors.yaml")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawMonitorEntry {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default = "default_check_interval", rename = "checkInterval")]
    pub check_interval: i64,
    #[serde(default, rename = "isThirdParty")]
    pub is_third_party: bool,
    #[serde(default)]
    pub paused: bool,
}

fn default_check_interval() -> i64 {
    60
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MonitorsFile {
    #[serde(default)]
    pub monitors: Vec<RawMonitorEntry>,
}

/// `SHA-256("name|url|icon|interval|is_third_party|paused")`, field order
/// fixed so permuting YAML key order never changes the hash.
pub fn config_hash(entry: &RawMonitorEntry) -> String {
    let joined = format!(
        "{}|{}|{}|{}|{}|{}",
        entry.name, entry.url, entry.icon, entry.check_interval, entry.is_third_party, entry.paused
    );
    let digest = Sha256::digest(joined.as_bytes());
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

fn default_monitors() -> Vec<RawMonitorEntry> {
    vec![
        RawMonitorEntry {
            name: "Example".to_string(),
            url: "https://example.com".to_string(),
            icon: String::new(),
            check_interval: 60,
            is_third_party: false,
            paused: false,
        },
        RawMonitorEntry {
            name: "Cloudflare 1.1.1.1".to_string(),
            url: "ping://1.1.1.1".to_string(),
            icon: String::new(),
            check_interval: 60,
            is_third_party: true,
            paused: false,
        },
    ]
}

/// Loads `path`, validates entries, and syncs them into the Store. Emits
/// `monitor_added`/`monitor_update`/`monitor_deleted` as changes occur and
/// requests a debounced stats refresh if anything changed. A missing file
/// seeds two default monitors when the database is empty; a malformed file
/// is logged and leaves the database untouched.
pub async fn reconcile(
    store: &Store,
    events: &std::sync::Arc<EventBus>,
    path: &Path,
) -> NanoResult<()> {
    let entries = match tokio::fs::read_to_string(path).await {
        Ok(contents) => match serde_yaml::from_str::<MonitorsFile>(&contents) {
            Ok(file) => file.monitors,
            Err(err) => {
                warn!(error = %err, path = %path.display(), "monitors.yaml is malformed, leaving database unchanged");
                return Ok(());
            }
        },
        Err(_) => {
            let existing = store.list_monitors().await?;
            if existing.is_empty() {
                info!("no monitors.yaml found and database is empty, seeding defaults");
                default_monitors()
            } else {
                return Ok(());
            }
        }
    };

    reconcile_entries(store, events, &entries).await
}

async fn reconcile_entries(
    store: &Store,
    events: &std::sync::Arc<EventBus>,
    entries: &[RawMonitorEntry],
) -> NanoResult<()> {
    let valid: Vec<&RawMonitorEntry> = entries
        .iter()
        .filter(|e| !e.name.trim().is_empty() && !e.url.trim().is_empty())
        .collect();

    let existing = store.list_monitors().await?;
    let mut changed = false;
    let mut seen_hashes: Vec<String> = Vec::new();

    for entry in &valid {
        let hash = config_hash(entry);
        seen_hashes.push(hash.clone());

        let by_hash = existing.iter().find(|m| m.config_hash == hash);
        if by_hash.is_some() {
            continue;
        }

        let by_identity = existing
            .iter()
            .find(|m| m.name == entry.name && m.url == entry.url);

        match by_identity {
            Some(m) if m.config_hash.is_empty() => {
                // UI-owned monitor with the same name/url; leave it alone.
                continue;
            }
            Some(m) => {
                let mut updated = store
                    .update_monitor(
                        m.id,
                        MonitorPatch::Edit {
                            name: entry.name.clone(),
                            url: entry.url.clone(),
                            icon: entry.icon.clone(),
                            check_interval_seconds: clamp_interval(entry.check_interval),
                            is_third_party: entry.is_third_party,
                        },
                        Utc::now(),
                    )
                    .await?;
                // `paused` is a declared YAML field (and part of the hash), not a
                // preserved runtime field, so a YAML-driven pause flip must land here too.
                if updated.paused != entry.paused {
                    updated = store
                        .update_monitor(updated.id, MonitorPatch::Pause(entry.paused), Utc::now())
                        .await?;
                }
                store.set_config_hash(updated.id, &hash).await?;
                let dto = crate::api::types::MonitorDto::from(&updated);
                events.publish(EventKind::MonitorUpdate, serde_json::to_value(&dto).unwrap_or_default());
                changed = true;
            }
            None => {
                let mut created = store
                    .create_monitor(NewMonitor {
                        name: entry.name.clone(),
                        url: entry.url.clone(),
                        icon: entry.icon.clone(),
                        is_third_party: entry.is_third_party,
                        check_interval_seconds: clamp_interval(entry.check_interval),
                        config_hash: hash,
                    })
                    .await?;
                if entry.paused {
                    created = store
                        .update_monitor(created.id, MonitorPatch::Pause(true), Utc::now())
                        .await?;
                }
                let dto = crate::api::types::MonitorDto::from(&created);
                events.publish(EventKind::MonitorAdded, serde_json::to_value(&dto).unwrap_or_default());
                changed = true;
            }
        }
    }

    for monitor in existing
        .iter()
        .filter(|m| !m.config_hash.is_empty() && !seen_hashes.contains(&m.config_hash))
    {
        store.delete_monitor(monitor.id).await?;
        events.publish(
            EventKind::MonitorDeleted,
            serde_json::json!({ "id": monitor.id }),
        );
        changed = true;
    }

    if changed {
        events.publish_stats_debounced(store);
    }

    Ok(())
}

/// Serializes the current monitor list back into the YAML shape accepted
/// by `reconcile`, used by the `/api/monitors/export` endpoint.
pub fn export_yaml(monitors: &[Monitor]) -> NanoResult<String> {
    let entries: Vec<RawMonitorEntry> = monitors
        .iter()
        .map(|m| RawMonitorEntry {
            name: m.name.clone(),
            url: m.url.clone(),
            icon: m.icon.clone(),
            check_interval: m.check_interval_seconds,
            is_third_party: m.is_third_party,
            paused: m.paused,
        })
        .collect();
    serde_yaml::to_string(&MonitorsFile { monitors: entries })
        .map_err(|e| NanoError::Persistence(format!("failed to serialize export: {e}")))
}
