//! Request/response DTOs for the HTTP API. CamelCase on the wire per §6;
//! snake_case internally, matching the teacher's `api::types` split between
//! internal domain shapes and serialized response shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stats::{FleetStats, HistoryPoint};
use crate::store::Monitor;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorDto {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub uptime: f64,
    pub status: String,
    pub response_time: i64,
    pub last_check: String,
    pub is_third_party: bool,
    pub icon: String,
    pub check_interval: i64,
    pub paused: bool,
    pub updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<&Monitor> for MonitorDto {
    fn from(m: &Monitor) -> Self {
        Self {
            id: m.id,
            name: m.name.clone(),
            url: m.url.clone(),
            uptime: m.uptime_percent_24h,
            status: match m.status {
                crate::store::MonitorStatus::Unknown => "unknown",
                crate::store::MonitorStatus::Up => "up",
                crate::store::MonitorStatus::Down => "down",
            }
            .to_string(),
            response_time: m.last_response_time_ms,
            last_check: m.last_check_label.clone(),
            is_third_party: m.is_third_party,
            icon: m.icon.clone(),
            check_interval: m.check_interval_seconds,
            paused: m.paused,
            updated_at: m.updated_at,
            created_at: m.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMonitorRequest {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub is_third_party: Option<bool>,
    #[serde(default)]
    pub check_interval: Option<i64>,
}

/// Accepts both shapes from §6's PUT contract: a full edit, or a bare
/// `{"paused": bool}`. Which one applies is decided by which other fields
/// are present, not by a discriminator key.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMonitorRequest {
    pub name: Option<String>,
    pub url: Option<String>,
    pub icon: Option<String>,
    pub check_interval: Option<i64>,
    pub is_third_party: Option<bool>,
    pub paused: Option<bool>,
}

impl UpdateMonitorRequest {
    /// A pause-only patch is one that touches nothing but `paused`.
    pub fn is_pause_only(&self) -> bool {
        self.paused.is_some()
            && self.name.is_none()
            && self.url.is_none()
            && self.icon.is_none()
            && self.check_interval.is_none()
            && self.is_third_party.is_none()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorIdQuery {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryQuery {
    pub id: i64,
    #[serde(default)]
    pub range: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsDto {
    pub overall_uptime: f64,
    pub services_up: i64,
    pub services_down: i64,
    pub avg_response_time: f64,
}

impl From<FleetStats> for StatsDto {
    fn from(s: FleetStats) -> Self {
        Self {
            overall_uptime: s.overall_uptime,
            services_up: s.services_up,
            services_down: s.services_down,
            avg_response_time: s.avg_response_time_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseTimePointDto {
    pub time: String,
    pub timestamp: String,
    pub response_time: i64,
}

impl From<HistoryPoint> for ResponseTimePointDto {
    fn from(p: HistoryPoint) -> Self {
        Self {
            time: p.label,
            timestamp: p.timestamp.to_rfc3339(),
            response_time: p.response_time_ms,
        }
    }
}
