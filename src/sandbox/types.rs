//! Shared data types for the lifecycle engine (C1–C6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ServerId = String;

/// Startup parameters handed to [`crate::sandbox::instance::ServerInstance::start`]
/// (spec §3's `StartData`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartData {
    /// MiB.
    pub memory: u64,
    /// Percent of one CPU, x10 (e.g. 1000 == one full core).
    pub cpu: u64,
    /// MiB.
    pub disk: u64,
    pub environment: std::collections::HashMap<String, String>,
    pub primary_allocation: Allocation,
    #[serde(default)]
    pub additional_allocations: Vec<Allocation>,
    pub image: String,
    pub core: Core,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Allocation {
    pub ip: String,
    pub port: u16,
}

/// The image-and-command recipe that specializes a server for a particular
/// application (spec GLOSSARY, "Core").
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Core {
    #[serde(default)]
    pub install_script: String,
    pub startup_command: String,
    #[serde(default)]
    pub stop_command: Option<String>,
    /// Template filename -> template body. Values containing `{{NAME}}`
    /// tokens are rendered at start time; a value that parses as JSON is
    /// treated as the object form (`key=value` lines), otherwise as raw
    /// JSON text to keep verbatim after substitution.
    #[serde(default)]
    pub config_system: std::collections::HashMap<String, String>,
    #[serde(default)]
    pub startup_parser: std::collections::HashMap<String, String>,
}

impl StartData {
    pub fn cpu_cores(&self) -> f64 {
        self.cpu as f64 / 1000.0
    }

    pub fn all_allocations(&self) -> Vec<&Allocation> {
        std::iter::once(&self.primary_allocation)
            .chain(self.additional_allocations.iter())
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "tcp".to_string()
}

/// Resource usage snapshot. Unpopulated keys are omitted rather than
/// fabricated as zero (Open Question 2, resolved in DESIGN.md).
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub memory_limit_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_in_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_out_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_bytes: Option<u64>,
}

/// A Live Event's category (spec §3). `Internal` events are consumed only
/// in-process and must never reach a console client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Status,
    Pull,
    Error,
    Warn,
    Command,
    Log,
    Internal,
}

impl EventCategory {
    /// `true` for categories whose console line is the verbatim message
    /// with no prefix (spec §4.7).
    pub fn is_bare(&self) -> bool {
        matches!(self, EventCategory::Log | EventCategory::Internal)
    }
}

fn as_epoch_millis<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_i64(ts.timestamp_millis())
}

/// One event fanned out by the Live Event Bus (C5): `{category, message,
/// timestampEpochMs}` per spec §3.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveEvent {
    pub category: EventCategory,
    pub message: String,
    #[serde(serialize_with = "as_epoch_millis", rename = "timestampEpochMs")]
    pub timestamp: DateTime<Utc>,
}

impl LiveEvent {
    pub fn new(category: EventCategory, message: impl Into<String>) -> Self {
        Self { category, message: message.into(), timestamp: Utc::now() }
    }
}

/// Which output channel a raw container log chunk came from. Internal to
/// the Log Multiplexer (C6) — both channels collapse to category `log` once
/// they reach the Live Event Bus (spec §4.7: `log` lines carry no prefix and
/// are not distinguished by origin).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    Stdout,
    Stderr,
}

