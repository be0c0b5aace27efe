//! Bag catalog data models.
//!
//! Observational fields come from the scanner and are rewritten on every
//! rescan; `tags` and `qos_settings` are user annotations and only change
//! through explicit edits.

use std::collections::BTreeMap;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BagFormat {
    /// SQLite3 storage (`.db3`).
    Db3,
    /// MCAP storage (`.mcap`).
    Mcap,
}

impl BagFormat {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "db3" => Some(BagFormat::Db3),
            "mcap" => Some(BagFormat::Mcap),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Reliability {
    Reliable,
    BestEffort,
    #[default]
    SystemDefault,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    Volatile,
    TransientLocal,
    #[default]
    SystemDefault,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum History {
    KeepLast,
    KeepAll,
    #[default]
    SystemDefault,
}

/// Per-topic QoS override kept with a bag for later replay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct QosProfile {
    #[serde(default)]
    pub reliability: Reliability,
    #[serde(default)]
    pub durability: Durability,
    #[serde(default)]
    pub history: History,
    #[serde(default)]
    pub depth: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BagRecord {
    pub path: String,
    pub name: String,
    #[serde(alias = "date", deserialize_with = "lenient_timestamp")]
    pub modified_at: DateTime<Utc>,
    #[serde(default = "Utc::now", deserialize_with = "lenient_timestamp")]
    pub discovered_at: DateTime<Utc>,
    #[serde(default, alias = "size")]
    pub size_bytes: u64,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default, alias = "duration")]
    pub duration_text: String,
    #[serde(default, alias = "messages")]
    pub message_count: u64,
    pub format: BagFormat,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub qos_settings: BTreeMap<String, QosProfile>,
}

impl BagRecord {
    /// A record with no annotations yet.
    pub fn from_scan(scanned: ScannedBag) -> Self {
        Self {
            path: scanned.path,
            name: scanned.name,
            modified_at: scanned.modified_at,
            discovered_at: scanned.discovered_at,
            size_bytes: scanned.size_bytes,
            topics: scanned.topics,
            duration_text: scanned.duration_text,
            message_count: scanned.message_count,
            format: scanned.format,
            tags: Vec::new(),
            qos_settings: BTreeMap::new(),
        }
    }

    /// Overwrites every observational field, leaving annotations alone.
    pub fn refresh(&mut self, scanned: ScannedBag) {
        self.name = scanned.name;
        self.modified_at = scanned.modified_at;
        self.discovered_at = scanned.discovered_at;
        self.size_bytes = scanned.size_bytes;
        self.topics = scanned.topics;
        self.duration_text = scanned.duration_text;
        self.message_count = scanned.message_count;
        self.format = scanned.format;
    }
}

/// Accepts RFC 3339 as well as the naive local ISO 8601 timestamps that
/// older catalogs carry.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(stamp) = DateTime::parse_from_rfc3339(text) {
        return Some(stamp.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|stamp| stamp.with_timezone(&Utc))
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse_timestamp(&text)
        .ok_or_else(|| de::Error::custom(format!("unrecognized timestamp {text:?}")))
}

/// Raw facts about one bag directory from a single scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedBag {
    pub path: String,
    pub name: String,
    pub modified_at: DateTime<Utc>,
    pub discovered_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub topics: Vec<String>,
    pub duration_text: String,
    pub message_count: u64,
    pub format: BagFormat,
}

/// Contents of the metadata file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BagCatalog {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    #[serde(default)]
    pub bags: Vec<BagRecord>,
}
