use std::{fmt, path::Path};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::BagError;

pub const AUTO_NAME_PREFIX: &str = "rosbag2";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ProcessKind {
    Recording,
    Playback,
}

impl ProcessKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessKind::Recording => "recording",
            ProcessKind::Playback => "playback",
        }
    }
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state of one slot. `Running` is only reported after a
/// liveness check of the child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotStatus {
    Idle,
    Running { label: String },
}

impl SlotStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, SlotStatus::Running { .. })
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            SlotStatus::Idle => None,
            SlotStatus::Running { label } => Some(label),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RecordingStatus {
    pub recording: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PlaybackStatus {
    pub playing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bag: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PlaybackOutput {
    pub line: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TopicSelection {
    #[default]
    All,
    Only(Vec<String>),
}

impl TopicSelection {
    /// Blank entries are dropped; nothing left means every topic.
    pub fn from_list<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let topics: Vec<String> = topics
            .into_iter()
            .map(|topic| topic.as_ref().trim().to_string())
            .filter(|topic| !topic.is_empty())
            .collect();

        if topics.is_empty() {
            TopicSelection::All
        } else {
            TopicSelection::Only(topics)
        }
    }

    pub fn describe(&self) -> String {
        match self {
            TopicSelection::All => "all".to_string(),
            TopicSelection::Only(topics) => topics.join(","),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordOptions {
    pub duration_secs: Option<u64>,
    pub topics: TopicSelection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackOptions {
    pub rate: f64,
    pub looped: bool,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            rate: 1.0,
            looped: false,
        }
    }
}

pub fn record_args(output: &Path, options: &RecordOptions) -> Vec<String> {
    let mut args = vec![
        "bag".to_string(),
        "record".to_string(),
        "-o".to_string(),
        output.display().to_string(),
    ];

    match &options.topics {
        TopicSelection::All => args.push("-a".to_string()),
        TopicSelection::Only(topics) => args.extend(topics.iter().cloned()),
    }

    if let Some(duration) = options.duration_secs {
        args.push("--duration".to_string());
        args.push(duration.to_string());
    }

    args
}

pub fn play_args(bag: &Path, options: &PlaybackOptions) -> Vec<String> {
    let mut args = vec![
        "bag".to_string(),
        "play".to_string(),
        bag.display().to_string(),
        "-r".to_string(),
        options.rate.to_string(),
    ];
    if options.looped {
        args.push("--loop".to_string());
    }
    args
}

pub fn validate_rate(rate: f64) -> Result<f64, BagError> {
    if rate.is_finite() && rate > 0.0 {
        Ok(rate)
    } else {
        Err(BagError::InvalidArgument(format!(
            "playback rate must be a positive number, got {rate}"
        )))
    }
}

/// `rosbag2_YYYY_MM_DD-HH_MM_SS`; sorts chronologically as a string.
pub fn auto_bag_name(now: DateTime<Local>) -> String {
    format!("{AUTO_NAME_PREFIX}_{}", now.format("%Y_%m_%d-%H_%M_%S"))
}

/// Picks `base`, or `base_1`, `base_2`, … when a directory of that name
/// already exists under `folder`.
pub fn unique_bag_name(folder: &Path, base: &str) -> String {
    if !folder.join(base).exists() {
        return base.to_string();
    }
    (1u32..)
        .map(|n| format!("{base}_{n}"))
        .find(|candidate| !folder.join(candidate).exists())
        .unwrap_or_else(|| base.to_string())
}

/// A bag name is a single, non-empty path segment.
pub fn validate_bag_name(name: &str) -> Result<&str, BagError> {
    let name = name.trim();
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if invalid {
        return Err(BagError::InvalidArgument(format!(
            "'{name}' is not a valid bag name"
        )));
    }
    Ok(name)
}
