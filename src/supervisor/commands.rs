use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::{
    bags::info::{list_topics, TOPIC_LIST_TIMEOUT},
    error::{BagError, CommandError},
    AppState,
};

use super::{
    PlaybackOptions, PlaybackOutput, PlaybackStarted, PlaybackStatus, ProcessKind,
    RecordOptions, RecordingStarted, RecordingStatus, TopicSelection,
};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStopped {
    pub name: String,
    pub forced: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStopped {
    pub bag: String,
    pub forced: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AvailableTopics {
    pub topics: Vec<String>,
}

/// Folder new recordings go into: the last scanned one, else the working
/// directory.
fn recording_folder(state: &AppState) -> Result<PathBuf, BagError> {
    let folder = state
        .settings
        .last_folder()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    if !folder.is_dir() {
        return Err(BagError::not_found("folder", folder.display()));
    }
    Ok(folder)
}

pub async fn start_recording(
    state: &AppState,
    name: Option<String>,
    duration: Option<u64>,
    topics: Option<Vec<String>>,
) -> Result<RecordingStarted, CommandError> {
    let folder = recording_folder(state)?;
    let options = RecordOptions {
        duration_secs: duration.filter(|secs| *secs > 0),
        topics: topics.map(TopicSelection::from_list).unwrap_or_default(),
    };

    let started = state
        .supervisor
        .start_recording(&folder, name.as_deref(), options)
        .await?;
    Ok(started)
}

pub async fn stop_recording(state: &AppState) -> Result<RecordingStopped, CommandError> {
    let stopped = state.supervisor.stop(ProcessKind::Recording).await?;
    Ok(RecordingStopped {
        name: stopped.label,
        forced: stopped.forced,
    })
}

pub async fn recording_status(state: &AppState) -> Result<RecordingStatus, CommandError> {
    Ok(state.supervisor.recording_status().await)
}

pub async fn start_playback(
    state: &AppState,
    bag_index: usize,
    rate: Option<f64>,
    looped: Option<bool>,
) -> Result<PlaybackStarted, CommandError> {
    let record = state.bags.get(bag_index).await?;
    let defaults = PlaybackOptions::default();
    let options = PlaybackOptions {
        rate: rate.unwrap_or(defaults.rate),
        looped: looped.unwrap_or(defaults.looped),
    };

    let started = state
        .supervisor
        .start_playback(&record.name, Path::new(&record.path), options)
        .await?;
    Ok(started)
}

pub async fn stop_playback(state: &AppState) -> Result<PlaybackStopped, CommandError> {
    let stopped = state.supervisor.stop(ProcessKind::Playback).await?;
    Ok(PlaybackStopped {
        bag: stopped.label,
        forced: stopped.forced,
    })
}

pub async fn playback_status(state: &AppState) -> Result<PlaybackStatus, CommandError> {
    Ok(state.supervisor.playback_status().await)
}

pub async fn drain_playback_output(state: &AppState) -> Result<PlaybackOutput, CommandError> {
    Ok(state.supervisor.drain_playback_output().await)
}

pub async fn available_topics(state: &AppState) -> Result<AvailableTopics, CommandError> {
    Ok(AvailableTopics {
        topics: list_topics(&state.ros2, TOPIC_LIST_TIMEOUT).await,
    })
}
