use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use chrono::Local;
use log::{info, warn};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};

use crate::{config::ToolCommand, error::BagError};

use super::{
    handle::ProcessHandle,
    state::{
        auto_bag_name, play_args, record_args, unique_bag_name, validate_bag_name, validate_rate,
        PlaybackOptions, PlaybackOutput, PlaybackStatus, RecordOptions, RecordingStatus,
        SlotStatus,
    },
    ProcessKind,
};

/// How long a reaped child's output readers get to reach EOF.
const READER_FLUSH: Duration = Duration::from_millis(50);

type Slot = Arc<Mutex<Option<ProcessHandle>>>;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStarted {
    pub name: String,
    pub path: String,
    pub duration: Option<u64>,
    pub topics: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStarted {
    pub bag: String,
    pub rate: f64,
    #[serde(rename = "loop")]
    pub looped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoppedProcess {
    pub kind: ProcessKind,
    pub label: String,
    /// The child ignored the stop request and was killed.
    pub forced: bool,
}

/// Owns the recording and playback slots. Each slot holds at most one
/// child; every transition happens under that slot's lock.
#[derive(Clone)]
pub struct ProcessSupervisor {
    tool: ToolCommand,
    stop_grace: Duration,
    recording: Slot,
    playback: Slot,
}

impl ProcessSupervisor {
    pub fn new(tool: ToolCommand, stop_grace: Duration) -> Self {
        Self {
            tool,
            stop_grace,
            recording: Arc::new(Mutex::new(None)),
            playback: Arc::new(Mutex::new(None)),
        }
    }

    fn slot(&self, kind: ProcessKind) -> &Slot {
        match kind {
            ProcessKind::Recording => &self.recording,
            ProcessKind::Playback => &self.playback,
        }
    }

    /// Locks the slot, reaps a finished child and fails if a live one
    /// remains. The returned guard keeps other starts out until the new
    /// child is stored.
    async fn idle_slot(
        &self,
        kind: ProcessKind,
    ) -> Result<MutexGuard<'_, Option<ProcessHandle>>, BagError> {
        let mut slot = self.slot(kind).lock().await;
        reap_exited(kind, &mut slot).await;
        if let Some(handle) = slot.as_ref() {
            return Err(BagError::AlreadyRunning {
                kind,
                label: handle.label().to_string(),
            });
        }
        Ok(slot)
    }

    /// Starts `ros2 bag record` into `folder`. Without a name one is
    /// generated from the local time.
    pub async fn start_recording(
        &self,
        folder: &Path,
        name: Option<&str>,
        options: RecordOptions,
    ) -> Result<RecordingStarted, BagError> {
        let mut slot = self.idle_slot(ProcessKind::Recording).await?;

        let name = match name.map(str::trim).filter(|name| !name.is_empty()) {
            Some(name) => {
                let name = validate_bag_name(name)?;
                let target = folder.join(name);
                if target.exists() {
                    return Err(BagError::filesystem(
                        "record into",
                        &target,
                        io::Error::from(io::ErrorKind::AlreadyExists),
                    ));
                }
                name.to_string()
            }
            None => unique_bag_name(folder, &auto_bag_name(Local::now())),
        };
        let output: PathBuf = folder.join(&name);

        let command = self.tool.command(record_args(&output, &options));
        let handle = ProcessHandle::spawn(
            ProcessKind::Recording,
            &name,
            &output,
            &self.tool.program,
            command,
            false,
        )?;
        *slot = Some(handle);

        Ok(RecordingStarted {
            name,
            path: output.display().to_string(),
            duration: options.duration_secs,
            topics: options.topics.describe(),
        })
    }

    pub async fn start_playback(
        &self,
        label: &str,
        bag: &Path,
        options: PlaybackOptions,
    ) -> Result<PlaybackStarted, BagError> {
        let rate = validate_rate(options.rate)?;
        let mut slot = self.idle_slot(ProcessKind::Playback).await?;

        let command = self.tool.command(play_args(bag, &options));
        let handle = ProcessHandle::spawn(
            ProcessKind::Playback,
            label,
            bag,
            &self.tool.program,
            command,
            true,
        )?;
        *slot = Some(handle);

        Ok(PlaybackStarted {
            bag: label.to_string(),
            rate,
            looped: options.looped,
        })
    }

    /// Stops the child in `kind`'s slot, escalating to a kill after the
    /// grace period.
    pub async fn stop(&self, kind: ProcessKind) -> Result<StoppedProcess, BagError> {
        let mut slot = self.slot(kind).lock().await;
        reap_exited(kind, &mut slot).await;
        let handle = slot.take().ok_or(BagError::NotRunning(kind))?;

        let label = handle.label().to_string();
        info!("Stopping {kind} '{label}' ({})", handle.path().display());
        let forced = handle.terminate(self.stop_grace).await;

        Ok(StoppedProcess {
            kind,
            label,
            forced,
        })
    }

    pub async fn status(&self, kind: ProcessKind) -> SlotStatus {
        let mut slot = self.slot(kind).lock().await;
        reap_exited(kind, &mut slot).await;
        match slot.as_ref() {
            Some(handle) => SlotStatus::Running {
                label: handle.label().to_string(),
            },
            None => SlotStatus::Idle,
        }
    }

    pub async fn recording_status(&self) -> RecordingStatus {
        let status = self.status(ProcessKind::Recording).await;
        RecordingStatus {
            recording: status.is_running(),
            name: status.label().map(str::to_string),
        }
    }

    pub async fn playback_status(&self) -> PlaybackStatus {
        let status = self.status(ProcessKind::Playback).await;
        PlaybackStatus {
            playing: status.is_running(),
            bag: status.label().map(str::to_string),
        }
    }

    /// Returns every line the player has written since the previous call,
    /// or an empty string. Never waits for new output.
    pub async fn drain_playback_output(&self) -> PlaybackOutput {
        let mut slot = self.playback.lock().await;
        let mut lines = slot
            .as_ref()
            .map(ProcessHandle::take_output)
            .unwrap_or_default();
        lines.extend(reap_exited(ProcessKind::Playback, &mut slot).await);

        PlaybackOutput {
            line: lines.join("\n"),
        }
    }

    /// Stops whatever is still running. Used when the control loop exits.
    pub async fn shutdown(&self) {
        for kind in [ProcessKind::Recording, ProcessKind::Playback] {
            match self.stop(kind).await {
                Ok(stopped) => info!("Stopped {kind} '{}' on shutdown", stopped.label),
                Err(BagError::NotRunning(_)) => {}
                Err(err) => warn!("Failed to stop {kind} on shutdown: {err}"),
            }
        }
    }
}

/// Clears the slot if its child has exited, returning the child's
/// remaining output.
async fn reap_exited(kind: ProcessKind, slot: &mut Option<ProcessHandle>) -> Vec<String> {
    let exited = slot.as_mut().is_some_and(ProcessHandle::has_exited);
    if !exited {
        return Vec::new();
    }
    match slot.take() {
        Some(mut handle) => {
            info!("{kind} '{}' finished; slot is idle", handle.label());
            handle.close_output(READER_FLUSH).await
        }
        None => Vec::new(),
    }
}
