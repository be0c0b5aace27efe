pub mod commands;
pub mod controller;
mod handle;
pub mod state;

pub use controller::{PlaybackStarted, ProcessSupervisor, RecordingStarted, StoppedProcess};
pub use state::{
    PlaybackOptions, PlaybackOutput, PlaybackStatus, ProcessKind, RecordOptions, RecordingStatus,
    SlotStatus, TopicSelection,
};
