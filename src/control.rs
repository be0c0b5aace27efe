//! JSON-lines control loop.
//!
//! Each stdin line is one request, `{"id": .., "command": "<name>", ..args}`.
//! Each stdout line is the response to one request, in request order,
//! carrying the request's `id`.

use std::{io, sync::Arc};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    bags::{commands as bags, models::QosProfile, TagAction},
    config_commands,
    error::CommandError,
    supervisor::commands as supervisor,
    AppState,
};

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(
    tag = "command",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum Command {
    StartRecording {
        name: Option<String>,
        duration: Option<u64>,
        topics: Option<Vec<String>>,
    },
    StopRecording,
    RecordingStatus,
    StartPlayback {
        bag_index: usize,
        rate: Option<f64>,
        #[serde(rename = "loop")]
        looped: Option<bool>,
    },
    StopPlayback,
    PlaybackStatus,
    DrainPlaybackOutput,
    AvailableTopics,
    RescanFolder {
        path: String,
    },
    ListBags,
    GetBag {
        bag_index: usize,
    },
    AnnotateTag {
        bag_index: usize,
        tag: String,
        action: TagAction,
    },
    AnnotateQos {
        bag_index: usize,
        topic: String,
        settings: Option<QosProfile>,
    },
    RenameBag {
        bag_index: usize,
        new_name: String,
    },
    DeleteBag {
        bag_index: usize,
    },
    CompressBag {
        bag_index: usize,
    },
    GetConfig,
    SetUser {
        user: String,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandError>,
}

impl Response {
    fn new(id: Option<Value>, outcome: Result<Value, CommandError>) -> Self {
        match outcome {
            Ok(result) => Self {
                id,
                ok: true,
                result: Some(result),
                error: None,
            },
            Err(error) => Self {
                id,
                ok: false,
                result: None,
                error: Some(error),
            },
        }
    }
}

fn reply<T: Serialize>(outcome: Result<T, CommandError>) -> Result<Value, CommandError> {
    serde_json::to_value(outcome?).map_err(|err| CommandError::internal(err.to_string()))
}

/// Parses one request line and runs it.
pub async fn dispatch(state: &AppState, line: &str) -> Response {
    let request: Value = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(err) => return Response::new(None, Err(CommandError::invalid_request(err.to_string()))),
    };
    let id = request.get("id").cloned();

    let command = match Command::deserialize(&request) {
        Ok(command) => command,
        Err(err) => return Response::new(id, Err(CommandError::invalid_request(err.to_string()))),
    };

    debug!("Handling {command:?}");
    Response::new(id, execute(state, command).await)
}

pub async fn execute(state: &AppState, command: Command) -> Result<Value, CommandError> {
    match command {
        Command::StartRecording {
            name,
            duration,
            topics,
        } => reply(supervisor::start_recording(state, name, duration, topics).await),
        Command::StopRecording => reply(supervisor::stop_recording(state).await),
        Command::RecordingStatus => reply(supervisor::recording_status(state).await),
        Command::StartPlayback {
            bag_index,
            rate,
            looped,
        } => reply(supervisor::start_playback(state, bag_index, rate, looped).await),
        Command::StopPlayback => reply(supervisor::stop_playback(state).await),
        Command::PlaybackStatus => reply(supervisor::playback_status(state).await),
        Command::DrainPlaybackOutput => reply(supervisor::drain_playback_output(state).await),
        Command::AvailableTopics => reply(supervisor::available_topics(state).await),
        Command::RescanFolder { path } => reply(bags::rescan_folder(state, path).await),
        Command::ListBags => reply(bags::list_bags(state).await),
        Command::GetBag { bag_index } => reply(bags::get_bag(state, bag_index).await),
        Command::AnnotateTag {
            bag_index,
            tag,
            action,
        } => reply(bags::annotate_tag(state, bag_index, tag, action).await),
        Command::AnnotateQos {
            bag_index,
            topic,
            settings,
        } => reply(bags::annotate_qos(state, bag_index, topic, settings).await),
        Command::RenameBag {
            bag_index,
            new_name,
        } => reply(bags::rename_bag(state, bag_index, new_name).await),
        Command::DeleteBag { bag_index } => reply(bags::delete_bag(state, bag_index).await),
        Command::CompressBag { bag_index } => reply(bags::compress_bag(state, bag_index).await),
        Command::GetConfig => reply(config_commands::get_config(state).await),
        Command::SetUser { user } => reply(config_commands::set_user(state, user).await),
    }
}

async fn write_response<W>(output: &mut W, response: &Response) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_string(response)?;
    line.push('\n');
    output.write_all(line.as_bytes()).await?;
    output.flush().await
}

/// Serves requests from `input` one at a time until it closes, then stops
/// any running child. Children are stopped on I/O failures too.
pub async fn serve<R, W>(state: Arc<AppState>, input: R, mut output: W) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let served = answer_lines(&state, input, &mut output).await;
    match &served {
        Ok(()) => info!("Control input closed"),
        Err(err) => warn!("Control loop failed: {err}"),
    }
    state.supervisor.shutdown().await;
    served
}

async fn answer_lines<R, W>(state: &AppState, input: R, output: &mut W) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = dispatch(state, &line).await;
        if let Some(error) = &response.error {
            debug!("Request failed with {}: {}", error.code, error.message);
        }
        write_response(output, &response).await?;
    }
    Ok(())
}
