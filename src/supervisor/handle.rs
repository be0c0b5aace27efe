use std::{
    collections::VecDeque,
    io,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
    task::JoinHandle,
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::error::BagError;

use super::ProcessKind;

const MAX_BUFFERED_LINES: usize = 1000;
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);
const INSTALL_HINT: &str = "Please install ROS 2 and source its setup script.";

type LineBuffer = Arc<Mutex<VecDeque<String>>>;

fn lock_lines(lines: &LineBuffer) -> MutexGuard<'_, VecDeque<String>> {
    match lines.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn push_bounded(queue: &mut VecDeque<String>, line: String) {
    if queue.len() >= MAX_BUFFERED_LINES {
        queue.pop_front();
    }
    queue.push_back(line);
}

/// Line readers attached to the child's stdout and stderr.
struct OutputCapture {
    lines: LineBuffer,
    cancel: CancellationToken,
    readers: Vec<JoinHandle<()>>,
}

impl OutputCapture {
    fn attach(child: &mut Child, label: &str) -> Self {
        let lines: LineBuffer = Arc::new(Mutex::new(VecDeque::new()));
        let cancel = CancellationToken::new();
        let mut readers = Vec::with_capacity(2);

        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, lines.clone(), cancel.clone(), label));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, lines.clone(), cancel.clone(), label));
        }

        Self {
            lines,
            cancel,
            readers,
        }
    }

    fn take_lines(&self) -> Vec<String> {
        lock_lines(&self.lines).drain(..).collect()
    }

    /// Gives the readers until `flush` to hit EOF, then stops them and
    /// returns whatever is left in the buffer.
    async fn close(mut self, flush: Duration) -> Vec<String> {
        let deadline = Instant::now() + flush;
        for reader in self.readers.drain(..) {
            if time::timeout_at(deadline, reader).await.is_err() {
                break;
            }
        }
        self.cancel.cancel();
        self.take_lines()
    }
}

impl Drop for OutputCapture {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn spawn_reader<R>(
    stream: R,
    lines: LineBuffer,
    cancel: CancellationToken,
    label: &str,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let label = label.to_string();
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream).lines();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = reader.next_line() => match next {
                    Ok(Some(line)) => push_bounded(&mut lock_lines(&lines), line),
                    Ok(None) => break,
                    Err(err) => {
                        debug!("Output reader for '{label}' stopped: {err}");
                        break;
                    }
                },
            }
        }
    })
}

/// A live child owned by one supervisor slot.
pub(crate) struct ProcessHandle {
    kind: ProcessKind,
    label: String,
    path: PathBuf,
    started_at: DateTime<Utc>,
    child: Child,
    output: Option<OutputCapture>,
}

impl ProcessHandle {
    /// Spawns `command`. Output is captured only when `capture_output` is
    /// set; otherwise it is discarded. The child is not tied to the handle's
    /// lifetime: dropping the handle leaves it running.
    pub(crate) fn spawn(
        kind: ProcessKind,
        label: &str,
        path: &Path,
        program: &str,
        mut command: Command,
        capture_output: bool,
    ) -> Result<Self, BagError> {
        command.stdin(Stdio::null()).kill_on_drop(false);
        if capture_output {
            // Piped stdout is block-buffered by python and rcutils otherwise.
            command
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .env("PYTHONUNBUFFERED", "1")
                .env("RCUTILS_LOGGING_BUFFERED_STREAM", "0");
        } else {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let mut child = command
            .spawn()
            .map_err(|err| BagError::spawn_failed(program, err, INSTALL_HINT))?;

        let output = capture_output.then(|| OutputCapture::attach(&mut child, label));

        info!(
            "Started {kind} '{label}' (pid {})",
            child.id().map_or_else(|| "?".to_string(), |pid| pid.to_string())
        );

        Ok(Self {
            kind,
            label: label.to_string(),
            path: path.to_path_buf(),
            started_at: Utc::now(),
            child,
            output,
        })
    }

    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Non-blocking liveness check. A child whose state cannot be queried
    /// is still treated as running, so the slot keeps it until a stop kills it.
    pub(crate) fn has_exited(&mut self) -> bool {
        let polled = self.child.try_wait();
        self.settle(polled)
    }

    fn settle(&self, polled: io::Result<Option<ExitStatus>>) -> bool {
        match polled {
            Ok(Some(status)) => {
                info!(
                    "{} '{}' exited with {status} after {}s",
                    self.kind,
                    self.label,
                    (Utc::now() - self.started_at).num_seconds()
                );
                true
            }
            Ok(None) => false,
            Err(err) => {
                warn!(
                    "Could not query {} '{}', keeping it: {err}",
                    self.kind, self.label
                );
                false
            }
        }
    }

    pub(crate) fn take_output(&self) -> Vec<String> {
        self.output
            .as_ref()
            .map(OutputCapture::take_lines)
            .unwrap_or_default()
    }

    pub(crate) async fn close_output(&mut self, flush: Duration) -> Vec<String> {
        match self.output.take() {
            Some(capture) => capture.close(flush).await,
            None => Vec::new(),
        }
    }

    /// Asks the child to exit, waits up to `grace`, then kills it.
    /// Returns `true` when the kill was needed.
    pub(crate) async fn terminate(mut self, grace: Duration) -> bool {
        self.request_exit();

        let deadline = Instant::now() + grace;
        let forced = loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    info!("{} '{}' stopped with {status}", self.kind, self.label);
                    break false;
                }
                Ok(None) if Instant::now() >= deadline => {
                    warn!(
                        "{} '{}' ignored the stop request for {grace:?}; killing it",
                        self.kind, self.label
                    );
                    if let Err(err) = self.child.kill().await {
                        error!("Failed to kill {} '{}': {err}", self.kind, self.label);
                    }
                    break true;
                }
                Ok(None) => time::sleep(STOP_POLL_INTERVAL).await,
                Err(err) => {
                    error!("Error waiting for {} '{}': {err}", self.kind, self.label);
                    let _ = self.child.kill().await;
                    break true;
                }
            }
        };

        self.close_output(Duration::ZERO).await;
        forced
    }

    #[cfg(unix)]
    fn request_exit(&mut self) {
        let Some(pid) = self.child.id() else {
            return;
        };
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return;
        };
        // SAFETY: plain signal delivery to a pid we spawned and have not reaped.
        let result = unsafe { libc::kill(pid, libc::SIGTERM) };
        if result != 0 {
            debug!(
                "SIGTERM to {} '{}' failed: {}",
                self.kind,
                self.label,
                std::io::Error::last_os_error()
            );
        }
    }

    #[cfg(not(unix))]
    fn request_exit(&mut self) {
        if let Err(err) = self.child.start_kill() {
            debug!("Stop request to {} '{}' failed: {err}", self.kind, self.label);
        }
    }
}
