use std::{env, ffi::OsStr, path::PathBuf, time::Duration};

use tokio::process::Command;

pub const CONFIG_FILE: &str = "config.json";
pub const METADATA_FILE: &str = "bags_metadata.json";

const DEFAULT_STOP_GRACE_SECS: u64 = 5;

/// An external executable plus arguments that always precede the
/// per-call arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn command<I, S>(&self, extra: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.program);
        command.args(&self.args).args(extra);
        command
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub data_dir: PathBuf,
    pub ros2: ToolCommand,
    pub archiver: ToolCommand,
    pub stop_grace: Duration,
    pub debug: bool,
}

impl RuntimeConfig {
    /// Rooted at `data_dir`, with the stock tool names.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ros2: ToolCommand::new("ros2"),
            archiver: ToolCommand::new("7z"),
            stop_grace: Duration::from_secs(DEFAULT_STOP_GRACE_SECS),
            debug: false,
        }
    }

    pub fn from_env() -> Self {
        let data_dir = env::var_os("BAG_MANAGER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut config = Self::new(data_dir);

        if let Ok(program) = env::var("BAG_MANAGER_ROS2") {
            config.ros2 = ToolCommand::new(program);
        }
        if let Ok(program) = env::var("BAG_MANAGER_ARCHIVER") {
            config.archiver = ToolCommand::new(program);
        }
        if let Some(secs) = env::var("BAG_MANAGER_STOP_GRACE_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
        {
            config.stop_grace = Duration::from_secs(secs);
        }
        config.debug = env::var("BAG_MANAGER_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        config
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.data_dir.join(METADATA_FILE)
    }
}
