pub mod bags;
pub mod config;
pub mod config_commands;
pub mod control;
pub mod error;
pub mod settings;
pub mod supervisor;
mod utils;

use std::sync::Arc;

use anyhow::Context;
use bags::{BagInspector, BagStore, Ros2BagInfo};
use config::{RuntimeConfig, ToolCommand};
use log::{info, LevelFilter};
use settings::SettingsStore;
use supervisor::ProcessSupervisor;
use tokio::io::BufReader;

pub struct AppState {
    pub(crate) supervisor: ProcessSupervisor,
    pub(crate) bags: BagStore,
    pub(crate) settings: SettingsStore,
    pub(crate) inspector: Arc<dyn BagInspector>,
    pub(crate) ros2: ToolCommand,
    pub(crate) archiver: ToolCommand,
}

impl AppState {
    pub fn new(config: &RuntimeConfig) -> Self {
        let inspector = Arc::new(Ros2BagInfo::new(config.ros2.clone()));
        Self::with_inspector(config, inspector)
    }

    /// Same as [`AppState::new`] but with a custom source of bag details.
    pub fn with_inspector(config: &RuntimeConfig, inspector: Arc<dyn BagInspector>) -> Self {
        Self {
            supervisor: ProcessSupervisor::new(config.ros2.clone(), config.stop_grace),
            bags: BagStore::new(config.metadata_path()),
            settings: SettingsStore::new(config.config_path()),
            inspector,
            ros2: config.ros2.clone(),
            archiver: config.archiver.clone(),
        }
    }
}

pub fn run() -> anyhow::Result<()> {
    let config = RuntimeConfig::from_env();

    // stdout carries responses, so logs stay on stderr. RUST_LOG wins.
    env_logger::Builder::new()
        .filter_level(if config.debug {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .parse_default_env()
        .init();

    info!("Bag manager starting up...");

    std::fs::create_dir_all(&config.data_dir).with_context(|| {
        format!(
            "failed to create data directory {}",
            config.data_dir.display()
        )
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    runtime.block_on(async {
        let state = Arc::new(AppState::new(&config));
        info!(
            "Serving requests (data dir {}, ros2 '{}')",
            config.data_dir.display(),
            config.ros2.program
        );

        control::serve(state, BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
            .context("control loop failed")
    })?;

    info!("Bag manager stopped");
    Ok(())
}
