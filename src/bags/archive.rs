use std::{ffi::OsStr, path::Path, process::Stdio};

use log::{error, info};
use serde::Serialize;

use crate::{config::ToolCommand, error::BagError};

const INSTALL_HINT: &str = "Please install p7zip-full";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Compressed {
    pub original: String,
    pub compressed: String,
}

/// Archive path written next to the bag directory.
pub fn archive_path(bag: &Path) -> String {
    format!("{}.7z", bag.display())
}

/// Runs `7z a <bag>.7z <bag>` and waits for it to finish.
pub async fn compress(archiver: &ToolCommand, bag: &Path) -> Result<Compressed, BagError> {
    if !bag.is_dir() {
        return Err(BagError::not_found("bag directory", bag.display()));
    }
    let target = archive_path(bag);

    let mut command = archiver.command([OsStr::new("a"), OsStr::new(&target), bag.as_os_str()]);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    info!("Compressing {} into {target}", bag.display());
    let output = command
        .output()
        .await
        .map_err(|err| BagError::spawn_failed(&archiver.program, err, INSTALL_HINT))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!("{} exited with {}: {}", archiver.program, output.status, stderr.trim());
        return Err(BagError::ExternalTool {
            tool: archiver.program.clone(),
            reason: format!("compression failed ({})", output.status),
        });
    }

    Ok(Compressed {
        original: bag.display().to_string(),
        compressed: target,
    })
}
