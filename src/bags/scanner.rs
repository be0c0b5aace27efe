use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use log::{debug, info};
use walkdir::WalkDir;

use crate::{error::BagError, utils::fs::dir_size};

use super::{
    info::BagInspector,
    models::{BagFormat, ScannedBag},
};

/// Looks for bag files anywhere below `dir`. `.db3` wins over `.mcap`
/// when both are present.
pub fn detect_format(dir: &Path) -> Option<BagFormat> {
    let mut found = None;
    for entry in WalkDir::new(dir).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let format = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(BagFormat::from_extension);
        match format {
            Some(BagFormat::Db3) => return Some(BagFormat::Db3),
            Some(BagFormat::Mcap) => found = Some(BagFormat::Mcap),
            None => {}
        }
    }
    found
}

/// Enumerates the immediate subdirectories of `root` that hold bag files
/// and gathers their facts. Subdirectories without bag files are skipped.
pub async fn scan_folder(
    root: &Path,
    inspector: &dyn BagInspector,
) -> Result<Vec<ScannedBag>, BagError> {
    let root = fs::canonicalize(root).map_err(|_| BagError::not_found("folder", root.display()))?;
    if !root.is_dir() {
        return Err(BagError::not_found("folder", root.display()));
    }

    let entries = fs::read_dir(&root).map_err(|err| BagError::filesystem("read", &root, err))?;
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();

    let discovered_at = Utc::now();
    let mut bags = Vec::new();

    for dir in dirs {
        let name = dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let Some(format) = detect_format(&dir) else {
            debug!("Skipping {name} - no bag files found");
            continue;
        };

        let modified_at = fs::metadata(&dir)
            .and_then(|metadata| metadata.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or(discovered_at);
        let details = inspector.inspect(&dir).await;

        debug!("Found bag {name} ({format:?}, {} topics)", details.topics.len());
        bags.push(ScannedBag {
            path: dir.to_string_lossy().into_owned(),
            name,
            modified_at,
            discovered_at,
            size_bytes: dir_size(&dir),
            topics: details.topics,
            duration_text: details.duration_text,
            message_count: details.message_count,
            format,
        });
    }

    info!("Found {} bags in {}", bags.len(), root.display());
    Ok(bags)
}
