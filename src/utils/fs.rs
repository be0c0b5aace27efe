use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::Path,
};

use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::BagError;

/// Reads a JSON document, returning `None` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, BagError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(BagError::filesystem("read", path, err)),
    };

    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|err| BagError::filesystem("parse", path, io::Error::from(err)))
}

/// Writes `value` as pretty JSON to a sibling temp file, then renames it
/// over `path`. Readers see either the old or the new document.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), BagError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|err| BagError::filesystem("create", parent, err))?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".to_string());
    let temp_path = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));

    let write = || -> io::Result<()> {
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.write_all(b"\n")?;
        let file = writer.into_inner().map_err(|err| err.into_error())?;
        file.sync_all()
    };

    if let Err(err) = write() {
        let _ = fs::remove_file(&temp_path);
        return Err(BagError::filesystem("write", &temp_path, err));
    }

    fs::rename(&temp_path, path).map_err(|err| {
        let _ = fs::remove_file(&temp_path);
        BagError::filesystem("replace", path, err)
    })
}

/// Total size of the regular files below `root`. Unreadable entries are
/// skipped.
pub fn dir_size(root: &Path) -> u64 {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}
