use std::path::Path;

use serde::Serialize;

use crate::{error::CommandError, AppState};

use super::{
    annotate::{apply_tag, set_qos, TagAction},
    archive::{compress, Compressed},
    models::{BagRecord, QosProfile},
};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeletedBag {
    pub deleted: String,
}

/// Scans `path`, merges the result into the catalog and remembers the
/// folder for later recordings.
pub async fn rescan_folder(state: &AppState, path: String) -> Result<Vec<BagRecord>, CommandError> {
    let bags = state
        .bags
        .rescan(Path::new(&path), state.inspector.as_ref())
        .await?;
    state.settings.set_last_folder(&path)?;
    Ok(bags)
}

pub async fn list_bags(state: &AppState) -> Result<Vec<BagRecord>, CommandError> {
    Ok(state.bags.list().await?)
}

pub async fn get_bag(state: &AppState, bag_index: usize) -> Result<BagRecord, CommandError> {
    Ok(state.bags.get(bag_index).await?)
}

pub async fn annotate_tag(
    state: &AppState,
    bag_index: usize,
    tag: String,
    action: TagAction,
) -> Result<BagRecord, CommandError> {
    let record = state
        .bags
        .update_bag(bag_index, |bag| apply_tag(bag, &tag, action))
        .await?;
    Ok(record)
}

pub async fn annotate_qos(
    state: &AppState,
    bag_index: usize,
    topic: String,
    settings: Option<QosProfile>,
) -> Result<BagRecord, CommandError> {
    let record = state
        .bags
        .update_bag(bag_index, |bag| set_qos(bag, &topic, settings))
        .await?;
    Ok(record)
}

pub async fn rename_bag(
    state: &AppState,
    bag_index: usize,
    new_name: String,
) -> Result<BagRecord, CommandError> {
    Ok(state.bags.rename(bag_index, &new_name).await?)
}

pub async fn delete_bag(state: &AppState, bag_index: usize) -> Result<DeletedBag, CommandError> {
    let removed = state.bags.delete(bag_index).await?;
    Ok(DeletedBag {
        deleted: removed.name,
    })
}

pub async fn compress_bag(state: &AppState, bag_index: usize) -> Result<Compressed, CommandError> {
    let record = state.bags.get(bag_index).await?;
    Ok(compress(&state.archiver, Path::new(&record.path)).await?)
}
