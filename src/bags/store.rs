use std::{
    fs, io,
    path::{Path, PathBuf},
};

use log::{error, info, warn};
use tokio::sync::Mutex;

use crate::{
    error::BagError,
    supervisor::state::validate_bag_name,
    utils::fs::{read_json, write_json_atomic},
};

use super::{
    info::BagInspector,
    models::{BagCatalog, BagRecord, ScannedBag},
    reconcile::reconcile,
    scanner::scan_folder,
};

/// The persisted bag catalog. Every read-modify-write cycle runs under a
/// single lock and ends with a full atomic rewrite of the file.
pub struct BagStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl BagStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn catalog(&self) -> Result<BagCatalog, BagError> {
        let _guard = self.lock.lock().await;
        self.load()
    }

    pub async fn list(&self) -> Result<Vec<BagRecord>, BagError> {
        Ok(self.catalog().await?.bags)
    }

    pub async fn get(&self, index: usize) -> Result<BagRecord, BagError> {
        self.list()
            .await?
            .into_iter()
            .nth(index)
            .ok_or_else(|| BagError::not_found("bag", index))
    }

    /// Scans `root` and merges the result into the catalog. The lock is
    /// held for the whole scan, so edits issued meanwhile wait and then
    /// apply to the merged catalog. An unparsable catalog is moved aside
    /// and rebuilt from the scan.
    pub async fn rescan(
        &self,
        root: &Path,
        inspector: &dyn BagInspector,
    ) -> Result<Vec<BagRecord>, BagError> {
        let _guard = self.lock.lock().await;
        let scanned = scan_folder(root, inspector).await?;

        let catalog = match self.load() {
            Ok(catalog) => catalog,
            Err(BagError::Filesystem {
                operation: "parse",
                source,
                ..
            }) => {
                self.set_aside(&source)?;
                BagCatalog::default()
            }
            Err(err) => return Err(err),
        };
        self.merge(catalog, &root.to_string_lossy(), scanned)
    }

    /// Reconciles an already gathered scan against the stored records.
    pub async fn apply_scan(
        &self,
        folder: &str,
        scanned: Vec<ScannedBag>,
    ) -> Result<Vec<BagRecord>, BagError> {
        let _guard = self.lock.lock().await;
        let catalog = self.load()?;
        self.merge(catalog, folder, scanned)
    }

    /// Applies `edit` to the record at `index` and persists the catalog.
    /// Nothing is written when `edit` fails.
    pub async fn update_bag<F>(&self, index: usize, edit: F) -> Result<BagRecord, BagError>
    where
        F: FnOnce(&mut BagRecord) -> Result<(), BagError>,
    {
        let _guard = self.lock.lock().await;
        let mut catalog = self.load()?;

        let record = catalog
            .bags
            .get_mut(index)
            .ok_or_else(|| BagError::not_found("bag", index))?;
        edit(record)?;
        let updated = record.clone();

        self.save(&catalog)?;
        Ok(updated)
    }

    /// Renames the bag directory and its record together. If the directory
    /// cannot be renamed the catalog is untouched; if the catalog cannot be
    /// saved the directory rename is rolled back.
    pub async fn rename(&self, index: usize, new_name: &str) -> Result<BagRecord, BagError> {
        let new_name = validate_bag_name(new_name)?;

        let _guard = self.lock.lock().await;
        let mut catalog = self.load()?;

        let current = catalog
            .bags
            .get(index)
            .ok_or_else(|| BagError::not_found("bag", index))?;
        let old_path = PathBuf::from(&current.path);
        let new_path = match old_path.parent() {
            Some(parent) => parent.join(new_name),
            None => PathBuf::from(new_name),
        };
        let new_path_text = new_path.to_string_lossy().into_owned();

        if new_path == old_path {
            return Ok(current.clone());
        }
        if new_path.exists() || catalog.bags.iter().any(|bag| bag.path == new_path_text) {
            return Err(BagError::filesystem(
                "rename to",
                &new_path,
                io::Error::from(io::ErrorKind::AlreadyExists),
            ));
        }

        fs::rename(&old_path, &new_path)
            .map_err(|err| BagError::filesystem("rename", &old_path, err))?;

        let record = &mut catalog.bags[index];
        record.path = new_path_text;
        record.name = new_name.to_string();
        let renamed = record.clone();

        if let Err(err) = self.save(&catalog) {
            if let Err(rollback) = fs::rename(&new_path, &old_path) {
                error!(
                    "Could not restore {} after failed save: {rollback}",
                    old_path.display()
                );
            }
            return Err(err);
        }

        info!("Renamed {} to {}", old_path.display(), new_path.display());
        Ok(renamed)
    }

    /// Deletes the bag directory, then its record. A directory that is
    /// already gone still has its record removed.
    pub async fn delete(&self, index: usize) -> Result<BagRecord, BagError> {
        let _guard = self.lock.lock().await;
        let mut catalog = self.load()?;

        if index >= catalog.bags.len() {
            return Err(BagError::not_found("bag", index));
        }
        let path = PathBuf::from(&catalog.bags[index].path);

        match fs::remove_dir_all(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!("{} was already gone; dropping its record", path.display());
            }
            Err(err) => return Err(BagError::filesystem("delete", &path, err)),
        }

        let removed = catalog.bags.remove(index);
        self.save(&catalog)?;

        info!("Deleted bag {}", path.display());
        Ok(removed)
    }

    fn merge(
        &self,
        mut catalog: BagCatalog,
        folder: &str,
        scanned: Vec<ScannedBag>,
    ) -> Result<Vec<BagRecord>, BagError> {
        let before = catalog.bags.len();
        catalog.bags = reconcile(std::mem::take(&mut catalog.bags), scanned);
        catalog.folder = Some(folder.to_string());
        self.save(&catalog)?;

        info!(
            "Catalog now holds {} bags (previously {before}) for {folder}",
            catalog.bags.len()
        );
        Ok(catalog.bags)
    }

    fn set_aside(&self, reason: &io::Error) -> Result<(), BagError> {
        let mut backup = self.path.clone().into_os_string();
        backup.push(".bak");
        let backup = PathBuf::from(backup);

        warn!(
            "Unreadable catalog {} ({reason}); moving it to {}",
            self.path.display(),
            backup.display()
        );
        fs::rename(&self.path, &backup)
            .map_err(|err| BagError::filesystem("set aside", &self.path, err))
    }

    fn load(&self) -> Result<BagCatalog, BagError> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }

    fn save(&self, catalog: &BagCatalog) -> Result<(), BagError> {
        write_json_atomic(&self.path, catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bags::{info::BagInfo, models::BagFormat};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::{sync::Arc, time::Duration};
    use tokio::sync::Notify;

    struct NoInfo;

    #[async_trait]
    impl BagInspector for NoInfo {
        async fn inspect(&self, _bag: &Path) -> BagInfo {
            BagInfo::default()
        }
    }

    /// Holds the scan inside `inspect` until released.
    struct GatedInspector {
        entered: Notify,
        release: Notify,
    }

    impl GatedInspector {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                entered: Notify::new(),
                release: Notify::new(),
            })
        }
    }

    #[async_trait]
    impl BagInspector for GatedInspector {
        async fn inspect(&self, _bag: &Path) -> BagInfo {
            self.entered.notify_one();
            self.release.notified().await;
            BagInfo::default()
        }
    }

    fn scanned_dir(dir: &Path) -> ScannedBag {
        ScannedBag {
            path: dir.to_string_lossy().into_owned(),
            name: dir.file_name().unwrap().to_string_lossy().into_owned(),
            modified_at: Utc::now(),
            discovered_at: Utc::now(),
            size_bytes: 0,
            topics: Vec::new(),
            duration_text: String::new(),
            message_count: 0,
            format: BagFormat::Mcap,
        }
    }

    async fn store_with_bag(root: &Path, name: &str) -> (BagStore, PathBuf) {
        let bag_dir = root.join(name);
        fs::create_dir_all(&bag_dir).unwrap();
        fs::write(bag_dir.join("data.mcap"), b"x").unwrap();

        let store = BagStore::new(root.join("bags_metadata.json"));
        store
            .apply_scan(&root.to_string_lossy(), vec![scanned_dir(&bag_dir)])
            .await
            .unwrap();
        (store, bag_dir)
    }

    #[tokio::test]
    async fn empty_store_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = BagStore::new(dir.path().join("bags_metadata.json"));
        assert!(store.list().await.unwrap().is_empty());
        assert_eq!(store.get(0).await.unwrap_err().code(), "not_found");
    }

    #[tokio::test]
    async fn updates_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = store_with_bag(dir.path(), "run1").await;

        store
            .update_bag(0, |bag| {
                bag.tags.push("field".into());
                Ok(())
            })
            .await
            .unwrap();

        let reopened = BagStore::new(store.path().to_path_buf());
        assert_eq!(reopened.get(0).await.unwrap().tags, ["field"]);
        assert_eq!(
            reopened.catalog().await.unwrap().folder.as_deref(),
            Some(dir.path().to_string_lossy().as_ref())
        );
    }

    #[tokio::test]
    async fn failed_edit_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = store_with_bag(dir.path(), "run1").await;

        let err = store
            .update_bag(0, |bag| {
                bag.tags.push("lost".into());
                Err(BagError::InvalidArgument("nope".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
        assert!(store.get(0).await.unwrap().tags.is_empty());
    }

    #[tokio::test]
    async fn rename_moves_directory_and_record_together() {
        let dir = tempfile::tempdir().unwrap();
        let (store, bag_dir) = store_with_bag(dir.path(), "run1").await;
        store
            .update_bag(0, |bag| {
                bag.tags.push("keep".into());
                Ok(())
            })
            .await
            .unwrap();

        let renamed = store.rename(0, "calibration").await.unwrap();
        let expected = dir.path().join("calibration");

        assert_eq!(renamed.name, "calibration");
        assert_eq!(renamed.path, expected.to_string_lossy());
        assert_eq!(renamed.tags, ["keep"]);
        assert!(expected.join("data.mcap").exists());
        assert!(!bag_dir.exists());
        assert_eq!(store.get(0).await.unwrap(), renamed);
    }

    #[tokio::test]
    async fn rename_failure_leaves_record_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let (store, bag_dir) = store_with_bag(dir.path(), "run1").await;
        fs::create_dir(dir.path().join("taken")).unwrap();

        let err = store.rename(0, "taken").await.unwrap_err();
        assert_eq!(err.code(), "filesystem");

        fs::remove_dir_all(&bag_dir).unwrap();
        let err = store.rename(0, "elsewhere").await.unwrap_err();
        assert_eq!(err.code(), "filesystem");

        let record = store.get(0).await.unwrap();
        assert_eq!(record.name, "run1");
        assert_eq!(record.path, bag_dir.to_string_lossy());

        assert_eq!(
            store.rename(0, "a/b").await.unwrap_err().code(),
            "invalid_argument"
        );
    }

    #[tokio::test]
    async fn delete_removes_directory_then_record() {
        let dir = tempfile::tempdir().unwrap();
        let (store, bag_dir) = store_with_bag(dir.path(), "run1").await;

        let removed = store.delete(0).await.unwrap();
        assert_eq!(removed.name, "run1");
        assert!(!bag_dir.exists());
        assert!(store.list().await.unwrap().is_empty());
        assert_eq!(store.delete(0).await.unwrap_err().code(), "not_found");
    }

    fn start_gated_rescan(
        store: &Arc<BagStore>,
        root: &Path,
        gate: &Arc<GatedInspector>,
    ) -> tokio::task::JoinHandle<Result<Vec<BagRecord>, BagError>> {
        let (store, root, gate) = (Arc::clone(store), root.to_path_buf(), Arc::clone(gate));
        tokio::spawn(async move { store.rescan(&root, gate.as_ref()).await })
    }

    #[tokio::test]
    async fn rename_issued_during_a_scan_keeps_its_annotations() {
        let dir = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        let (store, bag_dir) = store_with_bag(&root, "A").await;
        let store = Arc::new(store);
        store
            .update_bag(0, |bag| {
                bag.tags.push("keep".into());
                Ok(())
            })
            .await
            .unwrap();

        let gate = GatedInspector::new();
        let scan = start_gated_rescan(&store, &root, &gate);
        gate.entered.notified().await;

        let rename = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.rename(0, "B").await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!rename.is_finished());
        assert!(bag_dir.exists());

        gate.release.notify_one();
        assert_eq!(scan.await.unwrap().unwrap()[0].tags, ["keep"]);
        assert_eq!(rename.await.unwrap().unwrap().tags, ["keep"]);

        let persisted = store.list().await.unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].path, root.join("B").to_string_lossy());
        assert_eq!(persisted[0].tags, ["keep"]);
        assert!(root.join("B/data.mcap").exists());
    }

    #[tokio::test]
    async fn delete_issued_during_a_scan_stays_applied() {
        let dir = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        let (store, bag_dir) = store_with_bag(&root, "A").await;
        let store = Arc::new(store);

        let gate = GatedInspector::new();
        let scan = start_gated_rescan(&store, &root, &gate);
        gate.entered.notified().await;

        let delete = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.delete(0).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!delete.is_finished());

        gate.release.notify_one();
        assert_eq!(scan.await.unwrap().unwrap().len(), 1);
        assert_eq!(delete.await.unwrap().unwrap().name, "A");

        assert!(!bag_dir.exists());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreadable_catalog_is_set_aside_by_rescan() {
        let dir = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        fs::create_dir(root.join("A")).unwrap();
        fs::write(root.join("A/part.db3"), b"x").unwrap();
        let store = BagStore::new(root.join("bags_metadata.json"));
        fs::write(store.path(), r#"{"bags": [{"name": 1}]}"#).unwrap();

        let err = store.list().await.unwrap_err();
        assert_eq!(err.code(), "filesystem");
        assert!(err.suggestion().contains("Rescan"));

        let bags = store.rescan(&root, &NoInfo).await.unwrap();
        assert_eq!(bags.len(), 1);
        assert_eq!(bags[0].name, "A");
        assert!(root.join("bags_metadata.json.bak").exists());
        assert_eq!(store.list().await.unwrap(), bags);
    }
}
