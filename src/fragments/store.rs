//! Local Fragment Store
//!
//! Fragment files live under one root, laid out exactly like their ids:
//! `<root>/<customer>/<path>/<version>/<block>-<slot>-<Kind>`. The restore
//! pipeline scans this tree before asking any supplier for anything, saves
//! every fetched payload into it, and sweeps a block's fragments out again
//! once the block is written to the output, unless the store is configured
//! to keep local copies.
//!
//! Reassembled block files are staged in a `.tmp` directory under the same
//! root so they land on the same filesystem as the fragments.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::fragments::id::{BackupId, FragmentId, FragmentKind};

/// Configuration for the on-disk fragment store
#[derive(Debug, Clone)]
pub struct FragmentStoreConfig {
    /// Root directory of the fragment tree
    pub root: PathBuf,

    /// Keep fragment files after their block is restored
    pub keep_local_copies: bool,
}

/// On-disk fragment tree plus staging space for block files.
pub struct FragmentStore {
    config: FragmentStoreConfig,
}

impl FragmentStore {
    pub fn new(config: FragmentStoreConfig) -> Self {
        Self { config }
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn keep_local_copies(&self) -> bool {
        self.config.keep_local_copies
    }

    /// Directory holding all fragment files of one backup version.
    pub fn version_dir(&self, backup: &BackupId) -> PathBuf {
        self.config
            .root
            .join(backup.customer.to_string())
            .join(&backup.path)
            .join(&backup.version)
    }

    /// Full path of one fragment file.
    pub fn path_for(&self, id: &FragmentId) -> PathBuf {
        self.version_dir(&id.backup).join(id.local_name())
    }

    pub fn exists(&self, id: &FragmentId) -> bool {
        self.path_for(id).is_file()
    }

    /// Presence vectors for one block, data and parity.
    pub fn scan_block(
        &self,
        backup: &BackupId,
        block: u64,
        data_slots: usize,
        parity_slots: usize,
    ) -> (Vec<bool>, Vec<bool>) {
        let data = (0..data_slots)
            .map(|slot| self.exists(&backup.fragment(block, slot, FragmentKind::Data)))
            .collect();
        let parity = (0..parity_slots)
            .map(|slot| self.exists(&backup.fragment(block, slot, FragmentKind::Parity)))
            .collect();
        (data, parity)
    }

    /// Write a fetched fragment payload, creating parent directories.
    ///
    /// A fragment that is already on disk is overwritten; payloads are
    /// immutable so the content cannot differ, and rewriting is cheaper
    /// than comparing.
    pub fn save(&self, id: &FragmentId, payload: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, payload)?;
        crate::metrics::FRAGMENTS_SAVED.inc();
        debug!("saved fragment {} ({} bytes)", id, payload.len());
        Ok(path)
    }

    /// Delete every fragment file of one block.
    ///
    /// No-op when the store keeps local copies. Returns how many files went
    /// away; files that fail to delete are logged and skipped so one stuck
    /// file cannot wedge the restore.
    pub fn cleanup_block(&self, backup: &BackupId, block: u64, slots: usize) -> usize {
        if self.config.keep_local_copies {
            return 0;
        }
        let mut removed = 0;
        for slot in 0..slots {
            for kind in [FragmentKind::Data, FragmentKind::Parity] {
                let path = self.path_for(&backup.fragment(block, slot, kind));
                if !path.is_file() {
                    continue;
                }
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("unable to remove {}: {}", path.display(), e),
                }
            }
        }
        debug!("cleaned up {} fragment files of block {}", removed, block);
        removed
    }

    /// Reserve a staging path for a reassembled block file.
    pub fn temp_block_path(&self, backup: &BackupId, block: u64) -> Result<PathBuf> {
        let dir = self.config.root.join(".tmp");
        fs::create_dir_all(&dir)?;
        let name = format!(
            "restore_{}_{}_{}.raid",
            backup.customer.key_alias,
            block,
            Uuid::new_v4().simple()
        );
        Ok(dir.join(name))
    }

    /// Best-effort removal of a staged block file.
    pub fn discard_temp(&self, path: &Path) {
        if !path.exists() {
            return;
        }
        if let Err(e) = fs::remove_file(path) {
            warn!("unable to remove temp file {}: {}", path.display(), e);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragments::id::CustomerId;
    use tempfile::tempdir;

    fn backup() -> BackupId {
        BackupId::new(
            CustomerId::new("master", "alice", "idhost.org"),
            "0/0/1",
            "F20131120053803PM",
        )
    }

    fn store(root: &Path, keep: bool) -> FragmentStore {
        FragmentStore::new(FragmentStoreConfig {
            root: root.to_path_buf(),
            keep_local_copies: keep,
        })
    }

    #[test]
    fn test_path_layout_matches_id() {
        let dir = tempdir().unwrap();
        let store = store(dir.path(), false);
        let id = backup().fragment(4, 1, FragmentKind::Parity);
        assert_eq!(
            store.path_for(&id),
            dir.path()
                .join("master$alice@idhost.org")
                .join("0/0/1")
                .join("F20131120053803PM")
                .join("4-1-Parity")
        );
    }

    #[test]
    fn test_save_creates_parents_and_scan_sees_it() {
        let dir = tempdir().unwrap();
        let store = store(dir.path(), false);
        let id = backup().fragment(0, 1, FragmentKind::Data);

        assert!(!store.exists(&id));
        store.save(&id, b"payload").unwrap();
        assert!(store.exists(&id));

        let (data, parity) = store.scan_block(&backup(), 0, 2, 2);
        assert_eq!(data, vec![false, true]);
        assert_eq!(parity, vec![false, false]);
    }

    #[test]
    fn test_cleanup_removes_only_this_block() {
        let dir = tempdir().unwrap();
        let store = store(dir.path(), false);
        for slot in 0..2 {
            store
                .save(&backup().fragment(0, slot, FragmentKind::Data), b"a")
                .unwrap();
            store
                .save(&backup().fragment(1, slot, FragmentKind::Data), b"b")
                .unwrap();
        }

        let removed = store.cleanup_block(&backup(), 0, 2);
        assert_eq!(removed, 2);
        assert!(!store.exists(&backup().fragment(0, 0, FragmentKind::Data)));
        assert!(store.exists(&backup().fragment(1, 0, FragmentKind::Data)));
    }

    #[test]
    fn test_cleanup_honors_keep_local_copies() {
        let dir = tempdir().unwrap();
        let store = store(dir.path(), true);
        let id = backup().fragment(0, 0, FragmentKind::Data);
        store.save(&id, b"kept").unwrap();

        assert_eq!(store.cleanup_block(&backup(), 0, 2), 0);
        assert!(store.exists(&id));
    }

    #[test]
    fn test_temp_block_paths_are_unique_and_discardable() {
        let dir = tempdir().unwrap();
        let store = store(dir.path(), false);

        let a = store.temp_block_path(&backup(), 3).unwrap();
        let b = store.temp_block_path(&backup(), 3).unwrap();
        assert_ne!(a, b);
        assert!(a.file_name().unwrap().to_string_lossy().starts_with("restore_master_3_"));

        std::fs::write(&a, b"staged").unwrap();
        store.discard_temp(&a);
        assert!(!a.exists());
        // discarding a non-existent path is quiet
        store.discard_temp(&b);
    }
}
