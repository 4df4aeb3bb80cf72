//! Snapshot store.
//!
//! A snapshot is a plain directory tree at `<root>/<tool id>/<profile id>`.
//! Both identifiers are validated as single path segments, so the mapping is
//! deterministic and two different pairs can never share a directory.
//!
//! `save` and `restore` both replace their target wholesale: the new tree is
//! copied into a staging directory first and only renamed over the target
//! once the copy has finished.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{IoContext, StoreError, StoreResult};
use crate::fs_utils::{
    copy_tree, dir_size, list_subdirs, remove_dir_if_exists, stage_dir, swap_into_place,
};

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Location of the snapshot for `(tool_id, profile_id)`
    pub fn snapshot_dir(&self, tool_id: &str, profile_id: &str) -> StoreResult<PathBuf> {
        validate_segment("tool", tool_id)?;
        validate_segment("profile", profile_id)?;
        Ok(self.root.join(tool_id).join(profile_id))
    }

    pub fn exists(&self, tool_id: &str, profile_id: &str) -> bool {
        self.snapshot_dir(tool_id, profile_id)
            .map(|dir| dir.is_dir())
            .unwrap_or(false)
    }

    /// Replace the snapshot with a copy of `source`.
    ///
    /// A missing `source` yields an empty snapshot rather than an error.
    pub fn save(&self, tool_id: &str, profile_id: &str, source: &Path) -> StoreResult<()> {
        let dst = self.snapshot_dir(tool_id, profile_id)?;
        let staged = stage_dir(&dst)?;

        if source.exists() {
            copy_tree(source, staged.path())?;
        } else {
            debug!(source = %source.display(), "source missing, saving empty snapshot");
        }

        swap_into_place(staged, &dst)?;
        info!(tool = tool_id, profile = profile_id, "snapshot saved");
        Ok(())
    }

    /// Replace the snapshot with an empty directory.
    pub fn save_empty(&self, tool_id: &str, profile_id: &str) -> StoreResult<()> {
        let dst = self.snapshot_dir(tool_id, profile_id)?;
        swap_into_place(stage_dir(&dst)?, &dst)?;
        info!(tool = tool_id, profile = profile_id, "empty snapshot created");
        Ok(())
    }

    /// Replace everything at `destination` with the snapshot's content.
    ///
    /// # Errors
    /// `NotFound` if the snapshot does not exist; `destination` is untouched
    /// in that case and on any copy failure.
    pub fn restore(&self, tool_id: &str, profile_id: &str, destination: &Path) -> StoreResult<()> {
        let src = self.snapshot_dir(tool_id, profile_id)?;
        if !src.is_dir() {
            return Err(StoreError::NotFound(src));
        }

        let staged = stage_dir(destination)?;
        copy_tree(&src, staged.path())?;
        swap_into_place(staged, destination)?;

        info!(
            tool = tool_id,
            profile = profile_id,
            destination = %destination.display(),
            "snapshot restored"
        );
        Ok(())
    }

    /// Remove the snapshot. Removing an absent snapshot succeeds.
    ///
    /// Returns whether a snapshot was actually removed.
    pub fn delete(&self, tool_id: &str, profile_id: &str) -> StoreResult<bool> {
        let dir = self.snapshot_dir(tool_id, profile_id)?;
        let removed = remove_dir_if_exists(&dir)?;
        if removed {
            info!(tool = tool_id, profile = profile_id, "snapshot deleted");
        } else {
            debug!(tool = tool_id, profile = profile_id, "snapshot already absent");
        }
        Ok(removed)
    }

    /// Profile ids that have a snapshot directory for this tool
    pub fn list(&self, tool_id: &str) -> StoreResult<Vec<String>> {
        validate_segment("tool", tool_id)?;
        list_subdirs(&self.root.join(tool_id))
    }

    /// Total bytes held by one snapshot
    pub fn size(&self, tool_id: &str, profile_id: &str) -> StoreResult<u64> {
        let dir = self.snapshot_dir(tool_id, profile_id)?;
        if !dir.is_dir() {
            return Err(StoreError::NotFound(dir));
        }
        dir_size(&dir).io_context(|| format!("Failed to measure {}", dir.display()))
    }
}

fn validate_segment(kind: &str, id: &str) -> StoreResult<()> {
    let bad = id.is_empty()
        || id == "."
        || id == ".."
        || id.starts_with('.')
        || id.contains(['/', '\\'])
        || id.contains('\0');
    if bad {
        return Err(StoreError::invalid(format!(
            "'{id}' is not a valid {kind} identifier"
        )));
    }
    Ok(())
}
