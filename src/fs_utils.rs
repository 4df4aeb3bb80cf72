//! Filesystem primitives shared by the snapshot store and the engine.
//!
//! `copy_tree` is a one-way overlay copy. `stage_dir` and `swap_into_place`
//! let callers build a complete tree off to the side and move it over the
//! real location with a rename, so a failed copy never leaves the target
//! half-written.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::{IoContext, StoreError, StoreResult};

/// Recursively calculate the total size of a directory in bytes
pub fn dir_size(path: &Path) -> std::io::Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_file() {
            total += metadata.len();
        } else if metadata.is_dir() {
            total += dir_size(&entry.path())?;
        }
    }
    Ok(total)
}

/// Recursively copy everything under `src` into `dst`.
///
/// `dst` and any missing parents are created. Files that collide are
/// overwritten, files that exist only under `dst` are left alone. Regular
/// files are copied by content; symlinks are followed and permission bits
/// are not carried over.
///
/// # Errors
/// - `NotFound` if `src` does not exist
/// - `InvalidState` if `src` is not a directory or `dst` lies inside `src`
/// - `Io` for any read or write failure; `dst` may then be partially written
pub fn copy_tree(src: &Path, dst: &Path) -> StoreResult<()> {
    let meta = match fs::metadata(src) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::NotFound(src.to_path_buf()));
        }
        Err(e) => return Err(e).io_context(|| format!("Failed to stat {}", src.display())),
    };
    if !meta.is_dir() {
        return Err(StoreError::invalid(format!(
            "source is not a directory: {}",
            src.display()
        )));
    }

    let abs_src = std::path::absolute(src)
        .io_context(|| format!("Failed to resolve {}", src.display()))?;
    let abs_dst = std::path::absolute(dst)
        .io_context(|| format!("Failed to resolve {}", dst.display()))?;
    if abs_dst.starts_with(&abs_src) {
        return Err(StoreError::invalid(format!(
            "cannot copy {} into its own subtree {}",
            src.display(),
            dst.display()
        )));
    }

    debug!(src = %src.display(), dst = %dst.display(), "copying tree");
    copy_tree_inner(src, dst)
}

fn copy_tree_inner(src: &Path, dst: &Path) -> StoreResult<()> {
    fs::create_dir_all(dst)
        .io_context(|| format!("Failed to create directory {}", dst.display()))?;

    let entries =
        fs::read_dir(src).io_context(|| format!("Failed to read directory {}", src.display()))?;
    for entry in entries {
        let entry = entry.io_context(|| format!("Failed to read entry in {}", src.display()))?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if src_path.is_dir() {
            copy_tree_inner(&src_path, &dst_path)?;
        } else {
            let bytes = fs::read(&src_path)
                .io_context(|| format!("Failed to read {}", src_path.display()))?;
            fs::write(&dst_path, bytes)
                .io_context(|| format!("Failed to write {}", dst_path.display()))?;
        }
    }

    Ok(())
}

/// Create an empty hidden staging directory next to `target`.
///
/// Living in the same parent keeps the final rename on one filesystem.
/// The directory is removed on drop unless it has been moved into place.
pub fn stage_dir(target: &Path) -> StoreResult<TempDir> {
    let (parent, name) = split_target(target)?;
    fs::create_dir_all(parent)
        .io_context(|| format!("Failed to create directory {}", parent.display()))?;

    tempfile::Builder::new()
        .prefix(&format!(".{name}.guise-stage-"))
        .tempdir_in(parent)
        .io_context(|| format!("Failed to create staging directory in {}", parent.display()))
}

/// Replace whatever is at `target` with the staged tree.
///
/// The old content is renamed aside first and only discarded once the staged
/// tree is in place; if the second rename fails the old content is put back.
pub fn swap_into_place(staged: TempDir, target: &Path) -> StoreResult<()> {
    let (parent, name) = split_target(target)?;

    if fs::symlink_metadata(target).is_err() {
        fs::rename(staged.path(), target).io_context(|| {
            format!("Failed to move staged tree into {}", target.display())
        })?;
        debug!(target = %target.display(), "staged tree moved into place");
        return Ok(());
    }

    let retired = tempfile::Builder::new()
        .prefix(&format!(".{name}.guise-old-"))
        .tempdir_in(parent)
        .io_context(|| format!("Failed to create directory in {}", parent.display()))?;
    let old = retired.path().join("content");

    fs::rename(target, &old)
        .io_context(|| format!("Failed to move {} aside", target.display()))?;

    if let Err(e) = fs::rename(staged.path(), target) {
        if let Err(undo) = fs::rename(&old, target) {
            warn!(
                target = %target.display(),
                kept_at = %old.display(),
                error = %undo,
                "could not put previous content back"
            );
            // Keep the previous content on disk rather than deleting it with the tempdir.
            let _ = retired.keep();
        }
        return Err(e).io_context(|| format!("Failed to move staged tree into {}", target.display()));
    }

    let retired_path = retired.path().to_path_buf();
    if let Err(e) = retired.close() {
        warn!(path = %retired_path.display(), error = %e, "failed to remove replaced content");
    }
    debug!(target = %target.display(), "replaced with staged tree");
    Ok(())
}

/// Replace `target` with an empty directory.
pub fn reset_dir(target: &Path) -> StoreResult<()> {
    let staged = stage_dir(target)?;
    swap_into_place(staged, target)
}

/// Remove a directory tree; a missing path is not an error.
///
/// Returns whether anything was removed.
pub fn remove_dir_if_exists(path: &Path) -> StoreResult<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).io_context(|| format!("Failed to remove {}", path.display())),
    }
}

/// Directories that staged replacement leaves beside a target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leftover {
    /// A tree that was never moved into place; safe to remove
    Stage,
    /// Content moved aside during a swap. Only survives when the swap could
    /// not be undone, so it may hold the sole copy of the previous tree.
    Retired,
}

/// Classify a directory entry name left behind by [`stage_dir`] or [`swap_into_place`].
pub fn leftover_kind(name: &str) -> Option<Leftover> {
    if !name.starts_with('.') {
        None
    } else if name.contains(".guise-stage-") {
        Some(Leftover::Stage)
    } else if name.contains(".guise-old-") {
        Some(Leftover::Retired)
    } else {
        None
    }
}

fn split_target(target: &Path) -> StoreResult<(&Path, String)> {
    let parent = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            StoreError::invalid(format!("path has no usable final component: {}", target.display()))
        })?
        .to_string();
    Ok((parent, name))
}

/// List the plain (non-hidden) subdirectory names of `path`, sorted.
pub fn list_subdirs(path: &Path) -> StoreResult<Vec<String>> {
    let mut names = Vec::new();
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(e).io_context(|| format!("Failed to read {}", path.display())),
    };
    for entry in entries {
        let entry = entry.io_context(|| format!("Failed to read entry in {}", path.display()))?;
        let entry_path: PathBuf = entry.path();
        if !entry_path.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if !name.starts_with('.') {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_copy_tree_nested() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        write(&src.join("file.txt"), "hello");
        write(&src.join("subdir").join("subfile.txt"), "world");

        copy_tree(&src, &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("file.txt")).unwrap(), "hello");
        assert_eq!(
            fs::read_to_string(dst.join("subdir").join("subfile.txt")).unwrap(),
            "world"
        );
    }

    #[test]
    fn test_copy_tree_creates_missing_parents() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        write(&src.join("a.txt"), "1");
        let dst = temp.path().join("deep").join("er").join("dst");

        copy_tree(&src, &dst).unwrap();
        assert!(dst.join("a.txt").is_file());
    }

    #[test]
    fn test_copy_tree_missing_source() {
        let temp = TempDir::new().unwrap();
        let err = copy_tree(&temp.path().join("nope"), &temp.path().join("dst")).unwrap_err();
        assert!(err.is_not_found());
        assert!(!temp.path().join("dst").exists());
    }

    #[test]
    fn test_copy_tree_is_overlay() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        write(&src.join("shared.txt"), "new");
        write(&dst.join("shared.txt"), "old");
        write(&dst.join("only-dst.txt"), "keep");

        copy_tree(&src, &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("shared.txt")).unwrap(), "new");
        assert_eq!(fs::read_to_string(dst.join("only-dst.txt")).unwrap(), "keep");
    }

    #[test]
    fn test_copy_tree_rejects_own_subtree() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        write(&src.join("a.txt"), "1");

        let err = copy_tree(&src, &src.join("inner")).unwrap_err();
        assert!(matches!(err, StoreError::InvalidState(_)));
    }

    #[test]
    fn test_copy_tree_rejects_file_source() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("file.txt");
        write(&src, "x");

        let err = copy_tree(&src, &temp.path().join("dst")).unwrap_err();
        assert!(matches!(err, StoreError::InvalidState(_)));
    }

    #[test]
    fn test_swap_replaces_existing_tree() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("live");
        write(&target.join("stale.txt"), "old");

        let staged = stage_dir(&target).unwrap();
        fs::write(staged.path().join("fresh.txt"), "new").unwrap();
        swap_into_place(staged, &target).unwrap();

        assert!(!target.join("stale.txt").exists());
        assert_eq!(fs::read_to_string(target.join("fresh.txt")).unwrap(), "new");

        // Neither the stage nor the retired tree is left behind
        let leftovers: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| leftover_kind(e.file_name().to_str().unwrap()).is_some())
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_swap_into_missing_target() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("nested").join("live");

        let staged = stage_dir(&target).unwrap();
        fs::write(staged.path().join("a.txt"), "1").unwrap();
        swap_into_place(staged, &target).unwrap();

        assert_eq!(fs::read_to_string(target.join("a.txt")).unwrap(), "1");
    }

    #[test]
    fn test_dropped_stage_leaves_target_alone() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("live");
        write(&target.join("a.txt"), "1");

        {
            let staged = stage_dir(&target).unwrap();
            fs::write(staged.path().join("b.txt"), "2").unwrap();
        }

        assert_eq!(fs::read_to_string(target.join("a.txt")).unwrap(), "1");
        assert!(!target.join("b.txt").exists());
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_reset_dir() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("live");
        write(&target.join("sub").join("a.txt"), "1");

        reset_dir(&target).unwrap();

        assert!(target.is_dir());
        assert_eq!(fs::read_dir(&target).unwrap().count(), 0);
    }

    #[test]
    fn test_remove_dir_if_exists() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("gone");
        write(&dir.join("a.txt"), "1");

        assert!(remove_dir_if_exists(&dir).unwrap());
        assert!(!remove_dir_if_exists(&dir).unwrap());
    }

    #[test]
    fn test_list_subdirs_skips_hidden_and_files() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("b")).unwrap();
        fs::create_dir_all(temp.path().join("a")).unwrap();
        fs::create_dir_all(temp.path().join(".a.guise-stage-xyz")).unwrap();
        write(&temp.path().join("file.txt"), "x");

        assert_eq!(list_subdirs(temp.path()).unwrap(), vec!["a", "b"]);
        assert!(list_subdirs(&temp.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn test_leftover_kind() {
        assert_eq!(leftover_kind(".codex.guise-stage-a1b2"), Some(Leftover::Stage));
        assert_eq!(leftover_kind(".codex.guise-old-a1b2"), Some(Leftover::Retired));
        assert_eq!(leftover_kind(".codex"), None);
        assert_eq!(leftover_kind("codex.guise-stage-a1b2"), None);
    }

    #[test]
    fn test_dir_size() {
        let temp = TempDir::new().unwrap();
        write(&temp.path().join("a.txt"), "12345");
        write(&temp.path().join("sub").join("b.txt"), "123");

        assert_eq!(dir_size(temp.path()).unwrap(), 8);
    }
}
