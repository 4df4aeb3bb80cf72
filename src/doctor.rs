//! Diagnostics for guise.
//!
//! Checks the store layout, the registry document, and every tool's
//! bookkeeping against what is actually on disk. With `--fix`, it clears
//! dangling active pointers and removes abandoned staging directories. It
//! never deletes snapshot content or content moved aside by a failed swap.

use anyhow::Result;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::fs_utils::{Leftover, leftover_kind, list_subdirs, remove_dir_if_exists};
use crate::paths::Paths;
use crate::registry::{LockedRegistry, Registry};
use crate::store::SnapshotStore;
use crate::ui::{Tone, Ui};

/// Run the doctor diagnostics
pub fn run_doctor(paths: &Paths, fix: bool, ui: &Ui) -> Result<()> {
    ui.section("guise Doctor");
    ui.newline();

    check_step(ui, "Directories", || {
        let mut ok = true;
        for (label, dir) in [("Base", &paths.base_dir), ("Store", &paths.store_dir)] {
            if dir.is_dir() {
                ui.println(format!(
                    "  {} {} directory exists: {}",
                    ui.icon(Tone::Good),
                    label,
                    dir.display()
                ));
            } else {
                ui.println(format!(
                    "  {} {} directory missing: {}",
                    ui.icon(Tone::Caution),
                    label,
                    dir.display()
                ));
                ok = false;
            }
        }
        ok
    });

    let mut registry = None;
    check_step(ui, "Registry", || match Registry::read(&paths.config_file) {
        Ok(loaded) => {
            if paths.config_file.exists() {
                ui.println(format!(
                    "  {} Registry readable ({} tools)",
                    ui.icon(Tone::Good),
                    loaded.tools.len()
                ));
            } else {
                ui.println(format!(
                    "  {} Registry missing (fresh install?)",
                    ui.icon(Tone::Caution)
                ));
            }
            registry = Some(loaded);
            true
        }
        Err(e) => {
            ui.println(format!("  {} Registry corrupt: {:#}", ui.icon(Tone::Bad), e));
            false
        }
    });

    let Some(registry) = registry else {
        return Ok(());
    };

    let store = SnapshotStore::new(&paths.store_dir);
    let mut dangling = Vec::new();

    for tool in &registry.tools {
        check_step(ui, &tool.name, || {
            let mut ok = true;

            if tool.live_dir.is_dir() {
                ui.println(format!(
                    "  {} Live directory: {}",
                    ui.icon(Tone::Good),
                    tool.live_dir.display()
                ));
            } else {
                ui.println(format!(
                    "  {} Live directory not present: {}",
                    ui.icon(Tone::Note),
                    tool.live_dir.display()
                ));
            }

            match (&tool.active, tool.active_profile()) {
                (_, Some(profile)) => ui.println(format!(
                    "  {} Active profile: {} ({})",
                    ui.icon(Tone::Good),
                    profile.name,
                    profile.id
                )),
                (Some(id), None) => {
                    ui.println(format!(
                        "  {} Active pointer names unknown profile '{}'",
                        ui.icon(Tone::Bad),
                        id
                    ));
                    dangling.push(tool.id.clone());
                    ok = false;
                }
                (None, None) => {
                    ui.println(format!("  {} No active profile", ui.icon(Tone::Note)))
                }
            }

            for profile in &tool.profiles {
                if !store.exists(&tool.id, &profile.id) {
                    ui.println(format!(
                        "  {} Snapshot missing for '{}' ({})",
                        ui.icon(Tone::Bad),
                        profile.name,
                        profile.id
                    ));
                    ok = false;
                }
            }

            let known: HashSet<&str> = tool.profiles.iter().map(|p| p.id.as_str()).collect();
            match store.list(&tool.id) {
                Ok(stored) => {
                    for orphan in stored.iter().filter(|id| !known.contains(id.as_str())) {
                        ui.println(format!(
                            "  {} Orphaned snapshot: {}",
                            ui.icon(Tone::Caution),
                            paths.tool_store_dir(&tool.id).join(orphan).display()
                        ));
                    }
                }
                Err(e) => {
                    ui.println(format!("  {} Cannot read snapshots: {}", ui.icon(Tone::Bad), e));
                    ok = false;
                }
            }

            ok
        });
    }

    check_step(ui, "Store", || {
        let known: HashSet<&str> = registry.tools.iter().map(|t| t.id.as_str()).collect();
        let mut ok = true;

        match list_subdirs(&paths.store_dir) {
            Ok(dirs) => {
                for dir in dirs.iter().filter(|d| !known.contains(d.as_str())) {
                    ui.println(format!(
                        "  {} Snapshots for unregistered tool: {}",
                        ui.icon(Tone::Caution),
                        dir
                    ));
                }
            }
            Err(e) => {
                ui.println(format!("  {} Cannot read store: {}", ui.icon(Tone::Bad), e));
                return false;
            }
        }

        // Stages live next to their target: inside the store and beside each live dir
        let mut scan_dirs = BTreeSet::new();
        for tool in &registry.tools {
            scan_dirs.insert(paths.tool_store_dir(&tool.id));
            if let Some(parent) = tool.live_dir.parent() {
                scan_dirs.insert(parent.to_path_buf());
            }
        }

        for dir in &scan_dirs {
            for (leftover, kind) in leftovers(dir) {
                match kind {
                    Leftover::Retired => ui.println(format!(
                        "  {} Previous content kept after a failed swap: {}",
                        ui.icon(Tone::Caution),
                        leftover.display()
                    )),
                    Leftover::Stage if fix => match remove_dir_if_exists(&leftover) {
                        Ok(_) => ui.println(format!(
                            "  {} Removed abandoned staging directory {}",
                            ui.icon(Tone::Good),
                            leftover.display()
                        )),
                        Err(e) => {
                            ui.println(format!("  {} {}", ui.icon(Tone::Bad), e));
                            ok = false;
                        }
                    },
                    Leftover::Stage => ui.println(format!(
                        "  {} Abandoned staging directory {} (remove with --fix)",
                        ui.icon(Tone::Caution),
                        leftover.display()
                    )),
                }
            }
        }
        ok
    });

    if dangling.is_empty() {
        return Ok(());
    }

    if !fix {
        ui.println(format!(
            "Run {} to clear dangling active pointers.",
            ui.bold("guise doctor --fix")
        ));
        return Ok(());
    }

    let mut locked = LockedRegistry::lock(&paths.config_file)?;
    for tool_id in &dangling {
        if let Some(tool) = locked.registry_mut().tool_mut(tool_id) {
            if tool.has_dangling_pointer() {
                tool.active = None;
                ui.ok(format!("Cleared dangling active pointer for {}", tool.name));
            }
        }
    }
    locked.save()?;
    Ok(())
}

fn leftovers(dir: &Path) -> Vec<(PathBuf, Leftover)> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let kind = e.file_name().to_str().and_then(leftover_kind)?;
            Some((e.path(), kind))
        })
        .collect()
}

fn check_step<F>(ui: &Ui, name: &str, check_fn: F)
where
    F: FnOnce() -> bool,
{
    ui.println(ui.bold(format!("Checking {}...", name)));
    if !check_fn() {
        ui.println(ui.paint("  Issues detected!", Tone::Bad));
    }
    ui.newline();
}
