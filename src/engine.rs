//! Profile activation engine.
//!
//! Moves a tool's live directory between profiles while keeping its active
//! pointer honest:
//! - the outgoing profile is always backed up before the live directory is
//!   replaced, so in-place edits survive a switch;
//! - the live directory is only replaced once the incoming tree has been
//!   copied in full (see [`SnapshotStore::restore`]);
//! - the tool record is only changed after the filesystem work succeeded.
//!
//! The engine mutates exactly the `Tool` it is handed and never persists the
//! registry; that is left to the caller.

use chrono::Utc;
use tracing::{info, warn};

use crate::error::{StoreError, StoreResult};
use crate::fs_utils::reset_dir;
use crate::registry::{Profile, Tool};
use crate::store::SnapshotStore;

/// Outcome of [`Engine::activate_profile`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Switch {
    /// The requested profile was already active; nothing was touched
    AlreadyActive,
    /// The live directory now holds the requested profile
    Switched { previous: Option<String> },
}

/// Outcome of [`Engine::delete_profile`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deletion {
    pub profile: Profile,
    pub was_active: bool,
    pub snapshot_removed: bool,
}

/// How a new profile got its initial content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seed {
    /// First profile of the tool, captured from the live directory
    Captured,
    /// First profile, but the live directory was unreadable
    EmptyFallback,
    /// Live directory cleared, profile starts blank
    Blank,
}

#[derive(Debug, Clone)]
pub struct Created {
    pub profile: Profile,
    pub seed: Seed,
}

pub struct Engine<'a> {
    store: &'a SnapshotStore,
}

impl<'a> Engine<'a> {
    pub fn new(store: &'a SnapshotStore) -> Self {
        Self { store }
    }

    /// Create a profile named `name` and make it the active one.
    ///
    /// The first profile of a tool captures whatever is in the live
    /// directory. Any later profile starts blank and clears the live
    /// directory, after the previously active profile has been backed up.
    pub fn create_profile(&self, tool: &mut Tool, name: &str) -> StoreResult<Created> {
        ensure_consistent(tool)?;

        if let Some(active) = tool.active.as_deref() {
            self.store.save(&tool.id, active, &tool.live_dir)?;
        }

        let id = next_profile_id(tool);
        self.store.snapshot_dir(&tool.id, &id)?;
        let seed = if tool.profiles.is_empty() {
            match self.store.save(&tool.id, &id, &tool.live_dir) {
                Ok(()) => Seed::Captured,
                Err(e) => {
                    warn!(
                        tool = %tool.id,
                        live_dir = %tool.live_dir.display(),
                        error = %e,
                        "could not capture live directory, starting with an empty profile"
                    );
                    self.store.save_empty(&tool.id, &id)?;
                    Seed::EmptyFallback
                }
            }
        } else {
            if tool.active.is_none() && tool.live_dir.exists() {
                warn!(
                    tool = %tool.id,
                    live_dir = %tool.live_dir.display(),
                    "clearing live directory that is not stored in any profile"
                );
            }
            self.store.save_empty(&tool.id, &id)?;
            if let Err(e) = reset_dir(&tool.live_dir) {
                if let Err(cleanup) = self.store.delete(&tool.id, &id) {
                    warn!(
                        tool = %tool.id,
                        profile = %id,
                        error = %cleanup,
                        "failed to remove snapshot of abandoned profile"
                    );
                }
                return Err(e);
            }
            Seed::Blank
        };

        let profile = Profile {
            id: id.clone(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        tool.profiles.push(profile.clone());
        tool.active = Some(id);

        info!(tool = %tool.id, profile = %profile.id, name = %profile.name, ?seed, "profile created");
        Ok(Created { profile, seed })
    }

    /// Materialize `target` into the live directory.
    ///
    /// On failure the active pointer is left unchanged. The outgoing
    /// profile's backup, if it already happened, is kept.
    pub fn activate_profile(&self, tool: &mut Tool, target: &str) -> StoreResult<Switch> {
        ensure_consistent(tool)?;
        if !tool.has_profile(target) {
            return Err(not_listed(tool, target));
        }
        if tool.is_active(target) {
            return Ok(Switch::AlreadyActive);
        }

        let previous = tool.active.clone();
        if let Some(active) = previous.as_deref() {
            self.store.save(&tool.id, active, &tool.live_dir)?;
        }

        self.store.restore(&tool.id, target, &tool.live_dir)?;
        tool.active = Some(target.to_string());

        info!(tool = %tool.id, from = ?previous, to = target, "profile activated");
        Ok(Switch::Switched { previous })
    }

    /// Delete a profile and its snapshot.
    ///
    /// Deleting the active profile clears the pointer but leaves the live
    /// directory as it is.
    pub fn delete_profile(&self, tool: &mut Tool, profile_id: &str) -> StoreResult<Deletion> {
        let Some(index) = tool.profiles.iter().position(|p| p.id == profile_id) else {
            return Err(not_listed(tool, profile_id));
        };

        let snapshot_removed = self.store.delete(&tool.id, profile_id)?;
        let profile = tool.profiles.remove(index);
        let was_active = tool.is_active(profile_id);
        if was_active {
            tool.active = None;
        }

        info!(tool = %tool.id, profile = profile_id, was_active, "profile deleted");
        Ok(Deletion {
            profile,
            was_active,
            snapshot_removed,
        })
    }

    /// Change a profile's display name. No files move.
    pub fn rename_profile(
        &self,
        tool: &mut Tool,
        profile_id: &str,
        name: &str,
    ) -> StoreResult<()> {
        if !tool.has_profile(profile_id) {
            return Err(not_listed(tool, profile_id));
        }
        if let Some(profile) = tool.profile_mut(profile_id) {
            profile.name = name.to_string();
        }
        Ok(())
    }
}

fn ensure_consistent(tool: &Tool) -> StoreResult<()> {
    if tool.has_dangling_pointer() {
        return Err(StoreError::invalid(format!(
            "{} points at unknown profile '{}' (run 'guise doctor --fix')",
            tool.name,
            tool.active.as_deref().unwrap_or_default()
        )));
    }
    Ok(())
}

fn not_listed(tool: &Tool, profile_id: &str) -> StoreError {
    StoreError::invalid(format!(
        "profile '{profile_id}' is not registered for {}",
        tool.name
    ))
}

/// `profile_<unix nanos>`, bumped until unique within the tool
fn next_profile_id(tool: &Tool) -> String {
    let now = Utc::now();
    let mut stamp = now
        .timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1000));
    loop {
        let id = format!("profile_{stamp}");
        if !tool.has_profile(&id) {
            return id;
        }
        stamp += 1;
    }
}
