//! Handlers for each CLI subcommand.
//!
//! Every handler opens the registry under an exclusive lock, resolves the
//! tool and profile, hands the tool record to the engine, and saves the
//! registry only if the engine succeeded. Engine failures are reported to
//! the user and returned as errors.

use anyhow::{Context, Result, bail};
use inquire::{Confirm, Select};
use std::fmt;

use crate::doctor::run_doctor;
use crate::engine::{Engine, Seed, Switch};
use crate::paths::Paths;
use crate::registry::{LockedRegistry, Tool, default_tools};
use crate::store::SnapshotStore;
use crate::ui::{Tone, Ui};

/// Lock the registry, merging in any default tool that is missing
pub fn open_registry(paths: &Paths) -> Result<LockedRegistry> {
    paths.ensure_dirs()?;

    let mut locked = LockedRegistry::lock(&paths.config_file)?;
    let added = locked
        .registry_mut()
        .merge_defaults(default_tools(&paths.home_dir));
    if added || locked.is_fresh() {
        locked.save()?;
    }
    Ok(locked)
}

fn snapshot_store(paths: &Paths) -> SnapshotStore {
    SnapshotStore::new(&paths.store_dir)
}

/// Show every managed tool
pub fn tools(paths: &Paths, ui: &Ui) -> Result<()> {
    let locked = open_registry(paths)?;
    let registry = locked.registry();

    let mut table = ui.table();
    table.set_header(vec![
        ui.header_cell("Tool"),
        ui.header_cell("Name"),
        ui.header_cell("Live directory"),
        ui.header_cell("Profiles"),
        ui.header_cell("Active"),
    ]);

    for tool in &registry.tools {
        table.add_row(vec![
            ui.cell(&tool.id),
            ui.cell(&tool.name),
            ui.cell(tool.live_dir.display().to_string()),
            ui.cell(tool.profiles.len().to_string()),
            active_cell(tool, ui),
        ]);
    }

    ui.section("Tools");
    ui.println(table.to_string());
    Ok(())
}

fn active_cell(tool: &Tool, ui: &Ui) -> comfy_table::Cell {
    match (&tool.active, tool.active_profile()) {
        (_, Some(profile)) => ui.tone_cell(display_name(&profile.name), Tone::Good),
        (Some(id), None) => ui.tone_cell(format!("missing profile {}", id), Tone::Bad),
        (None, None) => ui.tone_cell("none", Tone::Muted),
    }
}

fn display_name(name: &str) -> &str {
    if name.is_empty() { "(unnamed)" } else { name }
}

/// List the profiles of one tool
pub fn list(paths: &Paths, tool_id: &str, ui: &Ui) -> Result<()> {
    let locked = open_registry(paths)?;
    let tool = locked.registry().require_tool(tool_id)?;

    if tool.profiles.is_empty() {
        if tool.live_dir.exists() {
            ui.info(format!(
                "Existing config detected at {}",
                tool.live_dir.display()
            ));
            ui.println("Save it as the first profile with:");
        } else {
            ui.warn(format!("No profiles for {} yet.", tool.name));
            ui.println("Start fresh with:");
        }
        ui.println(format!(
            "  {} create {} <name>",
            ui.bold("guise"),
            tool.id
        ));
        return Ok(());
    }

    let mut table = ui.simple_table();
    table.set_header(vec![
        ui.header_cell(""),
        ui.header_cell("Id"),
        ui.header_cell("Name"),
        ui.header_cell("Created"),
        ui.header_cell("Status"),
    ]);

    for profile in &tool.profiles {
        let is_active = tool.is_active(&profile.id);
        table.add_row(vec![
            ui.tone_cell(if is_active { ui.active_marker() } else { " " }, Tone::Good),
            ui.cell(&profile.id),
            ui.cell(display_name(&profile.name)),
            ui.cell(profile.created_at.format("%Y-%m-%d %H:%M").to_string()),
            if is_active {
                ui.tone_cell("active", Tone::Good)
            } else {
                ui.cell("-")
            },
        ]);
    }

    ui.section(format!("Profiles: {}", tool.name));
    ui.println(table.to_string());
    Ok(())
}

/// Show which profile is live for every tool
pub fn current(paths: &Paths, ui: &Ui) -> Result<()> {
    let locked = open_registry(paths)?;

    ui.section("Active Profiles");
    ui.newline();

    let mut table = ui.simple_table();
    for tool in &locked.registry().tools {
        let live = if tool.live_dir.exists() {
            ui.cell(tool.live_dir.display().to_string())
        } else {
            ui.tone_cell(format!("{} (missing)", tool.live_dir.display()), Tone::Caution)
        };
        table.add_row(vec![ui.cell(format!("{}:", tool.name)), active_cell(tool, ui), live]);
    }

    ui.println(table.to_string());
    Ok(())
}

/// Create a profile and make it active
pub fn create(paths: &Paths, tool_id: &str, name: &str, ui: &Ui) -> Result<()> {
    let mut locked = open_registry(paths)?;
    let store = snapshot_store(paths);
    let engine = Engine::new(&store);

    let tool = locked.registry_mut().require_tool_mut(tool_id)?;
    let tool_name = tool.name.clone();
    let live_dir = tool.live_dir.clone();

    let spinner = ui.spinner(format!("Creating profile '{}' for {}...", name, tool_name));
    let created = match engine.create_profile(tool, name) {
        Ok(created) => created,
        Err(e) => {
            ui.spinner_finish_err(&spinner, format!("Failed to create profile: {}", e));
            return Err(e).with_context(|| {
                format!(
                    "Could not create profile '{}' for {}.\nHint: Inspect {} before retrying.",
                    name,
                    tool_name,
                    live_dir.display()
                )
            });
        }
    };
    locked.save()?;

    let label = display_name(&created.profile.name).to_string();
    match created.seed {
        Seed::Captured => ui.spinner_finish_ok(
            &spinner,
            format!("Created profile '{}' from {}", label, live_dir.display()),
        ),
        Seed::EmptyFallback => {
            spinner.finish_and_clear();
            ui.warn(format!(
                "Created profile '{}' empty: {} could not be read",
                label,
                live_dir.display()
            ));
        }
        Seed::Blank => ui.spinner_finish_ok(
            &spinner,
            format!(
                "Created blank profile '{}'; {} now starts empty",
                label,
                live_dir.display()
            ),
        ),
    }
    ui.println(format!("  {} {}", ui.paint("id:", Tone::Muted), created.profile.id));
    Ok(())
}

/// A profile as offered by the interactive picker
struct ProfileChoice {
    id: String,
    label: String,
}

impl fmt::Display for ProfileChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

fn select_profile(tool: &Tool) -> Result<String> {
    if tool.profiles.is_empty() {
        bail!(
            "{} has no profiles.\nHint: Create one with 'guise create {} <name>'.",
            tool.name,
            tool.id
        );
    }

    let choices: Vec<ProfileChoice> = tool
        .profiles
        .iter()
        .map(|p| ProfileChoice {
            id: p.id.clone(),
            label: format!(
                "{} ({}){}",
                display_name(&p.name),
                p.id,
                if tool.is_active(&p.id) { " [active]" } else { "" }
            ),
        })
        .collect();
    let start = tool
        .profiles
        .iter()
        .position(|p| tool.is_active(&p.id))
        .unwrap_or(0);

    let choice = Select::new(&format!("Switch {} to which profile?", tool.name), choices)
        .with_starting_cursor(start)
        .prompt()
        .context("Profile selection cancelled")?;
    Ok(choice.id)
}

/// Switch a tool to a profile
pub fn use_profile(paths: &Paths, tool_id: &str, query: Option<&str>, ui: &Ui) -> Result<()> {
    let mut locked = open_registry(paths)?;
    let store = snapshot_store(paths);
    let engine = Engine::new(&store);

    let tool = locked.registry_mut().require_tool_mut(tool_id)?;
    let target = match query {
        Some(q) => tool.resolve_profile(q)?.id.clone(),
        None => select_profile(tool)?,
    };
    let label = tool
        .profile(&target)
        .map(|p| display_name(&p.name).to_string())
        .unwrap_or_else(|| target.clone());
    let tool_name = tool.name.clone();
    let live_dir = tool.live_dir.clone();

    let spinner = ui.spinner(format!("Switching {} to '{}'...", tool_name, label));
    match engine.activate_profile(tool, &target) {
        Ok(Switch::AlreadyActive) => {
            spinner.finish_and_clear();
            ui.info(format!("'{}' is already active for {}", label, tool_name));
            Ok(())
        }
        Ok(Switch::Switched { .. }) => {
            locked.save()?;
            ui.spinner_finish_ok(&spinner, format!("Active profile for {}: {}", tool_name, label));
            Ok(())
        }
        Err(e) => {
            ui.spinner_finish_err(&spinner, format!("Failed to switch: {}", e));
            Err(e).with_context(|| {
                format!(
                    "Could not switch {} to '{}'.\nHint: Inspect {} or run 'guise doctor'.",
                    tool_name,
                    label,
                    live_dir.display()
                )
            })
        }
    }
}

/// Delete a profile and its snapshot
pub fn delete(paths: &Paths, tool_id: &str, query: &str, force: bool, ui: &Ui) -> Result<()> {
    let mut locked = open_registry(paths)?;
    let store = snapshot_store(paths);
    let engine = Engine::new(&store);

    let tool = locked.registry_mut().require_tool_mut(tool_id)?;
    let profile = tool.resolve_profile(query)?;
    let target = profile.id.clone();
    let label = display_name(&profile.name).to_string();

    if !force {
        let confirm = Confirm::new(&format!(
            "Delete profile '{}' ({}) of {}?",
            label, target, tool.name
        ))
        .with_default(false)
        .with_help_message("This permanently removes the stored snapshot")
        .prompt()
        .context("Confirmation cancelled")?;

        if !confirm {
            ui.warn("Deletion cancelled.");
            return Ok(());
        }
    }

    let live_dir = tool.live_dir.clone();
    let tool_name = tool.name.clone();
    let deletion = engine
        .delete_profile(tool, &target)
        .with_context(|| format!("Could not delete profile '{}'", label))?;
    locked.save()?;

    ui.ok(format!("Deleted profile '{}'", label));
    if deletion.was_active {
        ui.info(format!(
            "{} was left as is; no profile is active for {} now",
            live_dir.display(),
            tool_name
        ));
    }
    Ok(())
}

/// Change a profile's display name
pub fn rename(paths: &Paths, tool_id: &str, query: &str, new_name: &str, ui: &Ui) -> Result<()> {
    let mut locked = open_registry(paths)?;
    let store = snapshot_store(paths);
    let engine = Engine::new(&store);

    let tool = locked.registry_mut().require_tool_mut(tool_id)?;
    let profile = tool.resolve_profile(query)?;
    let target = profile.id.clone();
    let old = display_name(&profile.name).to_string();

    engine.rename_profile(tool, &target, new_name)?;
    locked.save()?;

    ui.ok(format!("Renamed '{}' to '{}'", old, display_name(new_name)));
    Ok(())
}

/// Show details of one profile
pub fn inspect(paths: &Paths, tool_id: &str, query: &str, ui: &Ui) -> Result<()> {
    let locked = open_registry(paths)?;
    let store = snapshot_store(paths);

    let tool = locked.registry().require_tool(tool_id)?;
    let profile = tool.resolve_profile(query)?;
    let snapshot = store.snapshot_dir(&tool.id, &profile.id)?;

    ui.section(format!("Profile: {}", display_name(&profile.name)));
    ui.newline();

    let mut table = ui.simple_table();
    table.add_row(vec![ui.cell("Tool:"), ui.cell(&tool.name)]);
    table.add_row(vec![ui.cell("Id:"), ui.cell(&profile.id)]);
    table.add_row(vec![
        ui.cell("Created:"),
        ui.cell(profile.created_at.format("%Y-%m-%d %H:%M:%S").to_string()),
    ]);
    table.add_row(vec![
        ui.cell("Status:"),
        if tool.is_active(&profile.id) {
            ui.tone_cell(format!("active in {}", tool.live_dir.display()), Tone::Good)
        } else {
            ui.cell("stored")
        },
    ]);
    table.add_row(vec![ui.cell("Snapshot:"), ui.cell(snapshot.display().to_string())]);

    let size_cell = match store.size(&tool.id, &profile.id) {
        Ok(bytes) => ui.cell(format_bytes(bytes)),
        Err(e) if e.is_not_found() => ui.tone_cell("missing", Tone::Bad),
        Err(e) => return Err(e).context("Failed to measure snapshot"),
    };
    table.add_row(vec![ui.cell("Size:"), size_cell]);

    ui.println(table.to_string());
    if tool.is_active(&profile.id) {
        ui.newline();
        ui.println(ui.paint(
            "The snapshot is refreshed from the live directory on the next switch.",
            Tone::Muted,
        ));
    }
    Ok(())
}

/// Format bytes as human-readable string
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Run diagnostics, optionally repairing what can be repaired safely
pub fn doctor(paths: &Paths, fix: bool, ui: &Ui) -> Result<()> {
    run_doctor(paths, fix, ui)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::test_utils::setup_test_paths;
    use crate::ui::ColorMode;
    use std::fs;
    use tempfile::TempDir;

    const TOOL: &str = "openai-codex";

    fn test_ui() -> Ui {
        Ui::new(ColorMode::Never, false)
    }

    fn codex(paths: &Paths) -> Tool {
        Registry::read(&paths.config_file)
            .unwrap()
            .tool(TOOL)
            .unwrap()
            .clone()
    }

    #[test]
    fn test_open_registry_seeds_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let paths = setup_test_paths(&temp_dir);

        drop(open_registry(&paths).unwrap());

        let registry = Registry::read(&paths.config_file).unwrap();
        assert_eq!(registry.tools.len(), 4);
        assert_eq!(
            registry.tool(TOOL).unwrap().live_dir,
            temp_dir.path().join(".codex")
        );
        assert!(paths.store_dir.is_dir());
    }

    #[test]
    fn test_listing_commands_on_fresh_setup() {
        let temp_dir = TempDir::new().unwrap();
        let paths = setup_test_paths(&temp_dir);
        let ui = test_ui();

        assert!(tools(&paths, &ui).is_ok());
        assert!(current(&paths, &ui).is_ok());
        assert!(list(&paths, TOOL, &ui).is_ok());
        assert!(list(&paths, "no-such-tool", &ui).is_err());
    }

    #[test]
    fn test_create_use_delete_flow() {
        let temp_dir = TempDir::new().unwrap();
        let paths = setup_test_paths(&temp_dir);
        let ui = test_ui();
        let live = temp_dir.path().join(".codex");
        fs::create_dir_all(&live).unwrap();
        fs::write(live.join("auth.json"), r#"{"user": "work"}"#).unwrap();

        create(&paths, TOOL, "work", &ui).unwrap();
        create(&paths, TOOL, "personal", &ui).unwrap();
        let tool = codex(&paths);
        assert_eq!(tool.profiles.len(), 2);
        assert_eq!(tool.active_profile().unwrap().name, "personal");
        assert!(!live.join("auth.json").exists());

        use_profile(&paths, TOOL, Some("work"), &ui).unwrap();
        assert_eq!(codex(&paths).active_profile().unwrap().name, "work");
        assert_eq!(
            fs::read_to_string(live.join("auth.json")).unwrap(),
            r#"{"user": "work"}"#
        );

        // Switching to the active profile again is fine
        use_profile(&paths, TOOL, Some("work"), &ui).unwrap();

        list(&paths, TOOL, &ui).unwrap();
        inspect(&paths, TOOL, "work", &ui).unwrap();

        delete(&paths, TOOL, "work", true, &ui).unwrap();
        let tool = codex(&paths);
        assert!(tool.active.is_none());
        assert_eq!(tool.profiles.len(), 1);
        assert!(live.join("auth.json").exists());
    }

    #[test]
    fn test_use_unknown_profile() {
        let temp_dir = TempDir::new().unwrap();
        let paths = setup_test_paths(&temp_dir);
        let ui = test_ui();

        assert!(use_profile(&paths, TOOL, Some("nonexistent"), &ui).is_err());
    }

    #[test]
    fn test_failed_switch_does_not_move_pointer() {
        let temp_dir = TempDir::new().unwrap();
        let paths = setup_test_paths(&temp_dir);
        let ui = test_ui();

        create(&paths, TOOL, "a", &ui).unwrap();
        create(&paths, TOOL, "b", &ui).unwrap();
        let a = codex(&paths).resolve_profile("a").unwrap().id.clone();
        fs::remove_dir_all(paths.tool_store_dir(TOOL).join(&a)).unwrap();

        assert!(use_profile(&paths, TOOL, Some("a"), &ui).is_err());
        assert_eq!(codex(&paths).active_profile().unwrap().name, "b");
    }

    #[test]
    fn test_rename() {
        let temp_dir = TempDir::new().unwrap();
        let paths = setup_test_paths(&temp_dir);
        let ui = test_ui();

        create(&paths, TOOL, "old", &ui).unwrap();
        rename(&paths, TOOL, "old", "new", &ui).unwrap();

        let tool = codex(&paths);
        assert_eq!(tool.profiles[0].name, "new");
        assert!(rename(&paths, TOOL, "old", "x", &ui).is_err());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(12), "12 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
    }
}
