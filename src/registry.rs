//! Tool registry stored in ~/.guise/config.json.
//!
//! The document keeps the field names guise has always written
//! (`providers`, `target_path`, `active_profile_id`) so existing configs keep
//! loading. An empty `active_profile_id` means no profile is active.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// One stored snapshot of a tool's configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// An external application whose configuration directory guise manages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tool {
    pub id: String,
    pub name: String,
    #[serde(rename = "target_path")]
    pub live_dir: PathBuf,
    #[serde(default)]
    pub profiles: Vec<Profile>,
    #[serde(rename = "active_profile_id", default, with = "active_pointer")]
    pub active: Option<String>,
}

impl Tool {
    pub fn new(id: impl Into<String>, name: impl Into<String>, live_dir: PathBuf) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            live_dir,
            profiles: Vec::new(),
            active: None,
        }
    }

    pub fn profile(&self, id: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    pub fn profile_mut(&mut self, id: &str) -> Option<&mut Profile> {
        self.profiles.iter_mut().find(|p| p.id == id)
    }

    pub fn has_profile(&self, id: &str) -> bool {
        self.profile(id).is_some()
    }

    /// The profile the active pointer names, if it names a listed one
    pub fn active_profile(&self) -> Option<&Profile> {
        self.active.as_deref().and_then(|id| self.profile(id))
    }

    pub fn is_active(&self, profile_id: &str) -> bool {
        self.active.as_deref() == Some(profile_id)
    }

    /// True when the active pointer names a profile that is not listed
    pub fn has_dangling_pointer(&self) -> bool {
        self.active.is_some() && self.active_profile().is_none()
    }

    /// Resolve a user-supplied reference to a profile id.
    ///
    /// Ids match first; otherwise the display name must be unique.
    pub fn resolve_profile(&self, query: &str) -> Result<&Profile> {
        if let Some(profile) = self.profile(query) {
            return Ok(profile);
        }

        let matches: Vec<&Profile> = self.profiles.iter().filter(|p| p.name == query).collect();
        match matches.as_slice() {
            [one] => Ok(one),
            [] => bail!(
                "Profile '{}' not found for {}.\nHint: Use 'guise list {}' to see available profiles.",
                query,
                self.name,
                self.id
            ),
            many => {
                let ids: Vec<&str> = many.iter().map(|p| p.id.as_str()).collect();
                bail!(
                    "Profile name '{}' is ambiguous for {}.\nHint: Use one of these ids instead: {}",
                    query,
                    self.name,
                    ids.join(", ")
                )
            }
        }
    }
}

/// The full registry document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    #[serde(rename = "providers", default)]
    pub tools: Vec<Tool>,
}

impl Registry {
    /// Read the registry, returning an empty one if the file doesn't exist
    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read registry file: {:?}", path))?;

        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(content)
            .with_context(|| format!("Failed to parse registry file: {:?}", path))
    }

    /// Write the registry atomically: temp file, then rename
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create registry directory: {:?}", parent))?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize registry")?;

        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, &content)
            .with_context(|| format!("Failed to write temp registry file: {:?}", temp_path))?;

        std::fs::rename(&temp_path, path).with_context(|| {
            format!("Failed to rename registry file: {:?} -> {:?}", temp_path, path)
        })
    }

    pub fn tool(&self, id: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.id == id)
    }

    pub fn tool_mut(&mut self, id: &str) -> Option<&mut Tool> {
        self.tools.iter_mut().find(|t| t.id == id)
    }

    /// Look up a tool for a command, with a hint on failure
    pub fn require_tool(&self, id: &str) -> Result<&Tool> {
        match self.tool(id) {
            Some(tool) => Ok(tool),
            None => bail!(unknown_tool(id)),
        }
    }

    pub fn require_tool_mut(&mut self, id: &str) -> Result<&mut Tool> {
        match self.tool_mut(id) {
            Some(tool) => Ok(tool),
            None => bail!(unknown_tool(id)),
        }
    }

    /// Append any default tool whose id is not registered yet.
    ///
    /// Existing entries are never touched. Returns whether anything was added.
    pub fn merge_defaults(&mut self, defaults: Vec<Tool>) -> bool {
        let mut dirty = false;
        for default in defaults {
            if self.tool(&default.id).is_none() {
                self.tools.push(default);
                dirty = true;
            }
        }
        dirty
    }
}

fn unknown_tool(id: &str) -> String {
    format!("Unknown tool '{}'.\nHint: Use 'guise tools' to see managed tools.", id)
}

/// Tools every registry starts with
pub fn default_tools(home: &Path) -> Vec<Tool> {
    vec![
        Tool::new("openai-codex", "OpenAI Codex", home.join(".codex")),
        Tool::new("google-gemini", "Google Gemini", home.join(".gemini")),
        Tool::new("anthropic-claude", "Anthropic Claude", home.join(".claude")),
        Tool::new(
            "github-copilot",
            "GitHub Copilot CLI",
            standard_config_path("github-copilot", home),
        ),
    ]
}

/// Platform config location for a CLI tool.
///
/// Windows: `%LOCALAPPDATA%\<tool>`, falling back to the roaming config dir.
/// Elsewhere: `~/.config/<tool>`, which most CLIs use even on macOS.
pub fn standard_config_path(tool: &str, home: &Path) -> PathBuf {
    if cfg!(windows) {
        if let Some(local) = std::env::var_os("LOCALAPPDATA").filter(|v| !v.is_empty()) {
            return PathBuf::from(local).join(tool);
        }
        if let Some(dirs) = directories::BaseDirs::new() {
            return dirs.config_dir().join(tool);
        }
    }
    home.join(".config").join(tool)
}

/// Exclusive hold on the registry for a read-modify-write cycle.
///
/// The lock lives on a sidecar `config.json.lock` so the document itself can
/// be replaced by rename on every save.
pub struct LockedRegistry {
    lock_file: File,
    registry: Registry,
    path: PathBuf,
    fresh: bool,
}

impl LockedRegistry {
    /// Lock the registry and load its current content
    pub fn lock(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create registry directory: {:?}", parent))?;
        }

        let lock_path = lock_path(path);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open registry lock: {:?}", lock_path))?;

        // Blocks until any other guise process is done
        lock_file
            .lock_exclusive()
            .with_context(|| format!("Failed to lock registry: {:?}", lock_path))?;

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read registry file: {:?}", path));
            }
        };
        let fresh = content.trim().is_empty();
        let registry = Registry::parse(&content, path)?;

        Ok(Self {
            lock_file,
            registry,
            path: path.to_path_buf(),
            fresh,
        })
    }

    /// Whether the registry was missing or empty when locked
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Persist the current registry; the old document stays intact on failure
    pub fn save(&mut self) -> Result<()> {
        self.registry.write(&self.path)?;
        self.fresh = false;
        Ok(())
    }
}

impl Drop for LockedRegistry {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}

/// `Option<String>` stored as a plain string, `""` meaning none
mod active_pointer {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(value.as_deref().unwrap_or(""))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        let raw = Option::<String>::deserialize(d)?;
        Ok(raw.filter(|s| !s.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn profile(id: &str, name: &str) -> Profile {
        Profile {
            id: id.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_read_nonexistent() {
        let temp_dir = TempDir::new().unwrap();
        let registry = Registry::read(&temp_dir.path().join("config.json")).unwrap();
        assert!(registry.tools.is_empty());
    }

    #[test]
    fn test_write_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");

        let mut tool = Tool::new("test", "Test Provider", PathBuf::from("/tmp/test"));
        tool.profiles.push(profile("profile_1", "work"));
        tool.active = Some("profile_1".to_string());
        let registry = Registry { tools: vec![tool] };
        registry.write(&path).unwrap();

        let loaded = Registry::read(&path).unwrap();
        assert_eq!(loaded, registry);
        assert!(!temp_dir.path().join("config.json.tmp").exists());
    }

    #[test]
    fn test_document_format() {
        let tool = Tool::new("codex", "Codex", PathBuf::from("/home/u/.codex"));
        let json = serde_json::to_value(Registry { tools: vec![tool] }).unwrap();

        let entry = &json["providers"][0];
        assert_eq!(entry["target_path"], "/home/u/.codex");
        assert_eq!(entry["active_profile_id"], "");
        assert!(entry["profiles"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_reads_legacy_document() {
        let json = r#"{
            "providers": [
                {
                    "id": "openai-codex",
                    "name": "OpenAI Codex",
                    "target_path": "/home/u/.codex",
                    "profiles": [
                        {"id": "profile_1", "name": "work", "created_at": "2025-01-02T03:04:05Z"}
                    ],
                    "active_profile_id": "profile_1"
                },
                {
                    "id": "google-gemini",
                    "name": "Google Gemini",
                    "target_path": "/home/u/.gemini",
                    "active_profile_id": ""
                }
            ]
        }"#;
        let registry: Registry = serde_json::from_str(json).unwrap();

        let codex = registry.tool("openai-codex").unwrap();
        assert_eq!(codex.active.as_deref(), Some("profile_1"));
        assert_eq!(codex.active_profile().unwrap().name, "work");

        let gemini = registry.tool("google-gemini").unwrap();
        assert!(gemini.active.is_none());
        assert!(gemini.profiles.is_empty());
    }

    #[test]
    fn test_merge_defaults_preserves_existing() {
        let mut registry = Registry {
            tools: vec![
                Tool::new("custom", "Custom", PathBuf::from("/c")),
                Tool::new("openai-codex", "Existing OpenAI", PathBuf::from("/o")),
            ],
        };
        let defaults = vec![
            Tool::new("openai-codex", "Default OpenAI", PathBuf::from("/d")),
            Tool::new("new-provider", "New Provider", PathBuf::from("/n")),
        ];

        assert!(registry.merge_defaults(defaults.clone()));
        assert_eq!(registry.tools.len(), 3);
        assert_eq!(registry.tool("openai-codex").unwrap().name, "Existing OpenAI");
        assert_eq!(registry.tools[2].id, "new-provider");

        assert!(!registry.merge_defaults(defaults));
    }

    #[test]
    fn test_default_tools() {
        let home = Path::new("/home/u");
        let tools = default_tools(home);
        let ids: Vec<&str> = tools.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["openai-codex", "google-gemini", "anthropic-claude", "github-copilot"]
        );
        assert_eq!(tools[0].live_dir, home.join(".codex"));
        assert!(tools.iter().all(|t| t.profiles.is_empty() && t.active.is_none()));
    }

    #[test]
    fn test_resolve_profile() {
        let mut tool = Tool::new("codex", "Codex", PathBuf::from("/c"));
        tool.profiles.push(profile("profile_1", "work"));
        tool.profiles.push(profile("profile_2", "home"));
        tool.profiles.push(profile("profile_3", "home"));

        assert_eq!(tool.resolve_profile("profile_2").unwrap().name, "home");
        assert_eq!(tool.resolve_profile("work").unwrap().id, "profile_1");

        let err = tool.resolve_profile("home").unwrap_err().to_string();
        assert!(err.contains("ambiguous"));
        assert!(err.contains("profile_2") && err.contains("profile_3"));

        assert!(tool.resolve_profile("missing").is_err());
    }

    #[test]
    fn test_dangling_pointer() {
        let mut tool = Tool::new("codex", "Codex", PathBuf::from("/c"));
        assert!(!tool.has_dangling_pointer());

        tool.active = Some("profile_9".to_string());
        assert!(tool.has_dangling_pointer());

        tool.profiles.push(profile("profile_9", "x"));
        assert!(!tool.has_dangling_pointer());
        assert!(tool.is_active("profile_9"));
    }

    #[test]
    fn test_locked_registry() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");

        {
            let mut locked = LockedRegistry::lock(&path).unwrap();
            assert!(locked.is_fresh());
            locked
                .registry_mut()
                .tools
                .push(Tool::new("codex", "Codex", PathBuf::from("/c")));
            locked.save().unwrap();
        }

        let registry = Registry::read(&path).unwrap();
        assert_eq!(registry.tools.len(), 1);

        let locked = LockedRegistry::lock(&path).unwrap();
        assert!(!locked.is_fresh());
        assert!(locked.registry().tool("codex").is_some());
        assert!(temp_dir.path().join("config.json.lock").exists());
    }

    #[test]
    fn test_failed_save_keeps_previous_document() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");

        let mut locked = LockedRegistry::lock(&path).unwrap();
        locked
            .registry_mut()
            .tools
            .push(Tool::new("codex", "Codex", PathBuf::from("/c")));
        locked.save().unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        // A directory in the temp file's place makes the write fail
        std::fs::create_dir(temp_dir.path().join("config.json.tmp")).unwrap();
        locked.registry_mut().tools.clear();
        assert!(locked.save().is_err());
        drop(locked);

        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
        let locked = LockedRegistry::lock(&path).unwrap();
        assert!(!locked.is_fresh());
        assert_eq!(locked.registry().tools.len(), 1);
    }
}
