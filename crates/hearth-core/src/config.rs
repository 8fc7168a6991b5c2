//! Layered TOML settings for the node bootstrap.
//!
//! Layers, lowest precedence first: built-in defaults, the user file
//! (`~/.config/hearth/settings.toml`), the workspace file
//! (`<project_root>/.hearth/settings.toml`), then an explicit `--config` file.
//! Tables are merged key by key; scalars and arrays in later layers replace
//! earlier ones.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const USER_SETTINGS_RELATIVE_PATH: &str = ".config/hearth/settings.toml";
pub const WORKSPACE_SETTINGS_RELATIVE_PATH: &str = ".hearth/settings.toml";

pub const DEFAULT_PREBOOT_PORT: u16 = 7040;
pub const DEFAULT_DAEMON_PORT: u16 = 7030;
pub const DEFAULT_DISCOVERY_PORT: u16 = 7041;
pub const DEFAULT_LLM_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_LLM_MODEL: &str = "qwen2.5-coder-7b-instruct";
pub const DEFAULT_EMBEDDINGS_URL: &str = "http://127.0.0.1:8100";
pub const DEFAULT_EMBEDDINGS_MODEL: &str = "bge-small-en-v1.5";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HearthConfig {
    pub node: NodeConfig,
    pub discovery: DiscoveryConfig,
    pub backend: CommandConfig,
    pub ai: AiConfig,
}

impl Default for HearthConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            discovery: DiscoveryConfig::default(),
            backend: CommandConfig::program("hearth-backend"),
            ai: AiConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub bind_host: String,
    pub preboot_port: u16,
    pub daemon_port: u16,
    pub preboot_lock_path: PathBuf,
    pub data_dir: PathBuf,
    pub launches_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            preboot_port: DEFAULT_PREBOOT_PORT,
            daemon_port: DEFAULT_DAEMON_PORT,
            preboot_lock_path: std::env::temp_dir().join("hearth-preboot.lock"),
            data_dir: PathBuf::from("./.hearth"),
            launches_dir: PathBuf::from("./logs/launches"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub port: u16,
    pub timeout_ms: u64,
    pub broadcast_address: String,
    pub responder_enabled: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_DISCOVERY_PORT,
            timeout_ms: 2_500,
            broadcast_address: "255.255.255.255".to_string(),
            responder_enabled: true,
        }
    }
}

/// External program plus arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandConfig {
    pub fn program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub launcher: CommandConfig,
    pub llm_url: String,
    pub llm_model: String,
    pub embeddings_url: String,
    pub embeddings_model: String,
    pub poll_interval_ms: u64,
    pub ready_timeout_secs: u64,
    pub late_ready_timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            launcher: CommandConfig::program("hearth-ai-launcher"),
            llm_url: DEFAULT_LLM_URL.to_string(),
            llm_model: DEFAULT_LLM_MODEL.to_string(),
            embeddings_url: DEFAULT_EMBEDDINGS_URL.to_string(),
            embeddings_model: DEFAULT_EMBEDDINGS_MODEL.to_string(),
            poll_interval_ms: 1_000,
            ready_timeout_secs: 30,
            late_ready_timeout_secs: 300,
        }
    }
}

impl HearthConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("failed to parse hearth settings")
    }

    /// Loads and merges every settings layer that exists.
    ///
    /// Default layers that are missing are skipped; a missing `explicit` file
    /// is an error.
    pub fn load_layered(
        project_root: &Path,
        home_dir: Option<&Path>,
        explicit: Option<&Path>,
    ) -> Result<Self> {
        let toml::Value::Table(mut merged) = toml::Value::try_from(Self::default())
            .context("failed to encode default hearth settings")?
        else {
            anyhow::bail!("default hearth settings did not encode as a table");
        };

        let mut layers = Vec::new();
        if let Some(home) = home_dir {
            layers.push(home.join(USER_SETTINGS_RELATIVE_PATH));
        }
        layers.push(project_root.join(WORKSPACE_SETTINGS_RELATIVE_PATH));
        for path in layers {
            if path.is_file() {
                merge_tables(&mut merged, read_table(&path)?);
                tracing::debug!(path = %path.display(), "merged settings layer");
            }
        }
        if let Some(path) = explicit {
            merge_tables(&mut merged, read_table(path)?);
        }

        resolve_relative_paths(&mut merged, project_root, home_dir);
        toml::Value::Table(merged)
            .try_into::<Self>()
            .context("failed to decode merged hearth settings")
    }
}

fn read_table(path: &Path) -> Result<toml::Table> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read settings {}", path.display()))?;
    raw.parse::<toml::Table>()
        .with_context(|| format!("failed to parse settings {}", path.display()))
}

/// Merges `overlay` into `base`, recursing into nested tables.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn resolve_relative_paths(table: &mut toml::Table, project_root: &Path, home: Option<&Path>) {
    for (_, value) in table.iter_mut() {
        resolve_value(value, project_root, home);
    }
}

fn resolve_value(value: &mut toml::Value, project_root: &Path, home: Option<&Path>) {
    match value {
        toml::Value::String(raw) => {
            if let Some(resolved) = resolve_path_string(raw, project_root, home) {
                *raw = resolved;
            }
        }
        toml::Value::Table(table) => resolve_relative_paths(table, project_root, home),
        toml::Value::Array(items) => {
            for item in items {
                resolve_value(item, project_root, home);
            }
        }
        _ => {}
    }
}

fn resolve_path_string(raw: &str, project_root: &Path, home: Option<&Path>) -> Option<String> {
    if raw == "~" {
        return home.map(|home| home.display().to_string());
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        return home.map(|home| home.join(rest).display().to_string());
    }
    if raw == "." {
        return Some(project_root.display().to_string());
    }
    raw.strip_prefix("./")
        .map(|rest| project_root.join(rest).display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_defaults_carry_well_known_ports_and_models() {
        let config = HearthConfig::default();
        assert_eq!(config.node.preboot_port, 7040);
        assert_eq!(config.node.daemon_port, 7030);
        assert_eq!(config.ai.llm_model, "qwen2.5-coder-7b-instruct");
        assert_eq!(config.ai.embeddings_url, "http://127.0.0.1:8100");
        assert_eq!(config.ai.ready_timeout_secs, 30);
    }

    #[test]
    fn functional_layers_merge_with_later_files_winning() {
        let temp = tempfile::tempdir().expect("tempdir");
        let home = temp.path().join("home");
        let root = temp.path().join("project");
        std::fs::create_dir_all(home.join(".config/hearth")).expect("home dirs");
        std::fs::create_dir_all(root.join(".hearth")).expect("root dirs");
        std::fs::write(
            home.join(USER_SETTINGS_RELATIVE_PATH),
            "[node]\npreboot_port = 9040\ndaemon_port = 9030\n",
        )
        .expect("user settings");
        std::fs::write(
            root.join(WORKSPACE_SETTINGS_RELATIVE_PATH),
            "[node]\ndaemon_port = 9930\n[ai]\nllm_model = \"tiny\"\n",
        )
        .expect("workspace settings");
        let explicit = temp.path().join("override.toml");
        std::fs::write(&explicit, "[ai]\nready_timeout_secs = 5\n").expect("explicit");

        let config =
            HearthConfig::load_layered(&root, Some(&home), Some(&explicit)).expect("load");
        assert_eq!(config.node.preboot_port, 9040);
        assert_eq!(config.node.daemon_port, 9930);
        assert_eq!(config.ai.llm_model, "tiny");
        assert_eq!(config.ai.ready_timeout_secs, 5);
        assert_eq!(config.ai.embeddings_model, DEFAULT_EMBEDDINGS_MODEL);
    }

    #[test]
    fn functional_relative_and_home_paths_are_resolved() {
        let temp = tempfile::tempdir().expect("tempdir");
        let home = temp.path().join("home");
        let root = temp.path().join("project");
        std::fs::create_dir_all(root.join(".hearth")).expect("root dirs");
        std::fs::write(
            root.join(WORKSPACE_SETTINGS_RELATIVE_PATH),
            "[node]\ndata_dir = \"~/hearth-data\"\n",
        )
        .expect("workspace settings");

        let config = HearthConfig::load_layered(&root, Some(&home), None).expect("load");
        assert_eq!(config.node.data_dir, home.join("hearth-data"));
        assert_eq!(config.node.launches_dir, root.join("logs/launches"));
    }

    #[test]
    fn regression_missing_explicit_config_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let error = HearthConfig::load_layered(
            temp.path(),
            None,
            Some(&temp.path().join("does-not-exist.toml")),
        )
        .expect_err("missing explicit file");
        assert!(error.to_string().contains("failed to read settings"));
    }

    #[test]
    fn unit_merge_tables_recurses_into_nested_tables() {
        let mut base: toml::Table = "[a]\nx = 1\ny = 2\n".parse().expect("base");
        let overlay: toml::Table = "[a]\ny = 3\n[b]\nz = 4\n".parse().expect("overlay");
        merge_tables(&mut base, overlay);
        assert_eq!(base["a"]["x"].as_integer(), Some(1));
        assert_eq!(base["a"]["y"].as_integer(), Some(3));
        assert_eq!(base["b"]["z"].as_integer(), Some(4));
    }
}
