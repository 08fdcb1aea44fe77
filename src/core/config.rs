//! Project configuration (`.dochook.toml`) merged over the embedded defaults.

use crate::core::assets;
use crate::core::error::DocHookError;
use crate::core::fsio;
use crate::core::glob::Pattern;
use crate::core::rules::{LayerName, Rule};
use crate::core::store;
use crate::plugins::knowledge::Keywords;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const CONFIG_FILE: &str = ".dochook.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub dir: String,
    pub project_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerConfig {
    pub name: String,
    pub docs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    pub enabled: bool,
    pub layer: LayerName,
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub cube_id: String,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        KnowledgeConfig {
            enabled: false,
            layer: "memo".to_string(),
            command: Vec::new(),
            timeout_secs: 10,
            cube_id: String::new(),
        }
    }
}

impl KnowledgeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub contribute_layers: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    pub block_push: bool,
}

impl Default for HooksConfig {
    fn default() -> Self {
        HooksConfig { block_push: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitConfig {
    pub message_template: String,
}

impl Default for CommitConfig {
    fn default() -> Self {
        CommitConfig {
            message_template: "docs(auto): update {layers} - {reason}".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdatersConfig {
    pub dry_run: bool,
    pub backup: bool,
}

impl Default for UpdatersConfig {
    fn default() -> Self {
        UpdatersConfig {
            dry_run: false,
            backup: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub state: StateConfig,
    pub layers: BTreeMap<LayerName, LayerConfig>,
    pub rules: Vec<Rule>,
    pub keywords: Keywords,
    pub knowledge: KnowledgeConfig,
    pub analysis: AnalysisConfig,
    pub hooks: HooksConfig,
    pub commit: CommitConfig,
    pub updaters: UpdatersConfig,
}

/// Recursively merge `overlay` into `base`. Tables merge; everything else replaces.
pub fn deep_merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                deep_merge(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn parse_table(raw: &str, origin: &str) -> Result<toml::Table, DocHookError> {
    raw.parse::<toml::Table>().map_err(|e| {
        DocHookError::ValidationError(format!("{}: {}", origin, e.to_string().trim()))
    })
}

impl Config {
    /// The embedded defaults alone.
    pub fn builtin() -> Result<Self, DocHookError> {
        let table = parse_table(&assets::default_config(), assets::DEFAULT_CONFIG_PATH)?;
        Ok(toml::Value::Table(table).try_into()?)
    }

    /// Parse `raw` as a project file merged over the defaults. No validation.
    pub fn from_project_str(raw: &str, project_root: &Path) -> Result<Self, DocHookError> {
        let mut merged = parse_table(&assets::default_config(), assets::DEFAULT_CONFIG_PATH)?;
        deep_merge(&mut merged, parse_table(raw, CONFIG_FILE)?);
        let mut config: Config = toml::Value::Table(merged).try_into()?;
        config.fill_project_key(project_root);
        Ok(config)
    }

    /// Load without validation, for `config validate` which reports every problem.
    pub fn load_unchecked(project_root: &Path) -> Result<Self, DocHookError> {
        let path = project_root.join(CONFIG_FILE);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no project config; using defaults");
                String::new()
            }
            Err(e) => return Err(e.into()),
        };
        Config::from_project_str(&raw, project_root)
    }

    pub fn load(project_root: &Path) -> Result<Self, DocHookError> {
        let config = Config::load_unchecked(project_root)?;
        let problems = config.validate();
        if !problems.is_empty() {
            return Err(DocHookError::ValidationError(format!(
                "{} has {} problem(s): {}",
                CONFIG_FILE,
                problems.len(),
                problems.join("; ")
            )));
        }
        Ok(config)
    }

    fn fill_project_key(&mut self, project_root: &Path) {
        if self.state.project_key.trim().is_empty() {
            self.state.project_key = project_root
                .canonicalize()
                .unwrap_or_else(|_| project_root.to_path_buf())
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "default".to_string());
        }
    }

    pub fn project_key(&self) -> &str {
        &self.state.project_key
    }

    pub fn state_root(&self) -> Result<PathBuf, DocHookError> {
        store::resolve_state_root(&self.state.dir)
    }

    pub fn is_declared(&self, layer: &str) -> bool {
        self.layers.contains_key(layer)
    }

    /// Every structural problem; empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for (i, rule) in self.rules.iter().enumerate() {
            for p in rule.problems() {
                problems.push(format!("rule {}: {}", i, p));
            }
            for layer in &rule.layers {
                if !self.is_declared(layer) {
                    problems.push(format!("rule {}: unknown layer '{}'", i, layer));
                }
            }
        }
        for (name, layer) in &self.layers {
            for glob in &layer.docs {
                if let Err(e) = Pattern::new(glob) {
                    problems.push(format!("layer '{}': {}", name, e));
                }
            }
        }
        if self.knowledge.enabled && !self.is_declared(&self.knowledge.layer) {
            problems.push(format!(
                "knowledge layer '{}' is not declared under [layers]",
                self.knowledge.layer
            ));
        }
        if self.commit.message_template.trim().is_empty() {
            problems.push("commit.message_template is empty".to_string());
        }
        problems
    }

    pub fn to_toml_string(&self) -> Result<String, DocHookError> {
        toml::to_string_pretty(self).map_err(|e| DocHookError::ValidationError(e.to_string()))
    }
}

/// Write the default config to `<root>/.dochook.toml`. Refuses to overwrite unless forced.
pub fn write_default(project_root: &Path, force: bool) -> Result<PathBuf, DocHookError> {
    let path = project_root.join(CONFIG_FILE);
    if path.exists() && !force {
        return Err(DocHookError::ValidationError(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    fsio::write_atomic(&path, assets::default_config().as_bytes())?;
    Ok(path)
}
