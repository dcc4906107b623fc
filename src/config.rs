//! Configuration for protoguard.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (PROTOGUARD_HOME, PROTOGUARD_TEXT_ENDPOINT)
//! 2. Config file (.protoguard/config.yaml)
//! 3. Defaults (~/.protoguard)
//!
//! Config file discovery:
//! - Searches current directory and parents for .protoguard/config.yaml
//! - `home` in the config file is relative to the .protoguard/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::pipeline::RetryPolicy;
use crate::core::runtime::StageConfig;
use crate::domain::StageKind;
use crate::stages::GovernancePolicy;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const CONFIG_DIR: &str = ".protoguard";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub home: Option<String>,
    #[serde(default)]
    pub stages: StagesFile,
    #[serde(default)]
    pub governance: GovernancePolicy,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub text_generator: TextGeneratorConfig,
}

/// Per-stage overrides; anything unset keeps the stage's built-in default
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StagesFile {
    #[serde(default)]
    pub generator: StageOverride,
    #[serde(default)]
    pub domain_conflict: StageOverride,
    #[serde(default)]
    pub governance: StageOverride,
    #[serde(default)]
    pub integrity: StageOverride,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StageOverride {
    pub enabled: Option<bool>,
    pub priority: Option<u8>,
    pub timeout_ms: Option<u64>,
    pub retry_attempts: Option<u32>,
}

impl StageOverride {
    fn apply(&self, mut config: StageConfig) -> StageConfig {
        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }
        if let Some(priority) = self.priority {
            config.priority = priority;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.timeout_ms = timeout_ms;
        }
        if let Some(retry_attempts) = self.retry_attempts {
            config.retry_attempts = retry_attempts;
        }
        config
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextGeneratorConfig {
    /// No endpoint means template-only generation
    pub endpoint: Option<String>,
    pub model: String,
    pub timeout_ms: u64,
}

impl Default for TextGeneratorConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: "clinical-text-v1".to_string(),
            timeout_ms: 30_000,
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to protoguard home (store + audit log)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub stages: StagesFile,
    pub governance: GovernancePolicy,
    pub retry: RetryPolicy,
    pub text_generator: TextGeneratorConfig,
}

impl ResolvedConfig {
    /// Effective configuration of one stage
    pub fn stage(&self, kind: StageKind) -> StageConfig {
        let overrides = match kind {
            StageKind::Generator => &self.stages.generator,
            StageKind::DomainConflict => &self.stages.domain_conflict,
            StageKind::Governance => &self.stages.governance,
            StageKind::Integrity => &self.stages.integrity,
        };
        overrides.apply(StageConfig::defaults_for(kind))
    }

    pub fn store_dir(&self) -> PathBuf {
        self.home.join("store")
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.home.join("audit.jsonl")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content).with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn parse_config(content: &str) -> Result<ConfigFile> {
    // An empty file deserializes as null
    if content.trim().is_empty() {
        return Ok(ConfigFile::default());
    }
    Ok(serde_yaml::from_str(content)?)
}

/// Resolve a path that may be relative to the config directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);

    let config_file = find_config_file();
    let file = match &config_file {
        Some(path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    let home = if let Ok(env_home) = std::env::var("PROTOGUARD_HOME") {
        PathBuf::from(env_home)
    } else if let (Some(path), Some(home)) = (&config_file, &file.home) {
        let config_dir = path.parent().unwrap_or(Path::new("."));
        resolve_path(config_dir, home)
    } else {
        default_home
    };

    let mut text_generator = file.text_generator;
    if let Ok(endpoint) = std::env::var("PROTOGUARD_TEXT_ENDPOINT") {
        text_generator.endpoint = Some(endpoint).filter(|e| !e.trim().is_empty());
    }

    Ok(ResolvedConfig {
        home,
        config_file,
        stages: file.stages,
        governance: file.governance,
        retry: file.retry,
        text_generator,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration, bypassing the cache
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Audit chain log ($PROTOGUARD_HOME/audit.jsonl)
pub fn audit_log_path() -> Result<PathBuf> {
    Ok(config()?.audit_log_path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let config_dir = temp.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir).unwrap();

        let config_path = config_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
home: ./state
stages:
  generator:
    timeout_ms: 5000
  integrity:
    enabled: false
governance:
  determinism_check: false
retry:
  initial_delay_ms: 10
text_generator:
  endpoint: http://localhost:8080/generate
"#
        )
        .unwrap();

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.home, Some("./state".to_string()));
        assert_eq!(config.stages.generator.timeout_ms, Some(5000));
        assert_eq!(config.stages.integrity.enabled, Some(false));
        assert!(!config.governance.determinism_check);
        assert!(config.governance.audit_logging);
        assert_eq!(config.retry.initial_delay_ms, 10);
        assert_eq!(config.retry.max_delay_ms, 5000);
        assert_eq!(config.text_generator.model, "clinical-text-v1");
    }

    #[test]
    fn test_stage_overrides_keep_defaults() {
        let file = parse_config("stages:\n  generator:\n    timeout_ms: 5000\n").unwrap();
        let config = ResolvedConfig {
            home: PathBuf::from("/test/.protoguard"),
            config_file: None,
            stages: file.stages,
            governance: file.governance,
            retry: file.retry,
            text_generator: file.text_generator,
        };

        let generator = config.stage(StageKind::Generator);
        assert_eq!(generator.timeout_ms, 5000);
        assert_eq!(generator.priority, 8);
        assert!(generator.enabled);
        assert_eq!(config.stage(StageKind::Governance), StageConfig::defaults_for(StageKind::Governance));

        assert_eq!(config.store_dir(), PathBuf::from("/test/.protoguard/store"));
        assert_eq!(config.audit_log_path(), PathBuf::from("/test/.protoguard/audit.jsonl"));
    }

    #[test]
    fn test_empty_config_file() {
        let config = parse_config("\n").unwrap();
        assert!(config.home.is_none());
        assert!(config.text_generator.endpoint.is_none());
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
