//! Configuration file support for psalm-pairs
//!
//! Reads `psalm-pairs.toml`, found by walking up from the current directory.
//! Relative paths in the file resolve against the directory holding it.

use crate::client::DEFAULT_BASE_URL;
use crate::db::DEFAULT_DB_PATH;
use crate::error::{Error, Result};
use crate::passes::{DEFAULT_EVALUATOR_VERSION, DEFAULT_LIMIT};
use crate::projection::DEFAULT_WINDOW_DAYS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "psalm-pairs.toml";

pub const DB_PATH_ENV: &str = "PSALM_PAIRS_DB_PATH";
pub const MODEL_ENV: &str = "PSALM_PAIRS_MODEL";
pub const EVAL_MODEL_ENV: &str = "PSALM_PAIRS_EVAL_MODEL";

const DEFAULT_MODEL: &str = "gpt-5";

/// Configuration structure
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub corpus: CorpusConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub evaluation: EvaluationConfig,

    #[serde(default)]
    pub projection: ProjectionConfig,

    #[serde(default)]
    pub client: ClientConfig,

    /// Directory of the file this was loaded from
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CorpusConfig {
    /// Directory of `psalm_NNN.json` files
    #[serde(default = "default_corpus_dir")]
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_limit")]
    pub limit: usize,

    #[serde(default = "default_generation_effort")]
    pub reasoning_effort: Option<String>,

    #[serde(default = "default_generation_verbosity")]
    pub verbosity: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EvaluationConfig {
    #[serde(default = "default_model")]
    pub model: String,

    /// Version stamped on new evaluations. Bump when the rubric changes.
    #[serde(default = "default_evaluator_version")]
    pub version: i32,

    #[serde(default = "default_limit")]
    pub limit: usize,

    #[serde(default = "default_evaluation_effort")]
    pub reasoning_effort: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProjectionConfig {
    /// Days of activity averaged for completion forecasts
    #[serde(default = "default_window_days")]
    pub window_days: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClientConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(DEFAULT_DB_PATH)
}

fn default_corpus_dir() -> PathBuf {
    PathBuf::from("psalms_json")
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

fn default_generation_effort() -> Option<String> {
    Some("high".to_string())
}

fn default_generation_verbosity() -> Option<String> {
    Some("medium".to_string())
}

fn default_evaluation_effort() -> Option<String> {
    Some("medium".to_string())
}

fn default_evaluator_version() -> i32 {
    DEFAULT_EVALUATOR_VERSION
}

fn default_window_days() -> u32 {
    DEFAULT_WINDOW_DAYS
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    600
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            dir: default_corpus_dir(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            limit: default_limit(),
            reasoning_effort: default_generation_effort(),
            verbosity: default_generation_verbosity(),
        }
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            version: default_evaluator_version(),
            limit: default_limit(),
            reasoning_effort: default_evaluation_effort(),
        }
    }
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Config {
    /// Load config from `explicit`, else from the nearest `psalm-pairs.toml`,
    /// else defaults. Environment overrides are applied on top.
    ///
    /// An explicit path that cannot be read, or any file that does not parse,
    /// is a configuration error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::find_config_path(),
        };

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Could not read {}: {}", path.display(), e)))?;
        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Invalid {}: {}", path.display(), e)))?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// Find psalm-pairs.toml by walking up directory tree
    fn find_config_path() -> Option<PathBuf> {
        let current_dir = std::env::current_dir().ok()?;
        let mut dir = current_dir.as_path();

        loop {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return Some(config_path);
            }

            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
        None
    }

    /// Apply environment overrides. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(path) = get(DB_PATH_ENV) {
            self.store.path = PathBuf::from(path);
        }
        if let Some(model) = get(MODEL_ENV) {
            self.generation.model = model;
        }
        if let Some(model) = get(EVAL_MODEL_ENV) {
            self.evaluation.model = model;
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.resolve(&self.store.path)
    }

    pub fn corpus_dir(&self) -> PathBuf {
        self.resolve(&self.corpus.dir)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.db_path(), PathBuf::from("data/psalm_pairs.sqlite3"));
        assert_eq!(config.corpus_dir(), PathBuf::from("psalms_json"));
        assert_eq!(config.generation.limit, 50);
        assert_eq!(config.generation.reasoning_effort.as_deref(), Some("high"));
        assert_eq!(config.generation.verbosity.as_deref(), Some("medium"));
        assert_eq!(config.evaluation.version, 2);
        assert_eq!(config.evaluation.reasoning_effort.as_deref(), Some("medium"));
        assert_eq!(config.projection.window_days, 14);
        assert_eq!(config.client_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[evaluation]
version = 3
limit = 10

[projection]
window_days = 7
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.evaluation.version, 3);
        assert_eq!(config.evaluation.limit, 10);
        assert_eq!(config.evaluation.model, "gpt-5");
        assert_eq!(config.projection.window_days, 7);
        assert_eq!(config.generation.limit, 50);
    }

    #[test]
    fn test_relative_paths_follow_config_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[store]\npath = \"ledger.db\"\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.db_path(), temp.path().join("ledger.db"));
        assert_eq!(config.corpus_dir(), temp.path().join("psalms_json"));
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[evaluation]\nversion = \"two\"\n").unwrap();
        assert!(Config::from_file(&path).unwrap_err().is_config());
        assert!(Config::load(Some(&temp.path().join("missing.toml")))
            .unwrap_err()
            .is_config());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (DB_PATH_ENV, "/tmp/other.sqlite3"),
            (MODEL_ENV, "gpt-5-mini"),
            (EVAL_MODEL_ENV, "  "),
        ]
        .into_iter()
        .collect();

        let mut config = Config {
            base_dir: Some(PathBuf::from("/project")),
            ..Config::default()
        };
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.db_path(), PathBuf::from("/tmp/other.sqlite3"));
        assert_eq!(config.generation.model, "gpt-5-mini");
        assert_eq!(config.evaluation.model, "gpt-5");
    }
}
