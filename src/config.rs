use crate::record::RecordShape;
use crate::tail::{TailWindow, TrimExceptions, DEFAULT_WINDOW};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from optrace.toml.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    pub extract: ExtractConfig,
    pub tail: TailConfig,
    pub pairs: PairsConfig,
    pub rank: RankConfig,
    pub reduction: ReductionConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExtractConfig {
    pub shape: RecordShape,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TailConfig {
    pub window: usize,
    /// Query keys whose trailing rows are total-cost rows.
    pub trim_exceptions: Vec<String>,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PairsConfig {
    pub top_k: usize,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RankConfig {
    /// 0 keeps every rule.
    pub top: usize,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReductionConfig {
    pub initial_stage: u32,
}

// --- Default implementations ---

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            shape: RecordShape::PerIteration,
            output_dir: PathBuf::from("outputs/filtered_query_data"),
        }
    }
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            trim_exceptions: vec!["q15".to_string()],
            output_dir: PathBuf::from("outputs/tail_window"),
        }
    }
}

impl Default for PairsConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            output_dir: PathBuf::from("outputs/rule_pairs"),
        }
    }
}

impl Default for RankConfig {
    fn default() -> Self {
        Self {
            top: 0,
            output_dir: PathBuf::from("outputs/rule_stats"),
        }
    }
}

impl Default for ReductionConfig {
    fn default() -> Self {
        Self { initial_stage: 1 }
    }
}

impl TailConfig {
    pub fn selector(&self) -> Result<TailWindow, ConfigError> {
        let window = NonZeroUsize::new(self.window).ok_or_else(|| ConfigError::Invalid {
            key: "tail.window",
            reason: "must be at least 1".to_string(),
        })?;
        Ok(TailWindow::new(
            window,
            TrimExceptions::new(self.trim_exceptions.iter().cloned()),
        ))
    }
}

impl Config {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Config::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        let config = Config::parse(&contents).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Config, ConfigError> {
        let config: Config = toml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tail.selector().map(|_| ())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid {
        key: &'static str,
        reason: String,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
            ConfigError::Invalid { key, reason } => write!(f, "invalid `{key}`: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid { .. } => None,
        }
    }
}
