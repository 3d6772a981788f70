//! Process configuration, read once at startup.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::debug;
use regex::Regex;
use thiserror::Error;

pub const ENV_FILE: &str = ".env.json";

pub const CONCURRENCY_VAR: &str = "LAMBDA_STDIO_CONCURRENCY";
pub const MAX_IN_FLIGHT_VAR: &str = "LAMBDA_STDIO_MAX_IN_FLIGHT";
pub const TEXT_CONTENT_TYPES_VAR: &str = "LAMBDA_STDIO_TEXT_CONTENT_TYPES";
pub const ENV_FILE_VAR: &str = "LAMBDA_STDIO_ENV_FILE";

/// Content types whose response bodies are passed through as text.
pub const DEFAULT_TEXT_CONTENT_TYPES: &[&str] = &[
    r"text/.*",
    r"application/json",
    r"application/.*\+json",
    r"application/xml",
    r"application/.*\+xml",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read env file {}: {source}", path.display())]
    EnvFileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse env file {}: {source}", path.display())]
    EnvFileParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid {name}={value:?}: {reason}")]
    InvalidSetting {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid text content type pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Whether invocations may overlap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Concurrency {
    /// One task per request carrying an id; results are written in completion order.
    #[default]
    Concurrent,
    /// Every request is handled and answered before the next one is decoded.
    Serial,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub concurrency: Concurrency,
    /// Upper bound on outstanding invocations. `None` means unbounded.
    pub max_in_flight: Option<usize>,
    pub text_content_types: TextContentTypes,
    pub env_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency: Concurrency::default(),
            max_in_flight: None,
            text_content_types: TextContentTypes::default(),
            env_file: PathBuf::from(ENV_FILE),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from a variable lookup. Unset variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(value) = lookup(CONCURRENCY_VAR) {
            config.concurrency = match value.trim().to_ascii_lowercase().as_str() {
                "concurrent" => Concurrency::Concurrent,
                "serial" => Concurrency::Serial,
                _ => {
                    return Err(ConfigError::InvalidSetting {
                        name: CONCURRENCY_VAR,
                        value,
                        reason: "expected `concurrent` or `serial`".to_string(),
                    });
                }
            };
        }

        if let Some(value) = lookup(MAX_IN_FLIGHT_VAR) {
            let limit = value
                .trim()
                .parse::<usize>()
                .map_err(|e| e.to_string())
                .and_then(|n| match n {
                    0 => Err("must be at least 1".to_string()),
                    n => Ok(n),
                });
            match limit {
                Ok(n) => config.max_in_flight = Some(n),
                Err(reason) => {
                    return Err(ConfigError::InvalidSetting {
                        name: MAX_IN_FLIGHT_VAR,
                        value,
                        reason,
                    });
                }
            }
        }

        if let Some(value) = lookup(TEXT_CONTENT_TYPES_VAR) {
            let patterns: Vec<&str> = value
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .collect();
            config.text_content_types = TextContentTypes::new(&patterns)?;
        }

        if let Some(value) = lookup(ENV_FILE_VAR) {
            config.env_file = PathBuf::from(value);
        }

        Ok(config)
    }
}

/// Reads a flat JSON object of environment variables.
///
/// A missing file is not an error and yields an empty map.
pub fn load_env_file(path: &Path) -> Result<BTreeMap<String, String>, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(source) => {
            return Err(ConfigError::EnvFileRead {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_str(&contents).map_err(|source| ConfigError::EnvFileParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Seeds the process environment.
///
/// Must be called before any other thread exists, i.e. before the async
/// runtime is built.
pub fn apply_env(vars: &BTreeMap<String, String>) {
    for (key, value) in vars {
        debug!("seeding env var {}", key);
        // SAFETY: callers run this while the process is still single-threaded.
        unsafe { std::env::set_var(key, value) };
    }
}

/// Decides which response content types are sent as literal text rather than base64.
#[derive(Debug, Clone)]
pub struct TextContentTypes {
    matcher: Option<Regex>,
}

impl TextContentTypes {
    /// Compiles the given regex patterns into one case-insensitive matcher
    /// anchored at the start of the content type. An empty list matches nothing.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ConfigError> {
        if patterns.is_empty() {
            return Ok(Self { matcher: None });
        }
        let alternatives: Vec<&str> = patterns.iter().map(AsRef::as_ref).collect();
        let pattern = format!(r"(?i)^(?:{})\b", alternatives.join("|"));
        Ok(Self {
            matcher: Some(Regex::new(&pattern)?),
        })
    }

    pub fn is_text(&self, content_type: &str) -> bool {
        self.matcher
            .as_ref()
            .is_some_and(|m| m.is_match(content_type.trim()))
    }
}

impl Default for TextContentTypes {
    fn default() -> Self {
        // the built-in patterns are known to compile
        Self::new(DEFAULT_TEXT_CONTENT_TYPES).unwrap_or(Self { matcher: None })
    }
}
