//! Demo-binary configuration, in the same layering style as the teacher's
//! `pgt::config::TransformationConfig`: `serde::Deserialize` plus an
//! optional TOML file, overridable from the CLI. The library crate itself
//! takes configuration as plain constructor arguments and has no I/O of
//! its own — this type is consumed only by `src/bin/echo_demo.rs`.

use std::path::Path;

use serde::{Deserialize, Serialize};

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7878
}

fn default_workers() -> usize {
    2
}

fn default_max_segment() -> usize {
    crate::dcb::MAX_SEGMENT
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_segment")]
    pub max_segment: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: default_workers(),
            max_segment: default_max_segment(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: String, source: toml::de::Error },
}

impl ProxyConfig {
    /// Load from an optional TOML file, falling back to defaults for any
    /// field the file omits (or if no file is given at all).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.display().to_string(), source })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse { path: path.display().to_string(), source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_no_path_given() {
        let cfg = ProxyConfig::load(None).unwrap();
        assert_eq!(cfg.port, 7878);
        assert_eq!(cfg.workers, 2);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.toml");
        std::fs::write(&path, "port = 9999\n").unwrap();
        let cfg = ProxyConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.port, 9999);
        assert_eq!(cfg.host, "127.0.0.1");
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = ProxyConfig::load(Some(Path::new("/nonexistent/proxy.toml")));
        assert!(result.is_err());
    }
}
