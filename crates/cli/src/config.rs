//! clusterctl settings file
//!
//! Read from `$CLUSTERCTL_CONFIG`, or `~/.config/clusterctl/config.json`
//! when the variable is unset. Command-line flags always win.

use crate::output::OutputFormat;
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const CONFIG_ENV: &str = "CLUSTERCTL_CONFIG";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Controller API URL
    pub api_url: Option<String>,
    /// `table` or `json`
    pub default_format: Option<String>,
    /// Snapshot used by `plan` commands without `--snapshot`
    pub snapshot: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn default_format(&self) -> Option<OutputFormat> {
        self.default_format
            .as_deref()
            .and_then(|name| OutputFormat::from_str(name, true).ok())
    }

    /// Snapshot from the flag, falling back to the configured one
    pub fn resolve_snapshot(&self, flag: Option<PathBuf>) -> Result<PathBuf> {
        flag.or_else(|| self.snapshot.clone()).with_context(|| {
            format!(
                "No cluster snapshot given; pass --snapshot or set \"snapshot\" in {}",
                Self::config_path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "the clusterctl config".to_string())
            )
        })
    }

    fn config_path() -> Option<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        let home = dirs_next::home_dir()?;
        Some(home.join(".config").join("clusterctl").join("config.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_format_parsing() {
        let config = Config {
            default_format: Some("JSON".to_string()),
            ..Default::default()
        };
        assert!(matches!(config.default_format(), Some(OutputFormat::Json)));

        let config = Config {
            default_format: Some("yaml".to_string()),
            ..Default::default()
        };
        assert!(config.default_format().is_none());
    }

    #[test]
    fn test_load_rejects_unknown_keys() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"snapshot": "/tmp/cluster.json"}}"#).unwrap();
        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.snapshot, Some(PathBuf::from("/tmp/cluster.json")));

        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"namespace": "default"}}"#).unwrap();
        assert!(Config::load_from(file.path()).is_err());
    }

    #[test]
    fn test_snapshot_flag_wins_over_config() {
        let config = Config {
            snapshot: Some(PathBuf::from("configured.json")),
            ..Default::default()
        };
        assert_eq!(
            config.resolve_snapshot(Some(PathBuf::from("flag.json"))).unwrap(),
            PathBuf::from("flag.json")
        );
        assert_eq!(
            config.resolve_snapshot(None).unwrap(),
            PathBuf::from("configured.json")
        );
        assert!(Config::default().resolve_snapshot(None).is_err());
    }
}
