//! Engine configuration.
//!
//! Deployment mode selection plus the standalone-only softness flag for
//! missing protocol responses. Loadable from a TOML file; validated before
//! use.

use crate::errors::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Deployment mode of the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    /// Regulated deployment against a real foundation.
    Standard,
    /// Unregulated deployment against the in-process simulator.
    Standalone,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub mode: DeploymentMode,

    /// Standalone only: a missing outcome/finalize response after a wait
    /// returns the round to idle instead of being treated as a fatal
    /// protocol violation. There is a small window in standalone where a
    /// response can legitimately be absent. Ignored in standard mode,
    /// where absence is always fatal.
    pub soft_response_absence: bool,

    /// Directory for the durable critical-data store. `None` selects the
    /// in-memory store (standalone only).
    pub data_dir: Option<PathBuf>,

    /// Theme identifier; labels this deployment in logs and must not be
    /// empty.
    pub theme: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: DeploymentMode::Standard,
            soft_response_absence: false,
            data_dir: None,
            theme: "default-theme".into(),
        }
    }
}

impl EngineConfig {
    /// Standalone configuration with volatile storage, as used in tests.
    pub fn standalone() -> Self {
        Self {
            mode: DeploymentMode::Standalone,
            ..Self::default()
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config: EngineConfig = toml::from_str(&text).map_err(|e| ConfigError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.theme.is_empty() {
            return Err(ConfigError::Invalid {
                field: "theme".into(),
                reason: "must not be empty".into(),
            }
            .into());
        }
        if self.mode == DeploymentMode::Standard && self.data_dir.is_none() {
            return Err(ConfigError::Invalid {
                field: "data_dir".into(),
                reason: "standard mode requires a durable store".into(),
            }
            .into());
        }
        if self.mode == DeploymentMode::Standard && self.soft_response_absence {
            tracing::warn!(
                "soft_response_absence is ignored in standard mode; response absence stays fatal"
            );
        }
        Ok(())
    }

    /// Effective softness: only standalone deployments may degrade a
    /// missing outcome/finalize response.
    pub fn response_absence_is_soft(&self) -> bool {
        self.mode == DeploymentMode::Standalone && self.soft_response_absence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_strict() {
        let config = EngineConfig::standalone();
        assert!(!config.response_absence_is_soft());
    }

    #[test]
    fn softness_is_standalone_only() {
        let mut config = EngineConfig::standalone();
        config.soft_response_absence = true;
        assert!(config.response_absence_is_soft());

        config.mode = DeploymentMode::Standard;
        assert!(!config.response_absence_is_soft());
    }

    #[test]
    fn standard_mode_requires_data_dir() {
        let config = EngineConfig::default();
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.data_dir = Some(PathBuf::from("/tmp/cd"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn loads_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(
            &path,
            "mode = \"standalone\"\nsoft_response_absence = true\ntheme = \"reels\"\n",
        )
        .unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.mode, DeploymentMode::Standalone);
        assert!(config.soft_response_absence);
        assert_eq!(config.theme, "reels");
    }
}
