//! Application Configuration
//!
//! Operator settings stored in TOML format.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::vision::StrategyKind;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Reading extraction settings
    pub pipeline: PipelineSettings,
    /// Model artifact settings
    pub models: ModelSettings,
    /// Reading/access log settings
    pub logging: LogSettings,
    /// Debug artifact settings
    pub debug: DebugSettings,
}

/// Reading extraction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Which recognition strategy to run
    pub strategy: StrategyKind,
    /// Detections below this score are dropped (detection strategy only)
    pub confidence_threshold: f32,
    /// Deduplicate overlapping same-class boxes before assembly
    pub overlap_suppression: bool,
    /// IoU above which two same-class boxes count as duplicates
    pub overlap_iou: f32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Detection,
            confidence_threshold: 0.3,
            overlap_suppression: true,
            overlap_iou: 0.45,
        }
    }
}

/// Model artifact settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Override for the models directory (defaults to the data dir)
    pub dir: Option<PathBuf>,
}

/// Reading/access log settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Append reading and access rows after each upload
    pub enabled: bool,
    /// Override for the log directory (defaults to the data dir)
    pub dir: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
        }
    }
}

/// Debug artifact settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugSettings {
    /// Keep the most recent frame (and annotated copy) on disk
    pub save_artifacts: bool,
    /// Override for the artifact directory (defaults to the data dir)
    pub dir: Option<PathBuf>,
}

impl Default for DebugSettings {
    fn default() -> Self {
        Self {
            save_artifacts: true,
            dir: None,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        assert_eq!(config.pipeline.strategy, StrategyKind::Detection);
        assert!((config.pipeline.confidence_threshold - 0.3).abs() < 0.01);
        assert!(config.pipeline.overlap_suppression);
        assert!((config.pipeline.overlap_iou - 0.45).abs() < 0.01);

        assert!(config.models.dir.is_none());
        assert!(config.logging.enabled);
        assert!(config.debug.save_artifacts);
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = AppConfig::default();

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.pipeline.strategy, config.pipeline.strategy);
        assert_eq!(
            parsed.pipeline.confidence_threshold,
            config.pipeline.confidence_threshold
        );
        assert_eq!(parsed.logging.enabled, config.logging.enabled);
    }

    #[test]
    fn test_config_with_custom_values() {
        let mut config = AppConfig::default();
        config.pipeline.strategy = StrategyKind::Ocr;
        config.pipeline.confidence_threshold = 0.5;
        config.models.dir = Some(PathBuf::from("/opt/meterscan/models"));

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.pipeline.strategy, StrategyKind::Ocr);
        assert!((parsed.pipeline.confidence_threshold - 0.5).abs() < 0.01);
        assert_eq!(
            parsed.models.dir,
            Some(PathBuf::from("/opt/meterscan/models"))
        );
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let parsed: AppConfig = toml::from_str("[pipeline]\nstrategy = \"ocr\"\n").unwrap();

        assert_eq!(parsed.pipeline.strategy, StrategyKind::Ocr);
        assert!((parsed.pipeline.confidence_threshold - 0.3).abs() < 0.01);
        assert!(parsed.logging.enabled);
    }

    #[test]
    fn test_save_and_load_config() {
        let config = AppConfig::default();
        let temp_file = NamedTempFile::new().unwrap();

        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert_eq!(loaded.pipeline.strategy, config.pipeline.strategy);
        assert_eq!(loaded.debug.save_artifacts, config.debug.save_artifacts);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }
}
