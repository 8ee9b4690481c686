//! Configuration module for scope-pipeline
//!
//! A [`PipelineConfig`] describes one complete acquisition → decimation →
//! visualization chain. It can be loaded from and saved to TOML or JSON; the
//! format is picked from the file extension (`.json` is JSON, anything else
//! is TOML).
//!
//! # Example
//!
//! ```ignore
//! use scope_pipeline::config::PipelineConfig;
//!
//! let config = PipelineConfig::load("scope.toml")?;
//! config.validate()?;
//! let (runtime, handles) = PipelineBuilder::new(config).build_default(source)?;
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{Result, ScopeError};
use crate::pipeline::stages::MIN_DISPLAY_POINTS;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Serialization format of a config file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub runtime: RuntimeSettings,
    pub ingest: IngestSettings,
    pub decimation: DecimationSettings,
    pub visualization: VisualizationSettings,
    pub demo: DemoSettings,
}

impl PipelineConfig {
    /// Parse a config from a string in the given format
    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self> {
        let config = match format {
            ConfigFormat::Toml => toml::from_str(content)?,
            ConfigFormat::Json => serde_json::from_str(content)?,
        };
        Ok(config)
    }

    /// Load a config file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ScopeError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        Self::parse(&content, ConfigFormat::from_path(path))
            .map_err(|e| e.with_context(format!("Failed to parse config file {:?}", path)))
    }

    /// Serialize to a string in the given format
    pub fn to_string_as(&self, format: ConfigFormat) -> Result<String> {
        let content = match format {
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
            ConfigFormat::Json => serde_json::to_string_pretty(self)?,
        };
        Ok(content)
    }

    /// Save the config to disk
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ScopeError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = self.to_string_as(ConfigFormat::from_path(path))?;
        std::fs::write(path, content).map_err(|e| {
            ScopeError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Check values a pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let ingest = &self.ingest;
        if ingest.channel_count == 0 || ingest.channel_count > MAX_CHANNELS {
            return Err(ScopeError::Config(format!(
                "channel_count must be between 1 and {}, got {}",
                MAX_CHANNELS, ingest.channel_count
            )));
        }
        if !(ingest.sample_rate_hz > 0.0) {
            return Err(ScopeError::Config(format!(
                "sample_rate_hz must be positive, got {}",
                ingest.sample_rate_hz
            )));
        }
        if ingest.ring_capacity == 0 || ingest.block_samples == 0 {
            return Err(ScopeError::Config(
                "ring_capacity and block_samples must be non-zero".to_string(),
            ));
        }
        if ingest.block_samples > ingest.ring_capacity {
            return Err(ScopeError::Config(format!(
                "block_samples ({}) exceeds ring_capacity ({})",
                ingest.block_samples, ingest.ring_capacity
            )));
        }

        for (name, queue) in [
            ("ingest", &ingest.queue),
            ("decimation", &self.decimation.queue),
            ("visualization", &self.visualization.queue),
        ] {
            if queue.capacity == 0 {
                return Err(ScopeError::Config(format!(
                    "{} queue capacity must be non-zero",
                    name
                )));
            }
        }

        if self.decimation.target_points == 0 {
            return Err(ScopeError::Config(
                "decimation target_points must be non-zero".to_string(),
            ));
        }
        if self.visualization.display_points < MIN_DISPLAY_POINTS {
            return Err(ScopeError::Config(format!(
                "display_points must be at least {}, got {}",
                MIN_DISPLAY_POINTS, self.visualization.display_points
            )));
        }
        if !(self.visualization.visible_time_span_s > 0.0) {
            return Err(ScopeError::Config(format!(
                "visible_time_span_s must be positive, got {}",
                self.visualization.visible_time_span_s
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BackpressurePolicy, DecimationMode, IdleStrategy};

    #[test]
    fn test_default_is_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.runtime.log_filter, DEFAULT_LOG_FILTER);
        assert_eq!(config.decimation.target_points, 1920);
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.json")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(Path::new("a.JSON")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(Path::new("a.toml")), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("scope")), ConfigFormat::Toml);
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("scope.toml");

        let mut config = PipelineConfig::default();
        config.runtime.idle = IdleStrategy::Sleep(50);
        config.ingest.channel_count = 4;
        config.decimation.mode = DecimationMode::Lttb;
        config.visualization.queue.policy = BackpressurePolicy::Block;
        config.visualization.debug_dump_dir = Some(dir.path().join("dump"));
        config.save(&path).unwrap();

        let loaded = PipelineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scope.json");

        let mut config = PipelineConfig::default();
        config.decimation.mode = DecimationMode::None;
        config.save(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.trim_start().starts_with('{'));
        assert_eq!(PipelineConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config = PipelineConfig::parse(
            "[ingest]\nchannel_count = 3\n\n[visualization]\ndisplay_points = 1000\n",
            ConfigFormat::Toml,
        )
        .unwrap();
        assert_eq!(config.ingest.channel_count, 3);
        assert_eq!(config.visualization.display_points, 1000);
        assert_eq!(config.decimation, DecimationSettings::default());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.ingest.channel_count = 9;
        assert!(matches!(config.validate(), Err(ScopeError::Config(_))));

        let mut config = PipelineConfig::default();
        config.decimation.queue.capacity = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.visualization.visible_time_span_s = 0.0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.ingest.block_samples = config.ingest.ring_capacity + 1;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.visualization.display_points = 1;
        assert!(config.validate().is_err());
        config.visualization.display_points = 2;
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = PipelineConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ScopeError::Config(_)));
    }

    #[test]
    fn test_malformed_file_has_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "ingest = 5").unwrap();
        let err = PipelineConfig::load(&path).unwrap_err();
        assert!(matches!(err, ScopeError::WithContext { .. }));
    }
}
