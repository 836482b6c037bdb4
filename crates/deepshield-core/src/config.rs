use crate::detector::DetectorConfig;
use crate::liveness::{FlashConfig, PatternConfig, ReferenceConfig};
use crate::roi::{DEFAULT_CENTER_ROI_SIZE, DEFAULT_GLARE_THRESHOLD};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Frame rate assumed when the source reports none, or an unusable one.
pub const DEFAULT_FALLBACK_FPS: f64 = 30.0;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Engine thresholds. Every field has a default; a TOML file only needs the
/// keys it overrides.
///
/// ```toml
/// fallback_fps = 25.0
///
/// [flash]
/// delta_threshold = 4.0
///
/// [detector]
/// score_threshold = 0.6
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub fallback_fps: f64,
    /// Side of the frame-centre ROI used by reference correlation.
    pub center_roi_size: u32,
    /// Luma above which a ROI pixel counts as glare.
    pub glare_pixel_threshold: u8,
    pub flash: FlashConfig,
    pub pattern: PatternConfig,
    pub reference: ReferenceConfig,
    pub detector: DetectorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fallback_fps: DEFAULT_FALLBACK_FPS,
            center_roi_size: DEFAULT_CENTER_ROI_SIZE,
            glare_pixel_threshold: DEFAULT_GLARE_THRESHOLD,
            flash: FlashConfig::default(),
            pattern: PatternConfig::default(),
            reference: ReferenceConfig::default(),
            detector: DetectorConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.fallback_fps.is_finite() && self.fallback_fps > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "fallback_fps must be positive, got {}",
                self.fallback_fps
            )));
        }
        if self.center_roi_size == 0 {
            return Err(ConfigError::Invalid("center_roi_size must be non-zero".into()));
        }
        if self.flash.max_latency_ms < 0.0 {
            return Err(ConfigError::Invalid("flash.max_latency_ms must not be negative".into()));
        }
        self.detector.validate().map_err(ConfigError::Invalid)?;
        Ok(())
    }

    /// `fps` when it is a usable frame rate, else the fallback.
    pub fn effective_fps(&self, fps: Option<f64>) -> f64 {
        match fps {
            Some(f) if f.is_finite() && f > 0.0 => f,
            _ => self.fallback_fps,
        }
    }
}
