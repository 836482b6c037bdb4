use anyhow::{Context, Result};
use deepshield_core::EngineConfig;
use std::path::PathBuf;

/// CLI configuration, loaded from environment variables.
pub struct Config {
    /// Directory holding the detector asset.
    pub model_dir: PathBuf,
    /// Optional TOML file with engine thresholds.
    pub config_path: Option<PathBuf>,
    /// Overrides `fallback_fps` from the thresholds file.
    pub fallback_fps: Option<f64>,
}

impl Config {
    /// Load configuration from `DEEPSHIELD_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("DEEPSHIELD_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| deepshield_core::default_model_dir());

        Self {
            model_dir,
            config_path: std::env::var("DEEPSHIELD_CONFIG").ok().map(PathBuf::from),
            fallback_fps: env_f64("DEEPSHIELD_FALLBACK_FPS"),
        }
    }

    /// Apply command-line flags over the environment.
    pub fn with_overrides(mut self, model_dir: Option<PathBuf>, config_path: Option<PathBuf>) -> Self {
        if let Some(dir) = model_dir {
            self.model_dir = dir;
        }
        if config_path.is_some() {
            self.config_path = config_path;
        }
        self
    }

    pub fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config_path {
            Some(path) => EngineConfig::load(path)
                .with_context(|| format!("failed to load engine config {}", path.display()))?,
            None => EngineConfig::default(),
        };
        if let Some(fps) = self.fallback_fps.filter(|f| f.is_finite() && *f > 0.0) {
            config.fallback_fps = fps;
        }
        Ok(config)
    }
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
