//! Configuration loading (`easel.toml`).
//!
//! Unknown fields are ignored so the file format can grow without
//! breaking older binaries; missing sections fall back to defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CanvasConfig {
    pub width: i32,
    pub height: i32,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self { width: 512, height: 512 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Dabs per demo stroke.
    pub stroke_dabs: usize,
    /// Background color as 0xAARRGGBB-style BGRA integer.
    pub background: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { stroke_dabs: 96, background: 0xff_ff_ff_ff }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub canvas: CanvasConfig,
    pub session: SessionConfig,
}

impl Config {
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = toml::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        info!(target: "runtime", path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Load `easel.toml` from the working directory if present, defaults
    /// otherwise.
    pub fn discover() -> Self {
        let path = Path::new("easel.toml");
        if path.exists() {
            match Self::load_from(path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!(target: "runtime", error = %e, "config unusable, using defaults");
                }
            }
        }
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_sections_missing() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.canvas.width, 512);
        assert_eq!(config.session.stroke_dabs, 96);
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let text = r#"
            [canvas]
            width = 256
            height = 128
            depth = 42

            [future_section]
            x = 1
        "#;
        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.canvas.width, 256);
        assert_eq!(config.canvas.height, 128);
    }

    #[test]
    fn load_from_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_from(&dir.path().join("nope.toml")).unwrap_err();
        assert!(err.to_string().contains("nope.toml"));
    }
}
