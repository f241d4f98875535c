//! Persistent render settings for headless runs.

use crate::util::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Render configuration loadable from a JSON file.
///
/// Every field has a default so partial files work; unknown integrator
/// options are carried as raw JSON and applied by name through
/// [`crate::util::Options::apply`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    // Output
    pub width: u32,
    pub height: u32,
    pub exposure: f32,

    // Render
    pub integrator: String,
    pub samples: u32,
    pub threads: u32, // 0 = all cores
    pub denoise: bool,

    // Integrator-specific option overrides, applied by name
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            exposure: 1.0,
            integrator: "atmosphere".to_string(),
            samples: 64,
            threads: 0,
            denoise: false,
            options: serde_json::Map::new(),
        }
    }
}

impl RenderSettings {
    /// Load settings from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reject configurations that cannot produce an image.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::invalid(format!(
                "output size {}x{} has zero pixels",
                self.width, self.height
            )));
        }
        if self.samples == 0 {
            return Err(Error::invalid("sample count must be at least 1"));
        }
        if !(self.exposure.is_finite() && self.exposure > 0.0) {
            return Err(Error::invalid(format!("exposure {} is not positive", self.exposure)));
        }
        Ok(())
    }
}
