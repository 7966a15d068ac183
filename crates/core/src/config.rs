//! Runtime configuration for the renderer.
//!
//! Values start from [`RendererConfig::default`] and can be adjusted with the
//! `with_*` setters, loaded from a TOML file with
//! [`RendererConfig::load_from_file`], and overridden from `VKFRAME_*`
//! environment variables. [`RendererConfig::from_env`] combines the three.
//!
//! ```toml
//! frames_in_flight = 2
//! vsync = true
//! msaa_samples = 4
//! post_pass = false
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

/// Upper bound on frame slots the renderer will allocate.
pub const MAX_FRAMES_IN_FLIGHT: u32 = 3;

/// Environment variable naming the config file read by [`RendererConfig::from_env`].
pub const CONFIG_PATH_ENV: &str = "VKFRAME_CONFIG";

/// Config file read from the working directory when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_FILE: &str = "vkframe.toml";

/// `(variable, field)` pairs applied by [`RendererConfig::overlay`]. Values
/// are TOML literals, e.g. `VKFRAME_VSYNC=true`.
const ENV_OVERRIDES: [(&str, &str); 5] = [
    ("VKFRAME_FRAMES_IN_FLIGHT", "frames_in_flight"),
    ("VKFRAME_VSYNC", "vsync"),
    ("VKFRAME_MSAA", "msaa_samples"),
    ("VKFRAME_VALIDATION", "enable_validation"),
    ("VKFRAME_POST_PASS", "post_pass"),
];

/// Renderer settings chosen before device creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RendererConfig {
    /// Number of frame slots recorded ahead of the GPU.
    pub frames_in_flight: u32,
    /// Lock presentation to the display refresh (FIFO).
    pub vsync: bool,
    /// Requested sample count for the offscreen pass. Clamped to the device limit.
    pub msaa_samples: u32,
    /// Enable the Khronos validation layer when available.
    pub enable_validation: bool,
    /// Record the post pass between the offscreen and UI passes.
    pub post_pass: bool,
    /// Window title.
    pub window_title: String,
    /// Initial window width in physical pixels.
    pub window_width: u32,
    /// Initial window height in physical pixels.
    pub window_height: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            vsync: false,
            msaa_samples: 4,
            enable_validation: cfg!(debug_assertions),
            post_pass: true,
            window_title: "vkframe".to_string(),
            window_width: 1280,
            window_height: 720,
        }
    }
}

impl RendererConfig {
    /// Config file named by `VKFRAME_CONFIG`, else `vkframe.toml` if present,
    /// else defaults. `VKFRAME_*` overrides are applied on top.
    pub fn from_env() -> Result<Self> {
        let base = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::load_from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::load_from_file(DEFAULT_CONFIG_FILE)?
            }
            None => Self::default(),
        };
        base.overlay(|key| std::env::var(key).ok())
    }

    /// Loads and validates a TOML config file. Missing keys keep their defaults.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Overlay the `VKFRAME_*` values returned by `lookup` onto `self`, then
    /// validate.
    pub fn overlay<F>(self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut table = match toml::Value::try_from(&self) {
            Ok(toml::Value::Table(table)) => table,
            Ok(_) => return Err(Error::Internal("config did not serialize to a table".into())),
            Err(e) => return Err(Error::Config(e.to_string())),
        };

        let mut overridden = false;
        for (var, field) in ENV_OVERRIDES {
            if let Some(value) = lookup(var) {
                table.insert(field.to_string(), env_value(var, &value)?);
                overridden = true;
            }
        }
        if !overridden {
            self.validate()?;
            return Ok(self);
        }

        let config: Self = toml::Value::Table(table)
            .try_into()
            .map_err(|e| Error::Config(format!("environment override: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_frames_in_flight(mut self, frames: u32) -> Self {
        self.frames_in_flight = frames;
        self
    }

    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    pub fn with_msaa_samples(mut self, samples: u32) -> Self {
        self.msaa_samples = samples;
        self
    }

    pub fn with_validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    pub fn with_post_pass(mut self, enable: bool) -> Self {
        self.post_pass = enable;
        self
    }

    pub fn with_window(mut self, title: impl Into<String>, width: u32, height: u32) -> Self {
        self.window_title = title.into();
        self.window_width = width;
        self.window_height = height;
        self
    }

    /// Check every field is within range.
    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 || self.frames_in_flight > MAX_FRAMES_IN_FLIGHT {
            return Err(Error::Config(format!(
                "frames_in_flight must be in 1..={}, got {}",
                MAX_FRAMES_IN_FLIGHT, self.frames_in_flight
            )));
        }
        if !self.msaa_samples.is_power_of_two() || self.msaa_samples > 64 {
            return Err(Error::Config(format!(
                "msaa_samples must be a power of two up to 64, got {}",
                self.msaa_samples
            )));
        }
        if self.window_width == 0 || self.window_height == 0 {
            return Err(Error::Config(format!(
                "window size must be non-zero, got {}x{}",
                self.window_width, self.window_height
            )));
        }
        Ok(())
    }
}

/// Parses one environment value as a single TOML literal.
fn env_value(var: &str, value: &str) -> Result<toml::Value> {
    let mut parsed: toml::Table = toml::from_str(&format!("value = {}", value.trim()))
        .map_err(|_| Error::Config(format!("{var}: expected a TOML value, got '{value}'")))?;
    match parsed.remove("value") {
        Some(value) if parsed.is_empty() => Ok(value),
        _ => Err(Error::Config(format!("{var}: expected a single value, got '{value}'"))),
    }
}
