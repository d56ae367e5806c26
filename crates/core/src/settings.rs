//! Configuration management for the ad engine.
//!
//! Settings load from the embedded `adserve.toml` layered with an
//! `ADSERVE__`-prefixed environment overlay, then deserialize into typed
//! structs. Hosts embedding the engine can also supply TOML directly via
//! [`Settings::from_toml`].

use std::str;

use config::{Config, Environment, File, FileFormat};
use error_stack::{Report, ResultExt};
use serde::Deserialize;

use crate::error::AdServeError;

/// Serving and rotation knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServingSettings {
    /// Seconds between rotations when more than one ad is eligible.
    #[serde(default = "default_rotation_interval")]
    pub rotation_interval_secs: u64,
}

fn default_rotation_interval() -> u64 {
    30
}

impl Default for ServingSettings {
    fn default() -> Self {
        ServingSettings {
            rotation_interval_secs: default_rotation_interval(),
        }
    }
}

/// Performance recorder knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct RecorderSettings {
    /// Best-effort retries for repository writes before the event is dropped.
    #[serde(default = "default_write_retries")]
    pub write_retries: u32,
    /// Maximum user-agent fragment length stored on performance events.
    #[serde(default = "default_user_agent_fragment_len")]
    pub user_agent_fragment_len: usize,
}

fn default_write_retries() -> u32 {
    2
}

fn default_user_agent_fragment_len() -> usize {
    64
}

impl Default for RecorderSettings {
    fn default() -> Self {
        RecorderSettings {
            write_retries: default_write_retries(),
            user_agent_fragment_len: default_user_agent_fragment_len(),
        }
    }
}

/// Synthetic session id configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    /// HMAC key for synthetic session ids.
    pub secret_key: String,
    /// Handlebars template combined into the HMAC input.
    pub template: String,
}

/// Top-level engine settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub serving: ServingSettings,
    #[serde(default)]
    pub recorder: RecorderSettings,
    pub session: SessionSettings,
}

impl Settings {
    /// Load settings from the embedded default TOML plus environment overlay.
    pub fn new() -> Result<Self, Report<AdServeError>> {
        let toml_bytes = include_bytes!("../../../adserve.toml");
        let toml_str = str::from_utf8(toml_bytes).change_context(AdServeError::Configuration {
            message: "Embedded adserve.toml is not valid UTF-8".to_string(),
        })?;

        Self::from_toml(toml_str)
    }

    /// Load settings from a TOML string plus environment overlay.
    pub fn from_toml(toml_str: &str) -> Result<Self, Report<AdServeError>> {
        let environment = Environment::default().prefix("ADSERVE").separator("__");

        let toml = File::from_str(toml_str, FileFormat::Toml);
        let config = Config::builder()
            .add_source(toml)
            .add_source(environment)
            .build()
            .change_context(AdServeError::Configuration {
                message: "Failed to build configuration".to_string(),
            })?;

        config
            .try_deserialize()
            .change_context(AdServeError::Configuration {
                message: "Failed to deserialize settings".to_string(),
            })
    }
}
