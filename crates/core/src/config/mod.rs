use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub detector: DetectorConfig,
    pub render: RenderConfig,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing fields fall back to defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Samples per captured frame. Fixed for the lifetime of a pipeline.
    pub frame_len: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            frame_len: 1024,
        }
    }
}

/// Beat detector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Raw sensitivity as stored by the settings screen. `None` or a negative
    /// value selects the default.
    pub sensitivity: Option<i32>,
    /// Frames of band energy averaged into the adaptive baseline.
    pub history_len: usize,
    /// Start with beat-driven rendering instead of frequency-driven.
    pub beat_mode: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            sensitivity: None,
            history_len: 43,
            beat_mode: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Per-frame multiplier applied to the previous beat flash.
    pub beat_decay: f32,
    /// Weight of the previous frame when smoothing the spectrum colour.
    pub spectrum_smoothing: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            beat_decay: 0.75,
            spectrum_smoothing: 0.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            AppConfig::from_json_str(r#"{ "detector": { "sensitivity": 80 } }"#).unwrap();

        assert_eq!(config.detector.sensitivity, Some(80));
        assert_eq!(config.detector.history_len, 43);
        assert_eq!(config.audio, AudioConfig::default());
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = AppConfig::from_json_str("{ audio: ").unwrap_err();
        assert!(matches!(err, crate::BulbError::Config(_)));
    }
}
