/// Config - player settings read from TOML; missing fields take defaults
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tempo in beats per minute; one grid column lasts one beat
    pub bpm: f64,
    /// Velocity used for notes toggled on without an explicit velocity
    pub default_velocity: u8,
    /// MIDI channel 0-15
    pub output_channel: u8,
    /// How far ahead of the clock each scheduling pass fills, in seconds
    pub lookahead_seconds: f64,
    /// Delay between scheduling passes
    pub pass_interval_ms: u64,
    /// Maximum number of undo snapshots
    pub history_capacity: usize,
    /// Substring of the MIDI output port name to connect to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub midi_output: Option<String>,
    /// Substring of the MIDI input port name used for step input
    #[serde(skip_serializing_if = "Option::is_none")]
    pub midi_input: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            default_velocity: 100,
            output_channel: 0,
            lookahead_seconds: 0.1,
            pass_interval_ms: 25,
            history_capacity: 50,
            midi_output: None,
            midi_input: None,
        }
    }
}

impl Config {
    /// `<config dir>/phaseq/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("phaseq").join("config.toml"))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`, or the default location when `None`. A missing file gives defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        Self::from_toml(&std::fs::read_to_string(&path)?)
    }

    fn validate(&self) -> Result<()> {
        if !self.bpm.is_finite() || self.bpm <= 0.0 {
            return Err(Error::Config(format!("bpm must be positive, got {}", self.bpm)));
        }
        if self.output_channel > 15 {
            return Err(Error::Config(format!(
                "output_channel must be 0-15, got {}",
                self.output_channel
            )));
        }
        if !(1..=127).contains(&self.default_velocity) {
            return Err(Error::Config(format!(
                "default_velocity must be 1-127, got {}",
                self.default_velocity
            )));
        }
        if !self.lookahead_seconds.is_finite() || self.lookahead_seconds <= 0.0 {
            return Err(Error::Config("lookahead_seconds must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = Config::from_toml("bpm = 90.0\nmidi_output = \"Focusrite\"").unwrap();
        assert_eq!(config.bpm, 90.0);
        assert_eq!(config.midi_output.as_deref(), Some("Focusrite"));
        assert_eq!(config.lookahead_seconds, 0.1);
        assert_eq!(config.history_capacity, 50);
    }

    #[test]
    fn test_rejects_non_positive_bpm() {
        assert!(matches!(Config::from_toml("bpm = 0.0"), Err(Error::Config(_))));
        assert!(matches!(Config::from_toml("bpm = -3.0"), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_bad_channel() {
        assert!(Config::from_toml("output_channel = 16").is_err());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "default_velocity = 64\npass_interval_ms = 10\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.default_velocity, 64);
        assert_eq!(config.pass_interval_ms, 10);
    }
}
