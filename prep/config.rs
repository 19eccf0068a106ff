use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Order in which a patient's visits are laid out along the time axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitOrder {
    /// Row order of the source tables.
    #[default]
    Arrival,
    /// Ascending `VisitDay`; ties keep their arrival order.
    VisitDay,
}

/// Training cohort selection rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CohortConfig {
    /// `LeadStatus` value of an assessment that passed central review.
    pub passed_status: String,
    /// A patient completed follow-up once a passing visit lies strictly beyond this day.
    pub min_followup_day: f64,
}

impl Default for CohortConfig {
    fn default() -> Self {
        Self {
            passed_status: "Passed".to_string(),
            min_followup_day: 120.0,
        }
    }
}

/// Settings that shape the produced tensors. Every setting takes part in the
/// cache fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub cohort: CohortConfig,
    pub visit_order: VisitOrder,
    /// Field delimiter of the study tables; a single ASCII character.
    pub separator: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cohort: CohortConfig::default(),
            visit_order: VisitOrder::Arrival,
            separator: ",".to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("The separator must be exactly one ASCII character, got {0:?}")]
    InvalidSeparator(String),
}

impl PipelineConfig {
    /// Loads a configuration from a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config: PipelineConfig = toml::from_str(&toml_string)?;
        config.separator_byte()?;
        Ok(config)
    }

    /// Saves the configuration in human-readable TOML.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn separator_byte(&self) -> Result<u8, ConfigError> {
        match self.separator.as_bytes() {
            [byte] if byte.is_ascii() => Ok(*byte),
            _ => Err(ConfigError::InvalidSeparator(self.separator.clone())),
        }
    }
}
