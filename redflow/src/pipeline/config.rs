//! Configuration of the reduction composer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::errors::ConfigError;
use crate::stages::{
    AutoMaskConfig, BackgroundSubtractionConfig, DarkSubtractionConfig, IntegrationConfig, PolarizationConfig,
    SpoofConfig,
};

/// Where the composer gets the integration mask from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum MaskSetting {
    /// The caller passes the mask explicitly.
    Array,
    /// A Fit2D `.msk` or numpy `.npy` file.
    Path(PathBuf),
    /// The compressed mask stored under `mask` in the raw start document.
    Default,
    /// Computed per image by the auto mask stage.
    #[default]
    Auto,
    /// No mask at all.
    None,
}

impl FromStr for MaskSetting {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "array" => Ok(Self::Array),
            "default" => Ok(Self::Default),
            "auto" => Ok(Self::Auto),
            "None" | "none" => Ok(Self::None),
            path if path.ends_with(".msk") || path.ends_with(".npy") => Ok(Self::Path(PathBuf::from(path))),
            other => Err(ConfigError::unknown_mask_setting(other)),
        }
    }
}

impl TryFrom<String> for MaskSetting {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MaskSetting> for String {
    fn from(setting: MaskSetting) -> Self {
        setting.to_string()
    }
}

impl fmt::Display for MaskSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Array => f.write_str("array"),
            Self::Path(p) => write!(f, "{}", p.display()),
            Self::Default => f.write_str("default"),
            Self::Auto => f.write_str("auto"),
            Self::None => f.write_str("None"),
        }
    }
}

fn default_dark_key() -> String {
    "dark_collection_uid".to_string()
}

fn default_calibration_key() -> String {
    "calibration_collection_uid".to_string()
}

fn default_background_key() -> String {
    "bkgd_sample_uid".to_string()
}

#[allow(clippy::unnecessary_wraps)]
const fn default_calibration_history() -> Option<usize> {
    Some(1)
}

/// Everything the composer needs to assemble a reduction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Dark subtraction parameters.
    #[serde(default)]
    pub dark: DarkSubtractionConfig,
    /// Background subtraction parameters.
    #[serde(default)]
    pub background: BackgroundSubtractionConfig,
    /// Polarization correction parameters.
    #[serde(default)]
    pub polarization: PolarizationConfig,
    /// Auto mask parameters, used with [`MaskSetting::Auto`].
    #[serde(default)]
    pub mask: AutoMaskConfig,
    /// Integration parameters.
    #[serde(default)]
    pub integration: IntegrationConfig,
    /// How the calibration is read out of the raw start when no stored one exists.
    #[serde(default)]
    pub spoof: SpoofConfig,
    /// Start key linking a raw run to its dark.
    #[serde(default = "default_dark_key")]
    pub dark_key: String,
    /// Start key linking a raw run to its stored calibration.
    #[serde(default = "default_calibration_key")]
    pub calibration_key: String,
    /// Start key naming the background sample of a raw run.
    #[serde(default = "default_background_key")]
    pub background_key: String,
    /// Mask source.
    #[serde(default)]
    pub mask_setting: MaskSetting,
    /// Distinct calibrations remembered before a geometry is rebuilt.
    /// `None` remembers all of them.
    #[serde(default = "default_calibration_history")]
    pub calibration_history: Option<usize>,
    /// Pick the dark or background closest in time to the raw run instead
    /// of the newest.
    #[serde(default)]
    pub temporal_proximity: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dark: DarkSubtractionConfig::default(),
            background: BackgroundSubtractionConfig::default(),
            polarization: PolarizationConfig::default(),
            mask: AutoMaskConfig::default(),
            integration: IntegrationConfig::default(),
            spoof: SpoofConfig::default(),
            dark_key: default_dark_key(),
            calibration_key: default_calibration_key(),
            background_key: default_background_key(),
            mask_setting: MaskSetting::default(),
            calibration_history: default_calibration_history(),
            temporal_proximity: false,
        }
    }
}

impl PipelineConfig {
    /// Parses and validates a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ConfigError::new(format!("Invalid pipeline configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the mask source.
    #[must_use]
    pub fn with_mask_setting(mut self, setting: MaskSetting) -> Self {
        self.mask_setting = setting;
        self
    }

    /// Sets the polarization parameters.
    #[must_use]
    pub fn with_polarization(mut self, polarization: PolarizationConfig) -> Self {
        self.polarization = polarization;
        self
    }

    /// Sets the integration parameters.
    #[must_use]
    pub fn with_integration(mut self, integration: IntegrationConfig) -> Self {
        self.integration = integration;
        self
    }

    /// Sets the auto mask parameters.
    #[must_use]
    pub fn with_mask(mut self, mask: AutoMaskConfig) -> Self {
        self.mask = mask;
        self
    }

    /// Sets the dark subtraction parameters.
    #[must_use]
    pub fn with_dark(mut self, dark: DarkSubtractionConfig) -> Self {
        self.dark = dark;
        self
    }

    /// Sets the calibration history.
    #[must_use]
    pub const fn with_calibration_history(mut self, history: Option<usize>) -> Self {
        self.calibration_history = history;
        self
    }

    /// Enables temporal proximity selection.
    #[must_use]
    pub const fn with_temporal_proximity(mut self, enabled: bool) -> Self {
        self.temporal_proximity = enabled;
        self
    }

    /// Checks every stage configuration and the composer options.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.background.validate()?;
        self.polarization.validate()?;
        self.mask.validate()?;
        self.integration.validate()?;
        for (name, key) in [
            ("dark_key", &self.dark_key),
            ("calibration_key", &self.calibration_key),
            ("background_key", &self.background_key),
            ("spoof.start_key", &self.spoof.start_key),
        ] {
            if key.is_empty() {
                return Err(ConfigError::invalid_parameter(name, "must not be empty"));
            }
        }
        if let MaskSetting::Path(path) = &self.mask_setting {
            if !path.is_file() {
                return Err(ConfigError::mask_file(&path.display().to_string(), "file does not exist"));
            }
        }
        Ok(())
    }
}
