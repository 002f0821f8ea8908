use crate::algorithms::{CenterOfMassConfig, Ecc, PhaseCorrelationConfig, RigidRegistration, ShiftMethod};
use crate::alignment::AlignOptions;
use crate::logging::LoggingConfig;
use crate::tilt::{ComTiltConfig, MaxImageConfig, MinimizeConfig, TiltMethod};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub shifts: ShiftConfig,
    pub tilt: TiltConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShiftConfig {
    pub method: ShiftMethod,
    /// Anchor frame; the frame nearest zero tilt when unset.
    pub pivot: Option<usize>,
    pub phase_correlation: PhaseCorrelationConfig,
    pub ecc: Ecc,
    pub center_of_mass: CenterOfMassConfig,
    pub rigid: RigidRegistration,
}

impl Default for ShiftConfig {
    fn default() -> Self {
        Self {
            method: ShiftMethod::PhaseCorrelation,
            pivot: None,
            phase_correlation: PhaseCorrelationConfig::default(),
            ecc: Ecc::default(),
            center_of_mass: CenterOfMassConfig::default(),
            rigid: RigidRegistration::default(),
        }
    }
}

impl ShiftConfig {
    pub fn align_options(&self) -> AlignOptions {
        AlignOptions {
            pivot: self.pivot,
            phase_correlation: self.phase_correlation.clone(),
            ecc: self.ecc.clone(),
            center_of_mass: self.center_of_mass.clone(),
            rigid: self.rigid.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TiltConfig {
    pub method: TiltMethod,
    pub com: ComTiltConfig,
    pub maximage: MaxImageConfig,
    pub minimize: MinimizeConfig,
}

impl Default for TiltConfig {
    fn default() -> Self {
        Self {
            method: TiltMethod::MaxImage,
            com: ComTiltConfig::default(),
            maximage: MaxImageConfig::default(),
            minimize: MinimizeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    /// Format implied by a file extension; TOML unless it is `.json`.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        match path.as_ref().extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content =
            fs::read_to_string(path).with_context(|| format!("cannot read config file {}", path.display()))?;

        if content.trim_start().starts_with('{') {
            serde_json::from_str(&content).with_context(|| format!("invalid JSON config {}", path.display()))
        } else {
            toml::from_str(&content).with_context(|| format!("invalid TOML config {}", path.display()))
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P, format: ConfigFormat) -> Result<()> {
        let content = match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self)?,
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
        };

        fs::write(path.as_ref(), content)
            .with_context(|| format!("cannot write config file {}", path.as_ref().display()))?;
        Ok(())
    }

    /// Every problem found, not just the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if let Err(e) = self.shifts.ecc.validate() {
            errors.push(e.to_string());
        }
        if let Err(e) = self.shifts.center_of_mass.validate() {
            errors.push(e.to_string());
        }
        let rigid = &self.shifts.rigid;
        if rigid.max_levels == 0 || rigid.max_iterations == 0 {
            errors.push("rigid registration needs at least one level and one iteration".to_string());
        }
        if rigid.min_level_size < 4 {
            errors.push("rigid registration min_level_size must be at least 4".to_string());
        }

        let com = &self.tilt.com;
        if com.iterative && com.max_iterations == 0 {
            errors.push("iterative center-of-mass tilt alignment needs max_iterations >= 1".to_string());
        }
        if com.rotation_tolerance <= 0.0 || com.shift_tolerance <= 0.0 {
            errors.push("center-of-mass tilt tolerances must be positive".to_string());
        }
        if let Some(positions) = &com.positions {
            if positions.len() < 2 {
                errors.push("center-of-mass tilt alignment needs at least 2 sample positions".to_string());
            }
        }
        if let Err(e) = self.tilt.maximage.validate() {
            errors.push(e.to_string());
        }
        let minimize = &self.tilt.minimize;
        for (name, (lo, hi)) in [("shift", minimize.shift_bounds), ("rotation", minimize.rotation_bounds)] {
            if !(lo < hi) {
                errors.push(format!("minimize {} bounds ({}, {}) are empty", name, lo, hi));
            }
        }
        if minimize.tolerance < 0.0 {
            errors.push("minimize tolerance must be non-negative".to_string());
        }

        if let Err(e) = self.logging.validate() {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

pub fn load_config_or_default(config_path: Option<&str>) -> Config {
    match config_path {
        Some(path) => match Config::load_from_file(path) {
            Ok(config) => {
                if let Err(errors) = config.validate() {
                    tracing::warn!(
                        path = path,
                        errors = ?errors,
                        "Configuration invalid, using defaults"
                    );
                    Config::default()
                } else {
                    config
                }
            }
            Err(e) => {
                tracing::warn!(path = path, error = %format!("{:#}", e), "Failed to load config, using defaults");
                Config::default()
            }
        },
        None => Config::default(),
    }
}
