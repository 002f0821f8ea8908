//! Logging configuration
//!
//! Global level, output destinations and per-component levels for the
//! estimator, composer, tilt and orchestrator targets.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Components with their own tracing target under `tomo_align::`.
pub const COMPONENTS: [&str; 4] = ["estimator", "composer", "tilt", "orchestrator"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    pub global_level: String,

    pub console_output: bool,

    /// Directory for daily-rolling JSON logs (None = no file logging)
    pub log_directory: Option<PathBuf>,

    /// Include file location in logs
    pub include_file_location: bool,

    /// Shift estimators
    pub estimator_level: String,

    pub composer_level: String,

    /// Tilt-axis estimators and tilt corrections
    pub tilt_level: String,

    pub orchestrator_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            global_level: "info".to_string(),
            console_output: true,
            log_directory: None,
            include_file_location: false,
            estimator_level: "info".to_string(),
            composer_level: "info".to_string(),
            tilt_level: "info".to_string(),
            orchestrator_level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Verbose configuration with file output under `logs/`
    pub fn development() -> Self {
        Self {
            global_level: "debug".to_string(),
            console_output: true,
            log_directory: Some(PathBuf::from("logs")),
            include_file_location: true,
            estimator_level: "trace".to_string(),
            composer_level: "debug".to_string(),
            tilt_level: "debug".to_string(),
            orchestrator_level: "debug".to_string(),
        }
    }

    /// Warnings only, console off
    pub fn quiet() -> Self {
        Self {
            global_level: "warn".to_string(),
            console_output: false,
            estimator_level: "warn".to_string(),
            composer_level: "warn".to_string(),
            tilt_level: "warn".to_string(),
            orchestrator_level: "warn".to_string(),
            ..Self::default()
        }
    }

    /// Check every level name and the log directory's parent.
    pub fn validate(&self) -> Result<(), String> {
        let levels = [
            ("global_level", &self.global_level),
            ("estimator_level", &self.estimator_level),
            ("composer_level", &self.composer_level),
            ("tilt_level", &self.tilt_level),
            ("orchestrator_level", &self.orchestrator_level),
        ];
        for (name, level) in levels {
            if !VALID_LEVELS.contains(&level.as_str()) {
                return Err(format!(
                    "Invalid {}: {}. Must be one of: {:?}",
                    name, level, VALID_LEVELS
                ));
            }
        }

        if let Some(ref log_dir) = self.log_directory {
            if let Some(parent) = log_dir.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(format!("Log directory parent does not exist: {:?}", parent));
                }
            }
        }

        Ok(())
    }

    /// Effective level for a component; unknown names fall back to the
    /// global level.
    pub fn get_component_level(&self, component: &str) -> &str {
        match component {
            "estimator" | "algorithms" => &self.estimator_level,
            "composer" => &self.composer_level,
            "tilt" => &self.tilt_level,
            "orchestrator" | "alignment" => &self.orchestrator_level,
            _ => &self.global_level,
        }
    }

    /// `EnvFilter` directives: the crate at the global level plus one
    /// directive per component target.
    pub fn filter_directives(&self) -> String {
        let mut directives = vec![format!("tomo_align={}", self.global_level)];
        for component in COMPONENTS {
            directives.push(format!(
                "tomo_align::{}={}",
                component,
                self.get_component_level(component)
            ));
        }
        directives.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.global_level, "info");
        assert!(config.console_output);
        assert!(config.log_directory.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = LoggingConfig::default();
        config.tilt_level = "loud".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.contains("tilt_level"));

        config.tilt_level = "debug".to_string();
        config.log_directory = Some(PathBuf::from("/definitely/not/here/logs"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_component_level_selection() {
        let config = LoggingConfig::development();
        assert_eq!(config.get_component_level("estimator"), "trace");
        assert_eq!(config.get_component_level("tilt"), "debug");
        assert_eq!(config.get_component_level("unknown"), "debug");
    }

    #[test]
    fn test_filter_directives() {
        let config = LoggingConfig {
            estimator_level: "trace".to_string(),
            ..LoggingConfig::quiet()
        };
        let directives = config.filter_directives();
        assert!(directives.starts_with("tomo_align=warn"));
        assert!(directives.contains("tomo_align::estimator=trace"));
        assert!(directives.contains("tomo_align::composer=warn"));
    }
}
