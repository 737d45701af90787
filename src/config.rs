use std::{fs, num::NonZeroUsize, path::Path};

use serde::Deserialize;

use crate::{MuonErr, Result};

const DEFAULT_NS_STEPS: NonZeroUsize = NonZeroUsize::new(5).unwrap();

/// Hyperparameters shared by both optimizer variants.
///
/// Every field is optional when deserializing, missing ones take their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MuonConfig {
    /// The step length applied to the orthogonalized update.
    pub lr: f32,
    /// The decay of the momentum buffer, in `[0, 1)`.
    pub momentum: f32,
    /// Whether the orthogonalized value blends the fresh gradient into the buffer.
    pub nesterov: bool,
    /// The amount of Newton-Schulz iterations.
    pub ns_steps: NonZeroUsize,
}

impl Default for MuonConfig {
    fn default() -> Self {
        Self {
            lr: 0.02,
            momentum: 0.95,
            nesterov: true,
            ns_steps: DEFAULT_NS_STEPS,
        }
    }
}

impl MuonConfig {
    /// Loads a config from a JSON file.
    ///
    /// # Arguments
    /// * `path` - The location of the JSON document.
    ///
    /// # Returns
    /// The validated config, or `MuonErr::InvalidConfig` if the file can't be read,
    /// parsed or holds out of range values.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| MuonErr::InvalidConfig(format!("cannot read {}: {e}", path.display())))?;

        Self::from_json_str(&content)
    }

    /// Parses and validates a config from a JSON string.
    ///
    /// # Arguments
    /// * `json` - The JSON document.
    ///
    /// # Returns
    /// The validated config or `MuonErr::InvalidConfig`.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| MuonErr::InvalidConfig(format!("invalid JSON: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    pub fn with_lr(mut self, lr: f32) -> Self {
        self.lr = lr;
        self
    }

    pub fn with_momentum(mut self, momentum: f32) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn with_nesterov(mut self, nesterov: bool) -> Self {
        self.nesterov = nesterov;
        self
    }

    pub fn with_ns_steps(mut self, ns_steps: NonZeroUsize) -> Self {
        self.ns_steps = ns_steps;
        self
    }

    /// Checks that every hyperparameter is within its domain.
    ///
    /// # Returns
    /// `MuonErr::InvalidConfig` describing the first offending field.
    pub fn validate(&self) -> Result<()> {
        if !self.lr.is_finite() || self.lr < 0. {
            return Err(MuonErr::InvalidConfig(format!(
                "lr must be finite and non-negative, got {}",
                self.lr
            )));
        }

        if !(0. ..1.).contains(&self.momentum) {
            return Err(MuonErr::InvalidConfig(format!(
                "momentum must be in [0, 1), got {}",
                self.momentum
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_reference_hyperparameters() {
        let config = MuonConfig::default();
        assert_eq!(config.lr, 0.02);
        assert_eq!(config.momentum, 0.95);
        assert!(config.nesterov);
        assert_eq!(config.ns_steps.get(), 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config = MuonConfig::from_json_str(r#"{ "lr": 0.1, "nesterov": false }"#).unwrap();
        assert_eq!(config.lr, 0.1);
        assert!(!config.nesterov);
        assert_eq!(config.momentum, 0.95);
        assert_eq!(config.ns_steps.get(), 5);
    }

    #[test]
    fn zero_ns_steps_is_rejected_by_the_parser() {
        let err = MuonConfig::from_json_str(r#"{ "ns_steps": 0 }"#).unwrap_err();
        assert!(matches!(err, MuonErr::InvalidConfig(_)));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = MuonConfig::from_json_str(r#"{ "weight_decay": 0.1 }"#).unwrap_err();
        assert!(matches!(err, MuonErr::InvalidConfig(_)));
    }

    #[test]
    fn out_of_range_momentum_is_rejected() {
        for momentum in [1.0, -0.1, f32::NAN] {
            let config = MuonConfig::default().with_momentum(momentum);
            assert!(matches!(config.validate(), Err(MuonErr::InvalidConfig(_))));
        }
    }

    #[test]
    fn negative_or_infinite_lr_is_rejected() {
        for lr in [-0.01, f32::INFINITY] {
            let config = MuonConfig::default().with_lr(lr);
            assert!(matches!(config.validate(), Err(MuonErr::InvalidConfig(_))));
        }
    }

    #[test]
    fn missing_file_is_reported() {
        let err = MuonConfig::from_json_file("/definitely/not/here.json").unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }
}
