//! Configuration for the noise schedule.
//!
//! The persisted form is a flat JSON object of scalars, as written next to a
//! trained denoiser checkpoint:
//!
//! ```json
//! {"num_train_timesteps": 1000, "beta_start": 0.0001, "beta_end": 0.02,
//!  "beta_schedule": "linear", "variance_type": "small"}
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::error::Category;

use crate::{Error, Result};

/// How beta ranges from `beta_start` to `beta_end` over the training steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BetaSchedule {
    /// Evenly spaced betas.
    Linear,
    /// Evenly spaced square roots of beta, squared afterwards.
    Quad,
}

impl BetaSchedule {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetaSchedule::Linear => "linear",
            BetaSchedule::Quad => "quad",
        }
    }
}

impl FromStr for BetaSchedule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "linear" => Ok(BetaSchedule::Linear),
            "quad" => Ok(BetaSchedule::Quad),
            other => Err(Error::Config(format!(
                "beta schedule '{other}' is not implemented (expected linear or quad)"
            ))),
        }
    }
}

impl TryFrom<String> for BetaSchedule {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<BetaSchedule> for String {
    fn from(value: BetaSchedule) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for BetaSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reverse-step variance policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum VarianceType {
    /// `σ_t² = (1 - ᾱ_{t-1}) / (1 - ᾱ_t) · β_t` (posterior variance).
    Small,
    /// `σ_t² = β_t`.
    Large,
}

impl VarianceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VarianceType::Small => "small",
            VarianceType::Large => "large",
        }
    }
}

impl FromStr for VarianceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "small" => Ok(VarianceType::Small),
            "large" => Ok(VarianceType::Large),
            other => Err(Error::Config(format!(
                "variance type '{other}' is not implemented (expected small or large)"
            ))),
        }
    }
}

impl TryFrom<String> for VarianceType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<VarianceType> for String {
    fn from(value: VarianceType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for VarianceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The scalars needed to rebuild the schedule a model was trained with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Number of training timesteps `T` (default: 1000).
    #[serde(default = "default_num_train_timesteps")]
    pub num_train_timesteps: usize,

    /// Beta at `t = 0` (default: 1e-4).
    #[serde(default = "default_beta_start")]
    pub beta_start: f64,

    /// Beta at `t = T - 1` (default: 0.02).
    #[serde(default = "default_beta_end")]
    pub beta_end: f64,

    #[serde(default = "default_beta_schedule")]
    pub beta_schedule: BetaSchedule,

    #[serde(default = "default_variance_type")]
    pub variance_type: VarianceType,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            num_train_timesteps: default_num_train_timesteps(),
            beta_start: default_beta_start(),
            beta_end: default_beta_end(),
            beta_schedule: default_beta_schedule(),
            variance_type: default_variance_type(),
        }
    }
}

impl ScheduleConfig {
    /// Parse and validate a JSON config.
    ///
    /// Well-formed JSON carrying bad values (an unknown curve or variance
    /// policy, a wrongly typed field) is a [`Error::Config`]; malformed JSON
    /// stays a [`Error::Json`].
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ScheduleConfig = serde_json::from_str(json).map_err(|e| match e.classify() {
            Category::Data => Error::Config(e.to_string()),
            _ => Error::Json(e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check the scalar ranges. Curve and variance policy are already
    /// checked when parsed.
    pub fn validate(&self) -> Result<()> {
        if self.num_train_timesteps == 0 {
            return Err(Error::Config(
                "num_train_timesteps must be at least 1".to_string(),
            ));
        }
        for (name, value) in [("beta_start", self.beta_start), ("beta_end", self.beta_end)] {
            if !(value > 0.0 && value < 1.0) {
                return Err(Error::Config(format!(
                    "{name} must lie in (0, 1), got {value}"
                )));
            }
        }
        Ok(())
    }
}

fn default_num_train_timesteps() -> usize {
    1000
}

fn default_beta_start() -> f64 {
    1e-4
}

fn default_beta_end() -> f64 {
    0.02
}

fn default_beta_schedule() -> BetaSchedule {
    BetaSchedule::Linear
}

fn default_variance_type() -> VarianceType {
    VarianceType::Small
}
