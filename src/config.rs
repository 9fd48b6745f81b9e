//! Construction parameters for the network and its trainer.
//!
//! Every struct deserializes from JSON so an experiment can be described in a single file:
//!
//! ```json
//! {
//!   "model": { "num_inputs": 784, "num_hidden": 64, "num_outputs": 10 },
//!   "trainer": { "learning_rate": 0.001, "max_epochs": 10, "desired_accuracy": 0.95 },
//!   "seed": 7
//! }
//! ```

use std::{fs, path::Path, path::PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// How the output layer turns logits into a distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoftmaxMode {
    /// `exp(x) / sum(exp(x))` as is. Large logits overflow to `inf`/`NaN`.
    #[default]
    Unstabilized,
    /// Subtract the maximum logit before exponentiating.
    Stabilized,
}

/// Order in which the training set is visited each epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShuffleMode {
    /// Keep the dataset order.
    None,
    /// Shuffle the whole range `[0, n)`.
    #[default]
    Full,
    /// Shuffle `[0, n - 1)`, leaving the last sample in place.
    ExcludeLast,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelConfig {
    pub num_inputs: usize,
    pub num_hidden: usize,
    pub num_outputs: usize,
    #[serde(default)]
    pub softmax: SoftmaxMode,
}

impl ModelConfig {
    pub fn new(num_inputs: usize, num_hidden: usize, num_outputs: usize) -> Self {
        Self {
            num_inputs,
            num_hidden,
            num_outputs,
            softmax: SoftmaxMode::default(),
        }
    }

    pub fn softmax(self, softmax: SoftmaxMode) -> Self {
        Self { softmax, ..self }
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_inputs == 0 || self.num_hidden == 0 || self.num_outputs == 0 {
            return Err(Error::config(format!(
                "layer dimensions must be positive, got {}x{}x{}",
                self.num_inputs, self.num_hidden, self.num_outputs
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrainerConfig {
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,
    #[serde(default = "default_max_epochs")]
    pub max_epochs: usize,
    #[serde(default = "default_desired_accuracy")]
    pub desired_accuracy: f32,
    /// Factor applied to the accumulated deltas before each new rank-1 update.
    #[serde(default = "default_delta_decay")]
    pub delta_decay: f32,
    #[serde(default)]
    pub shuffle: ShuffleMode,
    /// File receiving `<num_hidden> <average_epoch_seconds>` after training.
    #[serde(default)]
    pub timing_log: Option<PathBuf>,
}

fn default_learning_rate() -> f32 {
    0.001
}

fn default_max_epochs() -> usize {
    10
}

fn default_desired_accuracy() -> f32 {
    0.95
}

fn default_delta_decay() -> f32 {
    0.01
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            learning_rate: default_learning_rate(),
            max_epochs: default_max_epochs(),
            desired_accuracy: default_desired_accuracy(),
            delta_decay: default_delta_decay(),
            shuffle: ShuffleMode::default(),
            timing_log: None,
        }
    }
}

impl TrainerConfig {
    pub fn new(learning_rate: f32, max_epochs: usize, desired_accuracy: f32) -> Self {
        Self {
            learning_rate,
            max_epochs,
            desired_accuracy,
            ..Self::default()
        }
    }

    pub fn shuffle(self, shuffle: ShuffleMode) -> Self {
        Self { shuffle, ..self }
    }

    pub fn timing_log(self, path: impl Into<PathBuf>) -> Self {
        Self {
            timing_log: Some(path.into()),
            ..self
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0) {
            return Err(Error::config(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.max_epochs == 0 {
            return Err(Error::config("max epochs must be positive"));
        }
        if !(self.desired_accuracy > 0.0 && self.desired_accuracy <= 1.0) {
            return Err(Error::config(format!(
                "desired accuracy must be in (0, 1], got {}",
                self.desired_accuracy
            )));
        }
        if !(0.0..1.0).contains(&self.delta_decay) {
            return Err(Error::config(format!(
                "delta decay must be in [0, 1), got {}",
                self.delta_decay
            )));
        }
        Ok(())
    }
}

/// A whole run: network shape, trainer settings and the seed for weights and shuffling.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExperimentConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub trainer: TrainerConfig,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl ExperimentConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.model.validate()?;
        config.trainer.validate()?;
        Ok(config)
    }
}

/// Read and validate an [`ExperimentConfig`] from a JSON file.
pub fn load_config(path: impl AsRef<Path>) -> Result<ExperimentConfig> {
    let contents = fs::read_to_string(path)?;
    ExperimentConfig::from_json(&contents)
}
