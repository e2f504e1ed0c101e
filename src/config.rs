//! Run configuration for few-shot adaptation experiments
//!
//! Each flag gates one of the conditional behaviors of the training loop:
//! which parameters train, whether target features are re-derived per step,
//! and whether the meta-adapter path is active.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which encoder side is being fine-tuned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncoderTarget {
    /// Only the vision tower
    Vision,
    /// Only the text tower
    Text,
    /// Both towers
    Both,
}

impl Default for EncoderTarget {
    fn default() -> Self {
        Self::Both
    }
}

/// Classification task type, determining where reference embeddings come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskType {
    /// Queries are compared against text-derived class embeddings
    ImageToText,
    /// Queries are compared against image-derived class embeddings
    ImageToImage,
}

impl Default for TaskType {
    fn default() -> Self {
        Self::ImageToText
    }
}

/// Configuration for a single training/evaluation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Enable low-rank adaptation (parameters register under the `.lora_` namespace)
    pub enable_lora: bool,
    /// Enable bias-only tuning (only `.bias` leaves train)
    pub enable_bitfit: bool,
    /// Enable the cross-attention meta-adapter over a support-set memory
    pub enable_meta_adapter: bool,
    /// Which encoder side the adapters apply to
    pub encoder: EncoderTarget,
    /// Task type
    pub task: TaskType,
    /// Iteration multiplier; total optimizer steps = n_iters * shots
    pub n_iters: usize,
    /// Number of labeled examples per class
    pub shots: usize,
    /// Initial learning rate
    pub lr: f64,
    /// Scalar multiplying cosine similarities before the softmax
    pub logit_scale: f64,
    /// Run the scoring path in reduced precision (f16)
    pub half_precision: bool,
    /// Directory the best checkpoint is written to; `None` disables persistence
    pub save_path: Option<PathBuf>,
    /// Checkpoint file stem
    pub filename: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            enable_lora: false,
            enable_bitfit: false,
            enable_meta_adapter: false,
            encoder: EncoderTarget::default(),
            task: TaskType::default(),
            n_iters: 100,
            shots: 4,
            lr: 2e-4,
            logit_scale: 100.0,
            half_precision: true,
            save_path: None,
            filename: "best_model".to_string(),
        }
    }
}

impl RunConfig {
    /// Total number of optimizer steps for this run
    pub fn total_iters(&self) -> usize {
        self.n_iters * self.shots
    }

    /// Enable or disable the meta-adapter path
    pub fn with_meta_adapter(mut self, enable: bool) -> Self {
        self.enable_meta_adapter = enable;
        self
    }

    /// Enable or disable bias-only tuning
    pub fn with_bitfit(mut self, enable: bool) -> Self {
        self.enable_bitfit = enable;
        self
    }

    /// Set the encoder side
    pub fn with_encoder(mut self, encoder: EncoderTarget) -> Self {
        self.encoder = encoder;
        self
    }

    /// Set the task type
    pub fn with_task(mut self, task: TaskType) -> Self {
        self.task = task;
        self
    }

    /// Set the checkpoint destination
    pub fn with_save_path(mut self, dir: PathBuf, filename: impl Into<String>) -> Self {
        self.save_path = Some(dir);
        self.filename = filename.into();
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.n_iters == 0 {
            return Err(PipelineError::InvalidConfig(
                "n_iters must be greater than 0".to_string(),
            ));
        }
        if self.shots == 0 {
            return Err(PipelineError::InvalidConfig(
                "shots must be greater than 0".to_string(),
            ));
        }
        if !(self.lr > 0.0 && self.lr.is_finite()) {
            return Err(PipelineError::InvalidConfig(format!(
                "lr ({}) must be positive and finite",
                self.lr
            )));
        }
        if !(self.logit_scale > 0.0 && self.logit_scale.is_finite()) {
            return Err(PipelineError::InvalidConfig(format!(
                "logit_scale ({}) must be positive and finite",
                self.logit_scale
            )));
        }
        if self.filename.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "filename must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
