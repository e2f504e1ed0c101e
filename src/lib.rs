//! # Few-Shot Vision Adapters
//!
//! This library implements a few-shot visual-classification research
//! pipeline on top of a pretrained vision-language embedding model, using
//! the Candle ML framework.
//!
//! ## Overview
//!
//! Incoming images are encoded into a shared embedding space and classified
//! by scaled cosine similarity against per-class reference embeddings.
//! Three parameter-efficient adaptation mechanisms can shape that
//! comparison:
//!
//! - Low-rank adaptation of the encoder towers (reference set re-derived
//!   from the live encoder as it trains)
//! - Bias-only tuning
//! - A cross-attention meta-adapter that turns static class embeddings into
//!   support-conditioned prototypes backed by an online per-class memory
//!
//! ## Modules
//!
//! - `model` - The two-tower backbone, the meta-adapter, parameter selection
//! - `scoring` - Scaled cosine similarity and the reference-set strategy
//! - `memory` - The meta-adapter's per-class support memory
//! - `training` - The training loop, LR scheduling, loss scaling, snapshots
//! - `eval` - The evaluation loop and its raw outputs
//! - `targets` - Text- and vision-derived target features
//! - `data` - Batches, loaders, the class catalog
//! - `diagnostics` - Accuracy and clustering diagnostics
//! - `config` - The run configuration surface

pub mod config;
pub mod data;
pub mod diagnostics;
pub mod error;
pub mod eval;
pub mod memory;
pub mod model;
pub mod scoring;
pub mod targets;
pub mod training;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{EncoderTarget, RunConfig, TaskType};
    pub use crate::data::{Batch, ClassCatalog, InMemoryLoader};
    pub use crate::diagnostics::{
        adjusted_rand_index, clustering_report, confusion_matrix, per_class_accuracy,
        top_misclassified, ClassAccuracy, ClusteringReport, FailureCase,
    };
    pub use crate::error::{PipelineError, Result};
    pub use crate::eval::{evaluate, AccuracyMeter, EvalOutput};
    pub use crate::memory::MetaMemory;
    pub use crate::model::{trainable_vars, BackboneConfig, FewShotModel, MetaAdapter};
    pub use crate::scoring::{
        batch_accuracy, cosine_logits, forward_logits, l2_normalize, predictions,
        ReferencePlan, ScoringMode, TargetRefresh,
    };
    pub use crate::targets::{text_target_features, vision_class_targets, vision_target_features};
    pub use crate::training::{
        EpochStats, GradScaler, LearningRateScheduler, Snapshot, TrainReport, Trainer,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
