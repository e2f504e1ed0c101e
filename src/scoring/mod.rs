//! Scaled cosine similarity scoring and reference-set strategy
//!
//! Scores are `logit_scale * Q @ R^T` over L2-normalized query embeddings
//! `Q [N, D]` and a reference set `R [K, D]`; predictions are the argmax
//! over the class axis with first-max tie-breaking. The reference set is
//! either the static target features, targets re-derived from the live
//! encoder each step, or the meta-adapter's support-conditioned prototypes;
//! which one applies is decided once, from the run configuration.

use crate::config::{EncoderTarget, RunConfig, TaskType};
use crate::error::Result;
use candle_core::{DType, Tensor, D};

/// Row-wise L2 normalization
pub fn l2_normalize(x: &Tensor) -> Result<Tensor> {
    let norm = (x.sqr()?.sum_keepdim(D::Minus1)?.sqrt()? + 1e-12)?;
    Ok(x.broadcast_div(&norm)?)
}

/// Scaled cosine similarity: `logit_scale * q @ refs^T`
///
/// Pure function of its inputs; both operands are expected unit-norm.
pub fn cosine_logits(queries: &Tensor, references: &Tensor, logit_scale: f64) -> Result<Tensor> {
    Ok((queries.matmul(&references.t()?)? * logit_scale)?)
}

/// Scoring forward pass with the configured precision
///
/// Under reduced precision the similarity itself runs in f16; the returned
/// logits are always f32 so loss and accuracy accumulate in full precision.
pub fn forward_logits(
    features: &Tensor,
    references: &Tensor,
    logit_scale: f64,
    half_precision: bool,
) -> Result<Tensor> {
    let logits = if half_precision {
        let q = features.to_dtype(DType::F16)?;
        let r = references.to_dtype(DType::F16)?;
        cosine_logits(&q, &r, logit_scale)?
    } else {
        cosine_logits(features, references, logit_scale)?
    };
    Ok(logits.to_dtype(DType::F32)?)
}

/// Predicted class indices, first-max tie-breaking
pub fn predictions(logits: &Tensor) -> Result<Vec<u32>> {
    Ok(logits.argmax(D::Minus1)?.to_vec1::<u32>()?)
}

/// Fraction of correct predictions in a batch
pub fn batch_accuracy(logits: &Tensor, labels: &Tensor) -> Result<f64> {
    let preds = logits.argmax(D::Minus1)?;
    let correct = preds.eq(labels)?.to_dtype(DType::F32)?.mean_all()?;
    Ok(correct.to_scalar::<f32>()? as f64)
}

/// When target features are re-derived from the live encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetRefresh {
    /// Targets are computed once and held fixed
    Never,
    /// Re-encode the class prompts every step
    TextEachStep,
    /// Re-encode the target image loader every step
    VisionEachStep,
}

/// Which reference set the scorer uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoringMode {
    /// The (possibly refreshed) target feature set
    StaticTargets,
    /// The meta-adapter's output over the support memory
    MetaAdapted,
}

/// Reference-set strategy, selected once at configuration time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferencePlan {
    pub refresh: TargetRefresh,
    pub scoring: ScoringMode,
}

impl ReferencePlan {
    /// Derive the plan from a run configuration
    ///
    /// Targets are re-derived per step when the fine-tuned encoder side is
    /// the one the reference embeddings come from: low-rank adaptation on
    /// the text side for image-to-text, low-rank adaptation on the vision
    /// side for image-to-image, or bias tuning in any setup.
    pub fn from_config(config: &RunConfig) -> Self {
        let text_side = matches!(config.encoder, EncoderTarget::Text | EncoderTarget::Both);
        let vision_side = matches!(config.encoder, EncoderTarget::Vision | EncoderTarget::Both);

        let refresh_needed = (config.enable_lora
            && config.task == TaskType::ImageToText
            && text_side)
            || (config.enable_lora && config.task == TaskType::ImageToImage && vision_side)
            || config.enable_bitfit;

        let refresh = if !refresh_needed {
            TargetRefresh::Never
        } else {
            match config.task {
                TaskType::ImageToText => TargetRefresh::TextEachStep,
                TaskType::ImageToImage => TargetRefresh::VisionEachStep,
            }
        };

        let scoring = if config.enable_meta_adapter {
            ScoringMode::MetaAdapted
        } else {
            ScoringMode::StaticTargets
        };

        Self { refresh, scoring }
    }
}
