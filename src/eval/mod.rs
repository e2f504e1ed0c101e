//! Evaluation loop
//!
//! Runs the model in inference mode over a full loader exactly once,
//! accumulating a weighted accuracy and collecting per-sample images, true
//! labels, predicted labels and full similarity vectors as dense arrays in
//! loader-iteration order. The forward pass runs under the configured
//! (possibly reduced) precision; accuracy accumulation is always full
//! precision. Deterministic given a fixed model state and loader order.

use crate::config::RunConfig;
use crate::data::InMemoryLoader;
use crate::error::{PipelineError, Result};
use crate::memory::MetaMemory;
use crate::model::FewShotModel;
use crate::scoring::{batch_accuracy, forward_logits, l2_normalize, predictions};
use crate::targets::vision_target_features;
use candle_core::{DType, Tensor};
use ndarray::{Array1, Array2, Array4};

/// Weighted accuracy accumulator: `sum(batch_acc * batch_len) / total`
#[derive(Debug, Clone, Default)]
pub struct AccuracyMeter {
    weighted_sum: f64,
    total: usize,
}

impl AccuracyMeter {
    /// Create an empty meter
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one batch's accuracy
    pub fn update(&mut self, batch_accuracy: f64, batch_len: usize) {
        self.weighted_sum += batch_accuracy * batch_len as f64;
        self.total += batch_len;
    }

    /// Samples accumulated so far
    pub fn total_samples(&self) -> usize {
        self.total
    }

    /// Current weighted accuracy; 0 when nothing has been accumulated
    pub fn value(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.weighted_sum / self.total as f64
        }
    }
}

/// Raw evaluation outputs for downstream diagnostics
#[derive(Debug, Clone)]
pub struct EvalOutput {
    /// Overall weighted accuracy
    pub accuracy: f64,
    /// Evaluated images, `[N, C, H, W]`, loader-iteration order
    pub images: Array4<f32>,
    /// True labels
    pub targets: Array1<u32>,
    /// Predicted labels
    pub predictions: Array1<u32>,
    /// Full similarity vectors, `[N, K]`
    pub similarities: Array2<f32>,
}

impl EvalOutput {
    /// Number of evaluated samples
    pub fn num_samples(&self) -> usize {
        self.targets.len()
    }

    /// Direct `mean(predictions == targets)` over the collected arrays
    ///
    /// Must agree with the weighted accumulation in [`evaluate`].
    pub fn recomputed_accuracy(&self) -> f64 {
        if self.targets.is_empty() {
            return 0.0;
        }
        let correct = self
            .targets
            .iter()
            .zip(self.predictions.iter())
            .filter(|(t, p)| t == p)
            .count();
        correct as f64 / self.targets.len() as f64
    }
}

/// Evaluate the model over a full loader
///
/// `target_features [K, D]` is the static reference set. When the
/// meta-adapter path is active, exactly one of `(meta_query, meta_key)` or
/// `support_loader` must be resolvable; the pair takes precedence, and a
/// missing source is a configuration error raised before any batch is
/// processed.
pub fn evaluate(
    model: &mut FewShotModel,
    config: &RunConfig,
    loader: &InMemoryLoader,
    target_features: &Tensor,
    support_loader: Option<&InMemoryLoader>,
    meta_query: Option<&Tensor>,
    meta_key: Option<&MetaMemory>,
) -> Result<EvalOutput> {
    if config.enable_meta_adapter
        && (meta_query.is_none() || meta_key.is_none())
        && support_loader.is_none()
    {
        return Err(PipelineError::MissingMetaSource);
    }

    model.set_training(false);
    let (num_classes, _) = target_features.dims2()?;

    // Resolve the reference set once: the memory is frozen for the whole
    // pass, so the adapted prototypes are constant across batches.
    let references = if config.enable_meta_adapter {
        let (query, stacked) = match (meta_query, meta_key) {
            (Some(query), Some(memory)) => (query.clone(), memory.stacked()?),
            _ => {
                let support_loader = support_loader.ok_or(PipelineError::MissingMetaSource)?;
                let support = vision_target_features(model, support_loader)?.detach();
                let memory = MetaMemory::from_support(&support, num_classes)?;
                (target_features.detach(), memory.stacked()?)
            }
        };
        let adapter = model.meta_adapter().ok_or_else(|| {
            PipelineError::InvalidConfig(
                "meta-adapter enabled but the model exposes no meta-adapter module".to_string(),
            )
        })?;
        l2_normalize(&adapter.forward(&query, &stacked, &stacked)?)?
    } else {
        target_features.clone()
    };

    let (_, channels, height, width) = loader.image_dims()?;
    let mut meter = AccuracyMeter::new();
    let mut image_data: Vec<f32> = Vec::new();
    let mut all_targets: Vec<u32> = Vec::new();
    let mut all_predictions: Vec<u32> = Vec::new();
    let mut similarity_data: Vec<f32> = Vec::new();

    for batch in loader.iter() {
        let batch = batch?.to_device(model.device())?;
        let features = l2_normalize(&model.encode_image(&batch.images)?)?;
        let logits = forward_logits(
            &features,
            &references,
            config.logit_scale,
            config.half_precision,
        )?;

        let batch_len = batch.len()?;
        meter.update(batch_accuracy(&logits, &batch.labels)?, batch_len);

        image_data.extend(batch.images.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?);
        all_targets.extend(batch.labels_vec()?);
        all_predictions.extend(predictions(&logits)?);
        similarity_data.extend(logits.flatten_all()?.to_vec1::<f32>()?);
    }

    let n = all_targets.len();
    let image_len = image_data.len();
    let images = Array4::from_shape_vec((n, channels, height, width), image_data).map_err(|_| {
        PipelineError::DimensionMismatch {
            expected: n * channels * height * width,
            got: image_len,
        }
    })?;
    let similarity_len = similarity_data.len();
    let similarities = Array2::from_shape_vec((n, num_classes), similarity_data).map_err(|_| {
        PipelineError::DimensionMismatch {
            expected: n * num_classes,
            got: similarity_len,
        }
    })?;

    Ok(EvalOutput {
        accuracy: meter.value(),
        images,
        targets: Array1::from_vec(all_targets),
        predictions: Array1::from_vec(all_predictions),
        similarities,
    })
}
