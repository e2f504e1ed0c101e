//! Training loop for few-shot adaptation
//!
//! Drives one optimization run: reduced-precision forward passes through
//! the configured adaptation mechanism, gradient scaling, a cosine-annealed
//! learning rate over a fixed iteration budget, per-epoch validation with
//! best-snapshot tracking, and a final test evaluation.
//!
//! Best-checkpoint selection maximizes validation accuracy. In a few-shot
//! regime the validation split is itself tiny, so this selection signal is
//! noisy; it is kept as-is rather than silently replaced.

use crate::config::{RunConfig, TaskType};
use crate::data::{ClassCatalog, InMemoryLoader};
use crate::error::{PipelineError, Result};
use crate::eval::{evaluate, AccuracyMeter, EvalOutput};
use crate::memory::MetaMemory;
use crate::model::{trainable_vars, FewShotModel};
use crate::scoring::{
    batch_accuracy, forward_logits, l2_normalize, ReferencePlan, ScoringMode, TargetRefresh,
};
use crate::targets::{text_target_features, vision_class_targets, vision_target_features};
use crate::training::{GradScaler, LearningRateScheduler, Snapshot};
use candle_nn::optim::Optimizer;
use candle_nn::{AdamW, ParamsAdamW};
use std::path::PathBuf;

/// Per-epoch training statistics
#[derive(Debug, Clone)]
pub struct EpochStats {
    /// Epoch index, starting at 0
    pub epoch: usize,
    /// Learning rate at the end of the epoch
    pub lr: f64,
    /// Weighted training accuracy over the epoch's batches
    pub train_accuracy: f64,
    /// Sample-weighted mean training loss
    pub train_loss: f64,
    /// Validation accuracy after the epoch
    pub val_accuracy: f64,
}

/// Result of a training run
#[derive(Debug)]
pub struct TrainReport {
    /// Best validation accuracy seen across epochs
    pub best_val_accuracy: f64,
    /// Test accuracy of the restored best model
    pub test_accuracy: f64,
    /// Optimizer steps performed; always `n_iters * shots`
    pub iterations: usize,
    /// Statistics for every epoch, including a truncated final one
    pub epochs: Vec<EpochStats>,
    /// Where the best checkpoint was written, when persistence is configured
    pub checkpoint: Option<PathBuf>,
    /// Raw test-evaluation outputs for downstream diagnostics
    pub test_output: EvalOutput,
}

/// Trainer owning the model for the duration of a run
pub struct Trainer {
    config: RunConfig,
    model: FewShotModel,
}

impl Trainer {
    /// Create a trainer; the configuration is validated eagerly
    pub fn new(config: RunConfig, model: FewShotModel) -> Result<Self> {
        config.validate()?;
        if config.enable_meta_adapter && model.meta_adapter().is_none() {
            return Err(PipelineError::InvalidConfig(
                "meta-adapter enabled but the model exposes no meta-adapter module".to_string(),
            ));
        }
        Ok(Self { config, model })
    }

    /// The run configuration
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// The live model
    pub fn model(&self) -> &FewShotModel {
        &self.model
    }

    /// Consume the trainer, returning the model (best state restored after
    /// a completed [`fit`](Self::fit))
    pub fn into_model(self) -> FewShotModel {
        self.model
    }

    /// Run one full optimization: train, validate per epoch, restore the
    /// best snapshot, evaluate on the test split, optionally persist
    pub fn fit(
        &mut self,
        catalog: &ClassCatalog,
        train_loader: &InMemoryLoader,
        val_loader: &InMemoryLoader,
        test_loader: &InMemoryLoader,
        target_loader: Option<&InMemoryLoader>,
    ) -> Result<TrainReport> {
        let device = self.model.device().clone();
        let num_classes = catalog.num_classes();
        let plan = ReferencePlan::from_config(&self.config);

        if train_loader.num_samples()? == 0 {
            return Err(PipelineError::InvalidConfig(
                "training loader is empty".to_string(),
            ));
        }

        if plan.refresh == TargetRefresh::VisionEachStep || self.config.task == TaskType::ImageToImage
        {
            if target_loader.is_none() {
                return Err(PipelineError::InvalidConfig(
                    "image-to-image task requires a target loader".to_string(),
                ));
            }
        }

        // Initial target features are a fixed reference snapshot; gradients
        // only flow through them when they are re-derived inside the loop.
        self.model.set_training(false);
        let mut target_features = match self.config.task {
            TaskType::ImageToText => text_target_features(&self.model, catalog)?.detach(),
            TaskType::ImageToImage => {
                let loader = target_loader.ok_or_else(|| {
                    PipelineError::InvalidConfig(
                        "image-to-image task requires a target loader".to_string(),
                    )
                })?;
                vision_class_targets(&self.model, loader, num_classes)?.detach()
            }
        };

        // Meta-adapter memory: support features extracted over the
        // validation loader, class-major, reshaped to [K, M, D]; the query
        // stays the target-feature snapshot taken here.
        let (meta_query, mut meta_memory) = if self.config.enable_meta_adapter {
            let support = vision_target_features(&self.model, val_loader)?.detach();
            let memory = MetaMemory::from_support(&support, num_classes)?;
            (Some(target_features.detach()), Some(memory))
        } else {
            (None, None)
        };

        let total_iters = self.config.total_iters();
        let vars = trainable_vars(&self.model, &self.config);
        if vars.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "the adapter configuration selects no trainable parameters".to_string(),
            ));
        }
        let params = ParamsAdamW {
            lr: self.config.lr,
            beta1: 0.9,
            beta2: 0.999,
            weight_decay: 1e-2,
            ..Default::default()
        };
        let mut optimizer = AdamW::new(vars.clone(), params)?;
        let scheduler = LearningRateScheduler::cosine_annealing(self.config.lr, total_iters, 1e-6);
        let mut scaler = GradScaler::new();

        let mut count_iters = 0usize;
        let mut current_lr = self.config.lr;
        let mut best: Option<Snapshot> = None;
        let mut epochs: Vec<EpochStats> = Vec::new();

        while count_iters < total_iters {
            self.model.set_training(true);
            let mut train_meter = AccuracyMeter::new();
            let mut loss_sum = 0.0f64;

            for batch in train_loader.iter() {
                let batch = batch?.to_device(&device)?;

                // Re-derive the reference set from the live encoder when the
                // fine-tuned side is the one the references come from.
                match plan.refresh {
                    TargetRefresh::Never => {}
                    TargetRefresh::TextEachStep => {
                        target_features = text_target_features(&self.model, catalog)?;
                    }
                    TargetRefresh::VisionEachStep => {
                        let loader = target_loader.ok_or_else(|| {
                            PipelineError::InvalidConfig(
                                "target refresh requires a target loader".to_string(),
                            )
                        })?;
                        target_features = vision_class_targets(&self.model, loader, num_classes)?;
                    }
                }

                let features = l2_normalize(&self.model.encode_image(&batch.images)?)?;

                let references = match plan.scoring {
                    ScoringMode::MetaAdapted => {
                        let (query, memory) = match (meta_query.as_ref(), meta_memory.as_ref()) {
                            (Some(query), Some(memory)) => (query, memory),
                            _ => return Err(PipelineError::MissingMetaSource),
                        };
                        let stacked = memory.stacked()?;
                        let adapter = self.model.meta_adapter().ok_or_else(|| {
                            PipelineError::InvalidConfig(
                                "meta-adapter enabled but the model exposes no meta-adapter module"
                                    .to_string(),
                            )
                        })?;
                        l2_normalize(&adapter.forward(query, &stacked, &stacked)?)?
                    }
                    ScoringMode::StaticTargets => target_features.clone(),
                };

                let logits = forward_logits(
                    &features,
                    &references,
                    self.config.logit_scale,
                    self.config.half_precision,
                )?;
                let loss = candle_nn::loss::cross_entropy(&logits, &batch.labels)?;

                let batch_len = batch.len()?;
                train_meter.update(batch_accuracy(&logits, &batch.labels)?, batch_len);
                loss_sum += loss.to_scalar::<f32>()? as f64 * batch_len as f64;

                let stepped = scaler.step(&loss, &mut optimizer, &vars)?;
                if !stepped {
                    tracing::debug!(
                        "non-finite gradients at iteration {}; step skipped, loss scale now {}",
                        count_iters,
                        scaler.scale()
                    );
                }
                current_lr = scheduler.step(count_iters + 1);
                optimizer.set_learning_rate(current_lr);

                // The memory shifts for every sample by its true label,
                // using the batch's freshly computed features.
                if let Some(memory) = meta_memory.as_mut() {
                    memory.update_batch(&batch.labels_vec()?, &features.detach())?;
                }

                count_iters += 1;
                if count_iters == total_iters {
                    break;
                }
            }

            let train_loss = if train_meter.total_samples() > 0 {
                loss_sum / train_meter.total_samples() as f64
            } else {
                0.0
            };
            if count_iters < total_iters {
                tracing::info!(
                    "lr: {:.6}, acc: {:.4}, loss: {:.4}",
                    current_lr,
                    train_meter.value(),
                    train_loss
                );
            }

            self.model.set_training(false);
            let val = evaluate(
                &mut self.model,
                &self.config,
                val_loader,
                &target_features,
                None,
                meta_query.as_ref(),
                meta_memory.as_ref(),
            )?;
            tracing::info!("validation accuracy: {:.2}%", val.accuracy * 100.0);

            epochs.push(EpochStats {
                epoch: epochs.len(),
                lr: current_lr,
                train_accuracy: train_meter.value(),
                train_loss,
                val_accuracy: val.accuracy,
            });

            let best_so_far = best.as_ref().map(|s| s.val_accuracy()).unwrap_or(0.0);
            if val.accuracy > best_so_far {
                best = Some(Snapshot::capture(self.model.varmap(), val.accuracy)?);
            }
        }

        // When no epoch improved on zero accuracy, the final live state
        // stands in for the best model, matching the loop's selection rule.
        let best = match best {
            Some(snapshot) => snapshot,
            None => Snapshot::capture(self.model.varmap(), 0.0)?,
        };
        best.restore(self.model.varmap(), &device)?;

        self.model.set_training(false);
        let test_output = evaluate(
            &mut self.model,
            &self.config,
            test_loader,
            &target_features,
            Some(val_loader),
            meta_query.as_ref(),
            meta_memory.as_ref(),
        )?;
        tracing::info!("test accuracy: {:.2}%", test_output.accuracy * 100.0);

        let checkpoint = match &self.config.save_path {
            Some(dir) => {
                let path = dir.join(format!("{}.safetensors", self.config.filename));
                best.save(&path)?;
                tracing::info!("model saved => {}", path.display());
                Some(path)
            }
            None => None,
        };

        Ok(TrainReport {
            best_val_accuracy: best.val_accuracy(),
            test_accuracy: test_output.accuracy,
            iterations: count_iters,
            epochs,
            checkpoint,
            test_output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BackboneConfig;
    use candle_core::Device;

    fn small_backbone() -> BackboneConfig {
        BackboneConfig {
            vision_input: 3 * 4 * 4,
            text_input: 8,
            hidden_dim: 16,
            embed_dim: 8,
            dropout: 0.0,
        }
    }

    #[test]
    fn test_trainer_rejects_missing_meta_module() {
        let config = RunConfig::default().with_meta_adapter(true);
        let model = FewShotModel::new(small_backbone(), false, &Device::Cpu).unwrap();
        assert!(matches!(
            Trainer::new(config, model),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_trainer_rejects_invalid_run_config() {
        let mut config = RunConfig::default();
        config.n_iters = 0;
        let model = FewShotModel::new(small_backbone(), false, &Device::Cpu).unwrap();
        assert!(Trainer::new(config, model).is_err());
    }
}
