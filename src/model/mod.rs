//! Model surface for the few-shot pipeline
//!
//! This module provides:
//! - The two-tower reference backbone
//! - The cross-attention meta-adapter
//! - `FewShotModel`, the assembly the training and evaluation loops drive
//! - Trainable-parameter selection for the adapter configurations

mod backbone;
mod meta_adapter;

pub use backbone::{BackboneConfig, Tower};
pub use meta_adapter::MetaAdapter;

use crate::config::{EncoderTarget, RunConfig};
use crate::error::{PipelineError, Result};
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};

/// The model the pipeline trains and evaluates
///
/// Exposes image/text encoders, an optional meta-adapter module, a
/// train/eval mode switch, and parameter state through its [`VarMap`] for
/// checkpointing. Encoder outputs are raw; callers normalize.
pub struct FewShotModel {
    vision: Tower,
    text: Tower,
    meta_adapter: Option<MetaAdapter>,
    varmap: VarMap,
    device: Device,
    config: BackboneConfig,
    training: bool,
}

impl FewShotModel {
    /// Build a model; the meta-adapter module is only created when requested
    pub fn new(config: BackboneConfig, enable_meta_adapter: bool, device: &Device) -> Result<Self> {
        config.validate()?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);

        let vision = Tower::new(
            config.vision_input,
            config.hidden_dim,
            config.embed_dim,
            config.dropout,
            vb.pp("vision"),
        )?;
        let text = Tower::new(
            config.text_input,
            config.hidden_dim,
            config.embed_dim,
            config.dropout,
            vb.pp("text"),
        )?;
        let meta_adapter = if enable_meta_adapter {
            Some(MetaAdapter::new(config.embed_dim, vb.pp("meta_adapter"))?)
        } else {
            None
        };

        Ok(Self {
            vision,
            text,
            meta_adapter,
            varmap,
            device: device.clone(),
            config,
            training: false,
        })
    }

    /// Encode a batch of images `[N, C, H, W]` into raw embeddings `[N, D]`
    pub fn encode_image(&self, images: &Tensor) -> Result<Tensor> {
        let flat = images.flatten_from(1)?;
        let got = flat.dim(1)?;
        if got != self.config.vision_input {
            return Err(PipelineError::DimensionMismatch {
                expected: self.config.vision_input,
                got,
            });
        }
        self.vision.forward(&flat, self.training)
    }

    /// Encode prompt features `[K, F]` into raw embeddings `[K, D]`
    pub fn encode_text(&self, prompts: &Tensor) -> Result<Tensor> {
        let got = prompts.dim(1)?;
        if got != self.config.text_input {
            return Err(PipelineError::DimensionMismatch {
                expected: self.config.text_input,
                got,
            });
        }
        self.text.forward(prompts, self.training)
    }

    /// The meta-adapter module, when the model carries one
    pub fn meta_adapter(&self) -> Option<&MetaAdapter> {
        self.meta_adapter.as_ref()
    }

    /// Switch between training mode (dropout active) and inference mode
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    /// Whether the model is in training mode
    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Parameter state, for optimizers and checkpointing
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// The compute device the parameters live on
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Output embedding dimension
    pub fn embed_dim(&self) -> usize {
        self.config.embed_dim
    }

    /// Backbone configuration
    pub fn config(&self) -> &BackboneConfig {
        &self.config
    }
}

/// Select the parameters that train under the given run configuration
///
/// The selection happens once, before the optimizer is built: the encoder
/// target filters tower namespaces, BitFit restricts the selection to bias
/// leaves, low-rank adaptation restricts it to the `.lora_` namespace that
/// low-rank capability modules register under, and the meta-adapter
/// namespace joins whenever that path is enabled.
pub fn trainable_vars(model: &FewShotModel, run: &RunConfig) -> Vec<Var> {
    let data = model.varmap().data().lock().unwrap();
    let mut named: Vec<(&String, &Var)> = data.iter().collect();
    named.sort_by(|a, b| a.0.cmp(b.0));

    let mut vars = Vec::new();
    for (name, var) in named {
        if name.starts_with("meta_adapter.") {
            if run.enable_meta_adapter {
                vars.push(var.clone());
            }
            continue;
        }
        let encoder_ok = match run.encoder {
            EncoderTarget::Vision => name.starts_with("vision."),
            EncoderTarget::Text => name.starts_with("text."),
            EncoderTarget::Both => true,
        };
        if !encoder_ok {
            continue;
        }
        if run.enable_bitfit {
            if name.ends_with(".bias") {
                vars.push(var.clone());
            }
            continue;
        }
        if run.enable_lora {
            if name.contains(".lora_") {
                vars.push(var.clone());
            }
            continue;
        }
        vars.push(var.clone());
    }
    vars
}
