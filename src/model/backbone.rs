//! Reference two-tower embedding backbone
//!
//! A compact stand-in for the pretrained vision-language backbone: a vision
//! tower projecting flattened pixels and a text tower projecting prompt
//! features into a shared embedding space. The real pretrained model is a
//! swappable collaborator behind the same surface; everything downstream
//! only sees `[N, D]` embeddings.

use crate::error::{PipelineError, Result};
use candle_core::Tensor;
use candle_nn::{linear, Linear, Module, VarBuilder};
use serde::{Deserialize, Serialize};

/// Configuration for the two-tower backbone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackboneConfig {
    /// Flattened image input dimension (C * H * W)
    pub vision_input: usize,
    /// Prompt feature dimension
    pub text_input: usize,
    /// Hidden layer width shared by both towers
    pub hidden_dim: usize,
    /// Output embedding dimension
    pub embed_dim: usize,
    /// Dropout rate applied in training mode
    pub dropout: f64,
}

impl Default for BackboneConfig {
    fn default() -> Self {
        Self {
            vision_input: 3 * 32 * 32,
            text_input: 64,
            hidden_dim: 256,
            embed_dim: 128,
            dropout: 0.1,
        }
    }
}

impl BackboneConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.vision_input == 0 || self.text_input == 0 {
            return Err(PipelineError::InvalidConfig(
                "tower input dimensions must be greater than 0".to_string(),
            ));
        }
        if self.hidden_dim == 0 || self.embed_dim == 0 {
            return Err(PipelineError::InvalidConfig(
                "hidden_dim and embed_dim must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.dropout) {
            return Err(PipelineError::InvalidConfig(format!(
                "dropout ({}) must be between 0 and 1",
                self.dropout
            )));
        }
        Ok(())
    }
}

/// One projection tower: linear -> relu -> dropout -> linear
#[derive(Debug)]
pub struct Tower {
    fc1: Linear,
    fc2: Linear,
    dropout: f64,
}

impl Tower {
    /// Create a tower under the given variable namespace
    pub fn new(
        input_dim: usize,
        hidden_dim: usize,
        output_dim: usize,
        dropout: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        let fc1 = linear(input_dim, hidden_dim, vb.pp("fc1"))?;
        let fc2 = linear(hidden_dim, output_dim, vb.pp("fc2"))?;
        Ok(Self { fc1, fc2, dropout })
    }

    /// Forward pass; dropout is active only in training mode
    pub fn forward(&self, x: &Tensor, training: bool) -> Result<Tensor> {
        let x = self.fc1.forward(x)?;
        let x = x.relu()?;
        let x = if training && self.dropout > 0.0 {
            candle_nn::ops::dropout(&x, self.dropout as f32)?
        } else {
            x
        };
        Ok(self.fc2.forward(&x)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn create_test_vb() -> (VarMap, VarBuilder<'static>) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        (varmap, vb)
    }

    #[test]
    fn test_tower_forward() {
        let (_varmap, vb) = create_test_vb();
        let tower = Tower::new(16, 32, 8, 0.1, vb).unwrap();

        let x = Tensor::randn(0f32, 1f32, (4, 16), &Device::Cpu).unwrap();
        let out = tower.forward(&x, false).unwrap();

        assert_eq!(out.dims(), &[4, 8]);
    }

    #[test]
    fn test_config_validation() {
        let mut config = BackboneConfig::default();
        assert!(config.validate().is_ok());

        config.embed_dim = 0;
        assert!(config.validate().is_err());

        config = BackboneConfig::default();
        config.dropout = 1.5;
        assert!(config.validate().is_err());
    }
}
