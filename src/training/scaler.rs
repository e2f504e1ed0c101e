//! Dynamic loss scaling for reduced-precision training
//!
//! Scales the loss before backpropagation so small gradients survive f16
//! arithmetic, then unscales the gradients before the optimizer update.
//! When any unscaled gradient is non-finite the step is skipped and the
//! scale backs off; after a streak of clean steps the scale grows again.

use crate::error::Result;
use candle_core::{DType, Tensor, Var};
use candle_nn::optim::Optimizer;

/// Gradient scaler with dynamic scale adjustment
#[derive(Debug, Clone)]
pub struct GradScaler {
    scale: f64,
    growth_factor: f64,
    backoff_factor: f64,
    growth_interval: usize,
    clean_steps: usize,
}

impl GradScaler {
    /// Create a scaler with the usual defaults (scale 2^16, grow x2 every
    /// 2000 clean steps, back off x0.5 on overflow)
    pub fn new() -> Self {
        Self::with_params(65536.0, 2.0, 0.5, 2000)
    }

    /// Create a scaler with explicit parameters
    pub fn with_params(
        init_scale: f64,
        growth_factor: f64,
        backoff_factor: f64,
        growth_interval: usize,
    ) -> Self {
        Self {
            scale: init_scale,
            growth_factor,
            backoff_factor,
            growth_interval: growth_interval.max(1),
            clean_steps: 0,
        }
    }

    /// Current loss scale
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Scaled backward pass, unscale, finite check, optimizer step
    ///
    /// Returns `true` when the optimizer stepped, `false` when non-finite
    /// gradients forced a skip (the scale is halved in that case).
    pub fn step<O: Optimizer>(
        &mut self,
        loss: &Tensor,
        optimizer: &mut O,
        vars: &[Var],
    ) -> Result<bool> {
        let scaled_loss = (loss * self.scale)?;
        let mut grads = scaled_loss.backward()?;

        let mut finite = true;
        for var in vars {
            let grad = match grads.get(var.as_tensor()) {
                Some(grad) => grad.clone(),
                None => continue,
            };
            let grad = (grad / self.scale)?;
            let probe = grad.sum_all()?.to_dtype(DType::F32)?.to_scalar::<f32>()?;
            if !probe.is_finite() {
                finite = false;
            }
            grads.insert(var.as_tensor(), grad);
        }

        if finite {
            optimizer.step(&grads)?;
            self.clean_steps += 1;
            if self.clean_steps >= self.growth_interval {
                self.scale *= self.growth_factor;
                self.clean_steps = 0;
            }
        } else {
            self.scale *= self.backoff_factor;
            self.clean_steps = 0;
        }

        Ok(finite)
    }
}

impl Default for GradScaler {
    fn default() -> Self {
        Self::new()
    }
}
