//! Learning rate schedules
//!
//! The training loop anneals the learning rate from its initial value down
//! to a small floor with a cosine curve over the full iteration budget; a
//! constant schedule and a warmup variant are available for experiments.

use serde::{Deserialize, Serialize};

/// Learning rate schedule, a pure function of the step index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LearningRateScheduler {
    /// Fixed learning rate
    Constant { lr: f64 },
    /// Cosine annealing from `initial_lr` to `min_lr` over `total_steps`
    CosineAnnealing {
        initial_lr: f64,
        min_lr: f64,
        total_steps: usize,
    },
    /// Linear warmup to `initial_lr`, then cosine annealing to `min_lr`
    WarmupCosine {
        initial_lr: f64,
        min_lr: f64,
        warmup_steps: usize,
        total_steps: usize,
    },
}

impl LearningRateScheduler {
    /// Constant schedule
    pub fn constant(lr: f64) -> Self {
        Self::Constant { lr }
    }

    /// Cosine annealing schedule
    ///
    /// `lr(t) = min_lr + 0.5 * (initial_lr - min_lr) * (1 + cos(pi * t / total_steps))`
    pub fn cosine_annealing(initial_lr: f64, total_steps: usize, min_lr: f64) -> Self {
        Self::CosineAnnealing {
            initial_lr,
            min_lr,
            total_steps: total_steps.max(1),
        }
    }

    /// Warmup followed by cosine annealing
    pub fn warmup_cosine(
        initial_lr: f64,
        warmup_steps: usize,
        total_steps: usize,
        min_lr: f64,
    ) -> Self {
        Self::WarmupCosine {
            initial_lr,
            min_lr,
            warmup_steps,
            total_steps: total_steps.max(1),
        }
    }

    /// Learning rate after `current_step` completed steps
    pub fn step(&self, current_step: usize) -> f64 {
        match *self {
            Self::Constant { lr } => lr,

            Self::CosineAnnealing {
                initial_lr,
                min_lr,
                total_steps,
            } => cosine(initial_lr, min_lr, current_step, total_steps),

            Self::WarmupCosine {
                initial_lr,
                min_lr,
                warmup_steps,
                total_steps,
            } => {
                if current_step < warmup_steps {
                    initial_lr * (current_step as f64 + 1.0) / warmup_steps as f64
                } else {
                    let annealed = current_step - warmup_steps;
                    let span = total_steps.saturating_sub(warmup_steps).max(1);
                    cosine(initial_lr, min_lr, annealed, span)
                }
            }
        }
    }

    /// The schedule's first `n_steps` values (useful for inspection)
    pub fn schedule(&self, n_steps: usize) -> Vec<f64> {
        (0..n_steps).map(|step| self.step(step)).collect()
    }
}

fn cosine(initial_lr: f64, min_lr: f64, step: usize, total_steps: usize) -> f64 {
    let progress = (step as f64 / total_steps as f64).min(1.0);
    let curve = (std::f64::consts::PI * progress).cos();
    min_lr + 0.5 * (initial_lr - min_lr) * (1.0 + curve)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_constant_schedule() {
        let scheduler = LearningRateScheduler::constant(0.01);
        assert_eq!(scheduler.step(0), 0.01);
        assert_eq!(scheduler.step(1000), 0.01);
    }

    #[test]
    fn test_cosine_annealing_endpoints() {
        let scheduler = LearningRateScheduler::cosine_annealing(2e-4, 400, 1e-6);

        assert_relative_eq!(scheduler.step(0), 2e-4, epsilon = 1e-12);
        assert_relative_eq!(scheduler.step(400), 1e-6, epsilon = 1e-12);

        let mid = scheduler.step(200);
        assert!(mid < 2e-4 && mid > 1e-6);
    }

    #[test]
    fn test_cosine_annealing_is_monotone_decreasing() {
        let scheduler = LearningRateScheduler::cosine_annealing(0.1, 100, 0.001);
        let schedule = scheduler.schedule(101);
        for window in schedule.windows(2) {
            assert!(window[1] <= window[0] + 1e-12);
        }
    }

    #[test]
    fn test_cosine_holds_floor_past_total_steps() {
        let scheduler = LearningRateScheduler::cosine_annealing(0.1, 10, 0.001);
        assert_relative_eq!(scheduler.step(50), 0.001, epsilon = 1e-12);
    }

    #[test]
    fn test_warmup_then_anneal() {
        let scheduler = LearningRateScheduler::warmup_cosine(0.1, 10, 100, 0.001);

        // Rising through warmup.
        assert!(scheduler.step(0) < scheduler.step(5));
        assert!(scheduler.step(5) < scheduler.step(9));

        // Decaying afterwards.
        assert!(scheduler.step(10) > scheduler.step(60));
        assert_relative_eq!(scheduler.step(100), 0.001, epsilon = 1e-12);
    }
}
