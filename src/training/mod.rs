//! Training module
//!
//! This module provides:
//! - The training loop with validation-based best-snapshot selection
//! - Learning rate scheduling
//! - Dynamic loss scaling for reduced-precision training
//! - Host-resident model snapshots

mod scaler;
mod scheduler;
mod snapshot;
mod trainer;

pub use scaler::GradScaler;
pub use scheduler::LearningRateScheduler;
pub use snapshot::Snapshot;
pub use trainer::{EpochStats, TrainReport, Trainer};
