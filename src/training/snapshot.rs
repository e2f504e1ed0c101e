//! Best-model snapshots
//!
//! A snapshot is a host-resident deep copy of the model's parameter state,
//! decoupled from the live, still-mutating training copy. Exactly one best
//! snapshot exists during a run; it is replaced only on strict validation
//! improvement, restored to the compute device before the final test
//! evaluation, and optionally persisted as a safetensors file.

use crate::error::Result;
use candle_core::{safetensors, Device, Tensor};
use candle_nn::VarMap;
use std::collections::HashMap;
use std::path::Path;

/// Host-resident copy of a model's parameters
#[derive(Debug, Clone)]
pub struct Snapshot {
    tensors: HashMap<String, Tensor>,
    val_accuracy: f64,
}

impl Snapshot {
    /// Deep-copy the current parameter state off the compute device
    pub fn capture(varmap: &VarMap, val_accuracy: f64) -> Result<Self> {
        let data = varmap.data().lock().unwrap();
        let mut tensors = HashMap::with_capacity(data.len());
        for (name, var) in data.iter() {
            // `copy` forces fresh storage so later in-place optimizer
            // updates cannot alias into the snapshot.
            let host = var.as_tensor().detach().to_device(&Device::Cpu)?.copy()?;
            tensors.insert(name.clone(), host);
        }
        Ok(Self {
            tensors,
            val_accuracy,
        })
    }

    /// Validation accuracy that produced this snapshot
    pub fn val_accuracy(&self) -> f64 {
        self.val_accuracy
    }

    /// Number of parameter tensors held
    pub fn num_tensors(&self) -> usize {
        self.tensors.len()
    }

    /// Total number of scalar parameters held
    pub fn parameter_count(&self) -> usize {
        self.tensors.values().map(|t| t.elem_count()).sum()
    }

    /// Write the snapshot back into a live model on `device`
    pub fn restore(&self, varmap: &VarMap, device: &Device) -> Result<()> {
        let data = varmap.data().lock().unwrap();
        for (name, var) in data.iter() {
            if let Some(tensor) = self.tensors.get(name) {
                var.set(&tensor.to_device(device)?)?;
            }
        }
        Ok(())
    }

    /// Persist the parameter state as a safetensors file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        safetensors::save(&self.tensors, path.as_ref())?;
        Ok(())
    }
}
