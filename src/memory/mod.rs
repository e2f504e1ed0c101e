//! Per-class support memory for the meta-adapter
//!
//! `MetaMemory` keeps, for every class, an ordered buffer of the last `M`
//! embeddings seen for that class, most recent first. It is initialized
//! once from a support loader's features and afterwards only mutated by the
//! training loop's post-step ring-shift; the similarity scorer reads it
//! through [`MetaMemory::stacked`].
//!
//! The update applies to every sample keyed by its true label, with no
//! gating on prediction correctness.

use crate::error::{PipelineError, Result};
use candle_core::Tensor;

/// Bounded per-class queues of support embeddings, `[K, M, D]` when stacked
#[derive(Debug, Clone)]
pub struct MetaMemory {
    rows: Vec<Tensor>, // one [M, D] tensor per class
    shots: usize,
    dim: usize,
}

impl MetaMemory {
    /// Initialize from support features `[S, D]` in class-major order
    ///
    /// The support set must contain the same number of embeddings for every
    /// class: `S` must be a multiple of `num_classes`, and rows must be
    /// grouped by class (all of class 0 first, then class 1, and so on).
    pub fn from_support(features: &Tensor, num_classes: usize) -> Result<Self> {
        let (total, dim) = features.dims2()?;
        if num_classes == 0 || total == 0 || total % num_classes != 0 {
            return Err(PipelineError::UnevenSupportSet { total, num_classes });
        }
        let shots = total / num_classes;

        let grouped = features.reshape((num_classes, shots, dim))?;
        let mut rows = Vec::with_capacity(num_classes);
        for class_idx in 0..num_classes {
            rows.push(grouped.get(class_idx)?.detach());
        }

        Ok(Self { rows, shots, dim })
    }

    /// Number of classes
    pub fn num_classes(&self) -> usize {
        self.rows.len()
    }

    /// Buffer length per class
    pub fn shots_per_class(&self) -> usize {
        self.shots
    }

    /// Embedding dimension
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// The memory for one class, `[M, D]`, most recent first
    pub fn class_memory(&self, class_idx: usize) -> Result<&Tensor> {
        self.rows
            .get(class_idx)
            .ok_or(PipelineError::ClassOutOfRange {
                label: class_idx,
                num_classes: self.rows.len(),
            })
    }

    /// The full memory stacked to `[K, M, D]`
    pub fn stacked(&self) -> Result<Tensor> {
        Ok(Tensor::stack(&self.rows, 0)?)
    }

    /// Ring-shift one class's buffer: prepend `embedding`, drop the oldest
    ///
    /// Buffer length stays exactly `M`. Only the addressed class changes.
    pub fn update(&mut self, label: usize, embedding: &Tensor) -> Result<()> {
        if label >= self.rows.len() {
            return Err(PipelineError::ClassOutOfRange {
                label,
                num_classes: self.rows.len(),
            });
        }
        let got = embedding.dims1()?;
        if got != self.dim {
            return Err(PipelineError::DimensionMismatch {
                expected: self.dim,
                got,
            });
        }

        let newest = embedding.detach().unsqueeze(0)?; // [1, D]
        let kept = self.rows[label].narrow(0, 0, self.shots - 1)?;
        self.rows[label] = Tensor::cat(&[&newest, &kept], 0)?;
        Ok(())
    }

    /// Ring-shift for every `(label, embedding)` pair of a batch, in order
    pub fn update_batch(&mut self, labels: &[u32], features: &Tensor) -> Result<()> {
        let (n, _) = features.dims2()?;
        if labels.len() != n {
            return Err(PipelineError::DimensionMismatch {
                expected: n,
                got: labels.len(),
            });
        }
        for (row_idx, &label) in labels.iter().enumerate() {
            let embedding = features.get(row_idx)?;
            self.update(label as usize, &embedding)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    /// Support features where row `i` is the constant vector `i`
    fn indexed_support(total: usize, dim: usize) -> Tensor {
        let data: Vec<f32> = (0..total)
            .flat_map(|i| std::iter::repeat(i as f32).take(dim))
            .collect();
        Tensor::from_vec(data, (total, dim), &Device::Cpu).unwrap()
    }

    fn row_ids(memory: &MetaMemory, class_idx: usize) -> Vec<f32> {
        let rows: Vec<Vec<f32>> = memory.class_memory(class_idx).unwrap().to_vec2().unwrap();
        rows.into_iter().map(|r| r[0]).collect()
    }

    #[test]
    fn test_from_support_shapes() {
        let support = indexed_support(20, 6);
        let memory = MetaMemory::from_support(&support, 5).unwrap();

        assert_eq!(memory.num_classes(), 5);
        assert_eq!(memory.shots_per_class(), 4);
        assert_eq!(memory.dim(), 6);
        assert_eq!(memory.stacked().unwrap().dims(), &[5, 4, 6]);

        // Class-major layout: class 1 holds rows 4..8.
        assert_eq!(row_ids(&memory, 1), vec![4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn test_uneven_support_is_rejected() {
        let support = indexed_support(21, 6);
        let result = MetaMemory::from_support(&support, 5);
        assert!(matches!(
            result,
            Err(PipelineError::UnevenSupportSet {
                total: 21,
                num_classes: 5
            })
        ));
    }

    #[test]
    fn test_update_ring_shifts_one_class() {
        // num_classes=5, M=4, one update to class 2: its oldest entry drops,
        // the new embedding lands in front, other classes stay untouched.
        let support = indexed_support(20, 3);
        let mut memory = MetaMemory::from_support(&support, 5).unwrap();

        let before: Vec<Vec<f32>> = (0..5).map(|c| row_ids(&memory, c)).collect();

        let embedding = Tensor::from_vec(vec![99.0f32; 3], (3,), &Device::Cpu).unwrap();
        memory.update(2, &embedding).unwrap();

        assert_eq!(row_ids(&memory, 2), vec![99.0, 8.0, 9.0, 10.0]);
        for class_idx in [0usize, 1, 3, 4] {
            assert_eq!(row_ids(&memory, class_idx), before[class_idx]);
        }
    }

    #[test]
    fn test_buffer_length_invariant_under_many_updates() {
        let support = indexed_support(12, 4);
        let mut memory = MetaMemory::from_support(&support, 3).unwrap();

        for step in 0..50 {
            let embedding =
                Tensor::from_vec(vec![step as f32; 4], (4,), &Device::Cpu).unwrap();
            memory.update(step % 3, &embedding).unwrap();
            for class_idx in 0..3 {
                assert_eq!(
                    memory.class_memory(class_idx).unwrap().dims(),
                    &[4, 4],
                    "buffer length must stay M after every update"
                );
            }
        }
    }

    #[test]
    fn test_update_rejects_out_of_range_label() {
        let support = indexed_support(6, 2);
        let mut memory = MetaMemory::from_support(&support, 3).unwrap();

        let embedding = Tensor::from_vec(vec![0.0f32; 2], (2,), &Device::Cpu).unwrap();
        assert!(matches!(
            memory.update(3, &embedding),
            Err(PipelineError::ClassOutOfRange {
                label: 3,
                num_classes: 3
            })
        ));
    }

    #[test]
    fn test_update_batch_order() {
        let support = indexed_support(4, 2);
        let mut memory = MetaMemory::from_support(&support, 2).unwrap();

        // Two updates to class 0 in batch order: the second ends up newest.
        let features =
            Tensor::from_vec(vec![10.0f32, 10.0, 11.0, 11.0], (2, 2), &Device::Cpu).unwrap();
        memory.update_batch(&[0, 0], &features).unwrap();

        assert_eq!(row_ids(&memory, 0), vec![11.0, 10.0]);
        assert_eq!(row_ids(&memory, 1), vec![2.0, 3.0]);
    }
}
