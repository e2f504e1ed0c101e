//! Batches, loaders and the class catalog
//!
//! A loader yields `(images, labels, label_features)` triples in a fixed
//! order; iteration order determines the order in which samples accumulate
//! into evaluation outputs and into the meta-memory update sequence.
//! Shuffling, augmentation and dataset-specific decoding happen upstream.

use crate::error::{PipelineError, Result};
use candle_core::{DType, Device, Tensor};

/// A single minibatch
#[derive(Debug, Clone)]
pub struct Batch {
    /// Images, `[N, C, H, W]` f32
    pub images: Tensor,
    /// Class indices, `[N]` u32, each in `[0, num_classes)`
    pub labels: Tensor,
    /// Per-sample label features, passed through untouched
    pub label_features: Option<Tensor>,
}

impl Batch {
    /// Number of samples in the batch
    pub fn len(&self) -> Result<usize> {
        Ok(self.images.dim(0)?)
    }

    /// Whether the batch is empty
    pub fn is_empty(&self) -> bool {
        self.images.dim(0).map(|n| n == 0).unwrap_or(true)
    }

    /// Labels as a host-side vector
    pub fn labels_vec(&self) -> Result<Vec<u32>> {
        Ok(self.labels.to_vec1::<u32>()?)
    }

    /// Move the batch to a compute device
    pub fn to_device(&self, device: &Device) -> Result<Batch> {
        Ok(Batch {
            images: self.images.to_device(device)?,
            labels: self.labels.to_device(device)?,
            label_features: match &self.label_features {
                Some(t) => Some(t.to_device(device)?),
                None => None,
            },
        })
    }
}

/// Deterministic in-memory loader
///
/// Batches a fixed image tensor in order; the final batch may be short.
/// No randomness is introduced internally.
#[derive(Debug, Clone)]
pub struct InMemoryLoader {
    images: Tensor,
    labels: Tensor,
    label_features: Option<Tensor>,
    batch_size: usize,
}

impl InMemoryLoader {
    /// Create a loader over `images [N, C, H, W]` and per-sample labels
    pub fn new(images: Tensor, labels: Vec<u32>, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        let n = images.dim(0)?;
        if labels.len() != n {
            return Err(PipelineError::DimensionMismatch {
                expected: n,
                got: labels.len(),
            });
        }
        let num_labels = labels.len();
        let labels = Tensor::from_vec(labels, (num_labels,), images.device())?;
        Ok(Self {
            images,
            labels,
            label_features: None,
            batch_size,
        })
    }

    /// Attach per-sample label features, `[N, F]`
    pub fn with_label_features(mut self, label_features: Tensor) -> Result<Self> {
        let expected = self.num_samples()?;
        let got = label_features.dim(0)?;
        if got != expected {
            return Err(PipelineError::DimensionMismatch { expected, got });
        }
        self.label_features = Some(label_features);
        Ok(self)
    }

    /// Total number of samples
    pub fn num_samples(&self) -> Result<usize> {
        Ok(self.images.dim(0)?)
    }

    /// Number of batches per pass
    pub fn num_batches(&self) -> Result<usize> {
        let n = self.num_samples()?;
        Ok((n + self.batch_size - 1) / self.batch_size)
    }

    /// Configured batch size
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Image dimensions `(N, C, H, W)`
    pub fn image_dims(&self) -> Result<(usize, usize, usize, usize)> {
        Ok(self.images.dims4()?)
    }

    /// All labels held by the loader
    pub fn labels(&self) -> &Tensor {
        &self.labels
    }

    /// Iterate batches in order
    pub fn iter(&self) -> BatchIter<'_> {
        BatchIter {
            loader: self,
            offset: 0,
        }
    }
}

/// Iterator over a loader's batches
pub struct BatchIter<'a> {
    loader: &'a InMemoryLoader,
    offset: usize,
}

impl<'a> Iterator for BatchIter<'a> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        let total = match self.loader.num_samples() {
            Ok(n) => n,
            Err(e) => return Some(Err(e)),
        };
        if self.offset >= total {
            return None;
        }
        let len = self.loader.batch_size.min(total - self.offset);
        let batch = (|| -> Result<Batch> {
            let images = self.loader.images.narrow(0, self.offset, len)?;
            let labels = self.loader.labels.narrow(0, self.offset, len)?;
            let label_features = match &self.loader.label_features {
                Some(t) => Some(t.narrow(0, self.offset, len)?),
                None => None,
            };
            Ok(Batch {
                images,
                labels,
                label_features,
            })
        })();
        self.offset += len;
        Some(batch)
    }
}

/// Class names and per-class prompt features
///
/// The prompt features `[K, F]` feed the text tower to derive text-based
/// target features; class names map indices to display strings.
#[derive(Debug, Clone)]
pub struct ClassCatalog {
    names: Vec<String>,
    prompts: Tensor,
}

impl ClassCatalog {
    /// Create a catalog; prompt rows must match the number of class names
    pub fn new(names: Vec<String>, prompts: Tensor) -> Result<Self> {
        let (rows, _) = prompts.dims2()?;
        if rows != names.len() {
            return Err(PipelineError::DimensionMismatch {
                expected: names.len(),
                got: rows,
            });
        }
        if prompts.dtype() != DType::F32 {
            return Err(PipelineError::InvalidConfig(
                "prompt features must be f32".to_string(),
            ));
        }
        Ok(Self { names, prompts })
    }

    /// Number of classes
    pub fn num_classes(&self) -> usize {
        self.names.len()
    }

    /// Display name of class `index`
    pub fn class_name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(|s| s.as_str())
    }

    /// All class names, index order
    pub fn class_names(&self) -> &[String] {
        &self.names
    }

    /// Prompt features `[K, F]`
    pub fn prompts(&self) -> &Tensor {
        &self.prompts
    }
}
