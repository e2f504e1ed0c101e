//! Target feature derivation
//!
//! Per-class reference embeddings come from one of two sources: the text
//! tower applied to the catalog's class prompts, or the vision tower
//! applied to a loader of target images. Rows are unit-norm; vision-derived
//! features keep loader-iteration order.

use crate::data::{ClassCatalog, InMemoryLoader};
use crate::error::{PipelineError, Result};
use crate::model::FewShotModel;
use crate::scoring::l2_normalize;
use candle_core::Tensor;

/// Text-derived target features, `[K, D]` unit-norm
pub fn text_target_features(model: &FewShotModel, catalog: &ClassCatalog) -> Result<Tensor> {
    let features = model.encode_text(catalog.prompts())?;
    l2_normalize(&features)
}

/// Vision features over a full loader, `[S, D]` unit-norm, iteration order
///
/// Used both to derive image-based class targets and to extract the support
/// features the meta-adapter memory is initialized from.
pub fn vision_target_features(model: &FewShotModel, loader: &InMemoryLoader) -> Result<Tensor> {
    let mut chunks = Vec::with_capacity(loader.num_batches()?);
    for batch in loader.iter() {
        let batch = batch?;
        let features = model.encode_image(&batch.images)?;
        chunks.push(l2_normalize(&features)?);
    }
    let refs: Vec<&Tensor> = chunks.iter().collect();
    Ok(Tensor::cat(&refs, 0)?)
}

/// Vision-derived class targets, `[K, D]`
///
/// The target loader must yield exactly one sample per class, in class
/// order; anything else is a contract violation.
pub fn vision_class_targets(
    model: &FewShotModel,
    loader: &InMemoryLoader,
    num_classes: usize,
) -> Result<Tensor> {
    let features = vision_target_features(model, loader)?;
    let got = features.dim(0)?;
    if got != num_classes {
        return Err(PipelineError::DimensionMismatch {
            expected: num_classes,
            got,
        });
    }
    Ok(features)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BackboneConfig;
    use approx::assert_relative_eq;
    use candle_core::Device;

    fn small_model() -> FewShotModel {
        let config = BackboneConfig {
            vision_input: 3 * 4 * 4,
            text_input: 8,
            hidden_dim: 16,
            embed_dim: 8,
            dropout: 0.0,
        };
        FewShotModel::new(config, false, &Device::Cpu).unwrap()
    }

    fn assert_rows_unit_norm(features: &Tensor) {
        let rows: Vec<Vec<f32>> = features.to_vec2().unwrap();
        for row in rows {
            let norm: f32 = row.iter().map(|v| v * v).sum::<f32>().sqrt();
            assert_relative_eq!(norm, 1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_text_targets_are_unit_norm() {
        let model = small_model();
        let prompts = Tensor::randn(0f32, 1f32, (3, 8), &Device::Cpu).unwrap();
        let catalog = ClassCatalog::new(
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            prompts,
        )
        .unwrap();

        let targets = text_target_features(&model, &catalog).unwrap();
        assert_eq!(targets.dims(), &[3, 8]);
        assert_rows_unit_norm(&targets);
    }

    #[test]
    fn test_vision_features_cover_full_loader() {
        let model = small_model();
        let images = Tensor::randn(0f32, 1f32, (10, 3, 4, 4), &Device::Cpu).unwrap();
        let labels: Vec<u32> = (0..10).map(|i| i % 5).collect();
        let loader = InMemoryLoader::new(images, labels, 4).unwrap();

        let features = vision_target_features(&model, &loader).unwrap();
        assert_eq!(features.dims(), &[10, 8]);
        assert_rows_unit_norm(&features);
    }

    #[test]
    fn test_vision_class_targets_checks_row_count() {
        let model = small_model();
        let images = Tensor::randn(0f32, 1f32, (7, 3, 4, 4), &Device::Cpu).unwrap();
        let labels: Vec<u32> = (0..7).collect();
        let loader = InMemoryLoader::new(images, labels, 4).unwrap();

        assert!(vision_class_targets(&model, &loader, 7).is_ok());
        assert!(matches!(
            vision_class_targets(&model, &loader, 5),
            Err(PipelineError::DimensionMismatch {
                expected: 5,
                got: 7
            })
        ));
    }
}
