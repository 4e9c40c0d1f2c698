use crate::errors::Result;
use ndarray::prelude::*;

/// Abstraction over the damage segmentation network.
///
/// The ONNX-backed [`crate::Model`] is the production implementation; tests
/// plug in deterministic fakes so the pipeline runs without a weights file.
pub trait DamageSegmentationModel: Send + Sync {
    /// Square side length the network expects.
    fn get_image_size(&self) -> u32;

    /// Number of output classes (logit channels).
    fn num_classes(&self) -> usize;

    /// Raw forward pass: `[N, 6, S, S]` normalised input to `[N, C, H, W]` logits.
    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>>;
}
