use crate::errors::{DamageSegError, Result};
use crate::model::INPUT_CHANNELS;
use crate::palette::{DamageClass, NUM_CLASSES};
use crate::traits::DamageSegmentationModel;
use ndarray::prelude::*;

/// Deterministic stand-in for the ONNX network.
///
/// Compares the mean of the post channels with the mean of the pre channels at
/// every pixel: brighter post scores `Destroyed`, darker post scores
/// `Background`, anything else `NoDamage`. Logits are one-hot.
#[derive(Debug, Clone)]
pub struct MockSegmentationModel {
    pub image_size: u32,
}

impl MockSegmentationModel {
    pub const fn new(image_size: u32) -> Self {
        Self { image_size }
    }

    fn classify(pre: f32, post: f32) -> DamageClass {
        match post - pre {
            d if d > 0.5 => DamageClass::Destroyed,
            d if d < -0.5 => DamageClass::Background,
            _ => DamageClass::NoDamage,
        }
    }
}

impl DamageSegmentationModel for MockSegmentationModel {
    fn get_image_size(&self) -> u32 {
        self.image_size
    }

    fn num_classes(&self) -> usize {
        NUM_CLASSES
    }

    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        let (batch, channels, height, width) = tensor.dim();
        if channels != INPUT_CHANNELS {
            return Err(DamageSegError::model(
                "mock inference",
                format!("expected {INPUT_CHANNELS} channels, got {channels}"),
            ));
        }

        let pre = tensor.slice(s![.., 0..3, .., ..]).mean_axis(Axis(1));
        let post = tensor.slice(s![.., 3..6, .., ..]).mean_axis(Axis(1));
        let (Some(pre), Some(post)) = (pre, post) else {
            return Err(DamageSegError::model("mock inference", "empty channel range"));
        };

        let mut logits = Array4::<f32>::zeros((batch, NUM_CLASSES, height, width));
        for ((n, y, x), &pre_value) in pre.indexed_iter() {
            let class = Self::classify(pre_value, post[[n, y, x]]);
            logits[[n, class.id() as usize, y, x]] = 1.0;
        }
        Ok(logits)
    }
}

pub const fn create_mock_model() -> MockSegmentationModel {
    MockSegmentationModel::new(32)
}
