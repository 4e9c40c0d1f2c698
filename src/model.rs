use std::{error::Error as StdError, path::Path, time::Instant};

use crate::{
    errors::{DamageSegError, Result},
    palette::NUM_CLASSES,
    traits::DamageSegmentationModel,
};
use image::{imageops, imageops::FilterType, ImageBuffer, Pixel, Primitive, Rgb};
use ndarray::prelude::*;
use nshare::AsNdarray3;
use ort::value::TensorRef;
use ort::{
    execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider},
    session::Session,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Pre RGB followed by post RGB. The encoder's patch embedding was widened from
/// the pretrained 3 channels to this count before training.
pub const INPUT_CHANNELS: usize = 6;

/// Training resolution, used when the exported graph has dynamic spatial axes.
pub const DEFAULT_IMAGE_SIZE: u32 = 512;

pub const MEAN6: [f32; INPUT_CHANNELS] = [0.485, 0.456, 0.406, 0.485, 0.456, 0.406];
pub const STD6: [f32; INPUT_CHANNELS] = [0.229, 0.224, 0.225, 0.229, 0.224, 0.225];

fn ort_error<E>(operation: impl Into<String>) -> impl FnOnce(E) -> DamageSegError
where
    E: StdError + Send + Sync + 'static,
{
    let operation = operation.into();
    move |e| DamageSegError::model(operation, e)
}

/// Input/output layout the server derives from the exported graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSignature {
    pub input_channels: usize,
    pub image_size: u32,
    pub num_classes: usize,
}

impl ModelSignature {
    /// Validates ONNX tensor shapes (`-1` marks a dynamic axis).
    pub fn from_shapes(input: &[i64], output: &[i64]) -> Result<Self> {
        let invalid = |reason: String| DamageSegError::model("model signature check", reason);

        if input.len() != 4 {
            return Err(invalid(format!(
                "expected a rank-4 NCHW input, got shape {input:?}"
            )));
        }
        let input_channels = match input[1] {
            c if c >= 0 && c as usize != INPUT_CHANNELS => {
                return Err(invalid(format!(
                    "expected {INPUT_CHANNELS} input channels (pre + post RGB), got {c}"
                )))
            }
            _ => INPUT_CHANNELS,
        };

        let image_size = match (input[2], input[3]) {
            (h, w) if h > 0 && w > 0 && h != w => {
                return Err(invalid(format!("expected a square input, got {h}x{w}")))
            }
            (h, _) if h > 0 => h as u32,
            (_, w) if w > 0 => w as u32,
            _ => DEFAULT_IMAGE_SIZE,
        };

        if output.len() != 4 {
            return Err(invalid(format!(
                "expected a rank-4 NCHW output, got shape {output:?}"
            )));
        }
        let num_classes = match output[1] {
            c if c > 256 => {
                return Err(invalid(format!("{c} classes do not fit an 8-bit mask")))
            }
            c if c > 0 => c as usize,
            _ => NUM_CLASSES,
        };

        Ok(Self {
            input_channels,
            image_size,
            num_classes,
        })
    }
}

pub struct Model {
    pub input_channels: usize,
    pub image_size: u32,
    pub num_classes: usize,
    input_name: String,
    output_name: String,
    session: Mutex<Session>,
}

impl Model {
    pub fn new(model_path: &Path, num_threads: usize, device_id: i32) -> Result<Self> {
        let started = Instant::now();
        let mut session = Session::builder()
            .map_err(ort_error("session builder initialisation"))?
            .with_execution_providers([
                TensorRTExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
            ])
            .map_err(ort_error("execution provider registration"))?
            .with_intra_threads(num_threads)
            .map_err(ort_error("intra-op thread configuration"))?
            .with_memory_pattern(true)
            .map_err(ort_error("memory pattern configuration"))?
            .commit_from_file(model_path)
            .map_err(ort_error(format!(
                "loading model file {}",
                model_path.display()
            )))?;

        let input = session
            .inputs
            .first()
            .ok_or_else(|| DamageSegError::model("model input lookup", "graph has no inputs"))?;
        let output = session
            .outputs
            .first()
            .ok_or_else(|| DamageSegError::model("model output lookup", "graph has no outputs"))?;
        let input_shape: Vec<i64> = input
            .input_type
            .tensor_shape()
            .ok_or_else(|| DamageSegError::model("model input shape", "input is not a tensor"))?
            .iter()
            .copied()
            .collect();
        let output_shape: Vec<i64> = output
            .output_type
            .tensor_shape()
            .ok_or_else(|| DamageSegError::model("model output shape", "output is not a tensor"))?
            .iter()
            .copied()
            .collect();
        let input_name = input.name.clone();
        let output_name = output.name.clone();

        let signature = ModelSignature::from_shapes(&input_shape, &output_shape)?;
        if signature.num_classes != NUM_CLASSES {
            warn!(
                num_classes = signature.num_classes,
                "model class count differs from the damage palette; unknown ids render as background"
            );
        }

        // warm-up
        let size = signature.image_size as usize;
        let data = Array4::<f32>::zeros((1, signature.input_channels, size, size));
        session
            .run(ort::inputs![
                input_name.as_str() => TensorRef::from_array_view(&data)
                    .map_err(ort_error("warm-up tensor creation"))?
            ])
            .map_err(ort_error("warm-up run"))?;

        info!(
            path = %model_path.display(),
            input = %input_name,
            output = %output_name,
            image_size = signature.image_size,
            num_classes = signature.num_classes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "model loaded"
        );

        Ok(Self {
            input_channels: signature.input_channels,
            image_size: signature.image_size,
            num_classes: signature.num_classes,
            input_name,
            output_name,
            session: Mutex::new(session),
        })
    }
}

impl DamageSegmentationModel for Model {
    fn get_image_size(&self) -> u32 {
        self.image_size
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        let input = tensor.as_standard_layout();
        let mut binding = self.session.lock();
        let outputs = binding
            .run(ort::inputs![
                self.input_name.as_str() => TensorRef::from_array_view(&input)
                    .map_err(ort_error("input tensor creation"))?
            ])
            .map_err(ort_error("inference"))?;
        let logits = outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()
            .map_err(ort_error("output extraction"))?
            .into_dimensionality::<Ix4>()?
            .to_owned();
        debug!(shape = ?logits.shape(), "inference finished");
        Ok(logits)
    }
}

/// Builds the normalised `[1, 6, S, S]` input from a pre/post pair.
///
/// Each image is resized to `image_size` squared independently (no padding, aspect
/// ratio not kept), scaled to `[0, 1]`, stacked pre-then-post on the channel
/// axis and normalised with [`MEAN6`] / [`STD6`].
pub fn preprocess_pair<S>(
    pre: &ImageBuffer<Rgb<S>, Vec<S>>,
    post: &ImageBuffer<Rgb<S>, Vec<S>>,
    image_size: u32,
) -> Array4<f32>
where
    Rgb<S>: Pixel<Subpixel = S>,
    S: Into<f32> + Primitive + 'static,
{
    let size = image_size as usize;
    let max: f32 = S::DEFAULT_MAX_VALUE.into();
    let mut tensor = Array4::<f32>::zeros((1, INPUT_CHANNELS, size, size));

    for (offset, image) in [(0, pre), (3, post)] {
        let resized = imageops::resize(image, image_size, image_size, FilterType::Triangle);
        let channels = resized.as_ndarray3();
        tensor
            .slice_mut(s![0, offset..offset + 3, .., ..])
            .assign(&channels.mapv(|v| <S as Into<f32>>::into(v) / max));
    }

    for (channel, (mean, std)) in MEAN6.iter().zip(STD6).enumerate() {
        tensor
            .slice_mut(s![0, channel, .., ..])
            .mapv_inplace(|v| (v - mean) / std);
    }

    tensor
}
