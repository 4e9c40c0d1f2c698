pub mod batch;
pub mod config;
pub mod errors;
pub mod imageops_ai;
pub mod mocks;
pub mod model;
pub mod palette;
pub mod server;
pub mod traits;

use std::io::Cursor;
use std::path::Path;
use std::time::Instant;

use image::{DynamicImage, GenericImageView, GrayImage, ImageFormat, RgbImage, RgbaImage};
use ndarray::Axis;
use tracing::info;

pub use config::Config;
pub use errors::{DamageSegError, Result};
pub use model::Model;
pub use palette::{DamageClass, DamageSummary};
pub use traits::*;

use crate::imageops_ai::{argmax_mask, resize_mask, AlphaComposite};
use crate::model::preprocess_pair;

/// Class mask plus per-class statistics for one pre/post pair.
#[derive(Debug, Clone)]
pub struct Analysis {
    /// Class ids at the post image's resolution.
    pub mask: GrayImage,
    pub summary: DamageSummary,
}

/// Runs the preprocessing, inference and rendering stages around a model.
pub struct DamageAnalyzer<M: DamageSegmentationModel> {
    model: M,
    overlay_alpha: u8,
}

impl<M: DamageSegmentationModel> DamageAnalyzer<M> {
    pub const fn new(model: M, overlay_alpha: u8) -> Self {
        Self {
            model,
            overlay_alpha,
        }
    }

    pub const fn model(&self) -> &M {
        &self.model
    }

    pub const fn overlay_alpha(&self) -> u8 {
        self.overlay_alpha
    }

    /// Predicts the class mask, resized to the post image's dimensions.
    pub fn segment(&self, pre: &DynamicImage, post: &DynamicImage) -> Result<GrayImage> {
        for (field, image) in [("pre_image", pre), ("post_image", post)] {
            let (width, height) = image.dimensions();
            if width == 0 || height == 0 {
                return Err(DamageSegError::Validation {
                    field: field.to_string(),
                    reason: format!("has empty dimensions {width}x{height}"),
                });
            }
        }

        let started = Instant::now();
        let tensor = preprocess_pair(&pre.to_rgb8(), &post.to_rgb8(), self.model.get_image_size());
        let logits = self.model.predict(tensor.view())?;
        if logits.shape()[0] == 0 {
            return Err(DamageSegError::model(
                "mask extraction",
                "model returned an empty batch",
            ));
        }

        let mask = argmax_mask(logits.index_axis(Axis(0), 0))
            .map_err(|e| DamageSegError::model("mask extraction", e))?;
        let (width, height) = post.dimensions();
        let mask = resize_mask(&mask, width, height);

        info!(
            pre = ?pre.dimensions(),
            post = ?(width, height),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "segmented image pair"
        );
        Ok(mask)
    }

    pub fn analyze(&self, pre: &DynamicImage, post: &DynamicImage) -> Result<Analysis> {
        let mask = self.segment(pre, post)?;
        let summary = DamageSummary::from_mask(&mask);
        Ok(Analysis { mask, summary })
    }

    /// Palette-coloured mask blended over the post image.
    pub fn overlay(&self, pre: &DynamicImage, post: &DynamicImage) -> Result<RgbaImage> {
        let mask = self.segment(pre, post)?;
        blend_mask(post.to_rgb8(), &mask, self.overlay_alpha)
    }

    pub fn colorized_mask(&self, pre: &DynamicImage, post: &DynamicImage) -> Result<RgbImage> {
        let mask = self.segment(pre, post)?;
        Ok(palette::colorize(&mask))
    }

    /// Overlay by default, the bare colourised mask when `mask_only` is set.
    pub fn render(
        &self,
        pre: &DynamicImage,
        post: &DynamicImage,
        mask_only: bool,
    ) -> Result<DynamicImage> {
        if mask_only {
            self.colorized_mask(pre, post).map(DynamicImage::ImageRgb8)
        } else {
            self.overlay(pre, post).map(DynamicImage::ImageRgba8)
        }
    }
}

/// The mask always comes back at the post image's size, so a mismatch here is
/// a server fault rather than bad input.
fn blend_mask(post: RgbImage, mask: &GrayImage, alpha: u8) -> Result<RgbaImage> {
    post.composite_over(&palette::colorize(mask), alpha)
        .map_err(|e| DamageSegError::model("mask overlay", e))
}

/// Decodes an uploaded image, guessing the format from its content.
pub fn decode_image(bytes: &[u8], field: &str) -> Result<DynamicImage> {
    if bytes.is_empty() {
        return Err(DamageSegError::Upload {
            field: field.to_string(),
            reason: "is empty".to_string(),
        });
    }
    image::load_from_memory(bytes).map_err(|e| DamageSegError::ImageProcessing {
        path: field.to_string(),
        operation: "decoding upload".to_string(),
        source: Box::new(e),
    })
}

/// Writes a rendered damage map, dropping alpha for formats that cannot store it.
pub fn save_rendered(image: DynamicImage, path: &Path, format: ImageFormat) -> Result<()> {
    let image = if format == ImageFormat::Jpeg {
        DynamicImage::ImageRgb8(image.to_rgb8())
    } else {
        image
    };
    image
        .save_with_format(path, format)
        .map_err(|e| DamageSegError::ImageProcessing {
            path: path.display().to_string(),
            operation: "writing output".to_string(),
            source: Box::new(e),
        })
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| DamageSegError::ImageProcessing {
            path: "response".to_string(),
            operation: "PNG encoding".to_string(),
            source: Box::new(e),
        })?;
    Ok(buf)
}
