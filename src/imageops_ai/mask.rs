use anyhow::{anyhow, ensure, Result};
use image::{imageops, imageops::FilterType, GrayImage};
use ndarray::{ArrayView3, Axis};

/// Per-pixel argmax over the class axis of `[C, H, W]` logits.
///
/// Ties resolve to the lowest class index. NaN scores never win.
pub fn argmax_mask(logits: ArrayView3<f32>) -> Result<GrayImage> {
    let (classes, height, width) = logits.dim();
    ensure!(classes > 0, "Logits have no class channels");
    ensure!(
        classes <= usize::from(u8::MAX) + 1,
        "Too many classes for an 8-bit mask: {classes}"
    );

    let mut best_score = logits.index_axis(Axis(0), 0).to_owned();
    let mut best_class = ndarray::Array2::<u8>::zeros((height, width));
    for (class, scores) in logits.axis_iter(Axis(0)).enumerate().skip(1) {
        ndarray::Zip::from(&mut best_score)
            .and(&mut best_class)
            .and(&scores)
            .for_each(|best, id, &score| {
                if score > *best || best.is_nan() {
                    *best = score;
                    *id = class as u8;
                }
            });
    }

    let (raw, _) = best_class.into_raw_vec_and_offset();
    GrayImage::from_raw(width as u32, height as u32, raw)
        .ok_or_else(|| anyhow!("Failed to create mask from argmax output"))
}

/// Resizes a class-id mask without inventing intermediate ids.
pub fn resize_mask(mask: &GrayImage, width: u32, height: u32) -> GrayImage {
    if mask.dimensions() == (width, height) {
        return mask.clone();
    }
    imageops::resize(mask, width, height, FilterType::Nearest)
}
