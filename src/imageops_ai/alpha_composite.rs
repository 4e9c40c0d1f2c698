use anyhow::{anyhow, ensure, Result};
use image::{ImageBuffer, Pixel, Primitive, Rgb, Rgba};
use num_traits::AsPrimitive;

use crate::imageops_ai::{get_max_value, is_floating_point};

/// "Over" compositing of an RGB layer with uniform opacity onto an opaque base.
pub trait AlphaComposite<S>
where
    Rgb<S>: Pixel<Subpixel = S>,
    Rgba<S>: Pixel<Subpixel = S>,
    S: Primitive + AsPrimitive<f32> + 'static,
{
    fn composite_over(
        self,
        layer: &ImageBuffer<Rgb<S>, Vec<S>>,
        alpha: S,
    ) -> Result<ImageBuffer<Rgba<S>, Vec<S>>>;
}

impl<S> AlphaComposite<S> for ImageBuffer<Rgb<S>, Vec<S>>
where
    Rgb<S>: Pixel<Subpixel = S>,
    Rgba<S>: Pixel<Subpixel = S>,
    S: Primitive + AsPrimitive<f32> + 'static,
    f32: AsPrimitive<S>,
{
    fn composite_over(
        self,
        layer: &ImageBuffer<Rgb<S>, Vec<S>>,
        alpha: S,
    ) -> Result<ImageBuffer<Rgba<S>, Vec<S>>> {
        ensure!(
            self.dimensions() == layer.dimensions(),
            "Base image and layer dimensions do not match: {:?} vs {:?}",
            self.dimensions(),
            layer.dimensions()
        );

        let max: f32 = get_max_value::<S>().as_();
        let alpha = alpha.as_().clamp(0.0, max);
        let rounding = if is_floating_point::<S>() { 0.0 } else { 0.5 };
        let blend = |base: S, top: S| -> S {
            ((top.as_() * alpha + base.as_() * (max - alpha)) / max + rounding).as_()
        };
        let opaque: S = max.as_();

        let processed_pixels = self
            .pixels()
            .zip(layer.pixels())
            .flat_map(|(&Rgb([br, bg, bb]), &Rgb([lr, lg, lb]))| {
                [blend(br, lr), blend(bg, lg), blend(bb, lb), opaque]
            })
            .collect::<Vec<S>>();

        ImageBuffer::from_raw(self.width(), self.height(), processed_pixels)
            .ok_or_else(|| anyhow!("Failed to create ImageBuffer from composited pixels"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb32FImage, RgbImage};

    #[test]
    fn test_composite_matches_uniform_alpha_blend() {
        let base = RgbImage::from_pixel(2, 2, Rgb([0, 0, 0]));
        let layer = RgbImage::from_pixel(2, 2, Rgb([255, 0, 0]));
        let out = base.composite_over(&layer, 100).unwrap();
        assert_eq!(out.get_pixel(1, 1), &Rgba([100, 0, 0, 255]));

        let base = RgbImage::from_pixel(1, 1, Rgb([255, 255, 255]));
        let layer = RgbImage::from_pixel(1, 1, Rgb([0, 0, 0]));
        let out = base.composite_over(&layer, 100).unwrap();
        assert_eq!(out.get_pixel(0, 0), &Rgba([155, 155, 155, 255]));
    }

    #[test]
    fn test_composite_extremes() {
        let base = RgbImage::from_pixel(1, 1, Rgb([10, 20, 30]));
        let layer = RgbImage::from_pixel(1, 1, Rgb([200, 100, 0]));
        assert_eq!(
            base.clone().composite_over(&layer, 0).unwrap().get_pixel(0, 0),
            &Rgba([10, 20, 30, 255])
        );
        assert_eq!(
            base.composite_over(&layer, 255).unwrap().get_pixel(0, 0),
            &Rgba([200, 100, 0, 255])
        );
    }

    #[test]
    fn test_composite_float_subpixels_use_unit_range() {
        let base = Rgb32FImage::from_pixel(1, 1, Rgb([0.0, 0.5, 1.0]));
        let layer = Rgb32FImage::from_pixel(1, 1, Rgb([1.0, 1.0, 0.0]));
        let out = base.composite_over(&layer, 0.5).unwrap();
        let Rgba([r, g, b, a]) = *out.get_pixel(0, 0);
        assert!((r - 0.5).abs() < 1e-6);
        assert!((g - 0.75).abs() < 1e-6);
        assert!((b - 0.5).abs() < 1e-6);
        assert_eq!(a, 1.0);
    }

    #[test]
    fn test_composite_dimension_mismatch() {
        let base = RgbImage::new(2, 2);
        let layer = RgbImage::new(3, 2);
        assert!(base.composite_over(&layer, 100).is_err());
    }
}
