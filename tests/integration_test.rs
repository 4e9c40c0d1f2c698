use image::{DynamicImage, GenericImageView, Luma, Rgb, RgbImage};
use ndarray::{Array4, ArrayView4};

use geodamage::{
    model::{preprocess_pair, INPUT_CHANNELS, MEAN6, STD6},
    DamageAnalyzer, DamageClass, DamageSegError, DamageSegmentationModel,
};

// left half minor damage, right half major damage, at a fixed output resolution
#[derive(Debug, Clone)]
struct SplitMockModel {
    image_size: u32,
    output_size: usize,
}

impl DamageSegmentationModel for SplitMockModel {
    fn get_image_size(&self) -> u32 {
        self.image_size
    }

    fn num_classes(&self) -> usize {
        5
    }

    fn predict(&self, tensor: ArrayView4<f32>) -> geodamage::Result<Array4<f32>> {
        assert_eq!(tensor.shape()[1], INPUT_CHANNELS);
        let size = self.output_size;
        let mut logits = Array4::<f32>::zeros((tensor.shape()[0], 5, size, size));
        for y in 0..size {
            for x in 0..size {
                let class = if x < size / 2 {
                    DamageClass::MinorDamage
                } else {
                    DamageClass::MajorDamage
                };
                logits[[0, class.id() as usize, y, x]] = 4.0;
            }
        }
        Ok(logits)
    }
}

struct FailingModel;

impl DamageSegmentationModel for FailingModel {
    fn get_image_size(&self) -> u32 {
        8
    }

    fn num_classes(&self) -> usize {
        5
    }

    fn predict(&self, _tensor: ArrayView4<f32>) -> geodamage::Result<Array4<f32>> {
        Ok(Array4::<f32>::zeros((0, 5, 8, 8)))
    }
}

fn solid(width: u32, height: u32, value: u8) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([value; 3])))
}

#[test]
fn test_mask_is_upscaled_to_post_resolution() {
    let model = SplitMockModel {
        image_size: 32,
        output_size: 4,
    };
    let analyzer = DamageAnalyzer::new(model, 100);

    let mask = analyzer.segment(&solid(64, 64, 10), &solid(100, 60, 10)).unwrap();
    assert_eq!(mask.dimensions(), (100, 60));
    assert_eq!(mask.get_pixel(0, 0), &Luma([DamageClass::MinorDamage.id()]));
    assert_eq!(mask.get_pixel(99, 59), &Luma([DamageClass::MajorDamage.id()]));
}

#[test]
fn test_summary_splits_evenly() {
    let model = SplitMockModel {
        image_size: 16,
        output_size: 16,
    };
    let analyzer = DamageAnalyzer::new(model, 100);

    let analysis = analyzer.analyze(&solid(16, 16, 0), &solid(16, 16, 0)).unwrap();
    let minor = &analysis.summary.classes[DamageClass::MinorDamage.id() as usize];
    let major = &analysis.summary.classes[DamageClass::MajorDamage.id() as usize];
    assert_eq!(minor.pixels, 128);
    assert_eq!(major.pixels, 128);
    assert!((analysis.summary.damaged_fraction() - 1.0).abs() < 1e-9);
}

#[test]
fn test_overlay_alpha_is_configurable() {
    let model = SplitMockModel {
        image_size: 8,
        output_size: 8,
    };
    let opaque = DamageAnalyzer::new(model.clone(), 255);
    let hidden = DamageAnalyzer::new(model, 0);
    let post = solid(8, 8, 50);

    let overlay = opaque.overlay(&post, &post).unwrap();
    assert_eq!(overlay.get_pixel(7, 0).0, [255, 128, 0, 255]);

    let overlay = hidden.overlay(&post, &post).unwrap();
    assert_eq!(overlay.get_pixel(7, 0).0, [50, 50, 50, 255]);
}

#[test]
fn test_empty_batch_from_model_is_an_error() {
    let analyzer = DamageAnalyzer::new(FailingModel, 100);
    let err = analyzer.segment(&solid(8, 8, 0), &solid(8, 8, 0)).unwrap_err();
    assert!(matches!(err, DamageSegError::Model { .. }));
    assert!(!err.is_client_error());
}

#[test]
fn test_preprocess_accepts_sixteen_bit_imagery() {
    let pre = image::ImageBuffer::<Rgb<u16>, Vec<u16>>::from_pixel(4, 4, Rgb([u16::MAX; 3]));
    let post = image::ImageBuffer::<Rgb<u16>, Vec<u16>>::from_pixel(4, 4, Rgb([0; 3]));

    let tensor = preprocess_pair(&pre, &post, 4);
    let expected_pre = (1.0 - MEAN6[0]) / STD6[0];
    let expected_post = (0.0 - MEAN6[3]) / STD6[3];
    assert!((tensor[[0, 0, 1, 1]] - expected_pre).abs() < 1e-4);
    assert!((tensor[[0, 3, 1, 1]] - expected_post).abs() < 1e-4);
}
