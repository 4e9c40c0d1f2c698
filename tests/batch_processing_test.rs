use std::fs;
use std::path::{Path, PathBuf};

use image::{GenericImageView, Rgb, RgbImage};
use tempfile::TempDir;

use geodamage::{
    batch::{collect_pairs, BatchProcessor},
    config::BatchConfig,
    mocks::MockSegmentationModel,
    DamageAnalyzer, DamageClass,
};

fn write_image(path: &Path, width: u32, height: u32, value: u8) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    RgbImage::from_pixel(width, height, Rgb([value; 3]))
        .save(path)
        .unwrap();
}

/// Lays out an xBD-like tree: one complete pair per event directory, plus an
/// orphan pre image and a non-image file.
fn fixture() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("input");

    write_image(&root.join("flood/flood_00000001_pre_disaster.png"), 20, 10, 0);
    write_image(&root.join("flood/flood_00000001_post_disaster.png"), 20, 10, 255);
    write_image(&root.join("fire/fire_00000007_pre_disaster.png"), 12, 12, 40);
    write_image(&root.join("fire/fire_00000007_post_disaster.png"), 12, 12, 40);
    write_image(&root.join("fire/fire_00000009_pre_disaster.png"), 12, 12, 40);
    fs::write(root.join("fire/README.txt"), b"not an image").unwrap();

    temp_dir
}

fn batch_config(temp_dir: &TempDir, format: &str, mask_only: bool) -> BatchConfig {
    BatchConfig {
        input_dir: temp_dir.path().join("input"),
        output_dir: temp_dir.path().join("output"),
        format: format.to_string(),
        mask_only,
    }
}

#[test]
fn test_collect_pairs_matches_xbd_names() {
    let temp_dir = fixture();
    let collected = collect_pairs(&temp_dir.path().join("input")).unwrap();

    let names: Vec<_> = collected.pairs.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["fire_00000007", "flood_00000001"]);
    assert_eq!(collected.pairs[1].relative_dir, PathBuf::from("flood"));
    assert!(collected.pairs[1]
        .post
        .ends_with("flood/flood_00000001_post_disaster.png"));

    assert_eq!(collected.unpaired.len(), 1);
    assert!(collected.unpaired[0].ends_with("fire_00000009_pre_disaster.png"));
}

#[test]
fn test_batch_writes_overlays() {
    let temp_dir = fixture();
    let analyzer = DamageAnalyzer::new(MockSegmentationModel::new(16), 100);

    let written = BatchProcessor::new(&analyzer, batch_config(&temp_dir, "png", false))
        .run()
        .unwrap();
    assert_eq!(written, 2);

    let output = temp_dir.path().join("output/flood/flood_00000001_damage.png");
    let overlay = image::open(&output).unwrap();
    assert_eq!(overlay.dimensions(), (20, 10));
    assert_eq!(overlay.to_rgba8().get_pixel(3, 3).0, [255, 155, 155, 255]);
    assert!(temp_dir
        .path()
        .join("output/fire/fire_00000007_damage.png")
        .is_file());
}

#[test]
fn test_batch_mask_only_as_jpeg() {
    let temp_dir = fixture();
    let analyzer = DamageAnalyzer::new(MockSegmentationModel::new(16), 100);

    BatchProcessor::new(&analyzer, batch_config(&temp_dir, "jpg", true))
        .run()
        .unwrap();

    let output = temp_dir.path().join("output/fire/fire_00000007_damage.jpg");
    let mask = image::open(&output).unwrap().to_rgb8();
    assert_eq!(mask.dimensions(), (12, 12));
    // identical pair: no damage, green (allow for JPEG loss)
    let [r, g, b] = mask.get_pixel(6, 6).0;
    let [er, eg, eb] = DamageClass::NoDamage.color();
    assert!(r.abs_diff(er) < 16 && g.abs_diff(eg) < 16 && b.abs_diff(eb) < 16);
}

#[test]
fn test_batch_on_empty_directory() {
    let temp_dir = TempDir::new().unwrap();
    fs::create_dir_all(temp_dir.path().join("input")).unwrap();
    let analyzer = DamageAnalyzer::new(MockSegmentationModel::new(16), 100);

    let written = BatchProcessor::new(&analyzer, batch_config(&temp_dir, "png", false))
        .run()
        .unwrap();
    assert_eq!(written, 0);
}
