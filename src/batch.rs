//! Offline processing of xBD-style `<id>_pre_disaster` / `<id>_post_disaster` pairs.

use std::fs;
use std::path::{Path, PathBuf};

use image::ImageFormat;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::BatchConfig;
use crate::errors::{DamageSegError, Result};
use crate::{save_rendered, DamageAnalyzer, DamageSegmentationModel};

pub const PRE_SUFFIX: &str = "_pre_disaster";
pub const POST_SUFFIX: &str = "_post_disaster";
pub const OUTPUT_SUFFIX: &str = "_damage";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ImagePair {
    /// Directory of the pair relative to the input root.
    pub relative_dir: PathBuf,
    /// Shared stem without the pre/post suffix.
    pub name: String,
    pub pre: PathBuf,
    pub post: PathBuf,
}

impl ImagePair {
    pub fn output_path(&self, output_dir: &Path, format: &str) -> PathBuf {
        output_dir
            .join(&self.relative_dir)
            .join(format!("{}{}.{}", self.name, OUTPUT_SUFFIX, format))
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CollectedPairs {
    pub pairs: Vec<ImagePair>,
    /// Pre images without a post partner.
    pub unpaired: Vec<PathBuf>,
}

/// Walks `input_dir` and pairs every `*_pre_disaster.<ext>` image with the
/// sibling `*_post_disaster.<ext>`.
pub fn collect_pairs(input_dir: &Path) -> Result<CollectedPairs> {
    if !input_dir.is_dir() {
        return Err(DamageSegError::FileSystem {
            path: input_dir.to_path_buf(),
            operation: "reading input directory".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
        });
    }

    let mut collected = CollectedPairs::default();
    for entry in WalkDir::new(input_dir).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if !entry.file_type().is_file() || ImageFormat::from_path(path).is_err() {
            continue;
        }
        let Some(name) = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.strip_suffix(PRE_SUFFIX))
        else {
            continue;
        };

        let mut post_file = format!("{name}{POST_SUFFIX}");
        if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
            post_file = format!("{post_file}.{ext}");
        }
        let post = path.with_file_name(post_file);
        if !post.is_file() {
            warn!(pre = %path.display(), "no post-disaster partner, skipping");
            collected.unpaired.push(path.to_path_buf());
            continue;
        }

        let relative_dir = path
            .parent()
            .and_then(|parent| parent.strip_prefix(input_dir).ok())
            .map(Path::to_path_buf)
            .unwrap_or_default();
        collected.pairs.push(ImagePair {
            relative_dir,
            name: name.to_string(),
            pre: path.to_path_buf(),
            post,
        });
    }

    collected.pairs.sort();
    collected.unpaired.sort();
    Ok(collected)
}

fn open_image(path: &Path) -> Result<image::DynamicImage> {
    image::open(path).map_err(|e| DamageSegError::ImageProcessing {
        path: path.display().to_string(),
        operation: "reading image".to_string(),
        source: Box::new(e),
    })
}

pub struct BatchProcessor<'a, M: DamageSegmentationModel> {
    analyzer: &'a DamageAnalyzer<M>,
    config: BatchConfig,
}

impl<'a, M: DamageSegmentationModel> BatchProcessor<'a, M> {
    pub const fn new(analyzer: &'a DamageAnalyzer<M>, config: BatchConfig) -> Self {
        Self { analyzer, config }
    }

    /// Segments every pair under the input directory. Returns the number of
    /// pairs written; the first failure aborts the run.
    pub fn run(&self) -> Result<usize> {
        let collected = collect_pairs(&self.config.input_dir)?;
        if collected.pairs.is_empty() {
            warn!(input = %self.config.input_dir.display(), "no image pairs found");
            return Ok(0);
        }
        info!(
            pairs = collected.pairs.len(),
            unpaired = collected.unpaired.len(),
            "starting batch"
        );

        let progress_bar = ProgressBar::new(collected.pairs.len() as u64);
        progress_bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
            )
            .map_err(|e| DamageSegError::Configuration {
                message: e.to_string(),
            })?
            .progress_chars("#>-"),
        );

        collected
            .pairs
            .par_iter()
            .try_for_each(|pair| -> Result<()> {
                self.process_pair(pair)?;
                progress_bar.inc(1);
                Ok(())
            })?;

        progress_bar.finish();
        info!(
            written = collected.pairs.len(),
            output = %self.config.output_dir.display(),
            "batch finished"
        );
        Ok(collected.pairs.len())
    }

    pub fn process_pair(&self, pair: &ImagePair) -> Result<PathBuf> {
        let pre = open_image(&pair.pre)?;
        let post = open_image(&pair.post)?;
        let rendered = self
            .analyzer
            .render(&pre, &post, self.config.mask_only)
            .map_err(|e| DamageSegError::ImageProcessing {
                path: pair.post.display().to_string(),
                operation: "damage segmentation".to_string(),
                source: Box::new(e),
            })?;

        let output_file = pair.output_path(&self.config.output_dir, &self.config.format);
        if let Some(parent) = output_file.parent() {
            fs::create_dir_all(parent).map_err(|e| DamageSegError::FileSystem {
                path: parent.to_path_buf(),
                operation: "creating output directory".to_string(),
                source: e,
            })?;
        }

        let format = ImageFormat::from_extension(&self.config.format).unwrap_or(ImageFormat::Png);
        save_rendered(rendered, &output_file, format)?;

        Ok(output_file)
    }
}
