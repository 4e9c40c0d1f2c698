use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::thread;

use clap::{Args, Parser, Subcommand};
use image::ImageFormat;

use crate::errors::{DamageSegError, Result};

/// Default mask opacity, roughly 40%.
pub const DEFAULT_OVERLAY_ALPHA: u8 = 100;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    #[command(flatten)]
    pub model: ModelConfig,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Clone, Debug)]
pub struct ModelConfig {
    /// ONNX export of the 6-channel damage segmentation network
    #[arg(short, long, global = true, default_value = "best_model.onnx")]
    pub model_path: PathBuf,

    #[arg(short, long, global = true, default_value_t = 0)]
    pub device_id: i32,

    #[arg(short, long, global = true, default_value_t = default_threads())]
    pub num_threads: usize,

    /// Opacity of the damage mask drawn over the post-event image
    #[arg(long, global = true, default_value_t = DEFAULT_OVERLAY_ALPHA)]
    pub overlay_alpha: u8,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Serve the prediction endpoint over HTTP
    Serve(ServeConfig),
    /// Segment a single pre/post pair
    Predict(PredictConfig),
    /// Segment every `*_pre_disaster` / `*_post_disaster` pair under a directory
    Batch(BatchConfig),
}

#[derive(Args, Clone, Debug)]
pub struct ServeConfig {
    #[arg(long, default_value = "0.0.0.0")]
    pub host: IpAddr,

    #[arg(short, long, default_value_t = 8000)]
    pub port: u16,

    #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: usize,

    /// Allowed CORS origin; repeat for several. Any origin is allowed when omitted.
    #[arg(long = "cors-origin")]
    pub cors_origins: Vec<String>,
}

impl ServeConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

#[derive(Args, Clone, Debug)]
pub struct PredictConfig {
    #[arg(long)]
    pub pre: PathBuf,

    #[arg(long)]
    pub post: PathBuf,

    #[arg(short, long, default_value = "damage.png")]
    pub output: PathBuf,

    /// Write the colourised mask instead of the overlay
    #[arg(long)]
    pub mask_only: bool,
}

#[derive(Args, Clone, Debug)]
pub struct BatchConfig {
    pub input_dir: PathBuf,

    #[arg(default_value = "output")]
    pub output_dir: PathBuf,

    #[arg(short, long, default_value = "png", value_parser = check_format)]
    pub format: String,

    #[arg(long)]
    pub mask_only: bool,
}

fn default_threads() -> usize {
    thread::available_parallelism().map_or(1, |n| n.get())
}

impl Config {
    /// Checks the parts of the configuration clap cannot check on its own.
    pub fn validate(&self) -> Result<()> {
        if !self.model.model_path.is_file() {
            return Err(DamageSegError::Validation {
                field: "model_path".to_string(),
                reason: format!("{} does not exist", self.model.model_path.display()),
            });
        }
        if self.model.num_threads == 0 {
            return Err(DamageSegError::Validation {
                field: "num_threads".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        match &self.command {
            Command::Serve(serve) if serve.max_upload_bytes == 0 => {
                Err(DamageSegError::Validation {
                    field: "max_upload_bytes".to_string(),
                    reason: "must be greater than zero".to_string(),
                })
            }
            Command::Predict(predict) => {
                for (field, path) in [("pre", &predict.pre), ("post", &predict.post)] {
                    if !path.is_file() {
                        return Err(DamageSegError::Validation {
                            field: field.to_string(),
                            reason: format!("{} does not exist", path.display()),
                        });
                    }
                }
                output_format(&predict.output).map(|_| ())
            }
            Command::Batch(batch) if !batch.input_dir.is_dir() => {
                Err(DamageSegError::Validation {
                    field: "input_dir".to_string(),
                    reason: format!("{} is not a directory", batch.input_dir.display()),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Resolves the writable image format implied by an output path's extension.
pub fn output_format(path: &std::path::Path) -> Result<ImageFormat> {
    ImageFormat::from_path(path)
        .ok()
        .filter(|f| f.writing_enabled())
        .ok_or_else(|| DamageSegError::Validation {
            field: "output".to_string(),
            reason: format!("{} has no writable image extension", path.display()),
        })
}

fn check_format(s: &str) -> std::result::Result<String, String> {
    let supported: Vec<_> = ImageFormat::all()
        .filter(|f| f.writing_enabled())
        .flat_map(|f| f.extensions_str())
        .map(|s| format!("`{}`", s))
        .collect();
    let supported_message = format!("Supported formats: {}", supported.join(", "));

    let format = ImageFormat::from_extension(s)
        .ok_or(format!("{} is not supported. {}", s, supported_message))?;
    if !format.writing_enabled() {
        return Err(format!("{} is not supported. {}", s, supported_message));
    }

    Ok(s.to_string())
}
