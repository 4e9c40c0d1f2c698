use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use geodamage::{
    batch::BatchProcessor,
    config::{output_format, Command, Config},
    save_rendered, server, DamageAnalyzer, Model,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::parse();
    config.validate()?;

    let model = Model::new(
        &config.model.model_path,
        config.model.num_threads,
        config.model.device_id,
    )?;
    let analyzer = DamageAnalyzer::new(model, config.model.overlay_alpha);

    match config.command {
        Command::Serve(serve) => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to start async runtime")?;
            runtime.block_on(server::serve(Arc::new(analyzer), &serve))?;
        }
        Command::Predict(predict) => {
            let pre = image::open(&predict.pre)
                .with_context(|| format!("Failed to open image: {}", predict.pre.display()))?;
            let post = image::open(&predict.post)
                .with_context(|| format!("Failed to open image: {}", predict.post.display()))?;

            let format = output_format(&predict.output)?;
            let rendered = analyzer.render(&pre, &post, predict.mask_only)?;
            save_rendered(rendered, &predict.output, format)?;
            info!(output = %predict.output.display(), "wrote damage map");
        }
        Command::Batch(batch) => {
            let written = BatchProcessor::new(&analyzer, batch).run()?;
            info!(written, "processed image pairs");
        }
    }

    Ok(())
}
