use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use photo_uploader::config::{self, Config};
use photo_uploader::image_processor::WebpCompressor;
use photo_uploader::models::{FileArtifact, UploadStatus};
use photo_uploader::security::InputValidator;
use photo_uploader::uploader::{StorageClient, UploadRegistry};

#[derive(Parser)]
#[command(name = "photo-uploader", about = "Compress and upload images concurrently")]
struct Cli {
    /// Image files to upload
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Read settings from this file instead of the user config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Upload endpoint URL
    #[arg(long)]
    endpoint: Option<String>,

    #[arg(long)]
    max_width: Option<u32>,

    #[arg(long)]
    max_height: Option<u32>,

    /// Encoder quality between 0 and 1
    #[arg(long)]
    quality: Option<f32>,

    /// Print the final upload list as JSON
    #[arg(long)]
    json: bool,
}

fn load_settings(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => config::load_config_from(path)?,
        None => config::load_config()?,
    };

    if let Some(endpoint) = &cli.endpoint {
        config.upload_endpoint = endpoint.clone();
    }
    if let Some(max_width) = cli.max_width {
        config.max_width = max_width;
    }
    if let Some(max_height) = cli.max_height {
        config.max_height = max_height;
    }
    if let Some(quality) = cli.quality {
        config.quality = quality;
    }

    config::validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = load_settings(&cli).context("invalid configuration")?;

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(config.log_level_filter())
        .parse_default_env()
        .init();

    log::info!("Starting photo uploader");

    let mut files = Vec::with_capacity(cli.files.len());
    for path in &cli.files {
        if let Err(e) = InputValidator::validate_file_path(path) {
            log::error!("Skipping {}: {}", path.display(), e);
            continue;
        }
        match FileArtifact::open(path).await {
            Ok(file) => files.push(file),
            Err(e) => log::error!("Failed to read {}: {}", path.display(), e),
        }
    }

    if files.is_empty() {
        anyhow::bail!("no readable files to upload");
    }

    let client = StorageClient::from_config(&config)?;
    log::debug!("Uploading {} files to {}", files.len(), client.endpoint());
    let registry = UploadRegistry::new(WebpCompressor::new(config.compress_options()), client);

    let interrupt_registry = registry.clone();
    ctrlc::set_handler(move || {
        let canceled = interrupt_registry.cancel_all();
        log::warn!("Interrupted, canceling {} pending uploads", canceled);
    })
    .context("failed to install interrupt handler")?;

    let mut subscription = registry.subscribe();
    registry.submit(files);

    let mut last_percentage = None;
    loop {
        let progress = subscription.current();
        if last_percentage != Some(progress.global_percentage) {
            log::info!("Progress: {}%", progress.global_percentage);
            last_percentage = Some(progress.global_percentage);
        }
        if !progress.is_there_any_pending_uploads {
            break;
        }
        if subscription.changed().await.is_none() {
            break;
        }
    }

    let uploads = registry.snapshot();
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&uploads)?);
    } else {
        for upload in &uploads {
            match upload.status {
                UploadStatus::Success => println!(
                    "{}  {}  {}",
                    upload.status,
                    upload.name,
                    upload.remote_url.as_deref().unwrap_or_default()
                ),
                _ => println!(
                    "{}  {}  {}",
                    upload.status,
                    upload.name,
                    upload.error.as_deref().unwrap_or_default()
                ),
            }
        }
    }

    let summary = registry.summary();
    log::info!(
        "Finished: {}/{} successful, {} failed, {} canceled",
        summary.success,
        summary.total,
        summary.error,
        summary.canceled
    );

    if summary.error > 0 {
        return Ok(ExitCode::FAILURE);
    }

    Ok(ExitCode::SUCCESS)
}
