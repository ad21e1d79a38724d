//! Batch background removal from the command line
//!
//! Loads the matting model once, runs every input through the batch pipeline and
//! writes the results as individual PNG files and/or a single `images.zip`.

use super::config::CliConfigBuilder;
use crate::{
    assets::AssetLoader,
    cache::{format_size, ModelCache},
    download::{ProgressIndicator, ProgressSink},
    error::RmbgError,
    export::{entry_name, ArchiveExporter},
    pipeline::{BatchPipeline, BatchSummary},
    services::ProgressReporter,
    tracing_config::{init_cli_tracing, spans, TracingFormat},
    types::{ImageId, LoadProgress, ResultImage, SUPPORTED_EXTENSIONS},
    utils::{ExecutionProviderManager, RuntimeProbe},
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::Instrument;

/// Remove image backgrounds in batch with the RMBG-1.4 matting model
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "rmbg")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Input image files or directories, processed in the given order
    #[arg(value_name = "INPUT", required_unless_present_any = &["show_providers", "only_download", "clear_cache"])]
    pub input: Vec<String>,

    /// Output directory [default: current directory]
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Execution provider in format backend:provider (e.g., onnx:auto, onnx:cuda, tract:cpu)
    #[arg(short, long)]
    pub execution_provider: Option<String>,

    /// Model weight variant (fp16, fp32) [default: fp16]
    #[arg(long)]
    pub variant: Option<String>,

    /// Fail unless a GPU execution provider (CUDA or CoreML) is available
    #[arg(long)]
    pub require_accelerator: bool,

    /// Write all images into a single images.zip
    #[arg(short, long)]
    pub zip: bool,

    /// Write each result as image-<N>.png (default unless --zip is given)
    #[arg(short, long)]
    pub individual: bool,

    /// JSON pipeline configuration file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Process directories recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// File name pattern for directory inputs (e.g., "*.jpg")
    #[arg(long)]
    pub pattern: Option<String>,

    /// Number of inference threads (0 = auto)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Mask upsampling filter
    #[arg(long, value_enum)]
    pub mask_resampling: Option<CliMaskResampling>,

    /// Model cache directory [env: RMBG_CACHE_DIR]
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<String>,

    /// Show execution provider diagnostics and exit
    #[arg(long)]
    pub show_providers: bool,

    /// Download the model into the cache without processing images
    #[arg(long)]
    pub only_download: bool,

    /// Remove the cached model and exit
    #[arg(long)]
    pub clear_cache: bool,

    /// Copy result N (1-based) to the clipboard after processing
    #[cfg(all(windows, feature = "windows-clipboard"))]
    #[arg(long, value_name = "N")]
    pub copy: Option<usize>,

    /// Plain log lines without colors
    #[arg(long)]
    pub compact_logs: bool,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliMaskResampling {
    Nearest,
    Bilinear,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    let format = if cli.compact_logs {
        TracingFormat::Compact
    } else {
        TracingFormat::Console
    };
    init_cli_tracing(cli.verbose, format).context("Failed to initialize tracing")?;

    if cli.show_providers {
        show_provider_diagnostics();
        return Ok(());
    }

    CliConfigBuilder::validate_cli(&cli).context("Invalid CLI arguments")?;
    let config = CliConfigBuilder::from_cli(&cli)?;

    if cli.clear_cache {
        return clear_cached_model(&config);
    }

    let provider =
        ExecutionProviderManager::provider_to_string(config.backend_type, config.execution_provider);
    let session = spans::session(&config.model_id, &provider);

    async move {
        let loader = AssetLoader::new(config.clone());
        let assets = load_with_progress(&loader).await?;

        if cli.only_download {
            if let Some(dir) = assets.model_dir() {
                println!("Model ready in {}", dir.display());
            }
            return Ok(());
        }

        let files = collect_inputs(&cli.input, cli.recursive, cli.pattern.as_deref())?;
        if files.is_empty() {
            anyhow::bail!("No supported images found in the given inputs");
        }

        let pipeline = BatchPipeline::new();
        pipeline.add_images(files);

        let reporter = CliProgressReporter::new(pipeline.len());
        let summary = pipeline
            .run(&assets, &reporter)
            .instrument(spans::batch(pipeline.len()))
            .await
            .context("Batch processing failed")?;

        let output_dir = cli.output.clone().unwrap_or_else(|| PathBuf::from("."));
        tokio::fs::create_dir_all(&output_dir)
            .await
            .with_context(|| format!("Failed to create {}", output_dir.display()))?;

        write_outputs(&cli, &pipeline, &ArchiveExporter::from_config(&config), &output_dir)
            .instrument(spans::export(&output_dir))
            .await?;

        #[cfg(all(windows, feature = "windows-clipboard"))]
        if let Some(n) = cli.copy {
            copy_result(&pipeline, n).await;
        }

        print_summary(&summary);
        Ok(())
    }
    .instrument(session)
    .await
}

/// Load the model while a byte progress bar follows the weight download
async fn load_with_progress(loader: &AssetLoader) -> Result<Arc<crate::assets::MattingAssets>> {
    let indicator = Arc::new(ProgressIndicator::for_download());
    indicator.set_message(format!("{} ({})", loader.config().model_id, loader.config().weight_file()));

    let watcher = tokio::spawn(follow_progress(loader.subscribe(), Arc::clone(&indicator)));
    let loaded = loader.load().await;
    watcher.abort();

    match loaded {
        Ok(assets) => {
            let last = *loader.subscribe().borrow();
            indicator.report(last);
            let size = last.total_bytes.map_or_else(String::new, |b| format!(" ({})", format_size(b)));
            indicator.finish_with_message(format!("model ready{size}"));
            Ok(assets)
        },
        Err(e) => {
            indicator.finish_with_message("model load failed".to_string());
            let hint = match &e {
                RmbgError::EnvironmentUnsupported(_) => {
                    " (run with --show-providers to see what this host supports)"
                },
                _ => "",
            };
            Err(anyhow::Error::new(e).context(format!("Failed to load matting model{hint}")))
        },
    }
}

async fn follow_progress(mut rx: watch::Receiver<LoadProgress>, indicator: Arc<ProgressIndicator>) {
    while rx.changed().await.is_ok() {
        let progress = *rx.borrow_and_update();
        indicator.report(progress);
    }
}

async fn write_outputs(
    cli: &Cli,
    pipeline: &BatchPipeline,
    exporter: &ArchiveExporter,
    output_dir: &Path,
) -> Result<()> {
    if cli.zip {
        let path = pipeline
            .save_archive(exporter, output_dir)
            .await
            .context("Failed to write archive")?;
        println!("Archive written to {}", path.display());
    }

    if cli.individual || !cli.zip {
        for (index, slot) in pipeline.results().into_iter().enumerate() {
            let Some(result) = slot else {
                continue;
            };
            let path = output_dir.join(entry_name(index));
            save_png(result, path.clone())
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Saved {}", path.display());
        }
    }
    Ok(())
}

async fn save_png(result: ResultImage, path: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || result.save_png(path)).await??;
    Ok(())
}

#[cfg(all(windows, feature = "windows-clipboard"))]
async fn copy_result(pipeline: &BatchPipeline, n: usize) {
    use crate::export::{copy_to_clipboard, WindowsClipboard};

    match n.checked_sub(1).and_then(|i| pipeline.results().into_iter().nth(i)).flatten() {
        Some(result) => {
            copy_to_clipboard(&result, &WindowsClipboard).await;
        },
        None => warn!("No result at position {} to copy", n),
    }
}

fn print_summary(summary: &BatchSummary) {
    println!(
        "Processed {}/{} image(s) in {:.2}s ({} skipped)",
        summary.succeeded,
        summary.total,
        summary.elapsed.as_secs_f64(),
        summary.skipped
    );
}

/// Batch progress bar, one tick per finished image
struct CliProgressReporter {
    bar: ProgressBar,
}

impl CliProgressReporter {
    fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        Self { bar }
    }
}

impl ProgressReporter for CliProgressReporter {
    fn report_result(&self, index: usize, result: &ResultImage) {
        let (width, height) = result.dimensions();
        self.bar.set_message(format!("image {} ({width}x{height})", index + 1));
        self.bar.inc(1);
    }

    fn report_skipped(&self, index: usize, _image_id: ImageId, error: &RmbgError) {
        self.bar.println(format!("skipped image {}: {error}", index + 1));
        self.bar.inc(1);
    }

    fn report_finished(&self, summary: &BatchSummary) {
        self.bar
            .finish_with_message(format!("{} succeeded, {} skipped", summary.succeeded, summary.skipped));
    }
}

fn show_provider_diagnostics() {
    println!("Backend and execution provider diagnostics");
    println!("-------------------------------------------");

    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    println!("System: {cpu_count} CPU cores detected\n");

    for provider_info in ExecutionProviderManager::list_all_providers(&RuntimeProbe) {
        let status = if provider_info.available {
            "available"
        } else {
            "not available"
        };
        println!(
            "  {:<12} {:<14} {}",
            provider_info.name, status, provider_info.description
        );
    }

    println!("\nUsage:");
    println!("  --execution-provider onnx:auto    # best ONNX provider (default)");
    println!("  --execution-provider onnx:cuda    # NVIDIA CUDA");
    println!("  --execution-provider onnx:coreml  # Apple CoreML");
    println!("  --execution-provider tract:cpu    # pure Rust backend");
    println!("  --require-accelerator             # refuse to run on CPU only");
}

fn clear_cached_model(config: &crate::config::PipelineConfig) -> Result<()> {
    let cache = ModelCache::from_override(config.cache_dir.as_deref())
        .context("Failed to open model cache")?;

    if cache
        .clear_model(&config.model_id)
        .with_context(|| format!("Failed to clear model '{}'", config.model_id))?
    {
        println!("Removed {} from {}", config.model_id, cache.get_current_cache_dir().display());
    } else {
        println!("Model '{}' is not cached", config.model_id);
    }
    Ok(())
}

/// Expand files and directories into an ordered list of image paths
fn collect_inputs(inputs: &[String], recursive: bool, pattern: Option<&str>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        let path = PathBuf::from(input);
        if path.is_dir() {
            files.extend(
                find_image_files(&path, recursive, pattern)
                    .with_context(|| format!("Failed to scan {}", path.display()))?,
            );
        } else if path.is_file() {
            if !is_image_file(&path) {
                warn!("{} has an unrecognized extension, trying anyway", path.display());
            }
            files.push(path);
        } else {
            anyhow::bail!("Input not found: {}", path.display());
        }
    }
    Ok(files)
}

/// Image files in a directory, sorted by path
fn find_image_files(dir: &Path, recursive: bool, pattern: Option<&str>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    if recursive {
        for entry in walkdir::WalkDir::new(dir) {
            let entry = entry?;
            if entry.file_type().is_file() {
                let path = entry.path();
                if is_image_file(path) && matches_pattern(path, pattern) {
                    files.push(path.to_path_buf());
                }
            }
        }
    } else {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                let path = entry.path();
                if is_image_file(&path) && matches_pattern(&path, pattern) {
                    files.push(path);
                }
            }
        }
    }

    files.sort();
    Ok(files)
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

fn matches_pattern(path: &Path, pattern: Option<&str>) -> bool {
    match pattern {
        Some(pat) => path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|filename| {
                glob::Pattern::new(pat)
                    .map(|p| p.matches(filename))
                    .unwrap_or(false)
            }),
        None => true,
    }
}
