//! Thumbnail Engine - command-line front end.
//!
//! Builds an engine over the local filesystem and runs one command against it.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use thumbnail_engine::{
    config::{ClearConfig, Cli, Command, FetchConfig, OutputFormat, StatsConfig, WarmConfig},
    DiskUsage, EngineArgs, FsImageSource, HitSource, ImageId, StatsSnapshot, ThumbnailEncoder,
    ThumbnailEngine,
};

/// Extensions picked up by `warm`.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.command.engine_args().verbose);

    match cli.command {
        Command::Warm(config) => run_warm(config).await,
        Command::Fetch(config) => run_fetch(config).await,
        Command::Stats(config) => run_stats(config).await,
        Command::Clear(config) => run_clear(config).await,
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "thumbnail_engine=debug"
    } else {
        "thumbnail_engine=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Build an engine from the shared arguments, logging any failure.
async fn build_engine(args: &EngineArgs) -> Option<ThumbnailEngine<FsImageSource>> {
    let config = args.to_engine_config();
    match ThumbnailEngine::new(config, FsImageSource::new()).await {
        Ok(engine) => Some(engine),
        Err(e) => {
            error!("Failed to start engine: {}", e);
            None
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to serialize output: {}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Warm Command
// =============================================================================

#[derive(Debug, Default, Serialize)]
struct WarmReport {
    images: usize,
    memory: usize,
    disk: usize,
    decode: usize,
    failed: usize,
    stats: StatsSnapshot,
    disk_usage: DiskUsage,
}

async fn run_warm(config: WarmConfig) -> ExitCode {
    let Some(engine) = build_engine(&config.engine).await else {
        return ExitCode::FAILURE;
    };

    let items = match list_images(&config.dir).await {
        Ok(items) => items,
        Err(e) => {
            error!("Failed to list {}: {}", config.dir.display(), e);
            return ExitCode::FAILURE;
        }
    };

    info!(
        dir = %config.dir.display(),
        images = items.len(),
        columns = config.columns,
        "Warming cache"
    );

    let columns = isize::try_from(config.columns).unwrap_or(isize::MAX);
    let mut report = WarmReport {
        images: items.len(),
        ..Default::default()
    };

    for (position, id) in items.iter().enumerate() {
        match engine.fetch_with_hit(id, None).await.map(|thumb| thumb.source) {
            Some(HitSource::Memory) => report.memory += 1,
            Some(HitSource::Disk) => report.disk += 1,
            Some(HitSource::Decode) => report.decode += 1,
            None => {
                debug!(id = %id, "No thumbnail produced");
                report.failed += 1;
            }
        }

        let position = isize::try_from(position).unwrap_or(isize::MAX);
        engine.prefetch_next(position, columns, &items, None).await;
    }

    engine.shutdown().await;
    report.stats = engine.stats();
    report.disk_usage = engine.disk_usage().await;

    match config.format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Text => {
            println!("Warmed {} image(s)", report.images);
            println!("  memory: {}", report.memory);
            println!("  disk:   {}", report.disk);
            println!("  decode: {}", report.decode);
            println!("  failed: {}", report.failed);
            println!(
                "Disk cache: {} file(s), {}",
                report.disk_usage.files,
                format_bytes(report.disk_usage.bytes)
            );
            ExitCode::SUCCESS
        }
    }
}

/// Image files directly inside `dir`, sorted by name.
async fn list_images(dir: &Path) -> std::io::Result<Vec<ImageId>> {
    let mut paths: Vec<PathBuf> = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if is_image && entry.file_type().await?.is_file() {
            paths.push(path);
        }
    }

    paths.sort();
    Ok(paths
        .into_iter()
        .map(|path| ImageId::new(path.to_string_lossy().into_owned()))
        .collect())
}

// =============================================================================
// Fetch Command
// =============================================================================

#[derive(Debug, Serialize)]
struct FetchReport {
    id: String,
    source: HitSource,
    width: u32,
    height: u32,
    output: PathBuf,
    bytes: usize,
}

async fn run_fetch(config: FetchConfig) -> ExitCode {
    let Some(engine) = build_engine(&config.engine).await else {
        return ExitCode::FAILURE;
    };

    let id = ImageId::new(config.id.as_str());
    let thumb = engine.fetch_with_hit(&id, None).await;
    engine.shutdown().await;

    let Some(thumb) = thumb else {
        error!("Could not produce a thumbnail for {}", id);
        return ExitCode::FAILURE;
    };

    let quality = engine.config().disk_compression_quality;
    let encoded = match ThumbnailEncoder::new().encode(&thumb.image, quality) {
        Ok(encoded) => encoded,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = tokio::fs::write(&config.output, &encoded).await {
        error!("Failed to write {}: {}", config.output.display(), e);
        return ExitCode::FAILURE;
    }

    let report = FetchReport {
        id: id.to_string(),
        source: thumb.source,
        width: thumb.image.width(),
        height: thumb.image.height(),
        output: config.output,
        bytes: encoded.len(),
    };

    match config.format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Text => {
            println!(
                "{} -> {} ({}x{}, {}, from {})",
                report.id,
                report.output.display(),
                report.width,
                report.height,
                format_bytes(report.bytes as u64),
                report.source
            );
            ExitCode::SUCCESS
        }
    }
}

// =============================================================================
// Stats / Clear Commands
// =============================================================================

#[derive(Debug, Serialize)]
struct StatsReport {
    cache_directory: PathBuf,
    files: usize,
    bytes: u64,
    budget_bytes: u64,
}

async fn run_stats(config: StatsConfig) -> ExitCode {
    let Some(engine) = build_engine(&config.engine).await else {
        return ExitCode::FAILURE;
    };

    let usage = engine.disk_usage().await;
    let report = StatsReport {
        cache_directory: engine.config().cache_directory.clone(),
        files: usage.files,
        bytes: usage.bytes,
        budget_bytes: engine.config().disk_budget_bytes,
    };

    match config.format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Text => {
            println!("Cache directory: {}", report.cache_directory.display());
            println!("Files:           {}", report.files);
            println!(
                "Size:            {} of {}",
                format_bytes(report.bytes),
                format_bytes(report.budget_bytes)
            );
            ExitCode::SUCCESS
        }
    }
}

async fn run_clear(config: ClearConfig) -> ExitCode {
    let Some(engine) = build_engine(&config.engine).await else {
        return ExitCode::FAILURE;
    };

    let before = engine.disk_usage().await;
    engine.clear_disk().await;
    println!("Removed {} file(s), {}", before.files, format_bytes(before.bytes));
    ExitCode::SUCCESS
}

fn format_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = KIB * 1024.0;

    let value = bytes as f64;
    if value >= MIB {
        format!("{:.1} MiB", value / MIB)
    } else if value >= KIB {
        format!("{:.1} KiB", value / KIB)
    } else {
        format!("{} B", bytes)
    }
}
