//! vidsqueeze command line front-end
//!
//! The stand-in for the UI layer: file selection, confirmation prompts,
//! progress rendering, Ctrl-C cancellation, and writing the finished
//! artifact next to the input.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vidsqueeze::output::format_file_size;
use vidsqueeze::{
    CompressionController, ControllerConfig, ErrorResponse, PipelineEvent, Platform, QualityPreset,
    SourceAsset,
};

/// Size above which constrained hosts get a confirmation prompt
const CONSTRAINED_WARN_MB: f64 = 200.0;

/// Size above which every host gets a confirmation prompt
const LARGE_FILE_WARN_MB: f64 = 1000.0;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PresetArg {
    Low,
    Balanced,
    High,
}

impl From<PresetArg> for QualityPreset {
    fn from(arg: PresetArg) -> Self {
        match arg {
            PresetArg::Low => QualityPreset::Low,
            PresetArg::Balanced => QualityPreset::Balanced,
            PresetArg::High => QualityPreset::High,
        }
    }
}

/// Compress a video to WebM, locally
#[derive(Debug, Parser)]
#[command(name = "vidsqueeze", version, about)]
struct Cli {
    /// Input video file
    input: PathBuf,

    /// Output file or directory (defaults to next to the input)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Quality preset
    #[arg(short, long, value_enum, default_value = "balanced")]
    preset: PresetArg,

    /// Cap the output duration, in seconds
    #[arg(long)]
    max_duration: Option<u64>,

    /// Abort the whole operation after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Skip large-file confirmation prompts
    #[arg(short, long)]
    yes: bool,

    /// Emit progress as JSON lines on stdout
    #[arg(long)]
    progress_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vidsqueeze=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    tracing::debug!(?cli, "Starting vidsqueeze v{}", env!("CARGO_PKG_VERSION"));

    let asset = SourceAsset::from_path(&cli.input)
        .with_context(|| format!("cannot read input file {:?}", cli.input))?;

    let platform = Platform::detect().await;
    confirm_large_file(&asset, platform.constrained, cli.yes)?;

    let controller = Arc::new(
        CompressionController::new()
            .with_platform(platform)
            .with_config(ControllerConfig {
                preset: cli.preset.into(),
                max_duration: cli.max_duration.map(Duration::from_secs),
                operation_timeout: cli.timeout.map(Duration::from_secs),
                constrained_override: None,
            }),
    );

    // Ctrl-C requests cooperative cancellation
    {
        let controller = controller.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nCancelling...");
                controller.cancel();
            }
        });
    }

    let printer = spawn_event_printer(&controller, cli.progress_json);

    let result = controller.start(&asset).await;
    printer.abort();

    let artifact = match result {
        Ok(artifact) => artifact,
        Err(error) => {
            let response = ErrorResponse::from(error);
            bail!("{} ({})", response.message, response.code);
        }
    };

    let output_path = resolve_output_path(cli.output, &cli.input, &artifact.suggested_filename);
    std::fs::write(&output_path, &artifact.data)
        .with_context(|| format!("failed to write {:?}", output_path))?;

    let savings = artifact.savings_percent(asset.size_bytes);
    eprintln!();
    println!("Compression complete!");
    println!(
        "  Compressed size: {} (original: {})",
        format_file_size(artifact.size_bytes),
        format_file_size(asset.size_bytes)
    );
    println!("  Space saved: {:.1}%", savings);
    println!("  Duration: {:.1}s", artifact.duration_ms as f64 / 1000.0);
    println!("  Saved to: {}", output_path.display());

    Ok(())
}

/// Warn before loading very large files, mirroring the host constraints
fn confirm_large_file(asset: &SourceAsset, constrained: bool, assume_yes: bool) -> Result<()> {
    let size_mb = asset.size_mb();
    let warning = if constrained && size_mb > CONSTRAINED_WARN_MB {
        Some(format!(
            "Warning: this is a large file ({:.0}MB). Compression on this machine may take a long time or fail due to memory limits.",
            size_mb
        ))
    } else if size_mb > LARGE_FILE_WARN_MB {
        Some(format!(
            "Warning: this is a very large file ({:.0}MB). Loading and compression may take several minutes.",
            size_mb
        ))
    } else {
        None
    };

    let Some(warning) = warning else {
        return Ok(());
    };
    if assume_yes {
        tracing::warn!("{} (continuing, --yes given)", warning);
        return Ok(());
    }

    eprintln!("{}", warning);
    eprint!("Continue? [y/N] ");
    std::io::stderr().flush().ok();

    let mut answer = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("failed to read confirmation")?;
    if !matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") {
        bail!("aborted by user");
    }
    Ok(())
}

/// Render pipeline events until the operation settles
fn spawn_event_printer(
    controller: &Arc<CompressionController>,
    as_json: bool,
) -> tokio::task::JoinHandle<()> {
    let mut events = controller.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if as_json {
                if let Ok(line) = serde_json::to_string(&event) {
                    println!("{}", line);
                }
                continue;
            }
            match event {
                PipelineEvent::Progress { update } => {
                    eprint!("\r{:<40}", update.label);
                    std::io::stderr().flush().ok();
                }
                PipelineEvent::StateChanged { state } => {
                    tracing::debug!(?state, "State changed");
                }
                PipelineEvent::Completed { .. } | PipelineEvent::Failed { .. } => break,
            }
        }
    })
}

fn resolve_output_path(
    output: Option<PathBuf>,
    input: &std::path::Path,
    suggested: &str,
) -> PathBuf {
    match output {
        Some(path) if path.is_dir() => path.join(suggested),
        Some(path) => path,
        None => input
            .parent()
            .map(|dir| dir.join(suggested))
            .unwrap_or_else(|| PathBuf::from(suggested)),
    }
}
