use anyhow::{Context, Result};
use clap::Parser;
use mmseg::config::Config;
use mmseg::{print_summary, report_path, write_report, Analyzer};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "mmseg")]
#[command(version, about = "Event-driven multimodal segment analysis")]
#[command(
    long_about = "Split a video into time-aligned segments and annotate each with prosodic and facial features, reusing cached features where nothing changed."
)]
struct Cli {
    /// Input video file
    input: PathBuf,

    /// Audio track to use instead of extracting one from the input
    #[arg(short, long)]
    audio: Option<PathBuf>,

    /// Output JSON file (defaults to <input>_analysis_result.json)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Disable the progress bar
    #[arg(long)]
    no_progress: bool,
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    if !cli.input.exists() {
        anyhow::bail!("Input file not found: {}", cli.input.display());
    }

    let output = cli.output.unwrap_or_else(|| report_path(&cli.input));

    let config = Config::load().context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;

    info!("Input:    {}", cli.input.display());
    info!("Output:   {}", output.display());
    if let Some(ref audio) = cli.audio {
        info!("Audio:    {}", audio.display());
    }

    let mut analyzer = Analyzer::from_config(&config)
        .context("Failed to set up analysis providers")?
        .with_progress(!cli.no_progress);

    let report = analyzer.analyze(&cli.input, cli.audio.as_deref()).await;

    write_report(&report, &output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    print_summary(&report, &output);

    if report.is_failed() {
        anyhow::bail!(
            "Analysis failed: {}",
            report.summary.error.as_deref().unwrap_or("unknown error")
        );
    }

    Ok(())
}
