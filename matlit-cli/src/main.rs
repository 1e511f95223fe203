//! matlit CLI: collect papers about a Materials Project material.
//!
//! Resolves the material, searches the literature, screens candidates with
//! Gemini, downloads full texts and writes a run directory.

mod prompts;
mod summary;

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use matlit_core::{ConfigOverrides, Credentials, MaterialId, Pipeline, load_config};

const DEFAULT_COUNT: usize = 5;

/// matlit: literature collection for Materials Project materials
#[derive(Parser, Debug)]
#[command(name = "matlit", version, about, long_about = None)]
struct Cli {
    /// Materials Project ID, `mp-20738` or `20738` (prompted if omitted)
    #[arg(short, long)]
    material: Option<String>,

    /// Number of relevant papers to collect (prompted if omitted, default 5)
    #[arg(short = 'n', long)]
    count: Option<usize>,

    /// Base directory for run output (overrides `output.base_dir`)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Try the publisher API first (requires an institutional network)
    #[arg(long)]
    institutional: bool,

    /// Skip the content analysis of downloaded PDFs
    #[arg(long)]
    no_analysis: bool,

    /// Screen and pursue further candidates until the target is downloaded
    #[arg(long)]
    supplement: bool,

    /// Directory searched for `.matlit/config.toml`
    #[arg(short, long, default_value = ".")]
    workdir: PathBuf,

    /// Never prompt; missing values use defaults or fail
    #[arg(long)]
    no_input: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only print errors
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    /// Flags that take precedence over files and environment.
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            output_dir: self.output.clone(),
            analysis_enabled: self.no_analysis.then_some(false),
            supplement: self.supplement.then_some(true),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let stderr_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(stderr_filter);

    let log_dir = directories::ProjectDirs::from("dev", "matlit", "matlit")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "matlit.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workdir = cli
        .workdir
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let config = load_config(Some(&workdir), &cli.overrides())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    for warning in config.validate()? {
        tracing::warn!(warning = warning.as_str(), "Configuration warning");
    }

    let mut credentials = Credentials::from_env()?;
    credentials.institutional_access |= cli.institutional;

    let interactive = !cli.no_input && prompts::stdin_is_terminal();
    let raw_material = match cli.material {
        Some(raw) => raw,
        None if interactive => prompts::material_id()?,
        None => anyhow::bail!("No material given; pass --material mp-<digits>"),
    };
    // Reject malformed IDs before any network access.
    MaterialId::parse(&raw_material)?;

    let count = match cli.count {
        Some(n) => n,
        None if interactive => prompts::paper_count(DEFAULT_COUNT)?,
        None => DEFAULT_COUNT,
    };

    let sources = matlit_sources::build_sources(&config, &credentials)
        .context("Failed to build HTTP clients")?;
    let pipeline = Pipeline::new(config, sources, credentials.institutional_access);

    let outcome = pipeline
        .run(&raw_material, count)
        .await
        .with_context(|| format!("Run for {raw_material} failed"))?;

    if !cli.quiet {
        println!(
            "{}",
            summary::render(
                &outcome.report.material,
                &outcome.report.summary,
                outcome.report.target_count,
                outcome.run_dir.root(),
            )
        );
    }
    Ok(())
}
