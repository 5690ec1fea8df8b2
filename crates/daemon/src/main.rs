//! Snapdiff Daemon
//!
//! Runs the diff worker over the snapshot store, and exposes the reference
//! chain and the image comparator as one-shot commands.

use anyhow::Context;
use clap::{Parser, Subcommand};
use snapdiff_common::{Lineage, NewSnapshot};
use snapdiff_compare::{ExclusionZoneSet, Rectangle};
use snapdiff_daemon::{DaemonConfig, Engine};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod output;

use output::{print_item, print_message, DiffSummary, OutputFormat};

#[derive(Parser)]
#[command(name = "snapdiffd")]
#[command(about = "Snapdiff daemon - screenshot diffing and reference chain maintenance")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path (defaults to <store>/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Store directory
    #[arg(short, long, env = "SNAPDIFF_STORE", global = true)]
    store: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "table", global = true)]
    format: OutputFormat,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the diff worker until interrupted
    Serve,

    /// Store a new capture and queue its diff
    Ingest(IngestArgs),

    /// Find an image inside a larger reference image
    Locate {
        reference: PathBuf,
        image: PathBuf,
    },

    /// Diff two image files
    Diff {
        reference: PathBuf,
        image: PathBuf,

        /// Exclusion zone as x,y,width,height (repeatable)
        #[arg(long = "exclude")]
        exclude: Vec<Rectangle>,

        /// Write the diff overlay to this PNG file
        #[arg(long)]
        overlay: Option<PathBuf>,
    },

    /// Make a snapshot the reference of its lineage
    Promote { id: i64 },

    /// Turn a reference back into a candidate
    Demote { id: i64 },

    /// Delete a snapshot, repairing the reference chain first
    Delete { id: i64 },

    /// Recompute a snapshot and every snapshot sharing its reference
    Recompute { id: i64 },

    /// Add an exclusion zone (x,y,width,height) to a snapshot
    Exclude { id: i64, zone: Rectangle },

    /// Show a snapshot
    Show { id: i64 },
}

#[derive(clap::Args)]
struct IngestArgs {
    /// Captured image
    image: PathBuf,

    #[arg(long)]
    test_case: String,

    #[arg(long)]
    step: i64,

    #[arg(long, default_value = "0")]
    environment: i64,

    #[arg(long, default_value = "0")]
    version: i64,

    #[arg(long, default_value = "")]
    browser: String,

    /// Display name of the capture within the step
    #[arg(long, default_value = "")]
    name: String,

    /// Diff percentage above which the capture has too many diffs
    #[arg(long, default_value = "0")]
    tolerance: f64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Load configuration
    let store_path = cli.store.clone().unwrap_or_else(snapdiff_common::default_store_path);
    let config_path = cli.config.clone().unwrap_or_else(|| store_path.join("config.toml"));
    let mut config = DaemonConfig::load(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;
    if cli.store.is_some() {
        config.store_path = store_path;
    }

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Locate { reference, image } => {
            match config.comparator().locate(&reference, &image)? {
                Some(found) => print_message(&format!("found at {}", found), cli.format),
                None => print_message("not found", cli.format),
            }
            Ok(())
        }
        Commands::Diff {
            reference,
            image,
            exclude,
            overlay,
        } => {
            let comparator = config.comparator();
            let zones: ExclusionZoneSet = exclude.into_iter().collect();
            let result = comparator.diff(&reference, &image, &zones)?;

            if let Some(path) = overlay {
                comparator
                    .render_overlay(result.width, result.height, &result.pixels)
                    .save(&path)
                    .with_context(|| format!("writing overlay to {}", path.display()))?;
            }

            let summary = DiffSummary {
                width: result.width,
                height: result.height,
                diff_pixels: result.pixels.len(),
                diff_percent: result.diff_percent,
            };
            print_item(&summary, cli.format);
            Ok(())
        }
        command => {
            let engine = Engine::open(config)?;
            let result = run_chain_command(&engine, command, cli.format).await;
            // Let queued jobs finish before exiting
            engine.shutdown().await;
            result
        }
    }
}

async fn serve(config: DaemonConfig) -> anyhow::Result<()> {
    info!("Snapdiff daemon v{}", env!("CARGO_PKG_VERSION"));

    let engine = Engine::open(config)?;
    let worker = engine.service().start()?;
    info!("Diff worker {} running", worker.id());

    engine.resume_pending().await?;

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    engine.shutdown().await;
    info!("Daemon shutdown complete");
    Ok(())
}

async fn run_chain_command(engine: &Engine, command: Commands, format: OutputFormat) -> anyhow::Result<()> {
    let chain = engine.chain();

    match command {
        Commands::Ingest(args) => {
            let image = std::fs::canonicalize(&args.image)
                .with_context(|| format!("reading {}", args.image.display()))?;
            let (width, height) = snapdiff_compare::image_dimensions(&image)?;
            let lineage = Lineage {
                test_case_name: args.test_case,
                step_id: args.step,
                environment_id: args.environment,
                version_id: args.version,
                browser: args.browser,
                display_name: args.name,
            };
            let capture = NewSnapshot::new(lineage)
                .with_image(image, width, height)
                .with_tolerance(args.tolerance);

            let snapshot = chain.ingest(capture).await?;
            print_item(&snapshot, format);
        }
        Commands::Promote { id } => {
            let snapshot = chain.promote(id).await?;
            print_item(&snapshot, format);
        }
        Commands::Demote { id } => {
            let snapshot = chain.demote(id).await?;
            print_item(&snapshot, format);
        }
        Commands::Delete { id } => {
            if chain.delete(id).await? {
                print_message(&format!("snapshot {} deleted", id), format);
            }
        }
        Commands::Recompute { id } => {
            if chain.recompute(id).await? {
                print_item(&engine.store().require(id)?, format);
            } else {
                print_message(&format!("snapshot {} is a reference, nothing to recompute", id), format);
            }
        }
        Commands::Exclude { id, zone } => {
            let zone = chain.add_exclude_zone(id, zone)?;
            print_item(&zone, format);
        }
        Commands::Show { id } => {
            print_item(&engine.store().require(id)?, format);
        }
        Commands::Serve | Commands::Locate { .. } | Commands::Diff { .. } => {
            anyhow::bail!("command does not operate on the snapshot store")
        }
    }

    Ok(())
}
