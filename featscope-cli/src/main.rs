//! featscope CLI: feature importance from explanation responses.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// featscope: per-feature importance from model explanations
#[derive(Parser, Debug)]
#[command(name = "featscope", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Rank features by importance for one label
    Importance {
        /// Explanation response JSON file
        #[arg(short, long)]
        response: PathBuf,
        /// Feature grouping TOML file (defaults to every input of the response)
        #[arg(short, long)]
        groups: Option<PathBuf>,
        /// Label index to report (defaults to the highest example score)
        #[arg(long)]
        class: Option<i64>,
        /// Number of features to print (defaults to `explain.top_k`)
        #[arg(long)]
        top_k: Option<usize>,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print raw attribution arrays per input
    Tensors {
        /// Explanation response JSON file
        #[arg(short, long)]
        response: PathBuf,
        /// Feature grouping TOML file (defaults to every input of the response)
        #[arg(short, long)]
        groups: Option<PathBuf>,
        /// Label index to report (defaults to the highest example score)
        #[arg(long)]
        class: Option<i64>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Show the merged configuration
    Show,
}

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "featscope", "featscope")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "featscope.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let output = commands::handle_command(cli.command, &workspace)?;
    println!("{output}");
    Ok(())
}
