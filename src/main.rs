//! `reelscan` CLI - Scan movie and person metadata through the plugin chain

mod cmd;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "reelscan")]
#[command(about = "Movie and TV metadata scanner with pluggable sources")]
#[command(version)]
struct Cli {
    /// Verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Plugin chain file (defaults to <config dir>/reelscan/plugins.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan one movie or TV show through the plugin chain
    Scan {
        /// Title, usually derived from the file name
        title: String,

        /// Release year
        #[arg(short, long)]
        year: Option<u32>,

        /// Original-language title, tried after the title
        #[arg(long)]
        original_title: Option<String>,

        /// Treat the title as a TV show
        #[arg(long)]
        tv: bool,

        /// Known identifier as source:id (repeatable)
        #[arg(long = "id", value_name = "SOURCE:ID")]
        ids: Vec<String>,

        /// Sidecar NFO file to read user values and ids from
        #[arg(long)]
        nfo: Option<PathBuf>,

        /// Only run these plugins (comma-separated)
        #[arg(short, long)]
        plugins: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Scan one actor or crew member
    Person {
        /// Person name
        name: String,

        /// Known identifier as source:id (repeatable)
        #[arg(long = "id", value_name = "SOURCE:ID")]
        ids: Vec<String>,

        /// Only run these plugins (comma-separated)
        #[arg(short, long)]
        plugins: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Show ids and user values found in a sidecar NFO file
    Nfo {
        /// NFO file
        file: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// List the configured plugin chain
    Plugins {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so JSON output stays clean
    let default_level = if cli.verbose { "reelscan=debug" } else { "reelscan=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Scan {
            title,
            year,
            original_title,
            tv,
            ids,
            nfo,
            plugins,
            format,
        } => {
            let request = cmd::scan::ScanRequest {
                title,
                year,
                original_title,
                tv,
                ids,
                nfo,
            };
            cmd::scan::cmd_scan(config, request, plugins.as_deref(), format).await?;
        }
        Commands::Person {
            name,
            ids,
            plugins,
            format,
        } => {
            cmd::person::cmd_person(config, &name, &ids, plugins.as_deref(), format).await?;
        }
        Commands::Nfo { file, format } => {
            cmd::nfo::cmd_nfo(&file, format)?;
        }
        Commands::Plugins { format } => {
            cmd::plugins::cmd_plugins(config, format)?;
        }
    }

    Ok(())
}
