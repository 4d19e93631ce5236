//! Kiln CLI tool.

use clap::{Parser, Subcommand};
use kiln_core::{AnnotationFilter, TriggerKind};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Kiln build trigger CLI", long_about = None)]
struct Cli {
    /// API server URL
    #[arg(long, env = "KILN_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile the job spec a trigger would start, from a local checkout
    Render {
        /// Repository checkout
        #[arg(long, default_value = ".")]
        dir: PathBuf,
        /// Repository owner
        #[arg(long)]
        owner: String,
        /// Repository name
        #[arg(long)]
        repo: String,
        /// Revision, e.g. refs/heads/main
        #[arg(long)]
        rev: String,
        /// Trigger kind
        #[arg(long, default_value = "push")]
        trigger: TriggerKind,
    },
    /// Validate the build configuration and its templates
    Validate {
        /// Repository checkout
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
    /// Query jobs on the server
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },
}

#[derive(Subcommand)]
enum JobCommands {
    /// List jobs
    List {
        /// Annotation filter: key=value, key^=prefix or key
        #[arg(long = "filter")]
        filters: Vec<AnnotationFilter>,
        /// Offset into the matching jobs
        #[arg(long, default_value = "0")]
        start: usize,
        /// Maximum number of jobs to show, 0 for all
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Show job details
    Show {
        /// Job name
        name: String,
    },
    /// Print the logs of a finished job
    Logs {
        /// Job name
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            dir,
            owner,
            repo,
            rev,
            trigger,
        } => {
            commands::render::render(&dir, &owner, &repo, &rev, trigger).await?;
        }
        Commands::Validate { dir } => {
            commands::render::validate(&dir).await?;
        }
        Commands::Jobs { command } => match command {
            JobCommands::List {
                filters,
                start,
                limit,
            } => {
                commands::jobs::list(&cli.api_url, &filters, start, limit).await?;
            }
            JobCommands::Show { name } => {
                commands::jobs::show(&cli.api_url, &name).await?;
            }
            JobCommands::Logs { name } => {
                commands::jobs::logs(&cli.api_url, &name).await?;
            }
        },
    }

    Ok(())
}
