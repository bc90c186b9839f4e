//! reelcheck CLI entry point

use chrono::NaiveDate;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use reelcheck::{
    commands::{
        cmd_budget, cmd_evaluate, cmd_init, cmd_retention_set, cmd_retention_sweep,
        cmd_retention_watch, print_budget, print_cleanup_stats, print_evaluation, print_init,
        read_request, InitOptions, RequestFlags,
    },
    config::Config,
    error::Result,
};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "reelcheck")]
#[command(version, about = "Duplicate detection and brief alignment for campaign videos", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize reelcheck configuration and database
    Init {
        /// Base directory (defaults to ~/.reelcheck)
        #[arg(long)]
        base_dir: Option<PathBuf>,

        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Evaluate a video submission
    Evaluate {
        /// JSON request file ('-' for stdin); replaces the flags below
        #[arg(short, long)]
        request: Option<PathBuf>,

        /// Campaign identifier
        #[arg(long)]
        campaign: Option<String>,

        /// Video URL to evaluate
        #[arg(long)]
        url: Option<String>,

        /// Candidate URL to compare against (repeatable)
        #[arg(long = "candidate")]
        candidates: Vec<String>,

        /// Campaign brief
        #[arg(long)]
        brief: Option<String>,

        /// Campaign end date (YYYY-MM-DD)
        #[arg(long)]
        end_date: Option<NaiveDate>,
    },

    /// Campaign retention
    Retention {
        #[command(subcommand)]
        action: RetentionAction,
    },

    /// Show today's budget usage for a campaign
    Budget {
        /// Campaign identifier
        campaign: String,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum RetentionAction {
    /// Purge campaigns whose end date has passed
    Sweep {
        /// Treat this date as today (YYYY-MM-DD)
        #[arg(long)]
        today: Option<NaiveDate>,
    },

    /// Sweep periodically until interrupted
    Watch,

    /// Register or move a campaign's end date
    Set {
        campaign: String,
        /// End date (YYYY-MM-DD)
        end_date: NaiveDate,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    if let Commands::Init { base_dir, force } = cli.command {
        let report = cmd_init(InitOptions {
            base_dir: base_dir.unwrap_or_else(Config::default_base_dir),
            force,
        })
        .await?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_init(&report);
        }
        return Ok(());
    }

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "reelcheck", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Init { .. } | Commands::Completions { .. } => unreachable!(),

        Commands::Evaluate {
            request,
            campaign,
            url,
            candidates,
            brief,
            end_date,
        } => {
            let request = match request {
                Some(path) => read_request(&path)?,
                None => RequestFlags {
                    campaign_id: campaign,
                    video_url: url,
                    candidates,
                    brief,
                    end_date,
                }
                .into_request()?,
            };

            let response = cmd_evaluate(&config, request).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_evaluation(&response);
            }
        }

        Commands::Retention { action } => match action {
            RetentionAction::Sweep { today } => {
                let stats = cmd_retention_sweep(&config, today).await?;
                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&stats)?);
                } else {
                    print_cleanup_stats(&stats);
                }
            }
            RetentionAction::Watch => cmd_retention_watch(&config).await?,
            RetentionAction::Set { campaign, end_date } => {
                cmd_retention_set(&config, &campaign, end_date).await?;
                if cli.json {
                    println!(
                        "{}",
                        serde_json::json!({"campaign_id": campaign, "end_date": end_date})
                    );
                } else {
                    println!("✓ {} retained until {}", campaign, end_date);
                }
            }
        },

        Commands::Budget { campaign } => {
            let status = cmd_budget(&config, &campaign).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_budget(&status);
            }
        }
    }

    Ok(())
}

/// An explicit path must exist; otherwise fall back to defaults under ~/.reelcheck
fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => Config::load_from(None),
    }
}
