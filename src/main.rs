//! # Content Guard CLI (`cguard`)
//!
//! The `cguard` binary is the operator interface for Content Guard. It
//! manages the protected catalog, ingests scanned platform items, runs
//! detection jobs and lets reviewers work through the resulting matches.
//!
//! ## Usage
//!
//! ```bash
//! cguard --config ./config/cguard.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cguard init` | Create the SQLite database and run schema migrations |
//! | `cguard catalog add\|update\|get\|list` | Manage protected content |
//! | `cguard item add <file>` | Store scanned items from a JSON file |
//! | `cguard detect submit <item>` | Create a detection job |
//! | `cguard detect run <job>` | Run one pending job |
//! | `cguard detect drain` | Run every pending job through the worker pool |
//! | `cguard jobs get\|list` | Inspect detection jobs |
//! | `cguard matches list\|get\|review` | Inspect and review matches |
//! | `cguard judge` | Ask the configured judge about a pair of texts |
//! | `cguard stats` | Print catalog, job and match counts |
//!
//! ## Examples
//!
//! ```bash
//! cguard init
//! cguard catalog add --user u1 --title "Chapter 1" --modality text --text "..."
//! cguard item add ./scanned.json --detect --user u1
//! cguard matches list --user u1 --unreviewed
//! cguard matches review <match-id> --reviewer alice --confirm --action takedown
//! ```

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use content_guard::catalog_cmd::{self, ContentArgs, UpdateArgs};
use content_guard::{config, detect_cmd, ingest, logging, matches_cmd, migrate, stats};
use content_guard_core::judge::JudgeRequest;
use content_guard_core::models::{ActionTaken, JobStatus, MatchFilter, Modality};

/// Content Guard CLI: copyright detection for scanned platform content.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/cguard.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "cguard",
    about = "Content Guard: fingerprint, compare and flag scanned content against a protected catalog",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cguard.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Manage the protected content catalog.
    Catalog {
        #[command(subcommand)]
        action: CatalogAction,
    },

    /// Store scanned platform items.
    Item {
        #[command(subcommand)]
        action: ItemAction,
    },

    /// Create and run detection jobs.
    Detect {
        #[command(subcommand)]
        action: DetectAction,
    },

    /// Inspect detection jobs.
    Jobs {
        #[command(subcommand)]
        action: JobsAction,
    },

    /// Inspect and review content matches.
    Matches {
        #[command(subcommand)]
        action: MatchesAction,
    },

    /// Ask the configured judge whether a candidate text copies an owner text.
    Judge {
        /// The protected (owner) text.
        #[arg(long)]
        owner: String,
        /// The scanned (candidate) text.
        #[arg(long)]
        candidate: String,
        #[arg(long, default_value = "")]
        platform: String,
        #[arg(long, default_value = "")]
        url: String,
    },

    /// Show database statistics.
    Stats,
}

/// Content fields shared by `catalog add` and `catalog update`.
#[derive(Args)]
struct ContentFlags {
    /// Raw text of the work.
    #[arg(long)]
    text: Option<String>,
    /// Path to the stored media file.
    #[arg(long)]
    file: Option<String>,
    /// External URL of the work.
    #[arg(long)]
    url: Option<String>,
    #[arg(long)]
    description: Option<String>,
    /// Tag; repeat for several.
    #[arg(long = "tag")]
    tags: Vec<String>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    copyright_info: Option<String>,
}

impl From<ContentFlags> for ContentArgs {
    fn from(flags: ContentFlags) -> Self {
        ContentArgs {
            text: flags.text,
            file: flags.file,
            url: flags.url,
            description: flags.description,
            tags: if flags.tags.is_empty() {
                None
            } else {
                Some(flags.tags)
            },
            category: flags.category,
            copyright_info: flags.copyright_info,
        }
    }
}

#[derive(Subcommand)]
enum CatalogAction {
    /// Register a protected work and fingerprint it.
    Add {
        #[arg(long)]
        user: String,
        #[arg(long)]
        title: String,
        #[arg(long, value_parser = parse_modality)]
        modality: Modality,
        #[command(flatten)]
        content: ContentFlags,
    },
    /// Edit a protected work. Content changes regenerate its fingerprints.
    Update {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, value_parser = parse_modality)]
        modality: Option<Modality>,
        #[command(flatten)]
        content: ContentFlags,
        #[arg(long)]
        clear_text: bool,
        #[arg(long)]
        clear_file: bool,
        #[arg(long)]
        clear_url: bool,
        /// Set whether the entry is active.
        #[arg(long)]
        active: Option<bool>,
        /// Set whether the entry is monitored.
        #[arg(long)]
        monitoring: Option<bool>,
    },
    /// Print one protected work as JSON.
    Get { id: String },
    /// List a user's protected works.
    List {
        #[arg(long)]
        user: String,
    },
}

#[derive(Subcommand)]
enum ItemAction {
    /// Store scanned items from a JSON file (one object or an array).
    Add {
        path: PathBuf,
        /// Create and run a detection job for each stored item.
        #[arg(long, requires = "user")]
        detect: bool,
        /// Catalog owner to detect against.
        #[arg(long)]
        user: Option<String>,
        /// Similarity threshold for the jobs (defaults to config).
        #[arg(long)]
        threshold: Option<f64>,
    },
}

#[derive(Subcommand)]
enum DetectAction {
    /// Create a detection job for a scanned item.
    Submit {
        item: String,
        #[arg(long)]
        user: String,
        /// Modality to evaluate; repeat for several (defaults to config).
        #[arg(long = "modality", value_parser = parse_modality)]
        modalities: Vec<Modality>,
        #[arg(long)]
        threshold: Option<f64>,
        /// Run the job before returning.
        #[arg(long)]
        wait: bool,
    },
    /// Run one job by id.
    Run { job: String },
    /// Run every pending job through the worker pool.
    Drain {
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Subcommand)]
enum JobsAction {
    /// Print one job as JSON.
    Get { id: String },
    /// List jobs, newest first.
    List {
        #[arg(long)]
        user: Option<String>,
        #[arg(long, value_parser = parse_status)]
        status: Option<JobStatus>,
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum MatchesAction {
    /// List matches, highest score first.
    List {
        #[arg(long)]
        job: Option<String>,
        /// Owner of the protected content.
        #[arg(long)]
        user: Option<String>,
        /// Only matches awaiting review.
        #[arg(long, conflicts_with = "reviewed")]
        unreviewed: bool,
        /// Only reviewed matches.
        #[arg(long)]
        reviewed: bool,
    },
    /// Print one match as JSON.
    Get { id: String },
    /// Record a review decision on a match.
    Review {
        id: String,
        #[arg(long)]
        reviewer: String,
        /// Confirm the match as an infringement.
        #[arg(long, conflicts_with = "reject", required_unless_present = "reject")]
        confirm: bool,
        /// Reject the match as a false positive.
        #[arg(long)]
        reject: bool,
        #[arg(long)]
        notes: Option<String>,
        /// Follow-up action: none, reported, takedown, or ignored.
        #[arg(long, default_value = "none", value_parser = parse_action)]
        action: ActionTaken,
    },
}

fn parse_modality(s: &str) -> Result<Modality, String> {
    s.parse().map_err(|e: content_guard_core::DetectionError| e.to_string())
}

fn parse_status(s: &str) -> Result<JobStatus, String> {
    s.parse().map_err(|e: content_guard_core::DetectionError| e.to_string())
}

fn parse_action(s: &str) -> Result<ActionTaken, String> {
    s.parse().map_err(|e: content_guard_core::DetectionError| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Catalog { action } => match action {
            CatalogAction::Add {
                user,
                title,
                modality,
                content,
            } => {
                catalog_cmd::run_catalog_add(&cfg, &user, &title, modality, content.into()).await?;
            }
            CatalogAction::Update {
                id,
                title,
                modality,
                content,
                clear_text,
                clear_file,
                clear_url,
                active,
                monitoring,
            } => {
                let update = UpdateArgs {
                    title,
                    modality,
                    clear_text,
                    clear_file,
                    clear_url,
                    active,
                    monitoring,
                };
                catalog_cmd::run_catalog_update(&cfg, &id, content.into(), update).await?;
            }
            CatalogAction::Get { id } => {
                catalog_cmd::run_catalog_get(&cfg, &id).await?;
            }
            CatalogAction::List { user } => {
                catalog_cmd::run_catalog_list(&cfg, &user).await?;
            }
        },
        Commands::Item { action } => match action {
            ItemAction::Add {
                path,
                detect,
                user,
                threshold,
            } => {
                let detect_for = if detect { user } else { None };
                ingest::run_item_add(&cfg, &path, detect_for, threshold).await?;
            }
        },
        Commands::Detect { action } => match action {
            DetectAction::Submit {
                item,
                user,
                modalities,
                threshold,
                wait,
            } => {
                detect_cmd::run_submit(&cfg, &item, &user, modalities, threshold, wait).await?;
            }
            DetectAction::Run { job } => {
                detect_cmd::run_job(&cfg, &job).await?;
            }
            DetectAction::Drain { limit } => {
                detect_cmd::run_drain(&cfg, limit).await?;
            }
        },
        Commands::Jobs { action } => match action {
            JobsAction::Get { id } => {
                detect_cmd::run_jobs_get(&cfg, &id).await?;
            }
            JobsAction::List {
                user,
                status,
                limit,
            } => {
                detect_cmd::run_jobs_list(&cfg, user, status, limit).await?;
            }
        },
        Commands::Matches { action } => match action {
            MatchesAction::List {
                job,
                user,
                unreviewed,
                reviewed,
            } => {
                let reviewed = match (reviewed, unreviewed) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                };
                let filter = MatchFilter {
                    job_id: job,
                    user_id: user,
                    reviewed,
                };
                matches_cmd::run_matches_list(&cfg, filter).await?;
            }
            MatchesAction::Get { id } => {
                matches_cmd::run_matches_get(&cfg, &id).await?;
            }
            MatchesAction::Review {
                id,
                reviewer,
                confirm,
                reject: _,
                notes,
                action,
            } => {
                matches_cmd::run_matches_review(&cfg, &id, &reviewer, confirm, notes, action)
                    .await?;
            }
        },
        Commands::Judge {
            owner,
            candidate,
            platform,
            url,
        } => {
            let request = JudgeRequest {
                owner,
                candidate,
                platform,
                url,
            };
            detect_cmd::run_judge(&cfg, request).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
