mod ai;
mod check;
mod config;
mod db;
mod error;
mod matcher;
mod models;
mod notify;
mod resume;
mod scrape;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use check::{Collaborators, CycleOptions};
use config::Config;
use db::Database;
use matcher::JobMatcher;
use notify::{DiscordNotifier, LogNotifier, Notifier};
use scrape::{DirectScraper, FirecrawlScraper, Scraper};

#[derive(Parser)]
#[command(name = "careerwatch")]
#[command(about = "Watch career pages and get notified about jobs that fit your resume")]
struct Cli {
    /// Database path (overrides CAREERWATCH_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Manage job sources
    Source {
        #[command(subcommand)]
        command: SourceCommands,
    },

    /// List sources due for a check
    Due {
        /// Check interval, e.g. 15m, 6h, 7d (overrides CHECK_INTERVAL)
        #[arg(short, long)]
        interval: Option<String>,
    },

    /// Record a source as checked
    Mark {
        /// Source ID
        id: i64,

        /// Check time as RFC 3339 (defaults to now)
        #[arg(long)]
        at: Option<String>,
    },

    /// Run one check cycle over all due sources
    Check {
        /// Check interval, e.g. 15m, 6h, 7d (overrides CHECK_INTERVAL)
        #[arg(short, long)]
        interval: Option<String>,

        /// Resume URL or file path (overrides RESUME_URL)
        #[arg(short, long)]
        resume: Option<String>,

        /// Evaluate without notifying or recording checks
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum SourceCommands {
    /// Register a career page URL
    Add {
        /// Career page URL
        url: String,
    },

    /// List registered sources
    List,

    /// Remove a source
    Remove {
        /// Career page URL
        url: String,
    },
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "careerwatch=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let db_path = cli.db.clone().unwrap_or_else(|| config.db_path.clone());
    let db = Database::open(&db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;

    match cli.command {
        Commands::Init => {
            db.init()?;
            println!("Database initialized at {}", db.path().display());
        }

        Commands::Source { command } => {
            db.ensure_initialized()?;
            match command {
                SourceCommands::Add { url } => {
                    let existed = db.find_by_url(&url)?.is_some();
                    let source = db.register(&url)?;
                    if existed {
                        println!("Source #{} already registered: {}", source.id, source.url);
                    } else {
                        println!("Added source #{}: {}", source.id, source.url);
                    }
                }

                SourceCommands::List => {
                    print_sources(&db.list_sources()?, "No job sources registered.");
                }

                SourceCommands::Remove { url } => {
                    if db.remove(&url)? {
                        println!("Removed {}", url.trim());
                    } else {
                        println!("Source '{}' not found.", url.trim());
                    }
                }
            }
        }

        Commands::Due { interval } => {
            db.ensure_initialized()?;
            let interval = config.interval(interval.as_deref())?;
            let due = db.due_sources(Utc::now(), interval)?;
            print_sources(&due, "No sources are due.");
        }

        Commands::Mark { id, at } => {
            db.ensure_initialized()?;
            let checked_at = match at {
                Some(raw) => DateTime::parse_from_rfc3339(&raw)
                    .with_context(|| format!("Invalid timestamp '{}', expected RFC 3339", raw))?
                    .with_timezone(&Utc),
                None => Utc::now(),
            };
            db.mark_checked(id, checked_at)?;
            if let Some(source) = db.get_source(id)? {
                println!("Marked source #{} ({}) checked at {}", id, source.url, checked_at.to_rfc3339());
            }
        }

        Commands::Check { interval, resume: resume_flag, dry_run } => {
            db.ensure_initialized()?;
            let interval = config.interval(interval.as_deref())?;
            let resume_location = resume_flag
                .or_else(|| config.resume.clone())
                .ok_or_else(|| anyhow!("No resume configured. Pass --resume or set RESUME_URL."))?;

            let spec = ai::resolve_model(&config.match_model)?;
            let provider = ai::create_provider(&spec)?;

            let scraper: Box<dyn Scraper + '_> = match &config.firecrawl_api_key {
                Some(key) => Box::new(FirecrawlScraper::new(key.clone(), provider.as_ref())?),
                None => {
                    tracing::info!("FIRECRAWL_API_KEY not set, scraping pages directly");
                    Box::new(DirectScraper::new()?)
                }
            };
            let notifier: Box<dyn Notifier> = match &config.discord_webhook_url {
                Some(url) => Box::new(DiscordNotifier::new(url.clone())?),
                None => Box::new(LogNotifier),
            };
            let matcher = JobMatcher::new(provider.as_ref());

            let resume_text = resume::load_resume(&resume_location, scraper.as_ref())?;

            let collab = Collaborators {
                scraper: scraper.as_ref(),
                matcher: &matcher,
                notifier: notifier.as_ref(),
            };
            let opts = CycleOptions { now: Utc::now(), interval, dry_run };
            let report = check::run_cycle(&db, &collab, &resume_text, &opts)?;

            println!("Check cycle complete using {}:", provider.model_name());
            println!("  Sources due:      {}", report.sources_due);
            println!("  Sources checked:  {}", report.sources_checked);
            if report.sources_failed > 0 {
                println!("  Sources failed:   {}", report.sources_failed);
            }
            println!("  Postings seen:    {}", report.postings_seen);
            println!("  Matches:          {}", report.matches.len());
            if report.notify_failures > 0 {
                println!("  Notify failures:  {}", report.notify_failures);
            }

            for (posting, result) in &report.matches {
                let pct = result
                    .match_percentage
                    .map(|p| format!("{:>3}%", p))
                    .unwrap_or_else(|| "   -".to_string());
                println!("  {} {} at {} - {}", pct, posting.title, posting.company, posting.url);
            }

            if dry_run {
                println!("\n(Dry run - no notifications sent, no sources marked)");
            }
        }
    }

    Ok(())
}

fn print_sources(sources: &[models::JobSource], empty_message: &str) {
    if sources.is_empty() {
        println!("{}", empty_message);
        return;
    }
    println!("{:<6} {:<22} {}", "ID", "LAST CHECKED", "URL");
    println!("{}", "-".repeat(80));
    for source in sources {
        let checked = source
            .last_checked
            .map(|ts| ts.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!("{:<6} {:<22} {}", source.id, checked, truncate(&source.url, 50));
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
