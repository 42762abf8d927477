mod audit;
mod classify;
mod db;
mod gazetteer;
mod ingest;
mod models;
mod normalize;
mod resolve;
mod rewrite;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use audit::FileAuditSink;
use db::Database;
use models::TaggedLocation;
use resolve::Outcome;

#[derive(Parser)]
#[command(name = "jobatlas")]
#[command(about = "Job posting aggregator with canonical location resolution")]
struct Cli {
    /// Database file (defaults to the user data directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Load the gazetteer from a worldcities-style CSV
    Seed {
        /// Path to the seed CSV
        csv: PathBuf,
    },

    /// Ingest a JSON batch of scraped postings
    Ingest {
        /// Path to the payload file
        file: PathBuf,

        /// Number of worker threads
        #[arg(short, long, default_value = "4")]
        workers: usize,

        /// Directory for the audit log files
        #[arg(long)]
        audit_dir: Option<PathBuf>,

        /// Show which postings would be added without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Resolve a single raw location string and print the outcome
    Resolve {
        /// Raw location text, e.g. "San Diego, CA, USA"
        location: String,

        /// Treat the location as remote
        #[arg(long)]
        remote: bool,

        /// Directory for the audit log files
        #[arg(long)]
        audit_dir: Option<PathBuf>,
    },

    /// List stored job postings
    Jobs {
        /// Filter by company name
        #[arg(short, long)]
        company: Option<String>,
    },

    /// Show one job posting with its locations
    Job {
        /// Job row id
        id: i64,
    },

    /// Search the gazetteer by city, country, or state prefix
    Locations {
        query: String,

        /// Maximum rows to print
        #[arg(short, long, default_value = "25")]
        limit: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let db = match &cli.db {
        Some(path) => Database::open_at(path)?,
        None => Database::open()?,
    };

    match cli.command {
        Commands::Init => {
            db.init()?;
            println!("Database initialized at {}", db.path().display());
        }

        Commands::Seed { csv } => {
            db.ensure_initialized()?;
            println!("Loading gazetteer from {}...", csv.display());
            let stats = db.seed_from_csv(&csv)?;
            println!(
                "Seeded {} locations ({} duplicates, {} bad rows), {} total",
                stats.inserted,
                stats.duplicates,
                stats.failed,
                db.location_count()?
            );
        }

        Commands::Ingest { file, workers, audit_dir, dry_run } => {
            db.ensure_initialized()?;
            let payloads = ingest::load_payload(&file)?;
            println!("Loaded {} postings from {}", payloads.len(), file.display());

            let audit = match &audit_dir {
                Some(dir) => {
                    std::fs::create_dir_all(dir)?;
                    FileAuditSink::in_dir(dir)
                }
                None => FileAuditSink::default(),
            };

            let stats = ingest::run(db.path(), &payloads, workers, &audit, dry_run)?;

            println!("\nResults:");
            println!("  Postings seen:    {}", stats.postings_seen);
            println!("  Postings added:   {}", stats.postings_added);
            println!("  Already present:  {}", stats.postings_skipped);
            println!("  Locations linked: {}", stats.locations_attached);
            println!("  Synthesized:      {}", stats.locations_synthesized);
            println!("  Unresolved:       {}", stats.locations_unresolved);
            if stats.errors > 0 {
                println!("  Errors:           {}", stats.errors);
            }
            if dry_run {
                println!("\n(Dry run - nothing was written)");
            }
        }

        Commands::Resolve { location, remote, audit_dir } => {
            db.ensure_initialized()?;
            let audit = match &audit_dir {
                Some(dir) => {
                    std::fs::create_dir_all(dir)?;
                    FileAuditSink::in_dir(dir)
                }
                None => FileAuditSink::default(),
            };
            let tagged = TaggedLocation { text: location, remote };
            match resolve::resolve_one(&db, &audit, &tagged)? {
                Outcome::Resolved { location, remote, synthesized } => {
                    println!(
                        "#{} {}, {}, {} ({}/{}){}{}",
                        location.id,
                        location.city,
                        location.state,
                        location.country,
                        location.country_code_iso2,
                        location.country_code_iso3,
                        if remote { " [remote]" } else { "" },
                        if synthesized { " [new]" } else { "" },
                    );
                }
                Outcome::Unresolved { raw } => {
                    println!("Unresolved: {raw}");
                }
            }
        }

        Commands::Jobs { company } => {
            db.ensure_initialized()?;
            let jobs = db.list_jobs(company.as_deref())?;
            if jobs.is_empty() {
                println!("No jobs found.");
            } else {
                println!(
                    "{:<6} {:<18} {:<14} {:<30} {:<24}",
                    "ID", "COMPANY", "JOB ID", "TITLE", "FALLBACK"
                );
                println!("{}", "-".repeat(94));
                for job in jobs {
                    println!(
                        "{:<6} {:<18} {:<14} {:<30} {:<24}",
                        job.id,
                        truncate(&job.company, 16),
                        truncate(&job.job_id, 12),
                        truncate(&job.title.unwrap_or_default(), 28),
                        truncate(&job.location_fallback.unwrap_or_default(), 22),
                    );
                }
            }
        }

        Commands::Job { id } => {
            db.ensure_initialized()?;
            match db.get_job(id)? {
                Some(job) => {
                    println!("Job #{}", job.id);
                    println!("Company: {}", job.company);
                    println!("Job ID: {}", job.job_id);
                    if let Some(title) = &job.title {
                        println!("Title: {title}");
                    }
                    if let Some(url) = &job.url {
                        println!("URL: {url}");
                    }
                    println!("Created: {}", job.created_at);

                    let locations = db.job_locations(job.id)?;
                    if !locations.is_empty() {
                        println!("\nLocations ({}):", locations.len());
                        for jl in locations {
                            println!(
                                "  #{} {}, {}, {}{}",
                                jl.location.id,
                                jl.location.city,
                                jl.location.state,
                                jl.location.country,
                                if jl.remote { " [remote]" } else { "" },
                            );
                        }
                    }
                    if let Some(fallback) = &job.location_fallback {
                        println!("Unresolved locations: {fallback}");
                    }
                }
                None => {
                    println!("Job #{id} not found.");
                }
            }
        }

        Commands::Locations { query, limit } => {
            db.ensure_initialized()?;
            let locations = db.search_locations(&query, limit)?;
            if locations.is_empty() {
                println!("No locations match '{query}'.");
            } else {
                println!(
                    "{:<8} {:<22} {:<22} {:<22} {:<5} {:<5}",
                    "ID", "CITY", "STATE", "COUNTRY", "ISO2", "ISO3"
                );
                println!("{}", "-".repeat(86));
                for loc in locations {
                    println!(
                        "{:<8} {:<22} {:<22} {:<22} {:<5} {:<5}",
                        loc.id,
                        truncate(&loc.city, 20),
                        truncate(&loc.state, 20),
                        truncate(&loc.country, 20),
                        loc.country_code_iso2,
                        loc.country_code_iso3,
                    );
                }
            }
        }
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}...", &s[..max.saturating_sub(3)])
    }
}
