use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use commander::ai::{create_provider, resolve_model};
use commander::commander::Commander;
use commander::config::Config;
use commander::credentials::Credential;
use commander::db::Database;
use commander::models::{Opportunity, OpportunityDraft, OpportunityStatus, Source};
use commander::orchestrator::Orchestrator;
use commander::progress::{LoggingListener, forward_events};
use commander::scoring::Scorer;

#[derive(Parser)]
#[command(name = "commander")]
#[command(about = "Application commander - score, queue, and generate job applications")]
struct Cli {
    /// Path to config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the database (overrides config and COMMANDER_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Add a single opportunity by hand
    Add {
        /// Job title
        title: String,

        /// Company name
        company: String,

        /// Where it was found (linkedin, indeed, company, aggregator, ...)
        #[arg(short, long, default_value = "company")]
        source: String,

        /// Posting text
        #[arg(short, long, default_value = "")]
        description: String,

        #[arg(short, long)]
        location: Option<String>,

        #[arg(long)]
        salary: Option<String>,

        #[arg(short, long)]
        url: Option<String>,
    },

    /// Import scraped opportunities from a JSON array
    Import {
        /// JSON file with opportunity records
        file: PathBuf,

        /// Score with the configured model instead of keyword heuristics
        #[arg(long)]
        ai: bool,
    },

    /// List opportunities
    List {
        /// Filter by status (discovered, queued, generated, submitted, rejected)
        #[arg(short, long)]
        status: Option<String>,

        #[arg(short, long, default_value = "25")]
        limit: usize,
    },

    /// Show opportunity details and its score breakdown
    Show {
        /// Opportunity ID
        id: String,
    },

    /// Show the best scored opportunities not yet queued
    Rank {
        /// Number of opportunities to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Queue today's top opportunities for generation
    Queue,

    /// Generate application packages for queued opportunities
    Generate {
        /// Skip credential discovery and render templates locally
        #[arg(long)]
        template: bool,
    },

    /// Move an opportunity forward (queued, generated, submitted, rejected)
    Status {
        id: String,
        status: String,
    },

    /// Return an opportunity to discovered
    Reset {
        id: String,
    },

    /// List generated applications
    Applications,

    /// Show a generated application package
    Package {
        /// Opportunity ID
        id: String,
    },

    /// Summarize generated applications
    Analytics,

    /// Applications due for follow-up
    FollowUps,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.database_path = Some(db);
    }
    let db = match &config.database_path {
        Some(path) => Database::open(path)?,
        None => Database::open_default()?,
    };

    match cli.command {
        Commands::Init => {
            db.init()?;
            println!("Database initialized at {}", db.path().display());
        }

        Commands::Add {
            title,
            company,
            source,
            description,
            location,
            salary,
            url,
        } => {
            db.ensure_initialized()?;
            let draft = OpportunityDraft {
                title,
                company,
                location: location.unwrap_or_default(),
                description,
                requirements: Vec::new(),
                technologies: Vec::new(),
                salary_range: salary,
                url,
                source: Source::from(source),
                discovered_at: None,
            };
            let commander = Commander::new(db, &config);
            let report = commander.intake(vec![Opportunity::from_draft(draft)]);
            match report.ranked.first() {
                Some((opp, result)) if report.saved == 1 => println!(
                    "Added {} ({} at {}) - score {:.1}, {}",
                    opp.id, opp.title, opp.company, result.overall_score, result.recommendation
                ),
                _ => return Err(anyhow!("Failed to save opportunity")),
            }
        }

        Commands::Import { file, ai } => {
            db.ensure_initialized()?;
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let drafts: Vec<OpportunityDraft> = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse {}", file.display()))?;
            let opportunities: Vec<Opportunity> =
                drafts.into_iter().map(Opportunity::from_draft).collect();

            let mut scorer = Scorer::from_config(&config);
            if ai {
                let credential = discover_credential(&config)
                    .ok_or_else(|| anyhow!("--ai needs an API key for model '{}'", config.model))?;
                let spec = resolve_model(&config.model)?;
                let timeout = Duration::from_secs(config.generation.request_timeout_secs);
                scorer = scorer.with_provider(create_provider(&spec, &credential, timeout)?);
            }

            let commander = Commander::new(db, &config).with_scorer(scorer);
            let report = commander.intake(opportunities);
            println!(
                "Received {}, dropped {} duplicates, saved {}, failed {}",
                report.received, report.duplicates, report.saved, report.failed
            );
            if !report.ranked.is_empty() {
                println!();
                println!(
                    "{:<5} {:<17} {:<28} {:<20} {:>6} {:<9}",
                    "RANK", "ID", "TITLE", "COMPANY", "SCORE", "VERDICT"
                );
                println!("{}", "-".repeat(90));
                for (i, (opp, result)) in report.ranked.iter().enumerate() {
                    println!(
                        "{:<5} {:<17} {:<28} {:<20} {:>6.1} {:<9}",
                        i + 1,
                        opp.id,
                        truncate(&opp.title, 26),
                        truncate(&opp.company, 18),
                        result.overall_score,
                        result.recommendation.to_string()
                    );
                }
            }
        }

        Commands::List { status, limit } => {
            db.ensure_initialized()?;
            let opportunities = match status {
                Some(s) => {
                    let status: OpportunityStatus = s.parse().map_err(|e: String| anyhow!(e))?;
                    db.query_by_status(status, limit)?
                }
                None => db.list_opportunities(limit)?,
            };
            if opportunities.is_empty() {
                println!("No opportunities found.");
            } else {
                print_opportunities(&opportunities);
            }
        }

        Commands::Show { id } => {
            db.ensure_initialized()?;
            match db.get_opportunity(&id)? {
                Some(opp) => {
                    println!("Opportunity {}", opp.id);
                    println!("Title: {}", opp.title);
                    println!("Company: {}", opp.company);
                    if !opp.location.is_empty() {
                        println!("Location: {}", opp.location);
                    }
                    println!("Source: {}", opp.source);
                    println!("Status: {}", opp.status);
                    if let Some(salary) = &opp.salary_range {
                        println!("Salary: {}", salary);
                    }
                    if let Some(url) = &opp.url {
                        println!("URL: {}", url);
                    }
                    println!("Discovered: {}", opp.discovered_at);
                    if let Some(score) = db.get_score(&opp.id)? {
                        println!("\n--- Score ({:?}) ---", score.method);
                        println!(
                            "Overall: {:.1} ({}), confidence {:.2}",
                            score.overall_score, score.recommendation, score.confidence
                        );
                        println!("  Technical:    {:.1}", score.technical_score);
                        println!("  Transition:   {:.1}", score.transition_score);
                        println!("  Culture:      {:.1}", score.culture_score);
                        println!("  Growth:       {:.1}", score.growth_score);
                        println!("  Compensation: {:.1}", score.compensation_score);
                        if !score.keywords_matched.is_empty() {
                            println!("Keywords: {}", score.keywords_matched.join(", "));
                        }
                        if !score.red_flags.is_empty() {
                            println!("Red flags: {}", score.red_flags.join(", "));
                        }
                        println!("{}", score.reasoning);
                    }
                    if !opp.description.is_empty() {
                        println!("\n--- Description ---\n{}", opp.description);
                    }
                }
                None => {
                    println!("Opportunity {} not found.", id);
                }
            }
        }

        Commands::Rank { limit } => {
            db.ensure_initialized()?;
            let opportunities = db.get_top_opportunities(limit)?;
            if opportunities.is_empty() {
                println!("No scored opportunities to rank.");
            } else {
                print_opportunities(&opportunities);
            }
        }

        Commands::Queue => {
            db.ensure_initialized()?;
            let commander = Commander::new(db, &config);
            let queued = commander.queue_top()?;
            if queued.is_empty() {
                println!(
                    "Nothing to queue (minimum score {:.1}).",
                    config.commander.min_queue_score
                );
            } else {
                println!("Queued {} opportunities:", queued.len());
                for opp in queued {
                    println!(
                        "  {} - {} at {} ({:.1})",
                        opp.id, opp.title, opp.company, opp.relevance_score
                    );
                }
            }
        }

        Commands::Generate { template } => {
            db.ensure_initialized()?;
            let credential = if template {
                None
            } else {
                discover_credential(&config)
            };

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("Failed to start async runtime")?;

            let report = runtime.block_on(async {
                let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
                let orchestrator = Orchestrator::new(&config).with_progress(tx);
                let commander = Commander::new(db, &config).with_orchestrator(orchestrator);

                // Dropping the commander closes the progress channel.
                let generation = async move {
                    let report = commander.generate_queued(credential.as_ref()).await;
                    drop(commander);
                    report
                };
                let mut listener = LoggingListener;
                let (report, ()) = tokio::join!(generation, forward_events(rx, &mut listener));
                report
            })?;

            if report.attempted == 0 {
                println!("No queued opportunities. Run 'commander queue' first.");
            } else {
                println!(
                    "Generated {} of {} packages",
                    report.records.len(),
                    report.attempted
                );
                for record in &report.records {
                    println!(
                        "  {} - {} at {} [{}] sophistication {:.1}, follow up {}",
                        record.opportunity_id,
                        record.job_title,
                        record.company,
                        record.mode,
                        record.sophistication_score,
                        record.follow_up_at.format("%Y-%m-%d")
                    );
                }
            }
        }

        Commands::Status { id, status } => {
            db.ensure_initialized()?;
            let status: OpportunityStatus = status.parse().map_err(|e: String| anyhow!(e))?;
            db.update_status(&id, status)?;
            println!("Marked {} as {}.", id, status);
        }

        Commands::Reset { id } => {
            db.ensure_initialized()?;
            db.reset_status(&id)?;
            println!("Reset {} to discovered.", id);
        }

        Commands::Applications => {
            db.ensure_initialized()?;
            let applications = db.list_applications()?;
            if applications.is_empty() {
                println!("No applications generated yet.");
            } else {
                println!(
                    "{:<17} {:<26} {:<18} {:<12} {:>6} {:<10}",
                    "ID", "TITLE", "COMPANY", "MODE", "SOPH", "FOLLOW UP"
                );
                println!("{}", "-".repeat(94));
                for app in applications {
                    println!(
                        "{:<17} {:<26} {:<18} {:<12} {:>6.1} {:<10}",
                        app.opportunity_id,
                        truncate(&app.job_title, 24),
                        truncate(&app.company, 16),
                        app.mode.as_str(),
                        app.sophistication_score,
                        app.follow_up_at.format("%Y-%m-%d")
                    );
                }
            }
        }

        Commands::Package { id } => {
            db.ensure_initialized()?;
            let application = db
                .list_applications()?
                .into_iter()
                .find(|app| app.opportunity_id == id);
            match application {
                Some(app) => {
                    let package = &app.package;
                    println!("{} at {} ({})", package.job_title, package.company, package.mode);
                    println!(
                        "Sophistication {:.1}, personalization {:.1}, efficiency {:.2}, {} API calls",
                        package.metrics.sophistication_score,
                        package.metrics.personalization_depth,
                        package.metrics.parallel_efficiency,
                        package.metrics.api_calls
                    );
                    for section in &package.sections {
                        println!("\n=== {} ===\n{}", section.kind, section.content);
                    }
                }
                None => {
                    println!("No application package for {}.", id);
                }
            }
        }

        Commands::Analytics => {
            db.ensure_initialized()?;
            let counts = db.count_by_status()?;
            let pipeline: Vec<String> = counts
                .iter()
                .map(|(status, n)| format!("{} {}", n, status))
                .collect();
            println!("Pipeline: {}", pipeline.join(", "));

            let commander = Commander::new(db, &config);
            let analytics = commander.analytics()?;
            if analytics.total == 0 {
                println!("No applications generated yet.");
            } else {
                println!("Total applications: {}", analytics.total);
                println!("Average sophistication: {:.1}", analytics.avg_sophistication);
                println!(
                    "Quality: {} high, {} medium, {} low",
                    analytics.high, analytics.medium, analytics.low
                );
                println!("\nBy company:");
                for (company, count) in &analytics.by_company {
                    println!("  {:<30} {}", truncate(company, 28), count);
                }
                println!("\nMost recent:");
                for app in &analytics.recent {
                    println!(
                        "  {} - {} at {} ({:.1})",
                        app.generated_at.format("%Y-%m-%d"),
                        app.job_title,
                        app.company,
                        app.sophistication_score
                    );
                }
            }
        }

        Commands::FollowUps => {
            db.ensure_initialized()?;
            let due = db.due_follow_ups(chrono::Utc::now())?;
            if due.is_empty() {
                println!("No follow-ups due.");
            } else {
                for app in due {
                    println!(
                        "  {} - {} at {} (due {})",
                        app.opportunity_id,
                        app.job_title,
                        app.company,
                        app.follow_up_at.format("%Y-%m-%d")
                    );
                }
            }
        }
    }

    Ok(())
}

/// Key for the configured model's provider, if one can be found.
fn discover_credential(config: &Config) -> Option<Credential> {
    let spec = match resolve_model(&config.model) {
        Ok(spec) => spec,
        Err(e) => {
            warn!(error = %e, "Unknown model, generating from templates");
            return None;
        }
    };
    match Credential::discover(spec.provider) {
        Ok(credential) => Some(credential),
        Err(e) => {
            info!("{}; generating from templates", e);
            None
        }
    }
}

fn print_opportunities(opportunities: &[Opportunity]) {
    println!(
        "{:<17} {:<11} {:<28} {:<20} {:<10} {:>6}",
        "ID", "STATUS", "TITLE", "COMPANY", "SOURCE", "SCORE"
    );
    println!("{}", "-".repeat(97));
    for opp in opportunities {
        println!(
            "{:<17} {:<11} {:<28} {:<20} {:<10} {:>6.1}",
            opp.id,
            opp.status.as_str(),
            truncate(&opp.title, 26),
            truncate(&opp.company, 18),
            truncate(opp.source.as_str(), 10),
            opp.relevance_score
        );
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
