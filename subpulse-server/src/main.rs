use std::sync::Arc;

use clap::Parser;
use subpulse_core::keywords::KeywordTable;
use subpulse_core::models::AssignmentKind;
use subpulse_core::store::{MemoryStore, PgStore, Store};
use subpulse_core::taxonomy::TaxonomyDefinition;
use subpulse_core::SubpulseConfig;
use subpulse_ingest::reddit::{RedditFeedClient, RedditFeedConfig};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use subpulse_server::http::{self, HttpState};
use subpulse_server::subsystems::backfill::run_backfill;
use subpulse_server::subsystems::classify::{Orchestrator, Pacer};
use subpulse_server::subsystems::ingest::IngestSettings;
use subpulse_server::subsystems::schedule::run_schedule_loop;
use subpulse_server::subsystems::scraper::ScrapeRunner;
use subpulse_server::subsystems::summarize::run_summaries;
use subpulse_server::subsystems::taxonomy::apply_taxonomy;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "subpulse.toml")]
    config: String,

    /// Check database connectivity and exit
    #[arg(long)]
    health: bool,

    /// Replace the active taxonomy from the configured definition file and exit
    #[arg(long)]
    apply_taxonomy: bool,

    /// Classify stored posts without assignments ("category" or "product-area") and exit
    #[arg(long, value_name = "KIND")]
    backfill: Option<AssignmentKind>,

    /// Generate summaries for posts that have none and exit
    #[arg(long)]
    summaries: bool,

    /// Maximum posts examined by --backfill and --summaries
    #[arg(long, default_value_t = 100)]
    limit: i64,

    /// Run one scrape, print the report and exit
    #[arg(long)]
    scrape_once: bool,

    /// Use an in-memory store seeded with the taxonomy instead of PostgreSQL
    #[arg(long)]
    dry_run: bool,
}

fn exit_with(msg: impl std::fmt::Display) -> ! {
    eprintln!("{}", msg);
    std::process::exit(1);
}

fn print_report<T: serde::Serialize>(report: &T) {
    match serde_json::to_string_pretty(report) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("Failed to render report: {}", e),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience, production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Init logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // Load config
    let config = match SubpulseConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => exit_with(format!("Failed to load config from {}: {}", args.config, e)),
    };

    // Load taxonomy definition (keywords for fallback scoring)
    let definition = match TaxonomyDefinition::load(&config.taxonomy.path) {
        Ok(d) => Some(d),
        Err(e) if args.apply_taxonomy || args.dry_run => exit_with(format!(
            "Failed to load taxonomy from {}: {}",
            config.taxonomy.path, e
        )),
        Err(e) => {
            tracing::warn!(
                path = %config.taxonomy.path,
                error = %e,
                "Taxonomy definition unavailable, keyword scoring disabled"
            );
            None
        }
    };

    // Store
    let store: Arc<dyn Store> = if args.dry_run {
        let memory = Arc::new(MemoryStore::new());
        if let Some(definition) = &definition {
            if let Err(e) = apply_taxonomy(memory.as_ref(), definition).await {
                exit_with(format!("Failed to seed in-memory taxonomy: {}", e));
            }
        }
        tracing::info!("Dry run: using in-memory store");
        memory as Arc<dyn Store>
    } else {
        let pool = match subpulse_core::db::create_pool(&config.database).await {
            Ok(p) => p,
            Err(e) => exit_with(format!("Failed to connect to database: {}", e)),
        };

        if args.health {
            match subpulse_core::db::server_version(&pool).await {
                Ok(v) => println!("✅ PostgreSQL connected: {}", v),
                Err(e) => {
                    println!("❌ PostgreSQL connection failed: {}", e);
                    std::process::exit(1);
                }
            }
            match subpulse_core::db::missing_schema_tables(&pool).await {
                Ok(missing) if missing.is_empty() => println!("✅ Schema tables present"),
                Ok(missing) => {
                    println!("❌ Missing tables: {} (apply migrations/0001_init.sql)", missing.join(", "));
                    std::process::exit(1);
                }
                Err(e) => {
                    println!("❌ Schema check failed: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Arc::new(PgStore::new(pool))
    };

    if args.health {
        match store.active_categories().await {
            Ok(c) if c.is_empty() => println!("⚠️  No active categories, run --apply-taxonomy"),
            Ok(c) => println!("✅ Active categories: {}", c.len()),
            Err(e) => {
                println!("❌ Category lookup failed: {}", e);
                std::process::exit(1);
            }
        }
        println!("✅ Subpulse health check passed");
        return Ok(());
    }

    if args.apply_taxonomy {
        let Some(definition) = &definition else {
            exit_with("No taxonomy definition loaded")
        };
        match apply_taxonomy(store.as_ref(), definition).await {
            Ok(applied) => print_report(&applied),
            Err(e) => exit_with(format!("Failed to apply taxonomy: {}", e)),
        }
        return Ok(());
    }

    let keywords = Arc::new(
        definition
            .as_ref()
            .map(TaxonomyDefinition::keyword_table)
            .unwrap_or_else(KeywordTable::default),
    );
    let orchestrator = Arc::new(Orchestrator::from_config(&config, keywords));

    if let Some(kind) = args.backfill {
        let report = run_backfill(store.as_ref(), &orchestrator, kind, args.limit).await?;
        print_report(&report);
        return Ok(());
    }

    if args.summaries {
        let Some(llm) = orchestrator.llm() else {
            exit_with("Summaries need a completion provider (set GROQ_API_KEY or GEMINI_API_KEY and classifier.enabled)")
        };
        let mut pacer = Pacer::from_config(&config.classifier);
        let report = run_summaries(store.as_ref(), llm, &mut pacer, args.limit).await?;
        print_report(&report);
        return Ok(());
    }

    // Feed source
    let feed = match RedditFeedClient::new(RedditFeedConfig {
        base_url: config.feed.base_url.clone(),
        subreddit: config.feed.subreddit.clone(),
        user_agent: config.feed.user_agent.clone(),
        timeout_seconds: config.feed.timeout_seconds,
    }) {
        Ok(f) => f,
        Err(e) => exit_with(format!("Failed to build feed client: {}", e)),
    };

    let settings = IngestSettings::from_config(
        &config.ingest,
        &config.feed,
        config.classifier.classify_product_areas,
    );
    let runner = Arc::new(ScrapeRunner::new(
        Arc::new(feed),
        Arc::clone(&store),
        Arc::clone(&orchestrator),
        settings,
    ));

    if args.scrape_once {
        match runner.run_once("cli").await {
            Some(Ok(report)) => print_report(&report),
            Some(Err(e)) => exit_with(format!("Scrape failed: {:#}", e)),
            None => exit_with("A scrape is already running"),
        }
        return Ok(());
    }

    // Shutdown broadcast
    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!("Failed to listen for Ctrl+C: {}", e),
        }
        let _ = shutdown_tx.send(());
    });

    // Weekly scrape schedule
    let schedule_handle = if config.schedule.enabled {
        let schedule_runner = Arc::clone(&runner);
        let schedule_shutdown = tx.subscribe();
        Some(tokio::spawn(run_schedule_loop(schedule_runner, schedule_shutdown)))
    } else {
        tracing::info!("Weekly schedule disabled via config");
        None
    };

    // HTTP read API
    if config.http.enabled {
        let state = Arc::new(HttpState {
            store,
            runner,
            schedule_enabled: config.schedule.enabled,
        });
        http::start_http_server(state, &config.http, tx.subscribe()).await?;
    } else if let Some(handle) = schedule_handle {
        tracing::info!("HTTP API disabled, running scheduler only");
        handle.await?;
    } else {
        tracing::warn!("Neither HTTP API nor schedule enabled, nothing to run");
    }

    Ok(())
}
