//! wayfinder CLI
//!
//! Inspect configuration, compute cache keys and run the fallback chain
//! against simulated providers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::Value as JsonValue;

use wayfinder_core::{generate_key, CacheKeySource, Tier, TripQuery};
use wayfinder_runtime::{spawn_sweeper, FallbackChain, ProviderConfig, RuntimeConfig};

mod simulated;

#[derive(Parser)]
#[command(name = "wayfinder", about = "Resilient travel data acquisition", version)]
struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Clone)]
struct QueryArgs {
    /// Destination city
    #[arg(long)]
    destination: String,

    /// Origin city or airport
    #[arg(long, default_value = "")]
    origin: String,

    /// Budget in whole currency units
    #[arg(long, default_value_t = 0)]
    budget: u32,

    /// Interest tag; repeat for several
    #[arg(long = "interest")]
    interests: Vec<String>,

    /// Trip length in days
    #[arg(long, default_value_t = 1)]
    days: u32,
}

impl QueryArgs {
    fn to_query(&self) -> TripQuery {
        TripQuery::new(&self.destination, &self.origin)
            .budget(self.budget)
            .interests(self.interests.iter().cloned())
            .duration_days(self.days)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the canonical cache key for a query
    Key {
        #[command(flatten)]
        query: QueryArgs,

        /// Prefix the key with a namespace
        #[arg(long)]
        namespace: Option<String>,
    },

    /// Load and validate a configuration file
    CheckConfig {
        /// Path to YAML config
        file: PathBuf,
    },

    /// Run the fallback chain with simulated providers
    Simulate {
        #[command(flatten)]
        query: QueryArgs,

        /// Path to YAML config (defaults are used otherwise)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Cache namespace to resolve into
        #[arg(long, default_value = "destination-intelligence")]
        namespace: String,

        /// Make a live tier fail (1, 2 or 3); repeat for several
        #[arg(long = "fail-tier")]
        fail_tiers: Vec<u8>,

        /// Resolve once with all tiers healthy before the real run
        #[arg(long)]
        warm: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Key { query, namespace } => {
            let key = generate_key(
                &query.destination,
                &query.origin,
                query.budget,
                &query.interests,
                query.days,
                namespace.as_deref(),
            );
            println!("{}", key);
        }
        Commands::CheckConfig { file } => check_config(&file)?,
        Commands::Simulate {
            query,
            config,
            namespace,
            fail_tiers,
            warm,
        } => simulate(query.to_query(), config, &namespace, &fail_tiers, warm).await?,
    }

    Ok(())
}

fn check_config(file: &Path) -> anyhow::Result<()> {
    let config = RuntimeConfig::from_file(file)
        .with_context(|| format!("invalid config {}", file.display()))?;

    println!("✓ {} is valid", file.display());
    println!("Namespaces:");
    for ns in &config.namespaces {
        println!(
            "  {:<28} capacity {:>5}  ttl {}",
            ns.name,
            ns.capacity,
            humanize(ns.default_ttl)
        );
    }
    println!("Tiers:");
    for tier in Tier::LIVE {
        if let Some(settings) = config.tiers.get(tier) {
            println!(
                "  {}  ttl {:<8} timeout {:<8} confidence {:.2}",
                tier,
                humanize(settings.ttl),
                humanize(settings.timeout),
                config.confidence.ceiling(tier)
            );
        }
    }
    println!(
        "  tier 4  cache {:.2}  placeholder {:.2}",
        config.confidence.cache, config.confidence.placeholder
    );
    println!(
        "Retry: {} retries, {} base, x{}, capped at {}",
        config.retry.max_retries,
        humanize(config.retry.base_delay),
        config.retry.backoff_multiplier,
        humanize(config.retry.max_delay)
    );
    println!("Sweep every {}", humanize(config.cleanup_interval));
    if config.providers.is_empty() {
        println!("Providers: none");
    } else {
        println!("Providers:");
        for p in &config.providers {
            println!("  {:<20} {} credits", p.name, p.credits);
        }
    }
    Ok(())
}

// Same shorthand the config accepts.
fn humanize(d: Duration) -> String {
    humantime::format_duration(d).to_string()
}

async fn simulate(
    query: TripQuery,
    config_path: Option<PathBuf>,
    namespace: &str,
    fail_tiers: &[u8],
    warm: bool,
) -> anyhow::Result<()> {
    let mut config = match &config_path {
        Some(path) => RuntimeConfig::from_file(path)
            .with_context(|| format!("invalid config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    if config.providers.is_empty() {
        config.providers = vec![
            ProviderConfig::new("scraper-primary", 100),
            ProviderConfig::new("scraper-backup", 100),
        ];
    }

    let mut failing = Vec::new();
    for rank in fail_tiers {
        match Tier::from_rank(*rank) {
            Some(tier) if tier != Tier::Fallback => failing.push(tier),
            _ => bail!("--fail-tier must be 1, 2 or 3, got {}", rank),
        }
    }

    let cache = Arc::new(config.build_cache::<JsonValue>()?);
    let ledger = Arc::new(config.build_ledger()?);
    let sweeper = spawn_sweeper(Arc::clone(&cache), config.cleanup_interval);

    let build = |failing: &[Tier]| -> anyhow::Result<FallbackChain<JsonValue>> {
        Ok(FallbackChain::builder(Arc::clone(&cache), namespace)
            .config(&config)
            .primary(simulated::primary(failing.contains(&Tier::Primary)))
            .aggregated(simulated::aggregated(failing.contains(&Tier::Aggregated)))
            .scraped(simulated::scraped(
                Arc::clone(&ledger),
                failing.contains(&Tier::Scraped),
            )?)
            .build()?)
    };

    if warm {
        let warmed = build(&[])?.get_data(&query).await;
        tracing::info!(tier = warmed.tier.rank(), key = %query.cache_key(None), "cache warmed");
    }

    let result = build(&failing)?.get_data(&query).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    for (name, credit) in ledger.snapshot() {
        tracing::debug!(
            provider = %name,
            used = credit.used,
            remaining = credit.remaining,
            "credits"
        );
    }
    if let Some(stats) = cache.stats(namespace) {
        tracing::debug!(size = stats.size, hits = stats.hits, misses = stats.misses, "cache stats");
    }

    sweeper.shutdown().await;
    Ok(())
}
