//! Resilience patterns demo.
//!
//! Runs each pattern against simulated services:
//!
//! ```text
//! resilience-demo circuit-breaker   order → flaky payment, with fallback
//! resilience-demo retry             product → stock, backoff between attempts
//! resilience-demo chain             booking → payment → notification
//! resilience-demo aggregate         dashboard = orders | stock, concurrently
//! resilience-demo rate-limit        gateway throttling a single user
//! resilience-demo combined          retry + circuit breaker + fallback
//! resilience-demo status            per-target status as JSON
//! ```

mod demo;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use resilience_engine::config::load_config;
use resilience_engine::observability::logging::init_logging;
use resilience_engine::observability::metrics::init_metrics;
use resilience_engine::ResilienceEngine;

use crate::demo::scenarios;

#[derive(Parser)]
#[command(name = "resilience-demo")]
#[command(about = "Resilience patterns against simulated services", long_about = None)]
struct Cli {
    /// TOML configuration file. Demo defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset (overrides the config file).
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trip and recover a circuit breaker
    CircuitBreaker {
        #[arg(long, default_value_t = 20)]
        calls: u32,
        #[arg(long, default_value_t = 0.7)]
        failure_rate: f64,
    },
    /// Retry a flaky call with exponential backoff
    Retry {
        #[arg(long, default_value_t = 0.6)]
        failure_rate: f64,
    },
    /// Chain dependent services
    Chain {
        #[arg(long, default_value_t = 0.0)]
        failure_rate: f64,
    },
    /// Fan out to several services and merge
    Aggregate {
        #[arg(long, default_value_t = 0.3)]
        failure_rate: f64,
    },
    /// Throttle requests per user at the gateway
    RateLimit {
        #[arg(long, default_value = "alice")]
        user: String,
        #[arg(long, default_value_t = 5)]
        requests: u32,
    },
    /// Retry and circuit breaker together
    Combined {
        #[arg(long, default_value_t = 10)]
        orders: u32,
        #[arg(long, default_value_t = 0.5)]
        failure_rate: f64,
    },
    /// Show target status as JSON
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => demo::demo_config(),
    };

    let level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.observability.log_level);
    init_logging(level);

    tracing::info!(
        config = ?cli.config,
        targets = config.targets.len(),
        "resilience-demo v0.1.0 starting"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let engine = ResilienceEngine::new(config.clone())?;

    match cli.command {
        Commands::CircuitBreaker {
            calls,
            failure_rate,
        } => scenarios::circuit_breaker(&engine, calls, failure_rate).await?,
        Commands::Retry { failure_rate } => scenarios::retry(&engine, failure_rate).await?,
        Commands::Chain { failure_rate } => scenarios::chain(&engine, failure_rate).await?,
        Commands::Aggregate { failure_rate } => scenarios::aggregate(&engine, failure_rate).await?,
        Commands::RateLimit { user, requests } => scenarios::rate_limit(&config, &user, requests)?,
        Commands::Combined {
            orders,
            failure_rate,
        } => scenarios::combined(&engine, orders, failure_rate).await?,
        Commands::Status => scenarios::status(&engine).await?,
    }

    Ok(())
}
