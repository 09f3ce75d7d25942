use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use turnstile::config::{load_policy_file, ServerConfig};
use turnstile::http::HttpServer;
use turnstile::ratelimit::{build, spawn_sweeper};

/// Run a rate limit testing server based on the algorithm of your choice.
#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about)]
struct Cli {
    /// The address to listen on
    #[arg(long, global = true)]
    addr: Option<SocketAddr>,

    /// Server configuration file (YAML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Policy file (YAML mapping of policy keys)
    #[arg(long, global = true)]
    policy_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Token bucket rate limit algorithm
    TokenBucket {
        /// The maximum number of tokens in the bucket
        #[arg(long, default_value_t = 10)]
        capacity: u64,
        /// The number of tokens to add per second
        #[arg(long, alias = "refillRate", default_value_t = 1)]
        refill_rate: u64,
    },
    /// Fixed window rate limit algorithm
    FixedWindow(WindowArgs),
    /// Sliding window log rate limit algorithm
    SlidingWindowLog(WindowArgs),
    /// Sliding window counter rate limit algorithm
    SlidingWindowCounter(CounterArgs),
    /// Sliding window counter rate limit algorithm using Redis to store the data
    RedisSlidingWindowCounter {
        #[command(flatten)]
        counter: CounterArgs,
        /// The URL of the Redis server
        #[arg(long, alias = "redisURL", default_value = "redis://localhost:6379/0")]
        redis_url: String,
    },
}

#[derive(Debug, Args)]
struct WindowArgs {
    /// The maximum number of requests allowed in the time window
    #[arg(long, default_value_t = 60)]
    capacity: u64,
    /// The duration of the window in seconds
    #[arg(long, default_value_t = 60)]
    duration: u64,
}

#[derive(Debug, Args)]
struct CounterArgs {
    #[command(flatten)]
    window: WindowArgs,
    /// The weight of the current window in the estimate
    #[arg(long, default_value_t = 0.4)]
    weight: f64,
}

impl WindowArgs {
    fn policy(&self, algorithm: &str) -> HashMap<String, String> {
        HashMap::from([
            ("algorithm".to_string(), algorithm.to_string()),
            ("capacity".to_string(), self.capacity.to_string()),
            ("duration".to_string(), self.duration.to_string()),
        ])
    }
}

impl CounterArgs {
    fn policy(&self, algorithm: &str) -> HashMap<String, String> {
        let mut policy = self.window.policy(algorithm);
        policy.insert("weight".to_string(), self.weight.to_string());
        policy
    }
}

impl Command {
    fn policy(&self) -> HashMap<String, String> {
        match self {
            Command::TokenBucket {
                capacity,
                refill_rate,
            } => HashMap::from([
                ("algorithm".to_string(), "token-bucket".to_string()),
                ("capacity".to_string(), capacity.to_string()),
                ("refillRate".to_string(), refill_rate.to_string()),
            ]),
            Command::FixedWindow(args) => args.policy("fixed-window"),
            Command::SlidingWindowLog(args) => args.policy("sliding-window-log"),
            Command::SlidingWindowCounter(args) => args.policy("sliding-window-counter"),
            Command::RedisSlidingWindowCounter { counter, redis_url } => {
                let mut policy = counter.policy("redis-sliding-window-counter");
                policy.insert("storeURL".to_string(), redis_url.clone());
                policy
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ServerConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(addr) = cli.addr {
        config.addr = addr;
    }
    if let Some(path) = &cli.policy_file {
        config.policy = load_policy_file(path).context("Failed to load policy file")?;
    }
    if let Some(command) = &cli.command {
        config.policy = command.policy();
    }

    init_tracing(&config);

    info!("Starting Turnstile rate limiting server");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    if config.policy.is_empty() {
        anyhow::bail!("No policy configured: pass an algorithm subcommand, --policy-file, or a config file with a `policy` section");
    }

    let limiter = build(&config.policy).await.context("Failed to build rate limiter")?;
    info!(algorithm = %limiter.algorithm(), "Rate limiter initialized");

    let _sweeper = (config.sweep_interval_secs > 0)
        .then(|| spawn_sweeper(limiter.clone(), Duration::from_secs(config.sweep_interval_secs)));

    HttpServer::new(config.addr, limiter)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    info!("Turnstile rate limiting server stopped");
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured filter.
fn init_tracing(config: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_subcommand_defaults() {
        let cli = Cli::parse_from(["turnstile", "sliding-window-counter"]);
        let policy = cli.command.unwrap().policy();

        assert_eq!(policy["algorithm"], "sliding-window-counter");
        assert_eq!(policy["capacity"], "60");
        assert_eq!(policy["duration"], "60");
        assert_eq!(policy["weight"], "0.4");
    }

    #[test]
    fn test_redis_subcommand_carries_url() {
        let cli = Cli::parse_from([
            "turnstile",
            "redis-sliding-window-counter",
            "--redis-url",
            "redis://cache:6379/1",
            "--addr",
            "127.0.0.1:9000",
        ]);

        assert_eq!(cli.addr, Some("127.0.0.1:9000".parse().unwrap()));
        let policy = cli.command.unwrap().policy();
        assert_eq!(policy["storeURL"], "redis://cache:6379/1");
        assert_eq!(policy["algorithm"], "redis-sliding-window-counter");
    }

    #[test]
    fn test_token_bucket_defaults() {
        let cli = Cli::parse_from(["turnstile", "token-bucket"]);
        let policy = cli.command.unwrap().policy();

        assert_eq!(policy["capacity"], "10");
        assert_eq!(policy["refillRate"], "1");
    }
}
