//! Drive a simulated flaky remote service through a [`Governor`].
//!
//! Usage: `governance-demo [config.toml]`. Without a file the configuration
//! is read from `GOVERNANCE_*` environment variables, falling back to a
//! built-in profile. Set `RUST_LOG=debug` to watch every governance decision.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tower_governance::{config, ConfigBuilder, FetchError, GovernanceConfig, Governor};
use tracing_subscriber::EnvFilter;

/// Status codes the fake service answers with, in order, per key.
fn scripted_status(key: &str, call: usize) -> u16 {
    match key {
        "user:1" => 200,
        "user:2" => [503, 502, 200][call.min(2)],
        "user:3" => [429, 200][call.min(1)],
        "user:404" => 404,
        _ => 500,
    }
}

struct FakeService {
    calls: AtomicUsize,
    latency: Duration,
}

impl FakeService {
    async fn get(&self, key: &str, call: usize) -> Result<String, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if key == "slow" {
            sleep(self.latency * 10).await;
        } else {
            sleep(self.latency).await;
        }
        match scripted_status(key, call) {
            200 => Ok(format!("{{\"key\": \"{key}\"}}")),
            status => Err(FetchError::from_status(status)
                .unwrap_or_else(|| FetchError::transport(format!("unexpected status {status}")))),
        }
    }
}

fn load_config() -> Result<GovernanceConfig, Box<dyn std::error::Error>> {
    if let Some(path) = std::env::args().nth(1) {
        return Ok(config::from_file(path)?);
    }
    let from_env = config::from_env()?;
    if from_env != GovernanceConfig::default() {
        return Ok(from_env);
    }
    Ok(ConfigBuilder::new()
        .cache(Duration::from_secs(30))
        .rate_limit(3, Duration::from_secs(2))
        .throttle(Duration::from_millis(100))
        .timeout(Duration::from_secs(5))
        .retry(3, 2.0)
        .retry_base_delay(Duration::from_millis(250))
        .build()?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;
    tracing::info!(?config, "Starting governance demo");
    let governor: Governor<String, String> = Governor::from_config(&config)?;

    let service = Arc::new(FakeService {
        calls: AtomicUsize::new(0),
        latency: Duration::from_millis(200),
    });

    let keys = ["user:1", "user:2", "user:1", "user:3", "user:404", "user:500", "slow"];
    let start = Instant::now();
    for key in keys {
        let per_key_calls = AtomicUsize::new(0);
        let outcome = governor
            .fetch(key.to_string(), || {
                let service = service.clone();
                let call = per_key_calls.fetch_add(1, Ordering::SeqCst);
                async move { service.get(key, call).await }
            })
            .await;

        let elapsed = start.elapsed().as_secs_f64();
        match outcome {
            Ok(Some(body)) => println!("[{elapsed:>5.2}s] {key}: {body}"),
            Ok(None) => println!("[{elapsed:>5.2}s] {key}: no result"),
            Err(e) => println!("[{elapsed:>5.2}s] {key}: error: {e}"),
        }
    }

    println!(
        "Remote calls made: {} for {} requests",
        service.calls.load(Ordering::SeqCst),
        keys.len()
    );
    Ok(())
}
