//! Completion Cache - command-line entry point
//!
//! Reads one chat-completion request as JSON from stdin and prints the
//! completion text, answering from the cache when possible.

use std::sync::Arc;

use anyhow::Context;
use tokio::io::AsyncReadExt;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use completion_cache::notify::notifier_for;
use completion_cache::{
    spawn_cleanup_task, ChatCompletionRequest, CompletionService, Config, FileStore, MemoryStore,
    OpenRouterClient, TimedCacheStore,
};

/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables, failing fast
/// 3. Read the request from stdin
/// 4. Open the configured store and start the expiry sweep
/// 5. Answer the request, or stop early on Ctrl+C
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "completion_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env().context("Invalid configuration")?;
    info!(
        "Configuration loaded: mode={:?}, base_url={}, cache_dir={:?}, cleanup_interval={}s",
        config.mode, config.base_url, config.cache_dir, config.cleanup_interval
    );

    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .context("Failed to read request from stdin")?;
    let request: ChatCompletionRequest =
        serde_json::from_str(&input).context("stdin must contain a chat completion request")?;

    match &config.cache_dir {
        Some(dir) => {
            let store = FileStore::open(dir)
                .await
                .with_context(|| format!("Failed to open cache directory {}", dir.display()))?;
            run(&config, Arc::new(store), &request).await
        }
        None => run(&config, Arc::new(MemoryStore::new()), &request).await,
    }
}

async fn run<S>(
    config: &Config,
    store: Arc<S>,
    request: &ChatCompletionRequest,
) -> anyhow::Result<()>
where
    S: TimedCacheStore + 'static,
{
    let cleanup_handle = spawn_cleanup_task(Arc::clone(&store), config.cleanup_interval);

    let service = CompletionService::from_config(
        config,
        store,
        OpenRouterClient::from_config(config),
        notifier_for(config),
    );

    let outcome = tokio::select! {
        result = service.chat(request) => Some(result),
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, stopping");
            None
        }
    };

    cleanup_handle.abort();

    match outcome {
        Some(result) => match result.context("Cache store failed")? {
            Some(text) => println!("{}", text),
            None => warn!("No completion available for this request"),
        },
        None => warn!("Interrupted before a completion was available"),
    }

    Ok(())
}
