//! Completion Cache - read-through caching and retries for a chat-completion API
//!
//! Identical requests are fingerprinted to one cache entry, entries expire
//! by time, and overloaded upstream responses are retried with exponential
//! backoff.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod models;
pub mod notify;
pub mod service;
pub mod tasks;

pub use cache::{Expiry, FileStore, MemoryStore, ReadThroughCache, TimedCacheStore};
pub use client::{CompletionClient, OpenRouterClient};
pub use config::{Config, DeploymentMode};
pub use fingerprint::fingerprint;
pub use models::{ChatCompletionRequest, ChatMessage};
pub use service::{CompletionService, RetryPolicy};
pub use tasks::spawn_cleanup_task;
