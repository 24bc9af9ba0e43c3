//! Outreach automation engine
//!
//! Scheduled multi-step browser automation against a remote CDP backend:
//! cron-driven jobs with graceful drain, one pooled browser session per
//! proxy configuration, bounded-backoff retries, and workflows that return
//! partial results with a resume cursor instead of discarding progress.

pub mod automation;
pub mod browser;
pub mod config;
pub mod error;
pub mod retry;
pub mod scheduler;

pub use automation::{AccountSession, AutomationService, CollectionStrategy, ScrapeCursor};
pub use browser::BrowserSessionPool;
pub use config::BackendConfig;
pub use error::{ClassifiedError, ErrorClassifier, ErrorCode, Severity};
pub use retry::RetryPolicy;
pub use scheduler::{JobSpec, Scheduler};

/// Truncate a string for logging without panicking on multi-byte boundaries.
pub fn safe_truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Initialize logging: console output filtered by `RUST_LOG`, defaulting to
/// info level.
pub fn init_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .init();
}
