//! Browser session pool
//!
//! Caches one live browser session per proxy configuration. Sessions are
//! expensive (remote handshake, rate-limited backend), so repeated workflow
//! calls for the same proxy identity reuse one connection; per-call isolation
//! comes from contexts, not new sessions.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use super::{BrowserError, BrowserSession, ContextOptions, PageContext};
use crate::config::BackendConfig;
use crate::error::{ClassifiedError, ErrorClassifier};

/// Establishes sessions. Split out so the pool's single-flight behavior is
/// testable with a counting fake.
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    type Session: Send + Sync + 'static;

    async fn connect(&self, proxy_config: &str) -> Result<Self::Session, BrowserError>;
}

/// Production factory: remote CDP connect (or local debug launch).
pub struct CdpSessionFactory {
    config: BackendConfig,
}

impl CdpSessionFactory {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionFactory for CdpSessionFactory {
    type Session = BrowserSession;

    async fn connect(&self, proxy_config: &str) -> Result<BrowserSession, BrowserError> {
        BrowserSession::connect(&self.config, proxy_config).await
    }
}

/// Pool of live browser sessions keyed by proxy configuration identity.
pub struct BrowserSessionPool<F: SessionFactory> {
    factory: F,
    /// Per-key init cell: concurrent callers for the same key await the same
    /// in-flight connect instead of starting their own.
    sessions: DashMap<String, Arc<OnceCell<Arc<F::Session>>>>,
}

impl<F: SessionFactory> BrowserSessionPool<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            sessions: DashMap::new(),
        }
    }

    /// Return the session for `proxy_config`, creating it if absent.
    ///
    /// Single-flight per key: the creation path itself is awaited by all
    /// concurrent callers. A failed connect leaves nothing cached, so the
    /// next caller retries from scratch.
    pub async fn get_instance(&self, proxy_config: &str) -> Result<Arc<F::Session>, ClassifiedError> {
        let cell = self
            .sessions
            .entry(proxy_config.to_string())
            .or_default()
            .clone();

        let session = cell
            .get_or_try_init(|| async {
                info!("Creating browser session for proxy {:?}", proxy_config);
                self.factory.connect(proxy_config).await.map(Arc::new)
            })
            .await
            .map_err(|e| {
                warn!("Session init failed for proxy {:?}: {}", proxy_config, e);
                ErrorClassifier::internal(format!(
                    "Session init failed for proxy {:?}: {}",
                    proxy_config, e
                ))
            })?;

        Ok(session.clone())
    }

    /// Number of cached (fully initialized) sessions.
    pub fn session_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    /// Drop the cached handle for `proxy_config`, returning the session (if
    /// any) so the caller can tear it down.
    pub fn evict(&self, proxy_config: &str) -> Option<Arc<F::Session>> {
        self.sessions
            .remove(proxy_config)
            .and_then(|(_, cell)| cell.get().cloned())
    }
}

impl<F> BrowserSessionPool<F>
where
    F: SessionFactory<Session = BrowserSession>,
{
    /// Open a fresh isolated context from the session for `proxy_config`.
    pub async fn new_context(
        &self,
        proxy_config: &str,
        options: &ContextOptions,
    ) -> Result<PageContext, ClassifiedError> {
        let session = self.get_instance(proxy_config).await?;
        session
            .new_context(options)
            .await
            .map_err(|e| ErrorClassifier::classify(&e))
    }

    /// Tear down the session for `proxy_config` and clear the cached handle.
    pub async fn close(&self, proxy_config: &str) -> Result<(), BrowserError> {
        if let Some(session) = self.evict(proxy_config) {
            session.close().await?;
        }
        Ok(())
    }

    /// Tear down every cached session.
    pub async fn close_all(&self) {
        let keys: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Err(e) = self.close(&key).await {
                warn!("Error closing session {:?}: {}", key, e);
            }
        }
        info!("All browser sessions closed");
    }
}

impl BrowserSessionPool<CdpSessionFactory> {
    /// Pool backed by the remote browser backend.
    pub fn from_config(config: BackendConfig) -> Self {
        Self::new(CdpSessionFactory::new(config))
    }
}
