//! Automation service
//!
//! The orchestration facade scheduled jobs call into. Every operation opens
//! a fresh isolated context from the pooled session for the account's proxy,
//! runs one workflow, and tears the context down again. Failures are
//! screenshotted (when a capture directory is configured) and
//! session-invalidating errors evict the pooled session so the next run
//! reconnects from scratch.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use super::cursor::ScrapeCursor;
use super::page::PageAutomation;
use super::pacing::{HumanPacing, Pacing};
use super::workflows::PageActions;
use crate::browser::{BrowserSession, BrowserSessionPool, ContextOptions, CookieRecord, SessionFactory};
use crate::error::ClassifiedError;
use crate::retry::RetryPolicy;

/// One automated account: the proxy identity its session is keyed by plus
/// the browser fingerprint applied to every context opened for it.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSession {
    pub proxy_config: String,
    pub user_agent: Option<String>,
    pub cookies: Vec<CookieRecord>,
}

impl AccountSession {
    pub fn new(proxy_config: impl Into<String>) -> Self {
        Self {
            proxy_config: proxy_config.into(),
            user_agent: None,
            cookies: Vec::new(),
        }
    }

    fn context_options(&self) -> ContextOptions {
        ContextOptions {
            user_agent: self.user_agent.clone(),
            cookies: self.cookies.clone(),
        }
    }
}

/// How a connections run walks the site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionStrategy {
    /// The paginated search surface, starting from (and resumable at) a page
    Paginated { start_page: u32 },
    /// The infinite-scroll listing with simulated human scrolling
    Scrolling,
}

/// Supplies isolated contexts keyed by proxy configuration. Implemented by
/// the session pool; split out so the service is testable with a scripted
/// context.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    type Context: PageAutomation;

    async fn new_context(
        &self,
        proxy_config: &str,
        options: &ContextOptions,
    ) -> Result<Self::Context, ClassifiedError>;

    /// Drop any cached session for `proxy_config` so the next context comes
    /// from a fresh connection.
    async fn invalidate(&self, proxy_config: &str);
}

#[async_trait]
impl<F> ContextProvider for BrowserSessionPool<F>
where
    F: SessionFactory<Session = BrowserSession>,
{
    type Context = crate::browser::PageContext;

    async fn new_context(
        &self,
        proxy_config: &str,
        options: &ContextOptions,
    ) -> Result<Self::Context, ClassifiedError> {
        BrowserSessionPool::new_context(self, proxy_config, options).await
    }

    async fn invalidate(&self, proxy_config: &str) {
        if let Err(e) = self.close(proxy_config).await {
            warn!("Error tearing down session {:?}: {}", proxy_config, e);
        }
    }
}

/// The workflow orchestrator.
pub struct AutomationService<P: ContextProvider> {
    provider: P,
    pacing: Arc<dyn Pacing>,
    retry: RetryPolicy,
    /// Run flows fully but skip the final send click
    dry_run: bool,
    /// Where failure screenshots land; disabled when unset
    capture_dir: Option<PathBuf>,
}

impl<P: ContextProvider> AutomationService<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            pacing: Arc::new(HumanPacing),
            retry: RetryPolicy::default(),
            dry_run: false,
            capture_dir: None,
        }
    }

    pub fn with_pacing(mut self, pacing: Arc<dyn Pacing>) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_capture_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.capture_dir = Some(dir.into());
        self
    }

    /// Send a connection invite from `account` to `profile_url`.
    pub async fn send_connection_invite(
        &self,
        account: &AccountSession,
        profile_url: &str,
        message: Option<&str>,
    ) -> Result<(), ClassifiedError> {
        let context = self.open(account).await?;

        let result = PageActions::send_connection_invite(
            &context,
            self.pacing.as_ref(),
            profile_url,
            message,
            self.dry_run,
        )
        .await;

        self.finish(account, &context, result.as_ref().err()).await;
        result
    }

    /// Enumerate `account`'s first-degree connections with the given
    /// strategy. In-run failures do not discard progress: the returned
    /// cursor carries the partial results and the classified error.
    pub async fn get_connections(
        &self,
        account: &AccountSession,
        strategy: CollectionStrategy,
    ) -> Result<ScrapeCursor, ClassifiedError> {
        let context = self.open(account).await?;

        let cursor = match strategy {
            CollectionStrategy::Paginated { start_page } => {
                PageActions::get_connections(
                    &context,
                    self.pacing.as_ref(),
                    &self.retry,
                    start_page,
                )
                .await
            }
            CollectionStrategy::Scrolling => {
                PageActions::get_connections_scrolling(&context, self.pacing.as_ref()).await
            }
        };

        self.finish(account, &context, cursor.error.as_ref()).await;
        Ok(cursor)
    }

    /// Send a direct message from `account` to an existing connection.
    pub async fn send_message_to_connection(
        &self,
        account: &AccountSession,
        profile_url: &str,
        message: &str,
    ) -> Result<(), ClassifiedError> {
        let context = self.open(account).await?;

        let result = PageActions::send_message(
            &context,
            self.pacing.as_ref(),
            profile_url,
            message,
            self.dry_run,
        )
        .await;

        self.finish(account, &context, result.as_ref().err()).await;
        result
    }

    /// Collect profile URLs from a company's people listing.
    pub async fn get_company_people(
        &self,
        account: &AccountSession,
        company_name: &str,
    ) -> Result<ScrapeCursor, ClassifiedError> {
        let context = self.open(account).await?;

        let cursor =
            PageActions::get_company_people(&context, self.pacing.as_ref(), company_name).await;

        self.finish(account, &context, cursor.error.as_ref()).await;
        Ok(cursor)
    }

    async fn open(&self, account: &AccountSession) -> Result<P::Context, ClassifiedError> {
        self.provider
            .new_context(&account.proxy_config, &account.context_options())
            .await
    }

    /// Post-workflow teardown: capture a failure screenshot, evict the
    /// pooled session when the error invalidates it, and close the context.
    async fn finish(
        &self,
        account: &AccountSession,
        context: &P::Context,
        error: Option<&ClassifiedError>,
    ) {
        if let Some(error) = error {
            self.capture_failure(context).await;

            if error.is_session_invalid() {
                warn!(
                    "Session for proxy {:?} invalidated: {}",
                    account.proxy_config, error
                );
                self.provider.invalidate(&account.proxy_config).await;
            }
        }

        if let Err(e) = context.close().await {
            warn!("Error closing context: {}", e);
        }
    }

    async fn capture_failure(&self, context: &P::Context) {
        let Some(ref dir) = self.capture_dir else {
            return;
        };

        let path = dir.join(format!("failure-{}.png", Uuid::new_v4()));
        match context.screenshot(&path).await {
            Ok(()) => info!("Failure screenshot saved to {}", path.display()),
            Err(e) => warn!("Could not capture failure screenshot: {}", e),
        }
    }
}

impl<F> AutomationService<BrowserSessionPool<F>>
where
    F: SessionFactory<Session = BrowserSession>,
{
    /// Tear down every pooled browser session.
    pub async fn shutdown(&self) {
        info!("Automation service shutting down");
        self.provider.close_all().await;
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use serde_json::Value;

    use super::*;
    use crate::automation::pacing::FixedPacing;
    use crate::browser::BrowserError;
    use crate::error::ErrorCode;

    /// A context whose navigation either succeeds or fails with a scripted
    /// error, recording closes and screenshots.
    #[derive(Default)]
    struct ScriptedContext {
        navigate_error: Option<String>,
        closes: Arc<AtomicU32>,
        screenshots: Arc<Mutex<Vec<PathBuf>>>,
    }

    #[async_trait]
    impl PageAutomation for ScriptedContext {
        async fn navigate(&self, _url: &str, _timeout: Duration) -> Result<(), BrowserError> {
            match self.navigate_error {
                Some(ref msg) => Err(BrowserError::NavigationFailed(msg.clone())),
                None => Ok(()),
            }
        }

        async fn wait_for(&self, _selector: &str, _timeout: Duration) -> Result<(), BrowserError> {
            Ok(())
        }

        async fn exists(&self, _selector: &str) -> Result<bool, BrowserError> {
            // Only the primary connect / message affordances "exist".
            Ok(true)
        }

        async fn click(&self, _selector: &str) -> Result<(), BrowserError> {
            Ok(())
        }

        async fn fill(&self, _selector: &str, _text: &str) -> Result<(), BrowserError> {
            Ok(())
        }

        async fn evaluate(&self, _script: &str) -> Result<Value, BrowserError> {
            Ok(Value::Null)
        }

        async fn scroll_by(&self, _delta_y: i64) -> Result<(), BrowserError> {
            Ok(())
        }

        async fn screenshot(&self, path: &Path) -> Result<(), BrowserError> {
            self.screenshots.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }

        async fn current_url(&self) -> Result<String, BrowserError> {
            Ok("about:blank".to_string())
        }

        async fn close(&self) -> Result<(), BrowserError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Provider handing out scripted contexts and recording invalidations.
    struct ScriptedProvider {
        navigate_error: Option<String>,
        closes: Arc<AtomicU32>,
        screenshots: Arc<Mutex<Vec<PathBuf>>>,
        invalidated: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn healthy() -> Self {
            Self::with_navigate_error(None)
        }

        fn with_navigate_error(error: Option<&str>) -> Self {
            Self {
                navigate_error: error.map(str::to_string),
                closes: Arc::new(AtomicU32::new(0)),
                screenshots: Arc::new(Mutex::new(Vec::new())),
                invalidated: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ContextProvider for ScriptedProvider {
        type Context = ScriptedContext;

        async fn new_context(
            &self,
            _proxy_config: &str,
            _options: &ContextOptions,
        ) -> Result<ScriptedContext, ClassifiedError> {
            Ok(ScriptedContext {
                navigate_error: self.navigate_error.clone(),
                closes: self.closes.clone(),
                screenshots: self.screenshots.clone(),
            })
        }

        async fn invalidate(&self, proxy_config: &str) {
            self.invalidated.lock().unwrap().push(proxy_config.to_string());
        }
    }

    fn service(provider: ScriptedProvider) -> AutomationService<ScriptedProvider> {
        AutomationService::new(provider)
            .with_pacing(Arc::new(FixedPacing::default()))
            .with_retry(RetryPolicy::new(1, Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn successful_invite_closes_the_context() {
        let svc = service(ScriptedProvider::healthy()).dry_run(true);

        svc.send_connection_invite(
            &AccountSession::new("proxy-a"),
            "https://l/in/ada",
            None,
        )
        .await
        .unwrap();

        assert_eq!(svc.provider.closes.load(Ordering::SeqCst), 1);
        assert!(svc.provider.invalidated.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_cookies_evict_the_pooled_session() {
        let svc = service(ScriptedProvider::with_navigate_error(Some(
            "net::ERR_TOO_MANY_REDIRECTS",
        )));

        let err = svc
            .send_connection_invite(&AccountSession::new("proxy-a"), "https://l/in/ada", None)
            .await
            .unwrap_err();

        assert!(err.is_session_invalid());
        assert_eq!(
            *svc.provider.invalidated.lock().unwrap(),
            vec!["proxy-a".to_string()]
        );
        // The broken context is still closed.
        assert_eq!(svc.provider.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ordinary_failures_do_not_invalidate_the_session() {
        let svc = service(ScriptedProvider::with_navigate_error(Some(
            "net::ERR_CONNECTION_RESET",
        )));

        let err = svc
            .send_message_to_connection(
                &AccountSession::new("proxy-a"),
                "https://l/in/ada",
                "hi",
            )
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::ExternalError);
        assert!(!err.is_session_invalid());
        assert!(svc.provider.invalidated.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failure_screenshot_lands_in_the_capture_dir() {
        let svc = service(ScriptedProvider::with_navigate_error(Some(
            "net::ERR_CONNECTION_RESET",
        )))
        .with_capture_dir("/tmp/captures");

        let _ = svc
            .send_connection_invite(&AccountSession::new("proxy-a"), "https://l/in/ada", None)
            .await;

        let shots = svc.provider.screenshots.lock().unwrap();
        assert_eq!(shots.len(), 1);
        assert!(shots[0].starts_with("/tmp/captures"));
        assert!(shots[0].to_string_lossy().ends_with(".png"));
    }

    #[tokio::test]
    async fn interrupted_collection_returns_partial_cursor_not_err() {
        let svc = service(ScriptedProvider::with_navigate_error(Some(
            "net::ERR_CONNECTION_RESET",
        )));

        let cursor = svc
            .get_connections(
                &AccountSession::new("proxy-a"),
                CollectionStrategy::Paginated { start_page: 1 },
            )
            .await
            .unwrap();

        assert!(cursor.is_empty());
        assert!(cursor.error.is_some());
        assert_eq!(svc.provider.closes.load(Ordering::SeqCst), 1);
    }
}
