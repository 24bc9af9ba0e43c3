//! Browser session management
//!
//! A session is one live connection to the remote browser backend, keyed by
//! proxy configuration. Contexts opened from a session give per-call
//! isolation (own cookies, own user agent) without re-paying the remote
//! handshake.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use super::BrowserError;
use crate::automation::page::PageAutomation;
use crate::config::BackendConfig;
use crate::safe_truncate;

/// Poll interval while waiting for a selector to appear
const ELEMENT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A cookie record applied to a new browsing context before navigation
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
    /// Seconds since the epoch
    pub expires: Option<f64>,
    pub http_only: Option<bool>,
    pub secure: Option<bool>,
}

impl CookieRecord {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
            expires: None,
            http_only: None,
            secure: None,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    fn to_param(&self) -> Result<CookieParam, BrowserError> {
        let mut builder = CookieParam::builder()
            .name(self.name.clone())
            .value(self.value.clone());

        if let Some(ref domain) = self.domain {
            builder = builder.domain(domain.clone());
        }
        if let Some(ref path) = self.path {
            builder = builder.path(path.clone());
        }
        if let Some(expires) = self.expires {
            builder = builder.expires(
                chromiumoxide::cdp::browser_protocol::network::TimeSinceEpoch::new(expires),
            );
        }
        if let Some(http_only) = self.http_only {
            builder = builder.http_only(http_only);
        }
        if let Some(secure) = self.secure {
            builder = builder.secure(secure);
        }

        builder
            .build()
            .map_err(|e| BrowserError::InvalidCookie(format!("{}: {}", self.name, e)))
    }
}

/// Options for a new isolated browsing context
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextOptions {
    pub user_agent: Option<String>,
    pub cookies: Vec<CookieRecord>,
}

/// A live browser connection for one proxy configuration
pub struct BrowserSession {
    /// The proxy configuration this session is keyed by (opaque string)
    pub proxy_config: String,
    /// The underlying connection. Taken out on close.
    browser: Arc<RwLock<Option<Browser>>>,
    /// Cleared by the CDP handler task when the connection drops
    alive: Arc<AtomicBool>,
    /// Contexts opened over the lifetime of this session
    context_count: AtomicU64,
}

impl BrowserSession {
    /// Connect to the remote browser backend (or launch a local Chromium in
    /// debug mode) for the given proxy configuration.
    pub async fn connect(config: &BackendConfig, proxy_config: &str) -> Result<Self, BrowserError> {
        let (browser, mut handler) = if config.debug_local {
            info!("Launching local debug browser (proxy: {:?})", proxy_config);
            Browser::launch(Self::local_config(proxy_config)?)
                .await
                .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?
        } else {
            let endpoint = Self::connect_url(config, proxy_config)?;
            info!(
                "Connecting to browser backend {} (token: {}...)",
                config.ws_url,
                safe_truncate(&config.api_key, 6)
            );
            Browser::connect(endpoint)
                .await
                .map_err(|e| BrowserError::ConnectFailed(e.to_string()))?
        };

        // The CDP handler must be polled for the connection to work. When it
        // ends, the browser has disconnected.
        let alive = Arc::new(AtomicBool::new(true));
        let alive_for_handler = alive.clone();
        let key = proxy_config.to_string();
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    debug!("Session {:?} CDP handler error: {:?}", key, event);
                }
            }
            warn!("Session {:?} browser disconnected (handler ended)", key);
            alive_for_handler.store(false, Ordering::Relaxed);
        });

        info!("Browser session established for proxy {:?}", proxy_config);

        Ok(Self {
            proxy_config: proxy_config.to_string(),
            browser: Arc::new(RwLock::new(Some(browser))),
            alive,
            context_count: AtomicU64::new(0),
        })
    }

    /// Assemble the websocket endpoint: API key as `token`, proxy forwarded
    /// verbatim to the backend.
    fn connect_url(config: &BackendConfig, proxy_config: &str) -> Result<String, BrowserError> {
        let mut endpoint = Url::parse(&config.ws_url)
            .map_err(|e| BrowserError::ConnectFailed(format!("{}: {}", config.ws_url, e)))?;

        endpoint
            .query_pairs_mut()
            .append_pair("token", &config.api_key);
        if !proxy_config.is_empty() {
            endpoint
                .query_pairs_mut()
                .append_pair("--proxy-server", proxy_config);
        }

        Ok(endpoint.into())
    }

    /// Headless local launch for debug mode.
    fn local_config(proxy_config: &str) -> Result<BrowserConfig, BrowserError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-notifications")
            .arg("--no-first-run");

        if !proxy_config.is_empty() {
            builder = builder.arg(format!("--proxy-server={}", proxy_config));
        }

        builder.build().map_err(BrowserError::LaunchFailed)
    }

    /// Whether the underlying connection is still up
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Contexts opened so far
    pub fn context_count(&self) -> u64 {
        self.context_count.load(Ordering::Relaxed)
    }

    /// Open a fresh isolated browsing context: a dedicated page with its own
    /// user agent and cookie set, applied before any navigation.
    pub async fn new_context(&self, options: &ContextOptions) -> Result<PageContext, BrowserError> {
        let browser = self.browser.read().await;
        let browser = browser
            .as_ref()
            .ok_or_else(|| BrowserError::ConnectionLost("Session is closed".into()))?;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::ConnectionLost(e.to_string()))?;

        if let Some(ref ua) = options.user_agent {
            page.set_user_agent(ua.as_str())
                .await
                .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;
        }

        if !options.cookies.is_empty() {
            let params: Result<Vec<CookieParam>, BrowserError> =
                options.cookies.iter().map(CookieRecord::to_param).collect();
            page.set_cookies(params?)
                .await
                .map_err(|e| BrowserError::ConnectionLost(e.to_string()))?;
        }

        let n = self.context_count.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            "Session {:?} opened context #{} ({} cookies)",
            self.proxy_config,
            n,
            options.cookies.len()
        );

        Ok(PageContext { page })
    }

    /// Tear down the underlying connection.
    pub async fn close(&self) -> Result<(), BrowserError> {
        let browser = {
            let mut guard = self.browser.write().await;
            guard.take()
        };

        if let Some(mut browser) = browser {
            browser
                .close()
                .await
                .map_err(|e| BrowserError::ConnectionLost(e.to_string()))?;
            let _ = browser.wait().await;
            self.alive.store(false, Ordering::Relaxed);
            info!("Browser session closed for proxy {:?}", self.proxy_config);
        }

        Ok(())
    }
}

/// One isolated page the automation workflows drive.
pub struct PageContext {
    page: Page,
}

#[async_trait]
impl PageAutomation for PageContext {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), BrowserError> {
        debug!("Navigating to: {}", url);

        tokio::time::timeout(timeout, async {
            self.page
                .goto(url)
                .await
                .map_err(|e| BrowserError::NavigationFailed(e.to_string()))?;
            self.page
                .wait_for_navigation()
                .await
                .map_err(|e| BrowserError::NavigationFailed(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|_| BrowserError::Timeout(format!("Navigation to {} timed out", url)))?
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), BrowserError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.page.find_element(selector).await.is_ok() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BrowserError::Timeout(format!(
                    "Element {} did not appear within {:?}",
                    selector, timeout
                )));
            }
            tokio::time::sleep(ELEMENT_POLL_INTERVAL).await;
        }
    }

    async fn exists(&self, selector: &str) -> Result<bool, BrowserError> {
        Ok(self.page.find_element(selector).await.is_ok())
    }

    async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| BrowserError::ElementNotFound(format!("{}: {}", selector, e)))?;

        element
            .click()
            .await
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;
        Ok(())
    }

    async fn fill(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| BrowserError::ElementNotFound(format!("{}: {}", selector, e)))?;

        element
            .click()
            .await
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;
        element
            .type_str(text)
            .await
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<Value, BrowserError> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;

        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn scroll_by(&self, delta_y: i64) -> Result<(), BrowserError> {
        let script = format!(
            "window.scrollBy({{ top: {}, behavior: 'smooth' }})",
            delta_y
        );
        self.evaluate(&script).await?;
        Ok(())
    }

    async fn screenshot(&self, path: &Path) -> Result<(), BrowserError> {
        self.page
            .save_screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .full_page(true)
                    .build(),
                path,
            )
            .await
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        self.page
            .url()
            .await
            .map_err(|e| BrowserError::ConnectionLost(e.to_string()))?
            .ok_or_else(|| BrowserError::ConnectionLost("No URL".into()))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.page
            .clone()
            .close()
            .await
            .map_err(|e| BrowserError::ConnectionLost(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_url_carries_token_and_proxy() {
        let config = BackendConfig::new("wss://chrome.example.io", "key-123");
        let url = BrowserSession::connect_url(&config, "socks5://10.0.0.1:1080").unwrap();

        assert!(url.starts_with("wss://chrome.example.io/?"));
        assert!(url.contains("token=key-123"));
        assert!(url.contains("--proxy-server=socks5%3A%2F%2F10.0.0.1%3A1080"));
    }

    #[test]
    fn connect_url_omits_proxy_when_empty() {
        let config = BackendConfig::new("wss://chrome.example.io", "key-123");
        let url = BrowserSession::connect_url(&config, "").unwrap();

        assert!(url.contains("token=key-123"));
        assert!(!url.contains("proxy-server"));
    }

    #[test]
    fn cookie_param_requires_name_and_value() {
        let record = CookieRecord::new("li_at", "secret").with_domain(".example.com");
        let param = record.to_param().unwrap();
        assert_eq!(param.name, "li_at");
        assert_eq!(param.value, "secret");
    }
}
