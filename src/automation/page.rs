//! Page-automation capability
//!
//! The workflow layer drives pages through this trait instead of a concrete
//! DOM driver. The production implementation is
//! [`PageContext`](crate::browser::PageContext); tests substitute scripted
//! fakes to exercise workflow control flow without a browser.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::browser::BrowserError;

/// Default timeout for full page navigations
pub const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(60);
/// Default timeout for element waits
pub const ELEMENT_TIMEOUT: Duration = Duration::from_secs(10);

/// An isolated browsing context the automation workflows operate on.
///
/// One context per automation call: its cookie jar and user agent are set
/// when the context is opened and discarded when it is closed.
#[async_trait]
pub trait PageAutomation: Send + Sync {
    /// Navigate to `url`, waiting up to `timeout` for the load to settle.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), BrowserError>;

    /// Wait up to `timeout` for `selector` to appear in the DOM.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), BrowserError>;

    /// Whether `selector` currently matches at least one element.
    async fn exists(&self, selector: &str) -> Result<bool, BrowserError>;

    /// Click the first element matching `selector`.
    async fn click(&self, selector: &str) -> Result<(), BrowserError>;

    /// Click the first element matching `selector` and type `text` into it.
    async fn fill(&self, selector: &str, text: &str) -> Result<(), BrowserError>;

    /// Evaluate a script on the page, returning its JSON result
    /// (`Value::Null` when the script returns undefined).
    async fn evaluate(&self, script: &str) -> Result<Value, BrowserError>;

    /// Smooth-scroll the viewport by `delta_y` pixels (negative scrolls up).
    async fn scroll_by(&self, delta_y: i64) -> Result<(), BrowserError>;

    /// Capture a full-page screenshot to `path`.
    async fn screenshot(&self, path: &Path) -> Result<(), BrowserError>;

    /// Current page URL.
    async fn current_url(&self) -> Result<String, BrowserError>;

    /// Tear the context down, releasing its page.
    async fn close(&self) -> Result<(), BrowserError>;
}
