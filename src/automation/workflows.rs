//! Automation workflows
//!
//! Multi-step, failure-prone flows against the target site: connection
//! invites, connections enumeration (two strategies with different detection
//! profiles), direct messaging, and company people collection. Every raw
//! failure is normalized through the classifier before it leaves this
//! module; collection flows return partial results with a resume cursor
//! instead of discarding progress.

use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::cursor::ScrapeCursor;
use super::page::{PageAutomation, ELEMENT_TIMEOUT, NAVIGATION_TIMEOUT};
use super::pacing::Pacing;
use crate::browser::BrowserError;
use crate::error::{ClassifiedError, ErrorClassifier};
use crate::retry::RetryPolicy;

/// First-degree connections search, paginated surface
const PEOPLE_SEARCH_URL: &str =
    "https://www.linkedin.com/search/results/people/?network=%5B%22F%22%5D";
/// Connections listing, infinite-scroll surface
const CONNECTIONS_URL: &str =
    "https://www.linkedin.com/mynetwork/invite-connect/connections/";
const COMPANY_BASE_URL: &str = "https://www.linkedin.com/company";

/// Rounds of scrolling without a new profile before the scroll strategies
/// give up
const MAX_STALL_ROUNDS: u32 = 5;
/// Dismiss transient chat bubbles every this many scroll rounds
const OVERLAY_CHECK_INTERVAL: u32 = 4;

/// Target-site selectors
mod selectors {
    pub const PROFILE_TOP_CARD: &str = "main section[data-member-id], main .pv-top-card";
    pub const CONNECT_BUTTON: &str =
        "main button[aria-label^='Invite'][aria-label$='to connect']";
    pub const MORE_ACTIONS_BUTTON: &str = "main button[aria-label='More actions']";
    pub const MORE_MENU_CONNECT: &str =
        "div.artdeco-dropdown__content div[aria-label^='Invite']";
    pub const INVITE_DIALOG: &str = "div[role='dialog'] .send-invite";
    pub const ADD_NOTE_BUTTON: &str = "button[aria-label='Add a note']";
    pub const NOTE_TEXTAREA: &str = "textarea[name='message']";
    pub const SEND_INVITE_BUTTON: &str =
        "button[aria-label='Send now'], button[aria-label='Send invitation']";
    pub const NEXT_PAGE_BUTTON: &str = "button[aria-label='Next']";
    pub const MESSAGE_BUTTON: &str = "main button[aria-label^='Message']";
    pub const COMPOSE_TEXTBOX: &str = "div.msg-form__contenteditable[contenteditable='true']";
    pub const COMPOSE_SEND_BUTTON: &str = "button.msg-form__send-button";
    pub const CHAT_OVERLAY_DISMISS: &str =
        "header.msg-overlay-bubble-header button[aria-label^='Dismiss']";
    pub const LOAD_MORE_BUTTON: &str = "button.scaffold-finite-scroll__load-button";
}

/// Scrape scripts
mod scripts {
    /// Highest page number visible in the pagination control (1 when the
    /// control is absent).
    pub const LAST_PAGE: &str = r#"
        (function() {
            const buttons = document.querySelectorAll(
                'ul.artdeco-pagination__pages li[data-test-pagination-page-btn]');
            if (!buttons.length) return 1;
            const last = buttons[buttons.length - 1]
                .getAttribute('data-test-pagination-page-btn');
            return parseInt(last, 10) || 1;
        })()
    "#;

    /// Visible profile links, excluding known non-profile link classes
    /// (insight wrappers, counters), deduplicated and stripped of query
    /// strings.
    pub const PROFILE_LINKS: &str = r#"
        (function() {
            const excluded = [
                'reusable-search-simple-insight__wrapping-link',
                'app-aware-link--counter',
                'search-result__image-wrapper'
            ];
            const seen = new Set();
            const hrefs = [];
            for (const a of document.querySelectorAll('a[href*="/in/"]')) {
                if (excluded.some(cls => a.classList.contains(cls))) continue;
                const href = a.href.split('?')[0];
                if (!seen.has(href)) {
                    seen.add(href);
                    hrefs.push(href);
                }
            }
            return hrefs;
        })()
    "#;

    /// Total connection count from the connections page header.
    pub const CONNECTIONS_TOTAL: &str = r#"
        (function() {
            const header = document.querySelector('header.mn-connections__header h1');
            if (!header) return 0;
            const match = header.textContent.replace(/,/g, '').match(/\d+/);
            return match ? parseInt(match[0], 10) : 0;
        })()
    "#;

    /// Total associated-member count from a company people page.
    pub const COMPANY_PEOPLE_TOTAL: &str = r#"
        (function() {
            const heading = document.querySelector('.org-people__header-spacing-carousel h2, h2.text-heading-xlarge');
            if (!heading) return 0;
            const match = heading.textContent.replace(/,/g, '').match(/\d+/);
            return match ? parseInt(match[0], 10) : 0;
        })()
    "#;

    /// A few random mouse movements between scroll steps.
    pub const MOUSE_WIGGLE: &str = r#"
        (async function() {
            const moves = 2 + Math.floor(Math.random() * 3);
            for (let i = 0; i < moves; i++) {
                document.dispatchEvent(new MouseEvent('mousemove', {
                    clientX: Math.floor(Math.random() * window.innerWidth),
                    clientY: Math.floor(Math.random() * window.innerHeight),
                    bubbles: true
                }));
                await new Promise(r => setTimeout(r, 100 + Math.random() * 300));
            }
        })()
    "#;
}

fn classify(err: BrowserError) -> ClassifiedError {
    ErrorClassifier::classify(&err)
}

fn str_array(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// The stateful workflow layer. All functions operate on an already-opened
/// isolated context.
pub struct PageActions;

impl PageActions {
    /// Send a connection invite to `profile_url`, optionally with a note.
    ///
    /// Resolves the connect affordance: the primary button when present,
    /// otherwise the overflow-menu path. With `dry_run` every step up to
    /// (but not including) the final send click is performed, so the flow
    /// can be verified without side effects.
    pub async fn send_connection_invite(
        page: &dyn PageAutomation,
        pacing: &dyn Pacing,
        profile_url: &str,
        message: Option<&str>,
        dry_run: bool,
    ) -> Result<(), ClassifiedError> {
        page.navigate(profile_url, NAVIGATION_TIMEOUT)
            .await
            .map_err(classify)?;
        page.wait_for(selectors::PROFILE_TOP_CARD, ELEMENT_TIMEOUT)
            .await
            .map_err(classify)?;
        tokio::time::sleep(pacing.settle()).await;

        if page.exists(selectors::CONNECT_BUTTON).await.map_err(classify)? {
            debug!("Primary connect button found on {}", profile_url);
            page.click(selectors::CONNECT_BUTTON).await.map_err(classify)?;
        } else if page
            .exists(selectors::MORE_ACTIONS_BUTTON)
            .await
            .map_err(classify)?
        {
            debug!("Connect button hidden on {}, using overflow menu", profile_url);
            page.click(selectors::MORE_ACTIONS_BUTTON)
                .await
                .map_err(classify)?;
            tokio::time::sleep(pacing.settle()).await;
            page.click(selectors::MORE_MENU_CONNECT)
                .await
                .map_err(classify)?;
        } else {
            let err = ErrorClassifier::internal("Connect button and More button missing");
            error!("Invite failed for {}: {}", profile_url, err);
            return Err(err);
        }

        page.wait_for(selectors::INVITE_DIALOG, ELEMENT_TIMEOUT)
            .await
            .map_err(classify)?;

        if let Some(note) = message {
            page.click(selectors::ADD_NOTE_BUTTON).await.map_err(classify)?;
            tokio::time::sleep(pacing.before_typing()).await;
            page.fill(selectors::NOTE_TEXTAREA, note)
                .await
                .map_err(classify)?;
        }

        if dry_run {
            info!("Dry run: invite for {} prepared, skipping send", profile_url);
        } else {
            page.click(selectors::SEND_INVITE_BUTTON)
                .await
                .map_err(classify)?;
            info!("Connection invite sent to {}", profile_url);
        }
        Ok(())
    }

    /// Enumerate first-degree connections over the paginated search surface.
    ///
    /// Visits pages strictly in increasing order from `start_page` to the
    /// last page reported by the pagination control. A per-page failure
    /// stops the loop early; the cursor then carries the partial results,
    /// the classified error, and the page to resume from.
    pub async fn get_connections(
        page: &dyn PageAutomation,
        pacing: &dyn Pacing,
        retry: &RetryPolicy,
        start_page: u32,
    ) -> ScrapeCursor {
        let mut cursor = ScrapeCursor::new();
        let start_page = start_page.max(1);

        let entry_url = format!("{}&page={}", PEOPLE_SEARCH_URL, start_page);
        if let Err(e) = page.navigate(&entry_url, NAVIGATION_TIMEOUT).await {
            cursor.error = Some(classify(e));
            return cursor;
        }
        // The entry page was reached, so a failure from here on resumes at it.
        cursor.last_page_visited = start_page;

        let last_page = match page.evaluate(scripts::LAST_PAGE).await {
            Ok(value) => value.as_u64().unwrap_or(1).max(1) as u32,
            Err(e) => {
                cursor.error = Some(classify(e));
                return cursor;
            }
        };
        info!(
            "Collecting connections, pages {}..={}",
            start_page, last_page
        );

        for current in start_page..=last_page {
            cursor.last_page_visited = current;

            match page.evaluate(scripts::PROFILE_LINKS).await {
                Ok(value) => {
                    let added = cursor.extend(str_array(&value));
                    debug!(
                        "Page {}: {} new profiles ({} total)",
                        current,
                        added,
                        cursor.len()
                    );
                }
                Err(e) => {
                    warn!("Scrape failed on page {}: {}", current, e);
                    cursor.error = Some(classify(e));
                    break;
                }
            }

            if current < last_page {
                tokio::time::sleep(pacing.between_pages()).await;

                let advanced = retry
                    .run(|| async {
                        page.wait_for(selectors::NEXT_PAGE_BUTTON, ELEMENT_TIMEOUT)
                            .await?;
                        page.click(selectors::NEXT_PAGE_BUTTON).await
                    })
                    .await;
                if let Err(e) = advanced {
                    warn!("Could not advance past page {}: {}", current, e);
                    cursor.error = Some(classify(e));
                    break;
                }
            }
        }

        info!(
            "Connections run finished: {} profiles, last page {}",
            cursor.len(),
            cursor.last_page_visited
        );
        cursor
    }

    /// Enumerate connections over the infinite-scroll listing with simulated
    /// human scrolling.
    ///
    /// Slower and heuristic, but with a different detection profile than
    /// [`get_connections`](Self::get_connections): variable-distance smooth
    /// scrolls (including occasional scroll-backs), periodic dismissal of
    /// transient chat overlays, occasional random mouse movement, and a
    /// "load more" control polled until the known total is reached or no
    /// further progress is made.
    pub async fn get_connections_scrolling(
        page: &dyn PageAutomation,
        pacing: &dyn Pacing,
    ) -> ScrapeCursor {
        let mut cursor = ScrapeCursor::new();

        if let Err(e) = page.navigate(CONNECTIONS_URL, NAVIGATION_TIMEOUT).await {
            cursor.error = Some(classify(e));
            return cursor;
        }
        cursor.last_page_visited = 1;

        let total = page
            .evaluate(scripts::CONNECTIONS_TOTAL)
            .await
            .ok()
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;
        info!("Scroll-collecting connections (reported total: {})", total);

        Self::scroll_collect(page, pacing, &mut cursor, total).await;
        cursor
    }

    /// Send a direct message to an existing connection.
    pub async fn send_message(
        page: &dyn PageAutomation,
        pacing: &dyn Pacing,
        profile_url: &str,
        message: &str,
        dry_run: bool,
    ) -> Result<(), ClassifiedError> {
        page.navigate(profile_url, NAVIGATION_TIMEOUT)
            .await
            .map_err(classify)?;
        page.wait_for(selectors::PROFILE_TOP_CARD, ELEMENT_TIMEOUT)
            .await
            .map_err(classify)?;
        tokio::time::sleep(pacing.settle()).await;

        page.click(selectors::MESSAGE_BUTTON).await.map_err(classify)?;
        page.wait_for(selectors::COMPOSE_TEXTBOX, ELEMENT_TIMEOUT)
            .await
            .map_err(classify)?;

        tokio::time::sleep(pacing.before_typing()).await;
        page.fill(selectors::COMPOSE_TEXTBOX, message)
            .await
            .map_err(classify)?;

        if dry_run {
            info!("Dry run: message to {} composed, skipping send", profile_url);
        } else {
            page.click(selectors::COMPOSE_SEND_BUTTON)
                .await
                .map_err(classify)?;
            info!("Message sent to {}", profile_url);
        }
        Ok(())
    }

    /// Collect profile links from a company's people listing, scrolling
    /// until the known associated-member count is reached.
    pub async fn get_company_people(
        page: &dyn PageAutomation,
        pacing: &dyn Pacing,
        company_name: &str,
    ) -> ScrapeCursor {
        let mut cursor = ScrapeCursor::new();

        let slug = company_slug(company_name);
        let url = format!("{}/{}/people/", COMPANY_BASE_URL, slug);
        if let Err(e) = page.navigate(&url, NAVIGATION_TIMEOUT).await {
            cursor.error = Some(classify(e));
            return cursor;
        }
        cursor.last_page_visited = 1;

        let total = page
            .evaluate(scripts::COMPANY_PEOPLE_TOTAL)
            .await
            .ok()
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;
        info!(
            "Collecting people for company {:?} (reported total: {})",
            company_name, total
        );

        Self::scroll_collect(page, pacing, &mut cursor, total).await;
        cursor
    }

    /// Shared scroll-and-accumulate loop for the infinite-scroll surfaces.
    ///
    /// Stops when `total` known profiles have been collected (when the total
    /// is known), when no new profile shows up for [`MAX_STALL_ROUNDS`]
    /// rounds, or on a hard page failure (partial cursor + classified
    /// error).
    async fn scroll_collect(
        page: &dyn PageAutomation,
        pacing: &dyn Pacing,
        cursor: &mut ScrapeCursor,
        total: usize,
    ) {
        let mut stalled: u32 = 0;
        let mut round: u32 = 0;

        loop {
            round += 1;

            // Chat bubbles pop over the load-more control.
            if round % OVERLAY_CHECK_INTERVAL == 0
                && page
                    .exists(selectors::CHAT_OVERLAY_DISMISS)
                    .await
                    .unwrap_or(false)
            {
                debug!("Dismissing chat overlay");
                let _ = page.click(selectors::CHAT_OVERLAY_DISMISS).await;
            }

            if pacing.should_wiggle() {
                let _ = page.evaluate(scripts::MOUSE_WIGGLE).await;
            }

            if let Err(e) = page.scroll_by(pacing.scroll_distance()).await {
                cursor.error = Some(classify(e));
                return;
            }
            tokio::time::sleep(pacing.scroll_pause()).await;

            if page
                .exists(selectors::LOAD_MORE_BUTTON)
                .await
                .unwrap_or(false)
            {
                let _ = page.click(selectors::LOAD_MORE_BUTTON).await;
            }

            let added = match page.evaluate(scripts::PROFILE_LINKS).await {
                Ok(value) => cursor.extend(str_array(&value)),
                Err(e) => {
                    warn!("Scrape failed on scroll round {}: {}", round, e);
                    cursor.error = Some(classify(e));
                    return;
                }
            };

            if added == 0 {
                stalled += 1;
            } else {
                stalled = 0;
            }

            if total > 0 && cursor.len() >= total {
                info!("Collected all {} reported profiles", total);
                return;
            }
            if stalled >= MAX_STALL_ROUNDS {
                info!(
                    "No progress after {} rounds, stopping at {} profiles",
                    stalled,
                    cursor.len()
                );
                return;
            }
        }
    }
}

fn company_slug(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}
