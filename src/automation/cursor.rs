//! Scrape cursor
//!
//! The resumable state of a paginated or scroll-driven collection run:
//! discovered profile URLs in discovery order (deduplicated), the last page
//! visited, and the error that interrupted the run, if any.

use std::collections::HashSet;

use serde::Serialize;

use crate::error::ClassifiedError;

/// Accumulator and resume point for a collection workflow.
///
/// Partial results are preferred over total failure: on an interrupted run
/// the cursor carries everything collected so far plus the classified error,
/// and callers resume from `last_page_visited`.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeCursor {
    /// Unique profile URLs in discovery order
    pub profiles: Vec<String>,
    /// Last page the run actually reached (1-based; 0 when nothing was
    /// visited)
    pub last_page_visited: u32,
    /// The failure that stopped the run, if it did not complete
    pub error: Option<ClassifiedError>,

    #[serde(skip)]
    seen: HashSet<String>,
}

impl ScrapeCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a discovered URL. Returns true when it was new.
    pub fn push(&mut self, url: impl Into<String>) -> bool {
        let url = url.into();
        if self.seen.insert(url.clone()) {
            self.profiles.push(url);
            true
        } else {
            false
        }
    }

    /// Record a batch, returning how many were new.
    pub fn extend<I, S>(&mut self, urls: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        urls.into_iter().map(|u| self.push(u)).filter(|new| *new).count()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
