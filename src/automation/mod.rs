//! Automation module
//!
//! The workflow layer: page driver abstraction, human-like pacing, the
//! resumable scrape cursor, the site workflows themselves, and the
//! orchestrating service.

pub mod cursor;
pub mod pacing;
pub mod page;
pub mod service;
pub mod workflows;

pub use cursor::ScrapeCursor;
pub use pacing::{FixedPacing, HumanPacing, Pacing};
pub use page::PageAutomation;
pub use service::{AccountSession, AutomationService, CollectionStrategy, ContextProvider};
pub use workflows::PageActions;
