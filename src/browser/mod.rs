//! Browser module
//!
//! Connections to the remote browser backend (one live session per proxy
//! configuration), isolated per-call contexts, and the pool caching the
//! sessions.

mod errors;
mod pool;
mod session;

pub use errors::BrowserError;
pub use pool::{BrowserSessionPool, CdpSessionFactory, SessionFactory};
pub use session::{BrowserSession, ContextOptions, CookieRecord, PageContext};
