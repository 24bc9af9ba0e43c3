//! Job scheduling module
//!
//! Cron-driven jobs with running-tick accounting and graceful drain.

mod jobs;

pub use jobs::{CompletionHook, JobId, JobSpec, Scheduler, SchedulerError, TickHandler};
