//! Logging infrastructure for examdesk
//!
//! Structured tracing is initialized in the binary; this module adds the JSONL
//! usage log used for offline analytics of billable actions.

pub mod usage;

pub use usage::{EventType, UsageEvent, UsageLogger};
