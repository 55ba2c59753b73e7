//! Shared types for examdesk

pub mod error;
pub mod usage;

pub use error::{ExamdeskError, Result};
pub use usage::{UsageLimits, WindowUsage};
