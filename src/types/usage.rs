//! Usage snapshots reported alongside quota decisions.

use serde::{Deserialize, Serialize};

/// Limit, consumption and headroom for one counting window.
///
/// `remaining` never goes below zero, even when a plan downgrade leaves `used`
/// above the new limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowUsage {
    pub limit: i64,
    pub used: i64,
    pub remaining: i64,
}

impl WindowUsage {
    pub fn new(limit: i64, used: i64) -> Self {
        Self {
            limit,
            used,
            remaining: (limit - used).max(0),
        }
    }
}

/// Daily and monthly windows for one kind of action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageLimits {
    pub daily: WindowUsage,
    pub monthly: WindowUsage,
}
