//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use std::time::Duration;

/// Upper bound for a session to settle after a burst of events
pub fn settle_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Bound for waiting on a call to park at a mock gate
pub fn gate_timeout() -> Duration {
    Duration::from_secs(5)
}
