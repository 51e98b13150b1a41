//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod fake_hub;
pub mod mock_helpers;

use std::time::{Duration, Instant};

/// How long to wait for something the event thread does
pub fn test_timeout() -> Duration {
    Duration::from_secs(3)
}

/// Poll `condition` until it holds or the test timeout expires
pub fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + test_timeout();
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
