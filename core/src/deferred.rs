//! Caller-side polling for deferred results.
//!
//! `Connection::get_deferred_results` performs exactly one poll. This helper
//! repeats it on a fixed interval while the service reports the job as
//! pending (HTTP 202 or 503); any other failure ends polling immediately.

use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::connection::Connection;
use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval: Duration::from_secs(3),
        }
    }
}

pub fn poll_deferred_results(
    connection: &Connection,
    deferred_id: &str,
    policy: &PollPolicy,
) -> Result<String, ApiError> {
    for attempt in 1..=policy.attempts {
        match connection.get_deferred_results(deferred_id) {
            Err(ApiError::Http { status: 202 | 503, .. }) => {
                debug!(deferred_id, attempt, "deferred result pending");
                if attempt < policy.attempts {
                    thread::sleep(policy.interval);
                }
            }
            other => return other,
        }
    }
    Err(ApiError::DeferredNotReady {
        deferred_id: deferred_id.to_string(),
        attempts: policy.attempts,
    })
}
