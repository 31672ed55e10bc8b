// SPDX-License-Identifier: MIT
//! Bounded retry for external service calls.
//!
//! One wrapper, one hard attempt cap, and a typed result the orchestrator's
//! decision tree can match on instead of threading errors upward. The cap is
//! small by design (fix-service calls default to 2 attempts) — a service
//! that fails twice becomes a failed step, not a loop.

use std::time::Duration;
use tracing::{debug, warn};

/// Typed outcome of a capped retry loop.
#[derive(Debug)]
pub enum Attempted<T> {
    Ok(T),
    /// All attempts exhausted; carries the final error's description.
    Failed(String),
}

impl<T> Attempted<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            Attempted::Ok(v) => Some(v),
            Attempted::Failed(_) => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Attempted::Failed(_))
    }
}

/// Run `f` up to `max_attempts` times, doubling `delay` between attempts.
///
/// `max_attempts` of 0 is treated as 1 — the operation always runs at least
/// once.
pub async fn bounded<F, Fut, T, E>(max_attempts: u32, mut delay: Duration, mut f: F) -> Attempted<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "retried call succeeded");
                }
                return Attempted::Ok(value);
            }
            Err(e) if attempt < max_attempts => {
                warn!(attempt, max = max_attempts, err = %e, "attempt failed — retrying");
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
            Err(e) => {
                warn!(attempt, max = max_attempts, err = %e, "all attempts exhausted");
                return Attempted::Failed(e.to_string());
            }
        }
    }

    // The loop always returns; max_attempts ≥ 1.
    unreachable!("retry loop exited without a result")
}
