//! Connectivity Prober, spec §4.10 (C10): a backoff-retried reachability
//! check of the ingest endpoint performed once at startup.
//!
//! Grounded on the teacher's `ExternalHttpPlugin` (`plugins/external_http.rs`)
//! for the outbound-GET/header-attachment shape; the exponential backoff
//! itself is hand-rolled with `tokio::time::sleep` since no backoff crate
//! appears anywhere in the dependency stack this crate draws from.

use crate::error::AgentError;
use std::time::Duration;
use tokio::sync::watch;

/// Exponential backoff schedule: `initial * multiplier^attempt`, capped at
/// `max`. Stateless; callers drive it with the attempt index.
#[derive(Debug, Clone, Copy)]
pub struct Retrier {
    pub initial: Duration,
    pub multiplier: f64,
    pub max: Duration,
}

impl Retrier {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.initial.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.max.as_secs_f64()))
    }
}

impl Default for Retrier {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            multiplier: 2.0,
            max: Duration::from_secs(30),
        }
    }
}

/// `-1` (or any negative value) means "retry forever", spec §4.10.
pub const INFINITE_RETRIES: i64 = -1;

/// `check(cfg, retrier, user_agent, agent_key, transport)`, spec §4.10.
/// `cancel` mirrors the Agent Context's cancellation primitive (spec §5);
/// a `true` value observed between attempts aborts the probe immediately.
pub async fn check(
    collector_url: &str,
    client: &reqwest::Client,
    retrier: Retrier,
    max_retries: i64,
    user_agent: &str,
    agent_key: &str,
    mut cancel: watch::Receiver<bool>,
) -> Result<(), AgentError> {
    let mut attempt: u32 = 0;
    let mut last_err = None;

    loop {
        if *cancel.borrow() {
            return Err(AgentError::Cancelled);
        }

        match client
            .get(collector_url)
            .header("User-Agent", user_agent)
            .header("X-License-Key", agent_key)
            .send()
            .await
        {
            Ok(_) => return Ok(()),
            Err(err) => last_err = Some(AgentError::transport(err)),
        }

        if max_retries >= 0 && attempt as i64 >= max_retries {
            break;
        }

        let delay = retrier.delay_for(attempt);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    return Err(AgentError::Cancelled);
                }
            }
        }
        attempt += 1;
    }

    Err(last_err.unwrap_or(AgentError::Transport("connectivity probe exhausted retries".into())))
}
