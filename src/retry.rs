use std::future::Future;
use anyhow::{anyhow, Result};
use serde_json::json;
use tokio::time::{sleep, Duration};
use rand::Rng;

use crate::logging::{obj, v_err, v_str, warn, Domain};

/// Backoff used while waiting for the bus to come up.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 200,
            max_delay_ms: 5000,
            jitter_factor: 0.3,
        }
    }
}

impl RetryPolicy {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_retries: std::env::var("BUS_CONNECT_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_retries),
            ..default
        }
    }

    /// Exponential backoff, clamped, with ±jitter_factor noise.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms as f64 * 2.0_f64.powi(attempt as i32);
        let clamped = base.min(self.max_delay_ms as f64);

        let jitter_range = clamped * self.jitter_factor;
        let jitter: f64 = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        let final_delay = (clamped + jitter).max(0.0);

        Duration::from_millis(final_delay as u64)
    }
}

/// Run `operation` until it succeeds or the policy gives up.
pub async fn retry_async<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error: Option<anyhow::Error> = None;

    for attempt in 0..=policy.max_retries {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt < policy.max_retries {
                    let delay = policy.delay_for_attempt(attempt);
                    warn(
                        Domain::System,
                        "retry",
                        obj(&[
                            ("operation", v_str(operation_name)),
                            ("attempt", json!(attempt + 1)),
                            ("max_attempts", json!(policy.max_retries + 1)),
                            ("delay_ms", json!(delay.as_millis() as u64)),
                            ("error", v_err(&e)),
                        ]),
                    );
                    sleep(delay).await;
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| anyhow!("retry exhausted without error"))
        .context(format!("{} failed after {} attempts", operation_name, policy.max_retries + 1)))
}
