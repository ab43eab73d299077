//! Render client: one label unit in, one PDF page (or a unit error) out.
//!
//! The network call itself sits behind [`LabelRenderer`] so the retry policy
//! can be exercised without a live endpoint. [`crate::pipeline::labelary`]
//! provides the production backend.
//!
//! ## Retry Strategy
//!
//! The rendering endpoint is rate-limit sensitive, so waits are fixed rather
//! than exponential and depend on *why* an attempt failed:
//!
//! | Attempt result        | Wait before next attempt      |
//! |-----------------------|-------------------------------|
//! | 200                   | — (done)                      |
//! | 429                   | `rate_limit_backoff` (3 s)    |
//! | transport failure     | `transport_backoff` (2 s)     |
//! | any other status      | none                          |
//!
//! No wait follows the final attempt.

use crate::error::{UnitError, ZplError};
use crate::output::UnitResult;
use crate::pipeline::segment::LabelUnit;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

/// HTTP status signalling success.
pub const STATUS_OK: u16 = 200;
/// HTTP status signalling throttling.
pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// Raw answer from one render attempt.
#[derive(Debug, Clone)]
pub struct RenderResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RenderResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: STATUS_OK,
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
        }
    }
}

/// Why an attempt produced no response at all.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RenderFailure {
    /// Timeout, connection error, malformed response. Worth retrying.
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend can never succeed (e.g. it cannot build a request).
    /// Aborts the batch.
    #[error("{0}")]
    Fatal(String),
}

/// A backend able to turn one label's ZPL into a PDF page.
#[async_trait]
pub trait LabelRenderer: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Perform exactly one attempt.
    async fn render(&self, zpl: &str) -> Result<RenderResponse, RenderFailure>;
}

/// Per-unit retry budget and waits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub rate_limit_backoff: Duration,
    pub transport_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            rate_limit_backoff: Duration::from_secs(3),
            transport_backoff: Duration::from_secs(2),
        }
    }
}

/// Result of a successful render call, before it is wrapped in a [`UnitResult`].
#[derive(Debug, Clone)]
pub enum ConversionOutcome {
    Rendered(Vec<u8>),
    Failed(UnitError),
}

/// Drives a [`LabelRenderer`] with the retry policy.
#[derive(Clone)]
pub struct RenderClient {
    renderer: Arc<dyn LabelRenderer>,
    policy: RetryPolicy,
}

impl RenderClient {
    pub fn new(renderer: Arc<dyn LabelRenderer>, policy: RetryPolicy) -> Self {
        Self { renderer, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Render one unit, retrying per the policy.
    ///
    /// `label` is the 1-indexed position of the unit in its batch.
    ///
    /// Returns `Ok` for both rendered and failed units; a failed unit is not
    /// fatal to the batch. `Err` is reserved for [`RenderFailure::Fatal`].
    pub async fn render(&self, label: usize, unit: &LabelUnit) -> Result<UnitResult, ZplError> {
        let start = Instant::now();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_err = String::from("no attempt made");
        let mut all_throttled = true;

        for attempt in 1..=max_attempts {
            let wait = match self.renderer.render(unit.as_str()).await {
                Ok(resp) if resp.status == STATUS_OK => {
                    debug!(
                        "Label {}: rendered by {} ({} bytes, attempt {})",
                        label,
                        self.renderer.name(),
                        resp.body.len(),
                        attempt
                    );
                    return Ok(UnitResult {
                        label,
                        outcome: ConversionOutcome::Rendered(resp.body),
                        attempts: attempt,
                        duration_ms: start.elapsed().as_millis() as u64,
                    });
                }
                Ok(resp) if resp.status == STATUS_TOO_MANY_REQUESTS => {
                    last_err = "HTTP 429 Too Many Requests".to_string();
                    Some(self.policy.rate_limit_backoff)
                }
                Ok(resp) => {
                    all_throttled = false;
                    last_err = format!("HTTP {}", resp.status);
                    None
                }
                Err(RenderFailure::Transport(detail)) => {
                    all_throttled = false;
                    last_err = detail;
                    Some(self.policy.transport_backoff)
                }
                Err(RenderFailure::Fatal(reason)) => {
                    return Err(ZplError::RendererAborted { label, reason });
                }
            };

            warn!(
                "Label {}: attempt {}/{} failed: {}",
                label, attempt, max_attempts, last_err
            );

            if attempt < max_attempts {
                if let Some(wait) = wait {
                    sleep(wait).await;
                }
            }
        }

        let error = if all_throttled {
            UnitError::RateLimited {
                label,
                attempts: max_attempts,
            }
        } else {
            UnitError::RetriesExhausted {
                label,
                attempts: max_attempts,
                detail: last_err,
            }
        };

        Ok(UnitResult {
            label,
            outcome: ConversionOutcome::Failed(error),
            attempts: max_attempts,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}
