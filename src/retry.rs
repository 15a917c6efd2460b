// src/retry.rs
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use crate::config::RetryPolicy;
use crate::session::{Session, SessionManager};
use crate::utils::error::FetchError;

/// One retryable unit of work executed against a session.
#[async_trait]
pub trait Attempt: Send {
    type Output: Send;

    /// Short description used in log lines.
    fn label(&self) -> String;

    async fn attempt(&mut self, session: &mut Session) -> Result<Self::Output, FetchError>;
}

/// Bounded retries with widening random backoff and a fresh session per retry.
#[derive(Clone)]
pub struct RetryController {
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl RetryController {
    pub fn new(policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self { policy, cancel }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Runs `op` up to `max_attempts` times.
    ///
    /// Permanent failures are returned immediately. Transient failures are
    /// followed by a random delay and a session rotation; once attempts run
    /// out the last failure is wrapped in `RetryExhausted`. Cancellation is
    /// honored before each attempt and during backoff, never mid-attempt.
    pub async fn run<A: Attempt>(
        &self,
        sessions: &mut SessionManager,
        op: &mut A,
    ) -> Result<A::Output, FetchError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            if self.cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let result = match sessions.acquire().await {
                Ok(session) => op.attempt(session).await,
                Err(e) => Err(FetchError::Transport(e)),
            };

            let error = match result {
                Ok(output) => {
                    if attempt > 1 {
                        tracing::info!("{} succeeded on attempt {}/{}", op.label(), attempt, max_attempts);
                    }
                    return Ok(output);
                }
                Err(e) => e,
            };

            if !error.is_transient() {
                tracing::warn!("{} failed permanently: {}", op.label(), error);
                return Err(error);
            }

            if attempt >= max_attempts {
                tracing::error!("{} failed after {} attempts: {}", op.label(), attempt, error);
                return Err(FetchError::RetryExhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let delay = self.policy.delay_for(attempt, &mut rand::thread_rng());
            tracing::warn!(
                "{} failed (attempt {}/{}): {}; retrying in {:.2}s on a new session",
                op.label(),
                attempt,
                max_attempts,
                error,
                delay.as_secs_f64()
            );

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }

            if let Err(e) = sessions.rotate().await {
                tracing::warn!("Could not open a replacement session: {}", e);
            }
            attempt += 1;
        }
    }
}
