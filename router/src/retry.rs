// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Retry middleware
//!
//! Re-drives the downstream chain when an attempt fails with a retryable error, waiting an
//! exponentially growing delay between attempts:
//!
//! ```text
//! delay(attempt) = min(initial_delay * backoff_multiplier^(attempt - 1), max_delay)
//! ```
//!
//! A failure is retryable when the envelope carries an `error_message` and either its status
//! code (as a string) is listed in `retryable_errors`, or the message contains one of the
//! listed substrings, ignoring case. Raised errors are classified by their message only.
//!
//! This is the only stage allowed to re-drive a failed attempt.
//!

use crate::{
    Envelope, Error,
    pipeline::{Middleware, Next, PipelineContext},
};

use async_trait::async_trait;
use backoff::{ExponentialBackoff, backoff::Backoff};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use std::time::Duration;

/// Pipeline metadata key holding the number of attempts made.
pub const RETRY_ATTEMPTS_KEY: &str = "retry_attempts";

/// Converts a configured number of seconds into a [`Duration`].
///
/// # Errors
///
/// A message naming `field` when the value is negative, not finite or beyond what a
/// `Duration` holds.
pub fn parse_seconds(field: &str, seconds: f64) -> Result<Duration, String> {
    Duration::try_from_secs_f64(seconds)
        .map_err(|e| format!("{} = {} is not a valid duration: {}", field, seconds, e))
}

/// Like [`parse_seconds`], clamping out-of-range values instead of failing.
pub fn saturating_seconds(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds).unwrap_or(if seconds > 0.0 {
        Duration::MAX
    } else {
        Duration::ZERO
    })
}

/// Retry policy of a port.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    /// Seconds before the second attempt.
    pub initial_delay: f64,
    pub backoff_multiplier: f64,
    /// Upper bound of a single delay, in seconds.
    pub max_delay: f64,
    /// Status codes and message substrings that make a failure retryable.
    pub retryable_errors: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            initial_delay: 1.0,
            backoff_multiplier: 2.0,
            max_delay: 30.0,
            retryable_errors: vec![
                "timeout".to_owned(),
                "connection".to_owned(),
                "503".to_owned(),
            ],
        }
    }
}

impl RetryConfig {
    /// Checks the policy values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry.max_attempts must be at least 1".to_owned());
        }
        parse_seconds("retry.initial_delay", self.initial_delay)?;
        parse_seconds("retry.max_delay", self.max_delay)?;
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err("retry.backoff_multiplier must be at least 1".to_owned());
        }
        Ok(())
    }

    /// True when the envelope failed in a retryable way.
    pub fn is_retryable(&self, envelope: &Envelope) -> bool {
        let Some(message) = &envelope.error_message else {
            return false;
        };
        let status = envelope.status_code.to_string();
        self.retryable_errors.iter().any(|e| *e == status)
            || self.matches_message(message)
    }

    /// True when a raised error is retryable. Wiring errors never are.
    pub fn is_retryable_error(&self, error: &Error) -> bool {
        match error {
            Error::PortNotFound(_)
            | Error::NoHandlers(_)
            | Error::PortExists(_)
            | Error::Handler(_)
            | Error::Traceparent(_) => false,
            Error::Functional(_) | Error::Pipeline(_) => {
                self.matches_message(&error.to_string())
            }
        }
    }

    fn matches_message(&self, message: &str) -> bool {
        let message = message.to_lowercase();
        self.retryable_errors
            .iter()
            .any(|e| message.contains(&e.to_lowercase()))
    }

    fn backoff(&self) -> ExponentialBackoff {
        let initial = saturating_seconds(self.initial_delay);
        ExponentialBackoff {
            current_interval: initial,
            initial_interval: initial,
            randomization_factor: 0.0,
            multiplier: self.backoff_multiplier,
            max_interval: saturating_seconds(self.max_delay),
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }
}

/// Per-attempt delay schedule.
struct Delays {
    inner: ExponentialBackoff,
    max_delay: Duration,
}

impl Delays {
    fn new(config: &RetryConfig) -> Self {
        Self {
            inner: config.backoff(),
            max_delay: saturating_seconds(config.max_delay),
        }
    }

    fn next_delay(&mut self) -> Duration {
        self.inner
            .next_backoff()
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Retries failed attempts of the downstream chain.
#[derive(Debug, Default)]
pub struct RetryMiddleware {
    config: RetryConfig,
}

impl RetryMiddleware {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

#[async_trait]
impl Middleware for RetryMiddleware {
    fn name(&self) -> &str {
        "retry"
    }

    async fn process(
        &self,
        ctx: PipelineContext,
        next: Next<'_>,
    ) -> Result<PipelineContext, Error> {
        if !self.config.enabled {
            return next.run(ctx).await;
        }

        let mut delays = Delays::new(&self.config);
        let mut attempt = 1;
        loop {
            let result = next.run(ctx.clone()).await;
            let retry = attempt < self.config.max_attempts
                && match &result {
                    Ok(done) => self.config.is_retryable(&done.envelope),
                    Err(e) => self.config.is_retryable_error(e),
                };
            if !retry {
                return result.map(|mut done| {
                    done.metadata
                        .insert(RETRY_ATTEMPTS_KEY.to_owned(), Value::from(attempt));
                    done
                });
            }

            let delay = delays.next_delay();
            let reason = match &result {
                Ok(done) => done.envelope.error_message.clone().unwrap_or_default(),
                Err(e) => e.to_string(),
            };
            warn!(
                "Attempt {}/{} on port {} failed ({}), retrying in {:?}.",
                attempt, self.config.max_attempts, ctx.port_name, reason, delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
            debug!("Starting attempt {} on port {}.", attempt, ctx.port_name);
        }
    }
}
