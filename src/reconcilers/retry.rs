// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Exponential backoff shared by every retry path in the operator.
//!
//! | Policy | Used by | Schedule |
//! |--------|---------|----------|
//! | [`KUBE_API_POLICY`] | [`retry_api_call`] around store reads | 100ms doubling to 30s, gives up after 5m |
//! | [`HTTP_POLICY`] | the hypervisor gateway client on 429/5xx | 50ms doubling to 10s, gives up after 2m |
//! | [`REQUEUE_POLICY`] | [`RequeueTracker`] after a retriable reconcile error | 1s doubling to 5m, never gives up |
//!
//! All schedules carry ±10% jitter so VMs failing together do not retry together.

use anyhow::Result;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// HTTP retry maximum elapsed time (2 minutes)
pub const HTTP_MAX_ELAPSED_TIME_SECS: u64 = 120;

const JITTER: f64 = 0.1;
const GROWTH: f64 = 2.0;

/// Shape of one backoff schedule.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub ceiling: Duration,
    /// Total time after which retrying stops; `None` retries forever
    pub give_up_after: Option<Duration>,
}

pub const KUBE_API_POLICY: BackoffPolicy = BackoffPolicy {
    initial: Duration::from_millis(100),
    ceiling: Duration::from_secs(30),
    give_up_after: Some(Duration::from_secs(300)),
};

pub const HTTP_POLICY: BackoffPolicy = BackoffPolicy {
    initial: Duration::from_millis(50),
    ceiling: Duration::from_secs(10),
    give_up_after: Some(Duration::from_secs(HTTP_MAX_ELAPSED_TIME_SECS)),
};

pub const REQUEUE_POLICY: BackoffPolicy = BackoffPolicy {
    initial: Duration::from_secs(1),
    ceiling: Duration::from_secs(300),
    give_up_after: None,
};

/// Running backoff state for one retry sequence.
#[derive(Debug)]
pub struct ExponentialBackoff {
    pub current_interval: Duration,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub max_elapsed_time: Option<Duration>,
    started: Instant,
}

impl From<BackoffPolicy> for ExponentialBackoff {
    fn from(policy: BackoffPolicy) -> Self {
        Self {
            current_interval: policy.initial,
            initial_interval: policy.initial,
            max_interval: policy.ceiling,
            max_elapsed_time: policy.give_up_after,
            started: Instant::now(),
        }
    }
}

impl ExponentialBackoff {
    /// Next jittered delay, or `None` once the sequence has run out of time.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self
            .max_elapsed_time
            .is_some_and(|limit| self.started.elapsed() >= limit)
        {
            return None;
        }

        let base = self.current_interval;
        self.current_interval = base.mul_f64(GROWTH).min(self.max_interval);
        Some(jitter(base))
    }

    pub fn reset(&mut self) {
        self.current_interval = self.initial_interval;
        self.started = Instant::now();
    }
}

fn jitter(base: Duration) -> Duration {
    // uniform in [1 - JITTER, 1 + JITTER)
    let factor = 1.0 - JITTER + 2.0 * JITTER * rand::random::<f64>();
    base.mul_f64(factor)
}

#[must_use]
pub fn default_backoff() -> ExponentialBackoff {
    KUBE_API_POLICY.into()
}

#[must_use]
pub fn http_backoff() -> ExponentialBackoff {
    HTTP_POLICY.into()
}

/// [`HTTP_POLICY`] with a different give-up time.
#[must_use]
pub fn http_backoff_with_budget(max_elapsed: Duration) -> ExponentialBackoff {
    BackoffPolicy {
        give_up_after: Some(max_elapsed),
        ..HTTP_POLICY
    }
    .into()
}

#[must_use]
pub fn requeue_backoff() -> ExponentialBackoff {
    REQUEUE_POLICY.into()
}

/// Requeue delays keyed by `namespace/name`.
///
/// Per-object serialization comes from the controller runtime; this only
/// counts consecutive retriable failures per VM.
#[derive(Debug, Default)]
pub struct RequeueTracker {
    backoffs: Mutex<HashMap<String, ExponentialBackoff>>,
}

impl RequeueTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay before the next attempt for `key`; each call doubles it up to the ceiling.
    pub fn next_delay(&self, key: &str) -> Duration {
        let mut backoffs = self.backoffs.lock().unwrap_or_else(PoisonError::into_inner);
        let backoff = backoffs.entry(key.to_string()).or_insert_with(requeue_backoff);
        backoff.next_backoff().unwrap_or(REQUEUE_POLICY.ceiling)
    }

    pub fn reset(&self, key: &str) {
        self.backoffs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

/// 429 and the transient 5xx codes.
#[must_use]
pub fn is_retryable_http_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || matches!(
            status,
            StatusCode::INTERNAL_SERVER_ERROR
                | StatusCode::BAD_GATEWAY
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT
        )
}

/// Run a Kubernetes API call, retrying throttling, 5xx and connection failures.
///
/// # Errors
///
/// Returns the last error when it is not retryable or [`KUBE_API_POLICY`] runs out.
pub async fn retry_api_call<T, F, Fut>(mut call: F, what: &str) -> Result<T, kube::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, kube::Error>>,
{
    let mut backoff = default_backoff();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let err = match call().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = what, attempt, "Kubernetes API call recovered");
                }
                return Ok(value);
            }
            Err(e) if !is_retryable_error(&e) => return Err(e),
            Err(e) => e,
        };

        let Some(delay) = backoff.next_backoff() else {
            error!(operation = what, attempt, error = %err, "Giving up on Kubernetes API call");
            return Err(err);
        };
        warn!(operation = what, attempt, retry_after = ?delay, error = %err, "Retrying Kubernetes API call");
        tokio::time::sleep(delay).await;
    }
}

/// Conflicts are excluded; callers re-read and reapply those themselves.
fn is_retryable_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(resp) => resp.code == 429 || (500..600).contains(&resp.code),
        kube::Error::Service(_) => true,
        _ => false,
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;
