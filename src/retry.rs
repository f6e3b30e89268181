//! Retry engine
//!
//! Re-invokes a fallible async operation with a configurable wait-time
//! strategy, attempt cap, and overall deadline. Cancellation is honoured at
//! every wait point: mid-operation and mid-sleep both resolve to the
//! [`HecError::Cancelled`] sentinel.

use crate::{Backoff, CancelToken, HecError, Sleeper, TokioSleeper};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

type OnError = Arc<dyn Fn(&HecError, usize) + Send + Sync>;

/// Options for [`retry`]. Defaults: unbounded retries, no overall
/// deadline, no wait between attempts, no hook, no cancellation.
#[derive(Clone)]
pub struct RetryOptions {
    name: &'static str,
    max_retries: Option<usize>,
    overall_timeout: Option<Duration>,
    backoff: Backoff,
    on_error: Option<OnError>,
    cancel: Option<CancelToken>,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryOptions")
            .field("name", &self.name)
            .field("max_retries", &self.max_retries)
            .field("overall_timeout", &self.overall_timeout)
            .field("backoff", &self.backoff)
            .field("has_on_error", &self.on_error.is_some())
            .field("has_cancel", &self.cancel.is_some())
            .finish()
    }
}

impl RetryOptions {
    /// Options for a named task, with the defaults above.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            max_retries: None,
            overall_timeout: None,
            backoff: Backoff::none(),
            on_error: None,
            cancel: None,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Cap the number of retries; the operation runs at most `n + 1` times.
    pub fn max_retries(mut self, n: usize) -> Self {
        self.max_retries = Some(n);
        self
    }

    /// Give up once this much wall-clock time has elapsed.
    pub fn overall_timeout(mut self, limit: Duration) -> Self {
        self.overall_timeout = Some(limit);
        self
    }

    /// Wait-time strategy between attempts.
    pub fn backoff(mut self, backoff: impl Into<Backoff>) -> Self {
        self.backoff = backoff.into();
        self
    }

    /// Hook invoked with each failure and the 1-based attempt index.
    /// A panicking hook is swallowed; it never aborts the retry loop.
    pub fn on_error(mut self, hook: impl Fn(&HecError, usize) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Abandon the loop with the cancellation sentinel when this fires.
    pub fn cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }
}

/// Invoke `op` until it succeeds, retries are exhausted, the overall
/// deadline passes, or the cancellation token fires.
pub async fn retry<T, Fut, Op>(options: RetryOptions, mut op: Op) -> Result<T, HecError>
where
    Fut: Future<Output = Result<T, HecError>>,
    Op: FnMut() -> Fut,
{
    let start = Instant::now();
    let mut attempt = 0usize;

    loop {
        if options.cancel.as_ref().is_some_and(|t| t.is_triggered()) {
            return Err(HecError::Cancelled);
        }
        attempt += 1;

        let result = match &options.cancel {
            Some(token) => match token.guard(op()).await {
                Ok(inner) => inner,
                Err(cancelled) => return Err(cancelled),
            },
            None => op().await,
        };

        let err = match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => e,
        };

        let out_of_attempts = options.max_retries.is_some_and(|cap| attempt > cap);
        let out_of_time = options
            .overall_timeout
            .is_some_and(|limit| start.elapsed() >= limit);
        if out_of_attempts || out_of_time {
            error!(task = options.name, attempts = attempt, error = %err, "retries exhausted");
            return Err(HecError::RetriesExhausted { attempts: attempt, last: Box::new(err) });
        }

        if let Some(hook) = &options.on_error {
            // A misbehaving hook must not take the retry loop down with it.
            let _ = catch_unwind(AssertUnwindSafe(|| hook(&err, attempt)));
        }

        if attempt == 1 {
            warn!(task = options.name, error = %err, "attempt failed, retrying");
        } else {
            debug!(task = options.name, attempt, error = %err, "attempt failed, retrying");
        }

        let wait = options.backoff.delay(attempt);
        match &options.cancel {
            Some(token) => token.guard(options.sleeper.sleep(wait)).await?,
            None => options.sleeper.sleep(wait).await,
        }
    }
}
