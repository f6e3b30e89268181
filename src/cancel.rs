//! Cancellation primitives
//!
//! A [`CancelToken`] is a one-shot signal: it starts un-triggered, can be
//! triggered at most once, and can be awaited. Everywhere in the client,
//! cancellation surfaces as the [`HecError::Cancelled`] sentinel so callers
//! can tell an abort apart from an ordinary failure.
//!
//! A [`CancelGroup`] owns a set of live tokens and can trigger them
//! collectively; the client uses one per active-flush set so shutdown can
//! abort every outstanding send at once.

use crate::HecError;
use futures::future::{select_all, BoxFuture};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// One-shot cancellation signal.
///
/// Cloning yields another handle to the same signal.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: CancellationToken,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Triggering more than once is a no-op.
    pub fn trigger(&self) {
        self.inner.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Resolves only once the token has been triggered.
    pub async fn triggered(&self) {
        self.inner.cancelled().await;
    }

    /// Race a future against this token.
    ///
    /// Returns the future's output, or `Err(HecError::Cancelled)` if the
    /// token fires first. The raced future is dropped on cancellation.
    pub async fn guard<F>(&self, fut: F) -> Result<F::Output, HecError>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = self.triggered() => Err(HecError::Cancelled),
            out = fut => Ok(out),
        }
    }
}

#[derive(Debug, Default)]
struct GroupState {
    next_id: u64,
    live: HashMap<u64, CancelToken>,
    triggered: bool,
}

/// A set of live cancellation tokens with a collective trigger.
///
/// Once collectively triggered, the group is spent: further scoped
/// operations fail immediately with the cancellation sentinel.
#[derive(Debug, Clone, Default)]
pub struct CancelGroup {
    state: Arc<Mutex<GroupState>>,
}

/// Removes a token from its group on drop, so every exit path of
/// [`CancelGroup::scoped`] unregisters it.
struct Registration {
    state: Arc<Mutex<GroupState>>,
    id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.live.remove(&self.id);
        }
    }
}

impl CancelGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run an operation under a fresh member token.
    ///
    /// The token is removed from the group when the operation finishes,
    /// errors, or is dropped mid-flight. Fails immediately with
    /// `Cancelled` if the group has already been collectively triggered.
    pub async fn scoped<T, F, Fut>(&self, f: F) -> Result<T, HecError>
    where
        F: FnOnce(CancelToken) -> Fut,
        Fut: Future<Output = Result<T, HecError>>,
    {
        let (token, registration) = {
            let mut state = self.state.lock().expect("cancel group lock poisoned");
            if state.triggered {
                return Err(HecError::Cancelled);
            }
            let id = state.next_id;
            state.next_id += 1;
            let token = CancelToken::new();
            state.live.insert(id, token.clone());
            (token, Registration { state: Arc::clone(&self.state), id })
        };

        let result = f(token).await;
        drop(registration);
        result
    }

    /// Trigger every member token and empty the set.
    pub fn trigger_all(&self) {
        let drained: Vec<CancelToken> = {
            let mut state = self.state.lock().expect("cancel group lock poisoned");
            state.triggered = true;
            state.live.drain().map(|(_, t)| t).collect()
        };
        for token in drained {
            token.trigger();
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.state.lock().expect("cancel group lock poisoned").triggered
    }

    /// Number of currently live member tokens.
    pub fn len(&self) -> usize {
        self.state.lock().expect("cancel group lock poisoned").live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An operation participating in [`race_first`], with the token that
/// aborts it when a sibling settles first.
pub struct Contender<T> {
    pub token: Option<CancelToken>,
    pub fut: BoxFuture<'static, T>,
}

impl<T> Contender<T> {
    pub fn new(fut: impl Future<Output = T> + Send + 'static) -> Self {
        Self { token: None, fut: Box::pin(fut) }
    }

    pub fn with_token(token: CancelToken, fut: impl Future<Output = T> + Send + 'static) -> Self {
        Self { token: Some(token), fut: Box::pin(fut) }
    }
}

/// Run operations concurrently; when the first settles, trigger the
/// tokens of the rest and return the winner's output.
///
/// # Panics
///
/// Panics if `ops` is empty.
pub async fn race_first<T>(ops: Vec<Contender<T>>) -> T {
    assert!(!ops.is_empty(), "race_first requires at least one operation");
    let (tokens, futs): (Vec<_>, Vec<_>) = ops.into_iter().map(|c| (c.token, c.fut)).unzip();
    let (winner, winner_idx, rest) = select_all(futs).await;
    for (idx, token) in tokens.into_iter().enumerate() {
        if idx != winner_idx {
            if let Some(token) = token {
                token.trigger();
            }
        }
    }
    drop(rest);
    winner
}
