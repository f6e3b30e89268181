//! The batching HEC collector client
//!
//! Producers push individual records; the client serializes them into an
//! in-memory queue and flushes on a byte threshold, an entry threshold, or
//! an idle timer. Each flush is an independent in-flight send that retries
//! with backoff and can be cancelled collectively on shutdown.
//!
//! Locking discipline: the queue and the active-flush set are guarded by
//! mutexes held only around enqueue/dequeue/registration, never across
//! network I/O or sleeps.

use crate::cancel::{race_first, CancelGroup, CancelToken, Contender};
use crate::compress::gzip;
use crate::config::{ConfigOverrides, HecConfig};
use crate::retry::{retry, RetryOptions};
use crate::serialize::{Event, Metric, MultiMetric, Record, SerializedMessage, Serializer};
use crate::stats::{Aggregate, Counters, HecStats};
use crate::transport::Transport;
use crate::{Backoff, HecError};
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_LENGTH, USER_AGENT};
use serde_json::Map;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Terminal state of one in-flight flush.
#[derive(Debug, Clone)]
enum FlushOutcome {
    Sent,
    Cancelled,
    Failed(HecError),
}

impl FlushOutcome {
    fn into_result(self) -> Result<(), HecError> {
        match self {
            FlushOutcome::Sent => Ok(()),
            FlushOutcome::Cancelled => Err(HecError::Cancelled),
            FlushOutcome::Failed(e) => Err(e),
        }
    }
}

type DoneSignal = watch::Receiver<Option<FlushOutcome>>;

/// One in-flight send: its cancellation trigger and completion signal.
///
/// A handle is in the active set iff its completion signal has not fired.
#[derive(Debug)]
struct FlushHandle {
    cancel: Option<CancelToken>,
    done: DoneSignal,
}

#[derive(Debug, Default)]
struct QueueState {
    messages: Vec<SerializedMessage>,
    bytes: usize,
    idle_timer: Option<tokio::task::JoinHandle<()>>,
}

struct ClientInner {
    config: HecConfig,
    serializer: Serializer,
    transport: Transport,
    active: AtomicBool,
    queue: Mutex<QueueState>,
    flushes: Mutex<HashMap<u64, FlushHandle>>,
    flush_group: CancelGroup,
    next_flush_id: AtomicU64,
    counters: Arc<Counters>,
    request_duration: Aggregate,
    batch_size: Aggregate,
    batch_size_bytes: Aggregate,
    batch_size_compressed: Aggregate,
}

/// Batching, retrying, back-pressured HEC ingestion client.
///
/// Cloning yields another handle to the same client; use
/// [`clone_with`](Self::clone_with) to derive a client with different
/// configuration.
#[derive(Clone)]
pub struct HecClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for HecClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HecClient")
            .field("url", &self.inner.config.url.as_str())
            .field("active", &self.is_active())
            .finish()
    }
}

impl HecClient {
    /// Build a client from a resolved configuration.
    pub fn new(config: HecConfig) -> Result<Self, HecError> {
        let transport = Transport::for_url(&config.url, &config.http_settings())?;
        Ok(Self::from_parts(config, transport))
    }

    fn from_parts(config: HecConfig, transport: Transport) -> Self {
        let serializer = Serializer::new(
            config.default_metadata.clone(),
            config.default_fields.clone(),
            config.multi_metric_format,
        );
        Self {
            inner: Arc::new(ClientInner {
                config,
                serializer,
                transport,
                active: AtomicBool::new(true),
                queue: Mutex::new(QueueState::default()),
                flushes: Mutex::new(HashMap::new()),
                flush_group: CancelGroup::new(),
                next_flush_id: AtomicU64::new(0),
                counters: Arc::new(Counters::default()),
                request_duration: Aggregate::new(),
                batch_size: Aggregate::new(),
                batch_size_bytes: Aggregate::new(),
                batch_size_compressed: Aggregate::new(),
            }),
        }
    }

    /// Whether two values are handles to the same client instance.
    pub fn same_instance(&self, other: &HecClient) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &HecConfig {
        &self.inner.config
    }

    /// Number of serialized messages currently queued.
    pub fn queue_depth(&self) -> usize {
        self.inner.queue.lock().expect("queue lock poisoned").messages.len()
    }

    /// Tracked byte total of the queue.
    pub fn queue_size_bytes(&self) -> usize {
        self.inner.queue.lock().expect("queue lock poisoned").bytes
    }

    /// Enqueue a record, dispatching on its shape.
    pub fn push(&self, record: impl Into<Record>) -> Result<(), HecError> {
        match record.into() {
            Record::Event(event) => self.push_event(&event),
            Record::Metric(metric) => self.push_metric(&metric),
        }
    }

    pub fn push_event(&self, event: &Event) -> Result<(), HecError> {
        self.ensure_active()?;
        let msg = self.inner.serializer.serialize_event(event)?;
        self.push_serialized(msg);
        Ok(())
    }

    pub fn push_metric(&self, metric: &Metric) -> Result<(), HecError> {
        self.ensure_active()?;
        let msg = self.inner.serializer.serialize_metric(metric)?;
        self.push_serialized(msg);
        Ok(())
    }

    /// Enqueue a multi-measurement record (one envelope, or one per
    /// measurement when the multi-metric format is disabled).
    pub fn push_metrics(&self, multi: &MultiMetric) -> Result<(), HecError> {
        self.ensure_active()?;
        for msg in self.inner.serializer.serialize_multi_metric(multi)? {
            self.push_serialized(msg);
        }
        Ok(())
    }

    fn ensure_active(&self) -> Result<(), HecError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(HecError::Shutdown)
        }
    }

    fn push_serialized(&self, msg: SerializedMessage) {
        let len = msg.len();
        self.inner.counters.queued_messages.fetch_add(1, Ordering::Relaxed);
        self.inner.counters.queued_bytes.fetch_add(len as u64, Ordering::Relaxed);

        // The current batch goes out without the newcomer, so a batch can
        // exceed max_queue_size by at most one message.
        let crosses_threshold = {
            let queue = self.inner.queue.lock().expect("queue lock poisoned");
            queue.bytes + len > self.inner.config.max_queue_size
        };
        if crosses_threshold {
            debug!(queued_bytes = len, "queue byte threshold reached, flushing");
            self.dispatch_flush();
        }

        {
            let mut queue = self.inner.queue.lock().expect("queue lock poisoned");
            queue.messages.push(msg);
            queue.bytes += len;
        }
        self.schedule_flush();
    }

    fn schedule_flush(&self) {
        if let Some(cap) = self.inner.config.max_queue_entries {
            let depth = self.queue_depth();
            if depth > cap {
                debug!(depth, cap, "queue entry threshold reached, flushing");
                self.dispatch_flush();
                return;
            }
        }

        let mut queue = self.inner.queue.lock().expect("queue lock poisoned");
        if queue.idle_timer.is_some() || queue.messages.is_empty() {
            return;
        }
        let client = self.clone();
        let delay = self.inner.config.flush_time;
        queue.idle_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Clear our own slot first so dispatch doesn't abort this task.
            client.inner.queue.lock().expect("queue lock poisoned").idle_timer = None;
            client.dispatch_flush();
        }));
    }

    /// Move the queue into a new in-flight flush and start the send.
    ///
    /// Returns the completion signal, or `None` when the queue was empty.
    fn dispatch_flush(&self) -> Option<DoneSignal> {
        let batch = {
            let mut queue = self.inner.queue.lock().expect("queue lock poisoned");
            if let Some(timer) = queue.idle_timer.take() {
                timer.abort();
            }
            if queue.messages.is_empty() {
                return None;
            }
            queue.bytes = 0;
            std::mem::take(&mut queue.messages)
        };

        let id = self.inner.next_flush_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        self.inner
            .flushes
            .lock()
            .expect("flush set lock poisoned")
            .insert(id, FlushHandle { cancel: None, done: rx.clone() });

        let client = self.clone();
        tokio::spawn(async move {
            let inner = &client.inner;
            let result = inner
                .flush_group
                .scoped(|token| {
                    if let Some(handle) =
                        inner.flushes.lock().expect("flush set lock poisoned").get_mut(&id)
                    {
                        handle.cancel = Some(token.clone());
                    }
                    inner.send_batch(batch, token)
                })
                .await;
            let outcome = match result {
                Ok(()) => FlushOutcome::Sent,
                Err(e) if e.is_cancelled() => FlushOutcome::Cancelled,
                Err(e) => FlushOutcome::Failed(e),
            };
            inner.flushes.lock().expect("flush set lock poisoned").remove(&id);
            let _ = tx.send(Some(outcome));
        });
        Some(rx)
    }

    /// Wait until every currently in-flight flush and the outstanding
    /// queue content have completed sending.
    ///
    /// New pushes are not blocked; batches dispatched after this call is
    /// made are not waited for. The first failure or cancellation among
    /// the awaited batches is surfaced.
    pub async fn flush(&self) -> Result<(), HecError> {
        self.dispatch_flush();
        let waiters: Vec<DoneSignal> = self
            .inner
            .flushes
            .lock()
            .expect("flush set lock poisoned")
            .values()
            .map(|h| h.done.clone())
            .collect();

        let mut result = Ok(());
        for rx in waiters {
            let outcome = wait_done(rx).await;
            if result.is_ok() {
                result = outcome.into_result();
            }
        }
        result
    }

    /// One-shot health probe: 2xx from the collector's health endpoint.
    pub async fn check_available(&self) -> Result<(), HecError> {
        let response = self
            .inner
            .transport
            .client()
            .get(self.inner.config.health_url())
            .header(USER_AGENT, &self.inner.config.user_agent)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(HecError::transport_status(status.as_u16()))
        }
    }

    /// Poll [`check_available`](Self::check_available) until it succeeds
    /// or `max_time` elapses.
    pub async fn wait_until_available(&self, max_time: Duration) -> Result<(), HecError> {
        let failed_once = Arc::new(AtomicBool::new(false));
        let flag = failed_once.clone();
        let options = RetryOptions::new("hec-availability")
            .overall_timeout(max_time)
            .backoff(Backoff::linear(
                Duration::from_millis(500),
                Duration::from_millis(250),
                Duration::from_millis(2500),
            ))
            .on_error(move |_, _| flag.store(true, Ordering::Relaxed));

        retry(options, || self.check_available()).await?;
        if failed_once.load(Ordering::Relaxed) {
            info!(url = %self.inner.config.url, "HEC became available");
        }
        Ok(())
    }

    /// Stop accepting records, drain under the deadline, cancel the rest.
    ///
    /// With `max_time` set, a final [`flush`](Self::flush) races a sleep of
    /// that duration; anything still in flight when the race resolves is
    /// cancelled and its bytes are lost. Without a deadline outstanding
    /// work is cancelled immediately. Never fails.
    pub async fn shutdown(&self, max_time: Option<Duration>) {
        self.inner.active.store(false, Ordering::SeqCst);
        if let Some(timer) =
            self.inner.queue.lock().expect("queue lock poisoned").idle_timer.take()
        {
            timer.abort();
        }

        let outstanding = self.active_flush_count() > 0 || self.queue_depth() > 0;
        if outstanding {
            if let Some(limit) = max_time {
                let draining = self.clone();
                race_first(vec![
                    Contender::new(async move {
                        let _ = draining.flush().await;
                    }),
                    Contender::new(tokio::time::sleep(limit)),
                ])
                .await;
            }
        }

        let dropped_queued = self.queue_depth();
        let survivors: Vec<CancelToken> = {
            let flushes = self.inner.flushes.lock().expect("flush set lock poisoned");
            flushes.values().filter_map(|h| h.cancel.clone()).collect()
        };
        let cancelled = survivors.len();
        for token in survivors {
            token.trigger();
        }
        // Spend the group so late dispatches resolve cancelled too.
        self.inner.flush_group.trigger_all();
        if dropped_queued > 0 || cancelled > 0 {
            warn!(
                queued = dropped_queued,
                in_flight = cancelled,
                "shut down with outstanding work; cancelling"
            );
        } else {
            info!("shut down cleanly");
        }
    }

    /// Derive a client from this one.
    ///
    /// Empty overrides return the same instance. A changed URL produces a
    /// wholly new client with its own connection pool; any other change
    /// produces a client with the merged configuration sharing this one's
    /// transport.
    pub fn clone_with(&self, overrides: ConfigOverrides) -> Result<HecClient, HecError> {
        let overrides = overrides.normalized();
        if overrides.is_empty() {
            return Ok(self.clone());
        }
        if overrides.changes_url(&self.inner.config) {
            let merged = overrides.apply(&self.inner.config)?;
            return HecClient::new(merged);
        }
        let merged = overrides.apply(&self.inner.config)?;
        Ok(HecClient::from_parts(merged, self.inner.transport.clone()))
    }

    /// Snapshot the counters, snapshot-and-reset the aggregates.
    pub fn flush_stats(&self) -> HecStats {
        let inner = &self.inner;
        let mut aggregates = Map::new();
        inner.request_duration.flush("request_duration", &mut aggregates);
        inner.batch_size.flush("batch_size", &mut aggregates);
        inner.batch_size_bytes.flush("batch_size_bytes", &mut aggregates);
        inner.batch_size_compressed.flush("batch_size_compressed", &mut aggregates);
        let (queue_depth, queue_size_bytes) = {
            let queue = inner.queue.lock().expect("queue lock poisoned");
            (queue.messages.len(), queue.bytes)
        };
        HecStats {
            counters: inner.counters.snapshot(),
            aggregates,
            pool: inner.transport.status(),
            active_flushes: self.active_flush_count(),
            queue_depth,
            queue_size_bytes,
        }
    }

    fn active_flush_count(&self) -> usize {
        self.inner.flushes.lock().expect("flush set lock poisoned").len()
    }
}

async fn wait_done(mut rx: DoneSignal) -> FlushOutcome {
    loop {
        if let Some(outcome) = rx.borrow().clone() {
            return outcome;
        }
        if rx.changed().await.is_err() {
            // Sender dropped without reporting; the flush task was torn down.
            return FlushOutcome::Cancelled;
        }
    }
}

impl ClientInner {
    /// Send one batch, retrying per the configured wait strategy.
    ///
    /// The batch is concatenated once; the resulting `Bytes` body is cloned
    /// per attempt so the wire bytes stay re-sendable.
    async fn send_batch(
        &self,
        batch: Vec<SerializedMessage>,
        token: CancelToken,
    ) -> Result<(), HecError> {
        let count = batch.len();
        let raw_bytes: usize = batch.iter().map(SerializedMessage::len).sum();
        self.batch_size.observe(count as f64);
        self.batch_size_bytes.observe(raw_bytes as f64);

        let mut buf = Vec::with_capacity(raw_bytes);
        for msg in &batch {
            buf.extend_from_slice(msg.as_bytes());
        }
        let body = if self.config.gzip {
            let compressed = gzip(&buf)?;
            self.batch_size_compressed.observe(compressed.len() as f64);
            compressed
        } else {
            Bytes::from(buf)
        };
        let wire_bytes = body.len();

        let counters = Arc::clone(&self.counters);
        let options = RetryOptions::new("hec-send")
            .max_retries(self.config.max_retries)
            .backoff(self.config.retry_wait_time.clone())
            .cancel(token)
            .on_error({
                let counters = Arc::clone(&counters);
                move |_, _| {
                    counters.retry_count.fetch_add(1, Ordering::Relaxed);
                }
            });

        retry(options, || self.post_once(body.clone())).await?;

        counters.sent_messages.fetch_add(count as u64, Ordering::Relaxed);
        counters.sent_bytes.fetch_add(raw_bytes as u64, Ordering::Relaxed);
        counters.transferred_bytes.fetch_add(wire_bytes as u64, Ordering::Relaxed);
        debug!(count, raw_bytes, wire_bytes, "batch sent");
        Ok(())
    }

    /// One POST attempt against the ingest endpoint.
    async fn post_once(&self, body: Bytes) -> Result<(), HecError> {
        let start = Instant::now();
        let result = self.try_post(body).await;
        self.request_duration.observe(start.elapsed().as_secs_f64() * 1000.0);
        if result.is_err() {
            self.counters.error_count.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    async fn try_post(&self, body: Bytes) -> Result<(), HecError> {
        let config = &self.config;
        let mut request = self
            .transport
            .client()
            .post(config.url.clone())
            .header(CONTENT_LENGTH, body.len())
            .header(USER_AGENT, &config.user_agent);
        if let Some(token) = &config.token {
            request = request.header(AUTHORIZATION, format!("Splunk {token}"));
        }
        if config.gzip {
            request = request.header(CONTENT_ENCODING, "gzip");
        }

        let response = request.body(body).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(HecError::transport_status(status.as_u16()))
        }
    }
}
