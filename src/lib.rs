#![forbid(unsafe_code)]

//! # hec-sink
//!
//! A batching, retrying, back-pressured ingestion client for the Splunk
//! HTTP Event Collector (HEC).
//!
//! ## Features
//!
//! - **Batching** on byte threshold, entry threshold, or idle timer
//! - **Concurrent in-flight flushes**, each retrying independently with
//!   configurable backoff (constant, linear, exponential)
//! - **Cooperative cancellation** honoured mid-request and mid-sleep
//! - **Bit-exact wire envelopes** for events, metrics, and
//!   multi-measurement metrics
//! - **Orderly shutdown**: drain under a deadline, cancel the rest
//!
//! ## Quick Start
//!
//! ```no_run
//! use hec_sink::{Event, HecClient, HecConfig, Metadata, Metric};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), hec_sink::HecError> {
//!     let config = HecConfig::builder("https://hec.example.com:8088/services/collector")
//!         .token("00000000-0000-0000-0000-000000000000")
//!         .gzip(true)
//!         .default_metadata(Metadata::new().host("worker-1").index("main"))
//!         .finish()?;
//!     let client = HecClient::new(config)?;
//!
//!     client.push_event(&Event::new("service started"))?;
//!     client.push_metric(&Metric::new("queue.depth", 42.0))?;
//!
//!     client.flush().await?;
//!     client.shutdown(Some(Duration::from_secs(5))).await;
//!     Ok(())
//! }
//! ```

mod backoff;
mod cancel;
mod client;
mod compress;
mod config;
mod error;
mod retry;
mod serialize;
mod sleeper;
mod stats;
mod transport;

// Re-exports
pub use backoff::Backoff;
pub use cancel::{race_first, CancelGroup, CancelToken, Contender};
pub use client::HecClient;
pub use compress::gzip;
pub use config::{ConfigOverrides, HecConfig, HecConfigBuilder};
pub use error::HecError;
pub use retry::{retry, RetryOptions};
pub use serialize::{
    deep_merge, Event, EventBody, HecTime, Metadata, Metric, MultiMetric, Record,
    SerializedMessage, Serializer,
};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use stats::{Aggregate, CounterSnapshot, Counters, HecStats};
pub use transport::{HttpSettings, PoolStatus, Transport};

pub mod prelude;
