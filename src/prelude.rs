//! Convenience re-exports for consumers.
//!
//! ```rust
//! use hec_sink::prelude::*;
//! ```

pub use crate::{
    Backoff, ConfigOverrides, Event, EventBody, HecClient, HecConfig, HecError, HecStats,
    HecTime, Metadata, Metric, MultiMetric, Record,
};
