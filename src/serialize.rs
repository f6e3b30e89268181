//! Serialization of records into HEC wire envelopes
//!
//! The collector accepts newline-delimited JSON objects. Each record becomes
//! one envelope (multi-measurement metrics may fan out into several when the
//! multi-metric format is disabled). Key order is deterministic:
//! `serde_json`'s map keeps keys sorted, so a fixed input always produces
//! the same byte sequence.

use crate::HecError;
use bytes::Bytes;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Event timestamp, carried as milliseconds since the Unix epoch.
///
/// On the wire this becomes seconds with millisecond precision:
/// `1575029727123` serializes as `1575029727.123`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HecTime(i64);

impl HecTime {
    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    fn to_epoch_seconds(self) -> Option<Number> {
        Number::from_f64(self.0 as f64 / 1000.0)
    }
}

impl From<i64> for HecTime {
    fn from(ms: i64) -> Self {
        Self(ms)
    }
}

impl From<SystemTime> for HecTime {
    fn from(t: SystemTime) -> Self {
        match t.duration_since(UNIX_EPOCH) {
            Ok(d) => Self(d.as_millis() as i64),
            Err(e) => Self(-(e.duration().as_millis() as i64)),
        }
    }
}

impl From<Duration> for HecTime {
    fn from(since_epoch: Duration) -> Self {
        Self(since_epoch.as_millis() as i64)
    }
}

/// Routing metadata attached to a record.
///
/// Each field falls back to the client's default metadata when unset;
/// fields resolving to an empty string are omitted from the envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub host: Option<String>,
    pub source: Option<String>,
    pub sourcetype: Option<String>,
    pub index: Option<String>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn sourcetype(mut self, sourcetype: impl Into<String>) -> Self {
        self.sourcetype = Some(sourcetype.into());
        self
    }

    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    fn resolve<'a>(field: &'a Option<String>, default: &'a Option<String>) -> Option<&'a str> {
        field
            .as_deref()
            .or(default.as_deref())
            .filter(|s| !s.is_empty())
    }
}

/// Free-form event body: a plain string or a structured value.
#[derive(Debug, Clone, PartialEq)]
pub enum EventBody {
    Text(String),
    Structured(Value),
}

impl From<&str> for EventBody {
    fn from(s: &str) -> Self {
        EventBody::Text(s.to_string())
    }
}

impl From<String> for EventBody {
    fn from(s: String) -> Self {
        EventBody::Text(s)
    }
}

impl From<Value> for EventBody {
    fn from(v: Value) -> Self {
        EventBody::Structured(v)
    }
}

/// A free-form event record.
#[derive(Debug, Clone)]
pub struct Event {
    pub body: EventBody,
    pub time: Option<HecTime>,
    pub metadata: Metadata,
    pub fields: Option<Map<String, Value>>,
}

impl Event {
    pub fn new(body: impl Into<EventBody>) -> Self {
        Self { body: body.into(), time: None, metadata: Metadata::default(), fields: None }
    }

    pub fn time(mut self, time: impl Into<HecTime>) -> Self {
        self.time = Some(time.into());
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn fields(mut self, fields: Map<String, Value>) -> Self {
        self.fields = Some(fields);
        self
    }
}

/// A single named measurement.
#[derive(Debug, Clone)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    pub time: Option<HecTime>,
    pub metadata: Metadata,
    pub fields: Option<Map<String, Value>>,
}

impl Metric {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            time: None,
            metadata: Metadata::default(),
            fields: None,
        }
    }

    pub fn time(mut self, time: impl Into<HecTime>) -> Self {
        self.time = Some(time.into());
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn fields(mut self, fields: Map<String, Value>) -> Self {
        self.fields = Some(fields);
        self
    }
}

/// Measurements sharing one timestamp and one set of metadata.
#[derive(Debug, Clone)]
pub struct MultiMetric {
    pub measurements: BTreeMap<String, f64>,
    pub time: Option<HecTime>,
    pub metadata: Metadata,
    pub fields: Option<Map<String, Value>>,
}

impl MultiMetric {
    pub fn new(measurements: BTreeMap<String, f64>) -> Self {
        Self { measurements, time: None, metadata: Metadata::default(), fields: None }
    }

    pub fn time(mut self, time: impl Into<HecTime>) -> Self {
        self.time = Some(time.into());
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn fields(mut self, fields: Map<String, Value>) -> Self {
        self.fields = Some(fields);
        self
    }
}

/// A record accepted by the generic `push` entry point.
#[derive(Debug, Clone)]
pub enum Record {
    Event(Event),
    Metric(Metric),
}

impl From<Event> for Record {
    fn from(e: Event) -> Self {
        Record::Event(e)
    }
}

impl From<Metric> for Record {
    fn from(m: Metric) -> Self {
        Record::Metric(m)
    }
}

/// One or more wire envelopes, newline-terminated, ready to be
/// concatenated into a request body.
#[derive(Debug, Clone)]
pub struct SerializedMessage {
    bytes: Bytes,
}

impl SerializedMessage {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Deep-merge `overlay` into `base`: nested maps recurse, everything else
/// is replaced by the overlay value.
pub fn deep_merge(base: &mut Map<String, Value>, overlay: &Map<String, Value>) {
    for (key, value) in overlay {
        match (base.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Converts records into wire envelopes using the client's defaults.
#[derive(Debug, Clone)]
pub struct Serializer {
    default_metadata: Metadata,
    default_fields: Map<String, Value>,
    multi_metric_format: bool,
}

impl Serializer {
    pub fn new(
        default_metadata: Metadata,
        default_fields: Map<String, Value>,
        multi_metric_format: bool,
    ) -> Self {
        Self { default_metadata, default_fields, multi_metric_format }
    }

    pub fn serialize_event(&self, event: &Event) -> Result<SerializedMessage, HecError> {
        let fields = self.base_fields(event.fields.as_ref());
        let body = match &event.body {
            EventBody::Text(s) => Value::String(s.clone()),
            EventBody::Structured(v) => v.clone(),
        };
        let envelope = self.envelope(event.time, &event.metadata, fields, Some(body));
        finish(envelope)
    }

    pub fn serialize_metric(&self, metric: &Metric) -> Result<SerializedMessage, HecError> {
        if !metric.value.is_finite() {
            return Err(HecError::Serialization(format!(
                "metric {:?} has non-finite value {}",
                metric.name, metric.value
            )));
        }
        let mut fields = self.base_fields(metric.fields.as_ref());
        fields.insert("metric_name".to_string(), Value::String(metric.name.clone()));
        fields.insert("_value".to_string(), json_number(metric.value)?);
        let envelope = self.envelope(metric.time, &metric.metadata, fields, None);
        finish(envelope)
    }

    /// Serialize a multi-measurement record.
    ///
    /// With the multi-metric format enabled this is a single envelope with
    /// `metric_name:<k>` keys; disabled, it fans out into one single-metric
    /// envelope per measurement, all sharing the timestamp and metadata.
    pub fn serialize_multi_metric(
        &self,
        multi: &MultiMetric,
    ) -> Result<Vec<SerializedMessage>, HecError> {
        if let Some((name, value)) =
            multi.measurements.iter().find(|(_, v)| !v.is_finite())
        {
            return Err(HecError::Serialization(format!(
                "measurement {name:?} has non-finite value {value}"
            )));
        }

        if self.multi_metric_format {
            let mut fields = self.base_fields(multi.fields.as_ref());
            for (name, value) in &multi.measurements {
                fields.insert(format!("metric_name:{name}"), json_number(*value)?);
            }
            let envelope = self.envelope(multi.time, &multi.metadata, fields, None);
            Ok(vec![finish(envelope)?])
        } else {
            multi
                .measurements
                .iter()
                .map(|(name, value)| {
                    let metric = Metric {
                        name: name.clone(),
                        value: *value,
                        time: multi.time,
                        metadata: multi.metadata.clone(),
                        fields: multi.fields.clone(),
                    };
                    self.serialize_metric(&metric)
                })
                .collect()
        }
    }

    pub fn serialize_record(&self, record: &Record) -> Result<SerializedMessage, HecError> {
        match record {
            Record::Event(e) => self.serialize_event(e),
            Record::Metric(m) => self.serialize_metric(m),
        }
    }

    /// Client default fields with the record's own deep-merged on top.
    fn base_fields(&self, record_fields: Option<&Map<String, Value>>) -> Map<String, Value> {
        let mut fields = self.default_fields.clone();
        if let Some(own) = record_fields {
            deep_merge(&mut fields, own);
        }
        fields
    }

    fn envelope(
        &self,
        time: Option<HecTime>,
        metadata: &Metadata,
        fields: Map<String, Value>,
        event: Option<Value>,
    ) -> Map<String, Value> {
        let mut envelope = Map::new();
        if let Some(number) = time.and_then(HecTime::to_epoch_seconds) {
            envelope.insert("time".to_string(), Value::Number(number));
        }
        let defaults = &self.default_metadata;
        for (key, value, default) in [
            ("host", &metadata.host, &defaults.host),
            ("source", &metadata.source, &defaults.source),
            ("sourcetype", &metadata.sourcetype, &defaults.sourcetype),
            ("index", &metadata.index, &defaults.index),
        ] {
            if let Some(resolved) = Metadata::resolve(value, default) {
                envelope.insert(key.to_string(), Value::String(resolved.to_string()));
            }
        }
        envelope.insert("fields".to_string(), Value::Object(fields));
        if let Some(body) = event {
            envelope.insert("event".to_string(), body);
        }
        envelope
    }
}

fn json_number(value: f64) -> Result<Value, HecError> {
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| HecError::Serialization(format!("non-finite number {value}")))
}

fn finish(envelope: Map<String, Value>) -> Result<SerializedMessage, HecError> {
    let mut bytes = serde_json::to_vec(&Value::Object(envelope))
        .map_err(|e| HecError::Serialization(e.to_string()))?;
    bytes.push(b'\n');
    Ok(SerializedMessage { bytes: Bytes::from(bytes) })
}
