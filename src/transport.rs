//! HTTP transport policy
//!
//! One pooled `reqwest` client per endpoint URL. A process-wide weak-valued
//! registry lets independently constructed clients (and clones) pointing at
//! the same URL share one connection pool, so cloning for per-tenant
//! configuration does not multiply the TCP footprint.

use crate::HecError;
use reqwest::{Client, Url};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

/// Connection-pool knobs resolved from the client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    /// Keep idle connections alive between requests.
    pub keep_alive: bool,
    /// Cap on pooled sockets per host.
    pub max_sockets_per_host: usize,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Verify the peer certificate for HTTPS endpoints.
    pub validate_certificate: bool,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            keep_alive: true,
            max_sockets_per_host: 128,
            timeout: Duration::from_secs(30),
            validate_certificate: true,
        }
    }
}

#[derive(Debug)]
struct TransportInner {
    client: Client,
    settings: HttpSettings,
    key: String,
}

/// Snapshot of the pool for stats reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Number of live transport handles sharing this pool.
    pub handles: usize,
    pub max_sockets_per_host: usize,
    pub keep_alive: bool,
}

/// Shared handle to a pooled HTTP client.
#[derive(Debug, Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

fn registry() -> &'static Mutex<HashMap<String, Weak<TransportInner>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Weak<TransportInner>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

impl Transport {
    /// Look up or create the pool for `url`.
    ///
    /// An existing live pool for the same URL is reused regardless of
    /// `settings`; the first construction wins.
    pub fn for_url(url: &Url, settings: &HttpSettings) -> Result<Self, HecError> {
        let key = url.as_str().to_string();
        let mut map = registry().lock().expect("transport registry lock poisoned");
        map.retain(|_, weak| weak.strong_count() > 0);
        if let Some(inner) = map.get(&key).and_then(Weak::upgrade) {
            return Ok(Self { inner });
        }
        let inner = Arc::new(TransportInner {
            client: build_client(settings)?,
            settings: settings.clone(),
            key: key.clone(),
        });
        map.insert(key, Arc::downgrade(&inner));
        Ok(Self { inner })
    }

    pub fn client(&self) -> &Client {
        &self.inner.client
    }

    pub fn settings(&self) -> &HttpSettings {
        &self.inner.settings
    }

    /// Whether two handles share one connection pool.
    pub fn same_pool(&self, other: &Transport) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            handles: Arc::strong_count(&self.inner),
            max_sockets_per_host: self.inner.settings.max_sockets_per_host,
            keep_alive: self.inner.settings.keep_alive,
        }
    }
}

impl Drop for TransportInner {
    fn drop(&mut self) {
        if let Ok(mut map) = registry().lock() {
            if map.get(&self.key).is_some_and(|weak| weak.strong_count() == 0) {
                map.remove(&self.key);
            }
        }
    }
}

fn build_client(settings: &HttpSettings) -> Result<Client, HecError> {
    let mut builder = Client::builder().timeout(settings.timeout);
    builder = if settings.keep_alive {
        builder
            .pool_max_idle_per_host(settings.max_sockets_per_host)
            .pool_idle_timeout(Duration::from_secs(90))
    } else {
        builder.pool_max_idle_per_host(0)
    };
    if !settings.validate_certificate {
        builder = builder.danger_accept_invalid_certs(true);
    }
    builder
        .build()
        .map_err(|e| HecError::Config(format!("failed to create HTTP client: {e}")))
}
