//! Keyed connection pool for Flight SQL clients
//!
//! One mutex guards the map; it is held only for O(1) map operations and
//! never across a connect or close. The per-entry in-use flag is atomic
//! because health checks read it between lookup and marking.

use crate::client::FlightClient;
use duckarrow_common::{ConnectionConfig, Result};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const DEFAULT_MAX_IDLE: Duration = Duration::from_secs(300);

#[derive(Debug)]
struct PoolEntry {
    client: Arc<FlightClient>,
    in_use: AtomicBool,
    last_used: Mutex<Instant>,
}

impl PoolEntry {
    fn new(client: Arc<FlightClient>) -> Self {
        Self {
            client,
            in_use: AtomicBool::new(true),
            last_used: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_used
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }
}

/// A borrowed-or-owned client. Pooled connections go back through
/// [`Pool::release`]; unmanaged ones are closed by the caller.
#[derive(Debug)]
pub struct ConnectionResult {
    pub client: Arc<FlightClient>,
    pub pooled: bool,
}

/// Reusable Flight SQL connections keyed by the config digest.
#[derive(Debug)]
pub struct Pool {
    entries: Mutex<HashMap<String, Arc<PoolEntry>>>,
    max_idle: Duration,
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

enum GetPlan {
    Reuse(Arc<FlightClient>),
    Contended,
    Connect,
}

impl Pool {
    pub fn new() -> Self {
        Self::with_max_idle(DEFAULT_MAX_IDLE)
    }

    pub fn with_max_idle(max_idle: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_idle,
        }
    }

    /// Get a connection for the config, reusing a pooled entry when it is
    /// free, healthy, and fresh. A busy entry is never waited on: the
    /// caller gets a fresh unmanaged connection instead, sidestepping
    /// head-of-line blocking between scans that share credentials.
    pub async fn get(&self, config: &ConnectionConfig) -> Result<ConnectionResult> {
        let key = config.pool_key();

        let (plan, evicted) = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            let plan = match entries.get(&key) {
                Some(entry) if entry.in_use.load(Ordering::Acquire) => GetPlan::Contended,
                Some(entry) if entry.client.is_healthy() && entry.idle_for() < self.max_idle => {
                    entry.in_use.store(true, Ordering::Release);
                    entry.touch();
                    GetPlan::Reuse(entry.client.clone())
                }
                Some(_) => GetPlan::Connect,
                None => GetPlan::Connect,
            };
            // A stale or unhealthy entry leaves the map here; it is
            // closed below, outside the lock.
            let evicted = match plan {
                GetPlan::Connect => entries.remove(&key).map(|entry| entry.client.clone()),
                _ => None,
            };
            (plan, evicted)
        };

        match plan {
            GetPlan::Reuse(client) => {
                tracing::debug!(uri = %config.uri, "reusing pooled Flight SQL connection");
                Ok(ConnectionResult {
                    client,
                    pooled: true,
                })
            }
            GetPlan::Contended => {
                tracing::debug!(uri = %config.uri, "pooled connection busy, opening unmanaged connection");
                let client = Arc::new(FlightClient::connect(config).await?);
                Ok(ConnectionResult {
                    client,
                    pooled: false,
                })
            }
            GetPlan::Connect => {
                if let Some(stale) = evicted {
                    tracing::debug!(uri = %config.uri, "evicting stale pooled connection");
                    stale.close();
                }
                let client = Arc::new(FlightClient::connect(config).await?);
                let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
                match entries.entry(key) {
                    Entry::Vacant(slot) => {
                        slot.insert(Arc::new(PoolEntry::new(client.clone())));
                        Ok(ConnectionResult {
                            client,
                            pooled: true,
                        })
                    }
                    Entry::Occupied(_) => {
                        // Another task installed this key while we were
                        // connecting; hand ours out unmanaged.
                        Ok(ConnectionResult {
                            client,
                            pooled: false,
                        })
                    }
                }
            }
        }
    }

    /// Return a pooled connection. Unknown keys are a no-op.
    pub fn release(&self, config: &ConnectionConfig) {
        let key = config.pool_key();
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get(&key) {
            entry.touch();
            entry.in_use.store(false, Ordering::Release);
        }
    }

    /// Release a borrowed connection per its origin: pooled entries go
    /// back to the pool, unmanaged ones close outright.
    pub fn release_or_close(&self, config: &ConnectionConfig, result: &ConnectionResult) {
        if result.pooled {
            self.release(config);
        } else {
            result.client.close();
        }
    }

    /// Close and drop every entry. Safe to call repeatedly and
    /// concurrently with get/release.
    pub fn close(&self) {
        let drained: Vec<Arc<PoolEntry>> = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            entry.client.close();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
