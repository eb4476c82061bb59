//! Connection admission.
//!
//! A counting semaphore bounds in-flight sessions. The limit is adjustable
//! online: `update_limit` swaps in a fresh semaphore sized `new - active`
//! under a write lock, so concurrent `try_acquire` readers see either the
//! old or the new semaphore, never a mid-resize state. Each successful
//! update is persisted to `conn_limit.json`; at startup a readable limit
//! file wins over the configured default, an unreadable one is only a
//! warning.

use axon_core::error::{Error, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{info, warn};

const LIMIT_FILE: &str = "conn_limit.json";

/// Default size of a signal/HTTP nudge
pub const DEFAULT_NUDGE: usize = 100;

#[derive(Debug, Serialize, Deserialize)]
struct LimitFile {
    max_connections: usize,
    last_updated: DateTime<Utc>,
}

/// Point-in-time admission numbers
#[derive(Debug, Clone, Serialize)]
pub struct LimiterStats {
    pub active: usize,
    pub max: usize,
    pub usage_pct: f64,
    pub free: usize,
}

/// Runtime-resizable session limiter
pub struct ConnectionLimiter {
    /// Swapped wholesale on resize; hold the read lock across acquire and
    /// release so a swap can't interleave
    sem: RwLock<Semaphore>,
    max: AtomicUsize,
    active: AtomicUsize,
    peers: DashMap<SocketAddr, Instant>,
    limit_path: PathBuf,
}

impl ConnectionLimiter {
    /// Build the limiter, preferring a persisted limit over `default_limit`.
    pub fn open<P: AsRef<Path>>(base: P, default_limit: usize) -> Result<Self> {
        let base = base.as_ref();
        std::fs::create_dir_all(base)?;
        let limit_path = base.join(LIMIT_FILE);

        let mut limit = default_limit.max(1);
        if limit_path.exists() {
            match std::fs::read(&limit_path)
                .map_err(Error::from)
                .and_then(|bytes| serde_json::from_slice::<LimitFile>(&bytes).map_err(Error::from))
            {
                Ok(persisted) if persisted.max_connections > 0 => {
                    limit = persisted.max_connections;
                    info!(limit, "using persisted connection limit");
                }
                Ok(_) => warn!("ignoring persisted connection limit of zero"),
                Err(e) => warn!("unreadable connection limit file: {}", e),
            }
        }

        Ok(ConnectionLimiter {
            sem: RwLock::new(Semaphore::new(limit)),
            max: AtomicUsize::new(limit),
            active: AtomicUsize::new(0),
            peers: DashMap::new(),
            limit_path,
        })
    }

    /// Non-blocking admission attempt. On success the caller owns one slot
    /// until `release`.
    pub fn try_acquire(&self, peer: SocketAddr) -> bool {
        let sem = self.sem.read();
        let acquired = sem.try_acquire();
        match acquired {
            Ok(permit) => {
                permit.forget();
                self.active.fetch_add(1, Ordering::SeqCst);
                self.peers.insert(peer, Instant::now());
                true
            }
            Err(_) => false,
        }
    }

    /// Return a slot.
    pub fn release(&self, peer: SocketAddr) {
        let sem = self.sem.read();
        self.peers.remove(&peer);
        self.active.fetch_sub(1, Ordering::SeqCst);
        sem.add_permits(1);
    }

    /// Replace the limit. Rejects zero and anything below the current
    /// active count; persists on success.
    pub fn update_limit(&self, new_limit: usize) -> Result<()> {
        if new_limit == 0 {
            return Err(Error::InvalidInput(
                "connection limit must be positive".into(),
            ));
        }
        let mut sem = self.sem.write();
        let active = self.active.load(Ordering::SeqCst);
        if new_limit < active {
            return Err(Error::InvalidInput(format!(
                "cannot set limit to {} with {} active connections",
                new_limit, active
            )));
        }
        *sem = Semaphore::new(new_limit - active);
        self.max.store(new_limit, Ordering::SeqCst);
        drop(sem);

        self.persist()?;
        info!(limit = new_limit, active, "connection limit updated");
        Ok(())
    }

    /// Raise the limit by `amount`.
    pub fn increase(&self, amount: usize) -> Result<usize> {
        let new_limit = self.max().saturating_add(amount);
        self.update_limit(new_limit)?;
        Ok(new_limit)
    }

    /// Lower the limit by `amount`; errors if that would drop below the
    /// active count.
    pub fn decrease(&self, amount: usize) -> Result<usize> {
        let new_limit = self.max().saturating_sub(amount).max(1);
        self.update_limit(new_limit)?;
        Ok(new_limit)
    }

    /// Lower the limit by `amount`, flooring at the active count instead of
    /// erroring (the signal-nudge path).
    pub fn decrease_clamped(&self, amount: usize) -> Result<usize> {
        let floor = self.active().max(1);
        let new_limit = self.max().saturating_sub(amount).max(floor);
        self.update_limit(new_limit)?;
        Ok(new_limit)
    }

    /// Current limit.
    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }

    /// Current in-flight session count.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Snapshot of the admission numbers.
    pub fn stats(&self) -> LimiterStats {
        let active = self.active();
        let max = self.max();
        LimiterStats {
            active,
            max,
            usage_pct: if max == 0 {
                0.0
            } else {
                active as f64 / max as f64 * 100.0
            },
            free: max.saturating_sub(active),
        }
    }

    fn persist(&self) -> Result<()> {
        let contents = serde_json::to_vec_pretty(&LimitFile {
            max_connections: self.max(),
            last_updated: Utc::now(),
        })?;
        let tmp = self.limit_path.with_extension("tmp");
        std::fs::write(&tmp, &contents)?;
        std::fs::File::open(&tmp)?.sync_all()?;
        std::fs::rename(&tmp, &self.limit_path)?;
        Ok(())
    }
}
