//! Key-value engine.
//!
//! An append-only record log with an ordered key index, a coalescing write
//! batch and a write-ahead log. Data file records:
//!
//! ```text
//! [key_size u32 LE][val_size u32 LE][key bytes][value bytes]
//! ```
//!
//! Deletes append a header-only record (`val_size = 0`) and drop the key
//! from the index; the value `__deleted__` is an additional in-band
//! tombstone consumed on read.
//!
//! Writes land in an in-memory batch and return immediately; a background
//! flusher empties the batch about once a second. `get` reads through the
//! batch first, so a session always sees its own unflushed writes. A flush
//! writes every pair to the WAL, appends the records, fsyncs, marks the WAL
//! committed and clears it past the checkpoint threshold. A failed flush
//! drops the batch: callers needing stronger guarantees flush explicitly
//! before treating a `put` as durable.

use crate::index::OrderedIndex;
use axon_core::error::{Error, Result};
use axon_durability::Wal;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// In-band tombstone value
pub const TOMBSTONE: &str = "__deleted__";

/// Auto-flusher tick
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Fixed bytes before the key in a data record
const RECORD_HEADER: u64 = 8;

struct DataFile {
    file: File,
    /// Current file length, also the next append offset
    len: u64,
}

struct KvInner {
    /// Pending writes, coalesced per key
    batch: Mutex<HashMap<String, String>>,
    /// Guards the data file position, index updates and WAL commit sequencing
    data: RwLock<DataFile>,
    index: OrderedIndex,
    wal: Option<Wal>,
    /// Single-flight guard for the periodic flusher
    flush_gate: Mutex<()>,
    closed: AtomicBool,
}

/// Append-only key-value engine with batched writes and WAL recovery
pub struct KvEngine {
    inner: Arc<KvInner>,
    flusher: Mutex<Option<JoinHandle<()>>>,
    shutdown: Mutex<Option<Sender<()>>>,
}

impl KvEngine {
    /// Open the engine against a space directory (`data.db`, `index.dat`,
    /// `wal.db`), replaying the WAL before the engine becomes visible.
    pub fn open<P: AsRef<Path>>(dir: P, wal_enabled: bool) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(dir.join("data.db"))?;
        let len = file.metadata()?.len();

        let index = OrderedIndex::open(dir.join("index.dat"))?;
        let wal = if wal_enabled {
            Some(Wal::open(dir.join("wal.db"))?)
        } else {
            None
        };

        let inner = Arc::new(KvInner {
            batch: Mutex::new(HashMap::new()),
            data: RwLock::new(DataFile { file, len }),
            index,
            wal,
            flush_gate: Mutex::new(()),
            closed: AtomicBool::new(false),
        });

        inner.recover()?;

        let (tx, rx) = mpsc::channel();
        let worker = Arc::clone(&inner);
        let handle = std::thread::Builder::new()
            .name("axon-kv-flush".into())
            .spawn(move || loop {
                match rx.recv_timeout(FLUSH_INTERVAL) {
                    Err(RecvTimeoutError::Timeout) => {
                        if let Err(e) = worker.try_flush() {
                            warn!("periodic flush failed: {}", e);
                        }
                    }
                    _ => break,
                }
            })
            .map_err(|e| Error::Storage(format!("failed to spawn flusher: {}", e)))?;

        Ok(KvEngine {
            inner,
            flusher: Mutex::new(Some(handle)),
            shutdown: Mutex::new(Some(tx)),
        })
    }

    /// Stage a write in the batch. Visible to `get` immediately; durable
    /// after the next flush.
    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        self.inner.check_open()?;
        self.inner
            .batch
            .lock()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Read a key: the batch first, then the index and data file.
    pub fn get(&self, key: &str) -> Result<String> {
        self.inner.check_open()?;
        self.inner.get(key)
    }

    /// Delete a key: tombstone the batch, log the delete, append a
    /// header-only record and drop the index entry.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.inner.check_open()?;
        self.inner.delete(key)
    }

    /// Flush the pending batch synchronously.
    pub fn flush(&self) -> Result<()> {
        self.inner.check_open()?;
        self.inner.flush()
    }

    /// Number of indexed keys (excludes unflushed batch entries).
    pub fn indexed_keys(&self) -> usize {
        self.inner.index.len()
    }

    /// Stop the flusher, run one final flush, clear the WAL and release the
    /// files. Idempotent; later operations fail with a closed error.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.flusher.lock().take() {
            let _ = handle.join();
        }
        self.inner.flush()?;
        if let Some(wal) = &self.inner.wal {
            wal.clear()?;
        }
        self.inner.index.close()?;
        debug!("kv engine closed");
        Ok(())
    }
}

impl Drop for KvEngine {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl KvInner {
    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    fn get(&self, key: &str) -> Result<String> {
        if let Some(value) = self.batch.lock().get(key) {
            if value == TOMBSTONE {
                return Err(Error::KeyDeleted(key.to_string()));
            }
            return Ok(value.clone());
        }

        let offset = self
            .index
            .get(key)
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))?;

        let data = self.data.read();
        let mut header = [0u8; 8];
        data.file.read_exact_at(&mut header, offset)?;
        let key_size = u32::from_le_bytes(header[0..4].try_into().unwrap()) as usize;
        let val_size = u32::from_le_bytes(header[4..8].try_into().unwrap()) as usize;

        let mut stored_key = vec![0u8; key_size];
        data.file.read_exact_at(&mut stored_key, offset + RECORD_HEADER)?;
        if stored_key != key.as_bytes() {
            return Err(Error::Corruption(format!(
                "key mismatch at position {}",
                offset
            )));
        }
        if val_size == 0 {
            return Err(Error::KeyDeleted(key.to_string()));
        }

        let mut value = vec![0u8; val_size];
        data.file
            .read_exact_at(&mut value, offset + RECORD_HEADER + key_size as u64)?;
        let value = String::from_utf8(value)
            .map_err(|_| Error::Corruption(format!("non-UTF-8 value at position {}", offset)))?;
        if value == TOMBSTONE {
            return Err(Error::KeyDeleted(key.to_string()));
        }
        Ok(value)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.batch
            .lock()
            .insert(key.to_string(), TOMBSTONE.to_string());

        let mut data = self.data.write();
        if let Some(wal) = &self.wal {
            wal.write_delete(key.as_bytes())?;
        }
        let offset = data.len;
        let mut buf = Vec::with_capacity(RECORD_HEADER as usize + key.len());
        buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(key.as_bytes());
        data.file.seek(SeekFrom::Start(offset))?;
        data.file.write_all(&buf)?;
        data.file.sync_data()?;
        data.len = offset + buf.len() as u64;

        self.index.remove(key)?;
        Ok(())
    }

    /// Blocking flush.
    fn flush(&self) -> Result<()> {
        let _gate = self.flush_gate.lock();
        self.do_flush()
    }

    /// Flush unless another flush is already running.
    fn try_flush(&self) -> Result<()> {
        match self.flush_gate.try_lock() {
            Some(_gate) => self.do_flush(),
            None => Ok(()),
        }
    }

    fn do_flush(&self) -> Result<()> {
        let snapshot = std::mem::take(&mut *self.batch.lock());
        if snapshot.is_empty() {
            return Ok(());
        }

        let mut data = self.data.write();
        if let Some(wal) = &self.wal {
            for (key, value) in &snapshot {
                if value != TOMBSTONE {
                    wal.write_entry(key.as_bytes(), value.as_bytes())?;
                }
            }
        }

        for (key, value) in &snapshot {
            if value == TOMBSTONE {
                // The delete path already persisted the record and index removal
                continue;
            }
            let offset = data.len;
            let mut buf =
                Vec::with_capacity(RECORD_HEADER as usize + key.len() + value.len());
            buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
            buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
            buf.extend_from_slice(key.as_bytes());
            buf.extend_from_slice(value.as_bytes());
            data.file.seek(SeekFrom::Start(offset))?;
            data.file.write_all(&buf)?;
            data.len = offset + buf.len() as u64;
            self.index.add(key, offset)?;
        }
        data.file.sync_data()?;

        if let Some(wal) = &self.wal {
            wal.mark_committed()?;
            if wal.should_checkpoint() {
                wal.clear()?;
            }
        }
        Ok(())
    }

    /// Replay the WAL into the batch, flush, then clear the log.
    fn recover(&self) -> Result<()> {
        let Some(wal) = &self.wal else {
            return Ok(());
        };
        let entries = wal.replay()?;
        if entries.is_empty() {
            return Ok(());
        }

        let mut replayed = 0usize;
        {
            let mut batch = self.batch.lock();
            for (key, value) in entries {
                if value.is_empty() {
                    continue;
                }
                let key = String::from_utf8(key)
                    .map_err(|_| Error::Corruption("non-UTF-8 key in log".into()))?;
                let value = String::from_utf8(value)
                    .map_err(|_| Error::Corruption("non-UTF-8 value in log".into()))?;
                batch.insert(key, value);
                replayed += 1;
            }
        }
        self.flush()?;
        wal.clear()?;
        info!(entries = replayed, "kv recovery complete");
        Ok(())
    }
}
