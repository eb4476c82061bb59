//! Vector engine.
//!
//! Durable vector collection over three artifacts per space directory:
//! `vector_data.db` (fixed-size `{i64 id, dim x f32}` records, little-endian),
//! `vector_index.ann` (periodic ANN snapshot) and `vector_wal.db`.
//!
//! Ingestion is a state machine. Until a training-requiring index has seen
//! enough samples, inserts stage in a training pool and a pending map and
//! are not searchable; crossing the threshold trains the index, bulk-adds
//! everything pending and switches to direct ingestion. Inserted records
//! queue in a persistence batch flushed to the data file every ~50 ms or at
//! 1024 records, with one fsync per flush.
//!
//! The WAL carries the id as an 8-byte little-endian key and the raw f32
//! bytes as the value. Records stay pending until a checkpoint has made
//! them durable twice over (data file fsync + index snapshot); the
//! checkpoint then commits and clears the log, so replay after a crash
//! re-drives every record through the normal ingest path, which is
//! idempotent and repopulates the staging structures when the index is
//! still untrained.

use crate::ann::{self, AnnIndex};
use axon_core::descriptor::AnnDescriptor;
use axon_core::error::{Error, Result};
use axon_core::DistanceMetric;
use axon_durability::Wal;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Persistence flusher tick
const PERSIST_TICK: Duration = Duration::from_millis(50);
/// Flush early once this many records queue up
const PERSIST_BATCH: usize = 1024;
/// Checkpoint tick
const CHECKPOINT_TICK: Duration = Duration::from_secs(30);

/// Ingestion state: staging until trained, then direct
enum IngestState {
    /// Training has not happened yet; inserts are invisible to search
    Untrained {
        /// Flat training sample, every inserted vector in arrival order
        pool: Vec<f32>,
        /// Latest vector per id, bulk-added once training completes
        pending: BTreeMap<i64, Vec<f32>>,
    },
    /// Index accepts vectors directly
    Trained,
}

struct AnnState {
    index: Box<dyn AnnIndex>,
    /// Byte offset of each id's most recent data-file record
    file_offsets: HashMap<i64, u64>,
    ingest: IngestState,
}

struct PersistState {
    file: File,
    /// Current data file length, also the next append offset
    len: u64,
    /// Records awaiting append
    batch: Vec<(i64, Vec<f32>)>,
}

struct VecInner {
    dim: usize,
    min_train: usize,
    /// Guards the ANN index, `file_offsets` and the training staging
    ann: RwLock<AnnState>,
    /// Guards the data file and the persistence batch
    persist: Mutex<PersistState>,
    wal: Option<Wal>,
    index_path: PathBuf,
    closed: AtomicBool,
}

/// Fixed-dimension vector engine with ANN search
pub struct VectorEngine {
    inner: Arc<VecInner>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    shutdowns: Mutex<Vec<Sender<()>>>,
}

impl VectorEngine {
    /// Open the engine against a space directory, rebuilding `file_offsets`
    /// from the data file and replaying the WAL through the ingest path.
    /// Replay failure aborts the open.
    pub fn open<P: AsRef<Path>>(
        dir: P,
        dim: usize,
        descriptor: AnnDescriptor,
        metric: DistanceMetric,
        wal_enabled: bool,
    ) -> Result<Self> {
        if dim == 0 {
            return Err(Error::InvalidInput("vector dimension must be positive".into()));
        }
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let data_path = dir.join("vector_data.db");
        let index_path = dir.join("vector_index.ann");

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&data_path)?;
        let record_size = (8 + dim * 4) as u64;
        let file_len = file.metadata()?.len();
        let whole = file_len - file_len % record_size;
        if whole != file_len {
            warn!(
                dropped = file_len - whole,
                "truncated partial record at vector data tail"
            );
            file.set_len(whole)?;
        }

        let mut file_offsets = HashMap::new();
        {
            let mut reader = BufReader::new(file.try_clone()?);
            reader.seek(SeekFrom::Start(0))?;
            let mut id_buf = [0u8; 8];
            let mut offset = 0u64;
            while offset < whole {
                reader.read_exact(&mut id_buf)?;
                reader.seek_relative((dim * 4) as i64)?;
                file_offsets.insert(i64::from_le_bytes(id_buf), offset);
                offset += record_size;
            }
        }

        let index: Box<dyn AnnIndex> = if index_path.exists() {
            match ann::read_index(&index_path, dim, metric) {
                Ok(index) if index.descriptor() == descriptor => index,
                Ok(other) => {
                    warn!(
                        found = %other.descriptor(),
                        expected = %descriptor,
                        "index snapshot descriptor mismatch, rebuilding"
                    );
                    ann::build_index(descriptor, dim, metric)?
                }
                Err(e) => {
                    warn!("unreadable index snapshot ({}), rebuilding", e);
                    ann::build_index(descriptor, dim, metric)?
                }
            }
        } else {
            ann::build_index(descriptor, dim, metric)?
        };

        let ingest = if index.is_trained() {
            IngestState::Trained
        } else {
            IngestState::Untrained {
                pool: Vec::new(),
                pending: BTreeMap::new(),
            }
        };

        let wal = if wal_enabled {
            Some(Wal::open(dir.join("vector_wal.db"))?)
        } else {
            None
        };

        let inner = Arc::new(VecInner {
            dim,
            min_train: descriptor.min_train(),
            ann: RwLock::new(AnnState {
                index,
                file_offsets,
                ingest,
            }),
            persist: Mutex::new(PersistState {
                file,
                len: whole,
                batch: Vec::new(),
            }),
            wal,
            index_path,
            closed: AtomicBool::new(false),
        });

        inner.recover()?;

        let mut threads = Vec::new();
        let mut shutdowns = Vec::new();

        let (tx, rx) = mpsc::channel();
        let worker = Arc::clone(&inner);
        threads.push(
            std::thread::Builder::new()
                .name("axon-vec-flush".into())
                .spawn(move || loop {
                    match rx.recv_timeout(PERSIST_TICK) {
                        Err(RecvTimeoutError::Timeout) => {
                            if let Err(e) = worker.flush_data() {
                                warn!("vector data flush failed: {}", e);
                            }
                        }
                        _ => break,
                    }
                })
                .map_err(|e| Error::Storage(format!("failed to spawn flusher: {}", e)))?,
        );
        shutdowns.push(tx);

        let (tx, rx) = mpsc::channel();
        let worker = Arc::clone(&inner);
        threads.push(
            std::thread::Builder::new()
                .name("axon-vec-ckpt".into())
                .spawn(move || loop {
                    match rx.recv_timeout(CHECKPOINT_TICK) {
                        Err(RecvTimeoutError::Timeout) => {
                            if let Err(e) = worker.checkpoint() {
                                warn!("vector checkpoint failed: {}", e);
                            }
                        }
                        _ => break,
                    }
                })
                .map_err(|e| Error::Storage(format!("failed to spawn checkpointer: {}", e)))?,
        );
        shutdowns.push(tx);

        Ok(VectorEngine {
            inner,
            threads: Mutex::new(threads),
            shutdowns: Mutex::new(shutdowns),
        })
    }

    /// Insert or replace a vector under an id.
    pub fn insert(&self, id: i64, vector: &[f32]) -> Result<()> {
        self.inner.check_open()?;
        self.inner.validate(vector)?;

        if let Some(wal) = &self.inner.wal {
            wal.write_entry(&id.to_le_bytes(), &encode_vector(vector))?;
        }
        let enqueue = self.inner.ingest(id, vector)?;
        let trigger = {
            let mut persist = self.inner.persist.lock();
            persist.batch.extend(enqueue);
            persist.batch.len() >= PERSIST_BATCH
        };
        if trigger {
            self.inner.flush_data()?;
        }
        Ok(())
    }

    /// k-nearest search; results are padded to k with `-1` ids.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(i64, f32)>> {
        self.inner.check_open()?;
        self.inner.validate(query)?;
        let state = self.inner.ann.read();
        let result = state.index.search(query, k);
        Ok(result.ids.into_iter().zip(result.distances).collect())
    }

    /// All vectors within `radius`, ascending by distance.
    pub fn range_search(&self, query: &[f32], radius: f32) -> Result<Vec<(i64, f32)>> {
        self.inner.check_open()?;
        self.inner.validate(query)?;
        let state = self.inner.ann.read();
        let result = state.index.range_search(query, radius);
        let (start, end) = (result.lims[0], result.lims[1]);
        let mut pairs: Vec<(i64, f32)> = result.labels[start..end]
            .iter()
            .copied()
            .zip(result.distances[start..end].iter().copied())
            .collect();
        pairs.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        Ok(pairs)
    }

    /// Fetch the latest vector stored under an id.
    pub fn get_vector(&self, id: i64) -> Result<Vec<f32>> {
        self.inner.check_open()?;

        // Read through the unflushed batch first, newest entry wins
        {
            let persist = self.inner.persist.lock();
            if let Some((_, v)) = persist.batch.iter().rev().find(|(i, _)| *i == id) {
                return Ok(v.clone());
            }
        }

        let offset = {
            let state = self.inner.ann.read();
            if let IngestState::Untrained { pending, .. } = &state.ingest {
                if let Some(v) = pending.get(&id) {
                    return Ok(v.clone());
                }
            }
            state.file_offsets.get(&id).copied()
        };
        let Some(offset) = offset else {
            return Err(Error::VectorNotFound(id));
        };

        let record_size = 8 + self.inner.dim * 4;
        let mut buf = vec![0u8; record_size];
        {
            let persist = self.inner.persist.lock();
            persist.file.read_exact_at(&mut buf, offset)?;
        }
        let stored_id = i64::from_le_bytes(buf[0..8].try_into().unwrap());
        if stored_id != id {
            return Err(Error::Corruption(format!(
                "vector id mismatch at position {}",
                offset
            )));
        }
        Ok(decode_vector(&buf[8..]))
    }

    /// Remove an id from the index and the offset map. The data file is not
    /// rewritten; stale records lose to later ones on recovery.
    pub fn remove(&self, id: i64) -> Result<()> {
        self.inner.check_open()?;
        {
            let mut state = self.inner.ann.write();
            state.index.remove_ids(&[id]);
            state.file_offsets.remove(&id);
            if let IngestState::Untrained { pending, .. } = &mut state.ingest {
                pending.remove(&id);
            }
        }
        self.inner.persist.lock().batch.retain(|(i, _)| *i != id);
        if let Some(wal) = &self.inner.wal {
            wal.write_delete(&id.to_le_bytes())?;
        }
        Ok(())
    }

    /// Number of searchable vectors.
    pub fn searchable_len(&self) -> usize {
        self.inner.ann.read().index.len()
    }

    /// True once the index accepts vectors directly.
    pub fn is_trained(&self) -> bool {
        matches!(self.inner.ann.read().ingest, IngestState::Trained)
    }

    /// Force the persistence batch to the data file.
    pub fn flush(&self) -> Result<()> {
        self.inner.check_open()?;
        self.inner.flush_data()
    }

    /// Snapshot the index and fsync the data file, committing the WAL when
    /// nothing is still staged for training.
    pub fn checkpoint(&self) -> Result<()> {
        self.inner.check_open()?;
        self.inner.checkpoint()
    }

    /// Stop background tasks, flush, checkpoint, release files. Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for tx in self.shutdowns.lock().drain(..) {
            let _ = tx.send(());
        }
        for handle in self.threads.lock().drain(..) {
            let _ = handle.join();
        }
        self.inner.flush_data()?;
        self.inner.checkpoint()?;
        debug!("vector engine closed");
        Ok(())
    }
}

impl Drop for VectorEngine {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl VecInner {
    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    fn validate(&self, vector: &[f32]) -> Result<()> {
        if vector.is_empty() {
            return Err(Error::InvalidInput("vector cannot be empty".into()));
        }
        if vector.len() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                got: vector.len(),
            });
        }
        Ok(())
    }

    /// Drive one vector through the ingest state machine. Returns the
    /// records that became durable-eligible: the vector itself when the
    /// index is trained, everything pending when this insert completed
    /// training, nothing while still staging.
    fn ingest(&self, id: i64, vector: &[f32]) -> Result<Vec<(i64, Vec<f32>)>> {
        let mut guard = self.ann.write();
        let state = &mut *guard;
        match &mut state.ingest {
            IngestState::Trained => {
                state.index.remove_ids(&[id]);
                state.index.add_with_ids(vector, &[id])?;
                Ok(vec![(id, vector.to_vec())])
            }
            IngestState::Untrained { pool, pending } => {
                pool.extend_from_slice(vector);
                pending.insert(id, vector.to_vec());
                if pool.len() / self.dim < self.min_train {
                    return Ok(Vec::new());
                }
                state.index.train(pool)?;
                let drained: Vec<(i64, Vec<f32>)> =
                    std::mem::take(pending).into_iter().collect();
                for (pid, pv) in &drained {
                    state.index.add_with_ids(pv, &[*pid])?;
                }
                info!(vectors = drained.len(), "index trained, staging drained");
                state.ingest = IngestState::Trained;
                Ok(drained)
            }
        }
    }

    /// Append the persistence batch to the data file with one fsync, then
    /// publish the new offsets.
    fn flush_data(&self) -> Result<()> {
        let mut persist = self.persist.lock();
        if persist.batch.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut persist.batch);
        let mut offsets = Vec::with_capacity(batch.len());
        for (id, vector) in &batch {
            let offset = persist.len;
            let mut buf = Vec::with_capacity(8 + vector.len() * 4);
            buf.extend_from_slice(&id.to_le_bytes());
            buf.extend_from_slice(&encode_vector(vector));
            persist.file.seek(SeekFrom::Start(offset))?;
            persist.file.write_all(&buf)?;
            persist.len = offset + buf.len() as u64;
            offsets.push((*id, offset));
        }
        persist.file.sync_data()?;

        let mut state = self.ann.write();
        for (id, offset) in offsets {
            state.file_offsets.insert(id, offset);
        }
        Ok(())
    }

    fn checkpoint(&self) -> Result<()> {
        self.flush_data()?;
        let staged = {
            let state = self.ann.read();
            ann::write_index(&self.index_path, state.index.as_ref())?;
            matches!(&state.ingest, IngestState::Untrained { pending, .. } if !pending.is_empty())
        };
        self.persist.lock().file.sync_data()?;
        if !staged {
            if let Some(wal) = &self.wal {
                wal.mark_committed()?;
                wal.clear()?;
            }
        }
        Ok(())
    }

    /// Replay the WAL through the ingest path (no WAL re-writes), then
    /// flush and checkpoint so the log can be cleared.
    fn recover(&self) -> Result<()> {
        let Some(wal) = &self.wal else {
            return Ok(());
        };
        let entries = wal.replay()?;
        if entries.is_empty() {
            return Ok(());
        }

        let mut applied = 0usize;
        let mut removed = 0usize;
        for (key, value) in entries {
            let Ok(id_bytes) = <[u8; 8]>::try_from(key.as_slice()) else {
                warn!("skipping log record with malformed id");
                continue;
            };
            let id = i64::from_le_bytes(id_bytes);
            if value.is_empty() {
                let mut state = self.ann.write();
                state.index.remove_ids(&[id]);
                state.file_offsets.remove(&id);
                if let IngestState::Untrained { pending, .. } = &mut state.ingest {
                    pending.remove(&id);
                }
                removed += 1;
            } else {
                if value.len() != self.dim * 4 {
                    warn!(id, "skipping log record with wrong vector length");
                    continue;
                }
                let vector = decode_vector(&value);
                let enqueue = self.ingest(id, &vector)?;
                self.persist.lock().batch.extend(enqueue);
                applied += 1;
            }
        }
        self.flush_data()?;
        self.checkpoint()?;
        info!(applied, removed, "vector recovery complete");
        Ok(())
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    buf
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ann::NO_ID;
    use tempfile::TempDir;

    fn flat_engine(dir: &TempDir) -> VectorEngine {
        VectorEngine::open(
            dir.path(),
            4,
            AnnDescriptor::Flat,
            DistanceMetric::L2,
            true,
        )
        .unwrap()
    }

    fn vec_for(i: i64) -> Vec<f32> {
        vec![i as f32, 0.0, 0.0, 0.0]
    }

    #[test]
    fn test_insert_and_search() {
        let dir = TempDir::new().unwrap();
        let engine = flat_engine(&dir);

        for i in 0..10 {
            engine.insert(i, &vec_for(i)).unwrap();
        }
        let hits = engine.search(&vec_for(3), 3).unwrap();
        assert_eq!(hits[0].0, 3);
        assert!(hits[0].1 < 1e-6);
    }

    #[test]
    fn test_search_pads_with_sentinel() {
        let dir = TempDir::new().unwrap();
        let engine = flat_engine(&dir);
        engine.insert(1, &vec_for(1)).unwrap();

        let hits = engine.search(&vec_for(1), 4).unwrap();
        assert_eq!(hits.len(), 4);
        assert_eq!(hits[0].0, 1);
        assert_eq!(hits[1].0, NO_ID);
    }

    #[test]
    fn test_dimension_validation() {
        let dir = TempDir::new().unwrap();
        let engine = flat_engine(&dir);
        assert!(matches!(
            engine.insert(1, &[1.0, 2.0]),
            Err(Error::DimensionMismatch { .. })
        ));
        assert!(matches!(
            engine.insert(1, &[]),
            Err(Error::InvalidInput(_))
        ));
        assert!(engine.search(&[1.0], 1).is_err());
    }

    #[test]
    fn test_get_vector_before_and_after_flush() {
        let dir = TempDir::new().unwrap();
        let engine = flat_engine(&dir);

        engine.insert(7, &vec_for(7)).unwrap();
        // Unflushed: served from the persistence batch
        assert_eq!(engine.get_vector(7).unwrap(), vec_for(7));

        engine.flush().unwrap();
        assert_eq!(engine.get_vector(7).unwrap(), vec_for(7));
        assert!(matches!(
            engine.get_vector(404),
            Err(Error::VectorNotFound(404))
        ));
    }

    #[test]
    fn test_latest_write_wins() {
        let dir = TempDir::new().unwrap();
        let engine = flat_engine(&dir);

        engine.insert(1, &vec_for(10)).unwrap();
        engine.flush().unwrap();
        engine.insert(1, &vec_for(20)).unwrap();
        assert_eq!(engine.get_vector(1).unwrap(), vec_for(20));
        engine.flush().unwrap();
        assert_eq!(engine.get_vector(1).unwrap(), vec_for(20));
    }

    #[test]
    fn test_remove_vector() {
        let dir = TempDir::new().unwrap();
        let engine = flat_engine(&dir);

        for i in 0..5 {
            engine.insert(i, &vec_for(i)).unwrap();
        }
        engine.remove(2).unwrap();

        let hits = engine.search(&vec_for(2), 5).unwrap();
        assert!(hits.iter().all(|(id, _)| *id != 2));
        assert!(matches!(engine.get_vector(2), Err(Error::VectorNotFound(2))));

        // Reinsert becomes searchable again
        engine.insert(2, &vec_for(2)).unwrap();
        let hits = engine.search(&vec_for(2), 1).unwrap();
        assert_eq!(hits[0].0, 2);
    }

    #[test]
    fn test_range_search_sorted() {
        let dir = TempDir::new().unwrap();
        let engine = flat_engine(&dir);

        for i in 0..10 {
            engine.insert(i, &vec_for(i)).unwrap();
        }
        let hits = engine.range_search(&vec_for(0), 2.5).unwrap();
        let ids: Vec<i64> = hits.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert!(hits.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn test_restart_preserves_vectors() {
        let dir = TempDir::new().unwrap();
        {
            let engine = flat_engine(&dir);
            for i in 0..20 {
                engine.insert(i, &vec_for(i)).unwrap();
            }
            engine.close().unwrap();
        }

        let engine = flat_engine(&dir);
        assert_eq!(engine.searchable_len(), 20);
        for i in 0..20 {
            assert_eq!(engine.get_vector(i).unwrap(), vec_for(i));
        }
    }

    #[test]
    fn test_crash_recovery_through_wal() {
        let dir = TempDir::new().unwrap();
        {
            let engine = flat_engine(&dir);
            for i in 0..10 {
                engine.insert(i, &vec_for(i)).unwrap();
            }
            // Crash: no flush, no checkpoint, no close
            std::mem::forget(engine);
        }

        let engine = flat_engine(&dir);
        assert_eq!(engine.searchable_len(), 10);
        for i in 0..10 {
            assert_eq!(engine.get_vector(i).unwrap(), vec_for(i));
        }
    }

    #[test]
    fn test_training_staging_and_completion() {
        let dir = TempDir::new().unwrap();
        let engine = VectorEngine::open(
            dir.path(),
            4,
            "IVF4".parse().unwrap(),
            DistanceMetric::L2,
            true,
        )
        .unwrap();

        // Below the training threshold: invisible to search
        for i in 0..3 {
            engine.insert(i, &vec_for(i)).unwrap();
        }
        assert!(!engine.is_trained());
        let hits = engine.search(&vec_for(1), 1).unwrap();
        assert_eq!(hits[0].0, NO_ID);
        // But reachable by id
        assert_eq!(engine.get_vector(1).unwrap(), vec_for(1));

        // Crossing the threshold trains and bulk-adds the backlog
        engine.insert(3, &vec_for(3)).unwrap();
        assert!(engine.is_trained());
        assert_eq!(engine.searchable_len(), 4);
        let hits = engine.search(&vec_for(1), 1).unwrap();
        assert_eq!(hits[0].0, 1);
    }

    #[test]
    fn test_crash_before_training_recovers_staging() {
        let dir = TempDir::new().unwrap();
        {
            let engine = VectorEngine::open(
                dir.path(),
                4,
                "IVF4".parse().unwrap(),
                DistanceMetric::L2,
                true,
            )
            .unwrap();
            engine.insert(0, &vec_for(0)).unwrap();
            engine.insert(1, &vec_for(1)).unwrap();
            std::mem::forget(engine);
        }

        let engine = VectorEngine::open(
            dir.path(),
            4,
            "IVF4".parse().unwrap(),
            DistanceMetric::L2,
            true,
        )
        .unwrap();
        assert!(!engine.is_trained());
        assert_eq!(engine.get_vector(0).unwrap(), vec_for(0));

        // Two more inserts reach the threshold, including the recovered pair
        engine.insert(2, &vec_for(2)).unwrap();
        engine.insert(3, &vec_for(3)).unwrap();
        assert!(engine.is_trained());
        assert_eq!(engine.searchable_len(), 4);
    }

    #[test]
    fn test_checkpoint_clears_wal() {
        let dir = TempDir::new().unwrap();
        let engine = flat_engine(&dir);
        engine.insert(1, &vec_for(1)).unwrap();
        engine.checkpoint().unwrap();

        let wal = Wal::open(dir.path().join("vector_wal.db")).unwrap();
        assert_eq!(wal.size(), 0);
    }

    #[test]
    fn test_close_is_idempotent_and_rejects_ops() {
        let dir = TempDir::new().unwrap();
        let engine = flat_engine(&dir);
        engine.insert(1, &vec_for(1)).unwrap();
        engine.close().unwrap();
        engine.close().unwrap();
        assert!(matches!(engine.insert(2, &vec_for(2)), Err(Error::Closed)));
        assert!(matches!(engine.search(&vec_for(1), 1), Err(Error::Closed)));
    }

    #[test]
    fn test_wal_disabled_survives_clean_close() {
        let dir = TempDir::new().unwrap();
        {
            let engine = VectorEngine::open(
                dir.path(),
                4,
                AnnDescriptor::Flat,
                DistanceMetric::L2,
                false,
            )
            .unwrap();
            engine.insert(5, &vec_for(5)).unwrap();
            engine.close().unwrap();
        }
        let engine = VectorEngine::open(
            dir.path(),
            4,
            AnnDescriptor::Flat,
            DistanceMetric::L2,
            false,
        )
        .unwrap();
        assert_eq!(engine.get_vector(5).unwrap(), vec_for(5));
        assert_eq!(engine.searchable_len(), 1);
    }
}
