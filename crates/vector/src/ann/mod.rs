//! ANN index abstraction.
//!
//! Every index structure implements [`AnnIndex`]; the descriptor decides
//! which concrete structure [`build_index`] constructs. Indexes are keyed by
//! external `i64` ids throughout, so search labels are the caller's ids
//! directly.
//!
//! ## Snapshot format
//!
//! ```text
//! [magic "AXVI" 4B][version u32 LE]
//! [desc_len u32 LE][descriptor utf8][metric u8][dim u32 LE]
//! [payload_len u64 LE][payload][crc32(payload) u32 LE]
//! ```
//!
//! The payload layout is private to each index type. A bad magic, version,
//! or checksum surfaces as a corruption error; callers fall back to a fresh
//! index plus WAL/data-file rebuild.

mod flat;
mod hnsw;
mod ivf;
mod pq_index;

pub use flat::FlatIndex;
pub use hnsw::HnswIndex;
pub use ivf::IvfIndex;
pub use pq_index::PqIndex;

use axon_core::descriptor::{AnnDescriptor, IvfStorage};
use axon_core::error::{Error, Result};
use axon_core::DistanceMetric;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};
use std::path::Path;

/// Label reported for "no result" slots in a padded top-k answer
pub const NO_ID: i64 = -1;

const MAGIC: &[u8; 4] = b"AXVI";
const VERSION: u32 = 1;

/// Top-k search answer, padded to exactly k entries
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// Result labels; [`NO_ID`] where fewer than k vectors matched
    pub ids: Vec<i64>,
    /// Distances aligned with `ids`; infinity for padding slots
    pub distances: Vec<f32>,
}

/// Range search answer in the lims/labels/distances shape
#[derive(Debug, Clone, PartialEq)]
pub struct RangeResult {
    /// Matching labels, unordered
    pub labels: Vec<i64>,
    /// Distances aligned with `labels`
    pub distances: Vec<f32>,
    /// Per-query boundaries into the flat arrays; `[0, n]` for one query
    pub lims: Vec<usize>,
}

/// Contract every index structure satisfies
pub trait AnnIndex: Send + Sync {
    /// Descriptor this index was built from
    fn descriptor(&self) -> AnnDescriptor;
    /// Configured metric
    fn metric(&self) -> DistanceMetric;
    /// Configured dimension
    fn dim(&self) -> usize;
    /// Number of indexed vectors
    fn len(&self) -> usize;
    /// True when nothing is indexed
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// True once inserts are accepted directly
    fn is_trained(&self) -> bool;
    /// Train on a row-major `n x dim` sample
    fn train(&mut self, data: &[f32]) -> Result<()>;
    /// Upsert vectors under the given external ids
    fn add_with_ids(&mut self, vectors: &[f32], ids: &[i64]) -> Result<()>;
    /// Remove ids, returning how many were present
    fn remove_ids(&mut self, ids: &[i64]) -> usize;
    /// k-nearest search, padded to k
    fn search(&self, query: &[f32], k: usize) -> SearchResult;
    /// All vectors within `radius` of the query
    fn range_search(&self, query: &[f32], radius: f32) -> RangeResult;
    /// Serialize internal state for a snapshot
    fn save_payload(&self) -> Result<Vec<u8>>;
}

/// Construct an empty index for a descriptor.
pub fn build_index(
    descriptor: AnnDescriptor,
    dim: usize,
    metric: DistanceMetric,
) -> Result<Box<dyn AnnIndex>> {
    Ok(match descriptor {
        AnnDescriptor::Flat => Box::new(FlatIndex::new(dim, metric)),
        AnnDescriptor::Hnsw { m } => Box::new(HnswIndex::new(dim, metric, m as usize, None)?),
        AnnDescriptor::HnswPq { m, pq_m } => {
            Box::new(HnswIndex::new(dim, metric, m as usize, Some(pq_m as usize))?)
        }
        AnnDescriptor::Ivf { nlist, storage } => {
            let pq_m = match storage {
                IvfStorage::Flat => None,
                IvfStorage::Pq(m) => Some(m as usize),
            };
            Box::new(IvfIndex::new(dim, metric, nlist as usize, pq_m)?)
        }
        AnnDescriptor::Pq { m } => Box::new(PqIndex::new(dim, metric, m as usize)?),
    })
}

/// Write an index snapshot atomically (temp file + rename + fsync).
pub fn write_index(path: &Path, index: &dyn AnnIndex) -> Result<()> {
    let payload = index.save_payload()?;
    let descriptor = index.descriptor().to_string();

    let mut buf = Vec::with_capacity(payload.len() + descriptor.len() + 32);
    buf.extend_from_slice(MAGIC);
    buf.write_u32::<LittleEndian>(VERSION)?;
    buf.write_u32::<LittleEndian>(descriptor.len() as u32)?;
    buf.extend_from_slice(descriptor.as_bytes());
    buf.push(index.metric().to_byte());
    buf.write_u32::<LittleEndian>(index.dim() as u32)?;
    buf.write_u64::<LittleEndian>(payload.len() as u64)?;
    buf.extend_from_slice(&payload);
    buf.write_u32::<LittleEndian>(crc32fast::hash(&payload))?;

    let tmp = path.with_extension("ann.tmp");
    std::fs::write(&tmp, &buf)?;
    let file = std::fs::File::open(&tmp)?;
    file.sync_all()?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read an index snapshot, validating the header and checksum against the
/// expected dimension and metric.
pub fn read_index(
    path: &Path,
    expected_dim: usize,
    expected_metric: DistanceMetric,
) -> Result<Box<dyn AnnIndex>> {
    let bytes = std::fs::read(path)?;
    let mut cursor = Cursor::new(bytes.as_slice());

    let mut magic = [0u8; 4];
    cursor.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(Error::Corruption("bad index snapshot magic".into()));
    }
    let version = cursor.read_u32::<LittleEndian>()?;
    if version != VERSION {
        return Err(Error::Corruption(format!(
            "unsupported index snapshot version {}",
            version
        )));
    }

    let desc_len = cursor.read_u32::<LittleEndian>()? as usize;
    let mut desc_bytes = vec![0u8; desc_len];
    cursor.read_exact(&mut desc_bytes)?;
    let descriptor: AnnDescriptor = std::str::from_utf8(&desc_bytes)
        .map_err(|_| Error::Corruption("non-UTF-8 descriptor in snapshot".into()))?
        .parse()?;

    let metric = DistanceMetric::from_byte(cursor.read_u8()?)
        .ok_or_else(|| Error::Corruption("unknown metric tag in snapshot".into()))?;
    let dim = cursor.read_u32::<LittleEndian>()? as usize;
    if dim != expected_dim || metric != expected_metric {
        return Err(Error::Corruption(format!(
            "snapshot is for dim {} / {}, expected dim {} / {}",
            dim, metric, expected_dim, expected_metric
        )));
    }

    let payload_len = cursor.read_u64::<LittleEndian>()? as usize;
    let mut payload = vec![0u8; payload_len];
    cursor.read_exact(&mut payload)?;
    let stored_crc = cursor.read_u32::<LittleEndian>()?;
    if crc32fast::hash(&payload) != stored_crc {
        return Err(Error::Corruption("index snapshot checksum mismatch".into()));
    }

    let index: Box<dyn AnnIndex> = match descriptor {
        AnnDescriptor::Flat => Box::new(FlatIndex::load(dim, metric, &payload)?),
        AnnDescriptor::Hnsw { m } => {
            Box::new(HnswIndex::load(dim, metric, m as usize, None, &payload)?)
        }
        AnnDescriptor::HnswPq { m, pq_m } => Box::new(HnswIndex::load(
            dim,
            metric,
            m as usize,
            Some(pq_m as usize),
            &payload,
        )?),
        AnnDescriptor::Ivf { nlist, storage } => {
            let pq_m = match storage {
                IvfStorage::Flat => None,
                IvfStorage::Pq(m) => Some(m as usize),
            };
            Box::new(IvfIndex::load(dim, metric, nlist as usize, pq_m, &payload)?)
        }
        AnnDescriptor::Pq { m } => Box::new(PqIndex::load(dim, metric, m as usize, &payload)?),
    };
    Ok(index)
}

/// Sort candidate pairs ascending by distance (ties by id) and pad to k.
pub(crate) fn top_k(mut pairs: Vec<(i64, f32)>, k: usize) -> SearchResult {
    pairs.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    pairs.truncate(k);
    let mut ids = Vec::with_capacity(k);
    let mut distances = Vec::with_capacity(k);
    for (id, dist) in &pairs {
        ids.push(*id);
        distances.push(*dist);
    }
    while ids.len() < k {
        ids.push(NO_ID);
        distances.push(f32::INFINITY);
    }
    SearchResult { ids, distances }
}

/// Collect pairs within radius into the lims/labels/distances shape.
pub(crate) fn range_result(pairs: Vec<(i64, f32)>) -> RangeResult {
    let lims = vec![0, pairs.len()];
    let (labels, distances) = pairs.into_iter().unzip();
    RangeResult {
        labels,
        distances,
        lims,
    }
}

// Shared payload encoding helpers

pub(crate) fn write_f32s(buf: &mut Vec<u8>, values: &[f32]) {
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
}

pub(crate) fn read_f32s(cursor: &mut Cursor<&[u8]>, count: usize) -> Result<Vec<f32>> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(cursor.read_f32::<LittleEndian>()?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_top_k_sorts_and_pads() {
        let result = top_k(vec![(3, 0.5), (1, 0.1), (2, 0.3)], 5);
        assert_eq!(result.ids, vec![1, 2, 3, NO_ID, NO_ID]);
        assert_eq!(result.distances[0], 0.1);
        assert!(result.distances[3].is_infinite());
    }

    #[test]
    fn test_top_k_tie_break_by_id() {
        let result = top_k(vec![(9, 0.5), (2, 0.5), (7, 0.5)], 3);
        assert_eq!(result.ids, vec![2, 7, 9]);
    }

    #[test]
    fn test_build_index_per_descriptor() {
        for desc in ["Flat", "HNSW8", "IVF4", "PQ4", "IVF4,PQ4", "HNSW8,PQ4"] {
            let descriptor: AnnDescriptor = desc.parse().unwrap();
            let index = build_index(descriptor, 8, DistanceMetric::L2).unwrap();
            assert_eq!(index.dim(), 8);
            assert_eq!(index.len(), 0);
            assert_eq!(index.is_trained(), !descriptor.requires_training());
        }
    }

    #[test]
    fn test_snapshot_roundtrip_flat() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.ann");

        let mut index = build_index(AnnDescriptor::Flat, 4, DistanceMetric::L2).unwrap();
        index
            .add_with_ids(&[1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0], &[10, 20])
            .unwrap();
        write_index(&path, index.as_ref()).unwrap();

        let loaded = read_index(&path, 4, DistanceMetric::L2).unwrap();
        assert_eq!(loaded.len(), 2);
        let result = loaded.search(&[1.0, 0.0, 0.0, 0.0], 1);
        assert_eq!(result.ids[0], 10);
    }

    #[test]
    fn test_snapshot_rejects_wrong_dim() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.ann");
        let index = build_index(AnnDescriptor::Flat, 4, DistanceMetric::L2).unwrap();
        write_index(&path, index.as_ref()).unwrap();

        assert!(read_index(&path, 8, DistanceMetric::L2).is_err());
        assert!(read_index(&path, 4, DistanceMetric::L1).is_err());
    }

    #[test]
    fn test_snapshot_rejects_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.ann");
        let mut index = build_index(AnnDescriptor::Flat, 2, DistanceMetric::L2).unwrap();
        index.add_with_ids(&[1.0, 2.0], &[1]).unwrap();
        write_index(&path, index.as_ref()).unwrap();

        // Flip a payload byte
        let mut bytes = std::fs::read(&path).unwrap();
        let mid = bytes.len() - 8;
        bytes[mid] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            read_index(&path, 2, DistanceMetric::L2),
            Err(Error::Corruption(_))
        ));
    }
}
