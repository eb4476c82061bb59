//! Exact-scan index.
//!
//! Vectors live in one contiguous row-major buffer; search scans everything.
//! No training, and results are exact for every metric.

use crate::ann::{range_result, read_f32s, top_k, write_f32s, AnnIndex, RangeResult, SearchResult};
use crate::metric::distance;
use axon_core::descriptor::AnnDescriptor;
use axon_core::error::Result;
use axon_core::DistanceMetric;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::HashMap;
use std::io::Cursor;

/// Brute-force flat index
pub struct FlatIndex {
    dim: usize,
    metric: DistanceMetric,
    ids: Vec<i64>,
    /// Row-major vector data, one row per entry in `ids`
    data: Vec<f32>,
    slot: HashMap<i64, usize>,
}

impl FlatIndex {
    /// Empty index
    pub fn new(dim: usize, metric: DistanceMetric) -> Self {
        FlatIndex {
            dim,
            metric,
            ids: Vec::new(),
            data: Vec::new(),
            slot: HashMap::new(),
        }
    }

    /// Rebuild from a snapshot payload
    pub fn load(dim: usize, metric: DistanceMetric, payload: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(payload);
        let count = cursor.read_u64::<LittleEndian>()? as usize;
        let mut index = FlatIndex::new(dim, metric);
        for _ in 0..count {
            let id = cursor.read_i64::<LittleEndian>()?;
            let vector = read_f32s(&mut cursor, dim)?;
            index.upsert(id, &vector);
        }
        Ok(index)
    }

    fn upsert(&mut self, id: i64, vector: &[f32]) {
        if let Some(&slot) = self.slot.get(&id) {
            self.data[slot * self.dim..(slot + 1) * self.dim].copy_from_slice(vector);
        } else {
            let slot = self.ids.len();
            self.ids.push(id);
            self.data.extend_from_slice(vector);
            self.slot.insert(id, slot);
        }
    }

    fn row(&self, slot: usize) -> &[f32] {
        &self.data[slot * self.dim..(slot + 1) * self.dim]
    }
}

impl AnnIndex for FlatIndex {
    fn descriptor(&self) -> AnnDescriptor {
        AnnDescriptor::Flat
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn is_trained(&self) -> bool {
        true
    }

    fn train(&mut self, _data: &[f32]) -> Result<()> {
        Ok(())
    }

    fn add_with_ids(&mut self, vectors: &[f32], ids: &[i64]) -> Result<()> {
        for (row, &id) in ids.iter().enumerate() {
            self.upsert(id, &vectors[row * self.dim..(row + 1) * self.dim]);
        }
        Ok(())
    }

    fn remove_ids(&mut self, ids: &[i64]) -> usize {
        let mut removed = 0;
        for &id in ids {
            let Some(slot) = self.slot.remove(&id) else {
                continue;
            };
            removed += 1;
            let last = self.ids.len() - 1;
            if slot != last {
                let moved_id = self.ids[last];
                self.ids[slot] = moved_id;
                let (head, tail) = self.data.split_at_mut(last * self.dim);
                head[slot * self.dim..(slot + 1) * self.dim]
                    .copy_from_slice(&tail[..self.dim]);
                self.slot.insert(moved_id, slot);
            }
            self.ids.pop();
            self.data.truncate(last * self.dim);
        }
        removed
    }

    fn search(&self, query: &[f32], k: usize) -> SearchResult {
        let pairs = self
            .ids
            .iter()
            .enumerate()
            .map(|(slot, &id)| (id, distance(query, self.row(slot), self.metric)))
            .collect();
        top_k(pairs, k)
    }

    fn range_search(&self, query: &[f32], radius: f32) -> RangeResult {
        let pairs = self
            .ids
            .iter()
            .enumerate()
            .filter_map(|(slot, &id)| {
                let d = distance(query, self.row(slot), self.metric);
                (d <= radius).then_some((id, d))
            })
            .collect();
        range_result(pairs)
    }

    fn save_payload(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(8 + self.ids.len() * (8 + self.dim * 4));
        buf.write_u64::<LittleEndian>(self.ids.len() as u64)?;
        for (slot, &id) in self.ids.iter().enumerate() {
            buf.write_i64::<LittleEndian>(id)?;
            write_f32s(&mut buf, self.row(slot));
        }
        Ok(buf)
    }
}
