//! Standalone product-quantizer index.
//!
//! Every vector is stored as `m` code bytes; search decodes candidates and
//! ranks by the configured metric against the reconstruction. Requires
//! training (256 samples, one per code word).

use crate::ann::{range_result, read_f32s, top_k, AnnIndex, RangeResult, SearchResult};
use crate::ann::write_f32s;
use crate::metric::distance;
use crate::pq::ProductQuantizer;
use axon_core::descriptor::AnnDescriptor;
use axon_core::error::{Error, Result};
use axon_core::DistanceMetric;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::HashMap;
use std::io::{Cursor, Read};

/// Code-compressed exact-scan index
pub struct PqIndex {
    dim: usize,
    metric: DistanceMetric,
    pq: ProductQuantizer,
    ids: Vec<i64>,
    /// `ids.len() * m` code bytes, row-major
    codes: Vec<u8>,
    slot: HashMap<i64, usize>,
}

impl PqIndex {
    /// Empty, untrained index
    pub fn new(dim: usize, metric: DistanceMetric, m: usize) -> Result<Self> {
        Ok(PqIndex {
            dim,
            metric,
            pq: ProductQuantizer::new(dim, m)?,
            ids: Vec::new(),
            codes: Vec::new(),
            slot: HashMap::new(),
        })
    }

    /// Rebuild from a snapshot payload
    pub fn load(dim: usize, metric: DistanceMetric, m: usize, payload: &[u8]) -> Result<Self> {
        let mut index = PqIndex::new(dim, metric, m)?;
        let mut cursor = Cursor::new(payload);

        let codebook_len = cursor.read_u64::<LittleEndian>()? as usize;
        if codebook_len > 0 {
            let codebooks = read_f32s(&mut cursor, codebook_len)?;
            index.pq.restore_codebooks(codebooks)?;
        }

        let count = cursor.read_u64::<LittleEndian>()? as usize;
        for slot in 0..count {
            let id = cursor.read_i64::<LittleEndian>()?;
            let mut code = vec![0u8; m];
            cursor.read_exact(&mut code)?;
            index.ids.push(id);
            index.codes.extend_from_slice(&code);
            index.slot.insert(id, slot);
        }
        Ok(index)
    }

    fn m(&self) -> usize {
        self.pq.m()
    }

    fn code(&self, slot: usize) -> &[u8] {
        &self.codes[slot * self.m()..(slot + 1) * self.m()]
    }

    fn pairs_for(&self, query: &[f32]) -> Vec<(i64, f32)> {
        self.ids
            .iter()
            .enumerate()
            .map(|(slot, &id)| {
                let reconstructed = self.pq.decode(self.code(slot));
                (id, distance(query, &reconstructed, self.metric))
            })
            .collect()
    }
}

impl AnnIndex for PqIndex {
    fn descriptor(&self) -> AnnDescriptor {
        AnnDescriptor::Pq {
            m: self.m() as u32,
        }
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
        self.pq.is_trained()
    }

    fn train(&mut self, data: &[f32]) -> Result<()> {
        self.pq.train(data)
    }

    fn add_with_ids(&mut self, vectors: &[f32], ids: &[i64]) -> Result<()> {
        if !self.is_trained() {
            return Err(Error::InvalidInput("index is not trained".into()));
        }
        let m = self.m();
        for (row, &id) in ids.iter().enumerate() {
            let code = self.pq.encode(&vectors[row * self.dim..(row + 1) * self.dim]);
            if let Some(&slot) = self.slot.get(&id) {
                self.codes[slot * m..(slot + 1) * m].copy_from_slice(&code);
            } else {
                let slot = self.ids.len();
                self.ids.push(id);
                self.codes.extend_from_slice(&code);
                self.slot.insert(id, slot);
            }
        }
        Ok(())
    }

    fn remove_ids(&mut self, ids: &[i64]) -> usize {
        let m = self.m();
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
                let (head, tail) = self.codes.split_at_mut(last * m);
                head[slot * m..(slot + 1) * m].copy_from_slice(&tail[..m]);
                self.slot.insert(moved_id, slot);
            }
            self.ids.pop();
            self.codes.truncate(last * m);
        }
        removed
    }

    fn search(&self, query: &[f32], k: usize) -> SearchResult {
        if !self.is_trained() {
            return top_k(Vec::new(), k);
        }
        top_k(self.pairs_for(query), k)
    }

    fn range_search(&self, query: &[f32], radius: f32) -> RangeResult {
        if !self.is_trained() {
            return range_result(Vec::new());
        }
        let pairs = self
            .pairs_for(query)
            .into_iter()
            .filter(|(_, d)| *d <= radius)
            .collect();
        range_result(pairs)
    }

    fn save_payload(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let codebooks = self.pq.codebooks();
        buf.write_u64::<LittleEndian>(codebooks.len() as u64)?;
        write_f32s(&mut buf, codebooks);

        buf.write_u64::<LittleEndian>(self.ids.len() as u64)?;
        for (slot, &id) in self.ids.iter().enumerate() {
            buf.write_i64::<LittleEndian>(id)?;
            buf.extend_from_slice(self.code(slot));
        }
        Ok(buf)
    }
}
