//! Inverted-file index.
//!
//! A k-means-trained coarse quantizer assigns every vector to one of
//! `nlist` cells; search probes the nearest quarter of the cells (at least
//! one) and scans their lists. List storage is either raw vectors or, with
//! a product quantizer attached (`IVF{n},PQ{m}`), quantized reconstructions.
//!
//! Untrained indexes accept no vectors; callers stage inserts until the
//! training threshold is met.

use crate::ann::{range_result, read_f32s, top_k, write_f32s, AnnIndex, RangeResult, SearchResult};
use crate::kmeans::{kmeans, nearest_centroid};
use crate::metric::distance;
use crate::pq::ProductQuantizer;
use axon_core::descriptor::{AnnDescriptor, IvfStorage};
use axon_core::error::{Error, Result};
use axon_core::DistanceMetric;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

struct ListEntry {
    id: i64,
    /// Raw vector, or the quantized reconstruction under PQ storage
    vector: Vec<f32>,
}

/// IVF index with optional PQ list storage
pub struct IvfIndex {
    dim: usize,
    metric: DistanceMetric,
    nlist: usize,
    /// `nlist * dim` floats once trained, empty before
    centroids: Vec<f32>,
    lists: Vec<Vec<ListEntry>>,
    pq: Option<ProductQuantizer>,
    count: usize,
}

impl IvfIndex {
    /// Empty, untrained index
    pub fn new(
        dim: usize,
        metric: DistanceMetric,
        nlist: usize,
        pq_m: Option<usize>,
    ) -> Result<Self> {
        let pq = pq_m.map(|m| ProductQuantizer::new(dim, m)).transpose()?;
        Ok(IvfIndex {
            dim,
            metric,
            nlist,
            centroids: Vec::new(),
            lists: (0..nlist).map(|_| Vec::new()).collect(),
            pq,
            count: 0,
        })
    }

    /// Rebuild from a snapshot payload
    pub fn load(
        dim: usize,
        metric: DistanceMetric,
        nlist: usize,
        pq_m: Option<usize>,
        payload: &[u8],
    ) -> Result<Self> {
        let mut index = IvfIndex::new(dim, metric, nlist, pq_m)?;
        let mut cursor = Cursor::new(payload);

        let centroid_len = cursor.read_u64::<LittleEndian>()? as usize;
        index.centroids = read_f32s(&mut cursor, centroid_len)?;

        let codebook_len = cursor.read_u64::<LittleEndian>()? as usize;
        if codebook_len > 0 {
            let codebooks = read_f32s(&mut cursor, codebook_len)?;
            index
                .pq
                .as_mut()
                .ok_or_else(|| Error::Corruption("codebooks in a non-PQ snapshot".into()))?
                .restore_codebooks(codebooks)?;
        }

        for list in index.lists.iter_mut() {
            let entries = cursor.read_u64::<LittleEndian>()? as usize;
            for _ in 0..entries {
                let id = cursor.read_i64::<LittleEndian>()?;
                let vector = read_f32s(&mut cursor, dim)?;
                list.push(ListEntry { id, vector });
                index.count += 1;
            }
        }
        Ok(index)
    }

    /// How many cells a search probes
    fn nprobe(&self) -> usize {
        (self.nlist / 4).max(1)
    }

    /// Cells nearest the query, by the configured metric
    fn probe_order(&self, query: &[f32]) -> Vec<usize> {
        let mut cells: Vec<(usize, f32)> = (0..self.nlist)
            .map(|c| {
                let centroid = &self.centroids[c * self.dim..(c + 1) * self.dim];
                (c, distance(query, centroid, self.metric))
            })
            .collect();
        cells.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        cells.truncate(self.nprobe());
        cells.into_iter().map(|(c, _)| c).collect()
    }

    fn remove_one(&mut self, id: i64) -> bool {
        for list in self.lists.iter_mut() {
            if let Some(pos) = list.iter().position(|e| e.id == id) {
                list.swap_remove(pos);
                self.count -= 1;
                return true;
            }
        }
        false
    }
}

impl AnnIndex for IvfIndex {
    fn descriptor(&self) -> AnnDescriptor {
        AnnDescriptor::Ivf {
            nlist: self.nlist as u32,
            storage: match &self.pq {
                None => IvfStorage::Flat,
                Some(pq) => IvfStorage::Pq(pq.m() as u32),
            },
        }
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn len(&self) -> usize {
        self.count
    }

    fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
            && self.pq.as_ref().map_or(true, ProductQuantizer::is_trained)
    }

    fn train(&mut self, data: &[f32]) -> Result<()> {
        if data.is_empty() || data.len() % self.dim != 0 {
            return Err(Error::InvalidInput(
                "training data length is not a multiple of the dimension".into(),
            ));
        }
        self.centroids = kmeans(data, self.dim, self.nlist);
        if let Some(pq) = &mut self.pq {
            pq.train(data)?;
        }
        Ok(())
    }

    fn add_with_ids(&mut self, vectors: &[f32], ids: &[i64]) -> Result<()> {
        if !self.is_trained() {
            return Err(Error::InvalidInput("index is not trained".into()));
        }
        for (row, &id) in ids.iter().enumerate() {
            let vector = &vectors[row * self.dim..(row + 1) * self.dim];
            self.remove_one(id);
            let cell = nearest_centroid(vector, &self.centroids, self.dim, self.nlist);
            let stored = match &self.pq {
                Some(pq) => pq.quantize(vector),
                None => vector.to_vec(),
            };
            self.lists[cell].push(ListEntry { id, vector: stored });
            self.count += 1;
        }
        Ok(())
    }

    fn remove_ids(&mut self, ids: &[i64]) -> usize {
        ids.iter().filter(|&&id| self.remove_one(id)).count()
    }

    fn search(&self, query: &[f32], k: usize) -> SearchResult {
        if !self.is_trained() || self.count == 0 {
            return top_k(Vec::new(), k);
        }
        let mut pairs = Vec::new();
        for cell in self.probe_order(query) {
            for entry in &self.lists[cell] {
                pairs.push((entry.id, distance(query, &entry.vector, self.metric)));
            }
        }
        top_k(pairs, k)
    }

    fn range_search(&self, query: &[f32], radius: f32) -> RangeResult {
        if !self.is_trained() || self.count == 0 {
            return range_result(Vec::new());
        }
        let mut pairs = Vec::new();
        for cell in self.probe_order(query) {
            for entry in &self.lists[cell] {
                let d = distance(query, &entry.vector, self.metric);
                if d <= radius {
                    pairs.push((entry.id, d));
                }
            }
        }
        range_result(pairs)
    }

    fn save_payload(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.write_u64::<LittleEndian>(self.centroids.len() as u64)?;
        write_f32s(&mut buf, &self.centroids);

        let codebooks = self.pq.as_ref().map(|p| p.codebooks()).unwrap_or(&[]);
        buf.write_u64::<LittleEndian>(codebooks.len() as u64)?;
        write_f32s(&mut buf, codebooks);

        for list in &self.lists {
            buf.write_u64::<LittleEndian>(list.len() as u64)?;
            for entry in list {
                buf.write_i64::<LittleEndian>(entry.id)?;
                write_f32s(&mut buf, &entry.vector);
            }
        }
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ann::NO_ID;

    /// Clustered training data: four tight clusters on a 2D grid
    fn clustered_data(per_cluster: usize) -> Vec<f32> {
        let centers = [(0.0, 0.0), (10.0, 0.0), (0.0, 10.0), (10.0, 10.0)];
        let mut data = Vec::new();
        for (i, (cx, cy)) in centers.iter().enumerate() {
            for j in 0..per_cluster {
                data.push(cx + ((i + j) % 5) as f32 * 0.05);
                data.push(cy + ((i * j) % 5) as f32 * 0.05);
            }
        }
        data
    }

    fn trained_index() -> IvfIndex {
        let mut index = IvfIndex::new(2, DistanceMetric::L2, 4, None).unwrap();
        let data = clustered_data(4);
        index.train(&data).unwrap();
        let ids: Vec<i64> = (0..16).collect();
        index.add_with_ids(&data, &ids).unwrap();
        index
    }

    #[test]
    fn test_untrained_rejects_adds() {
        let mut index = IvfIndex::new(2, DistanceMetric::L2, 4, None).unwrap();
        assert!(!index.is_trained());
        assert!(index.add_with_ids(&[0.0, 0.0], &[1]).is_err());
    }

    #[test]
    fn test_untrained_search_is_empty() {
        let index = IvfIndex::new(2, DistanceMetric::L2, 4, None).unwrap();
        let result = index.search(&[0.0, 0.0], 3);
        assert_eq!(result.ids, vec![NO_ID, NO_ID, NO_ID]);
    }

    #[test]
    fn test_search_finds_own_cluster() {
        let index = trained_index();
        let result = index.search(&[10.0, 10.0], 4);
        assert_ne!(result.ids[0], NO_ID);
        // The nearest hits must come from the (10,10) cluster, ids 12..16
        assert!(result.ids[0] >= 12, "got {:?}", result.ids);
    }

    #[test]
    fn test_remove_and_reinsert() {
        let mut index = trained_index();
        assert_eq!(index.remove_ids(&[12, 13, 999]), 2);
        assert_eq!(index.len(), 14);
        index.add_with_ids(&[10.0, 10.0], &[12]).unwrap();
        let result = index.search(&[10.0, 10.0], 1);
        assert_eq!(result.ids[0], 12);
    }

    #[test]
    fn test_range_search_radius() {
        let index = trained_index();
        let result = index.range_search(&[0.0, 0.0], 1.0);
        assert_eq!(result.lims, vec![0, result.labels.len()]);
        assert!(!result.labels.is_empty());
        assert!(result.labels.iter().all(|&id| id < 4));
    }

    #[test]
    fn test_payload_roundtrip() {
        let index = trained_index();
        let payload = index.save_payload().unwrap();
        let loaded = IvfIndex::load(2, DistanceMetric::L2, 4, None, &payload).unwrap();
        assert!(loaded.is_trained());
        assert_eq!(loaded.len(), 16);
        let before = index.search(&[10.0, 0.0], 3);
        let after = loaded.search(&[10.0, 0.0], 3);
        assert_eq!(before.ids, after.ids);
    }

    #[test]
    fn test_ivf_pq_variant() {
        let mut index = IvfIndex::new(2, DistanceMetric::L2, 2, Some(2)).unwrap();
        assert!(!index.is_trained());

        // PQ needs a rich sample; reuse the cluster generator
        let data = clustered_data(80);
        index.train(&data).unwrap();
        assert!(index.is_trained());

        let ids: Vec<i64> = (0..320).collect();
        index.add_with_ids(&data, &ids).unwrap();
        let result = index.search(&[10.0, 10.0], 4);
        // Quantized storage still lands in the right cluster (ids 240..320)
        assert!(result.ids[0] >= 240, "got {:?}", result.ids);
    }
}
