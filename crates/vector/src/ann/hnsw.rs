//! Hierarchical navigable small world graph index.
//!
//! Multi-layer graph: layer 0 holds every node with up to `2m` edges, higher
//! layers hold a geometrically thinning subset with up to `m` edges. Search
//! greedily descends from the top layer, then beam-searches layer 0.
//!
//! Level assignment uses a SplitMix64 stream with a fixed seed and a
//! monotonic counter, and neighbor sets are ordered, so identical insert
//! sequences build identical graphs.
//!
//! With a product quantizer attached (`HNSW{n},PQ{m}`), stored vectors are
//! the quantized reconstructions and the index requires training first.

use crate::ann::{range_result, read_f32s, top_k, write_f32s, AnnIndex, RangeResult, SearchResult};
use crate::kmeans::splitmix64;
use crate::metric::distance;
use crate::pq::ProductQuantizer;
use axon_core::descriptor::AnnDescriptor;
use axon_core::error::{Error, Result};
use axon_core::DistanceMetric;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};
use std::io::Cursor;

const DEFAULT_EF_CONSTRUCTION: usize = 100;
const DEFAULT_EF_SEARCH: usize = 50;
const LEVEL_SEED: u64 = 42;
const MAX_LEVEL_CAP: usize = 32;

/// Candidate scored by distance; orders by (distance, id) so a max-heap
/// keeps the worst result on top and `Reverse` pops the nearest first.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Scored {
    dist: f32,
    id: i64,
}

impl Eq for Scored {}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist
            .partial_cmp(&other.dist)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone)]
struct Node {
    /// Neighbor ids per layer, `neighbors[layer]`
    neighbors: Vec<BTreeSet<i64>>,
    max_layer: usize,
}

impl Node {
    fn new(max_layer: usize) -> Self {
        Node {
            neighbors: (0..=max_layer).map(|_| BTreeSet::new()).collect(),
            max_layer,
        }
    }
}

/// HNSW graph index keyed by external ids
pub struct HnswIndex {
    dim: usize,
    metric: DistanceMetric,
    /// Max connections for layers above 0; layer 0 allows twice this
    m: usize,
    ef_construction: usize,
    ef_search: usize,
    /// Level multiplier, `1 / ln(m)`
    ml: f64,
    nodes: BTreeMap<i64, Node>,
    vectors: HashMap<i64, Vec<f32>>,
    entry: Option<i64>,
    max_level: usize,
    rng_counter: u64,
    pq: Option<ProductQuantizer>,
}

impl HnswIndex {
    /// Empty graph; `pq_m` attaches a product quantizer for compressed
    /// storage (the index then requires training).
    pub fn new(
        dim: usize,
        metric: DistanceMetric,
        m: usize,
        pq_m: Option<usize>,
    ) -> Result<Self> {
        let pq = pq_m.map(|m| ProductQuantizer::new(dim, m)).transpose()?;
        Ok(HnswIndex {
            dim,
            metric,
            m,
            ef_construction: DEFAULT_EF_CONSTRUCTION.max(m * 2),
            ef_search: DEFAULT_EF_SEARCH,
            ml: 1.0 / (m.max(2) as f64).ln(),
            nodes: BTreeMap::new(),
            vectors: HashMap::new(),
            entry: None,
            max_level: 0,
            rng_counter: 0,
            pq,
        })
    }

    /// Rebuild from a snapshot payload
    pub fn load(
        dim: usize,
        metric: DistanceMetric,
        m: usize,
        pq_m: Option<usize>,
        payload: &[u8],
    ) -> Result<Self> {
        let mut index = HnswIndex::new(dim, metric, m, pq_m)?;
        let mut cursor = Cursor::new(payload);

        index.rng_counter = cursor.read_u64::<LittleEndian>()?;
        let entry = cursor.read_i64::<LittleEndian>()?;
        index.entry = (entry != i64::MIN).then_some(entry);
        index.max_level = cursor.read_u32::<LittleEndian>()? as usize;

        let codebook_len = cursor.read_u64::<LittleEndian>()? as usize;
        if codebook_len > 0 {
            let codebooks = read_f32s(&mut cursor, codebook_len)?;
            index
                .pq
                .as_mut()
                .ok_or_else(|| Error::Corruption("codebooks in a non-PQ snapshot".into()))?
                .restore_codebooks(codebooks)?;
        }

        let node_count = cursor.read_u64::<LittleEndian>()? as usize;
        for _ in 0..node_count {
            let id = cursor.read_i64::<LittleEndian>()?;
            let max_layer = cursor.read_u32::<LittleEndian>()? as usize;
            let vector = read_f32s(&mut cursor, dim)?;
            let mut node = Node::new(max_layer);
            for layer in 0..=max_layer {
                let count = cursor.read_u32::<LittleEndian>()? as usize;
                for _ in 0..count {
                    node.neighbors[layer].insert(cursor.read_i64::<LittleEndian>()?);
                }
            }
            index.nodes.insert(id, node);
            index.vectors.insert(id, vector);
        }
        Ok(index)
    }

    fn max_conn(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m * 2
        } else {
            self.m
        }
    }

    fn assign_level(&mut self) -> usize {
        self.rng_counter += 1;
        let hash = splitmix64(LEVEL_SEED.wrapping_add(self.rng_counter));
        let uniform = ((hash as f64) / (u64::MAX as f64)).max(1e-15);
        ((-uniform.ln() * self.ml) as usize).min(MAX_LEVEL_CAP)
    }

    fn dist_to(&self, query: &[f32], id: i64) -> f32 {
        match self.vectors.get(&id) {
            Some(v) => distance(query, v, self.metric),
            None => f32::INFINITY,
        }
    }

    /// Beam search at one layer; returns up to `ef` nearest nodes sorted
    /// ascending by distance.
    fn search_layer(&self, query: &[f32], entry_id: i64, ef: usize, layer: usize) -> Vec<Scored> {
        let entry_dist = self.dist_to(query, entry_id);
        let mut visited = BTreeSet::new();
        visited.insert(entry_id);

        // Candidates pop nearest-first; results keep the worst on top
        let mut candidates = BinaryHeap::new();
        candidates.push(Reverse(Scored {
            dist: entry_dist,
            id: entry_id,
        }));
        let mut results: BinaryHeap<Scored> = BinaryHeap::new();
        results.push(Scored {
            dist: entry_dist,
            id: entry_id,
        });

        while let Some(Reverse(nearest)) = candidates.pop() {
            let worst = results.peek().map(|s| s.dist).unwrap_or(f32::INFINITY);
            if results.len() >= ef && nearest.dist > worst {
                break;
            }
            let Some(node) = self.nodes.get(&nearest.id) else {
                continue;
            };
            if layer >= node.neighbors.len() {
                continue;
            }
            for &neighbor in &node.neighbors[layer] {
                if !visited.insert(neighbor) {
                    continue;
                }
                let d = self.dist_to(query, neighbor);
                let worst = results.peek().map(|s| s.dist).unwrap_or(f32::INFINITY);
                if results.len() < ef || d < worst {
                    candidates.push(Reverse(Scored { dist: d, id: neighbor }));
                    results.push(Scored { dist: d, id: neighbor });
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<Scored> = results.into_vec();
        out.sort();
        out
    }

    /// Greedy descent from `from_layer` down to `to_layer`, moving to the
    /// globally best neighbor at each step.
    fn greedy_to_layer(&self, query: &[f32], entry_id: i64, from: usize, to: usize) -> i64 {
        let mut current = entry_id;
        for layer in (to..=from).rev() {
            loop {
                let mut best = Scored {
                    dist: self.dist_to(query, current),
                    id: current,
                };
                if let Some(node) = self.nodes.get(&current) {
                    if layer < node.neighbors.len() {
                        for &neighbor in &node.neighbors[layer] {
                            let candidate = Scored {
                                dist: self.dist_to(query, neighbor),
                                id: neighbor,
                            };
                            if candidate < best {
                                best = candidate;
                            }
                        }
                    }
                }
                if best.id == current {
                    break;
                }
                current = best.id;
            }
        }
        current
    }

    /// Drop the farthest edges of a node at one layer down to the cap.
    fn prune(&mut self, id: i64, layer: usize) {
        let cap = self.max_conn(layer);
        let Some(vector) = self.vectors.get(&id).cloned() else {
            return;
        };
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        if layer >= node.neighbors.len() || node.neighbors[layer].len() <= cap {
            return;
        }
        let mut scored: Vec<Scored> = node.neighbors[layer]
            .iter()
            .map(|&n| Scored {
                dist: self.dist_to(&vector, n),
                id: n,
            })
            .collect();
        scored.sort();
        let keep: BTreeSet<i64> = scored.into_iter().take(cap).map(|s| s.id).collect();
        if let Some(node) = self.nodes.get_mut(&id) {
            node.neighbors[layer] = keep;
        }
    }

    fn insert(&mut self, id: i64, stored: Vec<f32>) {
        let level = self.assign_level();
        self.nodes.insert(id, Node::new(level));
        self.vectors.insert(id, stored.clone());

        let Some(entry) = self.entry else {
            self.entry = Some(id);
            self.max_level = level;
            return;
        };

        let mut current = entry;
        if level < self.max_level {
            current = self.greedy_to_layer(&stored, entry, self.max_level, level + 1);
        }

        for layer in (0..=level.min(self.max_level)).rev() {
            let candidates = self.search_layer(&stored, current, self.ef_construction, layer);
            let selected: Vec<i64> = candidates
                .iter()
                .filter(|s| s.id != id)
                .take(self.max_conn(layer))
                .map(|s| s.id)
                .collect();
            for &neighbor in &selected {
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.neighbors[layer].insert(neighbor);
                }
                if let Some(node) = self.nodes.get_mut(&neighbor) {
                    if layer < node.neighbors.len() {
                        node.neighbors[layer].insert(id);
                    }
                }
                self.prune(neighbor, layer);
            }
            if let Some(nearest) = candidates.first() {
                current = nearest.id;
            }
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry = Some(id);
        }
    }

    fn remove_one(&mut self, id: i64) -> bool {
        if self.nodes.remove(&id).is_none() {
            return false;
        }
        self.vectors.remove(&id);
        for node in self.nodes.values_mut() {
            for layer in node.neighbors.iter_mut() {
                layer.remove(&id);
            }
        }
        if self.entry == Some(id) {
            let replacement = self
                .nodes
                .iter()
                .max_by_key(|(nid, node)| (node.max_layer, Reverse(**nid)))
                .map(|(nid, node)| (*nid, node.max_layer));
            match replacement {
                Some((nid, layer)) => {
                    self.entry = Some(nid);
                    self.max_level = layer;
                }
                None => {
                    self.entry = None;
                    self.max_level = 0;
                }
            }
        }
        true
    }

    fn all_pairs(&self, query: &[f32]) -> Vec<(i64, f32)> {
        self.vectors
            .iter()
            .map(|(&id, v)| (id, distance(query, v, self.metric)))
            .collect()
    }
}

impl AnnIndex for HnswIndex {
    fn descriptor(&self) -> AnnDescriptor {
        match &self.pq {
            None => AnnDescriptor::Hnsw { m: self.m as u32 },
            Some(pq) => AnnDescriptor::HnswPq {
                m: self.m as u32,
                pq_m: pq.m() as u32,
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
        self.nodes.len()
    }

    fn is_trained(&self) -> bool {
        self.pq.as_ref().map_or(true, ProductQuantizer::is_trained)
    }

    fn train(&mut self, data: &[f32]) -> Result<()> {
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
            let stored = match &self.pq {
                Some(pq) => pq.quantize(vector),
                None => vector.to_vec(),
            };
            self.remove_one(id);
            self.insert(id, stored);
        }
        Ok(())
    }

    fn remove_ids(&mut self, ids: &[i64]) -> usize {
        ids.iter().filter(|&&id| self.remove_one(id)).count()
    }

    fn search(&self, query: &[f32], k: usize) -> SearchResult {
        let Some(entry) = self.entry else {
            return top_k(Vec::new(), k);
        };
        let start = self.greedy_to_layer(query, entry, self.max_level, 1);
        let ef = self.ef_search.max(k);
        let beam = self.search_layer(query, start, ef, 0);
        top_k(beam.into_iter().map(|s| (s.id, s.dist)).collect(), k)
    }

    fn range_search(&self, query: &[f32], radius: f32) -> RangeResult {
        // The graph gives no radius bound, so range queries scan
        let pairs = self
            .all_pairs(query)
            .into_iter()
            .filter(|(_, d)| *d <= radius)
            .collect();
        range_result(pairs)
    }

    fn save_payload(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.write_u64::<LittleEndian>(self.rng_counter)?;
        buf.write_i64::<LittleEndian>(self.entry.unwrap_or(i64::MIN))?;
        buf.write_u32::<LittleEndian>(self.max_level as u32)?;

        let codebooks = self.pq.as_ref().map(|p| p.codebooks()).unwrap_or(&[]);
        buf.write_u64::<LittleEndian>(codebooks.len() as u64)?;
        write_f32s(&mut buf, codebooks);

        buf.write_u64::<LittleEndian>(self.nodes.len() as u64)?;
        for (&id, node) in &self.nodes {
            buf.write_i64::<LittleEndian>(id)?;
            buf.write_u32::<LittleEndian>(node.max_layer as u32)?;
            write_f32s(&mut buf, &self.vectors[&id]);
            for layer in &node.neighbors {
                buf.write_u32::<LittleEndian>(layer.len() as u32)?;
                for &neighbor in layer {
                    buf.write_i64::<LittleEndian>(neighbor)?;
                }
            }
        }
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ann::NO_ID;

    fn grid_index(n: usize) -> HnswIndex {
        let mut index = HnswIndex::new(2, DistanceMetric::L2, 8, None).unwrap();
        for i in 0..n {
            let v = [(i % 10) as f32, (i / 10) as f32];
            index.add_with_ids(&v, &[i as i64]).unwrap();
        }
        index
    }

    #[test]
    fn test_empty_search() {
        let index = HnswIndex::new(2, DistanceMetric::L2, 8, None).unwrap();
        let result = index.search(&[0.0, 0.0], 3);
        assert_eq!(result.ids, vec![NO_ID, NO_ID, NO_ID]);
    }

    #[test]
    fn test_exact_hit_is_first() {
        let index = grid_index(100);
        for probe in [0usize, 37, 99] {
            let v = [(probe % 10) as f32, (probe / 10) as f32];
            let result = index.search(&v, 1);
            assert_eq!(result.ids[0], probe as i64);
            assert!(result.distances[0] < 1e-6);
        }
    }

    #[test]
    fn test_neighbors_are_near() {
        let index = grid_index(100);
        let result = index.search(&[5.0, 5.0], 5);
        // All five results should be within a couple of grid steps
        for (&id, &d) in result.ids.iter().zip(&result.distances) {
            assert_ne!(id, NO_ID);
            assert!(d <= 2.0, "distance {} too large", d);
        }
    }

    #[test]
    fn test_remove_never_returned() {
        let mut index = grid_index(50);
        index.remove_ids(&[25]);
        let result = index.search(&[5.0, 2.0], 10);
        assert!(!result.ids.contains(&25));
    }

    #[test]
    fn test_reinsert_after_remove() {
        let mut index = grid_index(50);
        index.remove_ids(&[25]);
        index.add_with_ids(&[100.0, 100.0], &[25]).unwrap();
        let result = index.search(&[100.0, 100.0], 1);
        assert_eq!(result.ids[0], 25);
    }

    #[test]
    fn test_remove_entry_point() {
        let mut index = grid_index(20);
        let entry = index.entry.unwrap();
        assert_eq!(index.remove_ids(&[entry]), 1);
        let result = index.search(&[0.0, 0.0], 5);
        assert!(result.ids.iter().take(5).all(|&id| id != entry));
        assert_eq!(index.len(), 19);
    }

    #[test]
    fn test_upsert_moves_vector() {
        let mut index = grid_index(10);
        index.add_with_ids(&[50.0, 50.0], &[3]).unwrap();
        assert_eq!(index.len(), 10);
        let result = index.search(&[50.0, 50.0], 1);
        assert_eq!(result.ids[0], 3);
    }

    #[test]
    fn test_range_search() {
        let index = grid_index(100);
        let result = index.range_search(&[0.0, 0.0], 1.1);
        let mut labels = result.labels.clone();
        labels.sort_unstable();
        // (0,0), (1,0), (0,1) are within 1.1
        assert_eq!(labels, vec![0, 1, 10]);
    }

    #[test]
    fn test_deterministic_builds() {
        let a = grid_index(60);
        let b = grid_index(60);
        let ra = a.search(&[3.0, 3.0], 8);
        let rb = b.search(&[3.0, 3.0], 8);
        assert_eq!(ra.ids, rb.ids);
    }

    #[test]
    fn test_payload_roundtrip() {
        let index = grid_index(40);
        let payload = index.save_payload().unwrap();
        let loaded = HnswIndex::load(2, DistanceMetric::L2, 8, None, &payload).unwrap();
        assert_eq!(loaded.len(), 40);
        let before = index.search(&[4.0, 2.0], 5);
        let after = loaded.search(&[4.0, 2.0], 5);
        assert_eq!(before.ids, after.ids);
    }

    #[test]
    fn test_pq_variant_requires_training() {
        let mut index = HnswIndex::new(4, DistanceMetric::L2, 8, Some(2)).unwrap();
        assert!(!index.is_trained());
        assert!(index.add_with_ids(&[1.0, 2.0, 3.0, 4.0], &[1]).is_err());

        let data: Vec<f32> = (0..300 * 4).map(|i| (i % 50) as f32).collect();
        index.train(&data).unwrap();
        assert!(index.is_trained());
        index.add_with_ids(&[1.0, 2.0, 3.0, 4.0], &[1]).unwrap();
        let result = index.search(&[1.0, 2.0, 3.0, 4.0], 1);
        assert_eq!(result.ids[0], 1);
    }
}
