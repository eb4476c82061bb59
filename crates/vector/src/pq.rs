//! Product quantizer.
//!
//! Splits each vector into `m` contiguous subvectors and learns a 256-entry
//! codebook per subspace, so every vector compresses to `m` bytes. Used
//! standalone by the `PQ{m}` index and as the list storage of `IVF…,PQ{m}`
//! and `HNSW…,PQ{m}` descriptors.

use crate::kmeans::{kmeans, nearest_centroid};
use axon_core::error::{Error, Result};

/// Centroids per subspace (one per code byte value)
pub const CODEBOOK_SIZE: usize = 256;

/// Trained-or-empty product quantizer
#[derive(Debug, Clone)]
pub struct ProductQuantizer {
    dim: usize,
    /// Number of subquantizers
    m: usize,
    /// Subvector width, `dim / m`
    dsub: usize,
    /// `m * 256 * dsub` floats once trained, empty before
    codebooks: Vec<f32>,
}

impl ProductQuantizer {
    /// Build an untrained quantizer. The dimension must divide evenly into
    /// `m` subspaces.
    pub fn new(dim: usize, m: usize) -> Result<Self> {
        if m == 0 || dim == 0 || dim % m != 0 {
            return Err(Error::InvalidDescriptor(format!(
                "dimension {} is not divisible into {} subquantizers",
                dim, m
            )));
        }
        Ok(ProductQuantizer {
            dim,
            m,
            dsub: dim / m,
            codebooks: Vec::new(),
        })
    }

    /// Number of subquantizers
    pub fn m(&self) -> usize {
        self.m
    }

    /// True once codebooks exist
    pub fn is_trained(&self) -> bool {
        !self.codebooks.is_empty()
    }

    /// Learn the per-subspace codebooks from row-major training data.
    pub fn train(&mut self, data: &[f32]) -> Result<()> {
        if data.is_empty() || data.len() % self.dim != 0 {
            return Err(Error::InvalidInput(
                "training data length is not a multiple of the dimension".into(),
            ));
        }
        let n = data.len() / self.dim;
        let mut codebooks = vec![0.0f32; self.m * CODEBOOK_SIZE * self.dsub];
        let mut subspace = vec![0.0f32; n * self.dsub];
        for sub in 0..self.m {
            for row in 0..n {
                let start = row * self.dim + sub * self.dsub;
                subspace[row * self.dsub..(row + 1) * self.dsub]
                    .copy_from_slice(&data[start..start + self.dsub]);
            }
            let trained = kmeans(&subspace, self.dsub, CODEBOOK_SIZE);
            let dst = sub * CODEBOOK_SIZE * self.dsub;
            codebooks[dst..dst + trained.len()].copy_from_slice(&trained);
        }
        self.codebooks = codebooks;
        Ok(())
    }

    /// Encode one vector into `m` code bytes.
    pub fn encode(&self, vector: &[f32]) -> Vec<u8> {
        debug_assert!(self.is_trained());
        debug_assert_eq!(vector.len(), self.dim);
        let mut code = Vec::with_capacity(self.m);
        for sub in 0..self.m {
            let slice = &vector[sub * self.dsub..(sub + 1) * self.dsub];
            let book = self.codebook(sub);
            code.push(nearest_centroid(slice, book, self.dsub, CODEBOOK_SIZE) as u8);
        }
        code
    }

    /// Reconstruct the vector a code represents.
    pub fn decode(&self, code: &[u8]) -> Vec<f32> {
        debug_assert!(self.is_trained());
        debug_assert_eq!(code.len(), self.m);
        let mut out = Vec::with_capacity(self.dim);
        for (sub, &byte) in code.iter().enumerate() {
            let book = self.codebook(sub);
            let centroid = &book[byte as usize * self.dsub..(byte as usize + 1) * self.dsub];
            out.extend_from_slice(centroid);
        }
        out
    }

    /// Encode then immediately decode: the quantized rendition of a vector.
    pub fn quantize(&self, vector: &[f32]) -> Vec<f32> {
        self.decode(&self.encode(vector))
    }

    fn codebook(&self, sub: usize) -> &[f32] {
        let start = sub * CODEBOOK_SIZE * self.dsub;
        &self.codebooks[start..start + CODEBOOK_SIZE * self.dsub]
    }

    /// Raw codebook floats for snapshot serialization (empty if untrained).
    pub fn codebooks(&self) -> &[f32] {
        &self.codebooks
    }

    /// Restore codebooks read from a snapshot.
    pub fn restore_codebooks(&mut self, codebooks: Vec<f32>) -> Result<()> {
        if !codebooks.is_empty() && codebooks.len() != self.m * CODEBOOK_SIZE * self.dsub {
            return Err(Error::Corruption("codebook length mismatch".into()));
        }
        self.codebooks = codebooks;
        Ok(())
    }
}
