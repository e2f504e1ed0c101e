//! Cross-attention meta-adapter
//!
//! Transforms static class embeddings into support-conditioned prototypes:
//! each class's query vector attends over that class's memory of recent
//! support embeddings. Input shapes are `query [K, D]` and
//! `key/value [K, M, D]`; the output is `[K, D]` with a residual connection
//! from the query.

use crate::error::Result;
use candle_core::{Tensor, D};
use candle_nn::{linear, Linear, Module, VarBuilder};

/// Single-head cross-attention over per-class support memories
#[derive(Debug)]
pub struct MetaAdapter {
    query_proj: Linear,
    key_proj: Linear,
    value_proj: Linear,
    output_proj: Linear,
    embed_dim: usize,
}

impl MetaAdapter {
    /// Create a meta-adapter for embeddings of dimension `embed_dim`
    pub fn new(embed_dim: usize, vb: VarBuilder) -> Result<Self> {
        let query_proj = linear(embed_dim, embed_dim, vb.pp("query"))?;
        let key_proj = linear(embed_dim, embed_dim, vb.pp("key"))?;
        let value_proj = linear(embed_dim, embed_dim, vb.pp("value"))?;
        let output_proj = linear(embed_dim, embed_dim, vb.pp("output"))?;
        Ok(Self {
            query_proj,
            key_proj,
            value_proj,
            output_proj,
            embed_dim,
        })
    }

    /// Embedding dimension
    pub fn embed_dim(&self) -> usize {
        self.embed_dim
    }

    /// Forward pass
    ///
    /// `query [K, D]`, `key [K, M, D]`, `value [K, M, D]` -> `[K, D]`.
    /// Classes are treated as the batch axis; class `k`'s query attends only
    /// over class `k`'s memory rows.
    pub fn forward(&self, query: &Tensor, key: &Tensor, value: &Tensor) -> Result<Tensor> {
        let (_k_classes, d) = query.dims2()?;

        let q = self.query_proj.forward(query)?.unsqueeze(1)?; // [K, 1, D]
        let k = self.key_proj.forward(key)?; // [K, M, D]
        let v = self.value_proj.forward(value)?; // [K, M, D]

        let scale = 1.0 / (d as f64).sqrt();
        let scores = (q.matmul(&k.t()?)? * scale)?; // [K, 1, M]
        let attn = candle_nn::ops::softmax(&scores, D::Minus1)?;

        let context = attn.matmul(&v)?.squeeze(1)?; // [K, D]
        let context = self.output_proj.forward(&context)?;

        // Residual from the raw query keeps the adapted prototypes anchored
        // to the static class embeddings.
        Ok((query + context)?)
    }
}
