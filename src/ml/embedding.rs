use std::hash::{Hash, Hasher};

/// Batch size used when feeding texts to a frozen encoder, bounding memory.
pub const EMBEDDING_CHUNK_SIZE: usize = 64;

/// A frozen document encoder producing dense vectors.
///
/// The pipeline only relies on this seam; transformer encoders plug in
/// behind it exactly like the in-crate [`HashingEmbedder`].
pub trait DocumentEmbedder {
    /// Width of every produced vector.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts, one vector per text, in input order.
    fn embed_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Embed texts in fixed-size chunks, preserving input order so the rows
/// align positionally with the text list used afterwards.
pub fn embed_chunked(
    embedder: &dyn DocumentEmbedder,
    texts: &[&str],
    chunk_size: usize,
) -> anyhow::Result<Vec<Vec<f32>>> {
    let mut rows = Vec::with_capacity(texts.len());
    for chunk in texts.chunks(chunk_size.max(1)) {
        let embedded = embedder.embed_batch(chunk)?;
        anyhow::ensure!(
            embedded.len() == chunk.len(),
            "embedder returned {} rows for a chunk of {}",
            embedded.len(),
            chunk.len()
        );
        rows.extend(embedded);
    }
    Ok(rows)
}

/// Deterministic signed feature-hashing embedder.
///
/// Tokens are hashed into a fixed number of buckets with a hash-derived
/// sign, and the result is L2-normalized. No fitting, no vocabulary, fully
/// reproducible across runs, which also makes it the reference embedder in
/// tests.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension: dimension.max(1) }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl DocumentEmbedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut row = vec![0.0f32; self.dimension];
                for token in text
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|t| !t.is_empty())
                {
                    let mut hasher = std::collections::hash_map::DefaultHasher::new();
                    token.to_lowercase().hash(&mut hasher);
                    let hashed = hasher.finish();
                    let bucket = (hashed % self.dimension as u64) as usize;
                    let sign = if hashed & (1 << 63) == 0 { 1.0 } else { -1.0 };
                    row[bucket] += sign;
                }
                let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt();
                if norm > 0.0 {
                    for value in row.iter_mut() {
                        *value /= norm;
                    }
                }
                row
            })
            .collect())
    }
}
