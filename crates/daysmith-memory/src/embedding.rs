//! Text-to-vector embedding with a deterministic fallback.
//!
//! The primary path asks the text-generation collaborator to emit the vector
//! as comma-separated floats, which is inherently best-effort. The fallback
//! is the real guarantee: a pure hash-derived vector, reproducible
//! bit-for-bit for the same input text.

use std::cmp::Ordering;
use std::sync::Arc;

use daysmith_provider::{GenerateRequest, TextProvider};
use daysmith_schema::ScheduleError;
use sha2::{Digest, Sha256};

pub const EMBEDDING_DIM: usize = 768;

/// One ranked candidate from [`top_k`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ranked {
    pub index: usize,
    pub score: f32,
}

/// Deterministic hash-derived embedding. Each dimension hashes a source
/// substring of the lowercased text: the whole text while the dimension
/// index is within its character length, otherwise a whitespace-split word
/// chosen by `index mod word_count`.
pub fn fallback_embed(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let char_len = lower.chars().count();
    let words: Vec<&str> = lower.split_whitespace().collect();

    (0..EMBEDDING_DIM)
        .map(|i| {
            let source = if i < char_len || words.is_empty() {
                lower.as_str()
            } else {
                words[i % words.len()]
            };
            hash_to_unit_range(source, i)
        })
        .collect()
}

fn hash_to_unit_range(source: &str, index: usize) -> f32 {
    let mut hasher = Sha256::new();
    hasher.update(format!("{source}_{index}").as_bytes());
    let hash = hasher.finalize();
    let value = u32::from_le_bytes([hash[0], hash[1], hash[2], hash[3]]);
    ((value as f64 / 2f64.powi(31)) - 1.0) as f32
}

/// Parse a free-text response into floats: strip everything but digits,
/// `.`, `,`, `-`, then split on commas.
pub fn parse_embedding_text(raw: &str) -> Result<Vec<f32>, ScheduleError> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .collect();

    let mut values = Vec::new();
    for piece in cleaned.split(',') {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        let value: f32 = piece
            .parse()
            .map_err(|_| ScheduleError::Parse(format!("not a float: {piece:?}")))?;
        values.push(value);
    }

    if values.is_empty() {
        return Err(ScheduleError::Parse(
            "no numeric values in embedding response".to_string(),
        ));
    }
    Ok(values)
}

/// Never reject a short/long vector: truncate past `EMBEDDING_DIM`,
/// right-pad with zeros below it.
pub fn fit_dimension(mut values: Vec<f32>) -> Vec<f32> {
    values.truncate(EMBEDDING_DIM);
    values.resize(EMBEDDING_DIM, 0.0);
    values
}

/// Cosine similarity; 0.0 (not NaN) when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Rank candidates by descending similarity to the query and keep the first
/// `k`. Stable sort, so ties keep candidate input order. A `k` larger than
/// the candidate count returns everything.
pub fn top_k(query: &[f32], candidates: &[Vec<f32>], k: usize) -> Vec<Ranked> {
    let mut ranked: Vec<Ranked> = candidates
        .iter()
        .enumerate()
        .map(|(index, candidate)| Ranked {
            index,
            score: cosine_similarity(query, candidate),
        })
        .collect();
    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    ranked.truncate(k);
    ranked
}

fn embedding_prompt(text: &str) -> String {
    format!(
        "Generate a semantic embedding for the following text.\n\
         The embedding should capture the meaning, intent, and context of the text.\n\
         Return the embedding as a list of {EMBEDDING_DIM} floating-point numbers between -1 and 1.\n\n\
         Text: {text}\n\n\
         Please provide only the embedding vector as a comma-separated list of numbers."
    )
}

/// Embedder that prompts the text-generation collaborator and falls back to
/// [`fallback_embed`] on any failure. `embed` itself never fails.
pub struct PromptEmbedder {
    provider: Arc<dyn TextProvider>,
    model: String,
}

impl PromptEmbedder {
    pub fn new(provider: Arc<dyn TextProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    pub async fn embed(&self, text: &str) -> Vec<f32> {
        match self.try_generate(text).await {
            Ok(vector) => vector,
            Err(e) => {
                tracing::debug!("embedding fell back to deterministic path: {e}");
                fallback_embed(text)
            }
        }
    }

    async fn try_generate(&self, text: &str) -> Result<Vec<f32>, ScheduleError> {
        let request = GenerateRequest::simple(self.model.clone(), embedding_prompt(text));
        let reply = self
            .provider
            .generate(request)
            .await
            .map_err(|e| ScheduleError::Collaborator(e.to_string()))?;

        if reply.text.trim().is_empty() {
            return Err(ScheduleError::Parse("empty embedding response".to_string()));
        }
        let values = parse_embedding_text(&reply.text)?;
        Ok(fit_dimension(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use daysmith_provider::GenerateReply;

    struct FailingProvider;

    #[async_trait]
    impl TextProvider for FailingProvider {
        async fn generate(&self, _request: GenerateRequest) -> anyhow::Result<GenerateReply> {
            Err(anyhow!("unavailable"))
        }
    }

    struct CannedProvider(String);

    #[async_trait]
    impl TextProvider for CannedProvider {
        async fn generate(&self, _request: GenerateRequest) -> anyhow::Result<GenerateReply> {
            Ok(GenerateReply {
                text: self.0.clone(),
                function_call: None,
            })
        }
    }

    #[test]
    fn fallback_embed_is_deterministic() {
        let a = fallback_embed("propose 90-min focus blocks today");
        let b = fallback_embed("propose 90-min focus blocks today");
        assert_eq!(a, b);
    }

    #[test]
    fn fallback_embed_length_and_range() {
        let vector = fallback_embed("schedule focused work sessions");
        assert_eq!(vector.len(), EMBEDDING_DIM);
        assert!(vector.iter().all(|v| (-1.0..1.0).contains(v)));
    }

    #[test]
    fn fallback_embed_differs_by_text() {
        assert_ne!(fallback_embed("morning run"), fallback_embed("evening run"));
    }

    #[test]
    fn fallback_embed_empty_text() {
        let vector = fallback_embed("");
        assert_eq!(vector.len(), EMBEDDING_DIM);
    }

    #[test]
    fn parse_strips_prose() {
        let values = parse_embedding_text("Here you go: 0.1, -0.5, 0.25").unwrap();
        assert_eq!(values, vec![0.1, -0.5, 0.25]);
    }

    #[test]
    fn parse_rejects_empty() {
        assert!(parse_embedding_text("no numbers here at all!").is_err());
    }

    #[test]
    fn fit_dimension_truncates_and_pads() {
        let long = vec![1.0; EMBEDDING_DIM + 10];
        assert_eq!(fit_dimension(long).len(), EMBEDDING_DIM);

        let short = fit_dimension(vec![0.5, 0.5]);
        assert_eq!(short.len(), EMBEDDING_DIM);
        assert_eq!(short[0], 0.5);
        assert_eq!(short[2], 0.0);
    }

    #[test]
    fn cosine_similarity_identity() {
        let v = fallback_embed("lunch at noon");
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn cosine_similarity_zero_norm_is_zero() {
        let zero = vec![0.0; 4];
        let other = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(cosine_similarity(&zero, &other), 0.0);
    }

    #[test]
    fn top_k_sorted_descending() {
        let query = vec![1.0, 0.0];
        let candidates = vec![
            vec![0.0, 1.0],
            vec![1.0, 0.0],
            vec![1.0, 1.0],
        ];
        let ranked = top_k(&query, &candidates, 3);
        assert_eq!(ranked[0].index, 1);
        assert!(ranked[0].score >= ranked[1].score);
        assert!(ranked[1].score >= ranked[2].score);
    }

    #[test]
    fn top_k_larger_than_candidates_returns_all() {
        let query = vec![1.0, 0.0];
        let candidates = vec![vec![1.0, 0.0]];
        assert_eq!(top_k(&query, &candidates, 10).len(), 1);
    }

    #[test]
    fn top_k_ties_keep_input_order() {
        let query = vec![1.0, 0.0];
        let candidates = vec![vec![2.0, 0.0], vec![4.0, 0.0]];
        let ranked = top_k(&query, &candidates, 2);
        assert_eq!(ranked[0].index, 0);
        assert_eq!(ranked[1].index, 1);
    }

    #[tokio::test]
    async fn embed_falls_back_on_collaborator_failure() {
        let embedder = PromptEmbedder::new(Arc::new(FailingProvider), "gemini-2.0-flash");
        let vector = embedder.embed("plan my tuesday").await;
        assert_eq!(vector, fallback_embed("plan my tuesday"));
    }

    #[tokio::test]
    async fn embed_falls_back_on_unparseable_response() {
        let embedder = PromptEmbedder::new(
            Arc::new(CannedProvider("I cannot produce embeddings".to_string())),
            "gemini-2.0-flash",
        );
        let vector = embedder.embed("plan my tuesday").await;
        assert_eq!(vector, fallback_embed("plan my tuesday"));
    }

    #[tokio::test]
    async fn embed_parses_and_pads_primary_response() {
        let embedder = PromptEmbedder::new(
            Arc::new(CannedProvider("0.5, -0.25, 0.125".to_string())),
            "gemini-2.0-flash",
        );
        let vector = embedder.embed("plan my tuesday").await;
        assert_eq!(vector.len(), EMBEDDING_DIM);
        assert_eq!(vector[0], 0.5);
        assert_eq!(vector[1], -0.25);
        assert_eq!(vector[3], 0.0);
    }
}
