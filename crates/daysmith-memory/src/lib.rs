//! Similarity memory for the scheduling assistant: embeddings, the SQLite
//! collection store, and the recall orchestrator that feeds prompt context.

pub mod embedding;
pub mod recall;
pub mod store;

pub use embedding::{
    cosine_similarity, fallback_embed, fit_dimension, parse_embedding_text, top_k, PromptEmbedder,
    Ranked, EMBEDDING_DIM,
};
pub use recall::{is_light_next_24h, RecallBundle, RetrievalOrchestrator};
pub use store::{
    RoutineRecord, Scored, SimilarityStore, SnippetRecord, SqliteStore, UtteranceRecord,
};
