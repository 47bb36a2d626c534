//! Retrieval orchestration: embed a user query once, fan out to the three
//! similarity collections, and bundle the matches (plus a schedule-load
//! flag) into prompt context for the text-generation collaborator.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use daysmith_schema::{short_id, CalendarEvent};

use crate::embedding::PromptEmbedder;
use crate::store::{
    RoutineRecord, Scored, SimilarityStore, SnippetRecord, UtteranceRecord,
};

/// Busy-time threshold under which the next 24 hours count as "light".
const LIGHT_BUSY_MINUTES: i64 = 120;

#[derive(Debug, Clone, Default)]
pub struct RecallBundle {
    pub snippets: Vec<Scored<SnippetRecord>>,
    pub routines: Vec<Scored<RoutineRecord>>,
    pub utterances: Vec<Scored<UtteranceRecord>>,
    pub light_schedule: bool,
}

impl RecallBundle {
    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty() && self.routines.is_empty() && self.utterances.is_empty()
    }

    pub fn to_prompt_text(&self) -> String {
        let mut parts = Vec::new();

        parts.push(format!(
            "Schedule: {}",
            if self.light_schedule {
                "Light schedule"
            } else {
                "Busy schedule"
            }
        ));

        if !self.snippets.is_empty() {
            parts.push("Relevant plan snippets:".to_string());
            for snippet in &self.snippets {
                parts.push(format!("- {}", snippet.record.content));
            }
        }

        if !self.routines.is_empty() {
            parts.push("User routines to consider:".to_string());
            for routine in &self.routines {
                parts.push(format!("- {}", routine.record.pattern));
            }
        }

        if !self.utterances.is_empty() {
            parts.push("Similar past requests:".to_string());
            for utterance in &self.utterances {
                parts.push(format!("- {}", utterance.record.transcript));
            }
        }

        parts.join("\n")
    }
}

/// Total minutes of events overlapping `[from, from + 24h)`.
fn busy_minutes_next_24h(events: &[CalendarEvent], from: DateTime<Utc>) -> i64 {
    let until = from + Duration::hours(24);
    events
        .iter()
        .map(|event| {
            let start = event.start.max(from);
            let end = event.end.min(until);
            (end - start).num_minutes().max(0)
        })
        .sum()
}

/// Whether the next 24 hours carry under two busy hours.
pub fn is_light_next_24h(events: &[CalendarEvent], from: DateTime<Utc>) -> bool {
    busy_minutes_next_24h(events, from) < LIGHT_BUSY_MINUTES
}

pub struct RetrievalOrchestrator {
    embedder: PromptEmbedder,
    store: Arc<dyn SimilarityStore>,
}

impl RetrievalOrchestrator {
    pub fn new(embedder: PromptEmbedder, store: Arc<dyn SimilarityStore>) -> Self {
        Self { embedder, store }
    }

    /// Embed `query` and collect the k nearest matches from each collection.
    pub async fn recall(
        &self,
        query: &str,
        events: &[CalendarEvent],
        k: usize,
        tag_filter: Option<&[String]>,
    ) -> Result<RecallBundle> {
        let query_embedding = self.embedder.embed(query).await;

        let snippets = self
            .store
            .nearest_snippets(&query_embedding, k, tag_filter)
            .await?;
        let routines = self.store.nearest_routines(&query_embedding, k).await?;
        let utterances = self.store.nearest_utterances(&query_embedding, k).await?;

        tracing::debug!(
            snippets = snippets.len(),
            routines = routines.len(),
            utterances = utterances.len(),
            "recall complete"
        );

        Ok(RecallBundle {
            snippets,
            routines,
            utterances,
            light_schedule: is_light_next_24h(events, Utc::now()),
        })
    }

    /// Store a user utterance with its embedding for future few-shot recall.
    pub async fn record_utterance(
        &self,
        transcript: &str,
        intent: &str,
        accepted: bool,
    ) -> Result<()> {
        let embedding = self.embedder.embed(transcript).await;
        self.store
            .insert_utterance(
                UtteranceRecord {
                    id: short_id("utterance"),
                    transcript: transcript.to_string(),
                    intent: intent.to_string(),
                    accepted,
                },
                &embedding,
            )
            .await
    }

    pub async fn record_snippet(&self, content: &str, tags: &[String]) -> Result<()> {
        let embedding = self.embedder.embed(content).await;
        self.store
            .insert_snippet(
                SnippetRecord {
                    id: short_id("snippet"),
                    content: content.to_string(),
                    tags: tags.to_vec(),
                },
                &embedding,
            )
            .await
    }

    pub async fn record_routine(
        &self,
        pattern: &str,
        time_window: Option<daysmith_schema::TimeWindow>,
    ) -> Result<()> {
        let embedding = self.embedder.embed(pattern).await;
        self.store
            .insert_routine(
                RoutineRecord {
                    id: short_id("routine"),
                    pattern: pattern.to_string(),
                    time_window,
                },
                &embedding,
            )
            .await
    }
}
