//! Session registry and the outward-facing assistant surface.
//!
//! The registry mutex guards only map add/remove/lookup. Each context sits
//! behind its own async mutex, so turns on different sessions never block
//! each other, and the registry lock is never held across a collaborator
//! call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use daysmith_schema::{ConversationContext, TurnReply};

use crate::engine::ConversationEngine;

const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<tokio::sync::Mutex<ConversationContext>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, Arc<tokio::sync::Mutex<ConversationContext>>>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn get_or_create(&self, session_id: &str) -> Arc<tokio::sync::Mutex<ConversationContext>> {
        self.map()
            .entry(session_id.to_string())
            .or_insert_with(|| {
                Arc::new(tokio::sync::Mutex::new(ConversationContext::new(
                    session_id,
                )))
            })
            .clone()
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<tokio::sync::Mutex<ConversationContext>>> {
        self.map().get(session_id).cloned()
    }

    pub fn remove(&self, session_id: &str) {
        self.map().remove(session_id);
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }
}

fn error_reply(message: impl std::fmt::Display) -> TurnReply {
    TurnReply::error(
        format!("I apologize, but I ran into a problem with that request: {message}"),
        vec![
            "Try rephrasing your request".to_string(),
            "Start a fresh session with 'clear'".to_string(),
        ],
    )
}

/// The assistant facade: one engine, many sessions.
pub struct Assistant {
    engine: ConversationEngine,
    registry: SessionRegistry,
    turn_timeout: Duration,
}

impl Assistant {
    pub fn new(engine: ConversationEngine) -> Self {
        Self {
            engine,
            registry: SessionRegistry::new(),
            turn_timeout: DEFAULT_TURN_TIMEOUT,
        }
    }

    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = timeout;
        self
    }

    /// Process one user turn. Never returns an error: collaborator failures
    /// and timeouts come back as an `Error` reply, and the session's context
    /// stays exactly as it was before the turn.
    pub async fn submit_turn(&self, session_id: &str, user_text: &str) -> TurnReply {
        let session = self.registry.get_or_create(session_id);
        let mut ctx = session.lock().await;

        match tokio::time::timeout(
            self.turn_timeout,
            self.engine.handle_turn(&mut ctx, user_text),
        )
        .await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                tracing::warn!(session_id, "turn failed: {e}");
                error_reply(e)
            }
            Err(_) => {
                tracing::warn!(session_id, "turn timed out");
                error_reply("the request timed out")
            }
        }
    }

    /// Read-only snapshot of a session's context.
    pub async fn get_context(&self, session_id: &str) -> Option<ConversationContext> {
        let session = self.registry.get(session_id)?;
        let ctx = session.lock().await;
        Some(ctx.clone())
    }

    pub fn reset_session(&self, session_id: &str) {
        self.registry.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::MockCalendarProvider;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use daysmith_memory::{PromptEmbedder, RetrievalOrchestrator, SqliteStore};
    use daysmith_provider::{GenerateReply, GenerateRequest, TextProvider};
    use daysmith_schema::TurnKind;

    struct CannedProvider(&'static str);

    #[async_trait]
    impl TextProvider for CannedProvider {
        async fn generate(&self, _request: GenerateRequest) -> Result<GenerateReply> {
            Ok(GenerateReply {
                text: self.0.to_string(),
                function_call: None,
            })
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl TextProvider for FailingProvider {
        async fn generate(&self, _request: GenerateRequest) -> Result<GenerateReply> {
            Err(anyhow!("collaborator down"))
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl TextProvider for SlowProvider {
        async fn generate(&self, _request: GenerateRequest) -> Result<GenerateReply> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(GenerateReply {
                text: "too late".to_string(),
                function_call: None,
            })
        }
    }

    fn assistant(provider: Arc<dyn TextProvider>) -> Assistant {
        let day = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let embedder = PromptEmbedder::new(Arc::new(FailingProvider), "gemini-2.0-flash");
        let engine = ConversationEngine::new(
            provider,
            Arc::new(MockCalendarProvider::with_fixtures(day)),
            Arc::new(RetrievalOrchestrator::new(embedder, store)),
            "gemini-2.0-flash",
        );
        Assistant::new(engine)
    }

    #[tokio::test]
    async fn submit_turn_creates_session_and_records_problem() {
        let assistant = assistant(Arc::new(CannedProvider("Which days feel worst?")));
        let reply = assistant.submit_turn("s1", "my week is hectic").await;
        assert_eq!(reply.kind, TurnKind::Question);

        let ctx = assistant.get_context("s1").await.unwrap();
        assert_eq!(ctx.problem_statement, "my week is hectic");
    }

    #[tokio::test]
    async fn collaborator_failure_becomes_error_reply() {
        let assistant = assistant(Arc::new(FailingProvider));
        let reply = assistant.submit_turn("s1", "my week is hectic").await;

        assert_eq!(reply.kind, TurnKind::Error);
        assert!(reply.message.contains("I apologize"));
        assert!(!reply.suggestions.is_empty());

        // The failed turn must not have touched the context.
        let ctx = assistant.get_context("s1").await.unwrap();
        assert!(ctx.problem_statement.is_empty());
    }

    #[tokio::test]
    async fn timeout_becomes_error_reply() {
        let assistant =
            assistant(Arc::new(SlowProvider)).with_turn_timeout(Duration::from_millis(50));
        let reply = assistant.submit_turn("s1", "hello").await;
        assert_eq!(reply.kind, TurnKind::Error);
        assert!(reply.message.contains("timed out"));
    }

    struct BarrierProvider(Arc<tokio::sync::Barrier>);

    #[async_trait]
    impl TextProvider for BarrierProvider {
        async fn generate(&self, _request: GenerateRequest) -> Result<GenerateReply> {
            // Only releases once both sessions' turns are in flight.
            self.0.wait().await;
            Ok(GenerateReply {
                text: "Which days feel worst?".to_string(),
                function_call: None,
            })
        }
    }

    #[tokio::test]
    async fn concurrent_turns_on_distinct_sessions_do_not_serialize() {
        let barrier = Arc::new(tokio::sync::Barrier::new(2));
        let assistant = assistant(Arc::new(BarrierProvider(barrier)))
            .with_turn_timeout(Duration::from_secs(2));

        // If one session's turn held up the other, neither would reach the
        // barrier together and both would time out.
        let (alpha, beta) = tokio::join!(
            assistant.submit_turn("alpha", "hectic mornings"),
            assistant.submit_turn("beta", "tired evenings"),
        );
        assert_eq!(alpha.kind, TurnKind::Question);
        assert_eq!(beta.kind, TurnKind::Question);
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let assistant = assistant(Arc::new(CannedProvider("Which days?")));
        assistant.submit_turn("alpha", "hectic mornings").await;
        assistant.submit_turn("beta", "tired evenings").await;

        let alpha = assistant.get_context("alpha").await.unwrap();
        let beta = assistant.get_context("beta").await.unwrap();
        assert_eq!(alpha.problem_statement, "hectic mornings");
        assert_eq!(beta.problem_statement, "tired evenings");
    }

    #[tokio::test]
    async fn reset_drops_the_session() {
        let assistant = assistant(Arc::new(CannedProvider("Which days?")));
        assistant.submit_turn("s1", "hectic week").await;
        assistant.reset_session("s1");
        assert!(assistant.get_context("s1").await.is_none());
    }

    #[tokio::test]
    async fn registry_reuses_existing_session() {
        let registry = SessionRegistry::new();
        let first = registry.get_or_create("s1");
        let second = registry.get_or_create("s1");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }
}
