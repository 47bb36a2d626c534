//! Turn-by-turn conversation logic.
//!
//! The engine is stateless: all dialogue state lives in the
//! `ConversationContext` it is handed. Each turn mutates a scratch copy and
//! commits it only when the whole turn succeeds, so a failed collaborator
//! call can never leave the context half-updated.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use daysmith_memory::RetrievalOrchestrator;
use daysmith_provider::{FunctionCall, GenerateRequest, TextProvider};
use daysmith_schema::{CalendarEvent, ConversationContext, TurnKind, TurnReply};
use serde::Deserialize;

use crate::calendar::CalendarProvider;
use crate::conflict::find_conflicts;
use crate::prompts::{context_block, tool_defs, SYSTEM_PROMPT};
use crate::proposal::build_proposal;
use crate::sleep::estimate_sleep_impact;

const RECALL_K: usize = 3;
const SNAPSHOT_DAYS: i64 = 7;

/// A collaborator reply counts as a clarifying question when it asks one
/// and is not itself announcing a proposal. No array-length guard is
/// needed: answers are only ever recorded against an outstanding question,
/// so appending the new question keeps the parallel arrays aligned.
fn is_clarifying_question(text: &str) -> bool {
    text.contains('?') && !text.to_lowercase().contains("proposal")
}

/// Readiness signal: the reply talks about the proposal or the schedule
/// itself instead of asking for more input.
fn signals_readiness(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("proposal") || lower.contains("schedule")
}

#[derive(Deserialize)]
struct CreateEventArgs {
    title: String,
    start: chrono::DateTime<Utc>,
    end: chrono::DateTime<Utc>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Deserialize)]
struct UpdateEventArgs {
    event_id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    start: Option<chrono::DateTime<Utc>>,
    #[serde(default)]
    end: Option<chrono::DateTime<Utc>>,
}

#[derive(Deserialize)]
struct DeleteEventArgs {
    event_id: String,
}

#[derive(Deserialize, Default)]
struct ProposalArgs {
    #[serde(default)]
    problem_description: Option<String>,
}

pub struct ConversationEngine {
    provider: Arc<dyn TextProvider>,
    calendar: Arc<dyn CalendarProvider>,
    recall: Arc<RetrievalOrchestrator>,
    model: String,
}

impl ConversationEngine {
    pub fn new(
        provider: Arc<dyn TextProvider>,
        calendar: Arc<dyn CalendarProvider>,
        recall: Arc<RetrievalOrchestrator>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            calendar,
            recall,
            model: model.into(),
        }
    }

    /// Process one user turn against `ctx`. On error the context is left
    /// exactly as it was.
    pub async fn handle_turn(
        &self,
        ctx: &mut ConversationContext,
        user_text: &str,
    ) -> Result<TurnReply> {
        let mut scratch = ctx.clone();
        let mut recorded_answer = false;

        if scratch.problem_statement.is_empty() {
            scratch.set_problem_statement(user_text);
            self.refresh_events(&mut scratch).await?;
        } else if scratch.outstanding_questions() > 0 {
            scratch.user_answers.push(user_text.to_string());
            recorded_answer = true;
        }

        let bundle = self
            .recall
            .recall(user_text, &scratch.current_events, RECALL_K, None)
            .await?;

        let mut prompt = context_block(&scratch);
        if !bundle.is_empty() || bundle.light_schedule {
            prompt.push_str("\n\n");
            prompt.push_str(&bundle.to_prompt_text());
        }
        prompt.push_str("\n\nUser: ");
        prompt.push_str(user_text);

        let mut request = GenerateRequest::simple(self.model.clone(), prompt);
        request.system = Some(SYSTEM_PROMPT.to_string());
        request.tools = tool_defs();

        let reply = self.provider.generate(request).await?;

        let turn = if let Some(call) = reply.function_call {
            self.dispatch_function(&mut scratch, call).await?
        } else if is_clarifying_question(&reply.text) {
            scratch.clarifying_questions.push(reply.text.clone());
            TurnReply {
                kind: TurnKind::Question,
                message: reply.text,
                proposal: None,
                suggestions: Vec::new(),
            }
        } else if signals_readiness(&reply.text) {
            self.issue_proposal(&mut scratch, Some(reply.text))?
        } else if recorded_answer {
            TurnReply {
                kind: TurnKind::AnswerAck,
                message: reply.text,
                proposal: None,
                suggestions: Vec::new(),
            }
        } else {
            TurnReply::plain(reply.text)
        };

        if let Err(e) = self
            .recall
            .record_utterance(user_text, "planning_request", false)
            .await
        {
            tracing::warn!("failed to store utterance: {e}");
        }

        *ctx = scratch;
        Ok(turn)
    }

    /// Replace the event snapshot wholesale with the next week of events.
    async fn refresh_events(&self, ctx: &mut ConversationContext) -> Result<()> {
        let now = Utc::now();
        ctx.current_events = self
            .calendar
            .list_events(now - Duration::days(1), now + Duration::days(SNAPSHOT_DAYS))
            .await?;
        tracing::debug!(events = ctx.current_events.len(), "refreshed event snapshot");
        Ok(())
    }

    fn issue_proposal(
        &self,
        ctx: &mut ConversationContext,
        message: Option<String>,
    ) -> Result<TurnReply> {
        let proposal = build_proposal(
            &ctx.problem_statement,
            Utc::now().date_naive(),
            &ctx.current_events,
            ctx.preferences.sleep_target_hours,
            ctx.latest_proposal(),
        )
        .map_err(|e| anyhow!(e.to_string()))?;

        let message = message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| proposal.summary.clone());
        ctx.preferences.iteration_count += 1;
        ctx.proposals.push(proposal.clone());

        Ok(TurnReply {
            kind: TurnKind::Proposal,
            message,
            proposal: Some(proposal),
            suggestions: Vec::new(),
        })
    }

    async fn dispatch_function(
        &self,
        ctx: &mut ConversationContext,
        call: FunctionCall,
    ) -> Result<TurnReply> {
        tracing::debug!(name = %call.name, "dispatching function call");
        match call.name.as_str() {
            "get_calendar_events" => {
                self.refresh_events(ctx).await?;
                Ok(TurnReply::plain(format!(
                    "You have {} event(s) coming up.",
                    ctx.current_events.len()
                )))
            }
            "create_calendar_event" => {
                let args: CreateEventArgs = serde_json::from_value(call.arguments)?;
                let mut event = CalendarEvent::current(
                    daysmith_schema::short_id("event"),
                    args.title.clone(),
                    args.start,
                    args.end,
                );
                event.description = args.description;
                event.location = args.location;
                self.calendar.create_event(event).await?;
                self.refresh_events(ctx).await?;
                Ok(TurnReply::plain(format!("Created \"{}\".", args.title)))
            }
            "update_calendar_event" => {
                let args: UpdateEventArgs = serde_json::from_value(call.arguments)?;
                let mut event = ctx
                    .current_events
                    .iter()
                    .find(|e| e.id == args.event_id)
                    .cloned()
                    .ok_or_else(|| anyhow!("event not found: {}", args.event_id))?;
                if let Some(title) = args.title {
                    event.title = title;
                }
                if let Some(start) = args.start {
                    event.start = start;
                }
                if let Some(end) = args.end {
                    event.end = end;
                }
                self.calendar.update_event(event).await?;
                self.refresh_events(ctx).await?;
                Ok(TurnReply::plain(format!("Updated {}.", args.event_id)))
            }
            "delete_calendar_event" => {
                let args: DeleteEventArgs = serde_json::from_value(call.arguments)?;
                self.calendar.delete_event(&args.event_id).await?;
                self.refresh_events(ctx).await?;
                Ok(TurnReply::plain(format!("Deleted {}.", args.event_id)))
            }
            "generate_schedule_proposal" => {
                let args: ProposalArgs =
                    serde_json::from_value(call.arguments).unwrap_or_default();
                if let Some(description) = args.problem_description {
                    ctx.set_problem_statement(&description);
                }
                self.issue_proposal(ctx, None)
            }
            "analyze_schedule_conflicts" => {
                let conflicts = find_conflicts(&ctx.current_events)
                    .map_err(|e| anyhow!(e.to_string()))?;
                let message = if conflicts.is_empty() {
                    "No time conflicts in your current schedule.".to_string()
                } else {
                    let pairs: Vec<String> = conflicts
                        .iter()
                        .map(|c| format!("{} / {}", c.event1.title, c.event2.title))
                        .collect();
                    format!(
                        "Found {} conflict(s): {}",
                        conflicts.len(),
                        pairs.join("; ")
                    )
                };
                Ok(TurnReply::plain(message))
            }
            "assess_sleep_impact" => {
                let assessment = estimate_sleep_impact(
                    &ctx.current_events,
                    ctx.preferences.sleep_target_hours,
                );
                Ok(TurnReply::plain(format!(
                    "Estimated sleep: {:.1}h ({} target of {:.1}h).",
                    assessment.estimated_sleep_hours,
                    if assessment.below_target {
                        "below"
                    } else {
                        "meets"
                    },
                    ctx.preferences.sleep_target_hours
                )))
            }
            other => Err(anyhow!("unknown function call: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::MockCalendarProvider;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use daysmith_memory::{PromptEmbedder, RetrievalOrchestrator, SqliteStore};
    use daysmith_provider::GenerateReply;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedProvider {
        replies: Mutex<VecDeque<GenerateReply>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<GenerateReply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
            })
        }

        fn text(text: &str) -> GenerateReply {
            GenerateReply {
                text: text.to_string(),
                function_call: None,
            }
        }

        fn call(name: &str, arguments: serde_json::Value) -> GenerateReply {
            GenerateReply {
                text: String::new(),
                function_call: Some(FunctionCall {
                    name: name.to_string(),
                    arguments,
                }),
            }
        }
    }

    #[async_trait]
    impl daysmith_provider::TextProvider for ScriptedProvider {
        async fn generate(&self, _request: GenerateRequest) -> Result<GenerateReply> {
            self.replies
                .lock()
                .map_err(|_| anyhow!("script poisoned"))?
                .pop_front()
                .ok_or_else(|| anyhow!("script exhausted"))
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl daysmith_provider::TextProvider for FailingProvider {
        async fn generate(&self, _request: GenerateRequest) -> Result<GenerateReply> {
            Err(anyhow!("collaborator down"))
        }
    }

    fn recall() -> Arc<RetrievalOrchestrator> {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        // The failing provider forces the deterministic fallback embedding.
        let embedder = PromptEmbedder::new(Arc::new(FailingProvider), "gemini-2.0-flash");
        Arc::new(RetrievalOrchestrator::new(embedder, store))
    }

    fn engine(provider: Arc<dyn TextProvider>) -> ConversationEngine {
        let day = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        ConversationEngine::new(
            provider,
            Arc::new(MockCalendarProvider::with_fixtures(day)),
            recall(),
            "gemini-2.0-flash",
        )
    }

    #[tokio::test]
    async fn first_turn_becomes_problem_statement() {
        let provider = ScriptedProvider::new(vec![ScriptedProvider::text(
            "Which days feel most packed?",
        )]);
        let engine = engine(provider);
        let mut ctx = ConversationContext::new("s1");

        let reply = engine.handle_turn(&mut ctx, "my week is hectic").await.unwrap();
        assert_eq!(ctx.problem_statement, "my week is hectic");
        assert_eq!(reply.kind, TurnKind::Question);
        assert_eq!(ctx.clarifying_questions.len(), 1);
    }

    #[tokio::test]
    async fn question_is_recorded_with_no_outstanding_questions() {
        // Zero questions and zero answers on the very first turn must not
        // prevent the first clarifying question from being recorded.
        let provider = ScriptedProvider::new(vec![ScriptedProvider::text(
            "What would a good week look like?",
        )]);
        let engine = engine(provider);
        let mut ctx = ConversationContext::new("s1");

        let reply = engine.handle_turn(&mut ctx, "help me plan").await.unwrap();
        assert_eq!(reply.kind, TurnKind::Question);
        assert_eq!(ctx.clarifying_questions.len(), 1);
        assert!(ctx.user_answers.is_empty());
    }

    #[tokio::test]
    async fn proposal_announcement_with_question_mark_is_not_a_question() {
        let provider = ScriptedProvider::new(vec![ScriptedProvider::text(
            "Shall I walk you through my proposal?",
        )]);
        let engine = engine(provider);
        let mut ctx = ConversationContext::new("s1");

        let reply = engine.handle_turn(&mut ctx, "my week is hectic").await.unwrap();
        assert_eq!(reply.kind, TurnKind::Proposal);
        assert!(ctx.clarifying_questions.is_empty());
    }

    #[tokio::test]
    async fn problem_statement_is_never_overwritten() {
        let provider = ScriptedProvider::new(vec![
            ScriptedProvider::text("Which days?"),
            ScriptedProvider::text("Noted."),
        ]);
        let engine = engine(provider);
        let mut ctx = ConversationContext::new("s1");

        engine.handle_turn(&mut ctx, "my week is hectic").await.unwrap();
        engine.handle_turn(&mut ctx, "mostly tuesdays").await.unwrap();
        assert_eq!(ctx.problem_statement, "my week is hectic");
    }

    #[tokio::test]
    async fn outstanding_question_absorbs_next_input_as_answer() {
        let provider = ScriptedProvider::new(vec![
            ScriptedProvider::text("Which days feel worst?"),
            ScriptedProvider::text("Got it, thanks."),
        ]);
        let engine = engine(provider);
        let mut ctx = ConversationContext::new("s1");

        engine.handle_turn(&mut ctx, "my week is hectic").await.unwrap();
        let reply = engine.handle_turn(&mut ctx, "tuesday and thursday").await.unwrap();

        assert_eq!(ctx.user_answers, vec!["tuesday and thursday"]);
        assert_eq!(reply.kind, TurnKind::AnswerAck);
    }

    #[tokio::test]
    async fn readiness_text_issues_revision_one_proposal() {
        let provider = ScriptedProvider::new(vec![
            ScriptedProvider::text("Which days?"),
            ScriptedProvider::text("Here is my proposal for a calmer week."),
        ]);
        let engine = engine(provider);
        let mut ctx = ConversationContext::new("s1");

        engine.handle_turn(&mut ctx, "my week is hectic").await.unwrap();
        let reply = engine.handle_turn(&mut ctx, "weekdays").await.unwrap();

        assert_eq!(reply.kind, TurnKind::Proposal);
        let proposal = reply.proposal.unwrap();
        assert_eq!(proposal.revision, 1);
        assert_eq!(ctx.proposals.len(), 1);
        assert_eq!(ctx.preferences.iteration_count, 1);
    }

    #[tokio::test]
    async fn second_proposal_chains_revision() {
        let provider = ScriptedProvider::new(vec![
            ScriptedProvider::text("Here is a proposal."),
            ScriptedProvider::text("Updated proposal below."),
        ]);
        let engine = engine(provider);
        let mut ctx = ConversationContext::new("s1");

        engine.handle_turn(&mut ctx, "hectic week").await.unwrap();
        engine.handle_turn(&mut ctx, "push things later").await.unwrap();

        assert_eq!(ctx.proposals.len(), 2);
        assert_eq!(ctx.proposals[1].revision, 2);
        assert_eq!(
            ctx.proposals[1].previous_proposal_id.as_deref(),
            Some(ctx.proposals[0].id.as_str())
        );
    }

    #[tokio::test]
    async fn function_call_generates_proposal() {
        let provider = ScriptedProvider::new(vec![ScriptedProvider::call(
            "generate_schedule_proposal",
            serde_json::json!({ "problem_description": "too many meetings" }),
        )]);
        let engine = engine(provider);
        let mut ctx = ConversationContext::new("s1");

        let reply = engine.handle_turn(&mut ctx, "sort out my meetings").await.unwrap();
        assert_eq!(reply.kind, TurnKind::Proposal);
        assert_eq!(ctx.proposals.len(), 1);
    }

    #[tokio::test]
    async fn conflict_analysis_reports_fixture_schedule_clean() {
        let provider = ScriptedProvider::new(vec![
            ScriptedProvider::text("Which days?"),
            ScriptedProvider::call("analyze_schedule_conflicts", serde_json::json!({})),
        ]);
        let engine = engine(provider);
        let mut ctx = ConversationContext::new("s1");

        engine.handle_turn(&mut ctx, "busy busy").await.unwrap();
        let reply = engine.handle_turn(&mut ctx, "check for overlaps").await.unwrap();
        assert!(reply.message.contains("No time conflicts"));
    }

    #[tokio::test]
    async fn sleep_assessment_tool_reports_hours() {
        let provider = ScriptedProvider::new(vec![
            ScriptedProvider::text("Which days?"),
            ScriptedProvider::call("assess_sleep_impact", serde_json::json!({})),
        ]);
        let engine = engine(provider);
        let mut ctx = ConversationContext::new("s1");

        engine.handle_turn(&mut ctx, "busy week").await.unwrap();
        let reply = engine.handle_turn(&mut ctx, "how is my sleep").await.unwrap();
        assert!(reply.message.contains("8.0h"));
    }

    #[tokio::test]
    async fn failed_collaborator_leaves_context_untouched() {
        let engine = engine(Arc::new(FailingProvider));
        let mut ctx = ConversationContext::new("s1");

        let result = engine.handle_turn(&mut ctx, "my week is hectic").await;
        assert!(result.is_err());
        assert!(ctx.problem_statement.is_empty());
        assert!(ctx.current_events.is_empty());
        assert!(ctx.clarifying_questions.is_empty());
    }

    #[tokio::test]
    async fn unknown_function_is_an_error_and_context_survives() {
        let provider = ScriptedProvider::new(vec![ScriptedProvider::call(
            "reticulate_splines",
            serde_json::json!({}),
        )]);
        let engine = engine(provider);
        let mut ctx = ConversationContext::new("s1");

        assert!(engine.handle_turn(&mut ctx, "hello").await.is_err());
        assert!(ctx.problem_statement.is_empty());
    }

    #[tokio::test]
    async fn first_turn_snapshots_the_calendar() {
        let provider = ScriptedProvider::new(vec![ScriptedProvider::text("Which days?")]);
        let day = Utc::now().date_naive();
        let engine = ConversationEngine::new(
            provider,
            Arc::new(MockCalendarProvider::with_fixtures(day)),
            recall(),
            "gemini-2.0-flash",
        );
        let mut ctx = ConversationContext::new("s1");

        engine.handle_turn(&mut ctx, "hectic week").await.unwrap();
        assert_eq!(ctx.current_events.len(), 3);
    }
}
