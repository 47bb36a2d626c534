use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Error taxonomy shared by every crate in the workspace.
///
/// `Validation` is raised by pure functions and never caught internally.
/// `Collaborator` covers failed or timed-out calls to the text-generation,
/// calendar, or store collaborators and is always converted into a
/// user-facing reply at the session boundary. `Parse` is recovered locally
/// (fallback embedding) and never surfaces to the user.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("collaborator error: {0}")]
    Collaborator(String),
    #[error("parse error: {0}")]
    Parse(String),
}

/// Generate a short prefixed id, e.g. `event_3fa85f64`.
pub fn short_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &hex[..8])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Current,
    Proposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    None,
    Add,
    Move,
    Remove,
    Adjust,
}

/// A calendar event over the half-open interval `[start, end)`.
///
/// Back-to-back events (one ending exactly when the next starts) do not
/// overlap. `Current` events come from the calendar collaborator and are
/// read-only here; `Proposed` events are created by the proposal builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub source: EventSource,
    pub change_type: ChangeType,
    #[serde(default)]
    pub original_event_id: Option<String>,
    #[serde(default)]
    pub accepted: Option<bool>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

impl CalendarEvent {
    pub fn current(
        id: impl Into<String>,
        title: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            start,
            end,
            source: EventSource::Current,
            change_type: ChangeType::None,
            original_event_id: None,
            accepted: None,
            description: None,
            location: None,
        }
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// Reject malformed intervals. A zero-duration event (`start == end`)
    /// is valid; it simply never conflicts with anything.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        if self.title.trim().is_empty() {
            return Err(ScheduleError::Validation(format!(
                "event {} has an empty title",
                self.id
            )));
        }
        if self.end < self.start {
            return Err(ScheduleError::Validation(format!(
                "event {} ends before it starts ({} < {})",
                self.id, self.end, self.start
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Acceptance {
    Pending,
    Accepted,
    Rejected,
}

/// One proposed change, owning the proposed state of the event it touches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeItem {
    pub id: String,
    pub kind: ChangeType,
    pub event: CalendarEvent,
    #[serde(default)]
    pub target_event_id: Option<String>,
    pub rationale: String,
    pub acceptance: Acceptance,
}

impl ChangeItem {
    pub fn validate(&self) -> Result<(), ScheduleError> {
        self.event.validate()?;
        if self.kind != self.event.change_type {
            return Err(ScheduleError::Validation(format!(
                "change {} kind {:?} does not match event change_type {:?}",
                self.id, self.kind, self.event.change_type
            )));
        }
        if self.rationale.trim().is_empty() {
            return Err(ScheduleError::Validation(format!(
                "change {} has an empty rationale",
                self.id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SleepAssessment {
    pub estimated_sleep_hours: f64,
    pub below_target: bool,
    pub evening_count: usize,
    pub morning_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Draft,
    Pending,
    Approved,
    Applied,
    Discarded,
}

/// A schedule proposal. Revisions form a chain through
/// `previous_proposal_id` (back-reference only, never ownership).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub revision: u32,
    pub changes: Vec<ChangeItem>,
    pub summary: String,
    pub sleep_assessment: SleepAssessment,
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub previous_proposal_id: Option<String>,
}

impl Proposal {
    pub fn validate(&self) -> Result<(), ScheduleError> {
        if self.revision == 0 {
            return Err(ScheduleError::Validation(format!(
                "proposal {} has revision 0",
                self.id
            )));
        }
        if self.previous_proposal_id.is_some() && self.revision < 2 {
            return Err(ScheduleError::Validation(format!(
                "proposal {} chains a predecessor but has revision {}",
                self.id, self.revision
            )));
        }
        for change in &self.changes {
            change.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    TimeOverlap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictPair {
    pub event1: CalendarEvent,
    pub event2: CalendarEvent,
    pub kind: ConflictKind,
    pub severity: ConflictSeverity,
}

/// A recurring time-of-day window, e.g. a protected lunch break.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    #[serde(default)]
    pub fuzz_min: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preferences {
    pub sleep_target_hours: f64,
    pub priorities: Vec<String>,
    pub protected_windows: Vec<TimeWindow>,
    pub iteration_count: u32,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            sleep_target_hours: 7.0,
            priorities: vec!["sleep".to_string(), "focus".to_string()],
            protected_windows: Vec::new(),
            iteration_count: 0,
        }
    }
}

/// Per-session dialogue state. Owned exclusively by one session; mutated
/// only by the conversation engine, and only all-or-nothing per turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    pub session_id: String,
    pub problem_statement: String,
    pub clarifying_questions: Vec<String>,
    pub user_answers: Vec<String>,
    pub current_events: Vec<CalendarEvent>,
    pub proposals: Vec<Proposal>,
    pub preferences: Preferences,
}

impl ConversationContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            problem_statement: String::new(),
            clarifying_questions: Vec::new(),
            user_answers: Vec::new(),
            current_events: Vec::new(),
            proposals: Vec::new(),
            preferences: Preferences::default(),
        }
    }

    /// Set once; later calls are ignored so the first user turn always wins.
    pub fn set_problem_statement(&mut self, text: &str) {
        if self.problem_statement.is_empty() {
            self.problem_statement = text.to_string();
        }
    }

    /// Questions asked but not yet answered. The answer arrays are parallel:
    /// the Nth answer answers the Nth question.
    pub fn outstanding_questions(&self) -> usize {
        self.clarifying_questions
            .len()
            .saturating_sub(self.user_answers.len())
    }

    pub fn latest_proposal(&self) -> Option<&Proposal> {
        self.proposals.last()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    Question,
    AnswerAck,
    Proposal,
    Plain,
    Error,
}

/// The result of one user turn, returned across the session boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnReply {
    pub kind: TurnKind,
    pub message: String,
    #[serde(default)]
    pub proposal: Option<Proposal>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl TurnReply {
    pub fn plain(message: impl Into<String>) -> Self {
        Self {
            kind: TurnKind::Plain,
            message: message.into(),
            proposal: None,
            suggestions: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>, suggestions: Vec<String>) -> Self {
        Self {
            kind: TurnKind::Error,
            message: message.into(),
            proposal: None,
            suggestions,
        }
    }
}
