//! Schedule proposal and retrieval engine: conflict detection, sleep impact
//! estimation, the keyword-triggered proposal builder, the conversation
//! engine, and the session-facing assistant.

pub mod calendar;
pub mod conflict;
pub mod engine;
pub mod prompts;
pub mod proposal;
pub mod session;
pub mod sleep;

pub use calendar::{CalendarProvider, MockCalendarProvider};
pub use conflict::find_conflicts;
pub use engine::ConversationEngine;
pub use proposal::{build_changes, build_proposal};
pub use session::{Assistant, SessionRegistry};
pub use sleep::estimate_sleep_impact;
