//! Keyword-triggered proposal builder.
//!
//! An ordered rule table maps keywords in the problem text to change
//! templates. Every fired rule appends exactly one change, in table order,
//! and an input that fires nothing still yields one generic change. This is
//! a demonstration heuristic behind a stable contract, not a scheduler; a
//! smarter generator can replace it without touching the callers.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use daysmith_schema::{
    short_id, Acceptance, CalendarEvent, ChangeItem, ChangeType, EventSource, Proposal,
    ProposalStatus, ScheduleError,
};

use crate::sleep::estimate_sleep_impact;

#[derive(Debug, Clone, Copy)]
enum TriggerAction {
    AddFocusBlock,
    MoveEveningActivity,
    RetimeMeeting,
}

struct TriggerRule {
    keywords: &'static [&'static str],
    action: TriggerAction,
}

// Evaluation order is part of the contract: changes appear in this order.
const TRIGGER_RULES: &[TriggerRule] = &[
    TriggerRule {
        keywords: &["hectic", "busy"],
        action: TriggerAction::AddFocusBlock,
    },
    TriggerRule {
        keywords: &["sleep", "tired"],
        action: TriggerAction::MoveEveningActivity,
    },
    TriggerRule {
        keywords: &["meeting", "conflict"],
        action: TriggerAction::RetimeMeeting,
    },
];

fn slot(day: NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN);
    Utc.from_utc_datetime(&day.and_time(time))
}

fn proposed_event(
    title: &str,
    change_type: ChangeType,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    original_event_id: Option<String>,
) -> CalendarEvent {
    CalendarEvent {
        id: short_id("event"),
        title: title.to_string(),
        start,
        end,
        source: EventSource::Proposed,
        change_type,
        original_event_id,
        accepted: None,
        description: None,
        location: None,
    }
}

fn change(
    kind: ChangeType,
    event: CalendarEvent,
    target_event_id: Option<String>,
    rationale: &str,
) -> ChangeItem {
    ChangeItem {
        id: short_id("change"),
        kind,
        event,
        target_event_id,
        rationale: rationale.to_string(),
        acceptance: Acceptance::Pending,
    }
}

/// First current event starting in the evening, for the move trigger.
fn evening_event(current_events: &[CalendarEvent]) -> Option<&CalendarEvent> {
    current_events.iter().find(|e| e.start.hour() >= 18)
}

/// First current event whose title mentions a meeting, for the adjust
/// trigger; falls back to the first event at all.
fn meeting_event(current_events: &[CalendarEvent]) -> Option<&CalendarEvent> {
    current_events
        .iter()
        .find(|e| e.title.to_lowercase().contains("meeting"))
        .or_else(|| current_events.first())
}

fn apply_action(
    action: TriggerAction,
    anchor_day: NaiveDate,
    current_events: &[CalendarEvent],
) -> ChangeItem {
    match action {
        TriggerAction::AddFocusBlock => {
            let event = proposed_event(
                "Focus Time",
                ChangeType::Add,
                slot(anchor_day, 9, 0),
                slot(anchor_day, 11, 0),
                None,
            );
            change(
                ChangeType::Add,
                event,
                None,
                "Adding a protected 2-hour focus block reduces the feeling of a hectic schedule",
            )
        }
        TriggerAction::MoveEveningActivity => {
            let target = evening_event(current_events);
            let target_id = target.map(|e| e.id.clone());
            let event = proposed_event(
                "Evening Activity",
                ChangeType::Move,
                slot(anchor_day, 18, 0),
                slot(anchor_day, 19, 0),
                target_id.clone(),
            );
            change(
                ChangeType::Move,
                event,
                target_id,
                "Moving the evening activity earlier protects your wind-down time and improves sleep",
            )
        }
        TriggerAction::RetimeMeeting => {
            let target = meeting_event(current_events);
            let target_id = target.map(|e| e.id.clone());
            let title = target.map(|e| e.title.clone()).unwrap_or_else(|| "Meeting".to_string());
            let event = proposed_event(
                &title,
                ChangeType::Adjust,
                slot(anchor_day, 10, 30),
                slot(anchor_day, 11, 30),
                target_id.clone(),
            );
            change(
                ChangeType::Adjust,
                event,
                target_id,
                "Retiming this meeting resolves the overlap with adjacent commitments",
            )
        }
    }
}

/// Apply the trigger table to the lowercased problem text. Never returns an
/// empty list.
pub fn build_changes(
    problem_text: &str,
    anchor_day: NaiveDate,
    current_events: &[CalendarEvent],
) -> Vec<ChangeItem> {
    let lower = problem_text.to_lowercase();

    let mut changes: Vec<ChangeItem> = TRIGGER_RULES
        .iter()
        .filter(|rule| rule.keywords.iter().any(|kw| lower.contains(kw)))
        .map(|rule| apply_action(rule.action, anchor_day, current_events))
        .collect();

    if changes.is_empty() {
        let event = proposed_event(
            "Optimization Block",
            ChangeType::Add,
            slot(anchor_day, 14, 0),
            slot(anchor_day, 15, 0),
            None,
        );
        changes.push(change(
            ChangeType::Add,
            event,
            None,
            "Reserving a flexible block gives the schedule room for the improvement you described",
        ));
    }

    changes
}

/// Build a full proposal: run the trigger table, assess sleep impact over
/// the current schedule plus the proposed events, and chain the revision
/// from an optional predecessor.
pub fn build_proposal(
    problem_text: &str,
    anchor_day: NaiveDate,
    current_events: &[CalendarEvent],
    sleep_target_hours: f64,
    predecessor: Option<&Proposal>,
) -> Result<Proposal, ScheduleError> {
    let changes = build_changes(problem_text, anchor_day, current_events);

    let mut projected: Vec<CalendarEvent> = current_events.to_vec();
    projected.extend(changes.iter().map(|c| c.event.clone()));
    let sleep_assessment = estimate_sleep_impact(&projected, sleep_target_hours);

    let (revision, previous_proposal_id) = match predecessor {
        Some(prev) => (prev.revision + 1, Some(prev.id.clone())),
        None => (1, None),
    };

    let proposal = Proposal {
        id: short_id("proposal"),
        revision,
        summary: format!(
            "{} proposed change(s) addressing: {}",
            changes.len(),
            problem_text
        ),
        changes,
        sleep_assessment,
        status: ProposalStatus::Pending,
        created_at: Utc::now(),
        previous_proposal_id,
    };
    proposal.validate()?;

    tracing::debug!(
        proposal_id = %proposal.id,
        revision = proposal.revision,
        changes = proposal.changes.len(),
        "built proposal"
    );
    Ok(proposal)
}
