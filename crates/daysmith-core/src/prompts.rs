//! Prompt assembly for the text-generation collaborator.

use daysmith_provider::ToolDef;
use daysmith_schema::ConversationContext;

pub const SYSTEM_PROMPT: &str = "You are a scheduling assistant. You help users optimize their \
calendar for focus, rest, and realistic commitments. Ask clarifying questions when the problem \
is underspecified. When you have enough information, describe a concrete schedule proposal or \
call one of the available tools.";

const MAX_EVENTS_IN_PROMPT: usize = 10;

/// Render the dialogue state as a context block for the model.
pub fn context_block(ctx: &ConversationContext) -> String {
    let mut lines = Vec::new();

    if !ctx.problem_statement.is_empty() {
        lines.push(format!("Problem: {}", ctx.problem_statement));
    }
    lines.push(format!(
        "Dialogue: {} clarifying question(s), {} answer(s)",
        ctx.clarifying_questions.len(),
        ctx.user_answers.len()
    ));
    for (question, answer) in ctx.clarifying_questions.iter().zip(ctx.user_answers.iter()) {
        lines.push(format!("Q: {question}"));
        lines.push(format!("A: {answer}"));
    }

    if !ctx.current_events.is_empty() {
        lines.push(format!("Current events ({}):", ctx.current_events.len()));
        for event in ctx.current_events.iter().take(MAX_EVENTS_IN_PROMPT) {
            lines.push(format!(
                "- {} [{} .. {})",
                event.title,
                event.start.format("%Y-%m-%d %H:%M"),
                event.end.format("%H:%M")
            ));
        }
    }

    if let Some(proposal) = ctx.latest_proposal() {
        lines.push(format!(
            "Latest proposal (rev {}): {}",
            proposal.revision, proposal.summary
        ));
    }

    lines.push(format!(
        "Preferences: sleep target {}h, priorities {:?}",
        ctx.preferences.sleep_target_hours, ctx.preferences.priorities
    ));

    lines.join("\n")
}

fn event_fields() -> serde_json::Value {
    serde_json::json!({
        "title": { "type": "string" },
        "start": { "type": "string", "description": "RFC 3339 timestamp" },
        "end": { "type": "string", "description": "RFC 3339 timestamp" },
        "description": { "type": "string" },
        "location": { "type": "string" }
    })
}

/// The tools declared to the collaborator on every turn.
pub fn tool_defs() -> Vec<ToolDef> {
    vec![
        ToolDef {
            name: "get_calendar_events".to_string(),
            description: "Fetch the user's upcoming calendar events".to_string(),
            parameters: serde_json::json!({ "type": "object", "properties": {} }),
        },
        ToolDef {
            name: "create_calendar_event".to_string(),
            description: "Create a new calendar event".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": event_fields(),
                "required": ["title", "start", "end"]
            }),
        },
        ToolDef {
            name: "update_calendar_event".to_string(),
            description: "Update an existing calendar event by id".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "event_id": { "type": "string" },
                    "title": { "type": "string" },
                    "start": { "type": "string" },
                    "end": { "type": "string" }
                },
                "required": ["event_id"]
            }),
        },
        ToolDef {
            name: "delete_calendar_event".to_string(),
            description: "Delete a calendar event by id".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "event_id": { "type": "string" } },
                "required": ["event_id"]
            }),
        },
        ToolDef {
            name: "generate_schedule_proposal".to_string(),
            description: "Generate a proposed set of schedule changes for the user's problem"
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "problem_description": { "type": "string" }
                }
            }),
        },
        ToolDef {
            name: "analyze_schedule_conflicts".to_string(),
            description: "Detect time overlaps among the user's current events".to_string(),
            parameters: serde_json::json!({ "type": "object", "properties": {} }),
        },
        ToolDef {
            name: "assess_sleep_impact".to_string(),
            description: "Estimate the sleep impact of the user's current schedule".to_string(),
            parameters: serde_json::json!({ "type": "object", "properties": {} }),
        },
    ]
}
