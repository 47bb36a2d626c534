//! Sleep impact estimation.
//!
//! A coarse three-bucket heuristic over event start hours, not a circadian
//! model. The thresholds and rule order are load-bearing: callers and tests
//! depend on the exact 8.0 / 6.0 / 7.0 outcomes.

use chrono::Timelike;
use daysmith_schema::{CalendarEvent, SleepAssessment};

const EVENING_HOUR: u32 = 18;
const LATE_EVENING_HOUR: u32 = 22;
const MORNING_HOUR: u32 = 8;
const EARLY_MORNING_HOUR: u32 = 7;

/// Estimate sleep hours from event timing. First match wins:
/// no late-evening and no early-morning events gives 8.0h, any
/// late-evening event gives 6.0h, otherwise 7.0h.
pub fn estimate_sleep_impact(events: &[CalendarEvent], target_hours: f64) -> SleepAssessment {
    let mut evening_count = 0;
    let mut morning_count = 0;
    let mut late_evening = 0;
    let mut early_morning = 0;

    for event in events {
        let hour = event.start.hour();
        if hour >= EVENING_HOUR {
            evening_count += 1;
            if hour >= LATE_EVENING_HOUR {
                late_evening += 1;
            }
        } else if hour <= MORNING_HOUR {
            morning_count += 1;
            if hour <= EARLY_MORNING_HOUR {
                early_morning += 1;
            }
        }
    }

    let estimated_sleep_hours = if late_evening == 0 && early_morning == 0 {
        8.0
    } else if late_evening > 0 {
        6.0
    } else {
        7.0
    };

    SleepAssessment {
        estimated_sleep_hours,
        below_target: estimated_sleep_hours < target_hours,
        evening_count,
        morning_count,
    }
}
