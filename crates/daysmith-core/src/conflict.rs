//! Interval conflict detection over half-open event ranges.

use daysmith_schema::{CalendarEvent, ConflictKind, ConflictPair, ConflictSeverity, ScheduleError};

/// Whether two valid events overlap. Half-open semantics: back-to-back
/// events (`a.end == b.start`) do not overlap.
fn overlaps(a: &CalendarEvent, b: &CalendarEvent) -> bool {
    a.start < b.end && b.start < a.end
}

/// Find every pair of events whose time ranges overlap.
///
/// Naive pairwise scan, fine at session scale. Every event is validated
/// up front; one malformed interval fails the whole call rather than
/// being skipped.
pub fn find_conflicts(events: &[CalendarEvent]) -> Result<Vec<ConflictPair>, ScheduleError> {
    for event in events {
        event.validate()?;
    }

    let mut conflicts = Vec::new();
    for i in 0..events.len() {
        // Zero-duration markers occupy no time and conflict with nothing.
        if events[i].start == events[i].end {
            continue;
        }
        for j in (i + 1)..events.len() {
            if events[j].start == events[j].end {
                continue;
            }
            if overlaps(&events[i], &events[j]) {
                conflicts.push(ConflictPair {
                    event1: events[i].clone(),
                    event2: events[j].clone(),
                    kind: ConflictKind::TimeOverlap,
                    severity: ConflictSeverity::High,
                });
            }
        }
    }
    Ok(conflicts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, h, m, 0).unwrap()
    }

    fn event(id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> CalendarEvent {
        CalendarEvent::current(id, "Event", start, end)
    }

    #[test]
    fn back_to_back_events_do_not_conflict() {
        let events = vec![
            event("e1", at(9, 0), at(10, 0)),
            event("e2", at(10, 0), at(11, 0)),
        ];
        assert!(find_conflicts(&events).unwrap().is_empty());
    }

    #[test]
    fn overlapping_events_conflict_once() {
        let events = vec![
            event("e1", at(9, 0), at(10, 30)),
            event("e2", at(10, 0), at(11, 0)),
        ];
        let conflicts = find_conflicts(&events).unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::TimeOverlap);
        assert_eq!(conflicts[0].severity, ConflictSeverity::High);
    }

    #[test]
    fn overlap_is_symmetric() {
        let a = event("e1", at(9, 0), at(10, 30));
        let b = event("e2", at(10, 0), at(11, 0));
        assert_eq!(overlaps(&a, &b), overlaps(&b, &a));
    }

    #[test]
    fn event_never_conflicts_with_itself() {
        let events = vec![event("e1", at(9, 0), at(10, 0))];
        assert!(find_conflicts(&events).unwrap().is_empty());
    }

    #[test]
    fn zero_duration_event_never_conflicts() {
        let events = vec![
            event("e1", at(9, 30), at(9, 30)),
            event("e2", at(9, 0), at(10, 0)),
        ];
        assert!(find_conflicts(&events).unwrap().is_empty());
    }

    #[test]
    fn containment_is_a_conflict() {
        let events = vec![
            event("e1", at(9, 0), at(12, 0)),
            event("e2", at(10, 0), at(11, 0)),
        ];
        assert_eq!(find_conflicts(&events).unwrap().len(), 1);
    }

    #[test]
    fn inverted_interval_fails_the_call() {
        let events = vec![
            event("e1", at(9, 0), at(10, 0)),
            event("e2", at(11, 0), at(10, 0)),
        ];
        let err = find_conflicts(&events).unwrap_err();
        assert!(matches!(err, ScheduleError::Validation(_)));
    }

    #[test]
    fn three_way_overlap_yields_three_pairs() {
        let events = vec![
            event("e1", at(9, 0), at(11, 0)),
            event("e2", at(9, 30), at(10, 30)),
            event("e3", at(10, 0), at(12, 0)),
        ];
        assert_eq!(find_conflicts(&events).unwrap().len(), 3);
    }
}
