//! Calendar collaborator contract and an in-memory mock.
//!
//! The real provider (OAuth, vendor APIs) lives outside this core; the mock
//! serves the REPL and tests with a small fixed schedule.

use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use daysmith_schema::CalendarEvent;

#[async_trait]
pub trait CalendarProvider: Send + Sync {
    /// Events overlapping `[range_start, range_end)`.
    async fn list_events(
        &self,
        range_start: DateTime<Utc>,
        range_end: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>>;

    /// Idempotent by id: creating an event that already exists replaces it.
    async fn create_event(&self, event: CalendarEvent) -> Result<()>;

    async fn update_event(&self, event: CalendarEvent) -> Result<()>;

    /// Deleting an unknown id is a no-op.
    async fn delete_event(&self, event_id: &str) -> Result<()>;
}

/// In-memory calendar seeded with a typical working day.
pub struct MockCalendarProvider {
    events: Mutex<Vec<CalendarEvent>>,
}

impl MockCalendarProvider {
    pub fn empty() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    /// Three fixture events on `day`: a morning meeting, lunch, and an
    /// afternoon review.
    pub fn with_fixtures(day: NaiveDate) -> Self {
        let at = |h: u32, m: u32| {
            let time = NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN);
            Utc.from_utc_datetime(&day.and_time(time))
        };
        let events = vec![
            CalendarEvent::current("event_1", "Team Meeting", at(9, 0), at(10, 0)),
            CalendarEvent::current("event_2", "Lunch Break", at(12, 0), at(13, 0)),
            CalendarEvent::current("event_3", "Project Review", at(14, 0), at(15, 30)),
        ];
        Self {
            events: Mutex::new(events),
        }
    }

    fn with_events<R>(&self, f: impl FnOnce(&mut Vec<CalendarEvent>) -> R) -> Result<R> {
        let mut guard = self
            .events
            .lock()
            .map_err(|_| anyhow!("calendar mock poisoned"))?;
        Ok(f(&mut guard))
    }
}

#[async_trait]
impl CalendarProvider for MockCalendarProvider {
    async fn list_events(
        &self,
        range_start: DateTime<Utc>,
        range_end: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>> {
        self.with_events(|events| {
            events
                .iter()
                .filter(|e| e.start < range_end && range_start < e.end)
                .cloned()
                .collect()
        })
    }

    async fn create_event(&self, event: CalendarEvent) -> Result<()> {
        event.validate().map_err(|e| anyhow!(e.to_string()))?;
        self.with_events(|events| {
            events.retain(|e| e.id != event.id);
            events.push(event);
        })
    }

    async fn update_event(&self, event: CalendarEvent) -> Result<()> {
        event.validate().map_err(|e| anyhow!(e.to_string()))?;
        self.with_events(|events| {
            match events.iter_mut().find(|e| e.id == event.id) {
                Some(existing) => {
                    *existing = event;
                    Ok(())
                }
                None => Err(anyhow!("event not found: {}", event.id)),
            }
        })?
    }

    async fn delete_event(&self, event_id: &str) -> Result<()> {
        self.with_events(|events| {
            events.retain(|e| e.id != event_id);
        })
    }
}
