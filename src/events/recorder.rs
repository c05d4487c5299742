use std::collections::HashMap;

use serde::Serialize;

use crate::events::{now_millis, AccessEvent, Event};

/// Access counters aggregated over a flush interval.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessSummary {
    /// Epoch milliseconds of the first aggregated access.
    pub start_time: i64,
    /// Epoch milliseconds of the snapshot.
    pub end_time: i64,
    /// Counters by toggle key.
    pub counters: HashMap<String, Vec<AccessCounter>>,
}

/// Number of evaluations that served the same value from the same toggle version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessCounter {
    /// Number of evaluations.
    pub count: u64,
    /// Served value.
    pub value: Option<serde_json::Value>,
    /// Toggle version.
    pub version: Option<i64>,
    /// Served variation index.
    pub index: Option<usize>,
}

/// Payload of one flush.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventBatch {
    /// Events reported individually.
    pub events: Vec<Event>,
    /// Aggregated access counters.
    pub access: AccessSummary,
}

impl AccessSummary {
    fn add(&mut self, event: &AccessEvent) {
        if self.counters.is_empty() {
            self.start_time = event.time;
        }

        let counters = self.counters.entry(event.key.clone()).or_default();
        let existing = counters.iter_mut().find(|counter| {
            counter.version == event.version
                && counter.index == event.variation_index
                && counter.value == event.value
        });
        match existing {
            Some(counter) => counter.count += 1,
            None => counters.push(AccessCounter {
                count: 1,
                value: event.value.clone(),
                version: event.version,
                index: event.variation_index,
            }),
        }
    }
}

/// Aggregates events between flushes. Owned by the event consumer thread.
#[derive(Debug, Default)]
pub(crate) struct EventRecorder {
    batch: EventBatch,
}

impl EventRecorder {
    pub fn add(&mut self, event: Event) {
        match event {
            Event::Access(access) => {
                self.batch.access.add(&access);
                if access.track_access_events {
                    self.batch.events.push(Event::Access(access));
                }
            }
            event @ (Event::Custom(_) | Event::Debug(_)) => self.batch.events.push(event),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.batch.events.is_empty() && self.batch.access.counters.is_empty()
    }

    /// Take accumulated events, leaving the recorder empty.
    pub fn take(&mut self) -> EventBatch {
        let mut batch = std::mem::take(&mut self.batch);
        batch.access.end_time = now_millis();
        batch
    }
}
