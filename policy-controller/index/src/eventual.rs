//! Durable markers for deferred work.
//!
//! A transaction that needs follow-up work too large to do inline writes a marker. The marker
//! commits atomically with the change that caused it and remains until a worker has processed it,
//! so work is done at least once even if the process restarts.

use crate::fields;
use overlay_policy_core::Result;
use overlay_policy_store::{Record, State, Tx};

pub const EVENTUAL_EVENTS: &str = "eventualEvents";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventualEvent {
    pub id: String,
    pub event_type: String,
    pub data: String,
}

/// Writes a marker. Markers are ordered by the sequence at which they were written.
pub fn add_event(tx: &mut Tx<'_>, event_type: &str, data: &str) -> Result<()> {
    let id = format!("{:020}", tx.next_sequence());
    let record = Record::default()
        .with(fields::POLICY_TYPE, event_type)
        .with(fields::DATA, data);
    tx.create(EVENTUAL_EVENTS, &id, record)
}

/// Returns up to `limit` pending markers, oldest first.
pub fn pending(state: &State, limit: usize) -> Vec<EventualEvent> {
    state
        .rows(EVENTUAL_EVENTS)
        .take(limit)
        .map(|(id, r)| EventualEvent {
            id: id.to_string(),
            event_type: r.str(fields::POLICY_TYPE).unwrap_or_default().to_string(),
            data: r.str(fields::DATA).unwrap_or_default().to_string(),
        })
        .collect()
}

pub fn pending_count(state: &State) -> usize {
    state.count(EVENTUAL_EVENTS)
}

/// Removes a processed marker. Removing an absent marker is not an error.
pub fn remove_event(tx: &mut Tx<'_>, id: &str) -> Result<()> {
    if tx.contains(EVENTUAL_EVENTS, id) {
        tx.delete(EVENTUAL_EVENTS, id)?;
    }
    Ok(())
}
