use crate::denorm;
use ahash::AHashSet as HashSet;
use overlay_policy_core::{ServiceEvent, ServiceEventType};
use overlay_policy_store::{State, Tx};
use std::sync::Arc;
use tracing::trace;

/// Receives service events once the transaction that produced them has committed.
pub trait ServiceEventSink: Send + Sync {
    fn dispatch(&self, events: Vec<ServiceEvent>);
}

/// Accumulates the service events produced while a transaction runs, in the order they were
/// first queued.
#[derive(Debug, Default)]
pub struct EventBuffer {
    events: Vec<ServiceEvent>,
    queued: HashSet<ServiceEvent>,
}

// === impl EventBuffer ===

impl EventBuffer {
    pub fn push(&mut self, event: ServiceEvent) {
        trace!(?event, "Queued");
        if self.queued.insert(event.clone()) {
            self.events.push(event);
        }
    }

    /// Queues an `Updated` event for every identity with dial or bind access to the service.
    pub fn service_updated(&mut self, state: &State, service_id: &str) {
        let mut identities = denorm::IDENTITY_DIAL_SERVICES.related(state, service_id, false);
        identities.extend(denorm::IDENTITY_BIND_SERVICES.related(state, service_id, false));
        identities.sort();
        identities.dedup();
        for identity_id in identities {
            self.push(ServiceEvent::new(
                ServiceEventType::Updated,
                identity_id,
                service_id,
            ));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Hands the accumulated events to `sink` once the transaction commits.
    pub fn flush(self, tx: &mut Tx<'_>, sink: &Arc<dyn ServiceEventSink>) {
        let Self { events, .. } = self;
        if events.is_empty() {
            return;
        }
        let sink = sink.clone();
        tx.on_commit(move || sink.dispatch(events));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn event(event_type: ServiceEventType, identity: &str) -> ServiceEvent {
        ServiceEvent::new(event_type, identity, "s")
    }

    #[test]
    fn keeps_first_occurrence_order() {
        let mut buffer = EventBuffer::default();
        buffer.push(event(ServiceEventType::DialAccessGained, "b"));
        buffer.push(event(ServiceEventType::DialAccessGained, "a"));
        buffer.push(event(ServiceEventType::DialAccessGained, "b"));
        buffer.push(event(ServiceEventType::Updated, "b"));

        assert_eq!(
            buffer.events,
            vec![
                event(ServiceEventType::DialAccessGained, "b"),
                event(ServiceEventType::DialAccessGained, "a"),
                event(ServiceEventType::Updated, "b"),
            ]
        );
    }
}
