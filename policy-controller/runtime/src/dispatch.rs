//! Delivers committed service events to subscribers.

use overlay_policy_core::{ServiceEvent, ServiceEventType};
use overlay_policy_index::ServiceEventSink;
use parking_lot::RwLock;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// The subscribers of service events, constructed at startup and handed to the index.
#[derive(Clone, Default)]
pub struct EventSinks(Arc<RwLock<Vec<Arc<dyn ServiceEventSink>>>>);

/// Forwards batches to the dispatcher task.
#[derive(Clone, Debug)]
pub struct ChannelSink(mpsc::UnboundedSender<Vec<ServiceEvent>>);

#[derive(Clone, Debug, Default)]
pub struct DispatchMetrics {
    dispatched: Family<EventLabels, Counter>,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct EventLabels {
    event_type: &'static str,
}

// === impl EventSinks ===

impl EventSinks {
    pub fn register(&self, sink: Arc<dyn ServiceEventSink>) {
        self.0.write().push(sink);
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ServiceEventSink for EventSinks {
    fn dispatch(&self, events: Vec<ServiceEvent>) {
        let sinks = self.0.read();
        if let Some((last, rest)) = sinks.split_last() {
            for sink in rest {
                sink.dispatch(events.clone());
            }
            last.dispatch(events);
        }
    }
}

impl std::fmt::Debug for EventSinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSinks")
            .field("sinks", &self.len())
            .finish()
    }
}

// === impl ChannelSink ===

pub fn channel() -> (ChannelSink, mpsc::UnboundedReceiver<Vec<ServiceEvent>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelSink(tx), rx)
}

impl ServiceEventSink for ChannelSink {
    fn dispatch(&self, events: Vec<ServiceEvent>) {
        if self.0.send(events).is_err() {
            debug!("Dispatcher has stopped; dropping events");
        }
    }
}

// === impl DispatchMetrics ===

impl DispatchMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let dispatched = Family::<EventLabels, Counter>::default();
        reg.register(
            "dispatched",
            "Total number of service events dispatched",
            dispatched.clone(),
        );
        Self { dispatched }
    }

    fn record(&self, event: &ServiceEvent) {
        self.dispatched
            .get_or_create(&EventLabels {
                event_type: event.event_type.as_str(),
            })
            .inc();
    }

    pub fn dispatched(&self, event_type: ServiceEventType) -> u64 {
        self.dispatched
            .get_or_create(&EventLabels {
                event_type: event_type.as_str(),
            })
            .get()
    }
}

/// Logs and counts every dispatched event until the channel closes or shutdown is signaled.
///
/// On shutdown, batches already queued are still processed.
pub async fn run(
    mut rx: mpsc::UnboundedReceiver<Vec<ServiceEvent>>,
    metrics: DispatchMetrics,
    drain: drain::Watch,
) {
    let shutdown = drain.signaled();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            batch = rx.recv() => match batch {
                Some(events) => handle(&events, &metrics),
                None => return,
            },
            _handle = &mut shutdown => {
                rx.close();
                while let Some(events) = rx.recv().await {
                    handle(&events, &metrics);
                }
                debug!("Dispatcher stopped");
                return;
            }
        }
    }
}

fn handle(events: &[ServiceEvent], metrics: &DispatchMetrics) {
    for event in events {
        info!(
            event = %event.event_type,
            identity = %event.identity_id,
            service = %event.service_id,
            "Service event"
        );
        metrics.record(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorded(Mutex<Vec<ServiceEvent>>);

    impl ServiceEventSink for Recorded {
        fn dispatch(&self, events: Vec<ServiceEvent>) {
            self.0.lock().extend(events);
        }
    }

    fn gained(identity: &str, service: &str) -> ServiceEvent {
        ServiceEvent::new(ServiceEventType::DialAccessGained, identity, service)
    }

    #[test]
    fn fans_out_to_every_sink() {
        let sinks = EventSinks::default();
        let a = Arc::new(Recorded::default());
        let b = Arc::new(Recorded::default());
        sinks.register(a.clone());
        sinks.register(b.clone());
        assert_eq!(sinks.len(), 2);

        sinks.dispatch(vec![gained("x", "s")]);
        assert_eq!(*a.0.lock(), vec![gained("x", "s")]);
        assert_eq!(*b.0.lock(), vec![gained("x", "s")]);
    }

    #[tokio::test]
    async fn counts_until_closed() {
        let (sink, rx) = channel();
        let metrics = DispatchMetrics::default();
        let (_signal, watch) = drain::channel();
        let task = tokio::spawn(run(rx, metrics.clone(), watch));

        sink.dispatch(vec![gained("x", "s"), gained("y", "s")]);
        sink.dispatch(vec![ServiceEvent::new(
            ServiceEventType::Updated,
            "x",
            "s",
        )]);
        drop(sink);
        task.await.unwrap();

        assert_eq!(metrics.dispatched(ServiceEventType::DialAccessGained), 2);
        assert_eq!(metrics.dispatched(ServiceEventType::Updated), 1);
        assert_eq!(metrics.dispatched(ServiceEventType::BindAccessLost), 0);
    }

    #[tokio::test]
    async fn drains_queued_events_on_shutdown() {
        let (sink, rx) = channel();
        let metrics = DispatchMetrics::default();
        let (signal, watch) = drain::channel();

        sink.dispatch(vec![gained("x", "s")]);
        let task = tokio::spawn(run(rx, metrics.clone(), watch));
        signal.drain().await;
        task.await.unwrap();

        assert_eq!(metrics.dispatched(ServiceEventType::DialAccessGained), 1);
        // The sink outlives the dispatcher without failing.
        sink.dispatch(vec![gained("y", "s")]);
    }
}
