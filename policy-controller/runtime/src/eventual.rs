//! Processes eventual event markers after they commit.
//!
//! Markers are handled in batches, oldest first. Each marker is handled in its own transaction: the
//! listeners registered for its type run and the marker is removed together with their writes. A
//! marker whose listeners fail stays in place and is retried on the next pass, so listeners must
//! tolerate running more than once.

use ahash::AHashMap as HashMap;
use overlay_policy_core::Result;
use overlay_policy_index::{eventual, Index};
use overlay_policy_store::{Db, Tx};
use prometheus_client::{metrics::counter::Counter, registry::Registry};
use std::{sync::Arc, time::Duration};
use tokio::sync::Notify;
use tracing::{debug, info, trace, warn};

pub trait EventualListener: Send + Sync {
    fn handle(&self, index: &Index, tx: &mut Tx<'_>, data: &str) -> Result<()>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EventualConfig {
    pub interval: Duration,
    pub batch_size: usize,
}

#[derive(Clone, Debug, Default)]
pub struct EventualMetrics {
    processed: Counter,
    failed: Counter,
}

/// Wakes the worker before its interval elapses.
#[derive(Clone, Debug, Default)]
pub struct Trigger(Arc<Notify>);

pub struct EventualEventer {
    db: Arc<Db>,
    index: Index,
    config: EventualConfig,
    listeners: HashMap<String, Vec<Arc<dyn EventualListener>>>,
    trigger: Trigger,
    metrics: EventualMetrics,
}

/// Deletes the sessions of a deleted API session.
#[derive(Clone, Debug, Default)]
pub struct DeleteSessions(());

// === impl EventualConfig ===

impl Default for EventualConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            batch_size: 250,
        }
    }
}

// === impl EventualMetrics ===

impl EventualMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let metrics = Self::default();
        reg.register(
            "processed",
            "Total number of eventual events processed",
            metrics.processed.clone(),
        );
        reg.register(
            "failed",
            "Total number of eventual event processing failures",
            metrics.failed.clone(),
        );
        metrics
    }

    pub fn processed(&self) -> u64 {
        self.processed.get()
    }

    pub fn failed(&self) -> u64 {
        self.failed.get()
    }
}

// === impl Trigger ===

impl Trigger {
    pub fn trigger(&self) {
        self.0.notify_one();
    }
}

// === impl EventualEventer ===

impl EventualEventer {
    pub fn new(
        db: Arc<Db>,
        index: Index,
        config: EventualConfig,
        metrics: EventualMetrics,
    ) -> Self {
        Self {
            db,
            index,
            config,
            listeners: HashMap::default(),
            trigger: Trigger::default(),
            metrics,
        }
    }

    pub fn add_listener(&mut self, event_type: impl ToString, listener: Arc<dyn EventualListener>) {
        self.listeners
            .entry(event_type.to_string())
            .or_default()
            .push(listener);
    }

    pub fn trigger(&self) -> Trigger {
        self.trigger.clone()
    }

    /// Handles up to one batch of pending markers, returning the number handled successfully.
    pub fn process_batch(&self) -> usize {
        let pending = eventual::pending(&self.db.view(), self.config.batch_size);
        let mut processed = 0;
        for event in pending {
            let listeners = self
                .listeners
                .get(&event.event_type)
                .map(Vec::as_slice)
                .unwrap_or_default();
            if listeners.is_empty() {
                debug!(id = %event.id, event = %event.event_type, "No listeners");
            }

            let res = self.db.update(|tx| {
                for listener in listeners {
                    listener.handle(&self.index, tx, &event.data)?;
                }
                eventual::remove_event(tx, &event.id)
            });
            match res {
                Ok(()) => {
                    trace!(id = %event.id, event = %event.event_type, "Processed");
                    self.metrics.processed.inc();
                    processed += 1;
                }
                Err(error) => {
                    warn!(
                        id = %event.id,
                        event = %event.event_type,
                        %error,
                        "Failed to process eventual event"
                    );
                    self.metrics.failed.inc();
                }
            }
        }
        processed
    }

    /// Processes markers every interval, or sooner when triggered, until shutdown is signaled.
    pub async fn run(self, drain: drain::Watch) {
        info!(
            interval = ?self.config.interval,
            batch_size = self.config.batch_size,
            "Processing eventual events"
        );
        let shutdown = drain.signaled();
        tokio::pin!(shutdown);

        loop {
            // A full batch means more may be waiting.
            while self.process_batch() == self.config.batch_size {}

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = self.trigger.0.notified() => trace!("Triggered"),
                _handle = &mut shutdown => {
                    debug!("Eventual event processing stopped");
                    return;
                }
            }
        }
    }
}

// === impl DeleteSessions ===

impl EventualListener for DeleteSessions {
    fn handle(&self, index: &Index, tx: &mut Tx<'_>, api_session_id: &str) -> Result<()> {
        index
            .delete_sessions_for_api_session(tx, api_session_id)
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlay_policy_core::{Error, PolicyType};
    use overlay_policy_index::{
        fields, ApiSession, Identity, Policy, Service, ServiceEventSink, Session,
        API_SESSION_DELETED, SERVICE_POLICIES, SESSIONS,
    };

    struct Discard;

    impl ServiceEventSink for Discard {
        fn dispatch(&self, _: Vec<overlay_policy_core::ServiceEvent>) {}
    }

    struct Failing;

    impl EventualListener for Failing {
        fn handle(&self, _: &Index, _: &mut Tx<'_>, data: &str) -> Result<()> {
            Err(Error::Consistency(format!("cannot handle {data}")))
        }
    }

    fn eventer(batch_size: usize) -> EventualEventer {
        let index = Index::new(Arc::new(Discard));
        let db = Arc::new(Db::new(index.schema()));
        let config = EventualConfig {
            interval: Duration::from_millis(10),
            batch_size,
        };
        let mut eventer = EventualEventer::new(db, index, config, EventualMetrics::default());
        eventer.add_listener(API_SESSION_DELETED, Arc::new(DeleteSessions::default()));
        eventer
    }

    /// Creates an api session with one dial session for identity `x` on service `s`, then deletes
    /// the api session.
    fn orphan_session(eventer: &EventualEventer, id: &str) {
        let index = &eventer.index;
        eventer
            .db
            .update(|tx| {
                if !tx.contains("identities", "x") {
                    index.create_entity(tx, Identity::new("x", "identity-x"))?;
                    index.create_entity(tx, Service::new("s", "service"))?;
                    index.create_policy(
                        tx,
                        Policy::new(&SERVICE_POLICIES, "sp", "sp")
                            .policy_type(PolicyType::Dial)
                            .with_roles(fields::IDENTITY_ROLES, ["@x"])
                            .with_roles(fields::SERVICE_ROLES, ["@s"]),
                    )?;
                }
                index.create_api_session(
                    tx,
                    ApiSession {
                        id: id.to_string(),
                        identity_id: "x".to_string(),
                        token: format!("{id}-token"),
                    },
                )?;
                index.create_session(
                    tx,
                    Session {
                        id: format!("{id}-session"),
                        api_session_id: id.to_string(),
                        service_id: "s".to_string(),
                        session_type: PolicyType::Dial,
                    },
                )?;
                index.delete_api_session(tx, id)
            })
            .unwrap();
    }

    #[test]
    fn deletes_sessions_of_deleted_api_sessions() {
        let eventer = eventer(10);
        orphan_session(&eventer, "as-1");
        orphan_session(&eventer, "as-2");
        assert_eq!(eventer.db.view().count(SESSIONS), 2);

        assert_eq!(eventer.process_batch(), 2);
        let state = eventer.db.view();
        assert_eq!(state.count(SESSIONS), 0);
        assert_eq!(eventual::pending_count(&state), 0);
        assert_eq!(eventer.metrics.processed(), 2);

        assert_eq!(eventer.process_batch(), 0);
    }

    #[test]
    fn batches_are_bounded() {
        let eventer = eventer(1);
        orphan_session(&eventer, "as-1");
        orphan_session(&eventer, "as-2");

        assert_eq!(eventer.process_batch(), 1);
        assert_eq!(eventual::pending_count(&eventer.db.view()), 1);
        assert_eq!(eventer.process_batch(), 1);
        assert_eq!(eventual::pending_count(&eventer.db.view()), 0);
    }

    #[test]
    fn failed_markers_are_retried() {
        let mut eventer = eventer(10);
        eventer.add_listener(API_SESSION_DELETED, Arc::new(Failing));
        orphan_session(&eventer, "as-1");

        assert_eq!(eventer.process_batch(), 0);
        let state = eventer.db.view();
        assert_eq!(eventual::pending_count(&state), 1);
        assert_eq!(state.count(SESSIONS), 1, "listener writes are rolled back");
        assert_eq!(eventer.metrics.failed(), 1);
    }

    #[test]
    fn markers_without_listeners_are_dropped() {
        let eventer = eventer(10);
        eventer
            .db
            .update(|tx| eventual::add_event(tx, "unknown", "data"))
            .unwrap();
        assert_eq!(eventer.process_batch(), 1);
        assert_eq!(eventual::pending_count(&eventer.db.view()), 0);
    }

    #[tokio::test]
    async fn runs_until_shutdown() {
        let eventer = eventer(10);
        let db = eventer.db.clone();
        let trigger = eventer.trigger();
        let (signal, watch) = drain::channel();
        let task = tokio::spawn(eventer.run(watch));

        let index = Index::new(Arc::new(Discard));
        db.update(|tx| {
            index.create_entity(tx, Identity::new("y", "identity-y"))?;
            index.create_api_session(
                tx,
                ApiSession {
                    id: "as".to_string(),
                    identity_id: "y".to_string(),
                    token: "token".to_string(),
                },
            )?;
            index.delete_api_session(tx, "as")
        })
        .unwrap();
        trigger.trigger();

        tokio::time::timeout(Duration::from_secs(5), async {
            while eventual::pending_count(&db.view()) > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("marker must be processed");

        signal.drain().await;
        task.await.unwrap();
    }
}
