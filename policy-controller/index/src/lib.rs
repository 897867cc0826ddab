//! The overlay policy index.
//!
//! Policies select entities with role lists. For each policy the index records the entities it
//! currently matches on each side (links) and, for each pair of entities connected through at least
//! one policy, how many policies connect them (denormalized pairs). Access checks only consult the
//! denormalized pairs.
//!
//! Links are maintained incrementally from two directions:
//!
//! - When a policy is created, updated or deleted, each side whose role list changed is
//!   re-evaluated against every entity of the side's target type.
//! - When an entity's role attributes change, the entity alone is re-evaluated against every
//!   policy that can select it. The store raises these changes through a set index listener
//!   registered by [`Index::schema`].
//!
//! All of this happens inside the transaction that made the change, so links, pairs and the change
//! itself commit together. Service events produced along the way are handed to a
//! [`ServiceEventSink`] only once the transaction has committed.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod denorm;
mod entities;
mod evaluate;
pub mod eventual;
mod events;
pub mod fields;
pub mod integrity;
mod kind;
mod links;
mod policies;
mod policy;
mod related;
pub mod router;
mod sessions;


pub use self::{
    denorm::RefCountedLinkCollection,
    entities::{EdgeRouter, Entity, Identity, IdentityType, PostureCheck, Service},
    evaluate::{evaluate_entity, evaluate_policy},
    events::{EventBuffer, ServiceEventSink},
    integrity::{check_integrity, repair_integrity},
    kind::{
        EntityType, Hook, PolicyKind, Relation, Side, EDGE_ROUTER_POLICIES,
        SERVICE_EDGE_ROUTER_POLICIES, SERVICE_POLICIES,
    },
    links::LinkCollection,
    policy::Policy,
    related::{can_bind, can_dial, can_reach_edge_router, related_ids},
    sessions::{ApiSession, Session, API_SESSIONS, API_SESSION_DELETED, SESSIONS},
};
pub use overlay_policy_core::{Error, PolicyType, Result, Semantic, ServiceEvent, ServiceEventType};

use overlay_policy_store::{Schema, SetChange, SetIndexListener, Tx};
use std::sync::Arc;

/// Entry point for every mutation of policies, entities and sessions.
#[derive(Clone)]
pub struct Index {
    events: Arc<dyn ServiceEventSink>,
}

/// Re-evaluates an entity whenever its role attributes change.
struct RoleAttributesListener {
    target: EntityType,
    events: Arc<dyn ServiceEventSink>,
}

// === impl Index ===

impl Index {
    pub fn new(events: Arc<dyn ServiceEventSink>) -> Self {
        Self { events }
    }

    /// The indexes the store must maintain for this index to work.
    pub fn schema(&self) -> Schema {
        let mut schema = Schema::default().unique_index(sessions::API_SESSIONS, fields::TOKEN);
        for kind in PolicyKind::all() {
            schema = schema.unique_index(kind.bucket, fields::NAME);
        }
        for target in EntityType::ALL {
            schema = schema
                .unique_index(target.bucket(), fields::NAME)
                .set_index(
                    target.bucket(),
                    fields::ROLE_ATTRIBUTES,
                    Arc::new(RoleAttributesListener {
                        target,
                        events: self.events.clone(),
                    }),
                );
        }
        schema
    }
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index").finish_non_exhaustive()
    }
}

// === impl RoleAttributesListener ===

impl SetIndexListener for RoleAttributesListener {
    fn changed(&self, tx: &mut Tx<'_>, change: &SetChange<'_>) -> Result<()> {
        tracing::trace!(entity = %self.target, id = %change.id, "Role attributes changed");
        let mut events = EventBuffer::default();
        evaluate_entity(tx, self.target, change.id, Some(change.new), &mut events)?;
        events.flush(tx, &self.events);
        Ok(())
    }
}
