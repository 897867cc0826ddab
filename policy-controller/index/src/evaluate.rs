//! Maintains links and denormalized pairs as policies and entities change.
//!
//! [`evaluate_policy`] recomputes one side of a policy against every entity of the side's target
//! type. [`evaluate_entity`] re-evaluates a single entity against every policy that can select it.
//! Both converge on [`link`] and [`unlink`], which update the side's link collection and then the
//! refcounts of every relation the side participates in.

use crate::{
    events::EventBuffer,
    fields,
    kind::{EntityType, Hook, PolicyKind, Relation},
    policy::Policy,
};
use overlay_policy_core::{PolicyType, Result, ServiceEvent, ServiceEventType};
use overlay_policy_store::Tx;
use std::collections::BTreeSet;
use tracing::{debug, trace};

/// Brings the links of one side of `policy` in line with its current role list.
pub fn evaluate_policy(
    tx: &mut Tx<'_>,
    policy: &Policy,
    side: usize,
    events: &mut EventBuffer,
) -> Result<()> {
    let Some(s) = policy.kind.sides.get(side) else {
        return Ok(());
    };
    let roles = policy.role_list(s.field)?;

    let matched = tx
        .rows(s.target.bucket())
        .filter(|(id, record)| {
            roles.matches(
                policy.semantic,
                id,
                record.strings(fields::ROLE_ATTRIBUTES),
            )
        })
        .map(|(id, _)| id.to_string())
        .collect::<BTreeSet<_>>();
    let current = s
        .links
        .entities(tx, &policy.id)
        .into_iter()
        .collect::<BTreeSet<_>>();

    trace!(
        kind = %policy.kind,
        policy = %policy.id,
        field = %s.field,
        matched = matched.len(),
        current = current.len(),
        "Evaluating policy"
    );

    for id in current.difference(&matched) {
        unlink(tx, policy, side, id, events)?;
    }
    for id in matched.difference(&current) {
        link(tx, policy, side, id, events)?;
    }
    Ok(())
}

/// Re-evaluates one entity against every policy whose sides select its type.
///
/// `attributes` holds the entity's current role attributes, or `None` when the entity is being
/// deleted and must no longer match anything.
pub fn evaluate_entity(
    tx: &mut Tx<'_>,
    target: EntityType,
    entity_id: &str,
    attributes: Option<&[String]>,
    events: &mut EventBuffer,
) -> Result<()> {
    for kind in PolicyKind::all() {
        if kind.sides_for(target).next().is_none() {
            continue;
        }
        for policy in Policy::load_all(tx, kind)? {
            for (side, s) in kind.sides_for(target) {
                let matches = match attributes {
                    Some(attributes) => {
                        policy
                            .role_list(s.field)?
                            .matches(policy.semantic, entity_id, attributes)
                    }
                    None => false,
                };
                let linked = s.links.contains(tx, &policy.id, entity_id);
                trace!(
                    %kind,
                    policy = %policy.id,
                    entity = %entity_id,
                    matches,
                    linked,
                    "Evaluating entity"
                );
                if matches && !linked {
                    link(tx, &policy, side, entity_id, events)?;
                } else if !matches && linked {
                    unlink(tx, &policy, side, entity_id, events)?;
                }
            }
        }
    }
    Ok(())
}

/// Links an entity to one side of a policy and counts every pair the new link produces.
pub fn link(
    tx: &mut Tx<'_>,
    policy: &Policy,
    side: usize,
    entity_id: &str,
    events: &mut EventBuffer,
) -> Result<()> {
    let s = &policy.kind.sides[side];
    if !s.links.add(tx, &policy.id, entity_id) {
        return Ok(());
    }
    debug!(
        kind = %policy.kind,
        policy = %policy.id,
        entity = %entity_id,
        field = %s.field,
        "Linked"
    );

    for relation in policy.kind.relations_for(policy.policy_type) {
        let Some(other) = relation.other(side) else {
            continue;
        };
        let others = policy.kind.sides[other].links.entities(tx, &policy.id);
        for other_id in others.iter() {
            let (left, right) = relation.orient(side, entity_id, other_id);
            let count = relation.denorm.add_link(tx, left, right)?;
            debug!(collection = %relation.denorm.name, %left, %right, count, "Incremented");
            if count == 1 {
                changed(tx, relation, left, right, true, events);
            }
        }
    }
    Ok(())
}

/// Unlinks an entity from one side of a policy and releases every pair the link produced.
pub fn unlink(
    tx: &mut Tx<'_>,
    policy: &Policy,
    side: usize,
    entity_id: &str,
    events: &mut EventBuffer,
) -> Result<()> {
    let s = &policy.kind.sides[side];
    if !s.links.remove(tx, &policy.id, entity_id) {
        return Ok(());
    }
    debug!(
        kind = %policy.kind,
        policy = %policy.id,
        entity = %entity_id,
        field = %s.field,
        "Unlinked"
    );

    for relation in policy.kind.relations_for(policy.policy_type) {
        let Some(other) = relation.other(side) else {
            continue;
        };
        let others = policy.kind.sides[other].links.entities(tx, &policy.id);
        for other_id in others.iter() {
            let (left, right) = relation.orient(side, entity_id, other_id);
            let count = relation.denorm.remove_link(tx, left, right)?;
            debug!(collection = %relation.denorm.name, %left, %right, count, "Decremented");
            if count == 0 {
                changed(tx, relation, left, right, false, events);
            }
        }
    }
    Ok(())
}

/// Raises the events for a pair that just appeared or disappeared.
fn changed(
    tx: &Tx<'_>,
    relation: &Relation,
    left: &str,
    right: &str,
    gained: bool,
    events: &mut EventBuffer,
) {
    match relation.hook {
        Hook::None => {}
        Hook::Access(policy_type) => {
            let event_type = match (policy_type, gained) {
                (PolicyType::Dial, true) => ServiceEventType::DialAccessGained,
                (PolicyType::Dial, false) => ServiceEventType::DialAccessLost,
                (PolicyType::Bind, true) => ServiceEventType::BindAccessGained,
                (PolicyType::Bind, false) => ServiceEventType::BindAccessLost,
            };
            events.push(ServiceEvent::new(event_type, left, right));
        }
        Hook::ServiceUpdated => events.service_updated(tx, right),
    }
}
