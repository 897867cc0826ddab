//! Verifies the links and denormalized pairs of a policy kind against its policies.
//!
//! The expected state is recomputed from scratch: every policy's role lists are matched against
//! every entity, and the pairs of each relation are counted over the resulting matches. Any link or
//! count that differs from the recomputed value is reported, and optionally repaired.

use crate::{fields, kind::PolicyKind, policy::Policy};
use ahash::AHashMap as HashMap;
use overlay_policy_core::{Error, Result};
use overlay_policy_store::{State, Tx};
use std::collections::BTreeSet;
use tracing::{debug, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Discrepancy {
    Link {
        side: usize,
        policy_id: String,
        entity_id: String,
        expected: bool,
        forward: bool,
        reverse: bool,
    },
    Count {
        relation: usize,
        left: String,
        right: String,
        expected: i32,
        forward: i32,
        reverse: i32,
    },
}

/// Reports every discrepancy of `kind` to `errors`. Nothing is modified.
pub fn check_integrity(
    state: &State,
    kind: &'static PolicyKind,
    errors: &mut dyn FnMut(Error, bool),
) -> Result<()> {
    for d in discrepancies(state, kind)? {
        errors(d.to_error(kind), false);
    }
    Ok(())
}

/// Reports and repairs every discrepancy of `kind`.
///
/// Repairs set links and counts to their expected values and raise no service events.
pub fn repair_integrity(
    tx: &mut Tx<'_>,
    kind: &'static PolicyKind,
    errors: &mut dyn FnMut(Error, bool),
) -> Result<()> {
    for d in discrepancies(tx, kind)? {
        warn!(%kind, discrepancy = ?d, "Repairing");
        match &d {
            Discrepancy::Link {
                side,
                policy_id,
                entity_id,
                expected,
                ..
            } => {
                let links = &kind.sides[*side].links;
                if *expected {
                    links.add(tx, policy_id, entity_id);
                } else {
                    tx.remove_link(links.forward, policy_id, entity_id);
                    tx.remove_link(links.reverse, entity_id, policy_id);
                }
            }
            Discrepancy::Count {
                relation,
                left,
                right,
                expected,
                ..
            } => {
                kind.relations[*relation]
                    .denorm
                    .set_link_count(tx, left, right, *expected);
            }
        }
        errors(d.to_error(kind), true);
    }
    Ok(())
}

fn discrepancies(state: &State, kind: &'static PolicyKind) -> Result<Vec<Discrepancy>> {
    let policies = Policy::load_all(state, kind)?;
    let mut found = Vec::new();

    // Matches of every policy, per side.
    let mut matches = Vec::with_capacity(policies.len());
    for policy in policies.iter() {
        let mut sides = Vec::with_capacity(kind.sides.len());
        for s in kind.sides {
            let roles = policy.role_list(s.field)?;
            let matched = state
                .rows(s.target.bucket())
                .filter(|(id, r)| {
                    roles.matches(policy.semantic, id, r.strings(fields::ROLE_ATTRIBUTES))
                })
                .map(|(id, _)| id.to_string())
                .collect::<BTreeSet<_>>();
            sides.push(matched);
        }
        matches.push(sides);
    }

    for (side, s) in kind.sides.iter().enumerate() {
        let mut candidates = BTreeSet::new();
        for (policy, sides) in policies.iter().zip(matches.iter()) {
            for entity_id in sides[side].iter() {
                candidates.insert((policy.id.clone(), entity_id.clone()));
            }
            for entity_id in s.links.iterate(state, &policy.id, true) {
                candidates.insert((policy.id.clone(), entity_id.to_string()));
            }
        }
        // Links held by policies or entities that no longer exist.
        for policy_id in state.link_keys(s.links.forward) {
            for entity_id in state.links(s.links.forward, policy_id) {
                candidates.insert((policy_id.to_string(), entity_id.to_string()));
            }
        }
        for entity_id in state.link_keys(s.links.reverse) {
            for policy_id in state.links(s.links.reverse, entity_id) {
                candidates.insert((policy_id.to_string(), entity_id.to_string()));
            }
        }

        for (policy_id, entity_id) in candidates {
            let expected = policies
                .iter()
                .position(|p| p.id == policy_id)
                .is_some_and(|i| matches[i][side].contains(&entity_id));
            let forward = state.has_link(s.links.forward, &policy_id, &entity_id);
            let reverse = state.has_link(s.links.reverse, &entity_id, &policy_id);
            if forward != expected || reverse != expected {
                found.push(Discrepancy::Link {
                    side,
                    policy_id,
                    entity_id,
                    expected,
                    forward,
                    reverse,
                });
            }
        }
    }

    for (index, relation) in kind.relations.iter().enumerate() {
        let mut expected = HashMap::<(String, String), i32>::new();
        for (policy, sides) in policies.iter().zip(matches.iter()) {
            if relation.policy_type.is_some() && relation.policy_type != policy.policy_type {
                continue;
            }
            for left in sides[relation.left].iter() {
                for right in sides[relation.right].iter() {
                    *expected.entry((left.clone(), right.clone())).or_default() += 1;
                }
            }
        }

        let mut pairs = expected.keys().cloned().collect::<BTreeSet<_>>();
        pairs.extend(
            state
                .counts(relation.denorm.forward)
                .map(|(l, r, _)| (l.to_string(), r.to_string())),
        );
        pairs.extend(
            state
                .counts(relation.denorm.reverse)
                .map(|(r, l, _)| (l.to_string(), r.to_string())),
        );

        for (left, right) in pairs {
            let want = expected.get(&(left.clone(), right.clone())).copied().unwrap_or(0);
            let (forward, reverse) = relation.denorm.link_counts(state, &left, &right);
            if forward != want || reverse != want {
                found.push(Discrepancy::Count {
                    relation: index,
                    left,
                    right,
                    expected: want,
                    forward,
                    reverse,
                });
            }
        }
    }

    debug!(%kind, policies = policies.len(), discrepancies = found.len(), "Checked integrity");
    Ok(found)
}

// === impl Discrepancy ===

impl Discrepancy {
    fn to_error(&self, kind: &PolicyKind) -> Error {
        match self {
            Self::Link {
                side,
                policy_id,
                entity_id,
                expected,
                forward,
                reverse,
            } => Error::Consistency(format!(
                "{kind} {policy_id} link to {} {entity_id} should be {}, forward link is {}, reverse link is {}",
                kind.sides[*side].target,
                presence(*expected),
                presence(*forward),
                presence(*reverse),
            )),
            Self::Count {
                relation,
                left,
                right,
                expected,
                forward,
                reverse,
            } => Error::Consistency(format!(
                "for {kind} denormalized link {} {left} -> {right}, link count should be {expected}, forward count is {forward}, reverse count is {reverse}",
                kind.relations[*relation].denorm.name,
            )),
        }
    }
}

fn presence(present: bool) -> &'static str {
    if present {
        "present"
    } else {
        "absent"
    }
}
