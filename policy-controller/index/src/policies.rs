use crate::{
    evaluate::evaluate_policy, events::EventBuffer, kind::PolicyKind, policy::Policy, Index,
};
use overlay_policy_core::{Error, Result, RoleList};
use overlay_policy_store::{State, Tx};
use tracing::{debug, info};

impl Index {
    /// Validates and stores a new policy, then links everything it matches.
    pub fn create_policy(&self, tx: &mut Tx<'_>, mut policy: Policy) -> Result<()> {
        if policy.is_system && !tx.is_system_context() {
            return Err(system_protection(policy.kind, &policy.id));
        }
        validate(tx, &mut policy)?;
        tx.create(policy.kind.bucket, &policy.id, policy.encode())?;

        let mut events = EventBuffer::default();
        for side in 0..policy.kind.sides.len() {
            evaluate_policy(tx, &policy, side, &mut events)?;
        }
        events.flush(tx, &self.events);

        info!(kind = %policy.kind, id = %policy.id, name = %policy.name, "Created policy");
        Ok(())
    }

    /// Replaces a policy's definition, re-evaluating only the sides whose role list changed.
    ///
    /// Changing the semantic re-evaluates every side. The policy type may not change, and system
    /// policies may only be updated from a system context.
    pub fn update_policy(&self, tx: &mut Tx<'_>, mut policy: Policy) -> Result<()> {
        let prior = Policy::load(tx, policy.kind, &policy.id)?;
        if prior.is_system && !tx.is_system_context() {
            return Err(system_protection(policy.kind, &policy.id));
        }

        let policy_type = policy.policy_type.or(prior.policy_type);
        if policy_type != prior.policy_type {
            return Err(Error::validation(
                "type",
                "the type of a policy may not be changed",
                policy_type.map(|t| t.to_string()),
            ));
        }
        policy.policy_type = policy_type;
        policy.is_system = prior.is_system;

        validate(tx, &mut policy)?;
        self.persist_policy(tx, &policy, Some(&prior))?;
        debug!(kind = %policy.kind, id = %policy.id, "Updated policy");
        Ok(())
    }

    /// Deletes a policy after clearing its role lists, so that every link and pair it produced is
    /// released before the row is removed.
    pub fn delete_policy(
        &self,
        tx: &mut Tx<'_>,
        kind: &'static PolicyKind,
        id: &str,
    ) -> Result<()> {
        let prior = Policy::load(tx, kind, id)?;
        if prior.is_system && !tx.is_system_context() {
            return Err(system_protection(kind, id));
        }

        let mut cleared = prior.clone();
        for side in kind.sides {
            cleared.roles.insert(side.field.to_string(), Vec::new());
        }
        self.persist_policy(tx, &cleared, Some(&prior))?;
        tx.delete(kind.bucket, id)?;

        info!(%kind, %id, "Deleted policy");
        Ok(())
    }

    /// Writes a validated policy and evaluates every side that differs from `prior`.
    pub(crate) fn persist_policy(
        &self,
        tx: &mut Tx<'_>,
        policy: &Policy,
        prior: Option<&Policy>,
    ) -> Result<()> {
        tx.put(policy.kind.bucket, &policy.id, policy.encode())?;

        let mut events = EventBuffer::default();
        for (side, s) in policy.kind.sides.iter().enumerate() {
            let changed = match prior {
                None => true,
                Some(prior) => {
                    prior.semantic != policy.semantic
                        || prior.roles(s.field) != policy.roles(s.field)
                }
            };
            if changed {
                evaluate_policy(tx, policy, side, &mut events)?;
            }
        }
        events.flush(tx, &self.events);
        Ok(())
    }
}

/// Checks a policy before anything is written and normalizes its role lists.
///
/// Every explicit `@id` reference must name an existing entity of the side's target type.
fn validate(state: &State, policy: &mut Policy) -> Result<()> {
    let kind = policy.kind;
    if policy.id.is_empty() {
        return Err(Error::validation("id", "id is required", [""]));
    }
    if policy.name.trim().is_empty() {
        return Err(Error::validation("name", "name is required", [&policy.name]));
    }

    if let Some((field, values)) = policy.roles.iter().find(|(f, _)| kind.side(f).is_none()) {
        return Err(Error::validation(
            field,
            format!("{kind} has no role field {field}"),
            values,
        ));
    }

    match (kind.typed, policy.policy_type) {
        (true, None) => {
            return Err(Error::validation(
                "type",
                "a policy type of Dial or Bind is required",
                Vec::<String>::new(),
            ))
        }
        (false, Some(t)) => {
            return Err(Error::validation(
                "type",
                format!("{kind} does not have a type"),
                [t],
            ))
        }
        _ => {}
    }

    for side in kind.sides {
        let roles = RoleList::parse(side.field, policy.roles(side.field))?;
        let bucket = side.target.bucket();
        let unresolved = roles
            .ids()
            .filter(|id| !state.contains(bucket, id))
            .collect::<Vec<_>>();
        if !unresolved.is_empty() {
            return Err(Error::validation(
                side.field,
                format!("no {bucket} found with the given ids"),
                unresolved,
            ));
        }
        policy
            .roles
            .insert(side.field.to_string(), roles.to_strings());
    }
    Ok(())
}

fn system_protection(kind: &PolicyKind, id: &str) -> Error {
    Error::SystemProtection {
        entity: kind.name.to_string(),
        id: id.to_string(),
    }
}
