//! Pairs tunneling edge routers with a shadow identity.
//!
//! An edge router that hosts tunneled services needs an identity of its own, and that identity
//! needs access to the router. When tunneling is enabled the router gets an identity with the
//! same id and name and a system edge router policy binding exactly the two by id. Both are
//! removed when tunneling is disabled or the router is deleted.

use crate::{
    entities::{EdgeRouter, Entity, Identity, IdentityType},
    fields,
    kind::{EntityType, EDGE_ROUTER_POLICIES},
    policy::Policy,
    Index,
};
use overlay_policy_core::{Error, Result, Semantic};
use overlay_policy_store::Tx;
use tracing::info;

/// The name of the system policy paired with a tunneling router.
pub fn system_policy_name(router_id: &str) -> String {
    format!("edge-router-{router_id}-system")
}

pub(crate) fn reconcile(
    index: &Index,
    tx: &mut Tx<'_>,
    router: &EdgeRouter,
    prior: Option<&EdgeRouter>,
) -> Result<()> {
    if router.is_tunneler_enabled {
        return tx.with_system_context(|tx| enable(index, tx, router));
    }
    if prior.is_some_and(|p| p.is_tunneler_enabled) {
        return tx.with_system_context(|tx| disable(index, tx, &router.id));
    }
    Ok(())
}

pub(crate) fn before_router_delete(index: &Index, tx: &mut Tx<'_>, router_id: &str) -> Result<()> {
    tx.with_system_context(|tx| disable(index, tx, router_id))
}

/// Shadow identities may not be removed while their router still tunnels.
pub(crate) fn before_identity_delete(tx: &Tx<'_>, identity_id: &str) -> Result<()> {
    if tx.is_system_context() {
        return Ok(());
    }
    let identity = Identity::load(tx, identity_id)?;
    let tunneling = tx
        .get(EntityType::EdgeRouter.bucket(), identity_id)
        .is_some_and(|r| r.bool(fields::IS_TUNNELER_ENABLED));
    if identity.identity_type == IdentityType::Router && tunneling {
        return Err(conflict(
            EntityType::Identity,
            identity_id,
            "the identity belongs to an edge router with tunneling enabled",
        ));
    }
    Ok(())
}

fn enable(index: &Index, tx: &mut Tx<'_>, router: &EdgeRouter) -> Result<()> {
    match Identity::load(tx, &router.id) {
        Ok(identity) if identity.identity_type != IdentityType::Router => {
            return Err(conflict(
                EntityType::Identity,
                &router.id,
                "an identity that is not a router identity already uses the edge router's id",
            ));
        }
        Ok(identity) => {
            if identity.name != router.name {
                info!(router = %router.id, name = %router.name, "Renaming router identity");
                index.update_entity(
                    tx,
                    Identity {
                        name: router.name.clone(),
                        ..identity
                    },
                )?;
            }
        }
        Err(e) if e.is_not_found() => {
            info!(router = %router.id, "Creating router identity");
            index.create_entity(
                tx,
                Identity {
                    identity_type: IdentityType::Router,
                    ..Identity::new(&router.id, &router.name)
                },
            )?;
        }
        Err(e) => return Err(e),
    }

    match Policy::load(tx, &EDGE_ROUTER_POLICIES, &router.id) {
        Ok(policy) if policy.is_system => Ok(()),
        Ok(_) => Err(conflict(
            EntityType::EdgeRouter,
            &router.id,
            "an edge router policy that is not a system policy already uses the edge router's id",
        )),
        Err(e) if e.is_not_found() => {
            let id_role = format!("@{}", router.id);
            index.create_policy(
                tx,
                Policy::new(
                    &EDGE_ROUTER_POLICIES,
                    &router.id,
                    system_policy_name(&router.id),
                )
                .semantic(Semantic::AnyOf)
                .with_roles(fields::IDENTITY_ROLES, [&id_role])
                .with_roles(fields::EDGE_ROUTER_ROLES, [&id_role])
                .system(),
            )
        }
        Err(e) => Err(e),
    }
}

fn conflict(entity: EntityType, id: &str, message: &str) -> Error {
    Error::ReferentialIntegrity {
        entity: entity.name().to_string(),
        id: id.to_string(),
        message: message.to_string(),
    }
}

fn disable(index: &Index, tx: &mut Tx<'_>, router_id: &str) -> Result<()> {
    let paired = match Policy::load(tx, &EDGE_ROUTER_POLICIES, router_id) {
        Ok(policy) => policy.is_system,
        Err(e) if e.is_not_found() => false,
        Err(e) => return Err(e),
    };
    if paired {
        index.delete_policy(tx, &EDGE_ROUTER_POLICIES, router_id)?;
    }

    let shadow = Identity::load(tx, router_id)
        .ok()
        .is_some_and(|i| i.identity_type == IdentityType::Router);
    if shadow {
        info!(router = %router_id, "Deleting router identity");
        index.delete_entity(tx, EntityType::Identity, router_id)?;
    }
    Ok(())
}
