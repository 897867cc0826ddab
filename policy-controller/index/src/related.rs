use crate::{
    denorm,
    kind::{EntityType, PolicyKind},
};
use overlay_policy_core::{Error, Result};
use overlay_policy_store::State;

/// Lists the ids related to an entity or policy through one of its link fields.
///
/// `bucket` names the owner's type (e.g. `identities`, `servicePolicies`) and `field` the related
/// collection (e.g. `dialServices`, `edgeRouters`). Link fields list every linked id; denormalized
/// fields list the ids whose pair count is positive.
pub fn related_ids(state: &State, bucket: &str, id: &str, field: &str) -> Result<Vec<String>> {
    let path = format!("{bucket}/{field}");

    let link = PolicyKind::all().into_iter().flat_map(|k| k.sides.iter()).find_map(|s| {
        if s.links.forward == path {
            Some(s.links.forward)
        } else if s.links.reverse == path {
            Some(s.links.reverse)
        } else {
            None
        }
    });
    let counted = denorm::ALL.iter().find_map(|d| {
        if d.forward == path {
            Some((*d, true))
        } else if d.reverse == path {
            Some((*d, false))
        } else {
            None
        }
    });
    if link.is_none() && counted.is_none() {
        return Err(Error::validation(
            field,
            format!("{bucket} have no related field {field}"),
            [field],
        ));
    }

    if !state.contains(bucket, id) {
        let entity = EntityType::ALL
            .iter()
            .find(|t| t.bucket() == bucket)
            .map(|t| t.name())
            .or_else(|| {
                PolicyKind::all()
                    .into_iter()
                    .find(|k| k.bucket == bucket)
                    .map(|k| k.name)
            })
            .unwrap_or(bucket);
        return Err(Error::not_found(entity, id));
    }

    if let Some(path) = link {
        return Ok(state.links(path, id).map(str::to_string).collect());
    }
    match counted {
        Some((collection, forward)) => Ok(collection.related(state, id, forward)),
        None => Ok(Vec::new()),
    }
}

/// Indicates whether the identity may dial the service.
pub fn can_dial(state: &State, identity_id: &str, service_id: &str) -> bool {
    denorm::IDENTITY_DIAL_SERVICES.link_count(state, identity_id, service_id) > 0
}

/// Indicates whether the identity may bind the service.
pub fn can_bind(state: &State, identity_id: &str, service_id: &str) -> bool {
    denorm::IDENTITY_BIND_SERVICES.link_count(state, identity_id, service_id) > 0
}

pub fn can_reach_edge_router(state: &State, identity_id: &str, edge_router_id: &str) -> bool {
    denorm::IDENTITY_EDGE_ROUTERS.link_count(state, identity_id, edge_router_id) > 0
}
