//! Descriptors for the entity types and policy kinds known to the index.
//!
//! The three policy kinds share one evaluation engine. Each kind is described by a static
//! [`PolicyKind`] naming its role fields, the entity types they select, the link collections that
//! record each policy's matches, and the denormalized relations the kind maintains.

use crate::{
    denorm::{self, RefCountedLinkCollection},
    fields,
    links::LinkCollection,
};
use overlay_policy_core::PolicyType;
use std::fmt;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EntityType {
    Identity,
    EdgeRouter,
    Service,
    PostureCheck,
}

#[derive(Debug, PartialEq, Eq)]
pub struct PolicyKind {
    pub bucket: &'static str,
    pub name: &'static str,

    /// Whether policies of this kind carry a Dial/Bind type.
    pub typed: bool,
    pub sides: &'static [Side],
    pub relations: &'static [Relation],
}

/// One role list of a policy and the entities it selects.
#[derive(Debug, PartialEq, Eq)]
pub struct Side {
    pub field: &'static str,
    pub target: EntityType,
    pub links: LinkCollection,
}

/// A denormalized pairing between the entities matched on two sides of a policy.
#[derive(Debug, PartialEq, Eq)]
pub struct Relation {
    pub left: usize,
    pub right: usize,

    /// Restricts the relation to policies of the given type.
    pub policy_type: Option<PolicyType>,
    pub denorm: RefCountedLinkCollection,
    pub hook: Hook,
}

/// Events raised when a denormalized pair appears or disappears.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Hook {
    None,

    /// The pair is (identity, service); access of the given type was gained or lost.
    Access(PolicyType),

    /// The right side is a service whose clients must re-read it.
    ServiceUpdated,
}

pub static EDGE_ROUTER_POLICIES: PolicyKind = PolicyKind {
    bucket: "edgeRouterPolicies",
    name: "edgeRouterPolicy",
    typed: false,
    sides: &[
        Side {
            field: fields::IDENTITY_ROLES,
            target: EntityType::Identity,
            links: LinkCollection::new(
                "edgeRouterPolicies/identities",
                "identities/edgeRouterPolicies",
            ),
        },
        Side {
            field: fields::EDGE_ROUTER_ROLES,
            target: EntityType::EdgeRouter,
            links: LinkCollection::new(
                "edgeRouterPolicies/edgeRouters",
                "edgeRouters/edgeRouterPolicies",
            ),
        },
    ],
    relations: &[Relation {
        left: 0,
        right: 1,
        policy_type: None,
        denorm: denorm::IDENTITY_EDGE_ROUTERS,
        hook: Hook::None,
    }],
};

pub static SERVICE_EDGE_ROUTER_POLICIES: PolicyKind = PolicyKind {
    bucket: "serviceEdgeRouterPolicies",
    name: "serviceEdgeRouterPolicy",
    typed: false,
    sides: &[
        Side {
            field: fields::SERVICE_ROLES,
            target: EntityType::Service,
            links: LinkCollection::new(
                "serviceEdgeRouterPolicies/services",
                "services/serviceEdgeRouterPolicies",
            ),
        },
        Side {
            field: fields::EDGE_ROUTER_ROLES,
            target: EntityType::EdgeRouter,
            links: LinkCollection::new(
                "serviceEdgeRouterPolicies/edgeRouters",
                "edgeRouters/serviceEdgeRouterPolicies",
            ),
        },
    ],
    relations: &[Relation {
        left: 0,
        right: 1,
        policy_type: None,
        denorm: denorm::SERVICE_EDGE_ROUTERS,
        hook: Hook::None,
    }],
};

pub static SERVICE_POLICIES: PolicyKind = PolicyKind {
    bucket: "servicePolicies",
    name: "servicePolicy",
    typed: true,
    sides: &[
        Side {
            field: fields::IDENTITY_ROLES,
            target: EntityType::Identity,
            links: LinkCollection::new("servicePolicies/identities", "identities/servicePolicies"),
        },
        Side {
            field: fields::SERVICE_ROLES,
            target: EntityType::Service,
            links: LinkCollection::new("servicePolicies/services", "services/servicePolicies"),
        },
        Side {
            field: fields::POSTURE_CHECK_ROLES,
            target: EntityType::PostureCheck,
            links: LinkCollection::new(
                "servicePolicies/postureChecks",
                "postureChecks/servicePolicies",
            ),
        },
    ],
    relations: &[
        Relation {
            left: 0,
            right: 1,
            policy_type: Some(PolicyType::Dial),
            denorm: denorm::IDENTITY_DIAL_SERVICES,
            hook: Hook::Access(PolicyType::Dial),
        },
        Relation {
            left: 0,
            right: 1,
            policy_type: Some(PolicyType::Bind),
            denorm: denorm::IDENTITY_BIND_SERVICES,
            hook: Hook::Access(PolicyType::Bind),
        },
        Relation {
            left: 2,
            right: 1,
            policy_type: Some(PolicyType::Dial),
            denorm: denorm::POSTURE_CHECK_DIAL_SERVICES,
            hook: Hook::ServiceUpdated,
        },
        Relation {
            left: 2,
            right: 1,
            policy_type: Some(PolicyType::Bind),
            denorm: denorm::POSTURE_CHECK_BIND_SERVICES,
            hook: Hook::ServiceUpdated,
        },
    ],
};

// === impl EntityType ===

impl EntityType {
    pub const ALL: [Self; 4] = [
        Self::Identity,
        Self::EdgeRouter,
        Self::Service,
        Self::PostureCheck,
    ];

    pub const fn bucket(self) -> &'static str {
        match self {
            Self::Identity => "identities",
            Self::EdgeRouter => "edgeRouters",
            Self::Service => "services",
            Self::PostureCheck => "postureChecks",
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::EdgeRouter => "edgeRouter",
            Self::Service => "service",
            Self::PostureCheck => "postureCheck",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name().fmt(f)
    }
}

// === impl PolicyKind ===

impl PolicyKind {
    pub fn all() -> [&'static PolicyKind; 3] {
        [
            &EDGE_ROUTER_POLICIES,
            &SERVICE_EDGE_ROUTER_POLICIES,
            &SERVICE_POLICIES,
        ]
    }

    pub fn side(&self, field: &str) -> Option<&Side> {
        self.sides.iter().find(|s| s.field == field)
    }

    /// The sides of this kind selecting entities of type `target`, with their positions.
    pub fn sides_for(&self, target: EntityType) -> impl Iterator<Item = (usize, &Side)> {
        self.sides
            .iter()
            .enumerate()
            .filter(move |(_, s)| s.target == target)
    }

    /// The relations maintained for a policy of the given type.
    pub fn relations_for(
        &self,
        policy_type: Option<PolicyType>,
    ) -> impl Iterator<Item = &Relation> {
        self.relations
            .iter()
            .filter(move |r| r.policy_type.is_none() || r.policy_type == policy_type)
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name.fmt(f)
    }
}

// === impl Relation ===

impl Relation {
    /// Given the side an entity was matched on, returns the opposite side of this relation.
    pub fn other(&self, side: usize) -> Option<usize> {
        if side == self.left {
            Some(self.right)
        } else if side == self.right {
            Some(self.left)
        } else {
            None
        }
    }

    /// Orients a pair matched on `side` and `other` as `(left, right)`.
    pub fn orient<'a>(&self, side: usize, entity: &'a str, other: &'a str) -> (&'a str, &'a str) {
        if side == self.left {
            (entity, other)
        } else {
            (other, entity)
        }
    }
}
