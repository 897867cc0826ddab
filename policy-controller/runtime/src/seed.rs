//! Loads entities and policies from a JSON document at startup.

use anyhow::{Context, Result};
use overlay_policy_core::{PolicyType, Semantic};
use overlay_policy_index::{
    fields, ApiSession, EdgeRouter, Identity, Index, Policy, PolicyKind, PostureCheck, Service,
    EDGE_ROUTER_POLICIES, SERVICE_EDGE_ROUTER_POLICIES, SERVICE_POLICIES,
};
use overlay_policy_store::Db;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Everything a seed document may hold. All sections are optional.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct Seed {
    pub identities: Vec<Identity>,
    pub edge_routers: Vec<EdgeRouter>,
    pub services: Vec<Service>,
    pub posture_checks: Vec<PostureCheck>,
    pub edge_router_policies: Vec<PolicySeed>,
    pub service_edge_router_policies: Vec<PolicySeed>,
    pub service_policies: Vec<PolicySeed>,
    pub api_sessions: Vec<ApiSession>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySeed {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub semantic: Semantic,
    #[serde(default, rename = "type")]
    pub policy_type: Option<PolicyType>,
    #[serde(default)]
    pub identity_roles: Vec<String>,
    #[serde(default)]
    pub edge_router_roles: Vec<String>,
    #[serde(default)]
    pub service_roles: Vec<String>,
    #[serde(default)]
    pub posture_check_roles: Vec<String>,
}

// === impl Seed ===

impl Seed {
    pub fn read(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read seed {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("invalid seed {}", path.display()))
    }

    /// Stores the whole seed in a single transaction. Entities are created before the policies
    /// that may reference them.
    pub fn apply(self, index: &Index, db: &Db) -> Result<()> {
        let Self {
            identities,
            edge_routers,
            services,
            posture_checks,
            edge_router_policies,
            service_edge_router_policies,
            service_policies,
            api_sessions,
        } = self;

        let policies = [
            (&EDGE_ROUTER_POLICIES, edge_router_policies),
            (&SERVICE_EDGE_ROUTER_POLICIES, service_edge_router_policies),
            (&SERVICE_POLICIES, service_policies),
        ];
        let entities =
            identities.len() + edge_routers.len() + services.len() + posture_checks.len();
        let policy_count = policies.iter().map(|(_, p)| p.len()).sum::<usize>();

        db.update(|tx| {
            for identity in identities {
                index.create_entity(tx, identity)?;
            }
            for router in edge_routers {
                index.create_entity(tx, router)?;
            }
            for service in services {
                index.create_entity(tx, service)?;
            }
            for check in posture_checks {
                index.create_entity(tx, check)?;
            }
            for (kind, seeds) in policies {
                for seed in seeds {
                    index.create_policy(tx, seed.into_policy(kind))?;
                }
            }
            for session in api_sessions {
                index.create_api_session(tx, session)?;
            }
            Ok(())
        })
        .context("failed to apply seed")?;

        info!(entities, policies = policy_count, "Loaded seed");
        Ok(())
    }
}

// === impl PolicySeed ===

impl PolicySeed {
    /// Only non-empty role lists are carried over, so a list that the kind does not have is
    /// rejected when the policy is validated.
    fn into_policy(self, kind: &'static PolicyKind) -> Policy {
        let mut policy = Policy::new(kind, self.id, self.name).semantic(self.semantic);
        policy.policy_type = self.policy_type;
        for (field, roles) in [
            (fields::IDENTITY_ROLES, self.identity_roles),
            (fields::EDGE_ROUTER_ROLES, self.edge_router_roles),
            (fields::SERVICE_ROLES, self.service_roles),
            (fields::POSTURE_CHECK_ROLES, self.posture_check_roles),
        ] {
            if !roles.is_empty() {
                policy = policy.with_roles(field, roles);
            }
        }
        policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlay_policy_index::{can_dial, can_reach_edge_router, ServiceEventSink};
    use std::{io::Write, sync::Arc};

    struct Discard;

    impl ServiceEventSink for Discard {
        fn dispatch(&self, _: Vec<overlay_policy_core::ServiceEvent>) {}
    }

    const SEED: &str = r##"{
        "identities": [
            { "id": "alice", "name": "alice", "roleAttributes": ["ops"] }
        ],
        "edgeRouters": [
            { "id": "er-1", "name": "router-1", "roleAttributes": ["public"] },
            { "id": "er-2", "name": "router-2", "isTunnelerEnabled": true }
        ],
        "services": [
            { "id": "web", "name": "web", "roleAttributes": ["http"] }
        ],
        "edgeRouterPolicies": [
            { "id": "erp", "name": "ops-public", "identityRoles": ["#ops"], "edgeRouterRoles": ["#public"] }
        ],
        "servicePolicies": [
            { "id": "sp", "name": "ops-web", "type": "Dial", "semantic": "AnyOf",
              "identityRoles": ["@alice"], "serviceRoles": ["#http"] }
        ]
    }"##;

    fn setup() -> (Index, Db) {
        let index = Index::new(Arc::new(Discard));
        let db = Db::new(index.schema());
        (index, db)
    }

    #[test]
    fn applies_seed() {
        let seed = serde_json::from_str::<Seed>(SEED).unwrap();
        assert_eq!(seed.edge_routers.len(), 2);
        let (index, db) = setup();
        seed.apply(&index, &db).unwrap();

        let state = db.view();
        assert!(can_reach_edge_router(&state, "alice", "er-1"));
        assert!(!can_reach_edge_router(&state, "alice", "er-2"));
        assert!(can_dial(&state, "alice", "web"));
        // The tunneling router was paired with its identity.
        assert!(can_reach_edge_router(&state, "er-2", "er-2"));
    }

    #[test]
    fn invalid_seed_applies_nothing() {
        let seed = serde_json::from_str::<Seed>(
            r##"{
                "identities": [{ "id": "alice", "name": "alice" }],
                "edgeRouterPolicies": [
                    { "id": "erp", "name": "erp", "identityRoles": ["@bob"] }
                ]
            }"##,
        )
        .unwrap();
        let (index, db) = setup();
        let err = seed.apply(&index, &db).unwrap_err();
        assert!(
            format!("{err:#}").contains("no identities found with the given ids"),
            "{err:#}"
        );
        assert_eq!(db.view().count("identities"), 0);
    }

    #[test]
    fn rejects_unknown_sections() {
        assert!(serde_json::from_str::<Seed>(r#"{ "routers": [] }"#).is_err());
    }

    #[test]
    fn reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SEED.as_bytes()).unwrap();
        let seed = Seed::read(file.path()).unwrap();
        assert_eq!(seed.identities.len(), 1);
        assert_eq!(seed.service_policies[0].policy_type, Some(PolicyType::Dial));

        let err = Seed::read(Path::new("/nonexistent/seed.json")).unwrap_err();
        assert!(err.to_string().contains("failed to read seed"));
    }
}
