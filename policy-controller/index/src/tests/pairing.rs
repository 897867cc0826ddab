use super::*;
use pretty_assertions::assert_eq;

fn shadow(test: &TestConfig, id: &str) -> Option<Identity> {
    Identity::load(&test.state(), id).ok()
}

#[test]
fn tunneling_pairs_router_with_identity() {
    let _tracing = TestConfig::init_tracing();
    let test = TestConfig::default();
    test.create(EdgeRouter::new("er", "router").tunneler(true));

    let identity = shadow(&test, "er").expect("router identity must exist");
    assert_eq!(identity.name, "router");
    assert_eq!(identity.identity_type, IdentityType::Router);

    let state = test.state();
    let policy = Policy::load(&state, &EDGE_ROUTER_POLICIES, "er").unwrap();
    assert_eq!(policy.name, router::system_policy_name("er"));
    assert_eq!(policy.name, "edge-router-er-system");
    assert!(policy.is_system);
    assert_eq!(policy.semantic, Semantic::AnyOf);
    assert_eq!(policy.roles(fields::IDENTITY_ROLES), ["@er"]);
    assert_eq!(policy.roles(fields::EDGE_ROUTER_ROLES), ["@er"]);
    assert_eq!(test.related("identities", "er", "edgeRouters"), ids(&["er"]));
    test.assert_consistent();
}

#[test]
fn renaming_router_renames_identity() {
    let test = TestConfig::default();
    test.create(EdgeRouter::new("er", "router").tunneler(true));
    test.update(|index, tx| {
        index.update_entity(tx, EdgeRouter::new("er", "renamed").tunneler(true))
    })
    .unwrap();

    assert_eq!(shadow(&test, "er").unwrap().name, "renamed");
    let policy = Policy::load(&test.state(), &EDGE_ROUTER_POLICIES, "er").unwrap();
    assert_eq!(policy.name, "edge-router-er-system");
}

#[test]
fn enabling_later_pairs_router() {
    let test = TestConfig::default();
    test.create(EdgeRouter::new("er", "router"));
    assert!(shadow(&test, "er").is_none());
    assert!(!test.state().contains(EDGE_ROUTER_POLICIES.bucket, "er"));

    test.update(|index, tx| {
        index.update_entity(tx, EdgeRouter::new("er", "router").tunneler(true))
    })
    .unwrap();
    assert!(shadow(&test, "er").is_some());
    assert!(can_reach_edge_router(&test.state(), "er", "er"));
}

#[test]
fn disabling_tunneling_unpairs_router() {
    let test = TestConfig::default();
    test.create(EdgeRouter::new("er", "router").tunneler(true));
    test.update(|index, tx| index.update_entity(tx, EdgeRouter::new("er", "router")))
        .unwrap();

    let state = test.state();
    assert!(shadow(&test, "er").is_none());
    assert!(!state.contains(EDGE_ROUTER_POLICIES.bucket, "er"));
    assert!(denorm::IDENTITY_EDGE_ROUTERS.is_empty(&state));
    assert!(state.contains(EntityType::EdgeRouter.bucket(), "er"));
    test.assert_consistent();
}

#[test]
fn deleting_router_unpairs_it() {
    let test = TestConfig::default();
    test.create(EdgeRouter::new("er", "router").tunneler(true));
    test.update(|index, tx| index.delete_entity(tx, EntityType::EdgeRouter, "er"))
        .unwrap();

    let state = test.state();
    assert!(shadow(&test, "er").is_none());
    assert_eq!(state.count(EDGE_ROUTER_POLICIES.bucket), 0);
    assert_eq!(state.count(EntityType::EdgeRouter.bucket()), 0);
    assert!(denorm::IDENTITY_EDGE_ROUTERS.is_empty(&state));
    test.assert_consistent();
}

#[test]
fn router_identity_is_protected() {
    let test = TestConfig::default();
    test.create(EdgeRouter::new("er", "router").tunneler(true));
    let before = test.state();

    let err = test
        .update(|index, tx| index.delete_entity(tx, EntityType::Identity, "er"))
        .unwrap_err();
    assert!(matches!(err, Error::ReferentialIntegrity { ref id, .. } if id == "er"));
    assert!(Arc::ptr_eq(&before, &test.state()));

    // A system context may remove it, which also strips it from the system policy.
    test.update_system(|index, tx| index.delete_entity(tx, EntityType::Identity, "er"))
        .unwrap();
    let state = test.state();
    assert!(shadow(&test, "er").is_none());
    assert!(!can_reach_edge_router(&state, "er", "er"));
    let policy = Policy::load(&state, &EDGE_ROUTER_POLICIES, "er").unwrap();
    assert!(policy.roles(fields::IDENTITY_ROLES).is_empty());
    test.assert_consistent();
}

#[test]
fn system_policies_need_a_system_context() {
    let test = TestConfig::default();
    test.create(EdgeRouter::new("er", "router").tunneler(true));

    let err = test
        .update(|index, tx| {
            index.update_policy(
                tx,
                edge_router_policy("er").with_roles(fields::IDENTITY_ROLES, ["#all"]),
            )
        })
        .unwrap_err();
    assert!(matches!(err, Error::SystemProtection { .. }));

    let err = test
        .update(|index, tx| index.create_policy(tx, edge_router_policy("sys").system()))
        .unwrap_err();
    assert!(matches!(err, Error::SystemProtection { .. }));

    test.update_system(|index, tx| index.create_policy(tx, edge_router_policy("sys").system()))
        .unwrap();
    assert!(
        Policy::load(&test.state(), &EDGE_ROUTER_POLICIES, "sys")
            .unwrap()
            .is_system
    );
}

#[test]
fn router_identities_are_managed_by_the_system() {
    let test = TestConfig::default();
    test.create(Identity::new("i", "identity"));
    let err = test
        .update(|index, tx| {
            index.update_entity(
                tx,
                Identity {
                    identity_type: IdentityType::Router,
                    ..Identity::new("i", "identity")
                },
            )
        })
        .unwrap_err();
    assert!(matches!(err, Error::Validation { ref field, .. } if field == fields::IDENTITY_TYPE));

    test.create(EdgeRouter::new("er", "router").tunneler(true));
    let err = test
        .update(|index, tx| index.update_entity(tx, Identity::new("er", "router")))
        .unwrap_err();
    assert!(matches!(err, Error::Validation { ref field, .. } if field == fields::IDENTITY_TYPE));
}

#[test]
fn tunneling_does_not_take_over_an_operator_identity() {
    let test = TestConfig::default();
    test.create(Identity::new("er", "alice"));
    let before = test.state();

    let err = test
        .update(|index, tx| {
            index.create_entity(tx, EdgeRouter::new("er", "router").tunneler(true))
        })
        .unwrap_err();
    assert!(
        matches!(
            err,
            Error::ReferentialIntegrity { ref entity, ref id, .. }
                if entity == "identity" && id == "er"
        ),
        "{err}"
    );
    assert!(Arc::ptr_eq(&before, &test.state()));

    // The router can exist without tunneling, and enabling it later fails the same way.
    test.create(EdgeRouter::new("er", "router"));
    let err = test
        .update(|index, tx| {
            index.update_entity(tx, EdgeRouter::new("er", "router").tunneler(true))
        })
        .unwrap_err();
    assert!(matches!(err, Error::ReferentialIntegrity { .. }), "{err}");

    let state = test.state();
    let identity = shadow(&test, "er").unwrap();
    assert_eq!(identity.name, "alice");
    assert_eq!(identity.identity_type, IdentityType::Default);
    assert!(!state.contains(EDGE_ROUTER_POLICIES.bucket, "er"));
    assert!(!can_reach_edge_router(&state, "er", "er"));
    test.assert_consistent();
}

#[test]
fn tunneling_does_not_reuse_an_operator_policy() {
    let test = TestConfig::default();
    test.create_policy(
        edge_router_policy("er")
            .with_roles(fields::IDENTITY_ROLES, ["#ops"])
            .with_roles(fields::EDGE_ROUTER_ROLES, ["#all"]),
    );
    let before = test.state();

    let err = test
        .update(|index, tx| {
            index.create_entity(tx, EdgeRouter::new("er", "router").tunneler(true))
        })
        .unwrap_err();
    assert!(
        matches!(
            err,
            Error::ReferentialIntegrity { ref entity, ref id, .. }
                if entity == "edgeRouter" && id == "er"
        ),
        "{err}"
    );
    assert!(Arc::ptr_eq(&before, &test.state()));
    assert!(shadow(&test, "er").is_none());
    let policy = Policy::load(&test.state(), &EDGE_ROUTER_POLICIES, "er").unwrap();
    assert!(!policy.is_system);
}
