use super::*;
use pretty_assertions::assert_eq;

fn check(state: &overlay_policy_store::State, kind: &'static PolicyKind) -> Vec<String> {
    let mut errors = Vec::new();
    check_integrity(state, kind, &mut |e, fixed| {
        assert!(!fixed, "checks never repair");
        errors.push(e.to_string());
    })
    .expect("check must run");
    errors
}

fn routers_for_everyone(test: &TestConfig) {
    test.create(Identity::new("i", "identity"));
    test.create(EdgeRouter::new("er", "router"));
    test.create_policy(
        edge_router_policy("erp")
            .with_roles(fields::IDENTITY_ROLES, ["#all"])
            .with_roles(fields::EDGE_ROUTER_ROLES, ["#all"]),
    );
}

#[test]
fn clean_store_has_no_drift() {
    let test = TestConfig::default();
    routers_for_everyone(&test);
    test.create(Service::new("s", "service"));
    test.create_policy(
        dial_policy("sp")
            .with_roles(fields::IDENTITY_ROLES, ["@i"])
            .with_roles(fields::SERVICE_ROLES, ["#all"]),
    );
    test.assert_consistent();
}

#[test]
fn count_drift_is_reported_and_repaired() {
    let _tracing = TestConfig::init_tracing();
    let test = TestConfig::default();
    routers_for_everyone(&test);

    test.update(|_, tx| {
        tx.set_count(denorm::IDENTITY_EDGE_ROUTERS.forward, "i", "er", 3);
        Ok(())
    })
    .unwrap();
    assert_eq!(
        check(&test.state(), &EDGE_ROUTER_POLICIES),
        vec![
            "for edgeRouterPolicy denormalized link identity-edge-routers i -> er, link count should be 1, forward count is 3, reverse count is 1"
        ]
    );
    assert!(check(&test.state(), &SERVICE_EDGE_ROUTER_POLICIES).is_empty());

    let mut repaired = Vec::new();
    test.update(|_, tx| {
        repair_integrity(tx, &EDGE_ROUTER_POLICIES, &mut |e, fixed| {
            repaired.push((e, fixed))
        })
    })
    .unwrap();
    assert_eq!(repaired.len(), 1);
    assert!(repaired[0].1);
    assert_eq!(
        denorm::IDENTITY_EDGE_ROUTERS.link_counts(&test.state(), "i", "er"),
        (1, 1)
    );
    test.assert_consistent();
    assert!(test.events().is_empty(), "repairs raise no events");
}

#[test]
fn stale_links_are_reported_and_removed() {
    let test = TestConfig::default();
    routers_for_everyone(&test);

    test.update(|_, tx| {
        tx.add_link("edgeRouterPolicies/identities", "erp", "ghost");
        denorm::IDENTITY_EDGE_ROUTERS.set_link_count(tx, "ghost", "er", 1);
        Ok(())
    })
    .unwrap();
    let errors = check(&test.state(), &EDGE_ROUTER_POLICIES);
    assert_eq!(
        errors,
        vec![
            "edgeRouterPolicy erp link to identity ghost should be absent, forward link is present, reverse link is absent",
            "for edgeRouterPolicy denormalized link identity-edge-routers ghost -> er, link count should be 0, forward count is 1, reverse count is 1",
        ]
    );

    test.update(|_, tx| repair_integrity(tx, &EDGE_ROUTER_POLICIES, &mut |_, _| {}))
        .unwrap();
    let state = test.state();
    assert!(!state.has_link("edgeRouterPolicies/identities", "erp", "ghost"));
    assert_eq!(denorm::IDENTITY_EDGE_ROUTERS.len(&state), 1);
    test.assert_consistent();
}

#[test]
fn missing_links_are_restored() {
    let test = TestConfig::default();
    routers_for_everyone(&test);

    test.update(|_, tx| {
        EDGE_ROUTER_POLICIES.sides[0].links.remove(tx, "erp", "i");
        denorm::IDENTITY_EDGE_ROUTERS.set_link_count(tx, "i", "er", 0);
        Ok(())
    })
    .unwrap();
    assert!(!can_reach_edge_router(&test.state(), "i", "er"));
    assert_eq!(check(&test.state(), &EDGE_ROUTER_POLICIES).len(), 2);

    test.update(|_, tx| repair_integrity(tx, &EDGE_ROUTER_POLICIES, &mut |_, _| {}))
        .unwrap();
    assert!(can_reach_edge_router(&test.state(), "i", "er"));
    test.assert_consistent();
}

#[test]
fn negative_counts_abort_the_transaction() {
    let test = TestConfig::default();
    let err = test
        .update(|_, tx| denorm::IDENTITY_DIAL_SERVICES.remove_link(tx, "x", "y"))
        .unwrap_err();
    assert!(matches!(err, Error::Consistency(_)));
    assert!(denorm::IDENTITY_DIAL_SERVICES.is_empty(&test.state()));
}

#[test]
fn refcounts_report_transitions() {
    let test = TestConfig::default();
    test.update(|_, tx| {
        let collection = denorm::SERVICE_EDGE_ROUTERS;
        assert_eq!(collection.add_link(tx, "s", "er")?, 1);
        assert_eq!(collection.add_link(tx, "s", "er")?, 2);
        assert_eq!(collection.link_counts(tx, "s", "er"), (2, 2));
        assert_eq!(collection.remove_link(tx, "s", "er")?, 1);
        assert_eq!(collection.remove_link(tx, "s", "er")?, 0);
        assert!(collection.is_empty(tx));
        assert!(collection.related(tx, "er", false).is_empty());
        Ok(())
    })
    .unwrap();
}
