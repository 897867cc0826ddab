use super::*;
use maplit::btreeset;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::{collections::BTreeSet, sync::Arc};

const WIDGETS: &str = "widgets";

fn widget(name: &str, tags: &[&str]) -> Record {
    Record::default()
        .with("name", name)
        .with("tags", tags.iter().map(|t| t.to_string()).collect::<Vec<_>>())
}

#[derive(Default)]
struct Recorder(Mutex<Vec<(String, Vec<String>, Vec<String>)>>);

impl SetIndexListener for Recorder {
    fn changed(&self, _: &mut Tx<'_>, change: &SetChange<'_>) -> Result<()> {
        self.0.lock().push((
            change.id.to_string(),
            change.old.to_vec(),
            change.new.to_vec(),
        ));
        Ok(())
    }
}

struct Refuse;

impl SetIndexListener for Refuse {
    fn changed(&self, _: &mut Tx<'_>, change: &SetChange<'_>) -> Result<()> {
        Err(Error::validation(change.field, "refused", change.new))
    }
}

#[test]
fn commit_publishes_snapshot() {
    let db = Db::new(Schema::default());
    let before = db.view();

    db.update(|tx| {
        tx.create(WIDGETS, "w1", widget("one", &[]))?;
        assert!(tx.contains(WIDGETS, "w1"), "writes are visible within the tx");
        Ok(())
    })
    .unwrap();

    assert!(!before.contains(WIDGETS, "w1"), "old snapshots are unchanged");
    let after = db.view();
    assert_eq!(after.get(WIDGETS, "w1").and_then(|r| r.str("name")), Some("one"));
    assert_eq!(after.ids(WIDGETS).collect::<Vec<_>>(), vec!["w1"]);
}

#[test]
fn rollback_discards_writes_and_hooks() {
    let db = Db::new(Schema::default());
    let fired = Arc::new(Mutex::new(0));

    let res = db.update(|tx| {
        tx.create(WIDGETS, "w1", widget("one", &[]))?;
        tx.add_link("widgets/gadgets", "w1", "g1");
        tx.set_count("widgets/things", "w1", "t1", 1);
        let fired = fired.clone();
        tx.on_commit(move || *fired.lock() += 1);
        Err::<(), _>(Error::Consistency("boom".to_string()))
    });

    assert_eq!(res, Err(Error::Consistency("boom".to_string())));
    let state = db.view();
    assert_eq!(state.count(WIDGETS), 0);
    assert!(!state.has_link("widgets/gadgets", "w1", "g1"));
    assert_eq!(state.count_of("widgets/things", "w1", "t1"), 0);
    assert_eq!(*fired.lock(), 0);
}

#[test]
fn hooks_run_after_publish_in_order() {
    let db = Arc::new(Db::new(Schema::default()));
    let seen = Arc::new(Mutex::new(Vec::new()));

    db.update(|tx| {
        tx.create(WIDGETS, "w1", widget("one", &[]))?;
        for n in 0..3 {
            let seen = seen.clone();
            tx.on_commit(move || seen.lock().push(n));
        }
        Ok(())
    })
    .unwrap();

    assert_eq!(*seen.lock(), vec![0, 1, 2]);
}

#[test]
fn duplicate_ids_and_unique_fields() {
    let db = Db::new(Schema::default().unique_index(WIDGETS, "name"));
    db.update(|tx| tx.create(WIDGETS, "w1", widget("one", &[])))
        .unwrap();

    let err = db
        .update(|tx| tx.create(WIDGETS, "w1", widget("other", &[])))
        .unwrap_err();
    assert!(matches!(err, Error::Validation { ref field, .. } if field == "id"));

    let err = db
        .update(|tx| tx.create(WIDGETS, "w2", widget("one", &[])))
        .unwrap_err();
    assert!(matches!(err, Error::Validation { ref field, .. } if field == "name"));

    // Renaming frees the old value.
    db.update(|tx| tx.put(WIDGETS, "w1", widget("uno", &[])).map(drop))
        .unwrap();
    db.update(|tx| tx.create(WIDGETS, "w2", widget("one", &[])))
        .unwrap();

    let state = db.view();
    assert_eq!(state.find_unique(WIDGETS, "name", "uno"), Some("w1"));
    assert_eq!(state.find_unique(WIDGETS, "name", "one"), Some("w2"));

    db.update(|tx| tx.delete(WIDGETS, "w2").map(drop)).unwrap();
    assert_eq!(db.view().find_unique(WIDGETS, "name", "one"), None);
}

#[test]
fn delete_missing_is_not_found() {
    let db = Db::new(Schema::default());
    let err = db.update(|tx| tx.delete(WIDGETS, "nope")).unwrap_err();
    assert_eq!(err, Error::not_found(WIDGETS, "nope"));
}

#[test]
fn set_index_listener_fires_on_membership_change() {
    let recorder = Arc::new(Recorder::default());
    let db = Db::new(Schema::default().set_index(WIDGETS, "tags", recorder.clone()));

    // No values, no change.
    db.update(|tx| tx.create(WIDGETS, "w1", widget("one", &[])))
        .unwrap();
    assert!(recorder.0.lock().is_empty());

    db.update(|tx| tx.put(WIDGETS, "w1", widget("one", &["a", "b"])).map(drop))
        .unwrap();
    // Reordering is not a membership change.
    db.update(|tx| tx.put(WIDGETS, "w1", widget("uno", &["b", "a"])).map(drop))
        .unwrap();
    db.update(|tx| tx.put(WIDGETS, "w1", widget("uno", &["b"])).map(drop))
        .unwrap();

    assert_eq!(
        *recorder.0.lock(),
        vec![
            ("w1".to_string(), vec![], vec!["a".to_string(), "b".to_string()]),
            (
                "w1".to_string(),
                vec!["b".to_string(), "a".to_string()],
                vec!["b".to_string()]
            ),
        ]
    );
}

#[test]
fn listener_error_aborts_transaction() {
    let db = Db::new(Schema::default().set_index(WIDGETS, "tags", Arc::new(Refuse)));
    let err = db
        .update(|tx| tx.create(WIDGETS, "w1", widget("one", &["a"])))
        .unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
    assert_eq!(db.view().count(WIDGETS), 0);
}

#[test]
fn system_context() {
    let db = Db::new(Schema::default());
    db.update(|tx| {
        assert!(!tx.is_system_context());
        tx.with_system_context(|tx| {
            assert!(tx.is_system_context());
            Ok(())
        })?;
        assert!(!tx.is_system_context());
        Ok(())
    })
    .unwrap();
    db.update_system(|tx| {
        assert!(tx.is_system_context());
        Ok(())
    })
    .unwrap();
}

#[test]
fn links_and_counts() {
    let db = Db::new(Schema::default());
    db.update(|tx| {
        assert!(tx.add_link("p/e", "p1", "b"));
        assert!(tx.add_link("p/e", "p1", "a"));
        assert!(!tx.add_link("p/e", "p1", "a"));
        assert!(tx.remove_link("p/e", "p1", "b"));
        assert!(!tx.remove_link("p/e", "p2", "b"));
        tx.set_count("l/r", "x", "y", 2);
        tx.set_count("l/r", "x", "z", 1);
        tx.set_count("l/r", "x", "z", 0);
        Ok(())
    })
    .unwrap();

    let state = db.view();
    assert_eq!(state.links("p/e", "p1").collect::<Vec<_>>(), vec!["a"]);
    assert_eq!(state.link_keys("p/e").collect::<Vec<_>>(), vec!["p1"]);
    assert_eq!(state.count_of("l/r", "x", "y"), 2);
    assert_eq!(state.count_of("l/r", "x", "z"), 0);
    assert_eq!(state.counter_len("l/r"), 1);
    assert_eq!(
        state.counts("l/r").collect::<BTreeSet<_>>(),
        btreeset! { ("x", "y", 2) }
    );

    db.update(|tx| {
        assert_eq!(tx.clear_links("p/e", "p1"), vec!["a".to_string()]);
        Ok(())
    })
    .unwrap();
    assert_eq!(db.view().link_keys("p/e").count(), 0);
}

#[test]
fn sequence_is_monotonic_across_commits() {
    let db = Db::new(Schema::default());
    let first = db.update(|tx| Ok(tx.next_sequence())).unwrap();
    let _ = db.update(|tx| {
        tx.next_sequence();
        Err::<(), _>(Error::Consistency("rolled back".to_string()))
    });
    let second = db.update(|tx| Ok(tx.next_sequence())).unwrap();
    assert_eq!((first, second), (1, 2));
}
