use crate::{db::Schema, Error, Record, Result, State};
use ahash::AHashSet as HashSet;
use std::ops::Deref;
use tracing::trace;

/// A write transaction.
///
/// Reads through a `Tx` observe the transaction's own writes. Nothing is visible to other readers
/// until the transaction commits.
pub struct Tx<'db> {
    schema: &'db Schema,
    state: State,
    hooks: Vec<Box<dyn FnOnce() + Send>>,
    system: bool,
}

/// Observes membership changes of an indexed list field.
///
/// Listeners run synchronously inside the mutating transaction, after the row has been written.
/// An error aborts the transaction.
pub trait SetIndexListener: Send + Sync {
    fn changed(&self, tx: &mut Tx<'_>, change: &SetChange<'_>) -> Result<()>;
}

/// Describes a change to the set of values held by an indexed field of one row.
#[derive(Debug)]
pub struct SetChange<'a> {
    pub bucket: &'a str,
    pub field: &'a str,
    pub id: &'a str,
    pub old: &'a [String],
    pub new: &'a [String],
}

// === impl Tx ===

impl<'db> Tx<'db> {
    pub(crate) fn new(schema: &'db Schema, state: State, system: bool) -> Self {
        Self {
            schema,
            state,
            hooks: Vec::new(),
            system,
        }
    }

    pub(crate) fn into_parts(self) -> (State, Vec<Box<dyn FnOnce() + Send>>) {
        (self.state, self.hooks)
    }

    /// Indicates whether the transaction runs with system privileges.
    pub fn is_system_context(&self) -> bool {
        self.system
    }

    /// Runs `f` with system privileges, restoring the previous context afterwards.
    pub fn with_system_context<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let prior = std::mem::replace(&mut self.system, true);
        let res = f(self);
        self.system = prior;
        res
    }

    /// Registers a hook to run once the transaction has committed.
    ///
    /// Hooks never run if the transaction is rolled back. They run while the writer lock is still
    /// held and must not start another transaction.
    pub fn on_commit(&mut self, hook: impl FnOnce() + Send + 'static) {
        self.hooks.push(Box::new(hook));
    }

    pub fn next_sequence(&mut self) -> u64 {
        self.state.sequence += 1;
        self.state.sequence
    }

    /// Inserts a new row, failing if the id is already in use.
    pub fn create(&mut self, bucket: &str, id: &str, record: Record) -> Result<()> {
        if self.state.contains(bucket, id) {
            return Err(Error::validation(
                "id",
                format!("an entity of type {bucket} with this id already exists"),
                [id],
            ));
        }
        self.put(bucket, id, record)?;
        Ok(())
    }

    /// Writes a row, returning the previous version.
    ///
    /// Unique indexes are checked before anything is written. Set index listeners fire after the
    /// row has been written, for each indexed field whose set of values changed.
    pub fn put(&mut self, bucket: &str, id: &str, record: Record) -> Result<Option<Record>> {
        let schema = self.schema;

        for field in schema.unique_fields(bucket) {
            let Some(value) = record.str(field) else {
                continue;
            };
            match self.state.find_unique(bucket, field, value) {
                Some(owner) if owner != id => {
                    return Err(Error::validation(
                        field,
                        format!("duplicate value in unique field {field} of {bucket}"),
                        [value],
                    ));
                }
                _ => {}
            }
        }

        let prior = self.state.bucket_mut(bucket).insert(id.to_string(), record);
        trace!(%bucket, %id, "put");
        self.reindex_unique(bucket, id, prior.as_ref());

        for index in schema.set_indexes(bucket) {
            let old = prior
                .as_ref()
                .map(|r| r.strings(index.field).to_vec())
                .unwrap_or_default();
            let new = self
                .state
                .get(bucket, id)
                .map(|r| r.strings(index.field).to_vec())
                .unwrap_or_default();
            if same_members(&old, &new) {
                continue;
            }
            let change = SetChange {
                bucket,
                field: index.field,
                id,
                old: &old,
                new: &new,
            };
            for listener in index.listeners.iter() {
                listener.changed(self, &change)?;
            }
        }

        Ok(prior)
    }

    /// Removes a row. Set index listeners are not notified.
    pub fn delete(&mut self, bucket: &str, id: &str) -> Result<Record> {
        let Some(prior) = self.state.bucket_mut(bucket).remove(id) else {
            return Err(Error::not_found(bucket, id));
        };
        trace!(%bucket, %id, "delete");
        let schema = self.schema;
        for field in schema.unique_fields(bucket) {
            if let Some(value) = prior.str(field) {
                self.state.unique_mut(bucket, field).remove(value);
            }
        }
        Ok(prior)
    }

    /// Links `member` to `key`, returning false if it was already linked.
    pub fn add_link(&mut self, path: &str, key: &str, member: &str) -> bool {
        self.state
            .links_mut(path)
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string())
    }

    /// Unlinks `member` from `key`, returning false if it was not linked.
    pub fn remove_link(&mut self, path: &str, key: &str, member: &str) -> bool {
        let links = self.state.links_mut(path);
        let Some(members) = links.get_mut(key) else {
            return false;
        };
        let removed = members.remove(member);
        if members.is_empty() {
            links.remove(key);
        }
        removed
    }

    /// Removes every link held by `key`, returning the former members.
    pub fn clear_links(&mut self, path: &str, key: &str) -> Vec<String> {
        self.state
            .links_mut(path)
            .remove(key)
            .map(|m| m.into_iter().collect())
            .unwrap_or_default()
    }

    /// Sets the count of a pair. A count of zero or less removes the pair.
    pub fn set_count(&mut self, path: &str, key: &str, member: &str, count: i32) {
        let counter = self.state.counter_mut(path);
        if count > 0 {
            counter
                .entry(key.to_string())
                .or_default()
                .insert(member.to_string(), count);
            return;
        }
        if let Some(members) = counter.get_mut(key) {
            members.remove(member);
            if members.is_empty() {
                counter.remove(key);
            }
        }
    }

    fn reindex_unique(&mut self, bucket: &str, id: &str, prior: Option<&Record>) {
        let schema = self.schema;
        for field in schema.unique_fields(bucket) {
            if let Some(old) = prior.and_then(|r| r.str(field)) {
                self.state.unique_mut(bucket, field).remove(old);
            }
            let new = self
                .state
                .get(bucket, id)
                .and_then(|r| r.str(field))
                .map(str::to_string);
            if let Some(new) = new {
                self.state
                    .unique_mut(bucket, field)
                    .insert(new, id.to_string());
            }
        }
    }
}

impl Deref for Tx<'_> {
    type Target = State;

    fn deref(&self) -> &State {
        &self.state
    }
}

fn same_members(a: &[String], b: &[String]) -> bool {
    let a = a.iter().collect::<HashSet<_>>();
    let b = b.iter().collect::<HashSet<_>>();
    a == b
}

// === impl SetChange ===

impl SetChange<'_> {
    pub fn added(&self) -> impl Iterator<Item = &String> {
        self.new.iter().filter(|v| !self.old.contains(v))
    }

    pub fn removed(&self) -> impl Iterator<Item = &String> {
        self.old.iter().filter(|v| !self.new.contains(v))
    }
}
