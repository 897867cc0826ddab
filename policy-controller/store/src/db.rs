use crate::{Result, SetIndexListener, State, Tx};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, trace};

/// Declares the indexes maintained by a [`Db`].
#[derive(Default)]
pub struct Schema {
    uniques: Vec<(&'static str, &'static str)>,
    set_indexes: Vec<SetIndex>,
}

pub(crate) struct SetIndex {
    bucket: &'static str,
    pub(crate) field: &'static str,
    pub(crate) listeners: Vec<Arc<dyn SetIndexListener>>,
}

pub struct Db {
    committed: RwLock<Arc<State>>,
    writer: Mutex<()>,
    schema: Schema,
}

// === impl Schema ===

impl Schema {
    /// Requires string values of `field` to be unique within `bucket`.
    pub fn unique_index(mut self, bucket: &'static str, field: &'static str) -> Self {
        self.uniques.push((bucket, field));
        self
    }

    /// Registers a listener for membership changes of the list field `field` in `bucket`.
    pub fn set_index(
        mut self,
        bucket: &'static str,
        field: &'static str,
        listener: Arc<dyn SetIndexListener>,
    ) -> Self {
        match self
            .set_indexes
            .iter_mut()
            .find(|i| i.bucket == bucket && i.field == field)
        {
            Some(index) => index.listeners.push(listener),
            None => self.set_indexes.push(SetIndex {
                bucket,
                field,
                listeners: vec![listener],
            }),
        }
        self
    }

    pub(crate) fn unique_fields<'a>(
        &'a self,
        bucket: &'a str,
    ) -> impl Iterator<Item = &'static str> + 'a {
        self.uniques
            .iter()
            .filter(move |(b, _)| *b == bucket)
            .map(|(_, f)| *f)
    }

    pub(crate) fn set_indexes<'a>(
        &'a self,
        bucket: &'a str,
    ) -> impl Iterator<Item = &'a SetIndex> + 'a {
        self.set_indexes.iter().filter(move |i| i.bucket == bucket)
    }
}

// === impl Db ===

impl Db {
    pub fn new(schema: Schema) -> Self {
        Self {
            committed: RwLock::new(Arc::new(State::default())),
            writer: Mutex::new(()),
            schema,
        }
    }

    /// Returns the most recently committed snapshot.
    pub fn view(&self) -> Arc<State> {
        self.committed.read().clone()
    }

    /// Runs `f` in a write transaction.
    ///
    /// The snapshot is published only if `f` succeeds; otherwise every write is discarded and no
    /// commit hook runs.
    pub fn update<T>(&self, f: impl FnOnce(&mut Tx<'_>) -> Result<T>) -> Result<T> {
        self.run(false, f)
    }

    /// Runs `f` in a write transaction with system privileges.
    pub fn update_system<T>(&self, f: impl FnOnce(&mut Tx<'_>) -> Result<T>) -> Result<T> {
        self.run(true, f)
    }

    fn run<T>(&self, system: bool, f: impl FnOnce(&mut Tx<'_>) -> Result<T>) -> Result<T> {
        let _writer = self.writer.lock();
        let state = State::clone(&self.committed.read());
        let mut tx = Tx::new(&self.schema, state, system);

        let value = match f(&mut tx) {
            Ok(value) => value,
            Err(error) => {
                debug!(%error, "Rolling back transaction");
                return Err(error);
            }
        };

        let (state, hooks) = tx.into_parts();
        *self.committed.write() = Arc::new(state);
        trace!(hooks = hooks.len(), "Committed");

        // Hooks run before the writer lock is released so that they observe commits in order.
        for hook in hooks {
            hook();
        }
        Ok(value)
    }
}
