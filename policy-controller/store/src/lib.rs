//! An in-memory transactional store.
//!
//! Committed state is an immutable [`State`] snapshot shared behind an `Arc`. Readers take a
//! snapshot with [`Db::view`] and never block writers. Writers are serialized and operate on a
//! copy-on-write [`Tx`]; the new snapshot is published only when the transaction succeeds, after
//! which registered commit hooks run.
//!
//! Rows live in named buckets as [`Record`]s. Besides rows, the store holds link sets
//! (`path -> key -> {member}`) and reference counters (`path -> key -> member -> count`), both
//! addressed by a collection path such as `identities/edgeRouters`.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod db;
mod record;
mod state;
mod tx;

#[cfg(test)]
mod tests;

pub use self::{
    db::{Db, Schema},
    record::{Field, Record},
    state::State,
    tx::{SetChange, SetIndexListener, Tx},
};
pub use overlay_policy_core::{Error, Result};
