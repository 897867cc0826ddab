use crate::Record;
use ahash::AHashMap as HashMap;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

pub(crate) type Bucket = BTreeMap<String, Record>;
pub(crate) type LinkSet = BTreeMap<String, BTreeSet<String>>;
pub(crate) type Counter = HashMap<String, HashMap<String, i32>>;
pub(crate) type Unique = HashMap<String, String>;

/// A point-in-time view of the store.
///
/// Each collection is shared behind an `Arc` so that cloning a state is cheap and a transaction
/// only copies the collections it writes to.
#[derive(Clone, Debug, Default)]
pub struct State {
    pub(crate) buckets: HashMap<String, Arc<Bucket>>,
    pub(crate) links: HashMap<String, Arc<LinkSet>>,
    pub(crate) counters: HashMap<String, Arc<Counter>>,
    pub(crate) uniques: HashMap<(String, String), Arc<Unique>>,
    pub(crate) sequence: u64,
}

// === impl State ===

impl State {
    pub fn get(&self, bucket: &str, id: &str) -> Option<&Record> {
        self.buckets.get(bucket)?.get(id)
    }

    pub fn contains(&self, bucket: &str, id: &str) -> bool {
        self.get(bucket, id).is_some()
    }

    /// Ids in the bucket, in order.
    pub fn ids<'a>(&'a self, bucket: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.buckets
            .get(bucket)
            .into_iter()
            .flat_map(|b| b.keys().map(String::as_str))
    }

    pub fn rows<'a>(&'a self, bucket: &str) -> impl Iterator<Item = (&'a str, &'a Record)> + 'a {
        self.buckets
            .get(bucket)
            .into_iter()
            .flat_map(|b| b.iter().map(|(id, r)| (id.as_str(), r)))
    }

    /// Ids of the rows matching `predicate`, in order.
    pub fn find<'a, F>(&'a self, bucket: &str, predicate: F) -> impl Iterator<Item = &'a str> + 'a
    where
        F: Fn(&Record) -> bool + 'a,
    {
        self.rows(bucket)
            .filter(move |(_, r)| predicate(r))
            .map(|(id, _)| id)
    }

    pub fn count(&self, bucket: &str) -> usize {
        self.buckets.get(bucket).map_or(0, |b| b.len())
    }

    /// Looks up the id of the row holding `value` in a uniquely indexed field.
    pub fn find_unique(&self, bucket: &str, field: &str, value: &str) -> Option<&str> {
        self.uniques
            .get(&(bucket.to_string(), field.to_string()))?
            .get(value)
            .map(String::as_str)
    }

    /// Members linked to `key`, in order.
    pub fn links<'a>(&'a self, path: &str, key: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.links
            .get(path)
            .and_then(|l| l.get(key))
            .into_iter()
            .flat_map(|m| m.iter().map(String::as_str))
    }

    pub fn has_link(&self, path: &str, key: &str, member: &str) -> bool {
        self.links
            .get(path)
            .and_then(|l| l.get(key))
            .is_some_and(|m| m.contains(member))
    }

    /// Keys holding at least one link, in order.
    pub fn link_keys<'a>(&'a self, path: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.links
            .get(path)
            .into_iter()
            .flat_map(|l| l.keys().map(String::as_str))
    }

    /// The count held for a `(key, member)` pair; absent pairs count zero.
    pub fn count_of(&self, path: &str, key: &str, member: &str) -> i32 {
        self.counters
            .get(path)
            .and_then(|c| c.get(key))
            .and_then(|m| m.get(member))
            .copied()
            .unwrap_or(0)
    }

    /// Members counted under `key`, in no particular order.
    pub fn counted<'a>(
        &'a self,
        path: &str,
        key: &str,
    ) -> impl Iterator<Item = (&'a str, i32)> + 'a {
        self.counters
            .get(path)
            .and_then(|c| c.get(key))
            .into_iter()
            .flat_map(|m| m.iter().map(|(k, v)| (k.as_str(), *v)))
    }

    /// Every counted `(key, member, count)` triple of a collection, in no particular order.
    pub fn counts<'a>(&'a self, path: &str) -> impl Iterator<Item = (&'a str, &'a str, i32)> + 'a {
        self.counters.get(path).into_iter().flat_map(|c| {
            c.iter().flat_map(|(key, m)| {
                m.iter()
                    .map(move |(member, n)| (key.as_str(), member.as_str(), *n))
            })
        })
    }

    /// The number of counted pairs in a collection.
    pub fn counter_len(&self, path: &str) -> usize {
        self.counters
            .get(path)
            .map_or(0, |c| c.values().map(|m| m.len()).sum())
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn bucket_mut(&mut self, bucket: &str) -> &mut Bucket {
        Arc::make_mut(self.buckets.entry(bucket.to_string()).or_default())
    }

    pub(crate) fn links_mut(&mut self, path: &str) -> &mut LinkSet {
        Arc::make_mut(self.links.entry(path.to_string()).or_default())
    }

    pub(crate) fn counter_mut(&mut self, path: &str) -> &mut Counter {
        Arc::make_mut(self.counters.entry(path.to_string()).or_default())
    }

    pub(crate) fn unique_mut(&mut self, bucket: &str, field: &str) -> &mut Unique {
        Arc::make_mut(
            self.uniques
                .entry((bucket.to_string(), field.to_string()))
                .or_default(),
        )
    }
}
