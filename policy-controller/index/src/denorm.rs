use overlay_policy_core::{Error, Result};
use overlay_policy_store::{State, Tx};
use tracing::error;

/// A reference-counted cache of `(left, right)` entity pairs.
///
/// Each count is the number of policies currently producing the pair. Pairs with a count of zero
/// are not stored, so lookups never see them. Counts are kept under both a forward path (keyed by
/// the left id) and a reverse path (keyed by the right id).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RefCountedLinkCollection {
    pub name: &'static str,
    pub forward: &'static str,
    pub reverse: &'static str,
}

pub const IDENTITY_EDGE_ROUTERS: RefCountedLinkCollection = RefCountedLinkCollection {
    name: "identity-edge-routers",
    forward: "identities/edgeRouters",
    reverse: "edgeRouters/identities",
};

pub const SERVICE_EDGE_ROUTERS: RefCountedLinkCollection = RefCountedLinkCollection {
    name: "service-edge-routers",
    forward: "services/edgeRouters",
    reverse: "edgeRouters/services",
};

pub const IDENTITY_DIAL_SERVICES: RefCountedLinkCollection = RefCountedLinkCollection {
    name: "identity-dial-services",
    forward: "identities/dialServices",
    reverse: "services/dialIdentities",
};

pub const IDENTITY_BIND_SERVICES: RefCountedLinkCollection = RefCountedLinkCollection {
    name: "identity-bind-services",
    forward: "identities/bindServices",
    reverse: "services/bindIdentities",
};

pub const POSTURE_CHECK_DIAL_SERVICES: RefCountedLinkCollection = RefCountedLinkCollection {
    name: "posture-check-dial-services",
    forward: "postureChecks/dialServices",
    reverse: "services/dialPostureChecks",
};

pub const POSTURE_CHECK_BIND_SERVICES: RefCountedLinkCollection = RefCountedLinkCollection {
    name: "posture-check-bind-services",
    forward: "postureChecks/bindServices",
    reverse: "services/bindPostureChecks",
};

pub const ALL: [RefCountedLinkCollection; 6] = [
    IDENTITY_EDGE_ROUTERS,
    SERVICE_EDGE_ROUTERS,
    IDENTITY_DIAL_SERVICES,
    IDENTITY_BIND_SERVICES,
    POSTURE_CHECK_DIAL_SERVICES,
    POSTURE_CHECK_BIND_SERVICES,
];

// === impl RefCountedLinkCollection ===

impl RefCountedLinkCollection {
    /// Increments the pair's count, returning the new count.
    pub fn add_link(&self, tx: &mut Tx<'_>, left: &str, right: &str) -> Result<i32> {
        let count = self.link_count(tx, left, right) + 1;
        self.set_link_count(tx, left, right, count);
        Ok(count)
    }

    /// Decrements the pair's count, returning the new count.
    ///
    /// Fails if the pair is not counted, since the count would become negative.
    pub fn remove_link(&self, tx: &mut Tx<'_>, left: &str, right: &str) -> Result<i32> {
        let count = self.link_count(tx, left, right) - 1;
        if count < 0 {
            error!(collection = %self.name, %left, %right, "Link count would become negative");
            return Err(Error::Consistency(format!(
                "{}: link count for {left} -> {right} would become negative",
                self.name
            )));
        }
        self.set_link_count(tx, left, right, count);
        Ok(count)
    }

    pub fn link_count(&self, state: &State, left: &str, right: &str) -> i32 {
        state.count_of(self.forward, left, right)
    }

    /// Returns the forward and reverse counts of a pair, which only differ when the collection
    /// has been corrupted.
    pub fn link_counts(&self, state: &State, left: &str, right: &str) -> (i32, i32) {
        (
            state.count_of(self.forward, left, right),
            state.count_of(self.reverse, right, left),
        )
    }

    pub fn set_link_count(&self, tx: &mut Tx<'_>, left: &str, right: &str, count: i32) {
        tx.set_count(self.forward, left, right, count);
        tx.set_count(self.reverse, right, left, count);
    }

    /// The ids related to `id`, sorted. `forward` treats `id` as a left id.
    pub fn related(&self, state: &State, id: &str, forward: bool) -> Vec<String> {
        let path = if forward { self.forward } else { self.reverse };
        let mut ids = state
            .counted(path, id)
            .filter(|(_, n)| *n > 0)
            .map(|(id, _)| id.to_string())
            .collect::<Vec<_>>();
        ids.sort();
        ids
    }

    /// The number of distinct pairs in the collection.
    pub fn len(&self, state: &State) -> usize {
        state.counter_len(self.forward)
    }

    pub fn is_empty(&self, state: &State) -> bool {
        self.len(state) == 0
    }
}
