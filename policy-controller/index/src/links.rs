use overlay_policy_store::{State, Tx};

/// Records which entities a policy currently matches on one of its sides.
///
/// Links are stored twice: under the forward path keyed by policy id, and under the reverse path
/// keyed by entity id.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LinkCollection {
    pub forward: &'static str,
    pub reverse: &'static str,
}

// === impl LinkCollection ===

impl LinkCollection {
    pub const fn new(forward: &'static str, reverse: &'static str) -> Self {
        Self { forward, reverse }
    }

    /// Returns false if the link already existed.
    pub fn add(&self, tx: &mut Tx<'_>, policy_id: &str, entity_id: &str) -> bool {
        let added = tx.add_link(self.forward, policy_id, entity_id);
        tx.add_link(self.reverse, entity_id, policy_id);
        added
    }

    /// Returns false if there was no link.
    pub fn remove(&self, tx: &mut Tx<'_>, policy_id: &str, entity_id: &str) -> bool {
        let removed = tx.remove_link(self.forward, policy_id, entity_id);
        tx.remove_link(self.reverse, entity_id, policy_id);
        removed
    }

    pub fn contains(&self, state: &State, policy_id: &str, entity_id: &str) -> bool {
        state.has_link(self.forward, policy_id, entity_id)
    }

    /// Iterates, in order, over the entities linked to a policy (`forward`) or over the policies
    /// linked to an entity.
    pub fn iterate<'a>(
        &self,
        state: &'a State,
        id: &str,
        forward: bool,
    ) -> impl Iterator<Item = &'a str> + 'a {
        let path = if forward { self.forward } else { self.reverse };
        state.links(path, id)
    }

    pub fn entities(&self, state: &State, policy_id: &str) -> Vec<String> {
        self.iterate(state, policy_id, true)
            .map(str::to_string)
            .collect()
    }

    pub fn policies(&self, state: &State, entity_id: &str) -> Vec<String> {
        self.iterate(state, entity_id, false)
            .map(str::to_string)
            .collect()
    }
}
