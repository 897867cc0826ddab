use crate::{fields, kind::PolicyKind};
use overlay_policy_core::{Error, PolicyType, Result, RoleList, Semantic};
use overlay_policy_store::{Record, State};
use std::collections::BTreeMap;
use tracing::error;

/// A policy of any kind.
///
/// Role lists are held as their textual form, keyed by field name, and are validated when the
/// policy is persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Policy {
    pub kind: &'static PolicyKind,
    pub id: String,
    pub name: String,
    pub semantic: Semantic,
    pub policy_type: Option<PolicyType>,
    pub roles: BTreeMap<String, Vec<String>>,
    pub is_system: bool,
}

// === impl Policy ===

impl Policy {
    pub fn new(kind: &'static PolicyKind, id: impl ToString, name: impl ToString) -> Self {
        Self {
            kind,
            id: id.to_string(),
            name: name.to_string(),
            semantic: Semantic::default(),
            policy_type: None,
            roles: BTreeMap::new(),
            is_system: false,
        }
    }

    pub fn semantic(mut self, semantic: Semantic) -> Self {
        self.semantic = semantic;
        self
    }

    pub fn policy_type(mut self, policy_type: PolicyType) -> Self {
        self.policy_type = Some(policy_type);
        self
    }

    pub fn with_roles<I>(mut self, field: &str, roles: I) -> Self
    where
        I: IntoIterator,
        I::Item: ToString,
    {
        self.roles.insert(
            field.to_string(),
            roles.into_iter().map(|r| r.to_string()).collect(),
        );
        self
    }

    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }

    pub fn roles(&self, field: &str) -> &[String] {
        self.roles.get(field).map(Vec::as_slice).unwrap_or_default()
    }

    /// Parses the role list of a field. Stored policies always hold valid lists.
    pub fn role_list(&self, field: &str) -> Result<RoleList> {
        RoleList::parse(field, self.roles(field))
    }

    pub fn load(state: &State, kind: &'static PolicyKind, id: &str) -> Result<Self> {
        match state.get(kind.bucket, id) {
            Some(record) => Self::decode(kind, id, record),
            None => Err(Error::not_found(kind.name, id)),
        }
    }

    /// Loads every policy of a kind, in id order.
    pub fn load_all(state: &State, kind: &'static PolicyKind) -> Result<Vec<Self>> {
        state
            .rows(kind.bucket)
            .map(|(id, record)| Self::decode(kind, id, record))
            .collect()
    }

    pub(crate) fn encode(&self) -> Record {
        let mut record = Record::default()
            .with(fields::NAME, self.name.as_str())
            .with(fields::SEMANTIC, self.semantic.as_str())
            .with(fields::IS_SYSTEM, self.is_system);
        if let Some(policy_type) = self.policy_type {
            record.set(fields::POLICY_TYPE, policy_type.id());
        }
        for side in self.kind.sides {
            record.set(side.field, self.roles(side.field).to_vec());
        }
        record
    }

    pub(crate) fn decode(kind: &'static PolicyKind, id: &str, record: &Record) -> Result<Self> {
        let semantic = record
            .str(fields::SEMANTIC)
            .unwrap_or_default()
            .parse::<Semantic>()
            .map_err(|_| invariant(kind, id, "semantic"))?;

        let policy_type = if kind.typed {
            let discriminant = record.int(fields::POLICY_TYPE).unwrap_or_default();
            match PolicyType::from_id(discriminant) {
                Some(t) => Some(t),
                None => return Err(invariant(kind, id, "policy type")),
            }
        } else {
            None
        };

        let roles = kind
            .sides
            .iter()
            .map(|s| (s.field.to_string(), record.strings(s.field).to_vec()))
            .collect();

        Ok(Self {
            kind,
            id: id.to_string(),
            name: record.str(fields::NAME).unwrap_or_default().to_string(),
            semantic,
            policy_type,
            roles,
            is_system: record.bool(fields::IS_SYSTEM),
        })
    }
}

fn invariant(kind: &PolicyKind, id: &str, what: &str) -> Error {
    error!(%kind, %id, "Stored {what} is invalid");
    Error::Invariant(format!("{kind} {id} has an invalid stored {what}"))
}
