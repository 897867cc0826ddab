pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the store and the policy index.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A value supplied by the caller is not acceptable.
    #[error("the value '[{}]' for '{field}' is invalid: {message}", .values.join(" "))]
    Validation {
        field: String,
        message: String,
        values: Vec<String>,
    },

    /// A delete was refused because other entities depend on the target.
    #[error("cannot delete {entity} {id}: {message}")]
    ReferentialIntegrity {
        entity: String,
        id: String,
        message: String,
    },

    #[error("{entity} with id {id} not found")]
    NotFound { entity: String, id: String },

    /// A system-owned entity was mutated outside of a system context.
    #[error("{entity} {id} is owned by the system and may not be modified")]
    SystemProtection { entity: String, id: String },

    /// The denormalized state disagrees with what the policies imply.
    #[error("{0}")]
    Consistency(String),

    /// Stored state does not satisfy an invariant the controller relies on.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

// === impl Error ===

impl Error {
    pub fn validation<V>(field: impl ToString, message: impl ToString, values: V) -> Self
    where
        V: IntoIterator,
        V::Item: ToString,
    {
        Self::Validation {
            field: field.to_string(),
            message: message.to_string(),
            values: values.into_iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn not_found(entity: impl ToString, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
