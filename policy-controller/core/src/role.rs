//! Role expressions select the entities a policy applies to.
//!
//! A role list is a sequence of expressions of the form `#all`, `@<id>` or `#<attribute>`. An
//! entity matches a role list when it is named explicitly by id, or when its role attributes
//! satisfy the attribute references under the policy's [`Semantic`]. The wildcard `#all` matches
//! every entity and must be the only element of its list.

use crate::{Error, Result, Semantic};
use ahash::AHashSet as HashSet;
use std::{fmt, str::FromStr};

pub const ALL_ROLE: &str = "#all";

const ATTRIBUTE_PREFIX: char = '#';
const ENTITY_ID_PREFIX: char = '@';

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoleExpr {
    Wildcard,
    EntityId(String),
    Attribute(String),
}

/// A validated role list.
///
/// Expressions are kept sorted by their textual form and deduplicated so that two lists holding
/// the same roles in a different order compare equal.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoleList(Vec<RoleExpr>);

// === impl RoleExpr ===

impl FromStr for RoleExpr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s == ALL_ROLE {
            return Ok(Self::Wildcard);
        }
        if let Some(id) = s.strip_prefix(ENTITY_ID_PREFIX) {
            if !id.is_empty() {
                return Ok(Self::EntityId(id.to_string()));
            }
        } else if let Some(attr) = s.strip_prefix(ATTRIBUTE_PREFIX) {
            if !attr.is_empty() {
                return Ok(Self::Attribute(attr.to_string()));
            }
        }
        Err(Error::validation(
            "role",
            "roles must be #all, #<attribute> or @<id>",
            [s],
        ))
    }
}

impl fmt::Display for RoleExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wildcard => ALL_ROLE.fmt(f),
            Self::EntityId(id) => write!(f, "{ENTITY_ID_PREFIX}{id}"),
            Self::Attribute(attr) => write!(f, "{ATTRIBUTE_PREFIX}{attr}"),
        }
    }
}

// === impl RoleList ===

impl RoleList {
    /// Parses and validates the roles stored under `field`.
    ///
    /// Errors name the field and the full list of offending values.
    pub fn parse<S: AsRef<str>>(field: &str, roles: &[S]) -> Result<Self> {
        let mut exprs = Vec::with_capacity(roles.len());
        let mut invalid = Vec::new();
        for role in roles {
            match role.as_ref().parse::<RoleExpr>() {
                Ok(expr) => exprs.push(expr),
                Err(_) => invalid.push(role.as_ref().to_string()),
            }
        }
        if !invalid.is_empty() {
            return Err(Error::validation(
                field,
                "roles must be #all, #<attribute> or @<id>",
                invalid,
            ));
        }

        if exprs.len() > 1 && exprs.contains(&RoleExpr::Wildcard) {
            return Err(Error::validation(
                field,
                "if using #all, it should be the only role specified",
                roles.iter().map(|r| r.as_ref()),
            ));
        }

        exprs.sort_by_cached_key(|e| e.to_string());
        exprs.dedup();
        Ok(Self(exprs))
    }

    pub fn wildcard() -> Self {
        Self(vec![RoleExpr::Wildcard])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_wildcard(&self) -> bool {
        self.0.first() == Some(&RoleExpr::Wildcard)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoleExpr> {
        self.0.iter()
    }

    /// Entity ids referenced explicitly with `@`.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.0.iter().filter_map(|e| match e {
            RoleExpr::EntityId(id) => Some(id.as_str()),
            _ => None,
        })
    }

    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        self.0.iter().filter_map(|e| match e {
            RoleExpr::Attribute(attr) => Some(attr.as_str()),
            _ => None,
        })
    }

    pub fn references_id(&self, id: &str) -> bool {
        self.ids().any(|i| i == id)
    }

    /// The sorted textual form, as persisted.
    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(ToString::to_string).collect()
    }

    /// Returns a copy of this list without the explicit reference to `id`.
    pub fn without_id(&self, id: &str) -> Self {
        Self(
            self.0
                .iter()
                .filter(|e| !matches!(e, RoleExpr::EntityId(i) if i == id))
                .cloned()
                .collect(),
        )
    }

    /// Decides whether an entity with the given id and role attributes is selected by this list.
    ///
    /// An explicit id reference qualifies the entity regardless of the semantic. Attribute
    /// references only qualify an entity when at least one is present in the list.
    pub fn matches<S: AsRef<str>>(&self, semantic: Semantic, id: &str, attributes: &[S]) -> bool {
        if self.is_wildcard() {
            return true;
        }

        if self.references_id(id) {
            return true;
        }

        let mut refs = self.attributes().peekable();
        if refs.peek().is_none() {
            return false;
        }

        let attributes = attributes
            .iter()
            .map(|a| a.as_ref())
            .collect::<HashSet<&str>>();
        match semantic {
            Semantic::AllOf => refs.all(|r| attributes.contains(r)),
            Semantic::AnyOf => refs.any(|r| attributes.contains(r)),
        }
    }
}

impl fmt::Display for RoleList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.to_strings().join(" "))
    }
}

/// Validates role attributes assigned to an entity.
///
/// Attributes are free-form labels, but may not look like role expressions themselves.
pub fn validate_attributes<S: AsRef<str>>(field: &str, attributes: &[S]) -> Result<()> {
    let invalid = attributes
        .iter()
        .map(|a| a.as_ref())
        .filter(|a| a.starts_with(ATTRIBUTE_PREFIX) || a.starts_with(ENTITY_ID_PREFIX))
        .collect::<Vec<_>>();
    if invalid.is_empty() {
        return Ok(());
    }
    Err(Error::validation(
        field,
        "role attributes may not be prefixed with # or @",
        invalid,
    ))
}
