use crate::Error;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

pub const FIELD_SEMANTIC: &str = "semantic";
pub const FIELD_POLICY_TYPE: &str = "type";

/// Determines how the attribute references of a role list are combined.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Semantic {
    /// Every referenced attribute must be present on the entity.
    #[default]
    AllOf,

    /// At least one referenced attribute must be present on the entity.
    AnyOf,
}

/// Distinguishes service policies that grant dial access from those granting bind access.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PolicyType {
    Dial,
    Bind,
}

// === impl Semantic ===

impl Semantic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllOf => "AllOf",
            Self::AnyOf => "AnyOf",
        }
    }
}

impl FromStr for Semantic {
    type Err = Error;

    /// An empty value selects the default semantic.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "AllOf" => Ok(Self::AllOf),
            "AnyOf" => Ok(Self::AnyOf),
            _ => Err(Error::validation(FIELD_SEMANTIC, "invalid semantic", [s])),
        }
    }
}

impl TryFrom<String> for Semantic {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Semantic> for String {
    fn from(s: Semantic) -> Self {
        s.as_str().to_string()
    }
}

impl fmt::Display for Semantic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

// === impl PolicyType ===

impl PolicyType {
    /// The discriminant persisted for this policy type.
    pub fn id(&self) -> i64 {
        match self {
            Self::Dial => 1,
            Self::Bind => 2,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(Self::Dial),
            2 => Some(Self::Bind),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dial => "Dial",
            Self::Bind => "Bind",
        }
    }
}

impl FromStr for PolicyType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Dial" => Ok(Self::Dial),
            "Bind" => Ok(Self::Bind),
            _ => Err(Error::validation(
                FIELD_POLICY_TYPE,
                "invalid policy type",
                [s],
            )),
        }
    }
}

impl TryFrom<String> for PolicyType {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PolicyType> for String {
    fn from(t: PolicyType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for PolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}
