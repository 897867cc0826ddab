use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Field {
    Str(String),
    Bool(bool),
    Int(i64),
    Strings(Vec<String>),
}

/// A row: a set of named, typed fields.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Record {
    fields: BTreeMap<String, Field>,
}

// === impl Field ===

impl From<&str> for Field {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Field {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<bool> for Field {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Field {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<Vec<String>> for Field {
    fn from(v: Vec<String>) -> Self {
        Self::Strings(v)
    }
}

// === impl Record ===

impl Record {
    pub fn with(mut self, name: &str, value: impl Into<Field>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<Field>) {
        self.fields.insert(name.to_string(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<Field> {
        self.fields.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        match self.fields.get(name) {
            Some(Field::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Missing or non-boolean fields read as `false`.
    pub fn bool(&self, name: &str) -> bool {
        matches!(self.fields.get(name), Some(Field::Bool(true)))
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.fields.get(name) {
            Some(Field::Int(i)) => Some(*i),
            _ => None,
        }
    }

    /// Missing or non-list fields read as an empty list.
    pub fn strings(&self, name: &str) -> &[String] {
        match self.fields.get(name) {
            Some(Field::Strings(v)) => v.as_slice(),
            _ => &[],
        }
    }
}
