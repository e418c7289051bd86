//! Typed name/value environment exchanged with a VM.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A value visible to script evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "datatype", content = "value", rename_all = "snake_case")]
pub enum BindingValue {
    /// Text value.
    String(String),
    /// Numeric value.
    Number(f64),
    /// Boolean value.
    Boolean(bool),
    /// A value the evaluator could not express as one of the other types,
    /// carried in its textual form.
    Opaque(String),
}

impl BindingValue {
    /// Datatype name of this value.
    #[must_use]
    pub const fn datatype(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Number(_) => "number",
            Self::Boolean(_) => "boolean",
            Self::Opaque(_) => "opaque",
        }
    }
}

impl From<&str> for BindingValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for BindingValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<f64> for BindingValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for BindingValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

/// Ordered mapping from binding name to value. Names are unique.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VmBindings {
    values: BTreeMap<String, BindingValue>,
}

impl VmBindings {
    /// Create an empty set of bindings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name`, returning the previous value if any.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<BindingValue>,
    ) -> Option<BindingValue> {
        self.values.insert(name.into(), value.into())
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<BindingValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Value bound to `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&BindingValue> {
        self.values.get(name)
    }

    /// Unbind `name`.
    pub fn remove(&mut self, name: &str) -> Option<BindingValue> {
        self.values.remove(name)
    }

    /// Merge `other` into these bindings; `other` wins on collision.
    pub fn merge(&mut self, other: Self) {
        self.values.extend(other.values);
    }

    /// Copy of the bindings whose names appear in `names`. Unknown names are
    /// skipped.
    #[must_use]
    pub fn subset<'a, I>(&self, names: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let values = names
            .into_iter()
            .filter_map(|name| {
                self.values
                    .get_key_value(name)
                    .map(|(k, v)| (k.clone(), v.clone()))
            })
            .collect();
        Self { values }
    }

    /// Number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no names are bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate bindings in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &BindingValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K, V> FromIterator<(K, V)> for VmBindings
where
    K: Into<String>,
    V: Into<BindingValue>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
