//! Circuit configuration parameters and content addressing.
//!
//! A [`ParameterSet`] is an ordered name/value mapping describing one
//! elaboration of a circuit. Its content hash is the build key: equal sets
//! always resolve to the same compiled artifact, and any change produces a
//! fresh object directory.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// A scalar configuration value, passed to the circuit compiler as a
/// `-GNAME=value` override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Str(String),
}

impl ParamValue {
    /// Render the value the way the compiler override flag expects it:
    /// integers bare, strings wrapped in double quotes.
    pub fn to_override(&self) -> String {
        match self {
            ParamValue::Int(v) => v.to_string(),
            ParamValue::Str(v) => format!("\"{}\"", v),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Str(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<u32> for ParamValue {
    fn from(v: u32) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

/// Ordered mapping from configuration-parameter name to scalar value.
///
/// Insertion order is preserved and is part of the identity fed to the
/// content hash; re-setting an existing name replaces the value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    entries: Vec<(String, ParamValue)>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a parameter, keeping the original position on
    /// replacement.
    pub fn set(&mut self, name: &str, value: impl Into<ParamValue>) -> &mut Self {
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Feed the canonical content of this set into a hasher. The encoding
    /// tags every value with its type so `Int(5)` and `Str("5")` hash
    /// differently.
    pub fn hash_into(&self, hasher: &mut Sha256) {
        for (name, value) in &self.entries {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            match value {
                ParamValue::Int(v) => {
                    hasher.update(b"i");
                    hasher.update(v.to_le_bytes());
                }
                ParamValue::Str(v) => {
                    hasher.update(b"s");
                    hasher.update(v.as_bytes());
                }
            }
            hasher.update([0xffu8]);
        }
    }

    /// Content hash of the set, truncated to 32 hex characters. Used as the
    /// cache/build key.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        self.hash_into(&mut hasher);
        let digest = hasher.finalize();
        let mut out = String::with_capacity(32);
        for byte in digest.iter().take(16) {
            out.push_str(&format!("{:02x}", byte));
        }
        out
    }
}

impl<N: Into<String>, V: Into<ParamValue>> FromIterator<(N, V)> for ParameterSet {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        let mut set = ParameterSet::new();
        for (name, value) in iter {
            let name = name.into();
            set.set(&name, value);
        }
        set
    }
}

// Serialized as a JSON object so the set reads naturally inside the artifact
// config; deserialization streams the object in document order, which keeps
// the round trip order-stable.
impl Serialize for ParameterSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ParameterSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SetVisitor;

        impl<'de> Visitor<'de> for SetVisitor {
            type Value = ParameterSet;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of parameter names to scalar values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut set = ParameterSet::new();
                while let Some((name, value)) = access.next_entry::<String, ParamValue>()? {
                    set.set(&name, value);
                }
                Ok(set)
            }
        }

        deserializer.deserialize_map(SetVisitor)
    }
}
