/*!

Wire values exchanged with the secret service.

The transport layer hands the engine dynamically typed [`Variant`]s; this
module provides the object path newtype, the value enum, and the
[`FromVariant`] conversions used for typed property reads and prompt
results. Variant-typed (`v`) arguments are represented by the contained
value itself.

*/

use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::errors::{Result, usage_error};

/// A validated D-Bus object path.
///
/// The root path `/` doubles as the protocol's "no object" marker, e.g. when
/// a method did not need a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectPath(String);

impl ObjectPath {
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        if path.is_empty() {
            return Ok(Self::root());
        }
        if !is_valid_path(&path) {
            return Err(usage_error(format!("invalid object path: {path:?}")));
        }
        Ok(Self(path))
    }

    pub fn root() -> Self {
        Self("/".to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The containing object's path: an item's collection, say.
    pub fn parent(&self) -> Option<ObjectPath> {
        if self.is_root() {
            return None;
        }
        let index = self.0.rfind('/')?;
        if index == 0 {
            Some(Self::root())
        } else {
            Some(Self(self.0[..index].to_string()))
        }
    }

    pub fn child(&self, element: &str) -> Result<ObjectPath> {
        if self.is_root() {
            Self::new(format!("/{element}"))
        } else {
            Self::new(format!("{}/{element}", self.0))
        }
    }
}

fn is_valid_path(path: &str) -> bool {
    if path == "/" {
        return true;
    }
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    rest.split('/').all(|element| {
        !element.is_empty()
            && element
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_')
    })
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ObjectPath {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ObjectPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for ObjectPath {
    type Error = crate::errors::Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

/// A dynamically typed wire value.
///
/// Dictionaries are string keyed; dictionaries keyed by object path
/// (`a{o...}`) use the path's string form as the key.
#[derive(Debug, Clone, PartialEq)]
pub enum Variant {
    Bool(bool),
    U32(u32),
    U64(u64),
    Str(String),
    Path(ObjectPath),
    Bytes(Vec<u8>),
    Array(Vec<Variant>),
    Struct(Vec<Variant>),
    Dict(BTreeMap<String, Variant>),
}

impl Variant {
    pub fn type_name(&self) -> &'static str {
        match self {
            Variant::Bool(_) => "bool",
            Variant::U32(_) => "u32",
            Variant::U64(_) => "u64",
            Variant::Str(_) => "string",
            Variant::Path(_) => "object path",
            Variant::Bytes(_) => "byte array",
            Variant::Array(_) => "array",
            Variant::Struct(_) => "struct",
            Variant::Dict(_) => "dictionary",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Variant::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Variant::U64(n) => Some(*n),
            Variant::U32(n) => Some(u64::from(*n)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&ObjectPath> {
        match self {
            Variant::Path(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Variant::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Variant]> {
        match self {
            Variant::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&[Variant]> {
        match self {
            Variant::Struct(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, Variant>> {
        match self {
            Variant::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// An `ao` array.
    pub fn paths(paths: &[ObjectPath]) -> Self {
        Variant::Array(paths.iter().cloned().map(Variant::Path).collect())
    }

    /// An `a{sv}` dictionary.
    pub fn dict<K: Into<String>>(entries: impl IntoIterator<Item = (K, Variant)>) -> Self {
        Variant::Dict(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Variant::Str(value.to_string())
    }
}

impl From<ObjectPath> for Variant {
    fn from(value: ObjectPath) -> Self {
        Variant::Path(value)
    }
}

/// Convert a string-keyed attribute map into its `a{ss}` wire form.
pub fn attributes_to_variant(attributes: &HashMap<String, String>) -> Variant {
    Variant::Dict(
        attributes
            .iter()
            .map(|(k, v)| (k.clone(), Variant::Str(v.clone())))
            .collect(),
    )
}

/// Convert an `a{ss}` wire dictionary back into an attribute map.
pub fn attributes_from_variant(value: &Variant) -> Option<HashMap<String, String>> {
    HashMap::<String, String>::from_variant(value)
}

/// Typed extraction from a [`Variant`].
pub trait FromVariant: Sized {
    fn from_variant(value: &Variant) -> Option<Self>;
}

impl FromVariant for Variant {
    fn from_variant(value: &Variant) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromVariant for bool {
    fn from_variant(value: &Variant) -> Option<Self> {
        value.as_bool()
    }
}

impl FromVariant for u32 {
    fn from_variant(value: &Variant) -> Option<Self> {
        match value {
            Variant::U32(n) => Some(*n),
            _ => None,
        }
    }
}

impl FromVariant for u64 {
    fn from_variant(value: &Variant) -> Option<Self> {
        value.as_u64()
    }
}

impl FromVariant for String {
    fn from_variant(value: &Variant) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}

impl FromVariant for ObjectPath {
    fn from_variant(value: &Variant) -> Option<Self> {
        value.as_path().cloned()
    }
}

impl<T: FromVariant> FromVariant for Vec<T> {
    fn from_variant(value: &Variant) -> Option<Self> {
        value.as_array()?.iter().map(T::from_variant).collect()
    }
}

impl<T: FromVariant> FromVariant for HashMap<String, T> {
    fn from_variant(value: &Variant) -> Option<Self> {
        value
            .as_dict()?
            .iter()
            .map(|(k, v)| T::from_variant(v).map(|v| (k.clone(), v)))
            .collect()
    }
}
