//! Declared argument types.
//!
//! Manifests spell types as strings (`Number`, `Measure(C)`,
//! `Array(Entity(tt:hashtag))`); [`TypeTag`] is the parsed form.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Parsed argument type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeTag {
    String,
    Number,
    Boolean,
    /// Physical quantity, stored in the base unit of the given unit.
    Measure(String),
    Currency,
    Date,
    /// Opaque identifier of the given entity type (`tt:url`).
    Entity(String),
    Location,
    Enum(Vec<String>),
    Array(Box<TypeTag>),
    /// Untyped pass-through.
    Any,
}

impl TypeTag {
    pub fn is_array(&self) -> bool {
        matches!(self, TypeTag::Array(_))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, TypeTag::Number | TypeTag::Measure(_))
    }

    /// Unit carried by a measure type.
    pub fn unit(&self) -> Option<&str> {
        match self {
            TypeTag::Measure(unit) => Some(unit),
            _ => None,
        }
    }
}

/// Error returned when a type string does not parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeParseError(pub String);

impl fmt::Display for TypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid type {:?}", self.0)
    }
}

impl std::error::Error for TypeParseError {}

/// Split `Name(inner)` into `("Name", Some("inner"))`.
fn split_parametric(s: &str) -> Result<(&str, Option<&str>), TypeParseError> {
    match s.find('(') {
        None => Ok((s, None)),
        Some(open) => {
            if !s.ends_with(')') {
                return Err(TypeParseError(s.to_string()));
            }
            let inner = &s[open + 1..s.len() - 1];
            if inner.is_empty() {
                return Err(TypeParseError(s.to_string()));
            }
            Ok((&s[..open], Some(inner)))
        }
    }
}

impl FromStr for TypeTag {
    type Err = TypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || TypeParseError(s.to_string());

        match split_parametric(s)? {
            ("String", None) => Ok(TypeTag::String),
            ("Number", None) => Ok(TypeTag::Number),
            ("Boolean", None) => Ok(TypeTag::Boolean),
            ("Currency", None) => Ok(TypeTag::Currency),
            ("Date", None) => Ok(TypeTag::Date),
            ("Location", None) => Ok(TypeTag::Location),
            ("Any", None) => Ok(TypeTag::Any),
            ("Measure", Some(unit)) => Ok(TypeTag::Measure(unit.trim().to_string())),
            ("Entity", Some(ty)) => Ok(TypeTag::Entity(ty.trim().to_string())),
            ("Enum", Some(values)) => Ok(TypeTag::Enum(
                values.split(',').map(|v| v.trim().to_string()).collect(),
            )),
            ("Array", Some(elem)) => Ok(TypeTag::Array(Box::new(elem.parse()?))),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::String => write!(f, "String"),
            TypeTag::Number => write!(f, "Number"),
            TypeTag::Boolean => write!(f, "Boolean"),
            TypeTag::Measure(unit) => write!(f, "Measure({})", unit),
            TypeTag::Currency => write!(f, "Currency"),
            TypeTag::Date => write!(f, "Date"),
            TypeTag::Entity(ty) => write!(f, "Entity({})", ty),
            TypeTag::Location => write!(f, "Location"),
            TypeTag::Enum(values) => write!(f, "Enum({})", values.join(",")),
            TypeTag::Array(elem) => write!(f, "Array({})", elem),
            TypeTag::Any => write!(f, "Any"),
        }
    }
}

impl Serialize for TypeTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TypeTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
