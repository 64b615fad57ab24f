use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A registry value type code.
///
/// Codes outside the well-known set are preserved as-is; they classify as
/// binary data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueType(pub u32);

impl ValueType {
    pub const NONE: Self = Self(0);
    pub const SZ: Self = Self(1);
    pub const EXPAND_SZ: Self = Self(2);
    pub const BINARY: Self = Self(3);
    pub const DWORD: Self = Self(4);
    pub const DWORD_BIG_ENDIAN: Self = Self(5);
    pub const LINK: Self = Self(6);
    pub const MULTI_SZ: Self = Self(7);
    pub const RESOURCE_LIST: Self = Self(8);
    pub const FULL_RESOURCE_DESCRIPTOR: Self = Self(9);
    pub const RESOURCE_REQUIREMENTS_LIST: Self = Self(10);
    pub const QWORD: Self = Self(11);

    const NAMES: [(Self, &'static str); 12] = [
        (Self::NONE, "REG_NONE"),
        (Self::SZ, "REG_SZ"),
        (Self::EXPAND_SZ, "REG_EXPAND_SZ"),
        (Self::BINARY, "REG_BINARY"),
        (Self::DWORD, "REG_DWORD"),
        (Self::DWORD_BIG_ENDIAN, "REG_DWORD_BIG_ENDIAN"),
        (Self::LINK, "REG_LINK"),
        (Self::MULTI_SZ, "REG_MULTI_SZ"),
        (Self::RESOURCE_LIST, "REG_RESOURCE_LIST"),
        (Self::FULL_RESOURCE_DESCRIPTOR, "REG_FULL_RESOURCE_DESCRIPTOR"),
        (Self::RESOURCE_REQUIREMENTS_LIST, "REG_RESOURCE_REQUIREMENTS_LIST"),
        (Self::QWORD, "REG_QWORD"),
    ];

    pub fn code(self) -> u32 {
        self.0
    }

    /// The canonical `REG_*` name, if this is a well-known type.
    pub fn name(self) -> Option<&'static str> {
        Self::NAMES
            .iter()
            .find(|(ty, _)| *ty == self)
            .map(|(_, name)| *name)
    }

    /// How the engine interprets data of this type.
    pub fn class(self) -> DataClass {
        match self {
            Self::SZ | Self::EXPAND_SZ | Self::MULTI_SZ | Self::LINK => DataClass::Text,
            Self::DWORD | Self::QWORD => DataClass::Other,
            _ => DataClass::Binary,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{}", self.0),
        }
    }
}

impl FromStr for ValueType {
    type Err = String;

    /// Accepts `REG_SZ`, `sz`, `expand_sz`, or a numeric code (decimal or `0x` hex).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(hex) = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            return u32::from_str_radix(hex, 16)
                .map(Self)
                .map_err(|e| format!("invalid value type '{}': {}", s, e));
        }
        if let Ok(code) = trimmed.parse::<u32>() {
            return Ok(Self(code));
        }

        let upper = trimmed.to_ascii_uppercase();
        let wanted = if upper.starts_with("REG_") {
            upper
        } else {
            format!("REG_{}", upper)
        };
        Self::NAMES
            .iter()
            .find(|(_, name)| *name == wanted)
            .map(|(ty, _)| *ty)
            .ok_or_else(|| format!("unknown value type '{}'", s))
    }
}

impl Serialize for ValueType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.name() {
            Some(name) => serializer.serialize_str(name),
            None => serializer.serialize_u32(self.0),
        }
    }
}

impl<'de> Deserialize<'de> for ValueType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Code(u32),
            Name(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Code(code) => Ok(Self(code)),
            Repr::Name(name) => name.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// The closed set of interpretations applied to value data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataClass {
    /// UTF-16 strings: single, expandable, link and multi-string values.
    Text,
    /// Opaque bytes: raw binary, resource descriptors, big-endian numbers,
    /// `REG_NONE` and unknown types.
    Binary,
    /// Numeric types searched through their display rendering.
    Other,
}

/// Metadata about a key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyInfo {
    pub last_write: Option<DateTime<Utc>>,
}

/// Metadata about a value streamed during enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueInfo {
    pub name: String,
    pub value_type: ValueType,
    pub data_size: u64,
}

/// What the engine wants streamed back for one key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnumRequest {
    pub values: bool,
    pub value_data: bool,
    pub subkeys: bool,
}

impl EnumRequest {
    pub fn is_empty(&self) -> bool {
        !self.values && !self.subkeys
    }
}
