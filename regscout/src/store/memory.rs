use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use super::format::{encode_multi_string, encode_string};
use super::types::{DataClass, EnumRequest, KeyInfo, ValueInfo, ValueType};
use super::{KeyStore, SubkeySink, ValueSink};
use crate::errors::{SearchError, StoreError};
use crate::search::bytes::ByteQuery;

/// Index of a key in a [`MemoryStore`].
pub type KeyId = usize;

#[derive(Debug, Clone)]
struct KeyEntry {
    name: String,
    parent: Option<KeyId>,
    last_write: Option<DateTime<Utc>>,
    denied: bool,
    values: Vec<MemoryValue>,
    children: Vec<KeyId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryValue {
    pub name: String,
    pub value_type: ValueType,
    pub data: Vec<u8>,
}

/// A registry-style tree held in memory.
///
/// Name lookups are case-insensitive, as in the Windows registry. Keys
/// marked `denied` fail enumeration and metadata queries with
/// [`StoreError::AccessDenied`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    keys: Vec<KeyEntry>,
    roots: Vec<KeyId>,
}

impl MemoryStore {
    pub fn builder() -> MemoryStoreBuilder {
        MemoryStoreBuilder::default()
    }

    /// Loads a JSON or YAML snapshot; the format is chosen by file extension.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));

        let snapshot: Snapshot = if is_yaml {
            serde_yaml::from_str(&text)
                .map_err(|e| SearchError::snapshot_error(path, e.to_string()))?
        } else {
            serde_json::from_str(&text)
                .map_err(|e| SearchError::snapshot_error(path, e.to_string()))?
        };

        Self::from_snapshot(&snapshot).map_err(|e| SearchError::snapshot_error(path, e.to_string()))
    }

    pub fn from_snapshot(snapshot: &Snapshot) -> Result<Self, StoreError> {
        let mut store = Self::default();
        for key in &snapshot.keys {
            store.insert_snapshot(None, key)?;
        }
        Ok(store)
    }

    fn insert_snapshot(
        &mut self,
        parent: Option<KeyId>,
        key: &KeySnapshot,
    ) -> Result<(), StoreError> {
        let id = self.ensure_child(parent, &key.name);
        {
            let entry = &mut self.keys[id];
            entry.last_write = key.modified.or(entry.last_write);
            entry.denied |= key.denied;
        }
        for value in &key.values {
            let data = value.data.to_bytes(value.value_type).map_err(|e| {
                StoreError::InvalidData(format!("{}\\{}: {}", key.name, value.name, e))
            })?;
            self.set_value(id, &value.name, value.value_type, data);
        }
        for child in &key.keys {
            self.insert_snapshot(Some(id), child)?;
        }
        Ok(())
    }

    /// Number of keys in the store.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn find_child(&self, parent: Option<KeyId>, name: &str) -> Option<KeyId> {
        let candidates = match parent {
            Some(p) => &self.keys[p].children,
            None => &self.roots,
        };
        candidates
            .iter()
            .copied()
            .find(|&id| self.keys[id].name.eq_ignore_ascii_case(name))
    }

    fn ensure_child(&mut self, parent: Option<KeyId>, name: &str) -> KeyId {
        if let Some(id) = self.find_child(parent, name) {
            return id;
        }
        let id = self.keys.len();
        self.keys.push(KeyEntry {
            name: name.to_string(),
            parent,
            last_write: None,
            denied: false,
            values: Vec::new(),
            children: Vec::new(),
        });
        match parent {
            Some(p) => self.keys[p].children.push(id),
            None => self.roots.push(id),
        }
        id
    }

    fn ensure_path(&mut self, path: &str) -> KeyId {
        let mut current = None;
        for segment in split_path(path) {
            current = Some(self.ensure_child(current, segment));
        }
        // An empty path names nothing; fall back to an unnamed root.
        current.unwrap_or_else(|| self.ensure_child(None, ""))
    }

    fn set_value(&mut self, id: KeyId, name: &str, value_type: ValueType, data: Vec<u8>) {
        let values = &mut self.keys[id].values;
        match values.iter_mut().find(|v| v.name.eq_ignore_ascii_case(name)) {
            Some(existing) => {
                existing.value_type = value_type;
                existing.data = data;
            }
            None => values.push(MemoryValue {
                name: name.to_string(),
                value_type,
                data,
            }),
        }
    }

    fn accessible(&self, node: &KeyId) -> Result<&KeyEntry, StoreError> {
        let entry = self
            .keys
            .get(*node)
            .ok_or_else(|| StoreError::not_found(format!("key #{}", node)))?;
        if entry.denied {
            return Err(StoreError::access_denied(self.build_path(node)));
        }
        Ok(entry)
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('\\').filter(|segment| !segment.is_empty())
}

impl KeyStore for MemoryStore {
    type Node = KeyId;

    fn open(&self, path: &str) -> Option<KeyId> {
        let mut current = None;
        for segment in split_path(path) {
            current = Some(self.find_child(current, segment)?);
        }
        current
    }

    fn child(&self, parent: &KeyId, name: &str) -> Option<KeyId> {
        self.find_child(Some(*parent), name)
    }

    fn build_path(&self, node: &KeyId) -> String {
        let mut segments = Vec::new();
        let mut current = Some(*node);
        while let Some(id) = current {
            let Some(entry) = self.keys.get(id) else {
                break;
            };
            segments.push(entry.name.as_str());
            current = entry.parent;
        }
        segments.reverse();
        segments.join("\\")
    }

    fn root_name(&self, node: &KeyId) -> Option<String> {
        self.keys
            .get(*node)
            .filter(|entry| entry.parent.is_none())
            .map(|entry| entry.name.clone())
    }

    fn root_paths(&self) -> Vec<String> {
        self.roots.iter().map(|&id| self.keys[id].name.clone()).collect()
    }

    fn key_info(&self, node: &KeyId) -> Result<KeyInfo, StoreError> {
        let entry = self.accessible(node)?;
        Ok(KeyInfo {
            last_write: entry.last_write,
        })
    }

    fn query_value(&self, node: &KeyId, name: &str) -> Result<(ValueType, Vec<u8>), StoreError> {
        let entry = self.accessible(node)?;
        entry
            .values
            .iter()
            .find(|v| v.name.eq_ignore_ascii_case(name))
            .map(|v| (v.value_type, v.data.clone()))
            .ok_or_else(|| StoreError::not_found(format!("{}\\{}", self.build_path(node), name)))
    }

    fn enum_key_streaming(
        &self,
        node: &KeyId,
        request: EnumRequest,
        on_value: &mut ValueSink<'_>,
        on_subkey: &mut SubkeySink<'_>,
    ) -> Result<(), StoreError> {
        let entry = self.accessible(node)?;

        if request.values {
            for value in &entry.values {
                let info = ValueInfo {
                    name: value.name.clone(),
                    value_type: value.value_type,
                    data_size: value.data.len() as u64,
                };
                let data: &[u8] = if request.value_data { &value.data } else { &[] };
                if !on_value(&info, data) {
                    debug!("Value stream stopped at key #{}", node);
                    return Ok(());
                }
            }
        }

        if request.subkeys {
            for &child in &entry.children {
                if !on_subkey(&self.keys[child].name) {
                    debug!("Subkey stream stopped at key #{}", node);
                    return Ok(());
                }
            }
        }

        Ok(())
    }
}

/// Programmatic construction of a [`MemoryStore`]. Paths are backslash
/// separated; missing intermediate keys are created.
#[derive(Debug, Default)]
pub struct MemoryStoreBuilder {
    store: MemoryStore,
}

impl MemoryStoreBuilder {
    pub fn key(mut self, path: &str) -> Self {
        self.store.ensure_path(path);
        self
    }

    pub fn value(mut self, path: &str, name: &str, value_type: ValueType, data: Vec<u8>) -> Self {
        let id = self.store.ensure_path(path);
        self.store.set_value(id, name, value_type, data);
        self
    }

    pub fn string(self, path: &str, name: &str, text: &str) -> Self {
        self.value(path, name, ValueType::SZ, encode_string(text))
    }

    pub fn multi_string(self, path: &str, name: &str, items: &[&str]) -> Self {
        self.value(path, name, ValueType::MULTI_SZ, encode_multi_string(items))
    }

    pub fn dword(self, path: &str, name: &str, value: u32) -> Self {
        self.value(path, name, ValueType::DWORD, value.to_le_bytes().to_vec())
    }

    pub fn qword(self, path: &str, name: &str, value: u64) -> Self {
        self.value(path, name, ValueType::QWORD, value.to_le_bytes().to_vec())
    }

    pub fn binary(self, path: &str, name: &str, data: &[u8]) -> Self {
        self.value(path, name, ValueType::BINARY, data.to_vec())
    }

    pub fn modified(mut self, path: &str, time: DateTime<Utc>) -> Self {
        let id = self.store.ensure_path(path);
        self.store.keys[id].last_write = Some(time);
        self
    }

    pub fn deny(mut self, path: &str) -> Self {
        let id = self.store.ensure_path(path);
        self.store.keys[id].denied = true;
        self
    }

    pub fn build(self) -> MemoryStore {
        self.store
    }
}

/// Serialized form of a [`MemoryStore`].
///
/// ```yaml
/// keys:
///   - name: HKEY_LOCAL_MACHINE
///     keys:
///       - name: SOFTWARE
///         modified: 2024-01-15T10:00:00Z
///         values:
///           - { name: InstallDir, type: REG_SZ, data: "C:\\Program Files\\Vendor" }
///           - { name: Flags, type: REG_DWORD, data: 3 }
///           - { name: Blob, type: REG_BINARY, data: { hex: "AB CD EF" } }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub keys: Vec<KeySnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeySnapshot {
    pub name: String,
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub denied: bool,
    #[serde(default)]
    pub values: Vec<ValueSnapshot>,
    #[serde(default)]
    pub keys: Vec<KeySnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueSnapshot {
    /// Empty for the key's default value.
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    pub data: SnapshotData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SnapshotData {
    Number(u64),
    Text(String),
    List(Vec<String>),
    Hex { hex: String },
}

impl SnapshotData {
    /// Encodes the data the way the registry stores a value of `value_type`.
    pub fn to_bytes(&self, value_type: ValueType) -> Result<Vec<u8>, String> {
        match (self, value_type.class()) {
            (Self::Hex { hex }, _) => parse_hex(hex),
            (Self::List(items), _) if value_type == ValueType::MULTI_SZ => {
                Ok(encode_multi_string(items.as_slice()))
            }
            (Self::Text(text), _) if value_type == ValueType::MULTI_SZ => {
                Ok(encode_multi_string(&[text]))
            }
            (Self::Text(text), DataClass::Text) => Ok(encode_string(text)),
            (Self::Number(n), _) => encode_number(*n, value_type),
            (Self::Text(text), DataClass::Other) | (Self::Text(text), DataClass::Binary)
                if value_type == ValueType::DWORD
                    || value_type == ValueType::QWORD
                    || value_type == ValueType::DWORD_BIG_ENDIAN =>
            {
                let n = text
                    .trim()
                    .parse::<u64>()
                    .map_err(|e| format!("invalid number '{}': {}", text, e))?;
                encode_number(n, value_type)
            }
            (Self::Text(text), DataClass::Binary) => parse_hex(text),
            (data, _) => Err(format!("{:?} cannot be stored as {}", data, value_type)),
        }
    }
}

fn encode_number(n: u64, value_type: ValueType) -> Result<Vec<u8>, String> {
    let narrow = || u32::try_from(n).map_err(|_| format!("{} does not fit in a DWORD", n));
    match value_type {
        ValueType::DWORD => Ok(narrow()?.to_le_bytes().to_vec()),
        ValueType::DWORD_BIG_ENDIAN => Ok(narrow()?.to_be_bytes().to_vec()),
        ValueType::QWORD => Ok(n.to_le_bytes().to_vec()),
        other => Err(format!("a number cannot be stored as {}", other)),
    }
}

fn parse_hex(text: &str) -> Result<Vec<u8>, String> {
    let query = ByteQuery::parse(text);
    if !query.is_hex_parseable() {
        return Err(format!("invalid hex data '{}'", text));
    }
    Ok(query.bytes().map(<[u8]>::to_vec).unwrap_or_default())
}
