//! The provider surface the search engine consumes.
//!
//! A [`KeyStore`] owns the tree and knows how to enumerate it; the engine
//! never mutates it and never recurses through the provider's own call
//! stack. [`MemoryStore`] is an in-memory implementation used by the CLI and
//! by tests.

pub mod format;
pub mod memory;
pub mod types;

pub use memory::{MemoryStore, MemoryStoreBuilder};
pub use types::{DataClass, EnumRequest, KeyInfo, ValueInfo, ValueType};

use crate::errors::StoreError;

/// Callback receiving one streamed value. Return `false` to stop the stream.
pub type ValueSink<'a> = dyn FnMut(&ValueInfo, &[u8]) -> bool + 'a;

/// Callback receiving one streamed subkey name. Return `false` to stop the stream.
pub type SubkeySink<'a> = dyn FnMut(&str) -> bool + 'a;

/// A hierarchical key/value store the engine can search.
///
/// # Thread Safety
///
/// The engine calls into one store from several worker threads at once, so
/// implementations must be `Send + Sync`. No engine lock is held while a
/// provider method runs; providers are free to block on I/O.
pub trait KeyStore: Send + Sync {
    /// The provider's native locator for a key.
    type Node: Clone + Send + Sync;

    /// Resolves a display path (as produced by [`build_path`](Self::build_path)).
    fn open(&self, path: &str) -> Option<Self::Node>;

    /// Locator of a subkey reported by [`enum_key_streaming`](Self::enum_key_streaming).
    /// `None` if the subkey disappeared since it was listed.
    fn child(&self, parent: &Self::Node, name: &str) -> Option<Self::Node>;

    /// Full display path of a key, e.g. `HKEY_LOCAL_MACHINE\SOFTWARE\Vendor`.
    fn build_path(&self, node: &Self::Node) -> String;

    /// Display name when `node` is a root key, `None` otherwise.
    fn root_name(&self, node: &Self::Node) -> Option<String>;

    /// Display paths of every root key.
    fn root_paths(&self) -> Vec<String>;

    fn key_info(&self, node: &Self::Node) -> Result<KeyInfo, StoreError>;

    /// Fetches a single value in full.
    fn query_value(&self, node: &Self::Node, name: &str)
        -> Result<(ValueType, Vec<u8>), StoreError>;

    /// Streams the values and subkey names of one key.
    ///
    /// Values are streamed only when `request.values` is set; their data is
    /// passed only when `request.value_data` is set (an empty slice
    /// otherwise). Subkey names are streamed only when `request.subkeys` is
    /// set. A sink returning `false` ends the enumeration immediately.
    ///
    /// An error after some items were streamed leaves those items valid.
    fn enum_key_streaming(
        &self,
        node: &Self::Node,
        request: EnumRequest,
        on_value: &mut ValueSink<'_>,
        on_subkey: &mut SubkeySink<'_>,
    ) -> Result<(), StoreError>;

    /// Maps a raw type code to the base type used for filtering and
    /// interpretation.
    fn normalize_value_type(&self, ty: ValueType) -> ValueType {
        ty
    }

    fn format_value_type(&self, ty: ValueType) -> String {
        format::type_label(ty)
    }

    fn format_value_data(&self, ty: ValueType, data: &[u8]) -> String {
        format::value_data(ty, data)
    }

    /// Display variant of [`format_value_data`](Self::format_value_data);
    /// may abbreviate large values.
    fn format_value_data_for_display(&self, ty: ValueType, data: &[u8]) -> String {
        format::value_data_preview(ty, data)
    }
}
