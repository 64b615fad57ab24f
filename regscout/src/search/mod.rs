//! The search pipeline: matching primitives and the concurrent traversal.
//!
//! # Matching
//!
//! One query is compiled into two interpretations up front:
//! - [`PatternMatcher`] for text (key names, value names, rendered data),
//!   honouring the case, whole-string and regex options;
//! - [`ByteQuery`] for binary data, when the query parses as hex.
//!
//! [`DataInterpreter`] picks between them per value by the value's
//! [`DataClass`](crate::store::DataClass).
//!
//! # Traversal
//!
//! [`SearchEngine`] runs a fixed pool of workers over a shared
//! [`Frontier`](frontier::Frontier) stack. Each worker pops a key, streams its
//! values and subkey names from the provider, emits matches, and pushes the
//! subkeys back for any worker to pick up. The provider is never recursed
//! through, so stack depth stays flat however deep the tree goes.
//!
//! ```rust,ignore
//! let engine = SearchEngine::new(&store);
//! let stats = engine.run(&criteria, &cancel, |result| {
//!     println!("{}", result.key_path);
//!     true // keep going
//! }, None, false)?;
//! ```
pub mod bytes;
pub mod engine;
pub mod frontier;
pub mod interpreter;
pub mod matcher;

pub use bytes::ByteQuery;
pub use engine::{search, SearchEngine};
pub use interpreter::{DataInterpreter, DataMatch};
pub use matcher::{MatchOptions, PatternMatcher, TextMatch};
