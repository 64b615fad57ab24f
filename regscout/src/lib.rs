pub mod config;
pub mod errors;
pub mod filters;
pub mod progress;
pub mod results;
pub mod search;
pub mod store;

pub use config::{EngineOptions, SearchConfig, SearchCriteria};
pub use errors::{Result, SearchError, StoreError};
pub use progress::ProgressFn;
pub use results::{MatchField, MatchLocation, SearchReport, SearchResult, SearchStats};
pub use search::{search, SearchEngine};
pub use store::{KeyStore, MemoryStore, ValueType};
