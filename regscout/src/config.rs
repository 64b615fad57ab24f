use chrono::{DateTime, Utc};
use config::{Config as ConfigBuilder, File};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use crate::errors::{Result, SearchError};
use crate::progress::ProgressThrottle;
use crate::search::matcher::MatchOptions;
use crate::store::ValueType;

/// What to search for and where. Immutable for the lifetime of one search.
///
/// # Configuration Format
///
/// Criteria deserialize from YAML (or JSON). Every field is optional:
/// ```yaml
/// query: "Vendor"
/// search_keys: true
/// search_value_names: true
/// search_value_data: true
/// match_case: false
/// match_whole: false
/// regex: false
/// recursive: true
/// min_size: 4
/// max_size: 1048576
/// modified_after: 2024-01-01T00:00:00Z
/// value_types: [REG_SZ, REG_EXPAND_SZ]
/// start_paths: ['HKEY_LOCAL_MACHINE\SOFTWARE']
/// exclude_paths: ['\Classes\']
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchCriteria {
    /// The query text. Must be non-empty for a search to start.
    pub query: String,

    /// Match key leaf names.
    pub search_keys: bool,

    /// Match value names.
    pub search_value_names: bool,

    /// Match value data.
    pub search_value_data: bool,

    #[serde(flatten)]
    pub options: MatchOptions,

    /// Descend into subkeys of the starting keys.
    pub recursive: bool,

    /// Inclusive lower bound on value data size, in bytes.
    pub min_size: Option<u64>,

    /// Inclusive upper bound on value data size, in bytes.
    pub max_size: Option<u64>,

    /// Inclusive lower bound on the owning key's last-write time.
    pub modified_after: Option<DateTime<Utc>>,

    /// Inclusive upper bound on the owning key's last-write time.
    pub modified_before: Option<DateTime<Utc>>,

    /// Value types to consider; empty means all types.
    pub value_types: Vec<ValueType>,

    /// Display paths of the keys to start from.
    pub start_paths: Vec<String>,

    /// Keys whose path contains any of these substrings (ignoring case) are
    /// neither matched nor descended into.
    pub exclude_paths: Vec<String>,
}

impl Default for SearchCriteria {
    fn default() -> Self {
        Self {
            query: String::new(),
            search_keys: true,
            search_value_names: true,
            search_value_data: true,
            options: MatchOptions::default(),
            recursive: true,
            min_size: None,
            max_size: None,
            modified_after: None,
            modified_before: None,
            value_types: Vec::new(),
            start_paths: Vec::new(),
            exclude_paths: Vec::new(),
        }
    }
}

impl SearchCriteria {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// Fails fast on criteria that cannot start a search. Pattern validity
    /// is checked when the matcher is compiled.
    pub fn validate(&self) -> Result<()> {
        if self.query.is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        if self.start_paths.is_empty() {
            return Err(SearchError::NoStartingNodes);
        }
        Ok(())
    }

    pub fn wants_values(&self) -> bool {
        self.search_value_names || self.search_value_data
    }

    pub fn has_date_filter(&self) -> bool {
        self.modified_after.is_some() || self.modified_before.is_some()
    }

    /// Exclusion substrings, lowercased, with empty entries dropped.
    pub fn normalized_excludes(&self) -> Vec<String> {
        self.exclude_paths
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| p.to_lowercase())
            .collect()
    }
}

/// Engine tuning that does not change what a search finds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineOptions {
    /// Exact worker count; derived from hardware parallelism when `None`.
    pub threads: Option<NonZeroUsize>,
    pub throttle: ProgressThrottle,
}

/// Criteria plus run settings, as loaded from config files.
///
/// # Configuration Locations
///
/// Loaded in order of increasing precedence:
/// 1. Global `$CONFIG_DIR/regscout/config.yaml`
/// 2. Local `.regscout.yaml` in the current directory
/// 3. A file passed explicitly (the CLI's `--config`)
///
/// Command-line values are applied on top with [`merge_with_cli`](Self::merge_with_cli).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    #[serde(flatten)]
    pub criteria: SearchCriteria,

    /// Number of worker threads; derived from the CPU count if not specified
    pub thread_count: Option<NonZeroUsize>,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            criteria: SearchCriteria::default(),
            thread_count: None,
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl SearchConfig {
    /// Loads configuration from the default locations plus an explicit file,
    /// which must exist.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            if !path.exists() {
                return Err(SearchError::config_error(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
        }

        let config_files = [
            dirs::config_dir().map(|p| p.join("regscout/config.yaml")),
            Some(PathBuf::from(".regscout.yaml")),
            config_path.map(PathBuf::from),
        ];

        let mut builder = ConfigBuilder::builder();
        for path in config_files.iter().flatten() {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_path()));
            }
        }

        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            threads: self.thread_count,
            ..EngineOptions::default()
        }
    }

    /// Merges CLI arguments over configuration file values. Values equal to
    /// their defaults on the CLI side leave the file's values in place.
    pub fn merge_with_cli(mut self, cli: SearchConfig) -> Self {
        let defaults = SearchCriteria::default();
        let file = &mut self.criteria;
        let cli_criteria = cli.criteria;

        if !cli_criteria.query.is_empty() {
            file.query = cli_criteria.query;
        }
        let cli_targets = (
            cli_criteria.search_keys,
            cli_criteria.search_value_names,
            cli_criteria.search_value_data,
        );
        if cli_targets != (true, true, true) {
            file.search_keys = cli_targets.0;
            file.search_value_names = cli_targets.1;
            file.search_value_data = cli_targets.2;
        }
        file.options.match_case |= cli_criteria.options.match_case;
        file.options.match_whole |= cli_criteria.options.match_whole;
        file.options.regex |= cli_criteria.options.regex;
        if cli_criteria.recursive != defaults.recursive {
            file.recursive = cli_criteria.recursive;
        }
        file.min_size = cli_criteria.min_size.or(file.min_size);
        file.max_size = cli_criteria.max_size.or(file.max_size);
        file.modified_after = cli_criteria.modified_after.or(file.modified_after);
        file.modified_before = cli_criteria.modified_before.or(file.modified_before);
        if !cli_criteria.value_types.is_empty() {
            file.value_types = cli_criteria.value_types;
        }
        if !cli_criteria.start_paths.is_empty() {
            file.start_paths = cli_criteria.start_paths;
        }
        // Exclusions accumulate.
        file.exclude_paths.extend(cli_criteria.exclude_paths);

        if cli.thread_count.is_some() {
            self.thread_count = cli.thread_count;
        }
        if cli.log_level != default_log_level() {
            self.log_level = cli.log_level;
        }
        self
    }
}
