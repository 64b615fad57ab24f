use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::trace;

use crate::errors::{Result, SearchError};

/// Upper bound on cached patterns; the cache is emptied when it is reached.
const MAX_CACHED_PATTERNS: usize = 256;

/// Compiled patterns keyed by (source, options), shared across searches.
static PATTERN_CACHE: Lazy<PatternCache> = Lazy::new(|| PatternCache::new(MAX_CACHED_PATTERNS));

type PatternKey = (String, MatchOptions);

#[derive(Debug)]
struct PatternCache {
    entries: DashMap<PatternKey, Arc<Regex>>,
    capacity: usize,
}

impl PatternCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
        }
    }

    fn get(&self, key: &PatternKey) -> Option<Arc<Regex>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn insert(&self, key: PatternKey, regex: Arc<Regex>) {
        if self.entries.len() >= self.capacity {
            trace!("Pattern cache full ({} entries), clearing", self.entries.len());
            self.entries.clear();
        }
        self.entries.insert(key, regex);
    }

    #[cfg(test)]
    fn contains(&self, key: &PatternKey) -> bool {
        self.entries.contains_key(key)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// How the query is compared against candidate text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchOptions {
    /// Compare case-sensitively.
    #[serde(default)]
    pub match_case: bool,
    /// The whole candidate must match, not just a substring of it.
    #[serde(default)]
    pub match_whole: bool,
    /// Treat the query as a regular expression.
    #[serde(default)]
    pub regex: bool,
}

/// Position of a match, counted in `char`s of the candidate text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextMatch {
    pub start: usize,
    pub len: usize,
}

impl TextMatch {
    fn from_byte_span(text: &str, start: usize, end: usize) -> Self {
        let start_chars = text[..start].chars().count();
        Self {
            start: start_chars,
            len: text[start..end].chars().count(),
        }
    }
}

/// Strategy for pattern matching
#[derive(Debug, Clone)]
pub enum MatchStrategy {
    /// Case-sensitive literal comparison.
    Simple { needle: String, whole: bool },
    /// Regular expressions, and case-insensitive literals compiled as
    /// escaped patterns.
    Regex(Arc<Regex>),
}

/// Holds one compiled query and locates it in candidate text.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    strategy: MatchStrategy,
}

impl PatternMatcher {
    /// Compiles `query` under `options`. Fails only for an invalid regex.
    pub fn new(query: &str, options: MatchOptions) -> Result<Self> {
        if !options.regex && options.match_case {
            return Ok(Self {
                strategy: MatchStrategy::Simple {
                    needle: query.to_string(),
                    whole: options.match_whole,
                },
            });
        }

        let key = (query.to_string(), options);
        if let Some(regex) = PATTERN_CACHE.get(&key) {
            trace!("Pattern cache hit for '{}'", query);
            return Ok(Self {
                strategy: MatchStrategy::Regex(regex),
            });
        }

        let body = if options.regex {
            query.to_string()
        } else {
            regex::escape(query)
        };
        let source = if options.match_whole {
            format!(r"\A(?:{})\z", body)
        } else {
            body
        };

        let regex = RegexBuilder::new(&source)
            .case_insensitive(!options.match_case)
            .build()
            .map_err(|e| SearchError::invalid_pattern(format!("{}: {}", query, e)))?;
        let regex = Arc::new(regex);
        PATTERN_CACHE.insert(key, Arc::clone(&regex));

        Ok(Self {
            strategy: MatchStrategy::Regex(regex),
        })
    }

    pub fn strategy(&self) -> &MatchStrategy {
        &self.strategy
    }

    /// Finds the query in `text`. Empty text never matches.
    pub fn locate(&self, text: &str) -> Option<TextMatch> {
        if text.is_empty() {
            return None;
        }
        match &self.strategy {
            MatchStrategy::Simple { needle, whole: true } => (text == needle).then(|| TextMatch {
                start: 0,
                len: text.chars().count(),
            }),
            MatchStrategy::Simple { needle, whole: false } => text
                .find(needle.as_str())
                .map(|start| TextMatch::from_byte_span(text, start, start + needle.len())),
            MatchStrategy::Regex(regex) => regex
                .find(text)
                .map(|m| TextMatch::from_byte_span(text, m.start(), m.end())),
        }
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.locate(text).is_some()
    }

    #[cfg(test)]
    fn is_cached(query: &str, options: MatchOptions) -> bool {
        PATTERN_CACHE.contains(&(query.to_string(), options))
    }
}
