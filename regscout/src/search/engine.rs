use once_cell::unsync::OnceCell;
use parking_lot::Mutex;
use rayon::ThreadPoolBuilder;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use super::bytes::ByteQuery;
use super::frontier::Frontier;
use super::interpreter::{DataInterpreter, DataMatch};
use super::matcher::PatternMatcher;
use crate::config::{EngineOptions, SearchCriteria};
use crate::errors::{Result, SearchError};
use crate::filters::{is_excluded, modified_in_range, size_in_bounds, type_allowed};
use crate::progress::{ProgressFn, ProgressTracker};
use crate::results::{
    MatchField, MatchLocation, SearchReport, SearchResult, SearchStats, KEY_TYPE_LABEL,
};
use crate::store::format::{size_text, time_text};
use crate::store::{EnumRequest, KeyStore, ValueInfo};

/// Values larger than this are not fetched just to display them alongside a
/// name-only match.
pub const MAX_DISPLAY_FETCH_BYTES: u64 = 1024 * 1024;

/// Longest a worker waits on the frontier before re-checking cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Worker cap when searching from several starting keys.
const MAX_WORKERS_MULTI_ROOT: usize = 8;

/// Worker cap when searching from a single starting key.
const MAX_WORKERS_SINGLE_ROOT: usize = 4;

/// One key on the frontier: the provider's locator plus its display path and
/// leaf name, computed once when the node is created.
#[derive(Debug, Clone)]
struct SearchNode<N> {
    node: N,
    path: String,
    name: String,
}

fn leaf_name(path: &str) -> &str {
    path.rsplit('\\').next().unwrap_or(path)
}

/// Number of workers for a search over `start_nodes` starting keys.
pub fn worker_count(start_nodes: usize, options: &EngineOptions) -> usize {
    if let Some(threads) = options.threads {
        return threads.get();
    }
    let cap = if start_nodes > 1 {
        MAX_WORKERS_MULTI_ROOT
    } else {
        MAX_WORKERS_SINGLE_ROOT
    };
    num_cpus::get().min(cap).max(1)
}

struct Emitter<R> {
    on_result: R,
    delivered: u64,
}

/// Everything one search's workers share. Matching state is immutable; the
/// frontier and the emitter are the only locked resources.
struct SearchSession<'a, S: KeyStore + ?Sized, R> {
    store: &'a S,
    criteria: &'a SearchCriteria,
    matcher: PatternMatcher,
    bytes: ByteQuery,
    excludes: Vec<String>,
    request: EnumRequest,
    cancel: &'a AtomicBool,
    stopped: AtomicBool,
    stop_on_first: bool,
    frontier: Frontier<SearchNode<S::Node>>,
    progress: ProgressTracker,
    on_progress: Option<&'a ProgressFn<'a>>,
    emitter: Mutex<Emitter<R>>,
}

impl<'a, S, R> SearchSession<'a, S, R>
where
    S: KeyStore + ?Sized,
    R: FnMut(SearchResult) -> bool + Send,
{
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst) || self.cancel.load(Ordering::SeqCst)
    }

    fn request_stop(&self, reason: &str) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            debug!("Stopping search: {}", reason);
        }
        self.frontier.finish();
    }

    fn worker_loop(&self) {
        trace!("Worker started");
        while let Some(node) = self.frontier.pop(POLL_INTERVAL, || self.is_stopped()) {
            self.progress.record_searched();
            self.progress.maybe_report(self.on_progress);

            let children = self.process(&node);
            if !children.is_empty() {
                self.progress.add_total(children.len() as u64);
            }
            self.frontier.retire(children);
            self.progress.maybe_report(self.on_progress);
        }
        trace!("Worker finished");
    }

    /// Searches one key and returns the subkeys to visit next.
    fn process(&self, node: &SearchNode<S::Node>) -> Vec<SearchNode<S::Node>> {
        if is_excluded(&node.path, &self.excludes) {
            return Vec::new();
        }
        trace!("Searching key: {}", node.path);

        let modified = OnceCell::new();
        let mut subkeys = Vec::new();

        if !self.request.is_empty() {
            let mut on_value = |info: &ValueInfo, data: &[u8]| {
                if self.is_stopped() {
                    return false;
                }
                match self.match_value(node, &modified, info, data) {
                    Some(result) => self.emit(result),
                    None => true,
                }
            };
            let mut on_subkey = |name: &str| {
                if self.is_stopped() {
                    return false;
                }
                subkeys.push(name.to_string());
                true
            };

            if let Err(e) =
                self.store
                    .enum_key_streaming(&node.node, self.request, &mut on_value, &mut on_subkey)
            {
                debug!("Enumeration of {} failed: {}", node.path, e);
            }
        }

        if self.criteria.search_keys && !self.is_stopped() {
            if let Some(result) = self.match_key(node, &modified) {
                self.emit(result);
            }
        }

        if subkeys.is_empty() || self.is_stopped() {
            return Vec::new();
        }
        subkeys
            .into_iter()
            .filter_map(|name| {
                let child = self.store.child(&node.node, &name)?;
                Some(SearchNode {
                    path: self.store.build_path(&child),
                    node: child,
                    name,
                })
            })
            .collect()
    }

    /// Last-write time of `node`, fetched at most once.
    fn modified_time(
        &self,
        node: &SearchNode<S::Node>,
        cell: &OnceCell<Option<chrono::DateTime<chrono::Utc>>>,
    ) -> Option<chrono::DateTime<chrono::Utc>> {
        *cell.get_or_init(|| match self.store.key_info(&node.node) {
            Ok(info) => info.last_write,
            Err(e) => {
                debug!("Key info for {} unavailable: {}", node.path, e);
                None
            }
        })
    }

    fn passes_date_filter(
        &self,
        node: &SearchNode<S::Node>,
        cell: &OnceCell<Option<chrono::DateTime<chrono::Utc>>>,
    ) -> bool {
        !self.criteria.has_date_filter()
            || modified_in_range(
                self.modified_time(node, cell),
                self.criteria.modified_after,
                self.criteria.modified_before,
            )
    }

    fn match_value(
        &self,
        node: &SearchNode<S::Node>,
        modified: &OnceCell<Option<chrono::DateTime<chrono::Utc>>>,
        info: &ValueInfo,
        data: &[u8],
    ) -> Option<SearchResult> {
        let criteria = self.criteria;
        let ty = self.store.normalize_value_type(info.value_type);
        if !type_allowed(ty, &criteria.value_types)
            || !size_in_bounds(info.data_size, criteria.min_size, criteria.max_size)
            || !self.passes_date_filter(node, modified)
        {
            return None;
        }

        let name_hit = if criteria.search_value_names {
            self.matcher.locate(&info.name)
        } else {
            None
        };
        let data_hit = if criteria.search_value_data {
            DataInterpreter::new(&self.matcher, &self.bytes).match_data(self.store, ty, data)
        } else {
            None
        };

        let location = match (&name_hit, &data_hit) {
            (Some(hit), _) => MatchLocation::new(MatchField::Name, hit.start, hit.len),
            (None, Some(DataMatch { location: Some(hit), .. })) => {
                MatchLocation::new(MatchField::Data, hit.start, hit.len)
            }
            (None, Some(DataMatch { location: None, .. })) => {
                MatchLocation::unpositioned(MatchField::Data)
            }
            (None, None) => return None,
        };

        let data_text = match data_hit {
            Some(data_match) => data_match.display,
            None => self.display_data(node, info, data),
        };

        Some(SearchResult {
            key_path: node.path.clone(),
            key_name: node.name.clone(),
            value_name: info.name.clone(),
            display_name: SearchResult::display_name_for(&info.name),
            value_type: Some(info.value_type),
            type_label: self.store.format_value_type(info.value_type),
            data_text,
            size_text: size_text(info.data_size),
            modified_text: self
                .modified_time(node, modified)
                .map(|t| time_text(&t))
                .unwrap_or_default(),
            is_key: false,
            location,
        })
    }

    /// Best-effort data rendering for a value that matched by name only.
    fn display_data(&self, node: &SearchNode<S::Node>, info: &ValueInfo, data: &[u8]) -> String {
        let ty = self.store.normalize_value_type(info.value_type);
        if self.request.value_data {
            return self.store.format_value_data_for_display(ty, data);
        }
        if info.data_size > MAX_DISPLAY_FETCH_BYTES {
            return String::new();
        }
        match self.store.query_value(&node.node, &info.name) {
            Ok((raw, bytes)) => self
                .store
                .format_value_data_for_display(self.store.normalize_value_type(raw), &bytes),
            Err(e) => {
                debug!("Could not fetch {}\\{} for display: {}", node.path, info.name, e);
                String::new()
            }
        }
    }

    fn match_key(
        &self,
        node: &SearchNode<S::Node>,
        modified: &OnceCell<Option<chrono::DateTime<chrono::Utc>>>,
    ) -> Option<SearchResult> {
        let hit = self.matcher.locate(&node.name)?;
        if !self.passes_date_filter(node, modified) {
            return None;
        }

        // Offsets refer to the full path, which ends with the key name.
        let prefix = node
            .path
            .chars()
            .count()
            .saturating_sub(node.name.chars().count());
        Some(SearchResult {
            key_path: node.path.clone(),
            key_name: node.name.clone(),
            value_name: String::new(),
            display_name: node.name.clone(),
            value_type: None,
            type_label: KEY_TYPE_LABEL.to_string(),
            data_text: String::new(),
            size_text: String::new(),
            modified_text: self
                .modified_time(node, modified)
                .map(|t| time_text(&t))
                .unwrap_or_default(),
            is_key: true,
            location: MatchLocation::new(MatchField::Path, prefix + hit.start, hit.len),
        })
    }

    /// Delivers one result. Returns whether the search should continue.
    ///
    /// Delivery is serialized and re-checks the stop state under the lock,
    /// so nothing reaches the callback after it asked to stop.
    fn emit(&self, result: SearchResult) -> bool {
        let mut emitter = self.emitter.lock();
        if self.is_stopped() {
            return false;
        }

        trace!("Match in {}", result.key_path);
        emitter.delivered += 1;
        let keep_going = (emitter.on_result)(result);
        if !keep_going {
            self.request_stop("result callback requested stop");
            return false;
        }
        if self.stop_on_first {
            self.request_stop("first match found");
            return false;
        }
        true
    }
}

/// Runs concurrent searches over a [`KeyStore`].
///
/// # Examples
///
/// ```
/// use regscout::config::SearchCriteria;
/// use regscout::search::SearchEngine;
/// use regscout::store::MemoryStore;
/// use std::sync::atomic::AtomicBool;
///
/// let store = MemoryStore::builder()
///     .string(r"HKLM\SOFTWARE\Vendor", "InstallDir", r"C:\Vendor")
///     .build();
/// let mut criteria = SearchCriteria::new("vendor");
/// criteria.start_paths = vec!["HKLM".to_string()];
///
/// let report = SearchEngine::new(&store)
///     .collect(&criteria, &AtomicBool::new(false), None, false)
///     .unwrap();
/// assert_eq!(report.len(), 2); // the key and the value's data
/// ```
#[derive(Debug)]
pub struct SearchEngine<'s, S: ?Sized> {
    store: &'s S,
    options: EngineOptions,
}

impl<'s, S> SearchEngine<'s, S>
where
    S: KeyStore + ?Sized,
{
    pub fn new(store: &'s S) -> Self {
        Self::with_options(store, EngineOptions::default())
    }

    pub fn with_options(store: &'s S, options: EngineOptions) -> Self {
        Self { store, options }
    }

    fn resolve_start_nodes(&self, paths: &[String]) -> Vec<SearchNode<S::Node>> {
        paths
            .iter()
            .filter_map(|path| match self.store.open(path) {
                Some(node) => {
                    let path = self.store.build_path(&node);
                    let name = self
                        .store
                        .root_name(&node)
                        .unwrap_or_else(|| leaf_name(&path).to_string());
                    Some(SearchNode { node, path, name })
                }
                None => {
                    warn!("Starting key not found: {}", path);
                    None
                }
            })
            .collect()
    }

    /// Runs one search, streaming each match to `on_result` as it is found.
    ///
    /// `on_result` returns `false` to stop the search. Results are delivered
    /// one at a time and in no particular order. `cancel` may be set from any
    /// thread; the search then winds down without further results.
    ///
    /// Fails before any traversal if the query is empty, no starting key
    /// resolves, or the pattern does not compile.
    pub fn run<R>(
        &self,
        criteria: &SearchCriteria,
        cancel: &AtomicBool,
        on_result: R,
        on_progress: Option<&ProgressFn<'_>>,
        stop_on_first: bool,
    ) -> Result<SearchStats>
    where
        R: FnMut(SearchResult) -> bool + Send,
    {
        info!("Starting search for '{}'", criteria.query);

        if let Err(e) = criteria.validate() {
            warn!("Search not started: {}", e);
            return Err(e);
        }
        let matcher = PatternMatcher::new(&criteria.query, criteria.options).map_err(|e| {
            warn!("Search not started: {}", e);
            e
        })?;
        let start_nodes = self.resolve_start_nodes(&criteria.start_paths);
        if start_nodes.is_empty() {
            warn!("Search not started: none of the starting keys exist");
            return Err(SearchError::NoStartingNodes);
        }

        let threads = worker_count(start_nodes.len(), &self.options);
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("regscout-worker-{}", i))
            .build()
            .map_err(|e| SearchError::ThreadPool(e.to_string()))?;
        debug!(
            "Searching {} starting keys with {} workers",
            start_nodes.len(),
            threads
        );

        let session = SearchSession {
            store: self.store,
            criteria,
            matcher,
            bytes: ByteQuery::parse(&criteria.query),
            excludes: criteria.normalized_excludes(),
            request: EnumRequest {
                values: criteria.wants_values(),
                value_data: criteria.search_value_data,
                subkeys: criteria.recursive,
            },
            cancel,
            stopped: AtomicBool::new(false),
            stop_on_first,
            progress: ProgressTracker::new(start_nodes.len() as u64, self.options.throttle),
            frontier: Frontier::new(start_nodes),
            on_progress,
            emitter: Mutex::new(Emitter {
                on_result,
                delivered: 0,
            }),
        };

        let started = Instant::now();
        pool.scope(|scope| {
            for _ in 0..threads {
                let session = &session;
                scope.spawn(move |_| session.worker_loop());
            }
        });
        session.progress.flush(on_progress);

        let snapshot = session.progress.snapshot();
        let stats = SearchStats {
            keys_searched: snapshot.searched,
            keys_total: snapshot.total,
            results: session.emitter.lock().delivered,
            stopped: session.is_stopped(),
            threads,
            elapsed: started.elapsed(),
        };
        info!(
            "Search complete. Found {} results in {} keys",
            stats.results, stats.keys_searched
        );
        Ok(stats)
    }

    /// Runs a search and returns every result, sorted by path and value name.
    pub fn collect(
        &self,
        criteria: &SearchCriteria,
        cancel: &AtomicBool,
        on_progress: Option<&ProgressFn<'_>>,
        stop_on_first: bool,
    ) -> Result<SearchReport> {
        let mut results = Vec::new();
        let stats = self.run(
            criteria,
            cancel,
            |result| {
                results.push(result);
                true
            },
            on_progress,
            stop_on_first,
        )?;
        Ok(SearchReport::new(results, stats))
    }
}

/// Searches `store` with default engine options.
///
/// Returns `false` if the search could not start (empty query, no starting
/// keys, or an invalid pattern); cancellation and stops are normal
/// completions and return `true`.
pub fn search<S, R>(
    store: &S,
    criteria: &SearchCriteria,
    cancel: &AtomicBool,
    on_result: R,
    on_progress: Option<&ProgressFn<'_>>,
    stop_on_first: bool,
) -> bool
where
    S: KeyStore + ?Sized,
    R: FnMut(SearchResult) -> bool + Send,
{
    SearchEngine::new(store)
        .run(criteria, cancel, on_result, on_progress, stop_on_first)
        .is_ok()
}
