use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use regscout::config::{EngineOptions, SearchCriteria};
use regscout::progress::ProgressFn;
use regscout::results::{MatchField, MatchLocation, SearchReport, SearchResult};
use regscout::search::{search, SearchEngine};
use regscout::store::format::encode_string;
use regscout::store::memory::KeyId;
use regscout::store::{
    EnumRequest, KeyInfo, KeyStore, MemoryStore, MemoryStoreBuilder, SubkeySink, ValueSink,
    ValueType,
};
use regscout::StoreError;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};

fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

/// Fourteen keys; `HKLM\SAM` is unreadable, which hides its one subkey.
fn fixture() -> MemoryStore {
    MemoryStore::builder()
        .string(r"HKLM\SOFTWARE\Vendor", "InstallDir", r"C:\Program Files\Vendor")
        .dword(r"HKLM\SOFTWARE\Vendor", "Flags", 3)
        .binary(r"HKLM\SOFTWARE\Vendor", "Blob", &[0xAB, 0xCD, 0xEF])
        .modified(r"HKLM\SOFTWARE\Vendor", at(2024, 3, 1))
        .key(r"HKLM\SOFTWARE\Vendor\AdminTools")
        .string(r"HKLM\SOFTWARE\Classes\CLSID\VendorThing", "", "Vendor classes")
        .modified(r"HKLM\SOFTWARE\Classes\CLSID\VendorThing", at(2020, 1, 1))
        .value(
            r"HKLM\SYSTEM\Environment",
            "Path",
            ValueType::EXPAND_SZ,
            encode_string(r"%SystemRoot%\system32"),
        )
        .string(r"HKLM\SYSTEM\Environment", "PathExt", ".COM;.EXE")
        .string(r"HKLM\SAM\Vendor", "Secret", "vendor secret")
        .deny(r"HKLM\SAM")
        .string(r"HKCU\Software\Vendor", "Theme", "dark")
        .modified(r"HKCU\Software\Vendor", at(2023, 6, 1))
        .build()
}

fn criteria(query: &str) -> SearchCriteria {
    let mut criteria = SearchCriteria::new(query);
    criteria.start_paths = vec!["HKLM".to_string(), "HKCU".to_string()];
    criteria
}

fn collect<S: KeyStore>(store: &S, criteria: &SearchCriteria) -> Result<SearchReport> {
    let engine = SearchEngine::with_options(
        store,
        EngineOptions {
            threads: NonZeroUsize::new(4),
            ..EngineOptions::default()
        },
    );
    Ok(engine.collect(criteria, &AtomicBool::new(false), None, false)?)
}

fn paths(report: &SearchReport) -> Vec<(String, String)> {
    report
        .results
        .iter()
        .map(|r| (r.key_path.clone(), r.value_name.clone()))
        .collect()
}

/// Delegates to a [`MemoryStore`], recording which keys get enumerated.
struct RecordingStore {
    inner: MemoryStore,
    enumerated: Mutex<Vec<String>>,
}

impl KeyStore for RecordingStore {
    type Node = KeyId;

    fn open(&self, path: &str) -> Option<KeyId> {
        self.inner.open(path)
    }

    fn child(&self, parent: &KeyId, name: &str) -> Option<KeyId> {
        self.inner.child(parent, name)
    }

    fn build_path(&self, node: &KeyId) -> String {
        self.inner.build_path(node)
    }

    fn root_name(&self, node: &KeyId) -> Option<String> {
        self.inner.root_name(node)
    }

    fn root_paths(&self) -> Vec<String> {
        self.inner.root_paths()
    }

    fn key_info(&self, node: &KeyId) -> Result<KeyInfo, StoreError> {
        self.inner.key_info(node)
    }

    fn query_value(&self, node: &KeyId, name: &str) -> Result<(ValueType, Vec<u8>), StoreError> {
        self.inner.query_value(node, name)
    }

    fn enum_key_streaming(
        &self,
        node: &KeyId,
        request: EnumRequest,
        on_value: &mut ValueSink<'_>,
        on_subkey: &mut SubkeySink<'_>,
    ) -> Result<(), StoreError> {
        self.enumerated.lock().push(self.inner.build_path(node));
        self.inner.enum_key_streaming(node, request, on_value, on_subkey)
    }
}

#[test]
fn test_finds_keys_and_values() -> Result<()> {
    let report = collect(&fixture(), &criteria("vendor"))?;

    assert_eq!(
        paths(&report),
        vec![
            (r"HKCU\Software\Vendor".to_string(), String::new()),
            (r"HKLM\SOFTWARE\Classes\CLSID\VendorThing".to_string(), String::new()),
            (r"HKLM\SOFTWARE\Classes\CLSID\VendorThing".to_string(), String::new()),
            (r"HKLM\SOFTWARE\Vendor".to_string(), String::new()),
            (r"HKLM\SOFTWARE\Vendor".to_string(), "InstallDir".to_string()),
        ]
    );
    assert_eq!(report.key_results().count(), 3);
    assert_eq!(report.value_results().count(), 2);

    let default_value = report
        .value_results()
        .find(|r| r.key_name == "VendorThing")
        .unwrap();
    assert_eq!(default_value.display_name, "(Default)");
    assert_eq!(default_value.data_text, "Vendor classes");
    assert_eq!(default_value.modified_text, "2020-01-01 00:00:00");
    assert_eq!(default_value.location, MatchLocation::new(MatchField::Data, 0, 6));

    // The unreadable key's subkey is never discovered.
    assert_eq!(report.stats.keys_total, 13);
    assert_eq!(report.stats.keys_searched, 13);
    Ok(())
}

#[test]
fn test_empty_query_or_start_set_does_not_start() {
    let store = fixture();
    let cancel = AtomicBool::new(false);
    let delivered = Mutex::new(0usize);
    let reports = Mutex::new(0usize);
    let on_progress: &ProgressFn<'_> = &|_, _| *reports.lock() += 1;

    let started = search(
        &store,
        &criteria(""),
        &cancel,
        |_| {
            *delivered.lock() += 1;
            true
        },
        Some(on_progress),
        false,
    );
    assert!(!started);

    let mut no_start = SearchCriteria::new("vendor");
    no_start.start_paths.clear();
    let started = search(
        &store,
        &no_start,
        &cancel,
        |_| {
            *delivered.lock() += 1;
            true
        },
        Some(on_progress),
        false,
    );
    assert!(!started);

    assert_eq!(*delivered.lock(), 0);
    assert_eq!(*reports.lock(), 0);
}

#[test]
fn test_regex_validity_decides_start() {
    let store = fixture();
    let cancel = AtomicBool::new(false);

    let mut good = criteria(r"vend.r$");
    good.options.regex = true;
    let mut found = Vec::new();
    assert!(search(
        &store,
        &good,
        &cancel,
        |r| {
            found.push(r);
            true
        },
        None,
        false
    ));
    assert_eq!(found.len(), 3);

    let mut bad = criteria(r"vend(or");
    bad.options.regex = true;
    let mut found = Vec::new();
    assert!(!search(
        &store,
        &bad,
        &cancel,
        |r| {
            found.push(r);
            true
        },
        None,
        false
    ));
    assert!(found.is_empty());
}

#[test]
fn test_repeated_searches_agree() -> Result<()> {
    let store = fixture();
    let first = collect(&store, &criteria("e"))?;
    for _ in 0..5 {
        let again = collect(&store, &criteria("e"))?;
        assert_eq!(again.results, first.results);
    }
    Ok(())
}

#[test]
fn test_excluded_subtree_is_not_visited() -> Result<()> {
    let store = RecordingStore {
        inner: fixture(),
        enumerated: Mutex::new(Vec::new()),
    };
    let mut criteria = criteria("vendor");
    criteria.exclude_paths = vec![r"\CLASSES".to_string()];

    let report = collect(&store, &criteria)?;
    assert!(report.results.iter().all(|r| !r.key_path.contains("Classes")));
    assert_eq!(report.len(), 3);
    assert!(store
        .enumerated
        .lock()
        .iter()
        .all(|path| !path.contains("Classes")));

    // Classes itself is counted; CLSID and VendorThing never enter the frontier.
    assert_eq!(report.stats.keys_searched, 11);
    assert_eq!(report.stats.keys_total, 11);
    Ok(())
}

#[test]
fn test_hex_match_location() -> Result<()> {
    let mut criteria = criteria("AB CD");
    criteria.search_keys = false;
    criteria.search_value_names = false;

    let report = collect(&fixture(), &criteria)?;
    assert_eq!(report.len(), 1);
    let blob = &report.results[0];
    assert_eq!(blob.value_name, "Blob");
    assert_eq!(blob.type_label, "REG_BINARY");
    assert_eq!(blob.data_text, "AB CD EF");
    assert_eq!(blob.location, MatchLocation::new(MatchField::Data, 0, 5));
    Ok(())
}

#[test]
fn test_byte_shaped_query_matches_binary_text() -> Result<()> {
    let store = MemoryStore::builder()
        .binary(r"HKLM\Blobs", "Spaced", b"xx ab cd xx")
        .binary(r"HKLM\Blobs", "Prefixed", b"xx0xCAFExx")
        .binary(r"HKLM\Blobs", "Dashed", b"xxCA-FExx")
        .build();
    let data_only = |query: &str| {
        let mut criteria = SearchCriteria::new(query);
        criteria.start_paths = vec!["HKLM".to_string()];
        criteria.search_keys = false;
        criteria.search_value_names = false;
        criteria
    };

    for (query, expected) in [
        ("AB CD", "Spaced"),
        ("ab cd", "Spaced"),
        ("0xCAFE", "Prefixed"),
        ("CA-FE", "Dashed"),
    ] {
        let report = collect(&store, &data_only(query))?;
        let names: Vec<_> = report.results.iter().map(|r| r.value_name.as_str()).collect();
        assert_eq!(names, vec![expected], "{query}");
        assert!(!report.results[0].location.is_positioned(), "{query}");
    }
    Ok(())
}

#[test]
fn test_key_match_is_located_in_full_path() -> Result<()> {
    let report = collect(&fixture(), &criteria("admin"))?;
    assert_eq!(report.len(), 1);
    let key = &report.results[0];
    assert!(key.is_key);
    assert_eq!(key.key_path, r"HKLM\SOFTWARE\Vendor\AdminTools");
    assert_eq!(key.location, MatchLocation::new(MatchField::Path, 21, 5));
    let highlighted: String = key.key_path.chars().skip(21).take(5).collect();
    assert_eq!(highlighted, "Admin");
    Ok(())
}

#[test]
fn test_whole_string_names() -> Result<()> {
    let mut whole = criteria("path");
    whole.search_keys = false;
    whole.search_value_data = false;
    whole.options.match_whole = true;

    let report = collect(&fixture(), &whole)?;
    assert_eq!(paths(&report), vec![(r"HKLM\SYSTEM\Environment".to_string(), "Path".to_string())]);
    let path = &report.results[0];
    assert_eq!(path.location, MatchLocation::new(MatchField::Name, 0, 4));
    assert_eq!(path.data_text, r"%SystemRoot%\system32");
    assert_eq!(path.type_label, "REG_EXPAND_SZ");

    whole.query = "pat".to_string();
    assert!(collect(&fixture(), &whole)?.is_empty());
    Ok(())
}

#[test]
fn test_stop_on_first_delivers_exactly_one() {
    let store = fixture();
    for _ in 0..20 {
        let delivered = Mutex::new(Vec::new());
        let stats = SearchEngine::new(&store)
            .run(
                &criteria("vendor"),
                &AtomicBool::new(false),
                |r| {
                    delivered.lock().push(r);
                    true
                },
                None,
                true,
            )
            .unwrap();
        assert_eq!(delivered.lock().len(), 1);
        assert_eq!(stats.results, 1);
        assert!(stats.stopped);
    }
}

#[test]
fn test_callback_can_stop_search() {
    let store = fixture();
    let mut delivered = 0;
    let stats = SearchEngine::new(&store)
        .run(
            &criteria("e"),
            &AtomicBool::new(false),
            |_| {
                delivered += 1;
                false
            },
            None,
            false,
        )
        .unwrap();
    assert_eq!(delivered, 1);
    assert!(stats.stopped);
}

#[test]
fn test_cancellation() {
    let store = fixture();

    let cancelled = AtomicBool::new(true);
    let report = SearchEngine::new(&store)
        .collect(&criteria("vendor"), &cancelled, None, false)
        .unwrap();
    assert!(report.is_empty());
    assert_eq!(report.stats.keys_searched, 0);
    assert!(report.stats.stopped);

    // Cancelling from inside the result callback cuts off all later results.
    let cancel = AtomicBool::new(false);
    let mut delivered = 0;
    SearchEngine::new(&store)
        .run(
            &criteria("e"),
            &cancel,
            |_| {
                delivered += 1;
                cancel.store(true, Ordering::SeqCst);
                true
            },
            None,
            false,
        )
        .unwrap();
    assert_eq!(delivered, 1);
}

#[test]
fn test_type_filter() -> Result<()> {
    let mut criteria = criteria("vendor");
    criteria.value_types = vec![ValueType::DWORD];
    let report = collect(&fixture(), &criteria)?;
    assert_eq!(report.value_results().count(), 0);
    assert_eq!(report.key_results().count(), 3);

    criteria.value_types = vec![ValueType::SZ];
    let report = collect(&fixture(), &criteria)?;
    assert_eq!(report.value_results().count(), 2);
    assert!(report
        .value_results()
        .all(|r| r.value_type == Some(ValueType::SZ)));
    Ok(())
}

#[test]
fn test_size_filter() -> Result<()> {
    let mut criteria = criteria("vendor");
    criteria.max_size = Some(10);
    let report = collect(&fixture(), &criteria)?;
    assert_eq!(report.value_results().count(), 0);
    assert_eq!(report.key_results().count(), 3);

    // "C:\Program Files\Vendor" is 48 bytes, "Vendor classes" is 30.
    criteria.max_size = None;
    criteria.min_size = Some(40);
    let report = collect(&fixture(), &criteria)?;
    let values: Vec<_> = report.value_results().map(|r| r.value_name.as_str()).collect();
    assert_eq!(values, vec!["InstallDir"]);
    assert_eq!(report.value_results().next().unwrap().size_text, "48 bytes");
    Ok(())
}

#[test]
fn test_date_filter_applies_to_keys_and_values() -> Result<()> {
    let mut after = criteria("vendor");
    after.modified_after = Some(at(2024, 1, 1));
    let report = collect(&fixture(), &after)?;
    assert_eq!(
        paths(&report),
        vec![
            (r"HKLM\SOFTWARE\Vendor".to_string(), String::new()),
            (r"HKLM\SOFTWARE\Vendor".to_string(), "InstallDir".to_string()),
        ]
    );

    let mut before = criteria("vendor");
    before.modified_before = Some(at(2023, 12, 31));
    let report = collect(&fixture(), &before)?;
    assert_eq!(report.key_results().count(), 2);
    assert_eq!(report.value_results().count(), 1);
    Ok(())
}

#[test]
fn test_filters_combine() -> Result<()> {
    // The default value under VendorThing passes the date bound but not the
    // size bound; only the two old keys remain.
    let mut criteria = criteria("vendor");
    criteria.modified_before = Some(at(2023, 12, 31));
    criteria.min_size = Some(40);
    let report = collect(&fixture(), &criteria)?;
    assert_eq!(report.key_results().count(), 2);
    assert_eq!(report.value_results().count(), 0);

    criteria.modified_before = None;
    criteria.modified_after = Some(at(2024, 1, 1));
    criteria.value_types = vec![ValueType::SZ];
    let report = collect(&fixture(), &criteria)?;
    assert_eq!(
        paths(&report),
        vec![
            (r"HKLM\SOFTWARE\Vendor".to_string(), String::new()),
            (r"HKLM\SOFTWARE\Vendor".to_string(), "InstallDir".to_string()),
        ]
    );
    Ok(())
}

#[test]
fn test_progress_is_monotonic() {
    let store = wide_tree(6, 3);
    let reports = Mutex::new(Vec::new());
    let on_progress: &ProgressFn<'_> = &|searched, total| reports.lock().push((searched, total));

    let mut criteria = SearchCriteria::new("needle");
    criteria.start_paths = vec!["ROOT".to_string()];
    let stats = SearchEngine::new(&store)
        .run(&criteria, &AtomicBool::new(false), |_| true, Some(on_progress), false)
        .unwrap();

    let reports = reports.lock().clone();
    assert!(!reports.is_empty());
    for pair in reports.windows(2) {
        assert!(pair[0].0 <= pair[1].0 && pair[0].1 <= pair[1].1, "{:?}", pair);
    }
    assert!(reports.iter().all(|(searched, total)| searched <= total));
    let last = *reports.last().unwrap();
    assert_eq!(last, (stats.keys_searched, stats.keys_total));
    assert_eq!(last, (259, 259));
}

#[test]
fn test_denied_subtree_does_not_stop_search() -> Result<()> {
    let mut criteria = criteria("secret");
    let report = collect(&fixture(), &criteria)?;
    assert!(report.is_empty());

    criteria.start_paths = vec![r"HKLM\SAM".to_string(), "HKCU".to_string()];
    criteria.query = "dark".to_string();
    let report = collect(&fixture(), &criteria)?;
    assert_eq!(paths(&report), vec![(r"HKCU\Software\Vendor".to_string(), "Theme".to_string())]);
    Ok(())
}

#[test]
fn test_name_match_on_large_value_skips_data() -> Result<()> {
    let store = MemoryStore::builder()
        .binary(r"HKLM\Big", "VendorBlob", &vec![0u8; 2 * 1024 * 1024])
        .binary(r"HKLM\Big", "VendorSmall", &[1, 2])
        .build();
    let mut criteria = SearchCriteria::new("vendor");
    criteria.start_paths = vec!["HKLM".to_string()];
    criteria.search_value_data = false;

    let report = collect(&store, &criteria)?;
    let data: Vec<_> = report
        .results
        .iter()
        .map(|r| (r.value_name.as_str(), r.data_text.as_str()))
        .collect();
    assert_eq!(data, vec![("VendorBlob", ""), ("VendorSmall", "01 02")]);
    assert_eq!(report.results[0].size_text, "2.0 MB");
    Ok(())
}

/// `ROOT` plus `fanout` children per key down to `depth`; every leaf holds
/// one matching value.
fn wide_tree(fanout: usize, depth: usize) -> MemoryStore {
    fn fill(
        builder: MemoryStoreBuilder,
        path: &str,
        fanout: usize,
        depth: usize,
    ) -> MemoryStoreBuilder {
        if depth == 0 {
            return builder.string(path, "Target", &format!("needle at {}", path));
        }
        let mut builder = builder.key(path);
        for i in 0..fanout {
            builder = fill(builder, &format!(r"{}\k{}", path, i), fanout, depth - 1);
        }
        builder
    }
    fill(MemoryStore::builder(), "ROOT", fanout, depth).build()
}

#[test]
fn test_many_workers_find_every_match() -> Result<()> {
    let store = wide_tree(10, 3);
    let mut criteria = SearchCriteria::new("needle");
    criteria.start_paths = vec!["ROOT".to_string()];

    let engine = SearchEngine::with_options(
        &store,
        EngineOptions {
            threads: NonZeroUsize::new(8),
            ..EngineOptions::default()
        },
    );
    let report = engine.collect(&criteria, &AtomicBool::new(false), None, false)?;
    assert_eq!(report.len(), 1000);
    assert_eq!(report.stats.keys_searched, 1111);
    assert!(report
        .results
        .windows(2)
        .all(|pair| pair[0].sort_order(&pair[1]) != std::cmp::Ordering::Greater));

    let again = engine.collect(&criteria, &AtomicBool::new(false), None, false)?;
    assert_eq!(again.results, report.results);
    Ok(())
}

#[test]
fn test_search_result_fields_for_numeric_value() -> Result<()> {
    let mut criteria = criteria("0x00000003");
    criteria.search_keys = false;
    let report = collect(&fixture(), &criteria)?;
    let flags: &SearchResult = &report.results[0];
    assert_eq!(report.len(), 1);
    assert_eq!(flags.value_name, "Flags");
    assert_eq!(flags.value_type, Some(ValueType::DWORD));
    assert_eq!(flags.data_text, "0x00000003 (3)");
    assert_eq!(flags.location, MatchLocation::new(MatchField::Data, 0, 10));
    assert_eq!(flags.modified_text, "2024-03-01 00:00:00");
    Ok(())
}
