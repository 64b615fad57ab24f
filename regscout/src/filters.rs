//! Predicates that prune the search before any text is matched.
//!
//! Exclusion works on key paths and prunes whole subtrees. The size, type
//! and date predicates decide whether a single value (or, for dates, a key)
//! is a candidate at all.

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::store::ValueType;

/// Checks whether a key path falls under one of the exclusion substrings.
///
/// `excludes` must already be lowercased (see
/// [`SearchCriteria::normalized_excludes`](crate::config::SearchCriteria::normalized_excludes));
/// the comparison ignores case.
pub fn is_excluded(path: &str, excludes: &[String]) -> bool {
    if excludes.is_empty() {
        return false;
    }
    let lowered = path.to_lowercase();
    let excluded = excludes.iter().any(|pattern| lowered.contains(pattern.as_str()));
    if excluded {
        trace!("Excluding key: {}", path);
    }
    excluded
}

/// Checks a value's data size against the inclusive bounds.
pub fn size_in_bounds(size: u64, min: Option<u64>, max: Option<u64>) -> bool {
    min.map_or(true, |min| size >= min) && max.map_or(true, |max| size <= max)
}

/// Checks a normalized type against the allow-list; an empty list allows
/// everything.
pub fn type_allowed(ty: ValueType, allowed: &[ValueType]) -> bool {
    allowed.is_empty() || allowed.contains(&ty)
}

/// Checks a last-write time against the inclusive range.
///
/// With no bounds set everything passes. With a bound set, an unknown time
/// never passes.
pub fn modified_in_range(
    time: Option<DateTime<Utc>>,
    after: Option<DateTime<Utc>>,
    before: Option<DateTime<Utc>>,
) -> bool {
    if after.is_none() && before.is_none() {
        return true;
    }
    match time {
        Some(time) => {
            after.map_or(true, |after| time >= after)
                && before.map_or(true, |before| time <= before)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_is_excluded() {
        let excludes = vec![r"\classes\".to_string(), "wow6432node".to_string()];
        assert!(is_excluded(r"HKLM\SOFTWARE\Classes\CLSID", &excludes));
        assert!(is_excluded(r"HKLM\SOFTWARE\WOW6432Node", &excludes));
        assert!(!is_excluded(r"HKLM\SOFTWARE\Classes", &excludes));
        assert!(!is_excluded(r"HKLM\SOFTWARE\Vendor", &excludes));
        assert!(!is_excluded(r"HKLM\SOFTWARE\Vendor", &[]));
    }

    #[test]
    fn test_size_in_bounds() {
        assert!(size_in_bounds(10, None, None));
        assert!(size_in_bounds(10, Some(10), Some(10)));
        assert!(!size_in_bounds(9, Some(10), None));
        assert!(!size_in_bounds(11, None, Some(10)));
        assert!(size_in_bounds(0, None, Some(0)));
    }

    #[test]
    fn test_type_allowed() {
        assert!(type_allowed(ValueType::BINARY, &[]));
        assert!(type_allowed(ValueType::SZ, &[ValueType::SZ, ValueType::DWORD]));
        assert!(!type_allowed(ValueType::BINARY, &[ValueType::SZ]));
    }

    #[test]
    fn test_modified_in_range() {
        let jan = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let jun = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let dec = Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap();

        assert!(modified_in_range(None, None, None));
        assert!(modified_in_range(Some(jun), Some(jan), Some(dec)));
        assert!(modified_in_range(Some(jan), Some(jan), None));
        assert!(modified_in_range(Some(dec), None, Some(dec)));
        assert!(!modified_in_range(Some(jan), Some(jun), None));
        assert!(!modified_in_range(Some(dec), None, Some(jun)));
        assert!(!modified_in_range(None, Some(jan), None));
    }
}
