use super::bytes::ByteQuery;
use super::matcher::{PatternMatcher, TextMatch};
use crate::store::format::{decode_latin1, decode_utf16le, string_text, PREVIEW_BYTES};
use crate::store::{DataClass, KeyStore, ValueType};

/// A data match: the rendering shown to the user, and where in that
/// rendering the match sits (`None` when it cannot be positioned).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMatch {
    pub display: String,
    pub location: Option<TextMatch>,
}

/// Applies the text and byte interpretations of one query to value data,
/// choosing views by the value's [`DataClass`].
#[derive(Debug, Clone, Copy)]
pub struct DataInterpreter<'a> {
    matcher: &'a PatternMatcher,
    bytes: &'a ByteQuery,
}

impl<'a> DataInterpreter<'a> {
    pub fn new(matcher: &'a PatternMatcher, bytes: &'a ByteQuery) -> Self {
        Self { matcher, bytes }
    }

    /// Matches `data` of (normalized) type `ty`.
    pub fn match_data<S>(&self, store: &S, ty: ValueType, data: &[u8]) -> Option<DataMatch>
    where
        S: KeyStore + ?Sized,
    {
        match ty.class() {
            DataClass::Text => self.match_text(store, ty, data),
            DataClass::Binary => self.match_binary(store, ty, data),
            DataClass::Other => {
                let display = store.format_value_data_for_display(ty, data);
                let location = self.matcher.locate(&display)?;
                Some(DataMatch {
                    display,
                    location: Some(location),
                })
            }
        }
    }

    fn match_text<S>(&self, store: &S, ty: ValueType, data: &[u8]) -> Option<DataMatch>
    where
        S: KeyStore + ?Sized,
    {
        let decoded = string_text(data);
        let hit = self.matcher.locate(&decoded)?;
        let display = store.format_value_data(ty, data);
        // Providers may render differently from the raw decode; prefer a
        // position in what is actually shown.
        let location = self.matcher.locate(&display).or(Some(hit));
        Some(DataMatch { display, location })
    }

    fn match_binary<S>(&self, store: &S, ty: ValueType, data: &[u8]) -> Option<DataMatch>
    where
        S: KeyStore + ?Sized,
    {
        if !self.bytes.is_hex_parseable() {
            return None;
        }

        if let (Some(index), Some(needle)) = (self.bytes.find_in(data), self.bytes.bytes()) {
            let count = needle.len();
            // Each byte renders as two digits plus a separator; the last has none.
            let location = (index + count <= PREVIEW_BYTES).then(|| TextMatch {
                start: index * 3,
                len: count * 3 - 1,
            });
            return Some(DataMatch {
                display: store.format_value_data_for_display(ty, data),
                location,
            });
        }

        let as_text = self.matcher.is_match(&decode_latin1(data))
            || (data.len() % 2 == 0 && self.matcher.is_match(&decode_utf16le(data)));
        as_text.then(|| DataMatch {
            display: store.format_value_data_for_display(ty, data),
            location: None,
        })
    }
}
