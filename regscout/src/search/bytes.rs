/// Characters allowed between hex digits.
const SEPARATORS: [char; 6] = [' ', '\t', ',', ';', '-', ':'];

/// The query text read as a hexadecimal byte sequence, used to search binary
/// value data.
///
/// `"0xABCD"`, `"AB CD"`, `"ab-cd"` and `"AB,CD"` all parse to `[0xAB, 0xCD]`.
/// An odd number of digits gets a leading zero (`"ABC"` is `[0x0A, 0xBC]`).
/// Any character that is neither a hex digit nor a separator marks the query
/// as not hex-parseable, and binary data is then not searched at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteQuery {
    bytes: Option<Vec<u8>>,
    hex_parseable: bool,
    decimal_only: bool,
}

impl ByteQuery {
    pub fn parse(query: &str) -> Self {
        let trimmed = query.trim();
        let body = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        let mut digits = String::with_capacity(body.len() + 1);
        for c in body.chars() {
            if c.is_ascii_hexdigit() {
                digits.push(c);
            } else if !SEPARATORS.contains(&c) {
                return Self::not_hex();
            }
        }

        let decimal_only = !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit());
        if digits.len() % 2 == 1 {
            digits.insert(0, '0');
        }

        let bytes: Vec<u8> = digits
            .as_bytes()
            .chunks_exact(2)
            .filter_map(|pair| {
                std::str::from_utf8(pair)
                    .ok()
                    .and_then(|s| u8::from_str_radix(s, 16).ok())
            })
            .collect();

        Self {
            bytes: (!bytes.is_empty()).then_some(bytes),
            hex_parseable: true,
            decimal_only,
        }
    }

    fn not_hex() -> Self {
        Self {
            bytes: None,
            hex_parseable: false,
            decimal_only: false,
        }
    }

    /// Whether the query contained only hex digits, separators and an
    /// optional `0x` prefix.
    pub fn is_hex_parseable(&self) -> bool {
        self.hex_parseable
    }

    /// The parsed bytes; `None` when not hex-parseable or no digits were given.
    pub fn bytes(&self) -> Option<&[u8]> {
        self.bytes.as_deref()
    }

    pub fn is_decimal_only(&self) -> bool {
        self.decimal_only
    }

    /// Index of the first occurrence of the parsed bytes in `haystack`.
    pub fn find_in(&self, haystack: &[u8]) -> Option<usize> {
        let needle = self.bytes.as_deref()?;
        if needle.len() > haystack.len() {
            return None;
        }
        haystack
            .windows(needle.len())
            .position(|window| window == needle)
    }
}
