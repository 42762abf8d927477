use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// NFKD decompose, drop combining marks, then drop anything still outside
/// printable ASCII. "São Paulo" becomes "Sao Paulo"; already-ASCII input
/// passes through unchanged, so the fold is idempotent.
pub fn ascii_fold(s: &str) -> String {
    s.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| c.is_ascii() && !c.is_ascii_control())
        .collect()
}

/// Normalize one token: ASCII fold plus whitespace trim.
pub fn normalize_token(s: &str) -> String {
    ascii_fold(s).trim().to_string()
}

/// Split a raw location string on the literal ", " separator and normalize
/// each segment. A string with no comma yields a single-token sequence.
/// Segments that normalize to nothing are discarded.
pub fn tokenize(raw: &str) -> Vec<String> {
    raw.split(", ")
        .map(normalize_token)
        .filter(|t| !t.is_empty())
        .collect()
}
