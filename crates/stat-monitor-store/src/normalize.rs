//! Literal-to-placeholder normalization of statement texts.
//!
//! Fingerprinting itself (parsing a statement and locating its constants) is
//! the job of a [`Fingerprinter`] supplied by the host. This module only
//! rewrites the raw text given the literal spans it reported.

use serde::{Deserialize, Serialize};

/// Byte span of one literal constant in the raw text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LiteralSpan {
    pub location: usize,
    /// `None` when the fingerprinter could not measure the literal; such
    /// spans are left untouched.
    pub length: Option<usize>,
}

impl LiteralSpan {
    #[must_use]
    pub const fn new(location: usize, length: usize) -> Self {
        Self {
            location,
            length: Some(length),
        }
    }
}

/// Result of fingerprinting one raw statement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFingerprint {
    pub query_id: u64,
    pub literals: Vec<LiteralSpan>,
    /// Highest `$n` already used by the statement itself. Generated
    /// placeholders are numbered after it.
    pub highest_extern_param_id: u32,
}

/// Computes the fingerprint of a raw statement.
pub trait Fingerprinter: Send + Sync {
    fn fingerprint(&self, raw: &str) -> QueryFingerprint;
}

/// Replace every literal span of `raw` with `$n`.
///
/// Spans are applied in location order. Spans that overlap an earlier one,
/// run past the end of the text or split a UTF-8 character are skipped.
/// Once placeholder numbers are exhausted the remaining literals stay as
/// written.
#[must_use]
pub fn normalize_query(raw: &str, fingerprint: &QueryFingerprint) -> String {
    let mut spans: Vec<(usize, usize)> = fingerprint
        .literals
        .iter()
        .filter_map(|s| s.length.map(|len| (s.location, len)))
        .collect();
    spans.sort_unstable();

    let mut out = String::with_capacity(raw.len() + spans.len() * 2);
    let mut last_end = 0usize;
    let mut next_param = fingerprint.highest_extern_param_id;

    for (location, len) in spans {
        let Some(end) = location.checked_add(len) else {
            continue;
        };
        if location < last_end
            || end > raw.len()
            || !raw.is_char_boundary(location)
            || !raw.is_char_boundary(end)
        {
            continue;
        }
        let Some(param) = next_param.checked_add(1) else {
            break;
        };
        next_param = param;
        out.push_str(&raw[last_end..location]);
        out.push('$');
        out.push_str(&next_param.to_string());
        last_end = end;
    }
    out.push_str(&raw[last_end..]);
    out
}
