//! Fixed-width containers for entry metadata.
//!
//! Every metadata field of an entry has a fixed width. Oversized input is
//! truncated on write, never rejected:
//!
//! | Field | Width | Policy |
//! |-------|-------|--------|
//! | application name | [`APPLICATION_NAME_LEN`] bytes | cut at the last UTF-8 boundary that fits |
//! | error message | [`ERROR_MESSAGE_LEN`] bytes | same |
//! | SQLSTATE code | [`SQLCODE_LEN`] bytes | same |
//! | command tag | [`CMD_LEN`] bytes each | same |
//! | command tags | [`CMD_LST`] tags | extra tags dropped, first ones kept |
//! | relations | [`REL_LST`] ids | extra ids dropped, first ones kept |

use std::fmt;
use std::ops::Deref;

use serde::{Serialize, Serializer};
use smallvec::SmallVec;

pub const APPLICATION_NAME_LEN: usize = 100;
pub const ERROR_MESSAGE_LEN: usize = 100;
pub const SQLCODE_LEN: usize = 5;
pub const CMD_LEN: usize = 20;
pub const CMD_LST: usize = 10;
pub const REL_LST: usize = 10;

/// Longest prefix of `s` that fits in `max` bytes without splitting a char.
#[must_use]
pub fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// A string holding at most `N` bytes.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct BoundedString<const N: usize>(String);

impl<const N: usize> BoundedString<N> {
    pub const CAPACITY: usize = N;

    #[must_use]
    pub const fn new() -> Self {
        Self(String::new())
    }

    /// Build from `s`, truncating to `N` bytes.
    #[must_use]
    pub fn truncated(s: &str) -> Self {
        Self(truncate_utf8(s, N).to_string())
    }

    /// Overwrite in place, truncating to `N` bytes.
    pub fn set(&mut self, s: &str) {
        self.0.clear();
        self.0.push_str(truncate_utf8(s, N));
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<const N: usize> Deref for BoundedString<N> {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl<const N: usize> fmt::Debug for BoundedString<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl<const N: usize> fmt::Display for BoundedString<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<const N: usize> Serialize for BoundedString<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

pub type CommandTag = BoundedString<CMD_LEN>;
pub type CommandTags = SmallVec<[CommandTag; CMD_LST]>;
pub type RelationIds = SmallVec<[u32; REL_LST]>;

/// Keep the first [`REL_LST`] relation ids.
#[must_use]
pub fn clamp_relations(ids: &[u32]) -> RelationIds {
    ids.iter().copied().take(REL_LST).collect()
}

/// Keep the first [`CMD_LST`] tags, each cut to [`CMD_LEN`] bytes.
#[must_use]
pub fn clamp_command_tags<S: AsRef<str>>(tags: &[S]) -> CommandTags {
    tags.iter()
        .take(CMD_LST)
        .map(|t| CommandTag::truncated(t.as_ref()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_utf8("hello", 10), "hello");
        assert_eq!(truncate_utf8("hello", 3), "hel");
        // 'é' is two bytes; cutting inside it backs off to the boundary.
        assert_eq!(truncate_utf8("café", 4), "caf");
        assert_eq!(truncate_utf8("", 0), "");
    }

    #[test]
    fn bounded_string_truncates_on_write() {
        let mut s = BoundedString::<4>::truncated("abcdefg");
        assert_eq!(s.as_str(), "abcd");
        s.set("xy");
        assert_eq!(&*s, "xy");
        assert_eq!(BoundedString::<4>::CAPACITY, 4);
    }

    #[test]
    fn application_name_is_clamped() {
        let long = "a".repeat(APPLICATION_NAME_LEN + 50);
        let name = BoundedString::<APPLICATION_NAME_LEN>::truncated(&long);
        assert_eq!(name.len(), APPLICATION_NAME_LEN);
    }

    #[test]
    fn lists_keep_leading_items() {
        let ids: Vec<u32> = (0..25).collect();
        let clamped = clamp_relations(&ids);
        assert_eq!(clamped.len(), REL_LST);
        assert_eq!(clamped[0], 0);
        assert_eq!(clamped[REL_LST - 1], 9);

        let tags = ["SELECT", "A_VERY_LONG_COMMAND_TAG_NAME"];
        let clamped = clamp_command_tags(&tags);
        assert_eq!(clamped.len(), 2);
        assert_eq!(clamped[1].len(), CMD_LEN);
    }

    #[test]
    fn serializes_as_plain_string() {
        let s = BoundedString::<8>::truncated("select 1");
        assert_eq!(serde_json::to_string(&s).unwrap(), "\"select 1\"");
    }
}
