//! Rules deciding how a listed object becomes (or does not become) a manifest line.

use crate::manifest::Checksum;
use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;

/// Suffix the large-object splitter appends to segment object names.
pub const DEFAULT_SEGMENT_PATTERN: &str = r"!CB_[^/]+$";

/// What a zero-byte object is taken to be.
///
/// Object stores report a checksum for zero-byte placeholder objects that
/// does not describe any real content, and a genuine empty file cannot be
/// told apart from a placeholder by size alone. `Folder` accepts the risk of
/// flagging a real empty file as "do not download".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZeroLengthPolicy {
    #[default]
    Folder,
    File,
}

impl ZeroLengthPolicy {
    /// Manifest checksum for an object of `size` bytes reporting `hash`.
    /// `None` when the reported hash is unusable.
    pub fn checksum_for(self, size: u64, hash: &str) -> Option<Checksum> {
        if size == 0 && self == ZeroLengthPolicy::Folder {
            return Some(Checksum::Folder);
        }
        Checksum::from_reported(hash)
    }
}

/// Recognises auto-generated large-object segments by name.
#[derive(Clone, Debug)]
pub struct SegmentFilter {
    re: Regex,
}

impl SegmentFilter {
    pub fn new(pattern: &str) -> Result<Self> {
        let re = Regex::new(pattern).with_context(|| format!("segment pattern {:?}", pattern))?;
        Ok(Self { re })
    }

    pub fn is_segment(&self, name: &str) -> bool {
        self.re.is_match(name)
    }
}

impl Default for SegmentFilter {
    fn default() -> Self {
        Self {
            re: Regex::new(DEFAULT_SEGMENT_PATTERN).expect("default segment pattern"),
        }
    }
}

/// Tab and line breaks cannot be stored in a tab-separated, line-oriented manifest.
pub fn is_representable(name: &str) -> bool {
    !name.contains(['\t', '\n', '\r'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_marker_only_counts_in_last_segment() {
        let f = SegmentFilter::default();
        assert!(f.is_segment("backup/big.vhd!CB_000017"));
        assert!(f.is_segment("big.vhd!CB_x"));
        assert!(!f.is_segment("backup/big.vhd!CB_000017/readme.txt"));
        assert!(!f.is_segment("plain/file.txt"));
        assert!(!f.is_segment("trailing!CB_"));
    }

    #[test]
    fn zero_length_policy() {
        let bogus = "d41d8cd98f00b204e9800998ecf8427e";
        assert_eq!(
            ZeroLengthPolicy::Folder.checksum_for(0, bogus),
            Some(Checksum::Folder)
        );
        assert_eq!(
            ZeroLengthPolicy::File.checksum_for(0, bogus),
            Some(Checksum::Md5(bogus.to_string()))
        );
        assert_eq!(
            ZeroLengthPolicy::Folder.checksum_for(5, "ABC"),
            Some(Checksum::Md5("abc".to_string()))
        );
    }

    #[test]
    fn control_characters_are_unrepresentable() {
        assert!(is_representable("a/b c.txt"));
        assert!(!is_representable("a\tb"));
        assert!(!is_representable("a\nb"));
    }
}
