use crate::error::ManifestError;
use anyhow::{Context, Result};
use fs2::FileExt;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};

/// Checksum column value for zero-byte pseudo-directory placeholders.
pub const FOLDER_SENTINEL: &str = "-FOLDER-";

/// Every manifest path starts with this directory.
pub const DATA_DIR: &str = "data";

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Checksum {
    /// Lowercase hex MD5 digest.
    Md5(String),
    /// Placeholder: never downloaded, never checksummed.
    Folder,
}

impl Checksum {
    /// Parse the first column of a manifest line.
    pub fn parse(s: &str) -> Option<Self> {
        if s == FOLDER_SENTINEL {
            return Some(Checksum::Folder);
        }
        if !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(Checksum::Md5(s.to_ascii_lowercase()))
        } else {
            None
        }
    }

    /// Normalise a hash as reported by the storage listing (may be quoted, any case).
    pub fn from_reported(hash: &str) -> Option<Self> {
        let h = hash.trim().trim_matches('"');
        match Checksum::parse(h)? {
            Checksum::Folder => None,
            md5 => Some(md5),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Checksum::Md5(hex) => hex,
            Checksum::Folder => FOLDER_SENTINEL,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, Checksum::Folder)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `data/<container>/<relative_name>`, always with forward slashes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ManifestPath {
    pub container: String,
    pub relative_name: String,
}

impl ManifestPath {
    pub fn new(container: &str, relative_name: &str) -> Self {
        Self {
            container: container.to_string(),
            relative_name: relative_name.to_string(),
        }
    }

    /// Split a manifest path into its container and object name.
    /// Returns `None` for anything not rooted at `data/<container>/`.
    pub fn parse(path: &str) -> Option<Self> {
        let rest = path.strip_prefix(DATA_DIR)?.strip_prefix('/')?;
        let (container, name) = rest.split_once('/')?;
        if container.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(container, name))
    }
}

impl fmt::Display for ManifestPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", DATA_DIR, self.container, self.relative_name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestEntry {
    pub checksum: Checksum,
    pub path: ManifestPath,
}

impl ManifestEntry {
    pub fn new(container: &str, name: &str, checksum: Checksum) -> Self {
        Self {
            checksum,
            path: ManifestPath::new(container, name),
        }
    }

    /// Serialised form without the trailing newline.
    pub fn to_line(&self) -> String {
        format!("{}\t{}", self.checksum, self.path)
    }

    /// Parse one manifest line; `line` is 1-based and only used for error reporting.
    pub fn parse_line(line: usize, text: &str) -> Result<Self, ManifestError> {
        let Some((sum, path)) = text.split_once('\t') else {
            return Err(ManifestError::MissingTab { line });
        };
        let checksum = Checksum::parse(sum).ok_or_else(|| ManifestError::BadChecksum {
            line,
            value: sum.to_string(),
        })?;
        let path = ManifestPath::parse(path).ok_or_else(|| ManifestError::BadPath {
            line,
            path: path.to_string(),
        })?;
        Ok(Self { checksum, path })
    }
}

/// Append-only manifest handle. Holds an exclusive advisory lock until
/// [`finish`](Self::finish) or drop; dropping still flushes buffered lines.
pub struct ManifestWriter {
    out: BufWriter<File>,
    path: PathBuf,
    written: usize,
}

impl ManifestWriter {
    pub fn append_to(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open manifest {:?}", path))?;
        file.lock_exclusive()
            .with_context(|| format!("lock manifest {:?}", path))?;
        Ok(Self {
            out: BufWriter::new(file),
            path: path.to_path_buf(),
            written: 0,
        })
    }

    pub fn append(&mut self, entry: &ManifestEntry) -> Result<()> {
        writeln!(self.out, "{}", entry.to_line())
            .with_context(|| format!("append to {:?}", self.path))?;
        self.written += 1;
        Ok(())
    }

    /// Flush, fsync and release the lock. Returns the number of lines written.
    pub fn finish(mut self) -> Result<usize> {
        let path = &self.path;
        self.out.flush().with_context(|| format!("flush {path:?}"))?;
        let file = self.out.get_ref();
        file.sync_all().with_context(|| format!("sync {path:?}"))?;
        file.unlock().with_context(|| format!("unlock {path:?}"))?;
        Ok(self.written)
    }
}

/// Streams `(line_number, entry)` pairs in file order. Blank lines are skipped.
pub struct ManifestReader<R> {
    lines: Lines<R>,
    line_no: usize,
}

impl ManifestReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let f = File::open(path).with_context(|| format!("open manifest {:?}", path))?;
        Ok(Self::new(BufReader::new(f)))
    }
}

impl<R: BufRead> ManifestReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
        }
    }
}

impl<R: BufRead> Iterator for ManifestReader<R> {
    type Item = Result<(usize, ManifestEntry)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.lines.next()?;
            self.line_no += 1;
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    let n = self.line_no;
                    return Some(Err(e).with_context(|| format!("read manifest line {n}")));
                }
            };
            if line.is_empty() {
                continue;
            }
            return Some(
                ManifestEntry::parse_line(self.line_no, &line)
                    .map(|e| (self.line_no, e))
                    .map_err(Into::into),
            );
        }
    }
}

/// Load every entry of a manifest file, in order.
pub fn read_all(path: &Path) -> Result<Vec<ManifestEntry>> {
    ManifestReader::open(path)?
        .map(|r| r.map(|(_, e)| e))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_line_splits_container_and_name() {
        let line = "d41d8cd98f00b204e9800998ecf8427e\tdata/photos/2016/a b.jpg";
        let e = ManifestEntry::parse_line(1, line).unwrap();
        assert_eq!(e.path.container, "photos");
        assert_eq!(e.path.relative_name, "2016/a b.jpg");
        assert_eq!(e.to_line(), line);
    }

    #[test]
    fn folder_sentinel_round_trips() {
        let e = ManifestEntry::parse_line(3, "-FOLDER-\tdata/c/dir/").unwrap();
        assert!(e.checksum.is_folder());
        assert_eq!(e.path.relative_name, "dir/");
    }

    #[test]
    fn malformed_lines_name_their_line_number() {
        assert_eq!(
            ManifestEntry::parse_line(7, "abc data/c/x"),
            Err(ManifestError::MissingTab { line: 7 })
        );
        assert!(matches!(
            ManifestEntry::parse_line(8, "zz!\tdata/c/x"),
            Err(ManifestError::BadChecksum { line: 8, .. })
        ));
        assert!(matches!(
            ManifestEntry::parse_line(9, "abcd\tother/c/x"),
            Err(ManifestError::BadPath { line: 9, .. })
        ));
        assert!(ManifestPath::parse("data/c").is_none());
        assert!(ManifestPath::parse("data//x").is_none());
    }

    #[test]
    fn reported_hash_is_normalised() {
        assert_eq!(
            Checksum::from_reported("\"ABCDEF\""),
            Some(Checksum::Md5("abcdef".to_string()))
        );
        assert_eq!(Checksum::from_reported(""), None);
        assert_eq!(Checksum::from_reported(FOLDER_SENTINEL), None);
    }

    #[test]
    fn reader_skips_blank_lines_and_tracks_numbers() {
        let text = "aa\tdata/c/one\n\nbb\tdata/c/two\r\n";
        let got: Vec<_> = ManifestReader::new(text.as_bytes())
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].0, 1);
        assert_eq!(got[1].0, 3);
        assert_eq!(got[1].1.path.relative_name, "two");
    }
}
