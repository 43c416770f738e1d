use anyhow::{Context, Result};
use md5::{Digest, Md5};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

const READ_BUF: usize = 1 << 20;

/// Lowercase hex MD5 of an in-memory buffer.
pub fn md5_hex(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

/// Lowercase hex MD5 of a file, streamed in 1 MiB reads.
pub fn file_md5_hex(path: &Path) -> Result<String> {
    let mut f = File::open(path).with_context(|| format!("open {:?}", path))?;
    let mut h = Md5::new();
    let mut buf = vec![0u8; READ_BUF];
    loop {
        let n = f.read(&mut buf).with_context(|| format!("read {path:?}"))?;
        if n == 0 {
            break;
        }
        h.update(&buf[..n]);
    }
    Ok(hex::encode(h.finalize()))
}

/// Writer adapter that hashes everything passing through it.
pub struct Md5Writer<W> {
    inner: W,
    hasher: Md5,
}

impl<W: Write> Md5Writer<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Md5::new(),
        }
    }

    pub fn finish(mut self) -> io::Result<(W, String)> {
        self.inner.flush()?;
        Ok((self.inner, hex::encode(self.hasher.finalize())))
    }
}

impl<W: Write> Write for Md5Writer<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
