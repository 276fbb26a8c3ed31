//! Forward-only, lossy UTF-8 reading of (possibly compressed) dump files.
//!
//! A [`DumpStream`] never materializes the archive: it decompresses through a
//! 1 MiB buffer and hands out one line at a time. Invalid byte sequences are
//! replaced with U+FFFD instead of failing, and a read error in the middle of
//! the stream ends it as if it were end-of-input (the error is logged).

use crate::error::{PipelineError, Result};
use bzip2::read::MultiBzDecoder;
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

const READ_BUFFER: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Bzip2,
    Gzip,
    Plain,
}

impl Compression {
    /// Guess the format from the file extension.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("bz2") => Compression::Bzip2,
            Some("gz") => Compression::Gzip,
            _ => Compression::Plain,
        }
    }
}

/// An open dump file. Consumed by [`DumpStream::lines`] or
/// [`DumpStream::into_reader`]; the file handle is released on drop.
pub struct DumpStream {
    reader: LossyUtf8<Box<dyn BufRead + Send>>,
}

impl DumpStream {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let compression = Compression::from_path(path.as_ref());
        Self::open_with(path, compression)
    }

    pub fn open_with(path: impl AsRef<Path>, compression: Compression) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => PipelineError::InputNotFound(path.clone()),
            _ => PipelineError::Io(e),
        })?;

        let inner: Box<dyn BufRead + Send> = match compression {
            Compression::Bzip2 => Box::new(BufReader::with_capacity(READ_BUFFER, MultiBzDecoder::new(file))),
            Compression::Gzip => Box::new(BufReader::with_capacity(READ_BUFFER, MultiGzDecoder::new(file))),
            Compression::Plain => Box::new(BufReader::with_capacity(READ_BUFFER, file)),
        };
        tracing::debug!(path = %path.display(), ?compression, "opened dump stream");

        let source = path.display().to_string();
        Ok(Self { reader: LossyUtf8::new(inner, source) })
    }

    /// Lazy, finite, non-restartable sequence of lines without their terminator.
    pub fn lines(self) -> Lines<Box<dyn BufRead + Send>> {
        Lines { reader: self.reader }
    }

    /// The decoded byte stream, for extractors that parse their own grammar.
    pub fn into_reader(self) -> LossyUtf8<Box<dyn BufRead + Send>> {
        self.reader
    }
}

/// `BufRead` adapter that guarantees valid UTF-8 output.
///
/// Works one line at a time, so at most one line of the input is held in
/// memory. Errors from the inner reader are logged and reported as EOF.
pub struct LossyUtf8<R> {
    inner: R,
    source: String,
    raw: Vec<u8>,
    line: Vec<u8>,
    pos: usize,
    finished: bool,
    substituted: u64,
}

impl<R: BufRead> LossyUtf8<R> {
    pub fn new(inner: R, source: impl Into<String>) -> Self {
        Self {
            inner,
            source: source.into(),
            raw: Vec::new(),
            line: Vec::new(),
            pos: 0,
            finished: false,
            substituted: 0,
        }
    }

    fn refill(&mut self) {
        self.raw.clear();
        self.line.clear();
        self.pos = 0;
        if self.finished { return; }

        match self.inner.read_until(b'\n', &mut self.raw) {
            Ok(0) => self.finish(),
            Ok(_) => {
                if std::str::from_utf8(&self.raw).is_ok() {
                    std::mem::swap(&mut self.line, &mut self.raw);
                } else {
                    if self.substituted == 0 {
                        let err = PipelineError::Decode(format!("invalid UTF-8 in {}", self.source));
                        tracing::warn!(error = %err, "substituting U+FFFD and continuing");
                    }
                    self.substituted += 1;
                    self.line = String::from_utf8_lossy(&self.raw).into_owned().into_bytes();
                }
            }
            Err(e) => {
                tracing::error!(source = %self.source, error = %e, "read failed mid-stream, treating as end of input");
                self.finish();
            }
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        if self.substituted > 0 {
            tracing::info!(source = %self.source, lines = self.substituted, "stream finished with substituted bytes");
        }
    }
}

impl<R: BufRead> Read for LossyUtf8<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl<R: BufRead> BufRead for LossyUtf8<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.pos >= self.line.len() {
            self.refill();
        }
        Ok(&self.line[self.pos..])
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.line.len());
    }
}

pub struct Lines<R> {
    reader: LossyUtf8<R>,
}

impl<R: BufRead> Iterator for Lines<R> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => {
                if line.ends_with('\n') {
                    line.pop();
                    if line.ends_with('\r') { line.pop(); }
                }
                Some(line)
            }
            Err(e) => {
                tracing::error!(source = %self.reader.source, error = %e, "line decoding failed, ending stream");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn plain_lines_with_replacement() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "plain.txt", b"hello\r\nw\xffrld\nlast");
        let lines: Vec<String> = DumpStream::open(&path).unwrap().lines().collect();
        assert_eq!(lines, vec!["hello", "w\u{FFFD}rld", "last"]);
    }

    #[test]
    fn gzip_members_are_concatenated() {
        let mut bytes = Vec::new();
        for chunk in [&b"first\n"[..], &b"second\n"[..]] {
            let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            enc.write_all(chunk).unwrap();
            bytes.extend(enc.finish().unwrap());
        }
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "links.sql.gz", &bytes);
        let lines: Vec<String> = DumpStream::open(&path).unwrap().lines().collect();
        assert_eq!(lines, vec!["first", "second"]);
    }

    #[test]
    fn bzip2_multistream() {
        let mut bytes = Vec::new();
        for chunk in [&b"<a/>\n"[..], &b"<b/>\n"[..]] {
            let mut enc = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
            enc.write_all(chunk).unwrap();
            bytes.extend(enc.finish().unwrap());
        }
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "pages.xml.bz2", &bytes);
        let lines: Vec<String> = DumpStream::open(&path).unwrap().lines().collect();
        assert_eq!(lines, vec!["<a/>", "<b/>"]);
    }

    #[test]
    fn missing_file_is_input_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = DumpStream::open(dir.path().join("nope.xml.bz2")).err().unwrap();
        assert!(matches!(err, PipelineError::InputNotFound(_)));
    }

    #[test]
    fn truncated_archive_ends_early() {
        let mut enc = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        for i in 0..2000 {
            writeln!(enc, "line {i} with some padding to make the block larger").unwrap();
        }
        let mut bytes = enc.finish().unwrap();
        bytes.truncate(bytes.len() / 2);
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "broken.bz2", &bytes);
        let lines: Vec<String> = DumpStream::open(&path).unwrap().lines().collect();
        assert!(lines.len() < 2000);
    }
}
