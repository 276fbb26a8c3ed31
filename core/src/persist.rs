use crate::error::{PipelineError, Result};
use crate::records::{DocId, DocInfoRecord, Edge, IndexedDocument};
use crate::stream::DumpStream;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Output locations of the term-frequency pipeline.
#[derive(Debug, Clone)]
pub struct TermPaths {
    pub tf: PathBuf,
    pub doc_info: PathBuf,
}

impl TermPaths {
    pub fn new<P: AsRef<Path>>(tf: P, doc_info: P) -> Self {
        Self { tf: tf.as_ref().to_path_buf(), doc_info: doc_info.as_ref().to_path_buf() }
    }
}

/// Receives worker results in the consuming loop. The only place that
/// touches output files.
pub trait ResultSink<T> {
    /// Append one result; returns how many records were written.
    fn write(&mut self, result: T) -> Result<u64>;
    fn flush(&mut self) -> Result<()>;
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

fn open_append(path: &Path) -> Result<File> {
    ensure_parent(path)?;
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// Ids already present in the document-info output. A missing file means a
/// fresh build; malformed lines are logged and skipped.
pub fn load_processed_ids(path: &Path) -> Result<HashSet<DocId>> {
    let mut ids = HashSet::new();
    if !path.exists() {
        tracing::info!(path = %path.display(), "no document-info file found, starting a new run");
        return Ok(ids);
    }

    for (n, line) in DumpStream::open(path)?.lines().enumerate() {
        if line.trim().is_empty() { continue; }
        match serde_json::from_str::<DocInfoRecord>(&line) {
            Ok(info) => { ids.insert(info.id); }
            Err(e) => {
                let err = PipelineError::MalformedRecord(format!("{}:{}: {e}", path.display(), n + 1));
                tracing::warn!(error = %err, "corrupt checkpoint line, skipping");
            }
        }
    }
    tracing::info!(processed = ids.len(), "resume set built");
    Ok(ids)
}

/// Append-only writer for the term-frequency and document-info files.
///
/// The term-frequency line of a document is flushed before its
/// document-info line is written, so every id in document-info has a
/// complete term-frequency line. The reverse does not hold: if the
/// document-info write fails after that flush, the term-frequency file keeps
/// an id the checkpoint lacks, and a resumed run writes it a second time.
/// Readers of the term-frequency file should keep the last line per id.
pub struct TermWriter {
    tf: BufWriter<File>,
    doc_info: BufWriter<File>,
}

impl TermWriter {
    pub fn open(paths: &TermPaths) -> Result<Self> {
        Ok(Self { tf: BufWriter::new(open_append(&paths.tf)?), doc_info: BufWriter::new(open_append(&paths.doc_info)?) })
    }
}

impl ResultSink<IndexedDocument> for TermWriter {
    fn write(&mut self, doc: IndexedDocument) -> Result<u64> {
        serde_json::to_writer(&mut self.tf, &doc.tf)?;
        self.tf.write_all(b"\n")?;
        self.tf.flush()?;
        serde_json::to_writer(&mut self.doc_info, &doc.info)?;
        self.doc_info.write_all(b"\n")?;
        self.doc_info.flush()?;
        Ok(1)
    }

    fn flush(&mut self) -> Result<()> {
        self.tf.flush()?;
        self.doc_info.flush()?;
        Ok(())
    }
}

/// `from,to` lines. The file is truncated when the writer is created.
pub struct EdgeWriter {
    out: BufWriter<File>,
}

impl EdgeWriter {
    pub fn create(path: &Path) -> Result<Self> {
        ensure_parent(path)?;
        Ok(Self { out: BufWriter::with_capacity(1024 * 1024, File::create(path)?) })
    }
}

impl ResultSink<Vec<Edge>> for EdgeWriter {
    fn write(&mut self, edges: Vec<Edge>) -> Result<u64> {
        for edge in &edges {
            writeln!(self.out, "{},{}", edge.from, edge.to)?;
        }
        Ok(edges.len() as u64)
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::TermFrequencyRecord;
    use std::collections::BTreeMap;
    use std::fs;

    fn indexed(id: DocId, title: &str) -> IndexedDocument {
        let mut terms = BTreeMap::new();
        terms.insert("term".to_string(), 1.0);
        IndexedDocument {
            tf: TermFrequencyRecord { id, terms },
            info: DocInfoRecord { id, title: title.to_string(), len: 1 },
        }
    }

    #[test]
    fn missing_checkpoint_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ids = load_processed_ids(&dir.path().join("doc_info.jsonl")).unwrap();
        assert!(ids.is_empty());
    }

    #[test]
    fn checkpoint_skips_corrupt_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc_info.jsonl");
        fs::write(&path, "{\"id\": 1, \"title\": \"A\", \"len\": 2}\n{\"id\": 2, \"tit\n\n{\"id\":3,\"title\":\"C\",\"len\":0}\n").unwrap();
        let ids = load_processed_ids(&path).unwrap();
        assert_eq!(ids, [1, 3].into_iter().collect::<HashSet<DocId>>());
    }

    #[test]
    fn term_writer_appends() {
        let dir = tempfile::tempdir().unwrap();
        let paths = TermPaths::new(dir.path().join("out/tf.jsonl"), dir.path().join("out/doc.jsonl"));
        {
            let mut w = TermWriter::open(&paths).unwrap();
            assert_eq!(w.write(indexed(1, "One")).unwrap(), 1);
        }
        {
            let mut w = TermWriter::open(&paths).unwrap();
            w.write(indexed(2, "Two")).unwrap();
        }
        let doc = fs::read_to_string(&paths.doc_info).unwrap();
        let lines: Vec<DocInfoRecord> = doc.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2]);

        let tf = fs::read_to_string(&paths.tf).unwrap();
        let first: serde_json::Value = serde_json::from_str(tf.lines().next().unwrap()).unwrap();
        assert_eq!(first["id"], 1);
        assert_eq!(first["terms"]["term"], 1.0);
    }

    #[test]
    fn edge_writer_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph/out/pagelinks.csv");
        let mut w = EdgeWriter::create(&path).unwrap();
        w.write(vec![Edge { from: 1, to: 2 }]).unwrap();
        w.flush().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "1,2\n");
    }

    #[test]
    fn edge_writer_truncates_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pagelinks.csv");
        fs::write(&path, "stale\n").unwrap();
        let mut w = EdgeWriter::create(&path).unwrap();
        assert_eq!(w.write(vec![Edge { from: 7, to: 100 }, Edge { from: 7, to: 100 }]).unwrap(), 2);
        assert_eq!(w.write(Vec::new()).unwrap(), 0);
        w.flush().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "7,100\n7,100\n");
    }
}
