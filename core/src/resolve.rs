//! Link-target id -> document id resolution for the link graph.
//!
//! Every link-graph worker builds its own [`ResolutionMap`] once, before it
//! takes any work, and only reads it afterwards.

use crate::error::{PipelineError, Result};
use crate::pool::CancelToken;
use crate::records::{DocId, DocInfoRecord, Edge, TargetId};
use crate::sql;
use crate::stream::DumpStream;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const TITLE_REPORT_EVERY: u64 = 2_000_000;
const TARGET_REPORT_EVERY: u64 = 1_000_000;
const CANCEL_CHECK_EVERY: u64 = 10_000;

/// Where a worker reads its resolution inputs from.
#[derive(Debug, Clone)]
pub struct LinkSources {
    pub doc_info: PathBuf,
    pub linktarget: PathBuf,
}

/// Document titles use spaces; link targets use underscores.
pub fn normalize_title(title: &str) -> String {
    title.trim().replace(' ', "_")
}

/// Phase A: `normalized title -> document id` from the document-info output.
pub fn titles_from_doc_info(path: &Path, cancel: &CancelToken) -> Result<HashMap<String, DocId>> {
    let mut titles = HashMap::new();
    let mut seen = 0u64;
    let mut loaded = 0u64;

    for line in DumpStream::open(path)?.lines() {
        seen += 1;
        if seen % CANCEL_CHECK_EVERY == 0 && cancel.is_cancelled() {
            return Err(PipelineError::Interrupted);
        }
        if line.trim().is_empty() { continue; }
        match serde_json::from_str::<DocInfoRecord>(&line) {
            Ok(info) => {
                titles.insert(normalize_title(&info.title), info.id);
                loaded += 1;
                if loaded % TITLE_REPORT_EVERY == 0 {
                    tracing::info!(loaded, titles = titles.len(), "loading titles");
                }
            }
            Err(e) => tracing::debug!(line = seen, error = %e, "skipping malformed document-info line"),
        }
    }
    Ok(titles)
}

#[derive(Debug, Default, Clone)]
pub struct ResolutionMap {
    targets: HashMap<TargetId, DocId>,
}

impl ResolutionMap {
    /// Both phases. The title map of phase A is dropped on return.
    pub fn build(worker: usize, sources: &LinkSources, cancel: &CancelToken) -> Result<Self> {
        tracing::info!(worker, path = %sources.doc_info.display(), "step 1/2: loading document titles");
        let titles = titles_from_doc_info(&sources.doc_info, cancel)?;

        tracing::info!(worker, path = %sources.linktarget.display(), titles = titles.len(), "step 2/2: resolving link targets");
        let lines = DumpStream::open(&sources.linktarget)?.lines();
        let map = Self::from_link_targets(&titles, lines, cancel)?;

        tracing::info!(worker, targets = map.len(), "resolution map ready");
        Ok(map)
    }

    /// Phase B over the lines of a link-target SQL export. Targets whose title
    /// is not a known document are dropped.
    ///
    /// A single insert line can hold a megabyte of tuples, so cancellation is
    /// checked before every line.
    pub fn from_link_targets<I>(titles: &HashMap<String, DocId>, lines: I, cancel: &CancelToken) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut targets = HashMap::new();
        let mut resolved = 0u64;
        for line in lines {
            if cancel.is_cancelled() {
                return Err(PipelineError::Interrupted);
            }
            let Some(payload) = sql::insert_payload(&line) else { continue };
            for target in sql::link_targets(payload) {
                if let Some(&doc) = titles.get(&target.title) {
                    targets.insert(target.target_id, doc);
                    resolved += 1;
                    if resolved % TARGET_REPORT_EVERY == 0 {
                        tracing::info!(resolved, targets = targets.len(), "resolving link targets");
                    }
                }
            }
        }
        Ok(Self { targets })
    }

    pub fn resolve(&self, target: TargetId) -> Option<DocId> {
        self.targets.get(&target).copied()
    }

    pub fn len(&self) -> usize { self.targets.len() }

    pub fn is_empty(&self) -> bool { self.targets.is_empty() }

    /// Resolved edges of one page-link insert payload.
    pub fn edges(&self, payload: &str) -> Vec<Edge> {
        sql::page_links(payload)
            .filter_map(|(from, target)| self.resolve(target).map(|to| Edge { from, to }))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sources(dir: &Path) -> LinkSources {
        fs::write(
            dir.join("doc_info.jsonl"),
            concat!(
                "{\"id\": 100, \"title\": \"Example Page\", \"len\": 10}\n",
                "not json\n",
                "\n",
                "{\"id\": 101, \"title\": \"Rock 'n' roll\", \"len\": 3}\n",
            ),
        )
        .unwrap();
        fs::write(
            dir.join("linktarget.sql"),
            concat!(
                "-- MySQL dump\n",
                "INSERT INTO `linktarget` VALUES (5,0,'Example_Page'),(6,0,'Missing'),(8,0,'Rock_\\'n\\'_roll'),(9,4,'Example_Page');\n",
            ),
        )
        .unwrap();
        LinkSources { doc_info: dir.join("doc_info.jsonl"), linktarget: dir.join("linktarget.sql") }
    }

    #[test]
    fn resolves_main_namespace_targets() {
        let dir = tempfile::tempdir().unwrap();
        let map = ResolutionMap::build(0, &sources(dir.path()), &CancelToken::new()).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.resolve(5), Some(100));
        assert_eq!(map.resolve(8), Some(101));
        assert_eq!(map.resolve(6), None);
        assert_eq!(map.resolve(9), None);
    }

    #[test]
    fn builds_edges_from_page_links() {
        let dir = tempfile::tempdir().unwrap();
        let map = ResolutionMap::build(0, &sources(dir.path()), &CancelToken::new()).unwrap();
        let edges = map.edges("VALUES (7,0,5),(7,1,5),(3,0,6),(4,0,8);");
        assert_eq!(edges, vec![Edge { from: 7, to: 100 }, Edge { from: 4, to: 101 }]);
    }

    #[test]
    fn missing_inputs_fail_the_build() {
        let dir = tempfile::tempdir().unwrap();
        let mut src = sources(dir.path());
        src.linktarget = dir.path().join("absent.sql.gz");
        let err = ResolutionMap::build(0, &src, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, PipelineError::InputNotFound(_)));

        src.doc_info = dir.path().join("absent.jsonl");
        let err = ResolutionMap::build(0, &src, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, PipelineError::InputNotFound(_)));
    }

    #[test]
    fn cancelled_build_stops() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let titles = HashMap::new();
        let lines = vec!["INSERT INTO `linktarget` VALUES (1,0,'A');".to_string()];
        let err = ResolutionMap::from_link_targets(&titles, lines, &cancel).unwrap_err();
        assert!(matches!(err, PipelineError::Interrupted));
    }

    #[test]
    fn cancellation_is_seen_on_the_next_line() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let mut consumed = 0usize;
        let lines = (0..500).map(|n| {
            consumed += 1;
            if n == 1 { trigger.cancel(); }
            format!("INSERT INTO `linktarget` VALUES ({n},0,'Title_{n}');")
        });
        let mut titles = HashMap::new();
        titles.insert("Title_0".to_string(), 1);
        let err = ResolutionMap::from_link_targets(&titles, lines, &cancel).unwrap_err();
        assert!(matches!(err, PipelineError::Interrupted));
        assert_eq!(consumed, 2);
    }
}
