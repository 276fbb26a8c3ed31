use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type DocId = u64;
pub type TargetId = u64;

/// The main-content namespace of the wiki.
pub const MAIN_NAMESPACE: i32 = 0;

/// One page pulled out of the article dump. Lives only until a worker has
/// turned it into records.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    pub id: DocId,
    pub title: String,
    pub raw_text: String,
    pub namespace: i32,
    pub is_redirect: bool,
}

/// Normalized term frequencies of one document (`count / doc_length`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermFrequencyRecord {
    pub id: DocId,
    pub terms: BTreeMap<String, f64>,
}

/// Per-document metadata. Doubles as the resume checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocInfoRecord {
    pub id: DocId,
    pub title: String,
    pub len: u64,
}

/// A `(target_id, namespace, title)` row of the link-target table.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkTargetRecord {
    pub target_id: TargetId,
    pub namespace: i32,
    pub title: String,
}

/// A directed `from -> to` reference between two documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub from: DocId,
    pub to: DocId,
}

/// Both records produced for one document by the term-frequency transform.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedDocument {
    pub tf: TermFrequencyRecord,
    pub info: DocInfoRecord,
}
