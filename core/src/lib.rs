//! Builds search-index inputs from MediaWiki dumps: per-document term
//! frequencies with document metadata, and the document link graph.
//!
//! Both builds stream multi-gigabyte compressed exports, fan records out to a
//! worker pool and append results as they complete. The term-frequency build
//! resumes from its own document-info output.

pub mod dump;
pub mod error;
pub mod persist;
pub mod pipeline;
pub mod pool;
pub mod progress;
pub mod records;
pub mod resolve;
pub mod sql;
pub mod stream;
pub mod termfreq;
pub mod tokenizer;
pub mod wikitext;

pub use error::{PipelineError, Result};
pub use pipeline::{build_link_graph, build_term_frequencies, Orchestrator, Outcome, PipelineConfig, PipelineState, RunSummary};
pub use pool::{CancelToken, WorkerPool};
pub use records::{DocId, DocInfoRecord, DocumentRecord, Edge, IndexedDocument, TermFrequencyRecord};
