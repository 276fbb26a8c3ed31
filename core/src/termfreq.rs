//! Document -> (term frequencies, document info).

use crate::error::{PipelineError, Result};
use crate::records::{DocInfoRecord, DocumentRecord, IndexedDocument, TermFrequencyRecord};
use crate::tokenizer::{is_stopword, TextNormalizer};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// A token survives if it is longer than one character, alphanumeric, not
/// purely numeric and not a stop word.
pub fn keep_token(token: &str) -> bool {
    token.chars().count() > 1
        && token.chars().all(char::is_alphanumeric)
        && !token.chars().all(char::is_numeric)
        && !is_stopword(token)
}

/// Retained, stemmed tokens of a document, duplicates included.
///
/// The plain text is tokenized twice, as-is and with every hyphen replaced by
/// a space, and both sequences are concatenated before filtering.
pub fn stemmed_tokens<N: TextNormalizer>(normalizer: &N, raw_text: &str) -> Vec<String> {
    let text = normalizer.plain_text(raw_text);
    let mut tokens = normalizer.tokenize(&text);
    tokens.extend(normalizer.tokenize(&text.replace('-', " ")));

    tokens
        .iter()
        .filter(|t| keep_token(t))
        .map(|t| normalizer.stem(t))
        .collect()
}

/// Term frequencies (`count / doc_length`) and the document length.
pub fn term_frequencies(stems: &[String]) -> (BTreeMap<String, f64>, u64) {
    let doc_length = stems.len();
    let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
    for stem in stems {
        *counts.entry(stem.as_str()).or_insert(0) += 1;
    }

    let terms = counts
        .into_iter()
        .map(|(term, count)| (term.to_string(), count as f64 / doc_length as f64))
        .collect();
    (terms, doc_length as u64)
}

/// Run the whole transform for one document. Never panics: any failure is
/// returned as a [`PipelineError::Transform`] carrying the document id and title.
pub fn process<N: TextNormalizer>(normalizer: &N, doc: DocumentRecord) -> Result<IndexedDocument> {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let stems = stemmed_tokens(normalizer, &doc.raw_text);
        term_frequencies(&stems)
    }));

    match outcome {
        Ok((terms, len)) => Ok(IndexedDocument {
            tf: TermFrequencyRecord { id: doc.id, terms },
            info: DocInfoRecord { id: doc.id, title: doc.title, len },
        }),
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "transform panicked".to_string());
            Err(PipelineError::Transform { id: doc.id, title: doc.title, reason })
        }
    }
}
