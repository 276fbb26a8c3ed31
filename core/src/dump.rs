//! Streaming extraction of pages from a MediaWiki XML export.

use crate::error::PipelineError;
use crate::records::{DocId, DocumentRecord, MAIN_NAMESPACE};
use crate::stream::{DumpStream, LossyUtf8};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::collections::HashSet;
use std::io::BufRead;

/// How often (in skipped pages) resume skips are reported.
const SKIP_REPORT_EVERY: u64 = 1000;

#[derive(Debug, Default)]
struct PartialPage {
    title: Option<String>,
    id: Option<String>,
    namespace: Option<String>,
    text: Option<String>,
    redirect: bool,
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Title,
    Namespace,
    Id,
    Text,
}

/// Counters kept while walking the dump.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExtractStats {
    pub already_processed: u64,
    pub redirects: u64,
    pub other_namespace: u64,
    pub without_text: u64,
    pub malformed: u64,
    pub yielded: u64,
}

/// Lazy sequence of main-namespace, non-redirect pages that are not yet in
/// the checkpoint set. Ends at end-of-input (or at the first unreadable XML).
pub struct DumpExtractor<'a, R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    text_buf: String,
    processed: &'a HashSet<DocId>,
    stats: ExtractStats,
    done: bool,
}

impl<'a> DumpExtractor<'a, LossyUtf8<Box<dyn BufRead + Send>>> {
    pub fn from_stream(stream: DumpStream, processed: &'a HashSet<DocId>) -> Self {
        Self::new(stream.into_reader(), processed)
    }
}

impl<'a, R: BufRead> DumpExtractor<'a, R> {
    pub fn new(reader: R, processed: &'a HashSet<DocId>) -> Self {
        Self {
            reader: Reader::from_reader(reader),
            buf: Vec::with_capacity(8192),
            text_buf: String::new(),
            processed,
            stats: ExtractStats::default(),
            done: false,
        }
    }

    pub fn stats(&self) -> ExtractStats { self.stats }

    /// Reads events until a whole `<page>` has been seen.
    fn next_page(&mut self) -> Option<PartialPage> {
        let mut page: Option<PartialPage> = None;
        let mut field: Option<Field> = None;

        loop {
            self.buf.clear();
            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(event) => event,
                Err(e) => {
                    tracing::error!(position = self.reader.buffer_position(), error = %e, "unreadable XML, ending page stream");
                    return None;
                }
            };

            match event {
                Event::Start(ref e) => match e.local_name().as_ref() {
                    b"page" => page = Some(PartialPage::default()),
                    b"redirect" => {
                        if let Some(p) = page.as_mut() { p.redirect = true; }
                    }
                    b"title" => field = Some(Field::Title),
                    b"ns" => field = Some(Field::Namespace),
                    b"id" => field = Some(Field::Id),
                    b"text" => field = Some(Field::Text),
                    _ => {}
                },
                Event::Empty(ref e) => {
                    if e.local_name().as_ref() == b"redirect" {
                        if let Some(p) = page.as_mut() { p.redirect = true; }
                    }
                }
                Event::Text(ref e) => {
                    if field.is_some() {
                        match e.unescape() {
                            Ok(text) => self.text_buf.push_str(&text),
                            Err(_) => self.text_buf.push_str(&String::from_utf8_lossy(e)),
                        }
                    }
                }
                Event::CData(ref e) => {
                    if field.is_some() {
                        self.text_buf.push_str(&String::from_utf8_lossy(e));
                    }
                }
                Event::End(ref e) => {
                    let name = e.local_name();
                    if name.as_ref() == b"page" {
                        if page.is_some() { return page; }
                        continue;
                    }
                    if let (Some(f), Some(p)) = (field.take(), page.as_mut()) {
                        let value = std::mem::take(&mut self.text_buf);
                        match f {
                            Field::Title => p.title = Some(value),
                            Field::Namespace => p.namespace = Some(value),
                            // The first <id> of a page is the page id; revision and contributor ids follow it.
                            Field::Id => { if p.id.is_none() { p.id = Some(value); } }
                            // Only the first revision is the current one.
                            Field::Text => { if p.text.is_none() { p.text = Some(value); } }
                        }
                    }
                    self.text_buf.clear();
                }
                Event::Eof => return None,
                _ => {}
            }
        }
    }

    /// Applies the filters in order; `None` means the page is skipped.
    fn accept(&mut self, page: PartialPage) -> Option<DocumentRecord> {
        let title = page.title.unwrap_or_default();
        let id = match page.id.as_deref().map(|s| s.trim().parse::<DocId>()) {
            Some(Ok(id)) => id,
            _ => {
                self.stats.malformed += 1;
                let err = PipelineError::MalformedRecord(format!("page {title:?} has no numeric id"));
                tracing::warn!(error = %err, "skipping page");
                return None;
            }
        };

        if self.processed.contains(&id) {
            self.stats.already_processed += 1;
            if self.stats.already_processed % SKIP_REPORT_EVERY == 0 {
                tracing::info!(skipped = self.stats.already_processed, "pages already parsed");
            }
            return None;
        }

        if page.redirect {
            self.stats.redirects += 1;
            return None;
        }

        let namespace = match page.namespace.as_deref().map(|s| s.trim().parse::<i32>()) {
            Some(Ok(ns)) => ns,
            _ => {
                self.stats.malformed += 1;
                let err = PipelineError::MalformedRecord(format!("page {id} ({title}) has no namespace"));
                tracing::warn!(error = %err, "skipping page");
                return None;
            }
        };
        if namespace != MAIN_NAMESPACE {
            self.stats.other_namespace += 1;
            return None;
        }

        let raw_text = match page.text {
            Some(text) if !text.is_empty() => text,
            _ => {
                self.stats.without_text += 1;
                return None;
            }
        };

        self.stats.yielded += 1;
        Some(DocumentRecord { id, title, raw_text, namespace, is_redirect: false })
    }
}

impl<'a, R: BufRead> Iterator for DumpExtractor<'a, R> {
    type Item = DocumentRecord;

    fn next(&mut self) -> Option<DocumentRecord> {
        if self.done { return None; }
        loop {
            let Some(page) = self.next_page() else {
                self.done = true;
                tracing::info!(stats = ?self.stats, "page stream finished");
                return None;
            };
            if let Some(doc) = self.accept(page) {
                return Some(doc);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_XML: &str = r#"<mediawiki xmlns="http://www.mediawiki.org/xml/export-0.11/" xml:lang="en">
  <siteinfo><sitename>Wikipedia</sitename></siteinfo>
  <page>
    <title>Anarchism</title>
    <ns>0</ns>
    <id>12</id>
    <revision>
      <id>1000</id>
      <contributor><username>Someone</username><id>77</id></contributor>
      <text bytes="40" xml:space="preserve">'''Anarchism''' is a [[political philosophy]] &amp; movement.</text>
    </revision>
  </page>
  <page>
    <title>AccessibleComputing</title>
    <ns>0</ns>
    <id>10</id>
    <redirect title="Computer accessibility" />
    <revision><id>1001</id><text>#REDIRECT [[Computer accessibility]]</text></revision>
  </page>
  <page>
    <title>Talk:Anarchism</title>
    <ns>1</ns>
    <id>13</id>
    <revision><id>1002</id><text>Discussion.</text></revision>
  </page>
  <page>
    <title>Empty</title>
    <ns>0</ns>
    <id>14</id>
    <revision><id>1003</id><text deleted="deleted" /></revision>
  </page>
  <page>
    <title>Autism</title>
    <ns>0</ns>
    <id>25</id>
    <revision><id>1004</id><text>Autism is a condition.</text></revision>
  </page>
</mediawiki>
"#;

    #[test]
    fn yields_only_main_namespace_articles() {
        let processed = HashSet::new();
        let mut extractor = DumpExtractor::new(SAMPLE_XML.as_bytes(), &processed);
        let docs: Vec<DocumentRecord> = extractor.by_ref().collect();

        let ids: Vec<DocId> = docs.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![12, 25]);
        assert_eq!(docs[0].title, "Anarchism");
        assert!(docs[0].raw_text.contains("[[political philosophy]] & movement"));

        let stats = extractor.stats();
        assert_eq!(stats.redirects, 1);
        assert_eq!(stats.other_namespace, 1);
        assert_eq!(stats.without_text, 1);
        assert_eq!(stats.yielded, 2);
    }

    #[test]
    fn skips_checkpointed_ids() {
        let processed: HashSet<DocId> = [12].into_iter().collect();
        let mut extractor = DumpExtractor::new(SAMPLE_XML.as_bytes(), &processed);
        let ids: Vec<DocId> = extractor.by_ref().map(|d| d.id).collect();
        assert_eq!(ids, vec![25]);
        assert_eq!(extractor.stats().already_processed, 1);
    }

    #[test]
    fn checkpoint_is_checked_before_other_filters() {
        let processed: HashSet<DocId> = [10, 13].into_iter().collect();
        let mut extractor = DumpExtractor::new(SAMPLE_XML.as_bytes(), &processed);
        let _ = extractor.by_ref().count();
        let stats = extractor.stats();
        assert_eq!(stats.already_processed, 2);
        assert_eq!(stats.redirects, 0);
        assert_eq!(stats.other_namespace, 0);
    }

    #[test]
    fn broken_xml_ends_the_sequence() {
        let xml = "<mediawiki><page><title>A</title><ns>0</ns><id>1</id><revision><text>a b</text></revision></page><page><title>B</wrong>";
        let processed = HashSet::new();
        let ids: Vec<DocId> = DumpExtractor::new(xml.as_bytes(), &processed).map(|d| d.id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn page_without_id_is_skipped() {
        let xml = "<mediawiki><page><title>A</title><ns>0</ns><revision><text>body</text></revision></page></mediawiki>";
        let processed = HashSet::new();
        let mut extractor = DumpExtractor::new(xml.as_bytes(), &processed);
        assert!(extractor.next().is_none());
        assert_eq!(extractor.stats().malformed, 1);
    }
}
