//! Tuple grammar for the `INSERT INTO ... VALUES (...),(...);` lines of the
//! link-target and page-link SQL exports.

use crate::records::{DocId, LinkTargetRecord, TargetId, MAIN_NAMESPACE};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref LINKTARGET_RE: Regex = Regex::new(r"\(([0-9]+),([0-9]+),'((?:[^'\\]|\\.)*)'\)").expect("valid regex");
    static ref PAGELINK_RE: Regex = Regex::new(r"\(([0-9]+),([0-9]+),([0-9]+)\)").expect("valid regex");
}

const INSERT_PREFIX: &str = "INSERT INTO";
const VALUES_MARKER: &str = "VALUES ";

/// The tuple payload of an insert statement, or `None` for any other line.
pub fn insert_payload(line: &str) -> Option<&str> {
    if !line.starts_with(INSERT_PREFIX) { return None; }
    line.find(VALUES_MARKER).map(|start| &line[start..])
}

/// Owned variant of [`insert_payload`] that reuses the line's allocation.
pub fn take_insert_payload(mut line: String) -> Option<String> {
    if !line.starts_with(INSERT_PREFIX) { return None; }
    let start = line.find(VALUES_MARKER)?;
    line.drain(..start);
    Some(line)
}

/// Undo the dump's minimal escaping: `\'`, `\"` and `\\`.
/// Any other backslash sequence is kept as written.
pub fn unescape_title(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(next @ ('\'' | '"' | '\\')) => out.push(next),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Main-namespace link targets of one insert line, titles unescaped.
pub fn link_targets(payload: &str) -> impl Iterator<Item = LinkTargetRecord> + '_ {
    LINKTARGET_RE.captures_iter(payload).filter_map(|caps| {
        let namespace: i32 = caps[2].parse().ok()?;
        if namespace != MAIN_NAMESPACE { return None; }
        Some(LinkTargetRecord {
            target_id: caps[1].parse().ok()?,
            namespace,
            title: unescape_title(&caps[3]),
        })
    })
}

/// `(from_id, target_id)` for every page-link tuple whose source page is in
/// the main namespace.
pub fn page_links(payload: &str) -> impl Iterator<Item = (DocId, TargetId)> + '_ {
    PAGELINK_RE.captures_iter(payload).filter_map(|caps| {
        if &caps[2] != "0" { return None; }
        Some((caps[1].parse().ok()?, caps[3].parse().ok()?))
    })
}
