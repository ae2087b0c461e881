use std::ops::Range;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::escape::escape_html;

pub const DEFAULT_ROUTE_PREFIX: &str = "/app";
pub const DOC_LINK_CLASS: &str = "doc-link";
pub const DOC_LINK_TARGET: &str = "_blank";

/// Capitalized words, whitespace, then an uppercase identifier with at least one hyphen.
///
/// `Sales Invoice SINV-2023-001` captures `Sales Invoice` and `SINV-2023-001`.
static ENTITY_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b((?:[A-Z][a-z]+\s+)*[A-Z][a-z]+)\s+([A-Z][A-Z0-9]*(?:-[A-Z0-9]+)+)\b")
        .expect("entity reference pattern is valid")
});

/// One detected record reference inside a text segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityReference {
    pub type_label: String,
    pub id_token: String,
    /// Byte range of the whole match within the scanned text.
    pub span: Range<usize>,
}

impl EntityReference {
    fn from_captures(captures: &Captures<'_>) -> Option<Self> {
        let whole = captures.get(0)?;
        let label = captures.get(1)?;
        let id = captures.get(2)?;
        Some(Self {
            type_label: label.as_str().split_whitespace().collect::<Vec<_>>().join(" "),
            id_token: id.as_str().to_string(),
            span: whole.range(),
        })
    }

    /// `Sales Invoice` -> `sales-invoice`.
    pub fn type_slug(&self) -> String {
        self.type_label
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join("-")
    }
}

/// Rewrites entity references found in HTML text nodes into document links.
#[derive(Debug, Clone)]
pub struct EntityLinker {
    route_prefix: String,
}

impl EntityLinker {
    pub fn new(route_prefix: impl AsRef<str>) -> Self {
        Self {
            route_prefix: normalize_route_prefix(route_prefix.as_ref()),
        }
    }

    pub fn route_prefix(&self) -> &str {
        &self.route_prefix
    }

    /// Finds every reference in plain text, greedy left-to-right, non-overlapping.
    ///
    /// A match whose id runs on into more identifier characters is dropped
    /// rather than shortened to an earlier hyphen.
    pub fn find_references(&self, text: &str) -> Vec<EntityReference> {
        ENTITY_REFERENCE
            .captures_iter(text)
            .filter_map(|captures| EntityReference::from_captures(&captures))
            .filter(|reference| !continues_identifier(text, reference.span.end))
            .collect()
    }

    pub fn href_for(&self, reference: &EntityReference) -> String {
        format!(
            "{}/{}/{}",
            self.route_prefix,
            reference.type_slug(),
            reference.id_token
        )
    }

    /// Links references in the text segments of `html`.
    ///
    /// Tags, attribute values, comments and the content of existing anchors are
    /// copied through unchanged.
    pub fn link_html(&self, html: &str) -> String {
        let mut out = String::with_capacity(html.len());
        let mut anchor_depth = 0usize;

        for segment in HtmlSegments::new(html) {
            match segment {
                Segment::Text(text) if anchor_depth == 0 => self.link_text_into(text, &mut out),
                Segment::Text(text) => out.push_str(text),
                Segment::Markup(markup) => {
                    match anchor_tag(markup) {
                        Some(AnchorTag::Open) => anchor_depth += 1,
                        Some(AnchorTag::Close) => anchor_depth = anchor_depth.saturating_sub(1),
                        None => {}
                    }
                    out.push_str(markup);
                }
            }
        }

        out
    }

    fn link_text_into(&self, text: &str, out: &mut String) {
        let mut cursor = 0;
        for reference in self.find_references(text) {
            out.push_str(&text[cursor..reference.span.start]);
            self.push_anchor(&reference, &text[reference.span.clone()], out);
            cursor = reference.span.end;
        }
        out.push_str(&text[cursor..]);
    }

    fn push_anchor(&self, reference: &EntityReference, visible: &str, out: &mut String) {
        out.push_str("<a href=\"");
        out.push_str(&escape_html(&self.href_for(reference)));
        out.push_str("\" class=\"");
        out.push_str(DOC_LINK_CLASS);
        out.push_str("\" target=\"");
        out.push_str(DOC_LINK_TARGET);
        out.push_str("\" title=\"");
        out.push_str(&escape_html(&reference.type_label));
        out.push_str("\">");
        // Already HTML text: the match only spans letters, digits, hyphens and whitespace.
        out.push_str(visible);
        out.push_str("</a>");
    }
}

impl Default for EntityLinker {
    fn default() -> Self {
        Self::new(DEFAULT_ROUTE_PREFIX)
    }
}

fn continues_identifier(text: &str, end: usize) -> bool {
    text.as_bytes()
        .get(end)
        .is_some_and(|byte| byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_'))
}

fn normalize_route_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.contains("://") {
        return trimmed.to_string();
    }

    let path = trimmed.trim_start_matches('/');
    if path.is_empty() {
        String::new()
    } else {
        format!("/{path}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Text(&'a str),
    Markup(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AnchorTag {
    Open,
    Close,
}

fn anchor_tag(markup: &str) -> Option<AnchorTag> {
    let inner = markup.strip_prefix('<')?;
    let (closing, inner) = match inner.strip_prefix('/') {
        Some(rest) => (true, rest),
        None => (false, inner),
    };
    let name_end = inner
        .find(|ch: char| ch.is_ascii_whitespace() || ch == '>' || ch == '/')
        .unwrap_or(inner.len());
    if !inner[..name_end].eq_ignore_ascii_case("a") {
        return None;
    }
    if closing {
        Some(AnchorTag::Close)
    } else if markup.ends_with("/>") {
        None
    } else {
        Some(AnchorTag::Open)
    }
}

/// Splits an HTML fragment into text runs and markup (tags and comments).
///
/// Quoted attribute values may contain `>`; an unterminated tag swallows the rest
/// of the input as markup so it is never scanned for references.
struct HtmlSegments<'a> {
    html: &'a str,
    pos: usize,
}

impl<'a> HtmlSegments<'a> {
    fn new(html: &'a str) -> Self {
        Self { html, pos: 0 }
    }

    fn markup_end(&self) -> usize {
        let rest = &self.html[self.pos..];
        if rest.starts_with("<!--") {
            return rest
                .find("-->")
                .map(|end| self.pos + end + 3)
                .unwrap_or(self.html.len());
        }

        let mut quote: Option<u8> = None;
        for (offset, byte) in rest.bytes().enumerate().skip(1) {
            match (quote, byte) {
                (Some(open), b) if b == open => quote = None,
                (Some(_), _) => {}
                (None, b'"' | b'\'') => quote = Some(byte),
                (None, b'>') => return self.pos + offset + 1,
                (None, _) => {}
            }
        }
        self.html.len()
    }
}

impl<'a> Iterator for HtmlSegments<'a> {
    type Item = Segment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.html.len() {
            return None;
        }

        let start = self.pos;
        if self.html[start..].starts_with('<') {
            let end = self.markup_end();
            self.pos = end;
            return Some(Segment::Markup(&self.html[start..end]));
        }

        let end = self.html[start..]
            .find('<')
            .map(|offset| start + offset)
            .unwrap_or(self.html.len());
        self.pos = end;
        Some(Segment::Text(&self.html[start..end]))
    }
}
