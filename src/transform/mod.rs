//! Rewrites MDX entry HTML into the Apple dictionary XHTML dialect.
//!
//! The transform is a textual pass over the markup. Cross references and
//! resource links are resolved against the headword and resource namespaces;
//! anything not understood is kept verbatim and reported as a
//! [`MarkupAnomaly`]. Transforming never fails.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use quick_xml::escape::{escape, unescape};
use regex::{Captures, Regex};

use crate::mdict::types::filetypes::REDIRECT_PREFIX;
use crate::mdict::{RecordData, ResourceNamespace};

/// Directory inside the bundle resources that holds MDD payloads.
pub const MEDIA_DIR: &str = "media";

const ENTRY_ID_WORD_LIMIT: usize = 50;

const KNOWN_TAGS: &[&str] = &[
    "a", "abbr", "acronym", "address", "article", "aside", "audio", "b", "bdi", "bdo", "big",
    "blockquote", "body", "br", "button", "caption", "center", "cite", "code", "col", "colgroup",
    "dd", "del", "details", "dfn", "div", "dl", "dt", "em", "embed", "figcaption", "figure",
    "font", "footer", "h1", "h2", "h3", "h4", "h5", "h6", "head", "header", "hr", "html", "i",
    "img", "input", "ins", "kbd", "label", "li", "main", "mark", "meta", "nav", "nobr", "ol",
    "p", "param", "pre", "q", "rp", "rt", "ruby", "s", "samp", "script", "section", "small",
    "source", "span", "strike", "strong", "style", "sub", "summary", "sup", "table", "tbody",
    "td", "tfoot", "th", "thead", "title", "tr", "track", "tt", "u", "ul", "var", "video", "wbr",
];

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "meta", "param", "source",
    "track", "wbr",
];

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("valid markup pattern"))
}

fn link_tag_regex() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    regex(&CELL, r"(?i)<link\b[^>]*>|</link\s*>")
}

/// A whole tag (groups 1-3), or an inline `@@@LINK=` in text (group 4).
///
/// Tags are matched as units, so a redirect inside an attribute value is left
/// to the attribute rewriter.
fn markup_regex() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    regex(
        &CELL,
        r#"<(/?)([A-Za-z][A-Za-z0-9:_-]*)((?:[^>"']|"[^"]*"|'[^']*')*)>|@@@LINK=([^<\r\n]+)"#,
    )
}

fn url_attr_regex() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    regex(&CELL, r#"(?i)\b(href|src)(\s*=\s*)(?:"([^"]*)"|'([^']*)')"#)
}

/// One decoded MDX entry ready for transformation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Position of the key in on-disk order.
    pub position: usize,
    pub headword: String,
    pub body: RecordData<String>,
}

/// A non-fatal markup problem found while transforming an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MarkupAnomaly {
    UnknownTag { tag: String },
    UnresolvedResource { reference: String },
    UnresolvedLink { target: String },
}

impl fmt::Display for MarkupAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkupAnomaly::UnknownTag { tag } => write!(f, "unknown tag <{}> kept verbatim", tag),
            MarkupAnomaly::UnresolvedResource { reference } => {
                write!(f, "resource {:?} not found in MDD", reference)
            }
            MarkupAnomaly::UnresolvedLink { target } => {
                write!(f, "cross reference to unknown headword {:?}", target)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedEntry {
    pub position: usize,
    pub headword: String,
    pub entry_id: String,
    /// The complete `<d:entry>` element.
    pub fragment: String,
    pub anomalies: Vec<MarkupAnomaly>,
}

/// Builds the id of the entry at `position`: `entry_{position}_{sanitized headword}`.
///
/// Characters outside `[A-Za-z0-9_-]` become `_`; the word part keeps at most 50 characters.
pub fn entry_id(position: usize, headword: &str) -> String {
    let sanitized: String = headword
        .chars()
        .take(ENTRY_ID_WORD_LIMIT)
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    format!("entry_{}_{}", position, sanitized)
}

/// Headword to entry id, for resolving cross references.
///
/// The first occurrence of a headword owns the id. Lookup falls back to a
/// lowercase match.
#[derive(Debug, Clone, Default)]
pub struct HeadwordNamespace {
    exact: HashMap<String, String>,
    folded: HashMap<String, String>,
}

impl HeadwordNamespace {
    pub fn new<'a, I>(headwords: I) -> Self
    where
        I: IntoIterator<Item = (usize, &'a str)>,
    {
        let mut namespace = Self::default();
        for (position, headword) in headwords {
            if namespace.exact.contains_key(headword) {
                continue;
            }
            let id = entry_id(position, headword);
            namespace
                .folded
                .entry(headword.to_lowercase())
                .or_insert_with(|| id.clone());
            namespace.exact.insert(headword.to_string(), id);
        }
        namespace
    }

    pub fn resolve(&self, word: &str) -> Option<&str> {
        let word = word.trim();
        self.exact
            .get(word)
            .or_else(|| self.folded.get(&word.to_lowercase()))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }
}

/// Rewrites entries against fixed headword and resource namespaces.
///
/// Holds only shared references, so one transformer can serve many worker threads.
#[derive(Debug, Clone, Copy)]
pub struct EntryTransformer<'a> {
    headwords: &'a HeadwordNamespace,
    resources: &'a ResourceNamespace,
}

impl<'a> EntryTransformer<'a> {
    pub fn new(headwords: &'a HeadwordNamespace, resources: &'a ResourceNamespace) -> Self {
        Self { headwords, resources }
    }

    pub fn transform(&self, entry: &Entry) -> TransformedEntry {
        let mut anomalies = Vec::new();
        let body = match &entry.body {
            RecordData::Content(html) => self.rewrite_body(html, &mut anomalies),
            RecordData::Redirect(target) => self.link_to(target, &mut anomalies),
        };

        let entry_id = entry_id(entry.position, &entry.headword);
        let title = escape(entry.headword.as_str());
        let mut fragment = String::with_capacity(body.len() + 4 * title.len() + 160);
        fragment.push_str(&format!("<d:entry id=\"{}\" d:title=\"{}\">\n", entry_id, title));
        fragment.push_str(&format!("  <d:index d:value=\"{}\"/>\n", title));
        let lower = entry.headword.to_lowercase();
        if lower != entry.headword {
            fragment.push_str(&format!("  <d:index d:value=\"{}\"/>\n", escape(lower.as_str())));
        }
        fragment.push_str(&format!("  <h1>{}</h1>\n", title));
        fragment.push_str(&format!("  <div class=\"definition\">{}</div>\n", body));
        fragment.push_str("</d:entry>\n");

        TransformedEntry {
            position: entry.position,
            headword: entry.headword.clone(),
            entry_id,
            fragment,
            anomalies,
        }
    }

    fn rewrite_body(&self, html: &str, anomalies: &mut Vec<MarkupAnomaly>) -> String {
        let without_links = link_tag_regex().replace_all(html, "");

        let rewritten = markup_regex()
            .replace_all(&without_links, |cap: &Captures| match cap.get(4) {
                Some(target) => self.link_to(target.as_str(), anomalies),
                None => self.rewrite_tag(cap, anomalies),
            })
            .into_owned();

        rewritten.replace("&nbsp;", "&#160;")
    }

    /// A single anchor pointing at `target`'s entry.
    fn link_to(&self, target: &str, anomalies: &mut Vec<MarkupAnomaly>) -> String {
        let target = target.trim();
        format!(
            "<a href=\"{}\">{}</a>",
            self.headword_href(target, anomalies),
            escape(target)
        )
    }

    fn headword_href(&self, word: &str, anomalies: &mut Vec<MarkupAnomaly>) -> String {
        match self.headwords.resolve(word) {
            Some(id) => format!("x-dictionary:r:{}", id),
            None => {
                anomalies.push(MarkupAnomaly::UnresolvedLink {
                    target: word.to_string(),
                });
                format!("x-dictionary:d:{}", escape(word))
            }
        }
    }

    fn rewrite_tag(&self, cap: &Captures, anomalies: &mut Vec<MarkupAnomaly>) -> String {
        let closing = &cap[1];
        let name = cap[2].to_ascii_lowercase();
        let attrs = &cap[3];

        if !KNOWN_TAGS.contains(&name.as_str()) {
            let anomaly = MarkupAnomaly::UnknownTag { tag: name };
            if !anomalies.contains(&anomaly) {
                anomalies.push(anomaly);
            }
            return cap[0].to_string();
        }
        if !closing.is_empty() {
            return cap[0].to_string();
        }

        let attrs = url_attr_regex().replace_all(attrs, |attr: &Captures| {
            let raw = attr.get(3).or_else(|| attr.get(4)).map_or("", |m| m.as_str());
            let value = unescape(raw).unwrap_or(Cow::Borrowed(raw));
            let rewritten = if attr[1].eq_ignore_ascii_case("href") {
                self.rewrite_href(&value, anomalies)
            } else {
                self.rewrite_src(&value, anomalies)
            };
            match rewritten {
                Some(url) => format!("{}{}\"{}\"", &attr[1], &attr[2], url),
                None => attr[0].to_string(),
            }
        });

        let is_void = VOID_TAGS.contains(&name.as_str());
        let trimmed = attrs.trim_end();
        if is_void && !trimmed.ends_with('/') {
            format!("<{}{} />", &cap[2], trimmed)
        } else {
            format!("<{}{}>", &cap[2], attrs)
        }
    }

    /// Returns the new attribute value, or `None` to keep the original text.
    fn rewrite_href(&self, value: &str, anomalies: &mut Vec<MarkupAnomaly>) -> Option<String> {
        let lower = value.to_ascii_lowercase();
        if let Some(word) = ["entry://", "bword://"]
            .iter()
            .find(|scheme| lower.starts_with(*scheme))
            .map(|scheme| &value[scheme.len()..])
        {
            if let Some(anchor) = word.strip_prefix('#') {
                return Some(format!("#{}", escape(anchor)));
            }
            return Some(self.headword_href(word, anomalies));
        }
        if let Some(word) = value.strip_prefix(REDIRECT_PREFIX) {
            return Some(self.headword_href(word, anomalies));
        }
        if lower.starts_with("sound://") {
            return self.resource_url(&value["sound://".len()..], value, anomalies);
        }
        None
    }

    fn rewrite_src(&self, value: &str, anomalies: &mut Vec<MarkupAnomaly>) -> Option<String> {
        let lower = value.to_ascii_lowercase();
        if ["http:", "https:", "data:", "//", "x-dictionary:"]
            .iter()
            .any(|scheme| lower.starts_with(scheme))
        {
            return None;
        }
        let path = if lower.starts_with("file://") {
            &value["file://".len()..]
        } else {
            value
        };
        self.resource_url(path, value, anomalies)
    }

    fn resource_url(&self, path: &str, original: &str, anomalies: &mut Vec<MarkupAnomaly>) -> Option<String> {
        match self.resources.resolve(path) {
            Some(canonical) => Some(format!("{}/{}", MEDIA_DIR, escape(canonical))),
            None => {
                anomalies.push(MarkupAnomaly::UnresolvedResource {
                    reference: original.to_string(),
                });
                None
            }
        }
    }
}
