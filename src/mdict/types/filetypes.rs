//! Record handling that differs between MDX entries and MDD resources.

use super::error::Result;
use super::models::{RecordData, StyleSheet};
use encoding_rs::{Encoding, UTF_16LE};
use regex::{Captures, Regex};
use std::sync::OnceLock;

/// Marker that turns a record into a redirect to another key.
pub const REDIRECT_PREFIX: &str = "@@@LINK=";

/// A style reference such as `` `3` `` inside record text.
static STYLE_PATTERN: OnceLock<Regex> = OnceLock::new();

fn style_regex() -> &'static Regex {
    STYLE_PATTERN.get_or_init(|| Regex::new(r"`(\d+)`").expect("valid stylesheet pattern"))
}

/// Expands style references into the tags of the header stylesheet.
///
/// Each reference first closes the previous style; the last style is closed
/// at the end of the text. Unknown style numbers only close the previous one.
pub fn substitute_stylesheet(text: &str, stylesheet: &StyleSheet) -> String {
    let mut current_closing_tag = String::new();

    let mut result = style_regex()
        .replace_all(text, |cap: &Captures| {
            let mut replacement = std::mem::take(&mut current_closing_tag);
            if let Some((open_tag, close_tag)) = cap[1]
                .parse::<u8>()
                .ok()
                .and_then(|style_id| stylesheet.get(&style_id))
            {
                replacement.push_str(open_tag);
                current_closing_tag = close_tag.clone();
            }
            replacement
        })
        .into_owned();

    result.push_str(&current_closing_tag);
    result
}

/// Marker trait selecting MDX or MDD record semantics for a reader.
pub trait FileType {
    /// Used in log messages.
    const DEBUG_NAME: &'static str;

    /// `String` for MDX, `Vec<u8>` for MDD.
    type Record: Send;

    /// Key encoding that wins over the header, if any.
    const ENCODING_OVERRIDE: Option<&'static Encoding>;

    /// Turns raw record bytes into a record, detecting `@@@LINK=` redirects.
    fn process_record(
        bytes: &[u8],
        encoding: &'static Encoding,
        stylesheet: &StyleSheet,
    ) -> Result<RecordData<Self::Record>>;
}

/// Dictionary entries: decoded text with the stylesheet applied.
#[derive(Debug)]
pub struct Mdx;

impl FileType for Mdx {
    const DEBUG_NAME: &'static str = "MDX";
    type Record = String;
    const ENCODING_OVERRIDE: Option<&'static Encoding> = None;

    fn process_record(
        bytes: &[u8],
        encoding: &'static Encoding,
        stylesheet: &StyleSheet,
    ) -> Result<RecordData<Self::Record>> {
        let (text, _, _) = encoding.decode(bytes);

        // Strip null terminators
        let content = text.trim_end_matches('\0');

        if let Some(target) = content.strip_prefix(REDIRECT_PREFIX) {
            return Ok(RecordData::Redirect(target.trim().to_string()));
        }

        if stylesheet.is_empty() {
            return Ok(RecordData::Content(content.to_string()));
        }
        Ok(RecordData::Content(substitute_stylesheet(content, stylesheet)))
    }
}

/// Resource files: raw bytes, keys always UTF-16LE in v1/v2.
#[derive(Debug)]
pub struct Mdd;

impl FileType for Mdd {
    const DEBUG_NAME: &'static str = "MDD";
    type Record = Vec<u8>;
    const ENCODING_OVERRIDE: Option<&'static Encoding> = Some(UTF_16LE);

    fn process_record(
        bytes: &[u8],
        encoding: &'static Encoding,
        _stylesheet: &StyleSheet,
    ) -> Result<RecordData<Self::Record>> {
        // The marker is stored in the key encoding: UTF-16LE for v1/v2, UTF-8 for v3.
        let redirect_pattern: Vec<u8> = if encoding == UTF_16LE {
            REDIRECT_PREFIX.bytes().flat_map(|b| [b, 0u8]).collect()
        } else {
            REDIRECT_PREFIX.as_bytes().to_vec()
        };

        if let Some(target_bytes) = bytes.strip_prefix(redirect_pattern.as_slice()) {
            let (target_text, _, _) = encoding.decode(target_bytes);
            let target_key = target_text.trim_end_matches('\0').trim().to_string();
            return Ok(RecordData::Redirect(target_key));
        }

        Ok(RecordData::Content(bytes.to_vec()))
    }
}
