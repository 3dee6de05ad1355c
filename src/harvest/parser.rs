//! Config extraction and validation
//!
//! Turns a raw text blob into validated, protocol-tagged config strings.
//! Sources publish configs in many shapes:
//! - one config per line
//! - several configs glued together on a single line with no separator
//! - the whole feed as one base64 blob
//! - HTML pages with configs embedded in message bodies

use crate::harvest::protocols::{Protocol, ProtocolCatalog};
use crate::Result;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::Path;
use tracing::trace;

/// Standard alphabet, tolerant of missing padding and non-zero trailing bits
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

static BASE64_LINE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9+/_-]+={0,2}$").expect("Invalid base64 regex"));

static EMOJI_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\x{1F000}-\x{1FAFF}\x{2600}-\x{27BF}\x{FE0E}\x{FE0F}\x{200D}]")
        .expect("Invalid emoji regex")
});

static CONTROL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x00-\x08\x0B-\x1F\x7F-\x{9F}]").expect("Invalid control regex"));

static WHITESPACE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\S\n]+").expect("Invalid whitespace regex"));

static HTML_BREAK_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<br\s*/?>|</div>|</p>").expect("Invalid break regex"));

static HTML_TAG_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[^>]*>").expect("Invalid tag regex"));

/// Result of running the engine over one blob
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    /// Accepted records in order of appearance
    pub records: Vec<(Protocol, String)>,
    /// Non-empty input lines examined, accepted or not
    pub lines_examined: u64,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
enum ScanState {
    Outside,
    Inside {
        protocol: Protocol,
        start: usize,
        prefix_len: usize,
        is_alias: bool,
    },
}

/// Extraction engine bound to a protocol catalog
pub struct ConfigParser<'a> {
    catalog: &'a ProtocolCatalog,
}

impl<'a> ConfigParser<'a> {
    pub fn new(catalog: &'a ProtocolCatalog) -> Self {
        Self { catalog }
    }

    /// Extract every valid config from a text blob
    pub fn extract(&self, text: &str) -> Extraction {
        let mut extraction = Extraction::default();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            extraction.lines_examined += 1;

            match self.decode_base64_content(line) {
                Some(decoded) => {
                    for decoded_line in decoded.lines() {
                        self.extract_into(decoded_line, &mut extraction.records);
                    }
                }
                None => self.extract_into(line, &mut extraction.records),
            }
        }

        extraction
    }

    fn extract_into(&self, text: &str, records: &mut Vec<(Protocol, String)>) {
        for raw in self.scan(text) {
            let config = sanitize(&raw);
            match self.validate(&config) {
                Some(protocol) => records.push((protocol, config)),
                None => trace!(config = %config, "dropping malformed config"),
            }
        }
    }

    /// Split text into records at every recognized prefix.
    ///
    /// A record runs from its prefix to the next prefix or the end of text.
    /// Alias prefixes are rewritten to canonical form here, on the record's
    /// own prefix only.
    pub fn scan(&self, text: &str) -> Vec<String> {
        let mut records = Vec::new();
        let mut state = ScanState::Outside;
        let mut pos = 0;

        while pos < text.len() {
            let Some(found) = self.catalog.prefix_at(text, pos) else {
                pos += 1;
                continue;
            };
            if let ScanState::Inside { .. } = state {
                records.push(close_record(text, state, pos));
            }
            state = ScanState::Inside {
                protocol: found.protocol,
                start: pos,
                prefix_len: found.len,
                is_alias: found.is_alias,
            };
            pos += found.len;
        }

        if let ScanState::Inside { .. } = state {
            records.push(close_record(text, state, text.len()));
        }

        records
    }

    /// Return the protocol of a config if it passes structural validation
    pub fn validate(&self, config: &str) -> Option<Protocol> {
        let protocol = Protocol::from_config(config)?;
        if !self.catalog.is_enabled(protocol) {
            return None;
        }
        let authority = authority(config, protocol)?;
        match protocol {
            Protocol::Tuic if !authority.contains(':') => None,
            _ => Some(protocol),
        }
    }

    /// Decode a whole-line base64 payload if it carries recognized configs
    pub fn decode_base64_content(&self, line: &str) -> Option<String> {
        let decoded = decode_base64_text(line)?;
        self.catalog.contains_prefix(&decoded).then_some(decoded)
    }

    /// Run the engine over a local file
    pub fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<Extraction> {
        let content = fs::read_to_string(path)?;
        Ok(self.extract(&content))
    }
}

fn close_record(text: &str, state: ScanState, end: usize) -> String {
    let ScanState::Inside {
        protocol,
        start,
        prefix_len,
        is_alias,
    } = state
    else {
        return String::new();
    };

    let record = &text[start..end];
    if is_alias {
        format!("{}{}", protocol.prefix(), &record[prefix_len..])
    } else {
        record.to_string()
    }
}

/// Authority component: everything between `://` and the first `/`, `?` or `#`
fn authority(config: &str, protocol: Protocol) -> Option<&str> {
    let rest = config.get(protocol.prefix().len()..)?;
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let authority = &rest[..end];
    (!authority.is_empty()).then_some(authority)
}

/// Whether the whole line consists of base64 characters (either alphabet)
pub fn is_base64(line: &str) -> bool {
    BASE64_LINE_REGEX.is_match(line)
}

/// Decode URL-safe or standard base64 into UTF-8 text
pub fn decode_base64_text(line: &str) -> Option<String> {
    if !is_base64(line) {
        return None;
    }

    let mut normalized: String = line
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    while normalized.len() % 4 != 0 {
        normalized.push('=');
    }

    let bytes = LENIENT_BASE64.decode(normalized.as_bytes()).ok()?;
    String::from_utf8(bytes).ok()
}

/// Strip emoji and control characters and collapse whitespace.
///
/// Idempotent: sanitizing a sanitized string returns it unchanged.
pub fn sanitize(config: &str) -> String {
    let config = EMOJI_REGEX.replace_all(config, "");
    let config = CONTROL_REGEX.replace_all(&config, "");
    let config = WHITESPACE_REGEX.replace_all(&config, " ");
    config.trim().to_string()
}

/// Reduce an HTML page to text lines, keeping message line breaks
pub fn extract_text_from_html(html: &str) -> String {
    let text = HTML_BREAK_REGEX.replace_all(html, "\n");
    let text = HTML_TAG_REGEX.replace_all(&text, "");
    unescape_html(&text)
}

fn unescape_html(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#039;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
