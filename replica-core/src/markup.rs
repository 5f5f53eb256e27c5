//! Start-tag level view of raw HTML.
//!
//! Edits are applied by re-serialising only the start tags that change, so
//! everything else in a captured document stays byte-identical.

use regex::Regex;
use replica_scanner::{Bucket, ResourceInventory};
use std::ops::Range;
use std::sync::LazyLock;

static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^<([a-zA-Z][a-zA-Z0-9:-]*)((?:\s+[^\s"'>/=]+(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s"'=<>`]+))?)*)\s*(/?)>"#,
    )
    .unwrap()
});
static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([^\s"'>/=]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#).unwrap()
});

/// `url(...)` inside CSS text.
pub static CSS_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)url\(\s*['"]?([^'")]+?)['"]?\s*\)"#).unwrap());

/// The url of a `background` or `background-image` declaration.
/// Groups: 1 = prefix up to the opening quote, 2 = the reference, 3 = the rest.
pub static BACKGROUND_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(background(?:-image)?\s*:[^;]*?url\(\s*['"]?)([^'")]+?)(['"]?\s*\))"#)
        .unwrap()
});

const RAW_TEXT_ELEMENTS: [&str; 4] = ["script", "style", "textarea", "title"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    /// Entity-decoded value; `None` for a bare attribute.
    pub value: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StartTag {
    /// Byte range of the tag in the source document.
    pub span: Range<usize>,
    /// Lower-cased element name.
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub self_closing: bool,
    /// Content range of raw text elements such as `<style>`.
    pub raw_text: Option<Range<usize>>,
}

impl StartTag {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .and_then(|a| a.value.as_deref())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| a.name.eq_ignore_ascii_case(name))
    }

    /// Replace an attribute value, appending the attribute when absent.
    pub fn set_attr(&mut self, name: &str, value: &str) {
        match self
            .attributes
            .iter_mut()
            .find(|a| a.name.eq_ignore_ascii_case(name))
        {
            Some(attribute) => attribute.value = Some(value.to_string()),
            None => self.attributes.push(Attribute {
                name: name.to_string(),
                value: Some(value.to_string()),
            }),
        }
    }

    pub fn to_markup(&self) -> String {
        let mut out = format!("<{}", self.name);
        for attribute in &self.attributes {
            out.push(' ');
            out.push_str(&attribute.name);
            if let Some(ref value) = attribute.value {
                out.push_str("=\"");
                out.push_str(&encode_attribute(value));
                out.push('"');
            }
        }
        if self.self_closing {
            out.push_str(" /");
        }
        out.push('>');
        out
    }
}

/// Every start tag in document order. Comments are skipped and the content
/// of raw text elements is not scanned for tags.
pub fn start_tags(html: &str) -> Vec<StartTag> {
    let lower = html.to_ascii_lowercase();
    let mut tags = Vec::new();
    let mut pos = 0;

    while let Some(offset) = html[pos..].find('<') {
        let start = pos + offset;
        let rest = &html[start..];

        if rest.starts_with("<!--") {
            pos = match html[start + 4..].find("-->") {
                Some(end) => start + 4 + end + 3,
                None => html.len(),
            };
            continue;
        }

        let Some(caps) = TAG.captures(rest) else {
            pos = start + 1;
            continue;
        };
        let end = start + caps[0].len();
        let name = caps[1].to_ascii_lowercase();
        let attributes = parse_attributes(caps.get(2).map_or("", |m| m.as_str()));
        let self_closing = !caps[3].is_empty();

        let mut raw_text = None;
        pos = end;
        if RAW_TEXT_ELEMENTS.contains(&name.as_str()) && !self_closing {
            let close = lower[end..]
                .find(&format!("</{}", name))
                .map_or(html.len(), |i| end + i);
            raw_text = Some(end..close);
            pos = close;
        }

        tags.push(StartTag {
            span: start..end,
            name,
            attributes,
            self_closing,
            raw_text,
        });
    }

    tags
}

fn parse_attributes(raw: &str) -> Vec<Attribute> {
    ATTRIBUTE
        .captures_iter(raw)
        .map(|caps| Attribute {
            name: caps[1].to_string(),
            value: caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| decode_entities(m.as_str())),
        })
        .collect()
}

pub fn decode_entities(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&quot;", "\"")
        .replace("&#34;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

pub fn encode_attribute(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

/// A byte-range replacement in a source document.
#[derive(Debug, Clone)]
pub struct Edit {
    pub range: Range<usize>,
    pub replacement: String,
}

/// Apply non-overlapping edits. Insertions use an empty range.
pub fn apply_edits(source: &str, mut edits: Vec<Edit>) -> String {
    edits.sort_by_key(|e| (e.range.start, e.range.end));
    let mut out = String::with_capacity(source.len());
    let mut last = 0;
    for edit in edits {
        if edit.range.start < last {
            continue;
        }
        out.push_str(&source[last..edit.range.start]);
        out.push_str(&edit.replacement);
        last = edit.range.end;
    }
    out.push_str(&source[last..]);
    out
}

/// Fallback scan of raw markup for references a DOM scan may have missed.
pub fn scan_references(html: &str) -> ResourceInventory {
    let mut inventory = ResourceInventory::new();

    for tag in start_tags(html) {
        match tag.name.as_str() {
            "link" => {
                if let Some(href) = tag.attr("href") {
                    let is_stylesheet = tag
                        .attr("rel")
                        .is_some_and(|rel| rel.to_ascii_lowercase().contains("stylesheet"));
                    let looks_like_css = href
                        .split(['?', '#'])
                        .next()
                        .is_some_and(|p| p.to_ascii_lowercase().ends_with(".css"));
                    if is_stylesheet || looks_like_css {
                        inventory.insert(Bucket::Stylesheet, href);
                    }
                }
            }
            "script" => {
                if let Some(src) = tag.attr("src") {
                    inventory.insert(Bucket::Script, src);
                }
            }
            "img" => {
                if let Some(src) = tag.attr("src") {
                    inventory.insert(Bucket::Image, src);
                }
            }
            "style" => {
                if let Some(ref range) = tag.raw_text {
                    let css = &html[range.clone()];
                    for caps in BACKGROUND_URL.captures_iter(css) {
                        inventory.insert(Bucket::Image, &caps[2]);
                    }
                    for caps in CSS_URL.captures_iter(css) {
                        if Bucket::classify_stylesheet_reference(&caps[1]) == Bucket::Font {
                            inventory.insert(Bucket::Font, &caps[1]);
                        }
                    }
                }
            }
            _ => {}
        }

        if let Some(style) = tag.attr("style") {
            for caps in BACKGROUND_URL.captures_iter(style) {
                inventory.insert(Bucket::Image, &caps[2]);
            }
        }
    }

    inventory
}
