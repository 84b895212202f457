//! HTML to readable plain text.
//!
//! A readability pass does the real work; when it produces nothing usable we
//! fall back to concatenating the visible text of the document. Both failure
//! modes here are terminal: the page was already retrieved, so retrying the
//! fetch would not change the result.

use dom_smoothie::Readability;
use log::debug;
use scraper::{Html, Node};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Element kinds that never contribute readable text.
const SKIPPED_ELEMENTS: [&str; 7] = [
    "script", "style", "noscript", "template", "svg", "canvas", "iframe",
];

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ExtractConfig {
    pub min_chars: usize,
    pub max_chars: usize,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            min_chars: 600,
            max_chars: 200_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractedText {
    pub text: String,
    /// Document title, when the readability pass surfaced one.
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("no readable text could be extracted")]
    EmptyExtraction,

    #[error("extracted text is below the minimum length")]
    TooShort,
}

impl ExtractError {
    pub fn code(&self) -> &'static str {
        match self {
            ExtractError::EmptyExtraction => "empty_extraction",
            ExtractError::TooShort => "too_short",
        }
    }
}

/// Reduce fetched HTML bytes to readable plain text.
///
/// Invalid UTF-8 sequences are replaced rather than rejected; servers lie
/// about encodings far too often for a hard failure to be useful.
pub fn extract(html_bytes: &[u8], config: &ExtractConfig) -> Result<ExtractedText, ExtractError> {
    let html = String::from_utf8_lossy(html_bytes);

    let (text, title) = match readability_text(&html) {
        Some((text, title)) => (text, title),
        None => (visible_text(&html), None),
    };

    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(ExtractError::EmptyExtraction);
    }

    let char_count = text.chars().count();
    if char_count < config.min_chars {
        return Err(ExtractError::TooShort);
    }

    let text = if char_count > config.max_chars {
        text.chars().take(config.max_chars).collect()
    } else {
        text
    };

    Ok(ExtractedText { text, title })
}

fn readability_text(html: &str) -> Option<(String, Option<String>)> {
    let mut readability = match Readability::new(html.to_string(), None, None) {
        Ok(readability) => readability,
        Err(err) => {
            debug!("readability setup failed: {err}");
            return None;
        }
    };

    let article = match readability.parse() {
        Ok(article) => article,
        Err(err) => {
            debug!("readability parse failed: {err}");
            return None;
        }
    };

    let text = article.text_content.trim().to_string();
    if text.is_empty() {
        return None;
    }

    let title = article.title.trim().to_string();
    let title = if title.is_empty() { None } else { Some(title) };

    Some((text, title))
}

/// Fallback: every text node of the document that is not inside a
/// non-content element, joined by newlines with blank lines collapsed.
fn visible_text(html: &str) -> String {
    let document = Html::parse_document(html);

    let mut raw = String::new();
    collect_text(document.tree.root(), &mut raw);

    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn collect_text(node: ego_tree::NodeRef<'_, Node>, out: &mut String) {
    match node.value() {
        Node::Element(element) if SKIPPED_ELEMENTS.contains(&element.name()) => return,
        Node::Text(text) => {
            out.push_str(&text);
            out.push('\n');
        }
        _ => {}
    }

    for child in node.children() {
        collect_text(child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article_html(paragraph_count: usize) -> String {
        let mut body = String::from("<h1>A Longer Piece</h1>");
        for i in 0..paragraph_count {
            body.push_str(&format!(
                "<p>Paragraph {i} carries enough narrative text to look like part \
                 of a real article body rather than site chrome or boilerplate.</p>"
            ));
        }
        format!("<html><head><title>A Longer Piece</title></head><body><article>{body}</article></body></html>")
    }

    #[test]
    fn extracts_article_body_text() {
        let html = article_html(20);
        let extracted = extract(html.as_bytes(), &ExtractConfig::default()).expect("extraction");
        assert!(extracted.text.contains("Paragraph 0"));
        assert!(extracted.text.contains("Paragraph 19"));
        assert!(extracted.text.chars().count() >= 600);
    }

    #[test]
    fn fallback_skips_non_content_elements() {
        let text = visible_text(
            "<html><body><script>var hidden = 1;</script><style>p { color: red }</style>\
             <p>kept text</p><noscript>also hidden</noscript></body></html>",
        );
        assert_eq!(text, "kept text");
    }

    #[test]
    fn fallback_collapses_blank_lines() {
        let text = visible_text("<html><body><p>first</p>\n\n\n<p>second</p></body></html>");
        assert_eq!(text, "first\nsecond");
    }

    #[test]
    fn empty_page_is_an_empty_extraction() {
        let err = extract(b"<html><body></body></html>", &ExtractConfig::default()).unwrap_err();
        assert_eq!(err, ExtractError::EmptyExtraction);
        assert_eq!(err.code(), "empty_extraction");
    }

    #[test]
    fn short_page_is_too_short() {
        let err = extract(
            b"<html><body><p>just a few words</p></body></html>",
            &ExtractConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err, ExtractError::TooShort);
        assert_eq!(err.code(), "too_short");
    }

    #[test]
    fn oversized_text_is_truncated_to_max_chars() {
        let config = ExtractConfig {
            min_chars: 10,
            max_chars: 120,
        };
        let html = article_html(10);
        let extracted = extract(html.as_bytes(), &config).expect("extraction");
        assert_eq!(extracted.text.chars().count(), 120);
    }

    #[test]
    fn invalid_utf8_is_replaced_not_rejected() {
        let mut bytes = article_html(20).into_bytes();
        bytes.push(0xFF);
        bytes.push(0xFE);
        assert!(extract(&bytes, &ExtractConfig::default()).is_ok());
    }
}
