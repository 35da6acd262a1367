//! Content variants embedded for every email
//!
//! Each email is embedded up to four times: subject, body, a combined
//! subject/sender/body document, and a short extractive summary. Every
//! variant carries the sha256 of its text, which is the dedup key for the
//! stored vector.

use entity::{email, sea_orm_active_enums::EmbeddingType};
use lazy_static::lazy_static;
use regex::Regex;

use crate::{
    embed::chunker::{has_content, leading_sentences},
    util::{sha256_hex, truncate_chars},
};

/// Upper bound for any embedded text (nomic-embed-text has a 2048 token window)
pub const MAX_VARIANT_CHARS: usize = 8000;
pub const SUMMARY_SENTENCES: usize = 3;
pub const SUMMARY_MAX_CHARS: usize = 600;

lazy_static! {
    static ref RE_WHITESPACE: Regex = Regex::new(r"[\r\t\n]+").unwrap();
    static ref RE_LONG_SPACE: Regex = Regex::new(r" {2,}").unwrap();
    static ref RE_DIVIDERS: Regex = Regex::new(r"[-=_]{3,}").unwrap();
    static ref RE_HTTP_LINK: Regex = Regex::new(
        r"https?:\/\/(www\.)?[-a-zA-Z0-9@:%._\+~#=]{1,256}\.[a-zA-Z0-9()]{1,6}\b([-a-zA-Z0-9()@:%_\+.~#?&//=]*)"
    )
    .unwrap();
    // Start of the quoted history in a reply
    static ref RE_REPLY_HISTORY: Regex = Regex::new(
        r"(?mi)^\s*(on\s.{1,200}\swrote:\s*$|-{2,}\s*original message\s*-{2,}|from:\s.+\ssent:\s)"
    )
    .unwrap();
}

/// The parts of an email that feed the embedding variants
#[derive(Debug, Clone, Copy, Default)]
pub struct EmailContent<'a> {
    pub subject: &'a str,
    pub sender: &'a str,
    pub body_text: Option<&'a str>,
    pub body_html: Option<&'a str>,
}

impl<'a> From<&'a email::Model> for EmailContent<'a> {
    fn from(email: &'a email::Model) -> Self {
        Self {
            subject: &email.subject,
            sender: &email.sender,
            body_text: email.body_text.as_deref(),
            body_html: email.body_html.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentVariant {
    pub embedding_type: EmbeddingType,
    pub text: String,
    pub content_hash: String,
}

impl ContentVariant {
    fn new(embedding_type: EmbeddingType, text: &str) -> Self {
        let text = truncate_chars(text.trim(), MAX_VARIANT_CHARS).to_string();
        let content_hash = sha256_hex(&text);
        Self {
            embedding_type,
            text,
            content_hash,
        }
    }
}

/// Drop the quoted conversation history from a reply
fn strip_reply_history(body: &str) -> String {
    let body = match RE_REPLY_HISTORY.find(body) {
        Some(m) => &body[..m.start()],
        None => body,
    };

    body.lines()
        .filter(|line| !line.trim_start().starts_with('>'))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Plain-text body with reply history, links and formatting noise removed.
/// Falls back to the HTML part when there is no usable text part.
pub fn clean_body(body_text: Option<&str>, body_html: Option<&str>) -> String {
    let raw = match body_text.filter(|b| has_content(b)) {
        Some(text) => text.to_string(),
        None => body_html
            .map(|html| html2text::from_read(html.as_bytes(), 400))
            .unwrap_or_default(),
    };

    let b = strip_reply_history(&raw);
    let b = RE_HTTP_LINK.replace_all(&b, "[LINK]");
    let b = RE_DIVIDERS.replace_all(&b, " ");
    let b = RE_WHITESPACE.replace_all(&b, " ");
    let b = RE_LONG_SPACE.replace_all(&b, " ");
    b.trim().to_string()
}

/// Build the embedding variants for an email, in a stable order:
/// subject, body, combined, summary. Variants without content are omitted,
/// except `combined` which always carries at least the sender.
pub fn prepare_variants(content: EmailContent<'_>) -> Vec<ContentVariant> {
    let subject = content.subject.trim();
    let body = clean_body(content.body_text, content.body_html);
    let body_has_content = has_content(&body);

    let mut variants = Vec::with_capacity(4);

    if has_content(subject) {
        variants.push(ContentVariant::new(EmbeddingType::Subject, subject));
    }

    if body_has_content {
        variants.push(ContentVariant::new(EmbeddingType::Body, &body));
    }

    let combined = format!(
        "Subject: {}\nFrom: {}\n\n{}",
        subject,
        content.sender.trim(),
        body
    );
    variants.push(ContentVariant::new(EmbeddingType::Combined, &combined));

    if body_has_content {
        let summary = leading_sentences(&body, SUMMARY_SENTENCES, SUMMARY_MAX_CHARS);
        if has_content(&summary) {
            variants.push(ContentVariant::new(EmbeddingType::Summary, &summary));
        }
    }

    variants
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content<'a>(subject: &'a str, body: Option<&'a str>) -> EmailContent<'a> {
        EmailContent {
            subject,
            sender: "Alice <alice@example.com>",
            body_text: body,
            body_html: None,
        }
    }

    fn types(variants: &[ContentVariant]) -> Vec<EmbeddingType> {
        variants.iter().map(|v| v.embedding_type).collect()
    }

    #[test]
    fn test_all_variants_present() {
        let variants = prepare_variants(content(
            "Quarterly report",
            Some("Please review the report. It is due Friday. Thanks! Bob"),
        ));
        assert_eq!(
            types(&variants),
            vec![
                EmbeddingType::Subject,
                EmbeddingType::Body,
                EmbeddingType::Combined,
                EmbeddingType::Summary
            ]
        );
        let combined = &variants[2].text;
        assert!(combined.starts_with("Subject: Quarterly report\nFrom: Alice <alice@example.com>"));
        assert_eq!(
            variants[3].text,
            "Please review the report. It is due Friday. Thanks!"
        );
    }

    #[test]
    fn test_empty_body_only_subject_and_combined() {
        let variants = prepare_variants(content("Lunch?", None));
        assert_eq!(
            types(&variants),
            vec![EmbeddingType::Subject, EmbeddingType::Combined]
        );
    }

    #[test]
    fn test_blank_subject_is_skipped() {
        let variants = prepare_variants(content("   ", Some("Body text here.")));
        assert_eq!(variants[0].embedding_type, EmbeddingType::Body);
        assert!(!types(&variants).contains(&EmbeddingType::Subject));
    }

    #[test]
    fn test_hash_is_stable_and_content_sensitive() {
        let a = prepare_variants(content("Hello", Some("Same body.")));
        let b = prepare_variants(content("Hello", Some("Same body.")));
        let c = prepare_variants(content("Hello", Some("Different body.")));
        assert_eq!(a, b);
        assert_eq!(a[0].content_hash, c[0].content_hash);
        assert_ne!(a[1].content_hash, c[1].content_hash);
        assert_eq!(a[1].content_hash.len(), 64);
    }

    #[test]
    fn test_clean_body_strips_reply_history_and_links() {
        let body = "Sounds good, see https://example.com/path?x=1 for details.\n\n\
                    On Mon, Jan 1, 2024 at 10:00 AM Bob <bob@example.com> wrote:\n\
                    > earlier message\n> more";
        assert_eq!(clean_body(Some(body), None), "Sounds good, see [LINK] for details.");
    }

    #[test]
    fn test_clean_body_drops_quoted_lines() {
        let body = "New text\n> quoted line\nMore new text";
        assert_eq!(clean_body(Some(body), None), "New text More new text");
    }

    #[test]
    fn test_clean_body_falls_back_to_html() {
        let html = "<html><body><p>Hello <b>there</b></p></body></html>";
        let body = clean_body(Some("  "), Some(html));
        assert!(body.contains("Hello"));
        assert!(body.contains("there"));
        assert!(!body.contains("<p>"));
    }

    #[test]
    fn test_variants_are_truncated() {
        let long_body = "word ".repeat(5000);
        let variants = prepare_variants(content("Long", Some(&long_body)));
        for variant in variants {
            assert!(variant.text.chars().count() <= MAX_VARIANT_CHARS);
        }
    }
}
