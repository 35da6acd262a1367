//! Subject and participant normalization used to match emails into threads

use std::collections::BTreeSet;

use lazy_static::lazy_static;
use regex::Regex;

use entity::email;

lazy_static! {
    // One reply/forward prefix ("Re:", "FWD[2]:", "AW (3):") or list tag ("[dev]")
    static ref RE_SUBJECT_PREFIX: Regex = Regex::new(
        r"(?i)^\s*(?:(?:re|fw|fwd|aw|sv|antw|wg)\s*(?:\[\d+\]|\(\d+\))?\s*:|\[[^\]]*\])\s*"
    )
    .unwrap();
    static ref RE_SPACES: Regex = Regex::new(r"\s+").unwrap();
}

/// Subject with reply/forward prefixes and list tags removed, lowercased,
/// whitespace collapsed and surrounding punctuation trimmed.
pub fn normalize_subject(subject: &str) -> String {
    let mut s = subject.trim();
    while let Some(m) = RE_SUBJECT_PREFIX.find(s) {
        if m.end() == 0 {
            break;
        }
        s = &s[m.end()..];
    }

    let lowered = s.to_lowercase();
    let collapsed = RE_SPACES.replace_all(&lowered, " ");
    collapsed
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_string()
}

/// `"Alice <Alice@Example.com>"` -> `"alice@example.com"`
pub fn bare_address(raw: &str) -> String {
    let raw = raw.trim();
    let addr = match (raw.rfind('<'), raw.rfind('>')) {
        (Some(start), Some(end)) if start < end => &raw[start + 1..end],
        _ => raw,
    };
    addr.trim().trim_matches('"').to_lowercase()
}

/// Sender, recipients and cc as bare lowercase addresses
pub fn participants(email: &email::Model) -> BTreeSet<String> {
    std::iter::once(&email.sender)
        .chain(email.recipients.iter())
        .chain(email.cc.iter())
        .map(|raw| bare_address(raw))
        .filter(|addr| !addr.is_empty())
        .collect()
}

/// Jaccard index of two participant sets; 0.0 when both are empty
pub fn participant_overlap(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

const GENERIC_SUBJECTS: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "question",
    "quick question",
    "follow up",
    "following up",
    "update",
    "checking in",
    "fyi",
    "no subject",
    "thanks",
    "thank you",
];

/// Empty or content-free subjects that say nothing about the conversation
pub fn is_generic_subject(normalized: &str) -> bool {
    normalized.is_empty() || GENERIC_SUBJECTS.contains(&normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_subject_prefixes() {
        assert_eq!(normalize_subject("Re: Budget"), "budget");
        assert_eq!(normalize_subject("RE: Fwd: re: Budget"), "budget");
        assert_eq!(normalize_subject("AW: WG: Budget"), "budget");
        assert_eq!(normalize_subject("Re[2]: Budget"), "budget");
        assert_eq!(normalize_subject("Fwd (3): Budget"), "budget");
        assert_eq!(normalize_subject("SV: Antw: Budget"), "budget");
    }

    #[test]
    fn test_normalize_subject_tags_and_spacing() {
        assert_eq!(normalize_subject("[dev-list] Re:  Release   plan "), "release plan");
        assert_eq!(normalize_subject("  Lunch?  "), "lunch");
        assert_eq!(normalize_subject("Re:"), "");
        assert_eq!(normalize_subject(""), "");
    }

    #[test]
    fn test_normalize_keeps_words_starting_with_prefixes() {
        assert_eq!(normalize_subject("Review of Q3"), "review of q3");
        assert_eq!(normalize_subject("Svelte migration"), "svelte migration");
    }

    #[test]
    fn test_bare_address() {
        assert_eq!(bare_address("Alice <Alice@Example.com>"), "alice@example.com");
        assert_eq!(bare_address("bob@example.com "), "bob@example.com");
        assert_eq!(bare_address("\"Carol\" <carol@x.org>"), "carol@x.org");
    }

    #[test]
    fn test_participant_overlap() {
        let a: BTreeSet<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let b: BTreeSet<String> = ["b", "c", "d"].iter().map(|s| s.to_string()).collect();
        assert!((participant_overlap(&a, &b) - 0.5).abs() < 1e-9);
        assert_eq!(participant_overlap(&BTreeSet::new(), &BTreeSet::new()), 0.0);
        assert_eq!(participant_overlap(&a, &a), 1.0);
    }

    #[test]
    fn test_generic_subjects() {
        assert!(is_generic_subject(""));
        assert!(is_generic_subject(&normalize_subject("Re: Quick question")));
        assert!(!is_generic_subject("budget"));
    }
}
