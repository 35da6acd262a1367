use anyhow::Context;
use sha2::{Digest, Sha256};

/// Render a vector as a pgvector literal, e.g. `[0.1,0.2,0.3]`
pub fn format_vector(v: &[f32]) -> String {
    let parts: Vec<String> = v.iter().map(|x| x.to_string()).collect();
    format!("[{}]", parts.join(","))
}

/// Parse the text form of a pgvector value
pub fn parse_vector(s: &str) -> anyhow::Result<Vec<f32>> {
    let inner = s
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .context("Vector literal must be wrapped in brackets")?;

    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    inner
        .split(',')
        .map(|x| {
            x.trim()
                .parse::<f32>()
                .with_context(|| format!("Invalid vector component: {x}"))
        })
        .collect()
}

/// Lowercase hex sha256 of the input
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Stable 16 hex char key for a set of ids: sha256 over the sorted ids
pub fn id_set_key(ids: &[i32]) -> String {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    let joined = ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");
    sha256_hex(&joined)[..16].to_string()
}

/// Truncate to at most `max_chars` characters without splitting a code point
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Lowercase alphanumeric words joined by single spaces and padded on both
/// sides, so a keyword `kw` can be matched as a whole word with `" kw "`
pub fn padded_words(text: &str) -> String {
    let words = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    format!(" {} ", words)
}

/// Number of `keywords` present as whole words in `padded` (see [`padded_words`])
pub fn keyword_hits(padded: &str, keywords: &[&str]) -> usize {
    keywords
        .iter()
        .filter(|kw| padded.contains(&format!(" {} ", kw)))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_literal_roundtrip() {
        let v = vec![0.5, -1.25, 3.0];
        let s = format_vector(&v);
        assert_eq!(s, "[0.5,-1.25,3]");
        assert_eq!(parse_vector(&s).unwrap(), v);
    }

    #[test]
    fn test_parse_vector_rejects_garbage() {
        assert!(parse_vector("0.1,0.2").is_err());
        assert!(parse_vector("[0.1,abc]").is_err());
        assert!(parse_vector("[]").unwrap().is_empty());
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn test_keyword_hits_whole_words() {
        let padded = padded_words("Re: Invoice-#42, payment DUE soon");
        assert_eq!(padded, " re invoice 42 payment due soon ");
        assert_eq!(keyword_hits(&padded, &["invoice", "payment", "pay", "due soon"]), 3);
    }

    #[test]
    fn test_id_set_key_is_order_independent() {
        assert_eq!(id_set_key(&[3, 1, 2]), id_set_key(&[1, 2, 3]));
        assert_eq!(id_set_key(&[1, 2, 3]).len(), 16);
        assert_ne!(id_set_key(&[1, 2]), id_set_key(&[1, 3]));
    }
}
