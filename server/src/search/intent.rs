//! Keyword intent classification for queries and emails

use serde::Serialize;

use crate::util::{keyword_hits, padded_words};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchIntent {
    ActionRequired,
    Scheduling,
    Financial,
    Support,
    Informational,
    General,
}

const ACTION_REQUIRED: &[&str] = &[
    "action required",
    "action needed",
    "please",
    "asap",
    "deadline",
    "due",
    "todo",
    "to do",
    "review",
    "approve",
    "approval",
    "sign",
    "respond",
    "reply",
    "urgent",
    "required",
    "complete",
];

const SCHEDULING: &[&str] = &[
    "meeting",
    "meet",
    "schedule",
    "calendar",
    "invite",
    "invitation",
    "call",
    "appointment",
    "reschedule",
    "availability",
    "available",
    "agenda",
    "zoom",
];

const FINANCIAL: &[&str] = &[
    "invoice",
    "payment",
    "paid",
    "receipt",
    "bill",
    "billing",
    "refund",
    "budget",
    "expense",
    "expenses",
    "price",
    "pricing",
    "quote",
    "tax",
    "bank",
    "transaction",
];

const SUPPORT: &[&str] = &[
    "support",
    "ticket",
    "issue",
    "bug",
    "error",
    "problem",
    "help",
    "troubleshoot",
    "outage",
    "broken",
    "fix",
];

const INFORMATIONAL: &[&str] = &[
    "newsletter",
    "update",
    "updates",
    "announcement",
    "digest",
    "news",
    "report",
    "fyi",
    "summary",
    "weekly",
    "release notes",
];

impl SearchIntent {
    /// Specific intents in tie-break order
    const SPECIFIC: [SearchIntent; 5] = [
        SearchIntent::ActionRequired,
        SearchIntent::Scheduling,
        SearchIntent::Financial,
        SearchIntent::Support,
        SearchIntent::Informational,
    ];

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            SearchIntent::ActionRequired => ACTION_REQUIRED,
            SearchIntent::Scheduling => SCHEDULING,
            SearchIntent::Financial => FINANCIAL,
            SearchIntent::Support => SUPPORT,
            SearchIntent::Informational => INFORMATIONAL,
            SearchIntent::General => &[],
        }
    }

    /// Pick the intent with the most keyword hits. Ties go to the intent
    /// declared first; no hits at all is `General`.
    pub fn classify(text: &str) -> SearchIntent {
        let normalized = padded_words(text);
        if normalized.trim().is_empty() {
            return SearchIntent::General;
        }

        let mut best = SearchIntent::General;
        let mut best_hits = 0;
        for intent in Self::SPECIFIC {
            let hits = keyword_hits(&normalized, intent.keywords());
            if hits > best_hits {
                best = intent;
                best_hits = hits;
            }
        }
        best
    }

    /// How well an email's intent matches the query's intent, in [0, 1]
    pub fn alignment(query: SearchIntent, email: SearchIntent) -> f64 {
        match (query, email) {
            (SearchIntent::General, _) => 0.5,
            (_, SearchIntent::General) => 0.25,
            (q, e) if q == e => 1.0,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(
            SearchIntent::classify("Invoice #123 payment overdue"),
            SearchIntent::Financial
        );
        assert_eq!(
            SearchIntent::classify("Can we schedule a meeting next week?"),
            SearchIntent::Scheduling
        );
        assert_eq!(
            SearchIntent::classify("Bug report: login error"),
            SearchIntent::Support
        );
        assert_eq!(
            SearchIntent::classify("Weekly newsletter digest"),
            SearchIntent::Informational
        );
        assert_eq!(SearchIntent::classify("hello there"), SearchIntent::General);
        assert_eq!(SearchIntent::classify(""), SearchIntent::General);
    }

    #[test]
    fn test_classify_matches_whole_words_only() {
        // "billion" must not count as "bill", "called" not as "call"
        assert_eq!(
            SearchIntent::classify("a billion people called"),
            SearchIntent::General
        );
        assert_eq!(
            SearchIntent::classify("ACTION REQUIRED: sign the form"),
            SearchIntent::ActionRequired
        );
    }

    #[test]
    fn test_classify_tie_uses_declaration_order() {
        // one scheduling hit, one financial hit
        assert_eq!(
            SearchIntent::classify("meeting about the invoice"),
            SearchIntent::Scheduling
        );
    }

    #[test]
    fn test_alignment() {
        use SearchIntent::*;
        assert_eq!(SearchIntent::alignment(Financial, Financial), 1.0);
        assert_eq!(SearchIntent::alignment(General, Financial), 0.5);
        assert_eq!(SearchIntent::alignment(General, General), 0.5);
        assert_eq!(SearchIntent::alignment(Financial, General), 0.25);
        assert_eq!(SearchIntent::alignment(Financial, Support), 0.0);
    }
}
