//! Hybrid ranking of vector search candidates

use chrono::{DateTime, FixedOffset};
use serde::Serialize;

use crate::{
    model::email_embedding::CandidateRow,
    search::intent::SearchIntent,
    server_config::RankingWeights,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub similarity: f64,
    pub recency: f64,
    pub importance: f64,
    pub urgency: f64,
    pub intent_alignment: f64,
}

impl ScoreBreakdown {
    pub fn total(&self, weights: &RankingWeights) -> f64 {
        weights.similarity * self.similarity
            + weights.recency * self.recency
            + weights.importance * self.importance
            + weights.urgency * self.urgency
            + weights.intent * self.intent_alignment
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedEmail {
    pub email_id: i32,
    pub subject: String,
    pub sender: String,
    pub received_at: DateTime<FixedOffset>,
    pub category: Option<String>,
    pub matched_type: String,
    pub intent: SearchIntent,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

#[derive(Debug, Clone, Copy)]
pub struct Ranker {
    pub weights: RankingWeights,
    pub half_life_days: f64,
}

/// `0.5^(age / half_life)`; emails dated in the future count as brand new
pub fn recency_score(
    received_at: DateTime<FixedOffset>,
    now: DateTime<FixedOffset>,
    half_life_days: f64,
) -> f64 {
    if half_life_days <= 0.0 {
        return 0.0;
    }
    let age_days = ((now - received_at).num_seconds() as f64 / 86_400.0).max(0.0);
    0.5f64.powf(age_days / half_life_days)
}

pub fn importance_score(importance: f64, is_important: bool, is_flagged: bool) -> f64 {
    let mut score = importance;
    if is_important {
        score += 0.1;
    }
    if is_flagged {
        score += 0.1;
    }
    score.clamp(0.0, 1.0)
}

/// Classify an email from the text available at ranking time
pub fn email_intent(subject: &str, category: Option<&str>) -> SearchIntent {
    match category {
        Some(category) => SearchIntent::classify(&format!("{} {}", subject, category)),
        None => SearchIntent::classify(subject),
    }
}

impl Ranker {
    pub fn score(
        &self,
        candidate: &CandidateRow,
        query_intent: SearchIntent,
        now: DateTime<FixedOffset>,
    ) -> RankedEmail {
        let intent = email_intent(&candidate.subject, candidate.category.as_deref());
        let breakdown = ScoreBreakdown {
            similarity: candidate.similarity.clamp(-1.0, 1.0),
            recency: recency_score(candidate.received_at, now, self.half_life_days),
            importance: importance_score(
                candidate.importance_score,
                candidate.is_important,
                candidate.is_flagged,
            ),
            urgency: candidate.urgency_score.clamp(0.0, 1.0),
            intent_alignment: SearchIntent::alignment(query_intent, intent),
        };

        RankedEmail {
            email_id: candidate.email_id,
            subject: candidate.subject.clone(),
            sender: candidate.sender.clone(),
            received_at: candidate.received_at,
            category: candidate.category.clone(),
            matched_type: candidate.embedding_type.clone(),
            intent,
            score: breakdown.total(&self.weights),
            breakdown,
        }
    }

    /// Score, sort and truncate. Ties on score fall back to similarity,
    /// then to the newer email.
    pub fn rank(
        &self,
        candidates: &[CandidateRow],
        query_intent: SearchIntent,
        now: DateTime<FixedOffset>,
        limit: usize,
    ) -> Vec<RankedEmail> {
        let mut ranked: Vec<RankedEmail> = candidates
            .iter()
            .map(|c| self.score(c, query_intent, now))
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.breakdown.similarity.total_cmp(&a.breakdown.similarity))
                .then_with(|| b.received_at.cmp(&a.received_at))
        });
        ranked.truncate(limit);
        ranked
    }
}
