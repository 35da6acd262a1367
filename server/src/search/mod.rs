pub mod intent;
pub mod ranking;
pub mod service;

use chrono::{DateTime, FixedOffset};
use entity::sea_orm_active_enums::EmbeddingType;

use crate::{
    error::{AppError, AppResult},
    server_config::SearchConfig,
};

pub const MIN_QUERY_CHARS: usize = 3;

/// Optional knobs of a search request, before validation
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub limit: Option<u32>,
    pub min_similarity: Option<f64>,
    pub embedding_types: Option<Vec<EmbeddingType>>,
    pub category: Option<String>,
    pub since: Option<DateTime<FixedOffset>>,
    pub until: Option<DateTime<FixedOffset>>,
}

/// A validated search request
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub text: String,
    pub limit: u32,
    pub min_similarity: f64,
    pub embedding_types: Vec<EmbeddingType>,
    pub category: Option<String>,
    pub since: Option<DateTime<FixedOffset>>,
    pub until: Option<DateTime<FixedOffset>>,
}

impl SearchQuery {
    pub fn new(text: &str, options: SearchOptions, config: &SearchConfig) -> AppResult<Self> {
        let text = text.trim();
        if text.chars().count() < MIN_QUERY_CHARS {
            return Err(AppError::BadRequest(format!(
                "Query must be at least {} characters",
                MIN_QUERY_CHARS
            )));
        }

        if let (Some(since), Some(until)) = (options.since, options.until) {
            if since >= until {
                return Err(AppError::BadRequest(
                    "'since' must be earlier than 'until'".to_string(),
                ));
            }
        }

        let embedding_types = match options.embedding_types {
            Some(types) if !types.is_empty() => types,
            _ => vec![EmbeddingType::Combined],
        };

        Ok(Self {
            text: text.to_string(),
            limit: clamp_limit(options.limit, config),
            min_similarity: options
                .min_similarity
                .unwrap_or(config.default_min_similarity)
                .clamp(0.0, 1.0),
            embedding_types,
            category: options.category.filter(|c| !c.trim().is_empty()),
            since: options.since,
            until: options.until,
        })
    }
}

pub fn clamp_limit(limit: Option<u32>, config: &SearchConfig) -> u32 {
    limit
        .unwrap_or(config.default_limit)
        .clamp(1, config.max_limit.max(1))
}

/// Parse a comma separated list such as `combined,subject`
pub fn parse_embedding_types(raw: &str) -> AppResult<Vec<EmbeddingType>> {
    let mut types = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let embedding_type = match name.to_lowercase().as_str() {
            "subject" => EmbeddingType::Subject,
            "body" => EmbeddingType::Body,
            "combined" => EmbeddingType::Combined,
            "summary" => EmbeddingType::Summary,
            other => {
                return Err(AppError::BadRequest(format!(
                    "Unknown embedding type: {}",
                    other
                )))
            }
        };
        if !types.contains(&embedding_type) {
            types.push(embedding_type);
        }
    }
    Ok(types)
}
