use crate::query::tokenize;

pub const REQUIRED_HIT_WEIGHT: f64 = 6.0;
pub const OPTIONAL_HIT_WEIGHT: f64 = 2.0;
pub const MAX_AREA_COMPONENT: f64 = 6.0;
pub const RANK_BONUS_CEILING: usize = 5;
pub const NO_CONTEXT_PENALTY: f64 = 2.5;
pub const BAD_IMAGE_PENALTY: f64 = 4.0;

const BAD_IMAGE_TERMS: &[&str] = &[
    "map",
    "illustration",
    "drawing",
    "vector",
    "logo",
    "poster",
    "advertisement",
    "diagram",
    "chart",
    "icon",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateScore {
    pub score: f64,
    pub required_hits: usize,
    pub optional_hits: usize,
}

/// Counts required/optional tokens appearing as whole tokens of `text`.
/// Multi-word hints match as consecutive tokens.
pub fn text_match_hits(
    text_tokens: &[String],
    required_tokens: &[String],
    optional_tokens: &[String],
) -> (usize, usize) {
    let padded = format!(" {} ", text_tokens.join(" "));
    let hits = |tokens: &[String]| {
        tokens
            .iter()
            .filter(|token| padded.contains(&format!(" {token} ")))
            .count()
    };
    (hits(required_tokens), hits(optional_tokens))
}

pub fn score_candidate(
    rank_index: usize,
    pixel_area: u64,
    text: &str,
    required_tokens: &[String],
    optional_tokens: &[String],
) -> CandidateScore {
    let text_tokens = tokenize(text);
    let (required_hits, optional_hits) =
        text_match_hits(&text_tokens, required_tokens, optional_tokens);

    let area_component = (pixel_area as f64 / 1_000_000.0).min(MAX_AREA_COMPONENT);
    let rank_bonus = RANK_BONUS_CEILING.saturating_sub(rank_index) as f64;
    let mut score = required_hits as f64 * REQUIRED_HIT_WEIGHT
        + optional_hits as f64 * OPTIONAL_HIT_WEIGHT
        + rank_bonus
        + area_component;

    if !required_tokens.is_empty() && required_hits == 0 {
        score -= NO_CONTEXT_PENALTY;
    }
    if text_tokens
        .iter()
        .any(|token| BAD_IMAGE_TERMS.contains(&token.as_str()))
    {
        score -= BAD_IMAGE_PENALTY;
    }

    CandidateScore {
        score,
        required_hits,
        optional_hits,
    }
}

/// Rounds to three decimals, the precision candidates are stored and compared at.
pub fn round_score(score: f64) -> f64 {
    (score * 1000.0).round() / 1000.0
}
