//! Confidence scoring for merchant resolution
//!
//! Every resolved transaction gets a 0-100 score from two signals:
//! - pattern strength: how clean the normalization key looks on its own
//! - dictionary evidence: how often this merchant has been seen before
//!
//! When the merchant is in the dictionary the two blend (dictionary weighted
//! higher, real usage beats pattern shape); otherwise the pattern score
//! stands alone. Scores below the review threshold land in the review queue.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dictionary::MerchantDictionary;
use crate::models::Transaction;

/// Starting point before boosts and penalties
const BASE_SCORE: i32 = 70;
/// Transfers are not merchants; they resolve to fixed labels and never need review
const AUTO_APPROVE_SCORE: u8 = 95;
/// Scores at or above this are high confidence
const HIGH_THRESHOLD: u8 = 80;
/// Scores at or above this are medium confidence
const MEDIUM_THRESHOLD: u8 = 60;

/// Key fragments that mark a transfer rather than a merchant
const TRANSFER_TERMS: &[&str] = &["interac", "transfer", "banking", "payment", "preauthorized"];

/// Well-known merchant fragments; a hit is strong evidence the
/// normalization picked the right name
const STRONG_MERCHANTS: &[&str] = &[
    "uber",
    "starbucks",
    "tim",
    "hortons",
    "mcdonalds",
    "amazon",
    "netflix",
    "spotify",
    "apple",
    "google",
    "walmart",
    "target",
    "shoppers",
    "loblaws",
    "metro",
    "food",
    "basics",
    "sobeys",
    "wealthsimple",
    "goodlife",
    "fitness",
    "sportchek",
    "marks",
    "rexall",
    "pharmacy",
    "lemonade",
];

/// Keys that are pure transaction mechanics, not names
const NOISE_KEYS: &[&str] = &["unknown", "debit", "credit", "purchase", "payment", "transfer"];

/// Dictionary evidence tier from how often a merchant has been seen
pub fn history_score(transaction_count: u64) -> u8 {
    if transaction_count >= 10 {
        95
    } else if transaction_count >= 5 {
        85
    } else if transaction_count >= 2 {
        70
    } else {
        // in the dictionary, but barely used
        55
    }
}

/// Confidence bands reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    pub fn from_score(score: u8) -> Self {
        if score >= HIGH_THRESHOLD {
            Self::High
        } else if score >= MEDIUM_THRESHOLD {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Score breakdown attached to each transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidenceResult {
    pub score: u8,
    pub level: ConfidenceLevel,
    pub in_dictionary: bool,
    pub dictionary_score: u8,
    pub pattern_score: u8,
}

/// Scorer tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Weight of dictionary evidence in the blend
    pub dictionary_weight: f64,
    /// Weight of pattern strength in the blend
    pub pattern_weight: f64,
    /// Scores below this go to the review queue
    pub review_threshold: u8,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            dictionary_weight: 0.6, // real usage beats pattern shape
            pattern_weight: 0.4,
            review_threshold: 60,
        }
    }
}

/// Review split produced by [`ConfidenceScorer::partition`]
#[derive(Debug)]
pub struct Partitioned {
    /// Below the review threshold, in input order
    pub low: Vec<Transaction>,
    /// At or above the review threshold, in input order
    pub high: Vec<Transaction>,
    pub summary: ScoreSummary,
}

/// Batch-level scoring stats
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreSummary {
    pub threshold: u8,
    pub high_count: usize,
    pub medium_count: usize,
    pub low_count: usize,
    pub average_score: f64,
    /// How many transactions need review
    pub below_threshold: usize,
}

/// Scores merchant resolutions against a dictionary
pub struct ConfidenceScorer {
    config: ScoringConfig,
}

impl ConfidenceScorer {
    pub fn new() -> Self {
        Self::with_config(ScoringConfig::default())
    }

    pub fn with_config(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// How clean the normalization looks on its own, 0-100.
    ///
    /// Transfers auto-approve. Known merchant fragments and clean single
    /// words boost; digits, very short keys, long word runs, and pure noise
    /// keys penalize.
    pub fn pattern_score(&self, description: &str, normalized: &str) -> u8 {
        if description.is_empty() || normalized.is_empty() {
            return 0;
        }
        let normalized = normalized.to_lowercase();

        if TRANSFER_TERMS.iter().any(|term| normalized.contains(term)) {
            return AUTO_APPROVE_SCORE;
        }

        let mut score = BASE_SCORE;

        if STRONG_MERCHANTS
            .iter()
            .any(|merchant| normalized.contains(merchant))
        {
            score += 25;
        }

        let word_count = normalized.split_whitespace().count();
        let length = normalized.chars().count();
        if word_count == 1 && length >= 4 {
            score += 15;
        }

        if normalized.chars().any(|c| c.is_ascii_digit()) {
            score -= 25;
        }
        if length < 3 {
            score -= 30;
        }
        if word_count > 4 {
            score -= 15 * (word_count as i32 - 4);
        }
        if NOISE_KEYS.contains(&normalized.as_str()) {
            score -= 40;
        }

        score.clamp(0, 100) as u8
    }

    /// Full score for one transaction. Without a dictionary (or without a
    /// hit) the pattern score stands alone.
    pub fn score(
        &self,
        transaction: &Transaction,
        dictionary: Option<&MerchantDictionary>,
    ) -> ConfidenceResult {
        let normalized = transaction.normalized_merchant.as_deref().unwrap_or("");
        let pattern_score = self.pattern_score(&transaction.description, normalized);

        let entry = dictionary.and_then(|dict| dict.lookup(normalized));
        let in_dictionary = entry.is_some();
        let dictionary_score = entry
            .map(|entry| history_score(entry.transaction_count))
            .unwrap_or(0);

        let score = if in_dictionary {
            let blended = f64::from(dictionary_score) * self.config.dictionary_weight
                + f64::from(pattern_score) * self.config.pattern_weight;
            blended.round() as u8
        } else {
            pattern_score
        };

        ConfidenceResult {
            score,
            level: ConfidenceLevel::from_score(score),
            in_dictionary,
            dictionary_score,
            pattern_score,
        }
    }

    /// Score a batch in place
    pub fn annotate(
        &self,
        transactions: &mut [Transaction],
        dictionary: Option<&MerchantDictionary>,
    ) {
        for transaction in transactions.iter_mut() {
            transaction.confidence = Some(self.score(transaction, dictionary));
        }
    }

    /// Score a batch and split it around the review threshold, preserving
    /// input order within each side.
    pub fn partition(
        &self,
        transactions: Vec<Transaction>,
        dictionary: Option<&MerchantDictionary>,
    ) -> Partitioned {
        let total = transactions.len();
        let mut low = Vec::new();
        let mut high = Vec::new();
        let mut high_count = 0usize;
        let mut medium_count = 0usize;
        let mut low_count = 0usize;
        let mut total_score = 0u64;

        for mut transaction in transactions {
            let result = self.score(&transaction, dictionary);
            total_score += u64::from(result.score);
            match result.level {
                ConfidenceLevel::High => high_count += 1,
                ConfidenceLevel::Medium => medium_count += 1,
                ConfidenceLevel::Low => low_count += 1,
            }

            let below = result.score < self.config.review_threshold;
            transaction.confidence = Some(result);
            if below {
                low.push(transaction);
            } else {
                high.push(transaction);
            }
        }

        let average_score = if total > 0 {
            total_score as f64 / total as f64
        } else {
            0.0
        };
        let below_threshold = low.len();

        info!(
            "Scored {} transactions: {} high, {} medium, {} low ({} need review)",
            total, high_count, medium_count, low_count, below_threshold
        );

        Partitioned {
            low,
            high,
            summary: ScoreSummary {
                threshold: self.config.review_threshold,
                high_count,
                medium_count,
                low_count,
                average_score,
                below_threshold,
            },
        }
    }
}

impl Default for ConfidenceScorer {
    fn default() -> Self {
        Self::new()
    }
}
