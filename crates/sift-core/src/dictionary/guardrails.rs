//! Guardrails for merchant dictionary writes
//!
//! Every path that adds or edits an entry runs through these checks:
//! - exclusion rules keep non-merchants (transfers, fees, refunds) out
//! - quality thresholds gate automatic inclusion
//! - fuzzy scoring and match-confidence boosting for lookups

use chrono::{Duration, Utc};
use regex::Regex;
use std::collections::HashSet;

use crate::error::Result;
use crate::models::{Transaction, TransactionKind};

use super::MerchantEntry;

/// Normalization keys that are transaction mechanics, not merchants
const EXCLUDED_MERCHANTS: &[&str] = &[
    "unknown",
    "debit",
    "credit",
    "payment",
    "purchase",
    "interac",
    "transfer",
    "withdrawal",
    "deposit",
];

/// Description patterns that must never produce dictionary entries
const EXCLUDED_PATTERNS: &[&str] = &[
    r"^e-transfer",
    r"^internet transfer",
    r"^interac",
    r"monthly fee",
    r"service charge",
    r"nsf fee",
    r"overdraft",
    r"interest charge",
    r"annual fee",
];

/// Confidence boost for an exact alias hit
pub const EXACT_MATCH_BOOST: u8 = 35;
/// Confidence boost for a fuzzy hit
pub const FUZZY_MATCH_BOOST: u8 = 20;
/// The dictionary never claims absolute certainty
pub const MAX_MATCH_CONFIDENCE: u8 = 95;

/// How a lookup found its entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Fuzzy,
}

impl MatchKind {
    fn boost(self) -> u8 {
        match self {
            MatchKind::Exact => EXACT_MATCH_BOOST,
            MatchKind::Fuzzy => FUZZY_MATCH_BOOST,
        }
    }
}

/// Dictionary tuning knobs
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DictionaryConfig {
    /// Minimum observations before automatic inclusion
    pub min_occurrences: u64,
    /// Minimum accumulated spend before automatic inclusion
    pub min_total_spend: f64,
    /// Maximum aliases per entry
    pub max_aliases: usize,
    /// Soft cap on unique entries; automatic inclusion stops here,
    /// explicit user corrections may still exceed it
    pub max_entries: usize,
    /// Days without activity before an entry is archived
    pub archive_after_days: i64,
    /// Minimum similarity for a fuzzy lookup hit
    pub fuzzy_threshold: f64,
}

impl Default for DictionaryConfig {
    fn default() -> Self {
        Self {
            min_occurrences: 2,      // must appear at least twice
            min_total_spend: 5.0,    // at least $5 accumulated
            max_aliases: 10,
            max_entries: 1000,       // plenty for personal finance
            archive_after_days: 365, // unseen for a year
            fuzzy_threshold: 0.7,
        }
    }
}

/// Compiled guardrail checks, shared by the store and the builder
#[derive(Debug)]
pub struct Guardrails {
    config: DictionaryConfig,
    excluded_patterns: Vec<Regex>,
    reference_code: Regex,
}

impl Guardrails {
    pub fn new(config: DictionaryConfig) -> Result<Self> {
        let excluded_patterns = EXCLUDED_PATTERNS
            .iter()
            .map(|pattern| Regex::new(pattern))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            config,
            excluded_patterns,
            reference_code: Regex::new(r"^[\d\-]+$")?,
        })
    }

    pub fn config(&self) -> &DictionaryConfig {
        &self.config
    }

    /// Reason this transaction must not seed a dictionary entry, if any
    pub fn exclude_transaction(&self, transaction: &Transaction) -> Option<String> {
        // credits are income/refunds, never merchants
        if transaction.kind == TransactionKind::Credit {
            return Some("credit_transaction".to_string());
        }

        let description = transaction.description.to_lowercase();
        for (source, pattern) in EXCLUDED_PATTERNS.iter().zip(&self.excluded_patterns) {
            if pattern.is_match(&description) {
                return Some(format!("excluded_pattern_{}", source));
            }
        }

        let key = transaction
            .normalized_merchant
            .as_deref()
            .unwrap_or("")
            .to_lowercase();
        self.exclude_key(&key)
    }

    /// Reason this merchant name must not enter the dictionary, if any
    pub fn exclude_merchant(&self, key: &str, display_name: &str) -> Option<String> {
        if let Some(reason) = self.exclude_key(&key.to_lowercase()) {
            return Some(reason);
        }
        if self.reference_code.is_match(display_name) {
            return Some("reference_code".to_string());
        }
        None
    }

    fn exclude_key(&self, key: &str) -> Option<String> {
        if EXCLUDED_MERCHANTS.contains(&key) {
            return Some(format!("generic_merchant_{}", key));
        }
        if key.chars().count() < 3 {
            return Some("too_short".to_string());
        }
        None
    }

    /// Occurrence and spend floor for automatic inclusion
    pub fn meets_quality_threshold(&self, transaction_count: u64, total_spend: f64) -> bool {
        transaction_count >= self.config.min_occurrences
            && total_spend >= self.config.min_total_spend
    }

    /// True once the entry's last activity falls outside the retention window.
    /// Entries never seen in a transaction age out from their creation time.
    pub fn should_archive(&self, entry: &MerchantEntry) -> bool {
        let last_activity = entry.last_seen.unwrap_or(entry.created_at);
        last_activity < Utc::now() - Duration::days(self.config.archive_after_days)
    }

    /// Structural checks on a complete entry; a non-empty list means reject
    pub fn validate_entry(&self, entry: &MerchantEntry) -> Vec<String> {
        let mut errors = Vec::new();

        if entry.canonical_name.trim().is_empty() {
            errors.push("canonical_name is empty".to_string());
        }
        if entry.aliases.len() > self.config.max_aliases {
            errors.push(format!(
                "too many aliases (max {})",
                self.config.max_aliases
            ));
        }
        if entry.total_spend < 0.0 {
            errors.push("total_spend cannot be negative".to_string());
        }

        errors
    }

    /// Similarity between two normalization keys, 0.0 to 1.0.
    ///
    /// Identical keys score 1.0; substring containment scores by length
    /// ratio; otherwise Jaccard similarity over the word sets.
    pub fn fuzzy_match_score(a: &str, b: &str) -> f64 {
        if a == b {
            return 1.0;
        }

        if a.contains(b) || b.contains(a) {
            let len_a = a.chars().count();
            let len_b = b.chars().count();
            let longer = len_a.max(len_b);
            if longer == 0 {
                return 0.0;
            }
            return len_a.min(len_b) as f64 / longer as f64;
        }

        let words_a: HashSet<&str> = a.split_whitespace().collect();
        let words_b: HashSet<&str> = b.split_whitespace().collect();
        if words_a.is_empty() || words_b.is_empty() {
            return 0.0;
        }

        let overlap = words_a.intersection(&words_b).count();
        let total = words_a.union(&words_b).count();
        overlap as f64 / total as f64
    }

    /// Boost a base confidence for the way the entry was matched, capped so
    /// the dictionary never returns certainty.
    pub fn match_confidence(base: u8, kind: MatchKind) -> u8 {
        MAX_MATCH_CONFIDENCE.min(base.saturating_add(kind.boost()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::models::Category;

    fn guardrails() -> Guardrails {
        Guardrails::new(DictionaryConfig::default()).unwrap()
    }

    fn debit(description: &str, normalized: &str) -> Transaction {
        Transaction {
            date: "Nov 3".to_string(),
            description: description.to_string(),
            merchant_raw: description.to_string(),
            amount: -10.0,
            kind: TransactionKind::Debit,
            withdrawal: Some(10.0),
            deposit: None,
            balance: None,
            normalized_merchant: Some(normalized.to_string()),
            merchant_display: None,
            merchant_id: None,
            canonical_name: None,
            category: None,
            matched: false,
            confidence: None,
        }
    }

    fn entry(canonical: &str, aliases: &[&str]) -> MerchantEntry {
        MerchantEntry {
            merchant_id: "merchant_test_001".to_string(),
            canonical_name: canonical.to_string(),
            category: Category::Other,
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            created_at: Utc::now(),
            transaction_count: 0,
            total_spend: 0.0,
            last_seen: None,
            updated_at: None,
            created_by: None,
            updated_by: None,
            version: 1,
            change_history: Vec::new(),
        }
    }

    #[test]
    fn test_credits_are_excluded() {
        let g = guardrails();
        let mut t = debit("PAYROLL DEPOSIT", "payroll");
        t.kind = TransactionKind::Credit;
        t.amount = 1200.0;
        assert_eq!(g.exclude_transaction(&t), Some("credit_transaction".into()));
    }

    #[test]
    fn test_transfer_descriptions_are_excluded() {
        let g = guardrails();
        let t = debit("E-TRANSFER 012345 SENT", "etransfer");
        let reason = g.exclude_transaction(&t).unwrap();
        assert!(reason.starts_with("excluded_pattern_"));

        let t = debit("MONTHLY FEE", "fee");
        assert!(g.exclude_transaction(&t).is_some());
    }

    #[test]
    fn test_real_merchants_pass() {
        let g = guardrails();
        let t = debit("UBER CANADA", "uber");
        assert_eq!(g.exclude_transaction(&t), None);
    }

    #[test]
    fn test_generic_and_short_keys_are_excluded() {
        let g = guardrails();
        assert_eq!(
            g.exclude_merchant("deposit", "Deposit"),
            Some("generic_merchant_deposit".into())
        );
        assert_eq!(g.exclude_merchant("ab", "AB"), Some("too_short".into()));
        assert_eq!(
            g.exclude_merchant("valid merchant", "1234-5678"),
            Some("reference_code".into())
        );
        assert_eq!(g.exclude_merchant("starbucks", "Starbucks"), None);
    }

    #[test]
    fn test_quality_threshold_needs_count_and_spend() {
        let g = guardrails();
        assert!(!g.meets_quality_threshold(1, 10.0)); // too few occurrences
        assert!(!g.meets_quality_threshold(3, 2.50)); // too little spend
        assert!(g.meets_quality_threshold(2, 5.0));
        assert!(g.meets_quality_threshold(5, 50.0));
    }

    #[test]
    fn test_fuzzy_score_tiers() {
        assert_eq!(Guardrails::fuzzy_match_score("uber", "uber"), 1.0);
        assert_eq!(Guardrails::fuzzy_match_score("uber", "uber ube"), 0.5);
        assert_eq!(Guardrails::fuzzy_match_score("amazon", "amazon prime"), 0.5);
        assert_eq!(Guardrails::fuzzy_match_score("starbucks", "walmart"), 0.0);
        // word overlap without containment
        let score = Guardrails::fuzzy_match_score("food basics store", "food basics market");
        assert_eq!(score, 0.5);
    }

    #[test]
    fn test_match_confidence_caps_at_95() {
        assert_eq!(Guardrails::match_confidence(85, MatchKind::Exact), 95);
        assert_eq!(Guardrails::match_confidence(40, MatchKind::Fuzzy), 60);
        assert_eq!(Guardrails::match_confidence(95, MatchKind::Fuzzy), 95);
    }

    #[test]
    fn test_archival_uses_last_seen_then_created_at() {
        let g = guardrails();

        let mut stale = entry("Old Shop", &["old shop"]);
        stale.last_seen = Some(Utc::now() - Duration::days(400));
        assert!(g.should_archive(&stale));

        let mut fresh = entry("New Shop", &["new shop"]);
        fresh.last_seen = Some(Utc::now() - Duration::days(10));
        assert!(!g.should_archive(&fresh));

        // never matched, but created long ago
        let mut unseen = entry("Ghost Shop", &["ghost shop"]);
        unseen.created_at = Utc::now() - Duration::days(400);
        assert!(g.should_archive(&unseen));
    }

    #[test]
    fn test_entry_validation_flags_structural_problems() {
        let g = guardrails();

        assert!(g.validate_entry(&entry("Starbucks", &["starbucks"])).is_empty());

        let blank = entry("  ", &["starbucks"]);
        assert_eq!(g.validate_entry(&blank).len(), 1);

        let aliases: Vec<String> = (0..12).map(|i| format!("alias{}", i)).collect();
        let mut bloated = entry("Starbucks", &[]);
        bloated.aliases = aliases;
        assert!(!g.validate_entry(&bloated).is_empty());
    }
}
