//! Multi-statement merge with deduplication
//!
//! Overlapping statement exports carry the same transaction more than once.
//! The merger drops exact repeats, flags near-duplicates for review instead
//! of guessing, and orders the survivors chronologically:
//! - exact key (date, merchant key, amount): first occurrence wins
//! - fuzzy key buckets amounts to the nearest nickel; buckets holding more
//!   than one survivor within the tolerance are flagged, never removed
//!
//! Statement dates carry no year, so ordering assumes one (the current year
//! by default). Unparseable dates sort to the front rather than failing the
//! merge.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::models::{Statement, Transaction};

/// Merge tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Bucket size and maximum spread for near-duplicate flagging
    pub amount_tolerance: f64,
    /// Year assumed when ordering statement dates; None uses the current year
    pub assumed_year: Option<i32>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            amount_tolerance: 0.05, // one nickel
            assumed_year: None,
        }
    }
}

/// Near-duplicate group left for review
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuzzyCluster {
    pub date: String,
    /// Shared normalization key
    pub merchant: String,
    pub transactions: Vec<Transaction>,
    /// Spread between the largest and smallest amount, rounded to cents
    pub amount_variance: f64,
}

/// Counters for one merge pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeduplicationStats {
    pub total_input_transactions: usize,
    pub exact_duplicates_removed: usize,
    pub fuzzy_matches_flagged: usize,
    pub unique_transactions: usize,
}

/// Provenance for one merged statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementSummary {
    /// Basename only; full paths are caller-local
    pub source_file: String,
    pub extracted_at: DateTime<Utc>,
    pub transaction_count: usize,
}

/// First and last statement-local date after ordering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub start: String,
    pub end: String,
}

/// Everything a merge pass produces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeReport {
    pub merged_at: DateTime<Utc>,
    pub statements_processed: Vec<StatementSummary>,
    pub period: Period,
    pub deduplication_stats: DeduplicationStats,
    pub fuzzy_matches: Vec<FuzzyCluster>,
    /// Basenames shared by more than one input statement
    #[serde(default)]
    pub warnings: Vec<String>,
    pub transactions: Vec<Transaction>,
}

/// Merges statement batches into one deduplicated, ordered list
pub struct StatementMerger {
    config: MergeConfig,
    month_first: Regex,
    day_first: Regex,
}

impl StatementMerger {
    pub fn new() -> Result<Self> {
        Self::with_config(MergeConfig::default())
    }

    pub fn with_config(config: MergeConfig) -> Result<Self> {
        Ok(Self {
            config,
            month_first: Regex::new(r"^([A-Za-z]+)\s*(\d+)")?,
            day_first: Regex::new(r"^(\d+)([A-Za-z]+)")?,
        })
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Merge statements into one report. Duplicate file names are carried on
    /// the report as warnings but merged anyway; transaction-level
    /// deduplication catches the actual repeats.
    pub fn merge(&self, statements: &[Statement]) -> MergeReport {
        let warnings = if statements.len() > 1 {
            duplicate_basenames(statements)
        } else {
            Vec::new()
        };
        for name in &warnings {
            warn!("Duplicate statement file in merge input: {}", name);
        }

        let mut all_transactions = Vec::new();
        let mut summaries = Vec::new();
        for statement in statements {
            all_transactions.extend(statement.transactions.iter().cloned());
            summaries.push(StatementSummary {
                source_file: basename(&statement.source_file),
                extracted_at: statement.extracted_at,
                transaction_count: statement.transactions.len(),
            });
        }

        let total_input = all_transactions.len();
        let (mut unique, removed, fuzzy_matches) = self.deduplicate(all_transactions);

        unique.sort_by_cached_key(|transaction| self.parse_date(&transaction.date));

        let period = Period {
            start: unique.first().map(|t| t.date.clone()).unwrap_or_default(),
            end: unique.last().map(|t| t.date.clone()).unwrap_or_default(),
        };

        info!(
            "Merged {} statements: {} transactions in, {} duplicates removed, {} flagged, {} out",
            statements.len(),
            total_input,
            removed,
            fuzzy_matches.len(),
            unique.len()
        );

        MergeReport {
            merged_at: Utc::now(),
            statements_processed: summaries,
            period,
            deduplication_stats: DeduplicationStats {
                total_input_transactions: total_input,
                exact_duplicates_removed: removed,
                fuzzy_matches_flagged: fuzzy_matches.len(),
                unique_transactions: unique.len(),
            },
            fuzzy_matches,
            warnings,
            transactions: unique,
        }
    }

    fn deduplicate(
        &self,
        transactions: Vec<Transaction>,
    ) -> (Vec<Transaction>, usize, Vec<FuzzyCluster>) {
        let mut seen: HashSet<(String, String, i64)> = HashSet::new();
        let mut fuzzy_groups: BTreeMap<(String, String, i64), Vec<Transaction>> = BTreeMap::new();
        let mut unique = Vec::new();
        let mut removed = 0usize;

        for transaction in transactions {
            if !seen.insert(self.exact_key(&transaction)) {
                debug!(
                    "Exact duplicate dropped: {} {} {:.2}",
                    transaction.date, transaction.merchant_raw, transaction.amount
                );
                removed += 1;
                continue;
            }

            fuzzy_groups
                .entry(self.fuzzy_key(&transaction))
                .or_default()
                .push(transaction.clone());
            unique.push(transaction);
        }

        // survivors sharing a bucket within tolerance are flagged for review
        let mut clusters = Vec::new();
        for ((date, merchant, _), group) in fuzzy_groups {
            if group.len() < 2 {
                continue;
            }
            let mut min = f64::INFINITY;
            let mut max = f64::NEG_INFINITY;
            for transaction in &group {
                min = min.min(transaction.amount);
                max = max.max(transaction.amount);
            }
            let spread = max - min;
            if spread <= self.config.amount_tolerance {
                clusters.push(FuzzyCluster {
                    date,
                    merchant,
                    amount_variance: (spread * 100.0).round() / 100.0,
                    transactions: group,
                });
            }
        }

        (unique, removed, clusters)
    }

    fn exact_key(&self, transaction: &Transaction) -> (String, String, i64) {
        (
            transaction.date.clone(),
            merchant_key(transaction),
            (transaction.amount * 100.0).round() as i64,
        )
    }

    fn fuzzy_key(&self, transaction: &Transaction) -> (String, String, i64) {
        (
            transaction.date.clone(),
            merchant_key(transaction),
            (transaction.amount / self.config.amount_tolerance).round() as i64,
        )
    }

    /// Order a statement-local date string ("Nov 3", "27Oct") under the
    /// assumed year. Unparseable input sorts to the epoch.
    pub fn parse_date(&self, date: &str) -> NaiveDate {
        let year = self
            .config
            .assumed_year
            .unwrap_or_else(|| Utc::now().year());

        if let Some(caps) = self.month_first.captures(date) {
            let composed = format!("{} {} {}", &caps[1], &caps[2], year);
            if let Ok(parsed) = NaiveDate::parse_from_str(&composed, "%b %d %Y") {
                return parsed;
            }
        }
        if let Some(caps) = self.day_first.captures(date) {
            let composed = format!("{} {} {}", &caps[1], &caps[2], year);
            if let Ok(parsed) = NaiveDate::parse_from_str(&composed, "%d %b %Y") {
                return parsed;
            }
        }

        NaiveDate::default()
    }
}

fn merchant_key(transaction: &Transaction) -> String {
    transaction
        .normalized_merchant
        .as_deref()
        .unwrap_or("")
        .trim()
        .to_lowercase()
}

fn basename(source: &str) -> String {
    Path::new(source)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("unknown")
        .to_string()
}

fn duplicate_basenames(statements: &[Statement]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for statement in statements {
        let name = basename(&statement.source_file);
        if !seen.insert(name.clone()) {
            duplicates.push(name);
        }
    }
    duplicates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransactionKind;

    fn merger() -> StatementMerger {
        StatementMerger::with_config(MergeConfig {
            assumed_year: Some(2025),
            ..MergeConfig::default()
        })
        .unwrap()
    }

    fn txn(date: &str, merchant: &str, amount: f64) -> Transaction {
        Transaction {
            date: date.to_string(),
            description: merchant.to_uppercase(),
            merchant_raw: merchant.to_string(),
            amount,
            kind: if amount < 0.0 {
                TransactionKind::Debit
            } else {
                TransactionKind::Credit
            },
            withdrawal: (amount < 0.0).then(|| amount.abs()),
            deposit: (amount >= 0.0).then_some(amount),
            balance: None,
            normalized_merchant: Some(merchant.to_string()),
            merchant_display: None,
            merchant_id: None,
            canonical_name: None,
            category: None,
            matched: false,
            confidence: None,
        }
    }

    #[test]
    fn test_exact_duplicates_keep_first_occurrence() {
        let mut first = txn("Nov 3", "uber", -21.59);
        first.merchant_display = Some("Uber".to_string());
        let mut second = txn("Nov 3", "uber", -21.59);
        second.merchant_display = Some("Uber Duplicate".to_string());

        let statements = vec![
            Statement::new("oct.pdf", vec![first, txn("Nov 4", "starbucks", -6.45)]),
            Statement::new("nov.pdf", vec![second]),
        ];

        let report = merger().merge(&statements);

        assert_eq!(report.deduplication_stats.total_input_transactions, 3);
        assert_eq!(report.deduplication_stats.exact_duplicates_removed, 1);
        assert_eq!(report.deduplication_stats.unique_transactions, 2);
        assert_eq!(report.transactions.len(), 2);

        let kept = report
            .transactions
            .iter()
            .find(|t| t.normalized_merchant.as_deref() == Some("uber"))
            .unwrap();
        assert_eq!(kept.merchant_display.as_deref(), Some("Uber"));
    }

    #[test]
    fn test_near_duplicates_are_flagged_not_removed() {
        let statements = vec![Statement::new(
            "oct.pdf",
            vec![txn("Nov 3", "uber", -21.59), txn("Nov 3", "uber", -21.62)],
        )];

        let report = merger().merge(&statements);

        // both survive, the cluster is only flagged
        assert_eq!(report.transactions.len(), 2);
        assert_eq!(report.deduplication_stats.exact_duplicates_removed, 0);
        assert_eq!(report.deduplication_stats.fuzzy_matches_flagged, 1);

        let cluster = &report.fuzzy_matches[0];
        assert_eq!(cluster.date, "Nov 3");
        assert_eq!(cluster.merchant, "uber");
        assert_eq!(cluster.transactions.len(), 2);
        assert_eq!(cluster.amount_variance, 0.03);
    }

    #[test]
    fn test_amounts_in_different_buckets_are_not_flagged() {
        let statements = vec![Statement::new(
            "oct.pdf",
            vec![txn("Nov 3", "uber", -21.57), txn("Nov 3", "uber", -21.59)],
        )];

        let report = merger().merge(&statements);
        assert_eq!(report.transactions.len(), 2);
        assert!(report.fuzzy_matches.is_empty());
    }

    #[test]
    fn test_transactions_sort_chronologically_across_variants() {
        let statements = vec![
            Statement::new("nov.pdf", vec![txn("Nov 15", "rexall", -12.00)]),
            Statement::new(
                "oct.pdf",
                vec![txn("27Oct", "uber", -21.59), txn("Nov 3", "starbucks", -6.45)],
            ),
        ];

        let report = merger().merge(&statements);

        let dates: Vec<&str> = report.transactions.iter().map(|t| t.date.as_str()).collect();
        assert_eq!(dates, vec!["27Oct", "Nov 3", "Nov 15"]);
        assert_eq!(report.period.start, "27Oct");
        assert_eq!(report.period.end, "Nov 15");
    }

    #[test]
    fn test_unparseable_dates_sort_first() {
        let statements = vec![Statement::new(
            "oct.pdf",
            vec![txn("Nov 3", "uber", -21.59), txn("???", "mystery", -5.00)],
        )];

        let report = merger().merge(&statements);
        assert_eq!(report.transactions[0].date, "???");
    }

    #[test]
    fn test_date_parsing_handles_both_layouts() {
        let merger = merger();
        assert_eq!(
            merger.parse_date("Nov 3"),
            NaiveDate::from_ymd_opt(2025, 11, 3).unwrap()
        );
        assert_eq!(
            merger.parse_date("27Oct"),
            NaiveDate::from_ymd_opt(2025, 10, 27).unwrap()
        );
        assert_eq!(merger.parse_date("not a date"), NaiveDate::default());
        // day out of range falls back rather than guessing
        assert_eq!(merger.parse_date("Nov 95"), NaiveDate::default());
    }

    #[test]
    fn test_statement_provenance_is_recorded() {
        let statements = vec![
            Statement::new("statements/oct.pdf", vec![txn("27Oct", "uber", -21.59)]),
            Statement::new("statements/nov.pdf", vec![txn("Nov 3", "starbucks", -6.45)]),
        ];

        let report = merger().merge(&statements);

        assert_eq!(report.statements_processed.len(), 2);
        assert_eq!(report.statements_processed[0].source_file, "oct.pdf");
        assert_eq!(report.statements_processed[0].transaction_count, 1);
        assert_eq!(report.statements_processed[1].source_file, "nov.pdf");
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_shared_filenames_are_reported_as_warnings() {
        let statements = vec![
            Statement::new("statements/oct.pdf", vec![txn("27Oct", "uber", -21.59)]),
            Statement::new("reupload/oct.pdf", vec![txn("Nov 3", "starbucks", -6.45)]),
        ];

        let report = merger().merge(&statements);

        // same basename from different directories still counts as a reupload
        assert_eq!(report.warnings, vec!["oct.pdf".to_string()]);
        assert_eq!(report.transactions.len(), 2);
    }

    #[test]
    fn test_merging_a_merge_result_is_stable() {
        let statements = vec![
            Statement::new("oct.pdf", vec![txn("27Oct", "uber", -21.59)]),
            Statement::new(
                "nov.pdf",
                vec![txn("Nov 3", "starbucks", -6.45), txn("27Oct", "uber", -21.59)],
            ),
        ];

        let merger = merger();
        let first = merger.merge(&statements);
        assert_eq!(first.deduplication_stats.exact_duplicates_removed, 1);

        let again = merger.merge(&[Statement::new("merged.json", first.transactions.clone())]);
        assert_eq!(again.deduplication_stats.exact_duplicates_removed, 0);
        assert_eq!(again.transactions.len(), first.transactions.len());

        let first_dates: Vec<&String> = first.transactions.iter().map(|t| &t.date).collect();
        let again_dates: Vec<&String> = again.transactions.iter().map(|t| &t.date).collect();
        assert_eq!(first_dates, again_dates);
    }

    #[test]
    fn test_empty_input_produces_empty_report() {
        let report = merger().merge(&[]);
        assert_eq!(report.deduplication_stats.total_input_transactions, 0);
        assert!(report.transactions.is_empty());
        assert_eq!(report.period.start, "");
        assert_eq!(report.period.end, "");
    }
}
