//! Sift Core Library
//!
//! Shared functionality for the Sift bank statement tool:
//! - Layout reconstruction from positioned PDF text tokens
//! - Merchant normalization from raw statement descriptions
//! - Persistent merchant dictionary with guardrails and learning
//! - Dictionary bootstrap from observed transaction batches
//! - Confidence scoring and review-queue partitioning
//! - Multi-statement merge with deduplication

pub mod confidence;
pub mod dictionary;
pub mod error;
pub mod layout;
pub mod merge;
pub mod models;
pub mod normalize;

pub use confidence::{
    ConfidenceLevel, ConfidenceResult, ConfidenceScorer, Partitioned, ScoreSummary, ScoringConfig,
};
pub use dictionary::builder::{BuildReport, DictionaryBuilder};
pub use dictionary::guardrails::{DictionaryConfig, Guardrails, MatchKind};
pub use dictionary::{
    ChangeRecord, DictionaryStats, LearnOutcome, MatchReport, MerchantDictionary, MerchantEntry,
    Suggestion,
};
pub use error::{Error, Result};
pub use layout::{ColumnSpan, LayoutReconstructor, VariantGeometry};
pub use merge::{
    DeduplicationStats, FuzzyCluster, MergeConfig, MergeReport, Period, StatementMerger,
    StatementSummary,
};
pub use models::{Category, Statement, StatementVariant, Token, Transaction, TransactionKind};
pub use normalize::MerchantNormalizer;
