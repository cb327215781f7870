//! Domain models for sift

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::confidence::ConfidenceResult;

/// A positioned text token extracted from one statement page.
///
/// Tokens are produced by the PDF extraction layer and consumed by the
/// layout reconstructor; they are never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// Zero-based page index
    pub page: u32,
    pub x: f64,
    pub y: f64,
    pub text: String,
}

/// Direction of money movement for a reconstructed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Debit,
    Credit,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
        }
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debit" => Ok(Self::Debit),
            "credit" => Ok(Self::Credit),
            _ => Err(format!("Unknown transaction kind: {}", s)),
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Spending categories exposed to callers for validation.
///
/// This set is closed: the dictionary rejects writes carrying anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Category {
    Groceries,
    #[serde(rename = "Dining & Restaurants")]
    Dining,
    Transportation,
    Entertainment,
    Shopping,
    #[serde(rename = "Health & Wellness")]
    Health,
    Utilities,
    Housing,
    Transfer,
    Income,
    #[default]
    Other,
}

impl Category {
    pub const ALL: [Category; 11] = [
        Self::Groceries,
        Self::Dining,
        Self::Transportation,
        Self::Entertainment,
        Self::Shopping,
        Self::Health,
        Self::Utilities,
        Self::Housing,
        Self::Transfer,
        Self::Income,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Groceries => "Groceries",
            Self::Dining => "Dining & Restaurants",
            Self::Transportation => "Transportation",
            Self::Entertainment => "Entertainment",
            Self::Shopping => "Shopping",
            Self::Health => "Health & Wellness",
            Self::Utilities => "Utilities",
            Self::Housing => "Housing",
            Self::Transfer => "Transfer",
            Self::Income => "Income",
            Self::Other => "Other",
        }
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "groceries" => Ok(Self::Groceries),
            "dining & restaurants" | "dining" => Ok(Self::Dining),
            "transportation" => Ok(Self::Transportation),
            "entertainment" => Ok(Self::Entertainment),
            "shopping" => Ok(Self::Shopping),
            "health & wellness" | "health" => Ok(Self::Health),
            "utilities" => Ok(Self::Utilities),
            "housing" => Ok(Self::Housing),
            "transfer" => Ok(Self::Transfer),
            "income" => Ok(Self::Income),
            "other" => Ok(Self::Other),
            _ => Err(format!("Unknown category: {}", s)),
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Known statement layouts for column geometry selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementVariant {
    Cibc,
    Rbc,
}

impl StatementVariant {
    /// Pick a variant by keyword search over extracted header text.
    ///
    /// Returns `None` when nothing matches; reconstruction then runs with
    /// fallback geometry and flags the result best-effort.
    pub fn detect(header_text: &str) -> Option<Self> {
        let header = header_text.to_lowercase();
        if header.contains("cibc") {
            Some(Self::Cibc)
        } else if header.contains("rbc") || header.contains("royal bank") {
            Some(Self::Rbc)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cibc => "cibc",
            Self::Rbc => "rbc",
        }
    }
}

impl std::str::FromStr for StatementVariant {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cibc" => Ok(Self::Cibc),
            "rbc" | "royalbank" | "royal_bank" => Ok(Self::Rbc),
            _ => Err(format!("Unknown statement variant: {}", s)),
        }
    }
}

impl std::fmt::Display for StatementVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A reconstructed statement transaction.
///
/// Created by the layout reconstructor, then enriched in place by the
/// normalizer, the dictionary match stage, and the confidence scorer.
/// Fields added by later stages stay absent from JSON until that stage runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Statement-local date string (e.g. "Nov 3" or "27Oct"); not ISO
    pub date: String,
    pub description: String,
    /// Cleaned merchant text pulled from the description at reconstruction
    pub merchant_raw: String,
    /// Negative = debit, positive = credit
    pub amount: f64,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub withdrawal: Option<f64>,
    pub deposit: Option<f64>,
    pub balance: Option<f64>,

    /// Normalization key (set by the normalizer stage)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_merchant: Option<String>,
    /// Human display name (set by the normalizer stage)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_display: Option<String>,

    /// Stable merchant identity (set by the dictionary match stage)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    /// Whether the dictionary match stage found an entry for this key
    #[serde(default)]
    pub matched: bool,

    /// Resolution confidence (set by the confidence scorer)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<ConfidenceResult>,
}

/// One extracted statement: transactions plus provenance metadata.
///
/// Metadata this library does not understand is kept in `extra` and survives
/// serialization round-trips unchanged, so pipeline stages can be composed
/// in any order without dropping caller fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
    pub source_file: String,
    pub extracted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<StatementVariant>,
    /// Set when reconstruction ran with fallback geometry
    #[serde(default)]
    pub best_effort: bool,
    pub transactions: Vec<Transaction>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Statement {
    pub fn new(source_file: impl Into<String>, transactions: Vec<Transaction>) -> Self {
        Self {
            source_file: source_file.into(),
            extracted_at: Utc::now(),
            extraction_method: None,
            variant: None,
            best_effort: false,
            transactions,
            extra: serde_json::Map::new(),
        }
    }
}
