//! Statement layout reconstruction
//!
//! Turns positioned text tokens from a statement page into structured
//! transactions:
//! - boilerplate and header/footer tokens are dropped by text and Y-band
//! - surviving tokens group into rows keyed by (page, quantized Y)
//! - row tokens map to logical fields purely by per-variant column X-ranges
//! - a forward scan over rows stitches continuation lines onto the
//!   preceding amount-bearing row and emits finished transactions

use std::collections::BTreeMap;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::{Statement, StatementVariant, Token, Transaction, TransactionKind};
use crate::normalize::UNKNOWN_DISPLAY;

/// Description-only rows absorbed into the current transaction before the
/// scan stops listening, so stray trailing content cannot concatenate forever
const MAX_CONTINUATION_ROWS: usize = 2;

/// Column header and statement-frame words dropped by exact match
const HEADER_WORDS: &[&str] = &[
    "Date",
    "Description",
    "Withdrawals",
    "Deposits",
    "Balance",
    "Transaction",
    "details",
    "continued",
    "Opening",
    "Closing",
    "($)",
    "DateDescriptionWithdrawals",
    "Account",
    "Statement",
    "number",
    "Branch",
    "transit",
    "forward",
    "For",
];

/// Disclaimer and fine-print fragments dropped by substring match
const JUNK_FRAGMENTS: &[&str] = &[
    "Free Transaction",
    "Important:",
    "Foreign Currency",
    "Trademark",
    "Page",
    "10774E PER",
    "names shown",
    "based on",
    "current records",
    "statement will",
    "writing within",
    "applicable to",
    "not reflect",
    "account errors",
    "omissions",
    "irregularities",
    "registered trademark",
    "Licensee",
    "Conversion Fee",
    "administration fee",
    "disclosed",
    "available at",
    "CIBC branch",
    "addition",
    "this is",
    "considered correct",
    "do not report",
    "paperless",
    "period included",
    "does not reflect",
    "holder",
    "occurred prior",
];

/// Transaction-type prefixes removed when pulling the merchant out of a
/// description. Longer variants sit above the shorter ones they contain.
const TYPE_PREFIXES: &[&str] = &[
    "VISA DEBIT RETAIL PURCHASE",
    "RETAIL PURCHASE VISA DEBIT",
    "VISA DEBIT PURCHASE",
    "RETAIL PURCHASE",
    "PREAUTHORIZED DEBIT",
    "DEPOSIT",
    "Contactless Interac purchase",
];

/// Well-known brands recognized in descriptions, first match wins.
/// Patterns match the lowercased text with its spacing intact; compounds the
/// PDF may fuse or split ("FOODBASICS87", "SPORT CHEK") carry both spellings
/// so either tokenization hits without cross-word false positives.
const KNOWN_BRANDS: &[(&str, &str)] = &[
    ("uber", "Uber"),
    ("spotify", "Spotify"),
    ("wealthsimple", "Wealthsimple"),
    ("foodbasics", "Food Basics"),
    ("food basics", "Food Basics"),
    ("starbucks", "Starbucks"),
    ("rexall", "Rexall Pharmacy"),
    ("goodlife", "GoodLife Fitness"),
    ("sportchek", "SportChek"),
    ("sport chek", "SportChek"),
    ("marks", "Marks"),
];

/// Inclusive X-range of one statement column, in PDF points
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ColumnSpan {
    pub min: f64,
    pub max: f64,
}

impl ColumnSpan {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, x: f64) -> bool {
        x >= self.min && x <= self.max
    }
}

/// Fixed column geometry for one statement layout.
///
/// Ranges are measured from real statements, not inferred at runtime.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VariantGeometry {
    pub date: ColumnSpan,
    pub description: ColumnSpan,
    pub withdrawal: ColumnSpan,
    pub deposit: ColumnSpan,
    pub balance: ColumnSpan,
    /// Tokens above this Y on the first page belong to the account header
    pub first_page_top: f64,
    /// Tokens above this Y on later pages belong to the continued-page header
    pub later_page_top: f64,
    /// Tokens below this Y on any page belong to the page footer
    pub footer_y: f64,
}

impl VariantGeometry {
    pub fn for_variant(variant: StatementVariant) -> Self {
        match variant {
            StatementVariant::Cibc => Self::cibc(),
            StatementVariant::Rbc => Self::rbc(),
        }
    }

    pub fn cibc() -> Self {
        Self {
            date: ColumnSpan::new(50.0, 80.0),
            description: ColumnSpan::new(100.0, 325.0),
            withdrawal: ColumnSpan::new(330.0, 400.0),
            deposit: ColumnSpan::new(420.0, 480.0),
            balance: ColumnSpan::new(520.0, 600.0),
            first_page_top: 460.0,
            later_page_top: 120.0,
            footer_y: 650.0,
        }
    }

    pub fn rbc() -> Self {
        Self {
            date: ColumnSpan::new(40.0, 80.0),
            description: ColumnSpan::new(85.0, 250.0),
            withdrawal: ColumnSpan::new(340.0, 400.0),
            deposit: ColumnSpan::new(420.0, 480.0),
            balance: ColumnSpan::new(520.0, 600.0),
            first_page_top: 445.0,
            later_page_top: 120.0,
            footer_y: 650.0,
        }
    }
}

impl Default for VariantGeometry {
    /// The fallback geometry used when no variant is recognized
    fn default() -> Self {
        Self::cibc()
    }
}

/// One reconstructed row: the tokens of a single (page, Y) line, already
/// assigned to their logical fields. Also reused as the in-progress
/// transaction during the forward scan.
#[derive(Debug, Default)]
struct Row {
    date: String,
    description: Vec<String>,
    withdrawal: Option<f64>,
    deposit: Option<f64>,
    balance: Option<f64>,
}

/// Reconstructs transactions from positioned statement tokens.
///
/// Holds the column geometry for one layout variant plus the compiled date
/// patterns; reusable across documents of the same variant.
pub struct LayoutReconstructor {
    geometry: VariantGeometry,
    variant: Option<StatementVariant>,
    fused_date: Regex,
    month_name: Regex,
    long_refs: Regex,
}

impl LayoutReconstructor {
    /// Reconstructor for a recognized statement variant
    pub fn new(variant: StatementVariant) -> Result<Self> {
        Self::build(VariantGeometry::for_variant(variant), Some(variant))
    }

    /// Best-effort reconstructor for documents whose layout was not
    /// recognized. Runs with the fallback geometry; results should be
    /// treated as unverified.
    pub fn fallback() -> Result<Self> {
        warn!("Statement layout not recognized, using fallback column geometry");
        Self::build(VariantGeometry::default(), None)
    }

    /// Detect the variant from extracted header text, falling back when
    /// nothing matches.
    pub fn from_header_text(header_text: &str) -> Result<Self> {
        match StatementVariant::detect(header_text) {
            Some(variant) => Self::new(variant),
            None => Self::fallback(),
        }
    }

    /// Reconstructor with caller-supplied geometry (e.g. a tuned layout for
    /// a statement revision the built-ins do not cover)
    pub fn with_geometry(geometry: VariantGeometry, variant: Option<StatementVariant>) -> Result<Self> {
        Self::build(geometry, variant)
    }

    fn build(geometry: VariantGeometry, variant: Option<StatementVariant>) -> Result<Self> {
        Ok(Self {
            geometry,
            variant,
            // day-first fused form: "27Oct"
            fused_date: Regex::new(r"^\d{1,2}(Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)$")?,
            // month-first split form: "Nov" with the day in a later token
            month_name: Regex::new(r"^(Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)$")?,
            long_refs: Regex::new(r"\b\d{8,}\b")?,
        })
    }

    pub fn variant(&self) -> Option<StatementVariant> {
        self.variant
    }

    /// True when this reconstructor runs with fallback geometry
    pub fn is_fallback(&self) -> bool {
        self.variant.is_none()
    }

    /// Reconstruct the ordered transaction sequence for one document.
    ///
    /// Zero input tokens is a fatal extraction failure: the caller gets an
    /// error, never a silently empty list.
    pub fn reconstruct(&self, tokens: &[Token]) -> Result<Vec<Transaction>> {
        if tokens.is_empty() {
            return Err(Error::Extraction(
                "no text tokens extracted from document".to_string(),
            ));
        }

        let mut kept: Vec<&Token> = tokens.iter().filter(|t| self.keep_token(t)).collect();
        // Stable sort: tokens on one line keep their extraction order
        kept.sort_by(|a, b| a.page.cmp(&b.page).then(a.y.total_cmp(&b.y)));

        let mut rows: BTreeMap<(u32, i64), Row> = BTreeMap::new();
        for token in kept {
            let row = rows.entry((token.page, quantize_y(token.y))).or_default();
            self.assign_to_column(row, token);
        }

        let row_count = rows.len();
        let mut transactions = Vec::new();
        let mut current_date = String::new();
        let mut pending: Option<Row> = None;
        let mut continuation_rows = 0;

        for row in rows.into_values() {
            if !row.date.is_empty() {
                current_date = row.date.clone();
            }

            let has_amount = row.withdrawal.is_some() || row.deposit.is_some();
            if has_amount {
                if let Some(done) = pending.take() {
                    if let Some(tx) = self.finalize(done) {
                        transactions.push(tx);
                    }
                }
                pending = Some(Row {
                    date: current_date.clone(),
                    description: row.description,
                    withdrawal: row.withdrawal,
                    deposit: row.deposit,
                    balance: row.balance,
                });
                continuation_rows = 0;
            } else if let Some(ref mut tx) = pending {
                if continuation_rows < MAX_CONTINUATION_ROWS {
                    tx.description.extend(row.description);
                    continuation_rows += 1;
                }
            }
        }

        if let Some(done) = pending {
            if let Some(tx) = self.finalize(done) {
                transactions.push(tx);
            }
        }

        info!(
            "Reconstructed {} transactions from {} tokens ({} rows)",
            transactions.len(),
            tokens.len(),
            row_count
        );
        Ok(transactions)
    }

    /// Reconstruct and wrap the result in a [`Statement`] envelope carrying
    /// the variant and best-effort flag.
    pub fn reconstruct_statement(&self, source_file: &str, tokens: &[Token]) -> Result<Statement> {
        let transactions = self.reconstruct(tokens)?;
        let mut statement = Statement::new(source_file, transactions);
        statement.variant = self.variant;
        statement.best_effort = self.variant.is_none();
        Ok(statement)
    }

    fn keep_token(&self, token: &Token) -> bool {
        if HEADER_WORDS.contains(&token.text.as_str()) {
            return false;
        }
        if JUNK_FRAGMENTS.iter().any(|junk| token.text.contains(junk)) {
            return false;
        }

        let top = if token.page == 0 {
            self.geometry.first_page_top
        } else {
            self.geometry.later_page_top
        };
        if token.y < top {
            return false;
        }
        if token.y > self.geometry.footer_y {
            return false;
        }
        true
    }

    fn assign_to_column(&self, row: &mut Row, token: &Token) {
        let x = token.x;
        let text = token.text.as_str();

        if self.geometry.date.contains(x) {
            if self.fused_date.is_match(text) || self.month_name.is_match(text) {
                row.date = text.to_string();
            } else if is_day_number(text) && !row.date.is_empty() {
                // split month/day tokens concatenate to "Nov 3"
                row.date.push(' ');
                row.date.push_str(text);
            }
        } else if self.geometry.description.contains(x) {
            row.description.push(token.text.clone());
        } else if self.geometry.withdrawal.contains(x) {
            if let Some(amount) = parse_amount(text) {
                row.withdrawal = Some(amount);
            }
        } else if self.geometry.deposit.contains(x) {
            if let Some(amount) = parse_amount(text) {
                row.deposit = Some(amount);
            }
        } else if self.geometry.balance.contains(x) {
            if let Some(amount) = parse_amount(text) {
                row.balance = Some(amount);
            }
        }
    }

    /// Turn an in-progress row into a transaction, or drop it when the
    /// resolved amount is zero (balance-forward rows and similar noise).
    fn finalize(&self, pending: Row) -> Option<Transaction> {
        let description = pending.description.join(" ").trim().to_string();
        let is_credit = matches!(pending.deposit, Some(d) if d > 0.0);
        let amount = if is_credit {
            pending.deposit.unwrap_or(0.0)
        } else {
            pending.withdrawal.unwrap_or(0.0)
        };

        if amount <= 0.0 {
            debug!("Skipping zero-amount row: {}", description);
            return None;
        }

        Some(Transaction {
            date: pending.date,
            merchant_raw: self.extract_merchant(&description),
            description,
            amount: if is_credit { amount } else { -amount },
            kind: if is_credit {
                TransactionKind::Credit
            } else {
                TransactionKind::Debit
            },
            withdrawal: pending.withdrawal,
            deposit: pending.deposit,
            balance: pending.balance,
            normalized_merchant: None,
            merchant_display: None,
            merchant_id: None,
            canonical_name: None,
            category: None,
            matched: false,
            confidence: None,
        })
    }

    /// Pull a cleaned merchant string out of a reconstructed description.
    ///
    /// Transfers collapse to fixed labels since they are not merchants.
    fn extract_merchant(&self, description: &str) -> String {
        if description.is_empty() {
            return UNKNOWN_DISPLAY.to_string();
        }

        let upper = description.to_uppercase();
        if upper.contains("E-TRANSFER") {
            return "Interac E-Transfer".to_string();
        }
        if upper.contains("INTERNET TRANSFER") {
            return "Internet Transfer".to_string();
        }
        if upper.contains("ONLINE BANKING PAYMENT") {
            return "Online Banking Payment".to_string();
        }
        if upper.contains("PREAUTHORIZED PAYMENT") {
            return "Pre-authorized Payment".to_string();
        }

        let mut merchant = description.to_string();
        for prefix in TYPE_PREFIXES {
            merchant = merchant.replace(prefix, "");
        }

        // keep store numbers like "#0979"; only drop long reference runs
        let merchant = self.long_refs.replace_all(merchant.trim(), "");
        let merchant = merchant.split_whitespace().collect::<Vec<_>>().join(" ");

        let lowered = merchant.to_lowercase();
        for (pattern, brand) in KNOWN_BRANDS {
            if lowered.contains(pattern) {
                return (*brand).to_string();
            }
        }

        if merchant.is_empty() {
            UNKNOWN_DISPLAY.to_string()
        } else {
            merchant
        }
    }
}

fn quantize_y(y: f64) -> i64 {
    (y * 10.0).round() as i64
}

fn is_day_number(text: &str) -> bool {
    !text.is_empty()
        && text.len() <= 2
        && text.chars().all(|c| c.is_ascii_digit())
        && text.parse::<u32>().map(|day| day <= 31).unwrap_or(false)
}

/// Parse a statement dollar amount, tolerating currency symbols, thousands
/// separators, and embedded spaces. Empty, dash-only, or unparsable fields
/// yield `None`.
fn parse_amount(raw: &str) -> Option<f64> {
    if raw.is_empty() {
        return None;
    }

    let cleaned = raw.replace(['$', ',', ' '], "");
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned == "-" {
        return None;
    }

    cleaned.parse::<f64>().ok()
}
