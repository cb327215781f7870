//! Deterministic merchant normalization
//!
//! Collapses raw statement descriptions into stable, comparable strings:
//! - `normalize` produces the lowercase grouping key the dictionary indexes on
//! - `display_name` produces a gentler, human-readable merchant name
//!
//! Both transforms are pure functions over their input: no I/O, no network,
//! and identical output for identical input.

use regex::Regex;
use tracing::debug;

use crate::error::Result;
use crate::models::Transaction;

/// Grouping key used when nothing survives normalization
pub const UNKNOWN_KEY: &str = "unknown";

/// Display name used when nothing survives cleanup
pub const UNKNOWN_DISPLAY: &str = "Unknown";

/// Bank boilerplate stripped before tokenization.
///
/// Order matters: longer phrases sit above shorter overlapping ones so the
/// specific form is removed intact.
const NOISE_PATTERNS: &[&str] = &[
    r"\[ref\]",
    r"\[name\]",
    r"\[conversion\]",
    r"\[recipient\]",
    // slash-joined truncation/location suffixes ("UBER CANADA/UBE")
    r"/\S*",
    r"visa\s+purchase\s*-*\s*",
    r"visa\s+debit\s*-*\s*",
    r"preauthorized\s+payment\s*-*\s*",
    r"preauthorized\s*-*\s*",
    r"contactless\s+interac",
    r"contactless",
    r"pos\s+purchase",
    r"online\s+banking\s+payment\s+to",
    r"online\s+banking",
    r"internet\s+transfer",
    r"e-transfer",
    r"interac\s+purchase",
    r"interacpurchase",
    r"onlinebankingpayment",
    r"retail\s+purchase",
    r"billpayment\s+",
    r"payrolldeposit\s+",
];

/// Corporate suffixes and generic transaction words dropped from keys
const STOPWORDS: &[&str] = &[
    "inc",
    "ltd",
    "llc",
    "corp",
    "corporation",
    "company",
    "co",
    "canada",
    "canadian",
    "the",
    "and",
    "of",
    "for",
    "services",
    "service",
    "group",
    "international",
    "intl",
    "payment",
    "purchase",
    "transfer",
    "deposit",
    "withdrawal",
    "bill",
    "payroll",
];

/// Transaction-type words dropped from display names, unless the name is
/// that single word
const DISPLAY_STOPWORDS: &[&str] = &["bill", "payroll", "payment", "deposit"];

/// Brands whose casing should not be reinvented by per-word capitalization
const PROPER_CASE: &[(&str, &str)] = &[
    ("uber", "Uber"),
    ("spotify", "Spotify"),
    ("netflix", "Netflix"),
    ("amazon", "Amazon"),
    ("google", "Google"),
    ("apple", "Apple"),
    ("starbucks", "Starbucks"),
    ("mcdonalds", "McDonald's"),
    ("goodlife", "GoodLife"),
    ("wealthsimple", "Wealthsimple"),
    ("cibc", "CIBC"),
    ("rbc", "RBC"),
    ("bell", "Bell"),
    ("rogers", "Rogers"),
    ("telus", "Telus"),
    ("uniqlo", "Uniqlo"),
    ("simons", "Simons"),
];

/// Merchant string normalizer.
///
/// Compiles its pattern tables once; construct one per pipeline and reuse it
/// across transactions. Methods take `&self` and the type is `Send + Sync`,
/// so independent pipelines can share a reference.
pub struct MerchantNormalizer {
    camel_break: Regex,
    acronym_break: Regex,
    noise: Vec<Regex>,
    digits: Regex,
    non_letters: Regex,
    onebill_key: Regex,
    onebill_display: Regex,
    preauthorized_tail: Regex,
    bracket_markers: Regex,
    trailing_store_code: Regex,
    leading_separators: Regex,
    long_digit_runs: Regex,
}

impl MerchantNormalizer {
    pub fn new() -> Result<Self> {
        let noise = NOISE_PATTERNS
            .iter()
            .map(|pattern| Regex::new(&format!("(?i){}", pattern)))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            camel_break: Regex::new(r"([a-z])([A-Z])")?,
            acronym_break: Regex::new(r"([A-Z]+)([A-Z][a-z])")?,
            noise,
            digits: Regex::new(r"\d+")?,
            non_letters: Regex::new(r"[^a-z\s]")?,
            onebill_key: Regex::new(r"(?i)([a-z]+)\s*onebill")?,
            onebill_display: Regex::new(r"(?i)([A-Za-z\s]+)onebill")?,
            preauthorized_tail: Regex::new(r"(?i)preauthorized (?:debit|payment)\s+(?:\d+\s+)?(.+)")?,
            bracket_markers: Regex::new(r"\[.*?\]")?,
            trailing_store_code: Regex::new(r"-\d{4}$")?,
            leading_separators: Regex::new(r"^[\s\-]+")?,
            long_digit_runs: Regex::new(r"\d{8,}")?,
        })
    }

    /// Produce the canonical grouping key for a raw description.
    ///
    /// Cascade: camel-case split, lowercase, boilerplate removal, digit and
    /// non-letter removal, then stopword filtering. Returns [`UNKNOWN_KEY`]
    /// when nothing survives.
    pub fn normalize(&self, description: &str) -> String {
        if description.is_empty() {
            return UNKNOWN_KEY.to_string();
        }

        let text = self.split_camel_case(description);
        let mut text = text.to_lowercase();

        for pattern in &self.noise {
            text = pattern.replace_all(&text, "").into_owned();
        }

        // "BELLONEBILL14" style compounds reduce to the company name
        if text.contains("onebill") {
            if let Some(caps) = self.onebill_key.captures(&text) {
                text = caps[1].to_string();
            }
        }

        let text = self.digits.replace_all(&text, "");
        let text = self.non_letters.replace_all(&text, " ");

        // only the stopword list drops tokens; short camel-split fragments
        // ("la" in "La Maison Simons") keep their place in the key
        let words: Vec<&str> = text
            .split_whitespace()
            .filter(|w| !STOPWORDS.contains(w))
            .collect();

        let key = words.join(" ");
        if key.is_empty() {
            UNKNOWN_KEY.to_string()
        } else {
            key
        }
    }

    /// Produce a human-readable merchant name for a raw description.
    ///
    /// Less aggressive than [`normalize`](Self::normalize): keeps more
    /// context, pins known transfer phrasings to fixed labels, and applies
    /// the brand casing table. Output is capped at five words.
    pub fn display_name(&self, description: &str) -> String {
        if description.is_empty() {
            return UNKNOWN_DISPLAY.to_string();
        }

        let lower = description.to_lowercase();

        // Transfers are labels, not merchants
        if lower.contains("internet transfer") || lower.contains("fulfill request") {
            return "Internal Transfer".to_string();
        }
        if lower.contains("e-transfer") {
            return "Interac e-Transfer".to_string();
        }

        // Preauthorized debits carry the merchant after the reference number
        let mut source = description.to_string();
        if lower.contains("preauthorized debit") || lower.contains("preauthorized payment") {
            if let Some(caps) = self.preauthorized_tail.captures(description) {
                let tail = caps[1].trim().to_string();
                if !tail.is_empty() {
                    source = tail;
                }
            }
        }

        let mut text = self.split_camel_case(&source);
        for pattern in &self.noise {
            text = pattern.replace_all(&text, "").into_owned();
        }

        let text = self.bracket_markers.replace_all(&text, "");
        let text = self.trailing_store_code.replace_all(&text, "");
        let text = self.leading_separators.replace_all(&text, "");
        let mut text = self.long_digit_runs.replace_all(&text, "").into_owned();

        if text.to_lowercase().contains("onebill") {
            if let Some(caps) = self.onebill_display.captures(&text) {
                text = caps[1].to_string();
            }
        }

        let words: Vec<&str> = text.split_whitespace().collect();
        let kept: Vec<&str> = words
            .iter()
            .filter(|w| {
                words.len() == 1 || !DISPLAY_STOPWORDS.contains(&w.to_lowercase().as_str())
            })
            .copied()
            .collect();

        let mut display_words = Vec::with_capacity(kept.len());
        for word in kept {
            let word_lower = word.to_lowercase();
            if let Some((_, proper)) = PROPER_CASE.iter().find(|(key, _)| *key == word_lower) {
                display_words.push((*proper).to_string());
            } else if word.chars().count() > 3 && is_all_caps(word) {
                display_words.push(capitalize(word));
            } else {
                display_words.push(word.to_string());
            }
        }

        let name = display_words
            .iter()
            .take(5)
            .cloned()
            .collect::<Vec<_>>()
            .join(" ");

        if name.is_empty() {
            UNKNOWN_DISPLAY.to_string()
        } else {
            name
        }
    }

    /// Fill `normalized_merchant` and `merchant_display` on a transaction.
    ///
    /// Prefers the reconstructed `merchant_raw` when it carries a real value;
    /// falls back to the full description otherwise.
    pub fn annotate(&self, transaction: &mut Transaction) {
        let source = if !transaction.merchant_raw.is_empty()
            && transaction.merchant_raw != UNKNOWN_DISPLAY
        {
            transaction.merchant_raw.clone()
        } else {
            transaction.description.clone()
        };

        let key = self.normalize(&source);
        if key == UNKNOWN_KEY {
            debug!("Merchant normalized to unknown: {}", transaction.description);
        }
        transaction.normalized_merchant = Some(key);
        transaction.merchant_display = Some(self.display_name(&source));
    }

    /// Annotate a whole batch in place.
    pub fn annotate_transactions(&self, transactions: &mut [Transaction]) {
        for transaction in transactions.iter_mut() {
            self.annotate(transaction);
        }
    }

    /// Split camelCase and glued compound words.
    ///
    /// "LaMaisonSimons" -> "La Maison Simons",
    /// "BELLONEBILLOnline" -> "BELLONEBILL Online"
    fn split_camel_case(&self, text: &str) -> String {
        let text = self.camel_break.replace_all(text, "$1 $2");
        self.acronym_break.replace_all(&text, "$1 $2").into_owned()
    }
}

fn is_all_caps(word: &str) -> bool {
    word.chars().any(|c| c.is_alphabetic()) && !word.chars().any(|c| c.is_lowercase())
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}
