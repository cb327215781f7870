//! Dictionary bootstrap from observed transactions
//!
//! Accumulates per-merchant stats over a transaction batch, then promotes the
//! keys that clear the quality gates into dictionary entries with a
//! rule-suggested category. Keys that fail a gate are reported with the
//! reason so a review pass can see what was left out.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::models::{Category, Transaction};
use crate::normalize::UNKNOWN_KEY;

use super::guardrails::{DictionaryConfig, Guardrails};
use super::{title_case, MerchantDictionary};

/// Sample descriptions kept per candidate
const SAMPLE_LIMIT: usize = 3;
/// Sample descriptions are truncated to this many characters
const SAMPLE_CHARS: usize = 60;

/// Ordered category rules, first hit wins. Each term is matched as a
/// substring of "key display" lowercased. Order matters: "uber eats" must
/// resolve to dining before "uber" resolves to transportation.
const CATEGORY_RULES: &[(&[&str], Category)] = &[
    (
        &[
            "wealthsimple",
            "questrade",
            "investing",
            "securities",
            "investment",
            "brokerage",
            "tfsa",
            "rrsp",
        ],
        Category::Transfer,
    ),
    (
        &["internal transfer", "interac", "e-transfer", "etransfer"],
        Category::Transfer,
    ),
    (
        &[
            "food basics",
            "loblaws",
            "metro",
            "sobeys",
            "no frills",
            "freshco",
            "costco",
            "grocery",
            "supermarket",
        ],
        Category::Groceries,
    ),
    (
        &[
            "skipthedishes",
            "skip the dishes",
            "doordash",
            "uber eats",
            "ubereats",
            "food delivery",
        ],
        Category::Dining,
    ),
    (
        &[
            "starbucks",
            "tim hortons",
            "mcdonalds",
            "subway",
            "restaurant",
            "coffee",
            "pizza",
            "burger",
            "cafe",
            "thai express",
            "chipotle",
        ],
        Category::Dining,
    ),
    (
        &[
            "apple.com",
            "apple bill",
            "adobe",
            "microsoft",
            "google",
            "icloud",
            "dropbox",
            "zoom",
        ],
        Category::Entertainment,
    ),
    (
        &[
            "uber",
            "lyft",
            "taxi",
            "transit",
            "ttc",
            "presto",
            "go transit",
            "parking",
            "petro",
            "esso",
            "shell",
            "gas",
        ],
        Category::Transportation,
    ),
    (
        &[
            "goodlife",
            "fitness",
            "gym",
            "yoga",
            "shoppers drug",
            "pharmacy",
            "rexall",
            "medical",
            "dental",
            "doctor",
        ],
        Category::Health,
    ),
    (
        &[
            "walmart",
            "amazon",
            "canadian tire",
            "dollarama",
            "best buy",
            "ikea",
            "winners",
            "marshalls",
            "bay",
            "gap",
            "old navy",
            "zara",
            "h&m",
            "uniqlo",
        ],
        Category::Shopping,
    ),
    (
        &[
            "spotify",
            "netflix",
            "amazon prime",
            "disney",
            "apple music",
            "youtube premium",
        ],
        Category::Entertainment,
    ),
    (
        &[
            "rogers", "bell", "telus", "fido", "freedom", "hydro", "enbridge", "electric",
            "internet", "phone", "mobile",
        ],
        Category::Utilities,
    ),
    (
        &[
            "expedia",
            "booking",
            "airbnb",
            "air canada",
            "westjet",
            "hotel",
            "airline",
        ],
        Category::Transportation,
    ),
    (
        &["cineplex", "movie", "theatre", "game", "concert"],
        Category::Entertainment,
    ),
    (
        &["lcbo", "beer store", "liquor", "wine", "alcohol"],
        Category::Groceries,
    ),
];

/// Suggest a category for a merchant by keyword rules over the normalization
/// key and display name together.
pub fn suggest_category(key: &str, display_name: &str) -> Category {
    let haystack = format!("{} {}", key.to_lowercase(), display_name.to_lowercase());
    for (terms, category) in CATEGORY_RULES {
        if terms.iter().any(|term| haystack.contains(term)) {
            return *category;
        }
    }
    Category::Other
}

/// Accumulated evidence for one candidate key
#[derive(Debug, Default, Clone)]
struct MerchantObservation {
    count: u64,
    total_spend: f64,
    display_names: BTreeSet<String>,
    sample_descriptions: Vec<String>,
}

/// What one build pass did
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildReport {
    /// Distinct keys that accumulated evidence
    pub candidates: usize,
    pub added: usize,
    /// (key, reason) for every candidate not promoted
    pub skipped: Vec<(String, String)>,
}

/// Accumulates merchant observations and promotes qualifying keys into a
/// [`MerchantDictionary`].
pub struct DictionaryBuilder {
    guardrails: Guardrails,
    observations: BTreeMap<String, MerchantObservation>,
}

impl DictionaryBuilder {
    pub fn new() -> Result<Self> {
        Self::with_config(DictionaryConfig::default())
    }

    pub fn with_config(config: DictionaryConfig) -> Result<Self> {
        Ok(Self {
            guardrails: Guardrails::new(config)?,
            observations: BTreeMap::new(),
        })
    }

    /// Distinct keys observed so far
    pub fn candidates(&self) -> usize {
        self.observations.len()
    }

    /// Fold one transaction into the accumulator. Credits, excluded
    /// descriptions, and generic or unusable keys never accumulate.
    pub fn observe(&mut self, transaction: &Transaction) {
        let Some(key) = transaction.normalized_merchant.as_deref() else {
            return;
        };
        if key.is_empty() || key == UNKNOWN_KEY {
            return;
        }

        if let Some(reason) = self.guardrails.exclude_transaction(transaction) {
            debug!("Not counting transaction for {}: {}", key, reason);
            return;
        }

        let observation = self.observations.entry(key.to_string()).or_default();
        observation.count += 1;
        observation.total_spend += transaction.amount.abs();

        let display = transaction
            .merchant_display
            .clone()
            .unwrap_or_else(|| title_case(key));
        observation.display_names.insert(display);

        if observation.sample_descriptions.len() < SAMPLE_LIMIT {
            observation
                .sample_descriptions
                .push(transaction.description.chars().take(SAMPLE_CHARS).collect());
        }
    }

    pub fn observe_all(&mut self, transactions: &[Transaction]) {
        for transaction in transactions {
            self.observe(transaction);
        }
    }

    /// Promote qualifying candidates into `dictionary`, most frequent first.
    ///
    /// A candidate is skipped when its key is already indexed, when it fails
    /// the quality threshold, when the guardrails exclude it, or when the
    /// dictionary is at capacity. The dictionary is not saved here.
    pub fn build_into(self, dictionary: &mut MerchantDictionary) -> BuildReport {
        let candidates = self.observations.len();
        let mut added = 0usize;
        let mut skipped: Vec<(String, String)> = Vec::new();

        let mut ranked: Vec<(String, MerchantObservation)> = self.observations.into_iter().collect();
        ranked.sort_by(|a, b| b.1.count.cmp(&a.1.count).then(a.0.cmp(&b.0)));

        let cap = dictionary.config().max_entries;
        for (key, observation) in ranked {
            if dictionary.lookup(&key).is_some() {
                skipped.push((key, "already_indexed".to_string()));
                continue;
            }
            if !self
                .guardrails
                .meets_quality_threshold(observation.count, observation.total_spend)
            {
                debug!(
                    "Below quality threshold: {} ({} transactions, ${:.2}, e.g. {:?})",
                    key,
                    observation.count,
                    observation.total_spend,
                    observation.sample_descriptions.first()
                );
                skipped.push((key, "below_quality_threshold".to_string()));
                continue;
            }

            // longest display name wins; ties resolve to the greatest in sort order
            let display = observation
                .display_names
                .iter()
                .max_by_key(|name| name.len())
                .cloned()
                .unwrap_or_else(|| title_case(&key));

            if let Some(reason) = self.guardrails.exclude_merchant(&key, &display) {
                skipped.push((key, reason));
                continue;
            }
            if dictionary.len() >= cap {
                warn!("Dictionary at capacity ({}), skipping {}", cap, key);
                skipped.push((key, "dictionary_size_cap".to_string()));
                continue;
            }

            let category = suggest_category(&key, &display);
            match dictionary.add_merchant(&key, &display, category, &[]) {
                Ok(_) => added += 1,
                Err(err) => skipped.push((key, err.to_string())),
            }
        }

        info!(
            "Dictionary build: {} candidates, {} added, {} skipped",
            candidates,
            added,
            skipped.len()
        );
        BuildReport {
            candidates,
            added,
            skipped,
        }
    }
}
