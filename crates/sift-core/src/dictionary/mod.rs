//! Merchant dictionary store
//!
//! Maps normalization keys to stable merchant identities: canonical name,
//! category, aliases, usage stats. This is the one piece of shared persisted
//! state in the pipeline. Lookups are plain map access; every write path runs
//! through the guardrails.
//!
//! Invariant: an alias maps to exactly one merchant id. The on-disk format
//! duplicates the full entry under every alias key, so files written by
//! older tooling load unchanged.
//!
//! Single-writer: load, apply a batch of updates, save. Concurrent writers
//! must be serialized by the caller.

pub mod builder;
pub mod guardrails;

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::{Category, Transaction};
use crate::normalize::UNKNOWN_KEY;

use guardrails::{DictionaryConfig, Guardrails, MatchKind};

/// User corrections kept per entry
const HISTORY_LIMIT: usize = 10;

/// One recorded user correction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub date: DateTime<Utc>,
    pub change: String,
    pub canonical_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
}

/// A canonical merchant identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerchantEntry {
    pub merchant_id: String,
    pub canonical_name: String,
    pub category: Category,
    pub aliases: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub transaction_count: u64,
    pub total_spend: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub change_history: Vec<ChangeRecord>,
}

fn default_version() -> u32 {
    1
}

/// Result of learning from a user correction
#[derive(Debug, Clone, PartialEq)]
pub enum LearnOutcome {
    Created { merchant_id: String },
    Updated { merchant_id: String },
    Rejected { reason: String },
}

impl LearnOutcome {
    pub fn accepted(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

/// Store-level counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DictionaryStats {
    pub unique_merchants: usize,
    pub total_aliases: usize,
    pub total_transactions: u64,
    pub total_spend: f64,
}

/// Outcome of one matching pass over a transaction batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchReport {
    pub total: usize,
    pub matched: usize,
    pub unmatched: usize,
    /// Percentage of transactions matched
    pub match_rate: f64,
}

/// One ranked candidate for a correction UI
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub merchant_id: String,
    pub canonical_name: String,
    pub category: Category,
    pub similarity: f64,
    pub confidence: u8,
}

/// The merchant dictionary: an alias index over canonical entries plus the
/// file it persists to.
pub struct MerchantDictionary {
    path: PathBuf,
    guardrails: Guardrails,
    /// Entries by merchant id
    entries: BTreeMap<String, MerchantEntry>,
    /// Alias index; each alias points at exactly one merchant id
    aliases: BTreeMap<String, String>,
}

impl MerchantDictionary {
    /// Open the store at `path` with default tuning, loading it if present
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_config(path, DictionaryConfig::default())
    }

    pub fn with_config(path: impl Into<PathBuf>, config: DictionaryConfig) -> Result<Self> {
        let path = path.into();
        let guardrails = Guardrails::new(config)?;

        let mut dictionary = Self {
            path,
            guardrails,
            entries: BTreeMap::new(),
            aliases: BTreeMap::new(),
        };
        dictionary.load()?;
        Ok(dictionary)
    }

    /// Open the store at the platform default location
    pub fn open_default() -> Result<Self> {
        Self::new(Self::default_path())
    }

    /// `<data dir>/sift/merchant_dictionary.json`, or the working directory
    /// when no platform data directory exists
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .map(|dir| dir.join("sift").join("merchant_dictionary.json"))
            .unwrap_or_else(|| PathBuf::from("merchant_dictionary.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &DictionaryConfig {
        self.guardrails.config()
    }

    /// Unique merchant count
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn alias_count(&self) -> usize {
        self.aliases.len()
    }

    pub fn merchants(&self) -> impl Iterator<Item = &MerchantEntry> {
        self.entries.values()
    }

    fn load(&mut self) -> Result<()> {
        if !self.path.exists() {
            debug!("No dictionary at {}, starting empty", self.path.display());
            return Ok(());
        }

        // a store that cannot be read back starts empty rather than failing
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(err) => {
                warn!(
                    "Cannot open dictionary at {}: {}, starting empty",
                    self.path.display(),
                    err
                );
                return Ok(());
            }
        };
        let raw: BTreeMap<String, Value> =
            match serde_json::from_reader(std::io::BufReader::new(file)) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(
                        "Dictionary at {} is not valid JSON: {}, starting empty",
                        self.path.display(),
                        err
                    );
                    return Ok(());
                }
            };

        let mut dropped = 0usize;
        for (alias, value) in raw {
            let Some(mut entry) = migrate_entry(&alias, value) else {
                warn!("Dropping unreadable dictionary entry for {}", alias);
                dropped += 1;
                continue;
            };

            let errors = self.guardrails.validate_entry(&entry);
            if !errors.is_empty() {
                warn!(
                    "Dropping invalid dictionary entry for {}: {}",
                    alias,
                    errors.join("; ")
                );
                dropped += 1;
                continue;
            }

            if !entry.aliases.contains(&alias) {
                entry.aliases.push(alias);
            }

            match self.entries.get_mut(&entry.merchant_id) {
                Some(existing) => {
                    // the format duplicates entries under every alias key;
                    // divergent copies reconcile to the most-used one, aliases unioned
                    let mut aliases = existing.aliases.clone();
                    for alias in &entry.aliases {
                        if !aliases.contains(alias) {
                            aliases.push(alias.clone());
                        }
                    }
                    if entry.transaction_count > existing.transaction_count {
                        *existing = entry;
                    }
                    existing.aliases = aliases;
                }
                None => {
                    self.entries.insert(entry.merchant_id.clone(), entry);
                }
            }
        }

        // rebuild the alias index; on conflicts the first entry (by id order)
        // keeps the alias and later entries lose it
        for (id, entry) in &self.entries {
            for alias in &entry.aliases {
                match self.aliases.get(alias) {
                    None => {
                        self.aliases.insert(alias.clone(), id.clone());
                    }
                    Some(owner) if owner != id => {
                        warn!("Alias {} claimed by {} and {}, keeping {}", alias, owner, id, owner);
                    }
                    Some(_) => {}
                }
            }
        }
        let cap = self.guardrails.config().max_aliases;
        let aliases = &self.aliases;
        let mut over_cap = Vec::new();
        for (id, entry) in self.entries.iter_mut() {
            entry.aliases.retain(|alias| aliases.get(alias) == Some(id));
            if entry.aliases.len() > cap {
                warn!("Capping aliases for {} at {}", id, cap);
                over_cap.extend(entry.aliases.split_off(cap));
            }
        }
        // capped aliases leave the index too; lookups and save follow the index
        for alias in over_cap {
            self.aliases.remove(&alias);
        }

        if dropped > 0 {
            warn!("Dropped {} invalid entries while loading dictionary", dropped);
        }
        info!(
            "Loaded dictionary: {} merchants, {} aliases from {}",
            self.entries.len(),
            self.aliases.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Persist the store atomically: the alias-duplicated JSON map is written
    /// to a temp file in the target directory and moved over the store, so a
    /// crash mid-write never truncates it. Output is deterministic (sorted
    /// keys, 2-space indent).
    pub fn save(&self) -> Result<()> {
        let mut map: BTreeMap<&String, &MerchantEntry> = BTreeMap::new();
        for (alias, id) in &self.aliases {
            if let Some(entry) = self.entries.get(id) {
                map.insert(alias, entry);
            }
        }
        let json = serde_json::to_string_pretty(&map)?;

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(&self.path).map_err(std::io::Error::from)?;

        info!(
            "Saved dictionary: {} merchants, {} aliases to {}",
            self.entries.len(),
            self.aliases.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Direct index access by normalization key
    pub fn lookup(&self, key: &str) -> Option<&MerchantEntry> {
        self.aliases.get(key).and_then(|id| self.entries.get(id))
    }

    /// Add a merchant under `key` (always indexed) plus any extra aliases.
    ///
    /// Adding an already-indexed key returns the existing entry's id rather
    /// than creating a rival claim on the alias. Excluded keys are rejected.
    pub fn add_merchant(
        &mut self,
        key: &str,
        canonical_name: &str,
        category: Category,
        extra_aliases: &[String],
    ) -> Result<String> {
        if let Some(id) = self.aliases.get(key) {
            debug!("Merchant already indexed for {}: {}", key, id);
            return Ok(id.clone());
        }

        if let Some(reason) = self.guardrails.exclude_merchant(key, canonical_name) {
            return Err(Error::Dictionary(format!(
                "merchant {} excluded: {}",
                key, reason
            )));
        }

        let stem = key.replace(' ', "_");
        let mut ordinal = self.entries.len() + 1;
        let mut merchant_id = format!("merchant_{}_{:03}", stem, ordinal);
        while self.entries.contains_key(&merchant_id) {
            ordinal += 1;
            merchant_id = format!("merchant_{}_{:03}", stem, ordinal);
        }

        let mut aliases = vec![key.to_string()];
        for alias in extra_aliases {
            if aliases.contains(alias) {
                continue;
            }
            if let Some(owner) = self.aliases.get(alias) {
                warn!("Alias {} already belongs to {}, skipping", alias, owner);
                continue;
            }
            aliases.push(alias.clone());
        }
        let cap = self.guardrails.config().max_aliases;
        if aliases.len() > cap {
            warn!("Capping aliases for {} at {}", key, cap);
            aliases.truncate(cap);
        }

        let entry = MerchantEntry {
            merchant_id: merchant_id.clone(),
            canonical_name: canonical_name.to_string(),
            category,
            aliases: aliases.clone(),
            created_at: Utc::now(),
            transaction_count: 0,
            total_spend: 0.0,
            last_seen: None,
            updated_at: None,
            created_by: None,
            updated_by: None,
            version: 1,
            change_history: Vec::new(),
        };

        for alias in &aliases {
            self.aliases.insert(alias.clone(), merchant_id.clone());
        }
        self.entries.insert(merchant_id.clone(), entry);

        debug!("Added merchant {} ({})", canonical_name, merchant_id);
        Ok(merchant_id)
    }

    /// Record one observed transaction against the entry for `key`.
    /// No-op when the key is not indexed.
    pub fn update_stats(&mut self, key: &str, amount: f64) {
        let Some(id) = self.aliases.get(key).cloned() else {
            return;
        };
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.transaction_count += 1;
            entry.total_spend += amount.abs();
            let now = Utc::now();
            entry.last_seen = Some(now);
            entry.updated_at = Some(now);
        }
    }

    /// Highest-scoring entry at or above `threshold`, if any.
    /// Ties resolve to the alphabetically first alias.
    pub fn fuzzy_lookup(&self, key: &str, threshold: f64) -> Option<&MerchantEntry> {
        let mut best: Option<(f64, &String)> = None;

        for (alias, id) in &self.aliases {
            let score = Guardrails::fuzzy_match_score(key, alias);
            if score < threshold {
                continue;
            }
            match best {
                Some((best_score, _)) if score <= best_score => {}
                _ => best = Some((score, id)),
            }
        }

        best.and_then(|(_, id)| self.entries.get(id))
    }

    /// Learn from a user's merchant correction: update the existing entry or
    /// create one, subject to the same guardrails as automatic entries.
    /// User corrections may exceed the size cap.
    pub fn learn_from_correction(
        &mut self,
        key: &str,
        canonical_name: &str,
        category: Option<Category>,
        source: Option<&Transaction>,
    ) -> LearnOutcome {
        if let Some(transaction) = source {
            if let Some(reason) = self.guardrails.exclude_transaction(transaction) {
                debug!("Rejecting correction for {}: {}", key, reason);
                return LearnOutcome::Rejected { reason };
            }
        }
        if let Some(reason) = self.guardrails.exclude_merchant(key, canonical_name) {
            debug!("Rejecting correction for {}: {}", key, reason);
            return LearnOutcome::Rejected { reason };
        }

        let existing_id = self.aliases.get(key).cloned();
        if let Some(id) = existing_id {
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.canonical_name = canonical_name.to_string();
                if let Some(category) = category {
                    entry.category = category;
                }
                let now = Utc::now();
                entry.updated_at = Some(now);
                entry.updated_by = Some("user_edit".to_string());
                entry.version += 1;
                entry.change_history.push(ChangeRecord {
                    date: now,
                    change: "user_correction".to_string(),
                    canonical_name: canonical_name.to_string(),
                    category,
                });
                if entry.change_history.len() > HISTORY_LIMIT {
                    let excess = entry.change_history.len() - HISTORY_LIMIT;
                    entry.change_history.drain(..excess);
                }

                info!("Updated merchant from correction: {} -> {}", key, canonical_name);
                return LearnOutcome::Updated { merchant_id: id };
            }
        }

        match self.add_merchant(key, canonical_name, category.unwrap_or_default(), &[]) {
            Ok(merchant_id) => {
                if let Some(entry) = self.entries.get_mut(&merchant_id) {
                    entry.created_by = Some("user_edit".to_string());
                    entry.updated_by = Some("user_edit".to_string());
                }
                info!("Created merchant from correction: {} -> {}", key, canonical_name);
                LearnOutcome::Created { merchant_id }
            }
            Err(err) => LearnOutcome::Rejected {
                reason: err.to_string(),
            },
        }
    }

    /// Drop entries whose last activity is outside the retention window.
    /// Returns the number of merchants removed. A removed merchant can be
    /// re-created under the same key on its next observation.
    pub fn archive_stale(&mut self) -> usize {
        let stale: Vec<String> = self
            .entries
            .values()
            .filter(|entry| self.guardrails.should_archive(entry))
            .map(|entry| entry.merchant_id.clone())
            .collect();

        for id in &stale {
            if let Some(entry) = self.entries.remove(id) {
                warn!("Archiving stale merchant {} ({})", entry.canonical_name, id);
            }
            self.aliases.retain(|_, owner| owner != id);
        }

        stale.len()
    }

    /// Annotate a batch with merchant identities by exact key lookup,
    /// bumping entry stats for every hit.
    pub fn match_transactions(&mut self, transactions: &mut [Transaction]) -> MatchReport {
        let total = transactions.len();
        let mut matched = 0usize;

        for transaction in transactions.iter_mut() {
            let key = transaction
                .normalized_merchant
                .clone()
                .unwrap_or_default();

            let hit = self
                .lookup(&key)
                .map(|entry| (entry.merchant_id.clone(), entry.canonical_name.clone(), entry.category));

            match hit {
                Some((merchant_id, canonical_name, category)) => {
                    transaction.merchant_id = Some(merchant_id);
                    transaction.canonical_name = Some(canonical_name);
                    transaction.category = Some(category);
                    transaction.matched = true;
                    matched += 1;

                    let amount = transaction.amount;
                    self.update_stats(&key, amount);
                }
                None => {
                    transaction.merchant_id = Some(format!("unmatched_{}", key));
                    transaction.canonical_name = Some(
                        transaction
                            .merchant_display
                            .clone()
                            .unwrap_or_else(|| title_case(&key)),
                    );
                    transaction.category = Some(Category::Other);
                    transaction.matched = false;
                }
            }
        }

        let unmatched = total - matched;
        let match_rate = if total > 0 {
            matched as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        info!(
            "Matched {}/{} transactions ({:.1}%)",
            matched, total, match_rate
        );

        MatchReport {
            total,
            matched,
            unmatched,
            match_rate,
        }
    }

    /// Normalization keys in the batch with no dictionary entry, with
    /// occurrence counts, most frequent first. The review queue for manual
    /// correction.
    pub fn unmatched_merchants(&self, transactions: &[Transaction]) -> Vec<(String, usize)> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();

        for transaction in transactions {
            let Some(key) = transaction.normalized_merchant.as_deref() else {
                continue;
            };
            if key.is_empty() || key == UNKNOWN_KEY {
                continue;
            }
            if self.lookup(key).is_none() {
                *counts.entry(key.to_string()).or_insert(0) += 1;
            }
        }

        let mut unmatched: Vec<(String, usize)> = counts.into_iter().collect();
        unmatched.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        unmatched
    }

    pub fn stats(&self) -> DictionaryStats {
        DictionaryStats {
            unique_merchants: self.entries.len(),
            total_aliases: self.aliases.len(),
            total_transactions: self.entries.values().map(|e| e.transaction_count).sum(),
            total_spend: self.entries.values().map(|e| e.total_spend).sum(),
        }
    }

    /// Ranked correction candidates for `key`: the exact hit first, then
    /// fuzzy candidates at or above the configured threshold, each with its
    /// similarity and a boosted match confidence.
    pub fn suggest(&self, key: &str, limit: usize) -> Vec<Suggestion> {
        let mut suggestions = Vec::new();
        let mut seen: Vec<&str> = Vec::new();

        if let Some(entry) = self.lookup(key) {
            suggestions.push(Suggestion {
                merchant_id: entry.merchant_id.clone(),
                canonical_name: entry.canonical_name.clone(),
                category: entry.category,
                similarity: 1.0,
                confidence: Guardrails::match_confidence(
                    crate::confidence::history_score(entry.transaction_count),
                    MatchKind::Exact,
                ),
            });
            seen.push(entry.merchant_id.as_str());
        }

        // best fuzzy score per entry
        let mut scored: BTreeMap<&String, f64> = BTreeMap::new();
        for (alias, id) in &self.aliases {
            let score = Guardrails::fuzzy_match_score(key, alias);
            if score < self.guardrails.config().fuzzy_threshold {
                continue;
            }
            let best = scored.entry(id).or_insert(0.0);
            if score > *best {
                *best = score;
            }
        }

        let mut candidates: Vec<(&String, f64)> = scored
            .into_iter()
            .filter(|(id, _)| !seen.contains(&id.as_str()))
            .collect();
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(b.0)));

        for (id, similarity) in candidates {
            if suggestions.len() >= limit {
                break;
            }
            if let Some(entry) = self.entries.get(id) {
                suggestions.push(Suggestion {
                    merchant_id: entry.merchant_id.clone(),
                    canonical_name: entry.canonical_name.clone(),
                    category: entry.category,
                    similarity,
                    confidence: Guardrails::match_confidence(
                        crate::confidence::history_score(entry.transaction_count),
                        MatchKind::Fuzzy,
                    ),
                });
            }
        }

        suggestions.truncate(limit);
        suggestions
    }
}

/// Read one persisted entry, tolerating legacy shapes: missing merchant_id
/// (derived from the key), missing counters, missing aliases, naive ISO
/// timestamps. Entries with unparseable categories are dropped.
fn migrate_entry(alias: &str, value: Value) -> Option<MerchantEntry> {
    let obj = value.as_object()?;

    let category = match obj.get("category").and_then(Value::as_str) {
        Some(raw) => raw.parse::<Category>().ok()?,
        None => Category::Other,
    };

    let canonical_name = obj
        .get("canonical_name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| title_case(alias));

    let merchant_id = obj
        .get("merchant_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("merchant_{}", alias.replace(' ', "_")));

    let aliases = obj
        .get("aliases")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_else(|| vec![alias.to_string()]);

    Some(MerchantEntry {
        merchant_id,
        canonical_name,
        category,
        aliases,
        created_at: obj
            .get("created_at")
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now),
        transaction_count: obj
            .get("transaction_count")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        total_spend: obj.get("total_spend").and_then(Value::as_f64).unwrap_or(0.0),
        last_seen: obj
            .get("last_seen")
            .and_then(Value::as_str)
            .and_then(parse_timestamp),
        updated_at: obj
            .get("updated_at")
            .and_then(Value::as_str)
            .and_then(parse_timestamp),
        created_by: obj
            .get("created_by")
            .and_then(Value::as_str)
            .map(str::to_string),
        updated_by: obj
            .get("updated_by")
            .and_then(Value::as_str)
            .map(str::to_string),
        version: obj
            .get("version")
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .unwrap_or(1),
        change_history: obj
            .get("change_history")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default(),
    })
}

/// Accept RFC 3339 or the naive ISO form older files carry (treated as UTC)
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransactionKind;
    use chrono::Duration;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> MerchantDictionary {
        MerchantDictionary::new(dir.path().join("merchant_dictionary.json")).unwrap()
    }

    fn debit(normalized: &str, amount: f64) -> Transaction {
        Transaction {
            date: "Nov 3".to_string(),
            description: normalized.to_uppercase(),
            merchant_raw: normalized.to_string(),
            amount,
            kind: TransactionKind::Debit,
            withdrawal: Some(amount.abs()),
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

    #[test]
    fn test_aliases_resolve_to_one_merchant() {
        let dir = TempDir::new().unwrap();
        let mut dict = store(&dir);

        let id = dict
            .add_merchant(
                "uber",
                "Uber",
                Category::Transportation,
                &["uber ube".to_string(), "uber eats".to_string()],
            )
            .unwrap();

        assert_eq!(dict.lookup("uber").unwrap().merchant_id, id);
        assert_eq!(dict.lookup("uber ube").unwrap().merchant_id, id);
        assert_eq!(dict.lookup("uber eats").unwrap().merchant_id, id);
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.alias_count(), 3);
    }

    #[test]
    fn test_adding_an_indexed_key_returns_the_existing_id() {
        let dir = TempDir::new().unwrap();
        let mut dict = store(&dir);

        let first = dict
            .add_merchant("uber", "Uber", Category::Transportation, &[])
            .unwrap();
        let second = dict
            .add_merchant("uber", "Uber Canada", Category::Other, &[])
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(dict.len(), 1);
        // the original entry is untouched
        assert_eq!(dict.lookup("uber").unwrap().canonical_name, "Uber");
    }

    #[test]
    fn test_excluded_keys_are_rejected() {
        let dir = TempDir::new().unwrap();
        let mut dict = store(&dir);

        let err = dict
            .add_merchant("deposit", "Deposit", Category::Other, &[])
            .unwrap_err();
        assert!(matches!(err, Error::Dictionary(_)));
        assert!(dict.is_empty());
    }

    #[test]
    fn test_save_restores_identically_and_deterministically() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("merchant_dictionary.json");

        let mut dict = MerchantDictionary::new(&path).unwrap();
        dict.add_merchant(
            "uber",
            "Uber",
            Category::Transportation,
            &["uber ube".to_string()],
        )
        .unwrap();
        dict.add_merchant("starbucks", "Starbucks", Category::Dining, &[])
            .unwrap();
        dict.update_stats("uber", -21.59);
        dict.save().unwrap();

        let first = std::fs::read_to_string(&path).unwrap();
        dict.save().unwrap();
        let second = std::fs::read_to_string(&path).unwrap();
        assert_eq!(first, second);

        // alias-duplicated format: the full entry sits under every alias key
        let raw: serde_json::Map<String, Value> = serde_json::from_str(&first).unwrap();
        assert!(raw.contains_key("uber"));
        assert!(raw.contains_key("uber ube"));
        assert_eq!(raw["uber"], raw["uber ube"]);

        let reloaded = MerchantDictionary::new(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.alias_count(), 3);
        let uber = reloaded.lookup("uber ube").unwrap();
        assert_eq!(uber.canonical_name, "Uber");
        assert_eq!(uber.transaction_count, 1);
        assert_eq!(uber.total_spend, 21.59);
    }

    #[test]
    fn test_legacy_entries_migrate_on_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("merchant_dictionary.json");

        // shape written by older tooling: no merchant_id, no aliases, no counters
        std::fs::write(
            &path,
            r#"{
              "mcdonalds": {
                "canonical_name": "McDonald's",
                "category": "Dining",
                "confidence": "high"
              },
              "mystery": {
                "canonical_name": "Mystery Shop",
                "category": "Not A Category"
              }
            }"#,
        )
        .unwrap();

        let dict = MerchantDictionary::new(&path).unwrap();
        assert_eq!(dict.len(), 1); // the bad-category entry is dropped

        let entry = dict.lookup("mcdonalds").unwrap();
        assert_eq!(entry.merchant_id, "merchant_mcdonalds");
        assert_eq!(entry.canonical_name, "McDonald's");
        assert_eq!(entry.category, Category::Dining);
        assert_eq!(entry.version, 1);
        assert_eq!(entry.aliases, vec!["mcdonalds".to_string()]);
    }

    #[test]
    fn test_corrupt_file_recovers_as_empty_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("merchant_dictionary.json");
        std::fs::write(&path, "{ not json at all").unwrap();

        let mut dict = MerchantDictionary::new(&path).unwrap();
        assert!(dict.is_empty());

        // the store stays fully usable and the next save replaces the junk
        dict.add_merchant("uber", "Uber", Category::Transportation, &[])
            .unwrap();
        dict.save().unwrap();
        let reloaded = MerchantDictionary::new(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn test_alias_cap_on_load_prunes_the_index_too() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("merchant_dictionary.json");

        // divergent legacy copies: each one is within the cap, their union is not
        std::fs::write(
            &path,
            r#"{
              "uber": {"merchant_id": "merchant_uber_001", "canonical_name": "Uber", "category": "Transportation", "aliases": ["uber"]},
              "uber canada": {"merchant_id": "merchant_uber_001", "canonical_name": "Uber", "category": "Transportation", "aliases": ["uber canada"]},
              "uber eats": {"merchant_id": "merchant_uber_001", "canonical_name": "Uber", "category": "Transportation", "aliases": ["uber eats"]},
              "uber trip": {"merchant_id": "merchant_uber_001", "canonical_name": "Uber", "category": "Transportation", "aliases": ["uber trip"]}
            }"#,
        )
        .unwrap();

        let config = DictionaryConfig {
            max_aliases: 2,
            ..DictionaryConfig::default()
        };
        let dict = MerchantDictionary::with_config(&path, config.clone()).unwrap();

        assert_eq!(dict.len(), 1);
        assert_eq!(dict.alias_count(), 2);
        assert_eq!(dict.lookup("uber").unwrap().aliases.len(), 2);
        // capped aliases stop resolving
        assert!(dict.lookup("uber eats").is_none());
        assert!(dict.lookup("uber trip").is_none());

        // and the next save writes only the kept aliases
        dict.save().unwrap();
        let raw: serde_json::Map<String, Value> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw.len(), 2);
        assert!(raw.contains_key("uber"));
        assert!(raw.contains_key("uber canada"));

        let reloaded = MerchantDictionary::with_config(&path, config).unwrap();
        assert_eq!(reloaded.alias_count(), 2);
    }

    #[test]
    fn test_corrections_create_then_update_with_history() {
        let dir = TempDir::new().unwrap();
        let mut dict = store(&dir);

        let outcome =
            dict.learn_from_correction("mcdonalds", "McDonald's", Some(Category::Dining), None);
        assert!(matches!(outcome, LearnOutcome::Created { .. }));

        let outcome =
            dict.learn_from_correction("mcdonalds", "McDonalds", Some(Category::Dining), None);
        assert!(matches!(outcome, LearnOutcome::Updated { .. }));

        let entry = dict.lookup("mcdonalds").unwrap();
        assert_eq!(entry.canonical_name, "McDonalds");
        assert_eq!(entry.version, 2);
        assert_eq!(entry.change_history.len(), 1);
        assert_eq!(entry.updated_by.as_deref(), Some("user_edit"));
    }

    #[test]
    fn test_correction_history_is_bounded() {
        let dir = TempDir::new().unwrap();
        let mut dict = store(&dir);

        dict.learn_from_correction("mcdonalds", "McDonald's", None, None);
        for i in 0..15 {
            dict.learn_from_correction("mcdonalds", &format!("McDonald's v{}", i), None, None);
        }

        let entry = dict.lookup("mcdonalds").unwrap();
        assert_eq!(entry.change_history.len(), HISTORY_LIMIT);
        assert_eq!(entry.version, 16);
        // oldest records were trimmed
        assert_eq!(entry.change_history[0].canonical_name, "McDonald's v5");
    }

    #[test]
    fn test_corrections_respect_guardrails() {
        let dir = TempDir::new().unwrap();
        let mut dict = store(&dir);

        let outcome = dict.learn_from_correction("ab", "AB", None, None);
        assert_eq!(
            outcome,
            LearnOutcome::Rejected {
                reason: "too_short".to_string()
            }
        );

        let mut credit = debit("payroll", 1200.0);
        credit.kind = TransactionKind::Credit;
        let outcome = dict.learn_from_correction("payroll", "Payroll", None, Some(&credit));
        assert_eq!(
            outcome,
            LearnOutcome::Rejected {
                reason: "credit_transaction".to_string()
            }
        );
        assert!(dict.is_empty());
    }

    #[test]
    fn test_fuzzy_lookup_respects_threshold() {
        let dir = TempDir::new().unwrap();
        let mut dict = store(&dir);
        dict.add_merchant("starbucks coffee", "Starbucks", Category::Dining, &[])
            .unwrap();

        let hit = dict.fuzzy_lookup("starbucks coffee co", 0.7).unwrap();
        assert_eq!(hit.canonical_name, "Starbucks");

        assert!(dict.fuzzy_lookup("walmart", 0.7).is_none());
        // containment ratio below threshold
        assert!(dict.fuzzy_lookup("starbucks", 0.7).is_none());
    }

    #[test]
    fn test_archive_removes_stale_entries_and_allows_recreation() {
        let dir = TempDir::new().unwrap();
        let mut dict = store(&dir);

        let id = dict
            .add_merchant("old shop", "Old Shop", Category::Shopping, &[])
            .unwrap();
        dict.add_merchant("fresh shop", "Fresh Shop", Category::Shopping, &[])
            .unwrap();
        dict.update_stats("fresh shop", -10.0);

        if let Some(entry) = dict.entries.get_mut(&id) {
            entry.last_seen = Some(Utc::now() - Duration::days(400));
        }

        assert_eq!(dict.archive_stale(), 1);
        assert!(dict.lookup("old shop").is_none());
        assert!(dict.lookup("fresh shop").is_some());

        // re-creation under the same key works
        dict.add_merchant("old shop", "Old Shop", Category::Shopping, &[])
            .unwrap();
        assert!(dict.lookup("old shop").is_some());
    }

    #[test]
    fn test_matching_annotates_and_bumps_stats() {
        let dir = TempDir::new().unwrap();
        let mut dict = store(&dir);
        dict.add_merchant("uber", "Uber", Category::Transportation, &[])
            .unwrap();

        let mut transactions = vec![debit("uber", -21.59), debit("new shop", -5.00)];
        let report = dict.match_transactions(&mut transactions);

        assert_eq!(report.total, 2);
        assert_eq!(report.matched, 1);
        assert_eq!(report.unmatched, 1);
        assert_eq!(report.match_rate, 50.0);

        let matched = &transactions[0];
        assert_eq!(matched.merchant_id.as_deref(), Some("merchant_uber_001"));
        assert_eq!(matched.canonical_name.as_deref(), Some("Uber"));
        assert_eq!(matched.category, Some(Category::Transportation));
        assert!(matched.matched);

        let unmatched = &transactions[1];
        assert_eq!(unmatched.merchant_id.as_deref(), Some("unmatched_new shop"));
        assert_eq!(unmatched.canonical_name.as_deref(), Some("New Shop"));
        assert_eq!(unmatched.category, Some(Category::Other));
        assert!(!unmatched.matched);

        assert_eq!(dict.lookup("uber").unwrap().transaction_count, 1);
        assert_eq!(dict.lookup("uber").unwrap().total_spend, 21.59);
    }

    #[test]
    fn test_unmatched_merchants_counts_sorted_by_frequency() {
        let dir = TempDir::new().unwrap();
        let mut dict = store(&dir);
        dict.add_merchant("uber", "Uber", Category::Transportation, &[])
            .unwrap();

        let transactions = vec![
            debit("uber", -10.0),
            debit("new shop", -5.0),
            debit("new shop", -6.0),
            debit("corner cafe", -3.0),
            debit("unknown", -9.0),
        ];

        let unmatched = dict.unmatched_merchants(&transactions);
        assert_eq!(
            unmatched,
            vec![
                ("new shop".to_string(), 2),
                ("corner cafe".to_string(), 1)
            ]
        );
    }

    #[test]
    fn test_suggest_ranks_exact_before_fuzzy() {
        let dir = TempDir::new().unwrap();
        let mut dict = store(&dir);
        dict.add_merchant("starbucks coffee", "Starbucks", Category::Dining, &[])
            .unwrap();
        dict.add_merchant("starbucks coffee co", "Starbucks Co", Category::Dining, &[])
            .unwrap();

        let suggestions = dict.suggest("starbucks coffee", 5);
        assert_eq!(suggestions.len(), 2);
        assert_eq!(suggestions[0].canonical_name, "Starbucks");
        assert_eq!(suggestions[0].similarity, 1.0);
        assert_eq!(suggestions[0].confidence, 90); // history tier 55 + exact boost 35
        assert_eq!(suggestions[1].canonical_name, "Starbucks Co");
        assert!(suggestions[1].similarity < 1.0);
        assert_eq!(suggestions[1].confidence, 75); // history tier 55 + fuzzy boost 20
    }

    #[test]
    fn test_stats_track_totals() {
        let dir = TempDir::new().unwrap();
        let mut dict = store(&dir);
        dict.add_merchant("uber", "Uber", Category::Transportation, &["uber ube".to_string()])
            .unwrap();
        dict.update_stats("uber", -21.59);
        dict.update_stats("uber ube", -18.00);

        let stats = dict.stats();
        assert_eq!(stats.unique_merchants, 1);
        assert_eq!(stats.total_aliases, 2);
        assert_eq!(stats.total_transactions, 2);
        assert!((stats.total_spend - 39.59).abs() < 1e-9);
    }
}
