//! Rule store boundary.
//!
//! The verification core never writes to the store; it loads rules once per
//! request and treats them as immutable snapshots.

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};

use crate::rule::Rule;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("rule directory not found: {0}")]
    DirectoryNotFound(std::path::PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("duplicate rule id: {0}")]
    DuplicateRuleId(String),
}

/// Read-only rule lookup used by the verification engine and workflows.
pub trait RuleStore: Send + Sync {
    /// Fetch one rule by id, or `None` when absent.
    fn get(&self, rule_id: &str) -> Option<Rule>;

    /// Snapshot of every rule in the store.
    fn all(&self) -> Vec<Rule>;

    /// All rule ids, sorted.
    fn rule_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.all().into_iter().map(|r| r.rule_id).collect();
        ids.sort();
        ids
    }

    /// Every rule except the named one, for cross-rule comparison.
    fn related_to(&self, rule_id: &str) -> Vec<Rule> {
        self.all()
            .into_iter()
            .filter(|r| r.rule_id != rule_id)
            .collect()
    }
}

/// In-memory rule store, optionally populated from a directory of JSON
/// rule files (one rule per `.json` file).
#[derive(Debug, Default)]
pub struct InMemoryRuleStore {
    rules: BTreeMap<String, Rule>,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from an iterator of rules, rejecting duplicate ids.
    pub fn from_rules(rules: impl IntoIterator<Item = Rule>) -> Result<Self, StoreError> {
        let mut store = Self::new();
        for rule in rules {
            store.insert(rule)?;
        }
        Ok(store)
    }

    pub fn insert(&mut self, rule: Rule) -> Result<(), StoreError> {
        if self.rules.contains_key(&rule.rule_id) {
            return Err(StoreError::DuplicateRuleId(rule.rule_id));
        }
        self.rules.insert(rule.rule_id.clone(), rule);
        Ok(())
    }

    /// Load every `*.json` file in `dir` as a rule.
    pub fn load_directory(&mut self, dir: &Path) -> Result<usize, StoreError> {
        if !dir.is_dir() {
            return Err(StoreError::DirectoryNotFound(dir.to_path_buf()));
        }

        let entries = std::fs::read_dir(dir).map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut loaded = 0;
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let text = std::fs::read_to_string(&path).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
            let rule: Rule = serde_json::from_str(&text).map_err(|source| StoreError::Parse {
                path: path.clone(),
                source,
            })?;

            debug!(rule_id = %rule.rule_id, path = %path.display(), "loaded rule");
            self.insert(rule)?;
            loaded += 1;
        }

        info!(count = loaded, dir = %dir.display(), "loaded rule directory");
        Ok(loaded)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl RuleStore for InMemoryRuleStore {
    fn get(&self, rule_id: &str) -> Option<Rule> {
        self.rules.get(rule_id).cloned()
    }

    fn all(&self) -> Vec<Rule> {
        self.rules.values().cloned().collect()
    }
}
