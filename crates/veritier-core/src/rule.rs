//! Typed regulatory rule model.
//!
//! Rules are loaded from an external rule store and are read-only during a
//! verification or evaluation pass. Condition trees and decision trees are
//! closed tagged unions with explicit traversal, so checkers never need
//! shape-sniffing to walk them.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Reference to the legal source a rule was encoded from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub document_id: String,
    #[serde(default)]
    pub article: Option<String>,
}

/// A condition tree: either a single field test or a group of child
/// conditions combined under `all` (conjunction) and/or `any` (disjunction).
///
/// A group with neither `all` nor `any` populated contributes zero
/// conditions to any count.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Leaf {
        field: String,
        #[serde(default = "default_operator")]
        operator: String,
        value: serde_json::Value,
    },
    Group {
        #[serde(default)]
        all: Vec<Condition>,
        #[serde(default)]
        any: Vec<Condition>,
    },
}

fn default_operator() -> String {
    "==".to_string()
}

impl Condition {
    /// Count leaf conditions, recursively summing `all` and `any` members.
    pub fn count_leaves(&self) -> usize {
        match self {
            Condition::Leaf { .. } => 1,
            Condition::Group { all, any } => all
                .iter()
                .chain(any.iter())
                .map(Condition::count_leaves)
                .sum(),
        }
    }

    /// All field names referenced anywhere in this condition tree.
    pub fn field_set(&self) -> BTreeSet<&str> {
        let mut fields = BTreeSet::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Condition::Leaf { field, .. } => {
                out.insert(field.as_str());
            }
            Condition::Group { all, any } => {
                for child in all.iter().chain(any.iter()) {
                    child.collect_fields(out);
                }
            }
        }
    }

    /// Flatten every leaf into a `"<field> <op> <value>"` string.
    pub fn leaf_texts(&self) -> Vec<String> {
        let mut texts = Vec::new();
        self.collect_leaf_texts(&mut texts);
        texts
    }

    fn collect_leaf_texts(&self, out: &mut Vec<String>) {
        match self {
            Condition::Leaf {
                field,
                operator,
                value,
            } => {
                out.push(format!("{field} {operator} {}", fmt_value(value)));
            }
            Condition::Group { all, any } => {
                for child in all.iter().chain(any.iter()) {
                    child.collect_leaf_texts(out);
                }
            }
        }
    }

    /// Whether this tree contains a group with neither `all` nor `any`.
    pub fn has_empty_group(&self) -> bool {
        match self {
            Condition::Leaf { .. } => false,
            Condition::Group { all, any } => {
                (all.is_empty() && any.is_empty())
                    || all.iter().chain(any.iter()).any(Condition::has_empty_group)
            }
        }
    }

    /// Whether any disjunctive (`any`) branch appears in this tree.
    pub fn has_disjunction(&self) -> bool {
        match self {
            Condition::Leaf { .. } => false,
            Condition::Group { all, any } => {
                !any.is_empty() || all.iter().any(Condition::has_disjunction)
            }
        }
    }
}

/// Render a JSON value the way it reads in rule text (no quoting for strings).
fn fmt_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A decision tree node: a leaf carrying an outcome string, or an internal
/// node carrying a condition and up to two branches. Absent branches are
/// skipped during traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DecisionTree {
    Leaf {
        result: String,
    },
    Node {
        condition: Condition,
        #[serde(default)]
        true_branch: Option<Box<DecisionTree>>,
        #[serde(default)]
        false_branch: Option<Box<DecisionTree>>,
    },
}

impl DecisionTree {
    /// Raw result strings from every leaf, in traversal order.
    pub fn leaf_results(&self) -> Vec<&str> {
        let mut results = Vec::new();
        self.visit(&mut |node| {
            if let DecisionTree::Leaf { result } = node {
                results.push(result.as_str());
            }
        });
        results
    }

    /// Leaf results normalized for outcome comparison (lowercased, trimmed).
    pub fn outcomes(&self) -> Vec<String> {
        self.leaf_results()
            .into_iter()
            .filter(|r| !r.is_empty())
            .map(|r| r.trim().to_lowercase())
            .collect()
    }

    /// Total node count, internal and leaf.
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.visit(&mut |_| count += 1);
        count
    }

    /// Flattened condition texts from every internal node.
    pub fn condition_texts(&self) -> Vec<String> {
        let mut texts = Vec::new();
        self.visit(&mut |node| {
            if let DecisionTree::Node { condition, .. } = node {
                texts.extend(condition.leaf_texts());
            }
        });
        texts
    }

    /// Whether any internal node has neither branch populated.
    pub fn has_dead_end(&self) -> bool {
        let mut found = false;
        self.visit(&mut |node| {
            if let DecisionTree::Node {
                true_branch,
                false_branch,
                ..
            } = node
            {
                if true_branch.is_none() && false_branch.is_none() {
                    found = true;
                }
            }
        });
        found
    }

    /// Pre-order traversal visiting both branches when present.
    pub fn visit<'a, F: FnMut(&'a DecisionTree)>(&'a self, f: &mut F) {
        f(self);
        if let DecisionTree::Node {
            true_branch,
            false_branch,
            ..
        } = self
        {
            if let Some(t) = true_branch {
                t.visit(f);
            }
            if let Some(fb) = false_branch {
                fb.visit(f);
            }
        }
    }
}

/// A declarative regulatory decision rule.
///
/// Immutable during a check; identified globally by `rule_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub interpretation_notes: Option<String>,
    #[serde(default)]
    pub jurisdiction: Option<String>,
    #[serde(default)]
    pub applies_if: Option<Condition>,
    #[serde(default)]
    pub decision_tree: Option<DecisionTree>,
    #[serde(default)]
    pub effective_from: Option<NaiveDate>,
    #[serde(default)]
    pub effective_to: Option<NaiveDate>,
    #[serde(default)]
    pub source: Option<SourceRef>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// ISO-8601 timestamp of the last successful verification, if any.
    #[serde(default)]
    pub last_verified: Option<String>,
}

impl Rule {
    /// Normalized decision outcomes (empty when there is no tree).
    pub fn outcomes(&self) -> Vec<String> {
        self.decision_tree
            .as_ref()
            .map(DecisionTree::outcomes)
            .unwrap_or_default()
    }

    /// Specificity score: leaf conditions in `applies_if` plus decision-tree
    /// node count. Higher means more specific (lex specialis).
    pub fn specificity(&self) -> usize {
        let conditions = self
            .applies_if
            .as_ref()
            .map(Condition::count_leaves)
            .unwrap_or(0);
        let nodes = self
            .decision_tree
            .as_ref()
            .map(DecisionTree::node_count)
            .unwrap_or(0);
        conditions + nodes
    }

    /// Flattened condition texts from `applies_if` and the decision tree.
    pub fn condition_texts(&self) -> Vec<String> {
        let mut texts = self
            .applies_if
            .as_ref()
            .map(Condition::leaf_texts)
            .unwrap_or_default();
        if let Some(tree) = &self.decision_tree {
            texts.extend(tree.condition_texts());
        }
        texts
    }
}
