use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LabelSelectorRequirement {
    pub key: String,
    pub operator: SelectorOperator,
    #[serde(default)]
    pub values: Vec<String>,
}

impl LabelSelectorRequirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            SelectorOperator::In => value.is_some_and(|v| self.values.contains(v)),
            SelectorOperator::NotIn => !value.is_some_and(|v| self.values.contains(v)),
            SelectorOperator::Exists => value.is_some(),
            SelectorOperator::DoesNotExist => value.is_none(),
        }
    }
}

/// Equality + set-based label selector. An empty selector matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

impl LabelSelector {
    pub fn from_labels(labels: BTreeMap<String, String>) -> Self {
        Self {
            match_labels: labels,
            match_expressions: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
            && self.match_expressions.iter().all(|r| r.matches(labels))
    }

    /// Parse the textual form: `app=web,tier!=db,env in (prod,stage),!legacy,team`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut selector = LabelSelector::default();
        for term in split_terms(text) {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            if let Some(key) = term.strip_prefix('!') {
                selector.match_expressions.push(LabelSelectorRequirement {
                    key: key.trim().to_string(),
                    operator: SelectorOperator::DoesNotExist,
                    values: vec![],
                });
            } else if let Some((key, value)) = term.split_once("!=") {
                selector.match_expressions.push(LabelSelectorRequirement {
                    key: key.trim().to_string(),
                    operator: SelectorOperator::NotIn,
                    values: vec![value.trim().to_string()],
                });
            } else if let Some((key, value)) = term.split_once("==").or_else(|| term.split_once('=')) {
                selector
                    .match_labels
                    .insert(key.trim().to_string(), value.trim().to_string());
            } else if let Some((key, rest)) = term.split_once(" notin ") {
                selector.match_expressions.push(LabelSelectorRequirement {
                    key: key.trim().to_string(),
                    operator: SelectorOperator::NotIn,
                    values: parse_set(rest)?,
                });
            } else if let Some((key, rest)) = term.split_once(" in ") {
                selector.match_expressions.push(LabelSelectorRequirement {
                    key: key.trim().to_string(),
                    operator: SelectorOperator::In,
                    values: parse_set(rest)?,
                });
            } else if term.chars().all(|c| c.is_ascii_alphanumeric() || "-_./".contains(c)) {
                selector.match_expressions.push(LabelSelectorRequirement {
                    key: term.to_string(),
                    operator: SelectorOperator::Exists,
                    values: vec![],
                });
            } else {
                bail!("invalid selector term '{}'", term);
            }
        }
        Ok(selector)
    }
}

/// Split on commas that are not inside a parenthesised value set.
fn split_terms(text: &str) -> Vec<&str> {
    let mut terms = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                terms.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    terms.push(&text[start..]);
    terms
}

fn parse_set(text: &str) -> Result<Vec<String>> {
    let inner = text
        .trim()
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .ok_or_else(|| anyhow::anyhow!("value set '{}' must be parenthesised", text.trim()))?;
    Ok(inner
        .split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_selector_matches_all() {
        let sel = LabelSelector::default();
        assert!(sel.matches(&BTreeMap::new()));
        assert!(sel.matches(&labels(&[("app", "web")])));
    }

    #[test]
    fn parse_mixed_terms() {
        let sel = LabelSelector::parse("app=web, env in (prod,stage), !legacy, tier!=db").unwrap();
        assert!(sel.matches(&labels(&[("app", "web"), ("env", "prod"), ("tier", "fe")])));
        assert!(!sel.matches(&labels(&[("app", "web"), ("env", "dev")])));
        assert!(!sel.matches(&labels(&[("app", "web"), ("env", "prod"), ("legacy", "1")])));
        assert!(!sel.matches(&labels(&[("app", "web"), ("env", "prod"), ("tier", "db")])));
    }

    #[test]
    fn exists_term() {
        let sel = LabelSelector::parse("team").unwrap();
        assert!(sel.matches(&labels(&[("team", "a")])));
        assert!(!sel.matches(&labels(&[("app", "a")])));
    }

    #[test]
    fn unbalanced_set_is_rejected() {
        assert!(LabelSelector::parse("env in prod").is_err());
    }
}
