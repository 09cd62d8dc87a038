//! Turning user input into a task kind and required capabilities.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What a piece of user input asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Task kind.
    pub kind: CompactString,
    /// Capabilities an agent needs to handle it.
    pub capabilities: BTreeSet<CompactString>,
}

impl Classification {
    /// The fallback classification: no requirements.
    pub fn general() -> Self {
        Self {
            kind: "general".into(),
            capabilities: BTreeSet::new(),
        }
    }
}

/// Classifies user input.
pub trait Classifier: Send + Sync {
    fn classify(&self, input: &str) -> Classification;
}

struct Rule {
    keywords: Vec<CompactString>,
    kind: CompactString,
    capabilities: BTreeSet<CompactString>,
}

/// Keyword table classifier. The first rule with a keyword contained in
/// the lowercased input wins.
pub struct KeywordClassifier {
    rules: Vec<Rule>,
}

impl KeywordClassifier {
    /// A classifier with no rules; everything is `general`.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule.
    pub fn rule<K, C>(mut self, kind: &str, keywords: K, capabilities: C) -> Self
    where
        K: IntoIterator<Item = &'static str>,
        C: IntoIterator<Item = &'static str>,
    {
        self.rules.push(Rule {
            keywords: keywords.into_iter().map(CompactString::from).collect(),
            kind: kind.into(),
            capabilities: capabilities.into_iter().map(CompactString::from).collect(),
        });
        self
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::empty()
            .rule(
                "research",
                ["search", "find", "research", "look up"],
                ["web_search", "data_analysis"],
            )
            .rule(
                "planning",
                ["plan", "schedule", "organize", "break down"],
                ["task_decomposition", "workflow_planning"],
            )
            .rule(
                "analysis",
                ["analyze", "report", "summarize"],
                ["data_analysis", "report_generation"],
            )
            .rule(
                "coding",
                ["code", "program", "implement", "develop"],
                ["code_generation", "debugging"],
            )
    }
}

impl Classifier for KeywordClassifier {
    fn classify(&self, input: &str) -> Classification {
        let input = input.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.keywords.iter().any(|k| input.contains(k.as_str())))
            .map(|rule| Classification {
                kind: rule.kind.clone(),
                capabilities: rule.capabilities.clone(),
            })
            .unwrap_or_else(Classification::general)
    }
}
