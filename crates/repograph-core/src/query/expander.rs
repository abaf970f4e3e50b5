//! Query expansion
//!
//! Turns free text into weighted search terms plus element-kind hints.
//! Never fails: text with nothing usable gives an empty expansion.

use std::collections::{BTreeSet, HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use super::synonyms::SynonymTable;
use crate::config::ExpansionConfig;
use crate::index::ElementKind;

static TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*(?:\s*\()?").unwrap()
});

static CAMEL_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Z]+[a-z0-9]*|[a-z0-9]+").unwrap());

const STOPWORDS: &[&str] = &[
    "a", "about", "all", "an", "and", "any", "are", "as", "at", "be", "been", "by", "can", "could",
    "did", "do", "does", "for", "from", "has", "have", "how", "i", "in", "into", "is", "it", "its",
    "me", "my", "of", "on", "or", "our", "should", "so", "some", "that", "the", "their", "them",
    "then", "there", "these", "they", "this", "those", "to", "us", "was", "we", "were", "what",
    "when", "where", "which", "who", "why", "will", "with", "would", "you", "your",
];

/// Question words that carry no search meaning
const FILLER: &[&str] = &[
    "find", "show", "tell", "explain", "give", "search", "look", "locate", "list", "please",
    "want", "need", "code", "codebase", "repository", "repo", "defined", "used", "using",
];

const KIND_WORDS: &[(&str, ElementKind)] = &[
    ("function", ElementKind::Function),
    ("func", ElementKind::Function),
    ("def", ElementKind::Function),
    ("routine", ElementKind::Function),
    ("procedure", ElementKind::Function),
    ("method", ElementKind::Method),
    ("class", ElementKind::Class),
    ("struct", ElementKind::Class),
    ("module", ElementKind::Module),
    ("package", ElementKind::Module),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TermOrigin {
    Word,
    Identifier,
    Subword,
    Synonym,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightedTerm {
    pub term: String,
    pub weight: f32,
    pub origin: TermOrigin,
}

/// Result of expanding one query
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryExpansion {
    pub original_text: String,
    pub expanded_terms: Vec<WeightedTerm>,
    pub inferred_kind_hints: BTreeSet<ElementKind>,
}

impl QueryExpansion {
    pub fn empty(original_text: &str) -> Self {
        Self {
            original_text: original_text.to_string(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.expanded_terms.is_empty()
    }

    /// Text to embed when comparing the query against stored elements
    pub fn probe_text(&self) -> String {
        if self.is_empty() {
            return self.original_text.trim().to_string();
        }
        self.expanded_terms
            .iter()
            .map(|t| t.term.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn terms(&self) -> impl Iterator<Item = &str> {
        self.expanded_terms.iter().map(|t| t.term.as_str())
    }
}

/// A term as first emitted, before dedupe
struct Candidate {
    term: String,
    weight: f32,
    origin: TermOrigin,
    position: usize,
}

pub struct QueryExpander {
    synonyms: SynonymTable,
    stopwords: HashSet<String>,
    identifier_weight: f32,
    word_weight: f32,
    subword_weight: f32,
    synonym_weight: f32,
}

impl QueryExpander {
    pub fn new(config: &ExpansionConfig) -> Self {
        let stopwords = STOPWORDS
            .iter()
            .chain(FILLER)
            .map(|s| s.to_string())
            .chain(config.extra_stopwords.iter().map(|s| s.to_lowercase()))
            .collect();

        Self {
            synonyms: SynonymTable::from_config(config),
            stopwords,
            identifier_weight: config.identifier_weight,
            word_weight: config.word_weight,
            subword_weight: config.subword_weight,
            synonym_weight: config.synonym_weight,
        }
    }

    /// Swap in a different synonym table
    pub fn with_synonyms(mut self, synonyms: SynonymTable) -> Self {
        self.synonyms = synonyms;
        self
    }

    pub fn expand(&self, text: &str) -> QueryExpansion {
        let mut hints = BTreeSet::new();
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut after_import = false;

        for m in TOKEN.find_iter(text) {
            let raw = m.as_str();
            let is_call = raw.ends_with('(');
            let token = raw.trim_end_matches('(').trim_end();
            let position = m.start();
            let lower = token.to_lowercase();

            let import_target = after_import;
            after_import = lower == "import" || lower == "from";

            if import_target || is_call || looks_like_identifier(token) {
                candidates.push(Candidate {
                    term: token.to_string(),
                    weight: self.identifier_weight,
                    origin: TermOrigin::Identifier,
                    position,
                });
                for sub in subwords(token) {
                    if sub.len() < 2 || self.stopwords.contains(&sub) {
                        continue;
                    }
                    self.push_with_synonyms(
                        &mut candidates,
                        sub,
                        self.subword_weight,
                        TermOrigin::Subword,
                        position,
                    );
                }
                continue;
            }

            if self.stopwords.contains(&lower) {
                continue;
            }
            let word = lemmatize(&lower);
            if let Some(kind) = kind_word(&word) {
                hints.insert(kind);
                continue;
            }
            if self.stopwords.contains(&word) || word.len() < 2 {
                continue;
            }
            self.push_with_synonyms(
                &mut candidates,
                word,
                self.word_weight,
                TermOrigin::Word,
                position,
            );
        }

        let expansion = QueryExpansion {
            original_text: text.to_string(),
            expanded_terms: rank(candidates),
            inferred_kind_hints: hints,
        };
        debug!(
            terms = expansion.expanded_terms.len(),
            hints = expansion.inferred_kind_hints.len(),
            "Expanded query"
        );
        expansion
    }

    fn push_with_synonyms(
        &self,
        out: &mut Vec<Candidate>,
        term: String,
        weight: f32,
        origin: TermOrigin,
        position: usize,
    ) {
        let synonyms: Vec<String> = self
            .synonyms
            .lookup(&term)
            .into_iter()
            .filter(|s| !self.stopwords.contains(*s))
            .map(str::to_string)
            .collect();
        out.push(Candidate {
            term,
            weight,
            origin,
            position,
        });
        for synonym in synonyms {
            out.push(Candidate {
                term: synonym,
                weight: weight * self.synonym_weight,
                origin: TermOrigin::Synonym,
                position,
            });
        }
    }
}

/// Dedupe case-insensitively keeping the max weight, then order by weight,
/// first position and emission order
fn rank(candidates: Vec<Candidate>) -> Vec<WeightedTerm> {
    // key -> (index into best, first position, first sequence)
    let mut seen: HashMap<String, (usize, usize, usize)> = HashMap::new();
    let mut best: Vec<Candidate> = Vec::new();

    for (seq, candidate) in candidates.into_iter().enumerate() {
        let key = candidate.term.to_lowercase();
        match seen.get_mut(&key) {
            Some((idx, first_position, _)) => {
                *first_position = (*first_position).min(candidate.position);
                if candidate.weight > best[*idx].weight {
                    best[*idx] = candidate;
                }
            }
            None => {
                seen.insert(key, (best.len(), candidate.position, seq));
                best.push(candidate);
            }
        }
    }

    let mut ordered: Vec<(usize, usize, Candidate)> = best
        .into_iter()
        .map(|c| {
            let (_, position, seq) = seen[&c.term.to_lowercase()];
            (position, seq, c)
        })
        .collect();
    ordered.sort_by(|(pa, sa, a), (pb, sb, b)| {
        b.weight
            .total_cmp(&a.weight)
            .then_with(|| pa.cmp(pb))
            .then_with(|| sa.cmp(sb))
    });

    ordered
        .into_iter()
        .map(|(_, _, c)| WeightedTerm {
            term: c.term,
            weight: c.weight,
            origin: c.origin,
        })
        .collect()
}

/// snake_case, camelCase, PascalCase with inner capitals, or dotted
fn looks_like_identifier(token: &str) -> bool {
    if token.contains('.') {
        return true;
    }
    let trimmed = token.trim_matches('_');
    if trimmed.contains('_') {
        return true;
    }
    let mut chars = trimmed.chars();
    let first_lower = chars.next().is_some_and(|c| c.is_ascii_lowercase());
    let inner_upper = trimmed.chars().skip(1).any(|c| c.is_ascii_uppercase());
    let has_lower = trimmed.chars().any(|c| c.is_ascii_lowercase());
    (first_lower && inner_upper) || (inner_upper && has_lower && !first_lower)
}

/// Lowercase pieces split on `_`, `.` and case changes
fn subwords(token: &str) -> Vec<String> {
    token
        .split(['_', '.'])
        .flat_map(|part| {
            CAMEL_BOUNDARY
                .find_iter(part)
                .map(|m| m.as_str().to_lowercase())
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Strips common plural endings
fn lemmatize(word: &str) -> String {
    let n = word.len();
    if n > 4 && word.ends_with("ies") {
        return format!("{}y", &word[..n - 3]);
    }
    for suffix in ["sses", "xes", "ches", "shes"] {
        if word.ends_with(suffix) {
            return word[..n - 2].to_string();
        }
    }
    if n > 3
        && word.ends_with('s')
        && !word.ends_with("ss")
        && !word.ends_with("us")
        && !word.ends_with("is")
    {
        return word[..n - 1].to_string();
    }
    word.to_string()
}

fn kind_word(word: &str) -> Option<ElementKind> {
    KIND_WORDS
        .iter()
        .find(|(w, _)| *w == word)
        .map(|(_, kind)| *kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn expander_with(entries: &[(&str, &[&str])]) -> QueryExpander {
        let table: BTreeMap<String, Vec<String>> = entries
            .iter()
            .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
            .collect();
        QueryExpander::new(&ExpansionConfig::default()).with_synonyms(SynonymTable::new(table))
    }

    fn terms(expansion: &QueryExpansion) -> Vec<&str> {
        expansion.terms().collect()
    }

    #[test]
    fn test_validate_users_scenario() {
        let expander = expander_with(&[("validate", &["check", "verify"])]);
        let expansion = expander.expand("find functions that validate users");
        let t = terms(&expansion);
        assert_eq!(t, vec!["validate", "user", "check", "verify"]);
        assert!(expansion.inferred_kind_hints.contains(&ElementKind::Function));
        assert!(!t.contains(&"find"));
        assert!(!t.contains(&"that"));
        assert!((expansion.expanded_terms[2].weight - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_identifiers_outrank_words() {
        let expander = expander_with(&[]);
        let expansion = expander.expand("where is parseConfig used by load_settings");
        let t = terms(&expansion);
        assert_eq!(&t[..2], &["parseConfig", "load_settings"]);
        assert_eq!(expansion.expanded_terms[0].origin, TermOrigin::Identifier);
        assert!(t.contains(&"parse"));
        assert!(t.contains(&"config"));
        assert!(t.contains(&"settings"));
        assert_eq!(expansion.expanded_terms[0].weight, 2.0);
    }

    #[test]
    fn test_call_and_import_targets_are_identifiers() {
        let expander = expander_with(&[]);
        let expansion = expander.expand("what calls render( and import requests");
        let origins: HashMap<&str, TermOrigin> = expansion
            .expanded_terms
            .iter()
            .map(|t| (t.term.as_str(), t.origin))
            .collect();
        assert_eq!(origins["render"], TermOrigin::Identifier);
        assert_eq!(origins["requests"], TermOrigin::Identifier);
        assert_eq!(origins["call"], TermOrigin::Word);
    }

    #[test]
    fn test_dedupe_keeps_max_weight() {
        let expander = expander_with(&[("error", &["exception"])]);
        let expansion = expander.expand("exception error handling");
        let exception: Vec<_> = expansion
            .expanded_terms
            .iter()
            .filter(|t| t.term == "exception")
            .collect();
        assert_eq!(exception.len(), 1);
        assert_eq!(exception[0].weight, 1.0);
        assert_eq!(terms(&expansion)[0], "exception");
    }

    #[test]
    fn test_empty_and_unparseable() {
        let expander = QueryExpander::new(&ExpansionConfig::default());
        assert!(expander.expand("").is_empty());
        assert!(expander.expand("   ?!  ").is_empty());
        let only_stopwords = expander.expand("what is the");
        assert!(only_stopwords.is_empty());
        assert_eq!(only_stopwords.probe_text(), "what is the");
    }

    #[test]
    fn test_kind_hints() {
        let expander = QueryExpander::new(&ExpansionConfig::default());
        let expansion = expander.expand("class methods for sessions");
        assert!(expansion.inferred_kind_hints.contains(&ElementKind::Class));
        assert!(expansion.inferred_kind_hints.contains(&ElementKind::Method));
        assert_eq!(terms(&expansion), vec!["session"]);
    }

    #[test]
    fn test_deterministic_order() {
        let expander = QueryExpander::new(&ExpansionConfig::default());
        let a = expander.expand("handle file errors in upload_file");
        let b = expander.expand("handle file errors in upload_file");
        assert_eq!(a, b);
    }

    #[test]
    fn test_lemmatize() {
        assert_eq!(lemmatize("users"), "user");
        assert_eq!(lemmatize("classes"), "class");
        assert_eq!(lemmatize("queries"), "query");
        assert_eq!(lemmatize("status"), "status");
        assert_eq!(lemmatize("process"), "process");
    }
}
