//! Code-vocabulary synonym table

use std::collections::BTreeMap;

use crate::config::ExpansionConfig;

const DEFAULT_SYNONYMS: &[(&str, &[&str])] = &[
    ("function", &["method", "routine", "procedure", "func", "def"]),
    ("class", &["object", "entity", "struct", "type"]),
    ("variable", &["var", "field", "attribute", "property", "member"]),
    ("loop", &["iteration", "cycle", "for", "while", "repeat"]),
    ("condition", &["if", "switch", "branch", "case", "when"]),
    ("import", &["require", "include", "load", "dependency"]),
    ("call", &["invoke", "execute", "run", "trigger"]),
    ("return", &["output", "result", "response", "yield"]),
    ("parameter", &["argument", "input", "param", "arg"]),
    ("initialize", &["init", "setup", "start", "create", "construct"]),
    ("error", &["exception", "fault", "bug", "issue", "failure"]),
    ("handle", &["manage", "process", "deal", "treat"]),
    ("check", &["verify", "validate", "test", "assert"]),
    ("string", &["text", "str", "char", "character"]),
    ("number", &["integer", "float", "numeric", "int", "double"]),
    ("array", &["list", "collection", "sequence", "set"]),
    ("dictionary", &["map", "hash", "object", "dict"]),
    ("file", &["document", "resource", "io", "stream"]),
];

/// Term -> synonyms mapping, looked up in both directions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynonymTable {
    entries: BTreeMap<String, Vec<String>>,
}

impl SynonymTable {
    pub fn new(entries: BTreeMap<String, Vec<String>>) -> Self {
        let entries = entries
            .into_iter()
            .map(|(k, v)| {
                let values = v.into_iter().map(|s| s.to_lowercase()).collect();
                (k.to_lowercase(), values)
            })
            .collect();
        Self { entries }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in code vocabulary
    pub fn builtin() -> Self {
        Self::new(
            DEFAULT_SYNONYMS
                .iter()
                .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
                .collect(),
        )
    }

    /// Built-in table with `[expansion.synonyms]` merged over it, or only the
    /// configured entries when `replace_default_synonyms` is set
    pub fn from_config(config: &ExpansionConfig) -> Self {
        let mut table = if config.replace_default_synonyms {
            Self::empty()
        } else {
            Self::builtin()
        };
        table.merge(Self::new(config.synonyms.clone()));
        table
    }

    /// Entries in `other` replace entries with the same key
    pub fn merge(&mut self, other: SynonymTable) {
        self.entries.extend(other.entries);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forward synonyms first, then keys that list `term`
    pub fn lookup(&self, term: &str) -> Vec<&str> {
        let term = term.to_lowercase();
        let mut out: Vec<&str> = Vec::new();
        if let Some(values) = self.entries.get(&term) {
            out.extend(values.iter().map(String::as_str));
        }
        for (key, values) in &self.entries {
            if key != &term && values.iter().any(|v| v == &term) && !out.contains(&key.as_str()) {
                out.push(key.as_str());
            }
        }
        out.retain(|s| *s != term);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_forward_and_reverse() {
        let table = SynonymTable::builtin();
        assert_eq!(table.len(), 18);
        assert_eq!(
            table.lookup("call"),
            vec!["invoke", "execute", "run", "trigger"]
        );
        let reverse = table.lookup("validate");
        assert_eq!(reverse, vec!["check"]);
    }

    #[test]
    fn test_config_merge_and_replace() {
        let mut config = ExpansionConfig::default();
        config
            .synonyms
            .insert("Login".to_string(), vec!["auth".to_string(), "SignIn".to_string()]);
        let merged = SynonymTable::from_config(&config);
        assert_eq!(merged.lookup("login"), vec!["auth", "signin"]);
        assert!(!merged.lookup("function").is_empty());

        config.replace_default_synonyms = true;
        let replaced = SynonymTable::from_config(&config);
        assert_eq!(replaced.len(), 1);
        assert!(replaced.lookup("function").is_empty());
    }
}
