//! Prompt assembly

use std::collections::BTreeSet;
use std::fmt::Write;

use crate::index::{CodeElement, ElementKind};
use crate::query::RetrievalHit;

pub const SYSTEM_PROMPT: &str = "You are a helpful code assistant that answers questions about a codebase.
Answer the user's question based on the code context provided below.
Provide specific examples from the code when relevant.
If the information in the context is insufficient, say so clearly.
";

pub const TRUNCATION_MARKER: &str = "\n\n[Context truncated due to length limitations]";

pub struct PromptBuilder {
    max_context_chars: usize,
}

impl PromptBuilder {
    pub fn new(max_context_chars: usize) -> Self {
        Self { max_context_chars }
    }

    pub fn build(&self, query: &str, hits: &[RetrievalHit]) -> String {
        let context = self.truncate(format_context(hits));
        format!("{SYSTEM_PROMPT}\n\nCODE CONTEXT:\n{context}\n\nUSER QUERY: {query}\n\nANSWER:")
    }

    fn truncate(&self, context: String) -> String {
        if context.len() <= self.max_context_chars {
            return context;
        }
        let mut end = self.max_context_chars;
        while !context.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}{TRUNCATION_MARKER}", &context[..end])
    }
}

/// Sections for functions, class methods, calls, imports and similar pairs
pub fn format_context(hits: &[RetrievalHit]) -> String {
    let mut sections = Vec::new();

    let functions: Vec<&CodeElement> = hits
        .iter()
        .map(|h| &h.element)
        .filter(|e| e.kind == ElementKind::Function)
        .collect();
    if !functions.is_empty() {
        let mut s = String::from("## Functions\n\n");
        for f in functions {
            let _ = writeln!(s, "### {}", f.name);
            if let Some(doc) = &f.docstring {
                let _ = writeln!(s, "Docstring: {doc}");
            }
            if let Some(sig) = f.signature.as_ref().filter(|s| !s.parameters.is_empty()) {
                let _ = writeln!(s, "Parameters: {}", sig.parameter_names().join(", "));
            }
            s.push('\n');
        }
        sections.push(s);
    }

    // Classes in first-seen order, each with its methods
    let mut classes: Vec<(String, Option<&str>, Vec<&CodeElement>)> = Vec::new();
    for e in hits.iter().map(|h| &h.element) {
        let (class, doc) = match e.kind {
            ElementKind::Class => (e.name.as_str(), e.docstring.as_deref()),
            ElementKind::Method => match e.class_name() {
                Some(class) => (class, None),
                None => continue,
            },
            _ => continue,
        };
        let idx = match classes.iter().position(|(name, _, _)| name == class) {
            Some(idx) => idx,
            None => {
                classes.push((class.to_string(), None, Vec::new()));
                classes.len() - 1
            }
        };
        if e.kind == ElementKind::Method {
            classes[idx].2.push(e);
        } else {
            classes[idx].1 = doc;
        }
    }
    if !classes.is_empty() {
        let mut s = String::from("## Class Methods\n\n");
        for (class, doc, methods) in &classes {
            let _ = writeln!(s, "### Class: {class}");
            if let Some(doc) = doc {
                let _ = writeln!(s, "Docstring: {doc}");
            }
            for m in methods {
                let _ = writeln!(s, "Method: {}", m.name);
                if let Some(doc) = &m.docstring {
                    let _ = writeln!(s, "Docstring: {doc}");
                }
            }
            s.push('\n');
        }
        sections.push(s);
    }

    let mut calls = String::new();
    for e in hits.iter().map(|h| &h.element) {
        for call in &e.calls {
            let _ = write!(calls, "{} calls {}", e.qualified_name, call.target);
            if call.args > 0 || call.kwargs > 0 {
                let _ = write!(
                    calls,
                    " with {} positional args and {} keyword args",
                    call.args, call.kwargs
                );
            }
            calls.push('\n');
        }
    }
    if !calls.is_empty() {
        sections.push(format!("## Function Calls\n\n{calls}"));
    }

    let mut imports = String::new();
    for e in hits.iter().map(|h| &h.element) {
        for import in &e.imports {
            let _ = writeln!(imports, "{} imports {}", e.qualified_name, import.target());
        }
    }
    if !imports.is_empty() {
        sections.push(format!("## Module Imports\n\n{imports}"));
    }

    let mut seen = BTreeSet::new();
    let mut similar = String::new();
    for hit in hits {
        for edge in &hit.similar {
            if !seen.insert((edge.a.clone(), edge.b.clone())) {
                continue;
            }
            let other = edge.other(&hit.element.id);
            let _ = writeln!(
                similar,
                "{} is similar to {} (score: {:.2})",
                hit.element.qualified_name, other, edge.combined_score
            );
        }
    }
    if !similar.is_empty() {
        sections.push(format!("## Similar Functions\n\n{similar}"));
    }

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::PythonParser;
    use crate::similarity::{PairScore, SimilarityEdge};

    const SOURCE: &str = r#"
import os
from typing import List

def join_paths(base, *parts):
    """Join path parts"""
    return os.path.join(base, *parts, strict=True)

class Loader:
    """Loads things"""
    def load(self, name):
        return join_paths("/tmp", name)
"#;

    fn hits() -> Vec<RetrievalHit> {
        let mut parser = PythonParser::new().unwrap();
        parser
            .extract("pkg/io.py", SOURCE)
            .unwrap()
            .elements
            .into_iter()
            .map(|element| RetrievalHit {
                element,
                score: 1.0,
                traversal_rank: Some(1),
                embedding_rank: None,
                similar: Vec::new(),
            })
            .collect()
    }

    #[test]
    fn test_sections() {
        let mut hits = hits();
        let a = hits[1].element.id.clone();
        let b = hits[3].element.id.clone();
        hits[1].similar.push(SimilarityEdge::new(
            &a,
            &b,
            PairScore {
                structural: 0.9,
                embedding: None,
                combined: 0.9,
            },
        ));
        let context = format_context(&hits);

        assert!(context.starts_with("## Functions\n\n### join_paths\nDocstring: Join path parts\nParameters: base, *parts\n"));
        assert!(context.contains("## Class Methods\n\n### Class: Loader\nDocstring: Loads things\nMethod: load\n"));
        assert!(context.contains("pkg.io.join_paths calls os.path.join with 2 positional args and 1 keyword args\n"));
        assert!(context.contains("## Module Imports\n\npkg.io imports os\npkg.io imports typing.List\n"));
        assert!(context.contains("(score: 0.90)"));
    }

    #[test]
    fn test_prompt_layout() {
        let prompt = PromptBuilder::new(10_000).build("where are paths joined?", &hits());
        assert!(prompt.starts_with(SYSTEM_PROMPT));
        assert!(prompt.contains("\n\nCODE CONTEXT:\n## Functions"));
        assert!(prompt.ends_with("\n\nUSER QUERY: where are paths joined?\n\nANSWER:"));
    }

    #[test]
    fn test_truncation_marker() {
        let prompt = PromptBuilder::new(40).build("q", &hits());
        assert!(prompt.contains(TRUNCATION_MARKER));
        let context_start = prompt.find("CODE CONTEXT:\n").unwrap() + "CODE CONTEXT:\n".len();
        let context_end = prompt.find(TRUNCATION_MARKER).unwrap();
        assert_eq!(context_end - context_start, 40);
    }

    #[test]
    fn test_empty_hits() {
        assert_eq!(format_context(&[]), "");
    }
}
