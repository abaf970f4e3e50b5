//! Term-weighted element ranking shared by the stores

use super::{RankedId, TraversalPattern};
use crate::index::{CodeElement, ElementKind};
use crate::query::WeightedTerm;

const EXACT_NAME: f32 = 3.0;
const NAME: f32 = 2.0;
const QUALIFIED: f32 = 1.5;
const DOCSTRING: f32 = 1.0;
const SOURCE: f32 = 0.5;

/// Whether `element` can appear under `pattern` at all
pub fn admits(pattern: &TraversalPattern, element: &CodeElement) -> bool {
    match pattern {
        TraversalPattern::Calls => {
            matches!(element.kind, ElementKind::Function | ElementKind::Method)
                && !element.calls.is_empty()
        }
        TraversalPattern::Similar => {
            matches!(element.kind, ElementKind::Function | ElementKind::Method)
        }
        TraversalPattern::ClassMethods => {
            matches!(element.kind, ElementKind::Class | ElementKind::Method)
        }
        TraversalPattern::Imports => {
            element.kind == ElementKind::Module && !element.imports.is_empty()
        }
        TraversalPattern::Elements { kinds } => kinds.is_empty() || kinds.contains(&element.kind),
    }
}

/// Score of `element` for `terms`, or `None` when nothing matched
pub fn score(pattern: &TraversalPattern, element: &CodeElement, terms: &[WeightedTerm]) -> Option<f32> {
    if !admits(pattern, element) {
        return None;
    }

    let name = element.name.to_lowercase();
    let qualified = element.qualified_name.to_lowercase();
    let docstring = element.docstring.as_deref().map(str::to_lowercase);
    let source = element.source_text.to_lowercase();

    let mut total = 0.0;
    for term in terms {
        let t = term.term.to_lowercase();
        if t.is_empty() {
            continue;
        }
        let w = term.weight;

        if name == t {
            total += EXACT_NAME * w;
        } else if name.contains(&t) {
            total += NAME * w;
        }
        if qualified.contains(&t) {
            total += QUALIFIED * w;
        }
        if docstring.as_deref().is_some_and(|d| d.contains(&t)) {
            total += DOCSTRING * w;
        }
        if source.contains(&t) {
            total += SOURCE * w;
        }
        total += evidence(pattern, element, &t) * w;
    }

    (total > 0.0).then_some(total)
}

/// Pattern-specific bonus for one term
fn evidence(pattern: &TraversalPattern, element: &CodeElement, term: &str) -> f32 {
    match pattern {
        TraversalPattern::Calls => {
            let hits = element
                .calls
                .iter()
                .filter(|c| c.simple_name().to_lowercase().contains(term))
                .count();
            hits.min(3) as f32
        }
        TraversalPattern::ClassMethods => match element.class_name() {
            Some(class) if class.to_lowercase().contains(term) => QUALIFIED,
            _ => 0.0,
        },
        TraversalPattern::Imports => {
            if element
                .imports
                .iter()
                .any(|i| i.target().to_lowercase().contains(term))
            {
                NAME
            } else {
                0.0
            }
        }
        TraversalPattern::Similar | TraversalPattern::Elements { .. } => 0.0,
    }
}

/// Score everything, keep matches, order by score then id
pub fn rank<'a, I>(
    pattern: &TraversalPattern,
    elements: I,
    terms: &[WeightedTerm],
    limit: usize,
) -> Vec<RankedId>
where
    I: IntoIterator<Item = &'a CodeElement>,
{
    let mut ranked: Vec<RankedId> = elements
        .into_iter()
        .filter_map(|e| {
            score(pattern, e, terms).map(|score| RankedId {
                id: e.id.clone(),
                score,
            })
        })
        .collect();

    ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::PythonParser;
    use crate::query::TermOrigin;

    const SOURCE_TEXT: &str = r#"
import json

class Store:
    def save(self, item):
        """Persist an item"""
        self.write(json.dumps(item))

    def write(self, data):
        pass

def load_store(path):
    return Store()
"#;

    fn elements() -> Vec<CodeElement> {
        let mut parser = PythonParser::new().unwrap();
        parser.extract("store.py", SOURCE_TEXT).unwrap().elements
    }

    fn term(t: &str, weight: f32) -> WeightedTerm {
        WeightedTerm {
            term: t.to_string(),
            weight,
            origin: TermOrigin::Word,
        }
    }

    #[test]
    fn test_exact_name_ranks_first() {
        let elements = elements();
        let ranked = rank(&TraversalPattern::all_elements(), &elements, &[term("save", 1.0)], 10);
        let top = elements.iter().find(|e| e.id == ranked[0].id).unwrap();
        assert_eq!(top.name, "save");
    }

    #[test]
    fn test_calls_pattern_requires_call_sites() {
        let elements = elements();
        let ranked = rank(&TraversalPattern::Calls, &elements, &[term("write", 1.0)], 10);
        let names: Vec<&str> = ranked
            .iter()
            .map(|r| elements.iter().find(|e| e.id == r.id).unwrap().name.as_str())
            .collect();
        assert_eq!(names[0], "save");
        assert!(!names.contains(&"write"));
    }

    #[test]
    fn test_imports_pattern_matches_modules() {
        let elements = elements();
        let ranked = rank(&TraversalPattern::Imports, &elements, &[term("json", 1.0)], 10);
        assert_eq!(ranked.len(), 1);
        assert!(ranked[0].id.as_str().starts_with("store.py::store@"));
    }

    #[test]
    fn test_no_match_is_empty_and_limit_applies() {
        let elements = elements();
        assert!(rank(&TraversalPattern::all_elements(), &elements, &[term("zzz", 1.0)], 10).is_empty());
        assert_eq!(
            rank(&TraversalPattern::all_elements(), &elements, &[term("s", 1.0)], 2).len(),
            2
        );
    }
}
