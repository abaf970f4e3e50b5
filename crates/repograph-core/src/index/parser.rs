//! AST-based Python extraction via tree-sitter

use std::ops::Range;
use std::path::Path;

use anyhow::{Context, Result};
use streaming_iterator::StreamingIterator;
use tree_sitter::{Language, Node, Parser, Query, QueryCursor};

use super::element::{
    CallRef, CodeElement, ElementId, ElementKind, FileExtraction, ImportRecord, ParamKind,
    Parameter, Signature,
};
use super::fingerprint::{docstring_node, FingerprintBuilder};
use super::normalize::content_hash;
use crate::error::ExtractionError;

const CALL_QUERY: &str = "(call function: (_) @callee) @call";

/// Where new definitions are attached while walking
#[derive(Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Module,
    Class,
    Function,
}

struct Scope {
    kind: ScopeKind,
    qualified: String,
    id: ElementId,
    lambdas: usize,
}

/// Elements collected for one file, with byte spans for call attribution
struct Collector<'s> {
    path: &'s str,
    source: &'s str,
    elements: Vec<CodeElement>,
    spans: Vec<Range<usize>>,
    imports: Vec<ImportRecord>,
}

/// Python source parser using tree-sitter
pub struct PythonParser {
    parser: Parser,
    call_query: Query,
    fingerprints: FingerprintBuilder,
}

impl PythonParser {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        let language: Language = tree_sitter_python::LANGUAGE.into();
        parser
            .set_language(&language)
            .context("Failed to set Python language")?;
        let call_query =
            Query::new(&language, CALL_QUERY).context("Failed to compile call query")?;
        Ok(Self {
            parser,
            call_query,
            fingerprints: FingerprintBuilder::default(),
        })
    }

    pub fn with_fingerprints(mut self, fingerprints: FingerprintBuilder) -> Self {
        self.fingerprints = fingerprints;
        self
    }

    /// Read and extract a file. `relative` is the path recorded in ids.
    pub fn extract_file(
        &mut self,
        absolute: &Path,
        relative: &str,
    ) -> Result<FileExtraction, ExtractionError> {
        let source = read_source(absolute)?;
        self.extract(relative, &source)
    }

    /// Extract all elements of one Python source file
    pub fn extract(&mut self, path: &str, source: &str) -> Result<FileExtraction, ExtractionError> {
        let tree = self
            .parser
            .parse(source, None)
            .ok_or_else(|| ExtractionError::Parser {
                path: path.into(),
                reason: "parse returned no tree".to_string(),
            })?;
        let root = tree.root_node();

        if root.has_error() {
            let (line, column) = first_error_position(root);
            return Err(ExtractionError::Syntax {
                path: path.into(),
                line,
                column,
            });
        }

        let module_name = module_name_for(path);
        let mut collector = Collector {
            path,
            source,
            elements: Vec::new(),
            spans: Vec::new(),
            imports: Vec::new(),
        };

        let module_id = ElementId::new(path, &module_name, 1, line_count(source));
        collector.elements.push(CodeElement {
            id: module_id.clone(),
            kind: ElementKind::Module,
            name: module_name
                .rsplit('.')
                .next()
                .unwrap_or(&module_name)
                .to_string(),
            qualified_name: module_name.clone(),
            file_path: path.to_string(),
            line_start: 1,
            line_end: line_count(source),
            source_text: source.to_string(),
            content_hash: content_hash(source),
            docstring: module_docstring(root, source),
            signature: None,
            bases: Vec::new(),
            decorators: Vec::new(),
            is_async: false,
            anonymous: false,
            imports: Vec::new(),
            fingerprint: self.fingerprints.build(root),
            embedding: None,
            calls: Vec::new(),
            contained_by: None,
        });
        collector.spans.push(0..source.len());

        let mut scope = Scope {
            kind: ScopeKind::Module,
            qualified: module_name.clone(),
            id: module_id,
            lambdas: 0,
        };
        self.walk(root, &mut scope, &mut collector);

        self.collect_calls(root, &mut collector);

        let imports = std::mem::take(&mut collector.imports);
        if let Some(module) = collector.elements.first_mut() {
            module.imports = imports;
        }

        Ok(FileExtraction {
            path: path.to_string(),
            module_name,
            elements: collector.elements,
        })
    }

    fn walk(&self, node: Node, scope: &mut Scope, out: &mut Collector) {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();

        for child in children {
            match child.kind() {
                "function_definition" => {
                    let kind = if scope.kind == ScopeKind::Class {
                        ElementKind::Method
                    } else {
                        ElementKind::Function
                    };
                    let element = self.definition_element(child, kind, scope, out);
                    let mut inner = Scope {
                        kind: ScopeKind::Function,
                        qualified: element.qualified_name.clone(),
                        id: element.id.clone(),
                        lambdas: 0,
                    };
                    out.push(element, child.byte_range());
                    self.walk(child, &mut inner, out);
                }
                "class_definition" => {
                    let element = self.definition_element(child, ElementKind::Class, scope, out);
                    let mut inner = Scope {
                        kind: ScopeKind::Class,
                        qualified: element.qualified_name.clone(),
                        id: element.id.clone(),
                        lambdas: 0,
                    };
                    out.push(element, child.byte_range());
                    self.walk(child, &mut inner, out);
                }
                "lambda" => {
                    let element = self.lambda_element(child, scope, out);
                    let mut inner = Scope {
                        kind: ScopeKind::Function,
                        qualified: element.qualified_name.clone(),
                        id: element.id.clone(),
                        lambdas: 0,
                    };
                    out.push(element, child.byte_range());
                    self.walk(child, &mut inner, out);
                }
                "import_statement" => out.imports.extend(plain_imports(child, out.source)),
                "import_from_statement" => out.imports.extend(from_imports(child, out.source)),
                _ => self.walk(child, scope, out),
            }
        }
    }

    fn definition_element(
        &self,
        node: Node,
        kind: ElementKind,
        scope: &Scope,
        out: &Collector,
    ) -> CodeElement {
        let name = node
            .child_by_field_name("name")
            .map(|n| text(n, out.source).to_string())
            .unwrap_or_default();
        let qualified_name = format!("{}.{}", scope.qualified, name);

        let signature = if kind == ElementKind::Class {
            None
        } else {
            node.child_by_field_name("parameters")
                .map(|p| self.signature(p, node.child_by_field_name("return_type"), out.source))
        };

        let bases = node
            .child_by_field_name("superclasses")
            .map(|list| {
                let mut cursor = list.walk();
                let bases: Vec<String> = list
                    .named_children(&mut cursor)
                    .filter(|n| matches!(n.kind(), "identifier" | "attribute" | "subscript"))
                    .map(|n| text(n, out.source).to_string())
                    .collect();
                bases
            })
            .unwrap_or_default();

        let docstring = docstring_node(node).map(|d| literal_value(text(d, out.source)));

        self.element(node, kind, name, qualified_name, scope, out)
            .with_details(signature, docstring, bases, decorators_of(node, out.source), is_async(node))
    }

    fn lambda_element(&self, node: Node, scope: &mut Scope, out: &Collector) -> CodeElement {
        let name = format!("<lambda#{}>", scope.lambdas);
        scope.lambdas += 1;
        let qualified_name = format!("{}.{}", scope.qualified, name);
        let signature = Some(
            node.child_by_field_name("parameters")
                .map(|p| self.signature(p, None, out.source))
                .unwrap_or_default(),
        );

        let mut element = self
            .element(node, ElementKind::Function, name, qualified_name, scope, out)
            .with_details(signature, None, Vec::new(), Vec::new(), false);
        element.anonymous = true;
        element
    }

    fn element(
        &self,
        node: Node,
        kind: ElementKind,
        name: String,
        qualified_name: String,
        scope: &Scope,
        out: &Collector,
    ) -> CodeElement {
        let line_start = node.start_position().row + 1;
        let line_end = end_line(node);
        let source_text = text(node, out.source).to_string();

        CodeElement {
            id: ElementId::new(out.path, &qualified_name, line_start, line_end),
            kind,
            name,
            qualified_name,
            file_path: out.path.to_string(),
            line_start,
            line_end,
            content_hash: content_hash(&source_text),
            source_text,
            docstring: None,
            signature: None,
            bases: Vec::new(),
            decorators: Vec::new(),
            is_async: false,
            anonymous: false,
            imports: Vec::new(),
            fingerprint: self.fingerprints.build(node),
            embedding: None,
            calls: Vec::new(),
            contained_by: Some(scope.id.clone()),
        }
    }

    fn signature(&self, params: Node, return_type: Option<Node>, source: &str) -> Signature {
        let mut parameters = Vec::new();
        let mut keyword_only = false;
        let positional = |keyword_only: bool| {
            if keyword_only {
                ParamKind::KeywordOnly
            } else {
                ParamKind::Positional
            }
        };

        let mut cursor = params.walk();
        for child in params.named_children(&mut cursor) {
            let annotation = child
                .child_by_field_name("type")
                .map(|t| text(t, source).to_string());
            match child.kind() {
                "identifier" => parameters.push(Parameter {
                    name: text(child, source).to_string(),
                    kind: positional(keyword_only),
                    annotation: None,
                    has_default: false,
                }),
                "default_parameter" | "typed_default_parameter" => parameters.push(Parameter {
                    name: child
                        .child_by_field_name("name")
                        .map(|n| text(n, source).to_string())
                        .unwrap_or_default(),
                    kind: positional(keyword_only),
                    annotation,
                    has_default: true,
                }),
                "typed_parameter" => {
                    let Some(inner) = child.named_child(0) else {
                        continue;
                    };
                    let (name, kind) = splat_or_plain(inner, source, keyword_only);
                    if kind == ParamKind::VarArgs {
                        keyword_only = true;
                    }
                    parameters.push(Parameter {
                        name,
                        kind,
                        annotation,
                        has_default: false,
                    });
                }
                "list_splat_pattern" | "dictionary_splat_pattern" => {
                    let (name, kind) = splat_or_plain(child, source, keyword_only);
                    if kind == ParamKind::VarArgs {
                        keyword_only = true;
                    }
                    parameters.push(Parameter {
                        name,
                        kind,
                        annotation: None,
                        has_default: false,
                    });
                }
                "keyword_separator" => keyword_only = true,
                _ => {}
            }
        }

        Signature {
            parameters,
            return_annotation: return_type.map(|t| text(t, source).to_string()),
        }
    }

    /// Attribute every call to the innermost element whose span contains it
    fn collect_calls(&self, root: Node, out: &mut Collector) {
        let callee_index = self.call_query.capture_index_for_name("callee");
        let call_index = self.call_query.capture_index_for_name("call");

        let source = out.source;
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&self.call_query, root, source.as_bytes());

        while let Some(m) = matches.next() {
            let mut callee = None;
            let mut call = None;
            for capture in m.captures.iter() {
                if Some(capture.index) == callee_index {
                    callee = Some(capture.node);
                } else if Some(capture.index) == call_index {
                    call = Some(capture.node);
                }
            }
            let (Some(callee), Some(call)) = (callee, call) else {
                continue;
            };

            let target: String = text(callee, source)
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect();
            let (args, kwargs) = count_arguments(call);
            let owner = out.innermost(call.start_byte());

            out.elements[owner].calls.push(CallRef {
                target,
                line: call.start_position().row + 1,
                args,
                kwargs,
                resolved: None,
            });
        }
    }
}

impl Collector<'_> {
    fn push(&mut self, element: CodeElement, span: Range<usize>) {
        self.elements.push(element);
        self.spans.push(span);
    }

    /// Index of the smallest span containing `byte`. The module always does.
    fn innermost(&self, byte: usize) -> usize {
        self.spans
            .iter()
            .enumerate()
            .filter(|(_, span)| span.start <= byte && byte < span.end.max(span.start + 1))
            .min_by_key(|(i, span)| (span.end - span.start, std::cmp::Reverse(*i)))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }
}

impl CodeElement {
    fn with_details(
        mut self,
        signature: Option<Signature>,
        docstring: Option<String>,
        bases: Vec<String>,
        decorators: Vec<String>,
        is_async: bool,
    ) -> Self {
        self.signature = signature;
        self.docstring = docstring;
        self.bases = bases;
        self.decorators = decorators;
        self.is_async = is_async;
        self
    }
}

/// Read a source file, mapping failures to extraction errors
pub fn read_source(path: &Path) -> Result<String, ExtractionError> {
    let bytes = std::fs::read(path).map_err(|source| ExtractionError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    String::from_utf8(bytes).map_err(|_| ExtractionError::Decode {
        path: path.to_path_buf(),
    })
}

/// Dotted module name for a relative path: `pkg/sub/__init__.py` -> `pkg.sub`
pub fn module_name_for(path: &str) -> String {
    let trimmed = path.strip_suffix(".py").unwrap_or(path);
    let mut parts: Vec<&str> = trimmed
        .split(['/', '\\'])
        .filter(|p| !p.is_empty() && *p != ".")
        .collect();
    if parts.len() > 1 && parts.last() == Some(&"__init__") {
        parts.pop();
    }
    parts.join(".")
}

fn text<'s>(node: Node, source: &'s str) -> &'s str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

fn line_count(source: &str) -> usize {
    source.lines().count().max(1)
}

/// 1-based last line, not counting a trailing newline
fn end_line(node: Node) -> usize {
    let end = node.end_position();
    let start = node.start_position();
    if end.column == 0 && end.row > start.row {
        end.row
    } else {
        end.row + 1
    }
}

fn first_error_position(root: Node) -> (usize, usize) {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            let pos = node.start_position();
            return (pos.row + 1, pos.column + 1);
        }
        if node.has_error() {
            let mut cursor = node.walk();
            let children: Vec<Node> = node.children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }
    }
    let pos = root.start_position();
    (pos.row + 1, pos.column + 1)
}

fn module_docstring(root: Node, source: &str) -> Option<String> {
    let mut cursor = root.walk();
    let first = root
        .named_children(&mut cursor)
        .find(|n| n.kind() != "comment")?;
    if first.kind() != "expression_statement" || first.named_child_count() != 1 {
        return None;
    }
    let expr = first.named_child(0)?;
    (expr.kind() == "string").then(|| literal_value(text(expr, source)))
}

/// Contents of a string literal with quotes, prefixes and indentation removed
fn literal_value(raw: &str) -> String {
    let unprefixed = raw.trim_start_matches(|c: char| "rRbBuUfF".contains(c));
    let inner = ["\"\"\"", "'''", "\"", "'"]
        .iter()
        .find_map(|q| {
            unprefixed
                .strip_prefix(q)
                .and_then(|s| s.strip_suffix(q))
        })
        .unwrap_or(unprefixed);
    inner
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn decorators_of(definition: Node, source: &str) -> Vec<String> {
    let Some(parent) = definition.parent() else {
        return Vec::new();
    };
    if parent.kind() != "decorated_definition" {
        return Vec::new();
    }
    let mut cursor = parent.walk();
    let decorators = parent
        .named_children(&mut cursor)
        .filter(|n| n.kind() == "decorator")
        .map(|n| text(n, source).trim_start_matches('@').trim().to_string())
        .collect();
    decorators
}

fn is_async(definition: Node) -> bool {
    let mut cursor = definition.walk();
    let found = definition
        .children(&mut cursor)
        .any(|c| c.kind() == "async");
    found
}

fn splat_or_plain(node: Node, source: &str, keyword_only: bool) -> (String, ParamKind) {
    let inner_name = |n: Node| {
        n.named_child(0)
            .map(|i| text(i, source).to_string())
            .unwrap_or_default()
    };
    match node.kind() {
        "list_splat_pattern" => (inner_name(node), ParamKind::VarArgs),
        "dictionary_splat_pattern" => (inner_name(node), ParamKind::KwArgs),
        _ => (
            text(node, source).to_string(),
            if keyword_only {
                ParamKind::KeywordOnly
            } else {
                ParamKind::Positional
            },
        ),
    }
}

fn count_arguments(call: Node) -> (usize, usize) {
    let Some(arguments) = call.child_by_field_name("arguments") else {
        return (0, 0);
    };
    if arguments.kind() == "generator_expression" {
        return (1, 0);
    }
    let mut cursor = arguments.walk();
    let counts = arguments
        .named_children(&mut cursor)
        .filter(|n| n.kind() != "comment")
        .fold((0, 0), |(args, kwargs), n| match n.kind() {
            "keyword_argument" | "dictionary_splat" => (args, kwargs + 1),
            _ => (args + 1, kwargs),
        });
    counts
}

fn plain_imports(node: Node, source: &str) -> Vec<ImportRecord> {
    let line = node.start_position().row + 1;
    let mut cursor = node.walk();
    let records = node
        .children_by_field_name("name", &mut cursor)
        .filter_map(|n| {
            let (module, alias) = aliased(n, source)?;
            Some(ImportRecord {
                module,
                name: None,
                alias,
                line,
            })
        })
        .collect();
    records
}

fn from_imports(node: Node, source: &str) -> Vec<ImportRecord> {
    let line = node.start_position().row + 1;
    let module = node
        .child_by_field_name("module_name")
        .map(|m| text(m, source).to_string())
        .unwrap_or_default();

    let mut cursor = node.walk();
    let mut records: Vec<ImportRecord> = node
        .children_by_field_name("name", &mut cursor)
        .filter_map(|n| {
            let (name, alias) = aliased(n, source)?;
            Some(ImportRecord {
                module: module.clone(),
                name: Some(name),
                alias,
                line,
            })
        })
        .collect();

    let mut cursor = node.walk();
    let wildcard = node
        .named_children(&mut cursor)
        .any(|n| n.kind() == "wildcard_import");
    if wildcard {
        records.push(ImportRecord {
            module,
            name: Some("*".to_string()),
            alias: None,
            line,
        });
    }
    records
}

fn aliased(node: Node, source: &str) -> Option<(String, Option<String>)> {
    match node.kind() {
        "dotted_name" => Some((text(node, source).to_string(), None)),
        "aliased_import" => {
            let name = node.child_by_field_name("name")?;
            let alias = node
                .child_by_field_name("alias")
                .map(|a| text(a, source).to_string());
            Some((text(name, source).to_string(), alias))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(source: &str) -> FileExtraction {
        let mut parser = PythonParser::new().unwrap();
        parser.extract("pkg/shapes.py", source).unwrap()
    }

    fn find<'a>(file: &'a FileExtraction, qualified: &str) -> &'a CodeElement {
        file.elements
            .iter()
            .find(|e| e.qualified_name == qualified)
            .unwrap_or_else(|| panic!("missing {qualified}"))
    }

    const SHAPES: &str = r#""""Shape helpers."""
import math
from typing import List as L, Optional

class Shape(Base):
    """A shape."""

    def area(self):
        return 0

    @staticmethod
    def describe(name, *parts, sep=", ", **extra) -> str:
        return sep.join(parts)

    async def refresh(self):
        await self.area()


def total_area(shapes):
    def helper(s):
        return s.area()
    return sum(map(lambda s: helper(s), shapes), start=0)
"#;

    #[test]
    fn test_module_element_first() {
        let file = extract(SHAPES);
        let module = &file.elements[0];
        assert_eq!(module.kind, ElementKind::Module);
        assert_eq!(module.qualified_name, "pkg.shapes");
        assert_eq!(module.name, "shapes");
        assert_eq!(module.docstring.as_deref(), Some("Shape helpers."));
        assert!(module.contained_by.is_none());
        assert_eq!(module.imports.len(), 3);
        assert_eq!(module.imports[0].module, "math");
        assert_eq!(module.imports[1].target(), "typing.List");
        assert_eq!(module.imports[1].alias.as_deref(), Some("L"));
    }

    #[test]
    fn test_classes_and_methods() {
        let file = extract(SHAPES);
        let class = find(&file, "pkg.shapes.Shape");
        assert_eq!(class.kind, ElementKind::Class);
        assert_eq!(class.bases, vec!["Base"]);
        assert_eq!(class.docstring.as_deref(), Some("A shape."));
        assert_eq!(class.line_start, 5);

        let area = find(&file, "pkg.shapes.Shape.area");
        assert_eq!(area.kind, ElementKind::Method);
        assert_eq!(area.contained_by.as_ref(), Some(&class.id));
        assert_eq!(area.class_name(), Some("Shape"));

        let describe = find(&file, "pkg.shapes.Shape.describe");
        assert_eq!(describe.kind, ElementKind::Method);
        assert_eq!(describe.decorators, vec!["staticmethod"]);
        let sig = describe.signature.as_ref().unwrap();
        assert_eq!(sig.parameter_names(), vec!["name", "*parts", "sep", "**extra"]);
        assert_eq!(sig.parameters[2].kind, ParamKind::KeywordOnly);
        assert!(sig.parameters[2].has_default);
        assert_eq!(sig.return_annotation.as_deref(), Some("str"));
        assert_eq!(sig.arity(), 2);

        assert!(find(&file, "pkg.shapes.Shape.refresh").is_async);
    }

    #[test]
    fn test_nested_function_and_lambda() {
        let file = extract(SHAPES);
        let total = find(&file, "pkg.shapes.total_area");
        assert_eq!(total.kind, ElementKind::Function);

        let helper = find(&file, "pkg.shapes.total_area.helper");
        assert_eq!(helper.kind, ElementKind::Function);
        assert_eq!(helper.contained_by.as_ref(), Some(&total.id));

        let lambda = find(&file, "pkg.shapes.total_area.<lambda#0>");
        assert!(lambda.anonymous);
        assert_eq!(lambda.kind, ElementKind::Function);
        assert_eq!(lambda.contained_by.as_ref(), Some(&total.id));
        assert_eq!(lambda.calls.len(), 1);
        assert_eq!(lambda.calls[0].target, "helper");
    }

    #[test]
    fn test_calls_attributed_to_innermost() {
        let file = extract(SHAPES);
        let describe = find(&file, "pkg.shapes.Shape.describe");
        assert_eq!(describe.calls.len(), 1);
        assert_eq!(describe.calls[0].target, "sep.join");
        assert_eq!(describe.calls[0].args, 1);

        let total = find(&file, "pkg.shapes.total_area");
        let targets: Vec<&str> = total.calls.iter().map(|c| c.target.as_str()).collect();
        assert_eq!(targets, vec!["sum", "map"]);
        assert_eq!(total.calls[0].args, 1);
        assert_eq!(total.calls[0].kwargs, 1);

        let refresh = find(&file, "pkg.shapes.Shape.refresh");
        assert_eq!(refresh.calls[0].target, "self.area");
    }

    #[test]
    fn test_source_order() {
        let file = extract(SHAPES);
        let names: Vec<&str> = file.elements.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "shapes",
                "Shape",
                "area",
                "describe",
                "refresh",
                "total_area",
                "helper",
                "<lambda#0>"
            ]
        );
    }

    #[test]
    fn test_ids_stable_across_runs() {
        let a = extract(SHAPES);
        let b = extract(SHAPES);
        let ids_a: Vec<_> = a.elements.iter().map(|e| e.id.clone()).collect();
        let ids_b: Vec<_> = b.elements.iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids_a, ids_b);
        for (x, y) in a.elements.iter().zip(&b.elements) {
            assert_eq!(x.fingerprint, y.fingerprint);
            assert_eq!(x.content_hash, y.content_hash);
        }
    }

    #[test]
    fn test_lambda_numbering_per_scope() {
        let file = extract("f = lambda x: x\ng = lambda y: y\n\ndef h():\n    return lambda z: z\n");
        assert!(file
            .elements
            .iter()
            .any(|e| e.qualified_name == "pkg.shapes.<lambda#0>"));
        assert!(file
            .elements
            .iter()
            .any(|e| e.qualified_name == "pkg.shapes.<lambda#1>"));
        assert!(file
            .elements
            .iter()
            .any(|e| e.qualified_name == "pkg.shapes.h.<lambda#0>"));
    }

    #[test]
    fn test_syntax_error() {
        let mut parser = PythonParser::new().unwrap();
        let err = parser
            .extract("bad.py", "def broken(:\n    return 1\n")
            .unwrap_err();
        match err {
            ExtractionError::Syntax { line, .. } => assert_eq!(line, 1),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_module_names() {
        assert_eq!(module_name_for("pkg/sub/mod.py"), "pkg.sub.mod");
        assert_eq!(module_name_for("pkg/__init__.py"), "pkg");
        assert_eq!(module_name_for("main.py"), "main");
    }

    #[test]
    fn test_read_source_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.py");
        assert!(matches!(
            read_source(&missing),
            Err(ExtractionError::Io { .. })
        ));

        let binary = dir.path().join("binary.py");
        std::fs::write(&binary, [0xff, 0xfe, 0x00]).unwrap();
        assert!(matches!(
            read_source(&binary),
            Err(ExtractionError::Decode { .. })
        ));
    }
}
