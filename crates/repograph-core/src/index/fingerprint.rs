//! Structural fingerprints
//!
//! A syntax subtree is reduced to a pre-order sequence of coarse node
//! categories. Identifier names and literal values never reach the sequence,
//! so renaming variables or changing constants leaves it unchanged.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tree_sitter::Node;

/// Coarse syntax categories used in fingerprints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeCategory {
    #[serde(rename = "fn")]
    Function,
    #[serde(rename = "lam")]
    Lambda,
    #[serde(rename = "cls")]
    Class,
    #[serde(rename = "par")]
    Parameter,
    #[serde(rename = "dec")]
    Decorator,
    #[serde(rename = "if")]
    Conditional,
    #[serde(rename = "br")]
    Branch,
    #[serde(rename = "loop")]
    Loop,
    #[serde(rename = "comp")]
    Comprehension,
    #[serde(rename = "try")]
    Try,
    #[serde(rename = "hnd")]
    Handler,
    #[serde(rename = "with")]
    With,
    #[serde(rename = "call")]
    Call,
    #[serde(rename = "kw")]
    KeywordArg,
    #[serde(rename = "splat")]
    Splat,
    #[serde(rename = "ret")]
    Return,
    #[serde(rename = "yld")]
    Yield,
    #[serde(rename = "raise")]
    Raise,
    #[serde(rename = "assert")]
    Assert,
    #[serde(rename = "await")]
    Await,
    #[serde(rename = "asg")]
    Assign,
    #[serde(rename = "aug")]
    AugAssign,
    #[serde(rename = "bin")]
    BinaryOp,
    #[serde(rename = "bool")]
    BoolOp,
    #[serde(rename = "cmp")]
    Compare,
    #[serde(rename = "un")]
    UnaryOp,
    #[serde(rename = "attr")]
    Attribute,
    #[serde(rename = "sub")]
    Subscript,
    #[serde(rename = "coll")]
    Collection,
    #[serde(rename = "lit")]
    Literal,
    #[serde(rename = "name")]
    Name,
    #[serde(rename = "jmp")]
    Jump,
    #[serde(rename = "imp")]
    Import,
    #[serde(rename = "other")]
    Other,
}

impl NodeCategory {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Function => "fn",
            Self::Lambda => "lam",
            Self::Class => "cls",
            Self::Parameter => "par",
            Self::Decorator => "dec",
            Self::Conditional => "if",
            Self::Branch => "br",
            Self::Loop => "loop",
            Self::Comprehension => "comp",
            Self::Try => "try",
            Self::Handler => "hnd",
            Self::With => "with",
            Self::Call => "call",
            Self::KeywordArg => "kw",
            Self::Splat => "splat",
            Self::Return => "ret",
            Self::Yield => "yld",
            Self::Raise => "raise",
            Self::Assert => "assert",
            Self::Await => "await",
            Self::Assign => "asg",
            Self::AugAssign => "aug",
            Self::BinaryOp => "bin",
            Self::BoolOp => "bool",
            Self::Compare => "cmp",
            Self::UnaryOp => "un",
            Self::Attribute => "attr",
            Self::Subscript => "sub",
            Self::Collection => "coll",
            Self::Literal => "lit",
            Self::Name => "name",
            Self::Jump => "jmp",
            Self::Import => "imp",
            Self::Other => "other",
        }
    }
}

/// How a tree-sitter node kind contributes to a fingerprint
enum Disposition {
    /// Emit a category and walk all named children
    Emit(NodeCategory),
    /// Emit a category and walk only the given field
    EmitField(NodeCategory, &'static str),
    /// Emit a category, do not descend
    Leaf(NodeCategory),
    /// No category, walk children
    Transparent,
    /// Drop the node and its subtree
    Skip,
}

fn classify(node: Node) -> Disposition {
    use Disposition::*;
    use NodeCategory as C;

    match node.kind() {
        "function_definition" => Emit(C::Function),
        "lambda" => Emit(C::Lambda),
        "class_definition" => Emit(C::Class),
        "decorator" => Emit(C::Decorator),

        "identifier" if in_parameter_list(node) => Leaf(C::Parameter),
        "default_parameter" | "typed_default_parameter" => EmitField(C::Parameter, "value"),
        "typed_parameter" => Leaf(C::Parameter),
        "list_splat_pattern" | "dictionary_splat_pattern" if in_parameter_list(node) => {
            Leaf(C::Parameter)
        }
        "keyword_separator" | "positional_separator" => Skip,

        "if_statement" | "conditional_expression" | "match_statement" => Emit(C::Conditional),
        "elif_clause" | "else_clause" | "case_clause" => Emit(C::Branch),
        "for_statement" | "while_statement" => Emit(C::Loop),
        "list_comprehension"
        | "set_comprehension"
        | "dictionary_comprehension"
        | "generator_expression" => Emit(C::Comprehension),
        "try_statement" => Emit(C::Try),
        "except_clause" | "except_group_clause" | "finally_clause" => Emit(C::Handler),
        "with_statement" => Emit(C::With),

        "call" => Emit(C::Call),
        "keyword_argument" => EmitField(C::KeywordArg, "value"),
        "list_splat" | "dictionary_splat" | "list_splat_pattern" | "dictionary_splat_pattern" => {
            Emit(C::Splat)
        }

        "return_statement" => Emit(C::Return),
        "yield" => Emit(C::Yield),
        "raise_statement" => Emit(C::Raise),
        "assert_statement" => Emit(C::Assert),
        "await" => Emit(C::Await),

        "assignment" | "named_expression" => Emit(C::Assign),
        "augmented_assignment" => Emit(C::AugAssign),
        "binary_operator" => Emit(C::BinaryOp),
        "boolean_operator" => Emit(C::BoolOp),
        "comparison_operator" => Emit(C::Compare),
        "unary_operator" | "not_operator" => Emit(C::UnaryOp),
        "attribute" => EmitField(C::Attribute, "object"),
        "subscript" | "slice" => Emit(C::Subscript),
        "list" | "tuple" | "dictionary" | "set" | "pattern_list" | "tuple_pattern"
        | "list_pattern" | "expression_list" => Emit(C::Collection),

        "string" | "concatenated_string" | "integer" | "float" | "true" | "false" | "none"
        | "ellipsis" => Leaf(C::Literal),
        "identifier" => Leaf(C::Name),

        "break_statement" | "continue_statement" | "pass_statement" => Leaf(C::Jump),
        "import_statement" | "import_from_statement" | "future_import_statement" => {
            Leaf(C::Import)
        }

        "comment" | "type" => Skip,

        "module" | "block" | "expression_statement" | "parenthesized_expression"
        | "argument_list" | "parameters" | "lambda_parameters" | "decorated_definition"
        | "for_in_clause" | "if_clause" | "with_clause" | "with_item" | "pair" | "as_pattern"
        | "as_pattern_target" => Transparent,

        _ => Emit(C::Other),
    }
}

fn in_parameter_list(node: Node) -> bool {
    node.parent()
        .is_some_and(|p| matches!(p.kind(), "parameters" | "lambda_parameters"))
}

/// Leading docstring node of a function or class body
pub(crate) fn docstring_node(definition: Node) -> Option<Node> {
    let body = definition.child_by_field_name("body")?;
    let mut cursor = body.walk();
    let first = body.named_children(&mut cursor).find(|n| n.kind() != "comment")?;
    if first.kind() != "expression_statement" || first.named_child_count() != 1 {
        return None;
    }
    let expr = first.named_child(0)?;
    (expr.kind() == "string").then_some(first)
}

/// Identifier/literal-insensitive encoding of a syntax subtree's shape
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StructuralFingerprint {
    pub categories: Vec<NodeCategory>,
    #[serde(default)]
    pub low_confidence: bool,
}

impl StructuralFingerprint {
    pub fn node_count(&self) -> usize {
        self.categories.len()
    }

    /// Space-separated category codes
    pub fn signature(&self) -> String {
        self.categories
            .iter()
            .map(|c| c.code())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for StructuralFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}

/// Builds fingerprints from tree-sitter nodes
#[derive(Debug, Clone, Copy)]
pub struct FingerprintBuilder {
    min_structural_nodes: usize,
}

impl FingerprintBuilder {
    pub fn new(min_structural_nodes: usize) -> Self {
        Self {
            min_structural_nodes,
        }
    }

    /// Fingerprint the subtree rooted at `root`
    pub fn build(&self, root: Node) -> StructuralFingerprint {
        let categories = categorize(root);
        let low_confidence = categories.len() < self.min_structural_nodes;
        StructuralFingerprint {
            categories,
            low_confidence,
        }
    }
}

impl Default for FingerprintBuilder {
    fn default() -> Self {
        Self::new(8)
    }
}

fn children_of<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
    children
}

fn categorize(root: Node) -> Vec<NodeCategory> {
    let mut out = Vec::new();
    let mut skipped: HashSet<usize> = HashSet::new();
    let mut stack = vec![root];

    while let Some(node) = stack.pop() {
        if skipped.contains(&node.id()) {
            continue;
        }

        if matches!(node.kind(), "function_definition" | "class_definition") {
            if let Some(name) = node.child_by_field_name("name") {
                skipped.insert(name.id());
            }
            if let Some(doc) = docstring_node(node) {
                skipped.insert(doc.id());
            }
        }

        let children = match classify(node) {
            Disposition::Emit(category) => {
                out.push(category);
                children_of(node)
            }
            Disposition::EmitField(category, field) => {
                out.push(category);
                node.child_by_field_name(field).into_iter().collect()
            }
            Disposition::Leaf(category) => {
                out.push(category);
                Vec::new()
            }
            Disposition::Transparent => children_of(node),
            Disposition::Skip => Vec::new(),
        };

        stack.extend(children.into_iter().rev());
    }

    out
}

/// Normalized Levenshtein distance between two fingerprints, in [0, 1]
pub fn structural_distance(a: &StructuralFingerprint, b: &StructuralFingerprint) -> f32 {
    let longest = a.node_count().max(b.node_count());
    if longest == 0 {
        return 0.0;
    }
    levenshtein(&a.categories, &b.categories) as f32 / longest as f32
}

fn levenshtein<T: PartialEq>(a: &[T], b: &[T]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, x) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, y) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(x != y);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}
