//! Code elements produced by extraction

use std::fmt;

use serde::{Deserialize, Serialize};

use super::fingerprint::StructuralFingerprint;
use crate::embeddings::Embedding;

/// Stable element id: `{file_path}::{qualified_name}@{line_start}-{line_end}`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(String);

impl ElementId {
    pub fn new(file_path: &str, qualified_name: &str, line_start: usize, line_end: usize) -> Self {
        Self(format!(
            "{}::{}@{}-{}",
            file_path, qualified_name, line_start, line_end
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ElementId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ElementId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Kinds of elements we index
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Function,
    Method,
    Class,
    Module,
}

impl ElementKind {
    pub const ALL: [ElementKind; 4] = [Self::Function, Self::Method, Self::Class, Self::Module];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Module => "module",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "function" => Some(Self::Function),
            "method" => Some(Self::Method),
            "class" => Some(Self::Class),
            "module" => Some(Self::Module),
            _ => None,
        }
    }

    /// Kinds that get embeddings and similarity edges
    pub fn is_comparable(&self) -> bool {
        !matches!(self, Self::Module)
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Positional,
    KeywordOnly,
    VarArgs,
    KwArgs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub kind: ParamKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
    #[serde(default)]
    pub has_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Signature {
    pub parameters: Vec<Parameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_annotation: Option<String>,
}

impl Signature {
    /// Parameters excluding `*args` / `**kwargs`
    pub fn arity(&self) -> usize {
        self.parameters
            .iter()
            .filter(|p| matches!(p.kind, ParamKind::Positional | ParamKind::KeywordOnly))
            .count()
    }

    pub fn parameter_names(&self) -> Vec<String> {
        self.parameters
            .iter()
            .map(|p| match p.kind {
                ParamKind::VarArgs => format!("*{}", p.name),
                ParamKind::KwArgs => format!("**{}", p.name),
                _ => p.name.clone(),
            })
            .collect()
    }
}

/// `import a.b as c` or `from a import b`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRecord {
    pub module: String,
    /// Imported name for `from` imports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub line: usize,
}

impl ImportRecord {
    /// Dotted target, e.g. `os.path` or `typing.List`
    pub fn target(&self) -> String {
        match &self.name {
            Some(name) => format!("{}.{}", self.module, name),
            None => self.module.clone(),
        }
    }
}

/// A call site. Unresolved calls stay as dangling references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRef {
    /// Callee expression text, e.g. `self.save` or `os.path.join`
    pub target: String,
    pub line: usize,
    pub args: usize,
    pub kwargs: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<ElementId>,
}

impl CallRef {
    /// Last dotted component of the target
    pub fn simple_name(&self) -> &str {
        self.target.rsplit('.').next().unwrap_or(&self.target)
    }
}

/// One structural element of a Python file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeElement {
    pub id: ElementId,
    pub kind: ElementKind,
    pub name: String,
    pub qualified_name: String,
    pub file_path: String,
    pub line_start: usize,
    pub line_end: usize,
    pub source_text: String,
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bases: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decorators: Vec<String>,
    #[serde(default)]
    pub is_async: bool,
    #[serde(default)]
    pub anonymous: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<ImportRecord>,
    pub fingerprint: StructuralFingerprint,
    /// Stored separately from the JSON payload
    #[serde(skip)]
    pub embedding: Option<Embedding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<CallRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contained_by: Option<ElementId>,
}

impl CodeElement {
    /// Name of the enclosing class for methods, from the qualified name
    pub fn class_name(&self) -> Option<&str> {
        if self.kind != ElementKind::Method {
            return None;
        }
        let (parent, _) = self.qualified_name.rsplit_once('.')?;
        Some(parent.rsplit('.').next().unwrap_or(parent))
    }
}

/// Result of extracting one file
#[derive(Debug, Clone)]
pub struct FileExtraction {
    /// Path relative to the index root, `/`-separated
    pub path: String,
    /// Dotted module name derived from the path
    pub module_name: String,
    /// Module element first, then definitions in source order
    pub elements: Vec<CodeElement>,
}

impl FileExtraction {
    pub fn call_count(&self) -> usize {
        self.elements.iter().map(|e| e.calls.len()).sum()
    }
}
