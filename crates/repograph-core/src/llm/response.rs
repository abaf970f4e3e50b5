//! Raw model output cleanup

use once_cell::sync::Lazy;
use regex::Regex;

static ECHOED_PROMPT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)You are a helpful code assistant that answers questions.*?ANSWER:").unwrap()
});

static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

const BOILERPLATE_PREFIXES: &[&str] = &[
    "I'll help you with that.",
    "Here's what I found:",
    "Based on the context provided,",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseFormatter;

impl ResponseFormatter {
    pub fn new() -> Self {
        Self
    }

    pub fn format(&self, raw: &str) -> String {
        let mut text = ECHOED_PROMPT.replace_all(raw, "").trim().to_string();

        if text.starts_with('{') && text.ends_with('}') {
            if let Some(inner) = unwrap_json(&text) {
                text = inner;
            }
        }

        for prefix in BOILERPLATE_PREFIXES {
            if let Some(rest) = text.strip_prefix(prefix) {
                text = rest.trim_start().to_string();
            }
        }

        let text = tag_code_fences(&text);
        BLANK_RUNS.replace_all(&text, "\n\n").trim().to_string()
    }
}

fn unwrap_json(text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    ["answer", "response", "content"]
        .iter()
        .find_map(|key| value.get(key)?.as_str().map(str::to_string))
}

/// Opening fences without a language become ```python
fn tag_code_fences(text: &str) -> String {
    let mut in_block = false;
    let mut out: Vec<String> = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim_start();
        if let Some(info) = trimmed.strip_prefix("```") {
            if !in_block && info.trim().is_empty() {
                let indent = &line[..line.len() - trimmed.len()];
                out.push(format!("{indent}```python"));
            } else {
                out.push(line.to_string());
            }
            in_block = !in_block;
        } else {
            out.push(line.to_string());
        }
    }
    out.join("\n")
}
