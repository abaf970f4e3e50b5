//! Source normalization for content hashing
//!
//! Comments are dropped and whitespace is collapsed so that formatting-only
//! edits hash identically. String literals are kept byte for byte.

use sha2::{Digest, Sha256};

/// Normalize Python source text.
///
/// Outside string literals, a whitespace run (newlines and `\` continuations
/// included) becomes a single space when it separates two word characters
/// and disappears otherwise.
pub fn normalize_source(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut pending_space = false;

    while let Some(c) = chars.next() {
        match c {
            '#' => {
                while let Some(&next) = chars.peek() {
                    if next == '\n' {
                        break;
                    }
                    chars.next();
                }
                pending_space = true;
            }
            '\\' if matches!(chars.peek(), Some('\n') | Some('\r')) => {
                pending_space = true;
            }
            c if c.is_whitespace() => {
                pending_space = true;
            }
            '\'' | '"' => {
                flush_space(&mut out, &mut pending_space, c);
                copy_string(c, &mut chars, &mut out);
            }
            c => {
                flush_space(&mut out, &mut pending_space, c);
                out.push(c);
            }
        }
    }

    out
}

/// SHA-256 hex digest of the normalized source
pub fn content_hash(source: &str) -> String {
    hash_normalized(&normalize_source(source))
}

/// SHA-256 hex digest of text that is already normalized
pub fn hash_normalized(normalized: &str) -> String {
    format!("{:x}", Sha256::digest(normalized.as_bytes()))
}

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn flush_space(out: &mut String, pending: &mut bool, next: char) {
    if *pending && is_word(next) && out.chars().last().is_some_and(is_word) {
        out.push(' ');
    }
    *pending = false;
}

/// Copy a string literal verbatim, starting after its opening quote
fn copy_string<I>(quote: char, chars: &mut std::iter::Peekable<I>, out: &mut String)
where
    I: Iterator<Item = char> + Clone,
{
    out.push(quote);

    let mut lookahead = chars.clone();
    let triple = lookahead.next() == Some(quote) && lookahead.next() == Some(quote);
    if triple {
        chars.next();
        chars.next();
        out.push(quote);
        out.push(quote);
    } else if chars.peek() == Some(&quote) {
        // empty string
        chars.next();
        out.push(quote);
        return;
    }

    let mut run = 0;
    while let Some(c) = chars.next() {
        out.push(c);
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
            run = 0;
            continue;
        }
        if c == quote {
            run += 1;
            if !triple || run == 3 {
                return;
            }
        } else {
            run = 0;
            // unterminated single-line string
            if !triple && c == '\n' {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formatting_differences_normalize_equal() {
        let a = "def add(a, b):\n    return a + b\n";
        let b = "def add(a,b):   # sum two values\n\n\treturn a+b";
        assert_eq!(normalize_source(a), normalize_source(b));
        assert_eq!(content_hash(a), content_hash(b));
    }

    #[test]
    fn test_word_boundaries_kept() {
        assert_eq!(
            normalize_source("return   not  x"),
            "return not x".to_string()
        );
        assert_eq!(normalize_source("  x = ( 1 , 2 )  "), "x=(1,2)");
    }

    #[test]
    fn test_strings_kept_verbatim() {
        let src = "x = 'a  # not a comment'  # comment";
        assert_eq!(normalize_source(src), "x='a  # not a comment'");
    }

    #[test]
    fn test_triple_quoted_strings() {
        let src = "def f():\n    \"\"\"Doc  with\n   spacing \"quoted\" \"\"\"\n    return 1";
        let normalized = normalize_source(src);
        assert!(normalized.contains("\"\"\"Doc  with\n   spacing \"quoted\" \"\"\""));
        assert!(normalized.ends_with("return 1"));
    }

    #[test]
    fn test_escaped_quotes() {
        let src = r#"s = "say \"hi\"  "   + t"#;
        assert_eq!(normalize_source(src), r#"s="say \"hi\"  "+t"#);
    }

    #[test]
    fn test_line_continuation() {
        assert_eq!(
            normalize_source("total = a + \\\n    b"),
            normalize_source("total = a + b")
        );
    }

    #[test]
    fn test_empty_string_literal() {
        assert_eq!(normalize_source("x = ''  "), "x=''");
    }

    #[test]
    fn test_hash_is_hex_sha256() {
        let hash = content_hash("pass");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_different_code_hashes_differ() {
        assert_ne!(content_hash("return a + b"), content_hash("return a - b"));
    }
}
