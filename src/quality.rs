use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ChunkFailure;

static LEADING_FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^```[A-Za-z0-9_+\-]*[ \t]*(?:\r?\n)?").expect("leading fence regex"));
static TRAILING_FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\r?\n)?[ \t]*```$").expect("trailing fence regex"));

// Placeholders, URLs and markup that must survive translation untouched.
static PROTECTED_TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    let mustache = r"\{\{[^{}\r\n]{1,100}\}\}";
    let dollar = r"\$\{[^{}\r\n]{1,100}\}";
    let brace = r"\{[A-Za-z0-9_.:,\- ]{0,100}\}";
    let printf = r"%(?:\d+\$)?[sdif@]";
    let url = r#"https?://[^\s"'<>()]+"#;
    let tag = r"</?[A-Za-z][A-Za-z0-9]*(?:\s[^<>]*)?/?>";
    Regex::new(&format!("{mustache}|{dollar}|{brace}|{printf}|{url}|{tag}"))
        .expect("protected token regex")
});

/// Remove at most one leading and one trailing markdown fence from model output.
pub fn strip_code_fences(text: &str) -> &str {
    let mut s = text.trim();
    if let Some(m) = LEADING_FENCE_RE.find(s) {
        s = &s[m.end()..];
        if let Some(m) = TRAILING_FENCE_RE.find(s) {
            s = &s[..m.start()];
        }
    } else if let Some(m) = TRAILING_FENCE_RE.find(s) {
        s = &s[..m.start()];
    }
    s.trim()
}

/// Fence-strip then strictly parse a chunk response. Anything but a single JSON object is malformed.
pub fn decode_chunk_response(raw: &str) -> Result<Map<String, Value>, ChunkFailure> {
    let body = strip_code_fences(raw);
    if body.is_empty() {
        return Err(ChunkFailure::malformed("empty response"));
    }
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ChunkFailure::malformed(format!(
            "expected a JSON object, got {}",
            json_type_name(&other)
        ))),
        Err(e) => Err(ChunkFailure::malformed(format!("json_parse_failed: {e}"))),
    }
}

pub fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct KeyDiff {
    pub missing: Vec<String>,
    pub unexpected: Vec<String>,
}

impl KeyDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }

    #[must_use]
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if !self.missing.is_empty() {
            parts.push(format!("missing keys: {}", self.missing.join(", ")));
        }
        if !self.unexpected.is_empty() {
            parts.push(format!("unexpected keys: {}", self.unexpected.join(", ")));
        }
        parts.join("; ")
    }
}

/// Top-level key set comparison, in the order keys appear in each map.
pub fn compare_key_sets(expected: &Map<String, Value>, actual: &Map<String, Value>) -> KeyDiff {
    KeyDiff {
        missing: expected
            .keys()
            .filter(|k| !actual.contains_key(*k))
            .cloned()
            .collect(),
        unexpected: actual
            .keys()
            .filter(|k| !expected.contains_key(*k))
            .cloned()
            .collect(),
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QualityIssue {
    /// Dotted path of the string leaf, e.g. `menu.items[2]`.
    pub path: String,
    pub missing_tokens: Vec<String>,
}

pub fn protected_tokens(text: &str) -> Vec<String> {
    PROTECTED_TOKEN_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Report string leaves whose placeholders, URLs or tags did not survive translation.
pub fn check_placeholders(source: &Map<String, Value>, translated: &Map<String, Value>) -> Vec<QualityIssue> {
    let mut issues = Vec::new();
    for (key, src) in source {
        if let Some(tgt) = translated.get(key) {
            walk(key.clone(), src, tgt, &mut issues);
        }
    }
    issues
}

fn walk(path: String, src: &Value, tgt: &Value, issues: &mut Vec<QualityIssue>) {
    match (src, tgt) {
        (Value::String(s), Value::String(t)) => {
            let missing = missing_tokens(s, t);
            if !missing.is_empty() {
                issues.push(QualityIssue {
                    path,
                    missing_tokens: missing,
                });
            }
        }
        (Value::Object(s), Value::Object(t)) => {
            for (k, sv) in s {
                if let Some(tv) = t.get(k) {
                    walk(format!("{path}.{k}"), sv, tv, issues);
                }
            }
        }
        (Value::Array(s), Value::Array(t)) => {
            for (i, (sv, tv)) in s.iter().zip(t.iter()).enumerate() {
                walk(format!("{path}[{i}]"), sv, tv, issues);
            }
        }
        _ => {}
    }
}

fn missing_tokens(source: &str, translated: &str) -> Vec<String> {
    let mut available: HashMap<String, usize> = HashMap::new();
    for tok in protected_tokens(translated) {
        *available.entry(tok).or_default() += 1;
    }
    let mut missing = Vec::new();
    for tok in protected_tokens(source) {
        match available.get_mut(&tok) {
            Some(n) if *n > 0 => *n -= 1,
            _ => missing.push(tok),
        }
    }
    missing
}
