use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;

pub const REDACTED: &str = "[REDACTED]";
pub const MAX_DEPTH_MARKER: &str = "[MAX_DEPTH_REACHED]";
const TRUNCATED_SUFFIX: &str = "...[TRUNCATED]";
const TEXT_TRUNCATED_SUFFIX: &str = " [TRUNCATED]";

fn default_sensitive_keys() -> Vec<String> {
    [
        "password",
        "passwd",
        "passphrase",
        "api_key",
        "token",
        "secret",
        "authorization",
        "cookie",
        "credential",
        "csrf",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_depth() -> usize {
    10
}
fn default_max_string_len() -> usize {
    1000
}
fn default_max_error_len() -> usize {
    500
}

/// Which keys count as sensitive and how large sanitized output may grow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizationPolicy {
    /// Key fragments matched case-insensitively, ignoring `-` and `_`.
    #[serde(default = "default_sensitive_keys")]
    pub sensitive_keys: Vec<String>,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_max_string_len")]
    pub max_string_len: usize,
    /// Limit for free-form error text (upstream bodies, transport errors).
    #[serde(default = "default_max_error_len")]
    pub max_error_len: usize,
}

impl Default for SanitizationPolicy {
    fn default() -> Self {
        Self {
            sensitive_keys: default_sensitive_keys(),
            max_depth: default_max_depth(),
            max_string_len: default_max_string_len(),
            max_error_len: default_max_error_len(),
        }
    }
}

/// Redacts sensitive values and bounds the size of anything headed for a log
/// or an error surface.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    fragments: Vec<String>,
    max_depth: usize,
    max_string_len: usize,
    max_error_len: usize,
}

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl Sanitizer {
    pub fn new(policy: &SanitizationPolicy) -> Self {
        let fragments = policy
            .sensitive_keys
            .iter()
            .map(|k| normalize_key(k))
            .filter(|k| !k.is_empty())
            .collect();
        Self {
            fragments,
            max_depth: policy.max_depth,
            max_string_len: policy.max_string_len,
            max_error_len: policy.max_error_len,
        }
    }

    pub fn is_sensitive_key(&self, key: &str) -> bool {
        let normalized = normalize_key(key);
        self.fragments.iter().any(|f| normalized.contains(f.as_str()))
    }

    /// Recursively redact a JSON value. Idempotent.
    pub fn redact(&self, value: &Value) -> Value {
        self.walk(value, 0)
    }

    fn walk(&self, value: &Value, depth: usize) -> Value {
        if depth > self.max_depth {
            return Value::String(MAX_DEPTH_MARKER.to_string());
        }
        match value {
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, inner) in map {
                    let cleaned = if self.is_sensitive_key(key) {
                        Value::String(REDACTED.to_string())
                    } else {
                        self.walk(inner, depth + 1)
                    };
                    out.insert(key.clone(), cleaned);
                }
                Value::Object(out)
            }
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.walk(v, depth + 1)).collect())
            }
            Value::String(s) => Value::String(truncate_exact(s, self.max_string_len)),
            other => other.clone(),
        }
    }

    /// Redact credentials embedded in free-form text and bound its length.
    pub fn redact_text(&self, text: &str) -> String {
        let redacted = redact_patterns(text);
        if redacted.chars().count() <= self.max_error_len {
            return redacted;
        }
        truncate_text(&redacted, self.max_error_len)
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new(&SanitizationPolicy::default())
    }
}

// Result is exactly `max` chars, so a second pass leaves it untouched.
fn truncate_exact(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let suffix_len = TRUNCATED_SUFFIX.chars().count();
    if max <= suffix_len {
        return s.chars().take(max).collect();
    }
    let mut out: String = s.chars().take(max - suffix_len).collect();
    out.push_str(TRUNCATED_SUFFIX);
    out
}

// Never cuts through a redaction marker, otherwise the stub would look like a
// fresh value to the next pass.
fn truncate_text(s: &str, max: usize) -> String {
    let suffix_len = TEXT_TRUNCATED_SUFFIX.chars().count();
    let keep = max.saturating_sub(suffix_len);
    let mut cut = s
        .char_indices()
        .nth(keep)
        .map(|(idx, _)| idx)
        .unwrap_or(s.len());
    for (start, _) in s.match_indices(REDACTED) {
        let end = start + REDACTED.len();
        if start < cut && cut < end {
            cut = start;
        }
    }
    let mut out = s[..cut].to_string();
    out.push_str(TEXT_TRUNCATED_SUFFIX);
    out
}

// Only values made entirely of whole markers count as already redacted.
fn is_marker(value: &str) -> bool {
    let mut words = value.split_whitespace().peekable();
    words.peek().is_some() && words.all(|w| w == REDACTED || w == "[TRUNCATED]")
}

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(x-api-key|set-cookie|cookie|authorization|x-csrf-token)(\s*:\s*)([^\r\n,]+)")
            .expect("static header pattern")
    })
}

fn scheme_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(bearer|basic)(\s+)[A-Za-z0-9\-._~+/]+=*").expect("static scheme pattern")
    })
}

fn pair_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?i)([a-z0-9_\-]*(?:password|passwd|passphrase|api[_\-]?key|token|secret|credential)[a-z0-9_\-]*)(\s*[=:]\s*)([^\s&,;"']+)"#,
        )
        .expect("static pair pattern")
    })
}

fn redact_patterns(text: &str) -> String {
    let replace_value = |caps: &Captures| {
        if is_marker(&caps[3]) {
            caps[0].to_string()
        } else {
            format!("{}{}{}", &caps[1], &caps[2], REDACTED)
        }
    };
    let step = header_re().replace_all(text, replace_value);
    let step = scheme_re().replace_all(&step, |caps: &Captures| {
        format!("{}{}{}", &caps[1], &caps[2], REDACTED)
    });
    pair_re().replace_all(&step, replace_value).into_owned()
}
