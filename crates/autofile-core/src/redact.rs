//! Strip credentials from provider error bodies before they reach logs or
//! user-facing messages.

use once_cell::sync::Lazy;
use regex::Regex;

static BEARER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)(bearer\s+)[^\s"',]+"#).expect("Invalid regex pattern"));

static INCORRECT_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(Incorrect API key provided:\s*)[^\s"'.]+"#).expect("Invalid regex pattern")
});

static SK_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bsk-(?:ant-)?[A-Za-z0-9_\-]+").expect("Invalid regex pattern"));

static JSON_KEY_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"("(?:api_key|apiKey|x-api-key)"\s*:\s*)"[^"]*""#).expect("Invalid regex pattern")
});

pub fn redact_secrets(input: &str) -> String {
    let s = BEARER.replace_all(input, "${1}[REDACTED]");
    let s = INCORRECT_KEY.replace_all(&s, "${1}[REDACTED]");
    let s = SK_TOKEN.replace_all(&s, "sk-[REDACTED]");
    let s = JSON_KEY_FIELD.replace_all(&s, "${1}\"[REDACTED]\"");
    s.into_owned()
}
