//! `${VAR}` and `${VAR:-default}` expansion for configuration values
//!
//! Expansion runs over the raw JSON tree before it is parsed into typed
//! configuration, so every error can name the dotted location of the
//! offending string.

use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("placeholder regex is valid")
});

/// Look up a variable in the process environment.
///
/// Values that are not valid unicode count as unset.
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Expand every placeholder in `input`.
///
/// `${VAR}` requires `VAR` to be set; an empty value is fine. `${VAR:-default}`
/// falls back to `default` only when `VAR` is unset. Substituted text is not
/// expanded again.
pub fn expand_str<F>(input: &str, location: &str, lookup: &F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut output = String::with_capacity(input.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(input) {
        let whole = caps.get(0).expect("capture group 0 always matches");
        let name = &caps[1];

        let value = match (lookup(name), caps.get(2)) {
            (Some(value), _) => value,
            (None, Some(default)) => default.as_str().to_string(),
            (None, None) => bail!(
                "environment variable `{}` is not set (referenced at {})",
                name,
                location
            ),
        };

        output.push_str(&input[last..whole.start()]);
        output.push_str(&value);
        last = whole.end();
    }

    output.push_str(&input[last..]);
    Ok(output)
}

/// Expand placeholders in every string inside `value`, in place.
///
/// Object keys are left alone.
pub fn expand_value<F>(value: &mut Value, location: &str, lookup: &F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        Value::String(s) => {
            if s.contains("${") {
                *s = expand_str(s, location, lookup)?;
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter_mut().enumerate() {
                expand_value(item, &format!("{}[{}]", location, i), lookup)?;
            }
        }
        Value::Object(map) => {
            for (key, item) in map.iter_mut() {
                let child = if location.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", location, key)
                };
                expand_value(item, &child, lookup)?;
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
    Ok(())
}
