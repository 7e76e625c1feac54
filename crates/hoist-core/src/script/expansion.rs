//! Placeholder expansion for script text.
//!
//! The variable namespace is flattened into a replacement table keyed by
//! dotted paths to each scalar leaf; `%key%` tokens in command lines and
//! environment values are substituted against that table. Expansion runs
//! exactly twice, which resolves one level of indirection and deliberately
//! no more.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

/// Maximum rendered length of a replacement value in the diagnostic table.
const DIAGNOSTIC_VALUE_WIDTH: usize = 40;

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"%(\S*)%").expect("valid placeholder pattern"))
}

/// Flatten a variable namespace into dotted-path keys for each scalar leaf.
/// Objects recurse; arrays and nulls contribute no entries.
pub fn expand_variables(variables: &Map<String, Value>) -> HashMap<String, String> {
    let mut table = HashMap::new();
    for (key, value) in variables {
        flatten(key, value, &mut table);
    }
    table
}

fn flatten(prefix: &str, value: &Value, table: &mut HashMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                flatten(&format!("{prefix}.{key}"), nested, table);
            }
        }
        Value::String(text) => {
            table.insert(prefix.to_string(), text.clone());
        }
        Value::Number(number) => {
            table.insert(prefix.to_string(), number.to_string());
        }
        Value::Bool(flag) => {
            table.insert(prefix.to_string(), flag.to_string());
        }
        Value::Array(_) | Value::Null => {}
    }
}

/// One substitution pass: replace every `%key%` with its table value.
pub fn expand_strings(lines: &[String], replacements: &HashMap<String, String>) -> Vec<String> {
    lines
        .iter()
        .map(|line| expand_string(line, replacements))
        .collect()
}

/// Every `%key%` token in the line is substituted from the table in one
/// simultaneous sweep; values brought in by a replacement are not re-scanned
/// until the next pass. Unknown tokens stay verbatim for `find_unresolved`.
pub fn expand_string(line: &str, replacements: &HashMap<String, String>) -> String {
    placeholder_pattern()
        .replace_all(line, |caps: &regex::Captures<'_>| {
            replacements
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// First line still carrying a `%...%` token after expansion, if any.
pub fn find_unresolved(lines: &[String]) -> Option<&String> {
    lines
        .iter()
        .find(|line| placeholder_pattern().is_match(line))
}

/// Render the known replacements as a two-column diagnostic table, long
/// values truncated for display.
pub fn replacement_table(replacements: &HashMap<String, String>) -> String {
    let mut keys: Vec<&String> = replacements.keys().collect();
    keys.sort();

    let mut rows = vec![format!("{:<40} | Replacement", "Key")];
    for key in keys {
        let value = &replacements[key];
        let shown: String = if value.chars().count() > DIAGNOSTIC_VALUE_WIDTH {
            let truncated: String = value.chars().take(DIAGNOSTIC_VALUE_WIDTH).collect();
            format!("{truncated}…")
        } else {
            value.clone()
        };
        rows.push(format!("{key:<40} | {shown}"));
    }
    rows.join("\n")
}
