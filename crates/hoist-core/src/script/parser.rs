//! Script line classifier.
//!
//! Every line of a script is either a literal shell command or an inline
//! callback invocation (`name(arg, arg)`). Classification happens once, up
//! front; the interpreter works on the parsed representation and never
//! re-parses a line.

use std::sync::OnceLock;

use regex::Regex;

/// One parsed script line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// A literal command line, run on the active shell.
    Command(String),
    /// An inline callback invocation; no shell command runs for this line.
    Callback { name: String, args: Vec<String> },
}

fn callback_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\((.*)\)$").expect("valid callback pattern")
    })
}

/// Classify one script line. A line is a callback invocation only when the
/// whole trimmed line has the `name(args)` shape.
pub fn classify(line: &str) -> Instruction {
    let trimmed = line.trim();
    if let Some(captures) = callback_pattern().captures(trimmed) {
        let name = captures[1].to_string();
        let args = parse_args(&captures[2]);
        return Instruction::Callback { name, args };
    }
    Instruction::Command(line.to_string())
}

/// Split a comma-separated argument list, trimming whitespace and stripping
/// one level of matching quotes.
fn parse_args(raw: &str) -> Vec<String> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    raw.split(',')
        .map(|arg| {
            let arg = arg.trim();
            let stripped = arg
                .strip_prefix('"')
                .and_then(|a| a.strip_suffix('"'))
                .or_else(|| arg.strip_prefix('\'').and_then(|a| a.strip_suffix('\'')));
            stripped.unwrap_or(arg).to_string()
        })
        .collect()
}
