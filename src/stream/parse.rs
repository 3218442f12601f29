// src/stream/parse.rs

//! Line classification for task files.

/// Prefix that turns a comment line into a control directive.
pub const DIRECTIVE_PREFIX: &str = "#SQ_OP";

/// Control directive embedded in the task stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Barrier: wait until every task dispatched so far has been released.
    Drain,
    /// Anything else after the prefix; logged and skipped.
    Unrecognized(String),
}

/// What a single (trimmed) task-file line means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    Command(String),
    Directive(Directive),
}

/// Classify one raw line.
///
/// Returns `None` for blank lines and ordinary `#` comments; those do not
/// consume a task index.
pub fn classify_line(raw: &str) -> Option<LineKind> {
    let line = raw.trim();
    if line.is_empty() {
        return None;
    }

    if line.starts_with(DIRECTIVE_PREFIX) {
        return Some(LineKind::Directive(parse_directive(line)));
    }

    if line.starts_with('#') {
        return None;
    }

    Some(LineKind::Command(line.to_string()))
}

fn parse_directive(line: &str) -> Directive {
    let words: Vec<&str> = line.split_whitespace().collect();
    match words.as_slice() {
        [prefix, op] if *prefix == DIRECTIVE_PREFIX && op.eq_ignore_ascii_case("DRAIN") => {
            Directive::Drain
        }
        _ => Directive::Unrecognized(line.to_string()),
    }
}

/// Remove one layer of matching surrounding quotes, if present.
///
/// Returns `None` when the command is not quoted.
pub fn strip_quotes(command: &str) -> Option<&str> {
    let first = command.chars().next()?;
    if first != '\'' && first != '"' {
        return None;
    }
    if command.len() < 2 || !command.ends_with(first) {
        return None;
    }
    Some(&command[1..command.len() - 1])
}
