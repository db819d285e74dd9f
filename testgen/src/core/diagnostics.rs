//! Parsing of type-checker output into structured diagnostics.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

// `src/a.ts(12,5): error TS2322: Type 'string' is not assignable ...`
static PLAIN_DIAGNOSTIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?P<file>.+?)\((?P<line>\d+),(?P<column>\d+)\): ",
        r"error (?P<code>TS\d+): (?P<message>.+)$",
    ))
    .expect("plain diagnostic regex should compile")
});

// `src/a.ts:12:5 - error TS2322: Type 'string' is not assignable ...`
static PRETTY_DIAGNOSTIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?P<file>.+?):(?P<line>\d+):(?P<column>\d+) - ",
        r"error (?P<code>TS\d+): (?P<message>.+)$",
    ))
    .expect("pretty diagnostic regex should compile")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub code: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{} {} {}",
            self.file, self.line, self.column, self.code, self.message
        )
    }
}

/// Extract every recognizable diagnostic line from `output`, in order.
pub fn parse_tsc_output(output: &str) -> Vec<Diagnostic> {
    output
        .lines()
        .filter_map(|line| {
            let line = strip_ansi(line.trim_end());
            let caps = PLAIN_DIAGNOSTIC
                .captures(&line)
                .or_else(|| PRETTY_DIAGNOSTIC.captures(&line))?;
            Some(Diagnostic {
                file: caps["file"].trim().to_string(),
                line: caps["line"].parse().ok()?,
                column: caps["column"].parse().ok()?,
                code: caps["code"].to_string(),
                message: caps["message"].trim().to_string(),
            })
        })
        .collect()
}

fn strip_ansi(line: &str) -> String {
    static ANSI: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*m").expect("ansi regex should compile"));
    ANSI.replace_all(line, "").into_owned()
}

/// Keep at most `limit` bytes of `text`, cut on a char boundary.
pub fn truncate_feedback(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}\n[truncated {} bytes]\n",
        &text[..cut],
        text.len() - cut
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_pretty_formats() {
        let output = "\
src/button.test.tsx(3,10): error TS2305: Module './button' has no exported member 'Buton'.
\x1b[96msrc/util.test.ts\x1b[0m:7:1 - error TS2304: Cannot find name 'describe'.
Found 2 errors.
";
        let diagnostics = parse_tsc_output(output);
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].file, "src/button.test.tsx");
        assert_eq!(diagnostics[0].line, 3);
        assert_eq!(diagnostics[0].column, 10);
        assert_eq!(diagnostics[0].code, "TS2305");
        assert_eq!(diagnostics[1].file, "src/util.test.ts");
        assert_eq!(diagnostics[1].message, "Cannot find name 'describe'.");
    }

    #[test]
    fn ignores_unrelated_lines() {
        assert!(parse_tsc_output("npm WARN something\n\n").is_empty());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "héllo wörld";
        let cut = truncate_feedback(text, 2);
        assert!(cut.starts_with('h'));
        assert!(cut.contains("[truncated"));
        assert_eq!(truncate_feedback("short", 100), "short");
    }
}
