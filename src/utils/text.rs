/// Replacement for runs of line breaks in single-line output.
pub const LINE_BREAK_SEPARATOR: &str = "|";

/// Replace every run of `\r` / `\n` characters with `separator`.
pub fn collapse_line_breaks(s: &str, separator: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_break = false;

    for c in s.chars() {
        if c == '\r' || c == '\n' {
            if !in_break {
                out.push_str(separator);
                in_break = true;
            }
        } else {
            out.push(c);
            in_break = false;
        }
    }

    out
}

/// Trim, then collapse internal line breaks, so one value always fits on one line.
pub fn single_line(s: &str) -> String {
    collapse_line_breaks(s.trim(), LINE_BREAK_SEPARATOR)
}

/// First non-empty line of `s`, trimmed.
pub fn first_line(s: &str) -> &str {
    s.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
}
