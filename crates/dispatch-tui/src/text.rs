use unicode_width::UnicodeWidthStr;

/// Removes ANSI escape sequences so width measurement and plain-text
/// rendering see only printable characters.
pub fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_escape = false;
    for c in s.chars() {
        if in_escape {
            if c.is_ascii_alphabetic() {
                in_escape = false;
            }
        } else if c == '\u{1b}' {
            in_escape = true;
        } else {
            out.push(c);
        }
    }
    out
}

/// Display width in terminal cells, ignoring ANSI escapes.
pub fn display_width(s: &str) -> usize {
    strip_ansi(s).width()
}

/// Truncates to at most `width` cells, appending `...` when something was
/// cut.
pub fn truncate(s: &str, width: usize) -> String {
    if display_width(s) <= width {
        return s.to_string();
    }
    let budget = width.saturating_sub(3);
    let mut out = String::new();
    let mut used = 0;
    for c in s.chars() {
        let w = unicode_width::UnicodeWidthChar::width(c).unwrap_or(0);
        if used + w > budget {
            break;
        }
        used += w;
        out.push(c);
    }
    out.push_str("...");
    out
}

/// Left-aligns within `width` cells, truncating if needed.
pub fn left(s: &str, width: usize) -> String {
    let s = truncate(s, width);
    let padding = width.saturating_sub(display_width(&s));
    format!("{s}{}", " ".repeat(padding))
}

/// Right-aligns within `width` cells, truncating if needed.
pub fn right(s: &str, width: usize) -> String {
    let s = truncate(s, width);
    let padding = width.saturating_sub(display_width(&s));
    format!("{}{s}", " ".repeat(padding))
}

/// Short human form of a duration, already truncated to milliseconds by the
/// model.
pub fn format_duration(duration: std::time::Duration) -> String {
    format!("{duration:?}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_ansi_before_measuring() {
        let colored = "\u{1b}[32mgreen\u{1b}[0m";
        assert_eq!(strip_ansi(colored), "green");
        assert_eq!(display_width(colored), 5);
    }

    #[test]
    fn pads_and_truncates() {
        assert_eq!(left("ab", 4), "ab  ");
        assert_eq!(right("ab", 4), "  ab");
        assert_eq!(truncate("abcdefgh", 6), "abc...");
        assert_eq!(left("abcdefgh", 6), "abc...");
    }
}
