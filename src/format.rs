//! IRC formatting control codes.

/// Ctrl+K, selects a colour from the palette
pub const COLOR: char = '\u{3}';
/// Ctrl+B, toggles bold
pub const BOLD: char = '\u{2}';
/// CTCP delimiter, wraps ACTION bodies
pub const CTCP: char = '\u{1}';

fn is_sentinel(c: char) -> bool {
    matches!(c, CTCP | BOLD | COLOR)
}

/// Remove every control code together with up to two digits following it, then trim.
pub fn strip_control_codes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if !is_sentinel(c) {
            out.push(c);
            continue;
        }
        for _ in 0..2 {
            match chars.peek() {
                Some(d) if d.is_ascii_digit() => {
                    chars.next();
                }
                _ => break,
            }
        }
    }

    out.trim().to_string()
}

/// Grey author name followed by a bold orange colon, as shown on IRC.
pub fn decorate_author(author: &str) -> String {
    format!(
        "{COLOR}14{author}{COLOR}{COLOR}7{BOLD}:{BOLD}{COLOR} ",
        COLOR = COLOR,
        BOLD = BOLD,
        author = author
    )
}

/// "a, b, c"
pub fn comma_list<S: AsRef<str>>(items: &[S]) -> String {
    items
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_removes_colour_with_digits() {
        assert_eq!(strip_control_codes("\u{3}14bob\u{3} said"), "bob said");
        assert_eq!(strip_control_codes("\u{3}4red"), "red");
    }

    #[test]
    fn test_strip_only_takes_two_digits() {
        assert_eq!(strip_control_codes("\u{3}1234"), "34");
    }

    #[test]
    fn test_strip_bold_and_ctcp() {
        assert_eq!(strip_control_codes("\u{2}loud\u{2}"), "loud");
        assert_eq!(strip_control_codes("\u{1}ACTION waves\u{1}"), "ACTION waves");
    }

    #[test]
    fn test_strip_trims_whitespace() {
        assert_eq!(strip_control_codes("  plain text \u{3}"), "plain text");
    }

    #[test]
    fn test_strip_is_idempotent() {
        let inputs = [
            "",
            "plain",
            "\u{3}\u{3}12x",
            "\u{3}14\u{2}Prev Episode \u{2}\u{3}15-- 2020-01-01",
            " \u{1}ACTION \u{3}9 dances\u{1} ",
            "99\u{3}999",
            "\u{2}\u{2}\u{3}",
        ];
        for input in inputs {
            let once = strip_control_codes(input);
            assert_eq!(strip_control_codes(&once), once, "input: {:?}", input);
        }
    }

    #[test]
    fn test_decorated_author_strips_back_to_name() {
        let decorated = decorate_author("alice");
        assert!(decorated.starts_with("\u{3}14alice"));
        assert_eq!(strip_control_codes(&decorated), "alice:");
    }

    #[test]
    fn test_comma_list() {
        assert_eq!(comma_list(&["a", "b", "c"]), "a, b, c");
        assert_eq!(comma_list::<&str>(&[]), "");
    }
}
