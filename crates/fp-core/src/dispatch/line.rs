//! Splitting an input line into command name and remainder.

/// A non-empty command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedLine<'a> {
    /// First whitespace-delimited token.
    pub name: &'a str,
    /// Everything after the name, leading whitespace included.
    pub remainder: &'a str,
}

/// Trim `line` and split it at the first whitespace character.
pub fn parse_line(line: &str) -> Option<ParsedLine<'_>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let split = line.find(char::is_whitespace).unwrap_or(line.len());
    let (name, remainder) = line.split_at(split);
    Some(ParsedLine { name, remainder })
}

/// Whether the line asks for help rather than an action.
pub fn wants_help(line: &str) -> bool {
    let line = line.trim();
    line.contains(" --help ") || line.contains(" -h ") || line.ends_with("-h") || line.ends_with("--help")
}

/// Names that end the session.
pub const QUIT_NAMES: &[&str] = &["quit", "exit", "stop"];

pub fn is_quit(name: &str) -> bool {
    QUIT_NAMES.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn remainder_keeps_leading_whitespace() {
        let parsed = parse_line("quit now").unwrap();
        assert_eq!(parsed.name, "quit");
        assert_eq!(parsed.remainder, " now");
    }

    #[test]
    fn surrounding_whitespace_is_trimmed() {
        let parsed = parse_line("   trace  mod func  \n").unwrap();
        assert_eq!(parsed.name, "trace");
        assert_eq!(parsed.remainder, "  mod func");
    }

    #[test]
    fn bare_name_has_empty_remainder() {
        assert_eq!(
            parse_line("stack"),
            Some(ParsedLine {
                name: "stack",
                remainder: ""
            })
        );
    }

    #[test]
    fn blank_lines_are_ignored() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line(" \t "), None);
    }

    #[test]
    fn tab_separates_name() {
        assert_eq!(parse_line("watch\tfoo").unwrap().name, "watch");
    }

    #[test]
    fn help_detection() {
        assert!(wants_help("trace -h"));
        assert!(wants_help("trace --help"));
        assert!(wants_help("trace -h mod func"));
        assert!(wants_help("trace mod --help func"));
        assert!(!wants_help("trace mod func"));
        assert!(!wants_help("watch -hx"));
    }

    #[test]
    fn quit_aliases() {
        assert!(is_quit("quit"));
        assert!(is_quit("exit"));
        assert!(is_quit("stop"));
        assert!(!is_quit("quit!"));
    }

    proptest! {
        #[test]
        fn name_never_contains_whitespace(line in "[a-z ]{0,20}") {
            if let Some(parsed) = parse_line(&line) {
                prop_assert!(!parsed.name.is_empty());
                prop_assert!(!parsed.name.contains(' '));
                prop_assert_eq!(format!("{}{}", parsed.name, parsed.remainder), line.trim());
            }
        }

        #[test]
        fn name_depends_only_on_first_token(name in "[a-z]{1,8}", rest in "( [a-z-]{1,6}){0,3}") {
            let with_rest = format!("{name}{rest}");
            prop_assert_eq!(parse_line(&with_rest).unwrap().name, name.as_str());
        }
    }
}
