/// One line typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Quit,
    Clear,
    Users,
    /// A `/`-prefixed word that is not a known command.
    Unknown(String),
    Message(String),
    Empty,
}

impl Input {
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\n', '\r']);

        if line.starts_with('/') {
            let command = line.trim().to_lowercase();
            return match command.as_str() {
                "/quit" | "/exit" => Input::Quit,
                "/clear" => Input::Clear,
                "/users" => Input::Users,
                _ => Input::Unknown(command),
            };
        }

        if line.trim().is_empty() {
            Input::Empty
        } else {
            Input::Message(line.to_string())
        }
    }
}

pub const HELP: &[(&str, &str)] = &[
    ("/clear", "Clear screen"),
    ("/users", "Show connected users"),
    ("/quit", "Exit chat"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_commands_case_insensitively() {
        assert_eq!(Input::parse("/quit"), Input::Quit);
        assert_eq!(Input::parse("/EXIT\n"), Input::Quit);
        assert_eq!(Input::parse("/Users  "), Input::Users);
        assert_eq!(Input::parse("/clear"), Input::Clear);
        assert_eq!(Input::parse("/nick bob"), Input::Unknown("/nick bob".into()));
    }

    #[test]
    fn blank_lines_are_empty_and_text_is_kept_verbatim() {
        assert_eq!(Input::parse("   \n"), Input::Empty);
        assert_eq!(
            Input::parse("  hello there \n"),
            Input::Message("  hello there ".into())
        );
    }
}
