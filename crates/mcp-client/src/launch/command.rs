//! Shell-style splitting of a configured command line.
//!
//! Supports the quoting people actually paste into a "command" field:
//! single quotes (literal), double quotes (with `\"`, `\\`, `\$` and
//! `` \` `` escapes), and backslash escapes outside quotes. No expansion
//! of variables, globs or `~` is performed.
//!
//! On Windows a backslash is a path separator, so it is kept literally
//! everywhere except before a `"` inside double quotes.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandLineError {
    #[error("command is empty")]
    Empty,
    #[error("unterminated {0} quote")]
    UnterminatedQuote(char),
    #[error("trailing backslash")]
    TrailingEscape,
}

impl CommandLine {
    /// Split `command` and append `extra_args` verbatim.
    pub fn parse(command: &str, extra_args: &[String]) -> Result<Self, CommandLineError> {
        let mut words = split(command, !cfg!(windows))?;
        if words.is_empty() {
            return Err(CommandLineError::Empty);
        }
        let program = words.remove(0);
        if program.is_empty() {
            return Err(CommandLineError::Empty);
        }
        words.extend(extra_args.iter().cloned());
        Ok(Self { program, args: words })
    }
}

enum State {
    Between,
    Word,
    Single,
    Double,
}

fn split(input: &str, escapes: bool) -> Result<Vec<String>, CommandLineError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut state = State::Between;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        state = match state {
            State::Between | State::Word => match c {
                c if c.is_whitespace() => {
                    if matches!(state, State::Word) {
                        words.push(std::mem::take(&mut current));
                    }
                    State::Between
                }
                '\'' => State::Single,
                '"' => State::Double,
                '\\' if escapes => {
                    current.push(chars.next().ok_or(CommandLineError::TrailingEscape)?);
                    State::Word
                }
                c => {
                    current.push(c);
                    State::Word
                }
            },
            State::Single => match c {
                '\'' => State::Word,
                c => {
                    current.push(c);
                    State::Single
                }
            },
            State::Double => match c {
                '"' => State::Word,
                '\\' if escapes => {
                    let next = chars.next().ok_or(CommandLineError::UnterminatedQuote('"'))?;
                    if !matches!(next, '"' | '\\' | '$' | '`') {
                        current.push('\\');
                    }
                    current.push(next);
                    State::Double
                }
                '\\' if chars.clone().next() == Some('"') => {
                    current.push('"');
                    chars.next();
                    State::Double
                }
                c => {
                    current.push(c);
                    State::Double
                }
            },
        };
    }

    match state {
        State::Single => Err(CommandLineError::UnterminatedQuote('\'')),
        State::Double => Err(CommandLineError::UnterminatedQuote('"')),
        State::Word => {
            words.push(current);
            Ok(words)
        }
        State::Between => Ok(words),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> CommandLine {
        CommandLine::parse(s, &[]).unwrap()
    }

    #[test]
    fn plain_words() {
        let cl = parse("npx -y @modelcontextprotocol/server-filesystem /tmp");
        assert_eq!(cl.program, "npx");
        assert_eq!(cl.args, vec!["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]);
    }

    #[test]
    fn quoted_arguments() {
        let words = split(r#"node "/Users/me/My Servers/index.js" --name 'a b' x\ y"#, true).unwrap();
        assert_eq!(words[1..], ["/Users/me/My Servers/index.js", "--name", "a b", "x y"]);
    }

    #[test]
    fn double_quote_escapes() {
        let cl = parse(r#"echo "say \"hi\" \n""#);
        assert_eq!(cl.args, vec![r#"say "hi" \n"#]);
    }

    #[test]
    fn empty_quotes_make_an_empty_argument() {
        let cl = parse(r#"tool "" end"#);
        assert_eq!(cl.args, vec!["", "end"]);
    }

    #[test]
    fn extra_args_are_appended() {
        let cl = CommandLine::parse("uvx mcp-server-git", &["--repository".into(), "/src".into()]).unwrap();
        assert_eq!(cl.program, "uvx");
        assert_eq!(cl.args, vec!["mcp-server-git", "--repository", "/src"]);
    }

    #[test]
    fn rejects_empty_and_unterminated() {
        assert_eq!(CommandLine::parse("   ", &[]), Err(CommandLineError::Empty));
        assert_eq!(CommandLine::parse(r#""" x"#, &[]), Err(CommandLineError::Empty));
        assert_eq!(
            CommandLine::parse("node 'oops", &[]),
            Err(CommandLineError::UnterminatedQuote('\''))
        );
        assert_eq!(
            CommandLine::parse(r#"node "oops"#, &[]),
            Err(CommandLineError::UnterminatedQuote('"'))
        );
    }

    #[test]
    fn posix_trailing_backslash_is_rejected() {
        assert_eq!(split(r"node \", true), Err(CommandLineError::TrailingEscape));
    }

    #[test]
    fn windows_paths_keep_their_backslashes() {
        assert_eq!(
            split(r#"C:\tools\srv.exe --root "C:\Program Files\data" \\host\share"#, false).unwrap(),
            vec![r"C:\tools\srv.exe", "--root", r"C:\Program Files\data", r"\\host\share"]
        );
        assert_eq!(split(r#"tool "say \"hi\"" end\"#, false).unwrap(), vec!["tool", r#"say "hi""#, r"end\"]);
    }

    #[test]
    fn posix_mode_treats_backslash_as_escape() {
        assert_eq!(split(r"C:\tools\srv.exe", true).unwrap(), vec!["C:toolssrv.exe"]);
    }
}
