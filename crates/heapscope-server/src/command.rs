use std::str::FromStr;

use heapscope_sweep::{OpenMode, PathId};
use thiserror::Error;

/// One request line from a viewer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// `SEARCH <pattern>`; an empty pattern lists every root.
    Search { pattern: String },
    /// `OPEN <pathId> [open|class|path]`
    Open { id: PathId, mode: OpenMode },
    /// `WRITE <pathId> <field> <literal>`; the literal is the rest of the line.
    Write {
        id: PathId,
        field: String,
        literal: String,
    },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command {0:?}")]
    UnknownVerb(String),
    #[error("{verb} requires {argument}")]
    MissingArgument {
        verb: &'static str,
        argument: &'static str,
    },
    #[error("invalid path id {0:?}")]
    BadPathId(String),
    #[error("{0}")]
    BadMode(String),
    #[error("unexpected input after {verb}: {rest:?}")]
    TrailingInput { verb: &'static str, rest: String },
}

/// Split off the first whitespace-delimited word.
fn next_word(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start();
    if input.is_empty() {
        return None;
    }
    match input.find(char::is_whitespace) {
        Some(end) => Some((&input[..end], input[end..].trim_start())),
        None => Some((input, "")),
    }
}

fn path_id(word: &str) -> Result<PathId, CommandError> {
    word.parse()
        .map_err(|_| CommandError::BadPathId(word.to_owned()))
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, rest) = next_word(line).ok_or(CommandError::Empty)?;
        match verb.to_ascii_uppercase().as_str() {
            "SEARCH" => Ok(Command::Search {
                pattern: rest.to_owned(),
            }),
            "OPEN" => {
                let (id, rest) = next_word(rest).ok_or(CommandError::MissingArgument {
                    verb: "OPEN",
                    argument: "a path id",
                })?;
                let id = path_id(id)?;
                let mode = match next_word(rest) {
                    None => OpenMode::Open,
                    Some((mode, tail)) => {
                        if !tail.is_empty() {
                            return Err(CommandError::TrailingInput {
                                verb: "OPEN",
                                rest: tail.to_owned(),
                            });
                        }
                        mode.parse().map_err(CommandError::BadMode)?
                    }
                };
                Ok(Command::Open { id, mode })
            }
            "WRITE" => {
                let missing = |argument| CommandError::MissingArgument {
                    verb: "WRITE",
                    argument,
                };
                let (id, rest) = next_word(rest).ok_or_else(|| missing("a path id"))?;
                let id = path_id(id)?;
                let (field, literal) = next_word(rest).ok_or_else(|| missing("a field name"))?;
                if literal.is_empty() {
                    return Err(missing("a literal"));
                }
                Ok(Command::Write {
                    id,
                    field: field.to_owned(),
                    literal: literal.to_owned(),
                })
            }
            _ => Err(CommandError::UnknownVerb(verb.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn id(raw: u32) -> PathId {
        PathId::new(raw).unwrap()
    }

    #[test]
    fn verbs_are_case_insensitive() {
        assert_eq!(
            "search Widget".parse::<Command>().unwrap(),
            Command::Search {
                pattern: "Widget".into()
            }
        );
        assert_eq!(
            "Open 4 CLASS".parse::<Command>().unwrap(),
            Command::Open {
                id: id(4),
                mode: OpenMode::Class
            }
        );
        assert_eq!(
            "OPEN #4".parse::<Command>().unwrap(),
            Command::Open {
                id: id(4),
                mode: OpenMode::Open
            }
        );
    }

    #[test]
    fn write_keeps_the_rest_of_the_line() {
        assert_eq!(
            "WRITE 7 title \"hello  world\"\r\n".parse::<Command>().unwrap(),
            Command::Write {
                id: id(7),
                field: "title".into(),
                literal: "\"hello  world\"".into()
            }
        );
    }

    #[test]
    fn malformed_lines_are_rejected() {
        assert_eq!("".parse::<Command>(), Err(CommandError::Empty));
        assert_eq!(
            "FETCH 1".parse::<Command>(),
            Err(CommandError::UnknownVerb("FETCH".into()))
        );
        assert_eq!(
            "OPEN zero".parse::<Command>(),
            Err(CommandError::BadPathId("zero".into()))
        );
        assert!(matches!(
            "OPEN 1 sideways".parse::<Command>(),
            Err(CommandError::BadMode(_))
        ));
        assert!(matches!(
            "OPEN 1 open now".parse::<Command>(),
            Err(CommandError::TrailingInput { .. })
        ));
        assert!(matches!(
            "WRITE 1 score".parse::<Command>(),
            Err(CommandError::MissingArgument {
                argument: "a literal",
                ..
            })
        ));
        assert!(matches!(
            "WRITE".parse::<Command>(),
            Err(CommandError::MissingArgument { .. })
        ));
    }
}
