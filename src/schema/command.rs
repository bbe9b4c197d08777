use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("unknown timeline verb '{0}'")]
    UnknownVerb(String),
    #[error("'{verb}' expects {expected}, got '{tail}'")]
    MissingArguments {
        verb: &'static str,
        expected: &'static str,
        tail: String,
    },
}

/// A single timeline command: a verb plus its argument tail.
///
/// Expressions are kept as source text and only parsed when the command
/// runs, so an expression failure is an evaluation error (treated as
/// false by branches) rather than a malformed command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Comment,
    Assign {
        target: String,
        attr: String,
        expr: String,
    },
    Invoke {
        target: String,
        method: String,
        args: Vec<String>,
    },
    ShowDialog {
        portrait: Option<String>,
        text: String,
    },
    ChangeMusic(String),
    /// An empty name switches to an empty, unnamed timeline.
    SwitchTimeline(String),
    SkipTo(String),
    SetSkipTarget(String),
    RawExec(String),
    BranchIf(String),
    BranchIfWatched,
    BranchIfNotWatched,
    LoopWhile(String),
}

impl Command {
    /// Parse one command line of a timeline queue.
    pub fn parse(line: &str) -> Result<Command, CommandError> {
        let line = line.trim();
        let (verb, tail) = match line.split_once(char::is_whitespace) {
            Some((verb, tail)) => (verb, tail.trim()),
            None => (line, ""),
        };

        if verb.is_empty() || verb.starts_with('#') {
            return Ok(Command::Comment);
        }

        let keyword = verb.replace('-', "_");
        match keyword.as_str() {
            "comment" => Ok(Command::Comment),
            "assign" | "setattr" => {
                let parsed = split_head(tail)
                    .and_then(|(target, rest)| split_head(rest).map(|(attr, expr)| (target, attr, expr)));
                match parsed {
                    Some((target, attr, expr)) => Ok(Command::Assign {
                        target: target.to_string(),
                        attr: attr.to_string(),
                        expr: expr.to_string(),
                    }),
                    None => Err(missing("assign", "<target> <attr> <expr>", tail)),
                }
            }
            "invoke" | "call" => {
                let mut parts = tail.split_whitespace();
                match (parts.next(), parts.next()) {
                    (Some(target), Some(method)) => Ok(Command::Invoke {
                        target: target.to_string(),
                        method: method.to_string(),
                        args: parts.map(str::to_string).collect(),
                    }),
                    _ => Err(missing("invoke", "<target> <method> [args...]", tail)),
                }
            }
            "show_dialog" | "dialog" => parse_dialog(tail),
            "change_music" | "play_music" | "music" => {
                require(tail, "change-music", "<track>").map(Command::ChangeMusic)
            }
            "switch_timeline" | "timeline" => Ok(Command::SwitchTimeline(tail.to_string())),
            "skip_to" => require(tail, "skip-to", "<step>").map(Command::SkipTo),
            "set_skip_target" | "skip_target" => {
                require(tail, "set-skip-target", "<step>").map(Command::SetSkipTarget)
            }
            "raw_exec" | "exec" => require(tail, "raw-exec", "<statements>").map(Command::RawExec),
            "branch_if" | "if" => require(tail, "branch-if", "<condition>").map(Command::BranchIf),
            "branch_if_watched" | "if_watched" => Ok(Command::BranchIfWatched),
            "branch_if_not_watched" | "if_not_watched" => Ok(Command::BranchIfNotWatched),
            "loop_while" | "while" => {
                require(tail, "loop-while", "<condition>").map(Command::LoopWhile)
            }
            _ => Err(CommandError::UnknownVerb(verb.to_string())),
        }
    }

    /// Canonical verb name, for logs.
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Comment => "comment",
            Self::Assign { .. } => "assign",
            Self::Invoke { .. } => "invoke",
            Self::ShowDialog { .. } => "show-dialog",
            Self::ChangeMusic(_) => "change-music",
            Self::SwitchTimeline(_) => "switch-timeline",
            Self::SkipTo(_) => "skip-to",
            Self::SetSkipTarget(_) => "set-skip-target",
            Self::RawExec(_) => "raw-exec",
            Self::BranchIf(_) => "branch-if",
            Self::BranchIfWatched => "branch-if-watched",
            Self::BranchIfNotWatched => "branch-if-not-watched",
            Self::LoopWhile(_) => "loop-while",
        }
    }
}

fn missing(verb: &'static str, expected: &'static str, tail: &str) -> CommandError {
    CommandError::MissingArguments {
        verb,
        expected,
        tail: tail.to_string(),
    }
}

/// Split off the first word; `None` unless both halves are non-empty.
fn split_head(s: &str) -> Option<(&str, &str)> {
    let (head, rest) = s.trim_start().split_once(char::is_whitespace)?;
    let rest = rest.trim();
    if rest.is_empty() {
        None
    } else {
        Some((head, rest))
    }
}

fn require(tail: &str, verb: &'static str, expected: &'static str) -> Result<String, CommandError> {
    if tail.is_empty() {
        Err(missing(verb, expected, tail))
    } else {
        Ok(tail.to_string())
    }
}

// A quoted tail is all text. Otherwise a leading word followed by more text
// names the speaker portrait.
fn parse_dialog(tail: &str) -> Result<Command, CommandError> {
    if tail.is_empty() {
        return Err(missing("show-dialog", "[portrait] <text>", tail));
    }
    if let Some(text) = unquote(tail) {
        return Ok(Command::ShowDialog {
            portrait: None,
            text: text.to_string(),
        });
    }
    match tail.split_once(char::is_whitespace) {
        Some((portrait, text)) => {
            let text = text.trim();
            Ok(Command::ShowDialog {
                portrait: Some(portrait.to_string()),
                text: unquote(text).unwrap_or(text).to_string(),
            })
        }
        None => Ok(Command::ShowDialog {
            portrait: None,
            text: tail.to_string(),
        }),
    }
}

fn unquote(s: &str) -> Option<&str> {
    for quote in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return Some(&s[1..s.len() - 1]);
        }
    }
    None
}
