/// Slash-command parsing for PR comments
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Prefix marking commands that only internal pathways may dispatch.
pub const BUILTIN_PREFIX: &str = "__";

/// Alternate spellings accepted from users, mapped to their canonical name.
const ALIASES: &[(&str, &str)] = &[("ready", "merge"), ("cherrypick", "cherry-pick")];

/// Map an alias onto its canonical command name.
pub fn canonical_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == lowered)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(lowered)
}

/// A single `/command arg...` invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubCommand {
    pub command: String,
    pub args: Vec<String>,
}

impl SubCommand {
    pub fn new(command: impl AsRef<str>, args: Vec<String>) -> Self {
        Self {
            command: canonical_name(command.as_ref()),
            args,
        }
    }

    pub fn is_builtin(&self) -> bool {
        self.command.starts_with(BUILTIN_PREFIX)
    }
}

impl fmt::Display for SubCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.command)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// The shape of a command-bearing comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParsedCommand {
    /// Exactly one command line.
    Single(SubCommand),
    /// Two or more command lines, in textual order.
    Multi(Vec<SubCommand>),
    /// A single `__`-prefixed command.
    BuiltIn(SubCommand),
}

impl ParsedCommand {
    /// All sub-commands in textual order.
    pub fn commands(&self) -> Vec<SubCommand> {
        match self {
            Self::Single(cmd) | Self::BuiltIn(cmd) => vec![cmd.clone()],
            Self::Multi(cmds) => cmds.clone(),
        }
    }

    /// Render back into a comment body, one command per line.
    pub fn render(&self) -> String {
        self.commands()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty body")]
    EmptyBody,
    #[error("not a command")]
    NotACommand,
}

/// Parse a comment body into commands.
///
/// The body is a command only if its first non-whitespace character is `/`.
/// Every line whose trimmed form starts with `/` contributes one sub-command:
/// the first whitespace-separated token after the slash is the command name
/// (lowercased, aliases resolved) and the remaining tokens on that line are its
/// arguments. Other lines are ignored. A bare `/` line carries no command.
pub fn parse_comment(body: &str) -> Result<ParsedCommand, ParseError> {
    let trimmed = body.trim_start();
    if trimmed.is_empty() {
        return Err(ParseError::EmptyBody);
    }
    if !trimmed.starts_with('/') {
        return Err(ParseError::NotACommand);
    }

    let mut commands: Vec<SubCommand> = trimmed.lines().filter_map(parse_line).collect();

    match commands.len() {
        0 => Err(ParseError::NotACommand),
        1 => {
            let cmd = commands.remove(0);
            if cmd.is_builtin() {
                Ok(ParsedCommand::BuiltIn(cmd))
            } else {
                Ok(ParsedCommand::Single(cmd))
            }
        }
        _ => Ok(ParsedCommand::Multi(commands)),
    }
}

/// Whether a comment body is a command at all.
pub fn is_command(body: &str) -> bool {
    parse_comment(body).is_ok()
}

fn parse_line(line: &str) -> Option<SubCommand> {
    let rest = line.trim().strip_prefix('/')?;
    let mut tokens = rest.split_whitespace();
    let head = tokens.next()?;
    Some(SubCommand::new(head, tokens.map(str::to_string).collect()))
}

/// Split the arguments of `/batch` or `/check` into sub-commands.
///
/// A token starting with `/` opens a new sub-command; following tokens are its
/// arguments. A leading token without a slash is taken as a command name so
/// that `/batch assign alice` works as well as `/batch /assign alice`.
pub fn split_sub_commands(args: &[String]) -> Vec<SubCommand> {
    let mut commands: Vec<SubCommand> = Vec::new();

    for token in args {
        match token.strip_prefix('/') {
            Some("") => continue,
            Some(name) => commands.push(SubCommand::new(name, Vec::new())),
            None => match commands.last_mut() {
                Some(current) => current.args.push(token.clone()),
                None => commands.push(SubCommand::new(token, Vec::new())),
            },
        }
    }

    commands
}
