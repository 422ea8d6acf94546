pub mod checkbox;
pub mod checks;
pub mod cherry_pick;
pub mod command;
pub mod lgtm;
pub mod merge;
pub mod model;
pub mod render;

pub use command::{parse_comment, ParseError, ParsedCommand, SubCommand};
pub use lgtm::{collect_voters, LgtmVotes, VoteInputs};
pub use model::*;

use thiserror::Error;

/// A string did not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}
