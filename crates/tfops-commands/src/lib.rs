//! Comment command parsing for the tfops bridge.
//!
//! Turns merge-request comment text such as `tfc plan -w service-foo` into a
//! validated [`CommentCommand`] or a [`CommandParseError`].

pub mod command_envelope;
pub mod command_parser;

pub use command_envelope::{parse_command_envelope, CommandEnvelope};
pub use command_parser::{
    parse_comment_command, CommandParseError, CommandParser, CommentCommand, DEFAULT_AGENT,
};
