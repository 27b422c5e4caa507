use thiserror::Error;

use tfops_contract::RunAction;

use crate::command_envelope::parse_command_envelope;

/// Agent literal recognized when no other agents are configured.
pub const DEFAULT_AGENT: &str = "tfc";

const WORKSPACE_SHORT_FLAG: &str = "-w";
const WORKSPACE_LONG_FLAG: &str = "--workspace";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Fully parsed comment command.
pub struct CommentCommand {
    pub agent: String,
    pub action: RunAction,
    pub workspace: Option<String>,
    pub trailing_args: Vec<String>,
}

impl CommentCommand {
    /// Builds the command used for automatic plans on merge-request updates.
    pub fn auto_plan(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            action: RunAction::Plan,
            workspace: None,
            trailing_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Reasons a comment does not yield a command.
pub enum CommandParseError {
    #[error("comment is not addressed to a recognized agent")]
    NotACommand,
    #[error("command is missing an action")]
    MissingAction,
    #[error("unknown action '{action}'")]
    UnknownAction { action: String },
    #[error("workspace flag requires a value")]
    MissingWorkspaceValue,
    #[error("invalid command arguments: {message}")]
    InvalidArguments { message: String },
}

impl CommandParseError {
    /// Ordinary review chatter rather than a malformed command.
    pub fn is_not_a_command(&self) -> bool {
        matches!(self, Self::NotACommand)
    }

    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::NotACommand => "not_a_command",
            Self::MissingAction => "missing_action",
            Self::UnknownAction { .. } => "unknown_action",
            Self::MissingWorkspaceValue => "missing_workspace_value",
            Self::InvalidArguments { .. } => "invalid_arguments",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Parser bound to the set of agent literals this deployment answers to.
pub struct CommandParser {
    agents: Vec<String>,
}

impl Default for CommandParser {
    fn default() -> Self {
        Self {
            agents: vec![DEFAULT_AGENT.to_string()],
        }
    }
}

impl CommandParser {
    pub fn new<I, S>(agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let agents = agents
            .into_iter()
            .map(Into::into)
            .map(|agent| agent.trim().to_string())
            .filter(|agent| !agent.is_empty())
            .collect::<Vec<_>>();
        if agents.is_empty() {
            return Self::default();
        }
        Self { agents }
    }

    pub fn agents(&self) -> &[String] {
        &self.agents
    }

    /// First configured agent, used to label automatic runs.
    pub fn primary_agent(&self) -> &str {
        self.agents
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_AGENT)
    }

    pub fn parse(&self, text: &str) -> Result<CommentCommand, CommandParseError> {
        let envelope =
            parse_command_envelope(text, &self.agents).ok_or(CommandParseError::NotACommand)?;
        let action_token = envelope.action.ok_or(CommandParseError::MissingAction)?;
        let action =
            RunAction::from_token(action_token).ok_or_else(|| CommandParseError::UnknownAction {
                action: action_token.to_string(),
            })?;

        let tokens = shell_words::split(envelope.remainder).map_err(|error| {
            CommandParseError::InvalidArguments {
                message: error.to_string(),
            }
        })?;
        let (workspace, trailing_args) = split_workspace_flag(tokens)?;

        Ok(CommentCommand {
            agent: envelope.agent.to_string(),
            action,
            workspace,
            trailing_args,
        })
    }
}

/// Parses `text` with the default agent.
pub fn parse_comment_command(text: &str) -> Result<CommentCommand, CommandParseError> {
    CommandParser::default().parse(text)
}

fn split_workspace_flag(
    tokens: Vec<String>,
) -> Result<(Option<String>, Vec<String>), CommandParseError> {
    let mut workspace = None;
    let mut trailing_args = Vec::with_capacity(tokens.len());
    let mut tokens = tokens.into_iter();
    while let Some(token) = tokens.next() {
        if token == WORKSPACE_SHORT_FLAG || token == WORKSPACE_LONG_FLAG {
            let value = tokens
                .next()
                .filter(|value| !value.trim().is_empty())
                .ok_or(CommandParseError::MissingWorkspaceValue)?;
            workspace = Some(value);
            continue;
        }
        if let Some(value) = inline_workspace_value(&token) {
            if value.trim().is_empty() {
                return Err(CommandParseError::MissingWorkspaceValue);
            }
            workspace = Some(value.to_string());
            continue;
        }
        trailing_args.push(token);
    }
    Ok((workspace, trailing_args))
}

fn inline_workspace_value(token: &str) -> Option<&str> {
    [WORKSPACE_SHORT_FLAG, WORKSPACE_LONG_FLAG]
        .into_iter()
        .find_map(|flag| token.strip_prefix(flag)?.strip_prefix('='))
}
