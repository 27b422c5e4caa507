#[derive(Debug, Clone, PartialEq, Eq)]
/// Agent and action tokens split off the front of a comment.
pub struct CommandEnvelope<'a> {
    pub agent: &'a str,
    pub action: Option<&'a str>,
    pub remainder: &'a str,
}

/// Splits `body` into agent, action and remainder when the first token is one
/// of `agents`. Returns `None` for ordinary comments.
pub fn parse_command_envelope<'a>(body: &'a str, agents: &[String]) -> Option<CommandEnvelope<'a>> {
    let trimmed = body.trim();
    let agent = trimmed.split_whitespace().next()?;
    if !agents.iter().any(|candidate| candidate == agent) {
        return None;
    }

    let args = trimmed[agent.len()..].trim_start();
    if args.is_empty() {
        return Some(CommandEnvelope {
            agent,
            action: None,
            remainder: "",
        });
    }

    let mut parts = args.splitn(2, char::is_whitespace);
    let action = parts.next().filter(|token| !token.is_empty());
    let remainder = parts.next().unwrap_or_default().trim();
    Some(CommandEnvelope {
        agent,
        action,
        remainder,
    })
}
