//! Pure parsing of `/agent ...` inline commands from comment bodies
//! (spec.md §4.4 step 3). Kept free of any platform/store access so it can
//! be exhaustively unit- and proptest-covered.

use agent_runner_types::Association;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentCommand {
    Run,
    Retry,
    Reset,
    Stop,
}

/// Parses the first recognized `/agent <verb>` command out of `body`,
/// gating on `association.may_command()` per spec.md's authorization rule.
/// Returns `None` both when no command is present and when the author
/// isn't authorized — callers cannot distinguish the two, which is
/// intentional: an unauthorized `/agent run` should be silently ignored,
/// not surfaced as an error.
pub fn parse_agent_command(body: &str, association: Association) -> Option<AgentCommand> {
    if !association.may_command() {
        return None;
    }
    for line in body.lines() {
        let trimmed = line.trim();
        let Some(rest) = trimmed.strip_prefix("/agent") else {
            continue;
        };
        let verb = rest.trim().split_whitespace().next()?;
        return match verb {
            "run" => Some(AgentCommand::Run),
            "retry" => Some(AgentCommand::Retry),
            "reset" => Some(AgentCommand::Reset),
            "stop" => Some(AgentCommand::Stop),
            _ => None,
        };
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_run_command_from_collaborator() {
        assert_eq!(
            parse_agent_command("please fix this\n/agent run\nthanks", Association::Collaborator),
            Some(AgentCommand::Run)
        );
    }

    #[test]
    fn ignores_command_from_unauthorized_author() {
        assert_eq!(
            parse_agent_command("/agent run", Association::Contributor),
            None
        );
        assert_eq!(parse_agent_command("/agent run", Association::None), None);
    }

    #[test]
    fn ignores_unrecognized_verb() {
        assert_eq!(
            parse_agent_command("/agent dance", Association::Owner),
            None
        );
    }

    #[test]
    fn ignores_body_with_no_command() {
        assert_eq!(parse_agent_command("just a comment", Association::Owner), None);
    }

    proptest::proptest! {
        #[test]
        fn never_panics_on_arbitrary_bodies(body in ".*") {
            let _ = parse_agent_command(&body, Association::Owner);
        }
    }
}
