//! Command engine: explicit registration over a `Command` capability,
//! no reflection. Generalized from the teacher's `llm::registry::ToolRegistry`
//! (register builder over `HashMap<String, Arc<dyn T>>`), retargeted from
//! tool execution to in-band session command execution.

pub mod builtin;
pub mod parser;

use std::collections::HashMap;
use std::sync::Arc;

use crate::session::state::SessionState;

/// A stateful command: receives the typed capability `&mut SessionState`
/// and never touches the HTTP layer, per the session & command engine
/// contract. Stateless commands (`help`, `hello`) simply ignore it.
pub trait Command: Send + Sync {
    fn name(&self) -> &'static str;
    fn execute(&self, args: &HashMap<String, String>, state: &mut SessionState) -> Result<String, String>;
}

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub command: String,
    pub success: bool,
    pub message: String,
}

pub struct CommandEngine {
    commands: HashMap<String, Arc<dyn Command>>,
}

impl CommandEngine {
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }

    pub fn register<C: Command + 'static>(mut self, command: C) -> Self {
        self.commands.insert(command.name().to_string(), Arc::new(command));
        self
    }

    /// The builtin set described in the session & command engine spec.
    pub fn with_builtins() -> Self {
        use builtin::*;
        Self::new()
            .register(SetCommand)
            .register(RouteDefineCommand)
            .register(RouteDeleteCommand)
            .register(RouteListCommand)
            .register(RouteAppendCommand)
            .register(RoutePrependCommand)
            .register(RouteClearCommand)
            .register(OneoffCommand)
            .register(ReasoningCommand)
            .register(HelpCommand)
            .register(HelloCommand)
            .register(PwdCommand)
    }

    /// Parse and apply every command in `content` (the last user
    /// message), left to right, each seeing the prior one's mutations.
    /// Returns the stripped forwardable text, the mutated state, and one
    /// `CommandResult` per command token encountered.
    pub fn process(
        &self,
        content: &str,
        prefix: &str,
        state: &SessionState,
    ) -> (String, SessionState, Vec<CommandResult>) {
        let (remaining, parsed) = parser::strip_and_parse(content, prefix);
        let mut state = state.clone();
        let mut results = Vec::with_capacity(parsed.len());

        for cmd in parsed {
            if cmd.malformed {
                results.push(CommandResult {
                    command: cmd.name.clone(),
                    success: false,
                    message: format!("malformed arguments for command '{}'", cmd.name),
                });
                continue;
            }
            match self.commands.get(&cmd.name) {
                Some(handler) => match handler.execute(&cmd.args, &mut state) {
                    Ok(message) => results.push(CommandResult {
                        command: cmd.name,
                        success: true,
                        message,
                    }),
                    Err(message) => results.push(CommandResult {
                        command: cmd.name,
                        success: false,
                        message,
                    }),
                },
                None => results.push(CommandResult {
                    command: cmd.name.clone(),
                    success: false,
                    message: format!("unknown command: {}", cmd.name),
                }),
            }
        }

        (remaining, state, results)
    }
}

impl Default for CommandEngine {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Render a concatenation of command results into a single assistant
/// message, used when a request is command-only (no forwardable
/// content remains after stripping).
pub fn render_command_only_response(results: &[CommandResult]) -> String {
    results
        .iter()
        .map(|r| {
            if r.success {
                format!("[{}] {}", r.command, r.message)
            } else {
                format!("[{}] error: {}", r.command, r.message)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_command_mutates_state() {
        let engine = CommandEngine::with_builtins();
        let state = SessionState::new("!/");
        let (remaining, next, results) =
            engine.process("!/set(model=openai:gpt-4)", "!/", &state);
        assert_eq!(remaining, "");
        assert_eq!(next.model_override.as_deref(), Some("openai:gpt-4"));
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
    }

    #[test]
    fn unknown_command_reports_error_and_is_stripped() {
        let engine = CommandEngine::with_builtins();
        let state = SessionState::new("!/");
        let (remaining, _next, results) = engine.process("!/bogus(x=1)", "!/", &state);
        assert_eq!(remaining, "");
        assert!(!results[0].success);
    }

    #[test]
    fn plain_text_has_no_commands() {
        let engine = CommandEngine::with_builtins();
        let state = SessionState::new("!/");
        let (remaining, _next, results) = engine.process("just a question", "!/", &state);
        assert_eq!(remaining, "just a question");
        assert!(results.is_empty());
    }

    #[test]
    fn later_commands_see_earlier_mutations() {
        let engine = CommandEngine::with_builtins();
        let state = SessionState::new("!/");
        let (_remaining, next, _results) = engine.process(
            "!/set(project=demo) !/pwd",
            "!/",
            &state,
        );
        assert_eq!(next.project.as_deref(), Some("demo"));
    }
}
