use serde::{Deserialize, Serialize};

const DEFAULT_AGENT_NAME: &str = "Agent";
const DEFAULT_INSTRUCTIONS: &str = "You are a helpful agent.";

/// Handle for the agent that answers the next turn.
///
/// The REPL treats it as opaque and hands it back to the backend unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub instructions: String,
}

impl Agent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: None,
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }
}

impl Default for Agent {
    fn default() -> Self {
        default_agent()
    }
}

pub fn default_agent() -> Agent {
    Agent::new(DEFAULT_AGENT_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_agent_has_no_model_override() {
        let agent = default_agent();
        assert_eq!(agent.name, "Agent");
        assert!(agent.model.is_none());
        assert!(!agent.instructions.is_empty());
    }

    #[test]
    fn builder_overrides() {
        let agent = Agent::new("Triage")
            .with_model("gpt-4o-mini")
            .with_instructions("Route the user.");
        assert_eq!(agent.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(agent.instructions, "Route the user.");
    }
}
