pub mod backend;
pub mod provider;

pub use backend::{
    Backend, Chunk, ContextVariables, Delim, Response, RunOutput, RunRequest, ToolCallDelta,
};
pub use provider::{ChatMessage, ChatRequest, ChatResponse, Provider, ProviderEvent, ToolCall};
