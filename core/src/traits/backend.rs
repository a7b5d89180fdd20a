use crate::agent::Agent;
use crate::traits::ChatMessage;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Free-form key/value map threaded unchanged through every backend call.
pub type ContextVariables = BTreeMap<String, serde_json::Value>;

/// Result of one completed backend turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub messages: Vec<ChatMessage>,
    pub agent: Agent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delim {
    Start,
    End,
}

/// Partial tool call as it arrives mid-stream. Any field may still be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

impl ToolCallDelta {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

/// One incremental unit of a streaming response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delim: Option<Delim>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Response>,
}

impl Chunk {
    pub fn delim(delim: Delim) -> Self {
        Self {
            delim: Some(delim),
            ..Default::default()
        }
    }

    pub fn sender(sender: impl Into<String>) -> Self {
        Self {
            sender: Some(sender.into()),
            ..Default::default()
        }
    }

    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn tool_calls(tool_calls: Vec<ToolCallDelta>) -> Self {
        Self {
            tool_calls: Some(tool_calls),
            ..Default::default()
        }
    }

    pub fn response(response: Response) -> Self {
        Self {
            response: Some(response),
            ..Default::default()
        }
    }

    pub fn from_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunRequest<'a> {
    pub agent: &'a Agent,
    pub messages: &'a [ChatMessage],
    pub context_variables: &'a ContextVariables,
    pub stream: bool,
    pub debug: bool,
}

pub enum RunOutput {
    Stream(BoxStream<'static, anyhow::Result<Chunk>>),
    Batch(Response),
}

impl std::fmt::Debug for RunOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream(_) => write!(f, "RunOutput::Stream(..)"),
            Self::Batch(response) => f.debug_tuple("RunOutput::Batch").field(response).finish(),
        }
    }
}

/// The multi-agent runtime the REPL talks to.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn run(&self, request: RunRequest<'_>) -> anyhow::Result<RunOutput>;
}
