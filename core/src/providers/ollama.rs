use crate::providers::stream::{LineParser, spawn_line_stream};
use crate::traits::{ChatMessage, ChatRequest, ChatResponse, Provider, ProviderEvent, ToolCall};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage<'a>>,
    options: OllamaOptions,
    stream: bool,
}

/// Ollama takes tool results as `role: "tool"` messages and tool call
/// arguments as JSON objects rather than encoded strings.
#[derive(Debug, Serialize)]
struct OllamaMessage<'a> {
    role: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    content: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OllamaToolCallRequest<'a>>,
}

#[derive(Debug, Serialize)]
struct OllamaToolCallRequest<'a> {
    function: OllamaFunctionRequest<'a>,
}

#[derive(Debug, Serialize)]
struct OllamaFunctionRequest<'a> {
    name: &'a str,
    arguments: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OllamaToolCallResponse>>,
}

#[derive(Debug, Deserialize)]
struct OllamaToolCallResponse {
    function: OllamaFunctionResponse,
}

#[derive(Debug, Deserialize)]
struct OllamaFunctionResponse {
    name: String,
    arguments: serde_json::Value,
}

/// One NDJSON line of `/api/chat` with `stream: true`.
#[derive(Debug, Deserialize)]
struct StreamLine {
    message: Option<OllamaResponseMessage>,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaProvider {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.2".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let url = base_url.into();
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn request<'a>(
        messages: &'a [ChatMessage],
        model: &'a str,
        temperature: f64,
        stream: bool,
    ) -> OllamaRequest<'a> {
        OllamaRequest {
            model,
            messages: messages.iter().map(to_ollama_message).collect(),
            options: OllamaOptions { temperature },
            stream,
        }
    }

    fn convert_tool_call(tc: OllamaToolCallResponse) -> ToolCall {
        ToolCall {
            id: format!("ollama_{}", uuid::Uuid::new_v4()),
            name: tc.function.name,
            arguments: serde_json::to_string(&tc.function.arguments).unwrap_or_default(),
        }
    }

    async fn post(&self, body: &OllamaRequest<'_>) -> anyhow::Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Ollama API error ({}): {}",
                status,
                error_text
            ));
        }

        Ok(response)
    }
}

fn to_ollama_message(message: &ChatMessage) -> OllamaMessage<'_> {
    let tool_calls = message
        .tool_calls()
        .iter()
        .map(|tc| OllamaToolCallRequest {
            function: OllamaFunctionRequest {
                name: &tc.name,
                arguments: parse_arguments(&tc.arguments),
            },
        })
        .collect();

    OllamaMessage {
        role: &message.role,
        content: message.content_or_empty(),
        tool_calls,
    }
}

/// Empty or malformed argument strings go out as an empty object.
fn parse_arguments(arguments: &str) -> serde_json::Value {
    match serde_json::from_str(arguments) {
        Ok(value @ serde_json::Value::Object(_)) => value,
        _ => serde_json::Value::Object(serde_json::Map::new()),
    }
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn chat(
        &self,
        request: ChatRequest<'_>,
        model: &str,
        temperature: f64,
    ) -> anyhow::Result<ChatResponse> {
        let ollama_request = Self::request(request.messages, model, temperature, false);

        let ollama_response: OllamaResponse = self.post(&ollama_request).await?.json().await?;

        let tool_calls: Vec<ToolCall> = ollama_response
            .message
            .tool_calls
            .map(|tcs| tcs.into_iter().map(Self::convert_tool_call).collect())
            .unwrap_or_default();

        Ok(ChatResponse {
            text: ollama_response.message.content,
            tool_calls,
        })
    }

    async fn chat_stream(
        &self,
        request: ChatRequest<'_>,
        model: &str,
        temperature: f64,
    ) -> anyhow::Result<BoxStream<'static, ProviderEvent>> {
        let ollama_request = Self::request(request.messages, model, temperature, true);

        let response = self.post(&ollama_request).await?;
        Ok(spawn_line_stream(response.bytes_stream(), NdjsonLines))
    }
}

/// Ollama streams one JSON object per line and flags the last with `done`.
/// Tool calls arrive whole, so nothing is held back until the end.
struct NdjsonLines;

impl LineParser for NdjsonLines {
    fn parse_line(&mut self, line: &str) -> Vec<ProviderEvent> {
        let line = line.trim();
        if line.is_empty() {
            return vec![];
        }

        let parsed: StreamLine = match serde_json::from_str(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!("Skipping unparseable Ollama line ({}): {}", e, line);
                return vec![];
            }
        };

        if let Some(error) = parsed.error {
            return vec![ProviderEvent::Error(format!("ollama stream error: {error}"))];
        }

        let mut events = vec![];
        if let Some(message) = parsed.message {
            events.extend(
                message
                    .content
                    .filter(|c| !c.is_empty())
                    .map(ProviderEvent::Token),
            );
            events.extend(
                message
                    .tool_calls
                    .into_iter()
                    .flatten()
                    .map(|tc| ProviderEvent::ToolCall(OllamaProvider::convert_tool_call(tc))),
            );
        }
        if parsed.done {
            events.push(ProviderEvent::Done);
        }
        events
    }
}
