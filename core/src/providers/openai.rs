use crate::providers::stream::{LineParser, spawn_line_stream};
use crate::traits::{ChatMessage, ChatRequest, ChatResponse, Provider, ProviderEvent, ToolCall};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage<'a>>,
    temperature: f64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage<'a> {
    role: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCallRequest<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct OpenAIToolCallRequest<'a> {
    id: &'a str,
    r#type: &'a str,
    function: OpenAIFunctionRequest<'a>,
}

#[derive(Debug, Serialize)]
struct OpenAIFunctionRequest<'a> {
    name: &'a str,
    arguments: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAIToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAIToolCall {
    id: String,
    function: OpenAIFunction,
}

#[derive(Debug, Deserialize)]
struct OpenAIFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

/// One SSE line, classified.
#[derive(Debug, PartialEq)]
enum SseLine {
    Skip,
    Done,
    Error(String),
    Delta {
        content: Option<String>,
        tool_calls: Vec<(usize, ToolCallFragment)>,
    },
}

#[derive(Debug, Default, Clone, PartialEq)]
struct ToolCallFragment {
    id: Option<String>,
    name: Option<String>,
    arguments: Option<String>,
}

/// Tool calls arrive split over many deltas, keyed by index.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    calls: BTreeMap<usize, ToolCallFragment>,
}

impl ToolCallAccumulator {
    fn push(&mut self, index: usize, fragment: ToolCallFragment) {
        let entry = self.calls.entry(index).or_default();
        if fragment.id.is_some() {
            entry.id = fragment.id;
        }
        if let Some(name) = fragment.name {
            entry.name.get_or_insert_with(String::new).push_str(&name);
        }
        if let Some(arguments) = fragment.arguments {
            entry
                .arguments
                .get_or_insert_with(String::new)
                .push_str(&arguments);
        }
    }

    fn finish(&mut self) -> Vec<ToolCall> {
        std::mem::take(&mut self.calls)
            .into_values()
            .filter_map(|f| {
                let name = f.name.filter(|n| !n.is_empty())?;
                Some(ToolCall {
                    id: f
                        .id
                        .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple())),
                    name,
                    arguments: f.arguments.unwrap_or_else(|| "{}".to_string()),
                })
            })
            .collect()
    }
}

pub struct OpenAIProvider {
    client: reqwest::Client,
    name: String,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAIProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            name: "openai".to_string(),
            api_key: api_key.into(),
            model: "gpt-4o".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    /// Label used in error messages; several vendors share this wire format.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let url = base_url.into();
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn convert_messages<'a>(&self, messages: &'a [ChatMessage]) -> Vec<OpenAIMessage<'a>> {
        messages
            .iter()
            .map(|m| {
                let tool_calls = m.tool_calls.as_ref().map(|tool_calls| {
                    tool_calls
                        .iter()
                        .map(|tc| OpenAIToolCallRequest {
                            id: &tc.id,
                            r#type: "function",
                            function: OpenAIFunctionRequest {
                                name: &tc.name,
                                arguments: &tc.arguments,
                            },
                        })
                        .collect()
                });

                OpenAIMessage {
                    role: &m.role,
                    content: m.content.as_deref(),
                    tool_calls,
                    tool_call_id: m.tool_call_id.as_deref(),
                }
            })
            .collect()
    }

    async fn post(&self, body: &OpenAIRequest<'_>) -> anyhow::Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "{} API error {}: {}",
                self.name,
                status,
                error_text
            ));
        }

        Ok(response)
    }

    fn parse_sse_line(line: &str) -> SseLine {
        let line = line.trim();
        let Some(data) = line.strip_prefix("data:") else {
            return SseLine::Skip;
        };
        let data = data.trim();

        if data == "[DONE]" {
            return SseLine::Done;
        }

        let Ok(response) = serde_json::from_str::<StreamResponse>(data) else {
            tracing::debug!("Skipping unparseable stream line: {}", data);
            return SseLine::Skip;
        };

        if let Some(error) = response.error {
            return SseLine::Error(error_message(&error));
        }

        let Some(choice) = response.choices.into_iter().next() else {
            return SseLine::Skip;
        };

        let tool_calls = choice
            .delta
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                let (name, arguments) = match tc.function {
                    Some(f) => (f.name, f.arguments),
                    None => (None, None),
                };
                (
                    tc.index,
                    ToolCallFragment {
                        id: tc.id,
                        name,
                        arguments,
                    },
                )
            })
            .collect();

        SseLine::Delta {
            content: choice.delta.content.filter(|c| !c.is_empty()),
            tool_calls,
        }
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn name(&self) -> &str {
        &self.name
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
        let openai_request = OpenAIRequest {
            model,
            messages: self.convert_messages(request.messages),
            temperature,
            stream: false,
        };

        let openai_response: OpenAIResponse = self.post(&openai_request).await?.json().await?;

        let choice = openai_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No choices in response"))?;

        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .map(|calls| {
                calls
                    .into_iter()
                    .map(|c| ToolCall {
                        id: c.id,
                        name: c.function.name,
                        arguments: c.function.arguments,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(ChatResponse {
            text: choice.message.content,
            tool_calls,
        })
    }

    async fn chat_stream(
        &self,
        request: ChatRequest<'_>,
        model: &str,
        temperature: f64,
    ) -> anyhow::Result<BoxStream<'static, ProviderEvent>> {
        let openai_request = OpenAIRequest {
            model,
            messages: self.convert_messages(request.messages),
            temperature,
            stream: true,
        };

        let response = self.post(&openai_request).await?;
        Ok(spawn_line_stream(
            response.bytes_stream(),
            SseParser::new(self.name.clone()),
        ))
    }
}

/// Mid-stream error bodies carry either `{"message": ..}` or a bare string.
fn error_message(error: &serde_json::Value) -> String {
    error
        .get("message")
        .and_then(|m| m.as_str())
        .or_else(|| error.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string())
}

/// Turns SSE lines into provider events; tool calls are released once the
/// body ends, when every fragment has arrived.
struct SseParser {
    provider: String,
    tool_calls: ToolCallAccumulator,
}

impl SseParser {
    fn new(provider: String) -> Self {
        Self {
            provider,
            tool_calls: ToolCallAccumulator::default(),
        }
    }
}

impl LineParser for SseParser {
    fn parse_line(&mut self, line: &str) -> Vec<ProviderEvent> {
        match OpenAIProvider::parse_sse_line(line) {
            SseLine::Skip => vec![],
            SseLine::Done => vec![ProviderEvent::Done],
            SseLine::Error(message) => vec![ProviderEvent::Error(format!(
                "{} stream error: {}",
                self.provider, message
            ))],
            SseLine::Delta {
                content,
                tool_calls,
            } => {
                for (index, fragment) in tool_calls {
                    self.tool_calls.push(index, fragment);
                }
                content.map(ProviderEvent::Token).into_iter().collect()
            }
        }
    }

    fn finish(&mut self) -> Vec<ProviderEvent> {
        self.tool_calls
            .finish()
            .into_iter()
            .map(ProviderEvent::ToolCall)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_content_delta() {
        let line = r#"data: {"choices":[{"index":0,"delta":{"content":"Hel"}}]}"#;
        assert_eq!(
            OpenAIProvider::parse_sse_line(line),
            SseLine::Delta {
                content: Some("Hel".to_string()),
                tool_calls: vec![],
            }
        );
    }

    #[test]
    fn sse_done_and_noise() {
        assert_eq!(OpenAIProvider::parse_sse_line("data: [DONE]"), SseLine::Done);
        assert_eq!(OpenAIProvider::parse_sse_line(": keep-alive"), SseLine::Skip);
        assert_eq!(OpenAIProvider::parse_sse_line(""), SseLine::Skip);
        assert_eq!(OpenAIProvider::parse_sse_line("data: {oops"), SseLine::Skip);
    }

    #[test]
    fn sse_role_only_delta_has_no_content() {
        let line = r#"data: {"choices":[{"delta":{"role":"assistant","content":""}}]}"#;
        assert_eq!(
            OpenAIProvider::parse_sse_line(line),
            SseLine::Delta {
                content: None,
                tool_calls: vec![],
            }
        );
    }

    #[test]
    fn tool_call_fragments_accumulate_by_index() {
        let lines = [
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"transfer","arguments":""}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"to\":"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"sales\"}"}}]}}]}"#,
        ];

        let mut acc = ToolCallAccumulator::default();
        for line in lines {
            if let SseLine::Delta { tool_calls, .. } = OpenAIProvider::parse_sse_line(line) {
                for (index, fragment) in tool_calls {
                    acc.push(index, fragment);
                }
            }
        }

        let calls = acc.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].name, "transfer");
        assert_eq!(calls[0].arguments, r#"{"to":"sales"}"#);
    }

    #[test]
    fn sse_error_payload_is_an_error() {
        let line = r#"data: {"error":{"message":"Rate limit reached","type":"requests"}}"#;
        assert_eq!(
            OpenAIProvider::parse_sse_line(line),
            SseLine::Error("Rate limit reached".to_string())
        );
    }

    #[test]
    fn parser_reports_errors_with_the_provider_name() {
        let mut parser = SseParser::new("groq".to_string());
        let events = parser.parse_line(r#"data: {"error":"overloaded"}"#);
        assert_eq!(
            events,
            vec![ProviderEvent::Error("groq stream error: overloaded".to_string())]
        );
    }

    #[tokio::test]
    async fn split_utf8_and_tool_calls_survive_the_stream() {
        use futures_util::{StreamExt, stream};

        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"café\"}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"c1\",\"function\":{\"name\":\"lookup\",\"arguments\":\"{}\"}}]}}]}\n",
            "data: [DONE]\n",
        )
        .as_bytes()
        .to_vec();
        let split = body.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let chunks: Vec<Result<Vec<u8>, String>> =
            vec![Ok(body[..split].to_vec()), Ok(body[split..].to_vec())];

        let events: Vec<ProviderEvent> =
            spawn_line_stream(stream::iter(chunks), SseParser::new("openai".to_string()))
                .collect()
                .await;

        assert_eq!(events.len(), 3);
        assert_eq!(events[0], ProviderEvent::Token("café".to_string()));
        match &events[1] {
            ProviderEvent::ToolCall(call) => assert_eq!(call.name, "lookup"),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(events[2], ProviderEvent::Done);
    }

    #[tokio::test]
    async fn cut_off_stream_is_an_error() {
        use futures_util::{StreamExt, stream};

        let chunks: Vec<Result<Vec<u8>, String>> = vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n".to_vec()),
            Err("error decoding response body".to_string()),
        ];

        let events: Vec<ProviderEvent> =
            spawn_line_stream(stream::iter(chunks), SseParser::new("openai".to_string()))
                .collect()
                .await;

        assert_eq!(events[0], ProviderEvent::Token("partial".to_string()));
        assert!(matches!(events.last(), Some(ProviderEvent::Error(_))));
        assert!(!events.contains(&ProviderEvent::Done));
    }

    #[test]
    fn nameless_tool_call_is_dropped() {
        let mut acc = ToolCallAccumulator::default();
        acc.push(
            0,
            ToolCallFragment {
                arguments: Some("{}".to_string()),
                ..Default::default()
            },
        );
        assert!(acc.finish().is_empty());
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let provider = OpenAIProvider::new("k").with_base_url("https://api.groq.com/openai/v1/");
        assert_eq!(provider.base_url(), "https://api.groq.com/openai/v1");
    }
}
