use crate::agent::Agent;
use crate::config::Config;
use crate::providers::create_provider;
use crate::traits::{
    Backend, ChatMessage, ChatRequest, Chunk, Delim, Provider, ProviderEvent, Response, RunOutput,
    RunRequest, ToolCall, ToolCallDelta,
};
use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

const EMPTY_COMPLETION: &str = "Empty response from provider: no content or tool calls";

/// Backend that answers every turn with a single completion from one provider.
///
/// It never executes tools and never hands off, so the returned agent is
/// always the one that was asked. A completion with neither text nor tool
/// calls is an error in both batch and stream mode.
pub struct ProviderBackend {
    provider: Arc<dyn Provider>,
    temperature: f64,
}

impl ProviderBackend {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            temperature: 1.0,
        }
    }

    /// Builds the provider for `llm_type` from the factory.
    pub fn from_llm_type(llm_type: &str, config: &Config) -> Result<Self> {
        let provider = create_provider(llm_type, config)?;
        Ok(Self::new(Arc::from(provider)).with_temperature(config.temperature))
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    fn build_messages(agent: &Agent, history: &[ChatMessage]) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(agent.instructions.clone()));
        messages.extend(history.iter().map(|m| ChatMessage {
            sender: None,
            ..m.clone()
        }));
        messages
    }

    fn model_for<'a>(&'a self, agent: &'a Agent) -> &'a str {
        agent
            .model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }
}

#[async_trait]
impl Backend for ProviderBackend {
    async fn run(&self, request: RunRequest<'_>) -> Result<RunOutput> {
        let agent = request.agent.clone();
        let messages = Self::build_messages(&agent, request.messages);
        let model = self.model_for(&agent).to_string();

        if request.debug {
            debug!(
                "Getting chat completion for {} via {} ({}): {} messages, context variables {:?}",
                agent.name,
                self.provider.name(),
                model,
                messages.len(),
                request.context_variables
            );
        }

        let chat_request = ChatRequest {
            messages: &messages,
        };

        if !request.stream {
            let response = self
                .provider
                .chat(chat_request, &model, self.temperature)
                .await?;
            if request.debug {
                debug!(
                    "Received completion: {} chars, {} tool calls",
                    response.text_or_empty().len(),
                    response.tool_calls.len()
                );
            }
            if response.is_empty() {
                bail!(EMPTY_COMPLETION);
            }
            let message = ChatMessage::assistant_with_tool_calls(response.text, response.tool_calls)
                .with_sender(agent.name.clone());
            return Ok(RunOutput::Batch(Response {
                messages: vec![message],
                agent,
            }));
        }

        let events = self
            .provider
            .chat_stream(chat_request, &model, self.temperature)
            .await?;
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Chunk>>(256);
        let debug = request.debug;

        tokio::spawn(async move {
            let sender = agent.name.clone();
            let mut events = events;
            let mut content = String::new();
            let mut tool_calls: Vec<ToolCall> = vec![];

            if tx.send(Ok(Chunk::delim(Delim::Start))).await.is_err() {
                return;
            }

            while let Some(event) = events.next().await {
                let chunk = match event {
                    ProviderEvent::Token(token) => {
                        content.push_str(&token);
                        Chunk::content(token).from_sender(sender.clone())
                    }
                    ProviderEvent::ToolCall(call) => {
                        let delta = ToolCallDelta {
                            id: Some(call.id.clone()),
                            name: Some(call.name.clone()),
                            arguments: Some(call.arguments.clone()),
                        };
                        tool_calls.push(call);
                        Chunk::tool_calls(vec![delta]).from_sender(sender.clone())
                    }
                    ProviderEvent::Error(message) => {
                        let _ = tx.send(Err(anyhow!(message))).await;
                        return;
                    }
                    ProviderEvent::Done => break,
                };
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }

            if debug {
                debug!(
                    "Stream finished: {} chars, {} tool calls",
                    content.len(),
                    tool_calls.len()
                );
            }

            if content.trim().is_empty() && tool_calls.is_empty() {
                let _ = tx.send(Err(anyhow!(EMPTY_COMPLETION))).await;
                return;
            }

            let content = if content.is_empty() { None } else { Some(content) };
            let message =
                ChatMessage::assistant_with_tool_calls(content, tool_calls).with_sender(sender);

            if tx.send(Ok(Chunk::delim(Delim::End))).await.is_err() {
                return;
            }
            let _ = tx
                .send(Ok(Chunk::response(Response {
                    messages: vec![message],
                    agent,
                })))
                .await;
        });

        Ok(RunOutput::Stream(Box::pin(ReceiverStream::new(rx))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{ChatResponse, ContextVariables};
    use futures_util::stream::{self, BoxStream};
    use std::sync::Mutex;

    struct ScriptedProvider {
        events: Vec<ProviderEvent>,
        answer: Option<String>,
        seen: Mutex<Vec<(Vec<ChatMessage>, String)>>,
    }

    impl ScriptedProvider {
        fn new(events: Vec<ProviderEvent>) -> Self {
            Self {
                events,
                answer: Some("batch answer".to_string()),
                seen: Mutex::new(vec![]),
            }
        }

        fn answering(mut self, answer: Option<&str>) -> Self {
            self.answer = answer.map(str::to_string);
            self
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn default_model(&self) -> &str {
            "scripted-model"
        }

        async fn chat(
            &self,
            request: ChatRequest<'_>,
            model: &str,
            _temperature: f64,
        ) -> Result<ChatResponse> {
            self.seen
                .lock()
                .unwrap()
                .push((request.messages.to_vec(), model.to_string()));
            Ok(ChatResponse {
                text: self.answer.clone(),
                tool_calls: vec![],
            })
        }

        async fn chat_stream(
            &self,
            request: ChatRequest<'_>,
            model: &str,
            _temperature: f64,
        ) -> Result<BoxStream<'static, ProviderEvent>> {
            self.seen
                .lock()
                .unwrap()
                .push((request.messages.to_vec(), model.to_string()));
            Ok(Box::pin(stream::iter(self.events.clone())))
        }
    }

    fn request<'a>(
        agent: &'a Agent,
        messages: &'a [ChatMessage],
        context_variables: &'a ContextVariables,
        stream: bool,
    ) -> RunRequest<'a> {
        RunRequest {
            agent,
            messages,
            context_variables,
            stream,
            debug: true,
        }
    }

    #[tokio::test]
    async fn batch_returns_one_message_from_the_agent() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let backend = ProviderBackend::new(provider.clone());
        let agent = Agent::new("Bee").with_instructions("Buzz.");
        let history = vec![ChatMessage::user("hello")];
        let vars = ContextVariables::new();

        let output = backend
            .run(request(&agent, &history, &vars, false))
            .await
            .unwrap();
        let RunOutput::Batch(response) = output else {
            panic!("expected batch output");
        };

        assert_eq!(response.agent, agent);
        assert_eq!(response.messages.len(), 1);
        assert_eq!(response.messages[0].sender.as_deref(), Some("Bee"));
        assert_eq!(response.messages[0].content.as_deref(), Some("batch answer"));

        let seen = provider.seen.lock().unwrap();
        let (messages, model) = &seen[0];
        assert_eq!(model, "scripted-model");
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[0].content.as_deref(), Some("Buzz."));
        assert_eq!(messages[1].content.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn agent_model_overrides_provider_default() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let backend = ProviderBackend::new(provider.clone());
        let agent = Agent::new("Bee").with_model("pinned");
        let vars = ContextVariables::new();

        backend
            .run(request(&agent, &[], &vars, false))
            .await
            .unwrap();
        assert_eq!(provider.seen.lock().unwrap()[0].1, "pinned");
    }

    #[tokio::test]
    async fn sender_is_not_sent_to_the_provider() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let backend = ProviderBackend::new(provider.clone());
        let agent = Agent::new("Bee");
        let history = vec![ChatMessage::assistant("earlier").with_sender("Bee")];
        let vars = ContextVariables::new();

        backend
            .run(request(&agent, &history, &vars, false))
            .await
            .unwrap();
        assert!(provider.seen.lock().unwrap()[0].0[1].sender.is_none());
    }

    #[tokio::test]
    async fn stream_frames_tokens_between_delims_then_responds() {
        let call = ToolCall {
            id: "c1".to_string(),
            name: "lookup".to_string(),
            arguments: "{}".to_string(),
        };
        let provider = Arc::new(ScriptedProvider::new(vec![
            ProviderEvent::Token("hi".to_string()),
            ProviderEvent::Token(" there".to_string()),
            ProviderEvent::ToolCall(call.clone()),
            ProviderEvent::Done,
        ]));
        let backend = ProviderBackend::new(provider);
        let agent = Agent::new("Bee");
        let vars = ContextVariables::new();

        let RunOutput::Stream(stream) = backend
            .run(request(&agent, &[], &vars, true))
            .await
            .unwrap()
        else {
            panic!("expected stream output");
        };
        let chunks: Vec<Chunk> = stream.map(|c| c.unwrap()).collect().await;

        assert_eq!(chunks.len(), 6);
        assert_eq!(chunks[0], Chunk::delim(Delim::Start));
        assert_eq!(chunks[1], Chunk::content("hi").from_sender("Bee"));
        assert_eq!(chunks[2], Chunk::content(" there").from_sender("Bee"));
        assert_eq!(
            chunks[3].tool_calls.as_ref().unwrap()[0].name.as_deref(),
            Some("lookup")
        );
        assert_eq!(chunks[4], Chunk::delim(Delim::End));

        let response = chunks[5].response.as_ref().unwrap();
        assert_eq!(response.agent, agent);
        let message = &response.messages[0];
        assert_eq!(message.content.as_deref(), Some("hi there"));
        assert_eq!(message.sender.as_deref(), Some("Bee"));
        assert_eq!(message.tool_calls(), &[call]);
    }

    async fn stream_chunks(provider: ScriptedProvider) -> Vec<Result<Chunk>> {
        let backend = ProviderBackend::new(Arc::new(provider));
        let agent = Agent::new("Bee");
        let vars = ContextVariables::new();

        let RunOutput::Stream(stream) = backend
            .run(request(&agent, &[], &vars, true))
            .await
            .unwrap()
        else {
            panic!("expected stream output");
        };
        stream.collect().await
    }

    #[tokio::test]
    async fn provider_error_mid_stream_fails_the_turn() {
        let chunks = stream_chunks(ScriptedProvider::new(vec![
            ProviderEvent::Token("half an ans".to_string()),
            ProviderEvent::Error("stream interrupted: connection reset".to_string()),
        ]))
        .await;

        assert_eq!(chunks.len(), 3);
        assert_eq!(
            chunks[1].as_ref().unwrap(),
            &Chunk::content("half an ans").from_sender("Bee")
        );
        let err = chunks[2].as_ref().unwrap_err();
        assert!(err.to_string().contains("connection reset"));
        assert!(
            chunks
                .iter()
                .filter_map(|c| c.as_ref().ok())
                .all(|c| c.response.is_none())
        );
    }

    #[tokio::test]
    async fn empty_completion_is_an_error_in_both_modes() {
        let provider = ScriptedProvider::new(vec![]).answering(Some("  "));
        let backend = ProviderBackend::new(Arc::new(provider));
        let agent = Agent::new("Bee");
        let vars = ContextVariables::new();

        let err = backend
            .run(request(&agent, &[], &vars, false))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Empty response"));

        let chunks = stream_chunks(ScriptedProvider::new(vec![ProviderEvent::Done])).await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].as_ref().unwrap(), &Chunk::delim(Delim::Start));
        assert!(
            chunks[1]
                .as_ref()
                .unwrap_err()
                .to_string()
                .contains("Empty response")
        );
    }
}
