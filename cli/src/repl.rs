use crate::input::LineReader;
use crate::render::{pretty_print_messages, print_streaming_response};
use anyhow::Result;
use console::style;
use hive_core::{Agent, Backend, ChatMessage, ContextVariables, RunOutput, RunRequest};
use std::io::Write;
use std::sync::Arc;

/// Owns the transcript and the active agent across turns.
pub struct Repl<W: Write> {
    backend: Arc<dyn Backend>,
    agent: Agent,
    messages: Vec<ChatMessage>,
    context_variables: ContextVariables,
    stream: bool,
    debug: bool,
    out: W,
}

impl Repl<std::io::Stdout> {
    pub fn new(backend: Arc<dyn Backend>, starting_agent: Agent) -> Self {
        Self::with_output(backend, starting_agent, std::io::stdout())
    }
}

impl<W: Write> Repl<W> {
    pub fn with_output(backend: Arc<dyn Backend>, starting_agent: Agent, out: W) -> Self {
        Self {
            backend,
            agent: starting_agent,
            messages: vec![],
            context_variables: ContextVariables::new(),
            stream: false,
            debug: false,
            out,
        }
    }

    pub fn with_context_variables(mut self, context_variables: ContextVariables) -> Self {
        self.context_variables = context_variables;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    /// Runs turns until input or the backend fails; there is no exit command.
    pub async fn run<R: LineReader>(&mut self, input: &mut R) -> Result<()> {
        loop {
            self.turn(input).await?;
        }
    }

    pub async fn turn<R: LineReader>(&mut self, input: &mut R) -> Result<()> {
        let user_input = input.read_line(&format!("{}: ", style("User").black().bright()))?;
        self.messages.push(ChatMessage::user(user_input));

        let output = self
            .backend
            .run(RunRequest {
                agent: &self.agent,
                messages: &self.messages,
                context_variables: &self.context_variables,
                stream: self.stream,
                debug: self.debug,
            })
            .await?;

        let response = match output {
            RunOutput::Stream(chunks) => print_streaming_response(chunks, &mut self.out).await?,
            RunOutput::Batch(response) => {
                pretty_print_messages(&response.messages, &mut self.out)?;
                response
            }
        };

        tracing::debug!(
            "Turn finished: {} new messages, next agent {}",
            response.messages.len(),
            response.agent.name
        );

        self.messages.extend(response.messages);
        self.agent = response.agent;
        Ok(())
    }
}
