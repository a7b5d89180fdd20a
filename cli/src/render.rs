use anyhow::{Context, Result, bail};
use console::style;
use futures_util::{Stream, StreamExt};
use hive_core::{ChatMessage, Chunk, Delim, Response};
use std::io::Write;

/// Incremental printer state for one streamed backend turn.
#[derive(Debug, Default)]
pub struct StreamPrinter {
    last_sender: String,
    content: String,
}

impl StreamPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prints one chunk. Returns the final response once a chunk carries it.
    pub fn handle<W: Write>(&mut self, chunk: Chunk, out: &mut W) -> Result<Option<Response>> {
        if let Some(sender) = chunk.sender {
            self.last_sender = sender;
        }

        if let Some(fragment) = chunk.content {
            if self.content.is_empty() && !self.last_sender.is_empty() {
                write!(
                    out,
                    "{} ",
                    style(format!("{}:", self.last_sender)).blue().bright()
                )?;
                self.last_sender.clear();
            }
            write!(out, "{fragment}")?;
            out.flush()?;
            self.content.push_str(&fragment);
        }

        for call in chunk.tool_calls.unwrap_or_default() {
            let Some(name) = call.name.filter(|n| !n.is_empty()) else {
                continue;
            };
            writeln!(
                out,
                "{}{}()",
                style(format!("{}: ", self.last_sender)).blue().bright(),
                style(name).magenta().bright()
            )?;
        }

        if chunk.delim == Some(Delim::End) && !self.content.is_empty() {
            writeln!(out)?;
            self.content.clear();
        }

        Ok(chunk.response)
    }

    pub fn pending_content(&self) -> &str {
        &self.content
    }
}

/// Echoes a chunk stream as it arrives and returns its terminal response.
///
/// Chunks after the one carrying the response are never polled.
pub async fn print_streaming_response<S, W>(mut chunks: S, out: &mut W) -> Result<Response>
where
    S: Stream<Item = Result<Chunk>> + Unpin,
    W: Write,
{
    let mut printer = StreamPrinter::new();

    while let Some(chunk) = chunks.next().await {
        if let Some(response) = printer.handle(chunk?, out)? {
            return Ok(response);
        }
    }

    bail!("response stream ended without a final response")
}

pub fn pretty_print_messages<W: Write>(messages: &[ChatMessage], out: &mut W) -> Result<()> {
    for message in messages {
        if !message.is_assistant() {
            continue;
        }

        let sender = message
            .sender
            .as_deref()
            .context("assistant message has no sender")?;
        write!(out, "{}: ", style(sender).blue().bright())?;

        if !message.content_or_empty().is_empty() {
            writeln!(out, "{}", message.content_or_empty())?;
        }

        let tool_calls = message.tool_calls();
        if tool_calls.len() > 1 {
            writeln!(out)?;
        }
        for call in tool_calls {
            writeln!(
                out,
                "{}({})",
                style(&call.name).magenta().bright(),
                format_arguments(&call.arguments)?
            )?;
        }
    }

    out.flush()?;
    Ok(())
}

/// Renders a JSON object of tool arguments as `key=value, key=value`.
pub fn format_arguments(arguments: &str) -> Result<String> {
    if arguments.trim().is_empty() {
        return Ok(String::new());
    }

    let value: serde_json::Value = serde_json::from_str(arguments)
        .with_context(|| format!("Tool arguments are not valid JSON: {arguments}"))?;

    let serde_json::Value::Object(map) = value else {
        bail!("Tool arguments must be a JSON object, got: {arguments}");
    };

    Ok(map
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(", "))
}
