use crate::traits::ProviderEvent;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use std::fmt::Display;
use tokio_stream::wrappers::ReceiverStream;

/// Splits a byte stream into lines. Bytes are decoded only once a whole line
/// is in, so multi-byte characters split across network chunks survive.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    bytes: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.bytes.extend_from_slice(chunk);

        let mut lines = vec![];
        while let Some(pos) = self.bytes.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.bytes.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..pos]).into_owned());
        }
        lines
    }

    /// Whatever trailed the last newline, if anything.
    pub(crate) fn finish(self) -> Option<String> {
        if self.bytes.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            Some(String::from_utf8_lossy(&self.bytes).into_owned())
        }
    }
}

/// Wire-format specific half of a streaming response.
pub(crate) trait LineParser: Send + 'static {
    /// Events for one line. `Done` stops reading, `Error` ends the stream.
    fn parse_line(&mut self, line: &str) -> Vec<ProviderEvent>;

    /// Events held back until the body is fully read.
    fn finish(&mut self) -> Vec<ProviderEvent> {
        vec![]
    }
}

enum Flow {
    Continue,
    Stop,
    Closed,
}

async fn forward(
    tx: &tokio::sync::mpsc::Sender<ProviderEvent>,
    events: Vec<ProviderEvent>,
) -> Flow {
    let mut flow = Flow::Continue;
    for event in events {
        match event {
            ProviderEvent::Done => flow = Flow::Stop,
            ProviderEvent::Error(_) => {
                let _ = tx.send(event).await;
                return Flow::Closed;
            }
            event => {
                if tx.send(event).await.is_err() {
                    return Flow::Closed;
                }
            }
        }
    }
    flow
}

/// Drives `body` through `parser` on a spawned task.
///
/// The returned stream ends with exactly one `Done` on success, or with an
/// `Error` when the transport fails or the server reports an error.
pub(crate) fn spawn_line_stream<S, B, E, P>(body: S, mut parser: P) -> BoxStream<'static, ProviderEvent>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Display + Send,
    P: LineParser,
{
    let (tx, rx) = tokio::sync::mpsc::channel::<ProviderEvent>(256);

    tokio::spawn(async move {
        let mut body = Box::pin(body);
        let mut lines = LineBuffer::default();

        'read: while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::warn!("Stream interrupted: {}", e);
                    let _ = tx
                        .send(ProviderEvent::Error(format!("stream interrupted: {e}")))
                        .await;
                    return;
                }
            };

            for line in lines.push(chunk.as_ref()) {
                match forward(&tx, parser.parse_line(&line)).await {
                    Flow::Continue => {}
                    Flow::Stop => break 'read,
                    Flow::Closed => return,
                }
            }
        }

        if let Some(rest) = std::mem::take(&mut lines).finish()
            && let Flow::Closed = forward(&tx, parser.parse_line(&rest)).await
        {
            return;
        }
        if let Flow::Closed = forward(&tx, parser.finish()).await {
            return;
        }
        let _ = tx.send(ProviderEvent::Done).await;
    });

    Box::pin(ReceiverStream::new(rx))
}
