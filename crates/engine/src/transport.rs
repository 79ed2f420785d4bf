use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use tracing::{debug, error};

use parlance_shared::{Decoded, Message, StreamChunk, decode_line};

use crate::api::client::{CONVERSATIONS, error_for_status};
use crate::api::types::ChatRequest;
use crate::auth::AuthContext;
use crate::config::ApiConfig;
use crate::error::{ChatError, ChatResult};

/// Lazy, finite, single-use sequence of decoded stream chunks.
pub type ChunkStream = BoxStream<'static, ChatResult<StreamChunk>>;

/// Why a stream is being opened; echoed to the backend.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Trigger {
    /// A new user message was appended to the history.
    SubmitMessage,
    /// Answer the history as it stands (no new user message).
    RegenerateMessage,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open one streaming request for `conversation_id` carrying `messages`.
    async fn open(
        &self,
        conversation_id: Option<&str>,
        messages: &[Message],
        trigger: Trigger,
    ) -> ChatResult<ChunkStream>;
}

/// Streams replies from `POST /chat/conversations/{id}/messages`.
///
/// Holds nothing mutable besides what it was built with; every call is an
/// independent request. A dropped connection ends that stream for good.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: ApiConfig,
    auth: AuthContext,
}

impl HttpTransport {
    pub fn new(config: ApiConfig, auth: AuthContext) -> ChatResult<Self> {
        // No overall timeout: a reply may stream for a long time.
        let client = reqwest::Client::builder().cookie_store(true).build()?;
        Ok(Self {
            client,
            config,
            auth,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(
        &self,
        conversation_id: Option<&str>,
        messages: &[Message],
        trigger: Trigger,
    ) -> ChatResult<ChunkStream> {
        let conversation_id = conversation_id.filter(|id| !id.is_empty()).ok_or_else(|| {
            ChatError::Configuration("a conversation must be selected before sending".into())
        })?;

        let url = self
            .config
            .url(&format!("{CONVERSATIONS}/{conversation_id}/messages"));
        let body = ChatRequest {
            messages,
            id: conversation_id,
            trigger,
        };

        let mut request = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .json(&body);
        if let Some(token) = self.auth.token() {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| ChatError::transport(err.status(), err.to_string()))?;
        let response = error_for_status(response, None).await?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT || response.content_length() == Some(0) {
            return Err(ChatError::transport(Some(status), "response has no body"));
        }

        debug!(conversation_id, %status, "stream opened");
        Ok(chunk_stream(response.bytes_stream()))
    }
}

/// Splits raw body bytes into lines.
///
/// Bytes are buffered until a `\n` arrives, so a line (and any multi-byte
/// character in it) split across reads is reassembled before decoding.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning every line they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            lines.push(to_text(&line[..newline_pos]));
        }
        lines
    }

    /// The trailing line of a body that did not end with `\n`.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(to_text(&rest))
    }
}

fn to_text(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

/// Decode a body byte stream into chunks.
///
/// Malformed lines are dropped. A read error ends the sequence with
/// `ChatError::Transport`. A body that ends without a completion event
/// still yields a final `StreamChunk::Complete(None)`.
pub fn chunk_stream<S, B, E>(bytes: S) -> ChunkStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = Decoding {
        bytes: Box::pin(bytes),
        decoder: LineDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
        completed: false,
    };

    stream::unfold(state, |mut state| async move {
        let item = state.next_chunk().await?;
        Some((item, state))
    })
    .boxed()
}

struct Decoding<S> {
    bytes: Pin<Box<S>>,
    decoder: LineDecoder,
    pending: VecDeque<ChatResult<StreamChunk>>,
    finished: bool,
    completed: bool,
}

impl<S, B, E> Decoding<S>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    async fn next_chunk(&mut self) -> Option<ChatResult<StreamChunk>> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item);
            }
            if self.finished {
                return None;
            }

            match self.bytes.as_mut().next().await {
                Some(Ok(bytes)) => {
                    for line in self.decoder.push(bytes.as_ref()) {
                        self.decode(&line);
                    }
                }
                Some(Err(err)) => {
                    error!(error = %err, "stream read failed");
                    self.finished = true;
                    self.pending
                        .push_back(Err(ChatError::transport(None, err.to_string())));
                }
                None => {
                    if let Some(line) = self.decoder.finish() {
                        self.decode(&line);
                    }
                    if !self.completed {
                        self.completed = true;
                        self.pending.push_back(Ok(StreamChunk::Complete(None)));
                    }
                    self.finished = true;
                }
            }
        }
    }

    fn decode(&mut self, line: &str) {
        if self.finished {
            return;
        }

        match decode_line(line) {
            Ok(Decoded::Skip) => {}
            Ok(Decoded::Chunks(chunks)) => {
                for chunk in chunks {
                    let done = matches!(chunk, StreamChunk::Complete(_));
                    self.pending.push_back(Ok(chunk));
                    if done {
                        self.completed = true;
                        self.finished = true;
                        return;
                    }
                }
            }
            Ok(Decoded::ServerError(message)) => {
                error!(%message, "server reported a stream error");
                self.finished = true;
                self.pending
                    .push_back(Err(ChatError::transport(None, message)));
            }
            Err(err) => {
                let err = ChatError::Parse(err.to_string());
                debug!(error = %err, line, "dropping malformed stream line");
            }
        }
    }
}
