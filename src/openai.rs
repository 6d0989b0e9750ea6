//! Utilities for querying an OpenAI compatible API via the models and chat completions endpoints.
//!
//! For specific details on request/response schemas, see the [OpenAI API chat completions docs](https://platform.openai.com/docs/api-reference/chat/create).

use std::io::{self, BufRead, BufReader};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::cli::Config;
use crate::errors::ApiError;
use crate::transcript::Message;

/// A `chat/completions` request body
#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// A `models` list item
#[derive(Deserialize)]
pub struct ModelEntry {
    pub id: String,
}

/// A `models` response
#[derive(Deserialize)]
pub struct ModelList {
    pub data: Vec<ModelEntry>,
}

/// A `chat/completions` non-streaming response message
#[derive(Deserialize)]
pub struct ChatResponseMessage {
    pub content: Option<String>,
}

/// A `chat/completions` non-streaming response choice
#[derive(Deserialize)]
pub struct ChatChoice {
    pub message: ChatResponseMessage,
}

/// A `chat/completions` non-streaming response
#[derive(Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<ChatChoice>,
}

/// A `chat/completions` streaming response delta
#[derive(Deserialize)]
pub struct ChatDelta {
    pub content: Option<String>,
}

/// A `chat/completions` streaming response choice
#[derive(Deserialize)]
pub struct ChatStreamChoice {
    pub delta: ChatDelta,
}

/// A `chat/completions` streaming response
#[derive(Deserialize)]
pub struct ChatStreamResponse {
    pub choices: Vec<ChatStreamChoice>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// The pieces of one assistant reply, in order.
///
/// A streamed reply yields one item per server-sent chunk, a plain reply yields
/// its whole text once. Concatenating the items gives the full reply either way.
pub struct Fragments(Box<dyn Iterator<Item = Result<String, ApiError>>>);

impl Fragments {
    pub fn whole(content: String) -> Self {
        Fragments(Box::new(std::iter::once(Ok(content))))
    }

    pub fn streamed<R: BufRead + 'static>(reader: R) -> Self {
        Fragments(Box::new(SseStream {
            reader,
            line: String::new(),
            done: false,
        }))
    }

    #[cfg(test)]
    pub fn from_chunks<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Result<String, ApiError>>,
        I::IntoIter: 'static,
    {
        Fragments(Box::new(items.into_iter()))
    }

    /// Drain the reply into a single string.
    pub fn collect_text(self) -> Result<String, ApiError> {
        self.collect()
    }
}

impl Iterator for Fragments {
    type Item = Result<String, ApiError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next()
    }
}

/// One line of a server-sent event stream
#[derive(Debug, PartialEq, Eq)]
enum SseLine {
    Ignored,
    Done,
    Data(String),
}

fn classify_sse_line(line: &str) -> SseLine {
    let trimmed = line.trim();
    match trimmed.strip_prefix("data:") {
        Some(data) if data.trim() == "[DONE]" => SseLine::Done,
        Some(data) => SseLine::Data(data.trim().to_string()),
        None => SseLine::Ignored,
    }
}

/// Text carried by one streamed chunk, if any
fn chunk_content(data: &str) -> Result<Option<String>, ApiError> {
    let parsed: ChatStreamResponse = serde_json::from_str(data)?;
    Ok(parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty()))
}

/// A body read that ran out of time is a timeout, not a dropped connection.
fn read_error(err: io::Error) -> ApiError {
    let timed_out = err.kind() == io::ErrorKind::TimedOut
        || err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<reqwest::Error>())
            .is_some_and(reqwest::Error::is_timeout);
    if timed_out {
        ApiError::Timeout
    } else {
        ApiError::Read(err)
    }
}

struct SseStream<R> {
    reader: R,
    line: String,
    done: bool,
}

impl<R: BufRead> Iterator for SseStream<R> {
    type Item = Result<String, ApiError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => self.done = true,
                Ok(_) => match classify_sse_line(&self.line) {
                    SseLine::Ignored => continue,
                    SseLine::Done => self.done = true,
                    SseLine::Data(data) => match chunk_content(&data) {
                        Ok(Some(content)) => return Some(Ok(content)),
                        Ok(None) => continue,
                        Err(e) => {
                            self.done = true;
                            return Some(Err(e));
                        }
                    },
                },
                Err(e) => {
                    self.done = true;
                    return Some(Err(read_error(e)));
                }
            }
        }
        None
    }
}

/// Map a failed HTTP status and its body to the error shown to the user.
pub fn classify_status(status: u16, body: &str) -> ApiError {
    match status {
        401 | 403 => ApiError::Authentication,
        500 | 502 | 503 | 504 | 529 => ApiError::ServiceUnavailable { status },
        _ => {
            let message = serde_json::from_str::<ErrorBody>(body)
                .map(|b| b.error.message)
                .unwrap_or_else(|_| body.trim().to_string());
            ApiError::Api { status, message }
        }
    }
}

/// The two calls a chat session makes against the remote model service.
pub trait CompletionApi {
    /// Ids of every model the service offers.
    fn list_models(&self) -> Result<Vec<String>, ApiError>;

    /// Send a conversation and get the assistant reply back piece by piece.
    fn chat(&self, request: &ChatRequest<'_>) -> Result<Fragments, ApiError>;
}

/// Blocking client for the OpenAI chat completions API
pub struct OpenAiClient {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(OpenAiClient {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn check(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        debug!(status = status.as_u16(), body = %body, "API request failed");
        Err(classify_status(status.as_u16(), &body))
    }
}

impl CompletionApi for OpenAiClient {
    fn list_models(&self) -> Result<Vec<String>, ApiError> {
        let url = format!("{}/models", self.base_url);
        debug!(%url, "listing models");
        let response = self.client.get(&url).bearer_auth(&self.api_key).send()?;
        let models: ModelList = Self::check(response)?.json()?;
        Ok(models.data.into_iter().map(|m| m.id).collect())
    }

    fn chat(&self, request: &ChatRequest<'_>) -> Result<Fragments, ApiError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(
            %url,
            model = request.model,
            messages = request.messages.len(),
            stream = request.stream,
            "sending chat completion"
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()?;
        let response = Self::check(response)?;

        if request.stream {
            return Ok(Fragments::streamed(BufReader::new(response)));
        }
        let body = response.text()?;
        trace!(%body, "chat completion response");
        let parsed: ChatResponse = serde_json::from_str(&body)?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        Ok(Fragments::whole(content))
    }
}
