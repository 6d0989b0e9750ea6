use std::path::PathBuf;

use thiserror::Error;

/// Where users can check whether the API itself is having trouble.
pub const STATUS_PAGE: &str = "https://status.openai.com";

/// Failures talking to the chat completions API
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("The API service is having trouble (HTTP {status}). Wait a little and try again. Service status: {}", STATUS_PAGE)]
    ServiceUnavailable { status: u16 },
    #[error("The request took too long, giving up. Wait a little and try again.")]
    Timeout,
    #[error("The API key was rejected. Check OPENAI_API_KEY.")]
    Authentication,
    #[error("The API returned an error (HTTP {status}): {message}")]
    Api { status: u16, message: String },
    #[error("Could not reach the API: {0}")]
    Transport(reqwest::Error),
    #[error("Could not understand the API response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Lost the connection while reading the reply: {0}")]
    Read(#[from] std::io::Error),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else {
            ApiError::Transport(err)
        }
    }
}

/// Failures that end a chat session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("No chat models were offered by the API.")]
    NoModels,
    #[error("Nothing to export, the conversation is empty.")]
    EmptyTranscript,
    #[error("Standard input was closed.")]
    InputClosed,
    #[error(transparent)]
    StdioError(#[from] std::io::Error),
}

/// Failures writing the conversation to the workbook
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("{} is open in another program, close it and start again.", .path.display())]
    WorkbookOpen { path: PathBuf },
    #[error("Failed to read workbook {}: {reason}", .path.display())]
    Read { path: PathBuf, reason: String },
    #[error("Failed to save workbook {}: {reason}", .path.display())]
    Write { path: PathBuf, reason: String },
    #[error("Failed to add worksheet {title:?}: {reason}")]
    Worksheet { title: String, reason: String },
    #[error(transparent)]
    StdioError(#[from] std::io::Error),
}

/// Chatlog Errors
#[derive(Debug, Error)]
pub enum ChatlogError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Api(#[from] ApiError),
}
