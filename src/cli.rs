use std::{path::PathBuf, time::Duration};

use clap::Parser;

/// The model used when the user presses Enter at the model prompt, and for summaries.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
/// Input that ends the chat loop.
pub const EXIT_COMMAND: &str = "exit()";
/// Only model ids containing this marker are offered for chat.
pub const MODEL_FAMILY_MARKER: &str = "gpt";
/// Maximum number of characters in a session summary (and the worksheet title built from it).
pub const SUMMARY_BUDGET: usize = 10;
/// API root the client talks to unless `--base-url` says otherwise.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
/// Workbook path, relative to the working directory, that sessions are appended to.
pub const DEFAULT_WORKBOOK: &str = "chat_history.xlsx";

/// CLI for `chatlog`
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    /// API key for the chat completions service.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: String,
    /// Base URL of an OpenAI compatible API.
    #[arg(long, env = "CHATLOG_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,
    /// Model used when no model is picked, and for the session summary.
    #[arg(long, env = "CHATLOG_MODEL", default_value = DEFAULT_MODEL)]
    pub default_model: String,
    /// Workbook the conversation is appended to.
    #[arg(long, env = "CHATLOG_WORKBOOK", default_value = DEFAULT_WORKBOOK)]
    pub workbook: PathBuf,
    /// Seconds to wait for a single API request, including a streamed reply.
    #[arg(long, env = "CHATLOG_TIMEOUT", default_value_t = 300)]
    pub timeout_secs: u64,
    /// Wait for the full reply instead of printing it as it streams.
    #[arg(long)]
    pub no_stream: bool,
    /// Do not open the workbook after saving it.
    #[arg(long)]
    pub no_open: bool,
}

/// Settings passed explicitly into the API client, the chat session and the exporter.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub base_url: String,
    pub default_model: String,
    pub workbook: PathBuf,
    pub timeout: Duration,
    pub stream: bool,
    pub open_after_export: bool,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Config {
            api_key: args.api_key,
            base_url: args.base_url.trim_end_matches('/').to_string(),
            default_model: args.default_model,
            workbook: args.workbook,
            timeout: Duration::from_secs(args.timeout_secs),
            stream: !args.no_stream,
            open_after_export: !args.no_open,
        }
    }
}
