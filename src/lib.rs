//! # chatlog
//! Chat with an LLM from the terminal and keep every conversation in a spreadsheet.
//!
//! A command line program that lets you pick one of the chat models offered by an
//! OpenAI compatible API, optionally give the assistant a role, and chat with it.
//! When you type `exit()` the conversation is saved as a new worksheet at the front
//! of a local `.xlsx` workbook, titled with a short summary of your first prompt,
//! and the workbook is opened in your default spreadsheet application.
//!
//! ## Usage
//! ```shell
//! $ export OPENAI_API_KEY=sk-...
//! $ chatlog
//! ```
//!
//! ## Environment Variables:
//! - `OPENAI_API_KEY`: Required. The API key used for every request.
//! - `CHATLOG_BASE_URL`: Optional. Base URL of the API (default: `https://api.openai.com/v1`).
//! - `CHATLOG_MODEL`: Optional. Model used when none is picked and for summaries (default: gpt-4o-mini).
//! - `CHATLOG_WORKBOOK`: Optional. Workbook to append to (default: `chat_history.xlsx`).
//! - `CHATLOG_TIMEOUT`: Optional. Seconds to wait for one request (default: 300).
//! - `CHATLOG_LOG`: Optional. Log filter for diagnostics on stderr (default: `warn`).
//!
//! ## Notes:
//! - The run is aborted before chatting if the workbook is open in another program.
//! - API errors end the program; nothing is retried.
//!
pub mod cli;
pub mod errors;
pub mod export;
pub mod openai;
pub mod session;
pub mod transcript;
