//! The interactive chat session: pick a model, set a role, chat, summarize.

use std::io::{BufRead, Write};

use colored::Colorize;
use tracing::{debug, info};

use crate::cli::{Config, EXIT_COMMAND, MODEL_FAMILY_MARKER, SUMMARY_BUDGET};
use crate::errors::{ApiError, SessionError};
use crate::openai::{ChatRequest, CompletionApi, Fragments};
use crate::transcript::{Message, Summary, Transcript};

/// Prompt/response plumbing over any line reader and writer.
///
/// The binary wires this to stdin/stdout; tests use in-memory buffers.
pub struct Console<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Console<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Console { input, output }
    }

    #[cfg(test)]
    fn into_output(self) -> W {
        self.output
    }

    /// Print `prompt` and read one line without its line ending.
    fn read_line(&mut self, prompt: &str) -> Result<String, SessionError> {
        write!(self.output, "{prompt}")?;
        self.output.flush()?;
        let mut input = String::new();
        if self.input.read_line(&mut input)? == 0 {
            return Err(SessionError::InputClosed);
        }
        let len = input.trim_end_matches(['\n', '\r']).len();
        input.truncate(len);
        Ok(input)
    }

    fn say(&mut self, text: &str) -> Result<(), SessionError> {
        writeln!(self.output, "{text}")?;
        Ok(())
    }

    fn warn(&mut self, text: &str) -> Result<(), SessionError> {
        writeln!(self.output, "{}", text.red())?;
        Ok(())
    }
}

/// Chat model ids offered by the API, sorted by name.
pub fn available_models(api: &dyn CompletionApi) -> Result<Vec<String>, SessionError> {
    let mut models: Vec<String> = api
        .list_models()?
        .into_iter()
        .filter(|id| id.contains(MODEL_FAMILY_MARKER))
        .collect();
    models.sort();
    debug!(count = models.len(), "chat models available");
    if models.is_empty() {
        return Err(SessionError::NoModels);
    }
    Ok(models)
}

/// Ask the user to pick one of `models` by index; an empty answer picks `default_model`.
pub fn choose_model<R: BufRead, W: Write>(
    console: &mut Console<R, W>,
    models: &[String],
    default_model: &str,
) -> Result<String, SessionError> {
    console.say("Enter the number of the model to chat with, then press Enter.")?;
    for (num, model) in models.iter().enumerate() {
        console.say(&format!("{num}: {model}"))?;
    }

    loop {
        let input = console.read_line(&format!(
            "Press Enter without a number to use {default_model}: "
        ))?;
        let input = input.trim();
        if input.is_empty() {
            return Ok(default_model.to_string());
        }
        if !input.chars().all(|c| c.is_ascii_digit()) {
            console.warn("Please enter a number.")?;
            continue;
        }
        match input.parse::<usize>().ok().and_then(|i| models.get(i)) {
            Some(model) => return Ok(model.clone()),
            None => console.warn("That number is not in the list.")?,
        }
    }
}

/// Ask for an optional persona for the assistant.
pub fn ask_system_role<R: BufRead, W: Write>(
    console: &mut Console<R, W>,
) -> Result<Option<String>, SessionError> {
    console.say(&format!(
        "\nStarting a chat with the assistant. Type {EXIT_COMMAND} to end the chat."
    ))?;
    let role = console.read_line(
        "If the assistant should play a role, describe it.\nOtherwise just press Enter: ",
    )?;
    if role.trim().is_empty() {
        Ok(None)
    } else {
        Ok(Some(role))
    }
}

/// Read the next non-empty user prompt.
pub fn read_user_prompt<R: BufRead, W: Write>(
    console: &mut Console<R, W>,
) -> Result<String, SessionError> {
    loop {
        let prompt = console.read_line(&format!("\n{}", "You: ".cyan()))?;
        if !prompt.trim().is_empty() {
            return Ok(prompt);
        }
        console.say("Please enter a prompt.")?;
    }
}

/// Print an assistant reply as it arrives and return the full text.
pub fn print_reply<R: BufRead, W: Write>(
    console: &mut Console<R, W>,
    fragments: Fragments,
) -> Result<String, SessionError> {
    write!(console.output, "\n{}", "Assistant: ".green())?;
    let mut reply = String::new();
    for fragment in fragments {
        let fragment = fragment?;
        write!(console.output, "{fragment}")?;
        console.output.flush()?;
        reply.push_str(&fragment);
    }
    writeln!(console.output)?;
    Ok(reply)
}

/// Run the chat loop until the user types the exit command.
pub fn chat<R: BufRead, W: Write>(
    api: &dyn CompletionApi,
    console: &mut Console<R, W>,
    model: &str,
    stream: bool,
) -> Result<Transcript, SessionError> {
    let mut transcript = Transcript::new();
    if let Some(role) = ask_system_role(console)? {
        transcript.push(Message::system(role));
    }

    loop {
        let prompt = read_user_prompt(console)?;
        if prompt.trim() == EXIT_COMMAND {
            break;
        }
        transcript.push(Message::user(prompt));

        let request = ChatRequest {
            model,
            messages: transcript.messages(),
            stream,
            max_tokens: None,
        };
        let fragments = api.chat(&request)?;
        let reply = print_reply(console, fragments)?;
        transcript.push(Message::assistant(reply));
    }
    Ok(transcript)
}

/// Ask the model for a title of at most [`SUMMARY_BUDGET`] characters for `prompt`.
pub fn summarize(
    api: &dyn CompletionApi,
    model: &str,
    prompt: &str,
) -> Result<Summary, ApiError> {
    let messages = [
        Message::system(format!(
            "You summarize the user's request. Summarize the following request in at most \
             {SUMMARY_BUDGET} characters. Reply with the summary only."
        )),
        Message::user(prompt),
    ];
    let request = ChatRequest {
        model,
        messages: &messages,
        stream: false,
        max_tokens: Some(SUMMARY_BUDGET as u32),
    };
    let text = api.chat(&request)?.collect_text()?;
    let summary = Summary::truncated(&text, SUMMARY_BUDGET);
    debug!(raw = %text, summary = %summary, "summarized session");
    Ok(summary)
}

/// Run a whole chat session and hand back what should be exported.
pub fn run_session<R: BufRead, W: Write>(
    api: &dyn CompletionApi,
    config: &Config,
    console: &mut Console<R, W>,
) -> Result<(Transcript, Summary), SessionError> {
    let models = available_models(api)?;
    let model = choose_model(console, &models, &config.default_model)?;
    info!(%model, "starting chat");

    let transcript = chat(api, console, &model, config.stream)?;
    info!(messages = transcript.len(), "chat ended");
    if transcript.is_empty() {
        return Err(SessionError::EmptyTranscript);
    }

    let summary = match transcript.first_user_prompt() {
        Some(prompt) => summarize(api, &config.default_model, prompt)?,
        None => Summary::default(),
    };
    Ok((transcript, summary))
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;
    use crate::transcript::Role;

    struct Request {
        model: String,
        messages: Vec<Message>,
        stream: bool,
        max_tokens: Option<u32>,
    }

    /// Replays canned replies and records every chat request.
    struct ScriptedApi {
        models: Result<Vec<String>, fn() -> ApiError>,
        replies: RefCell<VecDeque<String>>,
        requests: RefCell<Vec<Request>>,
    }

    impl ScriptedApi {
        fn new(models: &[&str], replies: &[&str]) -> Self {
            ScriptedApi {
                models: Ok(models.iter().map(|m| m.to_string()).collect()),
                replies: RefCell::new(replies.iter().map(|r| r.to_string()).collect()),
                requests: RefCell::new(Vec::new()),
            }
        }

        fn failing(err: fn() -> ApiError) -> Self {
            ScriptedApi {
                models: Err(err),
                replies: RefCell::new(VecDeque::new()),
                requests: RefCell::new(Vec::new()),
            }
        }
    }

    impl CompletionApi for ScriptedApi {
        fn list_models(&self) -> Result<Vec<String>, ApiError> {
            match &self.models {
                Ok(models) => Ok(models.clone()),
                Err(err) => Err(err()),
            }
        }

        fn chat(&self, request: &ChatRequest<'_>) -> Result<Fragments, ApiError> {
            self.requests.borrow_mut().push(Request {
                model: request.model.to_string(),
                messages: request.messages.to_vec(),
                stream: request.stream,
                max_tokens: request.max_tokens,
            });
            let reply = self
                .replies
                .borrow_mut()
                .pop_front()
                .expect("no scripted reply left");
            let chunks: Vec<Result<String, ApiError>> =
                reply.chars().map(|c| Ok(c.to_string())).collect();
            Ok(Fragments::from_chunks(chunks))
        }
    }

    fn config() -> Config {
        Config {
            api_key: "sk-test".to_string(),
            base_url: "http://localhost".to_string(),
            default_model: "gpt-default".to_string(),
            workbook: PathBuf::from("chat_history.xlsx"),
            timeout: Duration::from_secs(5),
            stream: true,
            open_after_export: false,
        }
    }

    fn console(input: &str) -> Console<Cursor<Vec<u8>>, Vec<u8>> {
        Console::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    fn models() -> Vec<String> {
        ["gpt-3.5-turbo", "gpt-4", "gpt-4o"]
            .iter()
            .map(|m| m.to_string())
            .collect()
    }

    #[test]
    fn available_models_filters_and_sorts() {
        let api = ScriptedApi::new(&["whisper-1", "gpt-4o", "dall-e-3", "gpt-3.5-turbo"], &[]);
        assert_eq!(
            available_models(&api).unwrap(),
            vec!["gpt-3.5-turbo".to_string(), "gpt-4o".to_string()]
        );
    }

    #[test]
    fn available_models_without_chat_models_fails() {
        let api = ScriptedApi::new(&["whisper-1"], &[]);
        assert!(matches!(available_models(&api), Err(SessionError::NoModels)));
    }

    #[test]
    fn available_models_propagates_api_errors() {
        let api = ScriptedApi::failing(|| ApiError::Authentication);
        assert!(matches!(
            available_models(&api),
            Err(SessionError::Api(ApiError::Authentication))
        ));
    }

    #[test]
    fn choose_model_returns_indexed_entry() {
        for (index, expected) in models().iter().enumerate() {
            let mut console = console(&format!("{index}\n"));
            assert_eq!(
                &choose_model(&mut console, &models(), "gpt-default").unwrap(),
                expected
            );
        }
    }

    #[test]
    fn choose_model_empty_input_uses_default() {
        let mut console = console("\n");
        assert_eq!(
            choose_model(&mut console, &models(), "gpt-default").unwrap(),
            "gpt-default"
        );
    }

    #[test]
    fn choose_model_reprompts_on_bad_input() {
        let mut console = console("abc\n-1\n3\n99999999999999999999999\n1\n");
        let model = choose_model(&mut console, &models(), "gpt-default").unwrap();
        assert_eq!(model, "gpt-4");
        let output = String::from_utf8(console.into_output()).unwrap();
        assert_eq!(output.matches("Please enter a number.").count(), 2);
        assert_eq!(output.matches("That number is not in the list.").count(), 2);
    }

    #[test]
    fn choose_model_stops_when_input_closes() {
        let mut console = console("abc\n");
        assert!(matches!(
            choose_model(&mut console, &models(), "gpt-default"),
            Err(SessionError::InputClosed)
        ));
    }

    #[test]
    fn empty_prompts_are_never_recorded() {
        let api = ScriptedApi::new(&[], &["hello"]);
        let mut console = console("\n\n   \nhi\nexit()\n");
        let transcript = chat(&api, &mut console, "gpt-4o", true).unwrap();
        assert_eq!(
            transcript.messages(),
            &[Message::user("hi"), Message::assistant("hello")]
        );
        let output = String::from_utf8(console.into_output()).unwrap();
        assert_eq!(output.matches("Please enter a prompt.").count(), 2);
    }

    #[test]
    fn exit_as_first_input_yields_empty_transcript() {
        let api = ScriptedApi::new(&[], &[]);
        let mut console = console("\nexit()\n");
        let transcript = chat(&api, &mut console, "gpt-4o", true).unwrap();
        assert!(transcript.is_empty());
        assert!(api.requests.borrow().is_empty());
    }

    #[test]
    fn system_role_seeds_transcript_and_history_is_sent() {
        let api = ScriptedApi::new(&[], &["first", "second"]);
        let mut console = console("a pirate\none\ntwo\nexit()\n");
        let transcript = chat(&api, &mut console, "gpt-4o", false).unwrap();
        assert_eq!(
            transcript.messages(),
            &[
                Message::system("a pirate"),
                Message::user("one"),
                Message::assistant("first"),
                Message::user("two"),
                Message::assistant("second"),
            ]
        );

        let requests = api.requests.borrow();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].messages.len(), 2);
        assert_eq!(requests[1].messages.len(), 4);
        assert_eq!(requests[1].messages[3], Message::user("two"));
        assert!(requests.iter().all(|r| r.model == "gpt-4o" && !r.stream));
    }

    #[test]
    fn reply_is_printed_as_it_streams() {
        let api = ScriptedApi::new(&[], &["hello"]);
        let mut console = console("\nhi\nexit()\n");
        chat(&api, &mut console, "gpt-4o", true).unwrap();
        let output = String::from_utf8(console.into_output()).unwrap();
        assert!(output.contains("Assistant: "));
        assert!(output.contains("hello\n"));
    }

    #[test]
    fn summarize_truncates_long_replies() {
        let api = ScriptedApi::new(&[], &["A summary that is far too long"]);
        let summary = summarize(&api, "gpt-default", "tell me about the weather").unwrap();
        assert_eq!(summary.as_str(), "A summary…");

        let requests = api.requests.borrow();
        assert_eq!(requests[0].model, "gpt-default");
        assert_eq!(requests[0].max_tokens, Some(SUMMARY_BUDGET as u32));
        assert!(!requests[0].stream);
        assert_eq!(requests[0].messages[0].role, Role::System);
        assert_eq!(
            requests[0].messages[1],
            Message::user("tell me about the weather")
        );
    }

    #[test]
    fn run_session_returns_transcript_and_summary() {
        let api = ScriptedApi::new(&["gpt-4o", "tts-1"], &["sunny", "weather"]);
        let mut console = console("0\n\nhow is the weather\nexit()\n");
        let (transcript, summary) = run_session(&api, &config(), &mut console).unwrap();
        assert_eq!(transcript.len(), 2);
        assert_eq!(summary.as_str(), "weather");

        let requests = api.requests.borrow();
        assert_eq!(requests[0].model, "gpt-4o");
        assert_eq!(requests[1].model, "gpt-default");
    }

    #[test]
    fn run_session_with_nothing_said_is_an_error() {
        let api = ScriptedApi::new(&["gpt-4o"], &[]);
        let mut console = console("\n\nexit()\n");
        assert!(matches!(
            run_session(&api, &config(), &mut console),
            Err(SessionError::EmptyTranscript)
        ));
    }

    #[test]
    fn run_session_with_only_a_role_has_empty_summary() {
        let api = ScriptedApi::new(&["gpt-4o"], &[]);
        let mut console = console("\na pirate\nexit()\n");
        let (transcript, summary) = run_session(&api, &config(), &mut console).unwrap();
        assert_eq!(transcript.messages(), &[Message::system("a pirate")]);
        assert_eq!(summary, Summary::default());
        assert!(api.requests.borrow().is_empty());
    }
}
