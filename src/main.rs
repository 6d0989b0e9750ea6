use std::io;

use clap::Parser;
use colored::Colorize;
use tracing_subscriber::{fmt, EnvFilter};

use chatlog::{
    cli::{Args, Config},
    errors::ChatlogError,
    export::{ensure_not_open, export},
    openai::OpenAiClient,
    session::{run_session, Console},
};

fn run(config: &Config) -> Result<(), ChatlogError> {
    ensure_not_open(&config.workbook)?;

    let client = OpenAiClient::new(config)?;
    let mut console = Console::new(io::stdin().lock(), io::stdout());
    let (transcript, summary) = run_session(&client, config, &mut console)?;

    let path = export(transcript, summary, config)?;
    println!("\nSaved the conversation to {}", path.display());
    Ok(())
}

fn main() {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_env("CHATLOG_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let config = Config::from(Args::parse());
    run(&config).unwrap_or_else(|e| {
        eprintln!("{}", e.to_string().red());
        std::process::exit(1);
    });
}
