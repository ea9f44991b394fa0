//! Line-oriented terminal front end. Reads the store only through snapshots and drives
//! the agent with submits, stops, model switches and clears.

use log::{ error, info };
use std::error::Error;
use std::io::Write;
use tokio::io::{ AsyncBufReadExt, BufReader };
use tokio_util::sync::CancellationToken;

use crate::agent::{ ChatAgent, GenerationOutcome };
use crate::error::ChatError;
use crate::history::Snapshot;
use crate::models::chat::Role;

const HELP: &str =
    "Commands: /models, /model <name>, /clear, /help, /quit. Ctrl-C stops a running answer.";

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Quit,
    Help,
    Clear,
    Models,
    Model(&'a str),
    Say(&'a str),
}

fn parse_command(line: &str) -> Command<'_> {
    let trimmed = line.trim();
    match trimmed.split_once(char::is_whitespace) {
        Some(("/model", name)) => Command::Model(name.trim()),
        _ =>
            match trimmed {
                "/quit" | "/exit" => Command::Quit,
                "/help" => Command::Help,
                "/clear" => Command::Clear,
                "/models" => Command::Models,
                "/model" => Command::Model(""),
                _ => Command::Say(line),
            }
    }
}

/// Tracks how much of the assistant message under construction has been printed.
#[derive(Debug, Default)]
struct StreamView {
    id: Option<String>,
    printed: String,
    closed: bool,
}

impl StreamView {
    /// Text to write for the latest snapshot, if any.
    fn update(&mut self, snap: &Snapshot) -> Option<String> {
        let last = snap.messages.last()?;
        if last.role != Role::Assistant {
            return None;
        }
        let same = self.id.as_deref() == Some(last.id.as_str());
        if !same {
            if !last.streaming {
                return None;
            }
            self.id = Some(last.id.clone());
            self.printed.clear();
            self.closed = false;
        }
        if self.closed {
            return None;
        }

        let mut out = match last.content.strip_prefix(self.printed.as_str()) {
            Some(rest) => rest.to_string(),
            // Replaced wholesale, e.g. by an error.
            None => format!("\n{}", last.content),
        };
        self.printed = last.content.clone();
        if !last.streaming {
            self.closed = true;
            out.push('\n');
        }
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }
}

fn emit(text: &str) {
    let mut stdout = std::io::stdout();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}

fn print_last(agent: &ChatAgent) {
    if let Some(msg) = agent.store().messages().last() {
        println!("{}", msg.content);
    }
}

pub async fn run_console(mut agent: ChatAgent) -> Result<(), Box<dyn Error + Send + Sync>> {
    for msg in agent.store().messages() {
        match msg.role {
            Role::User => println!("> {}", msg.content),
            _ => println!("{}", msg.content),
        }
    }
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        emit(&format!("[{}] > ", agent.selected_model()));
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        match parse_command(&line) {
            Command::Quit => {
                break;
            }
            Command::Help => println!("{}", HELP),
            Command::Clear => {
                agent.clear_history()?;
                print_last(&agent);
            }
            Command::Models => {
                let selected = agent.selected_model().to_string();
                for model in agent.refresh_models().await {
                    let marker = if model.name == selected { "*" } else { " " };
                    println!("{} {} ({})", marker, model.name, model.display_size());
                }
            }
            Command::Model(name) =>
                match agent.select_model(name) {
                    Ok(true) => print_last(&agent),
                    Ok(false) => println!("Already using {}", name),
                    Err(e) => println!("{}", e),
                }
            Command::Say(text) =>
                match stream_answer(&mut agent, text).await {
                    Ok(outcome) => info!("Generation ended: {:?}", outcome),
                    Err(ChatError::EmptyMessage) => {}
                    Err(e) => error!("{}", e),
                }
        }
    }

    agent.store().flush().await;
    Ok(())
}

async fn stream_answer(agent: &mut ChatAgent, text: &str) -> Result<GenerationOutcome, ChatError> {
    let cancel = CancellationToken::new();
    let mut rx = agent.subscribe();
    let mut view = StreamView::default();

    let outcome = {
        let submit = agent.submit(text, cancel.clone());
        tokio::pin!(submit);
        loop {
            tokio::select! {
                outcome = &mut submit => break outcome?,
                changed = rx.changed() => {
                    if changed.is_ok() {
                        if let Some(out) = view.update(&rx.borrow_and_update()) {
                            emit(&out);
                        }
                    }
                }
                _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                    cancel.cancel();
                }
            }
        }
    };

    if let Some(out) = view.update(&rx.borrow_and_update()) {
        emit(&out);
    }
    if outcome == GenerationOutcome::Cancelled {
        println!("[stopped]");
    }
    Ok(outcome)
}
