use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};
use std::thread;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::ChatError;
use crate::model::Message;
use crate::session::ChatSession;
use crate::transport::ChatTransport;

const FAREWELL: &str = "Exiting chat. Goodbye!";

pub async fn run_repl<T>(mut session: ChatSession<T>, cfg: &Config) -> Result<()>
where
    T: ChatTransport,
{
    println!("parley chat");
    println!("model: {}", cfg.generation.model);
    println!("api base url: {}", cfg.base_url);
    println!(
        "type a message, '/history' to inspect the conversation, '/reset' to start over, or 'exit' to quit"
    );

    let mut lines = spawn_stdin_reader();
    let interrupted = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };
    tokio::pin!(interrupted);

    loop {
        print!("You: ");
        io::stdout().flush().context("Failed to flush stdout")?;

        let line = tokio::select! {
            line = lines.recv() => line,
            _ = &mut interrupted => {
                println!();
                break;
            }
        };
        let Some(line) = line else {
            println!();
            break;
        };
        let input = line.context("Failed to read stdin")?;

        let prompt = input.trim();
        if prompt.is_empty() {
            continue;
        }
        if is_exit_command(prompt) {
            break;
        }
        if prompt.eq_ignore_ascii_case("/reset") {
            session.reset();
            println!("conversation reset\n");
            continue;
        }
        if prompt.eq_ignore_ascii_case("/history") {
            print_history(session.history());
            continue;
        }

        println!("Thinking...");
        tokio::select! {
            result = send_and_print(&mut session, prompt) => match result {
                Ok(()) => println!(),
                Err(err) => print_failure(&err),
            },
            _ = &mut interrupted => {
                println!();
                info!("chat interrupted during an exchange");
                break;
            }
        }
    }

    println!("{FAREWELL}");
    Ok(())
}

/// Reads stdin on a dedicated thread so a pending read never blocks shutdown.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<io::Result<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let failed = line.is_err();
            if tx.send(line).is_err() || failed {
                break;
            }
        }
    });
    rx
}

fn is_exit_command(prompt: &str) -> bool {
    prompt.eq_ignore_ascii_case("exit") || prompt.eq_ignore_ascii_case("quit")
}

/// Sends one prompt, printing the reply live when streaming.
pub async fn send_and_print<T>(session: &mut ChatSession<T>, prompt: &str) -> Result<(), ChatError>
where
    T: ChatTransport,
{
    if session.generation().stream {
        print!("Assistant: ");
        let mut printed_any = false;
        let mut print_delta = |delta: &str| {
            printed_any = true;
            print!("{delta}");
            let _ = io::stdout().flush();
        };
        let result = session.send_with_observer(prompt, &mut print_delta).await;
        if printed_any || result.is_ok() {
            println!();
        }
        result.map(|_| ())
    } else {
        let answer = session.send(prompt).await?;
        println!("Assistant: {answer}");
        Ok(())
    }
}

fn print_failure(err: &ChatError) {
    eprintln!("error [{}]: {}", err.kind(), err);
    eprintln!("There was an error getting a response. Please try again.\n");
}

fn print_history(history: &[Message]) {
    for (idx, msg) in history.iter().enumerate() {
        println!("[{}] {}: {}", idx, msg.role.as_str(), msg.content);
    }
    println!();
}
