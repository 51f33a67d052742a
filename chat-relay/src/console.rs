//! Operator console for the relay process.
//!
//! Stdin is read on a dedicated OS thread so a pending read never holds up
//! runtime shutdown; lines reach the async side over a channel.

use std::{io::BufRead, thread};

use tokio::{select, sync::mpsc};
use tracing::{info, warn};

#[derive(Debug, PartialEq, Eq)]
pub enum OperatorCommand {
    Exit,
    Blank,
    Unknown(String),
}

impl OperatorCommand {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            OperatorCommand::Blank
        } else if trimmed.eq_ignore_ascii_case("exit") {
            OperatorCommand::Exit
        } else {
            OperatorCommand::Unknown(trimmed.to_string())
        }
    }
}

/// Forwards stdin lines until EOF or a read error, then closes the channel.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(error) => {
                    warn!(?error, "failed to read console input");
                    break;
                }
            }
        }
    });
    rx
}

/// Resolves once the operator types `exit` or presses ctrl-c.
///
/// When the console input closes, only ctrl-c is left to end the wait.
pub async fn wait_for_exit(mut lines: mpsc::UnboundedReceiver<String>) {
    loop {
        select! {
            line = lines.recv() => match line {
                Some(line) => match OperatorCommand::parse(&line) {
                    OperatorCommand::Exit => {
                        info!("exit requested from console");
                        return;
                    }
                    OperatorCommand::Blank => {}
                    OperatorCommand::Unknown(command) => {
                        warn!(%command, "unknown console command; type 'exit' to stop");
                    }
                },
                None => {
                    info!("console input closed; press ctrl-c to stop");
                    break;
                }
            },
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                return;
            }
        }
    }

    handle_ctrl_c(tokio::signal::ctrl_c().await);
}

fn handle_ctrl_c(result: std::io::Result<()>) {
    match result {
        Ok(()) => info!("ctrl-c received"),
        Err(error) => warn!(?error, "failed to install ctrl-c handler"),
    }
}
