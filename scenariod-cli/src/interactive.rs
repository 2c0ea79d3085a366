//! Scenario switching from stdin
//!
//! Each line typed while the controller runs is one command. A scenario name
//! is forwarded to the orchestrator as a switch request.

use std::collections::BTreeSet;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One line of interactive input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Switch to the named scenario
    Switch(String),
    /// Print the scenario names
    List,
    /// Print the available commands
    Help,
    /// Stop the controller
    Quit,
    /// Blank line
    Empty,
}

/// Parse one line; anything that is not a keyword is a scenario name
pub fn parse_command(line: &str) -> Command {
    match line.trim() {
        "" => Command::Empty,
        "list" | "ls" => Command::List,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        name => Command::Switch(name.to_string()),
    }
}

const HELP: &str = "Commands:
  <scenario>   switch to a scenario
  list         show scenario names
  help         show this message
  quit         stop the controller";

/// Read commands from stdin until EOF or `cancel`
///
/// Known scenario names go out on the returned channel. Unknown names are
/// reported and dropped. `quit` cancels `cancel`.
pub fn spawn_stdin_reader(
    names: BTreeSet<String>,
    cancel: CancellationToken,
) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(8);

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        println!("Type a scenario name to switch, 'help' for commands");

        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => break,
                line = lines.next_line() => line,
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => {
                    tracing::debug!("stdin closed, no more switches");
                    break;
                }
                Err(e) => {
                    tracing::warn!("Failed to read stdin: {}", e);
                    break;
                }
            };

            match parse_command(&line) {
                Command::Empty => {}
                Command::Help => println!("{}", HELP),
                Command::List => {
                    for name in &names {
                        println!("  {}", name);
                    }
                }
                Command::Quit => {
                    cancel.cancel();
                    break;
                }
                Command::Switch(name) => {
                    if !names.contains(&name) {
                        eprintln!("Unknown scenario: {} (type 'list' to see them)", name);
                        continue;
                    }
                    if tx.send(name).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    rx
}
