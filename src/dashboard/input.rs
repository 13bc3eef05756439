use std::io::{self, BufRead};
use std::str::FromStr;
use std::thread;

use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Line commands read from stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add { symbol: String, quantity: Decimal },
    Remove(String),
    Clear,
    /// Mark every cached value for refresh.
    Refresh,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}' (try add, remove, clear, refresh, quit)")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("invalid quantity '{0}'")]
    Quantity(String),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err(CommandError::Empty);
        };
        let args: Vec<&str> = words.collect();

        match (verb.to_ascii_lowercase().as_str(), args.as_slice()) {
            ("add", [symbol, quantity]) => {
                let quantity = Decimal::from_str(quantity)
                    .map_err(|_| CommandError::Quantity(quantity.to_string()))?;
                Ok(Command::Add {
                    symbol: symbol.to_uppercase(),
                    quantity,
                })
            }
            ("add", _) => Err(CommandError::Usage("add SYMBOL QUANTITY")),
            ("remove" | "rm", [symbol]) => Ok(Command::Remove(symbol.to_uppercase())),
            ("remove" | "rm", _) => Err(CommandError::Usage("remove SYMBOL")),
            ("clear", []) => Ok(Command::Clear),
            ("refresh", []) => Ok(Command::Refresh),
            ("quit" | "exit" | "q", []) => Ok(Command::Quit),
            (other, _) => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

/// Forward parsed lines until EOF or the dashboard goes away. Blocking;
/// run it on its own thread.
pub fn read_commands<R: BufRead>(reader: R, tx: &mpsc::Sender<Command>) -> io::Result<()> {
    for line in reader.lines() {
        let line = line?;
        match line.parse::<Command>() {
            Ok(command) => {
                debug!(?command, "command");
                if tx.blocking_send(command).is_err() {
                    break;
                }
            }
            Err(CommandError::Empty) => {}
            Err(e) => warn!(input = %line.trim(), "{e}"),
        }
    }
    Ok(())
}

/// Reads stdin on a dedicated thread, so a pending read never holds up
/// runtime shutdown.
pub fn spawn_stdin_reader(tx: mpsc::Sender<Command>) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new().name("stdin-commands".to_string()).spawn(move || {
        if let Err(e) = read_commands(io::stdin().lock(), &tx) {
            warn!(error = %e, "stdin closed with error");
        }
    })
}
