//! Slash commands read from stdin.

use crate::{
    automation::{Mode, UnknownMode},
    engine::{Mailbox, Status},
};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::watch,
};
use tracing::debug;

struct CommandDef {
    usage: &'static str,
    desc: &'static str,
}

const COMMANDS: [CommandDef; 6] = [
    CommandDef {
        usage: "/mode <idle|top1|top3|top5|top25>",
        desc: "Select how many squares to target",
    },
    CommandDef {
        usage: "/dryrun <on|off>",
        desc: "Log deployments instead of submitting them",
    },
    CommandDef {
        usage: "/amount <sol>",
        desc: "Set the stake per targeted square",
    },
    CommandDef {
        usage: "/status",
        desc: "Show the current round and rankings",
    },
    CommandDef {
        usage: "/help",
        desc: "Show this list",
    },
    CommandDef {
        usage: "/quit",
        desc: "Exit",
    },
];

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Action {
    Mode(Mode),
    DryRun(bool),
    Amount(f64),
    Status,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq)]
pub enum ControlError {
    #[error("unknown command: {0} (try /help)")]
    UnknownCommand(String),
    #[error("usage: {0}")]
    MissingArgument(&'static str),
    #[error(transparent)]
    UnknownMode(#[from] UnknownMode),
    #[error("expected on or off, got {0}")]
    InvalidToggle(String),
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(f64),
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<Action>, ControlError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or_default();
    let argument = parts.next();

    let action = match command.trim_start_matches('/').to_ascii_lowercase().as_str() {
        "mode" => {
            let mode = argument.ok_or(ControlError::MissingArgument(COMMANDS[0].usage))?;
            Action::Mode(mode.parse()?)
        }
        "dryrun" => {
            let toggle = argument.ok_or(ControlError::MissingArgument(COMMANDS[1].usage))?;
            match toggle.to_ascii_lowercase().as_str() {
                "on" | "true" | "1" => Action::DryRun(true),
                "off" | "false" | "0" => Action::DryRun(false),
                _ => return Err(ControlError::InvalidToggle(toggle.to_string())),
            }
        }
        "amount" => {
            let amount = argument.ok_or(ControlError::MissingArgument(COMMANDS[2].usage))?;
            let value = amount
                .parse::<f64>()
                .map_err(|_| ControlError::InvalidAmount(amount.to_string()))?;
            if !value.is_finite() {
                return Err(ControlError::InvalidAmount(amount.to_string()));
            }
            if value <= 0.0 {
                return Err(ControlError::NonPositiveAmount(value));
            }
            Action::Amount(value)
        }
        "status" => Action::Status,
        "help" => Action::Help,
        "quit" | "exit" => Action::Quit,
        _ => return Err(ControlError::UnknownCommand(command.to_string())),
    };
    Ok(Some(action))
}

pub fn help() -> String {
    COMMANDS
        .iter()
        .map(|command| format!("  {:<36} {}", command.usage, command.desc))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Read commands from stdin until `/quit` or end of input.
///
/// Returns `true` if the user asked to quit.
pub async fn run(mut mailbox: Mailbox, status: watch::Receiver<Status>) -> bool {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", help());
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("stdin closed; control surface disabled");
                return false;
            }
            Err(e) => {
                debug!(error = %e, "failed to read stdin; control surface disabled");
                return false;
            }
        };
        let action = match parse(&line) {
            Ok(Some(action)) => action,
            Ok(None) => continue,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        match action {
            Action::Mode(mode) => {
                mailbox.set_mode(mode).await;
                println!("mode set to {mode}");
            }
            Action::DryRun(dry_run) => {
                mailbox.set_dry_run(dry_run).await;
                println!("dry run {}", if dry_run { "on" } else { "off" });
            }
            Action::Amount(amount) => {
                mailbox.set_amount(amount).await;
                println!("stake per target set to {amount} SOL");
            }
            Action::Status => println!("{}", *status.borrow()),
            Action::Help => println!("{}", help()),
            Action::Quit => return true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse("/mode top5"), Ok(Some(Action::Mode(Mode::Top5))));
        assert_eq!(parse("  /MODE Idle "), Ok(Some(Action::Mode(Mode::Idle))));
        assert_eq!(parse("/dryrun off"), Ok(Some(Action::DryRun(false))));
        assert_eq!(parse("/dryrun ON"), Ok(Some(Action::DryRun(true))));
        assert_eq!(parse("/amount 0.25"), Ok(Some(Action::Amount(0.25))));
        assert_eq!(parse("/status"), Ok(Some(Action::Status)));
        assert_eq!(parse("/help"), Ok(Some(Action::Help)));
        assert_eq!(parse("/quit"), Ok(Some(Action::Quit)));
        assert_eq!(parse("   "), Ok(None));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(
            parse("/deploy 7"),
            Err(ControlError::UnknownCommand("/deploy".into()))
        );
        assert_eq!(
            parse("/mode top2"),
            Err(ControlError::UnknownMode(UnknownMode("top2".into())))
        );
        assert!(matches!(
            parse("/mode"),
            Err(ControlError::MissingArgument(_))
        ));
        assert_eq!(
            parse("/dryrun maybe"),
            Err(ControlError::InvalidToggle("maybe".into()))
        );
    }

    #[test]
    fn test_parse_rejects_bad_amounts() {
        assert_eq!(
            parse("/amount abc"),
            Err(ControlError::InvalidAmount("abc".into()))
        );
        assert_eq!(
            parse("/amount NaN"),
            Err(ControlError::InvalidAmount("NaN".into()))
        );
        assert_eq!(
            parse("/amount inf"),
            Err(ControlError::InvalidAmount("inf".into()))
        );
        assert_eq!(parse("/amount 0"), Err(ControlError::NonPositiveAmount(0.0)));
        assert_eq!(
            parse("/amount -1.5"),
            Err(ControlError::NonPositiveAmount(-1.5))
        );
    }

    #[test]
    fn test_help_lists_every_command() {
        let help = help();
        for command in ["/mode", "/dryrun", "/amount", "/status", "/help", "/quit"] {
            assert!(help.contains(command));
        }
    }
}
