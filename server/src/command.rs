//! Operator console commands
//!
//! One line of console input is split on whitespace and parsed by clap as
//! a subcommand, so `help` and per-command usage come for free. Every
//! command produces a single line (or block) of feedback for the operator.

use crate::session::Session;
use crate::settings::SettingKey;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug, PartialEq, Eq)]
#[command(name = "console", no_binary_name = true, disable_version_flag = true)]
struct CommandLine {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start a round, optionally with a fixed number of initial infected
    Start { infected: Option<usize> },
    /// Cancel the countdown or end the running round
    Stop,
    /// Switch to a preset by name
    Preset {
        #[arg(required = true, num_args = 1..)]
        name: Vec<String>,
    },
    /// Toggle automatic rounds
    Auto,
    /// Show or change a setting
    Set { name: String, value: Option<String> },
    /// List loaded presets
    Presets,
    /// Show the round state and player counts
    Status,
    /// Reload presets from disk
    Reload,
}

/// Parses one console line. The error carries clap's usage text.
pub fn parse(line: &str) -> Result<Command, String> {
    CommandLine::try_parse_from(line.split_whitespace())
        .map(|parsed| parsed.command)
        .map_err(|e| e.to_string().trim_end().to_string())
}

pub fn execute(session: &mut Session, command: Command) -> String {
    match command {
        Command::Start { infected } => session.request_start(infected.unwrap_or(0)),
        Command::Stop => session.stop(),
        Command::Preset { name } => session.select_preset(&name.join(" ")),
        Command::Auto => session.toggle_auto(),
        Command::Set { name, value } => {
            let Some(key) = SettingKey::from_name(&name) else {
                let known: Vec<&str> = SettingKey::ALL.iter().map(|k| k.name()).collect();
                return format!("Unknown setting `{}`, expected one of: {}", name, known.join(", "));
            };
            match value {
                Some(raw) => session.set_setting(key, &raw),
                None => session.get_setting(key),
            }
        }
        Command::Presets => session.list_presets(),
        Command::Status => session.status(),
        Command::Reload => session.reload_presets(),
    }
}

/// Parses and runs a console line. Blank lines produce no feedback.
pub fn run_line(session: &mut Session, line: &str) -> Option<String> {
    if line.trim().is_empty() {
        return None;
    }
    Some(match parse(line) {
        Ok(command) => execute(session, command),
        Err(usage) => usage,
    })
}
