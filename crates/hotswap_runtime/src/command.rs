//! Console commands

use serde_json::Value;

pub const HELP: &str = "commands: run [entry] [json-args] | swap | clear | status | help | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Run { entry: String, args: Vec<Value> },
    Swap,
    Clear,
    Status,
    Help,
    Quit,
    Empty,
}

impl Command {
    /// `default_entry` is used by a bare `run`.
    pub fn parse(line: &str, default_entry: &str) -> Result<Self, String> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        match word {
            "" => Ok(Command::Empty),
            "run" => parse_run(rest, default_entry),
            "swap" => Ok(Command::Swap),
            "clear" => Ok(Command::Clear),
            "status" => Ok(Command::Status),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(format!("unknown command '{other}' ({HELP})")),
        }
    }
}

fn parse_run(rest: &str, default_entry: &str) -> Result<Command, String> {
    let (entry, json) = match rest.split_once(char::is_whitespace) {
        Some((entry, json)) => (entry, json.trim()),
        None if rest.is_empty() => (default_entry, ""),
        None => (rest, ""),
    };

    let args = if json.is_empty() {
        Vec::new()
    } else {
        match serde_json::from_str::<Value>(json) {
            Ok(Value::Array(args)) => args,
            Ok(_) => return Err("run arguments must be a JSON array".to_string()),
            Err(err) => return Err(format!("malformed run arguments: {err}")),
        }
    };

    Ok(Command::Run {
        entry: entry.to_string(),
        args,
    })
}
