//! Interactive commands of the room client.

use std::path::PathBuf;

/// One line typed at the prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ask the other devices to take a photo
    Take,
    /// Upload a local image file as this device's capture
    Upload(PathBuf),
    /// Print the connection state and current preview
    State,
    Quit,
    Help,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        match verb.to_ascii_lowercase().as_str() {
            "take" | "t" => Command::Take,
            "upload" | "u" if !rest.is_empty() => Command::Upload(PathBuf::from(rest)),
            "state" | "s" => Command::State,
            "quit" | "exit" | "q" => Command::Quit,
            "help" | "?" => Command::Help,
            _ => Command::Unknown(line.to_string()),
        }
    }
}

pub const HELP: &str = "\
Commands:
  take            ask the other devices to take a photo
  upload <file>   upload an image as this device's photo
  state           show connection state and preview
  quit            leave the room
";
