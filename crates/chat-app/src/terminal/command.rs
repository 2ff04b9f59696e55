use std::path::PathBuf;

use snafu::{OptionExt, Snafu};
use vqa_backend::ProcessingMode;

pub struct CommandSpec {
    pub name: &'static str,
    pub usage: &'static str,
    pub summary: &'static str,
}

pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "/image",
        usage: "/image [path]",
        summary: "select an image, or drop the current one",
    },
    CommandSpec {
        name: "/mode",
        usage: "/mode auto|manual",
        summary: "set the image processing mode",
    },
    CommandSpec {
        name: "/instruction",
        usage: "/instruction [text]",
        summary: "set the instruction sent with /process",
    },
    CommandSpec {
        name: "/search",
        usage: "/search on|off",
        summary: "toggle web search for questions",
    },
    CommandSpec {
        name: "/process",
        usage: "/process",
        summary: "send the selected image for processing",
    },
    CommandSpec {
        name: "/ask",
        usage: "/ask <question>",
        summary: "ask about the selected image through /vqa",
    },
    CommandSpec {
        name: "/clear",
        usage: "/clear",
        summary: "clear the conversation",
    },
    CommandSpec {
        name: "/theme",
        usage: "/theme",
        summary: "toggle light and dark output",
    },
    CommandSpec {
        name: "/history",
        usage: "/history",
        summary: "show the whole conversation again",
    },
    CommandSpec {
        name: "/help",
        usage: "/help",
        summary: "list commands",
    },
    CommandSpec {
        name: "/quit",
        usage: "/quit",
        summary: "leave (Ctrl-D works too)",
    },
];

/// One parsed line of REPL input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Empty,
    Question(String),
    SelectImage(PathBuf),
    DropImage,
    SetMode(ProcessingMode),
    SetInstruction(String),
    SetSearch(bool),
    Process,
    AskAboutImage(String),
    Clear,
    ToggleTheme,
    History,
    Help,
    Quit,
}

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum CommandError {
    #[snafu(display("unknown command '{name}', try /help"))]
    UnknownCommand { stage: &'static str, name: String },
    #[snafu(display("missing argument, usage: {usage}"))]
    MissingArgument {
        stage: &'static str,
        usage: &'static str,
    },
    #[snafu(display("invalid argument '{value}', usage: {usage}"))]
    InvalidArgument {
        stage: &'static str,
        value: String,
        usage: &'static str,
    },
}

pub fn parse(line: &str) -> Result<Command, CommandError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(Command::Empty);
    }
    if !trimmed.starts_with('/') {
        return Ok(Command::Question(trimmed.to_string()));
    }

    let (name, argument) = match trimmed.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (trimmed, ""),
    };

    let command = match name {
        "/image" if argument.is_empty() => Command::DropImage,
        "/image" => Command::SelectImage(PathBuf::from(argument)),
        "/mode" => {
            let usage = usage_of("/mode");
            let value = non_empty(argument, usage)?;
            let mode = ProcessingMode::parse(value).context(InvalidArgumentSnafu {
                stage: "parse-mode",
                value,
                usage,
            })?;
            Command::SetMode(mode)
        }
        "/instruction" => Command::SetInstruction(argument.to_string()),
        "/search" => {
            let usage = usage_of("/search");
            let value = non_empty(argument, usage)?;
            let enabled = parse_switch(value).context(InvalidArgumentSnafu {
                stage: "parse-search",
                value,
                usage,
            })?;
            Command::SetSearch(enabled)
        }
        "/process" => Command::Process,
        "/ask" => Command::AskAboutImage(non_empty(argument, usage_of("/ask"))?.to_string()),
        "/clear" => Command::Clear,
        "/theme" => Command::ToggleTheme,
        "/history" => Command::History,
        "/help" | "/?" => Command::Help,
        "/quit" | "/exit" => Command::Quit,
        other => {
            return UnknownCommandSnafu {
                stage: "parse-command",
                name: other,
            }
            .fail();
        }
    };

    Ok(command)
}

fn usage_of(name: &str) -> &'static str {
    COMMANDS
        .iter()
        .find(|spec| spec.name == name)
        .map_or("/help", |spec| spec.usage)
}

fn non_empty<'a>(argument: &'a str, usage: &'static str) -> Result<&'a str, CommandError> {
    if argument.is_empty() {
        return MissingArgumentSnafu {
            stage: "parse-argument",
            usage,
        }
        .fail();
    }
    Ok(argument)
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Some(true),
        "off" | "false" | "no" | "0" => Some(false),
        _ => None,
    }
}
