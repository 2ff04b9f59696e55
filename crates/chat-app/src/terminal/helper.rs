use std::borrow::Cow::{self, Borrowed, Owned};

use colored::Colorize;
use rustyline::completion::{Completer, FilenameCompleter, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Helper};

use crate::terminal::command::COMMANDS;

/// Slash-command completion, hints and highlighting for the REPL.
pub struct CliHelper {
    commands: Vec<&'static str>,
    files: FilenameCompleter,
}

impl CliHelper {
    pub fn new() -> Self {
        Self {
            commands: COMMANDS.iter().map(|spec| spec.name).collect(),
            files: FilenameCompleter::new(),
        }
    }
}

impl Default for CliHelper {
    fn default() -> Self {
        Self::new()
    }
}

impl Helper for CliHelper {}

impl Completer for CliHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let typed = &line[..pos];

        // Paths after `/image` complete against the filesystem.
        if typed.starts_with("/image ") {
            return self.files.complete(line, pos, ctx);
        }

        if typed.starts_with('/') && !typed.contains(' ') {
            let candidates = self
                .commands
                .iter()
                .filter(|command| command.starts_with(typed))
                .map(|command| Pair {
                    display: command.to_string(),
                    replacement: command.to_string(),
                })
                .collect();
            return Ok((0, candidates));
        }

        Ok((0, Vec::new()))
    }
}

impl Highlighter for CliHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if line.starts_with('/') {
            Owned(line.bright_cyan().to_string())
        } else {
            Borrowed(line)
        }
    }

    fn highlight_hint<'h>(&self, hint: &'h str) -> Cow<'h, str> {
        Owned(hint.bright_black().to_string())
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

impl Hinter for CliHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> Option<String> {
        let typed = &line[..pos];
        if !typed.starts_with('/') || typed.contains(' ') {
            return None;
        }

        self.commands
            .iter()
            .find(|command| command.starts_with(typed) && command.len() > typed.len())
            .map(|command| command[typed.len()..].to_string())
    }
}

impl Validator for CliHelper {}
