//! Typed worker command templates.
//!
//! A template is a program plus an argument list containing `{name}`,
//! `{input}` and `{output}` placeholders. Placeholders are checked once when
//! the template is built, so rendering per session cannot introduce
//! surprises.

use std::fmt;

use crate::config::TranscodeConfig;
use crate::error::{Error, Result};
use crate::ingest::InputBinding;

/// Placeholders a template may reference.
pub const PLACEHOLDERS: &[&str] = &["name", "input", "output"];

/// Workers always write MPEG-TS to stdout.
const OUTPUT_ARG: &str = "pipe:1";

/// Validated worker command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    program: String,
    args: Vec<String>,
}

/// A fully rendered worker command for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub stream: String,
    pub program: String,
    pub args: Vec<String>,
    /// Whether the worker reads the stream from stdin.
    pub stdin_piped: bool,
}

impl CommandTemplate {
    /// Build a template, rejecting empty programs and unknown placeholders.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Result<Self> {
        let program = program.into();
        if program.trim().is_empty() {
            return Err(Error::InvalidCommand("program is empty".into()));
        }
        for arg in &args {
            for name in placeholders(arg) {
                if !PLACEHOLDERS.contains(&name) {
                    return Err(Error::InvalidCommand(format!(
                        "unknown placeholder {{{}}} in argument {:?}",
                        name, arg
                    )));
                }
            }
        }
        Ok(Self { program, args })
    }

    pub fn from_config(config: &TranscodeConfig) -> Result<Self> {
        Self::new(config.program.clone(), config.args.clone())
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn references(&self, placeholder: &str) -> bool {
        self.args
            .iter()
            .any(|arg| placeholders(arg).any(|name| name == placeholder))
    }

    /// Render the command for `stream` reading from `input`.
    pub fn render(&self, stream: &str, input: InputBinding<'_>) -> Result<Invocation> {
        if matches!(input, InputBinding::Locator(_)) && !self.references("input") {
            return Err(Error::InvalidCommand(
                "template has no {input} placeholder for a locator input".into(),
            ));
        }

        let args = self
            .args
            .iter()
            .map(|arg| substitute(arg, stream, input.as_arg()))
            .collect();

        Ok(Invocation {
            stream: stream.to_string(),
            program: self.program.clone(),
            args,
            stdin_piped: input == InputBinding::Pipe,
        })
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " {:?}", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Identifiers written as `{ident}` inside `arg`.
fn placeholders(arg: &str) -> impl Iterator<Item = &str> {
    arg.match_indices('{').filter_map(move |(start, _)| {
        let rest = &arg[start + 1..];
        let end = rest.find('}')?;
        let name = &rest[..end];
        let is_ident = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        is_ident.then_some(name)
    })
}

/// Single pass, so substituted values are never re-expanded.
fn substitute(arg: &str, stream: &str, input: &str) -> String {
    let mut out = String::with_capacity(arg.len());
    let mut rest = arg;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let value = ["name", "input", "output"]
            .iter()
            .find(|key| {
                tail.len() > key.len() + 1
                    && tail[1..].starts_with(*key)
                    && tail[key.len() + 1..].starts_with('}')
            })
            .map(|key| {
                let value = match *key {
                    "name" => stream,
                    "input" => input,
                    _ => OUTPUT_ARG,
                };
                (value, key.len() + 2)
            });
        match value {
            Some((value, consumed)) => {
                out.push_str(value);
                rest = &tail[consumed..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
