use std::{process::Stdio, sync::Arc};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{
    error::{EngineError, Result},
    notify::Notifier,
};

/// Seam between the engine integration and the processes it spawns.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs a command line to completion and returns its stdout.
    async fn run(&self, command_line: &str) -> Result<String>;

    /// Launches a command line without owning its lifetime.
    fn run_detached(&self, command_line: &str) -> Result<()>;
}

/// Runs engine command lines as real child processes.
///
/// Failures are reported once through the attached [`Notifier`] and returned
/// to the caller. Nothing is retried.
pub struct ProcessRunner {
    notifier: Arc<dyn Notifier>,
}

impl ProcessRunner {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    fn report(&self, command_line: &str, err: &EngineError) {
        warn!("command `{command_line}` failed: {err}");
        self.notifier.notify(
            &format!("Error occurred when running {command_line}"),
            &err.to_string(),
        );
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command_line: &str) -> Result<String> {
        debug!("running command {command_line}");
        let result = capture(command_line).await;
        match &result {
            Ok(out) => debug!("command {command_line} returned {} bytes", out.len()),
            Err(err) => self.report(command_line, err),
        }
        result
    }

    fn run_detached(&self, command_line: &str) -> Result<()> {
        debug!("launching detached command {command_line}");
        let result = launch(command_line);
        if let Err(err) = &result {
            self.report(command_line, err);
        }
        result
    }
}

async fn capture(command_line: &str) -> Result<String> {
    let argv = split_command_line(command_line)?;
    let output = Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| EngineError::SpawnFailed {
            command: command_line.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(EngineError::CommandFailed {
            command: command_line.to_string(),
            status: output.status.code(),
            stderr: clean_stderr(&output.stderr),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

// The child handle is dropped right away; the runtime reaps it once it exits.
fn launch(command_line: &str) -> Result<()> {
    let argv = split_command_line(command_line)?;
    Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(drop)
        .map_err(|source| EngineError::SpawnFailed {
            command: command_line.to_string(),
            source,
        })
}

pub(crate) fn clean_stderr(raw: &[u8]) -> String {
    let stripped = strip_ansi_escapes::strip(raw);
    String::from_utf8_lossy(&stripped).trim().to_string()
}

/// Splits a command line into argv the way a POSIX shell would, without any
/// expansion: whitespace separates words, single quotes are literal, double
/// quotes allow `\"`, `\\`, `\$` and `` \` `` escapes, and a bare backslash
/// escapes the next character.
pub fn split_command_line(command_line: &str) -> Result<Vec<String>> {
    let invalid = |reason: &str| EngineError::InvalidCommandLine {
        command: command_line.to_string(),
        reason: reason.to_string(),
    };

    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = command_line.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => word.push(c),
                        None => return Err(invalid("unterminated single quote")),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\' | '$' | '`')) => word.push(c),
                            Some('\n') => {}
                            Some(c) => {
                                word.push('\\');
                                word.push(c);
                            }
                            None => return Err(invalid("unterminated double quote")),
                        },
                        Some(c) => word.push(c),
                        None => return Err(invalid("unterminated double quote")),
                    }
                }
            }
            '\\' => match chars.next() {
                Some('\n') => {}
                Some(c) => {
                    in_word = true;
                    word.push(c);
                }
                None => return Err(invalid("trailing backslash")),
            },
            c => {
                in_word = true;
                word.push(c);
            }
        }
    }
    if in_word {
        words.push(word);
    }
    if words.is_empty() {
        return Err(invalid("empty command"));
    }
    Ok(words)
}
