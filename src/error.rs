use thiserror::Error;

/// Failures surfaced by the engine integration layer.
///
/// An unreadable engine version is deliberately absent: it degrades to
/// [`crate::version::DetectedVersion::Legacy`] instead of failing.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn `{command}`: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command `{command}` terminated with status {}: {stderr}", status_text(.status))]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("unexpected {context} output: {source}")]
    ParseFailed {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid command line `{command}`: {reason}")]
    InvalidCommandLine { command: String, reason: String },

    #[error("Error occurred when fetching containers: {source}")]
    FetchFailed {
        #[source]
        source: Box<EngineError>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    SpawnFailed,
    CommandFailed,
    ParseFailed,
    InvalidCommandLine,
    FetchFailed,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::SpawnFailed { .. } => ErrorKind::SpawnFailed,
            EngineError::CommandFailed { .. } => ErrorKind::CommandFailed,
            EngineError::ParseFailed { .. } => ErrorKind::ParseFailed,
            EngineError::InvalidCommandLine { .. } => ErrorKind::InvalidCommandLine,
            EngineError::FetchFailed { .. } => ErrorKind::FetchFailed,
        }
    }

    pub(crate) fn parse(context: impl Into<String>, source: serde_json::Error) -> Self {
        EngineError::ParseFailed {
            context: context.into(),
            source,
        }
    }

    /// Wraps any failure of a batch listing into a single `FetchFailed`.
    pub(crate) fn fetch(source: EngineError) -> Self {
        match source {
            already @ EngineError::FetchFailed { .. } => already,
            other => EngineError::FetchFailed {
                source: Box::new(other),
            },
        }
    }
}

fn status_text(status: &Option<i32>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_failed_message_names_status_and_stderr() {
        let err = EngineError::CommandFailed {
            command: "podman start web".into(),
            status: Some(125),
            stderr: "no such container".into(),
        };
        assert_eq!(
            "command `podman start web` terminated with status 125: no such container",
            err.to_string()
        );
        assert_eq!(ErrorKind::CommandFailed, err.kind());
    }

    #[test]
    fn killed_command_reports_signal() {
        let err = EngineError::CommandFailed {
            command: "podman ps".into(),
            status: None,
            stderr: String::new(),
        };
        assert!(err.to_string().contains("status signal"));
    }

    #[test]
    fn fetch_wraps_once() {
        let inner = EngineError::InvalidCommandLine {
            command: "'".into(),
            reason: "unterminated quote".into(),
        };
        let wrapped = EngineError::fetch(EngineError::fetch(inner));
        assert_eq!(ErrorKind::FetchFailed, wrapped.kind());
        match wrapped {
            EngineError::FetchFailed { source } => {
                assert_eq!(ErrorKind::InvalidCommandLine, source.kind())
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
