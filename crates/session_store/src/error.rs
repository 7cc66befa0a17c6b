use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure creating, reading, or appending a conversation's checkpoint file.
#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("{operation} {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Line `line` (1-based) of `path` cannot be accepted.
    #[error("{path}:{line}: {problem}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        #[source]
        problem: LineProblem,
    },

    #[error("{path} has no header line")]
    MissingHeader { path: PathBuf },

    #[error("session directory must be under an absolute cwd, got {path}")]
    RelativeCwd { path: PathBuf },

    #[error("no checkpoint file for conversation '{conversation_id}' in {root}")]
    NoSessionsFound {
        root: PathBuf,
        conversation_id: String,
    },

    #[error("conversation id must not be empty")]
    EmptyConversationId,

    #[error("encoding a line for {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("formatting the current time: {0}")]
    Clock(#[from] time::error::Format),
}

/// What is wrong with one line of a checkpoint file.
#[derive(Debug, Error)]
pub enum LineProblem {
    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    #[error("not valid JSON for its record type: {0}")]
    Json(#[source] serde_json::Error),

    #[error("expected the session header")]
    ExpectedHeader,

    #[error("a second session header")]
    ExpectedEntry,

    #[error("unknown record type {0:?}")]
    UnknownRecordType(Option<String>),

    #[error("unsupported version {0}, only 1 is understood")]
    UnsupportedVersion(u32),

    #[error("'{field}' is not an RFC 3339 timestamp: {value}")]
    InvalidTimestamp { field: &'static str, value: String },

    #[error("header cwd is not absolute: {0}")]
    RelativeCwd(String),

    #[error("entry id '{0}' is already taken")]
    DuplicateEntryId(String),

    #[error("entry '{entry_id}' points at unknown parent '{parent_id}'")]
    DanglingParent { entry_id: String, parent_id: String },
}

impl SessionStoreError {
    #[must_use]
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn corrupt(path: impl Into<PathBuf>, line: usize, problem: LineProblem) -> Self {
        Self::Corrupt {
            path: path.into(),
            line,
            problem,
        }
    }

    #[must_use]
    pub fn encode(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Encode {
            path: path.into(),
            source,
        }
    }

    /// The line problem, for `Corrupt` errors.
    #[must_use]
    pub fn line_problem(&self) -> Option<(usize, &LineProblem)> {
        match self {
            Self::Corrupt { line, problem, .. } => Some((*line, problem)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_lines_name_file_line_and_problem() {
        let error = SessionStoreError::corrupt(
            "/tmp/conv.jsonl",
            3,
            LineProblem::DanglingParent {
                entry_id: "e-3".to_string(),
                parent_id: "e-9".to_string(),
            },
        );
        assert_eq!(
            error.to_string(),
            "/tmp/conv.jsonl:3: entry 'e-3' points at unknown parent 'e-9'"
        );
        assert!(matches!(
            error.line_problem(),
            Some((3, LineProblem::DanglingParent { .. }))
        ));
        assert!(SessionStoreError::EmptyConversationId.line_problem().is_none());
    }
}
