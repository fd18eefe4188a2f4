//! Error families callers need to match on.
//!
//! Store and orchestration code uses `anyhow`; the process runner and the
//! extractor return these typed errors so a cancelled run can be told apart
//! from a failed one without string matching.

use std::io;

use thiserror::Error;

/// Outcome of a supervised tool run that did not exit successfully.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("failed to start {program}: {source}")]
    NotStarted {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with {status}{}", render_context(.context))]
    Exited {
        program: String,
        status: String,
        context: String,
    },

    #[error("cancelled by user")]
    Cancelled,

    #[error("IO error while supervising process: {0}")]
    Io(#[from] io::Error),
}

impl RunError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunError::Cancelled)
    }
}

fn render_context(context: &str) -> String {
    if context.is_empty() {
        String::new()
    } else {
        format!(": {context}")
    }
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("{program} is not installed or not in PATH")]
    ToolMissing { program: String },

    #[error("extraction failed for {url}: {reason}")]
    ToolFailed { url: String, reason: String },

    #[error("invalid metadata format for {url}: {line:?}")]
    InvalidOutput { url: String, line: String },

    #[error("no videos found in playlist {0}")]
    EmptyPlaylist(String),
}
