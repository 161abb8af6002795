//! Event and request types for external command invocations.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Output stream a line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// A single line of output produced by the child process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputLine {
    /// Stream the line came from.
    pub stream: StreamKind,
    /// Line contents without the trailing newline.
    pub text: String,
}

/// How an invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RunOutcome {
    /// The process exited on its own.
    Exited {
        /// Exit code, `None` when terminated by a signal nobody asked for.
        code: Option<i32>,
    },
    /// The process was terminated because cancellation was requested.
    Cancelled,
}

/// One record of an invocation's event stream.
///
/// A stream is any number of [`RunEvent::Output`] records followed by exactly
/// one [`RunEvent::Finished`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// A line of output.
    Output(OutputLine),
    /// Terminal record.
    Finished(RunOutcome),
}

/// A request to run one external command.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Identifier used to correlate log records.
    pub id: Uuid,
    /// Executable name or path.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Working directory of the child.
    pub workdir: PathBuf,
    /// Extra environment layered on top of the inherited host environment.
    pub env: BTreeMap<String, String>,
}

/// Captured result of a fully drained invocation.
#[derive(Debug, Clone, Default)]
pub struct CompletedRun {
    /// Stdout lines in order.
    pub stdout: Vec<String>,
    /// Stderr lines in order.
    pub stderr: Vec<String>,
    /// Terminal outcome.
    pub outcome: Option<RunOutcome>,
}

impl RunOutcome {
    /// Returns true for a zero exit code.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Exited { code: Some(0) })
    }
}

impl Invocation {
    /// Creates an invocation with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>, workdir: impl AsRef<Path>) -> Self {
        Self {
            id: Uuid::new_v4(),
            program: program.into(),
            args: Vec::new(),
            workdir: workdir.as_ref().to_path_buf(),
            env: BTreeMap::new(),
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds extra environment variables.
    #[must_use]
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Renders the command line for logs and error messages.
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Returns the subcommand (first argument), if any.
    #[must_use]
    pub fn subcommand(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }
}

impl CompletedRun {
    /// Returns true if the process exited with code zero.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.outcome.is_some_and(|o| o.is_success())
    }

    /// Returns true if the run ended because of a cancellation request.
    #[must_use]
    pub fn was_cancelled(&self) -> bool {
        self.outcome == Some(RunOutcome::Cancelled)
    }

    /// Exit code, if the process exited.
    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        match self.outcome {
            Some(RunOutcome::Exited { code }) => code,
            _ => None,
        }
    }

    /// Joins stdout back into a single string.
    #[must_use]
    pub fn stdout_text(&self) -> String {
        self.stdout.join("\n")
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited { code: Some(code) } => write!(f, "exited with code {code}"),
            Self::Exited { code: None } => write!(f, "terminated by signal"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}
