//! External command execution.
//!
//! This module spawns the provisioning tool as a child process, streams its
//! output as an ordered sequence of events and supports cancellation.

mod process;
mod types;

pub use process::{
    CancelHandle, CommandRunner, ProcessRunner, RunHandle, DEFAULT_CHANNEL_CAPACITY,
    DEFAULT_GRACE_PERIOD,
};
pub use types::{CompletedRun, Invocation, OutputLine, RunEvent, RunOutcome, StreamKind};
