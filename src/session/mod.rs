//! Session control.
//!
//! This module owns the operator session: the workdir, the last reviewed
//! plan and the last state index. It sequences the provisioning tool's
//! commands and refuses to apply a plan that is missing, already applied or
//! changed on disk.

mod commands;
mod context;
mod controller;

pub use commands::ToolCommands;
pub use context::SessionContext;
pub use controller::{Outcome, SessionController, SessionSnapshot, SessionStatus};
