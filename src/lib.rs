// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![warn(warnings)]                    // Surface every warning
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // Public items should be documented
#![warn(dead_code)]                   // Unused code is reported
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![warn(unused_imports)]              // Unused imports are reported
#![warn(unused_variables)]            // Unused variables are reported
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # tfpilot
//!
//! Review and apply Terraform/OpenTofu change sets from the command line.
//!
//! ## Overview
//!
//! tfpilot drives the provisioning tool as a child process and turns its
//! structured output into models you can navigate:
//!
//! - A change tree of every planned resource change, grouped by module
//! - A searchable index of the resources recorded in state
//! - A session that refuses to apply a plan twice, or a plan whose saved
//!   artifact changed after review
//!
//! ## Architecture
//!
//! 1. **Runner**: spawns one command at a time and streams its output
//! 2. **Parsers**: build a [`changeset::ChangeSet`] or a [`state::ResourceIndex`]
//! 3. **Session**: sequences init, plan, apply and refresh, and publishes
//!    snapshots for presentation
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing and validation
//! - [`runner`]: External command execution with cancellation
//! - [`changeset`]: Plan parsing, action classification and attribute diffs
//! - [`state`]: State indexing and search
//! - [`session`]: Operation sequencing and the apply guard
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! tool:
//!   binary: tofu
//!   plan_file: tfplan.out
//! var_files:
//!   - prod.tfvars
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod changeset;
pub mod cli;
pub mod config;
pub mod error;
pub mod runner;
pub mod session;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use changeset::{Action, ChangeSet, ChangeSetParser, ChangeSummary, ResourceChange};
pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, PilotConfig};
pub use error::{ConfigError, ParseError, Result, TfPilotError};
pub use runner::{CommandRunner, ProcessRunner};
pub use session::{Outcome, SessionController, SessionSnapshot, SessionStatus};
pub use state::{ResourceIndex, StateIndexer};
