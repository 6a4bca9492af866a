//! # xenctl-ssh
//!
//! Pipes a shell script into `sh -s` on a remote machine, optionally under
//! `sudo`, and collects its output and exit status.
//!
//! - **error** — Crate-specific error types
//! - **script** — Connection, authentication and script execution

pub mod error;
pub mod script;

pub use error::{SshError, SshErrorKind, SshResult};
pub use script::{run_script, ScriptOutput, ScriptRequest};
