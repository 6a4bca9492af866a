//! # xenctl – XenAPI client core
//!
//! Talks to a XenServer / XCP-ng pool master over XML-RPC and its bulk
//! HTTP handlers. Remote methods are dispatched dynamically from the
//! server's own method catalog; workflows on top cover VM provisioning,
//! teardown, import, export and pool-to-pool transfer.
//!
//! ## Modules
//!
//! - **types** — Config, object references and typed record views
//! - **error** — Crate-specific error types
//! - **value** / **codec** — XML-RPC values and documents
//! - **gateway** — One call, one response, status envelope unwrapped
//! - **catalog** / **namespace** — `system.listMethods` and dynamic dispatch
//! - **session** — Login, token injection, per-session resources
//! - **task** — Task creation, polling and cleanup
//! - **transfer** — Streaming `/import` and `/export`, relay between pools
//! - **lookup** — Name / uuid / reference resolution that never guesses
//! - **vm** — VM workflows
//! - **storage** — Storage repositories
//! - **host** — Hosts and memory metrics
//! - **units** — Byte-size parsing and formatting
//! - **credentials** — Password prompting and caching

pub mod types;
pub mod error;
pub mod value;
pub mod codec;
pub mod gateway;
pub mod catalog;
pub mod namespace;
pub mod session;
pub mod task;
pub mod transfer;
pub mod lookup;
pub mod vm;
pub mod storage;
pub mod host;
pub mod units;
pub mod credentials;

pub use error::{XenError, XenErrorKind, XenResult};
pub use session::Session;
pub use types::{ObjectRef, XenConfig};
