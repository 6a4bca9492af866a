//! Error types for remote script execution.

use std::fmt;
use xenctl_xapi::XenError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SshErrorKind {
    /// TCP connect or address resolution failed
    ConnectionError,
    /// SSH protocol handshake failed
    HandshakeError,
    /// Every authentication method was rejected
    AuthenticationError,
    /// Opening or driving the exec channel failed
    ChannelError,
    /// No usable password (prompt refused or failed)
    CredentialError,
    IoError,
    /// The blocking worker panicked or was cancelled
    WorkerError,
}

#[derive(Debug, Clone)]
pub struct SshError {
    pub kind: SshErrorKind,
    pub message: String,
}

impl SshError {
    pub fn new(kind: SshErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
        }
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::new(SshErrorKind::ConnectionError, msg)
    }

    pub fn handshake(msg: impl Into<String>) -> Self {
        Self::new(SshErrorKind::HandshakeError, msg)
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::new(SshErrorKind::AuthenticationError, msg)
    }

    pub fn channel(msg: impl Into<String>) -> Self {
        Self::new(SshErrorKind::ChannelError, msg)
    }
}

impl fmt::Display for SshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)
    }
}

impl std::error::Error for SshError {}

impl From<std::io::Error> for SshError {
    fn from(e: std::io::Error) -> Self {
        Self::new(SshErrorKind::IoError, e.to_string())
    }
}

impl From<ssh2::Error> for SshError {
    fn from(e: ssh2::Error) -> Self {
        Self::channel(e.to_string())
    }
}

impl From<XenError> for SshError {
    fn from(e: XenError) -> Self {
        Self::new(SshErrorKind::CredentialError, e.to_string())
    }
}

impl From<tokio::task::JoinError> for SshError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::new(SshErrorKind::WorkerError, e.to_string())
    }
}

pub type SshResult<T> = Result<T, SshError>;
