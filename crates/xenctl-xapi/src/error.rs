//! Error types for the XenAPI client crate.

use std::fmt;

/// Categorised error kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XenErrorKind {
    /// `session.login_with_password` was rejected
    AuthenticationError,
    /// A gated call returned a non-success status envelope (or a fault)
    RemoteError,
    /// A name / uuid / ref lookup matched zero or several candidates
    LookupError,
    /// Bulk-data HTTP stream failed (connection or unexpected status code)
    TransportError,
    /// A polled task finished in `failure` or `cancelled`
    TaskFailure,
    /// Task polling exhausted its attempts while the task was still running
    Timeout,
    /// Several independent failures of one composite workflow (transfer)
    TransferError,
    /// RPC endpoint unreachable
    ConnectionError,
    /// XML / JSON decoding error
    ParseError,
    /// Caller supplied an unusable argument
    InvalidInput,
    /// Local file I/O
    IoError,
}

/// Crate error type: a kind, a human-readable message, and for remote
/// failures the server status plus its description tokens.
#[derive(Debug, Clone)]
pub struct XenError {
    pub kind: XenErrorKind,
    pub message: String,
    /// Status string exactly as sent by the server (remote errors only).
    pub status: Option<String>,
    /// ErrorDescription tokens, task error_info, lookup candidates or
    /// the individual failures of a composite error.
    pub details: Vec<String>,
}

impl XenError {
    pub fn new(kind: XenErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            status: None,
            details: Vec::new(),
        }
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::new(XenErrorKind::AuthenticationError, msg)
    }

    /// A non-success status envelope. `status` is kept verbatim.
    pub fn remote(method: &str, status: impl Into<String>, description: Vec<String>) -> Self {
        let status = status.into();
        Self {
            kind: XenErrorKind::RemoteError,
            message: format!("{method} returned {status}"),
            status: Some(status),
            details: description,
        }
    }

    pub fn lookup(msg: impl Into<String>, candidates: Vec<String>) -> Self {
        Self::new(XenErrorKind::LookupError, msg).with_details(candidates)
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::new(XenErrorKind::TransportError, msg)
    }

    pub fn task_failure(msg: impl Into<String>, error_info: Vec<String>) -> Self {
        Self::new(XenErrorKind::TaskFailure, msg).with_details(error_info)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(XenErrorKind::Timeout, msg)
    }

    /// Fold several failures into one; each becomes a detail line.
    pub fn composite(msg: impl Into<String>, errors: Vec<XenError>) -> Self {
        Self::new(XenErrorKind::TransferError, msg)
            .with_details(errors.iter().map(|e| e.to_string()).collect())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::new(XenErrorKind::ConnectionError, msg)
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::new(XenErrorKind::ParseError, msg)
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::new(XenErrorKind::InvalidInput, msg)
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(XenErrorKind::IoError, msg)
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == XenErrorKind::Timeout
    }

    /// First ErrorDescription token (the XenAPI error code), if any.
    pub fn error_code(&self) -> Option<&str> {
        match self.kind {
            XenErrorKind::RemoteError | XenErrorKind::AuthenticationError => {
                self.details.first().map(String::as_str)
            }
            _ => None,
        }
    }
}

impl fmt::Display for XenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)?;
        if !self.details.is_empty() {
            write!(f, ": {}", self.details.join("; "))?;
        }
        Ok(())
    }
}

impl std::error::Error for XenError {}

impl From<XenError> for String {
    fn from(e: XenError) -> String {
        e.to_string()
    }
}

impl From<reqwest::Error> for XenError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::connection(format!("HTTP timeout: {e}"))
        } else if e.is_connect() {
            Self::connection(format!("Connection failed: {e}"))
        } else {
            Self::transport(format!("HTTP error: {e}"))
        }
    }
}

impl From<serde_json::Error> for XenError {
    fn from(e: serde_json::Error) -> Self {
        Self::parse(format!("Record decode error: {e}"))
    }
}

impl From<quick_xml::Error> for XenError {
    fn from(e: quick_xml::Error) -> Self {
        Self::parse(format!("XML parse error: {e}"))
    }
}

impl From<std::io::Error> for XenError {
    fn from(e: std::io::Error) -> Self {
        Self::io(e.to_string())
    }
}

/// Convenience alias.
pub type XenResult<T> = Result<T, XenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_keeps_status_verbatim() {
        let e = XenError::remote(
            "VM.start",
            "Failure",
            vec!["VM_BAD_POWER_STATE".into(), "OpaqueRef:1".into()],
        );
        assert_eq!(e.kind, XenErrorKind::RemoteError);
        assert_eq!(e.status.as_deref(), Some("Failure"));
        assert_eq!(e.error_code(), Some("VM_BAD_POWER_STATE"));
        assert!(e.to_string().contains("VM.start returned Failure"));
    }

    #[test]
    fn composite_lists_every_failure() {
        let e = XenError::composite(
            "transfer failed",
            vec![
                XenError::transport("export returned 500"),
                XenError::timeout("import task still pending"),
            ],
        );
        assert_eq!(e.kind, XenErrorKind::TransferError);
        assert_eq!(e.details.len(), 2);
        assert!(e.details[0].contains("500"));
        assert!(e.details[1].contains("Timeout"));
    }

    #[test]
    fn display_without_details() {
        let e = XenError::invalid_input("empty method name");
        assert_eq!(e.to_string(), "[InvalidInput] empty method name");
    }
}
