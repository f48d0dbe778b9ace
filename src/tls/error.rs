//! TLS errors
//!
//! Every fallible operation in this crate returns [`Error`]. The variants
//! split into three groups:
//!
//! - caller mistakes detected before the engine is touched
//!   ([`Error::InvalidArgument`], [`Error::TypeMismatch`], [`Error::InvalidState`]);
//! - would-block signals telling the caller which external action is needed
//!   before retrying ([`Error::WantRead`], [`Error::WantWrite`],
//!   [`Error::WantX509Lookup`]);
//! - fatal failures reported by the engine or the transport
//!   ([`Error::Ssl`], [`Error::HandshakeFailed`], [`Error::SysCall`],
//!   [`Error::Io`]) plus the orderly [`Error::ZeroReturn`] closure.

use openssl::error::ErrorStack;
use openssl::ssl::{self, ErrorCode};
use openssl_sys as ffi;
use std::fmt;
use std::io;

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("invalid connection state: {0}")]
    InvalidState(String),

    /// More inbound ciphertext is needed before the operation can progress.
    #[error("operation needs more data from the transport")]
    WantRead,

    /// Outbound ciphertext must be drained before the operation can progress.
    #[error("operation needs the transport to accept more data")]
    WantWrite,

    #[error("operation suspended for certificate lookup")]
    WantX509Lookup,

    /// The peer closed the TLS session with a close-notify alert.
    #[error("TLS session closed by peer")]
    ZeroReturn,

    /// The handshake cannot complete, with no engine diagnostics to report.
    #[error("TLS handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("system call failed: {0}")]
    SysCall(io::Error),

    #[error("OpenSSL error: {0}")]
    Ssl(#[from] ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// True for the transient would-block signals.
    pub fn is_would_block(&self) -> bool {
        matches!(self, Error::WantRead | Error::WantWrite | Error::WantX509Lookup)
    }

    /// True for failures after which no further handshake progress is possible.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Ssl(_) | Error::HandshakeFailed(_) | Error::SysCall(_) | Error::Io(_)
        )
    }

    /// Engine diagnostics carried by an [`Error::Ssl`], oldest first.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        match self {
            Error::Ssl(stack) => stack.errors().iter().map(Diagnostic::from_engine).collect(),
            _ => Vec::new(),
        }
    }

    /// Map an error from an engine I/O call onto the taxonomy.
    pub(crate) fn from_ssl(err: ssl::Error) -> Self {
        if let Some(signal) = Error::from_code(err.code()) {
            return signal;
        }
        if let Some(stack) = err.ssl_error() {
            return Error::Ssl(stack.clone());
        }
        let syscall = err.code() == ErrorCode::SYSCALL;
        match err.into_io_error() {
            Ok(io_err) if syscall => Error::SysCall(io_err),
            Ok(io_err) => Error::Io(io_err),
            Err(_) if syscall => Error::SysCall(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "unexpected EOF",
            )),
            Err(other) => Error::Io(io::Error::other(other.to_string())),
        }
    }

    /// Signals carried by the result code alone.
    fn from_code(code: ErrorCode) -> Option<Self> {
        match code {
            ErrorCode::WANT_READ => Some(Error::WantRead),
            ErrorCode::WANT_WRITE => Some(Error::WantWrite),
            ErrorCode::ZERO_RETURN => Some(Error::ZeroReturn),
            code if code.as_raw() == ffi::SSL_ERROR_WANT_X509_LOOKUP => {
                Some(Error::WantX509Lookup)
            }
            _ => None,
        }
    }
}

/// One (library, function, reason) entry from the engine's error queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub library: Option<String>,
    pub function: Option<String>,
    pub reason: Option<String>,
}

impl Diagnostic {
    fn from_engine(err: &openssl::error::Error) -> Self {
        Diagnostic {
            library: err.library().map(|s| s.to_string()),
            function: err.function().map(|s| s.to_string()),
            reason: err.reason().map(|s| s.to_string()),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {})",
            self.library.as_deref().unwrap_or("?"),
            self.function.as_deref().unwrap_or("?"),
            self.reason.as_deref().unwrap_or("?"),
        )
    }
}
