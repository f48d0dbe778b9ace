//! TLS session binding
//!
//! A thin, non-blocking layer over OpenSSL contexts and sessions.
//!
//! # Architecture
//!
//! 1. [`ContextBuilder`] collects protocol policy, options, verification
//!    mode, key material and callbacks, then freezes into a [`Context`]
//! 2. [`Connection`] borrows a `Context` and runs one session over either a
//!    socket or a pair of in-memory ciphertext queues
//! 3. Callbacks ([`PassphraseProvider`], [`CertificateVerifier`],
//!    [`HandshakeObserver`]) are plain traits, bridged into the engine's
//!    C callback slots
//!
//! Every connection operation is a single step. When the engine cannot
//! progress it fails with [`Error::WantRead`] or [`Error::WantWrite`] and
//! the caller retries after moving data; [`handshake::relay`] and
//! [`handshake::drive_handshake`] do that for two connections in one thread.
//!
//! # Example
//!
//! ```no_run
//! use tlsbind::crypto::FileType;
//! use tlsbind::tls::{handshake, Connection, ContextBuilder, Method};
//!
//! let mut server = ContextBuilder::new(Method::Tlsv1)?;
//! server.use_certificate_file("server-cert.pem", FileType::Pem)?;
//! server.use_private_key_file("server-key.pem", FileType::Pem)?;
//! server.check_private_key()?;
//! let server = server.build();
//! let client = ContextBuilder::new(Method::Tlsv1)?.build();
//!
//! let mut server_conn = Connection::memory(&server)?;
//! server_conn.set_accept_state()?;
//! let mut client_conn = Connection::memory(&client)?;
//! client_conn.set_connect_state()?;
//!
//! handshake::drive_handshake(&mut client_conn, &mut server_conn)?;
//! assert_eq!(client_conn.master_key(), server_conn.master_key());
//! # Ok::<(), tlsbind::tls::Error>(())
//! ```

mod bio;
pub mod callbacks;
pub mod cert;
pub mod config;
pub mod error;
pub mod facts;
pub mod handshake;
pub mod session;
pub mod store;

pub use bio::MemoryBio;
pub use callbacks::{
    CertificateVerifier, ConnectionRef, HandshakeObserver, InfoWhere, PassphraseProvider,
    Preverified,
};
pub use cert::CertInfo;
pub use config::{Context, ContextBuilder, Method, Options, VerifyMode};
pub use error::{Diagnostic, Error};
pub use facts::SessionFacts;
pub use openssl::ssl::ShutdownState;
pub use session::{Connection, ConnectionId, HandshakeState};
pub use store::CertificateStore;

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, Error>;
