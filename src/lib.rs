//! tlsbind - non-blocking TLS session binding over OpenSSL
//!
//! This crate wraps OpenSSL contexts and sessions behind a small typed API:
//! configure a context, create socket- or buffer-backed connections from
//! it, and drive handshakes one step at a time.

pub mod crypto;
pub mod net;
pub mod tls;
