//! Shared fixtures for integration tests
//!
//! Certificates under `tests/fixtures/`: a root CA ("Testing Root CA"), a
//! server leaf ("lovely server") and a client leaf ("ugly client"), both
//! issued by the root.

#![allow(dead_code)]

use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use std::path::PathBuf;
use tlsbind::tls::{Connection, Context, ContextBuilder, Error, Method};

pub const ROOT_CERT: &str = include_str!("../fixtures/root-cert.pem");
pub const ROOT_KEY: &str = include_str!("../fixtures/root-key.pem");
pub const SERVER_CERT: &str = include_str!("../fixtures/server-cert.pem");
pub const SERVER_KEY: &str = include_str!("../fixtures/server-key.pem");
pub const CLIENT_CERT: &str = include_str!("../fixtures/client-cert.pem");
pub const CLIENT_KEY: &str = include_str!("../fixtures/client-key.pem");

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn cert(pem: &str) -> X509 {
    X509::from_pem(pem.as_bytes()).unwrap()
}

pub fn key(pem: &str) -> PKey<Private> {
    PKey::private_key_from_pem(pem.as_bytes()).unwrap()
}

/// Builder holding the server leaf and key.
pub fn server_builder(method: Method) -> ContextBuilder {
    let mut builder = ContextBuilder::new(method).unwrap();
    builder.set_certificate(&cert(SERVER_CERT)).unwrap();
    builder.set_private_key(&key(SERVER_KEY)).unwrap();
    builder.check_private_key().unwrap();
    builder
}

/// Builder holding the client leaf and key.
pub fn client_builder(method: Method) -> ContextBuilder {
    let mut builder = ContextBuilder::new(method).unwrap();
    builder.set_certificate(&cert(CLIENT_CERT)).unwrap();
    builder.set_private_key(&key(CLIENT_KEY)).unwrap();
    builder.check_private_key().unwrap();
    builder
}

/// Buffer-backed `(client, server)` pair with roles already chosen.
pub fn memory_pair<'a>(client: &'a Context, server: &'a Context) -> (Connection<'a>, Connection<'a>) {
    let mut client_conn = Connection::memory(client).unwrap();
    client_conn.set_connect_state().unwrap();
    let mut server_conn = Connection::memory(server).unwrap();
    server_conn.set_accept_state().unwrap();
    (client_conn, server_conn)
}

/// Read exactly `len` bytes from a socket-backed connection, retrying on would-block.
pub fn read_exact(conn: &mut Connection<'_>, len: usize) -> Vec<u8> {
    let mut data = Vec::new();
    for _ in 0..100_000 {
        if data.len() >= len {
            return data;
        }
        match conn.read(len - data.len()) {
            Ok(chunk) => data.extend_from_slice(&chunk),
            Err(Error::WantRead) | Err(Error::WantWrite) => std::thread::yield_now(),
            Err(e) => panic!("read failed: {}", e),
        }
    }
    panic!("read did not complete: got {} of {} bytes", data.len(), len);
}
