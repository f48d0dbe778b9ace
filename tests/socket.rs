//! Socket-backed connection tests

mod common;

use common::*;
use std::net::Shutdown;
use tlsbind::net::socket_pair;
use tlsbind::tls::handshake::drive_handshake;
use tlsbind::tls::{Connection, ContextBuilder, Error, HandshakeState, Method};

#[test]
fn socket_connect() {
    let server_ctx = server_builder(Method::Tlsv1).build();
    let client_ctx = ContextBuilder::new(Method::Tlsv1).unwrap().build();
    let (server_sock, client_sock) = socket_pair().unwrap();

    let mut server = Connection::with_socket(&server_ctx, server_sock).unwrap();
    server.set_accept_state().unwrap();
    let mut client = Connection::with_socket(&client_ctx, client_sock).unwrap();
    client.set_connect_state().unwrap();
    assert!(!client.is_buffer_backed());

    drive_handshake(&mut client, &mut server).unwrap();
    assert_eq!(client.state(), HandshakeState::Established);
    assert_eq!(client.master_key(), server.master_key());
    assert_eq!(client.client_random(), server.client_random());

    server.write_all(b"xy").unwrap();
    assert_eq!(read_exact(&mut client, 2), b"xy");

    client.write_all(b"hello back").unwrap();
    assert_eq!(read_exact(&mut server, 10), b"hello back");
}

#[test]
fn test_buffer_ops_on_socket_are_type_errors() {
    let context = ContextBuilder::new(Method::Tlsv1).unwrap().build();
    let (socket, _peer) = socket_pair().unwrap();
    let mut conn = Connection::new(&context, Some(socket)).unwrap();

    assert!(matches!(conn.buffer_read(1024), Err(Error::TypeMismatch(_))));
    assert!(matches!(conn.buffer_write(b"foo"), Err(Error::TypeMismatch(_))));
    assert!(matches!(conn.buffer_shutdown(), Err(Error::TypeMismatch(_))));
    // Nothing touched the engine.
    assert_eq!(conn.state(), HandshakeState::Created);
}

#[test]
fn test_socket_client_wants_read() {
    let context = ContextBuilder::new(Method::Tlsv1).unwrap().build();
    let (_server_sock, client_sock) = socket_pair().unwrap();
    let mut client = context.connection(Some(client_sock)).unwrap();
    client.set_connect_state().unwrap();

    assert!(matches!(client.do_handshake(), Err(Error::WantRead)));
    assert_eq!(client.state(), HandshakeState::Connecting);
}

#[test]
fn test_sock_shutdown() {
    let context = ContextBuilder::new(Method::Tlsv1).unwrap().build();
    let (server_sock, client_sock) = socket_pair().unwrap();
    let mut server = Connection::with_socket(&context, server_sock).unwrap();
    server.set_accept_state().unwrap();
    let client = Connection::with_socket(&context, client_sock).unwrap();

    client.sock_shutdown(Shutdown::Write).unwrap();
    assert!(client.socket().is_some());

    // The server sees EOF before any ClientHello.
    let mut result = server.do_handshake();
    for _ in 0..10_000 {
        match result {
            Err(Error::WantRead) => {
                std::thread::yield_now();
                result = server.do_handshake();
            }
            _ => break,
        }
    }
    assert!(result.unwrap_err().is_fatal());
    assert_eq!(server.state(), HandshakeState::Failed);
}
