//! Buffer-backed connection tests
//!
//! Two connections exchange ciphertext only through their memory queues,
//! relayed by hand the same way a caller without sockets would.

mod common;

use bytes::Bytes;
use common::*;
use openssl::x509::{X509Ref, X509VerifyResult};
use tlsbind::tls::handshake::{drive_handshake, relay, transfer, Side};
use tlsbind::tls::{
    Connection, ConnectionRef, Context, Error, HandshakeState, Method, Options, ShutdownState,
    VerifyMode,
};

fn accept_trusted(_conn: &ConnectionRef<'_>, _cert: &X509Ref, _err: X509VerifyResult, _depth: u32, ok: bool) -> bool {
    ok
}

/// Mutually authenticated contexts trusting the shared root.
fn mutual_contexts() -> (Context, Context) {
    let options = Options::NO_SSLV2 | Options::NO_SSLV3 | Options::SINGLE_DH_USE;
    let mode = VerifyMode::PEER | VerifyMode::FAIL_IF_NO_PEER_CERT | VerifyMode::CLIENT_ONCE;

    let mut server = server_builder(Method::Tlsv1);
    server.set_options(options);
    server.set_verify(mode, accept_trusted);
    server.cert_store().add_cert(&cert(ROOT_CERT)).unwrap();
    server.set_session_id_context(b"tlsbind-tests").unwrap();

    let mut client = client_builder(Method::Tlsv1);
    client.set_options(options);
    client.set_verify(mode, accept_trusted);
    client.cert_store().add_cert(&cert(ROOT_CERT)).unwrap();

    (client.build(), server.build())
}

fn plain_contexts(method: Method) -> (Context, Context) {
    let server = server_builder(method).build();
    let client = tlsbind::tls::ContextBuilder::new(method).unwrap().build();
    (client, server)
}

fn established<'a>(client: &'a Context, server: &'a Context) -> (Connection<'a>, Connection<'a>) {
    let (mut client_conn, mut server_conn) = memory_pair(client, server);
    drive_handshake(&mut client_conn, &mut server_conn).unwrap();
    (client_conn, server_conn)
}

#[test]
fn memory_connect() {
    let (client_ctx, server_ctx) = mutual_contexts();
    let (mut client, mut server) = memory_pair(&client_ctx, &server_ctx);

    for conn in [&client, &server] {
        assert!(conn.master_key().is_none());
        assert!(conn.client_random().is_none());
        assert!(conn.server_random().is_none());
    }

    // Nothing but handshake traffic moves, so the relay settles with no plaintext.
    assert!(relay(&mut client, &mut server).unwrap().is_none());
    assert_eq!(client.state(), HandshakeState::Established);
    assert_eq!(server.state(), HandshakeState::Established);

    let master_key = client.master_key().unwrap();
    assert!(!master_key.is_empty());
    assert_eq!(server.master_key().unwrap(), master_key);
    assert_eq!(client.client_random(), server.client_random());
    assert_eq!(client.server_random(), server.server_random());
    assert_ne!(client.client_random(), client.server_random());

    server.write(b"xy").unwrap();
    assert_eq!(
        relay(&mut client, &mut server).unwrap(),
        Some((Side::Client, Bytes::from_static(b"xy")))
    );

    client.write(b"hello server").unwrap();
    assert_eq!(
        relay(&mut client, &mut server).unwrap(),
        Some((Side::Server, Bytes::from_static(b"hello server")))
    );
}

#[test]
fn test_mutual_peer_identities() {
    let (client_ctx, server_ctx) = mutual_contexts();
    let (client, server) = established(&client_ctx, &server_ctx);

    let client_facts = client.session_facts().unwrap();
    let server_facts = server.session_facts().unwrap();
    assert!(client_facts.agrees_with(&server_facts));
    assert_eq!(client_facts.peer_subject(), Some("lovely server"));
    assert_eq!(server_facts.peer_subject(), Some("ugly client"));
    assert_eq!(client_facts.peer_cert(0).unwrap().issuer, "Testing Root CA");

    assert!(client.version().unwrap().starts_with("TLSv1"));
    assert_eq!(client.current_cipher(), server.current_cipher());
    assert!(!client.session_reused());
    assert!(client.session().is_some());
}

#[test]
fn test_client_without_certificate_is_refused() {
    let (_, server_ctx) = mutual_contexts();
    let mut client = tlsbind::tls::ContextBuilder::new(Method::Tlsv1).unwrap();
    client.cert_store().add_cert(&cert(ROOT_CERT)).unwrap();
    let client_ctx = client.build();

    let (mut client_conn, mut server_conn) = memory_pair(&client_ctx, &server_ctx);
    assert!(drive_handshake(&mut client_conn, &mut server_conn).is_err());
    assert_eq!(server_conn.state(), HandshakeState::Failed);
}

#[test]
fn test_highest_version_handshake() {
    let (client_ctx, server_ctx) = plain_contexts(Method::Sslv23);
    let (mut client, mut server) = established(&client_ctx, &server_ctx);

    assert_eq!(client.version(), Some("TLSv1.2"));
    let master_key = client.master_key().unwrap();
    assert!(!master_key.is_empty());
    assert_eq!(server.master_key(), Some(master_key));
    assert_eq!(client.client_random(), server.client_random());
    assert_eq!(client.server_random(), server.server_random());

    client.write_all(b"over the newest protocol").unwrap();
    assert_eq!(
        relay(&mut client, &mut server).unwrap(),
        Some((Side::Server, Bytes::from_static(b"over the newest protocol")))
    );
}

#[test]
fn test_outgoing_overflow() {
    let (client_ctx, server_ctx) = plain_contexts(Method::Tlsv1);
    let (mut client, mut server) = established(&client_ctx, &server_ctx);

    let size = 1 << 15;
    let sent = client.write(&vec![b'x'; size]).unwrap();
    // Partial writes hand back a short count instead of queueing everything.
    assert!(sent < size);

    let (side, received) = relay(&mut client, &mut server).unwrap().unwrap();
    assert_eq!(side, Side::Server);
    assert_eq!(received.len(), sent);
}

#[test]
fn test_write_all_delivers_everything() {
    let (client_ctx, server_ctx) = plain_contexts(Method::Tlsv1);
    let (mut client, mut server) = established(&client_ctx, &server_ctx);

    let payload = vec![b'z'; 50_000];
    assert_eq!(client.write_all(&payload).unwrap(), payload.len());
    transfer(&mut client, &mut server).unwrap();

    let mut received = Vec::new();
    while received.len() < payload.len() {
        received.extend_from_slice(&server.read(1 << 16).unwrap());
    }
    assert_eq!(received, payload);
    assert!(matches!(server.read(16), Err(Error::WantRead)));
}

#[test]
fn test_pending_plaintext() {
    let (client_ctx, server_ctx) = plain_contexts(Method::Tlsv1);
    let (mut client, mut server) = established(&client_ctx, &server_ctx);

    client.write(b"abcdef").unwrap();
    transfer(&mut client, &mut server).unwrap();
    assert_eq!(server.read(2).unwrap(), Bytes::from_static(b"ab"));
    assert_eq!(server.pending(), 4);
}

#[test]
fn test_buffer_shutdown_then_read_fails() {
    let (client_ctx, server_ctx) = plain_contexts(Method::Tlsv1);
    let (mut client, _server) = established(&client_ctx, &server_ctx);

    client.buffer_shutdown().unwrap();
    let err = client.read(1024).unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(client.state(), HandshakeState::Failed);
}

#[test]
fn test_inbound_closed_before_handshake_fails() {
    let (_, server_ctx) = plain_contexts(Method::Tlsv1);
    let mut server = Connection::memory(&server_ctx).unwrap();
    server.set_accept_state().unwrap();

    server.buffer_shutdown().unwrap();
    let err = server.read(1024).unwrap_err();
    assert!(
        matches!(err, Error::HandshakeFailed(_) | Error::Ssl(_)),
        "unexpected error: {:?}",
        err
    );
    assert!(err.is_fatal());
    assert_eq!(server.state(), HandshakeState::Failed);
}

#[test]
fn test_session_resumption() {
    let (client_ctx, server_ctx) = plain_contexts(Method::Tlsv1);
    let session = {
        let (client, server) = established(&client_ctx, &server_ctx);
        assert!(!client.session_reused());
        assert!(!server.session_reused());
        client.session().unwrap()
    };

    let (mut client, mut server) = memory_pair(&client_ctx, &server_ctx);
    unsafe { client.set_session(&session).unwrap() };
    drive_handshake(&mut client, &mut server).unwrap();
    assert!(client.session_reused());
    assert!(server.session_reused());
    assert_eq!(client.master_key(), server.master_key());

    assert!(matches!(
        unsafe { client.set_session(&session) },
        Err(Error::InvalidState(_))
    ));
}

#[test]
fn test_server_sees_requested_name() {
    let (client_ctx, server_ctx) = plain_contexts(Method::Tlsv1);
    let (mut client, mut server) = memory_pair(&client_ctx, &server_ctx);
    client.set_tlsext_host_name("lovely.example").unwrap();

    drive_handshake(&mut client, &mut server).unwrap();
    assert_eq!(server.servername(), Some("lovely.example"));
    assert_eq!(client.servername(), Some("lovely.example"));
}

#[test]
fn test_client_ca_names_reach_client() {
    let mode = VerifyMode::PEER | VerifyMode::FAIL_IF_NO_PEER_CERT;
    let mut server = server_builder(Method::Tlsv1);
    server.set_verify(mode, accept_trusted);
    server.cert_store().add_cert(&cert(ROOT_CERT)).unwrap();
    server.add_client_ca(&cert(ROOT_CERT)).unwrap();
    server.set_session_id_context(b"tlsbind-tests").unwrap();
    let server_ctx = server.build();

    let mut client = client_builder(Method::Tlsv1);
    client.cert_store().add_cert(&cert(ROOT_CERT)).unwrap();
    let client_ctx = client.build();

    let (mut client, mut server) = memory_pair(&client_ctx, &server_ctx);
    assert!(client.client_ca_list().is_empty());
    drive_handshake(&mut client, &mut server).unwrap();

    let expected = "C=US, ST=IL, L=Chicago, O=Testing, CN=Testing Root CA".to_string();
    assert_eq!(server.client_ca_list(), vec![expected.clone()]);
    assert_eq!(client.client_ca_list(), vec![expected]);
}

#[test]
fn test_orderly_shutdown() {
    let (client_ctx, server_ctx) = plain_contexts(Method::Tlsv1);
    let (mut client, mut server) = established(&client_ctx, &server_ctx);

    assert!(!client.shutdown().unwrap());
    assert!(client.shutdown_state().contains(ShutdownState::SENT));
    transfer(&mut client, &mut server).unwrap();

    assert!(matches!(server.read(16), Err(Error::ZeroReturn)));
    assert_eq!(server.state(), HandshakeState::Closed);
    assert!(server.shutdown().unwrap());
    transfer(&mut server, &mut client).unwrap();

    assert!(client.shutdown().unwrap());
    assert_eq!(client.state(), HandshakeState::Closed);
    assert!(server
        .shutdown_state()
        .contains(ShutdownState::SENT | ShutdownState::RECEIVED));
}

#[test]
fn test_set_shutdown_state() {
    let (client_ctx, _) = plain_contexts(Method::Tlsv1);
    let mut conn = Connection::memory(&client_ctx).unwrap();
    assert!(conn.shutdown_state().is_empty());
    conn.set_shutdown_state(ShutdownState::RECEIVED);
    assert_eq!(conn.shutdown_state(), ShutdownState::RECEIVED);
}

#[test]
fn test_unanswered_client_wants_read() {
    let (client_ctx, _) = plain_contexts(Method::Tlsv1);
    let (mut client, _) = memory_pair(&client_ctx, &client_ctx);

    for _ in 0..3 {
        assert!(matches!(client.do_handshake(), Err(Error::WantRead)));
    }
    assert_eq!(client.state(), HandshakeState::Connecting);
    assert!(!client.state_string().is_empty());
}
