//! TLS connections
//!
//! A [`Connection`] pairs an engine session with a [`Transport`]. Every
//! operation is a single non-blocking step: when the engine cannot make
//! progress it reports [`Error::WantRead`] or [`Error::WantWrite`] and the
//! caller decides when to retry. Nothing here waits, sleeps or spins.

use super::bio::{MemoryBio, Transport};
use super::cert::{self, CertInfo};
use super::config::Context;
use super::facts::SessionFacts;
use super::{Error, Result};
use bytes::Bytes;
use foreign_types_shared::ForeignTypeRef;
use libc::{c_char, c_int};
use openssl::error::ErrorStack;
use openssl::ex_data::Index;
use openssl::ssl::{
    NameType, ShutdownResult, ShutdownState, Ssl, SslRef, SslSession, SslSessionRef, SslStream,
};
use openssl::stack::StackRef;
use openssl::x509::{X509Name, X509};
use openssl_sys as ffi;
use socket2::Socket;
use std::ffi::CStr;
use std::fmt;
use std::io;
use std::net::Shutdown;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

/// Process-unique connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ConnectionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

static CONNECTION_ID_INDEX: OnceLock<Index<Ssl, ConnectionId>> = OnceLock::new();

/// Slot on each engine session holding the owning connection's id.
pub(crate) fn connection_id_index() -> std::result::Result<Index<Ssl, ConnectionId>, ErrorStack> {
    if let Some(index) = CONNECTION_ID_INDEX.get() {
        return Ok(*index);
    }
    let index = Ssl::new_ex_index::<ConnectionId>()?;
    Ok(*CONNECTION_ID_INDEX.get_or_init(|| index))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Client,
    Server,
}

/// Handshake progress of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// No handshake step taken yet
    Created,
    /// Client handshake in progress
    Connecting,
    /// Server handshake in progress
    Accepting,
    Established,
    /// Close-notify exchanged or received
    Closed,
    /// A fatal error stopped the handshake or the session
    Failed,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeState::Created => "created",
            HandshakeState::Connecting => "connecting",
            HandshakeState::Accepting => "accepting",
            HandshakeState::Established => "established",
            HandshakeState::Closed => "closed",
            HandshakeState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A TLS session over a socket or over in-memory ciphertext queues
///
/// The connection borrows the [`Context`] it was created from. Dropping a
/// connection discards any queued ciphertext without sending close-notify.
pub struct Connection<'ctx> {
    stream: SslStream<Transport>,
    context: &'ctx Context,
    id: ConnectionId,
    role: Option<Role>,
    state: HandshakeState,
}

impl<'ctx> Connection<'ctx> {
    /// Create a connection over `socket`, or buffer-backed when `None`.
    pub fn new(context: &'ctx Context, socket: Option<Socket>) -> Result<Self> {
        let mut ssl = Ssl::new(&context.inner)?;
        let id = ConnectionId::next();
        ssl.set_ex_data(connection_id_index()?, id);

        let transport = match socket {
            Some(socket) => Transport::Socket(socket),
            None => Transport::Memory(MemoryBio::new()),
        };
        log::debug!(
            "{} created ({})",
            id,
            if transport.is_memory() { "memory" } else { "socket" }
        );
        let stream = SslStream::new(ssl, transport)?;

        Ok(Connection {
            stream,
            context,
            id,
            role: None,
            state: HandshakeState::Created,
        })
    }

    /// Buffer-backed connection.
    pub fn memory(context: &'ctx Context) -> Result<Self> {
        Connection::new(context, None)
    }

    /// Socket-backed connection. The socket should be connected and non-blocking.
    pub fn with_socket(context: &'ctx Context, socket: Socket) -> Result<Self> {
        Connection::new(context, Some(socket))
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn context(&self) -> &'ctx Context {
        self.context
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_established(&self) -> bool {
        self.state == HandshakeState::Established
    }

    pub fn is_buffer_backed(&self) -> bool {
        self.stream.get_ref().is_memory()
    }

    /// Act as the client for the coming handshake.
    pub fn set_connect_state(&mut self) -> Result<()> {
        self.set_role(Role::Client)
    }

    /// Act as the server for the coming handshake.
    pub fn set_accept_state(&mut self) -> Result<()> {
        self.set_role(Role::Server)
    }

    fn set_role(&mut self, role: Role) -> Result<()> {
        self.ensure_created("choose a role")?;
        self.role = Some(role);
        Ok(())
    }

    /// Offer a previously negotiated session for resumption.
    ///
    /// Only valid before the first handshake step. Whether the session was
    /// actually resumed shows in [`session_reused`](Self::session_reused).
    ///
    /// # Safety
    ///
    /// `session` must come from a connection created by the same [`Context`].
    pub unsafe fn set_session(&mut self, session: &SslSessionRef) -> Result<()> {
        self.ensure_created("set a session")?;
        unsafe { self.ssl_mut().set_session(session)? };
        Ok(())
    }

    /// Send `name` as the server name indication in the ClientHello.
    pub fn set_tlsext_host_name(&mut self, name: &str) -> Result<()> {
        self.ensure_created("set the server name")?;
        if name.is_empty() || name.contains('\0') {
            return Err(Error::InvalidArgument(format!("invalid server name {:?}", name)));
        }
        self.ssl_mut().set_hostname(name)?;
        Ok(())
    }

    /// Server name indication: the name this client sends, or on a server
    /// the name the client asked for.
    pub fn servername(&self) -> Option<&str> {
        self.stream.ssl().servername(NameType::HOST_NAME)
    }

    /// Advance the handshake by one non-blocking step.
    ///
    /// Returns `Ok(())` once the handshake is complete; calling it again
    /// after that is a no-op.
    pub fn do_handshake(&mut self) -> Result<()> {
        self.ensure_usable()?;
        match self.state {
            HandshakeState::Established | HandshakeState::Closed => return Ok(()),
            _ => {}
        }

        let result = match self.role {
            Some(Role::Client) => {
                self.state = HandshakeState::Connecting;
                self.stream.connect()
            }
            Some(Role::Server) => {
                self.state = HandshakeState::Accepting;
                self.stream.accept()
            }
            None => {
                return Err(Error::InvalidState(
                    "set_connect_state or set_accept_state must be called first".to_string(),
                ))
            }
        };

        match result {
            Ok(()) => {
                self.state = HandshakeState::Established;
                let ssl = self.stream.ssl();
                log::debug!(
                    "{} handshake complete: {} {}",
                    self.id,
                    ssl.version_str(),
                    ssl.current_cipher().map(|c| c.name()).unwrap_or("<none>")
                );
                Ok(())
            }
            Err(err) => {
                let err = self.handshake_error(Error::from_ssl(err));
                Err(self.record(err))
            }
        }
    }

    /// A bare EOF mid-handshake on a buffer-backed connection means the
    /// caller ended the inbound ciphertext before the peer finished.
    fn handshake_error(&self, err: Error) -> Error {
        let bare_eof = matches!(
            &err,
            Error::SysCall(io_err) if io_err.kind() == io::ErrorKind::UnexpectedEof
        );
        let inbound_closed = match self.stream.get_ref() {
            Transport::Memory(bio) => bio.is_inbound_eof(),
            Transport::Socket(_) => false,
        };
        if bare_eof && inbound_closed {
            return Error::HandshakeFailed(
                "inbound ciphertext ended before the handshake completed".to_string(),
            );
        }
        err
    }

    /// Read up to `max_len` bytes of plaintext.
    ///
    /// Completes the handshake first if it is still in progress.
    pub fn read(&mut self, max_len: usize) -> Result<Bytes> {
        self.ready_for_data()?;
        let mut buf = vec![0u8; max_len];
        match self.stream.ssl_read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(Bytes::from(buf))
            }
            Err(err) => Err(self.record(Error::from_ssl(err))),
        }
    }

    /// Write plaintext, returning how much the engine accepted.
    ///
    /// A large write may be accepted only in part; the caller resubmits
    /// the remainder.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.ready_for_data()?;
        match self.stream.ssl_write(data) {
            Ok(n) => Ok(n),
            Err(err) => Err(self.record(Error::from_ssl(err))),
        }
    }

    /// Write all of `data`, looping while the engine keeps accepting it.
    ///
    /// A would-block stops the loop and is returned as is.
    pub fn write_all(&mut self, data: &[u8]) -> Result<usize> {
        let mut sent = 0;
        while sent < data.len() {
            match self.write(&data[sent..])? {
                0 => {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "engine accepted no plaintext",
                    )))
                }
                n => sent += n,
            }
        }
        Ok(sent)
    }

    /// Plaintext already decrypted and waiting to be read.
    pub fn pending(&self) -> usize {
        self.stream.ssl().pending()
    }

    /// Take up to `max_len` bytes of outbound ciphertext.
    ///
    /// Fails with [`Error::WantRead`] when nothing is queued. A zero
    /// `max_len` with ciphertext queued returns an empty chunk.
    pub fn buffer_read(&mut self, max_len: usize) -> Result<Bytes> {
        self.memory_mut()?
            .pop_outbound(max_len)
            .ok_or(Error::WantRead)
    }

    /// Queue ciphertext received from the peer.
    pub fn buffer_write(&mut self, data: &[u8]) -> Result<usize> {
        Ok(self.memory_mut()?.push_inbound(data))
    }

    /// Signal that no more inbound ciphertext will arrive.
    pub fn buffer_shutdown(&mut self) -> Result<()> {
        self.memory_mut()?.set_inbound_eof();
        Ok(())
    }

    /// Ciphertext waiting to be taken with [`buffer_read`](Self::buffer_read).
    pub fn buffer_pending(&mut self) -> Result<usize> {
        Ok(self.memory_mut()?.outbound_len())
    }

    fn memory_mut(&mut self) -> Result<&mut MemoryBio> {
        self.stream.get_mut().memory_mut().ok_or_else(|| {
            Error::TypeMismatch("buffer operations require a buffer-backed connection".to_string())
        })
    }

    /// Send close-notify. Returns `true` once the peer's close-notify has
    /// been received as well.
    pub fn shutdown(&mut self) -> Result<bool> {
        match self.stream.shutdown() {
            Ok(ShutdownResult::Sent) => Ok(false),
            Ok(ShutdownResult::Received) => {
                self.state = HandshakeState::Closed;
                log::debug!("{} closed", self.id);
                Ok(true)
            }
            Err(err) => Err(self.record(Error::from_ssl(err))),
        }
    }

    pub fn shutdown_state(&mut self) -> ShutdownState {
        self.stream.get_shutdown()
    }

    pub fn set_shutdown_state(&mut self, state: ShutdownState) {
        self.stream.set_shutdown(state)
    }

    /// Shut down the underlying socket without a TLS close-notify.
    pub fn sock_shutdown(&self, how: Shutdown) -> Result<()> {
        let socket = self.stream.get_ref().socket().ok_or_else(|| {
            Error::TypeMismatch("buffer-backed connection has no socket".to_string())
        })?;
        socket.shutdown(how)?;
        Ok(())
    }

    pub fn socket(&self) -> Option<&Socket> {
        self.stream.get_ref().socket()
    }

    /// Verbose description of the engine's handshake state.
    pub fn state_string(&self) -> &'static str {
        self.stream.ssl().state_string_long()
    }

    /// Negotiated protocol version, once established.
    pub fn version(&self) -> Option<&'static str> {
        self.established_ssl().map(|ssl| ssl.version_str())
    }

    pub fn current_cipher(&self) -> Option<&'static str> {
        self.established_ssl()
            .and_then(|ssl| ssl.current_cipher())
            .map(|cipher| cipher.name())
    }

    pub fn session_reused(&self) -> bool {
        self.stream.ssl().session_reused()
    }

    /// Cipher suites this connection is willing to negotiate, in preference order.
    pub fn cipher_list(&self) -> Vec<String> {
        let ssl = self.stream.ssl().as_ptr();
        let mut ciphers = Vec::new();
        for priority in 0.. {
            let name = unsafe { SSL_get_cipher_list(ssl, priority) };
            if name.is_null() {
                break;
            }
            let name = unsafe { CStr::from_ptr(name) };
            ciphers.push(name.to_string_lossy().into_owned());
        }
        ciphers
    }

    /// Distinguished names of the certificate authorities a client may use.
    ///
    /// On a server these are the names it sends; on a client, the names the
    /// server sent with its certificate request.
    pub fn client_ca_list(&self) -> Vec<String> {
        let names = unsafe { SSL_get_client_CA_list(self.stream.ssl().as_ptr()) };
        if names.is_null() {
            return Vec::new();
        }
        let names = unsafe { StackRef::<X509Name>::from_ptr(names) };
        names.iter().map(cert::name_to_string).collect()
    }

    /// Owned copy of the negotiated session.
    pub fn session(&self) -> Option<SslSession> {
        self.established_ssl()
            .and_then(|ssl| ssl.session())
            .map(|session| session.to_owned())
    }

    pub fn peer_certificate(&self) -> Option<X509> {
        self.established_ssl().and_then(|ssl| ssl.peer_certificate())
    }

    /// Certificates presented by the peer. A server does not see the
    /// client's leaf here; use [`peer_certificate`](Self::peer_certificate).
    pub fn peer_cert_chain(&self) -> Option<Vec<X509>> {
        let chain = self.established_ssl()?.peer_cert_chain()?;
        Some(chain.iter().map(|cert| cert.to_owned()).collect())
    }

    /// Summary of the peer's leaf and chain, leaf first.
    pub fn peer_cert_info(&self) -> Vec<CertInfo> {
        self.established_ssl()
            .map(cert::get_cert_chain)
            .unwrap_or_default()
    }

    /// Negotiated master secret, once established.
    ///
    /// `None` when the session carries no master secret of its own.
    pub fn master_key(&self) -> Option<Vec<u8>> {
        let session = self.established_ssl()?.session()?;
        let len = session.master_key_len();
        if len == 0 {
            return None;
        }
        let mut key = vec![0u8; len];
        let n = session.master_key(&mut key);
        key.truncate(n);
        Some(key)
    }

    pub fn client_random(&self) -> Option<Vec<u8>> {
        let ssl = self.established_ssl()?;
        let mut random = vec![0u8; ssl.client_random(&mut [])];
        let n = ssl.client_random(&mut random);
        random.truncate(n);
        Some(random)
    }

    pub fn server_random(&self) -> Option<Vec<u8>> {
        let ssl = self.established_ssl()?;
        let mut random = vec![0u8; ssl.server_random(&mut [])];
        let n = ssl.server_random(&mut random);
        random.truncate(n);
        Some(random)
    }

    /// Snapshot of everything negotiated, once established.
    pub fn session_facts(&self) -> Option<SessionFacts> {
        let ssl = self.established_ssl()?;
        Some(SessionFacts::from_ssl(
            ssl,
            self.master_key(),
            self.client_random(),
            self.server_random(),
        ))
    }

    /// The underlying engine session.
    pub fn ssl(&self) -> &SslRef {
        self.stream.ssl()
    }

    fn ssl_mut(&mut self) -> &mut SslRef {
        // The stream is borrowed exclusively, so no other reference to the session is live.
        unsafe { SslRef::from_ptr_mut(self.stream.ssl().as_ptr()) }
    }

    fn established_ssl(&self) -> Option<&SslRef> {
        match self.state {
            HandshakeState::Established | HandshakeState::Closed => Some(self.stream.ssl()),
            _ => None,
        }
    }

    fn ensure_created(&self, action: &str) -> Result<()> {
        if self.state != HandshakeState::Created {
            return Err(Error::InvalidState(format!(
                "cannot {} once the connection is {}",
                action, self.state
            )));
        }
        Ok(())
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.state == HandshakeState::Failed {
            return Err(Error::InvalidState(format!(
                "{} failed earlier and cannot make progress",
                self.id
            )));
        }
        Ok(())
    }

    fn ready_for_data(&mut self) -> Result<()> {
        self.ensure_usable()?;
        match self.state {
            HandshakeState::Established | HandshakeState::Closed => Ok(()),
            _ => self.do_handshake(),
        }
    }

    fn record(&mut self, err: Error) -> Error {
        if err.is_fatal() {
            self.state = HandshakeState::Failed;
            log::debug!("{} failed: {}", self.id, err);
        } else if matches!(err, Error::ZeroReturn) {
            self.state = HandshakeState::Closed;
        }
        err
    }
}

extern "C" {
    fn SSL_get_cipher_list(ssl: *const ffi::SSL, priority: c_int) -> *const c_char;
    fn SSL_get_client_CA_list(ssl: *const ffi::SSL) -> *mut ffi::stack_st_X509_NAME;
}

impl fmt::Debug for Connection<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("buffer_backed", &self.is_buffer_backed())
            .finish()
    }
}
