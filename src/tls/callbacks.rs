//! Callback bridges
//!
//! The engine calls back into the application at three points: while
//! decrypting a private key, once per certificate while walking the
//! peer's chain, and at handshake milestones. Each role is a small trait
//! held by the context as an owned trait object and invoked synchronously
//! from inside the engine call that triggered it.

use super::session::connection_id_index;
use super::session::ConnectionId;
use foreign_types_shared::ForeignTypeRef;
use libc::c_int;
use openssl::error::ErrorStack;
use openssl::ex_data::Index;
use openssl::ssl::{SslContext, SslContextBuilder, SslRef};
use openssl::x509::{X509Ref, X509StoreContext, X509StoreContextRef, X509VerifyResult};
use openssl_sys as ffi;
use std::fmt;
use std::ops::BitOr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

/// Supplies the passphrase for an encrypted private key.
///
/// `max_len` is the largest passphrase the engine accepts; a longer
/// answer is rejected and the key fails to load. `verify` is true when the
/// engine is encrypting and wants the passphrase confirmed. `userdata` is
/// whatever was registered with
/// [`ContextBuilder::set_passphrase_userdata`](super::ContextBuilder::set_passphrase_userdata).
pub trait PassphraseProvider: Send + Sync {
    fn passphrase(&self, max_len: usize, verify: bool, userdata: Option<&[u8]>) -> Vec<u8>;
}

impl<F> PassphraseProvider for F
where
    F: Fn(usize, bool, Option<&[u8]>) -> Vec<u8> + Send + Sync,
{
    fn passphrase(&self, max_len: usize, verify: bool, userdata: Option<&[u8]>) -> Vec<u8> {
        self(max_len, verify, userdata)
    }
}

/// Decides whether a certificate in the peer's chain is acceptable.
///
/// Called once per certificate, deepest first. `preverify_ok` is the
/// engine's own verdict; returning `false` at any depth aborts the
/// handshake.
pub trait CertificateVerifier: Send + Sync {
    fn verify(
        &self,
        conn: &ConnectionRef<'_>,
        cert: &X509Ref,
        error: X509VerifyResult,
        depth: u32,
        preverify_ok: bool,
    ) -> bool;
}

impl<F> CertificateVerifier for F
where
    F: Fn(&ConnectionRef<'_>, &X509Ref, X509VerifyResult, u32, bool) -> bool + Send + Sync,
{
    fn verify(
        &self,
        conn: &ConnectionRef<'_>,
        cert: &X509Ref,
        error: X509VerifyResult,
        depth: u32,
        preverify_ok: bool,
    ) -> bool {
        self(conn, cert, error, depth, preverify_ok)
    }
}

/// Verifier that accepts exactly what the engine accepted.
#[derive(Debug, Clone, Copy, Default)]
pub struct Preverified;

impl CertificateVerifier for Preverified {
    fn verify(
        &self,
        _conn: &ConnectionRef<'_>,
        _cert: &X509Ref,
        _error: X509VerifyResult,
        _depth: u32,
        preverify_ok: bool,
    ) -> bool {
        preverify_ok
    }
}

/// Observes handshake progress. Observation only: it cannot fail the
/// handshake, and a panic is caught and logged at the engine boundary.
pub trait HandshakeObserver: Send + Sync {
    fn on_info(&self, conn: &ConnectionRef<'_>, location: InfoWhere, ret: i32);
}

impl<F> HandshakeObserver for F
where
    F: Fn(&ConnectionRef<'_>, InfoWhere, i32) + Send + Sync,
{
    fn on_info(&self, conn: &ConnectionRef<'_>, location: InfoWhere, ret: i32) {
        self(conn, location, ret)
    }
}

/// The connection a callback fires for, as seen from inside the engine.
pub struct ConnectionRef<'a> {
    ssl: &'a SslRef,
}

impl<'a> ConnectionRef<'a> {
    pub(crate) fn new(ssl: &'a SslRef) -> Self {
        ConnectionRef { ssl }
    }

    /// Id of the owning [`Connection`](super::Connection).
    pub fn id(&self) -> Option<ConnectionId> {
        let index = connection_id_index().ok()?;
        self.ssl.ex_data(index).copied()
    }

    /// Verbose description of the engine's handshake state.
    pub fn state_string(&self) -> &'static str {
        self.ssl.state_string_long()
    }

    pub fn version(&self) -> &'static str {
        self.ssl.version_str()
    }

    /// The underlying engine connection.
    pub fn ssl(&self) -> &'a SslRef {
        self.ssl
    }
}

impl fmt::Debug for ConnectionRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRef")
            .field("id", &self.id())
            .field("state", &self.state_string())
            .finish()
    }
}

/// Location bitmask passed to [`HandshakeObserver::on_info`].
///
/// Values are the engine's `SSL_CB_*` constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoWhere(i32);

impl InfoWhere {
    pub const LOOP: InfoWhere = InfoWhere(0x01);
    pub const EXIT: InfoWhere = InfoWhere(0x02);
    pub const READ: InfoWhere = InfoWhere(0x04);
    pub const WRITE: InfoWhere = InfoWhere(0x08);
    pub const HANDSHAKE_START: InfoWhere = InfoWhere(0x10);
    pub const HANDSHAKE_DONE: InfoWhere = InfoWhere(0x20);
    pub const CONNECT: InfoWhere = InfoWhere(0x1000);
    pub const ACCEPT: InfoWhere = InfoWhere(0x2000);
    pub const ALERT: InfoWhere = InfoWhere(0x4000);

    pub const fn from_bits(bits: i32) -> Self {
        InfoWhere(bits)
    }

    pub const fn bits(self) -> i32 {
        self.0
    }

    pub const fn contains(self, other: InfoWhere) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for InfoWhere {
    type Output = InfoWhere;

    fn bitor(self, rhs: InfoWhere) -> InfoWhere {
        InfoWhere(self.0 | rhs.0)
    }
}

/// Fill the engine's passphrase buffer from a provider.
pub(crate) fn passphrase_bridge(
    provider: &dyn PassphraseProvider,
    userdata: Option<&[u8]>,
    buf: &mut [u8],
) -> Result<usize, ErrorStack> {
    let passphrase = provider.passphrase(buf.len(), false, userdata);
    if passphrase.len() > buf.len() {
        log::warn!(
            "passphrase of {} bytes exceeds the engine limit of {}",
            passphrase.len(),
            buf.len()
        );
        return Err(ErrorStack::get());
    }
    buf[..passphrase.len()].copy_from_slice(&passphrase);
    Ok(passphrase.len())
}

/// Run a verifier for the certificate the store context is positioned on.
pub(crate) fn verify_bridge(
    verifier: &dyn CertificateVerifier,
    preverify_ok: bool,
    store: &mut X509StoreContextRef,
) -> bool {
    let depth = store.error_depth();
    let error = store.error();
    let ssl = match X509StoreContext::ssl_idx() {
        Ok(index) => store.ex_data(index),
        Err(_) => None,
    };
    let (Some(ssl), Some(cert)) = (ssl, store.current_cert()) else {
        return preverify_ok;
    };

    let accepted = verifier.verify(&ConnectionRef::new(ssl), cert, error, depth, preverify_ok);
    if !accepted {
        log::debug!(
            "verifier rejected certificate at depth {} ({})",
            depth,
            error.error_string()
        );
    }
    accepted
}

type SharedObserver = Arc<dyn HandshakeObserver>;

static OBSERVER_INDEX: OnceLock<Index<SslContext, SharedObserver>> = OnceLock::new();

fn observer_index() -> Result<Index<SslContext, SharedObserver>, ErrorStack> {
    if let Some(index) = OBSERVER_INDEX.get() {
        return Ok(*index);
    }
    let index = SslContext::new_ex_index::<SharedObserver>()?;
    Ok(*OBSERVER_INDEX.get_or_init(|| index))
}

extern "C" {
    fn SSL_CTX_set_info_callback(
        ctx: *mut ffi::SSL_CTX,
        cb: Option<unsafe extern "C" fn(ssl: *const ffi::SSL, location: c_int, ret: c_int)>,
    );
}

unsafe extern "C" fn raw_info_callback(ssl: *const ffi::SSL, location: c_int, ret: c_int) {
    let ssl = SslRef::from_ptr(ssl as *mut ffi::SSL);
    let Ok(index) = observer_index() else {
        return;
    };
    let Some(observer) = ssl.ssl_context().ex_data(index) else {
        return;
    };

    let result = catch_unwind(AssertUnwindSafe(|| {
        observer.on_info(&ConnectionRef::new(ssl), InfoWhere(location), ret)
    }));
    if result.is_err() {
        log::error!("handshake observer panicked; notification dropped");
    }
}

/// Attach an observer to a context under construction.
pub(crate) fn install_observer(
    builder: &mut SslContextBuilder,
    observer: SharedObserver,
) -> Result<(), ErrorStack> {
    let index = observer_index()?;
    builder.set_ex_data(index, observer);
    unsafe { SSL_CTX_set_info_callback(builder.as_ptr(), Some(raw_info_callback)) };
    Ok(())
}
