//! TLS context configuration
//!
//! A [`ContextBuilder`] collects protocol policy, option flags, verification
//! mode, key material and callbacks; [`ContextBuilder::build`] freezes them
//! into an immutable [`Context`] from which connections are created.

use super::callbacks::{self, CertificateVerifier, HandshakeObserver, PassphraseProvider};
use super::session::Connection;
use super::store::CertificateStore;
use super::{Error, Result};
use crate::crypto::{self, FileType};
use openssl::pkey::{PKey, PKeyRef, Private};
use openssl::ssl::{
    SslContext, SslContextBuilder, SslContextRef, SslMethod, SslMode, SslOptions, SslVerifyMode,
    SslVersion,
};
use openssl::x509::{X509Ref, X509};
use socket2::Socket;
use std::fmt;
use std::fs;
use std::ops::BitOr;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Protocol version selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// SSL 2.0. Current engines cannot speak it; pinned to SSL 3.0 instead.
    Sslv2,
    /// SSL 3.0 only
    Sslv3,
    /// Highest version both peers support, up to TLS 1.2
    Sslv23,
    /// TLS 1.0 through TLS 1.2
    Tlsv1,
}

impl Method {
    pub const ALL: [Method; 4] = [Method::Sslv2, Method::Sslv3, Method::Sslv23, Method::Tlsv1];

    /// Map a numeric selector (1 = SSLv2, 2 = SSLv3, 3 = SSLv23, 4 = TLSv1).
    pub fn from_raw(raw: i64) -> Result<Self> {
        match raw {
            1 => Ok(Method::Sslv2),
            2 => Ok(Method::Sslv3),
            3 => Ok(Method::Sslv23),
            4 => Ok(Method::Tlsv1),
            _ => Err(Error::InvalidArgument(format!("no such protocol method: {}", raw))),
        }
    }

    pub fn as_raw(self) -> i64 {
        match self {
            Method::Sslv2 => 1,
            Method::Sslv3 => 2,
            Method::Sslv23 => 3,
            Method::Tlsv1 => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Sslv2 => "SSLv2_METHOD",
            Method::Sslv3 => "SSLv3_METHOD",
            Method::Sslv23 => "SSLv23_METHOD",
            Method::Tlsv1 => "TLSv1_METHOD",
        }
    }

    /// Minimum and maximum protocol versions; `None` leaves a bound open.
    fn version_bounds(self) -> (Option<SslVersion>, Option<SslVersion>) {
        match self {
            Method::Sslv2 | Method::Sslv3 => (Some(SslVersion::SSL3), Some(SslVersion::SSL3)),
            Method::Sslv23 => (None, Some(SslVersion::TLS1_2)),
            Method::Tlsv1 => (Some(SslVersion::TLS1), Some(SslVersion::TLS1_2)),
        }
    }
}

impl FromStr for Method {
    type Err = Error;

    /// Accepts a numeric selector or a selector name (`"TLSv1_METHOD"`, `"tlsv1"`).
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(raw) = s.parse::<i64>() {
            return Method::from_raw(raw);
        }
        let name = s.to_ascii_uppercase();
        let name = name.strip_suffix("_METHOD").unwrap_or(&name);
        match name {
            "SSLV2" => Ok(Method::Sslv2),
            "SSLV3" => Ok(Method::Sslv3),
            "SSLV23" => Ok(Method::Sslv23),
            "TLSV1" => Ok(Method::Tlsv1),
            _ => Err(Error::TypeMismatch(format!(
                "protocol method must be an integer selector, got {:?}",
                s
            ))),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine option flags, OR-combinable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Options(u64);

impl Options {
    pub const NONE: Options = Options(0);
    pub const NO_SSLV2: Options = Options(SslOptions::NO_SSLV2.bits() as u64);
    pub const NO_SSLV3: Options = Options(SslOptions::NO_SSLV3.bits() as u64);
    pub const SINGLE_DH_USE: Options = Options(SslOptions::SINGLE_DH_USE.bits() as u64);

    // Not every engine build defines these; check before use.
    pub const NO_QUERY_MTU: Option<Options> = Some(Options(SslOptions::NO_QUERY_MTU.bits() as u64));
    pub const COOKIE_EXCHANGE: Option<Options> =
        Some(Options(SslOptions::COOKIE_EXCHANGE.bits() as u64));
    pub const NO_TICKET: Option<Options> = Some(Options(SslOptions::NO_TICKET.bits() as u64));

    pub const fn from_bits(bits: u64) -> Self {
        Options(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn contains(self, other: Options) -> bool {
        self.0 & other.0 == other.0
    }

    fn to_ssl(self) -> SslOptions {
        SslOptions::from_bits_retain(self.0 as _)
    }

    fn from_ssl(options: SslOptions) -> Self {
        Options(options.bits() as u64)
    }
}

impl BitOr for Options {
    type Output = Options;

    fn bitor(self, rhs: Options) -> Options {
        Options(self.0 | rhs.0)
    }
}

/// Peer verification mode, OR-combinable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VerifyMode(i32);

impl VerifyMode {
    pub const NONE: VerifyMode = VerifyMode(0x00);
    /// Request and verify the peer's certificate.
    pub const PEER: VerifyMode = VerifyMode(0x01);
    /// Server side: fail the handshake when the client sends no certificate.
    pub const FAIL_IF_NO_PEER_CERT: VerifyMode = VerifyMode(0x02);
    /// Server side: only request the client certificate on the first handshake.
    pub const CLIENT_ONCE: VerifyMode = VerifyMode(0x04);

    pub const fn bits(self) -> i32 {
        self.0
    }

    pub const fn contains(self, other: VerifyMode) -> bool {
        self.0 & other.0 == other.0
    }

    fn to_ssl(self) -> SslVerifyMode {
        SslVerifyMode::from_bits_retain(self.0)
    }
}

impl BitOr for VerifyMode {
    type Output = VerifyMode;

    fn bitor(self, rhs: VerifyMode) -> VerifyMode {
        VerifyMode(self.0 | rhs.0)
    }
}

/// Context builder
pub struct ContextBuilder {
    inner: SslContextBuilder,
    method: Method,
    options: Options,
    verify_mode: VerifyMode,
    passphrase: Option<Arc<dyn PassphraseProvider>>,
    passphrase_userdata: Option<Vec<u8>>,
}

impl ContextBuilder {
    pub fn new(method: Method) -> Result<Self> {
        let mut inner = SslContextBuilder::new(SslMethod::tls())?;

        let (min, max) = method.version_bounds();
        inner.set_min_proto_version(min)?;
        inner.set_max_proto_version(max)?;

        // Large writes report a short count rather than queueing every record.
        inner.set_mode(SslMode::ENABLE_PARTIAL_WRITE | SslMode::ACCEPT_MOVING_WRITE_BUFFER);
        inner.set_verify(SslVerifyMode::NONE);
        let options = Options::from_ssl(inner.set_options(SslOptions::empty()));

        Ok(ContextBuilder {
            inner,
            method,
            options,
            verify_mode: VerifyMode::NONE,
            passphrase: None,
            passphrase_userdata: None,
        })
    }

    /// Parse a protocol selector and create a builder for it.
    pub fn from_selector(selector: &str) -> Result<Self> {
        ContextBuilder::new(selector.parse()?)
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// OR `options` into the context's flags and return the full set.
    pub fn set_options(&mut self, options: Options) -> Options {
        self.options = Options::from_ssl(self.inner.set_options(options.to_ssl()));
        self.options
    }

    pub fn options(&self) -> Options {
        self.options
    }

    pub fn set_private_key(&mut self, key: &PKeyRef<Private>) -> Result<()> {
        self.inner.set_private_key(key)?;
        Ok(())
    }

    pub fn set_certificate(&mut self, cert: &X509Ref) -> Result<()> {
        self.inner.set_certificate(cert)?;
        Ok(())
    }

    /// Append an intermediate sent after the leaf certificate.
    pub fn add_extra_chain_cert(&mut self, cert: X509) -> Result<()> {
        self.inner.add_extra_chain_cert(cert)?;
        Ok(())
    }

    /// Install the provider consulted when an encrypted private key is loaded.
    pub fn set_passphrase_callback<P>(&mut self, provider: P)
    where
        P: PassphraseProvider + 'static,
    {
        self.passphrase = Some(Arc::new(provider));
    }

    /// Opaque value handed to the passphrase provider.
    pub fn set_passphrase_userdata(&mut self, userdata: impl Into<Vec<u8>>) {
        self.passphrase_userdata = Some(userdata.into());
    }

    /// Load the private key from a file, decrypting it through the
    /// passphrase provider if needed.
    pub fn use_private_key_file<P: AsRef<Path>>(&mut self, path: P, file_type: FileType) -> Result<()> {
        let data = fs::read(path.as_ref())?;
        let key = match (file_type, &self.passphrase) {
            (FileType::Pem, Some(provider)) => {
                let userdata = self.passphrase_userdata.as_deref();
                PKey::private_key_from_pem_callback(&data, |buf| {
                    callbacks::passphrase_bridge(provider.as_ref(), userdata, buf)
                })?
            }
            _ => crypto::load_private_key(file_type, &data, None)?,
        };
        self.inner.set_private_key(&key)?;
        Ok(())
    }

    pub fn use_certificate_file<P: AsRef<Path>>(&mut self, path: P, file_type: FileType) -> Result<()> {
        let data = fs::read(path.as_ref())?;
        let cert = crypto::load_certificate(file_type, &data)?;
        self.inner.set_certificate(&cert)?;
        Ok(())
    }

    /// Load a leaf certificate followed by its chain from a PEM file.
    pub fn use_certificate_chain_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.inner.set_certificate_chain_file(path)?;
        Ok(())
    }

    /// Fail unless the private key matches the certificate's public key.
    pub fn check_private_key(&self) -> Result<()> {
        self.inner.check_private_key()?;
        Ok(())
    }

    /// Trust certificates from a PEM file and/or a hashed directory.
    pub fn load_verify_locations(&mut self, ca_file: Option<&Path>, ca_path: Option<&Path>) -> Result<()> {
        if ca_file.is_none() && ca_path.is_none() {
            return Err(Error::InvalidArgument(
                "a CA file or a CA directory is required".to_string(),
            ));
        }
        // Directory lookups are lazy in the engine, so a missing one is caught here.
        if let Some(dir) = ca_path {
            if !dir.is_dir() {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("CA directory not found: {}", dir.display()),
                )));
            }
        }

        self.inner.load_verify_locations(ca_file, ca_path)?;
        log::debug!("loaded trust locations file={:?} dir={:?}", ca_file, ca_path);
        Ok(())
    }

    /// Trust the platform's default anchors.
    pub fn set_default_verify_paths(&mut self) -> Result<()> {
        self.inner.set_default_verify_paths()?;
        Ok(())
    }

    pub fn cert_store(&mut self) -> CertificateStore<'_> {
        CertificateStore::new(self.inner.cert_store_mut())
    }

    /// Set the verification mode and the per-certificate predicate.
    pub fn set_verify<V>(&mut self, mode: VerifyMode, verifier: V)
    where
        V: CertificateVerifier + 'static,
    {
        self.verify_mode = mode;
        self.inner.set_verify_callback(mode.to_ssl(), move |preverify_ok, store| {
            callbacks::verify_bridge(&verifier, preverify_ok, store)
        });
    }

    pub fn verify_mode(&self) -> VerifyMode {
        self.verify_mode
    }

    pub fn set_verify_depth(&mut self, depth: u32) {
        self.inner.set_verify_depth(depth);
    }

    /// Install an observer for handshake milestones.
    pub fn set_info_callback<O>(&mut self, observer: O) -> Result<()>
    where
        O: HandshakeObserver + 'static,
    {
        callbacks::install_observer(&mut self.inner, Arc::new(observer))?;
        Ok(())
    }

    /// Cipher list for TLS 1.2 and below.
    pub fn set_cipher_list(&mut self, ciphers: &str) -> Result<()> {
        self.inner.set_cipher_list(ciphers)?;
        Ok(())
    }

    pub fn set_session_id_context(&mut self, sid_ctx: &[u8]) -> Result<()> {
        self.inner.set_session_id_context(sid_ctx)?;
        Ok(())
    }

    /// Name `cacert`'s subject in certificate requests sent to clients.
    pub fn add_client_ca(&mut self, cacert: &X509Ref) -> Result<()> {
        self.inner.add_client_ca(cacert)?;
        Ok(())
    }

    /// Freeze the configuration.
    pub fn build(self) -> Context {
        Context {
            inner: self.inner.build(),
            method: self.method,
            options: self.options,
            verify_mode: self.verify_mode,
        }
    }
}

/// Immutable TLS context
///
/// Connections borrow the context they were created from, so it outlives
/// all of them.
pub struct Context {
    pub(crate) inner: SslContext,
    method: Method,
    options: Options,
    verify_mode: VerifyMode,
}

impl Context {
    pub fn builder(method: Method) -> Result<ContextBuilder> {
        ContextBuilder::new(method)
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn options(&self) -> Options {
        self.options
    }

    pub fn verify_mode(&self) -> VerifyMode {
        self.verify_mode
    }

    pub fn ssl_context(&self) -> &SslContextRef {
        &self.inner
    }

    /// Create a connection over `socket`, or over memory queues for `None`.
    pub fn connection(&self, socket: Option<Socket>) -> Result<Connection<'_>> {
        Connection::new(self, socket)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("method", &self.method)
            .field("options", &self.options)
            .field("verify_mode", &self.verify_mode)
            .finish()
    }
}
