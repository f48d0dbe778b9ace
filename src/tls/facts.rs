//! Negotiated session facts
//!
//! A [`SessionFacts`] is a snapshot taken after the handshake: what was
//! negotiated, the per-session secrets both peers agree on, and the peer's
//! certificates.

use super::cert::{get_cert_chain, CertInfo};
use openssl::ssl::SslRef;

/// Values negotiated by an established session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFacts {
    /// Protocol version (e.g. "TLSv1.2")
    pub version: String,

    pub cipher: String,

    /// Whether an earlier session was resumed
    pub session_reused: bool,

    pub master_key: Option<Vec<u8>>,
    pub client_random: Option<Vec<u8>>,
    pub server_random: Option<Vec<u8>>,

    /// Peer certificates, leaf first
    pub peer_chain: Vec<CertInfo>,
}

impl SessionFacts {
    pub(crate) fn from_ssl(
        ssl: &SslRef,
        master_key: Option<Vec<u8>>,
        client_random: Option<Vec<u8>>,
        server_random: Option<Vec<u8>>,
    ) -> Self {
        SessionFacts {
            version: ssl.version_str().to_string(),
            cipher: ssl
                .current_cipher()
                .map(|c| c.name().to_string())
                .unwrap_or_else(|| "<undef>".to_string()),
            session_reused: ssl.session_reused(),
            master_key,
            client_random,
            server_random,
            peer_chain: get_cert_chain(ssl),
        }
    }

    /// Peer certificate by position (0 is the leaf).
    pub fn peer_cert(&self, index: usize) -> Option<&CertInfo> {
        self.peer_chain.get(index)
    }

    /// Subject common name of the peer's leaf certificate.
    pub fn peer_subject(&self) -> Option<&str> {
        self.peer_cert(0).map(|cert| cert.subject.as_str())
    }

    /// True when both snapshots describe the same session from opposite ends.
    pub fn agrees_with(&self, other: &SessionFacts) -> bool {
        self.version == other.version
            && self.cipher == other.cipher
            && self.master_key == other.master_key
            && self.client_random == other.client_random
            && self.server_random == other.server_random
    }
}
