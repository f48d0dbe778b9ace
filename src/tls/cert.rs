//! Certificate summaries
//!
//! Extracts the fields callers usually check on a peer certificate: the
//! subject and issuer common names, the subject alternative names and the
//! subject hash used by trust directories.

use super::store::subject_hash;
use openssl::nid::Nid;
use openssl::ssl::SslRef;
use openssl::x509::{X509NameRef, X509Ref};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Certificate information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    /// Subject common name
    pub subject: String,
    /// Issuer common name
    pub issuer: String,
    /// `DNS:` and `IP:` prefixed alternative names
    pub subject_alt_names: Vec<String>,
    pub subject_hash: u32,
}

impl CertInfo {
    pub fn from_x509(cert: &X509Ref) -> Self {
        CertInfo {
            subject: common_name(cert.subject_name()),
            issuer: common_name(cert.issuer_name()),
            subject_alt_names: subject_alt_names(cert),
            subject_hash: subject_hash(cert),
        }
    }

    pub fn is_self_issued(&self) -> bool {
        self.subject == self.issuer
    }
}

fn common_name(name: &X509NameRef) -> String {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().to_string().ok())
        .unwrap_or_else(|| "<undef>".to_string())
}

/// One-line rendering of a distinguished name, e.g. `C=US, O=Example, CN=Root`.
pub(crate) fn name_to_string(name: &X509NameRef) -> String {
    name.entries()
        .map(|entry| {
            let key = entry.object().nid().short_name().unwrap_or("?");
            let value = entry
                .data()
                .to_string()
                .unwrap_or_else(|_| String::from_utf8_lossy(entry.data().as_slice()).into_owned());
            format!("{}={}", key, value)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn subject_alt_names(cert: &X509Ref) -> Vec<String> {
    let Some(sans) = cert.subject_alt_names() else {
        return Vec::new();
    };

    sans.iter()
        .filter_map(|name| {
            if let Some(dns) = name.dnsname() {
                return Some(format!("DNS:{}", dns));
            }
            let ip = name.ipaddress()?;
            let addr = match ip.len() {
                4 => IpAddr::V4(Ipv4Addr::new(ip[0], ip[1], ip[2], ip[3])),
                16 => {
                    let mut octets = [0u8; 16];
                    octets.copy_from_slice(ip);
                    IpAddr::V6(Ipv6Addr::from(octets))
                }
                _ => return None,
            };
            Some(format!("IP:{}", addr))
        })
        .collect()
}

/// Peer certificates of an established session, leaf first.
///
/// On the client the engine's chain already starts with the leaf; on the
/// server the leaf is only available separately, so it is prepended.
pub fn get_cert_chain(ssl: &SslRef) -> Vec<CertInfo> {
    let mut chain: Vec<CertInfo> = ssl
        .peer_cert_chain()
        .map(|stack| stack.iter().map(CertInfo::from_x509).collect())
        .unwrap_or_default();

    if let Some(leaf) = ssl.peer_certificate() {
        let leaf = CertInfo::from_x509(&leaf);
        if chain.first() != Some(&leaf) {
            chain.insert(0, leaf);
        }
    }

    chain
}
