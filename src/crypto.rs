//! Key and certificate material
//!
//! Thin helpers for moving X.509 certificates and private keys in and out
//! of PEM and DER, used by the TLS context when loading files.

use crate::tls::{Error, Result};
use openssl::error::ErrorStack;
use openssl::pkey::{PKey, PKeyRef, Private};
use openssl::rsa::Rsa;
use openssl::symm::Cipher;
use openssl::x509::{X509Ref, X509};

/// Encoding of key and certificate material
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Base64 text between `-----BEGIN ...-----` markers
    Pem,
    /// Raw DER bytes
    Asn1,
}

/// Parse a certificate.
pub fn load_certificate(file_type: FileType, data: &[u8]) -> Result<X509> {
    let cert = match file_type {
        FileType::Pem => X509::from_pem(data)?,
        FileType::Asn1 => X509::from_der(data)?,
    };
    Ok(cert)
}

/// Parse a private key, decrypting it with `passphrase` if it is encrypted.
///
/// An encrypted PEM key with no passphrase fails instead of prompting.
pub fn load_private_key(
    file_type: FileType,
    data: &[u8],
    passphrase: Option<&[u8]>,
) -> Result<PKey<Private>> {
    let key = match (file_type, passphrase) {
        (FileType::Pem, Some(passphrase)) => PKey::private_key_from_pem_passphrase(data, passphrase)?,
        (FileType::Pem, None) => {
            PKey::private_key_from_pem_callback(data, |_buf| Err(ErrorStack::get()))?
        }
        (FileType::Asn1, Some(_)) => {
            return Err(Error::InvalidArgument(
                "passphrase is only supported for PEM keys".to_string(),
            ))
        }
        (FileType::Asn1, None) => PKey::private_key_from_der(data)?,
    };
    Ok(key)
}

pub fn dump_certificate(file_type: FileType, cert: &X509Ref) -> Result<Vec<u8>> {
    let data = match file_type {
        FileType::Pem => cert.to_pem()?,
        FileType::Asn1 => cert.to_der()?,
    };
    Ok(data)
}

/// Serialize a private key, optionally encrypted as `(cipher_name, passphrase)`.
pub fn dump_private_key(
    file_type: FileType,
    key: &PKeyRef<Private>,
    encryption: Option<(&str, &[u8])>,
) -> Result<Vec<u8>> {
    let data = match (file_type, encryption) {
        (FileType::Pem, Some((cipher, passphrase))) => {
            key.private_key_to_pem_pkcs8_passphrase(cipher_by_name(cipher)?, passphrase)?
        }
        (FileType::Pem, None) => key.private_key_to_pem_pkcs8()?,
        (FileType::Asn1, Some(_)) => {
            return Err(Error::InvalidArgument(
                "encryption is only supported for PEM output".to_string(),
            ))
        }
        (FileType::Asn1, None) => key.private_key_to_der()?,
    };
    Ok(data)
}

/// Generate a fresh RSA private key.
pub fn generate_rsa_key(bits: u32) -> Result<PKey<Private>> {
    let rsa = Rsa::generate(bits)?;
    Ok(PKey::from_rsa(rsa)?)
}

fn cipher_by_name(name: &str) -> Result<Cipher> {
    match name.to_ascii_lowercase().as_str() {
        "aes-128-cbc" | "aes128" => Ok(Cipher::aes_128_cbc()),
        "aes-192-cbc" | "aes192" => Ok(Cipher::aes_192_cbc()),
        "aes-256-cbc" | "aes256" => Ok(Cipher::aes_256_cbc()),
        "des-ede3-cbc" | "des3" => Ok(Cipher::des_ede3_cbc()),
        _ => Err(Error::InvalidArgument(format!("unsupported cipher: {}", name))),
    }
}
