//! Trusted certificate store
//!
//! [`CertificateStore`] is an add-only view of the trust anchors owned by a
//! [`ContextBuilder`](super::ContextBuilder). Trust directories follow the
//! engine's hashed-subject convention: a certificate is found through a
//! symlink named `<subject-hash>.<n>` pointing at its PEM file.

use super::{Error, Result};
use openssl::x509::store::X509StoreBuilderRef;
use openssl::x509::{X509Ref, X509};
use std::fs;
use std::path::Path;

/// Add-only view of a context's trust anchors
pub struct CertificateStore<'a> {
    inner: &'a mut X509StoreBuilderRef,
}

impl<'a> CertificateStore<'a> {
    pub(crate) fn new(inner: &'a mut X509StoreBuilderRef) -> Self {
        CertificateStore { inner }
    }

    /// Trust a certificate. Adding one that is already present is not an error.
    pub fn add_cert(&mut self, cert: &X509Ref) -> Result<()> {
        self.inner.add_cert(cert.to_owned())?;
        Ok(())
    }

    /// Trust every certificate in a concatenation of PEM blocks.
    ///
    /// Returns how many certificates were added.
    pub fn add_pem_bundle(&mut self, pem: &[u8]) -> Result<usize> {
        let certs = X509::stack_from_pem(pem)?;
        if certs.is_empty() {
            return Err(Error::InvalidArgument("no PEM certificates found".to_string()));
        }
        for cert in &certs {
            self.inner.add_cert(cert.clone())?;
        }
        log::debug!("added {} certificates from PEM bundle", certs.len());
        Ok(certs.len())
    }

    /// Trust the platform's default anchor locations.
    pub fn set_default_paths(&mut self) -> Result<()> {
        self.inner.set_default_paths()?;
        Ok(())
    }
}

/// Engine hash of a certificate's subject name.
pub fn subject_hash(cert: &X509Ref) -> u32 {
    cert.subject_name_hash()
}

/// File name a trust directory uses for the first certificate with this subject.
pub fn hash_link_name(cert: &X509Ref) -> String {
    format!("{:08x}.0", subject_hash(cert))
}

/// Create `<subject-hash>.<n>` links for every PEM certificate file in `dir`.
///
/// Existing hash links are left alone; collisions get the next free
/// suffix. Returns the number of links created.
#[cfg(unix)]
pub fn rehash_directory<P: AsRef<Path>>(dir: P) -> Result<usize> {
    use std::os::unix::fs::symlink;

    let dir = dir.as_ref();
    let mut created = 0;

    let mut entries: Vec<_> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && !is_hash_link(path))
        .collect();
    entries.sort();

    for path in entries {
        let Ok(pem) = fs::read(&path) else {
            continue;
        };
        let Ok(cert) = X509::from_pem(&pem) else {
            continue;
        };
        let Some(file_name) = path.file_name() else {
            continue;
        };

        let hash = subject_hash(&cert);
        let mut suffix = 0;
        loop {
            let link = dir.join(format!("{:08x}.{}", hash, suffix));
            match fs::read_link(&link) {
                Ok(target) if target.as_os_str() == file_name => break,
                Ok(_) => suffix += 1,
                Err(_) if link.exists() => suffix += 1,
                Err(_) => {
                    symlink(file_name, &link)?;
                    log::debug!("linked {} -> {}", link.display(), path.display());
                    created += 1;
                    break;
                }
            }
        }
    }

    Ok(created)
}

fn is_hash_link(path: &Path) -> bool {
    let is_link = fs::symlink_metadata(path)
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false);
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let Some((hash, suffix)) = name.split_once('.') else {
        return false;
    };
    is_link
        && hash.len() == 8
        && hash.chars().all(|c| c.is_ascii_hexdigit())
        && suffix.chars().all(|c| c.is_ascii_digit())
}
