// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Trusted certificate collection and chain resolution.
//!
//! Apple's root and intermediate certificate authorities are embedded in the
//! binary at build time from `certs/root/` and `certs/intermediate/` (see
//! `scripts/fetch-apple-certs.sh`). The canonical source of this data is
//! <https://www.apple.com/certificateauthority/>.
//!
//! On macOS the collection can be extended with certificates exported from a
//! keychain via the `security` tool.

use {
    crate::{certificate::AppleCertificate, error::QuillError},
    log::{debug, warn},
    once_cell::sync::Lazy,
    std::{
        collections::{HashMap, HashSet},
        path::Path,
    },
    x509_certificate::CapturedX509Certificate,
};

mod embedded {
    include!(concat!(env!("OUT_DIR"), "/embedded_certs.rs"));
}

/// Default keychain consulted for missing chain certificates.
pub const SYSTEM_KEYCHAIN: &str = "/Library/Keychains/System.keychain";

static EMBEDDED_STORE: Lazy<CertificateStore> = Lazy::new(|| {
    let mut store = CertificateStore::default();

    for (name, data) in embedded::ROOT_CERTIFICATES {
        match CapturedX509Certificate::from_pem_multiple(data) {
            Ok(certs) => certs.into_iter().for_each(|cert| store.add_root(cert)),
            Err(e) => warn!("ignoring embedded root certificate {}: {}", name, e),
        }
    }

    for (name, data) in embedded::INTERMEDIATE_CERTIFICATES {
        match CapturedX509Certificate::from_pem_multiple(data) {
            Ok(certs) => certs
                .into_iter()
                .for_each(|cert| store.add_intermediate(cert)),
            Err(e) => warn!("ignoring embedded intermediate certificate {}: {}", name, e),
        }
    }

    if store.roots.is_empty() {
        warn!("no Apple root certificates were embedded at build time");
    }

    store
});

/// A certificate chain could not be resolved to a self-signed root.
///
/// Carries whatever part of the chain was found, leaf first.
#[derive(Clone, Debug, thiserror::Error)]
#[error("incomplete certificate chain: unable to find issuer {missing} of {subject}")]
pub struct IncompleteChain {
    pub chain: Vec<CapturedX509Certificate>,
    /// Common name of the issuer we were looking for.
    pub missing: String,
    /// Display name of the last certificate in `chain`.
    pub subject: String,
}

/// An indexed collection of CA certificates.
#[derive(Clone, Debug, Default)]
pub struct CertificateStore {
    roots: Vec<CapturedX509Certificate>,
    intermediates: Vec<CapturedX509Certificate>,
    by_common_name: HashMap<String, Vec<CapturedX509Certificate>>,
    by_subject_key_id: HashMap<Vec<u8>, CapturedX509Certificate>,
}

impl CertificateStore {
    /// The certificates embedded at build time.
    pub fn embedded() -> &'static CertificateStore {
        &EMBEDDED_STORE
    }

    fn index(&mut self, cert: &CapturedX509Certificate) -> bool {
        let entries = self
            .by_common_name
            .entry(cert.subject_common_name().unwrap_or_default())
            .or_default();

        if entries.contains(cert) {
            return false;
        }

        entries.push(cert.clone());

        if let Some(ski) = cert.subject_key_identifier() {
            self.by_subject_key_id.insert(ski, cert.clone());
        }

        true
    }

    pub fn add_root(&mut self, cert: CapturedX509Certificate) {
        if self.index(&cert) {
            self.roots.push(cert);
        }
    }

    pub fn add_intermediate(&mut self, cert: CapturedX509Certificate) {
        if self.index(&cert) {
            self.intermediates.push(cert);
        }
    }

    /// Add a certificate, classifying it as root if self-signed.
    pub fn add(&mut self, cert: CapturedX509Certificate) {
        if cert.is_self_signed() {
            self.add_root(cert)
        } else {
            self.add_intermediate(cert)
        }
    }

    /// Add every certificate in a PEM bundle. Returns how many were parsed.
    pub fn add_pem_bundle(&mut self, data: &[u8]) -> Result<usize, QuillError> {
        let certs = CapturedX509Certificate::from_pem_multiple(data)?;
        let count = certs.len();

        certs.into_iter().for_each(|cert| self.add(cert));

        Ok(count)
    }

    pub fn roots(&self) -> &[CapturedX509Certificate] {
        &self.roots
    }

    pub fn intermediates(&self) -> &[CapturedX509Certificate] {
        &self.intermediates
    }

    pub fn by_common_name(&self, cn: &str) -> &[CapturedX509Certificate] {
        self.by_common_name
            .get(cn)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn by_subject_key_id(&self, ski: &[u8]) -> Option<&CapturedX509Certificate> {
        self.by_subject_key_id.get(ski)
    }

    /// Find the issuer of a certificate among indexed certificates.
    fn find_issuer(&self, cert: &CapturedX509Certificate) -> Option<&CapturedX509Certificate> {
        let target_key = cert.authority_key_identifier();
        let issuer_cn = cert.issuer_common_name().unwrap_or_default();

        let by_name = self.by_common_name(&issuer_cn).iter().find(|candidate| {
            match (&target_key, candidate.subject_key_identifier()) {
                (Some(target), Some(ski)) => target == &ski,
                _ => candidate.subject_name() == cert.issuer_name(),
            }
        });

        by_name.or_else(|| {
            target_key
                .as_ref()
                .and_then(|target| self.by_subject_key_id(target))
        })
    }

    /// Resolve the chain for a leaf certificate, leaf first.
    ///
    /// Walks upward following Authority Key Identifier to Subject Key Identifier
    /// links until a self-signed certificate is reached. Every hop must add a
    /// certificate not seen before, so the walk terminates.
    pub fn find_chain(
        &self,
        leaf: &CapturedX509Certificate,
    ) -> Result<Vec<CapturedX509Certificate>, IncompleteChain> {
        let mut chain = vec![leaf.clone()];
        let mut visited = HashSet::new();
        visited.insert(chain_key(leaf));

        loop {
            let current = &chain[chain.len() - 1];

            if current.is_self_signed() {
                return Ok(chain);
            }

            let incomplete = |chain: Vec<CapturedX509Certificate>| {
                let last = &chain[chain.len() - 1];

                IncompleteChain {
                    missing: last.issuer_common_name().unwrap_or_default(),
                    subject: last.display_name(),
                    chain,
                }
            };

            match self.find_issuer(current) {
                Some(issuer) if visited.insert(chain_key(issuer)) => {
                    debug!(
                        "{} is issued by {}",
                        current.display_name(),
                        issuer.display_name()
                    );
                    chain.push(issuer.clone());
                }
                _ => return Err(incomplete(chain)),
            }
        }
    }

    /// Merge certificates matching a common name from a macOS keychain.
    ///
    /// Returns the number of certificates found.
    pub fn add_from_keychain(&mut self, cn: &str, keychain: &Path) -> Result<usize, QuillError> {
        let output = duct::cmd(
            "security",
            vec![
                "find-certificate".to_string(),
                "-a".to_string(),
                "-c".to_string(),
                cn.to_string(),
                "-p".to_string(),
                keychain.display().to_string(),
            ],
        )
        .stderr_null()
        .read()
        .map_err(|e| QuillError::Keychain(e.to_string()))?;

        if output.trim().is_empty() {
            return Ok(0);
        }

        self.add_pem_bundle(output.as_bytes())
    }

    /// Resolve a chain, consulting the keychain for missing issuers on macOS.
    pub fn find_chain_with_keychain(
        &self,
        leaf: &CapturedX509Certificate,
        keychain: Option<&Path>,
    ) -> Result<Vec<CapturedX509Certificate>, IncompleteChain> {
        let mut store = self.clone();

        loop {
            match store.find_chain(leaf) {
                Ok(chain) => return Ok(chain),
                Err(e) if cfg!(target_os = "macos") && !e.missing.is_empty() => {
                    let keychain = keychain.unwrap_or_else(|| Path::new(SYSTEM_KEYCHAIN));

                    let before = store.by_common_name(&e.missing).len();

                    match store.add_from_keychain(&e.missing, keychain) {
                        Ok(_) if store.by_common_name(&e.missing).len() > before => {
                            debug!("found {} in {}", e.missing, keychain.display());
                        }
                        Ok(_) => return Err(e),
                        Err(err) => {
                            warn!("keychain lookup for {} failed: {}", e.missing, err);
                            return Err(e);
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn chain_key(cert: &CapturedX509Certificate) -> Vec<u8> {
    cert.subject_key_identifier()
        .unwrap_or_else(|| cert.constructed_data().to_vec())
}
