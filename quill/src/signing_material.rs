// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Loading private keys and certificate chains used for signing.
//!
//! Material comes from PEM files (certificates plus a PKCS#8 key) or from a
//! PKCS#12 (PFX) bundle such as those exported by Keychain Access. Either
//! way the result is a [SigningMaterial]: a signing key and its certificate
//! chain, leaf first.

use {
    crate::{
        certificate::AppleCertificate,
        certificate_store::CertificateStore,
        error::QuillError,
        prompt::Prompter,
        redaction,
    },
    base64::{engine::general_purpose::STANDARD, Engine},
    log::{info, warn},
    std::path::{Path, PathBuf},
    x509_certificate::{CapturedX509Certificate, InMemorySigningKeyPair, Sign},
};

/// Where to read key or certificate bytes from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InputSource {
    /// Bytes already in memory.
    Bytes(Vec<u8>),
    /// A file on disk.
    Path(PathBuf),
    /// Base64 encoded content.
    Base64(String),
    /// The named environment variable. Its value may be base64.
    Env(String),
}

impl InputSource {
    /// Interpret a command line value.
    ///
    /// `env:NAME` reads an environment variable, an existing path is read as a
    /// file, and anything else is taken as base64.
    pub fn parse(value: &str) -> Self {
        if let Some(name) = value.strip_prefix("env:") {
            Self::Env(name.to_string())
        } else if Path::new(value).is_file() {
            Self::Path(PathBuf::from(value))
        } else {
            Self::Base64(value.to_string())
        }
    }

    /// Resolve the content.
    pub fn read(&self) -> Result<Vec<u8>, QuillError> {
        match self {
            Self::Bytes(data) => Ok(data.clone()),
            Self::Path(path) => std::fs::read(path).map_err(|e| QuillError::IoPath(path.clone(), e)),
            Self::Base64(value) => {
                let trimmed = value.trim();

                if trimmed.is_empty() {
                    return Err(QuillError::InputSourceUnresolved(value.clone()));
                }

                STANDARD
                    .decode(trimmed)
                    .map_err(|_| QuillError::InputSourceUnresolved(value.clone()))
            }
            Self::Env(name) => {
                let value =
                    std::env::var(name).map_err(|_| QuillError::EnvVarMissing(name.clone()))?;
                redaction::add(value.as_str());

                if value.trim_start().starts_with("-----BEGIN") {
                    Ok(value.into_bytes())
                } else {
                    Ok(STANDARD
                        .decode(value.trim())
                        .unwrap_or_else(|_| value.into_bytes()))
                }
            }
        }
    }
}

/// Resolve a secret value, which may be an `env:NAME` reference.
///
/// The value is registered with the redactor.
pub fn resolve_secret(value: &str) -> Result<String, QuillError> {
    let secret = match value.strip_prefix("env:") {
        Some(name) => std::env::var(name).map_err(|_| QuillError::EnvVarMissing(name.to_string()))?,
        None => value.to_string(),
    };

    redaction::add(secret.as_str());

    Ok(secret)
}

/// How to handle a certificate chain that doesn't reach a trusted root.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChainVerification {
    /// Refuse to continue.
    Strict,
    /// Warn and sign with what we have.
    Lenient,
}

/// Rules applied to a chain before it is used for signing.
#[derive(Clone, Debug)]
pub struct ChainPolicy {
    pub mode: ChainVerification,
    /// Certificates trusted in addition to those in the signing material.
    pub store: CertificateStore,
    /// Keychain consulted for missing issuers on macOS.
    pub keychain: Option<PathBuf>,
}

impl Default for ChainPolicy {
    fn default() -> Self {
        Self {
            mode: ChainVerification::Strict,
            store: CertificateStore::embedded().clone(),
            keychain: None,
        }
    }
}

/// A private key with its certificate chain.
pub struct SigningMaterial {
    signer: InMemorySigningKeyPair,
    private_key_der: Vec<u8>,
    certificates: Vec<CapturedX509Certificate>,
}

impl std::fmt::Debug for SigningMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningMaterial")
            .field(
                "certificates",
                &self
                    .certificates
                    .iter()
                    .map(|c| c.display_name())
                    .collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl SigningMaterial {
    /// Construct from PKCS#8 key data and an unordered set of certificates.
    ///
    /// The certificate whose public key matches the private key becomes the
    /// leaf.
    pub fn new(
        private_key_der: Vec<u8>,
        certificates: Vec<CapturedX509Certificate>,
    ) -> Result<Self, QuillError> {
        let signer = InMemorySigningKeyPair::from_pkcs8_der(&private_key_der)?;
        let public_key = signer.public_key_data();

        let leaf_index = certificates
            .iter()
            .position(|cert| cert.public_key_data() == public_key)
            .ok_or(QuillError::SigningKeyCertificateMismatch)?;

        let mut certificates = certificates;
        let leaf = certificates.remove(leaf_index);
        certificates.insert(0, leaf);

        Ok(Self {
            signer,
            private_key_der,
            certificates,
        })
    }

    pub fn signer(&self) -> &InMemorySigningKeyPair {
        &self.signer
    }

    pub fn leaf(&self) -> &CapturedX509Certificate {
        &self.certificates[0]
    }

    /// All certificates, leaf first.
    pub fn chain(&self) -> &[CapturedX509Certificate] {
        &self.certificates
    }

    /// The team identifier from the leaf's subject OU.
    pub fn team_id(&self) -> Option<String> {
        self.leaf().subject_organizational_unit()
    }

    /// Resolve and verify the chain for code signing.
    ///
    /// The leaf must allow code signing and carry no critical extensions we
    /// can't evaluate. The chain is completed from the policy's store (and the
    /// keychain on macOS) and each certificate must be signed by the next.
    pub fn verify_for_code_signing(mut self, policy: &ChainPolicy) -> Result<Self, QuillError> {
        let leaf = self.leaf().clone();

        if !leaf.is_code_signing() {
            return Err(QuillError::CertificateNotCodeSigning(leaf.display_name()));
        }

        if leaf.is_certificate_authority() {
            return Err(QuillError::CertificateIsAuthority(leaf.display_name()));
        }

        let unhandled = leaf.unhandled_critical_extensions();
        if !unhandled.is_empty() {
            return Err(QuillError::CertificateUnhandledCriticalExtensions(
                leaf.display_name(),
                unhandled.join(", "),
            ));
        }

        let mut store = policy.store.clone();
        for cert in self.certificates.iter().skip(1) {
            store.add(cert.clone());
        }

        let chain = match store.find_chain_with_keychain(&leaf, policy.keychain.as_deref()) {
            Ok(chain) => chain,
            Err(e) => match policy.mode {
                ChainVerification::Strict => return Err(e.into()),
                ChainVerification::Lenient => {
                    warn!("{}", e);
                    warn!("continuing with a partial chain; the signature will not be trusted by Gatekeeper");
                    e.chain
                }
            },
        };

        for pair in chain.windows(2) {
            pair[0].verify_signed_by_certificate(&pair[1]).map_err(|_| {
                QuillError::CertificateChainVerification(
                    pair[0].display_name(),
                    pair[1].display_name(),
                )
            })?;
        }

        info!(
            "signing with {}",
            chain
                .iter()
                .map(|c| c.display_name())
                .collect::<Vec<_>>()
                .join(" -> ")
        );

        self.certificates = chain;

        Ok(self)
    }

    /// Encode as PKCS#12 with the leaf, key and intermediates.
    ///
    /// Self-signed roots are left out.
    pub fn to_p12(&self, password: &str) -> Result<Vec<u8>, QuillError> {
        let cas = self
            .certificates
            .iter()
            .skip(1)
            .filter(|cert| !cert.is_self_signed())
            .map(|cert| cert.constructed_data().to_vec())
            .collect::<Vec<_>>();

        let pfx = p12::PFX::new_with_cas(
            self.leaf().constructed_data(),
            &self.private_key_der,
            &cas.iter().map(Vec::as_slice).collect::<Vec<_>>(),
            password,
            &self.leaf().display_name(),
        )
        .ok_or(QuillError::PfxWriteError("failed to create PFX structure"))?;

        Ok(pfx.to_der())
    }
}

/// Decode a PEM private key, decrypting if needed.
fn decode_private_key(
    data: &[u8],
    password: Option<&str>,
    prompter: &dyn Prompter,
) -> Result<Vec<u8>, QuillError> {
    let docs = pem::parse_many(data)?;

    let doc = docs
        .iter()
        .find(|doc| doc.tag().ends_with("PRIVATE KEY"))
        .ok_or(QuillError::PemMissing("PRIVATE KEY"))?;

    match doc.tag() {
        "PRIVATE KEY" => Ok(doc.contents().to_vec()),
        "ENCRYPTED PRIVATE KEY" => {
            let password = match password {
                Some(password) => password.to_string(),
                None => prompter.prompt("Private key password", true)?,
            };
            redaction::add(password.as_str());

            let info = pkcs8::EncryptedPrivateKeyInfo::try_from(doc.contents())
                .map_err(|e| QuillError::PrivateKeyDecrypt(e.to_string()))?;
            let decrypted = info
                .decrypt(password.as_bytes())
                .map_err(|e| QuillError::PrivateKeyDecrypt(e.to_string()))?;

            Ok(decrypted.as_bytes().to_vec())
        }
        other => Err(QuillError::PrivateKeyUnsupported(other.to_string())),
    }
}

/// Load signing material from PEM encoded certificates and key.
///
/// The certificate source may contain the whole chain. The key may be
/// encrypted PKCS#8; the user is prompted when no password is given.
pub fn load_pem(
    certificates: &InputSource,
    key: &InputSource,
    password: Option<&str>,
    prompter: &dyn Prompter,
) -> Result<SigningMaterial, QuillError> {
    let certs = CapturedX509Certificate::from_pem_multiple(certificates.read()?)?;
    let key_der = decode_private_key(&key.read()?, password, prompter)?;

    SigningMaterial::new(key_der, certs)
}

/// Decode PFX data into a PKCS#8 key and every certificate it holds.
pub fn parse_p12(
    data: &[u8],
    password: &str,
) -> Result<(Vec<u8>, Vec<CapturedX509Certificate>), QuillError> {
    let pfx = p12::PFX::parse(data)
        .map_err(|e| QuillError::PfxParseError(format!("data does not appear to be PFX: {:?}", e)))?;

    if !pfx.verify_mac(password) {
        return Err(QuillError::PfxBadPassword);
    }

    let data = match pfx.auth_safe {
        p12::ContentInfo::Data(data) => data,
        _ => {
            return Err(QuillError::PfxParseError(
                "unexpected PFX content info".to_string(),
            ));
        }
    };

    let content_infos = yasna::parse_der(&data, |reader| {
        reader.collect_sequence_of(p12::ContentInfo::parse)
    })
    .map_err(|e| QuillError::PfxParseError(format!("failed parsing inner ContentInfo: {:?}", e)))?;

    let bmp_password = bmp_string(password);

    let mut certificates = vec![];
    let mut key = None;

    for content in content_infos {
        let bags_data = match content {
            p12::ContentInfo::Data(inner) => inner,
            p12::ContentInfo::EncryptedData(encrypted) => {
                encrypted.data(&bmp_password).ok_or_else(|| {
                    QuillError::PfxParseError("failed decrypting inner EncryptedData".to_string())
                })?
            }
            p12::ContentInfo::OtherContext(_) => {
                return Err(QuillError::PfxParseError(
                    "unexpected OtherContent content in inner PFX data".to_string(),
                ));
            }
        };

        let bags = yasna::parse_ber(&bags_data, |reader| {
            reader.collect_sequence_of(p12::SafeBag::parse)
        })
        .map_err(|e| QuillError::PfxParseError(format!("failed parsing SafeBag: {:?}", e)))?;

        for bag in bags {
            match bag.bag {
                p12::SafeBagKind::CertBag(p12::CertBag::X509(cert_data)) => {
                    certificates.push(CapturedX509Certificate::from_der(cert_data)?);
                }
                p12::SafeBagKind::CertBag(p12::CertBag::SDSI(_)) => {
                    warn!("ignoring SDSI certificate in PFX data");
                }
                p12::SafeBagKind::Pkcs8ShroudedKeyBag(key_bag) => {
                    key = Some(key_bag.decrypt(&bmp_password).ok_or_else(|| {
                        QuillError::PfxParseError(
                            "error decrypting PKCS8 shrouded key bag".to_string(),
                        )
                    })?);
                }
                p12::SafeBagKind::OtherBagKind(_) => {
                    warn!("ignoring unknown bag type in PFX data");
                }
            }
        }
    }

    match (key, certificates.is_empty()) {
        (Some(key), false) => Ok((key, certificates)),
        (Some(_), true) => Err(QuillError::PfxParseError(
            "failed to find x509 certificate in PFX data".to_string(),
        )),
        (None, _) => Err(QuillError::PfxParseError(
            "failed to find signing key in PFX data".to_string(),
        )),
    }
}

/// Contents of a decoded PFX bundle.
pub struct P12Contents {
    /// PKCS#8 private key.
    pub key: Vec<u8>,
    pub certificates: Vec<CapturedX509Certificate>,
    /// The password that unlocked the bundle.
    pub password: String,
}

/// Decode PFX data, asking for a password if the empty one doesn't work.
pub fn decode_p12_interactive(
    data: &[u8],
    password: Option<&str>,
    prompter: &dyn Prompter,
) -> Result<P12Contents, QuillError> {
    let mut password = password.unwrap_or_default().to_string();
    redaction::add(password.as_str());

    let (key, certificates) = match parse_p12(data, &password) {
        Err(QuillError::PfxBadPassword) if password.is_empty() => {
            password = prompter.prompt("P12 password", true)?;
            redaction::add(password.as_str());

            parse_p12(data, &password)?
        }
        res => res?,
    };

    Ok(P12Contents {
        key,
        certificates,
        password,
    })
}

/// Load signing material from a PKCS#12 bundle.
pub fn load_p12(
    source: &InputSource,
    password: Option<&str>,
    prompter: &dyn Prompter,
) -> Result<SigningMaterial, QuillError> {
    let contents = decode_p12_interactive(&source.read()?, password, prompter)?;

    SigningMaterial::new(contents.key, contents.certificates)
}

/// Encode a string as a NUL terminated UCS-2 BMPString.
fn bmp_string(s: &str) -> Vec<u8> {
    s.encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(|c| c.to_be_bytes())
        .collect()
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::prompt::NoPrompter,
        std::cell::Cell,
    };

    const CHAIN: &[u8] = include_bytes!("testdata/chain.pem");
    const KEY: &[u8] = include_bytes!("testdata/leaf-key.pem");
    const KEY_ENCRYPTED: &[u8] = include_bytes!("testdata/leaf-key-encrypted.pem");
    const P12: &[u8] = include_bytes!("testdata/leaf-chain.p12");

    struct FixedPrompter {
        answer: &'static str,
        calls: Cell<usize>,
    }

    impl Prompter for FixedPrompter {
        fn prompt(&self, _message: &str, sensitive: bool) -> Result<String, QuillError> {
            assert!(sensitive);
            self.calls.set(self.calls.get() + 1);
            Ok(self.answer.to_string())
        }
    }

    fn test_policy(mode: ChainVerification) -> ChainPolicy {
        ChainPolicy {
            mode,
            store: CertificateStore::default(),
            keychain: None,
        }
    }

    #[test]
    fn input_sources() {
        assert_eq!(
            InputSource::parse("env:QUILL_TEST_NOPE"),
            InputSource::Env("QUILL_TEST_NOPE".into())
        );
        assert!(matches!(
            InputSource::parse("aGVsbG8="),
            InputSource::Base64(_)
        ));
        assert_eq!(InputSource::parse("aGVsbG8=").read().unwrap(), b"hello");
        assert!(matches!(
            InputSource::Env("QUILL_TEST_DEFINITELY_UNSET".into()).read(),
            Err(QuillError::EnvVarMissing(_))
        ));
        assert!(matches!(
            InputSource::parse("not base64 !!").read(),
            Err(QuillError::InputSourceUnresolved(_))
        ));

        std::env::set_var("QUILL_TEST_P12_SOURCE", STANDARD.encode(b"p12 bytes"));
        assert_eq!(
            InputSource::parse("env:QUILL_TEST_P12_SOURCE")
                .read()
                .unwrap(),
            b"p12 bytes"
        );
    }

    #[test]
    fn secret_from_env_is_redacted() {
        std::env::set_var("QUILL_TEST_PASSWORD", "correct-horse");

        assert_eq!(
            resolve_secret("env:QUILL_TEST_PASSWORD").unwrap(),
            "correct-horse"
        );
        assert_eq!(redaction::apply("pw=correct-horse"), "pw=*******");
    }

    #[test]
    fn pem_material() {
        let material = load_pem(
            &InputSource::Bytes(CHAIN.to_vec()),
            &InputSource::Bytes(KEY.to_vec()),
            None,
            &NoPrompter,
        )
        .unwrap();

        assert_eq!(material.leaf().display_name(), "quill-test-leaf");
        assert_eq!(material.chain().len(), 3);
        assert_eq!(material.team_id().as_deref(), Some("TEAMID1234"));
    }

    #[test]
    fn encrypted_pem_prompts() {
        let prompter = FixedPrompter {
            answer: "quill",
            calls: Cell::new(0),
        };

        let material = load_pem(
            &InputSource::Bytes(CHAIN.to_vec()),
            &InputSource::Bytes(KEY_ENCRYPTED.to_vec()),
            None,
            &prompter,
        )
        .unwrap();

        assert_eq!(prompter.calls.get(), 1);
        assert_eq!(material.leaf().display_name(), "quill-test-leaf");

        assert!(matches!(
            load_pem(
                &InputSource::Bytes(CHAIN.to_vec()),
                &InputSource::Bytes(KEY_ENCRYPTED.to_vec()),
                Some("wrong"),
                &NoPrompter,
            ),
            Err(QuillError::PrivateKeyDecrypt(_))
        ));
    }

    #[test]
    fn key_must_match_certificate() {
        let root = include_bytes!("testdata/root.pem");

        assert!(matches!(
            load_pem(
                &InputSource::Bytes(root.to_vec()),
                &InputSource::Bytes(KEY.to_vec()),
                None,
                &NoPrompter,
            ),
            Err(QuillError::SigningKeyCertificateMismatch)
        ));
    }

    #[test]
    fn p12_material() {
        assert!(matches!(
            parse_p12(P12, "bad-password"),
            Err(QuillError::PfxBadPassword)
        ));

        let material = load_p12(&InputSource::Bytes(P12.to_vec()), Some("quill"), &NoPrompter)
            .unwrap();
        assert_eq!(material.chain().len(), 3);
        assert_eq!(material.leaf().display_name(), "quill-test-leaf");
    }

    #[test]
    fn p12_prompts_once_on_empty_password() {
        let prompter = FixedPrompter {
            answer: "quill",
            calls: Cell::new(0),
        };

        load_p12(&InputSource::Bytes(P12.to_vec()), None, &prompter).unwrap();
        assert_eq!(prompter.calls.get(), 1);

        let contents = decode_p12_interactive(P12, None, &prompter).unwrap();
        assert_eq!(contents.password, "quill");
        assert_eq!(contents.certificates.len(), 3);
        assert_eq!(prompter.calls.get(), 2);

        let wrong = FixedPrompter {
            answer: "nope",
            calls: Cell::new(0),
        };
        assert!(matches!(
            load_p12(&InputSource::Bytes(P12.to_vec()), None, &wrong),
            Err(QuillError::PfxBadPassword)
        ));
        assert_eq!(wrong.calls.get(), 1);
    }

    #[test]
    fn verify_full_chain() {
        let material = load_p12(&InputSource::Bytes(P12.to_vec()), Some("quill"), &NoPrompter)
            .unwrap()
            .verify_for_code_signing(&test_policy(ChainVerification::Strict))
            .unwrap();

        let names = material
            .chain()
            .iter()
            .map(|c| c.display_name())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                "quill-test-leaf",
                "quill-test-intermediate-ca",
                "quill-test-root-ca"
            ]
        );
    }

    #[test]
    fn verify_incomplete_chain() {
        let leaf_only = || {
            load_pem(
                &InputSource::Bytes(include_bytes!("testdata/leaf.pem").to_vec()),
                &InputSource::Bytes(KEY.to_vec()),
                None,
                &NoPrompter,
            )
            .unwrap()
        };

        assert!(matches!(
            leaf_only().verify_for_code_signing(&test_policy(ChainVerification::Strict)),
            Err(QuillError::IncompleteChain(_))
        ));

        let material = leaf_only()
            .verify_for_code_signing(&test_policy(ChainVerification::Lenient))
            .unwrap();
        assert_eq!(material.chain().len(), 1);
    }

    #[test]
    fn ca_leaf_rejected() {
        for mode in [ChainVerification::Strict, ChainVerification::Lenient] {
            let material = load_pem(
                &InputSource::Bytes(include_bytes!("testdata/ca-leaf.pem").to_vec()),
                &InputSource::Bytes(include_bytes!("testdata/ca-leaf-key.pem").to_vec()),
                None,
                &NoPrompter,
            )
            .unwrap();

            assert!(material.leaf().is_code_signing());
            assert!(matches!(
                material.verify_for_code_signing(&test_policy(mode)),
                Err(QuillError::CertificateIsAuthority(name)) if name == "quill-test-ca-leaf"
            ));
        }
    }

    #[test]
    fn p12_with_chain() {
        let material = load_pem(
            &InputSource::Bytes(CHAIN.to_vec()),
            &InputSource::Bytes(KEY.to_vec()),
            None,
            &NoPrompter,
        )
        .unwrap()
        .verify_for_code_signing(&test_policy(ChainVerification::Strict))
        .unwrap();

        let der = material.to_p12("pw").unwrap();
        let (_, certs) = parse_p12(&der, "pw").unwrap();

        let mut names = certs.iter().map(|c| c.display_name()).collect::<Vec<_>>();
        names.sort();
        assert_eq!(names, vec!["quill-test-intermediate-ca", "quill-test-leaf"]);
    }

    #[test]
    fn bmp_encoding() {
        assert_eq!(bmp_string("ab"), vec![0, b'a', 0, b'b', 0, 0]);
    }
}
