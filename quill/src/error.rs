// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::certificate_store::IncompleteChain,
    cryptographic_message_syntax::CmsError,
    std::path::PathBuf,
    thiserror::Error,
    x509_certificate::X509CertificateError,
};

/// Unified error type for signing and notarization.
#[derive(Debug, Error)]
pub enum QuillError {
    #[error("{0}")]
    CliGeneralError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error on {0}: {1}")]
    IoPath(PathBuf, std::io::Error),

    #[error("binary parsing error: {0}")]
    Goblin(#[from] goblin::error::Error),

    #[error("data structure parse error: {0}")]
    Scroll(#[from] scroll::Error),

    #[error("invalid Mach-O binary: {0}")]
    InvalidBinary(String),

    #[error("binary is already signed")]
    AlreadySigned,

    #[error("no room for an additional load command (need {0} zero bytes after the load commands)")]
    NoRoomForLoadCmd(usize),

    #[error("binary has no LC_CODE_SIGNATURE load command")]
    MissingCodeSigningCmd,

    #[error("unable to locate {0} segment")]
    MissingSegment(&'static str),

    #[error("__LINKEDIT isn't the final Mach-O segment")]
    LinkeditNotLast,

    #[error("binary does not have code signature data")]
    BinaryNoCodeSignature,

    #[error("universal binaries must be signed one slice at a time")]
    UniversalBinaryUnsupported,

    #[error("bad header magic in {0}")]
    BadMagic(&'static str),

    #[error("SuperBlob data is malformed")]
    SuperblobMalformed,

    #[error("blob length {0} exceeds available data")]
    BlobLengthOverflow(usize),

    #[error("unknown code directory version: {0:#x}")]
    CodeDirectoryUnknownVersion(u32),

    #[error("malformed identifier string in code directory")]
    CodeDirectoryMalformedIdentifier,

    #[error("code digest type {0} is not supported")]
    DigestUnsupported(String),

    #[error("requirement expression is malformed: {0}")]
    RequirementMalformed(&'static str),

    #[error("signature data exceeds reserved space ({0} > {1} bytes)")]
    SignatureSpaceTooSmall(usize, usize),

    #[error("signature builder error: {0}")]
    SignatureBuilder(&'static str),

    #[error("X.509 certificate handler error: {0}")]
    X509(#[from] X509CertificateError),

    #[error("CMS error: {0}")]
    Cms(#[from] CmsError),

    #[error("error contacting time-stamp server: {0}")]
    TimestampServer(String),

    #[error("PEM error: {0}")]
    Pem(#[from] pem::PemError),

    #[error("no PEM data of type {0} found")]
    PemMissing(&'static str),

    #[error("private key format {0} is not supported; convert it to PKCS#8")]
    PrivateKeyUnsupported(String),

    #[error("error decrypting private key: {0}")]
    PrivateKeyDecrypt(String),

    #[error("error parsing PFX data: {0}")]
    PfxParseError(String),

    #[error("bad PFX password")]
    PfxBadPassword,

    #[error("error writing PFX data: {0}")]
    PfxWriteError(&'static str),

    #[error("no certificate in signing material matches the private key")]
    SigningKeyCertificateMismatch,

    #[error("certificate {0} does not allow code signing (extended key usage)")]
    CertificateNotCodeSigning(String),

    #[error("certificate {0} is a certificate authority and cannot sign code")]
    CertificateIsAuthority(String),

    #[error("certificate {0} has unhandled critical extensions: {1}")]
    CertificateUnhandledCriticalExtensions(String, String),

    #[error("certificate chain verification failed: {0} is not signed by {1}")]
    CertificateChainVerification(String, String),

    #[error("{0}")]
    IncompleteChain(#[from] IncompleteChain),

    #[error("error running keychain query: {0}")]
    Keychain(String),

    #[error("input source {0} is not a readable file, base64 literal, or env:NAME reference")]
    InputSourceUnresolved(String),

    #[error("environment variable {0} is not set")]
    EnvVarMissing(String),

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("prompt error: {0}")]
    Prompt(String),

    #[error("JSON serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("YAML serialization error: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("HTTP error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON Web Token error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("App Store Connect API key {0} not found in any standard location")]
    AppStoreConnectApiKeyNotFound(String),

    #[error("notary service returned HTTP {status}: {body}")]
    NotaryServer { status: String, body: String },

    #[error("notary service requires accepting agreements: sign in to https://developer.apple.com/account and accept the latest agreements, then retry ({0})")]
    NotaryAgreementMissing(String),

    #[error("S3 upload error: {0}")]
    S3Upload(String),

    #[error("submission has not been started")]
    SubmissionNotStarted,

    #[error("notarization failed with status {status}{}", format_developer_log(.log))]
    NotarizationFailed { status: String, log: Option<String> },

    #[error("cannot notarize an ad-hoc signed binary")]
    NotarizeAdHoc,

    #[error("operation was cancelled")]
    Cancelled,
}

fn format_developer_log(log: &Option<String>) -> String {
    match log {
        Some(log) => format!("; developer log:\n{}", log),
        None => String::new(),
    }
}
