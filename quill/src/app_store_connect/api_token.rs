// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! App Store Connect API tokens.

use {
    crate::{error::QuillError, signing_material::InputSource},
    jsonwebtoken::{Algorithm, EncodingKey, Header},
    log::debug,
    serde::{Deserialize, Serialize},
    std::{
        path::{Path, PathBuf},
        time::{Duration, SystemTime},
    },
};

/// Audience claim required by App Store Connect.
pub const AUDIENCE: &str = "appstoreconnect-v1";

/// Token scope limiting use to the notary API.
pub const NOTARY_SCOPE: &str = "/notary/v2";

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ConnectTokenClaims {
    pub iss: String,
    pub iat: u64,
    pub exp: u64,
    pub aud: String,
    pub scope: Vec<String>,
}

/// A JWT Token for use with App Store Connect API.
pub type AppStoreConnectToken = String;

/// Represents a private key used to create JWT tokens for use with App Store Connect.
///
/// App Store Connect API tokens/JWTs are derived from:
///
/// * A key identifier. This is a short alphanumeric string like `DEADBEEF42`.
/// * An issuer ID. This is likely a UUID.
/// * An ECDSA P-256 private key.
///
/// All these are issued by Apple. You can see and manage your keys at
/// <https://appstoreconnect.apple.com/access/api>.
#[derive(Clone)]
pub struct ConnectTokenEncoder {
    key_id: String,
    issuer_id: String,
    encoding_key: EncodingKey,
}

impl std::fmt::Debug for ConnectTokenEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectTokenEncoder")
            .field("key_id", &self.key_id)
            .field("issuer_id", &self.issuer_id)
            .finish_non_exhaustive()
    }
}

impl ConnectTokenEncoder {
    pub fn from_jwt_encoding_key(
        key_id: String,
        issuer_id: String,
        encoding_key: EncodingKey,
    ) -> Self {
        Self {
            key_id,
            issuer_id,
            encoding_key,
        }
    }

    /// Create a token encoder from a PEM encoded ECDSA private key.
    pub fn from_ecdsa_pem(
        key_id: String,
        issuer_id: String,
        pem_data: &[u8],
    ) -> Result<Self, QuillError> {
        let encoding_key = EncodingKey::from_ec_pem(pem_data)?;

        Ok(Self::from_jwt_encoding_key(key_id, issuer_id, encoding_key))
    }

    /// Create a token encoder from a key given on the command line.
    ///
    /// The key may be a path, base64 content or an `env:NAME` reference.
    pub fn from_input_source(
        key_id: String,
        issuer_id: String,
        source: &InputSource,
    ) -> Result<Self, QuillError> {
        let data = source.read()?;

        Self::from_ecdsa_pem(key_id, issuer_id, &data)
    }

    /// Locate `AuthKey_<key_id>.p8` in the standard key directories.
    ///
    /// These are the same directories `altool` searches.
    pub fn from_api_key_id(key_id: String, issuer_id: String) -> Result<Self, QuillError> {
        let path = find_api_key(&key_id, &api_key_search_paths()?)
            .ok_or_else(|| QuillError::AppStoreConnectApiKeyNotFound(key_id.clone()))?;

        debug!("using App Store Connect API key {}", path.display());

        let data = std::fs::read(&path).map_err(|e| QuillError::IoPath(path.clone(), e))?;

        Self::from_ecdsa_pem(key_id, issuer_id, &data)
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Mint a new JWT valid for the given duration.
    pub fn new_token(&self, lifetime: Duration) -> Result<AppStoreConnectToken, QuillError> {
        let header = Header {
            kid: Some(self.key_id.clone()),
            alg: Algorithm::ES256,
            typ: Some("JWT".to_string()),
            ..Default::default()
        };

        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map_err(|e| QuillError::CliGeneralError(format!("system clock error: {}", e)))?
            .as_secs();

        let claims = ConnectTokenClaims {
            iss: self.issuer_id.clone(),
            iat: now,
            exp: now + lifetime.as_secs(),
            aud: AUDIENCE.to_string(),
            scope: vec![NOTARY_SCOPE.to_string()],
        };

        Ok(jsonwebtoken::encode(&header, &claims, &self.encoding_key)?)
    }
}

/// Directories searched for App Store Connect API keys, in priority order.
pub fn api_key_search_paths() -> Result<Vec<PathBuf>, QuillError> {
    let mut search_paths = vec![std::env::current_dir()?.join("private_keys")];

    if let Some(home) = dirs::home_dir() {
        search_paths.extend([
            home.join("private_keys"),
            home.join(".private_keys"),
            home.join(".appstoreconnect").join("private_keys"),
        ]);
    }

    Ok(search_paths)
}

/// Find `AuthKey_<key_id>.p8` in the first directory containing it.
pub fn find_api_key(key_id: &str, search_paths: &[impl AsRef<Path>]) -> Option<PathBuf> {
    let filename = format!("AuthKey_{}.p8", key_id);

    search_paths
        .iter()
        .map(|dir| dir.as_ref().join(&filename))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod test {
    use {
        super::*,
        base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine},
    };

    const KEY: &[u8] = include_bytes!("../testdata/AuthKey_ABCDEF0123.p8");

    #[test]
    fn mint_token() {
        let encoder = ConnectTokenEncoder::from_ecdsa_pem(
            "ABCDEF0123".into(),
            "00000000-0000-0000-0000-000000000000".into(),
            KEY,
        )
        .unwrap();

        let token = encoder.new_token(Duration::from_secs(17 * 60)).unwrap();

        let header = jsonwebtoken::decode_header(&token).unwrap();
        assert_eq!(header.alg, Algorithm::ES256);
        assert_eq!(header.kid.as_deref(), Some("ABCDEF0123"));
        assert_eq!(header.typ.as_deref(), Some("JWT"));

        let claims = token.split('.').nth(1).unwrap();
        let claims: ConnectTokenClaims =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(claims).unwrap()).unwrap();

        assert_eq!(claims.iss, "00000000-0000-0000-0000-000000000000");
        assert_eq!(claims.aud, "appstoreconnect-v1");
        assert_eq!(claims.scope, vec!["/notary/v2".to_string()]);

        let lifetime = claims.exp - claims.iat;
        assert!((17 * 60..=17 * 60 + 2).contains(&lifetime));
    }

    #[test]
    fn key_search() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();

        assert_eq!(find_api_key("ABCDEF0123", &[first.path(), second.path()]), None);

        let path = second.path().join("AuthKey_ABCDEF0123.p8");
        std::fs::write(&path, KEY).unwrap();
        assert_eq!(
            find_api_key("ABCDEF0123", &[first.path(), second.path()]),
            Some(path.clone())
        );

        let encoder = ConnectTokenEncoder::from_input_source(
            "ABCDEF0123".into(),
            "issuer".into(),
            &InputSource::Path(path),
        )
        .unwrap();
        assert_eq!(encoder.key_id(), "ABCDEF0123");
    }

    #[test]
    fn rejects_bad_key() {
        assert!(ConnectTokenEncoder::from_ecdsa_pem(
            "ABCDEF0123".into(),
            "issuer".into(),
            include_bytes!("../testdata/leaf-key.pem"),
        )
        .is_err());
    }
}
