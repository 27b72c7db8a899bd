// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Functionality related to certificates.

use {
    bcder::{
        decode::{BytesSource, Constructed, DecodeError, Source},
        ConstOid, Mode, Oid, OctetString, Tag,
    },
    bytes::Bytes,
    x509_certificate::{
        rfc4519::{OID_ORGANIZATIONAL_UNIT_NAME, OID_ORGANIZATION_NAME},
        CapturedX509Certificate,
    },
};

/// Subject Key Identifier extension.
///
/// 2.5.29.14
pub const OID_SUBJECT_KEY_IDENTIFIER: ConstOid = Oid(&[85, 29, 14]);

/// Key Usage extension.
///
/// 2.5.29.15
const OID_KEY_USAGE: ConstOid = Oid(&[85, 29, 15]);

/// Subject Alternative Name extension.
///
/// 2.5.29.17
const OID_SUBJECT_ALT_NAME: ConstOid = Oid(&[85, 29, 17]);

/// Basic Constraints extension.
///
/// 2.5.29.19
const OID_BASIC_CONSTRAINTS: ConstOid = Oid(&[85, 29, 19]);

/// Certificate Policies extension.
///
/// 2.5.29.32
const OID_CERTIFICATE_POLICIES: ConstOid = Oid(&[85, 29, 32]);

/// Authority Key Identifier extension.
///
/// 2.5.29.35
pub const OID_AUTHORITY_KEY_IDENTIFIER: ConstOid = Oid(&[85, 29, 35]);

/// Extended Key Usage extension.
///
/// 2.5.29.37
const OID_EXTENDED_KEY_USAGE: ConstOid = Oid(&[85, 29, 37]);

/// Extended Key Usage purpose for code signing.
///
/// 1.3.6.1.5.5.7.3.3
pub const OID_EKU_PURPOSE_CODE_SIGNING: ConstOid = Oid(&[43, 6, 1, 5, 5, 7, 3, 3]);

/// Developer ID Certification Authority extension.
///
/// Present on the intermediate that issues Developer ID certificates.
///
/// 1.2.840.113635.100.6.2.6
pub const OID_DEVELOPER_ID_CA: ConstOid = Oid(&[42, 134, 72, 134, 247, 99, 100, 6, 2, 6]);

/// Developer ID Application (`devid_execute`) extension.
///
/// Apple marks this critical on Developer ID Application leaf certificates.
///
/// 1.2.840.113635.100.6.1.13
pub const OID_DEVID_EXECUTE: ConstOid = Oid(&[42, 134, 72, 134, 247, 99, 100, 6, 1, 13]);

/// Critical extensions we know how to evaluate.
const HANDLED_CRITICAL_EXTENSIONS: &[&ConstOid] = &[
    &OID_SUBJECT_KEY_IDENTIFIER,
    &OID_KEY_USAGE,
    &OID_SUBJECT_ALT_NAME,
    &OID_BASIC_CONSTRAINTS,
    &OID_CERTIFICATE_POLICIES,
    &OID_AUTHORITY_KEY_IDENTIFIER,
    &OID_EXTENDED_KEY_USAGE,
    &OID_DEVID_EXECUTE,
];

/// Organization name Apple issues its certificates under.
const APPLE_ORGANIZATION: &str = "Apple Inc.";

fn decode_extension<T>(
    value: Bytes,
    op: impl FnOnce(&mut Constructed<BytesSource>) -> Result<T, DecodeError<<BytesSource as Source>::Error>>,
) -> Option<T> {
    Constructed::decode(value, Mode::Der, op).ok()
}

/// Apple code signing specific views on an X.509 certificate.
pub trait AppleCertificate: Sized {
    /// Find the raw value of an extension by its OID content bytes.
    fn extension_value(&self, oid: &[u8]) -> Option<Bytes>;

    /// Whether the certificate carries an extension, regardless of its value.
    fn has_extension(&self, oid: &[u8]) -> bool {
        self.extension_value(oid).is_some()
    }

    /// The Subject Key Identifier, if present.
    fn subject_key_identifier(&self) -> Option<Vec<u8>>;

    /// The `keyIdentifier` of the Authority Key Identifier, if present.
    fn authority_key_identifier(&self) -> Option<Vec<u8>>;

    /// Extended key usage purposes.
    fn extended_key_usage(&self) -> Vec<Oid>;

    /// Whether extended key usage includes code signing.
    fn is_code_signing(&self) -> bool {
        self.extended_key_usage()
            .iter()
            .any(|oid| oid.as_ref() == OID_EKU_PURPOSE_CODE_SIGNING.as_ref())
    }

    /// Whether basic constraints mark this as a certificate authority.
    fn is_certificate_authority(&self) -> bool;

    /// Dotted OIDs of critical extensions we don't know how to handle.
    ///
    /// `devid_execute` is treated as handled.
    fn unhandled_critical_extensions(&self) -> Vec<String>;

    /// The subject's organization (O).
    fn subject_organization(&self) -> Option<String>;

    /// The subject's organizational unit (OU).
    ///
    /// On Apple issued certificates this holds the team identifier.
    fn subject_organizational_unit(&self) -> Option<String>;

    /// Whether the subject organization is Apple Inc.
    fn is_apple_inc(&self) -> bool {
        self.subject_organization().as_deref() == Some(APPLE_ORGANIZATION)
    }

    /// Whether this certificate issued itself.
    fn is_self_signed(&self) -> bool;

    /// A short name for messages: the common name, else the full subject.
    fn display_name(&self) -> String;
}

impl AppleCertificate for CapturedX509Certificate {
    fn extension_value(&self, oid: &[u8]) -> Option<Bytes> {
        let cert: &x509_certificate::rfc5280::Certificate = self.as_ref();

        cert.iter_extensions()
            .find(|extension| extension.id.as_ref() == oid)
            .map(|extension| extension.value.to_bytes())
    }

    fn subject_key_identifier(&self) -> Option<Vec<u8>> {
        let value = self.extension_value(OID_SUBJECT_KEY_IDENTIFIER.as_ref())?;

        decode_extension(value, OctetString::take_from).map(|ski| ski.to_bytes().to_vec())
    }

    fn authority_key_identifier(&self) -> Option<Vec<u8>> {
        let value = self.extension_value(OID_AUTHORITY_KEY_IDENTIFIER.as_ref())?;

        decode_extension(value, |cons| {
            cons.take_sequence(|cons| {
                let key_id = cons.take_opt_value_if(Tag::CTX_0, OctetString::from_content)?;
                cons.skip_all()?;

                Ok(key_id)
            })
        })
        .flatten()
        .map(|aki| aki.to_bytes().to_vec())
    }

    fn extended_key_usage(&self) -> Vec<Oid> {
        let value = match self.extension_value(OID_EXTENDED_KEY_USAGE.as_ref()) {
            Some(value) => value,
            None => return vec![],
        };

        decode_extension(value, |cons| {
            cons.take_sequence(|cons| {
                let mut oids = vec![];

                while let Some(oid) = Oid::take_opt_from(cons)? {
                    oids.push(oid);
                }

                Ok(oids)
            })
        })
        .unwrap_or_default()
    }

    fn is_certificate_authority(&self) -> bool {
        let value = match self.extension_value(OID_BASIC_CONSTRAINTS.as_ref()) {
            Some(value) => value,
            None => return false,
        };

        decode_extension(value, |cons| {
            cons.take_sequence(|cons| {
                let ca = cons.take_opt_bool()?.unwrap_or(false);
                cons.skip_all()?;

                Ok(ca)
            })
        })
        .unwrap_or(false)
    }

    fn unhandled_critical_extensions(&self) -> Vec<String> {
        let cert: &x509_certificate::rfc5280::Certificate = self.as_ref();

        cert.iter_extensions()
            .filter(|extension| extension.critical.unwrap_or(false))
            .filter(|extension| {
                !HANDLED_CRITICAL_EXTENSIONS
                    .iter()
                    .any(|oid| oid.as_ref() == extension.id.as_ref())
            })
            .map(|extension| extension.id.to_string())
            .collect::<Vec<_>>()
    }

    fn subject_organization(&self) -> Option<String> {
        self.subject_name()
            .find_first_attribute_string(Oid(OID_ORGANIZATION_NAME.as_ref().into()))
            .unwrap_or(None)
    }

    fn subject_organizational_unit(&self) -> Option<String> {
        self.subject_name()
            .find_first_attribute_string(Oid(OID_ORGANIZATIONAL_UNIT_NAME.as_ref().into()))
            .unwrap_or(None)
    }

    fn is_self_signed(&self) -> bool {
        self.subject_is_issuer()
    }

    fn display_name(&self) -> String {
        self.subject_common_name().unwrap_or_else(|| {
            self.subject_name()
                .user_friendly_str()
                .unwrap_or_else(|_| "<unknown subject>".to_string())
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn load(data: &[u8]) -> CapturedX509Certificate {
        CapturedX509Certificate::from_pem(data).unwrap()
    }

    #[test]
    fn leaf_properties() {
        let leaf = load(include_bytes!("testdata/leaf.pem"));

        assert_eq!(leaf.display_name(), "quill-test-leaf");
        assert_eq!(
            leaf.subject_organizational_unit().as_deref(),
            Some("TEAMID1234")
        );
        assert_eq!(leaf.subject_organization().as_deref(), Some("Quill Test"));
        assert!(!leaf.is_apple_inc());
        assert!(leaf.is_code_signing());
        assert!(!leaf.is_certificate_authority());
        assert!(!leaf.is_self_signed());
        assert!(leaf.has_extension(OID_DEVID_EXECUTE.as_ref()));

        // devid_execute is critical but handled.
        assert!(leaf.unhandled_critical_extensions().is_empty());
    }

    #[test]
    fn key_identifiers_link() {
        let leaf = load(include_bytes!("testdata/leaf.pem"));
        let intermediate = load(include_bytes!("testdata/intermediate.pem"));
        let root = load(include_bytes!("testdata/root.pem"));

        assert_eq!(
            leaf.authority_key_identifier().unwrap(),
            intermediate.subject_key_identifier().unwrap()
        );
        assert_eq!(
            intermediate.authority_key_identifier().unwrap(),
            root.subject_key_identifier().unwrap()
        );
        assert_eq!(root.subject_key_identifier().unwrap().len(), 20);

        assert!(intermediate.has_extension(OID_DEVELOPER_ID_CA.as_ref()));
        assert!(intermediate.is_certificate_authority());
        assert!(!intermediate.is_code_signing());

        assert!(root.is_self_signed());
        assert!(root.is_certificate_authority());
        assert!(!root.has_extension(OID_DEVELOPER_ID_CA.as_ref()));
    }
}
