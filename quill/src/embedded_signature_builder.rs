// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Assembly of embedded signature data.
//!
//! [EmbeddedSignatureBuilder] collects special slot blobs, a code directory
//! and a CMS signature, then lays them out in a `SuperBlob`.

use {
    crate::{
        certificate::AppleCertificate,
        code_directory::{CodeDirectoryBlob, SpecialSlot},
        embedded_signature::{Blob, BlobWrapperBlob, CodeSigningSlot, SuperBlob},
        error::QuillError,
        signing_material::SigningMaterial,
    },
    cryptographic_message_syntax::{SignedDataBuilder, SignerBuilder},
    log::{info, warn},
    std::collections::BTreeMap,
};

/// Apple's default time-stamp server.
pub const APPLE_TIMESTAMP_URL: &str = "http://timestamp.apple.com/ts01";

#[derive(Clone, Copy, Debug, Default, PartialEq)]
enum BlobsState {
    #[default]
    Empty,
    SpecialAdded,
    CodeDirectoryAdded,
    SignatureAdded,
}

/// Produce a detached CMS signature over serialized code directory bytes.
///
/// The leaf and intermediates are embedded. A self-signed root is not. When a
/// time-stamp server is given, a token for the signature is fetched and
/// attached as an unsigned attribute.
pub fn create_cms_signature(
    code_directory: &[u8],
    material: &SigningMaterial,
    timestamp_url: Option<&str>,
) -> Result<Vec<u8>, QuillError> {
    let signer = SignerBuilder::new(material.signer(), material.leaf().clone());

    let signer = match timestamp_url {
        Some(url) => {
            info!("using time-stamp server {}", url);
            signer
                .time_stamp_url(url)
                .map_err(|e| QuillError::TimestampServer(e.to_string()))?
        }
        None => signer,
    };

    let mut builder = SignedDataBuilder::default()
        .content_external(code_directory.to_vec())
        .signer(signer);

    let chain = material.chain();
    for (i, cert) in chain.iter().enumerate() {
        if i > 0 && i == chain.len() - 1 && cert.is_self_signed() {
            continue;
        }

        builder = builder.certificate(cert.clone());
    }

    Ok(builder.build_der()?)
}

/// An entity for producing embedded signature `SuperBlob` data.
///
/// Special slots are registered first, then the code directory, then the
/// signature. Registering out of order is an error since it would leave the
/// code directory or signature stale.
#[derive(Debug, Default)]
pub struct EmbeddedSignatureBuilder {
    state: BlobsState,
    blobs: BTreeMap<CodeSigningSlot, Vec<u8>>,
    code_directory: Option<CodeDirectoryBlob>,
}

impl EmbeddedSignatureBuilder {
    pub fn code_directory(&self) -> Option<&CodeDirectoryBlob> {
        self.code_directory.as_ref()
    }

    /// Register a special slot blob.
    ///
    /// Last write for a slot wins.
    pub fn add_special_slot(&mut self, slot: &SpecialSlot) -> Result<(), QuillError> {
        match self.state {
            BlobsState::Empty | BlobsState::SpecialAdded => {}
            BlobsState::CodeDirectoryAdded | BlobsState::SignatureAdded => {
                return Err(QuillError::SignatureBuilder(
                    "cannot add blobs after code directory or signature is registered",
                ));
            }
        }

        if slot.slot.is_code_directory() || slot.slot == CodeSigningSlot::Signature {
            return Err(QuillError::SignatureBuilder(
                "cannot register code directory or signature as a special slot",
            ));
        }

        self.blobs.insert(slot.slot, slot.blob.clone());
        self.state = BlobsState::SpecialAdded;

        Ok(())
    }

    /// Register the code directory.
    ///
    /// Digests of previously registered special slots are filled in when the
    /// code directory lacks them.
    pub fn add_code_directory(
        &mut self,
        mut cd: CodeDirectoryBlob,
    ) -> Result<&CodeDirectoryBlob, QuillError> {
        if matches!(self.state, BlobsState::SignatureAdded) {
            return Err(QuillError::SignatureBuilder(
                "cannot add code directory after signature data added",
            ));
        }

        for (slot, blob) in &self.blobs {
            if !cd.special_hashes.contains_key(slot) {
                cd.special_hashes
                    .insert(*slot, cd.hash_type.digest_data(blob)?);
            }
        }

        self.blobs
            .insert(CodeSigningSlot::CodeDirectory, cd.to_blob_bytes()?);
        self.state = BlobsState::CodeDirectoryAdded;

        Ok(self.code_directory.insert(cd))
    }

    /// Add the signature over the registered code directory.
    ///
    /// Without signing material an empty wrapper blob is stored, which is what
    /// ad-hoc signatures carry.
    pub fn add_cms_signature(
        &mut self,
        material: Option<&SigningMaterial>,
        timestamp_url: Option<&str>,
    ) -> Result<(), QuillError> {
        let cd = self
            .blobs
            .get(&CodeSigningSlot::CodeDirectory)
            .ok_or(QuillError::SignatureBuilder(
                "code directory required before signing",
            ))?;

        let der = match material {
            Some(material) => create_cms_signature(cd, material, timestamp_url)?,
            None => {
                if timestamp_url.is_some() {
                    warn!("ignoring time-stamp server for ad-hoc signature");
                }
                vec![]
            }
        };

        self.blobs.insert(
            CodeSigningSlot::Signature,
            BlobWrapperBlob::from_data(der).to_blob_bytes()?,
        );
        self.state = BlobsState::SignatureAdded;

        Ok(())
    }

    /// Lay out everything registered as a `SuperBlob`.
    ///
    /// See [SuperBlob::finalize] for `padding_target` semantics.
    pub fn create_superblob(&self, padding_target: Option<usize>) -> Result<Vec<u8>, QuillError> {
        if matches!(self.state, BlobsState::Empty | BlobsState::SpecialAdded) {
            return Err(QuillError::SignatureBuilder(
                "code directory required in order to materialize superblob",
            ));
        }

        let mut superblob = SuperBlob::default();
        for (slot, data) in &self.blobs {
            superblob.add(*slot, data.clone());
        }

        superblob.finalize(padding_target)
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            code_directory::CodeSignatureFlags,
            embedded_signature::{DigestType, EmbeddedSignature, EntitlementsBlob},
            macho::{testutil::synthetic_macho_file, MachOFile},
            prompt::NoPrompter,
            signing_material::{load_pem, InputSource},
        },
        cryptographic_message_syntax::SignedData,
    };

    fn test_material() -> SigningMaterial {
        load_pem(
            &InputSource::Bytes(include_bytes!("testdata/chain.pem").to_vec()),
            &InputSource::Bytes(include_bytes!("testdata/leaf-key.pem").to_vec()),
            None,
            &NoPrompter,
        )
        .unwrap()
    }

    fn test_code_directory(dir: &std::path::Path) -> CodeDirectoryBlob {
        let mut macho = MachOFile::open_rw(synthetic_macho_file(dir, "hello")).unwrap();
        macho.add_empty_code_signing_cmd().unwrap();

        CodeDirectoryBlob::from_macho(
            macho.image(),
            "hello-id",
            None,
            DigestType::Sha256,
            CodeSignatureFlags::RUNTIME,
            &[],
        )
        .unwrap()
    }

    #[test]
    fn cms_is_detached() {
        let material = test_material();
        let cd = b"code directory bytes";

        let der = create_cms_signature(cd, &material, None).unwrap();
        let signed_data = SignedData::parse_ber(&der).unwrap();

        assert!(signed_data.signed_content().is_none());

        // The self-signed root is left out.
        let names = signed_data
            .certificates()
            .map(|c| c.subject_common_name().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["quill-test-leaf", "quill-test-intermediate-ca"]);

        for signer in signed_data.signers() {
            signer
                .verify_signature_with_signed_data_and_content(&signed_data, cd)
                .unwrap();
            signer
                .verify_message_digest_with_content(cd)
                .unwrap();
        }
    }

    #[test]
    fn state_ordering() {
        let dir = tempfile::tempdir().unwrap();

        let mut builder = EmbeddedSignatureBuilder::default();
        assert!(builder.create_superblob(None).is_err());
        assert!(builder.add_cms_signature(None, None).is_err());

        let entitlements = SpecialSlot::new(
            CodeSigningSlot::Entitlements,
            EntitlementsBlob::from_string("<plist/>").to_blob_bytes().unwrap(),
            DigestType::Sha256,
        )
        .unwrap();
        builder.add_special_slot(&entitlements).unwrap();

        let cd = builder
            .add_code_directory(test_code_directory(dir.path()))
            .unwrap();
        assert_eq!(
            cd.special_hashes.get(&CodeSigningSlot::Entitlements),
            Some(&entitlements.digest)
        );

        assert!(builder.add_special_slot(&entitlements).is_err());
    }

    #[test]
    fn adhoc_superblob() {
        let dir = tempfile::tempdir().unwrap();

        let mut builder = EmbeddedSignatureBuilder::default();
        builder
            .add_code_directory(test_code_directory(dir.path()))
            .unwrap();
        builder.add_cms_signature(None, None).unwrap();

        let data = builder.create_superblob(None).unwrap();
        let sig = EmbeddedSignature::from_bytes(&data).unwrap();

        let slots = sig.blobs.iter().map(|b| b.slot).collect::<Vec<_>>();
        assert_eq!(
            slots,
            vec![CodeSigningSlot::CodeDirectory, CodeSigningSlot::Signature]
        );
        assert_eq!(sig.signature_data().unwrap(), Some(&[][..]));
        assert!(sig.signed_data().unwrap().is_none());
        assert_eq!(sig.code_directory().unwrap().unwrap().ident, "hello-id");
    }
}
