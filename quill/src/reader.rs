// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Functionality for reading signature data from files.

use {
    crate::{
        certificate::AppleCertificate,
        embedded_signature::{BlobEntry, CodeSigningSlot, DigestType, EmbeddedSignature},
        error::QuillError,
        macho::MachOImage,
        universal,
    },
    cryptographic_message_syntax::{SignedData, SignerInfo},
    serde::Serialize,
    std::path::Path,
    x509_certificate::CapturedX509Certificate,
};

#[derive(Clone, Debug, Serialize)]
pub struct BlobDescription {
    pub slot: String,
    pub magic: String,
    pub length: u32,
    pub sha256: String,
}

impl<'a> TryFrom<&BlobEntry<'a>> for BlobDescription {
    type Error = QuillError;

    fn try_from(entry: &BlobEntry<'a>) -> Result<Self, Self::Error> {
        Ok(Self {
            slot: format!("{:?}", entry.slot),
            magic: format!("{:x}", u32::from(entry.magic)),
            length: entry.length as _,
            sha256: hex::encode(entry.digest_with(DigestType::Sha256)?),
        })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CertificateInfo {
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    pub sha256_fingerprint: String,
    pub not_before: String,
    pub not_after: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_algorithm: Option<String>,
    pub is_self_signed: bool,
    pub code_signing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
}

impl TryFrom<&CapturedX509Certificate> for CertificateInfo {
    type Error = QuillError;

    fn try_from(cert: &CapturedX509Certificate) -> Result<Self, Self::Error> {
        Ok(Self {
            subject: cert.display_name(),
            issuer: cert.issuer_common_name(),
            sha256_fingerprint: hex::encode(cert.sha256_fingerprint()?),
            not_before: cert.validity_not_before().to_rfc3339(),
            not_after: cert.validity_not_after().to_rfc3339(),
            key_algorithm: cert.key_algorithm().map(|x| x.to_string()),
            is_self_signed: cert.is_self_signed(),
            code_signing: cert.is_code_signing(),
            team_id: cert.subject_organizational_unit(),
        })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CmsSigner {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    pub digest_algorithm: String,
    pub signature_algorithm: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_time: Option<String>,
    pub signature_verifies: bool,
    pub time_stamped: bool,
}

impl CmsSigner {
    pub fn from_signer_info_and_signed_data(
        signer_info: &SignerInfo,
        signed_data: &SignedData,
    ) -> Result<Self, QuillError> {
        let mut message_digest = None;
        let mut signing_time = None;

        if let Some(sa) = signer_info.signed_attributes() {
            message_digest = Some(hex::encode(sa.message_digest()));
            signing_time = sa.signing_time().map(|t| t.to_rfc3339());
        }

        Ok(Self {
            issuer: signer_info
                .certificate_issuer_and_serial()
                .and_then(|(name, _)| name.user_friendly_str().ok()),
            digest_algorithm: signer_info.digest_algorithm().to_string(),
            signature_algorithm: signer_info.signature_algorithm().to_string(),
            message_digest,
            signing_time,
            signature_verifies: signer_info
                .verify_signature_with_signed_data(signed_data)
                .is_ok(),
            time_stamped: signer_info.time_stamp_token_signed_data()?.is_some(),
        })
    }
}

/// High-level representation of a CMS signature.
#[derive(Clone, Debug, Serialize)]
pub struct CmsSignature {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub certificates: Vec<CertificateInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub signers: Vec<CmsSigner>,
}

impl TryFrom<SignedData> for CmsSignature {
    type Error = QuillError;

    fn try_from(signed_data: SignedData) -> Result<Self, Self::Error> {
        let certificates = signed_data
            .certificates()
            .map(|x| x.try_into())
            .collect::<Result<Vec<_>, _>>()?;

        let signers = signed_data
            .signers()
            .map(|x| CmsSigner::from_signer_info_and_signed_data(x, &signed_data))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            certificates,
            signers,
        })
    }
}

/// High level representation of a code signature.
#[derive(Clone, Debug, Serialize)]
pub struct CodeSignature {
    /// Length of the code signature data.
    pub superblob_length: u32,
    pub blob_count: u32,
    pub blobs: Vec<BlobDescription>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flags: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_slots: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_entity_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable_segment_limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable_segment_flags: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cdhash: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub slot_digests: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entitlements_plist: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub code_requirements: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_requirements_data: Option<String>,
    pub cms: Option<CmsSignature>,
}

impl<'a> TryFrom<EmbeddedSignature<'a>> for CodeSignature {
    type Error = QuillError;

    fn try_from(sig: EmbeddedSignature<'a>) -> Result<Self, Self::Error> {
        let mut version = None;
        let mut flags = None;
        let mut identifier = None;
        let mut team_name = None;
        let mut digest_type = None;
        let mut code_slots = None;
        let mut signed_entity_size = None;
        let mut executable_segment_limit = None;
        let mut executable_segment_flags = None;
        let mut runtime_version = None;
        let mut cdhash = None;
        let mut slot_digests = vec![];
        let mut entitlements_plist = None;
        let mut code_requirements = vec![];
        let mut code_requirements_data = None;
        let mut cms = None;

        if let Some(entry) = sig.code_directory_entries().next() {
            cdhash = Some(hex::encode(entry.digest_with(DigestType::Sha256)?));
        }

        if let Some(cd) = sig.code_directory()? {
            version = Some(cd.version);
            flags = Some(format!("{:?}", cd.flags));
            identifier = Some(cd.ident.clone());
            team_name = cd.team_name.clone();
            digest_type = Some(format!("{}", cd.hash_type));
            code_slots = Some(cd.code_hashes.len());
            signed_entity_size = Some(match cd.code_limit_64 {
                Some(limit) if limit != 0 => limit,
                _ => cd.code_limit as u64,
            });
            executable_segment_limit = cd.exec_seg_limit;
            executable_segment_flags = cd.exec_seg_flags.map(|x| format!("{:?}", x));
            runtime_version = cd
                .runtime
                .filter(|v| *v != 0)
                .map(|v| format!("{}.{}.{}", v >> 16, (v >> 8) & 0xff, v & 0xff));

            slot_digests = cd
                .special_hashes
                .iter()
                .map(|(slot, digest)| format!("{:?}: {}", slot, hex::encode(digest)))
                .collect::<Vec<_>>();
        }

        if let Some(blob) = sig.entitlements()? {
            entitlements_plist = Some(blob.as_str().to_string());
        }

        if let Some(entry) = sig.find_slot(CodeSigningSlot::RequirementSet) {
            code_requirements_data = Some(hex::encode(entry.data));
        }

        if let Some(req) = sig.code_requirements()? {
            for (typ, blob) in &req.requirements {
                code_requirements.push(format!("{}: {}", typ, blob.parse_expression()?));
            }
        }

        if let Some(signed_data) = sig.signed_data()? {
            cms = Some(signed_data.try_into()?);
        }

        Ok(Self {
            superblob_length: sig.length,
            blob_count: sig.count,
            blobs: sig
                .blobs
                .iter()
                .map(BlobDescription::try_from)
                .collect::<Result<Vec<_>, _>>()?,
            version,
            flags,
            identifier,
            team_name,
            digest_type,
            code_slots,
            signed_entity_size,
            executable_segment_limit,
            executable_segment_flags,
            runtime_version,
            cdhash,
            slot_digests,
            entitlements_plist,
            code_requirements,
            code_requirements_data,
            cms,
        })
    }
}

/// The `LC_CODE_SIGNATURE` load command.
#[derive(Clone, Debug, Serialize)]
pub struct CodeSigningCommand {
    pub command_offset: usize,
    pub data_offset: u32,
    pub data_size: u32,
}

/// One Mach-O image, possibly a slice of a universal binary.
#[derive(Clone, Debug, Serialize)]
pub struct MachOEntity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slice: Option<usize>,
    pub cputype: String,
    pub file_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_signing_command: Option<CodeSigningCommand>,
    pub signature: Option<CodeSignature>,
}

impl MachOEntity {
    pub fn from_image(image: &MachOImage, slice: Option<usize>) -> Result<Self, QuillError> {
        let signature = match image.code_signature()? {
            Some(sig) => Some(CodeSignature::try_from(sig)?),
            None => None,
        };

        Ok(Self {
            slice,
            cputype: format!("{:#x}", image.header().cputype),
            file_size: image.data().len(),
            code_signing_command: image.code_signing_cmd().map(|(cmd, offset)| {
                CodeSigningCommand {
                    command_offset: offset,
                    data_offset: cmd.dataoff,
                    data_size: cmd.datasize,
                }
            }),
            signature,
        })
    }
}

/// Parse every Mach-O image in a file.
///
/// Thin files yield one image. Universal files yield one per slice, paired
/// with the slice index.
pub fn read_images(data: &[u8]) -> Result<Vec<(Option<usize>, MachOImage)>, QuillError> {
    if !universal::is_universal(data) {
        return Ok(vec![(None, MachOImage::parse(data.to_vec())?)]);
    }

    universal::arches(data)?
        .iter()
        .enumerate()
        .map(|(i, arch)| {
            let slice = data
                .get(arch.offset as usize..(arch.offset as usize + arch.size as usize))
                .ok_or_else(|| {
                    QuillError::InvalidBinary(format!("slice {} extends past end of file", i))
                })?;

            Ok((Some(i), MachOImage::parse(slice.to_vec())?))
        })
        .collect()
}

/// Describe the signatures of every image in a file.
pub fn describe_path(path: &Path) -> Result<Vec<MachOEntity>, QuillError> {
    let data = std::fs::read(path).map_err(|e| QuillError::IoPath(path.to_path_buf(), e))?;

    read_images(&data)?
        .iter()
        .map(|(slice, image)| MachOEntity::from_image(image, *slice))
        .collect()
}

/// Certificates carried in the CMS signatures of a file.
///
/// Images without a CMS signature contribute nothing.
pub fn signature_certificates(path: &Path) -> Result<Vec<CapturedX509Certificate>, QuillError> {
    let data = std::fs::read(path).map_err(|e| QuillError::IoPath(path.to_path_buf(), e))?;

    let mut certs = vec![];
    for (_, image) in read_images(&data)? {
        if let Some(sig) = image.code_signature()? {
            if let Some(signed_data) = sig.signed_data()? {
                certs.extend(signed_data.certificates().cloned());
            }
        }
    }

    Ok(certs)
}
