// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Signing Mach-O binaries.
//!
//! # Circular Dependency
//!
//! The code directory digests every byte of the binary that precedes the
//! signature, including the `LC_CODE_SIGNATURE` command and the `__LINKEDIT`
//! segment header. Both of those record the size of the signature, which isn't
//! known until the code directory, requirements and CMS blobs are built.
//!
//! We resolve this with two passes. The first pass builds a signature
//! generously padded and records its length. That length is written into the
//! load command and segment header. The second pass rebuilds everything over
//! the now stable headers and pads to exactly the length from the first pass.

use {
    crate::{
        code_directory::{CodeDirectoryBlob, CodeSignatureFlags, SpecialSlot},
        code_requirement::RequirementSetBlob,
        embedded_signature::{
            Blob, CodeSigningSlot, DigestType, EntitlementsBlob, CODE_PAGE_SIZE,
        },
        embedded_signature_builder::{EmbeddedSignatureBuilder, APPLE_TIMESTAMP_URL},
        error::QuillError,
        macho::{MachOFile, MachOImage},
        signing_material::SigningMaterial,
        universal,
    },
    log::{debug, info, warn},
    std::path::Path,
};

/// Options controlling how binaries are signed.
#[derive(Clone, Debug)]
pub struct SigningOptions {
    /// Identifier recorded in the code directory and designated requirement.
    pub identifier: String,
    /// Digest for page and special slot hashes.
    pub digest: DigestType,
    /// Request the hardened runtime. Only applies to non ad-hoc signatures.
    pub hardened_runtime: bool,
    /// RFC 3161 time-stamp server.
    pub timestamp_url: Option<String>,
    /// Entitlements plist XML embedded verbatim.
    pub entitlements: Option<String>,
}

impl Default for SigningOptions {
    fn default() -> Self {
        Self {
            identifier: String::new(),
            digest: DigestType::Sha256,
            hardened_runtime: true,
            timestamp_url: Some(APPLE_TIMESTAMP_URL.to_string()),
            entitlements: None,
        }
    }
}

impl SigningOptions {
    pub fn new(identifier: impl ToString) -> Self {
        Self {
            identifier: identifier.to_string(),
            ..Default::default()
        }
    }
}

/// Mach-O binary signer.
///
/// Without signing material, binaries are signed ad-hoc.
#[derive(Debug)]
pub struct MachOSigner<'a> {
    options: SigningOptions,
    material: Option<&'a SigningMaterial>,
}

impl<'a> MachOSigner<'a> {
    pub fn new(options: SigningOptions, material: Option<&'a SigningMaterial>) -> Self {
        Self { options, material }
    }

    pub fn options(&self) -> &SigningOptions {
        &self.options
    }

    fn flags(&self) -> CodeSignatureFlags {
        match self.material {
            None => CodeSignatureFlags::ADHOC,
            Some(_) if self.options.hardened_runtime => CodeSignatureFlags::RUNTIME,
            Some(_) => CodeSignatureFlags::empty(),
        }
    }

    /// Build the blobs that get special slots in the code directory.
    fn special_slots(&self) -> Result<Vec<SpecialSlot>, QuillError> {
        let requirements = match self.material {
            Some(material) => {
                RequirementSetBlob::designated(&self.options.identifier, material.chain())?
            }
            None => RequirementSetBlob::default(),
        };

        let mut slots = vec![SpecialSlot::new(
            CodeSigningSlot::RequirementSet,
            requirements.to_blob_bytes()?,
            self.options.digest,
        )?];

        if let Some(entitlements) = &self.options.entitlements {
            slots.push(SpecialSlot::new(
                CodeSigningSlot::Entitlements,
                EntitlementsBlob::from_string(entitlements).to_blob_bytes()?,
                self.options.digest,
            )?);
        }

        Ok(slots)
    }

    /// Create the `SuperBlob` for the current state of an image.
    ///
    /// The image must have an `LC_CODE_SIGNATURE` command bounding the
    /// signable data.
    pub fn create_superblob(
        &self,
        macho: &MachOImage,
        padding_target: Option<usize>,
    ) -> Result<Vec<u8>, QuillError> {
        let slots = self.special_slots()?;

        let mut builder = EmbeddedSignatureBuilder::default();
        for slot in &slots {
            builder.add_special_slot(slot)?;
        }

        let team_id = self.material.and_then(|m| m.team_id());

        let cd = CodeDirectoryBlob::from_macho(
            macho,
            &self.options.identifier,
            team_id.as_deref(),
            self.options.digest,
            self.flags(),
            &slots,
        )?;
        debug!(
            "code directory: {} code slots, flags {:?}",
            cd.code_hashes.len(),
            cd.flags
        );
        builder.add_code_directory(cd)?;

        builder.add_cms_signature(self.material, self.options.timestamp_url.as_deref())?;

        builder.create_superblob(padding_target)
    }

    /// Sign a file in place. Universal binaries are signed slice by slice.
    ///
    /// The file is only replaced once signing succeeds.
    pub fn sign_path(&self, path: &Path) -> Result<(), QuillError> {
        let data = std::fs::read(path).map_err(|e| QuillError::IoPath(path.to_path_buf(), e))?;

        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let staged = tempfile::NamedTempFile::new_in(dir)?;

        if universal::is_universal(&data) {
            self.sign_universal(&data, staged.path())?;
        } else {
            std::fs::write(staged.path(), &data)?;
            self.sign_file(staged.path())?;
        }

        let permissions = std::fs::metadata(path)?.permissions();
        std::fs::set_permissions(staged.path(), permissions)?;

        staged
            .persist(path)
            .map_err(|e| QuillError::IoPath(path.to_path_buf(), e.error))?;

        info!("signed {}", path.display());

        Ok(())
    }

    fn sign_universal(&self, data: &[u8], dest: &Path) -> Result<(), QuillError> {
        let temp = tempfile::tempdir()?;
        let slices = universal::extract(data, temp.path())?;

        for (i, slice) in slices.iter().enumerate() {
            info!("signing universal binary slice {}", i);
            self.sign_file(slice)?;
        }

        universal::package(dest, &slices)
    }

    /// Sign a single architecture Mach-O file in place.
    pub fn sign_file(&self, path: &Path) -> Result<(), QuillError> {
        let mut macho = MachOFile::open_rw(path)?;

        if macho.has_code_signing_cmd() {
            return Err(QuillError::AlreadySigned);
        }

        let linkedit = macho.linkedit_segment()?.clone();
        if macho
            .segments()
            .any(|segment| segment.fileoff > linkedit.fileoff)
        {
            return Err(QuillError::LinkeditNotLast);
        }

        if (linkedit.fileoff + linkedit.filesize) as usize != macho.data().len() {
            warn!(
                "{} has {} bytes after __LINKEDIT that will be overwritten",
                path.display(),
                macho.data().len() as i64 - (linkedit.fileoff + linkedit.filesize) as i64
            );
        }

        if self.material.is_none() {
            info!("creating ad-hoc signature");
        }

        macho.add_empty_code_signing_cmd()?;

        let superblob = self.create_superblob(macho.image(), None)?;
        let reserved = superblob.len();
        info!("reserving {} bytes for signature data", reserved);

        macho.update_code_signing_cmd_data_size(reserved as u32)?;

        let mut linkedit = macho.linkedit_segment()?.clone();
        linkedit.filesize += reserved as u64;
        if linkedit.vmsize == 0 {
            linkedit.vmsize = CODE_PAGE_SIZE as u64;
        }
        while linkedit.vmsize < linkedit.filesize {
            linkedit.vmsize *= 2;
        }
        macho.update_segment_header(&linkedit)?;

        let superblob = self.create_superblob(macho.image(), Some(reserved))?;

        let (command, _) = macho
            .code_signing_cmd()
            .ok_or(QuillError::MissingCodeSigningCmd)?;
        macho.patch(&superblob, command.dataoff as usize)?;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            code_requirement::RequirementType,
            embedded_signature::{EmbeddedSignature, SUPERBLOB_HEADER_SIZE},
            macho::testutil::{synthetic_macho, synthetic_macho_file, TEXT_FILESIZE},
            prompt::NoPrompter,
            signing_material::{load_pem, InputSource},
        },
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

    fn options(identifier: &str) -> SigningOptions {
        SigningOptions {
            timestamp_url: None,
            ..SigningOptions::new(identifier)
        }
    }

    /// Check the signature fills exactly the space its load command describes.
    fn assert_fixpoint(image: &MachOImage) {
        let (command, _) = image.code_signing_cmd().unwrap();
        let linkedit = image.linkedit_segment().unwrap();

        assert_eq!(
            image.data().len(),
            command.dataoff as usize + command.datasize as usize
        );
        assert!(
            linkedit.filesize
                >= (command.dataoff + command.datasize) as u64 - linkedit.fileoff
        );
        assert!(linkedit.vmsize >= linkedit.filesize);

        let sig = image.code_signature().unwrap().unwrap();
        assert!(sig.length as usize <= command.datasize as usize);
        assert!(sig.length as usize > SUPERBLOB_HEADER_SIZE);
    }

    #[test]
    fn adhoc_sign() {
        let dir = tempfile::tempdir().unwrap();
        let path = synthetic_macho_file(dir.path(), "hello");

        MachOSigner::new(options("hello-id"), None)
            .sign_path(&path)
            .unwrap();

        let image = MachOImage::parse(std::fs::read(&path).unwrap()).unwrap();
        let (command, _) = image.code_signing_cmd().unwrap();
        assert_eq!(command.dataoff, 0xc110);
        assert_fixpoint(&image);

        let sig = image.code_signature().unwrap().unwrap();
        let cd = sig.code_directory().unwrap().unwrap();
        assert_eq!(cd.flags.bits(), 0x2);
        assert_eq!(cd.code_hashes.len(), 13);
        assert_eq!(u8::from(cd.hash_type), 2);
        assert_eq!(cd.exec_seg_limit, Some(TEXT_FILESIZE));
        assert_eq!(cd.ident, "hello-id");
        assert_eq!(cd.team_name, None);

        let requirements = sig.code_requirements().unwrap().unwrap();
        assert!(requirements.requirements.is_empty());
        assert!(sig.signed_data().unwrap().is_none());

        // Page hashes cover everything before the signature.
        assert_eq!(
            cd.code_hashes,
            image.hash_pages(DigestType::Sha256).unwrap()
        );
    }

    #[test]
    fn sign_with_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = synthetic_macho_file(dir.path(), "syft");
        let material = test_material();

        MachOSigner::new(options("syft-id"), Some(&material))
            .sign_path(&path)
            .unwrap();

        let image = MachOImage::parse(std::fs::read(&path).unwrap()).unwrap();
        assert_fixpoint(&image);

        let sig = image.code_signature().unwrap().unwrap();
        let cd = sig.code_directory().unwrap().unwrap();
        assert_eq!(cd.flags.bits(), 0x0001_0000);
        assert_eq!(cd.runtime, Some(0x000c_0100));
        assert_eq!(cd.team_name.as_deref(), Some("TEAMID1234"));

        let requirements = sig.code_requirements().unwrap().unwrap();
        let (typ, blob) = &requirements.requirements[0];
        assert_eq!(*typ, RequirementType::Designated);
        assert_eq!(
            blob.parse_expression().unwrap().to_string(),
            "identifier \"syft-id\" and certificate 1[field.1.2.840.113635.100.6.2.6] /* exists */ and certificate leaf[subject.OU] = \"TEAMID1234\""
        );

        // The requirements digest in the code directory matches the blob.
        let entry = sig.find_slot(CodeSigningSlot::RequirementSet).unwrap();
        assert_eq!(
            cd.special_hashes.get(&CodeSigningSlot::RequirementSet),
            Some(&entry.digest_with(DigestType::Sha256).unwrap())
        );

        let signed_data = sig.signed_data().unwrap().unwrap();
        let cd_bytes = image.cd_bytes(scroll::BE, 0).unwrap();
        for signer in signed_data.signers() {
            signer
                .verify_signature_with_signed_data_and_content(&signed_data, &cd_bytes)
                .unwrap();
            signer.verify_message_digest_with_content(&cd_bytes).unwrap();
        }
    }

    #[test]
    fn sign_with_entitlements() {
        let dir = tempfile::tempdir().unwrap();
        let path = synthetic_macho_file(dir.path(), "hello");
        let entitlements = "<?xml version=\"1.0\"?><plist version=\"1.0\"><dict/></plist>";

        let options = SigningOptions {
            entitlements: Some(entitlements.to_string()),
            ..options("hello-id")
        };
        MachOSigner::new(options, None).sign_path(&path).unwrap();

        let image = MachOImage::parse(std::fs::read(&path).unwrap()).unwrap();
        let sig = image.code_signature().unwrap().unwrap();

        assert_eq!(sig.entitlements().unwrap().unwrap().as_str(), entitlements);

        let cd = sig.code_directory().unwrap().unwrap();
        assert!(cd
            .special_hashes
            .contains_key(&CodeSigningSlot::Entitlements));
        assert!(cd
            .special_hashes
            .contains_key(&CodeSigningSlot::RequirementSet));
    }

    #[test]
    fn already_signed() {
        let dir = tempfile::tempdir().unwrap();
        let path = synthetic_macho_file(dir.path(), "hello");

        let signer = MachOSigner::new(options("hello-id"), None);
        signer.sign_path(&path).unwrap();

        let before = std::fs::read(&path).unwrap();

        let err = MachOSigner::new(options("x"), None)
            .sign_path(&path)
            .unwrap_err();
        assert!(matches!(err, QuillError::AlreadySigned));
        assert_eq!(err.to_string(), "binary is already signed");

        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn sign_universal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ls_universal");

        let mut fat = vec![];
        universal::create_universal_macho(
            &mut fat,
            [
                synthetic_macho(0x0100_0007, 3).as_slice(),
                synthetic_macho(0x0100_000c, 0).as_slice(),
            ]
            .into_iter(),
        )
        .unwrap();
        std::fs::write(&path, &fat).unwrap();

        let material = test_material();
        MachOSigner::new(options("ls"), Some(&material))
            .sign_path(&path)
            .unwrap();

        let signed = std::fs::read(&path).unwrap();
        assert!(universal::is_universal(&signed));

        let arches = universal::arches(&signed).unwrap();
        assert_eq!(arches.len(), 2);

        for arch in arches {
            let slice =
                signed[arch.offset as usize..(arch.offset + arch.size) as usize].to_vec();
            let image = MachOImage::parse(slice).unwrap();

            assert_eq!(image.header().cputype, arch.cputype);
            assert_eq!(image.text_segment().unwrap().filesize, TEXT_FILESIZE);
            assert_fixpoint(&image);

            let sig = EmbeddedSignature::from_bytes(image.signature_data().unwrap().unwrap())
                .unwrap();
            assert!(sig.signed_data().unwrap().is_some());
        }
    }

    #[test]
    fn padding_target_too_small() {
        let dir = tempfile::tempdir().unwrap();
        let mut macho = MachOFile::open_rw(synthetic_macho_file(dir.path(), "hello")).unwrap();
        macho.add_empty_code_signing_cmd().unwrap();

        let signer = MachOSigner::new(options("hello-id"), None);
        assert!(matches!(
            signer.create_superblob(macho.image(), Some(16)),
            Err(QuillError::SignatureSpaceTooSmall(_, 16))
        ));
    }
}
