// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Notarization payloads.
//!
//! The notary service accepts zip archives. Zip files are submitted as is.
//! A Mach-O binary is wrapped in a single entry archive first.

use {
    crate::{error::QuillError, macho::MachOImage, universal},
    log::{debug, info},
    rand::Rng,
    sha2::{Digest, Sha256},
    std::{
        io::{Cursor, Write},
        path::Path,
    },
    zip::{write::FileOptions, CompressionMethod, ZipWriter},
};

/// Leading bytes of a zip local file header.
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

pub const ZIP_CONTENT_TYPE: &str = "application/zip";

/// Whether data looks like a zip archive.
pub fn is_zip(data: &[u8]) -> bool {
    data.starts_with(ZIP_MAGIC)
}

/// Create a zip archive holding a single executable file.
pub fn zip_single_file(entry_name: &str, data: &[u8]) -> Result<Vec<u8>, QuillError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o755);

    writer.start_file(entry_name, options)?;
    writer.write_all(data)?;

    Ok(writer.finish()?.into_inner())
}

/// Content ready for upload to the notary service.
#[derive(Clone, Debug)]
pub struct Payload {
    name: String,
    data: Vec<u8>,
    sha256: String,
}

impl Payload {
    /// Build a payload from zip data.
    pub fn from_zip(name: impl ToString, data: Vec<u8>) -> Self {
        let sha256 = hex::encode(Sha256::digest(&data));

        Self {
            name: name.to_string(),
            data,
            sha256,
        }
    }

    /// Prepare the file at `path` for submission.
    ///
    /// Mach-O files are validated before being archived.
    pub fn prepare(path: &Path) -> Result<Self, QuillError> {
        let data = std::fs::read(path).map_err(|e| QuillError::IoPath(path.to_path_buf(), e))?;

        let basename = path
            .file_name()
            .map(|x| x.to_string_lossy().to_string())
            .ok_or_else(|| QuillError::CliGeneralError(format!("{} is not a file", path.display())))?;

        if is_zip(&data) {
            debug!("{} is already a zip archive", path.display());
            return Ok(Self::from_zip(basename, data));
        }

        if universal::is_universal(&data) {
            universal::arches(&data)?;
        } else {
            MachOImage::parse(data.clone())?;
        }

        info!("creating zip archive for {}", basename);
        let zip = zip_single_file(&basename, &data)?;

        Ok(Self::from_zip(format!("{}.zip", basename), zip))
    }

    /// Display name of the archive.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Hex SHA-256 of the archive.
    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    /// A unique name for a new submission of this payload.
    pub fn submission_name(&self) -> String {
        let suffix: u32 = rand::thread_rng().gen();

        format!("{}-{}-{:08x}", self.name, self.sha256, suffix)
    }
}
