// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Code directory data structure and related types.

use {
    crate::{
        embedded_signature::{
            read_and_validate_blob_header, Blob, CodeSigningMagic, CodeSigningSlot, DigestType,
            CODE_PAGE_SIZE,
        },
        error::QuillError,
        macho::MachOImage,
    },
    scroll::{IOwrite, Pread},
    std::{collections::BTreeMap, io::Write},
};

bitflags::bitflags! {
    /// Code signature flags.
    ///
    /// These flags are embedded in the Code Directory and govern use of the embedded
    /// signature.
    pub struct CodeSignatureFlags: u32 {
        /// The code has been sealed without a signing identity.
        const ADHOC = 0x0002;
        /// Set the "hard" status bit for the code when it starts running.
        const FORCE_HARD = 0x0100;
        /// Apply runtime hardening policies.
        const RUNTIME = 0x10000;
        /// The code was automatically signed by the linker.
        const LINKER_SIGNED = 0x20000;
    }
}

bitflags::bitflags! {
    /// Flags that influence behavior of executable segment.
    pub struct ExecutableSegmentFlags: u64 {
        /// Executable segment belongs to main binary.
        const MAIN_BINARY = 0x0001;
        /// Allow unsigned pages (for debugging).
        const ALLOW_UNSIGNED = 0x0010;
        /// Main binary is debugger.
        const DEBUGGER = 0x0020;
        /// JIT enabled.
        const JIT = 0x0040;
    }
}

/// Version of Code Directory data structure.
#[derive(Clone, Copy, Debug, PartialEq)]
#[repr(u32)]
pub enum CodeDirectoryVersion {
    Initial = 0x20000,
    SupportsScatter = 0x20100,
    SupportsTeamId = 0x20200,
    SupportsCodeLimit64 = 0x20300,
    SupportsExecutableSegment = 0x20400,
    SupportsRuntime = 0x20500,
    SupportsLinkage = 0x20600,
}

/// Runtime version recorded when the hardened runtime is requested (12.1.0).
pub const HARDENED_RUNTIME_VERSION: u32 = 0x000c0100;

/// A blob destined for a special slot, along with its digest.
///
/// The digest lands in the code directory. The blob itself goes in the
/// `SuperBlob` next to it.
#[derive(Clone, Debug)]
pub struct SpecialSlot {
    pub slot: CodeSigningSlot,
    pub blob: Vec<u8>,
    pub digest: Vec<u8>,
}

impl SpecialSlot {
    /// Digest a serialized blob for a slot.
    pub fn new(slot: CodeSigningSlot, blob: Vec<u8>, hash: DigestType) -> Result<Self, QuillError> {
        let digest = hash.digest_data(&blob)?;

        Ok(Self { slot, blob, digest })
    }
}

fn get_hashes(
    data: &[u8],
    offset: usize,
    count: usize,
    hash_size: usize,
) -> Result<Vec<Vec<u8>>, QuillError> {
    let end = offset + count * hash_size;

    if end > data.len() || (hash_size == 0 && count > 0) {
        return Err(QuillError::BlobLengthOverflow(end));
    }

    Ok(data[offset..end]
        .chunks(hash_size.max(1))
        .map(|x| x.to_vec())
        .collect())
}

fn read_c_string(data: &[u8], offset: usize) -> Result<String, QuillError> {
    let tail = data
        .get(offset..)
        .ok_or(QuillError::CodeDirectoryMalformedIdentifier)?;

    match tail.split(|&b| b == 0).map(std::str::from_utf8).next() {
        Some(Ok(s)) => Ok(s.to_string()),
        _ => Err(QuillError::CodeDirectoryMalformedIdentifier),
    }
}

/// Represents a code directory blob entry.
///
/// This struct is versioned and has been extended over time. We always emit
/// [CodeDirectoryVersion::SupportsRuntime]. Parsing accepts older versions and
/// leaves the fields they lack as `None`.
#[derive(Clone, Debug)]
pub struct CodeDirectoryBlob {
    /// Compatibility version.
    pub version: u32,
    /// Setup and mode flags.
    pub flags: CodeSignatureFlags,
    /// Limit to main image signature range.
    ///
    /// This is the file offset where the embedded signature data starts.
    pub code_limit: u32,
    /// Size of each hash in bytes.
    pub hash_size: u8,
    /// Type of hash.
    pub hash_type: DigestType,
    /// Platform identifier. 0 if not platform binary.
    pub platform: u8,
    /// Page size in bytes. (stored as log u8)
    pub page_size: u32,
    // Version 0x20300
    /// Limit to main image signature range, 64 bits.
    pub code_limit_64: Option<u64>,
    // Version 0x20400
    /// Offset of executable segment.
    pub exec_seg_base: Option<u64>,
    /// Limit of executable segment.
    pub exec_seg_limit: Option<u64>,
    /// Executable segment flags.
    pub exec_seg_flags: Option<ExecutableSegmentFlags>,
    // Version 0x20500
    pub runtime: Option<u32>,
    pub pre_encrypt_offset: Option<u32>,

    pub ident: String,
    pub team_name: Option<String>,
    pub code_hashes: Vec<Vec<u8>>,
    pub special_hashes: BTreeMap<CodeSigningSlot, Vec<u8>>,
}

impl Blob for CodeDirectoryBlob {
    fn magic() -> u32 {
        u32::from(CodeSigningMagic::CodeDirectory)
    }

    fn from_blob_bytes(data: &[u8]) -> Result<Self, QuillError> {
        read_and_validate_blob_header(data, Self::magic(), "code directory blob")?;

        let offset = &mut 8;

        let version = data.gread_with::<u32>(offset, scroll::BE)?;
        if version < CodeDirectoryVersion::Initial as u32 {
            return Err(QuillError::CodeDirectoryUnknownVersion(version));
        }

        let flags = data.gread_with::<u32>(offset, scroll::BE)?;
        let flags = CodeSignatureFlags::from_bits_truncate(flags);
        let hash_offset = data.gread_with::<u32>(offset, scroll::BE)?;
        let ident_offset = data.gread_with::<u32>(offset, scroll::BE)?;
        let n_special_slots = data.gread_with::<u32>(offset, scroll::BE)?;
        let n_code_slots = data.gread_with::<u32>(offset, scroll::BE)?;
        let code_limit = data.gread_with(offset, scroll::BE)?;
        let hash_size = data.gread_with::<u8>(offset, scroll::BE)?;
        let hash_type = data.gread_with::<u8>(offset, scroll::BE)?.into();
        let platform = data.gread_with(offset, scroll::BE)?;
        let page_size = data.gread_with::<u8>(offset, scroll::BE)?;
        let page_size = 2u32.pow(page_size as u32);
        let _spare2 = data.gread_with::<u32>(offset, scroll::BE)?;

        if version >= CodeDirectoryVersion::SupportsScatter as u32 {
            let _scatter_offset = data.gread_with::<u32>(offset, scroll::BE)?;
        }

        let team_offset = if version >= CodeDirectoryVersion::SupportsTeamId as u32 {
            match data.gread_with::<u32>(offset, scroll::BE)? {
                0 => None,
                v => Some(v),
            }
        } else {
            None
        };

        let code_limit_64 = if version >= CodeDirectoryVersion::SupportsCodeLimit64 as u32 {
            let _spare3 = data.gread_with::<u32>(offset, scroll::BE)?;
            Some(data.gread_with(offset, scroll::BE)?)
        } else {
            None
        };

        let (exec_seg_base, exec_seg_limit, exec_seg_flags) =
            if version >= CodeDirectoryVersion::SupportsExecutableSegment as u32 {
                (
                    Some(data.gread_with(offset, scroll::BE)?),
                    Some(data.gread_with(offset, scroll::BE)?),
                    Some(ExecutableSegmentFlags::from_bits_truncate(
                        data.gread_with::<u64>(offset, scroll::BE)?,
                    )),
                )
            } else {
                (None, None, None)
            };

        let (runtime, pre_encrypt_offset) =
            if version >= CodeDirectoryVersion::SupportsRuntime as u32 {
                (
                    Some(data.gread_with(offset, scroll::BE)?),
                    Some(data.gread_with(offset, scroll::BE)?),
                )
            } else {
                (None, None)
            };

        let ident = read_c_string(data, ident_offset as usize)?;

        let team_name = if let Some(team_offset) = team_offset {
            Some(read_c_string(data, team_offset as usize)?)
        } else {
            None
        };

        let code_hashes = get_hashes(
            data,
            hash_offset as usize,
            n_code_slots as usize,
            hash_size as usize,
        )?;

        let specials_offset = (hash_offset as usize)
            .checked_sub(hash_size as usize * n_special_slots as usize)
            .ok_or(QuillError::SuperblobMalformed)?;

        let special_hashes = get_hashes(
            data,
            specials_offset,
            n_special_slots as usize,
            hash_size as usize,
        )?
        .into_iter()
        .enumerate()
        .map(|(i, h)| (CodeSigningSlot::from(n_special_slots - i as u32), h))
        .filter(|(_, h)| h.iter().any(|b| *b != 0))
        .collect();

        Ok(Self {
            version,
            flags,
            code_limit,
            hash_size,
            hash_type,
            platform,
            page_size,
            code_limit_64,
            exec_seg_base,
            exec_seg_limit,
            exec_seg_flags,
            runtime,
            pre_encrypt_offset,
            ident,
            team_name,
            code_hashes,
            special_hashes,
        })
    }

    fn serialize_payload(&self) -> Result<Vec<u8>, QuillError> {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());

        // Offsets are only known once the variable length data is written. We
        // write placeholders and come back to them.

        cursor.iowrite_with(self.version, scroll::BE)?;
        cursor.iowrite_with(self.flags.bits(), scroll::BE)?;
        let hash_offset_cursor_position = cursor.position();
        cursor.iowrite_with(0u32, scroll::BE)?;
        let ident_offset_cursor_position = cursor.position();
        cursor.iowrite_with(0u32, scroll::BE)?;

        // Special hashes are stored at "negative" indices before the code hashes,
        // indexed by slot number. Slot 1 is adjacent to the first code hash. The
        // count is the highest slot present. Gaps are zero filled.
        let highest_slot = self
            .special_hashes
            .keys()
            .map(|slot| u32::from(*slot))
            .filter(|slot| is_special_slot(*slot))
            .max()
            .unwrap_or(0);

        cursor.iowrite_with(highest_slot, scroll::BE)?;
        cursor.iowrite_with(self.code_hashes.len() as u32, scroll::BE)?;
        cursor.iowrite_with(self.code_limit, scroll::BE)?;
        cursor.iowrite_with(self.hash_size, scroll::BE)?;
        cursor.iowrite_with(u8::from(self.hash_type), scroll::BE)?;
        cursor.iowrite_with(self.platform, scroll::BE)?;
        cursor.iowrite_with(self.page_size.trailing_zeros() as u8, scroll::BE)?;
        // spare2
        cursor.iowrite_with(0u32, scroll::BE)?;

        let mut team_offset_cursor_position = None;

        if self.version >= CodeDirectoryVersion::SupportsScatter as u32 {
            // Scatter vectors are never emitted.
            cursor.iowrite_with(0u32, scroll::BE)?;

            if self.version >= CodeDirectoryVersion::SupportsTeamId as u32 {
                team_offset_cursor_position = Some(cursor.position());
                cursor.iowrite_with(0u32, scroll::BE)?;

                if self.version >= CodeDirectoryVersion::SupportsCodeLimit64 as u32 {
                    // spare3
                    cursor.iowrite_with(0u32, scroll::BE)?;
                    cursor.iowrite_with(self.code_limit_64.unwrap_or(0), scroll::BE)?;

                    if self.version >= CodeDirectoryVersion::SupportsExecutableSegment as u32 {
                        cursor.iowrite_with(self.exec_seg_base.unwrap_or(0), scroll::BE)?;
                        cursor.iowrite_with(self.exec_seg_limit.unwrap_or(0), scroll::BE)?;
                        cursor.iowrite_with(
                            self.exec_seg_flags
                                .unwrap_or_else(ExecutableSegmentFlags::empty)
                                .bits(),
                            scroll::BE,
                        )?;

                        if self.version >= CodeDirectoryVersion::SupportsRuntime as u32 {
                            cursor.iowrite_with(self.runtime.unwrap_or(0), scroll::BE)?;
                            cursor
                                .iowrite_with(self.pre_encrypt_offset.unwrap_or(0), scroll::BE)?;
                        }
                    }
                }
            }
        }

        // Fixed fields are done. Now the variable length data.

        let identity_offset = cursor.position();
        cursor.write_all(self.ident.as_bytes())?;
        cursor.write_all(b"\0")?;

        let team_offset = cursor.position();
        if team_offset_cursor_position.is_some() {
            if let Some(team_name) = &self.team_name {
                cursor.write_all(team_name.as_bytes())?;
                cursor.write_all(b"\0")?;
            }
        }

        for slot_index in (1..highest_slot + 1).rev() {
            let slot = CodeSigningSlot::from(slot_index);

            if let Some(hash) = self.special_hashes.get(&slot) {
                cursor.write_all(hash)?;
            } else {
                cursor.write_all(&b"\0".repeat(self.hash_size as usize))?;
            }
        }

        let code_hashes_start_offset = cursor.position();

        for hash in &self.code_hashes {
            cursor.write_all(hash)?;
        }

        // Go back and fill in offsets. They are relative to the blob start, so
        // account for the 8 byte header that isn't in this buffer.
        cursor.set_position(hash_offset_cursor_position);
        cursor.iowrite_with(code_hashes_start_offset as u32 + 8, scroll::BE)?;

        cursor.set_position(ident_offset_cursor_position);
        cursor.iowrite_with(identity_offset as u32 + 8, scroll::BE)?;

        if let Some(offset) = team_offset_cursor_position {
            if self.team_name.is_some() {
                cursor.set_position(offset);
                cursor.iowrite_with(team_offset as u32 + 8, scroll::BE)?;
            }
        }

        Ok(cursor.into_inner())
    }
}

/// Whether a slot number can be expressed as a code directory special hash.
fn is_special_slot(slot: u32) -> bool {
    (1..=7).contains(&slot)
}

impl CodeDirectoryBlob {
    /// Build a code directory for a Mach-O image.
    ///
    /// The image must already carry an `LC_CODE_SIGNATURE` command. Its data offset
    /// bounds the page hashes. `__TEXT` supplies the executable segment bounds.
    pub fn from_macho(
        macho: &MachOImage,
        ident: &str,
        team_name: Option<&str>,
        hash_type: DigestType,
        flags: CodeSignatureFlags,
        special_slots: &[SpecialSlot],
    ) -> Result<Self, QuillError> {
        let code_hashes = macho.hash_pages(hash_type)?;
        let code_limit = macho.code_limit()? as u64;
        let text = macho.text_segment()?;

        let (code_limit, code_limit_64) = match u32::try_from(code_limit) {
            Ok(limit) => (limit, Some(0)),
            Err(_) => (0, Some(code_limit)),
        };

        let exec_seg_flags = if macho.is_executable() {
            ExecutableSegmentFlags::MAIN_BINARY
        } else {
            ExecutableSegmentFlags::empty()
        };

        let runtime = if flags.contains(CodeSignatureFlags::RUNTIME) {
            HARDENED_RUNTIME_VERSION
        } else {
            0
        };

        let special_hashes = special_slots
            .iter()
            .map(|s| (s.slot, s.digest.clone()))
            .collect();

        Ok(Self {
            version: CodeDirectoryVersion::SupportsRuntime as u32,
            flags,
            code_limit,
            hash_size: hash_type.hash_len()? as u8,
            hash_type,
            platform: 0,
            page_size: CODE_PAGE_SIZE as u32,
            code_limit_64,
            exec_seg_base: Some(text.fileoff),
            exec_seg_limit: Some(text.filesize),
            exec_seg_flags: Some(exec_seg_flags),
            runtime: Some(runtime),
            pre_encrypt_offset: Some(0),
            ident: ident.to_string(),
            team_name: team_name.filter(|s| !s.is_empty()).map(|s| s.to_string()),
            code_hashes,
            special_hashes,
        })
    }
}
