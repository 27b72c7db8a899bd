// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Embedded signature data structures (superblobs, blobs, magic values).
//!
//! The embedded signature of a Mach-O binary lives at the location pointed to
//! by the `LC_CODE_SIGNATURE` load command. Its high-level layout is:
//!
//! * A `SuperBlob` header holding a magic, the total length and the number of
//!   *blob* sections that follow.
//! * An array of `(slot, offset)` index entries, one per blob. The offset is
//!   relative to the first byte of the `SuperBlob`.
//! * The blobs themselves. Each blob begins with a `u32` magic and a `u32`
//!   length (which counts the 8 header bytes).
//!
//! All integers in these structures are big-endian, regardless of the
//! endianness of the Mach-O image carrying them.
//!
//! The best reference for this format is Apple's `cs_blobs.h` in xnu.

use {
    crate::{
        code_directory::CodeDirectoryBlob, code_requirement::RequirementSetBlob, QuillError,
    },
    cryptographic_message_syntax::SignedData,
    scroll::{IOwrite, Pread},
    std::{
        cmp::Ordering,
        fmt::{Display, Formatter},
        io::Write,
    },
};

/// Size of the `SuperBlob` header: magic, length, count.
pub const SUPERBLOB_HEADER_SIZE: usize = 12;

/// Size of each `(slot, offset)` index entry in a `SuperBlob`.
pub const BLOB_INDEX_SIZE: usize = 8;

/// Page size used for code hashing and signature padding.
pub const CODE_PAGE_SIZE: usize = 4096;

/// Zero padding appended to a `SuperBlob` when no explicit size is requested.
pub const DEFAULT_SUPERBLOB_PADDING: usize = 4 * CODE_PAGE_SIZE;

/// Defines header magic for various payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CodeSigningMagic {
    /// Single code requirement blob.
    Requirement,
    /// Code requirements vector blob.
    RequirementSet,
    /// CodeDirectory blob.
    CodeDirectory,
    /// Embedded signature `SuperBlob`.
    EmbeddedSignature,
    /// XML entitlements blob.
    Entitlements,
    /// DER encoded entitlements blob.
    EntitlementsDer,
    /// Generic blob wrapper.
    ///
    /// The CMS signature is stored in this type.
    BlobWrapper,
    /// Unknown magic.
    Unknown(u32),
}

impl From<u32> for CodeSigningMagic {
    fn from(v: u32) -> Self {
        match v {
            0xfade0c00 => Self::Requirement,
            0xfade0c01 => Self::RequirementSet,
            0xfade0c02 => Self::CodeDirectory,
            0xfade0cc0 => Self::EmbeddedSignature,
            0xfade7171 => Self::Entitlements,
            0xfade7172 => Self::EntitlementsDer,
            0xfade0b01 => Self::BlobWrapper,
            _ => Self::Unknown(v),
        }
    }
}

impl From<CodeSigningMagic> for u32 {
    fn from(magic: CodeSigningMagic) -> u32 {
        match magic {
            CodeSigningMagic::Requirement => 0xfade0c00,
            CodeSigningMagic::RequirementSet => 0xfade0c01,
            CodeSigningMagic::CodeDirectory => 0xfade0c02,
            CodeSigningMagic::EmbeddedSignature => 0xfade0cc0,
            CodeSigningMagic::Entitlements => 0xfade7171,
            CodeSigningMagic::EntitlementsDer => 0xfade7172,
            CodeSigningMagic::BlobWrapper => 0xfade0b01,
            CodeSigningMagic::Unknown(v) => v,
        }
    }
}

/// A well-known slot within code signing data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CodeSigningSlot {
    CodeDirectory,
    Info,
    RequirementSet,
    ResourceDir,
    Application,
    Entitlements,
    EntitlementsDer,
    AlternateCodeDirectory0,
    AlternateCodeDirectory1,
    AlternateCodeDirectory2,
    AlternateCodeDirectory3,
    AlternateCodeDirectory4,
    AlternateCodeDirectory5,
    Signature,
    Unknown(u32),
}

impl From<u32> for CodeSigningSlot {
    fn from(v: u32) -> Self {
        match v {
            0 => Self::CodeDirectory,
            1 => Self::Info,
            2 => Self::RequirementSet,
            3 => Self::ResourceDir,
            4 => Self::Application,
            5 => Self::Entitlements,
            7 => Self::EntitlementsDer,
            0x1000 => Self::AlternateCodeDirectory0,
            0x1001 => Self::AlternateCodeDirectory1,
            0x1002 => Self::AlternateCodeDirectory2,
            0x1003 => Self::AlternateCodeDirectory3,
            0x1004 => Self::AlternateCodeDirectory4,
            0x1005 => Self::AlternateCodeDirectory5,
            0x10000 => Self::Signature,
            _ => Self::Unknown(v),
        }
    }
}

impl From<CodeSigningSlot> for u32 {
    fn from(v: CodeSigningSlot) -> Self {
        match v {
            CodeSigningSlot::CodeDirectory => 0,
            CodeSigningSlot::Info => 1,
            CodeSigningSlot::RequirementSet => 2,
            CodeSigningSlot::ResourceDir => 3,
            CodeSigningSlot::Application => 4,
            CodeSigningSlot::Entitlements => 5,
            CodeSigningSlot::EntitlementsDer => 7,
            CodeSigningSlot::AlternateCodeDirectory0 => 0x1000,
            CodeSigningSlot::AlternateCodeDirectory1 => 0x1001,
            CodeSigningSlot::AlternateCodeDirectory2 => 0x1002,
            CodeSigningSlot::AlternateCodeDirectory3 => 0x1003,
            CodeSigningSlot::AlternateCodeDirectory4 => 0x1004,
            CodeSigningSlot::AlternateCodeDirectory5 => 0x1005,
            CodeSigningSlot::Signature => 0x10000,
            CodeSigningSlot::Unknown(v) => v,
        }
    }
}

impl PartialOrd for CodeSigningSlot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CodeSigningSlot {
    fn cmp(&self, other: &Self) -> Ordering {
        u32::from(*self).cmp(&u32::from(*other))
    }
}

impl Display for CodeSigningSlot {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::CodeDirectory => "CodeDirectory",
            Self::Info => "Info",
            Self::RequirementSet => "Requirements",
            Self::ResourceDir => "Resources",
            Self::Application => "Application",
            Self::Entitlements => "Entitlements",
            Self::EntitlementsDer => "DER Entitlements",
            Self::AlternateCodeDirectory0
            | Self::AlternateCodeDirectory1
            | Self::AlternateCodeDirectory2
            | Self::AlternateCodeDirectory3
            | Self::AlternateCodeDirectory4
            | Self::AlternateCodeDirectory5 => "Alternate CodeDirectory",
            Self::Signature => "CMS Signature",
            Self::Unknown(_) => "Unknown",
        };

        f.write_fmt(format_args!("{} ({:#x})", name, u32::from(*self)))
    }
}

impl CodeSigningSlot {
    /// Whether this slot holds a code directory (primary or alternate).
    pub fn is_code_directory(&self) -> bool {
        matches!(
            self,
            Self::CodeDirectory
                | Self::AlternateCodeDirectory0
                | Self::AlternateCodeDirectory1
                | Self::AlternateCodeDirectory2
                | Self::AlternateCodeDirectory3
                | Self::AlternateCodeDirectory4
                | Self::AlternateCodeDirectory5
        )
    }
}

#[repr(C)]
#[derive(Clone, Debug, Pread)]
struct BlobIndex {
    /// Corresponds to a [CodeSigningSlot] variant.
    typ: u32,
    offset: u32,
}

/// Represents a digest type encountered in code signature data structures.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DigestType {
    None,
    Sha1,
    Sha256,
    Unknown(u8),
}

impl Default for DigestType {
    fn default() -> Self {
        Self::Sha256
    }
}

impl From<u8> for DigestType {
    fn from(v: u8) -> Self {
        match v {
            0 => Self::None,
            1 => Self::Sha1,
            2 => Self::Sha256,
            _ => Self::Unknown(v),
        }
    }
}

impl From<DigestType> for u8 {
    fn from(v: DigestType) -> u8 {
        match v {
            DigestType::None => 0,
            DigestType::Sha1 => 1,
            DigestType::Sha256 => 2,
            DigestType::Unknown(v) => v,
        }
    }
}

impl Display for DigestType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DigestType::None => f.write_str("none"),
            DigestType::Sha1 => f.write_str("sha1"),
            DigestType::Sha256 => f.write_str("sha256"),
            DigestType::Unknown(v) => f.write_fmt(format_args!("unknown: {}", v)),
        }
    }
}

impl TryFrom<&str> for DigestType {
    type Error = QuillError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            _ => Err(QuillError::DigestUnsupported(s.to_string())),
        }
    }
}

impl DigestType {
    /// Obtain the size of hashes for this hash type.
    pub fn hash_len(&self) -> Result<usize, QuillError> {
        Ok(self.as_hasher()?.algorithm().output_len())
    }

    /// Obtain a hasher for this digest type.
    pub fn as_hasher(&self) -> Result<ring::digest::Context, QuillError> {
        match self {
            Self::Sha1 => Ok(ring::digest::Context::new(
                &ring::digest::SHA1_FOR_LEGACY_USE_ONLY,
            )),
            Self::Sha256 => Ok(ring::digest::Context::new(&ring::digest::SHA256)),
            Self::None | Self::Unknown(_) => Err(QuillError::DigestUnsupported(self.to_string())),
        }
    }

    /// Digest data given the configured hasher.
    pub fn digest_data(&self, data: &[u8]) -> Result<Vec<u8>, QuillError> {
        let mut hasher = self.as_hasher()?;
        hasher.update(data);

        Ok(hasher.finish().as_ref().to_vec())
    }
}

/// Read the header from a Blob.
///
/// Blobs begin with a u32 magic and u32 length, inclusive.
pub(crate) fn read_blob_header(data: &[u8]) -> Result<(u32, usize, &[u8]), QuillError> {
    let magic = data.pread_with(0, scroll::BE)?;
    let length = data.pread_with::<u32>(4, scroll::BE)? as usize;

    if length < 8 || length > data.len() {
        return Err(QuillError::BlobLengthOverflow(length));
    }

    Ok((magic, length, &data[8..length]))
}

pub(crate) fn read_and_validate_blob_header<'a>(
    data: &'a [u8],
    expected_magic: u32,
    what: &'static str,
) -> Result<&'a [u8], QuillError> {
    let (magic, _, payload) = read_blob_header(data)?;

    if magic != expected_magic {
        Err(QuillError::BadMagic(what))
    } else {
        Ok(payload)
    }
}

/// Provides common features for a parsed blob type.
pub trait Blob
where
    Self: Sized,
{
    /// The header magic that identifies this format.
    fn magic() -> u32;

    /// Attempt to construct an instance by parsing a bytes slice.
    ///
    /// The slice begins with the 8 byte blob header denoting the magic
    /// and length.
    fn from_blob_bytes(data: &[u8]) -> Result<Self, QuillError>;

    /// Serialize the payload of this blob to bytes.
    ///
    /// Does not include the magic or length header fields common to blobs.
    fn serialize_payload(&self) -> Result<Vec<u8>, QuillError>;

    /// Serialize this blob to bytes.
    ///
    /// This is [Blob::serialize_payload] with the blob magic and length
    /// prepended.
    fn to_blob_bytes(&self) -> Result<Vec<u8>, QuillError> {
        let mut res = Vec::new();
        res.iowrite_with(Self::magic(), scroll::BE)?;

        let payload = self.serialize_payload()?;
        // Length includes our own header.
        res.iowrite_with(payload.len() as u32 + 8, scroll::BE)?;

        res.extend(payload);

        Ok(res)
    }

    /// Obtain the digest of the blob using the specified hasher.
    fn digest_with(&self, hash_type: DigestType) -> Result<Vec<u8>, QuillError> {
        hash_type.digest_data(&self.to_blob_bytes()?)
    }
}

/// XML entitlements, embedded verbatim.
#[derive(Clone, Debug)]
pub struct EntitlementsBlob {
    plist: String,
}

impl Blob for EntitlementsBlob {
    fn magic() -> u32 {
        u32::from(CodeSigningMagic::Entitlements)
    }

    fn from_blob_bytes(data: &[u8]) -> Result<Self, QuillError> {
        let data = read_and_validate_blob_header(data, Self::magic(), "entitlements blob")?;

        Ok(Self {
            plist: String::from_utf8_lossy(data).to_string(),
        })
    }

    fn serialize_payload(&self) -> Result<Vec<u8>, QuillError> {
        Ok(self.plist.as_bytes().to_vec())
    }
}

impl EntitlementsBlob {
    pub fn from_string(s: &(impl ToString + ?Sized)) -> Self {
        Self {
            plist: s.to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.plist
    }
}

/// A generic wrapper blob.
///
/// The CMS signature is carried in one of these. An ad-hoc signature carries
/// an empty one.
#[derive(Clone, Default)]
pub struct BlobWrapperBlob {
    data: Vec<u8>,
}

impl Blob for BlobWrapperBlob {
    fn magic() -> u32 {
        u32::from(CodeSigningMagic::BlobWrapper)
    }

    fn from_blob_bytes(data: &[u8]) -> Result<Self, QuillError> {
        Ok(Self {
            data: read_and_validate_blob_header(data, Self::magic(), "blob wrapper blob")?
                .to_vec(),
        })
    }

    fn serialize_payload(&self) -> Result<Vec<u8>, QuillError> {
        Ok(self.data.clone())
    }
}

impl std::fmt::Debug for BlobWrapperBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("BlobWrapperBlob({} bytes)", self.data.len()))
    }
}

impl BlobWrapperBlob {
    /// Construct an instance wrapping the given data.
    pub fn from_data(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Represents a blob with a magic we don't know how to interpret.
#[derive(Clone)]
pub struct OtherBlob {
    pub magic: u32,
    pub data: Vec<u8>,
}

impl Blob for OtherBlob {
    fn magic() -> u32 {
        // Use a placeholder magic value because there is no self bind here.
        u32::MAX
    }

    fn from_blob_bytes(data: &[u8]) -> Result<Self, QuillError> {
        let (magic, _, payload) = read_blob_header(data)?;

        Ok(Self {
            magic,
            data: payload.to_vec(),
        })
    }

    fn serialize_payload(&self) -> Result<Vec<u8>, QuillError> {
        Ok(self.data.clone())
    }

    fn to_blob_bytes(&self) -> Result<Vec<u8>, QuillError> {
        let mut res = Vec::with_capacity(self.data.len() + 8);
        res.iowrite_with(self.magic, scroll::BE)?;
        res.iowrite_with(self.data.len() as u32 + 8, scroll::BE)?;
        res.write_all(&self.data)?;

        Ok(res)
    }
}

impl std::fmt::Debug for OtherBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("OtherBlob({:#x}, {} bytes)", self.magic, self.data.len()))
    }
}

/// A blob of any kind we emit or recognize.
///
/// Each variant corresponds to a [CodeSigningMagic] blob type.
#[derive(Debug)]
pub enum BlobData {
    CodeDirectory(Box<CodeDirectoryBlob>),
    RequirementSet(Box<RequirementSetBlob>),
    Entitlements(Box<EntitlementsBlob>),
    BlobWrapper(Box<BlobWrapperBlob>),
    Other(Box<OtherBlob>),
}

impl Blob for BlobData {
    fn magic() -> u32 {
        u32::MAX
    }

    /// Parse blob data by reading its magic and feeding into magic-specific parser.
    fn from_blob_bytes(data: &[u8]) -> Result<Self, QuillError> {
        let (magic, length, _) = read_blob_header(data)?;
        let data = &data[0..length];

        Ok(match CodeSigningMagic::from(magic) {
            CodeSigningMagic::CodeDirectory => {
                Self::CodeDirectory(Box::new(CodeDirectoryBlob::from_blob_bytes(data)?))
            }
            CodeSigningMagic::RequirementSet => {
                Self::RequirementSet(Box::new(RequirementSetBlob::from_blob_bytes(data)?))
            }
            CodeSigningMagic::Entitlements => {
                Self::Entitlements(Box::new(EntitlementsBlob::from_blob_bytes(data)?))
            }
            CodeSigningMagic::BlobWrapper => {
                Self::BlobWrapper(Box::new(BlobWrapperBlob::from_blob_bytes(data)?))
            }
            _ => Self::Other(Box::new(OtherBlob::from_blob_bytes(data)?)),
        })
    }

    fn serialize_payload(&self) -> Result<Vec<u8>, QuillError> {
        match self {
            Self::CodeDirectory(b) => b.serialize_payload(),
            Self::RequirementSet(b) => b.serialize_payload(),
            Self::Entitlements(b) => b.serialize_payload(),
            Self::BlobWrapper(b) => b.serialize_payload(),
            Self::Other(b) => b.serialize_payload(),
        }
    }

    fn to_blob_bytes(&self) -> Result<Vec<u8>, QuillError> {
        match self {
            Self::CodeDirectory(b) => b.to_blob_bytes(),
            Self::RequirementSet(b) => b.to_blob_bytes(),
            Self::Entitlements(b) => b.to_blob_bytes(),
            Self::BlobWrapper(b) => b.to_blob_bytes(),
            Self::Other(b) => b.to_blob_bytes(),
        }
    }
}

impl From<CodeDirectoryBlob> for BlobData {
    fn from(b: CodeDirectoryBlob) -> Self {
        Self::CodeDirectory(Box::new(b))
    }
}

impl From<RequirementSetBlob> for BlobData {
    fn from(b: RequirementSetBlob) -> Self {
        Self::RequirementSet(Box::new(b))
    }
}

impl From<EntitlementsBlob> for BlobData {
    fn from(b: EntitlementsBlob) -> Self {
        Self::Entitlements(Box::new(b))
    }
}

impl From<BlobWrapperBlob> for BlobData {
    fn from(b: BlobWrapperBlob) -> Self {
        Self::BlobWrapper(Box::new(b))
    }
}

/// Accumulates serialized child blobs and lays them out as a `SuperBlob`.
///
/// Offsets are only assigned at [SuperBlob::finalize] time, which walks the
/// children in insertion order.
#[derive(Clone, Debug)]
pub struct SuperBlob {
    magic: CodeSigningMagic,
    blobs: Vec<(CodeSigningSlot, Vec<u8>)>,
}

impl Default for SuperBlob {
    fn default() -> Self {
        Self::new(CodeSigningMagic::EmbeddedSignature)
    }
}

impl SuperBlob {
    pub fn new(magic: CodeSigningMagic) -> Self {
        Self {
            magic,
            blobs: vec![],
        }
    }

    /// Register a serialized blob (header included) for a slot.
    pub fn add(&mut self, slot: CodeSigningSlot, blob: Vec<u8>) {
        self.blobs.push((slot, blob));
    }

    /// Length of the `SuperBlob` without any trailing padding.
    pub fn natural_length(&self) -> usize {
        SUPERBLOB_HEADER_SIZE
            + BLOB_INDEX_SIZE * self.blobs.len()
            + self.blobs.iter().map(|(_, data)| data.len()).sum::<usize>()
    }

    /// Serialize the `SuperBlob`, zero padding the output.
    ///
    /// With a `padding_target`, the returned buffer is exactly that many bytes and
    /// it is an error for the natural length to exceed it. Without one, the natural
    /// length is extended by [DEFAULT_SUPERBLOB_PADDING].
    ///
    /// The length field in the header always records the natural length.
    pub fn finalize(&self, padding_target: Option<usize>) -> Result<Vec<u8>, QuillError> {
        let natural = self.natural_length();

        let total = match padding_target {
            Some(target) if target < natural => {
                return Err(QuillError::SignatureSpaceTooSmall(natural, target));
            }
            Some(target) => target,
            None => natural + DEFAULT_SUPERBLOB_PADDING,
        };

        let mut res = Vec::with_capacity(total);
        res.iowrite_with(u32::from(self.magic), scroll::BE)?;
        res.iowrite_with(natural as u32, scroll::BE)?;
        res.iowrite_with(self.blobs.len() as u32, scroll::BE)?;

        let mut offset = SUPERBLOB_HEADER_SIZE + BLOB_INDEX_SIZE * self.blobs.len();

        for (slot, data) in &self.blobs {
            res.iowrite_with(u32::from(*slot), scroll::BE)?;
            res.iowrite_with(offset as u32, scroll::BE)?;
            offset += data.len();
        }

        for (_, data) in &self.blobs {
            res.write_all(data)?;
        }

        res.resize(total, 0);

        Ok(res)
    }
}

/// Represents a single blob as defined by a SuperBlob index entry.
#[derive(Clone)]
pub struct BlobEntry<'a> {
    /// Our blob index within the `SuperBlob`.
    pub index: usize,

    /// The slot type.
    pub slot: CodeSigningSlot,

    /// Our start offset within the `SuperBlob`.
    ///
    /// First byte is start of our magic.
    pub offset: usize,

    /// The magic value appearing at the beginning of the blob.
    pub magic: CodeSigningMagic,

    /// The length of the blob, header included.
    pub length: usize,

    /// The raw data in this blob, including magic and length.
    pub data: &'a [u8],
}

impl<'a> std::fmt::Debug for BlobEntry<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("BlobEntry")
            .field("index", &self.index)
            .field("slot", &self.slot)
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("magic", &self.magic)
            .finish()
    }
}

impl<'a> BlobEntry<'a> {
    /// Parse the blob into its typed representation.
    pub fn parse(&self) -> Result<BlobData, QuillError> {
        BlobData::from_blob_bytes(self.data)
    }

    /// Obtain the payload of this blob.
    ///
    /// This is the data in the blob without the blob header.
    pub fn payload(&self) -> Result<&'a [u8], QuillError> {
        Ok(read_blob_header(self.data)?.2)
    }

    /// Compute the content digest of this blob using the specified hash type.
    pub fn digest_with(&self, hash: DigestType) -> Result<Vec<u8>, QuillError> {
        hash.digest_data(self.data)
    }
}

/// A lightly parsed embedded signature `SuperBlob`.
pub struct EmbeddedSignature<'a> {
    /// Magic value from header.
    pub magic: CodeSigningMagic,
    /// Length of this super blob.
    pub length: u32,
    /// Number of blobs in this super blob.
    pub count: u32,

    /// Raw data backing this super blob.
    pub data: &'a [u8],

    /// All the blobs within this super blob.
    pub blobs: Vec<BlobEntry<'a>>,
}

impl<'a> std::fmt::Debug for EmbeddedSignature<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("SuperBlob")
            .field("magic", &self.magic)
            .field("length", &self.length)
            .field("count", &self.count)
            .field("blobs", &self.blobs)
            .finish()
    }
}

impl<'a> EmbeddedSignature<'a> {
    /// Attempt to parse an embedded signature super blob from data.
    ///
    /// `endian` governs how the `SuperBlob` header and index are read. Signatures
    /// written by Apple tooling (and by us) are always big-endian.
    pub fn from_bytes_with(data: &'a [u8], endian: scroll::Endian) -> Result<Self, QuillError> {
        let offset = &mut 0;

        let magic = data.gread_with::<u32>(offset, endian)?.into();

        if magic != CodeSigningMagic::EmbeddedSignature {
            return Err(QuillError::BadMagic("embedded signature super blob"));
        }

        let length = data.gread_with(offset, endian)?;
        let count = data.gread_with(offset, endian)?;

        let mut blob_indices = Vec::with_capacity(count as usize);
        for _ in 0..count {
            blob_indices.push(data.gread_with::<BlobIndex>(offset, endian)?);
        }

        let mut blobs = Vec::with_capacity(blob_indices.len());

        for (i, index) in blob_indices.iter().enumerate() {
            let start = index.offset as usize;

            if start >= data.len() {
                return Err(QuillError::SuperblobMalformed);
            }

            let blob_length = data.pread_with::<u32>(start + 4, scroll::BE)? as usize;

            if start + blob_length > data.len() {
                return Err(QuillError::SuperblobMalformed);
            }

            let blob_data = &data[start..start + blob_length];

            blobs.push(BlobEntry {
                index: i,
                slot: index.typ.into(),
                offset: start,
                magic: blob_data.pread_with::<u32>(0, scroll::BE)?.into(),
                length: blob_length,
                data: blob_data,
            });
        }

        Ok(Self {
            magic,
            length,
            count,
            data,
            blobs,
        })
    }

    /// Parse a big-endian embedded signature.
    pub fn from_bytes(data: &'a [u8]) -> Result<Self, QuillError> {
        Self::from_bytes_with(data, scroll::BE)
    }

    /// Find the first occurrence of the specified slot.
    pub fn find_slot(&self, slot: CodeSigningSlot) -> Option<&BlobEntry<'a>> {
        self.blobs.iter().find(|e| e.slot == slot)
    }

    /// Iterate over all code directory blobs, primary first.
    pub fn code_directory_entries(&self) -> impl Iterator<Item = &BlobEntry<'a>> {
        self.blobs.iter().filter(|e| e.slot.is_code_directory())
    }

    /// Resolve the primary code directory.
    ///
    /// Returns `Ok(None)` if there is no code directory slot.
    pub fn code_directory(&self) -> Result<Option<CodeDirectoryBlob>, QuillError> {
        if let Some(entry) = self.find_slot(CodeSigningSlot::CodeDirectory) {
            Ok(Some(CodeDirectoryBlob::from_blob_bytes(entry.data)?))
        } else {
            Ok(None)
        }
    }

    /// Resolve the requirements vector, if present.
    pub fn code_requirements(&self) -> Result<Option<RequirementSetBlob>, QuillError> {
        if let Some(entry) = self.find_slot(CodeSigningSlot::RequirementSet) {
            Ok(Some(RequirementSetBlob::from_blob_bytes(entry.data)?))
        } else {
            Ok(None)
        }
    }

    /// Resolve the entitlements blob, if present.
    pub fn entitlements(&self) -> Result<Option<EntitlementsBlob>, QuillError> {
        if let Some(entry) = self.find_slot(CodeSigningSlot::Entitlements) {
            Ok(Some(EntitlementsBlob::from_blob_bytes(entry.data)?))
        } else {
            Ok(None)
        }
    }

    /// Attempt to resolve raw CMS signature data.
    ///
    /// An ad-hoc signature yields an empty slice.
    pub fn signature_data(&self) -> Result<Option<&'a [u8]>, QuillError> {
        if let Some(entry) = self.find_slot(CodeSigningSlot::Signature) {
            Ok(Some(read_and_validate_blob_header(
                entry.data,
                u32::from(CodeSigningMagic::BlobWrapper),
                "signature blob",
            )?))
        } else {
            Ok(None)
        }
    }

    /// Obtain the parsed CMS [SignedData].
    pub fn signed_data(&self) -> Result<Option<SignedData>, QuillError> {
        match self.signature_data()? {
            Some(data) if !data.is_empty() => Ok(Some(SignedData::parse_ber(data)?)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn other_blob(magic: u32, payload: &[u8]) -> Vec<u8> {
        OtherBlob {
            magic,
            data: payload.to_vec(),
        }
        .to_blob_bytes()
        .unwrap()
    }

    #[test]
    fn blob_header_roundtrip() {
        let blob = BlobWrapperBlob::from_data(b"hello".to_vec());
        let data = blob.to_blob_bytes().unwrap();

        assert_eq!(&data[0..4], &[0xfa, 0xde, 0x0b, 0x01]);
        assert_eq!(&data[4..8], &[0, 0, 0, 13]);

        let parsed = BlobWrapperBlob::from_blob_bytes(&data).unwrap();
        assert_eq!(parsed.data(), b"hello");

        assert!(matches!(
            EntitlementsBlob::from_blob_bytes(&data),
            Err(QuillError::BadMagic(_))
        ));
    }

    #[test]
    fn blob_length_overflow() {
        let mut data = other_blob(0xdeadbeef, b"abcd");
        data[7] = 0x40;

        assert!(matches!(
            read_blob_header(&data),
            Err(QuillError::BlobLengthOverflow(0x40))
        ));
    }

    #[test]
    fn superblob_layout() {
        let children = vec![
            (CodeSigningSlot::CodeDirectory, other_blob(0xfade0c02, b"cd")),
            (
                CodeSigningSlot::RequirementSet,
                other_blob(0xfade0c01, &[0, 0, 0, 0]),
            ),
            (
                CodeSigningSlot::Signature,
                other_blob(0xfade0b01, b"signature data"),
            ),
        ];

        let mut sb = SuperBlob::default();
        for (slot, data) in &children {
            sb.add(*slot, data.clone());
        }

        let natural = sb.natural_length();
        assert_eq!(
            natural,
            12 + 3 * 8 + children.iter().map(|(_, d)| d.len()).sum::<usize>()
        );

        for target in [natural, natural + 1, natural + 4096] {
            let data = sb.finalize(Some(target)).unwrap();
            assert_eq!(data.len(), target);
            assert!(data[natural..].iter().all(|b| *b == 0));

            let sig = EmbeddedSignature::from_bytes(&data).unwrap();
            assert_eq!(sig.count, 3);
            assert_eq!(sig.length as usize, natural);

            let mut expected_offset = 12 + 3 * 8;
            for (entry, (slot, child)) in sig.blobs.iter().zip(children.iter()) {
                assert_eq!(entry.slot, *slot);
                assert!(entry.offset >= expected_offset);
                assert_eq!(entry.data, child.as_slice());
                expected_offset += child.len();
            }
        }
    }

    #[test]
    fn superblob_default_padding() {
        let mut sb = SuperBlob::default();
        sb.add(CodeSigningSlot::CodeDirectory, other_blob(0xfade0c02, b"x"));

        let data = sb.finalize(None).unwrap();
        assert_eq!(data.len(), sb.natural_length() + DEFAULT_SUPERBLOB_PADDING);
    }

    #[test]
    fn superblob_target_too_small() {
        let mut sb = SuperBlob::default();
        sb.add(CodeSigningSlot::CodeDirectory, other_blob(0xfade0c02, b"x"));

        assert!(matches!(
            sb.finalize(Some(10)),
            Err(QuillError::SignatureSpaceTooSmall(_, 10))
        ));
    }

    #[test]
    fn digest_lengths() {
        assert_eq!(DigestType::Sha1.hash_len().unwrap(), 20);
        assert_eq!(DigestType::Sha256.hash_len().unwrap(), 32);
        assert!(DigestType::None.as_hasher().is_err());
        assert_eq!(u8::from(DigestType::Sha256), 2);
    }

    #[test]
    fn slot_ordering() {
        assert!(CodeSigningSlot::CodeDirectory < CodeSigningSlot::RequirementSet);
        assert!(CodeSigningSlot::Entitlements < CodeSigningSlot::AlternateCodeDirectory0);
        assert!(CodeSigningSlot::AlternateCodeDirectory5 < CodeSigningSlot::Signature);
        assert_eq!(CodeSigningSlot::from(0x1005), CodeSigningSlot::AlternateCodeDirectory5);
    }
}
