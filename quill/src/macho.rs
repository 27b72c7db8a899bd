// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Mach-O primitives related to code signing

Code signing data is embedded within the named `__LINKEDIT` segment of
the Mach-O binary. An `LC_CODE_SIGNATURE` load command in the Mach-O header
points at this data.

[MachOImage] is a parsed, in-memory view of a single-architecture image.
[MachOFile] pairs that view with a writable file handle and keeps the two
in sync: every [MachOFile::patch] writes to disk and then re-parses.

We deliberately parse load commands ourselves instead of going through
[goblin::mach::MachO]. During signing the `__LINKEDIT` segment is resized
before the signature bytes exist on disk, and goblin refuses to parse a
segment whose file range runs past the end of the data.
*/

use {
    crate::{
        code_hash::paged_digests,
        embedded_signature::{DigestType, EmbeddedSignature, CODE_PAGE_SIZE},
        error::QuillError,
        universal,
    },
    goblin::container::{Container, Ctx},
    goblin::mach::{
        constants::{SEG_LINKEDIT, SEG_TEXT},
        header::{Header, MH_EXECUTE, SIZEOF_HEADER_32, SIZEOF_HEADER_64},
        load_command::{
            LinkeditDataCommand, LoadCommandHeader, SegmentCommand32, SegmentCommand64,
            LC_CODE_SIGNATURE, LC_SEGMENT, LC_SEGMENT_64, SIZEOF_LINKEDIT_DATA_COMMAND,
            SIZEOF_LOAD_COMMAND, SIZEOF_SEGMENT_COMMAND_32, SIZEOF_SEGMENT_COMMAND_64,
        },
        parse_magic_and_ctx,
    },
    log::debug,
    scroll::{Endian, Pread, Pwrite},
    std::{
        fs::{File, OpenOptions},
        io::{Seek, SeekFrom, Write},
        path::{Path, PathBuf},
    },
};

/// Byte offset of `ncmds` within the Mach-O header.
const HEADER_NCMDS_OFFSET: usize = 16;

/// A segment load command, reduced to the fields code signing cares about.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Segment {
    pub name: String,
    pub fileoff: u64,
    pub filesize: u64,
    pub vmaddr: u64,
    pub vmsize: u64,
    pub maxprot: u32,
    pub initprot: u32,
    pub nsects: u32,
    pub flags: u32,

    /// File offset of the load command describing this segment.
    pub command_offset: usize,
    /// Whether this is an `LC_SEGMENT_64`.
    pub is_64: bool,
    cmdsize: u32,
}

impl Segment {
    fn from_32(cmd: SegmentCommand32, command_offset: usize) -> Self {
        Self {
            name: segment_name(&cmd.segname),
            fileoff: cmd.fileoff as u64,
            filesize: cmd.filesize as u64,
            vmaddr: cmd.vmaddr as u64,
            vmsize: cmd.vmsize as u64,
            maxprot: cmd.maxprot,
            initprot: cmd.initprot,
            nsects: cmd.nsects,
            flags: cmd.flags,
            command_offset,
            is_64: false,
            cmdsize: cmd.cmdsize,
        }
    }

    fn from_64(cmd: SegmentCommand64, command_offset: usize) -> Self {
        Self {
            name: segment_name(&cmd.segname),
            fileoff: cmd.fileoff,
            filesize: cmd.filesize,
            vmaddr: cmd.vmaddr,
            vmsize: cmd.vmsize,
            maxprot: cmd.maxprot,
            initprot: cmd.initprot,
            nsects: cmd.nsects,
            flags: cmd.flags,
            command_offset,
            is_64: true,
            cmdsize: cmd.cmdsize,
        }
    }

    /// Serialize the segment command header (without sections).
    fn to_command_bytes(&self, endian: Endian) -> Result<Vec<u8>, QuillError> {
        let mut segname = [0u8; 16];
        let name = self.name.as_bytes();
        segname[..name.len().min(16)].copy_from_slice(&name[..name.len().min(16)]);

        if self.is_64 {
            let cmd = SegmentCommand64 {
                cmd: LC_SEGMENT_64,
                cmdsize: self.cmdsize,
                segname,
                vmaddr: self.vmaddr,
                vmsize: self.vmsize,
                fileoff: self.fileoff,
                filesize: self.filesize,
                maxprot: self.maxprot,
                initprot: self.initprot,
                nsects: self.nsects,
                flags: self.flags,
            };

            let mut buf = vec![0u8; SIZEOF_SEGMENT_COMMAND_64];
            buf.pwrite_with(cmd, 0, endian)?;
            Ok(buf)
        } else {
            let cmd = SegmentCommand32 {
                cmd: LC_SEGMENT,
                cmdsize: self.cmdsize,
                segname,
                vmaddr: u32::try_from(self.vmaddr)
                    .map_err(|_| QuillError::InvalidBinary("32-bit vmaddr overflow".into()))?,
                vmsize: u32::try_from(self.vmsize)
                    .map_err(|_| QuillError::InvalidBinary("32-bit vmsize overflow".into()))?,
                fileoff: u32::try_from(self.fileoff)
                    .map_err(|_| QuillError::InvalidBinary("32-bit fileoff overflow".into()))?,
                filesize: u32::try_from(self.filesize)
                    .map_err(|_| QuillError::InvalidBinary("32-bit filesize overflow".into()))?,
                maxprot: self.maxprot,
                initprot: self.initprot,
                nsects: self.nsects,
                flags: self.flags,
            };

            let mut buf = vec![0u8; SIZEOF_SEGMENT_COMMAND_32];
            buf.pwrite_with(cmd, 0, endian)?;
            Ok(buf)
        }
    }
}

fn segment_name(raw: &[u8; 16]) -> String {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).to_string()
}

/// A load command as found in the command area.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LoadCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    /// File offset of the command.
    pub offset: usize,
}

/// Parsed view of a single-architecture Mach-O image held in memory.
#[derive(Clone)]
pub struct MachOImage {
    data: Vec<u8>,
    ctx: Ctx,
    header: Header,
    loads: Vec<LoadCommand>,
    segments: Vec<Segment>,
    code_signature: Option<(LinkeditDataCommand, usize)>,
}

impl std::fmt::Debug for MachOImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachOImage")
            .field("len", &self.data.len())
            .field("header", &self.header)
            .field("segments", &self.segments)
            .finish()
    }
}

impl MachOImage {
    /// Parse an image from owned bytes.
    pub fn parse(data: Vec<u8>) -> Result<Self, QuillError> {
        if universal::is_universal(&data) {
            return Err(QuillError::UniversalBinaryUnsupported);
        }

        let (magic, ctx) = parse_magic_and_ctx(&data, 0)?;
        let ctx = ctx.ok_or_else(|| {
            QuillError::InvalidBinary(format!("unrecognized Mach-O magic {:#x}", magic))
        })?;

        let header = data.pread_with::<Header>(0, ctx)?;

        let mut offset = if ctx.container == Container::Big {
            SIZEOF_HEADER_64
        } else {
            SIZEOF_HEADER_32
        };

        let mut loads = Vec::with_capacity(header.ncmds);
        let mut segments = vec![];
        let mut code_signature = None;

        for _ in 0..header.ncmds {
            let lc = data.pread_with::<LoadCommandHeader>(offset, ctx.le)?;

            if (lc.cmdsize as usize) < SIZEOF_LOAD_COMMAND {
                return Err(QuillError::InvalidBinary(format!(
                    "load command at {:#x} has invalid size {}",
                    offset, lc.cmdsize
                )));
            }

            match lc.cmd {
                LC_SEGMENT => {
                    segments.push(Segment::from_32(
                        data.pread_with::<SegmentCommand32>(offset, ctx.le)?,
                        offset,
                    ));
                }
                LC_SEGMENT_64 => {
                    segments.push(Segment::from_64(
                        data.pread_with::<SegmentCommand64>(offset, ctx.le)?,
                        offset,
                    ));
                }
                LC_CODE_SIGNATURE => {
                    code_signature = Some((
                        data.pread_with::<LinkeditDataCommand>(offset, ctx.le)?,
                        offset,
                    ));
                }
                _ => {}
            }

            loads.push(LoadCommand {
                cmd: lc.cmd,
                cmdsize: lc.cmdsize,
                offset,
            });

            offset += lc.cmdsize as usize;
        }

        Ok(Self {
            data,
            ctx,
            header,
            loads,
            segments,
            code_signature,
        })
    }

    /// The raw bytes backing this image.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Byte order of the image's header and load commands.
    pub fn endian(&self) -> Endian {
        self.ctx.le
    }

    /// Size of the Mach-O header for this image's word size.
    pub fn header_size(&self) -> usize {
        if self.ctx.container == Container::Big {
            SIZEOF_HEADER_64
        } else {
            SIZEOF_HEADER_32
        }
    }

    /// File offset one past the end of the load command area.
    pub fn load_commands_end(&self) -> usize {
        self.header_size() + self.header.sizeofcmds as usize
    }

    /// Whether this is a main executable.
    pub fn is_executable(&self) -> bool {
        self.header.filetype == MH_EXECUTE
    }

    /// Iterate over all load commands.
    pub fn loads(&self) -> impl Iterator<Item = &LoadCommand> {
        self.loads.iter()
    }

    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }

    /// Find a segment by name.
    pub fn segment(&self, name: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.name == name)
    }

    pub fn text_segment(&self) -> Result<&Segment, QuillError> {
        self.segment(SEG_TEXT)
            .ok_or(QuillError::MissingSegment(SEG_TEXT))
    }

    pub fn linkedit_segment(&self) -> Result<&Segment, QuillError> {
        self.segment(SEG_LINKEDIT)
            .ok_or(QuillError::MissingSegment(SEG_LINKEDIT))
    }

    /// The `LC_CODE_SIGNATURE` command and its file offset.
    pub fn code_signing_cmd(&self) -> Option<(LinkeditDataCommand, usize)> {
        self.code_signature
    }

    pub fn has_code_signing_cmd(&self) -> bool {
        self.code_signature.is_some()
    }

    /// Number of bytes covered by code page hashes.
    ///
    /// This is the offset of the signature data.
    pub fn code_limit(&self) -> Result<usize, QuillError> {
        let (cmd, _) = self
            .code_signature
            .ok_or(QuillError::MissingCodeSigningCmd)?;

        Ok(cmd.dataoff as usize)
    }

    /// Digest every 4 KiB page preceding the signature data.
    pub fn hash_pages(&self, hash: DigestType) -> Result<Vec<Vec<u8>>, QuillError> {
        let limit = self.code_limit()?;

        if limit > self.data.len() {
            return Err(QuillError::InvalidBinary(format!(
                "code signature offset {:#x} is beyond end of file",
                limit
            )));
        }

        paged_digests(&self.data[0..limit], hash, CODE_PAGE_SIZE)
    }

    /// Raw bytes of the embedded signature, if present on disk.
    pub fn signature_data(&self) -> Result<Option<&[u8]>, QuillError> {
        if let Some((cmd, _)) = self.code_signature {
            let start = cmd.dataoff as usize;
            let end = start + cmd.datasize as usize;

            if cmd.datasize == 0 {
                return Ok(None);
            }

            if end > self.data.len() {
                return Err(QuillError::InvalidBinary(
                    "code signature data extends past end of file".into(),
                ));
            }

            Ok(Some(&self.data[start..end]))
        } else {
            Ok(None)
        }
    }

    /// Parse the embedded signature, if present.
    pub fn code_signature(&self) -> Result<Option<EmbeddedSignature<'_>>, QuillError> {
        if let Some(data) = self.signature_data()? {
            Ok(Some(EmbeddedSignature::from_bytes(data)?))
        } else {
            Ok(None)
        }
    }

    /// Obtain the serialized bytes of a code directory in the embedded signature.
    ///
    /// `index` 0 is the primary code directory. Higher indices select alternate
    /// code directories in the order they appear. The SHA-256 of these bytes is
    /// the CDHash.
    pub fn cd_bytes(&self, endian: Endian, index: usize) -> Result<Vec<u8>, QuillError> {
        let data = self
            .signature_data()?
            .ok_or(QuillError::BinaryNoCodeSignature)?;

        let signature = EmbeddedSignature::from_bytes_with(data, endian)?;

        let entry = signature
            .code_directory_entries()
            .nth(index)
            .ok_or(QuillError::BinaryNoCodeSignature)?;

        Ok(entry.data.to_vec())
    }
}

/// A Mach-O image backed by a file opened for reading and writing.
pub struct MachOFile {
    path: PathBuf,
    file: File,
    image: MachOImage,
}

impl std::ops::Deref for MachOFile {
    type Target = MachOImage;

    fn deref(&self) -> &Self::Target {
        &self.image
    }
}

impl MachOFile {
    /// Open an existing thin Mach-O file for patching.
    pub fn open_rw(path: impl AsRef<Path>) -> Result<Self, QuillError> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| QuillError::IoPath(path.to_path_buf(), e))?;

        let data = std::fs::read(path).map_err(|e| QuillError::IoPath(path.to_path_buf(), e))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            image: MachOImage::parse(data)?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn image(&self) -> &MachOImage {
        &self.image
    }

    /// Write bytes at a file offset and re-parse the image.
    pub fn patch(&mut self, bytes: &[u8], offset: usize) -> Result<(), QuillError> {
        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.write_all(bytes)?;
        self.file.flush()?;

        let mut data = std::mem::take(&mut self.image.data);
        if data.len() < offset + bytes.len() {
            data.resize(offset + bytes.len(), 0);
        }
        data[offset..offset + bytes.len()].copy_from_slice(bytes);

        self.image = MachOImage::parse(data)?;

        Ok(())
    }

    /// Append an empty `LC_CODE_SIGNATURE` after the existing load commands.
    ///
    /// The command points just past the end of `__LINKEDIT` with a size of 0.
    pub fn add_empty_code_signing_cmd(&mut self) -> Result<(), QuillError> {
        if self.has_code_signing_cmd() {
            return Err(QuillError::AlreadySigned);
        }

        let endian = self.endian();
        let cmd_offset = self.load_commands_end();
        let room = self
            .image
            .data
            .get(cmd_offset..cmd_offset + SIZEOF_LINKEDIT_DATA_COMMAND)
            .ok_or(QuillError::NoRoomForLoadCmd(SIZEOF_LINKEDIT_DATA_COMMAND))?;

        if room.iter().any(|b| *b != 0) {
            return Err(QuillError::NoRoomForLoadCmd(SIZEOF_LINKEDIT_DATA_COMMAND));
        }

        let linkedit = self.linkedit_segment()?;
        let dataoff = u32::try_from(linkedit.fileoff + linkedit.filesize).map_err(|_| {
            QuillError::InvalidBinary("__LINKEDIT ends beyond 4 GiB".into())
        })?;

        let command = LinkeditDataCommand {
            cmd: LC_CODE_SIGNATURE,
            cmdsize: SIZEOF_LINKEDIT_DATA_COMMAND as u32,
            dataoff,
            datasize: 0,
        };

        debug!(
            "adding LC_CODE_SIGNATURE at {:#x} with data offset {:#x}",
            cmd_offset, dataoff
        );

        let mut buf = vec![0u8; SIZEOF_LINKEDIT_DATA_COMMAND];
        buf.pwrite_with(command, 0, endian)?;
        self.patch(&buf, cmd_offset)?;

        let mut counts = vec![0u8; 8];
        counts.pwrite_with(self.header.ncmds as u32 + 1, 0, endian)?;
        counts.pwrite_with(
            self.header.sizeofcmds + SIZEOF_LINKEDIT_DATA_COMMAND as u32,
            4,
            endian,
        )?;
        self.patch(&counts, HEADER_NCMDS_OFFSET)?;

        Ok(())
    }

    /// Rewrite the `datasize` field of the `LC_CODE_SIGNATURE` command.
    pub fn update_code_signing_cmd_data_size(&mut self, size: u32) -> Result<(), QuillError> {
        let (mut command, offset) = self
            .code_signing_cmd()
            .ok_or(QuillError::MissingCodeSigningCmd)?;

        command.datasize = size;

        let mut buf = vec![0u8; SIZEOF_LINKEDIT_DATA_COMMAND];
        buf.pwrite_with(command, 0, self.endian())?;
        self.patch(&buf, offset)
    }

    /// Rewrite a segment load command header in place.
    ///
    /// Section headers following the command are left untouched.
    pub fn update_segment_header(&mut self, segment: &Segment) -> Result<(), QuillError> {
        let buf = segment.to_command_bytes(self.endian())?;
        self.patch(&buf, segment.command_offset)
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use {super::*, scroll::LE};

    pub const TEXT_FILESIZE: u64 = 0x4000;
    pub const LINKEDIT_FILEOFF: u64 = 0x8000;
    pub const LINKEDIT_FILESIZE: u64 = 0x4110;

    fn write_segment(
        data: &mut [u8],
        offset: usize,
        name: &str,
        vmaddr: u64,
        vmsize: u64,
        fileoff: u64,
        filesize: u64,
        nsects: u32,
    ) -> usize {
        let mut segname = [0u8; 16];
        segname[..name.len()].copy_from_slice(name.as_bytes());

        let cmd = SegmentCommand64 {
            cmd: LC_SEGMENT_64,
            cmdsize: 72 + 80 * nsects,
            segname,
            vmaddr,
            vmsize,
            fileoff,
            filesize,
            maxprot: 7,
            initprot: 5,
            nsects,
            flags: 0,
        };

        data.pwrite_with(cmd, offset, LE).unwrap();

        offset + 72
    }

    /// Build an unsigned 64-bit executable whose `__LINKEDIT` ends at 0xC110.
    pub fn synthetic_macho(cputype: u32, cpusubtype: u32) -> Vec<u8> {
        let mut data = vec![0u8; (LINKEDIT_FILEOFF + LINKEDIT_FILESIZE) as usize];

        let mut offset = 32;
        offset = write_segment(&mut data, offset, "__PAGEZERO", 0, 0x1_0000_0000, 0, 0, 0);
        offset = write_segment(
            &mut data,
            offset,
            "__TEXT",
            0x1_0000_0000,
            TEXT_FILESIZE,
            0,
            TEXT_FILESIZE,
            1,
        );

        // section_64 for __text.
        data[offset..offset + 6].copy_from_slice(b"__text");
        data[offset + 16..offset + 22].copy_from_slice(b"__TEXT");
        data.pwrite_with(0x1_0000_1000u64, offset + 32, LE).unwrap();
        data.pwrite_with(0x200u64, offset + 40, LE).unwrap();
        data.pwrite_with(0x1000u32, offset + 48, LE).unwrap();
        offset += 80;

        offset = write_segment(
            &mut data,
            offset,
            "__LINKEDIT",
            0x1_0000_8000,
            0x8000,
            LINKEDIT_FILEOFF,
            LINKEDIT_FILESIZE,
            0,
        );

        let sizeofcmds = offset - 32;

        data.pwrite_with(0xfeedfacfu32, 0, LE).unwrap();
        data.pwrite_with(cputype, 4, LE).unwrap();
        data.pwrite_with(cpusubtype, 8, LE).unwrap();
        data.pwrite_with(MH_EXECUTE, 12, LE).unwrap();
        data.pwrite_with(3u32, 16, LE).unwrap();
        data.pwrite_with(sizeofcmds as u32, 20, LE).unwrap();

        for (i, b) in data[0x1000..0x1200].iter_mut().enumerate() {
            *b = (i % 0xc3) as u8;
        }
        for (i, b) in data[LINKEDIT_FILEOFF as usize..].iter_mut().enumerate() {
            *b = (i % 7) as u8 + 1;
        }

        data
    }

    /// Write a synthetic x86_64 executable into a temp dir.
    pub fn synthetic_macho_file(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, synthetic_macho(0x0100_0007, 3)).unwrap();

        path
    }
}

#[cfg(test)]
mod test {
    use {super::testutil::*, super::*};

    #[test]
    fn parse_synthetic() {
        let image = MachOImage::parse(synthetic_macho(0x0100_0007, 3)).unwrap();

        assert!(image.is_executable());
        assert_eq!(image.endian(), Endian::Little);
        assert_eq!(image.loads().count(), 3);
        assert!(!image.has_code_signing_cmd());

        let text = image.text_segment().unwrap();
        assert_eq!(text.fileoff, 0);
        assert_eq!(text.filesize, TEXT_FILESIZE);
        assert_eq!(text.nsects, 1);

        let linkedit = image.linkedit_segment().unwrap();
        assert_eq!(linkedit.fileoff + linkedit.filesize, 0xc110);

        assert!(matches!(
            image.hash_pages(DigestType::Sha256),
            Err(QuillError::MissingCodeSigningCmd)
        ));
    }

    #[test]
    fn reject_garbage() {
        assert!(MachOImage::parse(b"not a mach-o binary at all".to_vec()).is_err());
        assert!(matches!(
            MachOImage::parse(vec![0xca, 0xfe, 0xba, 0xbe, 0, 0, 0, 0]),
            Err(QuillError::UniversalBinaryUnsupported)
        ));
    }

    #[test]
    fn add_code_signing_cmd() {
        let td = tempfile::tempdir().unwrap();
        let path = synthetic_macho_file(td.path(), "hello");

        let mut macho = MachOFile::open_rw(&path).unwrap();
        let original_sizeofcmds = macho.header().sizeofcmds;

        macho.add_empty_code_signing_cmd().unwrap();

        let (cmd, offset) = macho.code_signing_cmd().unwrap();
        assert_eq!(cmd.dataoff, 0xc110);
        assert_eq!(cmd.datasize, 0);
        assert_eq!(offset, 32 + original_sizeofcmds as usize);
        assert_eq!(macho.header().ncmds, 4);
        assert_eq!(
            macho.header().sizeofcmds,
            original_sizeofcmds + SIZEOF_LINKEDIT_DATA_COMMAND as u32
        );

        // The on-disk view agrees with the in-memory one.
        let reread = MachOImage::parse(std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(reread.code_signing_cmd().unwrap().0.dataoff, 0xc110);

        let hashes = macho.hash_pages(DigestType::Sha256).unwrap();
        assert_eq!(hashes.len(), 13);

        assert!(matches!(
            macho.add_empty_code_signing_cmd(),
            Err(QuillError::AlreadySigned)
        ));
    }

    #[test]
    fn no_room_for_command() {
        let td = tempfile::tempdir().unwrap();
        let mut data = synthetic_macho(0x0100_0007, 3);
        // Occupy the bytes right after the load commands.
        data[32 + 296] = 0xff;

        let path = td.path().join("crowded");
        std::fs::write(&path, &data).unwrap();

        let mut macho = MachOFile::open_rw(&path).unwrap();
        assert!(matches!(
            macho.add_empty_code_signing_cmd(),
            Err(QuillError::NoRoomForLoadCmd(16))
        ));
        assert_eq!(std::fs::read(&path).unwrap(), data);
    }

    #[test]
    fn update_linkedit_header() {
        let td = tempfile::tempdir().unwrap();
        let path = synthetic_macho_file(td.path(), "hello");

        let mut macho = MachOFile::open_rw(&path).unwrap();
        let mut linkedit = macho.linkedit_segment().unwrap().clone();
        linkedit.filesize += 0x100;
        linkedit.vmsize *= 2;

        macho.update_segment_header(&linkedit).unwrap();

        let updated = macho.linkedit_segment().unwrap();
        assert_eq!(updated.filesize, LINKEDIT_FILESIZE + 0x100);
        assert_eq!(updated.vmsize, 0x10000);
        assert_eq!(updated.name, "__LINKEDIT");
        assert_eq!(macho.text_segment().unwrap().filesize, TEXT_FILESIZE);
    }
}
