// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Universal (fat) Mach-O binaries.
//!
//! A universal binary is a big-endian header listing architecture slices,
//! each of which is a standalone Mach-O image. We never modify one in place:
//! slices are extracted, handled individually and packaged again.

use {
    crate::error::QuillError,
    goblin::mach::{
        fat::{FatArch, FAT_MAGIC, SIZEOF_FAT_ARCH, SIZEOF_FAT_HEADER},
        header::Header,
        parse_magic_and_ctx, MultiArch,
    },
    log::debug,
    scroll::{IOwrite, Pread, Pwrite},
    std::{
        io::Write,
        path::{Path, PathBuf},
    },
};

/// Slices are aligned to 16k, the aarch64 page size.
pub const ALIGN_BITS: u32 = 14;

/// Whether data begins with the universal binary magic.
pub fn is_universal(data: &[u8]) -> bool {
    data.get(0..4)
        .map(|magic| u32::from_be_bytes([magic[0], magic[1], magic[2], magic[3]]) == FAT_MAGIC)
        .unwrap_or(false)
}

/// The architecture records of a universal binary.
pub fn arches(data: &[u8]) -> Result<Vec<FatArch>, QuillError> {
    let multi = MultiArch::new(data)?;

    multi
        .iter_arches()
        .map(|arch| Ok(arch?))
        .collect::<Result<Vec<_>, QuillError>>()
}

/// Write each slice of a universal binary to its own file in `out_dir`.
///
/// Returns the paths written, in header order.
pub fn extract(data: &[u8], out_dir: &Path) -> Result<Vec<PathBuf>, QuillError> {
    arches(data)?
        .iter()
        .enumerate()
        .map(|(i, arch)| {
            let start = arch.offset as usize;
            let slice = start
                .checked_add(arch.size as usize)
                .and_then(|end| data.get(start..end))
                .ok_or_else(|| {
                    QuillError::InvalidBinary(format!("slice {} extends past end of file", i))
                })?;

            let path = out_dir.join(format!("slice-{}-{:x}", i, arch.cputype));
            debug!(
                "extracting slice {} (cpu {:#x}, {} bytes) to {}",
                i,
                arch.cputype,
                slice.len(),
                path.display()
            );
            std::fs::write(&path, slice).map_err(|e| QuillError::IoPath(path.clone(), e))?;

            Ok(path)
        })
        .collect()
}

/// Position a slice of `len` bytes at the next aligned offset at or after `offset`.
///
/// Returns the padding, the slice offset and the end of the slice. The fat
/// header stores 32-bit offsets, so a slice that doesn't fit is an error.
fn place_slice(offset: u32, len: usize) -> Result<(u32, u32, u32), QuillError> {
    let align: u32 = 1 << ALIGN_BITS;

    let pad_bytes = match offset % align {
        0 => 0,
        x => align - x,
    };

    let too_large =
        || QuillError::InvalidBinary("universal binary would exceed 4 GiB".to_string());

    let start = offset.checked_add(pad_bytes).ok_or_else(too_large)?;
    let size = u32::try_from(len).map_err(|_| too_large())?;
    let end = start.checked_add(size).ok_or_else(too_large)?;

    Ok((pad_bytes, start, end))
}

/// Write a universal Mach-O from single-architecture binaries.
///
/// Because slice sizes go in the header, everything is buffered.
pub fn create_universal_macho<'a>(
    writer: &mut impl Write,
    binaries: impl Iterator<Item = &'a [u8]>,
) -> Result<(), QuillError> {
    let align: u32 = 1 << ALIGN_BITS;

    let mut records = vec![];
    let mut offset: u32 = align;

    for binary in binaries {
        let (_, ctx) = parse_magic_and_ctx(binary, 0)?;
        let ctx = ctx.ok_or_else(|| {
            QuillError::InvalidBinary("universal binaries cannot be nested".to_string())
        })?;
        let header = binary.pread_with::<Header>(0, ctx)?;

        let (pad_bytes, slice_offset, end) = place_slice(offset, binary.len())?;

        let arch = FatArch {
            cputype: header.cputype,
            cpusubtype: header.cpusubtype,
            offset: slice_offset,
            size: end - slice_offset,
            align: ALIGN_BITS,
        };

        offset = end;

        records.push((arch, pad_bytes as usize, binary));
    }

    let header_size = SIZEOF_FAT_HEADER + records.len() * SIZEOF_FAT_ARCH;
    if header_size > align as usize {
        return Err(QuillError::InvalidBinary(format!(
            "too many slices for a universal binary: {}",
            records.len()
        )));
    }

    writer.iowrite_with(FAT_MAGIC, scroll::BE)?;
    writer.iowrite_with(records.len() as u32, scroll::BE)?;

    for (fat_arch, _, _) in &records {
        let mut buffer = [0u8; SIZEOF_FAT_ARCH];
        buffer.pwrite_with(fat_arch, 0, scroll::BE)?;
        writer.write_all(&buffer)?;
    }

    writer.write_all(&vec![0u8; align as usize - header_size])?;

    for (_, pad_bytes, macho_data) in records {
        writer.write_all(&vec![0u8; pad_bytes])?;
        writer.write_all(macho_data)?;
    }

    Ok(())
}

/// Assemble slice files into a universal binary at `dest`.
pub fn package(dest: &Path, slices: &[PathBuf]) -> Result<(), QuillError> {
    let data = slices
        .iter()
        .map(|path| std::fs::read(path).map_err(|e| QuillError::IoPath(path.clone(), e)))
        .collect::<Result<Vec<_>, QuillError>>()?;

    let mut out = vec![];
    create_universal_macho(&mut out, data.iter().map(|x| x.as_slice()))?;

    std::fs::write(dest, out).map_err(|e| QuillError::IoPath(dest.to_path_buf(), e))?;

    Ok(())
}

#[cfg(test)]
mod test {
    use {super::*, crate::macho::testutil::synthetic_macho};

    #[test]
    fn roundtrip() {
        let x86 = synthetic_macho(0x0100_0007, 3);
        let arm = synthetic_macho(0x0100_000c, 0);

        let mut fat = vec![];
        create_universal_macho(&mut fat, [x86.as_slice(), arm.as_slice()].into_iter()).unwrap();

        assert!(is_universal(&fat));
        assert!(!is_universal(&x86));

        let records = arches(&fat).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].cputype, 0x0100_0007);
        assert_eq!(records[0].offset, 1 << ALIGN_BITS);
        assert_eq!(records[1].cputype, 0x0100_000c);
        assert_eq!(records[1].offset % (1 << ALIGN_BITS), 0);

        let dir = tempfile::tempdir().unwrap();
        let paths = extract(&fat, dir.path()).unwrap();
        assert_eq!(std::fs::read(&paths[0]).unwrap(), x86);
        assert_eq!(std::fs::read(&paths[1]).unwrap(), arm);

        let dest = dir.path().join("repacked");
        package(&dest, &paths).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), fat);
    }

    #[test]
    fn slice_placement() {
        let align = 1u32 << ALIGN_BITS;

        assert_eq!(place_slice(align, 100).unwrap(), (0, align, align + 100));
        assert_eq!(
            place_slice(align + 100, 10).unwrap(),
            (align - 100, 2 * align, 2 * align + 10)
        );

        // Padding up to the next boundary would wrap.
        assert!(matches!(
            place_slice(u32::MAX - 10, 1),
            Err(QuillError::InvalidBinary(_))
        ));
        // Slice ends past 4 GiB.
        assert!(matches!(
            place_slice(u32::MAX - align + 1, align as usize),
            Err(QuillError::InvalidBinary(_))
        ));
        // Slice length doesn't fit the header field.
        #[cfg(target_pointer_width = "64")]
        assert!(matches!(
            place_slice(align, u32::MAX as usize + 1),
            Err(QuillError::InvalidBinary(_))
        ));
    }

    #[test]
    fn rejects_nested() {
        let x86 = synthetic_macho(0x0100_0007, 3);
        let mut fat = vec![];
        create_universal_macho(&mut fat, std::iter::once(x86.as_slice())).unwrap();

        let mut nested = vec![];
        assert!(create_universal_macho(&mut nested, std::iter::once(fat.as_slice())).is_err());
    }
}
