// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Functionality related to hashing code.

The Mach-O signature data contains cryptographic hashes of the content
being signed. The signable region of the binary is split into pages of
4096 bytes and each page is digested on its own. The resulting hashes
are written to the code directory. When the binary is loaded, each page
paged into the kernel is verified against its recorded hash.
*/

use crate::{embedded_signature::DigestType, error::QuillError};

/// Compute paged hashes.
///
/// This function takes a reference to data, chunks it into segments of `page_size`
/// and then hashes it with the specified algorithm, producing a vector of binary hashes.
///
/// The final chunk is digested as-is. It is never padded out to `page_size`.
pub fn paged_digests(
    data: &[u8],
    hash: DigestType,
    page_size: usize,
) -> Result<Vec<Vec<u8>>, QuillError> {
    data.chunks(page_size)
        .map(|chunk| hash.digest_data(chunk))
        .collect::<Result<Vec<_>, QuillError>>()
}
