// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::{
    io::Write,
    path::{Path, PathBuf},
};

/// Collect `.pem` files directly under a directory, sorted by name.
fn pem_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().map(|ext| ext == "pem").unwrap_or(false))
            .collect::<Vec<_>>(),
        Err(_) => vec![],
    };

    files.sort();

    files
}

fn write_table(dest: &mut impl Write, name: &str, files: &[PathBuf]) -> std::io::Result<()> {
    writeln!(dest, "pub static {}: &[(&str, &[u8])] = &[", name)?;

    for path in files {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        writeln!(
            dest,
            "    ({:?}, include_bytes!({:?})),",
            file_name,
            path.display().to_string()
        )?;
    }

    writeln!(dest, "];")
}

fn main() {
    let manifest_dir =
        PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set"));
    let out_dir = PathBuf::from(std::env::var("OUT_DIR").expect("OUT_DIR not set"));

    let root_dir = manifest_dir.join("certs").join("root");
    let intermediate_dir = manifest_dir.join("certs").join("intermediate");

    println!("cargo:rerun-if-changed={}", root_dir.display());
    println!("cargo:rerun-if-changed={}", intermediate_dir.display());

    let roots = pem_files(&root_dir);
    let intermediates = pem_files(&intermediate_dir);

    if roots.is_empty() || intermediates.is_empty() {
        println!(
            "cargo:warning=no Apple CA certificates under {}; run scripts/fetch-apple-certs.sh \
             or chains will only resolve through supplied certificates",
            manifest_dir.join("certs").display()
        );
    }

    let mut fh = std::fs::File::create(out_dir.join("embedded_certs.rs"))
        .expect("could not create embedded_certs.rs");

    write_table(&mut fh, "ROOT_CERTIFICATES", &roots)
        .expect("could not write root certificate table");
    write_table(&mut fh, "INTERMEDIATE_CERTIFICATES", &intermediates)
        .expect("could not write intermediate certificate table");
}
