// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sign and notarize Mach-O binaries from any platform.
//!
//! This crate produces Apple code signatures without Apple hardware or
//! tooling, then submits the signed binaries to Apple's notary service.
//!
//! # Features and Capabilities
//!
//! * Read and patch Mach-O binaries, both thin and universal. (See
//!   [macho::MachOImage] and [universal].)
//! * Build embedded signatures: the code directory, designated requirement,
//!   entitlements and a CMS signature with an optional RFC 3161 time-stamp.
//!   (See [MachOSigner].)
//! * Ad-hoc sign when no signing material is available.
//! * Load signing material from PEM files or PKCS#12 bundles and verify the
//!   certificate chain against the Apple certificates embedded at build time.
//!   (See [signing_material].)
//! * Describe existing signatures. (See [reader].)
//! * Submit binaries to Apple's notary service and wait for a verdict. (See
//!   [notarization::Submission].)
//!
//! Things this crate doesn't do:
//!
//! * Sign bundles, disk images or installer packages.
//! * Staple notarization tickets.
//! * Evaluate code requirements. Only the designated requirement is built.

pub mod app_store_connect;
pub mod certificate;
pub mod certificate_store;
pub mod code_directory;
pub mod code_hash;
pub mod code_requirement;
pub mod embedded_signature;
pub mod embedded_signature_builder;
pub mod error;
pub mod event_bus;
pub mod macho;
pub mod macho_signing;
pub mod notarization;
pub mod payload;
pub mod prompt;
pub mod reader;
pub mod redaction;
pub mod signing_material;
pub mod universal;

pub use {
    error::QuillError,
    macho_signing::{MachOSigner, SigningOptions},
    notarization::{CancellationToken, NotaryConfig, StatusConfig, Submission, SubmissionStatus},
    signing_material::{ChainPolicy, ChainVerification, InputSource, SigningMaterial},
};
