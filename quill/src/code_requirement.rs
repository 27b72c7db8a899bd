// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Code requirement expressions.

Code signatures contain a binary encoded expression tree denoting requirements.
We only need to emit the *designated requirement* and to render what we find
in existing signatures, so this module covers the subset of the requirement
language used for Developer ID signed code.

# Binary Encoding

Requirement expressions consist of opcodes. An opcode is defined by a u32 where
the high byte contains flags and the lower 3 bytes denote the opcode value.

Some opcodes have payloads and the payload varies by opcode. A common pattern
is to length encode arbitrary data via a u32 denoting the length and N bytes
to follow. Variable length data is padded with NULL bytes so the next opcode
is always aligned on a 4 byte boundary.

Expressions are written in prefix form: `and` is followed by its left operand
and then its right operand.
*/

use {
    crate::{
        certificate::{AppleCertificate, OID_DEVELOPER_ID_CA},
        embedded_signature::{read_and_validate_blob_header, Blob, CodeSigningMagic},
        error::QuillError,
    },
    bcder::Oid,
    bytes::Bytes,
    scroll::{IOwrite, Pread},
    std::{
        fmt::{Debug, Display},
        io::Write,
    },
    x509_certificate::CapturedX509Certificate,
};

const OPCODE_FLAG_MASK: u32 = 0xff000000;
const OPCODE_VALUE_MASK: u32 = 0x00ffffff;

/// Certificate slot index denoting the anchor (root) certificate.
pub const CERTIFICATE_SLOT_ROOT: i32 = -1;

/// Certificate slot index denoting the leaf certificate.
pub const CERTIFICATE_SLOT_LEAF: i32 = 0;

/// Certificate field holding the team identifier.
const SUBJECT_OU_FIELD: &str = "subject.OU";

/// Expression form kind that leads a single requirement.
const REQUIREMENT_KIND_EXPRESSION: u32 = 1;

fn read_data(data: &[u8]) -> Result<(&[u8], &[u8]), QuillError> {
    let length = data.pread_with::<u32>(0, scroll::BE)? as usize;

    let value = data
        .get(4..4 + length)
        .ok_or(QuillError::RequirementMalformed("data length exceeds input"))?;

    // Next element is aligned on next 4 byte boundary.
    let offset = 4 + length;

    let offset = match offset % 4 {
        0 => offset,
        extra => offset + 4 - extra,
    };

    let remaining = data.get(offset..).unwrap_or(&[]);

    Ok((value, remaining))
}

fn write_data(dest: &mut impl Write, data: &[u8]) -> Result<(), QuillError> {
    dest.iowrite_with(data.len() as u32, scroll::BE)?;
    dest.write_all(data)?;

    match data.len() % 4 {
        0 => {}
        pad => {
            for _ in 0..4 - pad {
                dest.iowrite::<u8>(0)?;
            }
        }
    }

    Ok(())
}

fn read_string<'a>(data: &'a [u8], what: &'static str) -> Result<(String, &'a [u8]), QuillError> {
    let (value, data) = read_data(data)?;
    let s = std::str::from_utf8(value).map_err(|_| QuillError::RequirementMalformed(what))?;

    Ok((s.to_string(), data))
}

/// Format a certificate slot's value to human form.
fn format_certificate_slot(slot: i32) -> String {
    match slot {
        CERTIFICATE_SLOT_ROOT => "root".to_string(),
        CERTIFICATE_SLOT_LEAF => "leaf".to_string(),
        _ => format!("{}", slot),
    }
}

/// An opcode representing a code requirement expression.
#[derive(Clone, Copy, Debug, PartialEq)]
#[repr(u32)]
enum RequirementOpCode {
    False = 0,
    True = 1,
    Identifier = 2,
    AnchorApple = 3,
    And = 6,
    Or = 7,
    Not = 9,
    CertificateField = 11,
    CertificateGeneric = 14,
    AnchorAppleGeneric = 15,
}

impl TryFrom<u32> for RequirementOpCode {
    type Error = QuillError;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::False),
            1 => Ok(Self::True),
            2 => Ok(Self::Identifier),
            3 => Ok(Self::AnchorApple),
            6 => Ok(Self::And),
            7 => Ok(Self::Or),
            9 => Ok(Self::Not),
            11 => Ok(Self::CertificateField),
            14 => Ok(Self::CertificateGeneric),
            15 => Ok(Self::AnchorAppleGeneric),
            _ => Err(QuillError::RequirementMalformed("unsupported opcode")),
        }
    }
}

/// A code requirement expression.
#[derive(Clone, Debug, PartialEq)]
pub enum CodeRequirementExpression {
    /// `never`
    False,

    /// `always`
    True,

    /// Signing identifier.
    ///
    /// `identifier <string>`
    Identifier(String),

    /// The certificate chain must lead to an Apple root.
    ///
    /// `anchor apple`
    AnchorApple,

    /// Logical and.
    ///
    /// `expr and expr`
    And(Box<CodeRequirementExpression>, Box<CodeRequirementExpression>),

    /// Logical or.
    ///
    /// `expr or expr`
    Or(Box<CodeRequirementExpression>, Box<CodeRequirementExpression>),

    /// Logical not.
    ///
    /// `! expr`
    Not(Box<CodeRequirementExpression>),

    /// Certificate field matches.
    ///
    /// `certificate <slot>[<field>] match expression`
    ///
    /// i32 slot, field name, then a match expression.
    CertificateField(i32, String, CodeRequirementMatchExpression),

    /// Certificate extension matches.
    ///
    /// `certificate <slot>[field.<oid>] match expression`
    ///
    /// i32 slot, DER encoded OID content, then a match expression.
    CertificateGeneric(i32, Oid, CodeRequirementMatchExpression),

    /// Chain anchors to Apple, allowing Apple-issued intermediates.
    ///
    /// `anchor apple generic`
    AnchorAppleGeneric,
}

impl Display for CodeRequirementExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::False => f.write_str("never"),
            Self::True => f.write_str("always"),
            Self::Identifier(value) => f.write_fmt(format_args!("identifier \"{}\"", value)),
            Self::AnchorApple => f.write_str("anchor apple"),
            Self::And(a, b) => f.write_fmt(format_args!("{} and {}", a, b)),
            Self::Or(a, b) => f.write_fmt(format_args!("({}) or ({})", a, b)),
            Self::Not(expr) => f.write_fmt(format_args!("!({})", expr)),
            Self::CertificateField(slot, field, expr) => f.write_fmt(format_args!(
                "certificate {}[{}] {}",
                format_certificate_slot(*slot),
                field,
                expr
            )),
            Self::CertificateGeneric(slot, oid, expr) => f.write_fmt(format_args!(
                "certificate {}[field.{}] {}",
                format_certificate_slot(*slot),
                oid,
                expr
            )),
            Self::AnchorAppleGeneric => f.write_str("anchor apple generic"),
        }
    }
}

impl From<&CodeRequirementExpression> for RequirementOpCode {
    fn from(e: &CodeRequirementExpression) -> Self {
        match e {
            CodeRequirementExpression::False => RequirementOpCode::False,
            CodeRequirementExpression::True => RequirementOpCode::True,
            CodeRequirementExpression::Identifier(_) => RequirementOpCode::Identifier,
            CodeRequirementExpression::AnchorApple => RequirementOpCode::AnchorApple,
            CodeRequirementExpression::And(_, _) => RequirementOpCode::And,
            CodeRequirementExpression::Or(_, _) => RequirementOpCode::Or,
            CodeRequirementExpression::Not(_) => RequirementOpCode::Not,
            CodeRequirementExpression::CertificateField(_, _, _) => {
                RequirementOpCode::CertificateField
            }
            CodeRequirementExpression::CertificateGeneric(_, _, _) => {
                RequirementOpCode::CertificateGeneric
            }
            CodeRequirementExpression::AnchorAppleGeneric => RequirementOpCode::AnchorAppleGeneric,
        }
    }
}

impl CodeRequirementExpression {
    /// Construct an expression element by reading from a slice.
    ///
    /// Returns the newly constructed element and remaining data in the slice.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, &[u8]), QuillError> {
        let opcode_raw = data.pread_with::<u32>(0, scroll::BE)?;

        let _flags = opcode_raw & OPCODE_FLAG_MASK;
        let opcode = RequirementOpCode::try_from(opcode_raw & OPCODE_VALUE_MASK)?;

        let data = &data[4..];

        match opcode {
            RequirementOpCode::False => Ok((Self::False, data)),
            RequirementOpCode::True => Ok((Self::True, data)),
            RequirementOpCode::Identifier => {
                let (s, data) = read_string(data, "identifier value not a UTF-8 string")?;
                Ok((Self::Identifier(s), data))
            }
            RequirementOpCode::AnchorApple => Ok((Self::AnchorApple, data)),
            RequirementOpCode::And => {
                let (a, data) = Self::from_bytes(data)?;
                let (b, data) = Self::from_bytes(data)?;
                Ok((Self::And(Box::new(a), Box::new(b)), data))
            }
            RequirementOpCode::Or => {
                let (a, data) = Self::from_bytes(data)?;
                let (b, data) = Self::from_bytes(data)?;
                Ok((Self::Or(Box::new(a), Box::new(b)), data))
            }
            RequirementOpCode::Not => {
                let (expr, data) = Self::from_bytes(data)?;
                Ok((Self::Not(Box::new(expr)), data))
            }
            RequirementOpCode::CertificateField => {
                let slot = data.pread_with::<i32>(0, scroll::BE)?;
                let (field, data) = read_string(&data[4..], "certificate field not UTF-8")?;
                let (m, data) = CodeRequirementMatchExpression::from_bytes(data)?;
                Ok((Self::CertificateField(slot, field, m), data))
            }
            RequirementOpCode::CertificateGeneric => {
                let slot = data.pread_with::<i32>(0, scroll::BE)?;
                let (oid, data) = read_data(&data[4..])?;
                let (m, data) = CodeRequirementMatchExpression::from_bytes(data)?;
                Ok((
                    Self::CertificateGeneric(slot, Oid(Bytes::copy_from_slice(oid)), m),
                    data,
                ))
            }
            RequirementOpCode::AnchorAppleGeneric => Ok((Self::AnchorAppleGeneric, data)),
        }
    }

    /// Write binary representation of this expression to a destination.
    pub fn write_to(&self, dest: &mut impl Write) -> Result<(), QuillError> {
        dest.iowrite_with(RequirementOpCode::from(self) as u32, scroll::BE)?;

        match self {
            Self::False | Self::True | Self::AnchorApple | Self::AnchorAppleGeneric => {}
            Self::Identifier(s) => {
                write_data(dest, s.as_bytes())?;
            }
            Self::And(a, b) | Self::Or(a, b) => {
                a.write_to(dest)?;
                b.write_to(dest)?;
            }
            Self::Not(expr) => {
                expr.write_to(dest)?;
            }
            Self::CertificateField(slot, field, m) => {
                dest.iowrite_with(*slot, scroll::BE)?;
                write_data(dest, field.as_bytes())?;
                m.write_to(dest)?;
            }
            Self::CertificateGeneric(slot, oid, m) => {
                dest.iowrite_with(*slot, scroll::BE)?;
                write_data(dest, oid.as_ref())?;
                m.write_to(dest)?;
            }
        }

        Ok(())
    }
}

/// A code requirement match expression type.
#[derive(Clone, Copy, Debug, PartialEq)]
#[repr(u32)]
enum MatchType {
    Exists = 0,
    Equal = 1,
}

/// A match expression applied to a certificate field.
#[derive(Clone, Debug, PartialEq)]
pub enum CodeRequirementMatchExpression {
    /// Entity exists.
    ///
    /// No payload.
    Exists,

    /// Equality.
    ///
    /// 4 bytes length, raw data.
    Equal(String),
}

impl Display for CodeRequirementMatchExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exists => f.write_str("/* exists */"),
            Self::Equal(value) => f.write_fmt(format_args!("= \"{}\"", value)),
        }
    }
}

impl CodeRequirementMatchExpression {
    /// Parse a match expression from bytes.
    ///
    /// The slice should begin with the match type u32.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, &[u8]), QuillError> {
        let typ = data.pread_with::<u32>(0, scroll::BE)?;
        let data = &data[4..];

        match typ {
            x if x == MatchType::Exists as u32 => Ok((Self::Exists, data)),
            x if x == MatchType::Equal as u32 => {
                let (value, data) = read_string(data, "match value not UTF-8")?;
                Ok((Self::Equal(value), data))
            }
            _ => Err(QuillError::RequirementMalformed("unsupported match type")),
        }
    }

    /// Write binary representation of this match expression to a destination.
    pub fn write_to(&self, dest: &mut impl Write) -> Result<(), QuillError> {
        match self {
            Self::Exists => {
                dest.iowrite_with(MatchType::Exists as u32, scroll::BE)?;
            }
            Self::Equal(value) => {
                dest.iowrite_with(MatchType::Equal as u32, scroll::BE)?;
                write_data(dest, value.as_bytes())?;
            }
        }

        Ok(())
    }
}

/// Build the designated requirement expression for an identifier and chain.
///
/// `chain` is ordered leaf first. Predicates are joined with `and` in this
/// order:
///
/// 1. `identifier` when `ident` is non-empty.
/// 2. `anchor apple generic` when any certificate is issued to Apple Inc.
/// 3. `certificate N[field.1.2.840.113635.100.6.2.6] exists` for each
///    non-leaf certificate carrying the Developer ID CA extension.
/// 4. `certificate leaf[subject.OU] = <team>` when the leaf has an OU.
///
/// Returns `None` if there are no predicates.
pub fn designated_requirement(
    ident: &str,
    chain: &[CapturedX509Certificate],
) -> Option<CodeRequirementExpression> {
    let mut predicates = vec![];

    if !ident.is_empty() {
        predicates.push(CodeRequirementExpression::Identifier(ident.to_string()));
    }

    if chain.iter().any(|cert| cert.is_apple_inc()) {
        predicates.push(CodeRequirementExpression::AnchorAppleGeneric);
    }

    for (i, cert) in chain.iter().enumerate().skip(1) {
        if cert.has_extension(OID_DEVELOPER_ID_CA.as_ref()) {
            let slot = if i == chain.len() - 1 && cert.is_self_signed() {
                CERTIFICATE_SLOT_ROOT
            } else {
                i as i32
            };

            predicates.push(CodeRequirementExpression::CertificateGeneric(
                slot,
                Oid(Bytes::copy_from_slice(OID_DEVELOPER_ID_CA.as_ref())),
                CodeRequirementMatchExpression::Exists,
            ));
        }
    }

    if let Some(ou) = chain
        .first()
        .and_then(|leaf| leaf.subject_organizational_unit())
    {
        predicates.push(CodeRequirementExpression::CertificateField(
            CERTIFICATE_SLOT_LEAF,
            SUBJECT_OU_FIELD.to_string(),
            CodeRequirementMatchExpression::Equal(ou),
        ));
    }

    predicates
        .into_iter()
        .reduce(|a, b| CodeRequirementExpression::And(Box::new(a), Box::new(b)))
}

/// Denotes the type of a requirement within a requirement set.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RequirementType {
    Host,
    Guest,
    Designated,
    Library,
    Plugin,
    Unknown(u32),
}

impl From<u32> for RequirementType {
    fn from(v: u32) -> Self {
        match v {
            1 => Self::Host,
            2 => Self::Guest,
            3 => Self::Designated,
            4 => Self::Library,
            5 => Self::Plugin,
            _ => Self::Unknown(v),
        }
    }
}

impl From<RequirementType> for u32 {
    fn from(t: RequirementType) -> Self {
        match t {
            RequirementType::Host => 1,
            RequirementType::Guest => 2,
            RequirementType::Designated => 3,
            RequirementType::Library => 4,
            RequirementType::Plugin => 5,
            RequirementType::Unknown(v) => v,
        }
    }
}

impl Display for RequirementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Host => f.write_str("host(1)"),
            Self::Guest => f.write_str("guest(2)"),
            Self::Designated => f.write_str("designated(3)"),
            Self::Library => f.write_str("library(4)"),
            Self::Plugin => f.write_str("plugin(5)"),
            Self::Unknown(v) => f.write_fmt(format_args!("unknown({})", v)),
        }
    }
}

/// A single requirement blob.
///
/// The payload is the expression form kind followed by the expression.
#[derive(Clone, PartialEq)]
pub struct RequirementBlob {
    pub data: Vec<u8>,
}

impl Blob for RequirementBlob {
    fn magic() -> u32 {
        u32::from(CodeSigningMagic::Requirement)
    }

    fn from_blob_bytes(data: &[u8]) -> Result<Self, QuillError> {
        let data = read_and_validate_blob_header(data, Self::magic(), "requirement blob")?;

        Ok(Self {
            data: data.to_vec(),
        })
    }

    fn serialize_payload(&self) -> Result<Vec<u8>, QuillError> {
        Ok(self.data.clone())
    }
}

impl Debug for RequirementBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("RequirementBlob({})", hex::encode(&self.data)))
    }
}

impl TryFrom<&CodeRequirementExpression> for RequirementBlob {
    type Error = QuillError;

    fn try_from(expr: &CodeRequirementExpression) -> Result<Self, Self::Error> {
        let mut data = Vec::<u8>::new();
        data.iowrite_with(REQUIREMENT_KIND_EXPRESSION, scroll::BE)?;
        expr.write_to(&mut data)?;

        Ok(Self { data })
    }
}

impl RequirementBlob {
    /// Parse the expression held by this blob.
    pub fn parse_expression(&self) -> Result<CodeRequirementExpression, QuillError> {
        let kind = self.data.pread_with::<u32>(0, scroll::BE)?;

        if kind != REQUIREMENT_KIND_EXPRESSION {
            return Err(QuillError::RequirementMalformed("unsupported requirement kind"));
        }

        Ok(CodeRequirementExpression::from_bytes(&self.data[4..])?.0)
    }
}

/// Vector of requirement blobs keyed by [RequirementType].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequirementSetBlob {
    pub requirements: Vec<(RequirementType, RequirementBlob)>,
}

impl Blob for RequirementSetBlob {
    fn magic() -> u32 {
        u32::from(CodeSigningMagic::RequirementSet)
    }

    fn from_blob_bytes(data: &[u8]) -> Result<Self, QuillError> {
        read_and_validate_blob_header(data, Self::magic(), "requirement set blob")?;

        // A u32 count, then N (type, offset) pairs, then the nested blobs.
        let offset = &mut 8;
        let count = data.gread_with::<u32>(offset, scroll::BE)?;

        let mut indices = Vec::with_capacity(count as usize);
        for _ in 0..count {
            indices.push((
                data.gread_with::<u32>(offset, scroll::BE)?,
                data.gread_with::<u32>(offset, scroll::BE)?,
            ));
        }

        let mut requirements = Vec::with_capacity(indices.len());

        for (flavor, offset) in indices {
            let requirement_data = data
                .get(offset as usize..)
                .ok_or(QuillError::RequirementMalformed("requirement offset"))?;

            requirements.push((
                RequirementType::from(flavor),
                RequirementBlob::from_blob_bytes(requirement_data)?,
            ));
        }

        Ok(Self { requirements })
    }

    fn serialize_payload(&self) -> Result<Vec<u8>, QuillError> {
        let mut res = Vec::new();

        // Offsets are blob relative, so account for the blob header, the count
        // and the index itself.
        let data_start_offset = 8 + 4 + (8 * self.requirements.len() as u32);
        let mut written_requirements_data = 0;

        res.iowrite_with(self.requirements.len() as u32, scroll::BE)?;

        let blobs = self
            .requirements
            .iter()
            .map(|(typ, blob)| Ok((*typ, blob.to_blob_bytes()?)))
            .collect::<Result<Vec<_>, QuillError>>()?;

        for (typ, data) in &blobs {
            res.iowrite_with(u32::from(*typ), scroll::BE)?;
            res.iowrite_with(data_start_offset + written_requirements_data, scroll::BE)?;
            written_requirements_data += data.len() as u32;
        }

        for (_, data) in blobs {
            res.write_all(&data)?;
        }

        Ok(res)
    }
}

impl RequirementSetBlob {
    /// Build the requirement set for a signing identity.
    ///
    /// Yields an empty set when there is nothing to require, which is what
    /// ad-hoc signing uses.
    pub fn designated(
        ident: &str,
        chain: &[CapturedX509Certificate],
    ) -> Result<Self, QuillError> {
        let mut set = Self::default();

        if let Some(expr) = designated_requirement(ident, chain) {
            set.requirements
                .push((RequirementType::Designated, RequirementBlob::try_from(&expr)?));
        }

        Ok(set)
    }

    pub fn designated_requirement(&self) -> Option<&RequirementBlob> {
        self.requirements
            .iter()
            .find(|(typ, _)| *typ == RequirementType::Designated)
            .map(|(_, blob)| blob)
    }
}
