//! Extraction of DWARF debugging metadata from compiled binaries.
//!
//! This crate parses the `.debug_info` / `.debug_abbrev` DIE tree, evaluates
//! DWARF location-expression bytecode, and decodes call-frame information
//! (`.debug_frame` / `.eh_frame`) into per-PC unwind rules. It is written for
//! binary-analysis pipelines that need partial results from malformed or
//! adversarial inputs: failures are scoped to a single compile unit, FDE, or
//! expression and reported as [`Diagnostic`]s instead of aborting the run.
//!
//! The parse is deliberately not delegated to gimli's readers; gimli is used
//! only for the DWARF vocabulary (tag/attribute/form/opcode constants) and
//! the per-architecture register name tables.

mod abbrev;
mod cfi;
mod die;
mod expr;
mod load;
mod reader;
mod unit;

pub use crate::abbrev::*;
pub use crate::cfi::*;
pub use crate::die::*;
pub use crate::expr::*;
pub use crate::load::*;
pub use crate::reader::*;
pub use crate::unit::*;

// The DWARF vocabulary types that appear in this crate's public API.
pub use gimli::{DwAt, DwTag};

use std::result;

use thiserror::Error;

/// An extraction failure.
///
/// Every variant maps to a stable `kind` string that appears in the output
/// document, so downstream consumers can dispatch on failure categories
/// without parsing messages.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{section} section truncated at offset {offset:#x}")]
    TruncatedSection { section: &'static str, offset: u64 },

    #[error("required section {section} is missing or empty")]
    MissingSection { section: &'static str },

    #[error("malformed abbreviation table at offset {offset:#x}: {reason}")]
    MalformedAbbrev { offset: u64, reason: String },

    #[error("malformed DIE at offset {offset:#x}: {reason}")]
    MalformedDie { offset: u64, reason: String },

    #[error("unsupported opcode {opcode:#04x} at expression offset {offset}")]
    UnsupportedOpcode { opcode: u8, offset: usize },

    #[error("invalid expression: {reason}")]
    InvalidExpression { reason: String },

    #[error("FDE at offset {fde:#x} references undefined CIE at offset {cie:#x}")]
    DanglingCieReference { fde: u64, cie: u64 },

    #[error("unresolved DIE reference to offset {offset:#x}")]
    UnresolvedReference { offset: u64 },

    #[error("FDEs at offsets {a:#x} and {b:#x} cover overlapping PC ranges")]
    OverlappingFde { a: u64, b: u64 },

    #[error("failed to read input: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported object file: {0}")]
    Object(#[from] object::Error),
}

impl Error {
    /// The stable kind string used in emitted diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::TruncatedSection { .. } => "TruncatedSection",
            Error::MissingSection { .. } => "MissingSection",
            Error::MalformedAbbrev { .. } => "MalformedAbbrev",
            Error::MalformedDie { .. } => "MalformedDIE",
            Error::UnsupportedOpcode { .. } => "UnsupportedOpcode",
            Error::InvalidExpression { .. } => "InvalidExpression",
            Error::DanglingCieReference { .. } => "DanglingCIEReference",
            Error::UnresolvedReference { .. } => "UnresolvedReference",
            Error::OverlappingFde { .. } => "OverlappingFde",
            Error::Io(_) => "Io",
            Error::Object(_) => "Object",
        }
    }
}

pub type Result<T> = result::Result<T, Error>;

/// A recoverable failure attached to the record it affected.
///
/// Diagnostics accumulate on the compile unit, frame section, or file they
/// were scoped to; the emitter also surfaces them in a run-level summary.
#[derive(Debug)]
pub struct Diagnostic {
    /// Describes the affected record, e.g. `"compile unit at 0x3a"`.
    pub scope: String,
    pub error: Error,
}

impl Diagnostic {
    pub fn new(scope: impl Into<String>, error: Error) -> Diagnostic {
        Diagnostic {
            scope: scope.into(),
            error,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.error.kind()
    }
}
