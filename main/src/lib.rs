//! Document emission for the `dwex` extraction tool.
//!
//! The parser crate owns the model; this crate walks it and serializes the
//! output document, steered by a small set of [`Options`].

pub use parser::{Error, File, Result};

mod emit;
pub use crate::emit::document;

/// Emission options, mapped one-to-one from the CLI toggles.
#[derive(Debug, Default, Clone)]
pub struct Options {
    /// Emit unevaluated location bytecode instead of evaluated
    /// descriptions.
    pub raw_expressions: bool,
    /// Suppress trivial single-opcode expressions.
    pub complex_only: bool,
    /// Attach per-FDE unwind tables.
    pub frame_info: bool,
    /// Emit only unit-level structural metadata; root DIE attributes are
    /// still resolved, children are omitted.
    pub no_traverse: bool,
}
