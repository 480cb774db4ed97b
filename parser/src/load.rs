use std::borrow::Cow;
use std::fs;

use gimli::RunTimeEndian;
use log::{debug, info};
use object::{Object, ObjectSection};

use crate::cfi::parse_frame;
use crate::unit::parse_units;
use crate::{
    AttrValue, CompileUnit, Diagnostic, DieIndex, Error, FrameKind, FrameSection, Register,
    Result,
};

/// The debug sections the extraction engine consumes, as raw byte ranges.
///
/// This is the section-accessor boundary: anything that can produce named
/// byte ranges (an object file, a test fixture, another container format)
/// can feed the engine by filling this in and calling
/// [`File::from_sections`]. Absent sections stay empty; only `.debug_info`
/// and `.debug_abbrev` are required.
#[derive(Debug, Clone, Copy)]
pub struct Sections<'input> {
    pub endian: RunTimeEndian,
    pub debug_info: &'input [u8],
    pub debug_abbrev: &'input [u8],
    pub debug_str: &'input [u8],
    pub debug_line_str: &'input [u8],
    pub debug_str_offsets: &'input [u8],
    pub debug_addr: &'input [u8],
    pub debug_line: &'input [u8],
    pub debug_frame: &'input [u8],
    pub eh_frame: &'input [u8],
    /// Virtual address of `.eh_frame`, for PC-relative pointer encodings.
    pub eh_frame_address: u64,
}

impl<'input> Default for Sections<'input> {
    fn default() -> Self {
        Sections {
            endian: RunTimeEndian::Little,
            debug_info: &[],
            debug_abbrev: &[],
            debug_str: &[],
            debug_line_str: &[],
            debug_str_offsets: &[],
            debug_addr: &[],
            debug_line: &[],
            debug_frame: &[],
            eh_frame: &[],
            eh_frame_address: 0,
        }
    }
}

/// Everything extracted from one binary.
#[derive(Debug)]
pub struct File<'input> {
    path: String,
    machine: object::Architecture,
    address_size: u8,
    endian: RunTimeEndian,
    units: Vec<CompileUnit<'input>>,
    index: DieIndex,
    frame: Option<FrameSection<'input>>,
    diagnostics: Vec<Diagnostic>,
}

impl<'input> File<'input> {
    /// Maps the binary at `path` and hands the extracted [`File`] to `cb`.
    ///
    /// The callback shape keeps every parsed structure borrowing directly
    /// from the memory map; nothing is copied out of the input.
    pub fn parse<Cb>(path: &str, cb: Cb) -> Result<()>
    where
        Cb: FnOnce(&File<'_>) -> Result<()>,
    {
        let handle = fs::File::open(path)?;
        let map = unsafe { memmap2::Mmap::map(&handle)? };
        let object = object::File::parse(&*map)?;

        let endian = if object.is_little_endian() {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };
        let section = |name: &str| {
            match object.section_by_name(name) {
                Some(section) => {
                    let address = section.address();
                    match section.uncompressed_data() {
                        Ok(data) => (data, address),
                        Err(e) => {
                            debug!("failed to read {}: {}", name, e);
                            (Cow::Borrowed(&[][..]), address)
                        }
                    }
                }
                None => (Cow::Borrowed(&[][..]), 0),
            }
        };

        let (debug_info, _) = section(".debug_info");
        let (debug_abbrev, _) = section(".debug_abbrev");
        let (debug_str, _) = section(".debug_str");
        let (debug_line_str, _) = section(".debug_line_str");
        let (debug_str_offsets, _) = section(".debug_str_offsets");
        let (debug_addr, _) = section(".debug_addr");
        let (debug_line, _) = section(".debug_line");
        let (debug_frame, _) = section(".debug_frame");
        let (eh_frame, eh_frame_address) = section(".eh_frame");

        let sections = Sections {
            endian,
            debug_info: &debug_info,
            debug_abbrev: &debug_abbrev,
            debug_str: &debug_str,
            debug_line_str: &debug_line_str,
            debug_str_offsets: &debug_str_offsets,
            debug_addr: &debug_addr,
            debug_line: &debug_line,
            debug_frame: &debug_frame,
            eh_frame: &eh_frame,
            eh_frame_address,
        };

        let file = File::from_sections(path, object.architecture(), &sections)?;
        cb(&file)
    }

    /// Runs the extraction pipeline over already-located sections.
    ///
    /// Phases are strictly ordered: all units are parsed (populating the
    /// offset index), then references are verified, then the frame section
    /// is decoded. Per-record failures accumulate as diagnostics; only a
    /// missing required section is fatal.
    pub fn from_sections(
        path: &str,
        machine: object::Architecture,
        sections: &Sections<'input>,
    ) -> Result<File<'input>> {
        if sections.debug_info.is_empty() {
            return Err(Error::MissingSection {
                section: ".debug_info",
            });
        }
        if sections.debug_abbrev.is_empty() {
            return Err(Error::MissingSection {
                section: ".debug_abbrev",
            });
        }

        let address_size = match machine.address_size() {
            Some(size) => size.bytes(),
            None => 8,
        };

        let mut index = DieIndex::default();
        let mut diagnostics = Vec::new();
        let mut units = parse_units(sections, &mut index, &mut diagnostics);
        resolve_references(&mut units, &index);

        let frame = if !sections.debug_frame.is_empty() {
            Some(parse_frame(
                FrameKind::DebugFrame,
                sections.debug_frame,
                0,
                address_size,
                sections.endian,
            ))
        } else if !sections.eh_frame.is_empty() {
            Some(parse_frame(
                FrameKind::EhFrame,
                sections.eh_frame,
                sections.eh_frame_address,
                address_size,
                sections.endian,
            ))
        } else {
            None
        };

        let file = File {
            path: path.to_string(),
            machine,
            address_size,
            endian: sections.endian,
            units,
            index,
            frame,
            diagnostics,
        };
        info!(
            "{}: {} compile units, {} DIEs, {} FDEs",
            file.path,
            file.units.len(),
            file.index.len(),
            file.frame.as_ref().map_or(0, |f| f.fdes().len()),
        );
        Ok(file)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn machine(&self) -> object::Architecture {
        self.machine
    }

    pub fn address_size(&self) -> u8 {
        self.address_size
    }

    pub fn endian(&self) -> RunTimeEndian {
        self.endian
    }

    pub fn units(&self) -> &[CompileUnit<'input>] {
        &self.units
    }

    pub fn index(&self) -> &DieIndex {
        &self.index
    }

    pub fn frame(&self) -> Option<&FrameSection<'input>> {
        self.frame.as_ref()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// The architecture's name for a DWARF register number, if known.
    pub fn register_name(&self, register: Register) -> Option<&'static str> {
        let register_name = match self.machine {
            object::Architecture::Arm => gimli::Arm::register_name,
            object::Architecture::Aarch64 => gimli::AArch64::register_name,
            object::Architecture::I386 => gimli::X86::register_name,
            object::Architecture::X86_64 => gimli::X86_64::register_name,
            object::Architecture::Riscv32 | object::Architecture::Riscv64 => {
                gimli::RiscV::register_name
            }
            _ => return None,
        };
        register_name(gimli::Register(register.0))
    }
}

/// Verifies that every reference attribute targets a DIE that exists in
/// this image. Misses become `UnresolvedReference` diagnostics on the
/// referring unit; the attribute itself keeps its offset so the emitter can
/// mark it explicitly.
fn resolve_references(units: &mut [CompileUnit<'_>], index: &DieIndex) {
    for unit in units.iter_mut() {
        let mut missing = Vec::new();
        for die in unit.dies() {
            for (at, value) in &die.attrs {
                if let AttrValue::Ref(offset) = value {
                    if index.resolve(*offset).is_none() {
                        missing.push((die.offset, *at, *offset));
                    }
                }
            }
        }
        for (die_offset, at, target) in missing {
            unit.diagnostics.push(Diagnostic::new(
                format!("{} of DIE at {:#x}", at, die_offset),
                Error::UnresolvedReference { offset: target },
            ));
        }
    }
}
