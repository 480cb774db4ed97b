use std::borrow::Cow;
use std::convert::TryFrom;

use fnv::FnvHashMap;

use crate::{Error, Reader, Result, Sections};

/// Index of a DIE within its compile unit's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DieId(pub usize);

/// Locates a DIE anywhere in the parsed image: unit index plus arena index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DieHandle {
    pub unit: usize,
    pub die: DieId,
}

/// The global offset-to-DIE index.
///
/// Keyed by absolute `.debug_info` offset. Populated while units are parsed
/// (each DIE is registered before its children, so forward and backward
/// references behave identically) and read-only afterwards; reference
/// attributes stay stored as offsets and resolve through this index on
/// demand.
#[derive(Debug, Default)]
pub struct DieIndex {
    map: FnvHashMap<u64, DieHandle>,
}

impl DieIndex {
    pub(crate) fn insert(&mut self, offset: u64, handle: DieHandle) {
        self.map.insert(offset, handle);
    }

    pub fn resolve(&self, offset: u64) -> Option<DieHandle> {
        self.map.get(&offset).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// A decoded attribute value.
///
/// Values are classified by what the form encodes, not by the form itself:
/// the emitter and downstream consumers care that something is an address or
/// a reference, not whether it arrived as `ref4` or `ref_udata`.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue<'input> {
    Addr(u64),
    Udata(u64),
    Sdata(i64),
    Flag(bool),
    String(Cow<'input, str>),
    Block(&'input [u8]),
    /// A location-expression byte block, evaluated at emission time.
    Exprloc(&'input [u8]),
    /// An absolute `.debug_info` offset of another DIE, resolved lazily
    /// through the [`DieIndex`].
    Ref(u64),
    /// An offset into some other debug section.
    SecOffset(u64),
    /// A type-unit signature (`DW_FORM_ref_sig8`).
    TypeSignature(u64),
    /// An unresolved `.debug_str_offsets` index; replaced by `String` when
    /// the unit's `str_offsets_base` and the carrier section are present.
    StrIndex(u64),
    /// An unresolved `.debug_addr` index, as above.
    AddrIndex(u64),
}

/// One Debug Information Entry.
#[derive(Debug)]
pub struct Die<'input> {
    /// Absolute starting offset in `.debug_info`.
    pub offset: u64,
    pub tag: gimli::DwTag,
    pub attrs: Vec<(gimli::DwAt, AttrValue<'input>)>,
    pub children: Vec<DieId>,
}

impl<'input> Die<'input> {
    pub fn attr(&self, at: gimli::DwAt) -> Option<&AttrValue<'input>> {
        self.attrs
            .iter()
            .find(|(name, _)| *name == at)
            .map(|(_, value)| value)
    }

    pub fn name(&self) -> Option<&str> {
        match self.attr(gimli::DW_AT_name) {
            Some(AttrValue::String(s)) => Some(s),
            _ => None,
        }
    }
}

/// Header fields a DIE decode needs from its unit.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UnitEncoding {
    pub offset: u64,
    pub version: u16,
    pub address_size: u8,
    pub offset_size: u8,
}

/// Forms the DIE decoder understands. The abbreviation parser rejects
/// anything outside this set up front, so a declared form never surprises
/// the tree builder.
pub(crate) fn is_supported_form(form: gimli::DwForm) -> bool {
    use gimli::constants::*;
    matches!(
        form,
        DW_FORM_addr
            | DW_FORM_block1
            | DW_FORM_block2
            | DW_FORM_block4
            | DW_FORM_block
            | DW_FORM_data1
            | DW_FORM_data2
            | DW_FORM_data4
            | DW_FORM_data8
            | DW_FORM_data16
            | DW_FORM_sdata
            | DW_FORM_udata
            | DW_FORM_string
            | DW_FORM_strp
            | DW_FORM_line_strp
            | DW_FORM_ref1
            | DW_FORM_ref2
            | DW_FORM_ref4
            | DW_FORM_ref8
            | DW_FORM_ref_udata
            | DW_FORM_ref_addr
            | DW_FORM_ref_sig8
            | DW_FORM_sec_offset
            | DW_FORM_exprloc
            | DW_FORM_flag
            | DW_FORM_flag_present
            | DW_FORM_implicit_const
            | DW_FORM_indirect
            | DW_FORM_strx
            | DW_FORM_strx1
            | DW_FORM_strx2
            | DW_FORM_strx3
            | DW_FORM_strx4
            | DW_FORM_addrx
            | DW_FORM_addrx1
            | DW_FORM_addrx2
            | DW_FORM_addrx3
            | DW_FORM_addrx4
            | DW_FORM_loclistx
            | DW_FORM_rnglistx
    )
}

fn malformed(offset: u64, reason: impl Into<String>) -> Error {
    Error::MalformedDie {
        offset,
        reason: reason.into(),
    }
}

/// Reads a NUL-terminated string out of a string section at `offset`.
pub(crate) fn str_at(data: &[u8], offset: u64) -> Option<Cow<'_, str>> {
    let start = usize::try_from(offset).ok()?;
    if start >= data.len() {
        return None;
    }
    let rest = &data[start..];
    let nul = rest.iter().position(|&b| b == 0)?;
    Some(String::from_utf8_lossy(&rest[..nul]))
}

/// Decodes one attribute value according to its declared form.
pub(crate) fn parse_attr_value<'input>(
    r: &mut Reader<'input>,
    form: gimli::DwForm,
    implicit: Option<i64>,
    unit: &UnitEncoding,
    sections: &Sections<'input>,
) -> Result<AttrValue<'input>> {
    use gimli::constants::*;

    let mut form = form;
    // DW_FORM_indirect stores the real form in the data stream; a stream
    // that keeps saying "indirect" is malformed.
    let mut indirections = 0;
    while form == DW_FORM_indirect {
        indirections += 1;
        if indirections > 2 {
            return Err(malformed(r.offset(), "DW_FORM_indirect loop"));
        }
        form = gimli::DwForm(r.uleb128()? as u16);
        if form != DW_FORM_indirect && !is_supported_form(form) {
            return Err(malformed(
                r.offset(),
                format!("unrecognized indirect form {}", form),
            ));
        }
    }

    let value = match form {
        DW_FORM_addr => AttrValue::Addr(r.address(unit.address_size)?),
        DW_FORM_block1 => {
            let len = r.u8()? as usize;
            AttrValue::Block(r.bytes(len)?)
        }
        DW_FORM_block2 => {
            let len = r.u16()? as usize;
            AttrValue::Block(r.bytes(len)?)
        }
        DW_FORM_block4 => {
            let len = r.u32()? as usize;
            AttrValue::Block(r.bytes(len)?)
        }
        DW_FORM_block => {
            let len = r.uleb128()? as usize;
            AttrValue::Block(r.bytes(len)?)
        }
        DW_FORM_data1 => AttrValue::Udata(u64::from(r.u8()?)),
        DW_FORM_data2 => AttrValue::Udata(u64::from(r.u16()?)),
        DW_FORM_data4 => AttrValue::Udata(u64::from(r.u32()?)),
        DW_FORM_data8 => AttrValue::Udata(r.u64()?),
        DW_FORM_data16 => AttrValue::Block(r.bytes(16)?),
        DW_FORM_sdata => AttrValue::Sdata(r.sleb128()?),
        DW_FORM_udata => AttrValue::Udata(r.uleb128()?),
        DW_FORM_string => AttrValue::String(String::from_utf8_lossy(r.cstr()?)),
        DW_FORM_strp => {
            let offset = r.offset_sized(unit.offset_size)?;
            match str_at(sections.debug_str, offset) {
                Some(s) => AttrValue::String(s),
                None => {
                    return Err(malformed(
                        r.offset(),
                        format!("strp offset {:#x} outside .debug_str", offset),
                    ));
                }
            }
        }
        DW_FORM_line_strp => {
            let offset = r.offset_sized(unit.offset_size)?;
            match str_at(sections.debug_line_str, offset) {
                Some(s) => AttrValue::String(s),
                None => {
                    return Err(malformed(
                        r.offset(),
                        format!("line_strp offset {:#x} outside .debug_line_str", offset),
                    ));
                }
            }
        }
        DW_FORM_ref1 => AttrValue::Ref(unit.offset + u64::from(r.u8()?)),
        DW_FORM_ref2 => AttrValue::Ref(unit.offset + u64::from(r.u16()?)),
        DW_FORM_ref4 => AttrValue::Ref(unit.offset + u64::from(r.u32()?)),
        DW_FORM_ref8 => AttrValue::Ref(unit.offset + r.u64()?),
        DW_FORM_ref_udata => AttrValue::Ref(unit.offset + r.uleb128()?),
        DW_FORM_ref_addr => {
            // Section-absolute, unlike the unit-relative ref forms. DWARF 2
            // used address size here; later versions use offset size.
            let size = if unit.version == 2 {
                unit.address_size
            } else {
                unit.offset_size
            };
            AttrValue::Ref(r.offset_sized(size)?)
        }
        DW_FORM_ref_sig8 => AttrValue::TypeSignature(r.u64()?),
        DW_FORM_sec_offset => AttrValue::SecOffset(r.offset_sized(unit.offset_size)?),
        DW_FORM_exprloc => {
            let len = r.uleb128()? as usize;
            AttrValue::Exprloc(r.bytes(len)?)
        }
        DW_FORM_flag => AttrValue::Flag(r.u8()? != 0),
        DW_FORM_flag_present => AttrValue::Flag(true),
        DW_FORM_implicit_const => match implicit {
            Some(value) => AttrValue::Sdata(value),
            None => {
                return Err(malformed(
                    r.offset(),
                    "implicit_const without a declared value",
                ));
            }
        },
        DW_FORM_strx => AttrValue::StrIndex(r.uleb128()?),
        DW_FORM_strx1 => AttrValue::StrIndex(r.uint(1)?),
        DW_FORM_strx2 => AttrValue::StrIndex(r.uint(2)?),
        DW_FORM_strx3 => AttrValue::StrIndex(r.uint(3)?),
        DW_FORM_strx4 => AttrValue::StrIndex(r.uint(4)?),
        DW_FORM_addrx => AttrValue::AddrIndex(r.uleb128()?),
        DW_FORM_addrx1 => AttrValue::AddrIndex(r.uint(1)?),
        DW_FORM_addrx2 => AttrValue::AddrIndex(r.uint(2)?),
        DW_FORM_addrx3 => AttrValue::AddrIndex(r.uint(3)?),
        DW_FORM_addrx4 => AttrValue::AddrIndex(r.uint(4)?),
        DW_FORM_loclistx | DW_FORM_rnglistx => AttrValue::Udata(r.uleb128()?),
        other => {
            return Err(malformed(
                r.offset(),
                format!("unrecognized attribute form {}", other),
            ));
        }
    };
    Ok(value)
}
