use std::convert::TryFrom;

use log::{debug, trace};

use crate::die::{parse_attr_value, str_at, UnitEncoding};
use crate::{
    parse_abbrev_table, AttrValue, Diagnostic, Die, DieId, DieIndex, Error, Reader, Sections,
};

/// Sibling lists deeper than this are treated as malformed rather than
/// walked; real compilers stay in the tens.
const MAX_DEPTH: usize = 512;

/// One compile unit: header, DIE arena, and whatever diagnostics were scoped
/// to it. Immutable after construction.
#[derive(Debug)]
pub struct CompileUnit<'input> {
    /// Absolute offset of the unit header in `.debug_info`.
    pub offset: u64,
    pub unit_length: u64,
    pub version: u16,
    pub address_size: u8,
    /// 4 for DWARF32, 8 for DWARF64.
    pub offset_size: u8,
    pub abbrev_offset: u64,
    dies: Vec<Die<'input>>,
    pub root: Option<DieId>,
    pub diagnostics: Vec<Diagnostic>,
}

impl<'input> CompileUnit<'input> {
    pub fn die(&self, id: DieId) -> &Die<'input> {
        &self.dies[id.0]
    }

    pub fn dies(&self) -> &[Die<'input>] {
        &self.dies
    }

    pub fn root_die(&self) -> Option<&Die<'input>> {
        self.root.map(|id| self.die(id))
    }

    /// The unit's `DW_AT_name`, when present on the root DIE.
    pub fn name(&self) -> Option<&str> {
        self.root_die().and_then(Die::name)
    }

    fn scope(&self) -> String {
        format!("compile unit at {:#x}", self.offset)
    }
}

/// Parses every compile unit in `.debug_info`.
///
/// Failures inside one unit are recorded on that unit and parsing continues
/// at the next header (the unit length is known up front). Only an
/// unreadable header stops the walk, since the position of the following
/// unit is then unknowable; everything parsed so far is preserved.
pub(crate) fn parse_units<'input>(
    sections: &Sections<'input>,
    index: &mut DieIndex,
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<CompileUnit<'input>> {
    let mut units = Vec::new();
    let mut r = Reader::new(".debug_info", sections.debug_info, sections.endian);

    while !r.is_empty() {
        let offset = r.offset();
        let (unit_length, offset_size) = match r.initial_length() {
            Ok(v) => v,
            Err(error) => {
                diagnostics.push(Diagnostic::new(
                    format!("compile unit at {:#x}", offset),
                    error,
                ));
                break;
            }
        };
        let mut body = match r.split(unit_length as usize) {
            Ok(body) => body,
            Err(_) => {
                diagnostics.push(Diagnostic::new(
                    format!("compile unit at {:#x}", offset),
                    Error::MalformedDie {
                        offset,
                        reason: format!(
                            "unit length {:#x} extends past the end of .debug_info",
                            unit_length
                        ),
                    },
                ));
                break;
            }
        };

        let mut unit = parse_unit(offset, unit_length, offset_size, &mut body, sections);
        if unit.root.is_none() && unit.diagnostics.is_empty() {
            debug!("compile unit at {:#x} has no DIEs", offset);
        }
        let unit_idx = units.len();
        register_dies(&unit, unit_idx, index);
        resolve_indirect(&mut unit, sections);
        units.push(unit);
    }
    units
}

fn parse_unit<'input>(
    offset: u64,
    unit_length: u64,
    offset_size: u8,
    body: &mut Reader<'input>,
    sections: &Sections<'input>,
) -> CompileUnit<'input> {
    let mut unit = CompileUnit {
        offset,
        unit_length,
        version: 0,
        address_size: 0,
        offset_size,
        abbrev_offset: 0,
        dies: Vec::new(),
        root: None,
        diagnostics: Vec::new(),
    };

    if let Err(error) = parse_unit_header(&mut unit, body) {
        unit.diagnostics.push(Diagnostic::new(unit.scope(), error));
        return unit;
    }
    trace!(
        "unit at {:#x}: version {}, address size {}, abbrev offset {:#x}",
        offset,
        unit.version,
        unit.address_size,
        unit.abbrev_offset
    );

    let mut abbrev = Reader::new(".debug_abbrev", sections.debug_abbrev, sections.endian);
    let table = match abbrev
        .seek(unit.abbrev_offset as usize)
        .map_err(|_| Error::MalformedAbbrev {
            offset: unit.abbrev_offset,
            reason: "abbreviation offset outside .debug_abbrev".into(),
        })
        .and_then(|()| parse_abbrev_table(&mut abbrev))
    {
        Ok(table) => table,
        Err(error) => {
            unit.diagnostics.push(Diagnostic::new(unit.scope(), error));
            return unit;
        }
    };

    let encoding = UnitEncoding {
        offset: unit.offset,
        version: unit.version,
        address_size: unit.address_size,
        offset_size: unit.offset_size,
    };
    if let Some(error) = build_tree(body, &table, &encoding, sections, &mut unit) {
        unit.diagnostics.push(Diagnostic::new(unit.scope(), error));
    }
    unit
}

fn parse_unit_header<'input>(
    unit: &mut CompileUnit<'input>,
    body: &mut Reader<'input>,
) -> Result<(), Error> {
    unit.version = body.u16()?;
    match unit.version {
        2..=4 => {
            unit.abbrev_offset = body.offset_sized(unit.offset_size)?;
            unit.address_size = body.u8()?;
        }
        5 => {
            let unit_type = gimli::DwUt(body.u8()?);
            unit.address_size = body.u8()?;
            unit.abbrev_offset = body.offset_sized(unit.offset_size)?;
            match unit_type {
                gimli::DW_UT_compile | gimli::DW_UT_partial => {}
                gimli::DW_UT_skeleton | gimli::DW_UT_split_compile => {
                    // dwo_id
                    body.skip(8)?;
                }
                gimli::DW_UT_type | gimli::DW_UT_split_type => {
                    // type signature and type offset
                    body.skip(8)?;
                    body.skip(usize::from(unit.offset_size))?;
                }
                other => {
                    return Err(Error::MalformedDie {
                        offset: unit.offset,
                        reason: format!("unrecognized unit type {}", other),
                    });
                }
            }
        }
        other => {
            return Err(Error::MalformedDie {
                offset: unit.offset,
                reason: format!("unsupported DWARF version {}", other),
            });
        }
    }
    match unit.address_size {
        1 | 2 | 3 | 4 | 8 => Ok(()),
        other => Err(Error::MalformedDie {
            offset: unit.offset,
            reason: format!("invalid address size {}", other),
        }),
    }
}

/// Depth-first tree construction, driven by each abbreviation's
/// has-children flag. A zero abbreviation code closes the current sibling
/// list and pops one level. On failure the partial arena built so far is
/// kept and the error is returned for the caller to attach.
fn build_tree<'input>(
    r: &mut Reader<'input>,
    table: &crate::AbbrevTable,
    encoding: &UnitEncoding,
    sections: &Sections<'input>,
    unit: &mut CompileUnit<'input>,
) -> Option<Error> {
    let malformed = |offset: u64, reason: String| Error::MalformedDie { offset, reason };
    let mut stack: Vec<DieId> = Vec::new();

    while !r.is_empty() {
        let die_offset = r.offset();
        let code = match r.uleb128() {
            Ok(code) => code,
            Err(_) => {
                return Some(malformed(
                    die_offset,
                    "unit ends inside an abbreviation code".into(),
                ));
            }
        };
        if code == 0 {
            // Null entry: close the current sibling list. Stray nulls after
            // the root has closed are padding.
            stack.pop();
            continue;
        }
        let decl = match table.get(code) {
            Some(decl) => decl,
            None => {
                return Some(malformed(
                    die_offset,
                    format!("unknown abbreviation code {}", code),
                ));
            }
        };
        if unit.root.is_some() && stack.is_empty() {
            return Some(malformed(die_offset, "multiple root DIEs in unit".into()));
        }

        let mut attrs = Vec::with_capacity(decl.attrs.len());
        for spec in &decl.attrs {
            match parse_attr_value(r, spec.form, spec.implicit, encoding, sections) {
                Ok(value) => attrs.push((spec.at, value)),
                Err(error @ Error::MalformedDie { .. }) => return Some(error),
                Err(error) => {
                    return Some(malformed(
                        die_offset,
                        format!("bad {} attribute: {}", spec.at, error),
                    ));
                }
            }
        }

        let id = DieId(unit.dies.len());
        unit.dies.push(Die {
            offset: die_offset,
            tag: decl.tag,
            attrs,
            children: Vec::new(),
        });
        match stack.last() {
            Some(&parent) => unit.dies[parent.0].children.push(id),
            None => unit.root = Some(id),
        }
        if decl.has_children {
            stack.push(id);
            if stack.len() > MAX_DEPTH {
                return Some(malformed(die_offset, "DIE nesting exceeds depth limit".into()));
            }
        }
    }

    if stack.is_empty() {
        None
    } else {
        Some(malformed(
            r.offset(),
            "unit ends inside an open sibling list".into(),
        ))
    }
}

fn register_dies(unit: &CompileUnit<'_>, unit_idx: usize, index: &mut DieIndex) {
    for (i, die) in unit.dies.iter().enumerate() {
        index.insert(
            die.offset,
            crate::DieHandle {
                unit: unit_idx,
                die: DieId(i),
            },
        );
    }
}

/// Resolves DWARF 5 `strx`/`addrx` indices through `.debug_str_offsets` and
/// `.debug_addr` once the unit's base attributes are known. Indices that
/// cannot be resolved keep their marker value; the emitter makes them
/// explicit rather than dropping them.
fn resolve_indirect<'input>(unit: &mut CompileUnit<'input>, sections: &Sections<'input>) {
    let (str_base, addr_base) = match unit.root_die() {
        Some(root) => {
            let base = |at| match root.attr(at) {
                Some(&AttrValue::SecOffset(offset)) => Some(offset),
                _ => None,
            };
            (
                base(gimli::DW_AT_str_offsets_base),
                base(gimli::DW_AT_addr_base),
            )
        }
        None => (None, None),
    };

    let offset_size = unit.offset_size;
    let address_size = unit.address_size;
    let endian = sections.endian;
    let lookup_str = |i: u64| -> Option<AttrValue<'input>> {
        let base = str_base?;
        let mut r = Reader::new(".debug_str_offsets", sections.debug_str_offsets, endian);
        r.seek(usize::try_from(base + i * u64::from(offset_size)).ok()?)
            .ok()?;
        let offset = r.offset_sized(offset_size).ok()?;
        str_at(sections.debug_str, offset).map(AttrValue::String)
    };
    let lookup_addr = |i: u64| -> Option<AttrValue<'input>> {
        let base = addr_base?;
        let mut r = Reader::new(".debug_addr", sections.debug_addr, endian);
        r.seek(usize::try_from(base + i * u64::from(address_size)).ok()?)
            .ok()?;
        r.address(address_size).ok().map(AttrValue::Addr)
    };

    for die in &mut unit.dies {
        for (at, value) in &mut die.attrs {
            let resolved = match *value {
                AttrValue::StrIndex(i) => lookup_str(i),
                AttrValue::AddrIndex(i) => lookup_addr(i),
                _ => continue,
            };
            match resolved {
                Some(new) => *value = new,
                None => debug!(
                    "unit at {:#x}: could not resolve indexed {} value",
                    unit.offset, at
                ),
            }
        }
    }
}
