use std::borrow::Cow;
use std::collections::BTreeMap;
use std::convert::TryFrom;

use fnv::FnvHashMap;
use gimli::RunTimeEndian;
use log::{debug, warn};

use crate::{Diagnostic, Error, Reader, Register, Result};

/// Which frame section a record came from. The two share their instruction
/// set but differ in record framing and pointer encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    DebugFrame,
    EhFrame,
}

impl FrameKind {
    pub fn section_name(self) -> &'static str {
        match self {
            FrameKind::DebugFrame => ".debug_frame",
            FrameKind::EhFrame => ".eh_frame",
        }
    }
}

/// A Common Information Entry: unwind defaults shared by its FDEs.
#[derive(Debug)]
pub struct Cie<'input> {
    /// Absolute offset of the record in its section.
    pub offset: u64,
    pub version: u8,
    pub augmentation: Cow<'input, str>,
    pub address_size: u8,
    pub code_alignment: u64,
    pub data_alignment: i64,
    pub return_address_register: Register,
    /// Encoding for FDE address operands (`.eh_frame` 'R' augmentation).
    pub fde_encoding: Option<gimli::DwEhPe>,
    pub lsda_encoding: Option<gimli::DwEhPe>,
    pub personality: Option<u64>,
    pub signal_frame: bool,
    pub initial_instructions: &'input [u8],
    initial_instructions_offset: u64,
}

/// A Frame Description Entry: one function's PC range and the instructions
/// that evolve the unwind-rule table across it.
#[derive(Debug)]
pub struct Fde<'input> {
    pub offset: u64,
    /// Absolute section offset of the CIE this FDE refines.
    pub cie_offset: u64,
    pub initial_location: u64,
    pub address_range: u64,
    pub instructions: &'input [u8],
    instructions_offset: u64,
}

impl<'input> Fde<'input> {
    pub fn end_location(&self) -> u64 {
        self.initial_location.wrapping_add(self.address_range)
    }

    pub fn contains(&self, pc: u64) -> bool {
        pc >= self.initial_location && pc < self.end_location()
    }
}

/// How the CFA is computed for a row.
#[derive(Debug, Clone, PartialEq)]
pub enum CfaRule<'input> {
    Undefined,
    RegisterAndOffset { register: Register, offset: i64 },
    Expression(&'input [u8]),
}

/// How one register's caller value is recovered for a row.
#[derive(Debug, Clone, PartialEq)]
pub enum RegisterRule<'input> {
    Undefined,
    SameValue,
    /// Stored at CFA + offset.
    Offset(i64),
    /// The value is CFA + offset itself.
    ValOffset(i64),
    /// Stored in another register.
    Register(Register),
    /// Stored at the address computed by this expression.
    Expression(&'input [u8]),
    /// The value computed by this expression.
    ValExpression(&'input [u8]),
}

/// The unwind-rule table for one PC range.
#[derive(Debug, Clone, PartialEq)]
pub struct UnwindRow<'input> {
    pub start: u64,
    pub end: u64,
    pub cfa: CfaRule<'input>,
    /// Explicit rules only; registers absent here keep the default
    /// (undefined) rule.
    pub registers: BTreeMap<u16, RegisterRule<'input>>,
}

/// A decoded frame section: ordered CIE and FDE records plus the per-record
/// diagnostics collected while walking it.
#[derive(Debug)]
pub struct FrameSection<'input> {
    pub kind: FrameKind,
    cies: Vec<Cie<'input>>,
    fdes: Vec<Fde<'input>>,
    cie_index: FnvHashMap<u64, usize>,
    section_addr: u64,
    endian: RunTimeEndian,
    pub diagnostics: Vec<Diagnostic>,
}

impl<'input> FrameSection<'input> {
    pub fn cies(&self) -> &[Cie<'input>] {
        &self.cies
    }

    pub fn fdes(&self) -> &[Fde<'input>] {
        &self.fdes
    }

    pub fn cie_for(&self, fde: &Fde<'input>) -> Option<&Cie<'input>> {
        self.cie_index.get(&fde.cie_offset).map(|&i| &self.cies[i])
    }

    /// Replays CIE initial instructions and then the FDE's instructions,
    /// producing one row per location change across the FDE's PC range.
    pub fn unwind_table(&self, fde: &Fde<'input>) -> Result<Vec<UnwindRow<'input>>> {
        let cie = self.cie_for(fde).ok_or(Error::DanglingCieReference {
            fde: fde.offset,
            cie: fde.cie_offset,
        })?;

        let mut state = RowState::default();
        let mut replay = Replay {
            cie,
            section_addr: self.section_addr,
            initial: None,
            remembered: Vec::new(),
            loc: fde.initial_location,
            rows: Vec::new(),
        };
        let mut r = Reader::new(self.kind.section_name(), cie.initial_instructions, self.endian);
        replay.run(&mut r, cie.initial_instructions_offset, &mut state)?;

        replay.initial = Some(state.clone());
        let mut r = Reader::new(self.kind.section_name(), fde.instructions, self.endian);
        replay.run(&mut r, fde.instructions_offset, &mut state)?;

        let mut rows = replay.rows;
        let last_start = replay.loc;
        if last_start < fde.end_location() || rows.is_empty() {
            rows.push(UnwindRow {
                start: last_start,
                end: fde.end_location(),
                cfa: state.cfa,
                registers: state.registers,
            });
        }
        Ok(rows)
    }

    /// The unwind row covering `pc`, which must lie inside the FDE's range.
    pub fn unwind_row(&self, fde: &Fde<'input>, pc: u64) -> Result<UnwindRow<'input>> {
        if !fde.contains(pc) {
            return Err(Error::InvalidExpression {
                reason: format!("PC {:#x} outside FDE range", pc),
            });
        }
        let rows = self.unwind_table(fde)?;
        rows.into_iter()
            .find(|row| pc >= row.start && pc < row.end)
            .ok_or_else(|| Error::InvalidExpression {
                reason: format!("no unwind row covers PC {:#x}", pc),
            })
    }
}

#[derive(Debug, Clone, Default)]
struct RowState<'input> {
    cfa: CfaRule<'input>,
    registers: BTreeMap<u16, RegisterRule<'input>>,
}

impl<'input> Default for CfaRule<'input> {
    fn default() -> Self {
        CfaRule::Undefined
    }
}

struct Replay<'a, 'input> {
    cie: &'a Cie<'input>,
    section_addr: u64,
    /// State after the CIE initial instructions; `DW_CFA_restore` targets.
    /// `None` while the initial instructions themselves run.
    initial: Option<RowState<'input>>,
    remembered: Vec<RowState<'input>>,
    loc: u64,
    rows: Vec<UnwindRow<'input>>,
}

impl<'a, 'input> Replay<'a, 'input> {
    fn advance(&mut self, delta: u64, state: &RowState<'input>) {
        let new_loc = self.loc.wrapping_add(delta);
        if self.initial.is_some() && new_loc != self.loc {
            self.rows.push(UnwindRow {
                start: self.loc,
                end: new_loc,
                cfa: state.cfa.clone(),
                registers: state.registers.clone(),
            });
        }
        self.loc = new_loc;
    }

    fn set_loc(&mut self, new_loc: u64, state: &RowState<'input>) {
        if self.initial.is_some() && new_loc != self.loc {
            self.rows.push(UnwindRow {
                start: self.loc,
                end: new_loc,
                cfa: state.cfa.clone(),
                registers: state.registers.clone(),
            });
        }
        self.loc = new_loc;
    }

    fn restore(&self, register: u16, state: &mut RowState<'input>) {
        match &self.initial {
            Some(initial) => match initial.registers.get(&register) {
                Some(rule) => {
                    state.registers.insert(register, rule.clone());
                }
                None => {
                    state.registers.remove(&register);
                }
            },
            // DW_CFA_restore inside CIE initial instructions is meaningless.
            None => {
                state.registers.remove(&register);
            }
        }
    }

    fn run(
        &mut self,
        r: &mut Reader<'input>,
        instructions_offset: u64,
        state: &mut RowState<'input>,
    ) -> Result<()> {
        use gimli::constants::*;

        let invalid = |reason: String| Error::InvalidExpression { reason };
        let register = |n: u64| -> Result<u16> {
            u16::try_from(n).map_err(|_| Error::InvalidExpression {
                reason: format!("register number {} out of range", n),
            })
        };
        let code_align = self.cie.code_alignment;
        let data_align = self.cie.data_alignment;

        while !r.is_empty() {
            let op_pos = r.pos();
            let opcode = r.u8()?;
            let primary = opcode & 0xc0;
            let operand = u64::from(opcode & 0x3f);

            if primary == DW_CFA_advance_loc.0 {
                self.advance(operand * code_align, state);
                continue;
            }
            if primary == DW_CFA_offset.0 {
                let offset = r.uleb128()?;
                state.registers.insert(
                    operand as u16,
                    RegisterRule::Offset(offset as i64 * data_align),
                );
                continue;
            }
            if primary == DW_CFA_restore.0 {
                self.restore(operand as u16, state);
                continue;
            }

            match gimli::DwCfa(opcode) {
                DW_CFA_nop => {}
                DW_CFA_set_loc => {
                    let encoding = self
                        .cie
                        .fde_encoding
                        .unwrap_or(gimli::DW_EH_PE_absptr);
                    let pc_base = self.section_addr + instructions_offset + r.pos() as u64;
                    let address = read_encoded(r, encoding, self.cie.address_size, Some(pc_base))?;
                    self.set_loc(address, state);
                }
                DW_CFA_advance_loc1 => {
                    let delta = u64::from(r.u8()?);
                    self.advance(delta * code_align, state);
                }
                DW_CFA_advance_loc2 => {
                    let delta = u64::from(r.u16()?);
                    self.advance(delta * code_align, state);
                }
                DW_CFA_advance_loc4 => {
                    let delta = u64::from(r.u32()?);
                    self.advance(delta * code_align, state);
                }
                DW_CFA_offset_extended => {
                    let reg = register(r.uleb128()?)?;
                    let offset = r.uleb128()?;
                    state
                        .registers
                        .insert(reg, RegisterRule::Offset(offset as i64 * data_align));
                }
                DW_CFA_offset_extended_sf => {
                    let reg = register(r.uleb128()?)?;
                    let offset = r.sleb128()?;
                    state
                        .registers
                        .insert(reg, RegisterRule::Offset(offset * data_align));
                }
                DW_CFA_val_offset => {
                    let reg = register(r.uleb128()?)?;
                    let offset = r.uleb128()?;
                    state
                        .registers
                        .insert(reg, RegisterRule::ValOffset(offset as i64 * data_align));
                }
                DW_CFA_val_offset_sf => {
                    let reg = register(r.uleb128()?)?;
                    let offset = r.sleb128()?;
                    state
                        .registers
                        .insert(reg, RegisterRule::ValOffset(offset * data_align));
                }
                DW_CFA_restore_extended => {
                    let reg = register(r.uleb128()?)?;
                    self.restore(reg, state);
                }
                DW_CFA_undefined => {
                    let reg = register(r.uleb128()?)?;
                    state.registers.insert(reg, RegisterRule::Undefined);
                }
                DW_CFA_same_value => {
                    let reg = register(r.uleb128()?)?;
                    state.registers.insert(reg, RegisterRule::SameValue);
                }
                DW_CFA_register => {
                    let reg = register(r.uleb128()?)?;
                    let from = register(r.uleb128()?)?;
                    state
                        .registers
                        .insert(reg, RegisterRule::Register(Register(from)));
                }
                DW_CFA_expression => {
                    let reg = register(r.uleb128()?)?;
                    let len = r.uleb128()? as usize;
                    state
                        .registers
                        .insert(reg, RegisterRule::Expression(r.bytes(len)?));
                }
                DW_CFA_val_expression => {
                    let reg = register(r.uleb128()?)?;
                    let len = r.uleb128()? as usize;
                    state
                        .registers
                        .insert(reg, RegisterRule::ValExpression(r.bytes(len)?));
                }
                DW_CFA_def_cfa => {
                    let reg = register(r.uleb128()?)?;
                    let offset = r.uleb128()?;
                    state.cfa = CfaRule::RegisterAndOffset {
                        register: Register(reg),
                        offset: offset as i64,
                    };
                }
                DW_CFA_def_cfa_sf => {
                    let reg = register(r.uleb128()?)?;
                    let offset = r.sleb128()?;
                    state.cfa = CfaRule::RegisterAndOffset {
                        register: Register(reg),
                        offset: offset * data_align,
                    };
                }
                DW_CFA_def_cfa_register => {
                    let reg = register(r.uleb128()?)?;
                    match state.cfa {
                        CfaRule::RegisterAndOffset { ref mut register, .. } => {
                            *register = Register(reg);
                        }
                        _ => {
                            return Err(invalid(
                                "DW_CFA_def_cfa_register without a register CFA rule".into(),
                            ));
                        }
                    }
                }
                DW_CFA_def_cfa_offset => {
                    let new_offset = r.uleb128()?;
                    match state.cfa {
                        CfaRule::RegisterAndOffset { ref mut offset, .. } => {
                            *offset = new_offset as i64;
                        }
                        _ => {
                            return Err(invalid(
                                "DW_CFA_def_cfa_offset without a register CFA rule".into(),
                            ));
                        }
                    }
                }
                DW_CFA_def_cfa_offset_sf => {
                    let new_offset = r.sleb128()?;
                    match state.cfa {
                        CfaRule::RegisterAndOffset { ref mut offset, .. } => {
                            *offset = new_offset * data_align;
                        }
                        _ => {
                            return Err(invalid(
                                "DW_CFA_def_cfa_offset_sf without a register CFA rule".into(),
                            ));
                        }
                    }
                }
                DW_CFA_def_cfa_expression => {
                    let len = r.uleb128()? as usize;
                    state.cfa = CfaRule::Expression(r.bytes(len)?);
                }
                DW_CFA_remember_state => {
                    self.remembered.push(state.clone());
                }
                DW_CFA_restore_state => match self.remembered.pop() {
                    Some(remembered) => *state = remembered,
                    None => {
                        return Err(invalid(
                            "DW_CFA_restore_state with an empty state stack".into(),
                        ));
                    }
                },
                DW_CFA_GNU_args_size => {
                    // Call-site argument size; irrelevant to rule recovery.
                    let _ = r.uleb128()?;
                }
                other => {
                    debug!("unhandled call frame instruction {}", other);
                    return Err(Error::UnsupportedOpcode {
                        opcode,
                        offset: op_pos,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Reads a `DW_EH_PE`-encoded pointer. `pc_base` is the section-relative
/// position of the value, for `pcrel` application; pass `None` to read a
/// plain unapplied value (e.g. an FDE's address-range field).
fn read_encoded(
    r: &mut Reader<'_>,
    encoding: gimli::DwEhPe,
    address_size: u8,
    pc_base: Option<u64>,
) -> Result<u64> {
    use gimli::constants::*;

    let invalid = |reason: String| Error::InvalidExpression { reason };
    if encoding == DW_EH_PE_omit {
        return Ok(0);
    }
    if encoding.0 & 0x80 != 0 {
        return Err(invalid("indirect pointer encodings are not supported".into()));
    }

    let value = match gimli::DwEhPe(encoding.0 & 0x0f) {
        DW_EH_PE_absptr => r.address(address_size)?,
        DW_EH_PE_uleb128 => r.uleb128()?,
        DW_EH_PE_udata2 => u64::from(r.u16()?),
        DW_EH_PE_udata4 => u64::from(r.u32()?),
        DW_EH_PE_udata8 => r.u64()?,
        DW_EH_PE_sleb128 => r.sleb128()? as u64,
        DW_EH_PE_sdata2 => r.u16()? as i16 as i64 as u64,
        DW_EH_PE_sdata4 => r.u32()? as i32 as i64 as u64,
        DW_EH_PE_sdata8 => r.u64()?,
        other => {
            return Err(invalid(format!(
                "unsupported pointer encoding format {:#x}",
                other.0
            )));
        }
    };

    match gimli::DwEhPe(encoding.0 & 0x70) {
        _ if pc_base.is_none() => Ok(value),
        DW_EH_PE_absptr => Ok(value),
        DW_EH_PE_pcrel => Ok(pc_base.unwrap().wrapping_add(value)),
        other => Err(invalid(format!(
            "unsupported pointer encoding application {:#x}",
            other.0
        ))),
    }
}

/// Walks a frame section into its CIE/FDE records.
///
/// Record lengths are known up front, so a malformed record is diagnosed and
/// the walk resumes at the next one.
pub(crate) fn parse_frame<'input>(
    kind: FrameKind,
    data: &'input [u8],
    section_addr: u64,
    address_size: u8,
    endian: RunTimeEndian,
) -> FrameSection<'input> {
    let mut section = FrameSection {
        kind,
        cies: Vec::new(),
        fdes: Vec::new(),
        cie_index: FnvHashMap::default(),
        section_addr,
        endian,
        diagnostics: Vec::new(),
    };
    let mut r = Reader::new(kind.section_name(), data, endian);

    while !r.is_empty() {
        let record_offset = r.offset();
        let (length, offset_size) = match r.initial_length() {
            Ok(v) => v,
            Err(error) => {
                section
                    .diagnostics
                    .push(Diagnostic::new(record_scope(record_offset), error));
                break;
            }
        };
        if length == 0 {
            // Zero terminator; anything after it is padding.
            break;
        }
        let mut body = match r.split(length as usize) {
            Ok(body) => body,
            Err(error) => {
                section
                    .diagnostics
                    .push(Diagnostic::new(record_scope(record_offset), error));
                break;
            }
        };

        let id_pos = body.offset();
        let id = match body.offset_sized(offset_size) {
            Ok(id) => id,
            Err(error) => {
                section
                    .diagnostics
                    .push(Diagnostic::new(record_scope(record_offset), error));
                continue;
            }
        };
        let cie_id = match (kind, offset_size) {
            (FrameKind::DebugFrame, 4) => u64::from(u32::MAX),
            (FrameKind::DebugFrame, _) => u64::MAX,
            (FrameKind::EhFrame, _) => 0,
        };

        if id == cie_id {
            match parse_cie(kind, record_offset, &mut body, section_addr, address_size) {
                Ok(cie) => {
                    section.cie_index.insert(record_offset, section.cies.len());
                    section.cies.push(cie);
                }
                Err(error) => {
                    section
                        .diagnostics
                        .push(Diagnostic::new(format!("CIE at {:#x}", record_offset), error));
                }
            }
        } else {
            let cie_offset = match kind {
                FrameKind::DebugFrame => id,
                FrameKind::EhFrame => match id_pos.checked_sub(id) {
                    Some(offset) => offset,
                    None => {
                        section.diagnostics.push(Diagnostic::new(
                            format!("FDE at {:#x}", record_offset),
                            Error::DanglingCieReference {
                                fde: record_offset,
                                cie: id,
                            },
                        ));
                        continue;
                    }
                },
            };
            let cie = match section.cie_index.get(&cie_offset) {
                Some(&i) => &section.cies[i],
                None => {
                    section.diagnostics.push(Diagnostic::new(
                        format!("FDE at {:#x}", record_offset),
                        Error::DanglingCieReference {
                            fde: record_offset,
                            cie: cie_offset,
                        },
                    ));
                    continue;
                }
            };
            match parse_fde(
                kind,
                record_offset,
                cie_offset,
                cie,
                &mut body,
                section_addr,
            ) {
                Ok(fde) => section.fdes.push(fde),
                Err(error) => {
                    section
                        .diagnostics
                        .push(Diagnostic::new(format!("FDE at {:#x}", record_offset), error));
                }
            }
        }
    }

    check_overlaps(&mut section);
    section
}

fn record_scope(offset: u64) -> String {
    format!("frame record at {:#x}", offset)
}

fn parse_cie<'input>(
    kind: FrameKind,
    offset: u64,
    body: &mut Reader<'input>,
    section_addr: u64,
    default_address_size: u8,
) -> Result<Cie<'input>> {
    let version = body.u8()?;
    let supported = match kind {
        FrameKind::DebugFrame => matches!(version, 1 | 3 | 4),
        FrameKind::EhFrame => version == 1,
    };
    if !supported {
        return Err(Error::InvalidExpression {
            reason: format!("unsupported CIE version {}", version),
        });
    }

    let augmentation = String::from_utf8_lossy(body.cstr()?);

    let mut address_size = default_address_size;
    if kind == FrameKind::DebugFrame && version == 4 {
        address_size = body.u8()?;
        let segment_size = body.u8()?;
        if segment_size != 0 {
            return Err(Error::InvalidExpression {
                reason: "segment selectors are not supported".into(),
            });
        }
    }

    let code_alignment = body.uleb128()?;
    let data_alignment = body.sleb128()?;
    let return_address_register = if kind == FrameKind::DebugFrame && version == 1 {
        u64::from(body.u8()?)
    } else {
        body.uleb128()?
    };
    let return_address_register = Register(u16::try_from(return_address_register).map_err(
        |_| Error::InvalidExpression {
            reason: format!(
                "return address register {} out of range",
                return_address_register
            ),
        },
    )?);

    let mut fde_encoding = None;
    let mut lsda_encoding = None;
    let mut personality = None;
    let mut signal_frame = false;
    if augmentation.starts_with('z') {
        let aug_len = body.uleb128()? as usize;
        let mut aug = body.split(aug_len)?;
        for ch in augmentation[1..].chars() {
            match ch {
                'L' => lsda_encoding = Some(gimli::DwEhPe(aug.u8()?)),
                'P' => {
                    let encoding = gimli::DwEhPe(aug.u8()?);
                    let pc_base = section_addr + aug.offset();
                    personality =
                        Some(read_encoded(&mut aug, encoding, address_size, Some(pc_base))?);
                }
                'R' => fde_encoding = Some(gimli::DwEhPe(aug.u8()?)),
                'S' => signal_frame = true,
                other => {
                    // Unknown augmentation characters make the rest of the
                    // data uninterpretable; the declared length lets us skip
                    // it all the same.
                    warn!("CIE at {:#x}: unknown augmentation '{}'", offset, other);
                    break;
                }
            }
        }
    } else if !augmentation.is_empty() {
        return Err(Error::InvalidExpression {
            reason: format!("unsupported augmentation \"{}\"", augmentation),
        });
    }

    Ok(Cie {
        offset,
        version,
        augmentation,
        address_size,
        code_alignment,
        data_alignment,
        return_address_register,
        fde_encoding,
        lsda_encoding,
        personality,
        signal_frame,
        initial_instructions_offset: body.offset(),
        initial_instructions: body.rest(),
    })
}

fn parse_fde<'input>(
    kind: FrameKind,
    offset: u64,
    cie_offset: u64,
    cie: &Cie<'input>,
    body: &mut Reader<'input>,
    section_addr: u64,
) -> Result<Fde<'input>> {
    let (initial_location, address_range) = match kind {
        FrameKind::DebugFrame => (
            body.address(cie.address_size)?,
            body.address(cie.address_size)?,
        ),
        FrameKind::EhFrame => {
            let encoding = cie.fde_encoding.unwrap_or(gimli::DW_EH_PE_absptr);
            let pc_base = section_addr + body.offset();
            let initial = read_encoded(body, encoding, cie.address_size, Some(pc_base))?;
            // The range field is a plain size; only the value format of the
            // encoding applies.
            let range = read_encoded(body, encoding, cie.address_size, None)?;
            (initial, range)
        }
    };

    if cie.augmentation.starts_with('z') {
        let aug_len = body.uleb128()? as usize;
        body.skip(aug_len)?;
    }

    Ok(Fde {
        offset,
        cie_offset,
        initial_location,
        address_range,
        instructions_offset: body.offset(),
        instructions: body.rest(),
    })
}

/// FDE PC ranges within one section must not overlap; violations are
/// reported and both records kept.
fn check_overlaps(section: &mut FrameSection<'_>) {
    let mut ranges: Vec<(u64, u64, u64)> = section
        .fdes
        .iter()
        .filter(|fde| fde.address_range != 0)
        .map(|fde| (fde.initial_location, fde.end_location(), fde.offset))
        .collect();
    ranges.sort();
    for pair in ranges.windows(2) {
        let (_, end_a, offset_a) = pair[0];
        let (start_b, _, offset_b) = pair[1];
        if start_b < end_a {
            section.diagnostics.push(Diagnostic::new(
                format!("FDE at {:#x}", offset_b),
                Error::OverlappingFde {
                    a: offset_a,
                    b: offset_b,
                },
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Assembled .debug_frame bytes: one CIE (version 1, code align 1, data
    // align -4, RA register 16, initial rule: CFA = r7+8, r16 at cfa-8
    // via DW_CFA_offset) and one FDE covering [0x1000, 0x1010) that
    // advances 4 bytes and then moves the return address rule to cfa-8.
    fn sample_debug_frame() -> Vec<u8> {
        let mut cie = vec![
            0x01, // version
            0x00, // augmentation ""
            0x01, // code alignment 1
            0x7c, // data alignment -4
            0x10, // RA register 16
            // DW_CFA_def_cfa r7, 8
            0x0c, 0x07, 0x08,
            // DW_CFA_offset r16, offset 1 (factored: 1 * -4 = -4)
            0x90, 0x01,
        ];
        // Pad to 4-byte alignment with DW_CFA_nop.
        while (cie.len() + 8) % 4 != 0 {
            cie.push(0x00);
        }

        let mut fde = vec![
            // initial_location 0x1000, address_range 0x10 (8-byte addresses)
            0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
            0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
            // DW_CFA_advance_loc 4
            0x44, //
            // DW_CFA_offset r16, offset 2 (factored: 2 * -4 = -8)
            0x90, 0x02,
        ];
        while (fde.len() + 8) % 4 != 0 {
            fde.push(0x00);
        }

        let mut out = Vec::new();
        out.extend_from_slice(&u32::to_le_bytes((cie.len() + 4) as u32));
        out.extend_from_slice(&u32::to_le_bytes(u32::MAX)); // CIE id
        out.extend_from_slice(&cie);
        out.extend_from_slice(&u32::to_le_bytes((fde.len() + 4) as u32));
        out.extend_from_slice(&u32::to_le_bytes(0)); // CIE at offset 0
        out.extend_from_slice(&fde);
        out
    }

    fn parse(data: &[u8]) -> FrameSection<'_> {
        parse_frame(
            FrameKind::DebugFrame,
            data,
            0,
            8,
            RunTimeEndian::Little,
        )
    }

    #[test]
    fn cie_and_fde_records_parse() {
        let data = sample_debug_frame();
        let section = parse(&data);
        assert!(section.diagnostics.is_empty());
        assert_eq!(section.cies().len(), 1);
        assert_eq!(section.fdes().len(), 1);

        let cie = &section.cies()[0];
        assert_eq!(cie.code_alignment, 1);
        assert_eq!(cie.data_alignment, -4);
        assert_eq!(cie.return_address_register, Register(16));

        let fde = &section.fdes()[0];
        assert_eq!(fde.initial_location, 0x1000);
        assert_eq!(fde.address_range, 0x10);
        assert!(section.cie_for(fde).is_some());
    }

    #[test]
    fn unwind_rows_reflect_advancing_pc() {
        let data = sample_debug_frame();
        let section = parse(&data);
        let fde = &section.fdes()[0];

        // Before the advance the CIE-initial rule holds.
        let row = section.unwind_row(fde, 0x1002).unwrap();
        assert_eq!(row.start, 0x1000);
        assert_eq!(row.end, 0x1004);
        assert_eq!(
            row.cfa,
            CfaRule::RegisterAndOffset {
                register: Register(7),
                offset: 8
            }
        );
        assert_eq!(row.registers.get(&16), Some(&RegisterRule::Offset(-4)));

        // After it, the refined rule.
        let row = section.unwind_row(fde, 0x1005).unwrap();
        assert_eq!(row.start, 0x1004);
        assert_eq!(row.end, 0x1010);
        assert_eq!(row.registers.get(&16), Some(&RegisterRule::Offset(-8)));

        assert!(section.unwind_row(fde, 0x1010).is_err());
    }

    #[test]
    fn remember_and_restore_state() {
        let mut cie = vec![
            0x01, 0x00, 0x01, 0x7c, 0x10, //
            0x0c, 0x07, 0x08, // DW_CFA_def_cfa r7, 8
        ];
        while (cie.len() + 8) % 4 != 0 {
            cie.push(0x00);
        }
        let mut fde = vec![
            0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
            0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
            0x0a, // DW_CFA_remember_state
            0x0e, 0x10, // DW_CFA_def_cfa_offset 16
            0x44, // DW_CFA_advance_loc 4
            0x0b, // DW_CFA_restore_state
        ];
        while (fde.len() + 8) % 4 != 0 {
            fde.push(0x00);
        }
        let mut out = Vec::new();
        out.extend_from_slice(&u32::to_le_bytes((cie.len() + 4) as u32));
        out.extend_from_slice(&u32::to_le_bytes(u32::MAX));
        out.extend_from_slice(&cie);
        out.extend_from_slice(&u32::to_le_bytes((fde.len() + 4) as u32));
        out.extend_from_slice(&u32::to_le_bytes(0));
        out.extend_from_slice(&fde);

        let section = parse(&out);
        assert!(section.diagnostics.is_empty());
        let rows = section.unwind_table(&section.fdes()[0]).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0].cfa,
            CfaRule::RegisterAndOffset {
                register: Register(7),
                offset: 16
            }
        );
        // The restore rewinds to the remembered CFA rule.
        assert_eq!(
            rows[1].cfa,
            CfaRule::RegisterAndOffset {
                register: Register(7),
                offset: 8
            }
        );
    }

    #[test]
    fn eh_frame_pcrel_encoded_pointers() {
        const SECTION_ADDR: u64 = 0x10000;
        // CIE with "zR" augmentation: FDE addresses are pcrel sdata4.
        let cie_content: Vec<u8> = vec![
            0x00, 0x00, 0x00, 0x00, // CIE id
            0x01, // version
            b'z', b'R', 0x00, // augmentation
            0x01, // code alignment 1
            0x7c, // data alignment -4
            0x10, // RA register 16
            0x01, // augmentation data length
            0x1b, // DW_EH_PE_pcrel | DW_EH_PE_sdata4
        ];
        let mut out = Vec::new();
        out.extend_from_slice(&u32::to_le_bytes(cie_content.len() as u32));
        out.extend_from_slice(&cie_content);

        let fde_offset = out.len() as u64;
        let id_field_pos = fde_offset + 4;
        // pc_begin 0x20000, encoded relative to its own field position.
        let loc_field_pos = SECTION_ADDR + id_field_pos + 4;
        let encoded_loc = (0x20000i64 - loc_field_pos as i64) as i32;
        let mut fde_content = Vec::new();
        fde_content.extend_from_slice(&(id_field_pos as u32).to_le_bytes());
        fde_content.extend_from_slice(&encoded_loc.to_le_bytes());
        fde_content.extend_from_slice(&0x10i32.to_le_bytes()); // range
        fde_content.push(0x00); // FDE augmentation data length
        fde_content.extend_from_slice(&[0x44, 0x90, 0x01, 0x00]);
        out.extend_from_slice(&u32::to_le_bytes(fde_content.len() as u32));
        out.extend_from_slice(&fde_content);
        out.extend_from_slice(&u32::to_le_bytes(0)); // terminator

        let section = parse_frame(
            FrameKind::EhFrame,
            &out,
            SECTION_ADDR,
            8,
            RunTimeEndian::Little,
        );
        assert!(section.diagnostics.is_empty());
        assert_eq!(section.cies().len(), 1);
        assert_eq!(
            section.cies()[0].fde_encoding,
            Some(gimli::DwEhPe(0x1b))
        );

        let fde = &section.fdes()[0];
        assert_eq!(fde.initial_location, 0x20000);
        assert_eq!(fde.address_range, 0x10);
        let row = section.unwind_row(fde, 0x20005).unwrap();
        assert_eq!(row.registers.get(&16), Some(&RegisterRule::Offset(-4)));
    }

    #[test]
    fn dangling_cie_reference_is_diagnosed() {
        let mut out = Vec::new();
        // A single FDE whose CIE pointer targets offset 0x40, where nothing
        // was parsed.
        out.extend_from_slice(&u32::to_le_bytes(20));
        out.extend_from_slice(&u32::to_le_bytes(0x40));
        out.extend_from_slice(&[0u8; 16]);
        let section = parse(&out);
        assert_eq!(section.fdes().len(), 0);
        assert_eq!(section.diagnostics.len(), 1);
        assert_eq!(section.diagnostics[0].kind(), "DanglingCIEReference");
    }

    #[test]
    fn overlapping_fdes_are_diagnosed() {
        let mut out = Vec::new();
        let cie = [
            0x01, 0x00, 0x01, 0x7c, 0x10, 0x00, 0x00, //
        ];
        out.extend_from_slice(&u32::to_le_bytes(cie.len() as u32 + 4));
        out.extend_from_slice(&u32::to_le_bytes(u32::MAX));
        out.extend_from_slice(&cie);
        for start in [0x1000u64, 0x1008] {
            let mut fde = Vec::new();
            fde.extend_from_slice(&u64::to_le_bytes(start));
            fde.extend_from_slice(&u64::to_le_bytes(0x10));
            out.extend_from_slice(&u32::to_le_bytes(fde.len() as u32 + 4));
            out.extend_from_slice(&u32::to_le_bytes(0));
            out.extend_from_slice(&fde);
        }
        let section = parse(&out);
        assert_eq!(section.fdes().len(), 2);
        assert!(section
            .diagnostics
            .iter()
            .any(|d| d.kind() == "OverlappingFde"));
    }
}
