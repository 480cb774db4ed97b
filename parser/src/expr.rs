use std::convert::TryFrom;

use fnv::FnvHashMap;
use gimli::RunTimeEndian;

use crate::{Error, Reader, Result};

/// A DWARF register number.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Register(pub u16);

/// The resolved result of evaluating a location expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Location<'input> {
    /// The value lives in a register.
    Register { register: Register },
    /// The value lives in memory at this address.
    Address { address: u64 },
    /// The value is this literal; it has no storage.
    Value { value: u64 },
    /// The value is these literal bytes (`DW_OP_implicit_value`).
    ImplicitValue { bytes: &'input [u8] },
    /// The value is assembled from several storage locations.
    Composite { pieces: Vec<Piece<'input>> },
    /// The value has been optimized away.
    OptimizedOut,
    /// The expression is understood but cannot be resolved in a static
    /// context (it needs live register values, target memory, or a TLS
    /// base).
    Unsupported { reason: &'static str },
}

/// One member of a composite location.
#[derive(Debug, Clone, PartialEq)]
pub struct Piece<'input> {
    pub location: Location<'input>,
    pub byte_size: u64,
}

/// Evaluation context: whatever runtime facts the caller can supply.
///
/// A static extractor typically supplies none of the optional fields, in
/// which case register-relative expressions come back as
/// [`Location::Unsupported`] rather than failing.
#[derive(Debug, Clone)]
pub struct EvalContext {
    pub address_size: u8,
    pub frame_base: Option<u64>,
    /// Canonical frame address, for `DW_OP_call_frame_cfa`.
    pub cfa: Option<u64>,
    pub pc: Option<u64>,
    /// Known register values, keyed by DWARF register number.
    pub registers: FnvHashMap<u16, u64>,
    /// Values seeded onto the stack before execution; call-frame rule
    /// expressions push the CFA here when it is known.
    pub initial_stack: Vec<u64>,
}

impl Default for EvalContext {
    fn default() -> Self {
        EvalContext {
            address_size: 8,
            frame_base: None,
            cfa: None,
            pc: None,
            registers: FnvHashMap::default(),
            initial_stack: Vec::new(),
        }
    }
}

impl EvalContext {
    pub fn register(&self, number: u16) -> Option<u64> {
        self.registers.get(&number).copied()
    }
}

/// Total opcode budget per expression; bounds adversarial branch loops.
const STEP_LIMIT: usize = 4096;

fn invalid(reason: impl Into<String>) -> Error {
    Error::InvalidExpression {
        reason: reason.into(),
    }
}

struct Machine<'input> {
    stack: Vec<u64>,
    pieces: Vec<Piece<'input>>,
    /// A register/value/implicit result waiting for DW_OP_piece or the end
    /// of the expression; any other opcode after it is malformed.
    pending: Option<Location<'input>>,
}

impl<'input> Machine<'input> {
    fn pop(&mut self) -> Result<u64> {
        self.stack.pop().ok_or_else(|| invalid("stack underflow"))
    }

    fn binary(&mut self, f: impl FnOnce(u64, u64) -> u64) -> Result<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        self.stack.push(f(lhs, rhs));
        Ok(())
    }

    fn compare(&mut self, f: impl FnOnce(i64, i64) -> bool) -> Result<()> {
        self.binary(|lhs, rhs| u64::from(f(lhs as i64, rhs as i64)))
    }
}

/// Evaluates a location-expression byte block.
///
/// This is an explicit-stack interpreter over address-width values, not a
/// recursive walk: depth stays bounded and every failure carries the
/// offending opcode's offset. Unknown opcodes fail with
/// [`Error::UnsupportedOpcode`], structural faults (underflow, division by
/// zero, branches out of bounds) with [`Error::InvalidExpression`]; both are
/// recoverable per expression.
pub fn evaluate<'input>(
    bytes: &'input [u8],
    endian: RunTimeEndian,
    ctx: &EvalContext,
) -> Result<Location<'input>> {
    use gimli::constants::*;

    let mut r = Reader::new("expression", bytes, endian);
    let mut m = Machine {
        stack: ctx.initial_stack.clone(),
        pieces: Vec::new(),
        pending: None,
    };
    let mut steps = 0usize;

    while !r.is_empty() {
        steps += 1;
        if steps > STEP_LIMIT {
            return Err(invalid("step limit exceeded"));
        }
        let op_offset = r.pos();
        let opcode = r.u8().map_err(|_| invalid("empty opcode read"))?;
        let op = gimli::DwOp(opcode);

        if m.pending.is_some() && op != DW_OP_piece && op != DW_OP_bit_piece {
            return Err(invalid(format!(
                "{} after a register or value result",
                op
            )));
        }

        match op {
            // Literals.
            _ if (DW_OP_lit0.0..=DW_OP_lit31.0).contains(&opcode) => {
                m.stack.push(u64::from(opcode - DW_OP_lit0.0));
            }
            DW_OP_addr => {
                let address = r
                    .address(ctx.address_size)
                    .map_err(|_| invalid("expression ends inside DW_OP_addr operand"))?;
                m.stack.push(address);
            }
            DW_OP_const1u => m.stack.push(u64::from(read1(&mut r)?)),
            DW_OP_const1s => m.stack.push(read1(&mut r)? as i8 as i64 as u64),
            DW_OP_const2u => m.stack.push(u64::from(read2(&mut r)?)),
            DW_OP_const2s => m.stack.push(read2(&mut r)? as i16 as i64 as u64),
            DW_OP_const4u => m.stack.push(u64::from(read4(&mut r)?)),
            DW_OP_const4s => m.stack.push(read4(&mut r)? as i32 as i64 as u64),
            DW_OP_const8u => m.stack.push(read8(&mut r)?),
            DW_OP_const8s => m.stack.push(read8(&mut r)?),
            DW_OP_constu => m.stack.push(uleb(&mut r)?),
            DW_OP_consts => m.stack.push(sleb(&mut r)? as u64),

            // Register results.
            _ if (DW_OP_reg0.0..=DW_OP_reg31.0).contains(&opcode) => {
                m.pending = Some(Location::Register {
                    register: Register(u16::from(opcode - DW_OP_reg0.0)),
                });
            }
            DW_OP_regx => {
                let number = uleb(&mut r)?;
                let number = u16::try_from(number)
                    .map_err(|_| invalid(format!("register number {} out of range", number)))?;
                m.pending = Some(Location::Register {
                    register: Register(number),
                });
            }

            // Register-relative addresses.
            _ if (DW_OP_breg0.0..=DW_OP_breg31.0).contains(&opcode) => {
                let offset = sleb(&mut r)?;
                let number = u16::from(opcode - DW_OP_breg0.0);
                match ctx.register(number) {
                    Some(base) => m.stack.push(base.wrapping_add(offset as u64)),
                    None => {
                        return Ok(Location::Unsupported {
                            reason: "register value not available in this context",
                        });
                    }
                }
            }
            DW_OP_bregx => {
                let number = uleb(&mut r)?;
                let offset = sleb(&mut r)?;
                let number = u16::try_from(number)
                    .map_err(|_| invalid(format!("register number {} out of range", number)))?;
                match ctx.register(number) {
                    Some(base) => m.stack.push(base.wrapping_add(offset as u64)),
                    None => {
                        return Ok(Location::Unsupported {
                            reason: "register value not available in this context",
                        });
                    }
                }
            }
            DW_OP_fbreg => {
                let offset = sleb(&mut r)?;
                match ctx.frame_base {
                    Some(base) => m.stack.push(base.wrapping_add(offset as u64)),
                    None => {
                        return Ok(Location::Unsupported {
                            reason: "frame base not available in this context",
                        });
                    }
                }
            }
            DW_OP_call_frame_cfa => match ctx.cfa {
                Some(cfa) => m.stack.push(cfa),
                None => {
                    return Ok(Location::Unsupported {
                        reason: "CFA not available in this context",
                    });
                }
            },

            // Stack manipulation.
            DW_OP_dup => {
                let top = *m.stack.last().ok_or_else(|| invalid("stack underflow"))?;
                m.stack.push(top);
            }
            DW_OP_drop => {
                m.pop()?;
            }
            DW_OP_over => {
                let len = m.stack.len();
                if len < 2 {
                    return Err(invalid("stack underflow"));
                }
                let value = m.stack[len - 2];
                m.stack.push(value);
            }
            DW_OP_pick => {
                let n = read1(&mut r)? as usize;
                let len = m.stack.len();
                if n >= len {
                    return Err(invalid("pick past the bottom of the stack"));
                }
                let value = m.stack[len - 1 - n];
                m.stack.push(value);
            }
            DW_OP_swap => {
                let a = m.pop()?;
                let b = m.pop()?;
                m.stack.push(a);
                m.stack.push(b);
            }
            DW_OP_rot => {
                let top = m.pop()?;
                let second = m.pop()?;
                let third = m.pop()?;
                m.stack.push(top);
                m.stack.push(third);
                m.stack.push(second);
            }

            // Arithmetic and bitwise.
            DW_OP_plus => m.binary(u64::wrapping_add)?,
            DW_OP_minus => m.binary(u64::wrapping_sub)?,
            DW_OP_mul => m.binary(u64::wrapping_mul)?,
            DW_OP_div => {
                let rhs = m.pop()?;
                let lhs = m.pop()?;
                if rhs == 0 {
                    return Err(invalid("division by zero"));
                }
                m.stack
                    .push((lhs as i64).wrapping_div(rhs as i64) as u64);
            }
            DW_OP_mod => {
                let rhs = m.pop()?;
                let lhs = m.pop()?;
                if rhs == 0 {
                    return Err(invalid("modulo by zero"));
                }
                m.stack.push(lhs % rhs);
            }
            DW_OP_neg => {
                let top = m.pop()?;
                m.stack.push((top as i64).wrapping_neg() as u64);
            }
            DW_OP_not => {
                let top = m.pop()?;
                m.stack.push(!top);
            }
            DW_OP_abs => {
                let top = m.pop()?;
                m.stack.push((top as i64).wrapping_abs() as u64);
            }
            DW_OP_and => m.binary(|a, b| a & b)?,
            DW_OP_or => m.binary(|a, b| a | b)?,
            DW_OP_xor => m.binary(|a, b| a ^ b)?,
            DW_OP_shl => m.binary(|a, b| if b >= 64 { 0 } else { a << b })?,
            DW_OP_shr => m.binary(|a, b| if b >= 64 { 0 } else { a >> b })?,
            DW_OP_shra => m.binary(|a, b| {
                let a = a as i64;
                if b >= 64 {
                    if a < 0 {
                        !0
                    } else {
                        0
                    }
                } else {
                    (a >> b) as u64
                }
            })?,
            DW_OP_plus_uconst => {
                let addend = uleb(&mut r)?;
                let top = m.pop()?;
                m.stack.push(top.wrapping_add(addend));
            }

            // Comparisons and control flow.
            DW_OP_eq => m.compare(|a, b| a == b)?,
            DW_OP_ge => m.compare(|a, b| a >= b)?,
            DW_OP_gt => m.compare(|a, b| a > b)?,
            DW_OP_le => m.compare(|a, b| a <= b)?,
            DW_OP_lt => m.compare(|a, b| a < b)?,
            DW_OP_ne => m.compare(|a, b| a != b)?,
            DW_OP_skip => {
                let delta = read2(&mut r)? as i16;
                branch(&mut r, delta)?;
            }
            DW_OP_bra => {
                let delta = read2(&mut r)? as i16;
                if m.pop()? != 0 {
                    branch(&mut r, delta)?;
                }
            }
            DW_OP_nop => {}

            // Termination classifiers.
            DW_OP_stack_value => {
                let value = m.pop()?;
                m.pending = Some(Location::Value { value });
            }
            DW_OP_implicit_value => {
                let len = uleb(&mut r)? as usize;
                let bytes = r
                    .bytes(len)
                    .map_err(|_| invalid("expression ends inside DW_OP_implicit_value"))?;
                m.pending = Some(Location::ImplicitValue { bytes });
            }
            DW_OP_piece => {
                let byte_size = uleb(&mut r)?;
                let location = match m.pending.take() {
                    Some(location) => location,
                    None => match m.stack.pop() {
                        Some(address) => Location::Address { address },
                        // A piece with no preceding location has no storage.
                        None => Location::OptimizedOut,
                    },
                };
                m.stack.clear();
                m.pieces.push(Piece {
                    location,
                    byte_size,
                });
            }
            DW_OP_bit_piece => {
                return Ok(Location::Unsupported {
                    reason: "bit-granular composite locations",
                });
            }

            // Understood but unresolvable without a live target.
            DW_OP_deref | DW_OP_xderef => {
                return Ok(Location::Unsupported {
                    reason: "memory dereference requires target memory",
                });
            }
            DW_OP_deref_size | DW_OP_xderef_size => {
                let _size = read1(&mut r)?;
                return Ok(Location::Unsupported {
                    reason: "memory dereference requires target memory",
                });
            }
            DW_OP_push_object_address => {
                return Ok(Location::Unsupported {
                    reason: "object address not available in this context",
                });
            }
            DW_OP_form_tls_address | DW_OP_GNU_push_tls_address => {
                return Ok(Location::Unsupported {
                    reason: "TLS base not available in this context",
                });
            }

            // Known-but-unimplemented and unknown opcodes both fail; the
            // caller marks the attribute unresolved and moves on.
            _ => {
                return Err(Error::UnsupportedOpcode {
                    opcode,
                    offset: op_offset,
                });
            }
        }
    }

    if !m.pieces.is_empty() {
        if m.pending.is_some() || !m.stack.is_empty() {
            return Err(invalid("composite expression missing a final DW_OP_piece"));
        }
        return Ok(Location::Composite { pieces: m.pieces });
    }
    if let Some(location) = m.pending {
        return Ok(location);
    }
    match m.stack.pop() {
        Some(address) => Ok(Location::Address { address }),
        None => Ok(Location::OptimizedOut),
    }
}

fn read1(r: &mut Reader<'_>) -> Result<u8> {
    r.u8().map_err(|_| invalid("expression ends inside an operand"))
}

fn read2(r: &mut Reader<'_>) -> Result<u16> {
    r.u16()
        .map_err(|_| invalid("expression ends inside an operand"))
}

fn read4(r: &mut Reader<'_>) -> Result<u32> {
    r.u32()
        .map_err(|_| invalid("expression ends inside an operand"))
}

fn read8(r: &mut Reader<'_>) -> Result<u64> {
    r.u64()
        .map_err(|_| invalid("expression ends inside an operand"))
}

fn uleb(r: &mut Reader<'_>) -> Result<u64> {
    r.uleb128()
        .map_err(|_| invalid("expression ends inside an operand"))
}

fn sleb(r: &mut Reader<'_>) -> Result<i64> {
    r.sleb128()
        .map_err(|_| invalid("expression ends inside an operand"))
}

fn branch(r: &mut Reader<'_>, delta: i16) -> Result<()> {
    let target = r.pos() as i64 + i64::from(delta);
    let target =
        usize::try_from(target).map_err(|_| invalid("branch before the start of the expression"))?;
    r.seek(target)
        .map_err(|_| invalid("branch past the end of the expression"))
}

/// Number of operations in an expression, without evaluating it.
///
/// Used by the emitter's trivial-expression filter; a "trivial" expression
/// is a single opcode such as `DW_OP_reg5` or `DW_OP_addr`.
pub fn operation_count(
    bytes: &[u8],
    endian: RunTimeEndian,
    address_size: u8,
) -> Result<usize> {
    use gimli::constants::*;

    let mut r = Reader::new("expression", bytes, endian);
    let mut count = 0usize;
    while !r.is_empty() {
        count += 1;
        if count > STEP_LIMIT {
            return Err(invalid("step limit exceeded"));
        }
        let opcode = r.u8().map_err(|_| invalid("empty opcode read"))?;
        let op = gimli::DwOp(opcode);
        let skip = |r: &mut Reader<'_>, len: usize| {
            r.skip(len)
                .map_err(|_| invalid("expression ends inside an operand"))
        };
        match op {
            DW_OP_addr => skip(&mut r, usize::from(address_size))?,
            DW_OP_const1u | DW_OP_const1s | DW_OP_pick | DW_OP_deref_size | DW_OP_xderef_size => {
                skip(&mut r, 1)?
            }
            DW_OP_const2u | DW_OP_const2s | DW_OP_skip | DW_OP_bra | DW_OP_call2 => {
                skip(&mut r, 2)?
            }
            DW_OP_const4u | DW_OP_const4s | DW_OP_call4 => skip(&mut r, 4)?,
            DW_OP_const8u | DW_OP_const8s => skip(&mut r, 8)?,
            DW_OP_constu | DW_OP_plus_uconst | DW_OP_regx | DW_OP_piece | DW_OP_fbreg
            | DW_OP_consts => {
                // Single LEB operand (signedness irrelevant for skipping).
                uleb_or_sleb(&mut r, op)?;
            }
            DW_OP_bregx | DW_OP_bit_piece => {
                uleb(&mut r)?;
                sleb(&mut r)?;
            }
            DW_OP_implicit_value => {
                let len = uleb(&mut r)? as usize;
                skip(&mut r, len)?;
            }
            _ if (DW_OP_breg0.0..=DW_OP_breg31.0).contains(&opcode) => {
                sleb(&mut r)?;
            }
            // Everything else is a bare opcode; unknown opcodes still have
            // unknown operand sizes, so counting stops there.
            _ if (DW_OP_lit0.0..=DW_OP_lit31.0).contains(&opcode)
                || (DW_OP_reg0.0..=DW_OP_reg31.0).contains(&opcode) => {}
            DW_OP_deref | DW_OP_xderef | DW_OP_dup | DW_OP_drop | DW_OP_over | DW_OP_swap
            | DW_OP_rot | DW_OP_plus | DW_OP_minus | DW_OP_mul | DW_OP_div | DW_OP_mod
            | DW_OP_neg | DW_OP_not | DW_OP_abs | DW_OP_and | DW_OP_or | DW_OP_xor | DW_OP_shl
            | DW_OP_shr | DW_OP_shra | DW_OP_eq | DW_OP_ge | DW_OP_gt | DW_OP_le | DW_OP_lt
            | DW_OP_ne | DW_OP_nop | DW_OP_stack_value | DW_OP_call_frame_cfa
            | DW_OP_push_object_address | DW_OP_form_tls_address => {}
            _ => {
                return Err(Error::UnsupportedOpcode {
                    opcode,
                    offset: r.pos() - 1,
                });
            }
        }
    }
    Ok(count)
}

fn uleb_or_sleb(r: &mut Reader<'_>, op: gimli::DwOp) -> Result<()> {
    if op == gimli::DW_OP_fbreg || op == gimli::DW_OP_consts {
        sleb(r).map(|_| ())
    } else {
        uleb(r).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gimli::constants::*;

    const LE: RunTimeEndian = RunTimeEndian::Little;

    fn eval<'a>(bytes: &'a [u8], ctx: &EvalContext) -> Result<Location<'a>> {
        evaluate(bytes, LE, ctx)
    }

    #[test]
    fn single_register_opcode_is_a_register_location() {
        let ctx = EvalContext::default();
        for n in [0u8, 5, 31] {
            let expr = [DW_OP_reg0.0 + n];
            assert_eq!(
                eval(&expr, &ctx).unwrap(),
                Location::Register {
                    register: Register(u16::from(n))
                }
            );
        }
        assert_eq!(
            eval(&[DW_OP_regx.0, 0x90, 0x01], &ctx).unwrap(),
            Location::Register {
                register: Register(144)
            }
        );
    }

    #[test]
    fn register_opcode_must_terminate_the_expression() {
        let ctx = EvalContext::default();
        let err = eval(&[DW_OP_reg5.0, DW_OP_lit1.0], &ctx).unwrap_err();
        assert_eq!(err.kind(), "InvalidExpression");
    }

    #[test]
    fn frame_base_plus_offset_yields_an_address() {
        let ctx = EvalContext {
            frame_base: Some(0x7fff_0000),
            ..EvalContext::default()
        };
        // DW_OP_fbreg 16
        let expr = [DW_OP_fbreg.0, 0x10];
        assert_eq!(
            eval(&expr, &ctx).unwrap(),
            Location::Address {
                address: 0x7fff_0010
            }
        );
        // Negative offsets too: DW_OP_fbreg -8.
        let expr = [DW_OP_fbreg.0, 0x78];
        assert_eq!(
            eval(&expr, &ctx).unwrap(),
            Location::Address {
                address: 0x7ffe_fff8
            }
        );
    }

    #[test]
    fn frame_base_unavailable_is_unsupported_not_an_error() {
        let ctx = EvalContext::default();
        match eval(&[DW_OP_fbreg.0, 0x10], &ctx).unwrap() {
            Location::Unsupported { .. } => {}
            other => panic!("expected unsupported, got {:?}", other),
        }
    }

    #[test]
    fn arithmetic_on_the_stack() {
        let ctx = EvalContext::default();
        // 7 * 6 + 2 = 44
        let expr = [DW_OP_lit7.0, DW_OP_lit6.0, DW_OP_mul.0, DW_OP_lit2.0, DW_OP_plus.0];
        assert_eq!(eval(&expr, &ctx).unwrap(), Location::Address { address: 44 });
        // Signed division: -8 / 2 = -4, surfaced via stack_value.
        let expr = [
            DW_OP_const1s.0,
            0xf8,
            DW_OP_lit2.0,
            DW_OP_div.0,
            DW_OP_stack_value.0,
        ];
        assert_eq!(
            eval(&expr, &ctx).unwrap(),
            Location::Value {
                value: (-4i64) as u64
            }
        );
    }

    #[test]
    fn division_by_zero_is_invalid() {
        let ctx = EvalContext::default();
        let expr = [DW_OP_lit1.0, DW_OP_lit0.0, DW_OP_div.0];
        assert_eq!(eval(&expr, &ctx).unwrap_err().kind(), "InvalidExpression");
        let expr = [DW_OP_lit1.0, DW_OP_lit0.0, DW_OP_mod.0];
        assert_eq!(eval(&expr, &ctx).unwrap_err().kind(), "InvalidExpression");
    }

    #[test]
    fn stack_underflow_is_invalid() {
        let ctx = EvalContext::default();
        assert_eq!(
            eval(&[DW_OP_plus.0], &ctx).unwrap_err().kind(),
            "InvalidExpression"
        );
    }

    #[test]
    fn unknown_opcode_is_unsupported() {
        let ctx = EvalContext::default();
        // 0xab is unassigned in DWARF 5.
        match eval(&[DW_OP_lit0.0, 0xab], &ctx).unwrap_err() {
            Error::UnsupportedOpcode { opcode, offset } => {
                assert_eq!(opcode, 0xab);
                assert_eq!(offset, 1);
            }
            other => panic!("expected UnsupportedOpcode, got {:?}", other),
        }
    }

    #[test]
    fn empty_expression_is_optimized_out() {
        let ctx = EvalContext::default();
        assert_eq!(eval(&[], &ctx).unwrap(), Location::OptimizedOut);
    }

    #[test]
    fn composite_pieces() {
        let ctx = EvalContext::default();
        // reg3 piece 4, addr 0x1000 piece 4.
        let expr = [
            DW_OP_reg3.0,
            DW_OP_piece.0,
            0x04,
            DW_OP_addr.0,
            0x00,
            0x10,
            0x00,
            0x00,
            0x00,
            0x00,
            0x00,
            0x00,
            DW_OP_piece.0,
            0x04,
        ];
        match eval(&expr, &ctx).unwrap() {
            Location::Composite { pieces } => {
                assert_eq!(pieces.len(), 2);
                assert_eq!(
                    pieces[0],
                    Piece {
                        location: Location::Register {
                            register: Register(3)
                        },
                        byte_size: 4
                    }
                );
                assert_eq!(
                    pieces[1],
                    Piece {
                        location: Location::Address { address: 0x1000 },
                        byte_size: 4
                    }
                );
            }
            other => panic!("expected composite, got {:?}", other),
        }
    }

    #[test]
    fn branching_respects_bounds_and_budget() {
        let ctx = EvalContext::default();
        // DW_OP_skip -5: jumps before the expression start.
        let expr = [DW_OP_skip.0, 0xfb, 0xff];
        assert_eq!(eval(&expr, &ctx).unwrap_err().kind(), "InvalidExpression");
        // DW_OP_skip -3: a tight infinite loop, stopped by the step budget.
        let expr = [DW_OP_skip.0, 0xfd, 0xff];
        assert_eq!(eval(&expr, &ctx).unwrap_err().kind(), "InvalidExpression");
        // A forward branch that skips a trap opcode.
        let expr = [DW_OP_lit1.0, DW_OP_bra.0, 0x01, 0x00, 0xab, DW_OP_lit7.0];
        assert_eq!(eval(&expr, &ctx).unwrap(), Location::Address { address: 7 });
    }

    #[test]
    fn implicit_value_and_stack_value() {
        let ctx = EvalContext::default();
        let expr = [DW_OP_implicit_value.0, 0x02, 0xaa, 0xbb];
        assert_eq!(
            eval(&expr, &ctx).unwrap(),
            Location::ImplicitValue {
                bytes: &[0xaa, 0xbb]
            }
        );
    }

    #[test]
    fn register_hints_feed_breg() {
        let mut ctx = EvalContext::default();
        ctx.registers.insert(7, 0x2000);
        // DW_OP_breg7 8
        let expr = [DW_OP_breg0.0 + 7, 0x08];
        assert_eq!(
            eval(&expr, &ctx).unwrap(),
            Location::Address { address: 0x2008 }
        );
    }

    #[test]
    fn trivial_expression_detection() {
        assert_eq!(operation_count(&[DW_OP_reg5.0], LE, 8).unwrap(), 1);
        let addr = [DW_OP_addr.0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(operation_count(&addr, LE, 8).unwrap(), 1);
        let fbreg_deref = [DW_OP_fbreg.0, 0x10, DW_OP_deref.0];
        assert_eq!(operation_count(&fbreg_deref, LE, 8).unwrap(), 2);
    }
}
