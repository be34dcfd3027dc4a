//! The Z80 backend's pre-register-allocation representation (spec §5).
//!
//! `VCode` sits between MIR and the final assembly text: its instructions
//! are already Z80-shaped (one `Inst` roughly corresponds to one mnemonic),
//! but they still reference virtual registers rather than `PReg`s. The
//! hierarchical allocator (spec §5 Register allocation) rewrites `VReg`s to
//! `PReg`s or stack slots in place; nothing about the instruction stream's
//! shape changes afterward, only what a `VReg` resolves to.

use smallvec::SmallVec;
use crate::mk_idx;
use crate::types::mir::FuncId;
use crate::types::{Idx, IdxVec};

mk_idx! { pub struct VReg; }
mk_idx! { pub struct BlockId; }
mk_idx! { pub struct InstId; }
/// A spill slot in the current function's stack frame, assigned by the
/// allocator's third tier (spec §5: "stack-frame spill as the final
/// fallback").
mk_idx! { pub struct SpillId; }

/// The eight Z80 single registers plus the three 16-bit register pairs used
/// as allocation units, plus the shadow bank (spec §5: "a shadow register
/// bank reachable via `EXX`/`EX AF,AF'`, used as the allocator's second
/// tier before falling back to the stack").
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum PReg {
  A, B, C, D, E, H, L,
  BC, DE, HL,
  IX, IY,
  ShadowBC, ShadowDE, ShadowHL, ShadowAF,
}

impl PReg {
  #[must_use] pub fn is_shadow(self) -> bool {
    matches!(self, PReg::ShadowBC | PReg::ShadowDE | PReg::ShadowHL | PReg::ShadowAF)
  }

  #[must_use] pub fn is_pair(self) -> bool {
    matches!(self, PReg::BC | PReg::DE | PReg::HL | PReg::IX | PReg::IY |
      PReg::ShadowBC | PReg::ShadowDE | PReg::ShadowHL | PReg::ShadowAF)
  }
}

/// Where a `VReg` ended up after allocation. Produced once per function by
/// the allocator and consulted by instruction emission; never mutated
/// afterward (spec §5 Invariants: "an allocation, once assigned, does not
/// change within the function it was computed for").
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Allocation {
  Reg(PReg),
  Spill(SpillId),
  /// A named SMC patch slot: the value lives nowhere except baked into a
  /// later instruction's immediate operand (spec §5.2 TRUE SMC).
  SmcSlot(crate::types::mir::AnchorId),
}

/// A location an instruction reads from or writes to, before allocation
/// has run. After allocation each `VReg` resolves through the function's
/// `Allocations` table to one of these at emission time.
#[derive(Clone, Copy, Debug)]
pub enum RegMem {
  Reg(VReg),
  /// `(ix+d)`-style indexed memory access, or an absolute address when
  /// `base` is `None`.
  Mem { base: Option<VReg>, disp: i16 },
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AluOp { Add, Adc, Sub, Sbc, And, Or, Xor, Cp }

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ShiftOp { Sla, Sra, Srl, Rl, Rr, Rlc, Rrc }

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Cond { Z, Nz, C, Nc, Po, Pe, P, M }

/// One Z80-shaped virtual instruction. Most variants correspond to a single
/// mnemonic; the remainder (`SmcPatchByte`/`SmcPatchWord`, `TailJump`) are
/// the Z80-specific constructs the spec calls out by name.
/// A symbolic address referenced by a `LoadLabel` instruction: resolved to
/// an actual address (or, for strings, a data-section label) only at
/// assembly-text emission time.
#[derive(Clone, Copy, Debug)]
pub enum Label {
  Func(FuncId),
  Str(crate::types::mir::StrId),
  Static(crate::types::mir::StaticId),
}

#[derive(Clone, Debug)]
pub enum Inst {
  LoadImm8 { dst: VReg, val: u8 },
  LoadImm16 { dst: VReg, val: u16 },
  /// Loads the address of a function, string constant, or static into
  /// `dst`, e.g. a lambda-lifted function used as a first-class value or a
  /// string literal's data pointer.
  LoadLabel { dst: VReg, label: Label },
  Mov8 { dst: VReg, src: RegMem },
  Mov16 { dst: VReg, src: RegMem },
  /// Binds `dst` to the value already sitting in the fixed physical
  /// register `src` at function entry, per the calling convention (spec
  /// §4.4 Calling convention). Emitted once per register-passed parameter;
  /// codegen emits the move regardless of where the allocator later homes
  /// `dst`, so it is correct even when `dst` spills.
  MovPR { dst: VReg, src: PReg },
  /// The mirror of `MovPR`: moves `src` into the fixed physical register
  /// `dst` immediately before a `RET`, per the calling convention's return
  /// value placement (`A` for 8-bit, `HL` for 16-bit).
  MovRP { src: VReg, dst: PReg },
  Store8 { addr: RegMem, src: VReg },
  Store16 { addr: RegMem, src: VReg },
  Alu8 { op: AluOp, dst: VReg, rhs: RegMem },
  Alu16 { op: AluOp, dst: VReg, rhs: RegMem },
  Shift { op: ShiftOp, reg: VReg },
  Inc { reg: VReg },
  Dec { reg: VReg },
  Cpl { reg: VReg },
  Jump { target: BlockId },
  JumpIf { cond: Cond, target: BlockId },
  /// DJNZ-style counted loop back-edge, emitted by the iterator-chain
  /// fusion's small-array fast path (spec §4.2 Iterator chains).
  Djnz { counter: VReg, target: BlockId },
  Call { func: FuncId, arg_regs: SmallVec<[(VReg, PReg); 4]> },
  /// A call through a value (a lambda or interface method not resolved to a
  /// direct dispatch at selection time).
  CallIndirect { func: VReg, arg_regs: SmallVec<[(VReg, PReg); 4]> },
  Ret,
  /// Tail-call lowering: a jump to the callee's entry with the stack frame
  /// already torn down, rather than a `CALL` (spec §4.3 pass 8, Glossary
  /// "Tail call").
  TailJump { func: FuncId },
  /// Declares the address of a patchable immediate operand; the assembly
  /// emitter turns this into a named `EQU` label at the byte (or word)
  /// immediately following it (spec §5.2, Glossary "SMC Anchor").
  SmcAnchorByte { anchor: crate::types::mir::AnchorId, reg: VReg },
  SmcAnchorWord { anchor: crate::types::mir::AnchorId, reg: VReg },
  /// Write an immediate directly into a callee's anchor before the `CALL`
  /// that follows it, instead of loading an argument register.
  SmcPatchByte { anchor: crate::types::mir::AnchorId, func: FuncId, val: VReg },
  SmcPatchWord { anchor: crate::types::mir::AnchorId, func: FuncId, val: VReg },
  /// Sets or clears the carry flag to signal success/failure across a
  /// `?`-propagating call boundary (spec §4.2 Error propagation, §5.3
  /// calling convention).
  SetCarry(bool),
  Nop,
}

#[derive(Clone, Debug, Default)]
pub struct VBlock {
  pub insts: Vec<Inst>,
}

/// How one parameter or return value crosses the Z80 calling-convention
/// boundary (spec §5.3): the first two scalar parameters in `HL`/`DE` (or
/// `A`/`B` when 8-bit), everything else as an SMC patch slot.
#[derive(Clone, Copy, Debug)]
pub enum ArgAbi {
  Reg(PReg),
  SmcSlot(crate::types::mir::AnchorId),
  /// A parameter beyond the register ABI and not SMC-anchored, passed
  /// through the fixed incoming-argument scratch window rather than a true
  /// stack frame (build_vcode's `OVERFLOW_PARAM_BASE` convention).
  Stack(i16),
}

#[derive(Clone, Debug, Default)]
pub struct ProcAbi {
  pub args: Vec<ArgAbi>,
  pub ret: Option<ArgAbi>,
  /// Set when the callee signals failure via the carry flag rather than a
  /// sentinel return value.
  pub carry_signals_error: bool,
}

/// One function's worth of vcode: its blocks, its register-type table (so
/// the allocator knows whether a `VReg` needs an 8-bit or paired home), and
/// its ABI.
#[derive(Clone, Debug, Default)]
pub struct VCode {
  pub blocks: IdxVec<BlockId, VBlock>,
  pub reg_widths: IdxVec<VReg, u8>,
  pub abi: ProcAbi,
  pub spill_count: u32,
  pub entry: BlockId,
}

impl VCode {
  #[must_use] pub fn new() -> Self {
    let mut blocks = IdxVec::new();
    let entry = blocks.push(VBlock::default());
    Self { blocks, reg_widths: IdxVec::new(), abi: ProcAbi::default(), spill_count: 0, entry }
  }

  pub fn fresh_reg(&mut self, width: u8) -> VReg { self.reg_widths.push(width) }
  pub fn new_block(&mut self) -> BlockId { self.blocks.push(VBlock::default()) }
  pub fn emit(&mut self, bb: BlockId, inst: Inst) { self.blocks[bb].insts.push(inst); }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fresh_registers_get_distinct_ids() {
    let mut vc = VCode::new();
    let a = vc.fresh_reg(1);
    let b = vc.fresh_reg(2);
    assert_ne!(a, b);
    assert_eq!(vc.reg_widths[a], 1);
    assert_eq!(vc.reg_widths[b], 2);
  }
}
