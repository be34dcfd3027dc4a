//! Machine-Independent Representation (spec §3, Glossary "MIR").
//!
//! A `Function` owns a flat, arena-indexed table of [`VReg`]s and
//! [`BasicBlock`]s (Design Notes: "MIR as arena" — no cyclic ownership, all
//! cross-references are indices). Every `VReg` is defined exactly once
//! (spec §3 Invariants); every `BasicBlock` ends in exactly one terminator.

use std::rc::Rc;
use smallvec::SmallVec;
use crate::mk_idx;
use crate::span::FileSpan;
use crate::symbol::Symbol;
use crate::types::ty::Ty;
use crate::types::{Idx, IdxVec};

mk_idx! { pub struct VReg; }
mk_idx! { pub struct BlockId; }
mk_idx! { pub struct FuncId; }
mk_idx! { pub struct StrId; }
mk_idx! { pub struct StaticId; }
/// Identifies one SMC anchor (patch slot) within its owning function
/// (spec §3: "SMC-Anchor slots are uniquely named per function and per
/// parameter").
mk_idx! { pub struct AnchorId; }

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Const {
  Int(i64),
  Bool(bool),
}

/// An operand to an [`Instruction`].
#[derive(Clone, Debug)]
pub enum Operand {
  Reg(VReg),
  Const(Const),
  /// A resolved reference to a function, string, or static-data symbol.
  /// Unresolved symbols are an error before MIR emission (spec §3
  /// Invariants): there is deliberately no "unresolved name" variant here.
  Func(FuncId),
  Str(StrId),
  Static(StaticId),
}

/// An address computation for a memory opcode: `base + offset` or
/// `base + index * scale` (spec §3).
#[derive(Clone, Debug)]
pub struct Addr {
  pub base: VReg,
  pub offset: i32,
  pub index: Option<(VReg, u32)>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Binop { Add, Sub, Mul, And, Or, Xor, Shl, Shr, ShrArith }

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Cmp { Eq, Ne, Lt, Le, Gt, Ge }

/// Instruction opcodes (spec §3: "data movement...arithmetic, bitwise,
/// comparison, control...and three distinguished opcodes for the Z80
/// feature set"). Every opcode that defines a value names its destination
/// `VReg` so liveness and DCE can find defs without a side table.
#[derive(Clone, Debug)]
pub enum Opcode {
  LoadConst { dst: VReg, val: Const },
  LoadVar { dst: VReg, src: VReg },
  LoadParam { dst: VReg, index: u32 },
  LoadField { dst: VReg, addr: Addr, ty: Ty },
  StoreField { addr: Addr, src: Operand, ty: Ty },
  LoadIndex { dst: VReg, addr: Addr, ty: Ty },
  StoreIndex { addr: Addr, src: Operand, ty: Ty },
  Binop { op: Binop, dst: VReg, lhs: Operand, rhs: Operand },
  Unop { neg: bool, not: bool, dst: VReg, src: Operand },
  Cmp { op: Cmp, dst: VReg, lhs: Operand, rhs: Operand },
  /// Widen or truncate between integer widths (spec §4.2: "mixed-width
  /// arithmetic requires explicit extension opcodes").
  Extend { dst: VReg, src: Operand, signed: bool, from_width: u8, to_width: u8 },
  Truncate { dst: VReg, src: Operand, to_width: u8 },
  Move { dst: VReg, src: Operand },
  /// `err_dst` is set only when the callee returns through an error enum
  /// (spec §4.2 Error propagation): a boolean materialized from the Z80
  /// carry flag the callee's `ReturnError`/`Return` terminator left behind,
  /// captured atomically as part of this same instruction rather than by a
  /// later numeric comparison, which could never observe an unsigned
  /// discriminant as negative and would clobber the flag before anything
  /// got to read it (spec §8 Scenario C).
  Call { dst: Option<VReg>, err_dst: Option<VReg>, func: FuncId, args: SmallVec<[Operand; 4]> },
  /// A call through a value rather than a statically resolved `FuncId`.
  /// Excluded from TRUE-SMC marking and inlining (spec §4.3 pass 7: "...and
  /// indirect calls are excluded in this spec").
  CallIndirect { dst: Option<VReg>, func: Operand, args: SmallVec<[Operand; 4]> },
  /// Declares a named patch slot for a parameter (spec §3, Glossary
  /// "SMC Anchor"). Emitted by the TRUE-SMC optimizer pass, not by the
  /// analyzer; `width` is 1 or 2 bytes on Z80.
  SmcAnchor { anchor: AnchorId, param: VReg, width: u8 },
  /// Write an immediate into a callee's patch slot, emitted at the call
  /// site in place of passing the corresponding argument normally.
  SmcPatch { anchor: AnchorId, func: FuncId, value: Operand },
  Nop,
}

#[derive(Clone, Debug)]
pub enum Terminator {
  Jump(BlockId),
  CondJump { cond: Operand, then_bb: BlockId, else_bb: BlockId },
  Return(Option<Operand>),
  /// Return carrying an error discriminant instead of a normal value
  /// (spec §4.2 Error propagation).
  ReturnError { error_enum: Ty, variant: Symbol },
  /// A call in terminator position whose result is returned immediately,
  /// identified by the tail-call optimizer pass (spec §4.3 pass 8).
  TailCall { func: FuncId, args: SmallVec<[Operand; 4]> },
  Unreachable,
}

#[derive(Clone, Debug)]
pub struct Instruction {
  pub op: Opcode,
  pub span: FileSpan,
}

#[derive(Clone, Debug, Default)]
pub struct BasicBlock {
  pub insts: Vec<Instruction>,
  pub term: Option<(Terminator, FileSpan)>,
}

impl BasicBlock {
  /// The single terminator, which must be the block's last instruction
  /// (spec §3 Invariants, Testable property 2). Panics if the block has not
  /// yet been terminated — every pass that produces blocks must call
  /// [`Function::terminate`] before handing the function onward.
  #[must_use] pub fn terminator(&self) -> &Terminator {
    &self.term.as_ref().expect("basic block missing terminator").0
  }
}

bitflags::bitflags! {
  /// Per-function attributes computed by the analyzer and refined by the
  /// optimizer (spec §3: "a set of attributes (SMC-eligible, recursive,
  /// pure, inline-candidate)").
  #[derive(Clone, Copy, PartialEq, Eq, Debug)]
  pub struct FuncAttrs: u8 {
    const RECURSIVE        = 1 << 0;
    const PURE              = 1 << 1;
    const INLINE_CANDIDATE  = 1 << 2;
    const SMC_ELIGIBLE      = 1 << 3;
    const ADDRESS_TAKEN     = 1 << 4;
    const INTERRUPT_HANDLER = 1 << 5;
  }
}

#[derive(Clone, Debug)]
pub struct ParamInfo {
  pub name: Symbol,
  pub ty: Ty,
}

/// Per-function optimizer statistics, reported after each pass (spec §4.3:
/// "Each pass records per-function statistics...for reporting").
#[derive(Clone, Copy, Default, Debug)]
pub struct PassStats {
  pub inserted: u32,
  pub removed: u32,
  pub spilled: u32,
  pub smc_slots: u32,
}

#[derive(Clone, Debug)]
pub struct Function {
  pub name: Symbol,
  pub params: Vec<ParamInfo>,
  pub ret: Ty,
  pub error_enum: Option<Ty>,
  pub attrs: FuncAttrs,
  pub reg_types: IdxVec<VReg, Ty>,
  pub blocks: IdxVec<BlockId, BasicBlock>,
  pub anchors: IdxVec<AnchorId, VReg>,
  pub entry: BlockId,
  pub span: FileSpan,
  pub stats: Vec<(&'static str, PassStats)>,
}

impl Function {
  #[must_use] pub fn new(name: Symbol, params: Vec<ParamInfo>, ret: Ty, error_enum: Option<Ty>, span: FileSpan) -> Self {
    let mut blocks = IdxVec::new();
    let entry = blocks.push(BasicBlock::default());
    Self {
      name, params, ret, error_enum, attrs: FuncAttrs::empty(),
      reg_types: IdxVec::new(), blocks, anchors: IdxVec::new(), entry, span,
      stats: Vec::new(),
    }
  }

  pub fn fresh_reg(&mut self, ty: Ty) -> VReg { self.reg_types.push(ty) }
  pub fn new_block(&mut self) -> BlockId { self.blocks.push(BasicBlock::default()) }

  pub fn emit(&mut self, bb: BlockId, op: Opcode, span: FileSpan) {
    self.blocks[bb].insts.push(Instruction { op, span });
  }

  pub fn terminate(&mut self, bb: BlockId, term: Terminator, span: FileSpan) {
    self.blocks[bb].term = Some((term, span));
  }

  /// Every virtual register this function's instructions define, in
  /// def-order. Used by the "single static assignment" invariant check in
  /// tests (spec §8 Testable property 1).
  pub fn defined_regs(&self) -> Vec<VReg> {
    let mut out = Vec::new();
    for bb in self.blocks.iter() {
      for inst in &bb.insts {
        if let Some(d) = opcode_def(&inst.op) { out.push(d); }
      }
    }
    out
  }
}

/// The register an opcode defines, if any. Centralized here so every pass
/// that needs def information (liveness, DCE, reg-pressure) agrees on it.
#[must_use] pub fn opcode_def(op: &Opcode) -> Option<VReg> {
  match *op {
    Opcode::LoadConst { dst, .. } | Opcode::LoadVar { dst, .. } | Opcode::LoadParam { dst, .. } |
    Opcode::LoadField { dst, .. } | Opcode::LoadIndex { dst, .. } | Opcode::Binop { dst, .. } |
    Opcode::Unop { dst, .. } | Opcode::Cmp { dst, .. } | Opcode::Extend { dst, .. } |
    Opcode::Truncate { dst, .. } | Opcode::Move { dst, .. } => Some(dst),
    Opcode::Call { dst, .. } | Opcode::CallIndirect { dst, .. } => dst,
    Opcode::StoreField { .. } | Opcode::StoreIndex { .. } | Opcode::SmcAnchor { .. } |
    Opcode::SmcPatch { .. } | Opcode::Nop => None,
  }
}

/// The registers an opcode uses (reads), in operand order. Used by
/// liveness/DCE and by the MIR reordering pass's dependency DAG.
pub fn opcode_uses(op: &Opcode, mut f: impl FnMut(VReg)) {
  fn operand(o: &Operand, f: &mut impl FnMut(VReg)) { if let Operand::Reg(r) = o { f(*r) } }
  fn addr(a: &Addr, f: &mut impl FnMut(VReg)) {
    f(a.base);
    if let Some((i, _)) = a.index { f(i) }
  }
  match op {
    Opcode::LoadVar { src, .. } => f(*src),
    Opcode::LoadField { addr: a, .. } | Opcode::LoadIndex { addr: a, .. } => addr(a, &mut f),
    Opcode::StoreField { addr: a, src, .. } | Opcode::StoreIndex { addr: a, src, .. } => {
      addr(a, &mut f);
      operand(src, &mut f);
    }
    Opcode::Binop { lhs, rhs, .. } | Opcode::Cmp { lhs, rhs, .. } => {
      operand(lhs, &mut f);
      operand(rhs, &mut f);
    }
    Opcode::Unop { src, .. } | Opcode::Extend { src, .. } | Opcode::Truncate { src, .. } |
    Opcode::Move { src, .. } => operand(src, &mut f),
    Opcode::Call { args, .. } | Opcode::CallIndirect { args, .. } => {
      if let Opcode::CallIndirect { func, .. } = op { operand(func, &mut f) }
      for a in args { operand(a, &mut f) }
    }
    Opcode::SmcAnchor { param, .. } => f(*param),
    Opcode::SmcPatch { value, .. } => operand(value, &mut f),
    Opcode::LoadConst { .. } | Opcode::LoadParam { .. } | Opcode::Nop => {}
  }
}

/// Whether an opcode has an observable side effect and so must not be
/// removed by dead-code elimination even if its result is unused (spec
/// §4.3 pass 3: "side-effect set: stores, calls unless marked pure, I/O").
#[must_use] pub fn has_side_effect(op: &Opcode, pure_funcs: &dyn Fn(FuncId) -> bool) -> bool {
  match op {
    Opcode::StoreField { .. } | Opcode::StoreIndex { .. } |
    Opcode::SmcAnchor { .. } | Opcode::SmcPatch { .. } => true,
    // `err_dst` is a second value this instruction defines that `opcode_def`
    // doesn't track (it only ever reports one); DCE must not drop the call
    // just because the ordinary return value looks unused while something
    // downstream still reads the error flag.
    Opcode::Call { func, err_dst, .. } => err_dst.is_some() || !pure_funcs(*func),
    Opcode::CallIndirect { .. } => true,
    _ => false,
  }
}

#[derive(Clone, Debug)]
pub struct StaticData {
  pub name: Symbol,
  pub bytes: Rc<[u8]>,
}

#[derive(Clone, Debug)]
pub struct ExternalDecl {
  pub name: Symbol,
  pub ty: Ty,
}

/// The whole compilation unit after semantic analysis (spec §3: "MIR
/// Module owns...").
#[derive(Clone, Debug, Default)]
pub struct Module {
  pub funcs: IdxVec<FuncId, Function>,
  pub strings: IdxVec<StrId, Rc<str>>,
  pub statics: IdxVec<StaticId, StaticData>,
  pub externals: Vec<ExternalDecl>,
  pub func_names: hashbrown::HashMap<Symbol, FuncId>,
}

impl Module {
  pub fn push_func(&mut self, f: Function) -> FuncId {
    let name = f.name;
    let id = self.funcs.push(f);
    self.func_names.insert(name, id);
    id
  }

  #[must_use] pub fn by_name(&self, name: Symbol) -> Option<FuncId> { self.func_names.get(&name).copied() }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::ty::{prim, Prim};

  #[test]
  fn every_block_has_exactly_one_terminator() {
    let mut f = Function::new(crate::symbol::intern("f"), vec![], prim(Prim::U8), None, FileSpan::synthetic());
    let entry = f.entry;
    let r = f.fresh_reg(prim(Prim::U8));
    f.emit(entry, Opcode::LoadConst { dst: r, val: Const::Int(5) }, FileSpan::synthetic());
    f.terminate(entry, Terminator::Return(Some(Operand::Reg(r))), FileSpan::synthetic());
    assert!(matches!(f.blocks[entry].terminator(), Terminator::Return(_)));
  }

  #[test]
  fn defined_regs_are_unique_def_sites() {
    let mut f = Function::new(crate::symbol::intern("g"), vec![], prim(Prim::U8), None, FileSpan::synthetic());
    let entry = f.entry;
    let a = f.fresh_reg(prim(Prim::U8));
    let b = f.fresh_reg(prim(Prim::U8));
    f.emit(entry, Opcode::LoadConst { dst: a, val: Const::Int(1) }, FileSpan::synthetic());
    f.emit(entry, Opcode::LoadConst { dst: b, val: Const::Int(2) }, FileSpan::synthetic());
    f.terminate(entry, Terminator::Return(None), FileSpan::synthetic());
    let defs = f.defined_regs();
    assert_eq!(defs.len(), 2);
    assert_ne!(defs[0], defs[1]);
  }
}
