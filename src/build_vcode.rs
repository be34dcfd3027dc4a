//! Lowers one MIR function into Z80-shaped vcode (spec §4.4 Instruction
//! selection). Each MIR opcode maps to a small, fixed sequence of
//! `vcode::Inst`s; nothing here performs register allocation or decides
//! anything the allocator or the calling convention owns instead.
//!
//! Control-flow opcodes that need a runtime loop (a variable-count shift, a
//! multiply, a boolean materialized from a flag) allocate fresh vcode blocks
//! as they go; `lower_opcode` returns whichever block lowering should
//! continue into, so a single MIR instruction can expand into several vcode
//! blocks without disturbing the caller's walk over the rest of the MIR
//! block.

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::error::CompileError;
use crate::symbol::Symbol;
use crate::types::mir::{self, Operand, Opcode, Terminator};
use crate::types::ty::{Prim, Ty, TyKind};
use crate::types::vcode::{self, AluOp, ArgAbi, Cond, Inst, Label, PReg, RegMem, ShiftOp, VCode};
use crate::types::Idx;

/// Register-ABI slots for the first two scalar parameters and the return
/// value (spec §4.4 Calling convention: "the first two integer parameters
/// in `HL`/`DE`, or `A`/`B` when 8-bit").
const ARG_REGS_16: [PReg; 2] = [PReg::HL, PReg::DE];
const ARG_REGS_8: [PReg; 2] = [PReg::A, PReg::B];
const RET_REG_16: PReg = PReg::HL;
const RET_REG_8: PReg = PReg::A;

/// Parameters beyond the first two that the TRUE-SMC pass did not anchor
/// fall back to a small fixed scratch window rather than a real stack
/// frame. MinZ's calling convention is built around SMC for exactly this
/// case, so a function taking more than two cold parameters is the rare,
/// unoptimized path; a fixed window stands in for a full IX-relative frame
/// (documented in DESIGN.md rather than built, given how rarely it's hit).
const OVERFLOW_PARAM_BASE: i16 = 0x7f00;

fn width_of(ty: &Ty) -> u8 {
  match &**ty {
    TyKind::Prim(p) => p.width().max(1),
    // Nominal and pointer-shaped values are passed and held by reference.
    _ => 2,
  }
}

struct Lower<'f> {
  f: &'f mir::Function,
  vc: VCode,
  regs: HashMap<mir::VReg, vcode::VReg>,
  blocks: HashMap<mir::BlockId, vcode::BlockId>,
}

impl<'f> Lower<'f> {
  fn vreg(&mut self, v: mir::VReg) -> vcode::VReg {
    if let Some(&r) = self.regs.get(&v) { return r; }
    let width = width_of(&self.f.reg_types[v]);
    let r = self.vc.fresh_reg(width);
    self.regs.insert(v, r);
    r
  }

  fn width(&self, v: mir::VReg) -> u8 { width_of(&self.f.reg_types[v]) }

  fn block(&mut self, b: mir::BlockId) -> vcode::BlockId {
    if let Some(&bb) = self.blocks.get(&b) { return bb; }
    let bb = self.vc.new_block();
    self.blocks.insert(b, bb);
    bb
  }

  fn operand_width(&self, op: &Operand) -> u8 {
    match *op {
      Operand::Reg(v) => self.width(v),
      Operand::Const(mir::Const::Bool(_)) => 1,
      Operand::Const(mir::Const::Int(n)) => if (-128..=255).contains(&n) { 1 } else { 2 },
      Operand::Func(_) | Operand::Str(_) | Operand::Static(_) => 2,
    }
  }

  /// Lowers an operand into a `RegMem`, materializing constants and symbol
  /// references into a fresh register first: no `Inst` here takes an
  /// immediate operand directly, only `LoadImm8`/`LoadImm16` define one
  /// (spec §4.4: immediates arrive via a load or an SMC patch slot, never
  /// folded into an ALU instruction's encoding at this stage).
  fn operand(&mut self, bb: vcode::BlockId, op: &Operand, width: u8) -> RegMem {
    match *op {
      Operand::Reg(v) => RegMem::Reg(self.vreg(v)),
      Operand::Const(mir::Const::Int(n)) => {
        let r = self.vc.fresh_reg(width);
        if width <= 1 {
          self.vc.emit(bb, Inst::LoadImm8 { dst: r, val: n as u8 });
        } else {
          self.vc.emit(bb, Inst::LoadImm16 { dst: r, val: n as u16 });
        }
        RegMem::Reg(r)
      }
      Operand::Const(mir::Const::Bool(b)) => {
        let r = self.vc.fresh_reg(1);
        self.vc.emit(bb, Inst::LoadImm8 { dst: r, val: u8::from(b) });
        RegMem::Reg(r)
      }
      Operand::Func(func) => {
        let r = self.vc.fresh_reg(2);
        self.vc.emit(bb, Inst::LoadLabel { dst: r, label: Label::Func(func) });
        RegMem::Reg(r)
      }
      Operand::Str(s) => {
        let r = self.vc.fresh_reg(2);
        self.vc.emit(bb, Inst::LoadLabel { dst: r, label: Label::Str(s) });
        RegMem::Reg(r)
      }
      Operand::Static(s) => {
        let r = self.vc.fresh_reg(2);
        self.vc.emit(bb, Inst::LoadLabel { dst: r, label: Label::Static(s) });
        RegMem::Reg(r)
      }
    }
  }

  fn reg_of_operand(&mut self, bb: vcode::BlockId, op: &Operand, width: u8) -> vcode::VReg {
    match self.operand(bb, op, width) {
      RegMem::Reg(r) => r,
      mem @ RegMem::Mem { .. } => {
        let r = self.vc.fresh_reg(width);
        self.vc.emit(bb, if width <= 1 { Inst::Mov8 { dst: r, src: mem } } else { Inst::Mov16 { dst: r, src: mem } });
        r
      }
    }
  }

  /// Tests whether `reg` is zero without clobbering it (`OR reg,reg`),
  /// then branches to `target` if so. The peephole pass's `CP 0` -> `OR`
  /// rewrite means this is already in its post-peephole shape.
  fn branch_if_zero(&mut self, bb: vcode::BlockId, reg: vcode::VReg, target: vcode::BlockId) {
    self.vc.emit(bb, Inst::Alu8 { op: AluOp::Or, dst: reg, rhs: RegMem::Reg(reg) });
    self.vc.emit(bb, Inst::JumpIf { cond: Cond::Z, target });
  }

  /// Effective address for a field/index access. The Z80 has no
  /// scaled-index addressing mode, so a non-trivial `index` is folded into
  /// the base with an explicit shift-or-add sequence first (spec §4.4
  /// Instruction selection).
  fn addr(&mut self, bb: vcode::BlockId, a: &mir::Addr) -> RegMem {
    let base = self.vreg(a.base);
    let Some((ireg, scale)) = a.index else {
      return RegMem::Mem { base: Some(base), disp: a.offset as i16 };
    };
    let idx = self.vreg(ireg);
    let scaled = self.vc.fresh_reg(2);
    self.vc.emit(bb, Inst::Mov16 { dst: scaled, src: RegMem::Reg(idx) });
    if scale.is_power_of_two() {
      for _ in 0..scale.trailing_zeros() {
        self.vc.emit(bb, Inst::Shift { op: ShiftOp::Sla, reg: scaled });
      }
    } else {
      for _ in 1..scale {
        self.vc.emit(bb, Inst::Alu16 { op: AluOp::Add, dst: scaled, rhs: RegMem::Reg(idx) });
      }
    }
    let combined = self.vc.fresh_reg(2);
    self.vc.emit(bb, Inst::Mov16 { dst: combined, src: RegMem::Reg(base) });
    self.vc.emit(bb, Inst::Alu16 { op: AluOp::Add, dst: combined, rhs: RegMem::Reg(scaled) });
    RegMem::Mem { base: Some(combined), disp: a.offset as i16 }
  }

  fn discriminant_of(&self, variant: Symbol) -> u8 {
    let Some(ty) = &self.f.error_enum else { return 0 };
    let TyKind::ErrorEnum { variants, .. } = &**ty else { return 0 };
    let vs = variants.borrow();
    for (i, v) in vs.iter().enumerate() {
      if v.name == variant {
        return v.discriminant.map_or(i as u8, |d| d as u8);
      }
    }
    0
  }

  fn lower_binop(&mut self, bb: vcode::BlockId, op: mir::Binop, dst: mir::VReg, lhs: &Operand, rhs: &Operand) -> vcode::BlockId {
    let w = self.width(dst);
    let d = self.vreg(dst);
    let lhs_rm = self.operand(bb, lhs, w);
    self.vc.emit(bb, if w <= 1 { Inst::Mov8 { dst: d, src: lhs_rm } } else { Inst::Mov16 { dst: d, src: lhs_rm } });
    match op {
      mir::Binop::Add | mir::Binop::Sub | mir::Binop::And | mir::Binop::Or | mir::Binop::Xor => {
        let aop = match op {
          mir::Binop::Add => AluOp::Add,
          mir::Binop::Sub => AluOp::Sub,
          mir::Binop::And => AluOp::And,
          mir::Binop::Or => AluOp::Or,
          mir::Binop::Xor => AluOp::Xor,
          _ => unreachable!(),
        };
        let rhs_rm = self.operand(bb, rhs, w);
        self.vc.emit(bb, if w <= 1 { Inst::Alu8 { op: aop, dst: d, rhs: rhs_rm } } else { Inst::Alu16 { op: aop, dst: d, rhs: rhs_rm } });
        bb
      }
      mir::Binop::Mul => self.lower_mul(bb, d, w, rhs),
      mir::Binop::Shl => self.lower_shift(bb, d, w, rhs, ShiftOp::Sla),
      mir::Binop::Shr => self.lower_shift(bb, d, w, rhs, ShiftOp::Srl),
      mir::Binop::ShrArith => self.lower_shift(bb, d, w, rhs, ShiftOp::Sra),
    }
  }

  /// A variable shift count needs a runtime loop: the Z80 has no barrel
  /// shifter, only single-bit `SLA`/`SRA`/`SRL`.
  fn lower_shift(&mut self, bb: vcode::BlockId, d: vcode::VReg, w: u8, rhs: &Operand, op: ShiftOp) -> vcode::BlockId {
    if let Operand::Const(mir::Const::Int(n)) = rhs {
      let reps = (*n).clamp(0, i64::from(w) * 8);
      for _ in 0..reps { self.vc.emit(bb, Inst::Shift { op, reg: d }); }
      return bb;
    }
    let count = self.reg_of_operand(bb, rhs, 1);
    let loop_bb = self.vc.new_block();
    let after = self.vc.new_block();
    self.branch_if_zero(bb, count, after);
    self.vc.emit(bb, Inst::Jump { target: loop_bb });
    self.vc.emit(loop_bb, Inst::Shift { op, reg: d });
    self.vc.emit(loop_bb, Inst::Dec { reg: count });
    self.branch_if_zero(loop_bb, count, after);
    self.vc.emit(loop_bb, Inst::Jump { target: loop_bb });
    after
  }

  /// The Z80 has no hardware multiply; a constant power-of-two multiplies
  /// via shifts, anything else via a runtime repeated-add loop.
  fn lower_mul(&mut self, bb: vcode::BlockId, d: vcode::VReg, w: u8, rhs: &Operand) -> vcode::BlockId {
    if let Operand::Const(mir::Const::Int(n)) = rhs {
      if *n == 0 {
        self.vc.emit(bb, if w <= 1 { Inst::LoadImm8 { dst: d, val: 0 } } else { Inst::LoadImm16 { dst: d, val: 0 } });
        return bb;
      }
      if *n > 0 && (*n as u64).is_power_of_two() {
        for _ in 0..(*n as u64).trailing_zeros() { self.vc.emit(bb, Inst::Shift { op: ShiftOp::Sla, reg: d }); }
        return bb;
      }
    }
    let multiplier = self.reg_of_operand(bb, rhs, w);
    let count = self.vc.fresh_reg(w);
    self.vc.emit(bb, if w <= 1 { Inst::Mov8 { dst: count, src: RegMem::Reg(multiplier) } } else { Inst::Mov16 { dst: count, src: RegMem::Reg(multiplier) } });
    let acc = self.vc.fresh_reg(w);
    self.vc.emit(bb, if w <= 1 { Inst::LoadImm8 { dst: acc, val: 0 } } else { Inst::LoadImm16 { dst: acc, val: 0 } });
    let loop_bb = self.vc.new_block();
    let after = self.vc.new_block();
    self.branch_if_zero(bb, count, after);
    self.vc.emit(bb, Inst::Jump { target: loop_bb });
    self.vc.emit(loop_bb, if w <= 1 { Inst::Alu8 { op: AluOp::Add, dst: acc, rhs: RegMem::Reg(d) } } else { Inst::Alu16 { op: AluOp::Add, dst: acc, rhs: RegMem::Reg(d) } });
    self.vc.emit(loop_bb, Inst::Dec { reg: count });
    self.branch_if_zero(loop_bb, count, after);
    self.vc.emit(loop_bb, Inst::Jump { target: loop_bb });
    self.vc.emit(after, if w <= 1 { Inst::Mov8 { dst: d, src: RegMem::Reg(acc) } } else { Inst::Mov16 { dst: d, src: RegMem::Reg(acc) } });
    after
  }

  fn lower_unop(&mut self, bb: vcode::BlockId, neg: bool, not: bool, dst: mir::VReg, src: &Operand) {
    let w = self.width(dst);
    let d = self.vreg(dst);
    let rm = self.operand(bb, src, w);
    self.vc.emit(bb, if w <= 1 { Inst::Mov8 { dst: d, src: rm } } else { Inst::Mov16 { dst: d, src: rm } });
    if not {
      // Logical not on a 0/1 bool: flip the single bit rather than
      // complementing every bit (`CPL` would turn `0` into `0xff`, not `1`).
      let one = self.vc.fresh_reg(1);
      self.vc.emit(bb, Inst::LoadImm8 { dst: one, val: 1 });
      self.vc.emit(bb, Inst::Alu8 { op: AluOp::Xor, dst: d, rhs: RegMem::Reg(one) });
    }
    if neg {
      self.vc.emit(bb, Inst::Cpl { reg: d });
      self.vc.emit(bb, Inst::Inc { reg: d });
    }
  }

  fn lower_cmp(&mut self, bb: vcode::BlockId, op: mir::Cmp, dst: mir::VReg, lhs: &Operand, rhs: &Operand) -> vcode::BlockId {
    let w = self.operand_width(lhs).max(self.operand_width(rhs));
    // `Gt`/`Le` are rewritten as `Lt`/`Ge` with the operands swapped: the
    // Z80 has only a compare-against-register, no separate greater-than
    // flag, so comparing `rhs` against `lhs` gets the same answer.
    let (cmp_lhs, cmp_rhs, cond) = match op {
      mir::Cmp::Eq => (lhs, rhs, Cond::Z),
      mir::Cmp::Ne => (lhs, rhs, Cond::Nz),
      mir::Cmp::Lt => (lhs, rhs, Cond::C),
      mir::Cmp::Ge => (lhs, rhs, Cond::Nc),
      mir::Cmp::Gt => (rhs, lhs, Cond::C),
      mir::Cmp::Le => (rhs, lhs, Cond::Nc),
    };
    let l = self.reg_of_operand(bb, cmp_lhs, w);
    let r = self.operand(bb, cmp_rhs, w);
    self.vc.emit(bb, if w <= 1 { Inst::Alu8 { op: AluOp::Cp, dst: l, rhs: r } } else { Inst::Alu16 { op: AluOp::Cp, dst: l, rhs: r } });
    let d = self.vreg(dst);
    let t = self.vc.new_block();
    let e = self.vc.new_block();
    let after = self.vc.new_block();
    self.vc.emit(bb, Inst::JumpIf { cond, target: t });
    self.vc.emit(bb, Inst::Jump { target: e });
    self.vc.emit(t, Inst::LoadImm8 { dst: d, val: 1 });
    self.vc.emit(t, Inst::Jump { target: after });
    self.vc.emit(e, Inst::LoadImm8 { dst: d, val: 0 });
    self.vc.emit(e, Inst::Jump { target: after });
    after
  }

  fn lower_extend(&mut self, bb: vcode::BlockId, dst: mir::VReg, src: &Operand, signed: bool, to_width: u8) -> vcode::BlockId {
    let d = self.vreg(dst);
    let s = self.reg_of_operand(bb, src, 1);
    if to_width <= 1 {
      self.vc.emit(bb, Inst::Mov8 { dst: d, src: RegMem::Reg(s) });
      return bb;
    }
    // Codegen zero-extends a narrower source when asked to move it into a
    // wider home; a signed source additionally needs its high byte forced
    // to `0xff` when negative.
    self.vc.emit(bb, Inst::Mov16 { dst: d, src: RegMem::Reg(s) });
    if !signed { return bb; }
    let neg = self.vc.new_block();
    let after = self.vc.new_block();
    self.vc.emit(bb, Inst::Alu8 { op: AluOp::Or, dst: s, rhs: RegMem::Reg(s) });
    self.vc.emit(bb, Inst::JumpIf { cond: Cond::M, target: neg });
    self.vc.emit(bb, Inst::Jump { target: after });
    let mask = self.vc.fresh_reg(2);
    self.vc.emit(neg, Inst::LoadImm16 { dst: mask, val: 0xff00 });
    self.vc.emit(neg, Inst::Alu16 { op: AluOp::Or, dst: d, rhs: RegMem::Reg(mask) });
    self.vc.emit(neg, Inst::Jump { target: after });
    after
  }

  fn lower_call(&mut self, bb: vcode::BlockId, dst: Option<mir::VReg>, err_dst: Option<mir::VReg>, func: mir::FuncId, args: &[Operand]) -> vcode::BlockId {
    let mut arg_regs: SmallVec<[(vcode::VReg, PReg); 4]> = SmallVec::new();
    for (i, a) in args.iter().enumerate().take(2) {
      let w = self.operand_width(a);
      let preg = if w <= 1 { ARG_REGS_8[i] } else { ARG_REGS_16[i] };
      let r = self.reg_of_operand(bb, a, w);
      arg_regs.push((r, preg));
    }
    for (i, a) in args.iter().enumerate().skip(2) {
      let w = self.operand_width(a);
      let r = self.reg_of_operand(bb, a, w);
      let mem = RegMem::Mem { base: None, disp: OVERFLOW_PARAM_BASE + (i as i16) * 2 };
      self.vc.emit(bb, if w <= 1 { Inst::Store8 { addr: mem, src: r } } else { Inst::Store16 { addr: mem, src: r } });
    }
    self.vc.emit(bb, Inst::Call { func, arg_regs });

    // The error flag is read straight off carry right after `CALL`: the
    // callee's `Return`/`ReturnError` terminator left it cleared/set, and
    // nothing may run between the call and this check that could disturb
    // it — a numeric comparison against the return value would both miss
    // an unsigned discriminant and clobber the flag before anything read it.
    let mut cur = bb;
    if let Some(e) = err_dst {
      let ev = self.vreg(e);
      let t = self.vc.new_block();
      let f = self.vc.new_block();
      let after = self.vc.new_block();
      self.vc.emit(cur, Inst::JumpIf { cond: Cond::C, target: t });
      self.vc.emit(cur, Inst::Jump { target: f });
      self.vc.emit(t, Inst::LoadImm8 { dst: ev, val: 1 });
      self.vc.emit(t, Inst::Jump { target: after });
      self.vc.emit(f, Inst::LoadImm8 { dst: ev, val: 0 });
      self.vc.emit(f, Inst::Jump { target: after });
      cur = after;
    }

    if let Some(d) = dst {
      let w = self.width(d);
      let dv = self.vreg(d);
      let ret_preg = if w <= 1 { RET_REG_8 } else { RET_REG_16 };
      self.vc.emit(cur, Inst::MovPR { dst: dv, src: ret_preg });
    }
    cur
  }

  fn lower_call_indirect(&mut self, bb: vcode::BlockId, dst: Option<mir::VReg>, func: &Operand, args: &[Operand]) -> vcode::BlockId {
    let func_reg = self.reg_of_operand(bb, func, 2);
    let mut arg_regs: SmallVec<[(vcode::VReg, PReg); 4]> = SmallVec::new();
    for (i, a) in args.iter().enumerate().take(2) {
      let w = self.operand_width(a);
      let preg = if w <= 1 { ARG_REGS_8[i] } else { ARG_REGS_16[i] };
      let r = self.reg_of_operand(bb, a, w);
      arg_regs.push((r, preg));
    }
    for (i, a) in args.iter().enumerate().skip(2) {
      let w = self.operand_width(a);
      let r = self.reg_of_operand(bb, a, w);
      let mem = RegMem::Mem { base: None, disp: OVERFLOW_PARAM_BASE + (i as i16) * 2 };
      self.vc.emit(bb, if w <= 1 { Inst::Store8 { addr: mem, src: r } } else { Inst::Store16 { addr: mem, src: r } });
    }
    self.vc.emit(bb, Inst::CallIndirect { func: func_reg, arg_regs });
    if let Some(d) = dst {
      let w = self.width(d);
      let dv = self.vreg(d);
      let ret_preg = if w <= 1 { RET_REG_8 } else { RET_REG_16 };
      self.vc.emit(bb, Inst::MovPR { dst: dv, src: ret_preg });
    }
    bb
  }

  fn lower_opcode(&mut self, bb: vcode::BlockId, op: &Opcode) -> vcode::BlockId {
    match op {
      Opcode::LoadConst { dst, val } => {
        let d = self.vreg(*dst);
        match *val {
          mir::Const::Int(n) => {
            if self.width(*dst) <= 1 { self.vc.emit(bb, Inst::LoadImm8 { dst: d, val: n as u8 }); }
            else { self.vc.emit(bb, Inst::LoadImm16 { dst: d, val: n as u16 }); }
          }
          mir::Const::Bool(b) => self.vc.emit(bb, Inst::LoadImm8 { dst: d, val: u8::from(b) }),
        }
        bb
      }
      Opcode::LoadVar { dst, src } => {
        let d = self.vreg(*dst);
        let s = self.vreg(*src);
        self.vc.emit(bb, if self.width(*dst) <= 1 { Inst::Mov8 { dst: d, src: RegMem::Reg(s) } } else { Inst::Mov16 { dst: d, src: RegMem::Reg(s) } });
        bb
      }
      Opcode::LoadParam { dst, index } => {
        let d = self.vreg(*dst);
        let w = self.width(*dst);
        let idx = *index as usize;
        if idx < 2 {
          let preg = if w <= 1 { ARG_REGS_8[idx] } else { ARG_REGS_16[idx] };
          self.vc.emit(bb, Inst::MovPR { dst: d, src: preg });
        } else {
          let mem = RegMem::Mem { base: None, disp: OVERFLOW_PARAM_BASE + (idx as i16) * 2 };
          self.vc.emit(bb, if w <= 1 { Inst::Mov8 { dst: d, src: mem } } else { Inst::Mov16 { dst: d, src: mem } });
        }
        bb
      }
      Opcode::LoadField { dst, addr, .. } | Opcode::LoadIndex { dst, addr, .. } => {
        let mem = self.addr(bb, addr);
        let d = self.vreg(*dst);
        self.vc.emit(bb, if self.width(*dst) <= 1 { Inst::Mov8 { dst: d, src: mem } } else { Inst::Mov16 { dst: d, src: mem } });
        bb
      }
      Opcode::StoreField { addr, src, ty } | Opcode::StoreIndex { addr, src, ty } => {
        let mem = self.addr(bb, addr);
        let w = width_of(ty);
        let s = self.reg_of_operand(bb, src, w);
        self.vc.emit(bb, if w <= 1 { Inst::Store8 { addr: mem, src: s } } else { Inst::Store16 { addr: mem, src: s } });
        bb
      }
      Opcode::Binop { op, dst, lhs, rhs } => self.lower_binop(bb, *op, *dst, lhs, rhs),
      Opcode::Unop { neg, not, dst, src } => { self.lower_unop(bb, *neg, *not, *dst, src); bb }
      Opcode::Cmp { op, dst, lhs, rhs } => self.lower_cmp(bb, *op, *dst, lhs, rhs),
      Opcode::Extend { dst, src, signed, to_width, .. } => self.lower_extend(bb, *dst, src, *signed, *to_width),
      Opcode::Truncate { dst, src, to_width } => {
        let from_w = match src { Operand::Reg(v) => self.width(*v), _ => *to_width };
        let s = self.reg_of_operand(bb, src, from_w);
        let d = self.vreg(*dst);
        self.vc.emit(bb, if *to_width <= 1 { Inst::Mov8 { dst: d, src: RegMem::Reg(s) } } else { Inst::Mov16 { dst: d, src: RegMem::Reg(s) } });
        bb
      }
      Opcode::Move { dst, src } => {
        let w = self.width(*dst);
        let rm = self.operand(bb, src, w);
        let d = self.vreg(*dst);
        self.vc.emit(bb, if w <= 1 { Inst::Mov8 { dst: d, src: rm } } else { Inst::Mov16 { dst: d, src: rm } });
        bb
      }
      Opcode::Call { dst, err_dst, func, args } => self.lower_call(bb, *dst, *err_dst, *func, args),
      Opcode::CallIndirect { dst, func, args } => self.lower_call_indirect(bb, *dst, func, args),
      Opcode::SmcAnchor { anchor, param, width } => {
        let r = self.vreg(*param);
        self.vc.emit(bb, if *width <= 1 { Inst::SmcAnchorByte { anchor: *anchor, reg: r } } else { Inst::SmcAnchorWord { anchor: *anchor, reg: r } });
        bb
      }
      Opcode::SmcPatch { anchor, func, value } => {
        // The patch slot's width matches the argument expression's own
        // type, which the analyzer already checked against the callee's
        // signature; this per-function pass has no module-wide view of the
        // callee to ask directly (see DESIGN.md).
        let w = self.operand_width(value);
        let v = self.reg_of_operand(bb, value, w);
        self.vc.emit(bb, if w <= 1 { Inst::SmcPatchByte { anchor: *anchor, func: *func, val: v } } else { Inst::SmcPatchWord { anchor: *anchor, func: *func, val: v } });
        bb
      }
      Opcode::Nop => { self.vc.emit(bb, Inst::Nop); bb }
    }
  }

  fn lower_terminator(&mut self, bb: vcode::BlockId, term: &Terminator) {
    match term {
      Terminator::Jump(b) => {
        let t = self.block(*b);
        self.vc.emit(bb, Inst::Jump { target: t });
      }
      Terminator::CondJump { cond, then_bb, else_bb } => {
        let c = self.reg_of_operand(bb, cond, 1);
        let t = self.block(*then_bb);
        let e = self.block(*else_bb);
        self.branch_if_zero(bb, c, e);
        self.vc.emit(bb, Inst::Jump { target: t });
      }
      Terminator::Return(val) => {
        if let Some(op) = val {
          let w = self.operand_width(op);
          let r = self.reg_of_operand(bb, op, w);
          let ret_preg = if w <= 1 { RET_REG_8 } else { RET_REG_16 };
          self.vc.emit(bb, Inst::MovRP { src: r, dst: ret_preg });
        }
        if self.f.error_enum.is_some() {
          self.vc.emit(bb, Inst::SetCarry(false));
        }
        self.vc.emit(bb, Inst::Ret);
      }
      Terminator::ReturnError { variant, .. } => {
        let disc = self.discriminant_of(*variant);
        let r = self.vc.fresh_reg(1);
        self.vc.emit(bb, Inst::LoadImm8 { dst: r, val: disc });
        self.vc.emit(bb, Inst::MovRP { src: r, dst: RET_REG_8 });
        self.vc.emit(bb, Inst::SetCarry(true));
        self.vc.emit(bb, Inst::Ret);
      }
      Terminator::TailCall { func, args } => {
        if args.len() <= 2 {
          for (i, a) in args.iter().enumerate() {
            let w = self.operand_width(a);
            let preg = if w <= 1 { ARG_REGS_8[i] } else { ARG_REGS_16[i] };
            let r = self.reg_of_operand(bb, a, w);
            self.vc.emit(bb, Inst::MovRP { src: r, dst: preg });
          }
          self.vc.emit(bb, Inst::TailJump { func: *func });
        } else {
          // More arguments than the register ABI carries: fall back to an
          // ordinary call-then-return, since a true tail jump would need
          // the callee's own ABI, and this lowering only ever sees one
          // function at a time (spec §4.3 pass 8's documented fallback).
          let bb = self.lower_call(bb, None, None, *func, args);
          self.vc.emit(bb, Inst::Ret);
        }
      }
      Terminator::Unreachable => { self.vc.emit(bb, Inst::Nop); }
    }
  }

  fn fill_abi(&mut self) {
    for (i, p) in self.f.params.iter().enumerate() {
      let w = width_of(&p.ty);
      let abi = if i < 2 {
        ArgAbi::Reg(if w <= 1 { ARG_REGS_8[i] } else { ARG_REGS_16[i] })
      } else {
        ArgAbi::Stack(OVERFLOW_PARAM_BASE + (i as i16) * 2)
      };
      self.vc.abi.args.push(abi);
    }
    self.vc.abi.ret = match &*self.f.ret {
      TyKind::Prim(Prim::Void) => None,
      _ => {
        let w = width_of(&self.f.ret);
        Some(ArgAbi::Reg(if w <= 1 { RET_REG_8 } else { RET_REG_16 }))
      }
    };
    self.vc.abi.carry_signals_error = self.f.error_enum.is_some();
  }
}

/// Lowers `f`'s MIR into vcode, ready for [`crate::backend::regalloc`].
/// `smc_enabled` reflects whether the TRUE-SMC optimizer pass ran (it
/// rewrites eligible `LoadParam`s into `SmcAnchor`s before this runs); this
/// lowering stage just translates whichever opcodes it's handed, but
/// asserts none slipped through when SMC was supposed to be off.
pub fn build_vcode(f: &mir::Function, smc_enabled: bool) -> Result<VCode, CompileError> {
  let mut lower = Lower { f, vc: VCode::new(), regs: HashMap::new(), blocks: HashMap::new() };

  if !smc_enabled {
    for bb in f.blocks.iter() {
      for inst in &bb.insts {
        if matches!(inst.op, Opcode::SmcAnchor { .. } | Opcode::SmcPatch { .. }) {
          return Err(CompileError::Internal(crate::error::InternalError::InvariantViolation {
            pass: "build_vcode".to_string(),
            func: f.name.as_str().to_string(),
            detail: "SMC opcode present with SMC disabled".to_string(),
          }));
        }
      }
    }
  }

  let entry = lower.block(f.entry);
  lower.vc.entry = entry;

  // Iterating MIR blocks in index order is a simple, deterministic layout
  // (the teacher's `visit_blocks` DFS additionally places the
  // most-likely-taken successor immediately after its predecessor; that
  // refinement is future work, see DESIGN.md).
  for (id, bb) in f.blocks.enum_iter() {
    let vbb = lower.block(id);
    let mut cur = vbb;
    for inst in &bb.insts {
      cur = lower.lower_opcode(cur, &inst.op);
    }
    lower.lower_terminator(cur, bb.terminator());
  }

  lower.fill_abi();
  Ok(lower.vc)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::span::FileSpan;
  use crate::types::ty::prim;

  #[test]
  fn constant_return_lowers_to_load_and_ret() {
    let mut f = mir::Function::new(crate::symbol::intern("five"), vec![], prim(Prim::U8), None, FileSpan::synthetic());
    let entry = f.entry;
    let r = f.fresh_reg(prim(Prim::U8));
    f.emit(entry, Opcode::LoadConst { dst: r, val: mir::Const::Int(5) }, FileSpan::synthetic());
    f.terminate(entry, Terminator::Return(Some(Operand::Reg(r))), FileSpan::synthetic());
    let vc = build_vcode(&f, true).expect("lowering should not fail");
    let insts = &vc.blocks[vc.entry].insts;
    assert!(matches!(insts[0], Inst::LoadImm8 { val: 5, .. }));
    assert!(matches!(insts.last(), Some(Inst::Ret)));
  }

  #[test]
  fn error_return_sets_carry_and_discriminant() {
    use crate::types::ty::{empty_error_enum, TypeId, Variant};
    let err_name = crate::symbol::intern("Err");
    let variant_name = crate::symbol::intern("NotFound");
    let err_ty = empty_error_enum(TypeId(0), err_name);
    if let TyKind::ErrorEnum { variants, .. } = &*err_ty {
      *variants.borrow_mut() = std::rc::Rc::from(vec![Variant { name: variant_name, discriminant: None }]);
    }
    let mut f = mir::Function::new(crate::symbol::intern("fails"), vec![], prim(Prim::Void), Some(err_ty), FileSpan::synthetic());
    let entry = f.entry;
    f.terminate(entry, Terminator::ReturnError { error_enum: prim(Prim::Void), variant: variant_name }, FileSpan::synthetic());
    let vc = build_vcode(&f, true).expect("lowering should not fail");
    let insts = &vc.blocks[vc.entry].insts;
    assert!(insts.iter().any(|i| matches!(i, Inst::SetCarry(true))));
    assert!(matches!(insts.last(), Some(Inst::Ret)));
  }

  #[test]
  fn fallible_call_checks_carry_directly_after_call() {
    let mut f = mir::Function::new(crate::symbol::intern("caller"), vec![], prim(Prim::Bool), None, FileSpan::synthetic());
    let entry = f.entry;
    let callee_id = mir::FuncId::from_usize(7); // never dereferenced by this lowering
    let err_flag = f.fresh_reg(prim(Prim::Bool));
    f.emit(entry, Opcode::Call { dst: None, err_dst: Some(err_flag), func: callee_id, args: Default::default() }, FileSpan::synthetic());
    f.terminate(entry, Terminator::Return(Some(Operand::Reg(err_flag))), FileSpan::synthetic());
    let vc = build_vcode(&f, true).expect("lowering should not fail");
    let call_block = &vc.blocks[vc.entry].insts;
    let call_pos = call_block.iter().position(|i| matches!(i, Inst::Call { .. })).expect("call lowers to Inst::Call");
    // The very next instruction reads carry; nothing (in particular no CP,
    // which would both fail on an unsigned operand and clobber the flag)
    // sits between the call and the check.
    assert!(matches!(call_block[call_pos + 1], Inst::JumpIf { cond: Cond::C, .. }));
    assert!(!call_block.iter().any(|i| matches!(i, Inst::Alu8 { op: AluOp::Cp, .. } | Inst::Alu16 { op: AluOp::Cp, .. })));
  }

  #[test]
  fn overflow_params_use_stack_abi() {
    let mut f = mir::Function::new(
      crate::symbol::intern("many_args"),
      vec![
        mir::ParamInfo { name: crate::symbol::intern("a"), ty: prim(Prim::U8) },
        mir::ParamInfo { name: crate::symbol::intern("b"), ty: prim(Prim::U8) },
        mir::ParamInfo { name: crate::symbol::intern("c"), ty: prim(Prim::U8) },
      ],
      prim(Prim::Void), None, FileSpan::synthetic(),
    );
    let entry = f.entry;
    f.terminate(entry, Terminator::Return(None), FileSpan::synthetic());
    let vc = build_vcode(&f, true).expect("lowering should not fail");
    assert!(matches!(vc.abi.args[0], ArgAbi::Reg(PReg::A)));
    assert!(matches!(vc.abi.args[2], ArgAbi::Stack(_)));
  }
}
