//! Pass 5: MIR-level peephole (spec §4.3 step 5).
//!
//! Local, single-instruction rewrites: strength-reducing a power-of-two
//! multiply into a shift, folding an operation against its identity element
//! into a plain move, and collapsing a move whose source is itself a move
//! target. Distinct from [`crate::backend::peephole`], which rewrites
//! already-allocated Z80 instruction sequences instead of MIR.
//!
//! MIR has no dedicated increment/decrement/divide opcodes (everything
//! funnels through `Binop`), so the "inc/dec" and "divide-by-power-of-two"
//! rewrites the spec names for a conventional IR don't have a direct target
//! here; division isn't representable in MIR at all yet.

use hashbrown::HashMap;

use crate::types::mir::{Binop, Const, Module, Opcode, Operand, PassStats, VReg};

fn is_pow2(v: i64) -> Option<u32> {
  if v > 0 && (v & (v - 1)) == 0 { Some(v.trailing_zeros()) } else { None }
}

fn const_of(o: &Operand) -> Option<i64> {
  match o { Operand::Const(Const::Int(n)) => Some(*n), _ => None }
}

/// Rewrites one instruction in place, returning whether it changed.
fn simplify(op: &mut Opcode) -> bool {
  match op {
    Opcode::Binop { op: Binop::Mul, dst, lhs, rhs } => {
      if let Some(shift) = const_of(rhs).and_then(is_pow2) {
        let dst = *dst;
        let lhs = lhs.clone();
        *op = Opcode::Binop { op: Binop::Shl, dst, lhs, rhs: Operand::Const(Const::Int(shift as i64)) };
        return true;
      }
      if let Some(shift) = const_of(lhs).and_then(is_pow2) {
        let dst = *dst;
        let rhs = rhs.clone();
        *op = Opcode::Binop { op: Binop::Shl, dst, lhs: rhs, rhs: Operand::Const(Const::Int(shift as i64)) };
        return true;
      }
      false
    }
    // Right-identity: `x OP 0` (or `x << 0` / `x >> 0`) is just `x`. Only
    // the right operand is checked since MIR's binops aren't required to be
    // commutative at the instruction level (Sub, Shl, Shr aren't); `Add`/`Or`
    // commute but finding a left-hand zero too is a rarer pattern a forward
    // constant-propagation pass already mostly clears out.
    Opcode::Binop { op: bop, dst, lhs, rhs } if matches!(
      (&*bop, const_of(rhs)),
      (Binop::Add, Some(0)) | (Binop::Sub, Some(0)) | (Binop::Or, Some(0)) | (Binop::Xor, Some(0)) | (Binop::Shl, Some(0)) | (Binop::Shr, Some(0)) | (Binop::ShrArith, Some(0))
    ) => {
      let dst = *dst;
      let src = lhs.clone();
      *op = Opcode::Move { dst, src };
      true
    }
    _ => false,
  }
}

/// Copy propagation within a block: once `Move { dst, src: Reg(r) }` has run,
/// later instructions that use `dst` can use `r` directly, letting DCE (run
/// again in a later pipeline pass) remove the now-redundant move.
fn propagate_copies(insts: &mut [crate::types::mir::Instruction]) -> u32 {
  let mut alias: HashMap<VReg, VReg> = HashMap::new();
  let mut rewritten = 0;
  fn resolve(o: &mut Operand, alias: &HashMap<VReg, VReg>) -> bool {
    if let Operand::Reg(r) = o {
      if let Some(&root) = alias.get(r) {
        *r = root;
        return true;
      }
    }
    false
  }
  for inst in insts.iter_mut() {
    match &mut inst.op {
      Opcode::Move { dst, src } => {
        if resolve(src, &alias) { rewritten += 1; }
        if let Operand::Reg(r) = src { alias.insert(*dst, *r); }
      }
      Opcode::Binop { lhs, rhs, .. } | Opcode::Cmp { lhs, rhs, .. } => {
        if resolve(lhs, &alias) { rewritten += 1; }
        if resolve(rhs, &alias) { rewritten += 1; }
      }
      Opcode::Unop { src, .. } | Opcode::Extend { src, .. } | Opcode::Truncate { src, .. } => {
        if resolve(src, &alias) { rewritten += 1; }
      }
      _ => {}
    }
  }
  rewritten
}

pub fn run(mut module: Module) -> Module {
  for f in module.funcs.iter_mut() {
    let mut stats = PassStats::default();
    for bb in f.blocks.iter_mut() {
      for inst in &mut bb.insts {
        if simplify(&mut inst.op) { stats.inserted += 1; }
      }
      stats.inserted += propagate_copies(&mut bb.insts);
    }
    f.stats.push(("peephole", stats));
  }
  module
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::span::FileSpan;
  use crate::types::mir::Function;
  use crate::types::ty::{prim, Prim};

  #[test]
  fn rewrites_multiply_by_power_of_two_into_shift() {
    let mut module = Module::default();
    let mut f = Function::new(crate::symbol::intern("times4"), vec![], prim(Prim::U8), None, FileSpan::synthetic());
    let entry = f.entry;
    let x = f.fresh_reg(prim(Prim::U8));
    let y = f.fresh_reg(prim(Prim::U8));
    f.emit(entry, Opcode::LoadParam { dst: x, index: 0 }, FileSpan::synthetic());
    f.emit(entry, Opcode::Binop { op: Binop::Mul, dst: y, lhs: Operand::Reg(x), rhs: Operand::Const(Const::Int(4)) }, FileSpan::synthetic());
    f.terminate(entry, crate::types::mir::Terminator::Return(Some(Operand::Reg(y))), FileSpan::synthetic());
    module.push_func(f);
    let module = run(module);
    use crate::types::Idx;
    let fid = crate::types::mir::FuncId::from_usize(0);
    match &module.funcs[fid].blocks[entry].insts[1].op {
      Opcode::Binop { op: Binop::Shl, rhs: Operand::Const(Const::Int(2)), .. } => {}
      other => panic!("expected shift-left by 2, got {other:?}"),
    }
  }
}
