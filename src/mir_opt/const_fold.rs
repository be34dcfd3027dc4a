//! Pass 2: constant folding and propagation (spec §4.3 step 2).
//!
//! A single forward pass per function suffices because of MIR's
//! single-assignment invariant: once a register is known constant, every
//! later use sees that same value, so there is no need for iterative
//! dataflow or a worklist.

use hashbrown::HashMap;

use crate::types::mir::{Binop, Cmp, Const, Function, Module, Opcode, Operand, PassStats, VReg};
use crate::types::ty::{Prim, Ty};

/// Wraps `v` to the range of a `width`-byte unsigned integer, matching the
/// truncation a Z80 ALU op on that register width would perform.
fn wrap_to_width(v: i64, width: u8) -> i64 {
  match width {
    1 => (v as i64) & 0xff,
    2 => (v as i64) & 0xffff,
    3 => (v as i64) & 0xff_ffff,
    _ => v,
  }
}

fn resolve(o: &Operand, known: &HashMap<VReg, Const>) -> Option<Const> {
  match o {
    Operand::Const(c) => Some(*c),
    Operand::Reg(r) => known.get(r).copied(),
    _ => None,
  }
}

fn fold_binop(op: Binop, a: i64, b: i64, width: u8) -> i64 {
  let r = match op {
    Binop::Add => a.wrapping_add(b),
    Binop::Sub => a.wrapping_sub(b),
    Binop::Mul => a.wrapping_mul(b),
    Binop::And => a & b,
    Binop::Or => a | b,
    Binop::Xor => a ^ b,
    Binop::Shl => a.wrapping_shl(b as u32),
    Binop::Shr => ((a as u64) >> (b as u32 & 63)) as i64,
    Binop::ShrArith => a.wrapping_shr(b as u32),
  };
  wrap_to_width(r, width)
}

fn fold_cmp(op: Cmp, a: i64, b: i64) -> bool {
  match op {
    Cmp::Eq => a == b,
    Cmp::Ne => a != b,
    Cmp::Lt => a < b,
    Cmp::Le => a <= b,
    Cmp::Gt => a > b,
    Cmp::Ge => a >= b,
  }
}

fn width_for(reg_types: &crate::types::IdxVec<VReg, Ty>, dst: VReg) -> u8 {
  reg_types[dst].as_prim().map(Prim::width).unwrap_or(2)
}

fn run_function(f: &mut Function) -> PassStats {
  let mut stats = PassStats::default();
  let mut known: HashMap<VReg, Const> = HashMap::new();

  for bb in f.blocks.iter_mut() {
    for inst in &mut bb.insts {
      match &mut inst.op {
        Opcode::LoadConst { dst, val } => { known.insert(*dst, *val); }
        Opcode::Move { dst, src } => {
          if let Some(c) = resolve(src, &known) {
            known.insert(*dst, c);
            *src = Operand::Const(c);
          } else {
            known.remove(dst);
          }
        }
        Opcode::Binop { op, dst, lhs, rhs } => {
          if let (Some(Const::Int(a)), Some(Const::Int(b))) = (resolve(lhs, &known), resolve(rhs, &known)) {
            let width = width_for(&f.reg_types, *dst);
            let folded = fold_binop(*op, a, b, width);
            known.insert(*dst, Const::Int(folded));
            let dst = *dst;
            inst.op = Opcode::LoadConst { dst, val: Const::Int(folded) };
            stats.removed += 1;
          } else {
            known.remove(dst);
            if let Some(c) = resolve(lhs, &known) { *lhs = Operand::Const(c); }
            if let Some(c) = resolve(rhs, &known) { *rhs = Operand::Const(c); }
          }
        }
        Opcode::Cmp { op, dst, lhs, rhs } => {
          if let (Some(Const::Int(a)), Some(Const::Int(b))) = (resolve(lhs, &known), resolve(rhs, &known)) {
            let folded = fold_cmp(*op, a, b);
            known.insert(*dst, Const::Bool(folded));
            let dst = *dst;
            inst.op = Opcode::LoadConst { dst, val: Const::Bool(folded) };
            stats.removed += 1;
          } else {
            known.remove(dst);
          }
        }
        other => {
          if let Some(dst) = crate::types::mir::opcode_def(other) { known.remove(&dst); }
        }
      }
    }
  }
  stats
}

pub fn run(mut module: Module) -> Module {
  for f in module.funcs.iter_mut() {
    let stats = run_function(f);
    f.stats.push(("const_fold", stats));
  }
  module
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::span::FileSpan;
  use crate::types::mir::{FuncId, Terminator};
  use crate::types::ty::prim;

  #[test]
  fn folds_constant_addition() {
    let mut module = Module::default();
    let mut f = Function::new(crate::symbol::intern("sum"), vec![], prim(Prim::U8), None, FileSpan::synthetic());
    let entry = f.entry;
    let a = f.fresh_reg(prim(Prim::U8));
    let b = f.fresh_reg(prim(Prim::U8));
    let c = f.fresh_reg(prim(Prim::U8));
    f.emit(entry, Opcode::LoadConst { dst: a, val: Const::Int(2) }, FileSpan::synthetic());
    f.emit(entry, Opcode::LoadConst { dst: b, val: Const::Int(3) }, FileSpan::synthetic());
    f.emit(entry, Opcode::Binop { op: Binop::Add, dst: c, lhs: Operand::Reg(a), rhs: Operand::Reg(b) }, FileSpan::synthetic());
    f.terminate(entry, Terminator::Return(Some(Operand::Reg(c))), FileSpan::synthetic());
    module.push_func(f);
    let module = run(module);
    let fid = FuncId::from_usize(0);
    use crate::types::Idx;
    let f = &module.funcs[fid];
    match &f.blocks[entry].insts[2].op {
      Opcode::LoadConst { val: Const::Int(5), .. } => {}
      other => panic!("expected folded constant 5, got {other:?}"),
    }
  }
}
