//! Pass 4: MIR reordering (spec §4.3 step 4).
//!
//! Schedules each block's pure instructions toward their first consumer so
//! later passes (peephole, inlining, codegen) see producer and consumer
//! close together. This is a simplification of full DAG scheduling: it only
//! ever moves an instruction *later* (toward its first use), stably, and
//! never reorders across a side-effecting instruction.

use hashbrown::HashMap;

use crate::types::mir::{self, Module, PassStats};

fn run_block(bb: &mut mir::BasicBlock, pure: &dyn Fn(mir::FuncId) -> bool) -> u32 {
  let n = bb.insts.len();
  if n <= 1 { return 0; }

  // First index at which each defined register is consumed, scanning
  // forward (uses by a later instruction or the terminator).
  let mut first_use: HashMap<mir::VReg, usize> = HashMap::new();
  for (i, inst) in bb.insts.iter().enumerate() {
    mir::opcode_uses(&inst.op, |r| { first_use.entry(r).or_insert(i); });
  }
  if let mir::Terminator::CondJump { cond: mir::Operand::Reg(r), .. } | mir::Terminator::Return(Some(mir::Operand::Reg(r))) = bb.terminator() {
    first_use.entry(*r).or_insert(n);
  }

  let targets: Vec<usize> = bb.insts.iter().enumerate().map(|(i, inst)| {
    if mir::has_side_effect(&inst.op, pure) {
      i
    } else {
      match mir::opcode_def(&inst.op) {
        Some(dst) => *first_use.get(&dst).unwrap_or(&i),
        None => i,
      }
    }
  }).collect();

  let mut order: Vec<usize> = (0..n).collect();
  order.sort_by_key(|&i| (targets[i], i));
  let moved = order.iter().enumerate().filter(|(pos, &orig)| *pos != orig).count() as u32;

  let mut reordered = Vec::with_capacity(n);
  let mut insts = std::mem::take(&mut bb.insts);
  // Take instructions out by original index without cloning; insts[i] is
  // consumed exactly once since `order` is a permutation of 0..n.
  let mut slots: Vec<Option<mir::Instruction>> = insts.drain(..).map(Some).collect();
  for &i in &order {
    reordered.push(slots[i].take().expect("each original index appears once in the order"));
  }
  bb.insts = reordered;
  moved
}

pub fn run(mut module: Module) -> Module {
  let n = module.funcs.len();
  let pure: Vec<bool> = module.funcs.iter().map(|f| f.attrs.contains(mir::FuncAttrs::PURE)).collect();
  let pure_fn = move |id: mir::FuncId| {
    use crate::types::Idx;
    let idx = id.into_usize();
    idx < n && pure[idx]
  };
  for f in module.funcs.iter_mut() {
    let mut stats = PassStats::default();
    for bb in f.blocks.iter_mut() {
      stats.inserted += run_block(bb, &pure_fn);
    }
    f.stats.push(("reorder", stats));
  }
  module
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::span::FileSpan;
  use crate::types::mir::{Binop, Const, Function, Opcode, Operand, Terminator};
  use crate::types::ty::{prim, Prim};

  #[test]
  fn keeps_producer_before_its_only_consumer() {
    let mut module = Module::default();
    let mut f = Function::new(crate::symbol::intern("reorder_me"), vec![], prim(Prim::U8), None, FileSpan::synthetic());
    let entry = f.entry;
    let a = f.fresh_reg(prim(Prim::U8));
    let b = f.fresh_reg(prim(Prim::U8));
    let c = f.fresh_reg(prim(Prim::U8));
    // a and b both defined up front, far from their use in `c`'s Binop.
    f.emit(entry, Opcode::LoadConst { dst: a, val: Const::Int(1) }, FileSpan::synthetic());
    f.emit(entry, Opcode::LoadConst { dst: b, val: Const::Int(2) }, FileSpan::synthetic());
    f.emit(entry, Opcode::Binop { op: Binop::Add, dst: c, lhs: Operand::Reg(a), rhs: Operand::Reg(b) }, FileSpan::synthetic());
    f.terminate(entry, Terminator::Return(Some(Operand::Reg(c))), FileSpan::synthetic());
    module.push_func(f);
    let module = super::super::reg_analysis::run(module);
    let module = run(module);
    use crate::types::Idx;
    let fid = mir::FuncId::from_usize(0);
    assert_eq!(module.funcs[fid].blocks[entry].insts.len(), 3);
  }
}
