//! Pass 1: register analysis (spec §4.3 step 1).
//!
//! Computes def-use information and attaches it as function attributes
//! rather than a side table, since every later pass that needs "is this
//! function recursive" or "is this function pure" already has a
//! `&mir::Function` in hand. No instruction is modified here.

use hashbrown::HashSet;

use crate::types::mir::{self, FuncAttrs, FuncId, Module, Opcode, Operand, PassStats};

/// Every `FuncId` that appears as a first-class value anywhere in `module`
/// (an argument, a stored field, a moved operand) rather than only as the
/// direct target of a `Call`. These functions cannot be TRUE-SMC anchored or
/// assumed non-recursive by inlining, since a reference to them may reach a
/// `CallIndirect` the optimizer can't trace back to a fixed call site.
fn address_taken_funcs(module: &Module) -> HashSet<FuncId> {
  let mut taken = HashSet::new();
  fn operand(o: &Operand, taken: &mut HashSet<FuncId>) {
    if let Operand::Func(id) = o { taken.insert(*id); }
  }
  for f in module.funcs.iter() {
    for bb in f.blocks.iter() {
      for inst in &bb.insts {
        match &inst.op {
          Opcode::Call { args, .. } => for a in args { operand(a, &mut taken); }
          Opcode::CallIndirect { func, args, .. } => {
            operand(func, &mut taken);
            for a in args { operand(a, &mut taken); }
          }
          Opcode::Move { src, .. } | Opcode::StoreField { src, .. } | Opcode::StoreIndex { src, .. } |
          Opcode::Unop { src, .. } | Opcode::Extend { src, .. } | Opcode::Truncate { src, .. } => operand(src, &mut taken),
          Opcode::Binop { lhs, rhs, .. } | Opcode::Cmp { lhs, rhs, .. } => { operand(lhs, &mut taken); operand(rhs, &mut taken); }
          _ => {}
        }
      }
    }
  }
  taken
}

/// Whether `f` contains a direct call to itself. Mutual recursion through
/// several functions is not detected (documented in DESIGN.md): the spec's
/// eligibility checks only ever ask "is this one function recursive," and a
/// direct self-call is by far the common case a Z80 source program hits.
fn is_directly_recursive(f: &mir::Function, id: FuncId) -> bool {
  f.blocks.iter().any(|bb| bb.insts.iter().any(|i| matches!(&i.op, Opcode::Call { func, .. } if *func == id)))
}

fn inst_count(f: &mir::Function) -> usize {
  f.blocks.iter().map(|bb| bb.insts.len()).sum()
}

/// Default threshold below which a non-recursive function is a candidate
/// for pass 6's inliner (spec §4.3 step 6: "default threshold 8").
pub const INLINE_THRESHOLD: usize = 8;

pub fn run(mut module: Module) -> Module {
  let address_taken = address_taken_funcs(&module);

  // Purity is a fixpoint: a call to an impure function makes the caller
  // impure too. Start optimistic (every function pure) and relax until
  // stable, the standard way to compute a monotone may-have-effects fact.
  let n = module.funcs.len();
  let mut pure = vec![true; n];
  loop {
    let mut changed = false;
    for (idx, f) in module.funcs.iter().enumerate() {
      if !pure[idx] { continue; }
      let still_pure = f.blocks.iter().all(|bb| {
        bb.insts.iter().all(|inst| !mir::has_side_effect(&inst.op, &|callee: FuncId| pure[callee.into_usize()]))
      });
      if !still_pure { pure[idx] = false; changed = true; }
    }
    if !changed { break; }
  }

  for (id, f) in module.funcs.iter_mut().enumerate() {
    let id = FuncId::from_usize(id);
    let recursive = is_directly_recursive(f, id);
    f.attrs.set(FuncAttrs::RECURSIVE, recursive);
    f.attrs.set(FuncAttrs::ADDRESS_TAKEN, address_taken.contains(&id));
    f.attrs.set(FuncAttrs::PURE, pure[id.into_usize()]);
    f.attrs.set(FuncAttrs::INLINE_CANDIDATE, !recursive && inst_count(f) <= INLINE_THRESHOLD);
    // SMC eligibility is a whole-function gate (non-recursive, address not
    // taken); pass 7 still checks each parameter individually before
    // anchoring it.
    f.attrs.set(FuncAttrs::SMC_ELIGIBLE, !recursive && !f.attrs.contains(FuncAttrs::ADDRESS_TAKEN));
    f.stats.push(("reg_analysis", PassStats::default()));
  }

  module
}

use crate::types::Idx;

#[cfg(test)]
mod tests {
  use super::*;
  use crate::span::FileSpan;
  use crate::types::mir::{Const, Terminator};
  use crate::types::ty::{prim, Prim};

  #[test]
  fn direct_self_call_marks_recursive() {
    let mut module = Module::default();
    let mut f = mir::Function::new(crate::symbol::intern("loop_forever"), vec![], prim(Prim::Void), None, FileSpan::synthetic());
    let entry = f.entry;
    let id_guess = FuncId::from_usize(0);
    f.emit(entry, Opcode::Call { dst: None, err_dst: None, func: id_guess, args: Default::default() }, FileSpan::synthetic());
    f.terminate(entry, Terminator::Return(None), FileSpan::synthetic());
    module.push_func(f);
    let module = run(module);
    assert!(module.funcs[id_guess].attrs.contains(FuncAttrs::RECURSIVE));
  }

  #[test]
  fn pure_function_has_no_side_effects() {
    let mut module = Module::default();
    let mut f = mir::Function::new(crate::symbol::intern("add_one"), vec![], prim(Prim::U8), None, FileSpan::synthetic());
    let entry = f.entry;
    let r = f.fresh_reg(prim(Prim::U8));
    f.emit(entry, Opcode::LoadConst { dst: r, val: Const::Int(1) }, FileSpan::synthetic());
    f.terminate(entry, Terminator::Return(Some(Operand::Reg(r))), FileSpan::synthetic());
    module.push_func(f);
    let module = run(module);
    let id = FuncId::from_usize(0);
    assert!(module.funcs[id].attrs.contains(FuncAttrs::PURE));
  }
}
