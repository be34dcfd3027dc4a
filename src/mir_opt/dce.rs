//! Pass 3: dead-code elimination (spec §4.3 step 3).
//!
//! Fixed-point removal of any instruction whose result is never read and
//! which has no side effect the `PURE` attribute (computed by
//! [`super::reg_analysis`]) hasn't already cleared it of.

use hashbrown::HashSet;

use crate::types::mir::{self, FuncId, Module, Opcode, PassStats, VReg};

fn used_regs(f: &mir::Function) -> HashSet<VReg> {
  let mut used = HashSet::new();
  for bb in f.blocks.iter() {
    for inst in &bb.insts {
      mir::opcode_uses(&inst.op, |r| { used.insert(r); });
    }
    match bb.terminator() {
      mir::Terminator::CondJump { cond, .. } => if let mir::Operand::Reg(r) = cond { used.insert(*r); }
      mir::Terminator::Return(Some(mir::Operand::Reg(r))) => { used.insert(*r); }
      mir::Terminator::TailCall { args, .. } => for a in args { if let mir::Operand::Reg(r) = a { used.insert(*r); } }
      _ => {}
    }
  }
  used
}

fn run_function(f: &mut mir::Function, pure: &dyn Fn(FuncId) -> bool) -> PassStats {
  let mut stats = PassStats::default();
  loop {
    let used = used_regs(f);
    let mut changed = false;
    for bb in f.blocks.iter_mut() {
      bb.insts.retain(|inst| {
        let keep = match mir::opcode_def(&inst.op) {
          Some(dst) => used.contains(&dst) || mir::has_side_effect(&inst.op, pure),
          None => true,
        };
        if !keep { changed = true; stats.removed += 1; }
        keep
      });
    }
    if !changed { break; }
  }
  stats
}

pub fn run(mut module: Module) -> Module {
  let n = module.funcs.len();
  let pure: Vec<bool> = module.funcs.iter().map(|f| f.attrs.contains(mir::FuncAttrs::PURE)).collect();
  let pure_fn = move |id: FuncId| {
    use crate::types::Idx;
    let idx = id.into_usize();
    idx < n && pure[idx]
  };
  for f in module.funcs.iter_mut() {
    let stats = run_function(f, &pure_fn);
    f.stats.push(("dce", stats));
  }
  module
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::span::FileSpan;
  use crate::types::mir::{Const, Function, Operand, Terminator};
  use crate::types::ty::{prim, Prim};

  #[test]
  fn removes_unused_pure_computation() {
    let mut module = Module::default();
    let mut f = Function::new(crate::symbol::intern("dead"), vec![], prim(Prim::U8), None, FileSpan::synthetic());
    let entry = f.entry;
    let unused = f.fresh_reg(prim(Prim::U8));
    let result = f.fresh_reg(prim(Prim::U8));
    f.emit(entry, Opcode::LoadConst { dst: unused, val: Const::Int(9) }, FileSpan::synthetic());
    f.emit(entry, Opcode::LoadConst { dst: result, val: Const::Int(1) }, FileSpan::synthetic());
    f.terminate(entry, Terminator::Return(Some(Operand::Reg(result))), FileSpan::synthetic());
    module.push_func(f);
    let module = super::super::reg_analysis::run(module);
    let module = run(module);
    use crate::types::Idx;
    let fid = mir::FuncId::from_usize(0);
    assert_eq!(module.funcs[fid].blocks[entry].insts.len(), 1);
  }
}
