//! Pass 6: inlining (spec §4.3 step 6).
//!
//! Inlines `Call` sites to small, non-recursive callees whose entire body
//! lives in a single basic block — a deliberate simplification documented
//! in DESIGN.md: multi-block callees (anything with its own branching) are
//! left as ordinary calls rather than taught to splice control flow.

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::types::mir::{self, FuncId, Module, Opcode, Operand, PassStats, VReg};
use crate::types::Idx;

/// A callee eligible for inlining: small, non-recursive, single-block.
fn inlinable(f: &mir::Function) -> bool {
  f.attrs.contains(mir::FuncAttrs::INLINE_CANDIDATE) && f.blocks.len() == 1
}

fn rename_operand(o: &Operand, subst: &HashMap<VReg, VReg>) -> Operand {
  match o {
    Operand::Reg(r) => Operand::Reg(*subst.get(r).copied().as_ref().unwrap_or(r)),
    other => other.clone(),
  }
}

/// Clones `callee`'s single block into `into` at `dst_bb`, remapping every
/// register it defines to a fresh one in the caller, and binding its
/// parameters to `args`. Returns the operand the call's result should be
/// replaced with, if the callee returns a value.
fn splice(into: &mut mir::Function, dst_bb: mir::BlockId, callee: &mir::Function, args: &[Operand]) -> Option<Operand> {
  let mut subst: HashMap<VReg, VReg> = HashMap::new();
  for (i, ty) in callee.reg_types.iter().enumerate() {
    let old = VReg::from_usize(i);
    let fresh = into.fresh_reg(ty.clone());
    subst.insert(old, fresh);
  }

  let body = &callee.blocks[callee.entry];
  for inst in &body.insts {
    if let Opcode::LoadParam { dst, index } = &inst.op {
      let bound = args.get(*index as usize).cloned().unwrap_or(Operand::Const(mir::Const::Int(0)));
      let fresh_dst = *subst.get(dst).unwrap();
      into.emit(dst_bb, Opcode::Move { dst: fresh_dst, src: bound }, inst.span.clone());
      continue;
    }
    let mut op = inst.op.clone();
    remap_opcode(&mut op, &subst);
    into.emit(dst_bb, op, inst.span.clone());
  }

  match body.terminator() {
    mir::Terminator::Return(value) => value.as_ref().map(|v| rename_operand(v, &subst)),
    _ => None, // non-Return terminators disqualify the callee earlier in `inlinable`'s single-block check in practice
  }
}

fn remap_opcode(op: &mut Opcode, subst: &HashMap<VReg, VReg>) {
  let remap_dst = |d: &mut VReg| { if let Some(&n) = subst.get(d) { *d = n; } };
  match op {
    Opcode::LoadConst { dst, .. } | Opcode::LoadVar { dst, .. } => remap_dst(dst),
    Opcode::LoadField { dst, addr, .. } | Opcode::LoadIndex { dst, addr, .. } => { remap_dst(dst); remap_addr(addr, subst); }
    Opcode::StoreField { addr, src, .. } | Opcode::StoreIndex { addr, src, .. } => { remap_addr(addr, subst); *src = rename_operand(src, subst); }
    Opcode::Binop { dst, lhs, rhs, .. } | Opcode::Cmp { dst, lhs, rhs, .. } => { remap_dst(dst); *lhs = rename_operand(lhs, subst); *rhs = rename_operand(rhs, subst); }
    Opcode::Unop { dst, src, .. } | Opcode::Extend { dst, src, .. } | Opcode::Truncate { dst, src, .. } | Opcode::Move { dst, src } => { remap_dst(dst); *src = rename_operand(src, subst); }
    Opcode::Call { dst, args, .. } => { if let Some(d) = dst { remap_dst(d); } for a in args.iter_mut() { *a = rename_operand(a, subst); } }
    Opcode::CallIndirect { dst, func, args } => { if let Some(d) = dst { remap_dst(d); } *func = rename_operand(func, subst); for a in args.iter_mut() { *a = rename_operand(a, subst); } }
    Opcode::SmcAnchor { param, .. } => remap_dst(param),
    Opcode::SmcPatch { value, .. } => *value = rename_operand(value, subst),
    Opcode::LoadParam { .. } | Opcode::Nop => {}
  }
}

fn remap_addr(addr: &mut mir::Addr, subst: &HashMap<VReg, VReg>) {
  if let Some(&n) = subst.get(&addr.base) { addr.base = n; }
  if let Some((idx, scale)) = addr.index { addr.index = Some((*subst.get(&idx).unwrap_or(&idx), scale)); }
}

fn run_function(caller_idx: usize, module: &Module, callees: &HashMap<FuncId, mir::Function>) -> (mir::Function, PassStats) {
  let mut f = module.funcs[FuncId::from_usize(caller_idx)].clone();
  let mut stats = PassStats::default();

  for bb in f.blocks.iter_mut() {
    let old = std::mem::take(&mut bb.insts);
    let mut new_insts = Vec::with_capacity(old.len());
    for inst in old {
      // A fallible call's error flag is part of the `Call` opcode itself;
      // splicing the callee's body in doesn't know how to materialize it.
      if let Opcode::Call { dst, err_dst: None, func, args } = &inst.op {
        if let Some(callee) = callees.get(func) {
          stats.removed += 1;
          let span = inst.span.clone();
          // Splice directly into the accumulating instruction list by
          // temporarily borrowing `bb.insts`; simplest to build via a
          // scratch function body, then drain it in.
          let mut scratch = mir::Function::new(callee.name, callee.params.clone(), callee.ret.clone(), callee.error_enum.clone(), span.clone());
          scratch.reg_types = f.reg_types.clone();
          let scratch_entry = scratch.entry;
          let result = splice(&mut scratch, scratch_entry, callee, args);
          f.reg_types = scratch.reg_types;
          new_insts.extend(scratch.blocks[scratch_entry].insts.drain(..));
          if let (Some(d), Some(r)) = (dst, result) {
            new_insts.push(mir::Instruction { op: Opcode::Move { dst: *d, src: r }, span });
          }
          continue;
        }
      }
      new_insts.push(inst);
    }
    bb.insts = new_insts;
  }
  (f, stats)
}

pub fn run(mut module: Module) -> Module {
  let callees: HashMap<FuncId, mir::Function> = module.funcs.iter().enumerate()
    .filter(|(_, f)| inlinable(f))
    .map(|(i, f)| (FuncId::from_usize(i), f.clone()))
    .collect();

  for i in 0..module.funcs.len() {
    let (mut new_f, stats) = run_function(i, &module, &callees);
    new_f.stats.push(("inline", stats));
    module.funcs[FuncId::from_usize(i)] = new_f;
  }
  module
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::span::FileSpan;
  use crate::types::mir::{Const, Function, Terminator};
  use crate::types::ty::{prim, Prim};

  #[test]
  fn inlines_a_single_block_callee() {
    let mut module = Module::default();

    let mut callee = Function::new(crate::symbol::intern("inc"), vec![mir::ParamInfo { name: crate::symbol::intern("n"), ty: prim(Prim::U8) }], prim(Prim::U8), None, FileSpan::synthetic());
    let c_entry = callee.entry;
    let p = callee.fresh_reg(prim(Prim::U8));
    let r = callee.fresh_reg(prim(Prim::U8));
    callee.emit(c_entry, Opcode::LoadParam { dst: p, index: 0 }, FileSpan::synthetic());
    callee.emit(c_entry, Opcode::Binop { op: mir::Binop::Add, dst: r, lhs: Operand::Reg(p), rhs: Operand::Const(Const::Int(1)) }, FileSpan::synthetic());
    callee.terminate(c_entry, Terminator::Return(Some(Operand::Reg(r))), FileSpan::synthetic());
    let callee_id = module.push_func(callee);

    let mut caller = Function::new(crate::symbol::intern("main"), vec![], prim(Prim::U8), None, FileSpan::synthetic());
    let entry = caller.entry;
    let out = caller.fresh_reg(prim(Prim::U8));
    let mut args = SmallVec::new();
    args.push(Operand::Const(Const::Int(4)));
    caller.emit(entry, Opcode::Call { dst: Some(out), err_dst: None, func: callee_id, args }, FileSpan::synthetic());
    caller.terminate(entry, Terminator::Return(Some(Operand::Reg(out))), FileSpan::synthetic());
    module.push_func(caller);

    let module = super::super::reg_analysis::run(module);
    let module = run(module);
    let main_id = FuncId::from_usize(1);
    let main = &module.funcs[main_id];
    assert!(main.blocks[entry].insts.iter().all(|i| !matches!(i.op, Opcode::Call { .. })), "call site should have been inlined away");
  }
}
