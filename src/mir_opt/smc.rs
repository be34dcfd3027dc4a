//! Pass 7: TRUE-SMC analysis and marking (spec §4.3 step 7).
//!
//! Only runs when the selected backend's [`crate::backend::Capabilities`]
//! say so and the user hasn't passed `--no-smc` — that gate lives in
//! [`super::Pipeline::run`], not here, so this module can assume SMC is
//! wanted and just do it.
//!
//! Eligible parameters have their `LoadParam` replaced in place by an
//! `SmcAnchor` naming the *same* register (the callee now expects its
//! argument to already be sitting in a patched immediate rather than having
//! arrived through the normal ABI). Every call site loses the
//! corresponding argument and gains an `SmcPatch` immediately before the
//! `Call`.

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::types::mir::{self, AnchorId, FuncAttrs, FuncId, Module, Opcode, Operand, PassStats};
use crate::types::ty::Prim;
use crate::types::Idx;

/// 24-bit values are excluded even though they're integers: a patched
/// 3-byte immediate would straddle an opcode boundary on every Z80
/// instruction encoding this backend emits, so anchoring is restricted to
/// the 1- and 2-byte cases the instruction selector already has patchable
/// forms for (an Open Question resolved in DESIGN.md).
fn param_eligible(ty: &crate::types::ty::Ty) -> bool {
  match ty.as_prim() {
    Some(p) => matches!(p, Prim::U8 | Prim::I8 | Prim::U16 | Prim::I16 | Prim::Bool),
    None => matches!(&**ty, crate::types::ty::TyKind::Ptr { .. }),
  }
}

fn param_width(ty: &crate::types::ty::Ty) -> u8 {
  ty.as_prim().map(Prim::width).unwrap_or(2)
}

/// For each function, the anchors created for its eligible parameters, in
/// parameter-index order (`None` for a parameter left alone).
type AnchorMap = HashMap<FuncId, Vec<Option<AnchorId>>>;

fn anchor_function(f: &mut mir::Function) -> Vec<Option<AnchorId>> {
  let mut anchors = vec![None; f.params.len()];
  if !f.attrs.contains(FuncAttrs::SMC_ELIGIBLE) { return anchors; }

  for bb in f.blocks.iter_mut() {
    for inst in &mut bb.insts {
      if let Opcode::LoadParam { dst, index } = inst.op {
        let idx = index as usize;
        if idx >= f.params.len() { continue; }
        let ty = &f.params[idx].ty;
        if !param_eligible(ty) { continue; }
        let width = param_width(ty);
        let anchor = f.anchors.push(dst);
        anchors[idx] = Some(anchor);
        inst.op = Opcode::SmcAnchor { anchor, param: dst, width };
      }
    }
  }
  anchors
}

/// Rewrites one call's argument list: anchored parameters are pulled out
/// into `SmcPatch` instructions emitted just before the call, in the same
/// order their anchors were declared.
fn patch_call(out: &mut Vec<mir::Instruction>, span: &crate::span::FileSpan, func: FuncId, args: &SmallVec<[Operand; 4]>, anchors: &[Option<AnchorId>]) -> SmallVec<[Operand; 4]> {
  let mut remaining = SmallVec::new();
  for (i, arg) in args.iter().enumerate() {
    match anchors.get(i).copied().flatten() {
      Some(anchor) => out.push(mir::Instruction { op: Opcode::SmcPatch { anchor, func, value: arg.clone() }, span: span.clone() }),
      None => remaining.push(arg.clone()),
    }
  }
  remaining
}

fn patch_calls_in(f: &mut mir::Function, anchors: &AnchorMap) -> u32 {
  let mut patched = 0;
  for bb in f.blocks.iter_mut() {
    let old = std::mem::take(&mut bb.insts);
    let mut new_insts = Vec::with_capacity(old.len());
    for inst in old {
      if let Opcode::Call { dst, err_dst, func, args } = &inst.op {
        if let Some(callee_anchors) = anchors.get(func) {
          if callee_anchors.iter().any(Option::is_some) {
            let remaining = patch_call(&mut new_insts, &inst.span, *func, args, callee_anchors);
            patched += 1;
            new_insts.push(mir::Instruction { op: Opcode::Call { dst: *dst, err_dst: *err_dst, func: *func, args: remaining }, span: inst.span.clone() });
            continue;
          }
        }
      }
      new_insts.push(inst);
    }
    bb.insts = new_insts;
  }
  patched
}

pub fn run(mut module: Module) -> Module {
  let mut anchors: AnchorMap = HashMap::new();
  for (i, f) in module.funcs.iter_mut().enumerate() {
    let id = FuncId::from_usize(i);
    let per_fn = anchor_function(f);
    let slots = per_fn.iter().filter(|a| a.is_some()).count() as u32;
    f.stats.push(("smc_anchor", PassStats { smc_slots: slots, ..Default::default() }));
    anchors.insert(id, per_fn);
  }

  for f in module.funcs.iter_mut() {
    let patched = patch_calls_in(f, &anchors);
    f.stats.push(("smc_patch", PassStats { inserted: patched, ..Default::default() }));
  }

  module
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::span::FileSpan;
  use crate::types::mir::{Function, ParamInfo, Terminator};
  use crate::types::ty::{prim, Prim};

  fn eligible_function() -> Function {
    let mut f = Function::new(
      crate::symbol::intern("add_one"),
      vec![ParamInfo { name: crate::symbol::intern("n"), ty: prim(Prim::U8) }],
      prim(Prim::U8),
      None,
      FileSpan::synthetic(),
    );
    let entry = f.entry;
    let n = f.fresh_reg(prim(Prim::U8));
    f.emit(entry, Opcode::LoadParam { dst: n, index: 0 }, FileSpan::synthetic());
    f.terminate(entry, Terminator::Return(Some(Operand::Reg(n))), FileSpan::synthetic());
    f
  }

  #[test]
  fn anchors_a_byte_parameter_and_patches_its_call_site() {
    let mut module = Module::default();
    let callee_id = module.push_func(eligible_function());

    let mut caller = Function::new(crate::symbol::intern("main"), vec![], prim(Prim::U8), None, FileSpan::synthetic());
    let entry = caller.entry;
    let out = caller.fresh_reg(prim(Prim::U8));
    let mut args = SmallVec::new();
    args.push(Operand::Const(mir::Const::Int(4)));
    caller.emit(entry, Opcode::Call { dst: Some(out), err_dst: None, func: callee_id, args }, FileSpan::synthetic());
    caller.terminate(entry, Terminator::Return(Some(Operand::Reg(out))), FileSpan::synthetic());
    module.push_func(caller);

    let module = super::super::reg_analysis::run(module);
    let module = run(module);

    let callee = &module.funcs[callee_id];
    assert!(matches!(callee.blocks[callee.entry].insts[0].op, Opcode::SmcAnchor { .. }));

    let main_id = FuncId::from_usize(1);
    let main = &module.funcs[main_id];
    let insts = &main.blocks[entry].insts;
    assert!(matches!(insts[0].op, Opcode::SmcPatch { .. }));
    match &insts[1].op {
      Opcode::Call { args, .. } => assert!(args.is_empty(), "the anchored argument should have been pulled out of the call"),
      other => panic!("expected the call to remain after its patch, got {other:?}"),
    }
  }
}
