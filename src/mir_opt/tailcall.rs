//! Pass 8: tail-call identification (spec §4.3 step 8).
//!
//! A block whose last instruction is a `Call` whose result is immediately
//! returned (or whose callee returns nothing and the block just returns
//! after it) becomes a `TailCall` terminator instead, freeing the backend
//! to jump rather than call-and-return. Whether the jump is actually safe
//! given an SMC-anchored or stack-passing callee is the backend's call
//! (`build_vcode`'s lowering already falls back to an ordinary call+return
//! for an ABI it can't tail-jump).

use crate::types::mir::{Module, Opcode, Operand, Terminator};

fn try_convert(bb: &mut crate::types::mir::BasicBlock) -> bool {
  let Some((Terminator::Return(ret), _)) = &bb.term else { return false };
  let ret_reg = match ret {
    Some(Operand::Reg(r)) => Some(*r),
    None => None,
    Some(_) => return false, // returning a literal/constant isn't a call result
  };

  let Some(last) = bb.insts.last() else { return false };
  let (func, args, call_dst) = match &last.op {
    Opcode::Call { dst, func, args, .. } => (*func, args.clone(), *dst),
    _ => return false,
  };
  let span = last.span.clone();

  let matches_return = match (call_dst, ret_reg) {
    (Some(d), Some(r)) => d == r,
    (None, None) => true,
    _ => false,
  };
  if !matches_return { return false; }

  bb.insts.pop();
  bb.term = Some((Terminator::TailCall { func, args }, span));
  true
}

pub fn run(mut module: Module) -> Module {
  for f in module.funcs.iter_mut() {
    let mut stats = crate::types::mir::PassStats::default();
    for bb in f.blocks.iter_mut() {
      if try_convert(bb) { stats.inserted += 1; }
    }
    f.stats.push(("tailcall", stats));
  }
  module
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::span::FileSpan;
  use crate::types::mir::{Const, FuncId, Function};
  use crate::types::ty::{prim, Prim};
  use crate::types::Idx;

  #[test]
  fn converts_call_then_return_into_tailcall() {
    let mut module = Module::default();
    let callee_id = FuncId::from_usize(1); // self-referential id is fine; this pass never dereferences it

    let mut f = Function::new(crate::symbol::intern("forward"), vec![], prim(Prim::U8), None, FileSpan::synthetic());
    let entry = f.entry;
    let out = f.fresh_reg(prim(Prim::U8));
    let mut args = smallvec::SmallVec::new();
    args.push(Operand::Const(Const::Int(1)));
    f.emit(entry, Opcode::Call { dst: Some(out), err_dst: None, func: callee_id, args }, FileSpan::synthetic());
    f.terminate(entry, crate::types::mir::Terminator::Return(Some(Operand::Reg(out))), FileSpan::synthetic());
    module.push_func(f);

    let module = run(module);
    let fid = FuncId::from_usize(0);
    let f = &module.funcs[fid];
    assert!(f.blocks[entry].insts.is_empty());
    assert!(matches!(f.blocks[entry].terminator(), crate::types::mir::Terminator::TailCall { .. }));
  }
}
