//! The MIR optimizer: eight passes run in a fixed order (spec §4.3).
//!
//! Each pass owns one file under `mir_opt/` and takes/returns the whole
//! `Module` by value, matching MIR's arena-of-indices shape (there's no
//! cross-function mutable aliasing to fight). [`Pipeline::run`] is the only
//! entry point the rest of the crate calls.

mod const_fold;
mod dce;
mod inline;
mod peephole;
mod reg_analysis;
mod reorder;
mod smc;
mod tailcall;

use crate::backend::Capabilities;
use crate::types::mir::Module;

pub struct Pipeline {
  pub smc_enabled: bool,
}

impl Pipeline {
  #[must_use] pub fn new(caps: &Capabilities, user_smc: bool) -> Self {
    Self { smc_enabled: caps.supports_smc && user_smc }
  }

  /// Runs all eight passes in spec order. Register analysis always runs
  /// first since every later pass reads the `FuncAttrs` it computes; the
  /// TRUE-SMC pass (7) is skipped entirely when the backend can't patch
  /// code or the user passed `--no-smc`, in which case tail-call
  /// identification (8) still runs on whatever `Call`s are left.
  #[must_use] pub fn run(&self, module: Module) -> Module {
    let module = reg_analysis::run(module);
    let module = const_fold::run(module);
    let module = dce::run(module);
    let module = reorder::run(module);
    let module = peephole::run(module);
    let module = inline::run(module);
    let module = if self.smc_enabled { smc::run(module) } else { module };
    tailcall::run(module)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::span::FileSpan;
  use crate::symbol::intern;
  use crate::types::mir::{Const, Function, Opcode, Operand, ParamInfo, Terminator};
  use crate::types::ty::{prim, Prim};

  fn caps(supports_smc: bool) -> Capabilities {
    Capabilities { supports_smc, pointer_width: 2, supports_interrupts: true, supports_shadow_registers: true }
  }

  #[test]
  fn full_pipeline_anchors_an_eligible_parameter() {
    let mut module = Module::default();

    let mut callee = Function::new(intern("inc"), vec![ParamInfo { name: intern("n"), ty: prim(Prim::U8) }], prim(Prim::U8), None, FileSpan::synthetic());
    let c_entry = callee.entry;
    let p = callee.fresh_reg(prim(Prim::U8));
    callee.emit(c_entry, Opcode::LoadParam { dst: p, index: 0 }, FileSpan::synthetic());
    callee.terminate(c_entry, Terminator::Return(Some(Operand::Reg(p))), FileSpan::synthetic());
    let callee_id = module.push_func(callee);

    let mut caller = Function::new(intern("forward"), vec![], prim(Prim::U8), None, FileSpan::synthetic());
    let entry = caller.entry;
    let out = caller.fresh_reg(prim(Prim::U8));
    let mut args = smallvec::SmallVec::new();
    args.push(Operand::Const(Const::Int(2)));
    caller.emit(entry, Opcode::Call { dst: Some(out), err_dst: None, func: callee_id, args }, FileSpan::synthetic());
    caller.terminate(entry, Terminator::Return(Some(Operand::Reg(out))), FileSpan::synthetic());
    module.push_func(caller);

    let module = Pipeline::new(&caps(true), true).run(module);
    let callee = &module.funcs[callee_id];
    assert!(matches!(callee.blocks[callee.entry].insts.first().map(|i| &i.op), Some(Opcode::SmcAnchor { .. })));
  }

  #[test]
  fn smc_disabled_backend_skips_anchoring() {
    let mut module = Module::default();
    let mut f = Function::new(intern("id"), vec![ParamInfo { name: intern("n"), ty: prim(Prim::U8) }], prim(Prim::U8), None, FileSpan::synthetic());
    let entry = f.entry;
    let p = f.fresh_reg(prim(Prim::U8));
    f.emit(entry, Opcode::LoadParam { dst: p, index: 0 }, FileSpan::synthetic());
    f.terminate(entry, Terminator::Return(Some(Operand::Reg(p))), FileSpan::synthetic());
    module.push_func(f);

    let module = Pipeline::new(&caps(false), true).run(module);
    let id = crate::types::mir::FuncId::from_usize(0);
    use crate::types::Idx;
    assert!(matches!(module.funcs[id].blocks[entry].insts.first().map(|i| &i.op), Some(Opcode::LoadParam { .. })));
  }
}
