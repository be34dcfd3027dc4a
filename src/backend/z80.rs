//! The Z80 target: the only backend this crate ships (spec §4.4).

use crate::backend::{Backend, Capabilities, CompiledOutput};
use crate::build_vcode;
use crate::codegen;
use crate::config::CompileOptions;
use crate::error::CompileError;
use crate::patch_table::PatchTable;
use crate::types::mir::Module;

pub struct Z80Backend;

impl Backend for Z80Backend {
  fn name(&self) -> &'static str { "z80" }
  fn file_extension(&self) -> &'static str { "asm" }

  fn capabilities(&self) -> Capabilities {
    Capabilities {
      supports_smc: true,
      pointer_width: 2,
      supports_interrupts: true,
      supports_shadow_registers: true,
    }
  }

  fn compile(&self, module: &Module, opts: &CompileOptions) -> Result<CompiledOutput, CompileError> {
    let mut patch_table = PatchTable::new();
    let mut text = String::new();
    text.push_str("\tORG 0x8000\n");
    for func in module.funcs.iter() {
      let vcode = build_vcode::build_vcode(func, opts.smc)?;
      let allocated = crate::backend::regalloc::allocate(vcode, func)?;
      let allocated = crate::backend::peephole::run(allocated);
      codegen::emit_function(&mut text, module, func, &allocated, &mut patch_table)?;
    }
    for s in module.statics.iter() {
      codegen::emit_static(&mut text, s);
    }
    Ok(CompiledOutput { assembly: text, patch_table })
  }
}
