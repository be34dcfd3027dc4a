//! Backend registry and capability negotiation (spec §4.5).
//!
//! A `Backend` is a name, a file extension, a fixed [`Capabilities`] set, and
//! an entry point from optimized MIR to assembly text plus an SMC patch
//! table. Capability gating is a hard gate consulted by
//! [`crate::mir_opt::Pipeline`] before the TRUE-SMC pass runs, not a
//! convention the pass re-checks itself (spec §C.1).

pub mod z80;
pub mod regalloc;
pub mod peephole;

use hashbrown::HashMap;

use crate::config::CompileOptions;
use crate::error::CompileError;
use crate::patch_table::PatchTable;
use crate::types::mir::Module;

/// What a backend can do, consulted by the optimizer to gate
/// target-specific passes (spec §4.5).
#[derive(Clone, Copy, Debug)]
pub struct Capabilities {
  pub supports_smc: bool,
  pub pointer_width: u8,
  pub supports_interrupts: bool,
  pub supports_shadow_registers: bool,
}

/// What a backend produces for one [`Module`] (spec §6 Output).
pub struct CompiledOutput {
  pub assembly: String,
  pub patch_table: PatchTable,
}

pub trait Backend {
  fn name(&self) -> &'static str;
  fn file_extension(&self) -> &'static str;
  fn capabilities(&self) -> Capabilities;
  fn compile(&self, module: &Module, opts: &CompileOptions) -> Result<CompiledOutput, CompileError>;
}

/// A process-wide table mapping backend names to instances (spec §4.5:
/// "A process-wide table mapping backend names to factories"). Every
/// registered backend is a zero-sized or small struct, so this stores boxed
/// trait objects directly rather than factory closures.
#[derive(Default)]
pub struct Registry {
  backends: HashMap<&'static str, Box<dyn Backend>>,
}

impl Registry {
  #[must_use] pub fn new() -> Self { Self::default() }

  /// The registry this compiler ships with: just the Z80 target today, but
  /// any future backend registers itself here and nowhere else (spec §4.5).
  #[must_use] pub fn with_builtins() -> Self {
    let mut r = Self::new();
    r.register(Box::new(z80::Z80Backend));
    r
  }

  pub fn register(&mut self, b: Box<dyn Backend>) {
    self.backends.insert(b.name(), b);
  }

  #[must_use] pub fn get(&self, name: &str) -> Option<&dyn Backend> {
    self.backends.get(name).map(std::convert::AsRef::as_ref)
  }

  #[must_use] pub fn names(&self) -> Vec<&'static str> {
    let mut v: Vec<_> = self.backends.keys().copied().collect();
    v.sort_unstable();
    v
  }
}
