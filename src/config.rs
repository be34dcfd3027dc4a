//! Compile-time configuration (spec §6 CLI, ambient configuration).
//!
//! `CompileOptions` is the single value threaded through [`crate::Compiler`];
//! the CLI binary is a thin `clap` wrapper that builds one of these and
//! nothing else (spec §A: "CLI is a thin wrapper over the library API").

use std::path::PathBuf;

/// Selects which backend to target, resolved in the order the CLI contract
/// requires: explicit flag, then `MINZ_BACKEND`, then the compiled-in
/// default (spec §4.5 Backend registry).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendSelector(pub String);

impl BackendSelector {
  pub const DEFAULT: &'static str = "z80";
  pub const ENV_VAR: &'static str = "MINZ_BACKEND";

  /// `explicit` is the CLI flag value, if given. Falls back to the
  /// environment, then the compiled-in default.
  #[must_use] pub fn resolve(explicit: Option<String>) -> Self {
    explicit
      .or_else(|| std::env::var(Self::ENV_VAR).ok())
      .map_or_else(|| Self(Self::DEFAULT.to_string()), Self)
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptLevel {
  /// Skip the optimizer pipeline entirely; MIR goes straight to the
  /// backend as built (spec §4.3: "optimization is optional").
  Off,
  On,
}

#[derive(Clone, Debug)]
pub struct CompileOptions {
  pub backend: BackendSelector,
  pub opt: OptLevel,
  /// Disables TRUE-SMC parameter passing even on a backend that supports
  /// it, falling back to the backend's ordinary calling convention.
  pub smc: bool,
  pub emit_mir: Option<PathBuf>,
  pub emit_patch_table: Option<PathBuf>,
  pub output: Option<PathBuf>,
  pub list_backends: bool,
}

impl Default for CompileOptions {
  fn default() -> Self {
    Self {
      backend: BackendSelector::resolve(None),
      opt: OptLevel::On,
      smc: true,
      emit_mir: None,
      emit_patch_table: None,
      output: None,
      list_backends: false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn explicit_backend_wins_over_env() {
    std::env::set_var(BackendSelector::ENV_VAR, "fake");
    assert_eq!(BackendSelector::resolve(Some("z80".to_string())).0, "z80");
    std::env::remove_var(BackendSelector::ENV_VAR);
  }

  #[test]
  fn default_backend_is_z80() {
    std::env::remove_var(BackendSelector::ENV_VAR);
    assert_eq!(BackendSelector::resolve(None).0, "z80");
  }
}
