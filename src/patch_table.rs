//! The SMC patch table: a versioned JSON document describing every patch
//! slot a compile produced (spec §6 Output, Glossary "SMC Patch Table").
//!
//! Downstream tooling (debuggers, linkers that need to know which bytes in
//! the assembled ROM are load-time-immutable-looking-but-actually-patched)
//! reads this file instead of re-deriving anchor addresses from the
//! assembly text. `schema` lets a reader detect a layout it doesn't
//! understand yet without choking on an unrelated added field (spec §6:
//! "tolerant of unknown fields").

use serde::{Deserialize, Serialize};

use crate::types::ty::Ty;

pub const SCHEMA_VERSION: u32 = 1;

/// One call site that writes into a given anchor before its `CALL`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PatchSite {
  pub caller: String,
  /// 1-based line number in the emitted assembly text, for a reader that
  /// wants to show the patching instruction without re-parsing it.
  pub line: u32,
}

/// One SMC anchor: a parameter of some function, rewritten by the TRUE-SMC
/// optimizer pass into a patchable immediate operand instead of an
/// incoming register or stack argument.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PatchEntry {
  pub function: String,
  pub parameter: String,
  /// The `EQU` label naming the address of the immediate byte (or first
  /// byte of a word) that callers overwrite (spec §4.4: `param$immOP` for a
  /// prefixed opcode's operand, `param$imm0` otherwise).
  pub symbol: String,
  pub size_bytes: u8,
  #[serde(rename = "type")]
  pub ty: String,
  pub call_sites: Vec<PatchSite>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PatchTable {
  pub schema: u32,
  pub entries: Vec<PatchEntry>,
}

impl PatchTable {
  #[must_use] pub fn new() -> Self { Self { schema: SCHEMA_VERSION, entries: Vec::new() } }

  pub fn push(&mut self, function: &str, parameter: &str, symbol: String, size_bytes: u8, ty: &Ty) {
    self.entries.push(PatchEntry {
      function: function.to_string(),
      parameter: parameter.to_string(),
      symbol,
      size_bytes,
      ty: ty.to_string(),
      call_sites: Vec::new(),
    });
  }

  /// Records that `caller` patches the most recently pushed entry matching
  /// `function`/`parameter` at `line`. Called by codegen as it walks call
  /// sites, after every anchor declaration in the function that owns them
  /// has already been pushed.
  pub fn record_site(&mut self, function: &str, parameter: &str, caller: &str, line: u32) {
    if let Some(e) = self.entries.iter_mut().rev().find(|e| e.function == function && e.parameter == parameter) {
      e.call_sites.push(PatchSite { caller: caller.to_string(), line });
    }
  }

  /// Serializes to the pretty-printed JSON document written alongside the
  /// assembly output (spec §6: `-o foo.asm` also writes `foo.patch.json`).
  pub fn to_json(&self) -> Result<String, serde_json::Error> { serde_json::to_string_pretty(self) }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::ty::{prim, Prim};

  #[test]
  fn round_trips_through_json() {
    let mut t = PatchTable::new();
    t.push("add_one", "n", "add_one$n$imm0".to_string(), 1, &prim(Prim::U8));
    t.record_site("add_one", "n", "main", 12);
    let json = t.to_json().expect("serialization should not fail");
    let back: PatchTable = serde_json::from_str(&json).expect("deserialization should not fail");
    assert_eq!(back.entries.len(), 1);
    assert_eq!(back.entries[0].call_sites.len(), 1);
    assert_eq!(back.schema, SCHEMA_VERSION);
  }

  #[test]
  fn tolerates_unknown_fields() {
    let json = r#"{"schema":1,"entries":[],"future_field":"ignored"}"#;
    let t: PatchTable = serde_json::from_str(json).expect("unknown top-level fields should be ignored");
    assert!(t.entries.is_empty());
  }
}
