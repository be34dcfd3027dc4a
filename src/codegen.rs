//! Assembly-text emission: turns allocated vcode into sjasmplus-syntax
//! source text, plus the SMC patch table entries it produces along the way
//! (spec §6 Output: "assembly source in sjasmplus syntax" and "a versioned
//! JSON patch table").
//!
//! Every `Inst` from [`crate::types::vcode`] maps to one emitted block of
//! text. A few Z80 ISA facts this module alone has to account for, since
//! `vcode::Inst` deliberately stays agnostic of them: 8-bit ALU operations
//! can only name `A` as their implicit operand, there is no 16-bit `AND`/
//! `OR`/`XOR`/`CP`, and `CPL` only ever complements `A`. Where the allocator
//! homed a value somewhere else, this module inserts the `LD A,...`/`LD
//! ...,A` shuffle around the real operation.

use std::fmt::Write as _;

use crate::backend::regalloc::Allocated;
use crate::error::CompileError;
use crate::patch_table::PatchTable;
use crate::types::mir::{self, Module};
use crate::types::vcode::{self, AluOp, Allocation, Cond, Inst, Label, PReg, RegMem, ShiftOp, VReg};

fn preg_name(p: PReg) -> &'static str {
  match p {
    PReg::A => "A", PReg::B => "B", PReg::C => "C", PReg::D => "D", PReg::E => "E",
    PReg::H => "H", PReg::L => "L",
    PReg::BC | PReg::ShadowBC => "BC",
    PReg::DE | PReg::ShadowDE => "DE",
    PReg::HL | PReg::ShadowHL => "HL",
    PReg::IX => "IX", PReg::IY => "IY",
    PReg::ShadowAF => "AF",
  }
}

fn pair_low(p: PReg) -> &'static str {
  match p {
    PReg::BC | PReg::ShadowBC => "C",
    PReg::DE | PReg::ShadowDE => "E",
    PReg::HL | PReg::ShadowHL => "L",
    other => preg_name(other),
  }
}

fn pair_high(p: PReg) -> &'static str {
  match p {
    PReg::BC | PReg::ShadowBC => "B",
    PReg::DE | PReg::ShadowDE => "D",
    PReg::HL | PReg::ShadowHL => "H",
    other => preg_name(other),
  }
}

fn alu_mnemonic(op: AluOp) -> &'static str {
  match op {
    AluOp::Add => "ADD", AluOp::Adc => "ADC", AluOp::Sub => "SUB", AluOp::Sbc => "SBC",
    AluOp::And => "AND", AluOp::Or => "OR", AluOp::Xor => "XOR", AluOp::Cp => "CP",
  }
}

fn shift_mnemonic(op: ShiftOp) -> &'static str {
  match op {
    ShiftOp::Sla => "SLA", ShiftOp::Sra => "SRA", ShiftOp::Srl => "SRL",
    ShiftOp::Rl => "RL", ShiftOp::Rr => "RR", ShiftOp::Rlc => "RLC", ShiftOp::Rrc => "RRC",
  }
}

fn cond_mnemonic(c: Cond) -> &'static str {
  match c {
    Cond::Z => "Z", Cond::Nz => "NZ", Cond::C => "C", Cond::Nc => "NC",
    Cond::Po => "PO", Cond::Pe => "PE", Cond::P => "P", Cond::M => "M",
  }
}

/// Stack-frame offset for a spill slot, relative to `IX`. Two bytes per slot
/// regardless of the value's width, the simplest scheme that keeps every
/// slot's high byte addressable (spec §5 Register allocation, tier 3).
fn spill_addr(id: vcode::SpillId) -> String { format!("(IX-{})", (id.index() as i32 + 1) * 2) }
fn spill_addr_high(id: vcode::SpillId) -> String { format!("(IX-{})", (id.index() as i32 + 1) * 2 - 1) }

/// `(reg+d)`/`(reg-d)` indexed-addressing text, matching sjasmplus's
/// expectation that a negative displacement carries its own sign rather
/// than reading as `reg+-d`.
fn mem_operand(base: &str, disp: i16) -> String {
  if disp >= 0 { format!("({base}+{disp})") } else { format!("({base}-{})", -i32::from(disp)) }
}

fn func_label(module: &Module, f: mir::FuncId) -> String { module.funcs[f].name.as_str().to_string() }
fn str_label(id: mir::StrId) -> String { format!("__str_{}", id.index()) }
fn static_label(module: &Module, s: mir::StaticId) -> String { module.statics[s].name.as_str().to_string() }

struct Emit<'a> {
  module: &'a Module,
  func: &'a mir::Function,
  alloc: &'a Allocated,
  patch_table: &'a mut PatchTable,
  func_name: String,
  label_counter: u32,
}

impl<'a> Emit<'a> {
  fn alloc_of(&self, v: VReg) -> Allocation { self.alloc.alloc[v] }
  fn width_of(&self, v: VReg) -> u8 { self.alloc.vcode.reg_widths[v] }

  fn loc8(&self, v: VReg) -> String {
    match self.alloc_of(v) {
      Allocation::Reg(p) if p.is_pair() => pair_low(p).to_string(),
      Allocation::Reg(p) => preg_name(p).to_string(),
      Allocation::Spill(s) => spill_addr(s),
      Allocation::SmcSlot(_) => unreachable!("an SMC slot vreg is only ever defined by SmcAnchor*, never read through a generic location"),
    }
  }

  fn loc16(&self, v: VReg) -> String {
    match self.alloc_of(v) {
      Allocation::Reg(p) => preg_name(p).to_string(),
      Allocation::Spill(s) => spill_addr(s),
      Allocation::SmcSlot(_) => unreachable!("an SMC slot vreg is only ever defined by SmcAnchor*, never read through a generic location"),
    }
  }

  fn loc_low(&self, v: VReg) -> String { self.loc8(v) }

  fn loc_high(&self, v: VReg) -> String {
    match self.alloc_of(v) {
      Allocation::Reg(p) if p.is_pair() => pair_high(p).to_string(),
      Allocation::Reg(p) => preg_name(p).to_string(),
      Allocation::Spill(s) => spill_addr_high(s),
      Allocation::SmcSlot(_) => unreachable!(),
    }
  }

  fn loc(&self, v: VReg) -> String { if self.width_of(v) <= 1 { self.loc8(v) } else { self.loc16(v) } }

  fn label(&self, label: Label) -> String {
    match label {
      Label::Func(f) => func_label(self.module, f),
      Label::Str(s) => str_label(s),
      Label::Static(s) => static_label(self.module, s),
    }
  }

  fn block_label(&self, bb: vcode::BlockId) -> String { format!("{}_L{}", self.func_name, bb.index()) }

  fn fresh_local_label(&mut self, tag: &str) -> String {
    self.label_counter += 1;
    format!("{}_{tag}{}", self.func_name, self.label_counter)
  }

  fn rm8(&self, rm: &RegMem) -> String {
    match *rm {
      RegMem::Reg(v) => self.loc8(v),
      RegMem::Mem { base: Some(b), disp } => mem_operand(&self.loc16(b), disp),
      RegMem::Mem { base: None, disp } => format!("({:#06x})", disp as u16),
    }
  }

  fn rm16(&self, rm: &RegMem) -> String {
    match *rm {
      RegMem::Reg(v) => self.loc16(v),
      RegMem::Mem { base: Some(b), disp } => mem_operand(&self.loc16(b), disp),
      RegMem::Mem { base: None, disp } => format!("({:#06x})", disp as u16),
    }
  }

  /// Low/high byte operand text for a 16-bit `RegMem`, used by the 16-bit
  /// ALU ops the Z80 has no native instruction for (everything but `ADD`).
  fn rm16_halves(&self, rm: &RegMem) -> (String, String) {
    match *rm {
      RegMem::Reg(v) => (self.loc_low(v), self.loc_high(v)),
      RegMem::Mem { base: Some(b), disp } => {
        let base = self.loc16(b);
        (mem_operand(&base, disp), mem_operand(&base, disp.saturating_add(1)))
      }
      RegMem::Mem { base: None, disp } => {
        let addr = disp as u16;
        (format!("({addr:#06x})"), format!("({:#06x})", addr.wrapping_add(1)))
      }
    }
  }

  fn touches_shadow(&self, inst: &Inst) -> bool {
    let mut found = false;
    crate::backend::regalloc::inst_regs(inst, |v| {
      if let Allocation::Reg(p) = self.alloc_of(v) {
        if p.is_shadow() { found = true; }
      }
    });
    found
  }

  fn emit_alu8(&self, out: &mut String, op: AluOp, dst: VReg, rhs: &RegMem) {
    let d = self.loc8(dst);
    let r = self.rm8(rhs);
    let mnem = alu_mnemonic(op);
    if d == "A" {
      let _ = writeln!(out, "\t{mnem} A,{r}");
    } else {
      let _ = writeln!(out, "\tLD A,{d}");
      let _ = writeln!(out, "\t{mnem} A,{r}");
      if !matches!(op, AluOp::Cp) { let _ = writeln!(out, "\tLD {d},A"); }
    }
  }

  fn emit_alu16(&self, out: &mut String, op: AluOp, dst: VReg, rhs: &RegMem) {
    if matches!(op, AluOp::Add | AluOp::Adc | AluOp::Sub | AluOp::Sbc) {
      let d = self.loc16(dst);
      let r = self.rm16(rhs);
      match op {
        AluOp::Add => { let _ = writeln!(out, "\tADD {d},{r}"); }
        AluOp::Adc => { let _ = writeln!(out, "\tADC {d},{r}"); }
        // Z80 has no plain 16-bit SUB; clear carry first so SBC behaves as a
        // non-borrowing subtract.
        AluOp::Sub => { let _ = writeln!(out, "\tOR A"); let _ = writeln!(out, "\tSBC {d},{r}"); }
        AluOp::Sbc => { let _ = writeln!(out, "\tSBC {d},{r}"); }
        _ => unreachable!(),
      }
      return;
    }
    // No native 16-bit AND/OR/XOR/CP: split into a low-byte and a high-byte
    // 8-bit operation through the accumulator.
    let dlo = self.loc_low(dst);
    let dhi = self.loc_high(dst);
    let (rlo, rhi) = self.rm16_halves(rhs);
    let mnem = alu_mnemonic(op);
    let _ = writeln!(out, "\tLD A,{dlo}");
    let _ = writeln!(out, "\t{mnem} A,{rlo}");
    if !matches!(op, AluOp::Cp) { let _ = writeln!(out, "\tLD {dlo},A"); }
    let _ = writeln!(out, "\tLD A,{dhi}");
    let _ = writeln!(out, "\t{mnem} A,{rhi}");
    if !matches!(op, AluOp::Cp) { let _ = writeln!(out, "\tLD {dhi},A"); }
  }

  fn emit_shift(&self, out: &mut String, op: ShiftOp, reg: VReg) {
    let mnem = shift_mnemonic(op);
    if self.width_of(reg) <= 1 {
      let _ = writeln!(out, "\t{mnem} {}", self.loc8(reg));
      return;
    }
    // No 16-bit shift/rotate: shift one half, roll the carry into the
    // other. Left shifts feed the low half's carry into the high half;
    // right shifts feed the high half's carry into the low half.
    let lo = self.loc_low(reg);
    let hi = self.loc_high(reg);
    match op {
      ShiftOp::Sla => { let _ = writeln!(out, "\tSLA {lo}"); let _ = writeln!(out, "\tRL {hi}"); }
      ShiftOp::Sra | ShiftOp::Srl => {
        let _ = writeln!(out, "\t{mnem} {hi}");
        let _ = writeln!(out, "\tRR {lo}");
      }
      ShiftOp::Rl | ShiftOp::Rr | ShiftOp::Rlc | ShiftOp::Rrc => {
        let _ = writeln!(out, "\t{mnem} {lo}");
        let _ = writeln!(out, "\t{mnem} {hi}");
      }
    }
  }

  fn emit_cpl(&self, out: &mut String, reg: VReg) {
    let d = self.loc8(reg);
    if d == "A" {
      let _ = writeln!(out, "\tCPL");
    } else {
      let _ = writeln!(out, "\tLD A,{d}");
      let _ = writeln!(out, "\tCPL");
      let _ = writeln!(out, "\tLD {d},A");
    }
  }

  /// Emits an SMC anchor: the patchable `LD` itself, followed by an `EQU`
  /// naming its immediate operand's address for callers to overwrite (spec
  /// §4.4: `param$imm0` for a standard, unprefixed opcode — every register
  /// this allocator hands out for an anchored parameter is unprefixed, so
  /// the offset from the instruction's own label is always `+1`, never the
  /// prefixed-opcode `+2` case).
  fn emit_smc_anchor(&mut self, out: &mut String, anchor: mir::AnchorId, reg: VReg, width: u8) {
    let param = format!("p{}", anchor.index());
    let ld_label = format!("{}_{}_ld", self.func_name, param);
    let symbol = format!("{}_{}_imm0", self.func_name, param);
    let mir_reg = self.func.anchors[anchor];
    let ty = &self.func.reg_types[mir_reg];
    let _ = writeln!(out, "{ld_label}:");
    if width <= 1 {
      let _ = writeln!(out, "\tLD {},0", self.loc8(reg));
    } else {
      let _ = writeln!(out, "\tLD {},0", self.loc16(reg));
    }
    let _ = writeln!(out, "{symbol} EQU {ld_label}+1");
    self.patch_table.push(&self.func_name, &param, symbol, width, ty);
  }

  fn emit_smc_patch(&mut self, out: &mut String, anchor: mir::AnchorId, func: mir::FuncId, val: VReg, width: u8) {
    let param = format!("p{}", anchor.index());
    let callee = func_label(self.module, func);
    let symbol = format!("{callee}_{param}_imm0");
    if width <= 1 {
      let _ = writeln!(out, "\tLD A,{}", self.loc8(val));
      let _ = writeln!(out, "\tLD ({symbol}),A");
    } else {
      let _ = writeln!(out, "\tLD HL,{}", self.loc16(val));
      let _ = writeln!(out, "\tLD ({symbol}),HL");
    }
    // `line` is a placeholder: the real call-site line is only known once
    // the whole module's text has been concatenated one layer up, so this
    // function's own running output length can't give an accurate number.
    self.patch_table.record_site(&callee, &param, &self.func_name, 0);
  }

  fn emit_inst(&mut self, out: &mut String, inst: &Inst) {
    let wrap_shadow = self.touches_shadow(inst);
    if wrap_shadow { let _ = writeln!(out, "\tEXX"); }
    match inst {
      Inst::LoadImm8 { dst, val } => { let _ = writeln!(out, "\tLD {},{val}", self.loc8(*dst)); }
      Inst::LoadImm16 { dst, val } => { let _ = writeln!(out, "\tLD {},{val}", self.loc16(*dst)); }
      Inst::LoadLabel { dst, label } => { let _ = writeln!(out, "\tLD {},{}", self.loc16(*dst), self.label(*label)); }
      Inst::Mov8 { dst, src } => {
        let s = self.rm8(src);
        let d = self.loc8(*dst);
        if s != d { let _ = writeln!(out, "\tLD {d},{s}"); }
      }
      Inst::Mov16 { dst, src } => {
        if let RegMem::Reg(v) = src {
          if self.width_of(*v) <= 1 {
            // A narrower source zero-extends into the wider destination:
            // low byte copied, high byte cleared.
            let lo = self.loc_low(*dst);
            let hi = self.loc_high(*dst);
            let _ = writeln!(out, "\tLD {lo},{}", self.loc8(*v));
            let _ = writeln!(out, "\tLD {hi},0");
            if wrap_shadow { let _ = writeln!(out, "\tEXX"); }
            return;
          }
        }
        let s = self.rm16(src);
        let d = self.loc16(*dst);
        if s != d { let _ = writeln!(out, "\tLD {d},{s}"); }
      }
      Inst::MovPR { dst, src } => {
        let d = self.loc(*dst);
        let s = preg_name(*src);
        if d != s { let _ = writeln!(out, "\tLD {d},{s}"); }
      }
      Inst::MovRP { src, dst } => {
        let s = self.loc(*src);
        let d = preg_name(*dst);
        if d != s { let _ = writeln!(out, "\tLD {d},{s}"); }
      }
      Inst::Store8 { addr, src } => { let _ = writeln!(out, "\tLD {},{}", self.rm8(addr), self.loc8(*src)); }
      Inst::Store16 { addr, src } => { let _ = writeln!(out, "\tLD {},{}", self.rm16(addr), self.loc16(*src)); }
      Inst::Alu8 { op, dst, rhs } => self.emit_alu8(out, *op, *dst, rhs),
      Inst::Alu16 { op, dst, rhs } => self.emit_alu16(out, *op, *dst, rhs),
      Inst::Shift { op, reg } => self.emit_shift(out, *op, *reg),
      Inst::Inc { reg } => { let _ = writeln!(out, "\tINC {}", self.loc(*reg)); }
      Inst::Dec { reg } => { let _ = writeln!(out, "\tDEC {}", self.loc(*reg)); }
      Inst::Cpl { reg } => self.emit_cpl(out, *reg),
      Inst::Jump { target } => { let _ = writeln!(out, "\tJP {}", self.block_label(*target)); }
      Inst::JumpIf { cond, target } => { let _ = writeln!(out, "\tJP {},{}", cond_mnemonic(*cond), self.block_label(*target)); }
      Inst::Djnz { counter, target } => {
        let c = self.loc8(*counter);
        if c != "B" { let _ = writeln!(out, "\tLD B,{c}"); }
        let _ = writeln!(out, "\tDJNZ {}", self.block_label(*target));
        if c != "B" { let _ = writeln!(out, "\tLD {c},B"); }
      }
      Inst::Call { func, arg_regs } => {
        for (v, p) in arg_regs {
          let s = self.loc(*v);
          let d = preg_name(*p);
          if s != d { let _ = writeln!(out, "\tLD {d},{s}"); }
        }
        let _ = writeln!(out, "\tCALL {}", func_label(self.module, *func));
      }
      Inst::CallIndirect { func, arg_regs } => {
        for (v, p) in arg_regs {
          let s = self.loc(*v);
          let d = preg_name(*p);
          if s != d { let _ = writeln!(out, "\tLD {d},{s}"); }
        }
        // No `CALL (rr)` on the Z80: push a synthetic return address and
        // jump through the callee pointer instead.
        let ret = self.fresh_local_label("ind_ret");
        let target = self.loc16(*func);
        let _ = writeln!(out, "\tLD HL,{ret}");
        let _ = writeln!(out, "\tPUSH HL");
        let _ = writeln!(out, "\tJP ({target})");
        let _ = writeln!(out, "{ret}:");
      }
      Inst::Ret => { let _ = writeln!(out, "\tRET"); }
      Inst::TailJump { func } => { let _ = writeln!(out, "\tJP {}", func_label(self.module, *func)); }
      Inst::SmcAnchorByte { anchor, reg } => self.emit_smc_anchor(out, *anchor, *reg, 1),
      Inst::SmcAnchorWord { anchor, reg } => self.emit_smc_anchor(out, *anchor, *reg, 2),
      Inst::SmcPatchByte { anchor, func, val } => self.emit_smc_patch(out, *anchor, *func, *val, 1),
      Inst::SmcPatchWord { anchor, func, val } => self.emit_smc_patch(out, *anchor, *func, *val, 2),
      Inst::SetCarry(true) => { let _ = writeln!(out, "\tSCF"); }
      Inst::SetCarry(false) => { let _ = writeln!(out, "\tOR A"); }
      Inst::Nop => { let _ = writeln!(out, "\tNOP"); }
    }
    if wrap_shadow { let _ = writeln!(out, "\tEXX"); }
  }
}

/// Emits one function's assembly text: its label, its blocks in layout
/// order (each preceded by its local label), and the patch-table entries
/// its SMC anchors contribute.
pub fn emit_function(
  out: &mut String,
  module: &Module,
  f: &mir::Function,
  allocated: &Allocated,
  patch_table: &mut PatchTable,
) -> Result<(), CompileError> {
  let func_name = f.name.as_str().to_string();
  let mut e = Emit { module, func: f, alloc: allocated, patch_table, func_name: func_name.clone(), label_counter: 0 };
  let _ = writeln!(out, "{func_name}:");
  if allocated.vcode.abi.carry_signals_error {
    let _ = writeln!(out, "\t; ABI: carry set on return means an error (spec §4.2)");
  }
  for (id, bb) in allocated.vcode.blocks.enum_iter() {
    if id != allocated.vcode.entry { let _ = writeln!(out, "{}:", e.block_label(id)); }
    for inst in &bb.insts { e.emit_inst(out, inst); }
  }
  Ok(())
}

/// Emits one static data blob as a labeled `DB` run (spec §3 `StaticData`).
pub fn emit_static(out: &mut String, s: &mir::StaticData) {
  let _ = writeln!(out, "{}:", s.name.as_str());
  if s.bytes.is_empty() {
    let _ = writeln!(out, "\tDB 0");
    return;
  }
  let bytes: Vec<String> = s.bytes.iter().map(|b| format!("{b:#04x}")).collect();
  for chunk in bytes.chunks(16) {
    let _ = writeln!(out, "\tDB {}", chunk.join(","));
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::span::FileSpan;
  use crate::types::mir::{Function, Operand, Opcode, ParamInfo, Terminator};
  use crate::types::ty::{prim, Prim};

  fn build_simple_module() -> (Module, mir::FuncId) {
    let mut module = Module::default();
    let name = crate::symbol::intern("double");
    let mut f = Function::new(
      name,
      vec![ParamInfo { name: crate::symbol::intern("n"), ty: prim(Prim::U8) }],
      prim(Prim::U8),
      None,
      FileSpan::synthetic(),
    );
    let entry = f.entry;
    let n = f.fresh_reg(prim(Prim::U8));
    let out = f.fresh_reg(prim(Prim::U8));
    f.emit(entry, Opcode::LoadParam { dst: n, index: 0 }, FileSpan::synthetic());
    f.emit(entry, Opcode::Binop { op: mir::Binop::Add, dst: out, lhs: Operand::Reg(n), rhs: Operand::Reg(n) }, FileSpan::synthetic());
    f.terminate(entry, Terminator::Return(Some(Operand::Reg(out))), FileSpan::synthetic());
    let id = module.push_func(f);
    (module, id)
  }

  #[test]
  fn emits_function_label_and_ret() {
    let (module, id) = build_simple_module();
    let f = &module.funcs[id];
    let vcode = crate::build_vcode::build_vcode(f, true).expect("lowering should succeed");
    let allocated = crate::backend::regalloc::allocate(vcode, f).expect("allocation should succeed");
    let mut patch_table = PatchTable::new();
    let mut text = String::new();
    emit_function(&mut text, &module, f, &allocated, &mut patch_table).expect("emission should succeed");
    assert!(text.starts_with("double:\n"));
    assert!(text.contains("RET"));
  }

  #[test]
  fn static_data_emits_db_run() {
    let mut out = String::new();
    let s = mir::StaticData { name: crate::symbol::intern("greeting"), bytes: std::rc::Rc::from(vec![104u8, 105]) };
    emit_static(&mut out, &s);
    assert!(out.starts_with("greeting:\n"));
    assert!(out.contains("DB 0x68,0x69"));
  }

  #[test]
  fn smc_anchor_emits_equ_symbol() {
    let mut module = Module::default();
    let name = crate::symbol::intern("add_one");
    let mut f = Function::new(
      name,
      vec![ParamInfo { name: crate::symbol::intern("n"), ty: prim(Prim::U8) }],
      prim(Prim::U8),
      None,
      FileSpan::synthetic(),
    );
    let entry = f.entry;
    let n = f.fresh_reg(prim(Prim::U8));
    let anchor = f.anchors.push(n);
    f.emit(entry, Opcode::SmcAnchor { anchor, param: n, width: 1 }, FileSpan::synthetic());
    f.terminate(entry, Terminator::Return(Some(Operand::Reg(n))), FileSpan::synthetic());
    let id = module.push_func(f);
    let f = &module.funcs[id];
    let vcode = crate::build_vcode::build_vcode(f, true).expect("lowering should succeed");
    let allocated = crate::backend::regalloc::allocate(vcode, f).expect("allocation should succeed");
    let mut patch_table = PatchTable::new();
    let mut text = String::new();
    emit_function(&mut text, &module, f, &allocated, &mut patch_table).expect("emission should succeed");
    assert!(text.contains("EQU"));
    assert_eq!(patch_table.entries.len(), 1);
    assert_eq!(patch_table.entries[0].function, "add_one");
  }
}
