//! Assembly-level peephole optimizer (spec §4.4 Peephole): local rewrites
//! applied to the selected (and allocated) `Inst` stream, run to a fixed
//! point per block. Only the rules expressible at this IR's level of
//! abstraction are implemented; `PUSH`/`POP` bracket elimination and
//! `JP`→`JR` range conversion need real instruction addresses and are left
//! to a future pass over the emitted text (recorded in DESIGN.md).

use crate::backend::regalloc::Allocated;
use crate::types::vcode::{AluOp, Inst, RegMem, VReg};

fn is_reg(r: &RegMem, v: VReg) -> bool { matches!(*r, RegMem::Reg(r) if r == v) }

fn uses_in(insts: &[Inst], v: VReg) -> usize {
  let mut n = 0;
  for inst in insts {
    crate::backend::regalloc::inst_regs(inst, |r| if r == v { n += 1 });
  }
  n
}

/// Runs every rule to a fixed point within one block, returning the
/// rewritten instruction list.
fn run_block(mut insts: Vec<Inst>) -> Vec<Inst> {
  loop {
    let mut changed = false;
    let mut out: Vec<Inst> = Vec::with_capacity(insts.len());
    let mut i = 0;
    while i < insts.len() {
      // Self-move elimination: `LD r,r`.
      if let Inst::Mov8 { dst, src } | Inst::Mov16 { dst, src } = &insts[i] {
        if is_reg(src, *dst) { changed = true; i += 1; continue; }
      }
      // `LD r,0` -> `XOR r` (zeroing idiom; cheaper and sets flags for free).
      if let Inst::LoadImm8 { dst, val: 0 } = insts[i] {
        out.push(Inst::Alu8 { op: AluOp::Xor, dst, rhs: RegMem::Reg(dst) });
        changed = true;
        i += 1;
        continue;
      }
      // `LD tmp,1; ADD dst,tmp` (tmp used nowhere else in the block) -> `INC dst`.
      // `LD tmp,1; SUB dst,tmp` likewise -> `DEC dst`.
      if i + 1 < insts.len() {
        if let (Inst::LoadImm8 { dst: tmp, val: 1 }, Inst::Alu8 { op, dst, rhs }) = (&insts[i], &insts[i + 1]) {
          if is_reg(rhs, *tmp) && uses_in(&insts, *tmp) == 2 {
            match op {
              AluOp::Add => { out.push(Inst::Inc { reg: *dst }); changed = true; i += 2; continue; }
              AluOp::Sub => { out.push(Inst::Dec { reg: *dst }); changed = true; i += 2; continue; }
              _ => {}
            }
          }
        }
        // `LD tmp,0; CP dst,tmp` (tmp dead) -> `OR dst,dst` (zero test without clobbering A-equivalent).
        if let (Inst::LoadImm8 { dst: tmp, val: 0 }, Inst::Alu8 { op: AluOp::Cp, dst, rhs }) = (&insts[i], &insts[i + 1]) {
          if is_reg(rhs, *tmp) && uses_in(&insts, *tmp) == 2 {
            out.push(Inst::Alu8 { op: AluOp::Or, dst: *dst, rhs: RegMem::Reg(*dst) });
            changed = true;
            i += 2;
            continue;
          }
        }
      }
      out.push(insts[i].clone());
      i += 1;
    }
    insts = out;
    if !changed { return insts; }
  }
}

#[must_use] pub fn run(mut a: Allocated) -> Allocated {
  for bb in a.vcode.blocks.iter_mut() {
    bb.insts = run_block(std::mem::take(&mut bb.insts));
  }
  a
}
