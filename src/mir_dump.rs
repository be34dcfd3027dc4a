//! Textual MIR dump, wired to the CLI's `--emit-mir` switch (spec §C.5).
//!
//! One instruction per line, grouped by function and block, in the same
//! order codegen walks them — meant for a human comparing optimizer passes,
//! not for round-tripping back into a `Module`.

use std::fmt::Write as _;

use crate::types::mir::{Addr, Binop, Cmp, Const, Module, Opcode, Operand, Terminator};

fn fmt_const(c: &Const) -> String {
  match c {
    Const::Int(n) => n.to_string(),
    Const::Bool(b) => b.to_string(),
  }
}

fn fmt_operand(o: &Operand) -> String {
  match o {
    Operand::Reg(r) => format!("%{}", r.index()),
    Operand::Const(c) => fmt_const(c),
    Operand::Func(f) => format!("@func{}", f.index()),
    Operand::Str(s) => format!("@str{}", s.index()),
    Operand::Static(s) => format!("@static{}", s.index()),
  }
}

fn fmt_addr(a: &Addr) -> String {
  match a.index {
    Some((i, scale)) => format!("[%{}+{}+%{}*{}]", a.base.index(), a.offset, i.index(), scale),
    None => format!("[%{}+{}]", a.base.index(), a.offset),
  }
}

fn fmt_binop(op: Binop) -> &'static str {
  match op {
    Binop::Add => "add", Binop::Sub => "sub", Binop::Mul => "mul",
    Binop::And => "and", Binop::Or => "or", Binop::Xor => "xor",
    Binop::Shl => "shl", Binop::Shr => "shr", Binop::ShrArith => "sar",
  }
}

fn fmt_cmp(op: Cmp) -> &'static str {
  match op {
    Cmp::Eq => "eq", Cmp::Ne => "ne", Cmp::Lt => "lt",
    Cmp::Le => "le", Cmp::Gt => "gt", Cmp::Ge => "ge",
  }
}

fn fmt_opcode(op: &Opcode) -> String {
  match op {
    Opcode::LoadConst { dst, val } => format!("%{} = const {}", dst.index(), fmt_const(val)),
    Opcode::LoadVar { dst, src } => format!("%{} = var %{}", dst.index(), src.index()),
    Opcode::LoadParam { dst, index } => format!("%{} = param[{}]", dst.index(), index),
    Opcode::LoadField { dst, addr, .. } => format!("%{} = load {}", dst.index(), fmt_addr(addr)),
    Opcode::StoreField { addr, src, .. } => format!("store {} = {}", fmt_addr(addr), fmt_operand(src)),
    Opcode::LoadIndex { dst, addr, .. } => format!("%{} = loadidx {}", dst.index(), fmt_addr(addr)),
    Opcode::StoreIndex { addr, src, .. } => format!("storeidx {} = {}", fmt_addr(addr), fmt_operand(src)),
    Opcode::Binop { op, dst, lhs, rhs } => format!("%{} = {} {}, {}", dst.index(), fmt_binop(*op), fmt_operand(lhs), fmt_operand(rhs)),
    Opcode::Unop { neg, not, dst, src } => {
      let name = if *neg { "neg" } else if *not { "not" } else { "id" };
      format!("%{} = {} {}", dst.index(), name, fmt_operand(src))
    }
    Opcode::Cmp { op, dst, lhs, rhs } => format!("%{} = cmp.{} {}, {}", dst.index(), fmt_cmp(*op), fmt_operand(lhs), fmt_operand(rhs)),
    Opcode::Extend { dst, src, signed, from_width, to_width } => format!(
      "%{} = extend{} {} ({}->{})", dst.index(), if *signed { ".s" } else { ".u" }, fmt_operand(src), from_width, to_width
    ),
    Opcode::Truncate { dst, src, to_width } => format!("%{} = truncate {} (->{})", dst.index(), fmt_operand(src), to_width),
    Opcode::Move { dst, src } => format!("%{} = move {}", dst.index(), fmt_operand(src)),
    Opcode::Call { dst, err_dst, func, args } => {
      let args = args.iter().map(fmt_operand).collect::<Vec<_>>().join(", ");
      let call = match dst {
        Some(d) => format!("%{} = call @func{}({})", d.index(), func.index(), args),
        None => format!("call @func{}({})", func.index(), args),
      };
      match err_dst {
        Some(e) => format!("{call}, err %{}", e.index()),
        None => call,
      }
    }
    Opcode::CallIndirect { dst, func, args } => {
      let args = args.iter().map(fmt_operand).collect::<Vec<_>>().join(", ");
      match dst {
        Some(d) => format!("%{} = callind {}({})", d.index(), fmt_operand(func), args),
        None => format!("callind {}({})", fmt_operand(func), args),
      }
    }
    Opcode::SmcAnchor { anchor, param, width } => format!("anchor${} %{} (width {})", anchor.index(), param.index(), width),
    Opcode::SmcPatch { anchor, func, value } => format!("patch @func{}.anchor${} = {}", func.index(), anchor.index(), fmt_operand(value)),
    Opcode::Nop => "nop".to_string(),
  }
}

fn fmt_terminator(t: &Terminator) -> String {
  match t {
    Terminator::Jump(b) => format!("jump bb{}", b.index()),
    Terminator::CondJump { cond, then_bb, else_bb } => format!("condjump {}, bb{}, bb{}", fmt_operand(cond), then_bb.index(), else_bb.index()),
    Terminator::Return(Some(v)) => format!("return {}", fmt_operand(v)),
    Terminator::Return(None) => "return".to_string(),
    Terminator::ReturnError { variant, .. } => format!("return.err {variant}", variant = variant.as_str()),
    Terminator::TailCall { func, args } => {
      let args = args.iter().map(fmt_operand).collect::<Vec<_>>().join(", ");
      format!("tailcall @func{}({})", func.index(), args)
    }
    Terminator::Unreachable => "unreachable".to_string(),
  }
}

/// Renders every function in `module` as text, in declaration order.
#[must_use] pub fn dump(module: &Module) -> String {
  let mut out = String::new();
  for f in module.funcs.iter() {
    let _ = writeln!(out, "fn {}:", f.name.as_str());
    for (bi, bb) in f.blocks.enum_iter() {
      let _ = writeln!(out, "  bb{}:", bi.index());
      for inst in &bb.insts {
        let _ = writeln!(out, "    {}", fmt_opcode(&inst.op));
      }
      if let Some((term, _)) = &bb.term {
        let _ = writeln!(out, "    {}", fmt_terminator(term));
      }
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::span::FileSpan;
  use crate::types::mir::{Function, Operand};
  use crate::types::ty::{prim, Prim};

  #[test]
  fn dumps_a_single_constant_return() {
    let mut module = Module::default();
    let mut f = Function::new(crate::symbol::intern("answer"), vec![], prim(Prim::U8), None, FileSpan::synthetic());
    let entry = f.entry;
    let r = f.fresh_reg(prim(Prim::U8));
    f.emit(entry, Opcode::LoadConst { dst: r, val: Const::Int(42) }, FileSpan::synthetic());
    f.terminate(entry, Terminator::Return(Some(Operand::Reg(r))), FileSpan::synthetic());
    module.push_func(f);
    let text = dump(&module);
    assert!(text.contains("fn answer:"));
    assert!(text.contains("= const 42"));
    assert!(text.contains("return %0"));
  }
}
