//! Iterator chain fusion (spec §4.2): a `.map`/`.filter`/`.forEach` chain
//! collapses into one counted loop over the source array rather than
//! allocating an intermediate array per link. Scoped to chains terminated
//! by `forEach`; a chain used as a value (ending in `map`/`filter`) would
//! need to materialize a new array and is not implemented here.

use crate::error::AnalyzerError;
use crate::span::FileSpan;
use crate::types::ast;
use crate::types::entity::Mutability;
use crate::types::mir::{Addr, Binop, Cmp, Const, Opcode, Operand, Terminator};
use crate::types::ty::{self, Prim, Ty, TyKind};

use super::{FnLower, LocalBinding};

struct Link<'a> {
  op: ast::IterOpKind,
  lambda: &'a ast::Expr,
}

/// Unwinds a right-nested `IterOp` tree into source-to-terminal order,
/// returning the expression at the root of the chain (the original array).
fn unwind<'a>(e: &'a ast::Expr, links: &mut Vec<Link<'a>>) -> &'a ast::Expr {
  match &e.kind {
    ast::ExprKind::IterOp { recv, op, lambda } => {
      let source = unwind(recv, links);
      links.push(Link { op: *op, lambda });
      source
    }
    ast::ExprKind::IterSource(inner) => unwind(inner, links),
    _ => e,
  }
}

/// Lowers the single value a lambda's body block evaluates to: either its
/// last bare-expression statement or an explicit `return`. Both `map` and
/// `filter` lambdas in a fused chain are single-expression in practice.
fn lower_lambda_value(lower: &mut FnLower, body: &ast::Block) -> Option<(Operand, Ty)> {
  lower.push_scope();
  let mut result = None;
  for (i, s) in body.stmts.iter().enumerate() {
    let is_last = i + 1 == body.stmts.len();
    match &s.kind {
      ast::StmtKind::Expr(e) if is_last => result = lower.lower_expr(e),
      ast::StmtKind::Return(Some(e)) => { result = lower.lower_expr(e); break; }
      ast::StmtKind::Return(None) => break,
      _ => { lower.lower_stmt(s); }
    }
  }
  lower.pop_scope();
  result
}

/// Lowers one iterator-chain expression rooted at `e`. Returns `Some` with
/// a dummy `void` value for a `forEach`-terminated chain (lowered entirely
/// for its side effects); `None` (with a recorded diagnostic) for any
/// other terminal operator.
pub(super) fn lower_chain(lower: &mut FnLower, e: &ast::Expr, span: &FileSpan) -> Option<(Operand, Ty)> {
  let mut links = Vec::new();
  let source_expr = unwind(e, &mut links);
  let Some(last) = links.last() else { return lower.lower_expr(source_expr) };
  if last.op != ast::IterOpKind::ForEach {
    lower.err(span.clone(), AnalyzerError::InvalidCapture {
      name: "<iterator chain>".to_string(),
      captured: "a chain of map/filter must end in forEach; producing a new array is not supported".to_string(),
    });
    return None;
  }

  let (source_val, source_ty) = lower.lower_expr(source_expr)?;
  let TyKind::Array { elem, len } = &*source_ty else {
    lower.err(span.clone(), AnalyzerError::TypeMismatch { expected: ty::array(ty::prim(Prim::U8), 0), found: source_ty.clone() });
    return None;
  };
  let elem_ty = elem.clone();
  let len = *len;
  let base = lower.reg_of(source_val)?;

  let idx = lower.f.fresh_reg(ty::prim(Prim::U16));
  lower.emit(Opcode::LoadConst { dst: idx, val: Const::Int(0) }, span.clone());

  let header = lower.f.new_block();
  lower.f.terminate(lower.cur, Terminator::Jump(header), span.clone());
  lower.cur = header;
  let cond = lower.f.fresh_reg(ty::prim(Prim::Bool));
  lower.emit(Opcode::Cmp { op: Cmp::Lt, dst: cond, lhs: Operand::Reg(idx), rhs: Operand::Const(Const::Int(i64::from(len))) }, span.clone());
  let body = lower.f.new_block();
  let exit = lower.f.new_block();
  lower.f.terminate(header, Terminator::CondJump { cond: Operand::Reg(cond), then_bb: body, else_bb: exit }, span.clone());
  lower.cur = body;

  let elem_size = crate::symtab::SymbolTable::sizeof(&elem_ty);
  let elem_reg = lower.f.fresh_reg(elem_ty.clone());
  lower.emit(Opcode::LoadIndex {
    dst: elem_reg,
    addr: Addr { base, offset: 0, index: Some((idx, elem_size)) },
    ty: elem_ty.clone(),
  }, span.clone());

  let mut cur_val = Operand::Reg(elem_reg);
  let mut cur_ty = elem_ty;
  let continue_block = lower.f.new_block();

  for link in &links {
    let ast::ExprKind::Lambda { params, body: lbody, .. } = &link.lambda.kind else { continue };
    let Some(p) = params.first() else { continue };
    match link.op {
      ast::IterOpKind::Map => {
        let elem_reg = lower.reg_of(cur_val.clone())?;
        lower.push_scope();
        lower.declare_local(p.name, LocalBinding::Var(elem_reg, cur_ty.clone(), Mutability::Const, None));
        let Some((v, t)) = lower_lambda_value(lower, lbody) else { lower.pop_scope(); return None };
        lower.pop_scope();
        cur_val = v;
        cur_ty = t;
      }
      ast::IterOpKind::Filter => {
        let elem_reg = lower.reg_of(cur_val.clone())?;
        lower.push_scope();
        lower.declare_local(p.name, LocalBinding::Var(elem_reg, cur_ty.clone(), Mutability::Const, None));
        let cond_val = lower_lambda_value(lower, lbody);
        lower.pop_scope();
        let Some((cond_op, _)) = cond_val else { return None };
        let keep_bb = lower.f.new_block();
        let skip_bb = lower.f.new_block();
        lower.f.terminate(lower.cur, Terminator::CondJump { cond: cond_op, then_bb: keep_bb, else_bb: skip_bb }, span.clone());
        lower.f.terminate(skip_bb, Terminator::Jump(continue_block), span.clone());
        lower.cur = keep_bb;
      }
      ast::IterOpKind::ForEach => {
        let elem_reg = lower.reg_of(cur_val.clone())?;
        lower.push_scope();
        lower.declare_local(p.name, LocalBinding::Var(elem_reg, cur_ty.clone(), Mutability::Const, None));
        lower.lower_block(lbody);
        lower.pop_scope();
      }
    }
  }
  lower.f.terminate(lower.cur, Terminator::Jump(continue_block), span.clone());
  lower.cur = continue_block;

  let next_idx = lower.f.fresh_reg(ty::prim(Prim::U16));
  lower.emit(Opcode::Binop { op: Binop::Add, dst: next_idx, lhs: Operand::Reg(idx), rhs: Operand::Const(Const::Int(1)) }, span.clone());
  lower.emit(Opcode::Move { dst: idx, src: Operand::Reg(next_idx) }, span.clone());
  lower.f.terminate(lower.cur, Terminator::Jump(header), span.clone());

  lower.cur = exit;
  Some((Operand::Const(Const::Int(0)), ty::prim(Prim::Void)))
}
