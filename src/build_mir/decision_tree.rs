//! `case` exhaustiveness checking and decision-tree lowering (spec §4.2:
//! "a `case` expression lowers to a decision tree of direct comparisons;
//! it must be exhaustive or the analyzer rejects it").

use crate::error::AnalyzerError;
use crate::span::FileSpan;
use crate::types::ast::{self, Pattern};
use crate::types::mir::{Cmp, Const, Opcode, Operand, Terminator};
use crate::types::ty::{Ty, TyKind};

use super::FnLower;

/// Checks that `arms` cover every case of `scrutinee_ty`, recording
/// [`AnalyzerError::NotExhaustive`] and returning `false` if not.
fn check_exhaustive(lower: &mut FnLower, scrutinee_ty: &Ty, arms: &[ast::CaseArm], span: &FileSpan) -> bool {
  if arms.iter().any(|a| matches!(a.pattern, Pattern::Wildcard)) {
    return true;
  }
  match &**scrutinee_ty {
    TyKind::Enum { variants, .. } | TyKind::ErrorEnum { variants, .. } => {
      let covered: std::collections::HashSet<&str> = arms.iter().filter_map(|a| match &a.pattern {
        Pattern::EnumVariant { variant, .. } => Some(variant.as_str()),
        _ => None,
      }).collect();
      let missing: Vec<String> = variants.borrow().iter()
        .filter(|v| !covered.contains(v.name.as_str()))
        .map(|v| v.name.as_str().to_string())
        .collect();
      if missing.is_empty() { true } else {
        lower.err(span.clone(), AnalyzerError::NotExhaustive { missing });
        false
      }
    }
    TyKind::Prim(_) => {
      lower.err(span.clone(), AnalyzerError::NotExhaustive { missing: vec!["_ (no wildcard arm)".to_string()] });
      false
    }
    _ => true,
  }
}

/// Emits the test for one arm's pattern against `scrutinee`, returning the
/// boolean operand to branch on (`None` for `Wildcard`, which always
/// matches and is handled by the caller as the final fallthrough arm).
fn lower_test(lower: &mut FnLower, pattern: &Pattern, scrutinee: Operand, span: &FileSpan) -> Option<Operand> {
  match pattern {
    Pattern::Wildcard => None,
    Pattern::IntLit(n) => {
      let dst = lower.f.fresh_reg(crate::types::ty::prim(crate::types::ty::Prim::Bool));
      lower.emit(Opcode::Cmp { op: Cmp::Eq, dst, lhs: scrutinee, rhs: Operand::Const(Const::Int(*n)) }, span.clone());
      Some(Operand::Reg(dst))
    }
    Pattern::IntRange(lo, hi) => {
      let ge = lower.f.fresh_reg(crate::types::ty::prim(crate::types::ty::Prim::Bool));
      lower.emit(Opcode::Cmp { op: Cmp::Ge, dst: ge, lhs: scrutinee.clone(), rhs: Operand::Const(Const::Int(*lo)) }, span.clone());
      let le = lower.f.fresh_reg(crate::types::ty::prim(crate::types::ty::Prim::Bool));
      lower.emit(Opcode::Cmp { op: Cmp::Le, dst: le, lhs: scrutinee, rhs: Operand::Const(Const::Int(*hi)) }, span.clone());
      let both = lower.f.fresh_reg(crate::types::ty::prim(crate::types::ty::Prim::Bool));
      lower.emit(Opcode::Binop { op: crate::types::mir::Binop::And, dst: both, lhs: Operand::Reg(ge), rhs: Operand::Reg(le) }, span.clone());
      Some(Operand::Reg(both))
    }
    Pattern::EnumVariant { variant, .. } => {
      let dst = lower.f.fresh_reg(crate::types::ty::prim(crate::types::ty::Prim::Bool));
      lower.emit(Opcode::Cmp { op: Cmp::Eq, dst, lhs: scrutinee, rhs: Operand::Const(Const::Int(variant_discriminant(lower, *variant))) }, span.clone());
      Some(Operand::Reg(dst))
    }
  }
}

/// Resolves an enum variant name to its discriminant, searching every
/// currently-declared nominal type for one whose variant list contains it.
/// `case` arms name a bare variant, not `Enum::Variant`, so this can't look
/// the enum up by name first; the scrutinee's own type already constrained
/// which enum is in play by the time exhaustiveness passed.
fn variant_discriminant(lower: &FnLower, variant: crate::symbol::Symbol) -> i64 {
  for ty in lower.symtab.all_nominal_types() {
    if let TyKind::Enum { variants, .. } | TyKind::ErrorEnum { variants, .. } = &**ty {
      if let Some(v) = variants.borrow().iter().find(|v| v.name == variant) {
        return v.discriminant.unwrap_or(0);
      }
    }
  }
  0
}

/// Lowers a `case` expression into a chain of comparison blocks, one per
/// arm in source order, each falling through to the next on a mismatch and
/// jumping to a shared join block on a match (spec §4.2).
pub(super) fn lower_case(lower: &mut FnLower, scrutinee: &ast::Expr, arms: &[ast::CaseArm], span: &FileSpan) -> Option<(Operand, Ty)> {
  let (scrutinee_val, scrutinee_ty) = lower.lower_expr(scrutinee)?;
  if !check_exhaustive(lower, &scrutinee_ty, arms, span) {
    return None;
  }

  let join = lower.f.new_block();
  let mut result_ty: Option<Ty> = None;
  let result_reg = lower.f.fresh_reg(crate::types::ty::prim(crate::types::ty::Prim::U16));

  // `test_bb` is the block currently testing one arm's pattern; each arm
  // either falls through to a fresh `test_bb` for the next arm, or (last
  // arm, or a pattern that can't fail to match) jumps straight into the
  // chain's trailing blocks.
  let mut test_bb = lower.cur;
  for (i, arm) in arms.iter().enumerate() {
    let is_last = i + 1 == arms.len();
    lower.cur = test_bb;
    let arm_bb = lower.f.new_block();
    let test = lower_test(lower, &arm.pattern, scrutinee_val.clone(), span);
    let next_test = match test {
      Some(cond) => {
        let next_test = lower.f.new_block();
        let fallthrough = if is_last { lower.f.new_block() } else { next_test };
        lower.f.terminate(test_bb, Terminator::CondJump { cond, then_bb: arm_bb, else_bb: fallthrough }, span.clone());
        if is_last { lower.f.terminate(fallthrough, Terminator::Unreachable, span.clone()); }
        next_test
      }
      None => { lower.f.terminate(test_bb, Terminator::Jump(arm_bb), span.clone()); arm_bb }
    };
    lower.cur = arm_bb;
    if let Some((v, t)) = lower.lower_expr(&arm.body) {
      lower.emit(Opcode::Move { dst: result_reg, src: v }, span.clone());
      result_ty.get_or_insert(t);
    }
    lower.f.terminate(lower.cur, Terminator::Jump(join), span.clone());
    test_bb = next_test;
  }

  lower.cur = join;
  Some((Operand::Reg(result_reg), result_ty.unwrap_or_else(|| crate::types::ty::prim(crate::types::ty::Prim::Void))))
}
