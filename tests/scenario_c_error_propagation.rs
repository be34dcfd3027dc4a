//! Scenario C (spec §8, §4.2): a fallible call's error is read straight off
//! the Z80 carry flag immediately after `CALL` — never by comparing the
//! return value, which would both miss an unsigned discriminant and give
//! the carry flag time to be clobbered by an intervening instruction.

use minzc::config::CompileOptions;
use minzc::span::FileSpan;
use minzc::types::ast::*;
use minzc::{symbol, Compiler};

fn u8_ty() -> TypeExpr {
  TypeExpr { span: FileSpan::synthetic(), kind: TypeExprKind::Name(symbol::intern("u8")) }
}

fn int_lit(n: i64) -> Expr {
  Expr { span: FileSpan::synthetic(), kind: ExprKind::IntLit(n) }
}

fn ident(name: &str) -> Expr {
  Expr { span: FileSpan::synthetic(), kind: ExprKind::Ident(symbol::intern(name)) }
}

#[test]
fn try_propagation_checks_carry_right_after_the_call_not_a_compare() {
  let div_err = Decl {
    span: FileSpan::synthetic(),
    kind: DeclKind::ErrorEnum(ErrorEnumDecl {
      name: symbol::intern("DivErr"),
      variants: vec![EnumVariantDecl { name: symbol::intern("DivByZero"), discriminant: None }],
    }),
  };

  let checked_div_body = Block {
    span: FileSpan::synthetic(),
    stmts: vec![Stmt {
      span: FileSpan::synthetic(),
      kind: StmtKind::If {
        cond: Expr {
          span: FileSpan::synthetic(),
          kind: ExprKind::Binary(BinOp::Eq, Box::new(ident("b")), Box::new(int_lit(0))),
        },
        then: Block {
          span: FileSpan::synthetic(),
          stmts: vec![Stmt {
            span: FileSpan::synthetic(),
            kind: StmtKind::Expr(Expr {
              span: FileSpan::synthetic(),
              kind: ExprKind::RaiseError { error_enum: symbol::intern("DivErr"), variant: symbol::intern("DivByZero") },
            }),
          }],
        },
        els: Some(Block {
          span: FileSpan::synthetic(),
          stmts: vec![Stmt { span: FileSpan::synthetic(), kind: StmtKind::Return(Some(ident("a"))) }],
        }),
      },
    }],
  };
  let checked_div = Decl {
    span: FileSpan::synthetic(),
    kind: DeclKind::Function(FunctionDecl {
      name: symbol::intern("checked_div"),
      params: vec![Param { name: symbol::intern("a"), ty: u8_ty() }, Param { name: symbol::intern("b"), ty: u8_ty() }],
      ret: u8_ty(),
      error_enum: Some(symbol::intern("DivErr")),
      body: checked_div_body,
      attrs: vec![],
    }),
  };

  let caller_body = Block {
    span: FileSpan::synthetic(),
    stmts: vec![
      Stmt {
        span: FileSpan::synthetic(),
        kind: StmtKind::Let {
          name: symbol::intern("v"),
          ty: None,
          mutable: false,
          init: Expr {
            span: FileSpan::synthetic(),
            kind: ExprKind::Try(Box::new(Expr {
              span: FileSpan::synthetic(),
              kind: ExprKind::Call {
                callee: Box::new(ident("checked_div")),
                args: vec![int_lit(10), int_lit(2)],
              },
            })),
          },
        },
      },
      Stmt { span: FileSpan::synthetic(), kind: StmtKind::Return(Some(ident("v"))) },
    ],
  };
  let caller = Decl {
    span: FileSpan::synthetic(),
    kind: DeclKind::Function(FunctionDecl {
      name: symbol::intern("caller"),
      params: vec![],
      ret: u8_ty(),
      error_enum: Some(symbol::intern("DivErr")),
      body: caller_body,
      attrs: vec![],
    }),
  };

  let module = Module { decls: vec![div_err, checked_div, caller] };
  let compiler = Compiler::new();
  let result = compiler.compile(&module, &CompileOptions::default()).expect("error-propagating call should compile");
  let asm = result.output.assembly;
  let lines: Vec<&str> = asm.lines().collect();

  let call_idx = lines.iter().position(|l| l.contains("CALL checked_div"))
    .unwrap_or_else(|| panic!("expected a direct call to checked_div:\n{asm}"));
  let after = &lines[call_idx + 1..(call_idx + 4).min(lines.len())];
  assert!(after.iter().any(|l| l.contains("JP C,")), "carry must be checked right after the call:\n{asm}");
  assert!(!after.iter().any(|l| l.contains("CP ")), "the error flag must never be recovered via a numeric compare:\n{asm}");
}
