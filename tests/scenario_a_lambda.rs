//! Scenario A (spec §8): a `let`-bound lambda lifts to its own top-level
//! function and is invoked through a direct call, never an indirect one.

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
fn lambda_call_lowers_to_a_direct_call_not_an_indirect_one() {
  let lambda_body = Block {
    span: FileSpan::synthetic(),
    stmts: vec![
      Stmt {
        span: FileSpan::synthetic(),
        kind: StmtKind::If {
          cond: Expr {
            span: FileSpan::synthetic(),
            kind: ExprKind::Binary(BinOp::Eq, Box::new(ident("x")), Box::new(int_lit(0))),
          },
          then: Block {
            span: FileSpan::synthetic(),
            stmts: vec![Stmt { span: FileSpan::synthetic(), kind: StmtKind::Return(Some(int_lit(1))) }],
          },
          els: None,
        },
      },
      Stmt {
        span: FileSpan::synthetic(),
        kind: StmtKind::Return(Some(Expr {
          span: FileSpan::synthetic(),
          kind: ExprKind::Binary(BinOp::Add, Box::new(ident("x")), Box::new(int_lit(1))),
        })),
      },
    ],
  };
  let let_lambda = Stmt {
    span: FileSpan::synthetic(),
    kind: StmtKind::Let {
      name: symbol::intern("bump"),
      ty: None,
      mutable: false,
      init: Expr {
        span: FileSpan::synthetic(),
        kind: ExprKind::Lambda {
          params: vec![Param { name: symbol::intern("x"), ty: u8_ty() }],
          ret: Some(u8_ty()),
          body: lambda_body,
        },
      },
    },
  };
  let call_and_return = Stmt {
    span: FileSpan::synthetic(),
    kind: StmtKind::Return(Some(Expr {
      span: FileSpan::synthetic(),
      kind: ExprKind::Call { callee: Box::new(ident("bump")), args: vec![int_lit(5)] },
    })),
  };
  let module = Module {
    decls: vec![Decl {
      span: FileSpan::synthetic(),
      kind: DeclKind::Function(FunctionDecl {
        name: symbol::intern("main"),
        params: vec![],
        ret: u8_ty(),
        error_enum: None,
        body: Block { span: FileSpan::synthetic(), stmts: vec![let_lambda, call_and_return] },
        attrs: vec![],
      }),
    }],
  };

  let compiler = Compiler::new();
  let mut opts = CompileOptions::default();
  opts.emit_mir = Some(std::path::PathBuf::from("scenario_a.mir"));
  let result = compiler.compile(&module, &opts).expect("a let-bound lambda should compile");
  let mir = result.mir_text.expect("emit_mir was requested");

  assert!(mir.contains("fn lambda$1:"), "the lambda should lift to its own top-level function:\n{mir}");
  assert!(mir.contains("call @func"), "the call site should be a direct call:\n{mir}");
  assert!(!mir.contains("callind"), "a let-bound lambda must never go through an indirect call:\n{mir}");
}
