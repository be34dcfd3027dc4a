//! Scenario F (spec §8, §4.4): an eligible parameter is anchored as a
//! patchable immediate, every call site patches it instead of passing it
//! through the ordinary ABI, and the patch table records the anchor and
//! both call sites.

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

fn call_stmt(name: &str, callee: &str, args: Vec<Expr>) -> Stmt {
  Stmt {
    span: FileSpan::synthetic(),
    kind: StmtKind::Let {
      name: symbol::intern(name),
      ty: None,
      mutable: false,
      init: Expr { span: FileSpan::synthetic(), kind: ExprKind::Call { callee: Box::new(ident(callee)), args } },
    },
  }
}

#[test]
fn anchored_parameter_is_patched_at_every_call_site() {
  let scale = Decl {
    span: FileSpan::synthetic(),
    kind: DeclKind::Function(FunctionDecl {
      name: symbol::intern("scale"),
      params: vec![Param { name: symbol::intern("x"), ty: u8_ty() }],
      ret: u8_ty(),
      error_enum: None,
      body: Block {
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
                stmts: vec![Stmt { span: FileSpan::synthetic(), kind: StmtKind::Return(Some(int_lit(0))) }],
              },
              els: None,
            },
          },
          Stmt { span: FileSpan::synthetic(), kind: StmtKind::Return(Some(ident("x"))) },
        ],
      },
      attrs: vec![],
    }),
  };
  let main = Decl {
    span: FileSpan::synthetic(),
    kind: DeclKind::Function(FunctionDecl {
      name: symbol::intern("main"),
      params: vec![],
      ret: u8_ty(),
      error_enum: None,
      body: Block {
        span: FileSpan::synthetic(),
        stmts: vec![
          call_stmt("p", "scale", vec![int_lit(3)]),
          call_stmt("q", "scale", vec![int_lit(9)]),
          Stmt { span: FileSpan::synthetic(), kind: StmtKind::Return(Some(ident("q"))) },
        ],
      },
      attrs: vec![],
    }),
  };

  let module = Module { decls: vec![scale, main] };
  let compiler = Compiler::new();
  let mut opts = CompileOptions::default();
  opts.emit_patch_table = Some(std::path::PathBuf::from("scenario_f.json"));
  let result = compiler.compile(&module, &opts).expect("a function with an SMC-eligible parameter should compile");

  let table = result.output.patch_table;
  assert_eq!(table.entries.len(), 1, "scale's one eligible parameter gets one anchor: {table:?}");
  let entry = &table.entries[0];
  assert_eq!(entry.function, "scale");
  assert_eq!(entry.parameter, "p0");
  assert_eq!(entry.call_sites.len(), 2, "both call sites must patch the anchor: {entry:?}");

  assert!(result.output.assembly.contains("EQU"), "the anchor's patchable address must be exported:\n{}", result.output.assembly);
  assert!(result.output.assembly.contains("CALL scale"), "call sites must still reach scale:\n{}", result.output.assembly);
}
