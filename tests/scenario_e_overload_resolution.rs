//! Scenario E (spec §8, §4.1(4)): two overloads of the same name are kept
//! as distinct MIR functions under their own type-encoded mangled symbols,
//! and each call site resolves to the matching overload at compile time —
//! never a shared, overwritten declaration.

use minzc::config::CompileOptions;
use minzc::span::FileSpan;
use minzc::types::ast::*;
use minzc::{symbol, Compiler};

fn named_ty(name: &str) -> TypeExpr {
  TypeExpr { span: FileSpan::synthetic(), kind: TypeExprKind::Name(symbol::intern(name)) }
}

fn int_lit(n: i64) -> Expr {
  Expr { span: FileSpan::synthetic(), kind: ExprKind::IntLit(n) }
}

fn ident(name: &str) -> Expr {
  Expr { span: FileSpan::synthetic(), kind: ExprKind::Ident(symbol::intern(name)) }
}

fn min_overload(ty_name: &str) -> Decl {
  Decl {
    span: FileSpan::synthetic(),
    kind: DeclKind::Function(FunctionDecl {
      name: symbol::intern("min"),
      params: vec![Param { name: symbol::intern("a"), ty: named_ty(ty_name) }, Param { name: symbol::intern("b"), ty: named_ty(ty_name) }],
      ret: named_ty(ty_name),
      error_enum: None,
      body: Block {
        span: FileSpan::synthetic(),
        stmts: vec![
          Stmt {
            span: FileSpan::synthetic(),
            kind: StmtKind::If {
              cond: Expr {
                span: FileSpan::synthetic(),
                kind: ExprKind::Binary(BinOp::Lt, Box::new(ident("a")), Box::new(ident("b"))),
              },
              then: Block { span: FileSpan::synthetic(), stmts: vec![Stmt { span: FileSpan::synthetic(), kind: StmtKind::Return(Some(ident("a"))) }] },
              els: None,
            },
          },
          Stmt { span: FileSpan::synthetic(), kind: StmtKind::Return(Some(ident("b"))) },
        ],
      },
      attrs: vec![],
    }),
  }
}

fn let_stmt(name: &str, ty: TypeExpr, init: Expr) -> Stmt {
  Stmt { span: FileSpan::synthetic(), kind: StmtKind::Let { name: symbol::intern(name), ty: Some(ty), mutable: false, init } }
}

#[test]
fn each_overload_keeps_its_own_mangled_symbol_and_call_site() {
  let min_u8 = min_overload("u8");
  let min_u16 = min_overload("u16");

  let body = Block {
    span: FileSpan::synthetic(),
    stmts: vec![
      let_stmt("a8", named_ty("u8"), int_lit(1)),
      let_stmt("b8", named_ty("u8"), int_lit(2)),
      let_stmt("r8", named_ty("u8"), Expr {
        span: FileSpan::synthetic(),
        kind: ExprKind::Call { callee: Box::new(ident("min")), args: vec![ident("a8"), ident("b8")] },
      }),
      let_stmt("a16", named_ty("u16"), int_lit(300)),
      let_stmt("b16", named_ty("u16"), int_lit(400)),
      let_stmt("r16", named_ty("u16"), Expr {
        span: FileSpan::synthetic(),
        kind: ExprKind::Call { callee: Box::new(ident("min")), args: vec![ident("a16"), ident("b16")] },
      }),
      Stmt { span: FileSpan::synthetic(), kind: StmtKind::Return(Some(ident("r16"))) },
    ],
  };
  let main = Decl {
    span: FileSpan::synthetic(),
    kind: DeclKind::Function(FunctionDecl {
      name: symbol::intern("main"),
      params: vec![],
      ret: named_ty("u16"),
      error_enum: None,
      body,
      attrs: vec![],
    }),
  };

  let module = Module { decls: vec![min_u8, min_u16, main] };
  let compiler = Compiler::new();
  let mut opts = CompileOptions::default();
  opts.emit_mir = Some(std::path::PathBuf::from("scenario_e.mir"));
  // This is the exact shape that used to panic at `f.mir.expect(...)`: a
  // second overload's MIR shell was never allocated because both were keyed
  // by the same unmangled `min`.
  let result = compiler.compile(&module, &opts).expect("overload resolution must not panic on the second overload");
  let mir = result.mir_text.expect("emit_mir was requested");

  assert!(mir.contains("fn min$u8$u8:"), "the u8 overload keeps its own type-encoded symbol:\n{mir}");
  assert!(mir.contains("fn min$u16$u16:"), "the u16 overload keeps its own type-encoded symbol:\n{mir}");
  assert!(result.output.assembly.contains("CALL min$u8$u8"), "the u8 call site must resolve to the u8 overload:\n{}", result.output.assembly);
  assert!(result.output.assembly.contains("CALL min$u16$u16"), "the u16 call site must resolve to the u16 overload:\n{}", result.output.assembly);
}
