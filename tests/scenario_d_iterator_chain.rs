//! Scenario D (spec §8, §4.2): a `.map().filter().forEach()` chain fuses
//! into a single counted loop over the source array instead of
//! materializing an intermediate array per link.

use minzc::config::CompileOptions;
use minzc::span::FileSpan;
use minzc::types::ast::*;
use minzc::{symbol, Compiler};

fn u8_ty() -> TypeExpr {
  TypeExpr { span: FileSpan::synthetic(), kind: TypeExprKind::Name(symbol::intern("u8")) }
}

fn void_ty() -> TypeExpr {
  TypeExpr { span: FileSpan::synthetic(), kind: TypeExprKind::Name(symbol::intern("void")) }
}

fn array_ty(elem: TypeExpr, len: u32) -> TypeExpr {
  TypeExpr { span: FileSpan::synthetic(), kind: TypeExprKind::Array { elem: Box::new(elem), len } }
}

fn int_lit(n: i64) -> Expr {
  Expr { span: FileSpan::synthetic(), kind: ExprKind::IntLit(n) }
}

fn ident(name: &str) -> Expr {
  Expr { span: FileSpan::synthetic(), kind: ExprKind::Ident(symbol::intern(name)) }
}

fn lambda(param: &str, body: Block) -> Expr {
  Expr {
    span: FileSpan::synthetic(),
    kind: ExprKind::Lambda { params: vec![Param { name: symbol::intern(param), ty: u8_ty() }], ret: None, body },
  }
}

fn expr_stmt(e: Expr) -> Stmt {
  Stmt { span: FileSpan::synthetic(), kind: StmtKind::Expr(e) }
}

#[test]
fn map_filter_foreach_chain_fuses_into_one_loop() {
  let sink = Decl {
    span: FileSpan::synthetic(),
    kind: DeclKind::Function(FunctionDecl {
      name: symbol::intern("sink"),
      params: vec![Param { name: symbol::intern("x"), ty: u8_ty() }],
      ret: void_ty(),
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
              then: Block { span: FileSpan::synthetic(), stmts: vec![Stmt { span: FileSpan::synthetic(), kind: StmtKind::Return(None) }] },
              els: None,
            },
          },
          Stmt { span: FileSpan::synthetic(), kind: StmtKind::Return(None) },
        ],
      },
      attrs: vec![],
    }),
  };

  let map_body = Block {
    span: FileSpan::synthetic(),
    stmts: vec![expr_stmt(Expr {
      span: FileSpan::synthetic(),
      kind: ExprKind::Binary(BinOp::Add, Box::new(ident("v")), Box::new(int_lit(1))),
    })],
  };
  let filter_body = Block {
    span: FileSpan::synthetic(),
    stmts: vec![expr_stmt(Expr {
      span: FileSpan::synthetic(),
      kind: ExprKind::Binary(BinOp::Gt, Box::new(ident("v")), Box::new(int_lit(0))),
    })],
  };
  let foreach_body = Block {
    span: FileSpan::synthetic(),
    stmts: vec![expr_stmt(Expr {
      span: FileSpan::synthetic(),
      kind: ExprKind::Call { callee: Box::new(ident("sink")), args: vec![ident("v")] },
    })],
  };

  let map_chain = Expr {
    span: FileSpan::synthetic(),
    kind: ExprKind::IterOp { recv: Box::new(ident("xs")), op: IterOpKind::Map, lambda: Box::new(lambda("v", map_body)) },
  };
  let filter_chain = Expr {
    span: FileSpan::synthetic(),
    kind: ExprKind::IterOp { recv: Box::new(map_chain), op: IterOpKind::Filter, lambda: Box::new(lambda("v", filter_body)) },
  };
  let foreach_chain = Expr {
    span: FileSpan::synthetic(),
    kind: ExprKind::IterOp { recv: Box::new(filter_chain), op: IterOpKind::ForEach, lambda: Box::new(lambda("v", foreach_body)) },
  };

  let xs_let = Stmt {
    span: FileSpan::synthetic(),
    kind: StmtKind::Let {
      name: symbol::intern("xs"),
      ty: Some(array_ty(u8_ty(), 3)),
      mutable: false,
      init: Expr { span: FileSpan::synthetic(), kind: ExprKind::ArrayLit(vec![int_lit(1), int_lit(2), int_lit(3)]) },
    },
  };
  let main = Decl {
    span: FileSpan::synthetic(),
    kind: DeclKind::Function(FunctionDecl {
      name: symbol::intern("main"),
      params: vec![],
      ret: void_ty(),
      error_enum: None,
      body: Block {
        span: FileSpan::synthetic(),
        stmts: vec![xs_let, expr_stmt(foreach_chain), Stmt { span: FileSpan::synthetic(), kind: StmtKind::Return(None) }],
      },
      attrs: vec![],
    }),
  };

  let module = Module { decls: vec![sink, main] };
  let compiler = Compiler::new();
  let mut opts = CompileOptions::default();
  opts.emit_mir = Some(std::path::PathBuf::from("scenario_d.mir"));
  let result = compiler.compile(&module, &opts).expect("a fused map/filter/forEach chain should compile");
  let mir = result.mir_text.expect("emit_mir was requested");

  assert_eq!(mir.matches("loadidx").count(), 1, "the source array must be read exactly once per element, by one fused loop:\n{mir}");
  assert!(mir.contains("call @func"), "forEach's body must still reach its call:\n{mir}");
}
