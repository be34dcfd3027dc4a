//! Scenario B (spec §8): an interface method call resolves, at the `let`
//! site binding the concrete value, to one direct call of the chosen
//! implementation — never a vtable indirection.

use minzc::config::CompileOptions;
use minzc::span::FileSpan;
use minzc::types::ast::*;
use minzc::{symbol, Compiler};

fn u8_ty() -> TypeExpr {
  TypeExpr { span: FileSpan::synthetic(), kind: TypeExprKind::Name(symbol::intern("u8")) }
}

fn named_ty(name: &str) -> TypeExpr {
  TypeExpr { span: FileSpan::synthetic(), kind: TypeExprKind::Name(symbol::intern(name)) }
}

fn int_lit(n: i64) -> Expr {
  Expr { span: FileSpan::synthetic(), kind: ExprKind::IntLit(n) }
}

fn ident(name: &str) -> Expr {
  Expr { span: FileSpan::synthetic(), kind: ExprKind::Ident(symbol::intern(name)) }
}

fn let_stmt(name: &str, ty: TypeExpr, init: Expr) -> Stmt {
  Stmt {
    span: FileSpan::synthetic(),
    kind: StmtKind::Let { name: symbol::intern(name), ty: Some(ty), mutable: false, init },
  }
}

#[test]
fn interface_method_call_compiles_to_a_direct_call_of_the_chosen_impl() {
  let square = Decl {
    span: FileSpan::synthetic(),
    kind: DeclKind::Struct(StructDecl {
      name: symbol::intern("Square"),
      fields: vec![Param { name: symbol::intern("side"), ty: u8_ty() }],
    }),
  };
  let shape = Decl {
    span: FileSpan::synthetic(),
    kind: DeclKind::Interface(InterfaceDecl {
      name: symbol::intern("Shape"),
      methods: vec![InterfaceMethodDecl { name: symbol::intern("area"), params: vec![], ret: u8_ty() }],
    }),
  };
  let side_field = Expr {
    span: FileSpan::synthetic(),
    kind: ExprKind::Field { base: Box::new(ident("self")), field: symbol::intern("side") },
  };
  let area_body = Block {
    span: FileSpan::synthetic(),
    stmts: vec![
      Stmt {
        span: FileSpan::synthetic(),
        kind: StmtKind::If {
          cond: Expr {
            span: FileSpan::synthetic(),
            kind: ExprKind::Binary(BinOp::Eq, Box::new(side_field.clone()), Box::new(int_lit(0))),
          },
          then: Block {
            span: FileSpan::synthetic(),
            stmts: vec![Stmt { span: FileSpan::synthetic(), kind: StmtKind::Return(Some(int_lit(0))) }],
          },
          els: None,
        },
      },
      Stmt { span: FileSpan::synthetic(), kind: StmtKind::Return(Some(side_field)) },
    ],
  };
  let impl_decl = Decl {
    span: FileSpan::synthetic(),
    kind: DeclKind::Impl(ImplDecl {
      interface: symbol::intern("Shape"),
      for_type: symbol::intern("Square"),
      methods: vec![FunctionDecl {
        name: symbol::intern("area"),
        params: vec![Param { name: symbol::intern("self"), ty: named_ty("Square") }],
        ret: u8_ty(),
        error_enum: None,
        body: area_body,
        attrs: vec![],
      }],
    }),
  };

  let sq_let = let_stmt(
    "sq",
    named_ty("Square"),
    Expr {
      span: FileSpan::synthetic(),
      kind: ExprKind::StructLit { name: symbol::intern("Square"), fields: vec![(symbol::intern("side"), int_lit(7))] },
    },
  );
  let shape_let = let_stmt("shape", named_ty("Shape"), ident("sq"));
  let ret = Stmt {
    span: FileSpan::synthetic(),
    kind: StmtKind::Return(Some(Expr {
      span: FileSpan::synthetic(),
      kind: ExprKind::MethodCall { recv: Box::new(ident("shape")), method: symbol::intern("area"), args: vec![] },
    })),
  };
  let main = Decl {
    span: FileSpan::synthetic(),
    kind: DeclKind::Function(FunctionDecl {
      name: symbol::intern("main"),
      params: vec![],
      ret: u8_ty(),
      error_enum: None,
      body: Block { span: FileSpan::synthetic(), stmts: vec![sq_let, shape_let, ret] },
      attrs: vec![],
    }),
  };

  let module = Module { decls: vec![square, shape, impl_decl, main] };
  let compiler = Compiler::new();
  let result = compiler.compile(&module, &CompileOptions::default()).expect("interface dispatch should compile");

  assert!(result.output.assembly.contains("Square$Shape$area:"), "the implementation must be emitted under its mangled label:\n{}", result.output.assembly);
  assert!(result.output.assembly.contains("CALL Square$Shape$area"), "the call site must call the implementation directly:\n{}", result.output.assembly);
}
