//! The stable parse-tree contract (spec §6 Input).
//!
//! The grammar and its parser are an external collaborator (spec §1
//! Non-goals): this module defines the shape of the tree the parser is
//! expected to hand us, not how it is produced. Every node carries the
//! `FileSpan` the parser recorded for it, since diagnostics must be able to
//! point back at source text the analyzer never sees directly.

use serde::{Deserialize, Serialize};
use crate::span::FileSpan;
use crate::symbol::Symbol;

/// A whole compilation unit as handed to the analyzer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Module {
  pub decls: Vec<Decl>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Decl {
  pub span: FileSpan,
  pub kind: DeclKind,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum DeclKind {
  Function(FunctionDecl),
  Struct(StructDecl),
  Enum(EnumDecl),
  BitStruct(BitStructDecl),
  Interface(InterfaceDecl),
  Impl(ImplDecl),
  ErrorEnum(ErrorEnumDecl),
  /// `@target("name") { decls }`: the block participates only when the
  /// active backend name equals the literal (spec §4.5).
  TargetGate { backend: String, decls: Vec<Decl> },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TypeExpr {
  pub span: FileSpan,
  pub kind: TypeExprKind,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum TypeExprKind {
  Name(Symbol),
  Ptr { mutable: bool, target: Box<TypeExpr> },
  Array { elem: Box<TypeExpr>, len: u32 },
  Func { params: Vec<TypeExpr>, ret: Box<TypeExpr> },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Param {
  pub name: Symbol,
  pub ty: TypeExpr,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FunctionDecl {
  pub name: Symbol,
  pub params: Vec<Param>,
  pub ret: TypeExpr,
  /// Present when the function is declared with a trailing `?` and an
  /// error-enum (spec §4.2 Error propagation).
  pub error_enum: Option<Symbol>,
  pub body: Block,
  pub attrs: Vec<Attr>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Attr {
  Inline,
  Pure,
  Interrupt,
  NoSmc,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StructDecl {
  pub name: Symbol,
  pub fields: Vec<Param>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnumVariantDecl {
  pub name: Symbol,
  pub discriminant: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnumDecl {
  pub name: Symbol,
  pub variants: Vec<EnumVariantDecl>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorEnumDecl {
  pub name: Symbol,
  pub variants: Vec<EnumVariantDecl>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BitFieldDecl {
  pub name: Symbol,
  pub width: u8,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BitStructDecl {
  pub name: Symbol,
  pub fields: Vec<BitFieldDecl>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InterfaceMethodDecl {
  pub name: Symbol,
  pub params: Vec<Param>,
  pub ret: TypeExpr,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InterfaceDecl {
  pub name: Symbol,
  pub methods: Vec<InterfaceMethodDecl>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImplDecl {
  pub interface: Symbol,
  pub for_type: Symbol,
  pub methods: Vec<FunctionDecl>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Block {
  pub span: FileSpan,
  pub stmts: Vec<Stmt>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Stmt {
  pub span: FileSpan,
  pub kind: StmtKind,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum StmtKind {
  Let { name: Symbol, ty: Option<TypeExpr>, mutable: bool, init: Expr },
  Assign { target: Expr, value: Expr },
  Expr(Expr),
  Return(Option<Expr>),
  If { cond: Expr, then: Block, els: Option<Block> },
  While { cond: Expr, body: Block },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Expr {
  pub span: FileSpan,
  pub kind: ExprKind,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum BinOp { Add, Sub, Mul, Div, And, Or, BitAnd, BitOr, BitXor, Shl, Shr, Eq, Ne, Lt, Le, Gt, Ge }

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum UnOp { Neg, Not, BitNot, Deref, Ref }

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ExprKind {
  IntLit(i64),
  BoolLit(bool),
  StrLit(String),
  Ident(Symbol),
  Binary(BinOp, Box<Expr>, Box<Expr>),
  Unary(UnOp, Box<Expr>),
  Call { callee: Box<Expr>, args: Vec<Expr> },
  /// `obj.method(args)`, resolved by the analyzer to either a direct
  /// interface-implementation call or a struct method call (spec §4.2).
  MethodCall { recv: Box<Expr>, method: Symbol, args: Vec<Expr> },
  Field { base: Box<Expr>, field: Symbol },
  Index { base: Box<Expr>, index: Box<Expr> },
  Cast { expr: Box<Expr>, ty: TypeExpr },
  /// `|params| => ret { body }` or `|params| body_expr`.
  Lambda { params: Vec<Param>, ret: Option<TypeExpr>, body: Block },
  ArrayLit(Vec<Expr>),
  StructLit { name: Symbol, fields: Vec<(Symbol, Expr)> },
  /// Postfix `?`: propagate the callee's error to the enclosing function.
  Try(Box<Expr>),
  /// `lhs ?? rhs`: yield `lhs` on success, evaluate `rhs` on error.
  TryOr(Box<Expr>, Box<Expr>),
  /// `@error(Variant)`: construct an error-enum discriminant to re-raise.
  RaiseError { error_enum: Symbol, variant: Symbol },
  Case { scrutinee: Box<Expr>, arms: Vec<CaseArm> },
  /// One link of an iterator chain: `.map(f)`, `.filter(f)`, `.forEach(f)`,
  /// chained onto a receiver that is itself an `Expr` (spec §4.2 Iterator
  /// chain lowering). `.iter()` is a no-op marker kept only for source
  /// fidelity; it does not appear in the lowered chain.
  IterOp { recv: Box<Expr>, op: IterOpKind, lambda: Box<Expr> },
  IterSource(Box<Expr>),
  Block(Block),
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum IterOpKind { Map, Filter, ForEach }

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaseArm {
  pub pattern: Pattern,
  pub body: Expr,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Pattern {
  Wildcard,
  IntLit(i64),
  IntRange(i64, i64),
  EnumVariant { enum_name: Symbol, variant: Symbol },
}
