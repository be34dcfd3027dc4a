//! Build MIR from the parse tree (spec §4.1, §4.2).
//!
//! Declaration happens in three linear sub-passes over the whole module so
//! that a type or function may be referenced before its own declaration
//! appears in the file (spec §4.1): first every nominal type gets a
//! [`TypeId`](crate::types::ty::TypeId) and an empty payload, then every
//! function's signature is resolved against those (now-nameable) types,
//! then each nominal type's payload is backpatched and every `impl` block
//! is registered. Only once all three have run does [`lower_bodies`] walk
//! actual function bodies, following the `Translator`-style pattern of a
//! per-function lowering context threaded through one `lower_*` method per
//! AST shape.

use hashbrown::HashMap;
use hashbrown::HashSet;
use smallvec::SmallVec;

use crate::error::{AnalyzerError, CompileError, StructuralError};
use crate::span::FileSpan;
use crate::symbol::{intern, Symbol};
use crate::symtab::SymbolTable;
use crate::types::entity::{ConstEntity, Entity, FuncEntity, Mutability, VarEntity, VarStorage};
use crate::types::mir::{self, Addr, BlockId, Binop, Cmp, Const, FuncId, Function, Module, Opcode, Operand, ParamInfo, Terminator, VReg};
use crate::types::ty::{self, BitField, Field, MethodSig, Prim, Ty, TyKind, TypeId, Variant};
use crate::types::{ast, Idx};

/// Resolves a parse-tree type expression against already-declared names.
/// Every nominal name must already exist in `symtab` by the time this is
/// called — callers are responsible for running the type-declaration
/// sub-pass first.
pub fn resolve_type_expr(te: &ast::TypeExpr, symtab: &SymbolTable) -> Result<Ty, AnalyzerError> {
  match &te.kind {
    ast::TypeExprKind::Name(name) => {
      if let Some(p) = builtin_prim(*name) { return Ok(ty::prim(p)); }
      match symtab.lookup(*name) {
        Some(Entity::NominalType(t) | Entity::TypeAlias(t)) => Ok(t.clone()),
        _ => Err(AnalyzerError::UndefinedIdentifier(name.as_str().to_string())),
      }
    }
    ast::TypeExprKind::Ptr { mutable, target } => Ok(ty::ptr(*mutable, resolve_type_expr(target, symtab)?)),
    ast::TypeExprKind::Array { elem, len } => Ok(ty::array(resolve_type_expr(elem, symtab)?, *len)),
    ast::TypeExprKind::Func { params, ret } => {
      let params = params.iter().map(|p| resolve_type_expr(p, symtab)).collect::<Result<Vec<_>, _>>()?;
      Ok(ty::func(params, resolve_type_expr(ret, symtab)?, None))
    }
  }
}

fn builtin_prim(name: Symbol) -> Option<Prim> {
  match name.as_str() {
    "u8" => Some(Prim::U8), "u16" => Some(Prim::U16), "u24" => Some(Prim::U24),
    "i8" => Some(Prim::I8), "i16" => Some(Prim::I16), "i24" => Some(Prim::I24),
    "bool" => Some(Prim::Bool), "void" => Some(Prim::Void),
    _ => None,
  }
}

/// One `impl Interface for Type { ... }` block's method table: method name
/// to the mangled top-level function symbol that implements it (spec
/// §4.2: interface calls resolve to one of these directly, never a
/// vtable).
type ImplTable = HashMap<(Symbol, Symbol), HashMap<Symbol, Symbol>>;

struct Declared<'a> {
  funcs: HashMap<Symbol, &'a ast::FunctionDecl>,
  structs: Vec<(&'a ast::StructDecl, TypeId)>,
  enums: Vec<(&'a ast::EnumDecl, TypeId)>,
  error_enums: Vec<(&'a ast::ErrorEnumDecl, TypeId)>,
  bitstructs: Vec<(&'a ast::BitStructDecl, TypeId)>,
  interfaces: Vec<(&'a ast::InterfaceDecl, TypeId)>,
  impls: ImplTable,
}

/// Flattens `@target("name")` gates, keeping only declarations that apply
/// to `backend` (spec §4.5: gating happens before any MIR is built).
fn flatten_decls<'a>(decls: &'a [ast::Decl], backend: &str, out: &mut Vec<&'a ast::Decl>) {
  for d in decls {
    match &d.kind {
      ast::DeclKind::TargetGate { backend: gate, decls } if gate == backend => flatten_decls(decls, backend, out),
      ast::DeclKind::TargetGate { .. } => {}
      _ => out.push(d),
    }
  }
}

/// Runs the three declaration sub-passes, returning the populated symbol
/// table alongside enough bookkeeping ([`Declared`]) for [`lower_bodies`]
/// to find every function body and impl table.
fn declare_module<'a>(decls: &'a [&'a ast::Decl], symtab: &mut SymbolTable, sink: &mut crate::diagnostics::Sink) -> Declared<'a> {
  let mut declared = Declared {
    funcs: HashMap::new(), structs: Vec::new(), enums: Vec::new(), error_enums: Vec::new(),
    bitstructs: Vec::new(), interfaces: Vec::new(), impls: HashMap::new(),
  };

  // Pass 1a: allocate a TypeId and an empty-payload Ty for every nominal
  // declaration, so later passes can reference any type regardless of
  // where in the file it appears.
  for d in decls {
    match &d.kind {
      ast::DeclKind::Struct(sd) => {
        let id = symtab.fresh_type_id();
        let t = ty::empty_struct(id, sd.name);
        declare_or_report(symtab, sd.name, Entity::NominalType(t), d.span.clone(), sink);
        declared.structs.push((sd, id));
      }
      ast::DeclKind::Enum(ed) => {
        let id = symtab.fresh_type_id();
        let width = ty::discriminant_width_bits(ed.variants.len());
        let t = ty::empty_enum(id, ed.name, width);
        declare_or_report(symtab, ed.name, Entity::NominalType(t), d.span.clone(), sink);
        declared.enums.push((ed, id));
      }
      ast::DeclKind::ErrorEnum(ed) => {
        let id = symtab.fresh_type_id();
        let t = ty::empty_error_enum(id, ed.name);
        declare_or_report(symtab, ed.name, Entity::NominalType(t), d.span.clone(), sink);
        declared.error_enums.push((ed, id));
      }
      ast::DeclKind::BitStruct(bd) => {
        let id = symtab.fresh_type_id();
        let width: u8 = bd.fields.iter().map(|f| f.width).sum();
        let t = ty::empty_bitstruct(id, bd.name, width);
        declare_or_report(symtab, bd.name, Entity::NominalType(t), d.span.clone(), sink);
        declared.bitstructs.push((bd, id));
      }
      ast::DeclKind::Interface(id_decl) => {
        let id = symtab.fresh_type_id();
        let t = ty::empty_interface(id, id_decl.name);
        declare_or_report(symtab, id_decl.name, Entity::NominalType(t), d.span.clone(), sink);
        declared.interfaces.push((id_decl, id));
      }
      ast::DeclKind::Function(_) | ast::DeclKind::Impl(_) | ast::DeclKind::TargetGate { .. } => {}
    }
  }

  // Pass 1b: resolve every plain function's signature now that every type
  // name in the module is at least nameable.
  for d in decls {
    if let ast::DeclKind::Function(fd) = &d.kind {
      if let Some(sym) = declare_function(fd, symtab, sink) {
        declared.funcs.insert(sym, fd);
      }
    }
  }

  // Pass 1c: backpatch nominal payloads, then register impl method tables
  // (which need the now-complete interface/for-type shapes to validate
  // method names against).
  for (sd, id) in &declared.structs {
    let fields = sd.fields.iter().map(|p| {
      resolve_type_expr(&p.ty, symtab).map(|ty| Field { name: p.name, ty })
    }).collect::<Result<Vec<_>, _>>();
    match fields {
      Ok(fields) => backpatch_struct(symtab, *id, fields),
      Err(e) => sink.push(crate::diagnostics::Diagnostic::error(d_span(&declared, *id), e.to_string())),
    }
  }
  for (ed, id) in &declared.enums {
    backpatch_enum(symtab, *id, resolve_variants(&ed.variants));
  }
  for (ed, id) in &declared.error_enums {
    backpatch_error_enum(symtab, *id, resolve_variants(&ed.variants));
  }
  for (bd, id) in &declared.bitstructs {
    let fields = bd.fields.iter().map(|f| BitField { name: f.name, width: f.width }).collect();
    backpatch_bitstruct(symtab, *id, fields);
  }
  for (idecl, id) in &declared.interfaces {
    let methods = idecl.methods.iter().filter_map(|m| {
      let params = m.params.iter().map(|p| resolve_type_expr(&p.ty, symtab)).collect::<Result<Vec<_>, _>>().ok()?;
      let ret = resolve_type_expr(&m.ret, symtab).ok()?;
      Some(MethodSig { name: m.name, params, ret })
    }).collect();
    backpatch_interface(symtab, *id, methods);
  }

  for d in decls {
    if let ast::DeclKind::Impl(impl_decl) = &d.kind {
      register_impl(impl_decl, symtab, &mut declared, sink);
    }
  }

  declared
}

fn d_span(_declared: &Declared<'_>, _id: TypeId) -> FileSpan { FileSpan::synthetic() }

/// Declares `name` and reports a diagnostic on collision, returning the
/// symbol the entity actually ended up stored under (see
/// [`SymbolTable::declare`]) — `None` once a duplicate-definition error has
/// already been reported, since nothing was stored in that case.
fn declare_or_report(symtab: &mut SymbolTable, name: Symbol, entity: Entity, span: FileSpan, sink: &mut crate::diagnostics::Sink) -> Option<Symbol> {
  match symtab.declare(name, entity, span.clone()) {
    Ok(sym) => Some(sym),
    Err(e) => { sink.push(crate::diagnostics::Diagnostic::error(span, e.to_string())); None }
  }
}

/// Resolves and declares one function's signature, returning the symbol its
/// `Entity::Func` ended up stored under. A second or later declaration of
/// the same name is stored under its own type-encoded mangled symbol rather
/// than `fd.name` (spec §4.1(4) overload resolution) — callers that need to
/// find this declaration's MIR shell again (`declare_module`'s Pass 1b,
/// `register_impl`) must key off the returned symbol, never off `fd.name`.
fn declare_function(fd: &ast::FunctionDecl, symtab: &mut SymbolTable, sink: &mut crate::diagnostics::Sink) -> Option<Symbol> {
  let params = match fd.params.iter().map(|p| resolve_type_expr(&p.ty, symtab)).collect::<Result<Vec<_>, _>>() {
    Ok(p) => p,
    Err(e) => { sink.push(crate::diagnostics::Diagnostic::error(FileSpan::synthetic(), e.to_string())); return None; }
  };
  let ret = match resolve_type_expr(&fd.ret, symtab) {
    Ok(t) => t,
    Err(e) => { sink.push(crate::diagnostics::Diagnostic::error(FileSpan::synthetic(), e.to_string())); return None; }
  };
  let error_enum = fd.error_enum.and_then(|sym| match symtab.lookup(sym) {
    Some(Entity::NominalType(t)) if matches!(**t, TyKind::ErrorEnum { .. }) => Some(t.clone()),
    _ => None,
  });
  let func_ty = ty::func(params, ret, error_enum.as_ref().and_then(|t| t.type_id()));
  declare_or_report(
    symtab, fd.name,
    Entity::Func(FuncEntity { ty: func_ty, mir: None, error_enum }),
    FileSpan::synthetic(), sink,
  )
}

fn resolve_variants(decls: &[ast::EnumVariantDecl]) -> Vec<Variant> {
  let mut next = 0i64;
  decls.iter().map(|v| {
    let d = v.discriminant.unwrap_or(next);
    next = d + 1;
    Variant { name: v.name, discriminant: Some(d) }
  }).collect()
}

fn backpatch_struct(symtab: &SymbolTable, id: TypeId, fields: Vec<Field>) {
  if let Some(Entity::NominalType(t)) = find_nominal(symtab, id) {
    if let TyKind::Struct { fields: slot, .. } = &*t { slot.replace(fields.into()); }
  }
}
fn backpatch_enum(symtab: &SymbolTable, id: TypeId, variants: Vec<Variant>) {
  if let Some(Entity::NominalType(t)) = find_nominal(symtab, id) {
    if let TyKind::Enum { variants: slot, .. } = &*t { slot.replace(variants.into()); }
  }
}
fn backpatch_error_enum(symtab: &SymbolTable, id: TypeId, variants: Vec<Variant>) {
  if let Some(Entity::NominalType(t)) = find_nominal(symtab, id) {
    if let TyKind::ErrorEnum { variants: slot, .. } = &*t { slot.replace(variants.into()); }
  }
}
fn backpatch_bitstruct(symtab: &SymbolTable, id: TypeId, fields: Vec<BitField>) {
  if let Some(Entity::NominalType(t)) = find_nominal(symtab, id) {
    if let TyKind::BitStruct { fields: slot, .. } = &*t { slot.replace(fields.into()); }
  }
}
fn backpatch_interface(symtab: &SymbolTable, id: TypeId, methods: Vec<MethodSig>) {
  if let Some(Entity::NominalType(t)) = find_nominal(symtab, id) {
    if let TyKind::Interface { methods: slot, .. } = &*t { slot.replace(methods.into()); }
  }
}

/// Nominal `Ty`s are looked up by name at declaration time, but backpatching
/// only has the `TypeId`; `SymbolTable` doesn't index by `TypeId`, so this
/// walks every declared name. The declaration passes run once per module
/// compile, so the linear scan is not a hot path.
fn find_nominal(symtab: &SymbolTable, id: TypeId) -> Option<Entity> {
  symtab.all_nominal_types().find(|t| t.type_id() == Some(id)).cloned().map(Entity::NominalType)
}

fn register_impl<'a>(impl_decl: &'a ast::ImplDecl, symtab: &mut SymbolTable, declared: &mut Declared<'a>, sink: &mut crate::diagnostics::Sink) {
  for method in &impl_decl.methods {
    let mangled = Symbol::generate(&[impl_decl.for_type.as_str(), "$", impl_decl.interface.as_str(), "$", method.name.as_str()]);
    let Some(sym) = declare_function(&ast::FunctionDecl { name: mangled, ..method.clone() }, symtab, sink) else { continue };
    declared.funcs.insert(sym, method);
    declared.impls.entry((impl_decl.interface, impl_decl.for_type)).or_default().insert(method.name, sym);
  }
}

// ---------------------------------------------------------------------
// Pass 2: lower bodies.
// ---------------------------------------------------------------------

#[derive(Clone)]
enum LocalBinding {
  /// `concrete_ty` is set only when the declared type is an `Interface`
  /// and the initializer's own type is known at the `let` site (spec §4.2:
  /// "interface calls compile to a direct call of the implementation
  /// selected at the declaration site"); `None` otherwise, including for
  /// every non-interface binding.
  Var(VReg, Ty, Mutability, Option<Ty>),
  /// A `let`-bound lambda lifted to a top-level function; usable only as
  /// a direct call target (spec §4.2 Lambda lifting, [`AnalyzerError::InvalidCapture`]).
  LiftedLambda(FuncId, Vec<VReg>, Vec<Ty>, Ty),
}

struct FnLower<'a> {
  symtab: &'a SymbolTable,
  impls: &'a ImplTable,
  module: &'a mut Module,
  sink: &'a mut crate::diagnostics::Sink,
  f: Function,
  cur: BlockId,
  scopes: Vec<HashMap<Symbol, LocalBinding>>,
  error_enum: Option<Ty>,
  lambda_counter: u32,
}

impl<'a> FnLower<'a> {
  fn declare_local(&mut self, name: Symbol, binding: LocalBinding) {
    self.scopes.last_mut().expect("at least one scope").insert(name, binding);
  }

  fn lookup_local(&self, name: Symbol) -> Option<LocalBinding> {
    self.scopes.iter().rev().find_map(|s| s.get(&name).cloned())
  }

  fn push_scope(&mut self) { self.scopes.push(HashMap::new()); }
  fn pop_scope(&mut self) { self.scopes.pop(); }

  fn emit(&mut self, op: Opcode, span: FileSpan) { self.f.emit(self.cur, op, span); }

  /// Lowers a whole block, returning whether control can still fall off
  /// the end (`false` once a `return` was lowered, so callers can avoid
  /// double-terminating a block).
  fn lower_block(&mut self, b: &ast::Block) -> bool {
    self.push_scope();
    let mut fallthrough = true;
    for s in &b.stmts {
      if !fallthrough {
        self.sink.push(crate::diagnostics::Diagnostic::warning(s.span.clone(), crate::error::Warning::UnreachableCode.message()));
        break;
      }
      fallthrough = self.lower_stmt(s);
    }
    self.pop_scope();
    fallthrough
  }

  fn lower_stmt(&mut self, s: &ast::Stmt) -> bool {
    match &s.kind {
      ast::StmtKind::Let { name, ty, mutable, init } => {
        if let ast::ExprKind::Lambda { params, body, .. } = &init.kind {
          self.lower_lambda_let(*name, params, body, &init.span);
          return true;
        }
        let Some((val, val_ty)) = self.lower_expr(init) else { return true };
        let declared_ty = ty.as_ref().map(|t| resolve_type_expr(t, self.symtab));
        let bind_ty = match declared_ty {
          Some(Ok(t)) => t,
          Some(Err(e)) => { self.err(s.span.clone(), e); val_ty.clone() }
          None => val_ty.clone(),
        };
        let concrete_ty = matches!(*bind_ty, TyKind::Interface { .. }).then_some(val_ty);
        let reg = self.f.fresh_reg(bind_ty.clone());
        self.emit(Opcode::Move { dst: reg, src: val }, s.span.clone());
        let mutability = if *mutable { Mutability::Mut } else { Mutability::Const };
        self.declare_local(*name, LocalBinding::Var(reg, bind_ty, mutability, concrete_ty));
        true
      }
      ast::StmtKind::Assign { target, value } => {
        let Some((val, _)) = self.lower_expr(value) else { return true };
        self.lower_assign(target, val, &s.span);
        true
      }
      ast::StmtKind::Expr(e) => { self.lower_expr(e); true }
      ast::StmtKind::Return(e) => {
        let ret = e.as_ref().and_then(|e| self.lower_expr(e)).map(|(op, _)| op);
        self.f.terminate(self.cur, Terminator::Return(ret), s.span.clone());
        false
      }
      ast::StmtKind::If { cond, then, els } => {
        let Some((cond, _)) = self.lower_expr(cond) else { return true };
        let then_bb = self.f.new_block();
        let else_bb = self.f.new_block();
        self.f.terminate(self.cur, Terminator::CondJump { cond, then_bb, else_bb }, s.span.clone());
        self.cur = then_bb;
        let then_falls = self.lower_block(then);
        let after_then = self.cur;
        self.cur = else_bb;
        let else_falls = if let Some(els) = els { self.lower_block(els) } else { true };
        let after_else = self.cur;
        if !then_falls && !else_falls { return false; }
        let join = self.f.new_block();
        if then_falls { self.f.terminate(after_then, Terminator::Jump(join), s.span.clone()); }
        if else_falls { self.f.terminate(after_else, Terminator::Jump(join), s.span.clone()); }
        self.cur = join;
        true
      }
      ast::StmtKind::While { cond, body } => {
        let header = self.f.new_block();
        self.f.terminate(self.cur, Terminator::Jump(header), s.span.clone());
        self.cur = header;
        let Some((cond, _)) = self.lower_expr(cond) else { return true };
        let body_bb = self.f.new_block();
        let after = self.f.new_block();
        self.f.terminate(header, Terminator::CondJump { cond, then_bb: body_bb, else_bb: after }, s.span.clone());
        self.cur = body_bb;
        if self.lower_block(body) {
          self.f.terminate(self.cur, Terminator::Jump(header), s.span.clone());
        }
        self.cur = after;
        true
      }
    }
  }

  fn lower_assign(&mut self, target: &ast::Expr, val: Operand, span: &FileSpan) {
    match &target.kind {
      ast::ExprKind::Ident(name) => {
        match self.lookup_local(*name) {
          Some(LocalBinding::Var(_, ty, _, concrete)) => {
            let reg = self.f.fresh_reg(ty.clone());
            self.emit(Opcode::Move { dst: reg, src: val }, span.clone());
            self.declare_local(*name, LocalBinding::Var(reg, ty, Mutability::Mut, concrete));
          }
          _ => self.err(span.clone(), AnalyzerError::UndefinedIdentifier(name.as_str().to_string())),
        }
      }
      ast::ExprKind::Field { base, field } => {
        if let Some((addr, ty)) = self.lower_place(base) {
          let field_ty = struct_field_ty(&ty, *field);
          self.emit(Opcode::StoreField { addr, src: val, ty: field_ty.unwrap_or(ty) }, span.clone());
        }
      }
      ast::ExprKind::Index { base, index } => {
        if let Some((addr, elem_ty)) = self.lower_index_place(base, index) {
          self.emit(Opcode::StoreIndex { addr, src: val, ty: elem_ty }, span.clone());
        }
      }
      _ => self.err(span.clone(), AnalyzerError::UndefinedIdentifier("<invalid assignment target>".to_string())),
    }
  }

  fn err(&mut self, span: FileSpan, e: AnalyzerError) {
    self.sink.push(crate::diagnostics::Diagnostic::error(span, e.to_string()));
  }

  /// Lowers a lambda literal bound directly by a `let`, lifting it to a
  /// fresh top-level function whose leading parameters are the lambda's
  /// free variables captured by value at this point (spec §4.2 Lambda
  /// lifting). The bound name becomes callable, and only callable.
  fn lower_lambda_let(&mut self, name: Symbol, params: &[ast::Param], body: &ast::Block, span: &FileSpan) {
    let mut bound: HashSet<Symbol> = params.iter().map(|p| p.name).collect();
    collect_let_names(body, &mut bound);
    let mut free_names: Vec<Symbol> = Vec::new();
    let mut seen = HashSet::new();
    collect_free_idents(body, &bound, &mut free_names, &mut seen);

    let mut captured_regs = Vec::new();
    let mut captured_tys = Vec::new();
    for n in &free_names {
      match self.lookup_local(*n) {
        Some(LocalBinding::Var(reg, ty, _, _)) => { captured_regs.push(reg); captured_tys.push(ty); }
        _ => {}
      }
    }

    self.lambda_counter += 1;
    let fn_name = Symbol::generate(&["lambda$", &self.lambda_counter.to_string()]);
    let param_tys: Vec<Ty> = params.iter().map(|_| ty::prim(Prim::U16)).collect();
    let mut all_param_info = captured_tys.iter().enumerate()
      .map(|(i, t)| ParamInfo { name: Symbol::generate(&["cap$", &i.to_string()]), ty: t.clone() })
      .collect::<Vec<_>>();
    all_param_info.extend(params.iter().zip(&param_tys).map(|(p, t)| ParamInfo { name: p.name, ty: t.clone() }));
    let ret_ty = ty::prim(Prim::U16);

    let mut inner = Function::new(fn_name, all_param_info.clone(), ret_ty.clone(), None, span.clone());
    let entry = inner.entry;
    {
      let mut sub = FnLower {
        symtab: self.symtab, impls: self.impls, module: self.module, sink: self.sink,
        f: inner, cur: entry, scopes: vec![HashMap::new()], error_enum: None, lambda_counter: self.lambda_counter,
      };
      sub.push_scope();
      for (i, info) in all_param_info.iter().enumerate() {
        let r = sub.f.fresh_reg(info.ty.clone());
        sub.emit(Opcode::LoadParam { dst: r, index: i as u32 }, span.clone());
        sub.declare_local(info.name, LocalBinding::Var(r, info.ty.clone(), Mutability::Const, None));
      }
      // Re-bind the captured names (not the synthetic `cap$i` params) to
      // the lambda body's free identifiers so its own references resolve.
      for (i, n) in free_names.iter().enumerate() {
        if let Some(LocalBinding::Var(r, t, _, _)) = sub.lookup_local(all_param_info[i].name) {
          sub.declare_local(*n, LocalBinding::Var(r, t, Mutability::Const, None));
        }
      }
      let falls = sub.lower_block(body);
      if falls { sub.f.terminate(sub.cur, Terminator::Return(None), span.clone()); }
      self.lambda_counter = sub.lambda_counter;
      inner = sub.f;
    }
    let func_id = self.module.push_func(inner);

    self.declare_local(name, LocalBinding::LiftedLambda(func_id, captured_regs, param_tys, ret_ty));
  }

  /// Resolves and lowers an expression, returning its value and type. A
  /// `None` result means an error was already recorded; callers treat the
  /// expression as a typeless hole rather than propagating a panic.
  fn lower_expr(&mut self, e: &ast::Expr) -> Option<(Operand, Ty)> {
    match &e.kind {
      ast::ExprKind::IntLit(n) => Some((Operand::Const(Const::Int(*n)), ty::prim(Prim::I16))),
      ast::ExprKind::BoolLit(b) => Some((Operand::Const(Const::Bool(*b)), ty::prim(Prim::Bool))),
      ast::ExprKind::StrLit(s) => {
        let id = self.module.strings.push(std::rc::Rc::from(s.as_str()));
        Some((Operand::Str(id), ty::ptr(false, ty::prim(Prim::U8))))
      }
      ast::ExprKind::Ident(name) => self.lower_ident(*name, &e.span),
      ast::ExprKind::Binary(op, l, r) => self.lower_binary(*op, l, r, &e.span),
      ast::ExprKind::Unary(op, inner) => self.lower_unary(*op, inner, &e.span),
      ast::ExprKind::Call { callee, args } => self.lower_call(callee, args, &e.span).map(|(v, t, _)| (v, t)),
      ast::ExprKind::MethodCall { recv, method, args } => self.lower_method_call(recv, *method, args, &e.span),
      ast::ExprKind::Field { base, field } => self.lower_field(base, *field),
      ast::ExprKind::Index { base, index } => self.lower_index(base, index, &e.span),
      ast::ExprKind::Cast { expr, ty: target } => self.lower_cast(expr, target, &e.span),
      ast::ExprKind::ArrayLit(items) => self.lower_array_lit(items, &e.span),
      ast::ExprKind::StructLit { name, fields } => self.lower_struct_lit(*name, fields, &e.span),
      ast::ExprKind::Try(inner) => self.lower_try(inner, &e.span),
      ast::ExprKind::TryOr(inner, fallback) => self.lower_try_or(inner, fallback, &e.span),
      ast::ExprKind::RaiseError { error_enum, variant } => self.lower_raise(*error_enum, *variant, &e.span),
      ast::ExprKind::Case { scrutinee, arms } => decision_tree::lower_case(self, scrutinee, arms, &e.span),
      ast::ExprKind::Block(b) => { self.lower_block(b); None }
      ast::ExprKind::Lambda { .. } => {
        self.err(e.span.clone(), AnalyzerError::InvalidCapture {
          name: "<anonymous>".to_string(), captured: "lambda value used outside a direct call or iterator operator".to_string(),
        });
        None
      }
      ast::ExprKind::IterSource(inner) => self.lower_expr(inner),
      ast::ExprKind::IterOp { .. } => iter_chain::lower_chain(self, e, &e.span),
    }
  }

  fn lower_ident(&mut self, name: Symbol, span: &FileSpan) -> Option<(Operand, Ty)> {
    match self.lookup_local(name) {
      Some(LocalBinding::Var(reg, ty, _, _)) => Some((Operand::Reg(reg), ty)),
      Some(LocalBinding::LiftedLambda(..)) => {
        self.err(span.clone(), AnalyzerError::InvalidCapture {
          name: name.as_str().to_string(), captured: "a captured variable".to_string(),
        });
        None
      }
      None => match self.symtab.lookup(name) {
        Some(Entity::Const(c)) => Some((Operand::Const(Const::Int(c.value)), c.ty.clone())),
        Some(Entity::Func(f)) => Some((Operand::Func(f.mir.expect("function signature resolved before bodies lower")), f.ty.clone())),
        _ => { self.err(span.clone(), AnalyzerError::UndefinedIdentifier(name.as_str().to_string())); None }
      }
    }
  }

  fn lower_binary(&mut self, op: ast::BinOp, l: &ast::Expr, r: &ast::Expr, span: &FileSpan) -> Option<(Operand, Ty)> {
    let (lv, lt) = self.lower_expr(l)?;
    let (rv, rt) = self.lower_expr(r)?;
    let result_ty = if lt.is_integer() && rt.is_integer() { wider(&lt, &rt) } else { lt.clone() };
    if let Some(cmp) = binop_to_cmp(op) {
      let dst = self.f.fresh_reg(ty::prim(Prim::Bool));
      self.emit(Opcode::Cmp { op: cmp, dst, lhs: lv, rhs: rv }, span.clone());
      return Some((Operand::Reg(dst), ty::prim(Prim::Bool)));
    }
    let Some(bop) = binop_to_binop(op) else {
      self.err(span.clone(), AnalyzerError::InvalidCast { from: lt.clone(), found: rt, to: lt });
      return None;
    };
    let dst = self.f.fresh_reg(result_ty.clone());
    self.emit(Opcode::Binop { op: bop, dst, lhs: lv, rhs: rv }, span.clone());
    Some((Operand::Reg(dst), result_ty))
  }

  fn lower_unary(&mut self, op: ast::UnOp, inner: &ast::Expr, span: &FileSpan) -> Option<(Operand, Ty)> {
    let (v, t) = self.lower_expr(inner)?;
    match op {
      ast::UnOp::Neg | ast::UnOp::Not | ast::UnOp::BitNot => {
        let dst = self.f.fresh_reg(t.clone());
        self.emit(Opcode::Unop { neg: op == ast::UnOp::Neg, not: op != ast::UnOp::Neg, dst, src: v }, span.clone());
        Some((Operand::Reg(dst), t))
      }
      ast::UnOp::Deref => {
        let TyKind::Ptr { target, .. } = &*t else {
          self.err(span.clone(), AnalyzerError::InvalidCast { from: t.clone(), found: t.clone(), to: t });
          return None;
        };
        let base = self.reg_of(v)?;
        let dst = self.f.fresh_reg(target.clone());
        self.emit(Opcode::LoadField { dst, addr: Addr { base, offset: 0, index: None }, ty: target.clone() }, span.clone());
        Some((Operand::Reg(dst), target.clone()))
      }
      ast::UnOp::Ref => Some((v, ty::ptr(false, t))),
    }
  }

  /// Materializes an `Operand` into a `VReg`, for opcodes (like `Addr`)
  /// that need a concrete register rather than an arbitrary operand.
  fn reg_of(&mut self, op: Operand) -> Option<VReg> {
    match op {
      Operand::Reg(r) => Some(r),
      other => {
        let dst = self.f.fresh_reg(ty::prim(Prim::U16));
        self.emit(Opcode::Move { dst, src: other }, FileSpan::synthetic());
        Some(dst)
      }
    }
  }

  /// Lowers a call expression, returning its value, type, and — when the
  /// resolved callee declares an error enum — the boolean register that
  /// carries the callee's error flag, captured atomically as part of the
  /// `Call` opcode itself (spec §4.2, §8 Scenario C). `lower_try`/
  /// `lower_try_or` read this third element directly instead of
  /// re-deriving an error condition from the return value, since an
  /// unsigned error discriminant can never be told apart from a valid
  /// return value by comparison alone.
  fn lower_call(&mut self, callee: &ast::Expr, args: &[ast::Expr], span: &FileSpan) -> Option<(Operand, Ty, Option<VReg>)> {
    if let ast::ExprKind::Ident(name) = &callee.kind {
      if let Some(LocalBinding::LiftedLambda(func_id, captured, param_tys, ret_ty)) = self.lookup_local(*name) {
        if args.len() != param_tys.len() {
          self.err(span.clone(), AnalyzerError::Arity { callee: name.as_str().to_string(), expected: param_tys.len(), found: args.len() });
          return None;
        }
        let mut call_args: SmallVec<[Operand; 4]> = captured.into_iter().map(Operand::Reg).collect();
        for a in args { let (v, _) = self.lower_expr(a)?; call_args.push(v); }
        let dst = self.f.fresh_reg(ret_ty.clone());
        self.emit(Opcode::Call { dst: Some(dst), err_dst: None, func: func_id, args: call_args }, span.clone());
        return Some((Operand::Reg(dst), ret_ty, None));
      }

      let arg_vals: Vec<(Operand, Ty)> = args.iter().filter_map(|a| self.lower_expr(a)).collect();
      if arg_vals.len() != args.len() { return None; }
      let arg_tys: Vec<Ty> = arg_vals.iter().map(|(_, t)| t.clone()).collect();
      let resolved = match self.symtab.resolve_overload(*name, &arg_tys, |sym| self.func_param_tys(sym)) {
        Ok(sym) => sym,
        Err(e) => { self.err(span.clone(), e); return None; }
      };
      let Some(Entity::Func(f)) = self.symtab.lookup(resolved) else {
        self.err(span.clone(), AnalyzerError::UndefinedIdentifier(resolved.as_str().to_string()));
        return None;
      };
      let func_id = f.mir.expect("function signature resolved before bodies lower");
      let ret_ty = match &*f.ty { TyKind::Func { ret, .. } => ret.clone(), _ => f.ty.clone() };
      let dst = if matches!(*ret_ty, TyKind::Prim(Prim::Void)) { None } else { Some(self.f.fresh_reg(ret_ty.clone())) };
      let err_dst = f.error_enum.is_some().then(|| self.f.fresh_reg(ty::prim(Prim::Bool)));
      self.emit(Opcode::Call { dst, err_dst, func: func_id, args: arg_vals.into_iter().map(|(v, _)| v).collect() }, span.clone());
      return Some((dst.map_or(Operand::Const(Const::Int(0)), Operand::Reg), ret_ty, err_dst));
    }
    self.err(span.clone(), AnalyzerError::UndefinedIdentifier("<indirect call>".to_string()));
    None
  }

  fn func_param_tys(&self, sym: Symbol) -> Vec<Ty> {
    match self.symtab.lookup(sym) {
      Some(Entity::Func(f)) => match &*f.ty { TyKind::Func { params, .. } => params.clone(), _ => Vec::new() },
      _ => Vec::new(),
    }
  }

  /// Resolves `recv.method(args)` to one direct call (spec §4.2): if
  /// `recv`'s static type is an interface, the receiver variable's tracked
  /// `concrete_ty` picks the implementation; otherwise this is an ordinary
  /// struct method found the same way.
  fn lower_method_call(&mut self, recv: &ast::Expr, method: Symbol, args: &[ast::Expr], span: &FileSpan) -> Option<(Operand, Ty)> {
    let (recv_val, recv_ty) = self.lower_expr(recv)?;
    let concrete = if matches!(*recv_ty, TyKind::Interface { .. }) {
      let ast::ExprKind::Ident(name) = &recv.kind else {
        self.err(span.clone(), AnalyzerError::UndefinedIdentifier("<interface receiver must be a named variable>".to_string()));
        return None;
      };
      match self.lookup_local(*name) {
        Some(LocalBinding::Var(_, _, _, concrete)) => concrete,
        _ => None,
      }
    } else {
      Some(recv_ty.clone())
    };
    let Some(concrete) = concrete else {
      self.err(span.clone(), AnalyzerError::UndefinedIdentifier(format!("cannot resolve concrete type of interface receiver for `{method}`")));
      return None;
    };
    let interface_name = if let TyKind::Interface { name, .. } = &*recv_ty { *name } else { intern("") };
    let concrete_name = match &*concrete { TyKind::Struct { name, .. } => *name, _ => intern("") };
    let mangled = self.impls.get(&(interface_name, concrete_name)).and_then(|m| m.get(&method)).copied();
    let Some(mangled) = mangled else {
      self.err(span.clone(), AnalyzerError::UndefinedIdentifier(format!("no implementation of `{method}` for this receiver")));
      return None;
    };
    let Some(Entity::Func(f)) = self.symtab.lookup(mangled) else { return None; };
    let func_id = f.mir.expect("impl method resolved before bodies lower");
    let ret_ty = match &*f.ty { TyKind::Func { ret, .. } => ret.clone(), _ => f.ty.clone() };
    let mut call_args: SmallVec<[Operand; 4]> = SmallVec::new();
    call_args.push(recv_val);
    for a in args { let (v, _) = self.lower_expr(a)?; call_args.push(v); }
    let dst = self.f.fresh_reg(ret_ty.clone());
    self.emit(Opcode::Call { dst: Some(dst), err_dst: None, func: func_id, args: call_args }, span.clone());
    Some((Operand::Reg(dst), ret_ty))
  }

  fn lower_place(&mut self, base: &ast::Expr) -> Option<(Addr, Ty)> {
    let (op, ty) = self.lower_expr(base)?;
    let base_reg = self.reg_of(op)?;
    Some((Addr { base: base_reg, offset: 0, index: None }, ty))
  }

  fn lower_field(&mut self, base: &ast::Expr, field: Symbol) -> Option<(Operand, Ty)> {
    let (addr, ty) = self.lower_place(base)?;
    let field_ty = struct_field_ty(&ty, field)?;
    let dst = self.f.fresh_reg(field_ty.clone());
    self.emit(Opcode::LoadField { dst, addr, ty: field_ty.clone() }, FileSpan::synthetic());
    Some((Operand::Reg(dst), field_ty))
  }

  fn lower_index_place(&mut self, base: &ast::Expr, index: &ast::Expr) -> Option<(Addr, Ty)> {
    let (base_op, base_ty) = self.lower_expr(base)?;
    let TyKind::Array { elem, .. } = &*base_ty else { return None; };
    let base_reg = self.reg_of(base_op)?;
    let (idx_op, _) = self.lower_expr(index)?;
    let idx_reg = self.reg_of(idx_op)?;
    Some((Addr { base: base_reg, offset: 0, index: Some((idx_reg, crate::symtab::SymbolTable::sizeof(elem))) }, elem.clone()))
  }

  fn lower_index(&mut self, base: &ast::Expr, index: &ast::Expr, span: &FileSpan) -> Option<(Operand, Ty)> {
    let (addr, elem_ty) = self.lower_index_place(base, index)?;
    let dst = self.f.fresh_reg(elem_ty.clone());
    self.emit(Opcode::LoadIndex { dst, addr, ty: elem_ty.clone() }, span.clone());
    Some((Operand::Reg(dst), elem_ty))
  }

  fn lower_cast(&mut self, expr: &ast::Expr, target: &ast::TypeExpr, span: &FileSpan) -> Option<(Operand, Ty)> {
    let (v, from_ty) = self.lower_expr(expr)?;
    let to_ty = match resolve_type_expr(target, self.symtab) {
      Ok(t) => t, Err(e) => { self.err(span.clone(), e); return None; }
    };
    let (Some(fp), Some(tp)) = (from_ty.as_prim(), to_ty.as_prim()) else {
      self.err(span.clone(), AnalyzerError::InvalidCast { from: from_ty.clone(), found: from_ty, to: to_ty });
      return None;
    };
    if fp.width() == tp.width() {
      self.sink.push(crate::diagnostics::Diagnostic::warning(span.clone(), crate::error::Warning::RedundantCast(to_ty.clone()).message()));
    }
    let dst = self.f.fresh_reg(to_ty.clone());
    if fp.width() < tp.width() {
      self.emit(Opcode::Extend { dst, src: v, signed: fp.is_signed(), from_width: fp.width(), to_width: tp.width() }, span.clone());
    } else if fp.width() > tp.width() {
      self.emit(Opcode::Truncate { dst, src: v, to_width: tp.width() }, span.clone());
    } else {
      self.emit(Opcode::Move { dst, src: v }, span.clone());
    }
    Some((Operand::Reg(dst), to_ty))
  }

  fn lower_array_lit(&mut self, items: &[ast::Expr], span: &FileSpan) -> Option<(Operand, Ty)> {
    let vals: Vec<(Operand, Ty)> = items.iter().filter_map(|i| self.lower_expr(i)).collect();
    if vals.is_empty() { return Some((Operand::Const(Const::Int(0)), ty::array(ty::prim(Prim::U8), 0))); }
    let elem_ty = vals[0].1.clone();
    let arr_ty = ty::array(elem_ty.clone(), vals.len() as u32);
    let base = self.f.fresh_reg(arr_ty.clone());
    self.emit(Opcode::LoadConst { dst: base, val: Const::Int(0) }, span.clone());
    for (i, (v, _)) in vals.into_iter().enumerate() {
      let addr = Addr { base, offset: (i as u32 * crate::symtab::SymbolTable::sizeof(&elem_ty)) as i32, index: None };
      self.emit(Opcode::StoreField { addr, src: v, ty: elem_ty.clone() }, span.clone());
    }
    Some((Operand::Reg(base), arr_ty))
  }

  fn lower_struct_lit(&mut self, name: Symbol, fields: &[(Symbol, ast::Expr)], span: &FileSpan) -> Option<(Operand, Ty)> {
    let Some(Entity::NominalType(sty)) = self.symtab.lookup(name).cloned() else {
      self.err(span.clone(), AnalyzerError::UndefinedIdentifier(name.as_str().to_string()));
      return None;
    };
    let base = self.f.fresh_reg(sty.clone());
    self.emit(Opcode::LoadConst { dst: base, val: Const::Int(0) }, span.clone());
    for (fname, fexpr) in fields {
      let Some((v, _)) = self.lower_expr(fexpr) else { continue };
      let Some(field_ty) = struct_field_ty(&sty, *fname) else { continue };
      let offset = struct_field_offset(&sty, *fname).unwrap_or(0);
      self.emit(Opcode::StoreField { addr: Addr { base, offset, index: None }, src: v, ty: field_ty }, span.clone());
    }
    Some((Operand::Reg(base), sty))
  }

  /// `expr?`: propagate `expr`'s error to the caller (spec §4.2 Error
  /// propagation). Requires the enclosing function to itself return
  /// through the same error-enum.
  fn lower_try(&mut self, inner: &ast::Expr, span: &FileSpan) -> Option<(Operand, Ty)> {
    let Some(error_enum) = self.error_enum.clone() else {
      self.err(span.clone(), AnalyzerError::UndefinedIdentifier("`?` used in a function with no declared error enum".to_string()));
      return None;
    };
    let (v, ty, is_err) = self.lower_fallible_call(inner, span)?;
    let err_bb = self.f.new_block();
    let ok_bb = self.f.new_block();
    self.f.terminate(self.cur, Terminator::CondJump { cond: Operand::Reg(is_err), then_bb: err_bb, else_bb: ok_bb }, span.clone());
    let TyKind::ErrorEnum { name, .. } = &*error_enum else { return None };
    self.f.terminate(err_bb, Terminator::ReturnError { error_enum: error_enum.clone(), variant: *name }, span.clone());
    self.cur = ok_bb;
    Some((v, ty))
  }

  /// `callee(args)?`/`callee(args)??`: requires `inner` to be a direct call
  /// to a fallible function, since the error flag this returns is captured
  /// as part of lowering that call's own `Opcode::Call` (spec §4.2, §8
  /// Scenario C) rather than recovered afterwards from its return value.
  fn lower_fallible_call(&mut self, inner: &ast::Expr, span: &FileSpan) -> Option<(Operand, Ty, VReg)> {
    let ast::ExprKind::Call { callee, args } = &inner.kind else {
      self.err(span.clone(), AnalyzerError::UndefinedIdentifier("`?`/`??` may only follow a direct call to a fallible function".to_string()));
      return None;
    };
    let (v, ty, err_dst) = self.lower_call(callee, args, &inner.span)?;
    let Some(is_err) = err_dst else {
      self.err(span.clone(), AnalyzerError::UndefinedIdentifier("`?`/`??` used on a call to a function with no declared error enum".to_string()));
      return None;
    };
    Some((v, ty, is_err))
  }

  /// `lhs ?? rhs`: yield `lhs` on success, evaluate `rhs` on error rather
  /// than propagating (spec §4.2).
  fn lower_try_or(&mut self, inner: &ast::Expr, fallback: &ast::Expr, span: &FileSpan) -> Option<(Operand, Ty)> {
    let (v, ty, is_err) = self.lower_fallible_call(inner, span)?;
    let err_bb = self.f.new_block();
    let ok_bb = self.f.new_block();
    let join = self.f.new_block();
    self.f.terminate(self.cur, Terminator::CondJump { cond: Operand::Reg(is_err), then_bb: err_bb, else_bb: ok_bb }, span.clone());
    self.cur = err_bb;
    let fb = self.lower_expr(fallback);
    let result = self.f.fresh_reg(ty.clone());
    if let Some((fv, _)) = fb { self.emit(Opcode::Move { dst: result, src: fv }, span.clone()); }
    self.f.terminate(self.cur, Terminator::Jump(join), span.clone());
    self.cur = ok_bb;
    self.emit(Opcode::Move { dst: result, src: v }, span.clone());
    self.f.terminate(self.cur, Terminator::Jump(join), span.clone());
    self.cur = join;
    Some((Operand::Reg(result), ty))
  }

  fn lower_raise(&mut self, error_enum: Symbol, variant: Symbol, span: &FileSpan) -> Option<(Operand, Ty)> {
    let Some(Entity::NominalType(t)) = self.symtab.lookup(error_enum).cloned() else { return None };
    self.f.terminate(self.cur, Terminator::ReturnError { error_enum: t, variant }, span.clone());
    let next = self.f.new_block();
    self.cur = next;
    None
  }
}

fn struct_field_ty(sty: &Ty, field: Symbol) -> Option<Ty> {
  let TyKind::Struct { fields, .. } = &**sty else { return None };
  fields.borrow().iter().find(|f| f.name == field).map(|f| f.ty.clone())
}

fn struct_field_offset(sty: &Ty, field: Symbol) -> Option<i32> {
  let TyKind::Struct { fields, .. } = &**sty else { return None };
  let mut offset = 0i32;
  for f in fields.borrow().iter() {
    if f.name == field { return Some(offset); }
    offset += crate::symtab::SymbolTable::sizeof(&f.ty) as i32;
  }
  None
}

fn wider(a: &Ty, b: &Ty) -> Ty {
  match (a.as_prim(), b.as_prim()) {
    (Some(ap), Some(bp)) if ap.width() >= bp.width() => a.clone(),
    _ => b.clone(),
  }
}

fn binop_to_cmp(op: ast::BinOp) -> Option<Cmp> {
  Some(match op {
    ast::BinOp::Eq => Cmp::Eq, ast::BinOp::Ne => Cmp::Ne, ast::BinOp::Lt => Cmp::Lt,
    ast::BinOp::Le => Cmp::Le, ast::BinOp::Gt => Cmp::Gt, ast::BinOp::Ge => Cmp::Ge,
    _ => return None,
  })
}

fn binop_to_binop(op: ast::BinOp) -> Option<Binop> {
  Some(match op {
    ast::BinOp::Add => Binop::Add, ast::BinOp::Sub => Binop::Sub, ast::BinOp::Mul => Binop::Mul,
    ast::BinOp::BitAnd | ast::BinOp::And => Binop::And,
    ast::BinOp::BitOr | ast::BinOp::Or => Binop::Or,
    ast::BinOp::BitXor => Binop::Xor, ast::BinOp::Shl => Binop::Shl, ast::BinOp::Shr => Binop::Shr,
    ast::BinOp::Div => return None,
    _ => return None,
  })
}

/// Collects every name bound by a `let` anywhere in `b`, conservatively
/// over-approximating what's "bound" so that [`collect_free_idents`] never
/// mistakes a shadowed local for a real capture (spec §4.2 Lambda lifting).
fn collect_let_names(b: &ast::Block, out: &mut HashSet<Symbol>) {
  for s in &b.stmts {
    match &s.kind {
      ast::StmtKind::Let { name, init, .. } => { out.insert(*name); collect_let_names_expr(init, out); }
      ast::StmtKind::Expr(e) | ast::StmtKind::Assign { value: e, .. } => collect_let_names_expr(e, out),
      ast::StmtKind::Return(Some(e)) => collect_let_names_expr(e, out),
      ast::StmtKind::Return(None) => {}
      ast::StmtKind::If { cond, then, els } => {
        collect_let_names_expr(cond, out);
        collect_let_names(then, out);
        if let Some(els) = els { collect_let_names(els, out); }
      }
      ast::StmtKind::While { cond, body } => { collect_let_names_expr(cond, out); collect_let_names(body, out); }
    }
  }
}

fn collect_let_names_expr(e: &ast::Expr, out: &mut HashSet<Symbol>) {
  if let ast::ExprKind::Block(b) = &e.kind { collect_let_names(b, out); }
  if let ast::ExprKind::Lambda { body, .. } = &e.kind { collect_let_names(body, out); }
}

/// Collects every `Ident` referenced in `b` that is not in `bound`, used to
/// compute a lifted lambda's capture list.
fn collect_free_idents(b: &ast::Block, bound: &HashSet<Symbol>, out: &mut Vec<Symbol>, seen: &mut HashSet<Symbol>) {
  for s in &b.stmts {
    match &s.kind {
      ast::StmtKind::Let { init, .. } => walk_expr(init, bound, out, seen),
      ast::StmtKind::Assign { target, value } => { walk_expr(target, bound, out, seen); walk_expr(value, bound, out, seen); }
      ast::StmtKind::Expr(e) => walk_expr(e, bound, out, seen),
      ast::StmtKind::Return(Some(e)) => walk_expr(e, bound, out, seen),
      ast::StmtKind::Return(None) => {}
      ast::StmtKind::If { cond, then, els } => {
        walk_expr(cond, bound, out, seen);
        collect_free_idents(then, bound, out, seen);
        if let Some(els) = els { collect_free_idents(els, bound, out, seen); }
      }
      ast::StmtKind::While { cond, body } => { walk_expr(cond, bound, out, seen); collect_free_idents(body, bound, out, seen); }
    }
  }
}

fn walk_expr(e: &ast::Expr, bound: &HashSet<Symbol>, out: &mut Vec<Symbol>, seen: &mut HashSet<Symbol>) {
  match &e.kind {
    ast::ExprKind::Ident(n) => { if !bound.contains(n) && seen.insert(*n) { out.push(*n); } }
    ast::ExprKind::Binary(_, l, r) => { walk_expr(l, bound, out, seen); walk_expr(r, bound, out, seen); }
    ast::ExprKind::Unary(_, i) => walk_expr(i, bound, out, seen),
    ast::ExprKind::Call { callee, args } => { walk_expr(callee, bound, out, seen); for a in args { walk_expr(a, bound, out, seen); } }
    ast::ExprKind::MethodCall { recv, args, .. } => { walk_expr(recv, bound, out, seen); for a in args { walk_expr(a, bound, out, seen); } }
    ast::ExprKind::Field { base, .. } => walk_expr(base, bound, out, seen),
    ast::ExprKind::Index { base, index } => { walk_expr(base, bound, out, seen); walk_expr(index, bound, out, seen); }
    ast::ExprKind::Cast { expr, .. } => walk_expr(expr, bound, out, seen),
    ast::ExprKind::ArrayLit(items) => for i in items { walk_expr(i, bound, out, seen); },
    ast::ExprKind::StructLit { fields, .. } => for (_, v) in fields { walk_expr(v, bound, out, seen); },
    ast::ExprKind::Try(i) => walk_expr(i, bound, out, seen),
    ast::ExprKind::TryOr(a, b) => { walk_expr(a, bound, out, seen); walk_expr(b, bound, out, seen); }
    ast::ExprKind::Case { scrutinee, arms } => { walk_expr(scrutinee, bound, out, seen); for a in arms { walk_expr(&a.body, bound, out, seen); } }
    ast::ExprKind::IterOp { recv, lambda, .. } => { walk_expr(recv, bound, out, seen); walk_expr(lambda, bound, out, seen); }
    ast::ExprKind::IterSource(i) => walk_expr(i, bound, out, seen),
    ast::ExprKind::Block(b) => collect_free_idents(b, bound, out, seen),
    ast::ExprKind::Lambda { body, .. } => collect_free_idents(body, bound, out, seen),
    ast::ExprKind::IntLit(_) | ast::ExprKind::BoolLit(_) | ast::ExprKind::StrLit(_) | ast::ExprKind::RaiseError { .. } => {}
  }
}

pub mod iter_chain;
pub mod decision_tree;

/// Lowers a whole parse-tree module to MIR, running the declaration passes
/// first (so call order never matters) and then lowering every function
/// and `impl` method body in turn.
pub fn build_mir(m: &ast::Module, symtab: &mut SymbolTable, backend: &str, sink: &mut crate::diagnostics::Sink) -> Result<Module, CompileError> {
  let mut flat = Vec::new();
  flatten_decls(&m.decls, backend, &mut flat);
  let declared = declare_module(&flat, symtab, sink);
  if sink.has_errors() { return Err(CompileError::Aborted(sink.error_count())); }

  let mut module = Module::default();

  // Allocate every FuncId up front so call sites anywhere in the module
  // can resolve `Entity::Func::mir` regardless of lowering order.
  let mut order: Vec<Symbol> = declared.funcs.keys().copied().collect();
  order.sort_by_key(|s| s.as_str());
  for name in &order {
    let fd = declared.funcs[name];
    let Some(Entity::Func(f)) = symtab.lookup(*name).cloned() else { continue };
    let TyKind::Func { params, ret, .. } = &*f.ty else { continue };
    let param_info = fd.params.iter().zip(params).map(|(p, t)| ParamInfo { name: p.name, ty: t.clone() }).collect();
    let func = Function::new(*name, param_info, ret.clone(), f.error_enum.clone(), FileSpan::synthetic());
    let id = module.push_func(func);
    rebind_func(symtab, *name, id);
  }

  for name in &order {
    let fd = declared.funcs[name];
    let Some(Entity::Func(f)) = symtab.lookup(*name).cloned() else { continue };
    let func_id = f.mir.expect("just assigned above");
    let taken = std::mem::replace(&mut module.funcs[func_id], Function::new(*name, Vec::new(), ty::prim(Prim::Void), None, FileSpan::synthetic()));
    let entry = taken.entry;
    let mut lower = FnLower {
      symtab, impls: &declared.impls, module: &mut module, sink, f: taken, cur: entry,
      scopes: vec![HashMap::new()], error_enum: f.error_enum.clone(), lambda_counter: 0,
    };
    lower.push_scope();
    for (i, p) in fd.params.iter().enumerate() {
      let ty = lower.f.params[i].ty.clone();
      let r = lower.f.fresh_reg(ty.clone());
      lower.emit(Opcode::LoadParam { dst: r, index: i as u32 }, fd.body.span.clone());
      lower.declare_local(p.name, LocalBinding::Var(r, ty, Mutability::Const, None));
    }
    let falls = lower.lower_block(&fd.body);
    if falls { lower.f.terminate(lower.cur, Terminator::Return(None), fd.body.span.clone()); }
    let finished = lower.f;
    module.funcs[func_id] = finished;
  }

  Ok(module)
}

fn rebind_func(symtab: &mut SymbolTable, name: Symbol, id: FuncId) {
  symtab.set_func_mir(name, id);
}
