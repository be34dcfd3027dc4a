//! Scope tree and overload resolution (spec §4.1).
//!
//! A `SymbolTable` is a stack of scopes, innermost last. Declaration is a
//! two-pass affair at module scope only (spec §4.1: "forward references
//! across a module are permitted, but not within a single function body"):
//! the analyzer first walks every top-level declaration to populate names,
//! then walks bodies, so a function can call another declared later in the
//! same file. Block-local scopes never get this treatment — a `let` is only
//! visible after its own statement.

use hashbrown::HashMap;
use crate::error::{AnalyzerError, StructuralError};
use crate::span::FileSpan;
use crate::symbol::Symbol;
use crate::types::entity::{Entity, OverloadSet};
use crate::types::ty::{Prim, Ty, TyKind, TypeId};

#[derive(Default)]
struct Scope {
  names: HashMap<Symbol, (Entity, FileSpan)>,
}

pub struct SymbolTable {
  scopes: Vec<Scope>,
  next_type_id: u32,
}

impl Default for SymbolTable {
  fn default() -> Self { Self { scopes: vec![Scope::default()], next_type_id: 0 } }
}

impl SymbolTable {
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Allocates a fresh identity for one nominal type declaration. Called
  /// exactly once per `struct`/`enum`/`bit-struct`/`interface`/`error-enum`
  /// declaration so two structurally identical declarations remain distinct
  /// types (spec §3).
  pub fn fresh_type_id(&mut self) -> TypeId {
    let id = TypeId(self.next_type_id);
    self.next_type_id += 1;
    id
  }

  pub fn push_scope(&mut self) { self.scopes.push(Scope::default()); }
  pub fn pop_scope(&mut self) { self.scopes.pop(); assert!(!self.scopes.is_empty(), "popped the module scope"); }

  /// Introduces `name` in the innermost scope. A plain function declaration
  /// colliding with an existing one becomes (or extends) an overload set
  /// rather than a duplicate-definition error — overload sets are the one
  /// place redeclaring a name is expected (spec §4.1 Overload resolution).
  /// Any other collision, or a function colliding with a non-function, is
  /// [`StructuralError::DuplicateDefinition`]. Returns the symbol `entity`
  /// actually ended up stored under: `name` itself for a first declaration,
  /// or the type-encoded mangled name for an overload (spec §4.1(4)) — the
  /// caller needs this to find the entity again, since a second or later
  /// overload is never reachable by `name` alone once it denotes the
  /// `Entity::Overload` set.
  pub fn declare(&mut self, name: Symbol, entity: Entity, span: FileSpan) -> Result<Symbol, StructuralError> {
    enum Existing { None, Func(FileSpan), OverloadSet, Other(FileSpan) }
    let scope = self.scopes.last().expect("scope stack is never empty");
    let existing = match scope.names.get(&name) {
      None => Existing::None,
      Some((Entity::Func(_), sp)) => Existing::Func(sp.clone()),
      Some((Entity::Overload(_), _)) => Existing::OverloadSet,
      Some((_, sp)) => Existing::Other(sp.clone()),
    };
    let is_func = matches!(entity, Entity::Func(_));

    match existing {
      Existing::None => {
        self.scopes.last_mut().unwrap().names.insert(name, (entity, span));
        Ok(name)
      }
      Existing::Func(first) if is_func => {
        let scope = self.scopes.last_mut().unwrap();
        let (prev_entity, _) = scope.names.remove(&name).unwrap();
        let mangled_prev = Self::mangle_overload(name, &param_tys_of(&prev_entity));
        let mangled_new = Self::mangle_overload(name, &param_tys_of(&entity));
        let mut set = OverloadSet::default();
        set.members.push(mangled_prev);
        set.members.push(mangled_new);
        scope.names.insert(mangled_prev, (prev_entity, first.clone()));
        scope.names.insert(mangled_new, (entity, span));
        scope.names.insert(name, (Entity::Overload(set), first));
        Ok(mangled_new)
      }
      Existing::OverloadSet if is_func => {
        let mangled = Self::mangle_overload(name, &param_tys_of(&entity));
        let scope = self.scopes.last_mut().unwrap();
        scope.names.insert(mangled, (entity, span));
        let Some((Entity::Overload(set), _)) = scope.names.get_mut(&name) else { unreachable!() };
        set.members.push(mangled);
        Ok(mangled)
      }
      Existing::Func(first) | Existing::Other(first) => Err(StructuralError::DuplicateDefinition {
        name: name.as_str().to_string(),
        first,
      }),
      Existing::OverloadSet => Err(StructuralError::DuplicateDefinition {
        name: name.as_str().to_string(),
        first: self.lookup_span(name).cloned().unwrap_or_else(FileSpan::synthetic),
      }),
    }
  }

  /// Builds one overload's internal name from its own parameter types,
  /// `base$T1$T2$...` (spec §4.1(4)), used both as the scope-table key and
  /// as the backend's emitted label (spec §4.1: "overload resolution...
  /// happens once, at the call site, and compiles down to a direct call of
  /// the chosen overload — never a dispatch table"). Each `$`-separated
  /// component encodes exactly one type with no embedded `$`, so the
  /// parameter list can be read back off the mangled name (spec §8:
  /// mangling is bijective).
  fn mangle_overload(name: Symbol, param_tys: &[Ty]) -> Symbol {
    let mut parts: Vec<String> = vec![name.as_str().to_string()];
    parts.extend(param_tys.iter().map(|t| encode_ty(t)));
    crate::symbol::Symbol::generate(&[&parts.join("$")])
  }

  #[must_use] pub fn lookup(&self, name: Symbol) -> Option<&Entity> {
    self.scopes.iter().rev().find_map(|s| s.names.get(&name).map(|(e, _)| e))
  }

  /// Records which [`crate::types::mir::FuncId`] a declared function's body
  /// lowered to, once [`crate::build_mir::build_mir`] has allocated its MIR
  /// shell. A no-op if `name` isn't (or is no longer) a plain `Entity::Func`
  /// — overload-set members are looked up by their own mangled name, which
  /// always resolves here directly.
  pub fn set_func_mir(&mut self, name: Symbol, id: crate::types::mir::FuncId) {
    for scope in self.scopes.iter_mut().rev() {
      if let Some((crate::types::entity::Entity::Func(f), _)) = scope.names.get_mut(&name) {
        f.mir = Some(id);
        return;
      }
    }
  }

  #[must_use] pub fn lookup_span(&self, name: Symbol) -> Option<&FileSpan> {
    self.scopes.iter().rev().find_map(|s| s.names.get(&name).map(|(_, sp)| sp))
  }

  /// Every currently-declared nominal type's `Ty`, across all scopes.
  /// Nominal types are only ever declared at module scope in practice, but
  /// this doesn't assume it. Used by `build_mir`'s backpatch pass to find
  /// the empty-payload `Ty` it allocated earlier for a given `TypeId`,
  /// since scopes are indexed by name rather than by `TypeId`.
  pub fn all_nominal_types(&self) -> impl Iterator<Item = &Ty> {
    self.scopes.iter().flat_map(|s| s.names.values()).filter_map(|(e, _)| match e {
      Entity::NominalType(t) => Some(t),
      _ => None,
    })
  }

  /// Scores how well a call's argument types match one candidate's
  /// parameter types: `Some(0)` for an exact type match on every parameter,
  /// increasing by one per parameter that needs a widening conversion
  /// (spec §4.1: "exact match beats a widening match; two candidates that
  /// tie are an ambiguity error"). `None` means the candidate does not
  /// apply at all (wrong arity, or a parameter with no match at all).
  #[must_use] pub fn score_candidate(arg_tys: &[Ty], param_tys: &[Ty]) -> Option<u32> {
    if arg_tys.len() != param_tys.len() { return None; }
    let mut score = 0u32;
    for (a, p) in arg_tys.iter().zip(param_tys) {
      if a == p {
        continue;
      }
      match (a.as_prim(), p.as_prim()) {
        (Some(ap), Some(pp)) if ap.widens_to(pp) => score += 1,
        _ => return None,
      }
    }
    Some(score)
  }

  /// Resolves a call to `name` against `arg_tys`, returning the mangled
  /// symbol of the winning overload. If `name` is not an overload set at
  /// all, it resolves trivially to itself once arity/type checking (done
  /// by the caller) confirms it applies.
  pub fn resolve_overload(&self, name: Symbol, arg_tys: &[Ty], func_param_tys: impl Fn(Symbol) -> Vec<Ty>) -> Result<Symbol, AnalyzerError> {
    let Some(Entity::Overload(set)) = self.lookup(name) else { return Ok(name); };
    let mut best: Option<(Symbol, u32)> = None;
    let mut tied: Vec<Symbol> = Vec::new();
    for &member in &set.members {
      let params = func_param_tys(member);
      let Some(score) = Self::score_candidate(arg_tys, &params) else { continue };
      match best {
        None => best = Some((member, score)),
        Some((_, bs)) if score < bs => { best = Some((member, score)); tied.clear(); }
        Some((_, bs)) if score == bs => tied.push(member),
        _ => {}
      }
    }
    match best {
      None => Err(AnalyzerError::UndefinedIdentifier(name.as_str().to_string())),
      Some((winner, _)) if tied.is_empty() => Ok(winner),
      Some((winner, score)) => Err(AnalyzerError::AmbiguousOverload {
        name: name.as_str().to_string(),
        candidates: std::iter::once(winner).chain(tied).map(|s| s.as_str().to_string()).collect(),
        score,
      }),
    }
  }

  /// The byte size of a type, resolving nominal types by summing their
  /// fields/variants rather than relying on [`TyKind::sizeof_static`] (which
  /// only knows about structural types).
  #[must_use] pub fn sizeof(ty: &Ty) -> u32 {
    if let Some(sz) = ty.sizeof_static() { return sz; }
    match &**ty {
      TyKind::Struct { fields, .. } => fields.borrow().iter().map(|f| Self::sizeof(&f.ty)).sum(),
      TyKind::Enum { discriminant_width, .. } => u32::from(*discriminant_width) / 8,
      TyKind::ErrorEnum { variants, .. } => u32::from(crate::types::ty::discriminant_width_bits(variants.borrow().len())) / 8,
      TyKind::Interface { .. } => 0,
      _ => unreachable!("sizeof_static should have handled every remaining TyKind"),
    }
  }
}

/// The parameter types of a function entity, or an empty slice for anything
/// else — used only to feed [`SymbolTable::mangle_overload`], which is only
/// ever called with `Entity::Func` values.
fn param_tys_of(entity: &Entity) -> Vec<Ty> {
  match entity {
    Entity::Func(f) => match &*f.ty {
      TyKind::Func { params, .. } => params.clone(),
      _ => Vec::new(),
    },
    _ => Vec::new(),
  }
}

/// Type-encodes one type for use as a `$`-separated component of an
/// overload's mangled name (spec §4.1(4)): primitives by their own name,
/// pointers as `ptr_<target>`, arrays as `arr_<len>_<elem>`, and nominal
/// types by their declared name. Never produces a `$`, so a mangled name's
/// components can be split back out unambiguously.
fn encode_ty(ty: &Ty) -> String {
  match &**ty {
    TyKind::Prim(p) => p.name().to_string(),
    TyKind::Ptr { target, .. } => format!("ptr_{}", encode_ty(target)),
    TyKind::Array { elem, len } => format!("arr_{len}_{}", encode_ty(elem)),
    TyKind::Func { params, ret, .. } => {
      let mut s = String::from("fn_");
      for p in params { s.push_str(&encode_ty(p)); s.push('_'); }
      s.push_str("to_");
      s.push_str(&encode_ty(ret));
      s
    }
    TyKind::Struct { name, .. } | TyKind::Enum { name, .. } | TyKind::BitStruct { name, .. } |
    TyKind::Interface { name, .. } | TyKind::ErrorEnum { name, .. } => name.as_str().to_string(),
  }
}

#[must_use] pub fn bool_ty() -> Ty { crate::types::ty::prim(Prim::Bool) }

#[cfg(test)]
mod tests {
  use super::*;
  use crate::span::FileSpan;
  use crate::symbol::intern;
  use crate::types::entity::{FuncEntity, VarEntity, VarStorage, Mutability};
  use crate::types::ty::prim;

  fn func_entity(params: Vec<Ty>, ret: Ty) -> Entity {
    Entity::Func(FuncEntity { ty: crate::types::ty::func(params, ret, None), mir: None, error_enum: None })
  }

  #[test]
  fn redeclaring_a_function_builds_an_overload_set() {
    let mut st = SymbolTable::new();
    let name = intern("add");
    st.declare(name, func_entity(vec![prim(Prim::U8), prim(Prim::U8)], prim(Prim::U8)), FileSpan::synthetic()).unwrap();
    st.declare(name, func_entity(vec![prim(Prim::U16), prim(Prim::U16)], prim(Prim::U16)), FileSpan::synthetic()).unwrap();
    assert!(matches!(st.lookup(name), Some(Entity::Overload(set)) if set.members.len() == 2));
  }

  #[test]
  fn redeclaring_a_variable_is_a_duplicate_definition() {
    let mut st = SymbolTable::new();
    let name = intern("x");
    let var = Entity::Var(VarEntity { ty: prim(Prim::U8), storage: VarStorage::Local, mutability: Mutability::Const, concrete_ty: None, lifted_lambda: None });
    st.declare(name, var.clone(), FileSpan::synthetic()).unwrap();
    let err = st.declare(name, var, FileSpan::synthetic()).unwrap_err();
    assert!(matches!(err, StructuralError::DuplicateDefinition { .. }));
  }

  #[test]
  fn overload_mangling_is_type_encoded_and_decodable() {
    let mut st = SymbolTable::new();
    let name = intern("min");
    let first = st.declare(name, func_entity(vec![prim(Prim::U8), prim(Prim::U8)], prim(Prim::U8)), FileSpan::synthetic()).unwrap();
    let second = st.declare(name, func_entity(vec![prim(Prim::U16), prim(Prim::U16)], prim(Prim::U16)), FileSpan::synthetic()).unwrap();
    assert_eq!(first.as_str(), "min$u8$u8");
    assert_eq!(second.as_str(), "min$u16$u16");
    // Each overload's own mangled symbol resolves directly to its own
    // `Entity::Func`, independently of the shared `Entity::Overload` set.
    assert!(matches!(st.lookup(first), Some(Entity::Func(_))));
    assert!(matches!(st.lookup(second), Some(Entity::Func(_))));
  }

  #[test]
  fn exact_match_outscores_widening_match() {
    let exact = SymbolTable::score_candidate(&[prim(Prim::U8)], &[prim(Prim::U8)]);
    let widen = SymbolTable::score_candidate(&[prim(Prim::U8)], &[prim(Prim::U16)]);
    assert!(exact < widen);
  }

  #[test]
  fn inner_scope_shadows_outer() {
    let mut st = SymbolTable::new();
    let name = intern("n");
    let outer = Entity::Var(VarEntity { ty: prim(Prim::U8), storage: VarStorage::Global, mutability: Mutability::Const, concrete_ty: None, lifted_lambda: None });
    st.declare(name, outer, FileSpan::synthetic()).unwrap();
    st.push_scope();
    let inner = Entity::Var(VarEntity { ty: prim(Prim::U16), storage: VarStorage::Local, mutability: Mutability::Mut, concrete_ty: None, lifted_lambda: None });
    st.declare(name, inner, FileSpan::synthetic()).unwrap();
    assert!(matches!(st.lookup(name), Some(Entity::Var(v)) if v.ty == prim(Prim::U16)));
    st.pop_scope();
    assert!(matches!(st.lookup(name), Some(Entity::Var(v)) if v.ty == prim(Prim::U8)));
  }
}
