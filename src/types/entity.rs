//! The symbol-table payload (spec §3: "Symbol is a sum of constant,
//! variable, function, overload-set, type-alias, nominal-type").
//!
//! [`symtab::SymbolTable`](crate::symtab::SymbolTable) maps a [`Symbol`] in a
//! given scope to one [`Entity`]; this module only defines the shape of what
//! gets stored, not how scopes nest or how overloads are scored.

use crate::symbol::Symbol;
use crate::types::mir::FuncId;
use crate::types::ty::Ty;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Mutability { Const, Mut }

#[derive(Clone, Debug)]
pub struct ConstEntity {
  pub ty: Ty,
  pub value: i64,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VarStorage {
  /// A function parameter or `let`-bound local, kept in a virtual register
  /// until the backend assigns it a home.
  Local,
  /// A module-level `let`, materialized as a named static.
  Global,
}

#[derive(Clone, Debug)]
pub struct VarEntity {
  pub ty: Ty,
  pub storage: VarStorage,
  pub mutability: Mutability,
  /// When `ty` is an `Interface`, the concrete nominal type the variable
  /// was actually initialized with, tracked so method calls on it resolve
  /// to one direct implementation rather than a vtable (spec §4.2:
  /// "interface calls compile to a direct call of the implementation
  /// selected at the declaration site"). `None` for non-interface
  /// variables, and also `None` when an interface-typed variable's
  /// concrete source can't be determined statically (e.g. a function
  /// parameter) — such variables may not have methods called on them.
  pub concrete_ty: Option<Ty>,
  /// Set for a `let`-bound name whose initializer is a lambda literal
  /// that was lifted to a synthesized top-level function (spec §4.2
  /// Lambda lifting). Such a name may only ever appear as a call callee;
  /// any other use is `AnalyzerError::InvalidCapture`.
  pub lifted_lambda: Option<(FuncId, Vec<crate::types::mir::VReg>)>,
}

#[derive(Clone, Debug)]
pub struct FuncEntity {
  pub ty: Ty,
  /// Filled in once MIR has been built for this declaration; `None` while
  /// the symbol table is still being populated in the analyzer's first
  /// pass (spec §4.1: "forward references across a module are permitted").
  pub mir: Option<FuncId>,
  pub error_enum: Option<Ty>,
}

/// A name that resolves to more than one function, disambiguated by
/// argument types at each call site (spec §4.1 Overload resolution).
/// Every member must differ in parameter types; a member that differs only
/// in return type is a [`crate::error::StructuralError::ReturnTypeOnlyOverload`].
#[derive(Clone, Debug, Default)]
pub struct OverloadSet {
  pub members: Vec<Symbol>,
}

/// What one name in scope refers to.
#[derive(Clone, Debug)]
pub enum Entity {
  Const(ConstEntity),
  Var(VarEntity),
  Func(FuncEntity),
  Overload(OverloadSet),
  /// `type Name = OtherType;` — resolved away during lowering, never
  /// itself a distinct `Ty`.
  TypeAlias(Ty),
  /// The name of a struct/enum/bit-struct/interface/error-enum declaration,
  /// resolved to its own `Ty` (which is `is_nominal()`).
  NominalType(Ty),
}

impl Entity {
  #[must_use] pub fn as_ty(&self) -> Option<&Ty> {
    match self {
      Entity::Const(c) => Some(&c.ty),
      Entity::Var(v) => Some(&v.ty),
      Entity::Func(f) => Some(&f.ty),
      Entity::TypeAlias(t) | Entity::NominalType(t) => Some(t),
      Entity::Overload(_) => None,
    }
  }

  #[must_use] pub fn kind_name(&self) -> &'static str {
    match self {
      Entity::Const(_) => "constant",
      Entity::Var(_) => "variable",
      Entity::Func(_) => "function",
      Entity::Overload(_) => "overload set",
      Entity::TypeAlias(_) => "type alias",
      Entity::NominalType(_) => "type",
    }
  }
}

/// An [`Entity`] paired with the declaration site that introduced it, for
/// "defined more than once" diagnostics. Reuses [`crate::span::Spanned`]
/// rather than inventing a second span-carrying wrapper.
pub type SpannedEntity = crate::span::Spanned<Entity>;
