//! The type algebra (spec §3: "Type is a sum...").
//!
//! Structural types (primitives, pointers, arrays, functions, bit-structs)
//! are compared by recursive structural equality. Nominal types (struct,
//! enum, interface, error-enum) are compared by the identity of their
//! [`TypeId`], which is allocated once per declaration — two structurally
//! identical `struct` declarations with different names are different types.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use crate::symbol::Symbol;
use crate::mk_idx;

mk_idx! {
  /// Identifies one nominal type declaration (struct/enum/interface/error-enum).
  pub struct TypeId;
}

/// A fixed-point format, `Ix.Fy` meaning `x` integer bits and `y` fractional
/// bits, stored as a plain two's-complement integer of `x+y` bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct FixedPoint { pub int_bits: u8, pub frac_bits: u8 }

impl FixedPoint {
  #[must_use] pub fn bits(self) -> u8 { self.int_bits + self.frac_bits }
}

impl fmt::Display for FixedPoint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "f{}.{}", self.int_bits, self.frac_bits)
  }
}

/// The primitive scalar types.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Prim {
  U8, U16, U24, I8, I16, I24, Bool, Void,
  Fixed(FixedPoint),
}

impl Prim {
  /// Width in bytes, used by the SMC-eligibility and widening checks.
  #[must_use] pub fn width(self) -> u8 {
    match self {
      Prim::U8 | Prim::I8 | Prim::Bool => 1,
      Prim::U16 | Prim::I16 => 2,
      Prim::U24 | Prim::I24 => 3,
      Prim::Void => 0,
      Prim::Fixed(fp) => fp.bits().div_ceil(8),
    }
  }

  #[must_use] pub fn is_signed(self) -> bool {
    matches!(self, Prim::I8 | Prim::I16 | Prim::I24)
  }

  #[must_use] pub fn is_integer(self) -> bool {
    matches!(self, Prim::U8 | Prim::U16 | Prim::U24 | Prim::I8 | Prim::I16 | Prim::I24)
  }

  /// The unsigned integer widening order used by overload resolution and
  /// literal typing (spec §4.1, §4.2): `u8 -> u16`, `i8 -> i16`. Widening
  /// across signedness is not permitted.
  #[must_use] pub fn widens_to(self, other: Prim) -> bool {
    matches!(
      (self, other),
      (Prim::U8, Prim::U16) | (Prim::I8, Prim::I16) | (Prim::U16, Prim::U24) | (Prim::I16, Prim::I24)
    )
  }

  #[must_use] pub fn name(self) -> &'static str {
    match self {
      Prim::U8 => "u8", Prim::U16 => "u16", Prim::U24 => "u24",
      Prim::I8 => "i8", Prim::I16 => "i16", Prim::I24 => "i24",
      Prim::Bool => "bool", Prim::Void => "void",
      Prim::Fixed(_) => "fixed",
    }
  }
}

impl fmt::Display for Prim {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Prim::Fixed(fp) => write!(f, "{fp}"),
      p => f.write_str(p.name()),
    }
  }
}

/// A named, ordered field of a struct or bit-struct.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Field {
  pub name: Symbol,
  pub ty: Ty,
}

/// A bit-struct field: a name and a bit width, laid out MSB to LSB in
/// declaration order within an 8- or 16-bit backing integer (spec §3).
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct BitField {
  pub name: Symbol,
  pub width: u8,
}

/// One variant of an `enum` or error-enum.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Variant {
  pub name: Symbol,
  pub discriminant: Option<i64>,
}

/// One method signature inside an `interface`.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct MethodSig {
  pub name: Symbol,
  pub params: Vec<Ty>,
  pub ret: Ty,
}

/// A nominal type's payload, filled in after its `TypeId` is allocated
/// (spec §4.1: type declarations are visible to each other regardless of
/// order, so a struct field or pointer may name a type declared later in
/// the same file, including itself). The symbol-table's first pass
/// allocates every nominal `Ty` with an empty payload; its second pass
/// replaces the contents once every declaration's shape is known.
pub type Payload<T> = Rc<RefCell<Rc<[T]>>>;

#[must_use] pub fn empty_payload<T>() -> Payload<T> { Rc::new(RefCell::new(Rc::from(Vec::new()))) }

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum TyKind {
  Prim(Prim),
  Ptr { mutable: bool, target: Ty },
  Array { elem: Ty, len: u32 },
  Func { params: Vec<Ty>, ret: Ty, error: Option<TypeId> },
  /// Nominal struct: `id` distinguishes it from any structurally identical
  /// struct, `fields` gives the packed layout used for offset computation.
  Struct { id: TypeId, name: Symbol, fields: Payload<Field> },
  Enum { id: TypeId, name: Symbol, variants: Payload<Variant>, discriminant_width: u8 },
  BitStruct { id: TypeId, name: Symbol, fields: Payload<BitField>, width: u8 },
  Interface { id: TypeId, name: Symbol, methods: Payload<MethodSig> },
  /// An error-enum, used as the error type of a `?`-returning function.
  /// Structurally identical to `Enum` but kept distinct so the analyzer can
  /// tell at a glance whether a type may appear after `?`.
  ErrorEnum { id: TypeId, name: Symbol, variants: Payload<Variant> },
}

/// Nominal variants hash by their `TypeId` alone (their payload sits behind
/// a `RefCell`, which isn't `Hash`); structural variants hash their shape.
/// Coarser than the derived `PartialEq`, but still consistent with it: any
/// two equal `TyKind`s necessarily agree on the fields hashed here.
impl std::hash::Hash for TyKind {
  fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
    match self {
      TyKind::Prim(p) => { 0u8.hash(state); p.hash(state); }
      TyKind::Ptr { mutable, target } => { 1u8.hash(state); mutable.hash(state); target.hash(state); }
      TyKind::Array { elem, len } => { 2u8.hash(state); elem.hash(state); len.hash(state); }
      TyKind::Func { params, ret, error } => { 3u8.hash(state); params.hash(state); ret.hash(state); error.hash(state); }
      TyKind::Struct { id, .. } => { 4u8.hash(state); id.hash(state); }
      TyKind::Enum { id, .. } => { 5u8.hash(state); id.hash(state); }
      TyKind::BitStruct { id, .. } => { 6u8.hash(state); id.hash(state); }
      TyKind::Interface { id, .. } => { 7u8.hash(state); id.hash(state); }
      TyKind::ErrorEnum { id, .. } => { 8u8.hash(state); id.hash(state); }
    }
  }
}

/// A type. Cheaply `Clone`, structurally comparable except for the nominal
/// variants, which compare by [`TypeId`].
pub type Ty = Rc<TyKind>;

pub fn prim(p: Prim) -> Ty { Rc::new(TyKind::Prim(p)) }
pub fn ptr(mutable: bool, target: Ty) -> Ty { Rc::new(TyKind::Ptr { mutable, target }) }
pub fn array(elem: Ty, len: u32) -> Ty { Rc::new(TyKind::Array { elem, len }) }
pub fn func(params: Vec<Ty>, ret: Ty, error: Option<TypeId>) -> Ty {
  Rc::new(TyKind::Func { params, ret, error })
}

/// The smallest discriminant width, in bits, that can represent
/// `variant_count` distinct values: 8 bits up to 256 variants, 16 beyond.
/// Error-enums don't carry an explicit width the way `enum` does (spec §3),
/// so the backend derives one from the variant count instead.
#[must_use] pub fn discriminant_width_bits(variant_count: usize) -> u8 {
  if variant_count <= 256 { 8 } else { 16 }
}

/// Allocates an empty-payload struct `Ty` under a fresh `id`; the symbol
/// table's second declaration pass fills in `fields` once every
/// declaration in the module has a `TypeId` (see [`Payload`]).
#[must_use] pub fn empty_struct(id: TypeId, name: Symbol) -> Ty {
  Rc::new(TyKind::Struct { id, name, fields: empty_payload() })
}

#[must_use] pub fn empty_enum(id: TypeId, name: Symbol, discriminant_width: u8) -> Ty {
  Rc::new(TyKind::Enum { id, name, variants: empty_payload(), discriminant_width })
}

#[must_use] pub fn empty_bitstruct(id: TypeId, name: Symbol, width: u8) -> Ty {
  Rc::new(TyKind::BitStruct { id, name, fields: empty_payload(), width })
}

#[must_use] pub fn empty_interface(id: TypeId, name: Symbol) -> Ty {
  Rc::new(TyKind::Interface { id, name, methods: empty_payload() })
}

#[must_use] pub fn empty_error_enum(id: TypeId, name: Symbol) -> Ty {
  Rc::new(TyKind::ErrorEnum { id, name, variants: empty_payload() })
}

impl TyKind {
  #[must_use] pub fn is_nominal(&self) -> bool {
    matches!(self, TyKind::Struct { .. } | TyKind::Enum { .. } |
      TyKind::BitStruct { .. } | TyKind::Interface { .. } | TyKind::ErrorEnum { .. })
  }

  #[must_use] pub fn type_id(&self) -> Option<TypeId> {
    match *self {
      TyKind::Struct { id, .. } | TyKind::Enum { id, .. } | TyKind::BitStruct { id, .. } |
      TyKind::Interface { id, .. } | TyKind::ErrorEnum { id, .. } => Some(id),
      _ => None,
    }
  }

  #[must_use] pub fn as_prim(&self) -> Option<Prim> {
    if let TyKind::Prim(p) = self { Some(*p) } else { None }
  }

  #[must_use] pub fn is_integer(&self) -> bool {
    self.as_prim().is_some_and(Prim::is_integer)
  }

  /// Static size in bytes, when known without consulting a symbol table.
  /// Nominal types need field/variant data the caller must supply instead
  /// (see `symtab::SymbolTable::sizeof`), so this returns `None` for them.
  #[must_use] pub fn sizeof_static(&self) -> Option<u32> {
    match self {
      TyKind::Prim(p) => Some(u32::from(p.width())),
      TyKind::Ptr { .. } => Some(2),
      TyKind::Array { elem, len } => elem.sizeof_static().map(|e| e * len),
      TyKind::BitStruct { width, .. } => Some(u32::from(*width) / 8),
      _ => None,
    }
  }
}

impl fmt::Display for TyKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TyKind::Prim(p) => write!(f, "{p}"),
      TyKind::Ptr { mutable, target } => write!(f, "*{}{}", if *mutable { "mut " } else { "const " }, target),
      TyKind::Array { elem, len } => write!(f, "[{elem}; {len}]"),
      TyKind::Func { params, ret, .. } => {
        write!(f, "fun(")?;
        for (i, p) in params.iter().enumerate() {
          if i > 0 { write!(f, ", ")?; }
          write!(f, "{p}")?;
        }
        write!(f, ") -> {ret}")
      }
      TyKind::Struct { name, .. } | TyKind::Enum { name, .. } | TyKind::BitStruct { name, .. } |
      TyKind::Interface { name, .. } | TyKind::ErrorEnum { name, .. } => write!(f, "{name}"),
    }
  }
}

/// Structural equality except for nominal types, matching spec §3's
/// "Two types are equal structurally except for named nominal types...
/// which are equal by identity." `TyKind`'s derived `PartialEq` already
/// achieves this because the nominal variants carry a `TypeId` that is
/// compared by value, and `TypeId` is allocated once per declaration.
#[must_use] pub fn ty_eq(a: &Ty, b: &Ty) -> bool { a == b }

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn structural_types_compare_by_shape() {
    assert_eq!(prim(Prim::U8), prim(Prim::U8));
    assert_eq!(array(prim(Prim::U8), 5), array(prim(Prim::U8), 5));
    assert_ne!(array(prim(Prim::U8), 5), array(prim(Prim::U8), 6));
  }

  #[test]
  fn nominal_types_compare_by_identity_not_shape() {
    let a = Rc::new(TyKind::Struct {
      id: TypeId(0), name: crate::symbol::intern("Point"), fields: empty_payload(),
    });
    let b = Rc::new(TyKind::Struct {
      id: TypeId(1), name: crate::symbol::intern("Point"), fields: empty_payload(),
    });
    assert_ne!(a, b, "same name and shape but different TypeId must not be equal");
  }

  #[test]
  fn widening_is_directional() {
    assert!(Prim::U8.widens_to(Prim::U16));
    assert!(!Prim::U16.widens_to(Prim::U8));
  }
}
