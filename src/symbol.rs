//! Global string interner.
//!
//! Every identifier that flows through the pipeline — source names, mangled
//! call-site names, generated lambda-lift names — is interned once here so
//! that later stages compare names by a cheap `Copy` index rather than by
//! string content.

use std::cell::RefCell;
use std::fmt;
use hashbrown::HashMap;

/// An interned identifier. Two `Symbol`s are equal iff the strings they were
/// interned from are equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl fmt::Debug for Symbol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    with_interner(|i| write!(f, "{:?}", i.resolve(*self)))
  }
}

impl fmt::Display for Symbol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    with_interner(|i| f.write_str(i.resolve(*self)))
  }
}

/// Interning table: strings are leaked into `'static` slices so that
/// [`Symbol::as_str`] can hand back a reference without a borrow on the
/// interner. This is the same trade made by long-lived compiler interners:
/// the table only grows for the lifetime of one compilation process.
#[derive(Default)]
struct Interner {
  map: HashMap<&'static str, Symbol>,
  strings: Vec<&'static str>,
}

impl Interner {
  fn intern(&mut self, s: &str) -> Symbol {
    if let Some(&sym) = self.map.get(s) { return sym }
    let leaked: &'static str = Box::leak(s.to_owned().into_boxed_str());
    let sym = Symbol(self.strings.len().try_into().expect("more than u32::MAX symbols interned"));
    self.strings.push(leaked);
    self.map.insert(leaked, sym);
    sym
  }

  fn resolve(&self, sym: Symbol) -> &'static str {
    self.strings[sym.0 as usize]
  }
}

thread_local! {
  static INTERNER: RefCell<Interner> = RefCell::new(Interner::default());
}

fn with_interner<R>(f: impl FnOnce(&Interner) -> R) -> R {
  INTERNER.with(|i| f(&i.borrow()))
}

/// Intern a string, returning its [`Symbol`].
pub fn intern(s: &str) -> Symbol {
  INTERNER.with(|i| i.borrow_mut().intern(s))
}

impl Symbol {
  /// Resolve this symbol back to its string contents.
  #[must_use] pub fn as_str(self) -> &'static str {
    with_interner(|i| i.resolve(self))
  }

  /// Intern a fresh `base$suffix`-style generated name. Used by lambda
  /// lifting and overload mangling, which both need to manufacture new
  /// top-level names deterministically from parts already interned.
  #[must_use] pub fn generate(parts: &[&str]) -> Symbol {
    intern(&parts.concat())
  }
}

impl serde::Serialize for Symbol {
  fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(self.as_str())
  }
}

impl<'de> serde::Deserialize<'de> for Symbol {
  fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
    Ok(intern(&s))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn interning_is_idempotent() {
    let a = intern("foo");
    let b = intern("foo");
    assert_eq!(a, b);
    assert_eq!(a.as_str(), "foo");
  }

  #[test]
  fn distinct_strings_get_distinct_symbols() {
    assert_ne!(intern("add"), intern("sub"));
  }
}
