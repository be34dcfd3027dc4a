//! Source positions and spans.
//!
//! The external parser defines positions as `(line, column, byte-offset)`
//! triples (spec §6); we preserve these verbatim on every AST node and MIR
//! instruction rather than recomputing them, since only the parser has the
//! original source text during its own pass.

use std::fmt;
use std::rc::Rc;
use serde::{Deserialize, Serialize};

/// A single point in the original source text.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct Pos {
  pub line: u32,
  pub col: u32,
  pub byte: u32,
}

/// A half-open range `[start, end)` within a named file.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct FileSpan {
  pub file: Rc<str>,
  pub start: Pos,
  pub end: Pos,
}

impl FileSpan {
  #[must_use] pub fn new(file: Rc<str>, start: Pos, end: Pos) -> Self {
    Self { file, start, end }
  }

  /// A placeholder span for synthesized code (lambda-lifted functions,
  /// compiler-generated temporaries) that has no source location.
  #[must_use] pub fn synthetic() -> Self {
    Self {
      file: Rc::from("<generated>"),
      start: Pos { line: 0, col: 0, byte: 0 },
      end: Pos { line: 0, col: 0, byte: 0 },
    }
  }

  #[must_use] pub fn is_synthetic(&self) -> bool { &*self.file == "<generated>" }
}

impl fmt::Display for FileSpan {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}:{}", self.file, self.start.line, self.start.col)
  }
}

/// A value paired with the span it was parsed or generated from.
#[derive(Clone, Debug)]
pub struct Spanned<T> {
  pub span: FileSpan,
  pub k: T,
}

impl<T> Spanned<T> {
  pub fn new(span: FileSpan, k: T) -> Self { Self { span, k } }
  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
    Spanned { span: self.span, k: f(self.k) }
  }
}
