//! The user-visible diagnostic stream (spec §6 Output, §7 Error Handling).
//!
//! This is deliberately a separate channel from `tracing`: `tracing` carries
//! internal pass telemetry for developers of the compiler, while
//! [`Diagnostic`] is the contract with the compiler's *users* — its wire
//! format (`file:line:col: severity: message`) is part of the external
//! interface and must stay stable.

use std::fmt;
use crate::span::FileSpan;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Severity {
  Error,
  Warning,
}

impl fmt::Display for Severity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Severity::Error => "error",
      Severity::Warning => "warning",
    })
  }
}

/// One reported problem, optionally with a source snippet and a caret, and
/// optionally with a hint (spec §6: "optionally followed by a source
/// snippet with a caret").
#[derive(Clone, Debug)]
pub struct Diagnostic {
  pub severity: Severity,
  pub span: FileSpan,
  pub message: String,
  pub snippet: Option<String>,
  pub hint: Option<String>,
}

impl Diagnostic {
  #[must_use] pub fn error(span: FileSpan, message: impl Into<String>) -> Self {
    Self { severity: Severity::Error, span, message: message.into(), snippet: None, hint: None }
  }

  #[must_use] pub fn warning(span: FileSpan, message: impl Into<String>) -> Self {
    Self { severity: Severity::Warning, span, message: message.into(), snippet: None, hint: None }
  }

  #[must_use] pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
    self.snippet = Some(snippet.into());
    self
  }

  #[must_use] pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
    self.hint = Some(hint.into());
    self
  }
}

impl fmt::Display for Diagnostic {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}: {}", self.span, self.severity, self.message)?;
    if let Some(hint) = &self.hint { write!(f, "\n  hint: {hint}")?; }
    if let Some(snippet) = &self.snippet {
      write!(f, "\n{snippet}\n{}^", " ".repeat(self.span.start.col.saturating_sub(1) as usize))?;
    }
    Ok(())
  }
}

/// Append-only diagnostic sink, sorted by source order before being printed
/// (spec §5: "diagnostics are emitted in source order within a function, and
/// functions in declaration order within a module, regardless of any
/// internal parallelism").
#[derive(Default)]
pub struct Sink {
  diags: Vec<Diagnostic>,
}

impl Sink {
  #[must_use] pub fn new() -> Self { Self::default() }

  pub fn push(&mut self, d: Diagnostic) { self.diags.push(d); }

  pub fn extend(&mut self, other: Sink) { self.diags.extend(other.diags); }

  #[must_use] pub fn has_errors(&self) -> bool {
    self.diags.iter().any(|d| d.severity == Severity::Error)
  }

  #[must_use] pub fn error_count(&self) -> usize {
    self.diags.iter().filter(|d| d.severity == Severity::Error).count()
  }

  /// Consume the sink, returning diagnostics sorted in a stable,
  /// deterministic order: by file, then by start position.
  #[must_use] pub fn into_sorted(mut self) -> Vec<Diagnostic> {
    self.diags.sort_by(|a, b| {
      (&*a.span.file, a.span.start).cmp(&(&*b.span.file, b.span.start))
    });
    self.diags
  }
}
