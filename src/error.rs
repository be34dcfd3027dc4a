//! Error classification (spec §7).
//!
//! Leaf error enums per subsystem compose into [`CompileError`] the way
//! `fuel-vm`'s `InterpreterError` composes `VmValidationError` and `io::Error`
//! via `#[from]`: each stage can return its own precise error type, and the
//! driver only has to handle one.

use thiserror::Error;
use crate::span::FileSpan;
use crate::types::ty::Ty;

/// Semantic errors, detected by the analyzer (spec §4.2 Failure modes).
/// These are accumulated, not raised immediately; the analyzer keeps
/// checking after recording one so the user sees every problem in a module
/// in a single run (spec §7: "collected across the whole module").
#[derive(Debug, Error, Clone)]
pub enum AnalyzerError {
  #[error("type mismatch: expected `{expected}`, found `{found}`")]
  TypeMismatch { expected: Ty, found: Ty },
  #[error("undefined identifier `{0}`")]
  UndefinedIdentifier(String),
  #[error("ambiguous overload for `{name}`: candidates {candidates:?} all match with score {score}")]
  AmbiguousOverload { name: String, candidates: Vec<String>, score: u32 },
  #[error("`case` expression is not exhaustive: missing variant(s) {missing:?}")]
  NotExhaustive { missing: Vec<String> },
  #[error("lambda assigned to `{name}` captures `{captured}` and cannot be returned")]
  InvalidCapture { name: String, captured: String },
  #[error("invalid cast from `{from}` to `{to}`")]
  InvalidCast { from: Ty, found: Ty, to: Ty },
  #[error("wrong number of arguments to `{callee}`: expected {expected}, found {found}")]
  Arity { callee: String, expected: usize, found: usize },
  #[error("`{name}` is not visible from this scope")]
  VisibilityViolation { name: String },
}

/// Structural errors: malformed module shape rather than a type error
/// inside a well-formed one (spec §7).
#[derive(Debug, Error, Clone)]
pub enum StructuralError {
  #[error("malformed module: {0}")]
  MalformedModule(String),
  #[error("cyclic type definition involving `{0}`")]
  CyclicTypeDefinition(String),
  #[error("`{name}` is defined more than once (first definition at {first})")]
  DuplicateDefinition { name: String, first: FileSpan },
  #[error("return-type-only overload `{name}` is not permitted")]
  ReturnTypeOnlyOverload { name: String },
}

/// Errors specific to the chosen backend: constructs the optimizer should
/// have already ruled out for that target (spec §4.4 Error conditions,
/// §4.5 capability gating).
#[derive(Debug, Error, Clone)]
pub enum TargetError {
  #[error("backend `{backend}` does not support SMC, but function `{func}` was marked SMC-eligible")]
  SmcUnsupported { backend: String, func: String },
  #[error("{width}-bit SMC anchors are not supported on this backend (parameter `{param}` of `{func}`)")]
  SmcWidthUnsupported { width: u8, func: String, param: String },
  #[error("function `{0}` aborted backend lowering after an unrecoverable error")]
  FunctionAborted(String),
  #[error("no backend registered under the name `{0}`")]
  UnknownBackend(String),
}

/// Internal compiler errors: invariant violations that mean the optimizer
/// or analyzer let something through it should not have. These are always
/// fatal and reported distinctively (spec §7).
#[derive(Debug, Error, Clone)]
pub enum InternalError {
  #[error("internal compiler error in pass `{pass}`, function `{func}`: {detail}")]
  InvariantViolation { pass: String, func: String, detail: String },
  #[error("internal compiler error: unreachable case hit in `{location}`: {detail}")]
  Unreachable { location: String, detail: String },
  #[error("internal compiler error: register allocation failed to construct a schedule for `{func}`")]
  RegallocFailure { func: String },
}

/// The top-level error type returned by [`crate::Compiler::compile`].
#[derive(Debug, Error)]
pub enum CompileError {
  #[error(transparent)]
  Semantic(#[from] AnalyzerError),
  #[error(transparent)]
  Structural(#[from] StructuralError),
  #[error(transparent)]
  Target(#[from] TargetError),
  #[error(transparent)]
  Internal(#[from] InternalError),
  /// Raised by [`crate::Compiler::compile`] once the diagnostic sink holds at
  /// least one error; the sink itself is the source of truth for messages,
  /// this variant only signals "abort with non-zero exit code" to the CLI.
  #[error("compilation failed with {0} error(s)")]
  Aborted(usize),
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
  #[error("failed to serialize patch table: {0}")]
  Json(#[from] serde_json::Error),
}

/// Non-fatal diagnostics (spec §7 Warnings).
#[derive(Debug, Clone)]
pub enum Warning {
  UnusedVariable(String),
  UnusedImport(String),
  UnreachableCode,
  RedundantCast(Ty),
  /// The peephole optimizer recognized a pattern where a parameter appears
  /// to be overwritten before its SMC anchor is read — almost always a sign
  /// that the source mutated a by-value parameter and expected the mutation
  /// to be visible to the caller.
  SuspiciousParameterOverwrite { func: String, param: String },
}

impl Warning {
  #[must_use] pub fn message(&self) -> String {
    match self {
      Warning::UnusedVariable(name) => format!("unused variable `{name}`"),
      Warning::UnusedImport(name) => format!("unused import `{name}`"),
      Warning::UnreachableCode => "unreachable code after terminator".to_string(),
      Warning::RedundantCast(ty) => format!("redundant cast to `{ty}`"),
      Warning::SuspiciousParameterOverwrite { func, param } => format!(
        "parameter `{param}` of `{func}` is overwritten before its SMC anchor is ever read"
      ),
    }
  }
}
