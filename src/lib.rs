//! MinZ compiler core: semantic lowering, MIR optimizer, and Z80 TRUE-SMC
//! backend (spec §A: "a library consumed by a thin CLI driver").
//!
//! The external front end hands us an already-parsed [`types::ast::Module`]
//! (parsing, and the `@minz`/`@lua`/`@mir`/`@define`/`@if` metaprogramming
//! surfaces that run before it, are an external collaborator — spec §1
//! Non-goals); [`Compiler::compile`] is the one entry point that takes it
//! from there through to assembly text and a patch table.

pub mod backend;
pub mod build_mir;
pub mod build_vcode;
pub mod codegen;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod mir_dump;
pub mod mir_opt;
pub mod patch_table;
pub mod span;
pub mod symbol;
pub mod symtab;
pub mod types;

use tracing::instrument;

use crate::backend::{CompiledOutput, Registry};
use crate::config::{CompileOptions, OptLevel};
use crate::diagnostics::Sink;
use crate::error::{CompileError, TargetError};
use crate::symtab::SymbolTable;
use crate::types::ast;

/// The result of a successful compile: assembly text and its patch table,
/// plus whatever diagnostics (warnings only — errors abort the compile)
/// accumulated along the way and the MIR dump, if the caller asked for one.
pub struct CompileResult {
  pub output: CompiledOutput,
  pub diagnostics: Vec<diagnostics::Diagnostic>,
  pub mir_text: Option<String>,
}

/// Owns nothing between calls: every [`Compiler::compile`] call builds its
/// own symbol table and diagnostic sink, so concurrent compiles (one per
/// translation unit, say) never share mutable state (spec §5: "compiling
/// two independent modules concurrently produces the same result as
/// compiling them sequentially").
#[derive(Default)]
pub struct Compiler {
  registry: Registry,
}

impl Compiler {
  #[must_use] pub fn new() -> Self { Self { registry: Registry::with_builtins() } }

  /// Registers an additional backend beyond the built-in Z80 target, for an
  /// embedder that ships its own (spec §4.5: "a future backend registers
  /// itself here and nowhere else").
  pub fn register_backend(&mut self, b: Box<dyn backend::Backend>) {
    self.registry.register(b);
  }

  /// Runs the full pipeline: semantic lowering to MIR, optional
  /// optimization, and backend codegen. `opts.backend` selects the target
  /// from the registry; an unknown name is a [`TargetError::UnknownBackend`]
  /// before any work happens, so a typo never burns a whole compile.
  #[instrument(level = "info", skip_all, fields(backend = %opts.backend.0))]
  pub fn compile(&self, module: &ast::Module, opts: &CompileOptions) -> Result<CompileResult, CompileError> {
    let backend = self.registry.get(&opts.backend.0)
      .ok_or_else(|| TargetError::UnknownBackend(opts.backend.0.clone()))?;

    let mut symtab = SymbolTable::new();
    let mut sink = Sink::new();

    tracing::debug!("lowering to MIR");
    let mir_module = build_mir::build_mir(module, &mut symtab, backend.name(), &mut sink)?;
    if sink.has_errors() {
      return Err(CompileError::Aborted(sink.error_count()));
    }

    let mir_module = match opts.opt {
      OptLevel::On => {
        tracing::debug!("running optimizer pipeline");
        let pipeline = mir_opt::Pipeline::new(&backend.capabilities(), opts.smc);
        pipeline.run(mir_module)
      }
      OptLevel::Off => mir_module,
    };

    let mir_text = opts.emit_mir.is_some().then(|| mir_dump::dump(&mir_module));

    tracing::debug!(backend = backend.name(), "lowering to target assembly");
    let output = backend.compile(&mir_module, opts)?;

    Ok(CompileResult {
      output,
      diagnostics: sink.into_sorted(),
      mir_text,
    })
  }

  #[must_use] pub fn backend_names(&self) -> Vec<&'static str> { self.registry.names() }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::span::FileSpan;
  use crate::types::ast::*;

  fn fn_decl(name: &str, body_stmts: Vec<Stmt>, ret: TypeExpr) -> Decl {
    Decl {
      span: FileSpan::synthetic(),
      kind: DeclKind::Function(FunctionDecl {
        name: crate::symbol::intern(name),
        params: vec![],
        ret,
        error_enum: None,
        body: Block { span: FileSpan::synthetic(), stmts: body_stmts },
        attrs: vec![],
      }),
    }
  }

  fn u8_ty() -> TypeExpr {
    TypeExpr { span: FileSpan::synthetic(), kind: TypeExprKind::Name(crate::symbol::intern("u8")) }
  }

  fn int_lit(n: i64) -> Expr {
    Expr { span: FileSpan::synthetic(), kind: ExprKind::IntLit(n) }
  }

  #[test]
  fn compiles_a_single_constant_returning_function() {
    let module = Module {
      decls: vec![fn_decl(
        "answer",
        vec![Stmt { span: FileSpan::synthetic(), kind: StmtKind::Return(Some(int_lit(42))) }],
        u8_ty(),
      )],
    };
    let compiler = Compiler::new();
    let result = compiler.compile(&module, &CompileOptions::default()).expect("a trivial module should compile");
    assert!(result.output.assembly.contains("answer:"));
  }

  #[test]
  fn unknown_backend_is_rejected_before_lowering() {
    let module = Module { decls: vec![] };
    let compiler = Compiler::new();
    let mut opts = CompileOptions::default();
    opts.backend = config::BackendSelector("nonexistent".to_string());
    let err = compiler.compile(&module, &opts).expect_err("an unregistered backend name must fail fast");
    assert!(matches!(err, CompileError::Target(TargetError::UnknownBackend(_))));
  }

  #[test]
  fn emit_mir_option_produces_dump_text() {
    let module = Module {
      decls: vec![fn_decl(
        "answer",
        vec![Stmt { span: FileSpan::synthetic(), kind: StmtKind::Return(Some(int_lit(1))) }],
        u8_ty(),
      )],
    };
    let compiler = Compiler::new();
    let mut opts = CompileOptions::default();
    opts.emit_mir = Some(std::path::PathBuf::from("out.mir"));
    let result = compiler.compile(&module, &opts).expect("should compile");
    assert!(result.mir_text.unwrap().contains("fn answer:"));
  }
}
