//! The `minzc` CLI: a thin wrapper over [`minzc::Compiler`] (spec §6, §A).
//!
//! The compiler library never touches a filesystem or exits the process;
//! that's entirely this binary's job, which is also the only place `anyhow`
//! is allowed (spec §B: "anyhow only at the CLI boundary, for I/O-failure
//! context the library's precise error types don't need to carry").

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use minzc::config::{BackendSelector, CompileOptions, OptLevel};
use minzc::types::ast;
use minzc::Compiler;

/// Compile a MinZ parse tree to Z80 assembly.
#[derive(Parser, Debug)]
#[command(name = "minzc", version, about)]
struct Cli {
  /// Path to a JSON-serialized parse tree (the external front end's output).
  input: Option<PathBuf>,

  /// Output path for the generated assembly. Defaults to the input's stem
  /// with the backend's file extension; a sibling `.patch.json` is written
  /// alongside it.
  #[arg(short, long)]
  output: Option<PathBuf>,

  /// Target backend name. Falls back to `MINZ_BACKEND`, then `z80`.
  #[arg(short, long)]
  backend: Option<String>,

  /// Skip the MIR optimizer pipeline entirely.
  #[arg(long)]
  no_opt: bool,

  /// Disable TRUE-SMC parameter passing even if the backend supports it.
  #[arg(long)]
  no_smc: bool,

  /// Write a textual MIR dump next to the output, for inspecting what the
  /// optimizer did (spec §C.5).
  #[arg(long)]
  emit_mir: Option<PathBuf>,

  /// Print the names of every registered backend and exit.
  #[arg(long)]
  list_backends: bool,
}

fn main() -> ExitCode {
  let filter = tracing_subscriber::EnvFilter::try_from_env("MINZC_LOG")
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
  tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

  match run() {
    Ok(code) => code,
    Err(e) => {
      eprintln!("minzc: {e:#}");
      ExitCode::FAILURE
    }
  }
}

fn run() -> Result<ExitCode> {
  let cli = Cli::parse();
  let compiler = Compiler::new();

  if cli.list_backends {
    for name in compiler.backend_names() {
      println!("{name}");
    }
    return Ok(ExitCode::SUCCESS);
  }

  let input = cli.input.context("an input path is required unless --list-backends is given")?;
  let text = fs::read_to_string(&input).with_context(|| format!("reading {}", input.display()))?;
  let module: ast::Module = serde_json::from_str(&text)
    .with_context(|| format!("parsing {} as a MinZ parse tree", input.display()))?;

  let opts = CompileOptions {
    backend: BackendSelector::resolve(cli.backend),
    opt: if cli.no_opt { OptLevel::Off } else { OptLevel::On },
    smc: !cli.no_smc,
    emit_mir: cli.emit_mir.clone(),
    emit_patch_table: None,
    output: cli.output.clone(),
    list_backends: false,
  };

  let result = match compiler.compile(&module, &opts) {
    Ok(r) => r,
    Err(e) => {
      eprintln!("{e}");
      return Ok(ExitCode::FAILURE);
    }
  };

  for d in &result.diagnostics {
    eprintln!("{d}");
  }

  let out_path = cli.output.clone().unwrap_or_else(|| input.with_extension("asm"));
  fs::write(&out_path, &result.output.assembly).with_context(|| format!("writing {}", out_path.display()))?;

  let patch_path = out_path.with_extension("patch.json");
  let patch_json = result.output.patch_table.to_json().context("serializing the SMC patch table")?;
  fs::write(&patch_path, patch_json).with_context(|| format!("writing {}", patch_path.display()))?;

  if let (Some(mir_path), Some(text)) = (cli.emit_mir, result.mir_text) {
    fs::write(&mir_path, text).with_context(|| format!("writing {}", mir_path.display()))?;
  }

  Ok(ExitCode::SUCCESS)
}
