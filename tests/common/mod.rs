//! Helpers shared by the integration tests.

#![allow(dead_code)]

use oasm::prelude::*;
use oasm::{DEFAULT_SECTIONS, PROGRAM_SECTION};

/// Route `log` output through the test harness. Safe to call repeatedly.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Run every pass over `program` with the default sections.
pub fn compile(program: &Program) -> Result<Compiler> {
    init_logging();
    let mut compiler = Compiler::new(&DEFAULT_SECTIONS);
    compiler.compile(program, CompilationStep::Generate)?;
    Ok(compiler)
}

/// Code section of `program`, panicking on compile errors.
pub fn code(program: &Program) -> String {
    let compiler = compile(program).unwrap_or_else(|e| panic!("compilation failed: {e}"));
    compiler.section_output(PROGRAM_SECTION).unwrap_or_default()
}

/// The whole NASM listing for `program`, including the platform declarations.
pub fn listing(program: &Program) -> String {
    init_logging();
    oasm::win64::assemble(program, CompilerSettings::default())
        .unwrap_or_else(|e| panic!("assembly failed: {e}"))
}

/// Compile `program` and return the error it fails with.
pub fn compile_error(program: &Program) -> CompileError {
    match compile(program) {
        Ok(_) => panic!("expected compilation to fail"),
        Err(err) => err,
    }
}

/// Non-empty lines of `text`.
pub fn lines(text: &str) -> Vec<&str> {
    text.lines().filter(|l| !l.is_empty()).collect()
}
