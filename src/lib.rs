//! oasm
//!
//! Compiler core for Organised Assembly, an assembly dialect with scopes,
//! structures, templates and function calls, lowered to NASM.
//!
//! A front end translates source files into [`Program`]s: flat lists of
//! actions replayed by the [`Compiler`] once per pass. This crate adds a
//! calling convention and the helpers front ends build programs from.
//!
//! ## Crates
//!
//! - `oasm-core`: errors, sizes, passes, settings, source locations
//! - `oasm-compiler`: scopes, symbols, placeholders, templates, sections
//!
//! ## Modules
//!
//! - [`program`]: files, namespaces, statements and control flow
//! - [`win64`]: the Win64 calling convention
//!
//! ## Example
//!
//! ```
//! use oasm::prelude::*;
//! use oasm::{program, win64::{self, Win64}};
//!
//! let main = Win64.function(
//!     "main",
//!     Vec::new(),
//!     program::sequence([program::instruction("xor eax, eax")]),
//! );
//! let listing = win64::assemble(&program::file("main.oasm", main), CompilerSettings::default())
//!     .unwrap();
//! assert!(listing.contains("xor eax, eax"));
//! ```

pub mod program;
pub mod win64;

pub use oasm_compiler::*;

pub use win64::Win64;

/// Everything needed to build and compile programs.
pub mod prelude {
    pub use oasm_compiler::{
        Argument, Backend, CompilationStep, CompileError, Compiler, CompilerSettings, Field,
        Identifier, Program, Result, SizeSpecifier, TypeRef, call_action, path, return_action,
        structure,
    };

    pub use crate::win64::Win64;
}
