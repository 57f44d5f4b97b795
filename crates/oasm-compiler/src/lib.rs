//! oasm compiler core
//!
//! A three-pass compilation engine for Organised Assembly. Translated
//! programs are lists of actions; the engine replays them once per pass and
//! writes NASM text into named sections.
//!
//! ## Architecture
//!
//! - **Declare**: every global name is introduced, as a symbol or as a
//!   placeholder that will compute it later
//! - **Resolve dependencies**: placeholders state what they wait for, then
//!   the dependency graph is sorted and resolved in order
//! - **Generate**: code is emitted; stack-relative lines wait until the
//!   frame size of their function is known
//!
//! ## Modules
//!
//! - [`action`]: actions and programs
//! - [`backend`]: the calling-convention interface and call/return actions
//! - [`builtins`]: builtin types and literal data
//! - [`compiler`]: the engine
//! - [`identifier`]: dotted, optionally templated names
//! - [`layout`]: structure declarations
//! - [`line`]: output lines made of symbols
//! - [`operand`]: registers and operands
//! - [`resolver`]: dependency ordering of placeholders
//! - [`scope`]: the scope tree
//! - [`section`]: output sections with deferred lines
//! - [`stack`]: function frames
//! - [`state`]: engine snapshots
//! - [`symbol`]: symbol kinds
//! - [`template`]: templates and their instances
//! - [`value_type`]: value types and type references

pub mod action;
pub mod backend;
pub mod builtins;
pub mod compiler;
pub mod identifier;
pub mod layout;
pub mod line;
pub mod operand;
pub mod resolver;
pub mod scope;
pub mod section;
pub mod stack;
pub mod state;
pub mod symbol;
pub mod template;
pub mod value_type;

pub use action::{CompilerAction, Program, action, every_pass, in_pass};
pub use backend::{Argument, Backend, CallSite, call_action, return_action};
pub use compiler::{
    Compiler, DATA_SECTION, DEFAULT_SECTIONS, PROGRAM_SECTION, UNINITIALISED_SECTION,
};
pub use identifier::{Identifier, path};
pub use layout::{Field, structure};
pub use line::SymbolString;
pub use operand::{Operand, OperandKind, Register};
pub use resolver::DependencyGraph;
pub use scope::{ScopeId, ScopeKind, ScopeTree};
pub use section::{CompilerEvent, Section, SectionSink};
pub use state::CompilerState;
pub use symbol::{
    ConstantSymbol, FunctionMetadata, FunctionSymbol, Parameter, Placeholder, Symbol, TypeSymbol,
};
pub use template::{InstanceState, Template, TemplateInstance};
pub use value_type::{TypeExpr, TypeRef, ValueType};

// Re-export the shared core types for convenience
pub use oasm_core::{
    CompilationStep, CompileError, CompilerSettings, ErrorCategory, Result, SizeSpecifier,
    SourceLocation, Span,
};
