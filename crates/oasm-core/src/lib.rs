//! Core types shared by the oasm compiler crates.
//!
//! - [`span`]: source positions used for error attribution
//! - [`size`]: operand size specifiers
//! - [`pass`]: the three compilation passes
//! - [`error`]: the error taxonomy
//! - [`settings`]: compiler configuration

pub mod error;
pub mod pass;
pub mod settings;
pub mod size;
pub mod span;

pub use error::{CompileError, ErrorCategory, Result};
pub use pass::CompilationStep;
pub use settings::CompilerSettings;
pub use size::SizeSpecifier;
pub use span::{SourceLocation, Span};
