//! Error types for the compiler.
//!
//! ## Categories
//!
//! ```text
//! CompileError
//! ├── User      - caused by source content (duplicate / undefined symbols,
//! │               type mismatches, cycles, template arity, stack discipline)
//! ├── Logic     - an operation invoked during the wrong pass; a bug in the
//! │               translator or a backend, not in the source
//! └── Internal  - broken engine invariants (unbalanced scope stacks,
//!                 placeholders resolved twice, ...)
//! ```
//!
//! Every category aborts compilation. The first `compile` frame an error
//! crosses wraps it in [`CompileError::Located`] with the file, line and
//! column that were current when it was raised.

use thiserror::Error;

use crate::{CompilationStep, SourceLocation};

/// Convenience alias used throughout the compiler crates.
pub type Result<T> = std::result::Result<T, CompileError>;

/// Broad classification used when presenting errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Triggered by source content.
    User,
    /// An engine operation was called during the wrong pass.
    Logic,
    /// An engine invariant was violated.
    Internal,
}

/// Errors raised while compiling a program.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    /// A name was declared twice in the same scope.
    #[error("attempted to redefine '{name}' in {scope}")]
    DuplicateSymbol {
        /// The duplicated name.
        name: String,
        /// Absolute name of the scope, or a description of it.
        scope: String,
    },

    /// A path lookup found nothing.
    #[error("attempted to reference non-existent symbol '{path}'")]
    UndefinedSymbol {
        /// The dotted path that failed to resolve.
        path: String,
    },

    /// Sizes or types of operands disagree.
    #[error("type mismatch: {message}")]
    TypeMismatch {
        /// Description of the mismatch.
        message: String,
    },

    /// An operation was invoked during a pass that does not allow it.
    #[error("attempted to {operation} during pass {pass}")]
    PassOrdering {
        /// What was attempted.
        operation: String,
        /// The pass that was running.
        pass: CompilationStep,
    },

    /// Placeholders depend on each other in a cycle.
    #[error("encountered a cycle in the dependency graph between {}", nodes.join(", "))]
    CyclicDependency {
        /// Placeholders still waiting on a dependency when sorting ended.
        nodes: Vec<String>,
    },

    /// A template was instantiated with the wrong number of arguments.
    #[error("template '{name}' expects {expected} parameter(s), got {found}")]
    TemplateArity {
        /// Template name.
        name: String,
        /// Declared parameter count.
        expected: usize,
        /// Number of arguments supplied.
        found: usize,
    },

    /// A local scope was left with the stack pointer away from its base.
    #[error("stack discipline violation: {message}")]
    StackDiscipline {
        /// Description of the violation.
        message: String,
    },

    /// Any other error caused by source content.
    #[error("{0}")]
    Language(String),

    /// An engine invariant was broken.
    #[error("internal compiler fault: {0}")]
    Internal(String),

    /// Another error annotated with the position it was raised at.
    #[error("in {location}: {source}")]
    Located {
        /// Where the error was raised.
        location: SourceLocation,
        /// The underlying error.
        source: Box<CompileError>,
    },
}

impl CompileError {
    /// Create a language error with a message.
    pub fn language(message: impl Into<String>) -> Self {
        CompileError::Language(message.into())
    }

    /// Create an internal fault with a message.
    pub fn internal(message: impl Into<String>) -> Self {
        CompileError::Internal(message.into())
    }

    /// Create a type mismatch error.
    pub fn type_mismatch(message: impl Into<String>) -> Self {
        CompileError::TypeMismatch {
            message: message.into(),
        }
    }

    /// Create a pass ordering violation.
    pub fn pass_ordering(operation: impl Into<String>, pass: CompilationStep) -> Self {
        CompileError::PassOrdering {
            operation: operation.into(),
            pass,
        }
    }

    /// Create an undefined symbol error for a dotted path.
    pub fn undefined(path: impl Into<String>) -> Self {
        CompileError::UndefinedSymbol { path: path.into() }
    }

    /// Create a stack discipline violation.
    pub fn stack_discipline(message: impl Into<String>) -> Self {
        CompileError::StackDiscipline {
            message: message.into(),
        }
    }

    /// Attach a location unless one is already attached.
    pub fn located(self, location: SourceLocation) -> Self {
        match self {
            located @ CompileError::Located { .. } => located,
            other => CompileError::Located {
                location,
                source: Box::new(other),
            },
        }
    }

    /// The location attached to this error, if any.
    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            CompileError::Located { location, .. } => Some(location),
            _ => None,
        }
    }

    /// The error without its location wrapper.
    pub fn kind(&self) -> &CompileError {
        match self {
            CompileError::Located { source, .. } => source.kind(),
            other => other,
        }
    }

    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        match self.kind() {
            CompileError::PassOrdering { .. } => ErrorCategory::Logic,
            CompileError::Internal(_) => ErrorCategory::Internal,
            _ => ErrorCategory::User,
        }
    }

    /// Whether this error is an internal fault.
    pub fn is_internal(&self) -> bool {
        self.category() == ErrorCategory::Internal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Span;

    #[test]
    fn duplicate_symbol_display() {
        let err = CompileError::DuplicateSymbol {
            name: "x".into(),
            scope: "Foo.Bar".into(),
        };
        assert_eq!(err.to_string(), "attempted to redefine 'x' in Foo.Bar");
    }

    #[test]
    fn pass_ordering_display() {
        let err = CompileError::pass_ordering("resolve 'a.b'", CompilationStep::Declare);
        assert_eq!(err.to_string(), "attempted to resolve 'a.b' during pass declare");
        assert_eq!(err.category(), ErrorCategory::Logic);
    }

    #[test]
    fn cycle_display_lists_nodes() {
        let err = CompileError::CyclicDependency {
            nodes: vec!["a".into(), "b".into()],
        };
        assert_eq!(
            err.to_string(),
            "encountered a cycle in the dependency graph between a, b"
        );
    }

    #[test]
    fn location_is_attached_once() {
        let first = SourceLocation::new(Some("a.oasm".into()), Span::new(3, 4));
        let second = SourceLocation::new(Some("b.oasm".into()), Span::new(9, 9));

        let err = CompileError::undefined("x")
            .located(first.clone())
            .located(second);

        assert_eq!(err.location(), Some(&first));
        assert_eq!(err.kind(), &CompileError::undefined("x"));
        assert_eq!(
            err.to_string(),
            "in 'a.oasm' at (3, 4): attempted to reference non-existent symbol 'x'"
        );
    }

    #[test]
    fn categories() {
        assert_eq!(CompileError::undefined("x").category(), ErrorCategory::User);
        assert!(CompileError::internal("boom").is_internal());
        let located = CompileError::internal("boom").located(SourceLocation::default());
        assert!(located.is_internal());
    }
}
