//! Compilation passes.

use std::fmt;

/// One of the three passes the engine runs over a program.
///
/// Passes are ordered: every action runs once per pass, and a pass only
/// starts after the previous one ran over the whole program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CompilationStep {
    /// Register symbols and placeholders. Looking up paths is forbidden.
    Declare,
    /// Look up symbols and register placeholder dependencies.
    /// Placeholders are sorted and resolved at the end of this pass.
    ResolveDependencies,
    /// Emit text; every symbol is resolved.
    Generate,
}

impl CompilationStep {
    /// All passes in execution order.
    pub const ALL: [CompilationStep; 3] = [
        CompilationStep::Declare,
        CompilationStep::ResolveDependencies,
        CompilationStep::Generate,
    ];

    /// The pass that runs after this one.
    pub fn next(self) -> Option<CompilationStep> {
        match self {
            CompilationStep::Declare => Some(CompilationStep::ResolveDependencies),
            CompilationStep::ResolveDependencies => Some(CompilationStep::Generate),
            CompilationStep::Generate => None,
        }
    }
}

impl fmt::Display for CompilationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompilationStep::Declare => "declare",
            CompilationStep::ResolveDependencies => "resolve-dependencies",
            CompilationStep::Generate => "generate",
        };
        f.write_str(name)
    }
}
