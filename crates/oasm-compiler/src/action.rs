//! Compiler actions and programs.
//!
//! A translator lowers source into a [`Program`]: an ordered list of
//! [`CompilerAction`]s. The engine runs every action once per pass; each
//! action decides what to do from the pass it is given.

use std::fmt;
use std::rc::Rc;

use oasm_core::{CompilationStep, Result};

use crate::compiler::Compiler;

/// One deferred operation, run once per pass.
pub type CompilerAction = Rc<dyn Fn(&mut Compiler, CompilationStep) -> Result<()>>;

/// Wrap a closure as an action.
pub fn action(f: impl Fn(&mut Compiler, CompilationStep) -> Result<()> + 'static) -> CompilerAction {
    Rc::new(f)
}

/// An action that only does something during `pass`.
pub fn in_pass(
    pass: CompilationStep,
    f: impl Fn(&mut Compiler) -> Result<()> + 'static,
) -> CompilerAction {
    Rc::new(move |compiler, current| {
        if current == pass {
            f(compiler)
        } else {
            Ok(())
        }
    })
}

/// An action run identically in every pass.
pub fn every_pass(f: impl Fn(&mut Compiler) -> Result<()> + 'static) -> CompilerAction {
    Rc::new(move |compiler, _| f(compiler))
}

/// An ordered list of actions. Cloning shares the list.
#[derive(Clone, Default)]
pub struct Program(Rc<[CompilerAction]>);

impl Program {
    pub fn new(actions: Vec<CompilerAction>) -> Self {
        Program(actions.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompilerAction> {
        self.0.iter()
    }

    /// The actions of this program followed by those of `other`.
    pub fn concat(&self, other: &Program) -> Program {
        self.iter().chain(other.iter()).cloned().collect()
    }

    /// Surround this program with `before` and `after`.
    pub fn wrapped(&self, before: CompilerAction, after: CompilerAction) -> Program {
        std::iter::once(before)
            .chain(self.iter().cloned())
            .chain(std::iter::once(after))
            .collect()
    }

    /// Run every action once for `pass`.
    pub fn run(&self, compiler: &mut Compiler, pass: CompilationStep) -> Result<()> {
        for action in self.iter() {
            action(compiler, pass)?;
        }
        Ok(())
    }
}

impl FromIterator<CompilerAction> for Program {
    fn from_iter<I: IntoIterator<Item = CompilerAction>>(iter: I) -> Self {
        Program(iter.into_iter().collect())
    }
}

impl From<Vec<CompilerAction>> for Program {
    fn from(actions: Vec<CompilerAction>) -> Self {
        Program::new(actions)
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Program({} actions)", self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn in_pass_filters() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        let program = Program::new(vec![in_pass(CompilationStep::Generate, move |_| {
            log.borrow_mut().push("generate");
            Ok(())
        })]);

        let mut compiler = Compiler::new(&["program"]);
        compiler.compile(&program, CompilationStep::Generate).unwrap();
        assert_eq!(*seen.borrow(), vec!["generate"]);
    }

    #[test]
    fn every_pass_runs_three_times() {
        let count = Rc::new(RefCell::new(0));
        let counter = count.clone();
        let program: Program = vec![every_pass(move |_| {
            *counter.borrow_mut() += 1;
            Ok(())
        })]
        .into();

        let mut compiler = Compiler::new(&["program"]);
        compiler.compile(&program, CompilationStep::Generate).unwrap();
        assert_eq!(*count.borrow(), 3);
    }

    #[test]
    fn concat_and_wrap_keep_order() {
        let a: Program = vec![every_pass(|_| Ok(()))].into();
        let b: Program = vec![every_pass(|_| Ok(())), every_pass(|_| Ok(()))].into();
        assert_eq!(a.concat(&b).len(), 3);
        assert_eq!(a.wrapped(every_pass(|_| Ok(())), every_pass(|_| Ok(()))).len(), 3);
    }
}
