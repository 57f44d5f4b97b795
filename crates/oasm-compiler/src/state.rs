//! Engine snapshots used to instantiate templates.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use oasm_core::CompilerSettings;

use crate::compiler::{Compiler, SharedEpoch, SharedUsings};
use crate::scope::{ScopeId, ScopeTree};
use crate::section::SectionSink;

/// The state of a [`Compiler`] at a declaration site.
///
/// Shared parts stay shared with the engine it was taken from; the scope and
/// file stacks are copied.
#[derive(Clone)]
pub struct CompilerState {
    pub(crate) sinks: Vec<(String, SectionSink)>,
    pub(crate) tree: Rc<RefCell<ScopeTree>>,
    pub(crate) usings: SharedUsings,
    pub(crate) scopes: Vec<ScopeId>,
    pub(crate) files: Vec<String>,
    pub(crate) epoch: SharedEpoch,
    pub(crate) uid: Rc<Cell<u64>>,
    pub(crate) settings: Rc<CompilerSettings>,
}

impl CompilerState {
    pub(crate) fn capture(compiler: &Compiler) -> Self {
        Self {
            sinks: compiler
                .sections
                .iter()
                .map(|(name, section)| (name.clone(), section.sink().clone()))
                .collect(),
            tree: compiler.tree.clone(),
            usings: compiler.usings.clone(),
            scopes: compiler.scopes.clone(),
            files: compiler.files.clone(),
            epoch: compiler.epoch.clone(),
            uid: compiler.uid.clone(),
            settings: compiler.settings.clone(),
        }
    }

    /// Scope that was current when the snapshot was taken.
    pub fn scope(&self) -> ScopeId {
        match self.scopes.last() {
            Some(scope) => *scope,
            None => self.tree.borrow().root(),
        }
    }

    /// A fresh engine continuing from this snapshot, inside a new detached
    /// scope that hides everything it declares from the outside.
    pub fn instantiate(&self) -> (Compiler, ScopeId) {
        let mut compiler = Compiler::from_state(self);
        let scope = {
            let mut tree = self.tree.borrow_mut();
            let associated = tree.scope(self.scope()).associated_type().cloned();
            tree.add_detached(associated)
        };
        compiler.scopes.push(scope);
        (compiler, scope)
    }
}

impl fmt::Debug for CompilerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilerState")
            .field("scopes", &self.scopes)
            .field("files", &self.files)
            .field("uid", &self.uid.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::DEFAULT_SECTIONS;
    use crate::identifier::path;
    use crate::symbol::TypeSymbol;

    #[test]
    fn instance_shares_tree_and_uid() {
        let mut outer = Compiler::new(&DEFAULT_SECTIONS);
        outer.enter_global(&path("Outer")).unwrap();
        let state = outer.state().unwrap();
        outer.exit_global().unwrap();

        let (inner, scope) = state.instantiate();
        assert_eq!(inner.current(), scope);
        assert_eq!(inner.current_path(), vec!["Outer".to_string()]);

        let first = outer.uid();
        let second = inner.uid();
        assert_eq!(second, first + 1);
        assert!(outer.scope_tree().parent(scope).is_none());
    }

    #[test]
    fn instance_scope_inherits_associated_type() {
        let mut outer = Compiler::new(&DEFAULT_SECTIONS);
        let ty = TypeSymbol::sized_struct("Point", 8);
        let members = outer.declare_type("Point", ty.clone()).unwrap();
        outer.scopes.push(members);
        let state = outer.state().unwrap();
        outer.scopes.pop();

        let (inner, _) = state.instantiate();
        let associated = inner.current_associated_type().unwrap().unwrap();
        assert!(TypeSymbol::same_type(&associated, &ty));
    }

    #[test]
    fn instance_sections_write_to_outer_sinks() {
        let outer = Compiler::new(&DEFAULT_SECTIONS);
        let state = outer.state().unwrap();
        let (mut inner, _) = state.instantiate();

        inner.generate("nop", "program").unwrap();
        assert_eq!(outer.section_output("program").unwrap(), "");
        inner
            .compile(&Default::default(), oasm_core::CompilationStep::Generate)
            .unwrap();
        assert_eq!(outer.section_output("program").unwrap(), "nop\n");
    }

    #[test]
    fn snapshot_debug_shows_scopes_and_files() {
        let mut outer = Compiler::new(&DEFAULT_SECTIONS);
        outer.enter_file("main.oasm").unwrap();
        let state = outer.state().unwrap();
        let text = format!("{state:?}");
        assert!(text.starts_with("CompilerState"), "{text}");
        assert!(text.contains("main.oasm"), "{text}");
    }
}
