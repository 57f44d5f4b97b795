//! Placeholder symbols.
//!
//! A placeholder stands in for a symbol whose value is not known during the
//! declare pass. It carries a resolution closure which runs exactly once,
//! in the order computed by the dependency resolver. If the placeholder is
//! owned by a scope, the engine replaces the scope entry with the result.

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use oasm_core::{CompileError, Result};

use super::Symbol;
use crate::scope::ScopeId;
use crate::value_type::TypeRef;

/// Closure computing the final symbol of a placeholder.
pub type ResolveFn = Box<dyn FnOnce(&Placeholder) -> Result<Symbol>>;

struct PlaceholderInner {
    name: Option<String>,
    owner: Option<ScopeId>,
    parameters: Option<Vec<(Rc<TypeRef>, String)>>,
    resolve: RefCell<Option<ResolveFn>>,
    result: RefCell<Option<Symbol>>,
}

/// A not-yet-resolved symbol. Cloning shares the same placeholder.
#[derive(Clone)]
pub struct Placeholder(Rc<PlaceholderInner>);

impl Placeholder {
    /// Create a placeholder owned by `owner` under `name`.
    pub fn named(
        name: impl Into<String>,
        owner: ScopeId,
        resolve: impl FnOnce(&Placeholder) -> Result<Symbol> + 'static,
    ) -> Self {
        Self::build(Some(name.into()), Some(owner), None, Box::new(resolve))
    }

    /// Create a placeholder for a function whose parameter types are not yet known.
    pub fn function(
        name: impl Into<String>,
        owner: ScopeId,
        parameters: Vec<(Rc<TypeRef>, String)>,
        resolve: impl FnOnce(&Placeholder) -> Result<Symbol> + 'static,
    ) -> Self {
        Self::build(
            Some(name.into()),
            Some(owner),
            Some(parameters),
            Box::new(resolve),
        )
    }

    /// Create a placeholder that is not bound to any scope.
    pub fn anonymous(resolve: impl FnOnce(&Placeholder) -> Result<Symbol> + 'static) -> Self {
        Self::build(None, None, None, Box::new(resolve))
    }

    fn build(
        name: Option<String>,
        owner: Option<ScopeId>,
        parameters: Option<Vec<(Rc<TypeRef>, String)>>,
        resolve: ResolveFn,
    ) -> Self {
        Placeholder(Rc::new(PlaceholderInner {
            name,
            owner,
            parameters,
            resolve: RefCell::new(Some(resolve)),
            result: RefCell::new(None),
        }))
    }

    /// Name of the placeholder, if it is bound to a scope.
    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    /// Scope that holds this placeholder under its name.
    pub fn owner(&self) -> Option<ScopeId> {
        self.0.owner
    }

    /// Parameters of a function placeholder.
    pub fn parameters(&self) -> Option<&[(Rc<TypeRef>, String)]> {
        self.0.parameters.as_deref()
    }

    /// Whether the resolution closure already ran.
    pub fn is_resolved(&self) -> bool {
        self.0.result.borrow().is_some()
    }

    /// The resolved symbol, if resolution already happened.
    pub fn result(&self) -> Option<Symbol> {
        self.0.result.borrow().clone()
    }

    /// The resolved symbol, or an internal fault if it is not resolved yet.
    pub fn expect_result(&self) -> Result<Symbol> {
        self.result().ok_or_else(|| {
            CompileError::internal(format!(
                "attempted to obtain the result of unresolved placeholder {self}"
            ))
        })
    }

    /// Run the resolution closure. Resolving twice is an internal fault.
    pub fn resolve(&self) -> Result<Symbol> {
        let resolve = self.0.resolve.borrow_mut().take().ok_or_else(|| {
            CompileError::internal(format!("attempted to resolve placeholder {self} twice"))
        })?;
        let result = resolve(self)?;
        *self.0.result.borrow_mut() = Some(result.clone());
        Ok(result)
    }

    /// Whether two handles point to the same placeholder.
    pub fn ptr_eq(&self, other: &Placeholder) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl PartialEq for Placeholder {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Placeholder {}

impl Hash for Placeholder {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "'{name}'"),
            None => write!(f, "<anonymous@{:x}>", self.addr()),
        }
    }
}

impl fmt::Debug for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Placeholder")
            .field("name", &self.0.name)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::ConstantSymbol;

    #[test]
    fn resolves_once() {
        let p = Placeholder::anonymous(|_| Ok(ConstantSymbol::new("42").into()));
        assert!(!p.is_resolved());

        let first = p.resolve().unwrap();
        assert_eq!(first.nasm().unwrap(), "42");
        assert!(p.is_resolved());

        let second = p.resolve();
        assert!(second.unwrap_err().is_internal());
    }

    #[test]
    fn result_before_resolution_is_internal_fault() {
        let p = Placeholder::anonymous(|_| Ok(ConstantSymbol::new("1").into()));
        assert!(p.result().is_none());
        assert!(p.expect_result().unwrap_err().is_internal());
    }

    #[test]
    fn failed_resolution_propagates() {
        let p = Placeholder::anonymous(|_| Err(CompileError::language("nope")));
        assert_eq!(p.resolve().unwrap_err(), CompileError::language("nope"));
        assert!(!p.is_resolved());
    }

    #[test]
    fn identity_equality() {
        let a = Placeholder::anonymous(|_| Ok(ConstantSymbol::new("1").into()));
        let b = Placeholder::anonymous(|_| Ok(ConstantSymbol::new("1").into()));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
