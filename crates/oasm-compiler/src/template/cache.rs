//! Template instance cache.
//!
//! Keeps the instances of one template in creation order, indexed by their
//! exact argument tuple.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::symbol::Symbol;

use super::TemplateInstance;

/// Instances of a template, memoized by argument tuple.
#[derive(Default)]
pub struct TemplateInstanceCache {
    index: FxHashMap<Vec<Symbol>, usize>,
    instances: Vec<Rc<TemplateInstance>>,
}

impl TemplateInstanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The instance created for exactly these arguments.
    pub fn get(&self, arguments: &[Symbol]) -> Option<Rc<TemplateInstance>> {
        self.index
            .get(arguments)
            .map(|&slot| self.instances[slot].clone())
    }

    pub fn contains(&self, arguments: &[Symbol]) -> bool {
        self.index.contains_key(arguments)
    }

    /// Register an instance. An existing entry for the same arguments is kept.
    pub fn insert(&mut self, arguments: Vec<Symbol>, instance: Rc<TemplateInstance>) {
        if self.index.contains_key(&arguments) {
            return;
        }
        self.index.insert(arguments, self.instances.len());
        self.instances.push(instance);
    }

    /// Instances in creation order.
    pub fn instances(&self) -> &[Rc<TemplateInstance>] {
        &self.instances
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Program;
    use crate::compiler::{Compiler, DEFAULT_SECTIONS};

    fn instance(arguments: Vec<Symbol>) -> Rc<TemplateInstance> {
        let state = Compiler::new(&DEFAULT_SECTIONS).state().unwrap();
        let (engine, scope) = state.instantiate();
        Rc::new(TemplateInstance::new(
            "List",
            arguments,
            scope,
            engine,
            Program::default(),
        ))
    }

    #[test]
    fn new_is_empty() {
        let cache = TemplateInstanceCache::new();
        assert!(cache.is_empty());
        assert!(cache.get(&[Symbol::from("8")]).is_none());
    }

    #[test]
    fn lookup_by_exact_tuple() {
        let mut cache = TemplateInstanceCache::new();
        let args = vec![Symbol::from("8"), Symbol::from("4")];
        cache.insert(args.clone(), instance(args.clone()));

        assert!(cache.contains(&args));
        assert!(!cache.contains(&[Symbol::from("4"), Symbol::from("8")]));
        assert!(!cache.contains(&[Symbol::from("8")]));
        assert_eq!(cache.get(&args).unwrap().arguments(), args.as_slice());
    }

    #[test]
    fn first_insert_wins() {
        let mut cache = TemplateInstanceCache::new();
        let args = vec![Symbol::from("1")];
        let first = instance(args.clone());
        cache.insert(args.clone(), first.clone());
        cache.insert(args.clone(), instance(args.clone()));

        assert_eq!(cache.len(), 1);
        assert!(Rc::ptr_eq(&cache.get(&args).unwrap(), &first));
    }

    #[test]
    fn keeps_creation_order() {
        let mut cache = TemplateInstanceCache::new();
        for n in ["3", "1", "2"] {
            let args = vec![Symbol::from(n)];
            cache.insert(args.clone(), instance(args));
        }
        let order: Vec<String> = cache
            .instances()
            .iter()
            .map(|i| i.arguments()[0].to_string())
            .collect();
        assert_eq!(order, vec!["3", "1", "2"]);
    }
}
