//! Scope tree - hierarchical storage for all symbols.
//!
//! Uses `petgraph::DiGraph` with:
//! - Nodes: [`ScopeData`] (members, anonymous children, frame bookkeeping)
//! - Edges: `Contains(name)` for global sub-scopes, `Local(name)` for
//!   function frames, `Anonymous(index)` for anonymous children
//!
//! Template instance scopes are detached nodes: they have no parent and are
//! only reachable through the instance that owns them.

use std::fmt;
use std::rc::Rc;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use rustc_hash::FxHashMap;

use oasm_core::{CompileError, Result};

use crate::stack::{Stack, StackRef};
use crate::symbol::{Symbol, StackSymbol, TypeSymbol};
use crate::value_type::ValueType;

/// Handle to a scope in a [`ScopeTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(NodeIndex);

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0.index())
    }
}

/// Flavor of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Holds members, sub-scopes and function frames.
    Global,
    /// One function activation; holds stack variables.
    Local,
}

/// Edge types in the scope graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeEdge {
    /// Parent global scope contains a named global sub-scope.
    Contains(String),
    /// Parent global scope owns the frame of a function.
    Local(String),
    /// The n-th anonymous child.
    Anonymous(usize),
}

/// Data stored in each scope node.
#[derive(Debug)]
pub struct ScopeData {
    kind: ScopeKind,
    name: Option<String>,
    anonymous: bool,

    /// Members by name.
    symbols: FxHashMap<String, Symbol>,

    /// Type this global scope holds the members of.
    associated_type: Option<Rc<TypeSymbol>>,

    /// Frame shared by a local scope and its anonymous children.
    stack: Option<StackRef>,
    /// Bytes of stack variables declared directly in this local scope.
    variable_bytes: u32,

    /// Anonymous children in creation order.
    children: Vec<ScopeId>,
    cursor: usize,
    can_grow: bool,

    /// Values remembered across actions of one block.
    persistent: FxHashMap<String, String>,
}

impl ScopeData {
    fn new(kind: ScopeKind, name: Option<String>, anonymous: bool) -> Self {
        Self {
            kind,
            name,
            anonymous,
            symbols: FxHashMap::default(),
            associated_type: None,
            stack: None,
            variable_bytes: 0,
            children: Vec::new(),
            cursor: 0,
            can_grow: true,
            persistent: FxHashMap::default(),
        }
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }

    pub fn is_local(&self) -> bool {
        self.kind == ScopeKind::Local
    }

    pub fn symbol(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    pub fn associated_type(&self) -> Option<&Rc<TypeSymbol>> {
        self.associated_type.as_ref()
    }

    pub fn stack(&self) -> Option<&StackRef> {
        self.stack.as_ref()
    }

    pub fn variable_bytes(&self) -> u32 {
        self.variable_bytes
    }

    pub fn persistent(&self) -> &FxHashMap<String, String> {
        &self.persistent
    }

    pub fn persistent_mut(&mut self) -> &mut FxHashMap<String, String> {
        &mut self.persistent
    }
}

/// The scope graph.
pub struct ScopeTree {
    graph: DiGraph<ScopeData, ScopeEdge>,
    root: ScopeId,
}

impl Default for ScopeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeTree {
    /// Create a tree with an empty unnamed root scope.
    pub fn new() -> Self {
        let mut graph = DiGraph::new();
        let root = ScopeId(graph.add_node(ScopeData::new(ScopeKind::Global, None, false)));
        Self { graph, root }
    }

    pub fn root(&self) -> ScopeId {
        self.root
    }

    /// Number of scopes in the tree.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn scope(&self, id: ScopeId) -> &ScopeData {
        &self.graph[id.0]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut ScopeData {
        &mut self.graph[id.0]
    }

    pub fn is_local(&self, id: ScopeId) -> bool {
        self.scope(id).is_local()
    }

    /// The scope this one hangs off, if it isn't the root or detached.
    pub fn parent(&self, id: ScopeId) -> Option<ScopeId> {
        self.graph
            .edges_directed(id.0, Direction::Incoming)
            .next()
            .map(|edge| ScopeId(edge.source()))
    }

    /// Dotted name of a scope for messages, with anonymous levels skipped.
    pub fn absolute_name(&self, id: ScopeId) -> String {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(scope) = current {
            if let Some(name) = self.scope(scope).name() {
                names.push(name.to_string());
            }
            current = self.parent(scope);
        }
        if names.is_empty() {
            return "the root scope".to_string();
        }
        names.reverse();
        names.join(".")
    }

    fn child(&self, parent: ScopeId, matches: impl Fn(&ScopeEdge) -> bool) -> Option<ScopeId> {
        self.graph
            .edges(parent.0)
            .find(|edge| matches(edge.weight()))
            .map(|edge| ScopeId(edge.target()))
    }

    // ========================================================================
    // Global scopes
    // ========================================================================

    /// Find a global sub-scope by name.
    pub fn sub_scope(&self, parent: ScopeId, name: &str) -> Option<ScopeId> {
        self.child(parent, |edge| matches!(edge, ScopeEdge::Contains(n) if n == name))
    }

    /// Find a nested global sub-scope.
    pub fn sub_scope_path<S: AsRef<str>>(&self, parent: ScopeId, path: &[S]) -> Option<ScopeId> {
        let mut current = parent;
        for segment in path {
            current = self.sub_scope(current, segment.as_ref())?;
        }
        Some(current)
    }

    /// Create a named global sub-scope. Fails if one with that name exists.
    pub fn add_global(
        &mut self,
        parent: ScopeId,
        name: &str,
        associated_type: Option<Rc<TypeSymbol>>,
    ) -> Result<ScopeId> {
        if self.sub_scope(parent, name).is_some() {
            return Err(CompileError::DuplicateSymbol {
                name: name.to_string(),
                scope: self.absolute_name(parent),
            });
        }
        let mut data = ScopeData::new(ScopeKind::Global, Some(name.to_string()), false);
        data.associated_type = associated_type;
        let child = ScopeId(self.graph.add_node(data));
        self.graph
            .add_edge(parent.0, child.0, ScopeEdge::Contains(name.to_string()));
        Ok(child)
    }

    /// Find or create a named global sub-scope.
    pub fn get_or_add_global(&mut self, parent: ScopeId, name: &str) -> Result<ScopeId> {
        match self.sub_scope(parent, name) {
            Some(existing) => Ok(existing),
            None => self.add_global(parent, name, None),
        }
    }

    /// Create an anonymous global scope with no parent.
    pub fn add_detached(&mut self, associated_type: Option<Rc<TypeSymbol>>) -> ScopeId {
        let mut data = ScopeData::new(ScopeKind::Global, None, true);
        data.associated_type = associated_type;
        ScopeId(self.graph.add_node(data))
    }

    // ========================================================================
    // Local scopes
    // ========================================================================

    /// Find the frame of a function declared in `parent`.
    pub fn local_scope(&self, parent: ScopeId, name: &str) -> Option<ScopeId> {
        self.child(parent, |edge| matches!(edge, ScopeEdge::Local(n) if n == name))
    }

    /// Create the frame of a function. Fails if it already exists.
    pub fn add_local(&mut self, parent: ScopeId, name: &str) -> Result<ScopeId> {
        if self.is_local(parent) {
            return Err(CompileError::internal(format!(
                "attempted to nest local scope '{name}' inside a local scope"
            )));
        }
        if self.local_scope(parent, name).is_some() {
            return Err(CompileError::DuplicateSymbol {
                name: name.to_string(),
                scope: self.absolute_name(parent),
            });
        }
        let mut data = ScopeData::new(ScopeKind::Local, Some(name.to_string()), false);
        data.stack = Some(Stack::shared());
        let child = ScopeId(self.graph.add_node(data));
        self.graph
            .add_edge(parent.0, child.0, ScopeEdge::Local(name.to_string()));
        Ok(child)
    }

    // ========================================================================
    // Anonymous scopes
    // ========================================================================

    /// Enter the next anonymous child, creating it at the end of the list.
    pub fn next_anonymous(&mut self, id: ScopeId) -> Result<ScopeId> {
        let (cursor, len, can_grow, kind, stack) = {
            let data = self.scope(id);
            (
                data.cursor,
                data.children.len(),
                data.can_grow,
                data.kind,
                data.stack.clone(),
            )
        };

        if cursor >= len {
            if !can_grow {
                return Err(CompileError::internal(format!(
                    "attempted to create a new anonymous scope in {} after it was reset",
                    self.absolute_name(id)
                )));
            }
            let mut data = ScopeData::new(kind, None, true);
            data.stack = stack;
            let child = ScopeId(self.graph.add_node(data));
            self.graph.add_edge(id.0, child.0, ScopeEdge::Anonymous(len));
            self.scope_mut(id).children.push(child);
        }

        let data = self.scope_mut(id);
        let child = data.children[data.cursor];
        data.cursor += 1;
        Ok(child)
    }

    /// Rewind the anonymous children. Only possible at the end of the list.
    pub fn reset_anonymous(&mut self, id: ScopeId) -> Result<()> {
        let name = self.absolute_name(id);
        let data = self.scope_mut(id);
        if data.cursor != data.children.len() {
            return Err(CompileError::internal(format!(
                "attempted to reset the anonymous scopes of {name} at {} of {}",
                data.cursor,
                data.children.len()
            )));
        }
        data.cursor = 0;
        data.can_grow = false;
        Ok(())
    }

    // ========================================================================
    // Members
    // ========================================================================

    /// Declare a member. Fails if the name is taken in this scope.
    pub fn declare(&mut self, id: ScopeId, name: &str, symbol: Symbol) -> Result<()> {
        if self.scope(id).symbols.contains_key(name) {
            return Err(CompileError::DuplicateSymbol {
                name: name.to_string(),
                scope: self.absolute_name(id),
            });
        }
        self.scope_mut(id).symbols.insert(name.to_string(), symbol);
        Ok(())
    }

    /// Look up a member of this scope only.
    pub fn get(&self, id: ScopeId, name: &str) -> Option<Symbol> {
        self.scope(id).symbols.get(name).cloned()
    }

    /// Replace a placeholder member with its resolved symbol.
    pub fn replace_placeholder(&mut self, id: ScopeId, name: &str, symbol: Symbol) -> Result<()> {
        match self.scope(id).symbols.get(name) {
            None => Err(CompileError::internal(format!(
                "attempted to replace non-existent placeholder '{name}' in {}",
                self.absolute_name(id)
            ))),
            Some(Symbol::Placeholder(_)) => {
                self.scope_mut(id).symbols.insert(name.to_string(), symbol);
                Ok(())
            }
            Some(other) => Err(CompileError::internal(format!(
                "attempted to replace {} '{name}' in {} as if it were a placeholder",
                other.kind_name(),
                self.absolute_name(id)
            ))),
        }
    }

    // ========================================================================
    // Stack variables
    // ========================================================================

    fn frame(&self, id: ScopeId) -> Result<StackRef> {
        self.scope(id).stack.clone().ok_or_else(|| {
            CompileError::language(format!(
                "{} is not a local scope and has no stack frame",
                self.absolute_name(id)
            ))
        })
    }

    /// Push a new variable onto the frame.
    pub fn declare_variable(&mut self, id: ScopeId, name: &str, value_type: ValueType) -> Result<()> {
        let stack = self.frame(id)?;
        let bytes = value_type.byte_size();
        let offset = stack.borrow().pointer() - i64::from(bytes);
        self.declare(
            id,
            name,
            StackSymbol::new(stack.clone(), offset, value_type).into(),
        )?;
        stack.borrow_mut().set_pointer(offset)?;
        self.scope_mut(id).variable_bytes += bytes;
        Ok(())
    }

    /// Name a value already on the frame, `offset` bytes from the current pointer.
    pub fn declare_existing_variable(
        &mut self,
        id: ScopeId,
        name: &str,
        value_type: ValueType,
        offset: i64,
    ) -> Result<()> {
        let stack = self.frame(id)?;
        let pointer = stack.borrow().pointer();
        self.declare(
            id,
            name,
            StackSymbol::new(stack, pointer + offset, value_type).into(),
        )
    }

    /// Reserve unnamed bytes on the frame.
    pub fn allocate_dummy(&mut self, id: ScopeId, size: u32) -> Result<()> {
        if size == 0 {
            return Err(CompileError::internal(
                "attempted to allocate a non-positive amount of stack space",
            ));
        }
        let stack = self.frame(id)?;
        stack.borrow_mut().move_pointer(-i64::from(size))?;
        self.scope_mut(id).variable_bytes += size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::ConstantSymbol;
    use oasm_core::SizeSpecifier;

    #[test]
    fn nested_globals_and_names() {
        let mut tree = ScopeTree::new();
        let root = tree.root();
        let kernel = tree.add_global(root, "Kernel32", None).unwrap();
        let inner = tree.get_or_add_global(kernel, "Inner").unwrap();

        assert_eq!(tree.sub_scope_path(root, &["Kernel32", "Inner"]), Some(inner));
        assert_eq!(tree.absolute_name(inner), "Kernel32.Inner");
        assert_eq!(tree.absolute_name(root), "the root scope");
        assert_eq!(tree.get_or_add_global(kernel, "Inner").unwrap(), inner);
    }

    #[test]
    fn duplicate_sub_scope() {
        let mut tree = ScopeTree::new();
        let root = tree.root();
        tree.add_global(root, "A", None).unwrap();
        let err = tree.add_global(root, "A", None).unwrap_err();
        assert!(matches!(err, CompileError::DuplicateSymbol { .. }));
    }

    #[test]
    fn duplicate_member() {
        let mut tree = ScopeTree::new();
        let root = tree.root();
        tree.declare(root, "x", Symbol::from("1")).unwrap();
        let err = tree.declare(root, "x", Symbol::from("2")).unwrap_err();
        assert_eq!(
            err,
            CompileError::DuplicateSymbol {
                name: "x".into(),
                scope: "the root scope".into()
            }
        );
    }

    #[test]
    fn anonymous_replay() {
        let mut tree = ScopeTree::new();
        let root = tree.root();

        let first = tree.next_anonymous(root).unwrap();
        let second = tree.next_anonymous(root).unwrap();
        assert_ne!(first, second);
        tree.reset_anonymous(root).unwrap();

        assert_eq!(tree.next_anonymous(root).unwrap(), first);
        assert_eq!(tree.next_anonymous(root).unwrap(), second);
        assert!(tree.next_anonymous(root).unwrap_err().is_internal());
    }

    #[test]
    fn reset_mid_list_is_internal_fault() {
        let mut tree = ScopeTree::new();
        let root = tree.root();
        tree.next_anonymous(root).unwrap();
        tree.next_anonymous(root).unwrap();
        tree.reset_anonymous(root).unwrap();
        tree.next_anonymous(root).unwrap();
        assert!(tree.reset_anonymous(root).unwrap_err().is_internal());
    }

    #[test]
    fn anonymous_local_shares_frame() {
        let mut tree = ScopeTree::new();
        let root = tree.root();
        let main = tree.add_local(root, "main").unwrap();
        let block = tree.next_anonymous(main).unwrap();

        assert!(tree.is_local(block));
        let a = tree.scope(main).stack().unwrap().clone();
        let b = tree.scope(block).stack().unwrap().clone();
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn variables_move_the_pointer() {
        let mut tree = ScopeTree::new();
        let root = tree.root();
        let main = tree.add_local(root, "main").unwrap();

        tree.declare_variable(main, "a", ValueType::sized(SizeSpecifier::Qword))
            .unwrap();
        tree.declare_variable(main, "b", ValueType::sized(SizeSpecifier::Dword))
            .unwrap();
        tree.allocate_dummy(main, 4).unwrap();

        let data = tree.scope(main);
        assert_eq!(data.variable_bytes(), 16);
        assert_eq!(data.stack().unwrap().borrow().pointer(), -16);

        match tree.get(main, "b") {
            Some(Symbol::Stack(var)) => assert_eq!(var.offset(), -12),
            other => panic!("expected stack symbol, got {other:?}"),
        }
    }

    #[test]
    fn globals_have_no_frame() {
        let mut tree = ScopeTree::new();
        let root = tree.root();
        assert!(
            tree.declare_variable(root, "a", ValueType::sized(SizeSpecifier::Qword))
                .is_err()
        );
    }

    #[test]
    fn replace_placeholder_checks_entry() {
        let mut tree = ScopeTree::new();
        let root = tree.root();
        tree.declare(root, "c", ConstantSymbol::new("1").into()).unwrap();

        assert!(tree.replace_placeholder(root, "missing", Symbol::from("x")).unwrap_err().is_internal());
        assert!(tree.replace_placeholder(root, "c", Symbol::from("x")).unwrap_err().is_internal());
    }

    #[test]
    fn detached_scopes_have_no_parent() {
        let mut tree = ScopeTree::new();
        let detached = tree.add_detached(None);
        assert_eq!(tree.parent(detached), None);
        assert!(tree.scope(detached).is_anonymous());
    }
}
