//! The multi-pass compilation engine.
//!
//! [`Compiler`] runs a [`Program`] three times, once per
//! [`CompilationStep`], and exposes the operations actions use to declare
//! symbols, walk scopes, resolve names and emit text.
//!
//! ## Shared and private state
//!
//! Template instances run on engines built from a [`CompilerState`]
//! snapshot. They share the scope tree, the per-file `using` tables, the
//! dependency epoch, the uid counter and the section sinks with the engine
//! they were instantiated from. Scope stack, file stack, pass, position and
//! section buffers are private to each engine.
//!
//! ## Dependency epochs
//!
//! An engine that starts its declare pass while no epoch is open opens one
//! and becomes its owner. Every placeholder declared while the epoch is open
//! lands in it, including those of template instances. The owner sorts and
//! resolves the epoch at the end of its resolve-dependencies pass.

use std::cell::{Cell, Ref, RefCell};
use std::rc::Rc;

use rustc_hash::FxHashMap;

use oasm_core::{
    CompilationStep, CompileError, CompilerSettings, Result, SourceLocation, Span,
};

use crate::action::Program;
use crate::identifier::{Identifier, display_path};
use crate::line::SymbolString;
use crate::operand::Register;
use crate::resolver::DependencyGraph;
use crate::scope::{ScopeId, ScopeTree};
use crate::section::{CompilerEvent, Section, SectionSink};
use crate::stack::StackRef;
use crate::state::CompilerState;
use crate::symbol::{
    ConstantSymbol, FunctionMetadata, FunctionSymbol, Placeholder, RegisterSymbol, Symbol,
    TypeSymbol,
};
use crate::template::Template;
use crate::value_type::{TypeRef, ValueType};

/// Section holding code.
pub const PROGRAM_SECTION: &str = "program";
/// Section holding initialised data.
pub const DATA_SECTION: &str = "data";
/// Section holding uninitialised data.
pub const UNINITIALISED_SECTION: &str = "uninitialised";

/// The sections every program writes to.
pub const DEFAULT_SECTIONS: [&str; 3] = [PROGRAM_SECTION, DATA_SECTION, UNINITIALISED_SECTION];

/// Open dependency epoch shared between an engine and its template instances.
pub(crate) type SharedEpoch = Rc<RefCell<Option<DependencyGraph<Placeholder>>>>;

/// Per-file imported scopes, shared between engines.
pub(crate) type SharedUsings = Rc<RefCell<FxHashMap<String, Vec<ScopeId>>>>;

/// The compilation engine.
pub struct Compiler {
    // shared with template instances
    pub(crate) tree: Rc<RefCell<ScopeTree>>,
    pub(crate) usings: SharedUsings,
    pub(crate) epoch: SharedEpoch,
    pub(crate) uid: Rc<Cell<u64>>,
    pub(crate) settings: Rc<CompilerSettings>,

    // private
    pub(crate) sections: Vec<(String, Section)>,
    pub(crate) scopes: Vec<ScopeId>,
    pub(crate) files: Vec<String>,
    owns_epoch: bool,
    running: Option<CompilationStep>,
    completed: Option<CompilationStep>,
    position: Span,
}

impl Compiler {
    /// An engine writing to fresh sinks named `sections`.
    pub fn new(sections: &[&str]) -> Self {
        Self::with_settings(sections, CompilerSettings::default())
    }

    /// An engine writing to fresh sinks, with custom settings.
    pub fn with_settings(sections: &[&str], settings: CompilerSettings) -> Self {
        let sinks = sections
            .iter()
            .map(|name| (name.to_string(), SectionSink::new()))
            .collect();
        Self::with_sinks(sinks, settings)
    }

    /// An engine writing to the given sinks.
    pub fn with_sinks(sinks: Vec<(String, SectionSink)>, settings: CompilerSettings) -> Self {
        let tree = ScopeTree::new();
        let root = tree.root();
        Self {
            tree: Rc::new(RefCell::new(tree)),
            usings: Rc::default(),
            epoch: Rc::default(),
            uid: Rc::new(Cell::new(0)),
            settings: Rc::new(settings),
            sections: sinks
                .into_iter()
                .map(|(name, sink)| (name, Section::new(sink)))
                .collect(),
            scopes: vec![root],
            files: Vec::new(),
            owns_epoch: false,
            running: None,
            completed: None,
            position: Span::default(),
        }
    }

    /// An engine continuing from a snapshot. Sections share the snapshot's sinks.
    pub(crate) fn from_state(state: &CompilerState) -> Self {
        Self {
            tree: state.tree.clone(),
            usings: state.usings.clone(),
            epoch: state.epoch.clone(),
            uid: state.uid.clone(),
            settings: state.settings.clone(),
            sections: state
                .sinks
                .iter()
                .map(|(name, sink)| (name.clone(), Section::new(sink.clone())))
                .collect(),
            scopes: state.scopes.clone(),
            files: state.files.clone(),
            owns_epoch: false,
            running: None,
            completed: None,
            position: Span::default(),
        }
    }

    pub fn settings(&self) -> &CompilerSettings {
        &self.settings
    }

    /// Read access to the scope tree.
    pub fn scope_tree(&self) -> Ref<'_, ScopeTree> {
        self.tree.borrow()
    }

    /// Text flushed into a section's sink so far.
    pub fn section_output(&self, name: &str) -> Option<String> {
        self.sections
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, section)| section.sink().contents())
    }

    // ========================================================================
    // Pass driver
    // ========================================================================

    /// The pass currently running, or the next one to run.
    pub fn current_pass(&self) -> CompilationStep {
        self.running
            .or_else(|| match self.completed {
                None => Some(CompilationStep::Declare),
                Some(done) => done.next(),
            })
            .unwrap_or(CompilationStep::Generate)
    }

    /// Whether `pass` already ran to completion on this engine.
    pub fn has_completed(&self, pass: CompilationStep) -> bool {
        self.completed.is_some_and(|done| done >= pass)
    }

    /// Run `program` from the next pending pass up to and including `up_to`.
    ///
    /// Errors get the current location attached. The scope and file stacks
    /// must be back at their starting depth when this returns.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn compile(&mut self, program: &Program, up_to: CompilationStep) -> Result<()> {
        let scope_depth = self.scopes.len();
        let file_depth = self.files.len();

        if let Err(err) = self.run_passes(program, up_to, scope_depth) {
            self.running = None;
            return Err(err.located(self.location()));
        }

        if self.files.len() != file_depth {
            return Err(CompileError::internal(format!(
                "compilation ended with {} open file(s), expected {file_depth}",
                self.files.len()
            )));
        }
        if self.scopes.len() != scope_depth {
            return Err(CompileError::internal(format!(
                "compilation ended with {} open scope(s), expected {scope_depth}",
                self.scopes.len()
            )));
        }
        Ok(())
    }

    fn run_passes(
        &mut self,
        program: &Program,
        up_to: CompilationStep,
        scope_depth: usize,
    ) -> Result<()> {
        loop {
            let pass = match self.completed {
                None => CompilationStep::Declare,
                Some(done) if done < up_to => match done.next() {
                    Some(next) => next,
                    None => break,
                },
                Some(_) => break,
            };
            if pass > up_to {
                break;
            }

            log::debug!("running compilation step {pass} over {} action(s)", program.len());
            self.running = Some(pass);

            if pass == CompilationStep::Declare {
                let mut epoch = self.epoch.borrow_mut();
                if epoch.is_none() {
                    *epoch = Some(DependencyGraph::new());
                    self.owns_epoch = true;
                }
            }

            program.run(self, pass)?;

            if self.scopes.len() != scope_depth {
                return Err(CompileError::internal(format!(
                    "pass {pass} ended with {} open scope(s), expected {scope_depth}",
                    self.scopes.len()
                )));
            }

            if pass == CompilationStep::ResolveDependencies && self.owns_epoch {
                self.resolve_placeholders()?;
                self.owns_epoch = false;
            }

            if pass == CompilationStep::Generate {
                for (_, section) in &mut self.sections {
                    section.close()?;
                }
            }

            let current = self.current();
            self.tree.borrow_mut().reset_anonymous(current)?;

            self.running = None;
            self.completed = Some(pass);
        }
        Ok(())
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    fn resolve_placeholders(&mut self) -> Result<()> {
        let mut graph = self.epoch.borrow_mut().take().ok_or_else(|| {
            CompileError::internal("attempted to resolve placeholders without an open epoch")
        })?;
        log::debug!(
            "resolving {} placeholder(s) with {} dependency edge(s)",
            graph.node_count(),
            graph.edge_count()
        );

        for placeholder in graph.sort()? {
            let placeholder = placeholder?;
            let symbol = placeholder.resolve()?;
            log::trace!("resolved placeholder {placeholder} to {symbol}");
            if let (Some(owner), Some(name)) = (placeholder.owner(), placeholder.name()) {
                self.tree
                    .borrow_mut()
                    .replace_placeholder(owner, name, symbol)?;
            }
        }
        Ok(())
    }

    fn require_pass(&self, pass: CompilationStep, operation: &str) -> Result<()> {
        let current = self.current_pass();
        if current != pass {
            return Err(CompileError::pass_ordering(operation, current));
        }
        Ok(())
    }

    fn forbid_pass(&self, pass: CompilationStep, operation: &str) -> Result<()> {
        let current = self.current_pass();
        if current == pass {
            return Err(CompileError::pass_ordering(operation, current));
        }
        Ok(())
    }

    // ========================================================================
    // Position and files
    // ========================================================================

    /// Record the source position subsequent errors are attributed to.
    pub fn declare_position(&mut self, line: u32, column: u32) {
        self.position = Span::new(line, column);
    }

    /// File and position currently being compiled.
    pub fn location(&self) -> SourceLocation {
        SourceLocation::new(self.files.last().cloned(), self.position)
    }

    pub fn current_file(&self) -> Option<&str> {
        self.files.last().map(String::as_str)
    }

    /// Enter a file. File names must be unique.
    pub fn enter_file(&mut self, file: &str) -> Result<()> {
        let mut usings = self.usings.borrow_mut();
        if self.current_pass() == CompilationStep::Declare {
            if usings.contains_key(file) {
                return Err(CompileError::internal(format!(
                    "attempted to enter file '{file}' twice during pass {}",
                    CompilationStep::Declare
                )));
            }
            usings.insert(file.to_string(), Vec::new());
        } else if !usings.contains_key(file) {
            return Err(CompileError::internal(format!(
                "attempted to enter file '{file}' which was not entered during pass {}",
                CompilationStep::Declare
            )));
        }
        drop(usings);
        self.files.push(file.to_string());
        Ok(())
    }

    pub fn exit_file(&mut self) -> Result<()> {
        self.files
            .pop()
            .map(|_| ())
            .ok_or_else(|| CompileError::internal("attempted to exit a file while not in one"))
    }

    /// Import a global scope into the current file.
    pub fn using_scope(&mut self, path: &[Identifier]) -> Result<()> {
        self.forbid_pass(CompilationStep::Declare, "import a scope")?;
        let file = self.files.last().cloned().ok_or_else(|| {
            CompileError::internal("attempted to import a scope while not in a file")
        })?;

        let names: Vec<&str> = path.iter().map(Identifier::name).collect();
        let scope = {
            let tree = self.tree.borrow();
            tree.sub_scope_path(tree.root(), &names)
        }
        .ok_or_else(|| CompileError::undefined(display_path(path)))?;

        let mut usings = self.usings.borrow_mut();
        let imported = usings.entry(file).or_default();
        if !imported.contains(&scope) {
            imported.push(scope);
        }
        Ok(())
    }

    // ========================================================================
    // Scopes
    // ========================================================================

    /// The innermost scope.
    pub fn current(&self) -> ScopeId {
        match self.scopes.last() {
            Some(scope) => *scope,
            None => self.tree.borrow().root(),
        }
    }

    pub fn is_local(&self) -> bool {
        self.tree.borrow().is_local(self.current())
    }

    pub fn is_anonymous(&self) -> bool {
        self.tree.borrow().scope(self.current()).is_anonymous()
    }

    /// Enter a global scope, creating every missing scope along `path`.
    pub fn enter_global(&mut self, path: &[Identifier]) -> Result<()> {
        if self.is_local() {
            return Err(CompileError::language(
                "cannot enter a global scope while in a local scope",
            ));
        }
        let mut scope = self.current();
        {
            let mut tree = self.tree.borrow_mut();
            for segment in path {
                if segment.is_templated() {
                    return Err(CompileError::language(format!(
                        "global scope '{segment}' can't carry template arguments"
                    )));
                }
                scope = tree.get_or_add_global(scope, segment.name())?;
            }
        }
        self.scopes.push(scope);
        Ok(())
    }

    pub fn exit_global(&mut self) -> Result<()> {
        if self.is_local() || self.scopes.len() <= 1 {
            return Err(CompileError::internal(
                "attempted to exit a global scope while not in one",
            ));
        }
        let current = self.current();
        self.tree.borrow_mut().reset_anonymous(current)?;
        self.scopes.pop();
        Ok(())
    }

    /// Names of the scopes enclosing the current one, outermost first.
    ///
    /// A detached template scope continues with the scope below it on the stack.
    pub fn current_path(&self) -> Vec<String> {
        let tree = self.tree.borrow();
        let mut names = Vec::new();
        for start in self.scopes.iter().rev() {
            let mut current = Some(*start);
            let mut last = *start;
            while let Some(scope) = current {
                if let Some(name) = tree.scope(scope).name() {
                    names.push(name.to_string());
                }
                last = scope;
                current = tree.parent(scope);
            }
            if last == tree.root() {
                break;
            }
        }
        names.reverse();
        names
    }

    /// Type whose members the current global scope holds.
    pub fn current_associated_type(&self) -> Result<Option<Rc<TypeSymbol>>> {
        if self.is_local() {
            return Err(CompileError::internal(
                "attempted to obtain the associated type of a local scope",
            ));
        }
        Ok(self
            .tree
            .borrow()
            .scope(self.current())
            .associated_type()
            .cloned())
    }

    /// Enter the frame of function `name`. Created during the declare pass.
    pub fn enter_local(&mut self, name: &str) -> Result<()> {
        if self.is_local() {
            return Err(CompileError::internal(format!(
                "attempted to enter local scope '{name}' while already in local scope '{}'",
                self.current_path().join(".")
            )));
        }
        let parent = self.current();
        let existing = self.tree.borrow().local_scope(parent, name);
        let scope = match existing {
            Some(scope) => scope,
            None if self.current_pass() == CompilationStep::Declare => {
                self.tree.borrow_mut().add_local(parent, name)?
            }
            None => {
                return Err(CompileError::internal(format!(
                    "attempted to enter non-existent local scope '{name}' during pass {}",
                    self.current_pass()
                )));
            }
        };
        self.scopes.push(scope);
        Ok(())
    }

    /// Leave a function frame. The stack pointer must be back at the
    /// frame's variables.
    pub fn exit_local(&mut self) -> Result<()> {
        if !self.is_local() || self.is_anonymous() {
            return Err(CompileError::internal(
                "attempted to exit a local scope while not in one",
            ));
        }
        let current = self.current();
        {
            let mut tree = self.tree.borrow_mut();
            let data = tree.scope(current);
            if let Some(stack) = data.stack() {
                let pointer = stack.borrow().pointer();
                let expected = -i64::from(data.variable_bytes());
                if pointer != expected {
                    return Err(CompileError::stack_discipline(format!(
                        "attempted to exit local scope with the stack pointer at {pointer}, expected {expected}"
                    )));
                }
            }
            tree.reset_anonymous(current)?;
        }
        self.scopes.pop();
        Ok(())
    }

    /// Enter the next anonymous sub-scope of the current scope.
    pub fn enter_anonymous(&mut self) -> Result<()> {
        let current = self.current();
        let scope = self.tree.borrow_mut().next_anonymous(current)?;
        self.scopes.push(scope);
        Ok(())
    }

    /// Leave an anonymous scope, releasing its stack variables.
    pub fn exit_anonymous(&mut self) -> Result<()> {
        if !self.is_anonymous() || self.scopes.len() <= 1 {
            return Err(CompileError::internal(
                "attempted to exit an anonymous scope while not in one",
            ));
        }
        let current = self.current();
        {
            let mut tree = self.tree.borrow_mut();
            let data = tree.scope(current);
            let bytes = data.variable_bytes();
            if let (Some(stack), true) = (data.stack(), bytes > 0) {
                stack.borrow_mut().move_pointer(i64::from(bytes))?;
            }
            tree.reset_anonymous(current)?;
        }
        self.scopes.pop();
        Ok(())
    }

    /// Value remembered in the current scope across passes.
    pub fn persistent(&self, key: &str) -> Option<String> {
        self.tree
            .borrow()
            .scope(self.current())
            .persistent()
            .get(key)
            .cloned()
    }

    pub fn set_persistent(&mut self, key: &str, value: impl Into<String>) {
        let current = self.current();
        self.tree
            .borrow_mut()
            .scope_mut(current)
            .persistent_mut()
            .insert(key.to_string(), value.into());
    }

    // ========================================================================
    // Labels
    // ========================================================================

    /// Next value of the uid counter shared with template instances.
    pub fn uid(&self) -> u64 {
        let uid = self.uid.get();
        self.uid.set(uid + 1);
        uid
    }

    /// A unique label for `name` in the current scope.
    pub fn label(&self, name: &str) -> String {
        format!("L{}_{}_{name}", self.uid(), self.current_path().join("_"))
    }

    // ========================================================================
    // Declarations
    // ========================================================================

    fn require_global(&self, operation: &str) -> Result<()> {
        if self.is_local() {
            return Err(CompileError::language(format!(
                "attempted to {operation} in a local scope"
            )));
        }
        Ok(())
    }

    fn require_local(&self, operation: &str) -> Result<()> {
        if !self.is_local() {
            return Err(CompileError::language(format!(
                "attempted to {operation} in a global scope"
            )));
        }
        Ok(())
    }

    fn with_epoch<T>(&self, f: impl FnOnce(&mut DependencyGraph<Placeholder>) -> Result<T>) -> Result<T> {
        let mut epoch = self.epoch.borrow_mut();
        let graph = epoch.as_mut().ok_or_else(|| {
            CompileError::internal("no dependency epoch is open")
        })?;
        f(graph)
    }

    /// Declare a symbol in the current scope.
    pub fn declare_symbol(&mut self, name: &str, symbol: Symbol) -> Result<()> {
        let current = self.current();
        self.tree.borrow_mut().declare(current, name, symbol)
    }

    /// Push a new variable onto the current frame.
    pub fn declare_variable(&mut self, value_type: ValueType, name: &str) -> Result<()> {
        self.require_local("declare a local variable")?;
        let current = self.current();
        self.tree
            .borrow_mut()
            .declare_variable(current, name, value_type)
    }

    /// Reserve unnamed bytes on the current frame.
    pub fn allocate_dummy_variable(&mut self, size: u32) -> Result<()> {
        self.require_local("allocate stack space")?;
        let current = self.current();
        self.tree.borrow_mut().allocate_dummy(current, size)
    }

    /// Name a value already on the frame, `offset` bytes from the current pointer.
    pub fn declare_existing_stack_variable(
        &mut self,
        value_type: ValueType,
        name: &str,
        offset: i64,
    ) -> Result<()> {
        self.require_local("declare a local variable")?;
        let current = self.current();
        self.tree
            .borrow_mut()
            .declare_existing_variable(current, name, value_type, offset)
    }

    pub fn declare_constant(
        &mut self,
        name: &str,
        text: impl Into<String>,
        value_type: Option<ValueType>,
    ) -> Result<()> {
        let constant = match value_type {
            Some(value_type) => ConstantSymbol::typed(text, value_type),
            None => ConstantSymbol::new(text),
        };
        self.declare_symbol(name, constant.into())
    }

    /// Declare a function and create its frame.
    pub fn declare_function(
        &mut self,
        name: &str,
        label: impl Into<String>,
        metadata: FunctionMetadata,
    ) -> Result<()> {
        self.require_global("declare a function")?;
        let current = self.current();
        let mut tree = self.tree.borrow_mut();
        tree.declare(
            current,
            name,
            FunctionSymbol::with_metadata(label, metadata).into(),
        )?;
        tree.add_local(current, name)?;
        Ok(())
    }

    /// Declare a placeholder in the current global scope.
    pub fn declare_placeholder(
        &mut self,
        name: &str,
        resolve: impl FnOnce(&Placeholder) -> Result<Symbol> + 'static,
    ) -> Result<Placeholder> {
        self.check_placeholder_site()?;
        let placeholder = Placeholder::named(name, self.current(), resolve);
        self.register_placeholder(name, placeholder.clone(), false)?;
        Ok(placeholder)
    }

    /// Declare a function whose parameter types are not known yet, and create its frame.
    pub fn declare_function_placeholder(
        &mut self,
        name: &str,
        parameters: Vec<(Rc<TypeRef>, String)>,
        resolve: impl FnOnce(&Placeholder) -> Result<Symbol> + 'static,
    ) -> Result<Placeholder> {
        self.check_placeholder_site()?;
        let placeholder = Placeholder::function(name, self.current(), parameters, resolve);
        self.register_placeholder(name, placeholder.clone(), true)?;
        Ok(placeholder)
    }

    fn check_placeholder_site(&self) -> Result<()> {
        if self.is_local() {
            return Err(CompileError::internal(
                "attempted to declare a placeholder in a local scope",
            ));
        }
        self.require_pass(CompilationStep::Declare, "declare a placeholder")
    }

    fn register_placeholder(&mut self, name: &str, placeholder: Placeholder, frame: bool) -> Result<()> {
        let current = self.current();
        {
            let mut tree = self.tree.borrow_mut();
            tree.declare(current, name, placeholder.clone().into())?;
            if frame {
                tree.add_local(current, name)?;
            }
        }
        self.with_epoch(|graph| graph.add_node(placeholder))
    }

    /// Register a placeholder that isn't bound to a name.
    pub fn add_anonymous_placeholder(&mut self, placeholder: &Placeholder) -> Result<()> {
        self.require_pass(CompilationStep::Declare, "declare a placeholder")?;
        self.with_epoch(|graph| graph.add_node(placeholder.clone()))
    }

    /// Make `dependent` resolve after `dependency`.
    pub fn declare_dependency(&mut self, dependency: &Placeholder, dependent: &Placeholder) -> Result<()> {
        self.require_pass(
            CompilationStep::ResolveDependencies,
            "declare a symbol dependency",
        )?;
        self.with_epoch(|graph| graph.add_edge(dependency.clone(), dependent.clone()))
    }

    /// Declare a type and create the scope holding its members.
    pub fn declare_type(&mut self, name: &str, type_symbol: Rc<TypeSymbol>) -> Result<ScopeId> {
        self.require_pass(CompilationStep::Declare, "declare a type")?;
        self.require_global("declare a type")?;
        let current = self.current();
        let mut tree = self.tree.borrow_mut();
        let members = tree.add_global(current, name, Some(type_symbol.clone()))?;
        tree.declare(current, name, type_symbol.clone().into())?;
        type_symbol.set_member_scope(members);
        Ok(members)
    }

    pub fn declare_template(&mut self, name: &str, template: Rc<Template>) -> Result<()> {
        self.require_pass(CompilationStep::Declare, "declare a template")?;
        self.require_global("declare a template")?;
        self.declare_symbol(name, template.into())
    }

    /// Point alias `name` at `register`, declaring the alias if needed.
    pub fn set_register_alias(&mut self, name: &str, register: &str) -> Result<Register> {
        self.require_local("set a register alias")?;
        self.require_pass(CompilationStep::Generate, "set a register alias")?;

        let register = Register::parse(register)?;
        let current = self.current();
        let existing = self.tree.borrow().get(current, name);
        match existing {
            Some(Symbol::Register(alias)) if alias.is_alias() => alias.assign(register.clone())?,
            _ => self.declare_symbol(name, RegisterSymbol::alias(register.clone()).into())?,
        }
        Ok(register)
    }

    /// Whether `name` is a member of the current local scope.
    pub fn is_stack_variable(&self, name: &str) -> bool {
        self.is_local() && self.tree.borrow().get(self.current(), name).is_some()
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Resolve a dotted path. Not allowed during the declare pass.
    pub fn resolve_symbol(&mut self, path: &[Identifier]) -> Result<Symbol> {
        self.forbid_pass(
            CompilationStep::Declare,
            &format!("resolve '{}'", display_path(path)),
        )?;
        self.lookup(path)?
            .ok_or_else(|| CompileError::undefined(display_path(path)))
    }

    fn lookup(&mut self, path: &[Identifier]) -> Result<Option<Symbol>> {
        let stack: Vec<ScopeId> = self.scopes.iter().rev().copied().collect();
        for scope in stack {
            if let Some(symbol) = self.lookup_in(scope, path)? {
                return Ok(Some(symbol));
            }
        }

        let imported = match self.files.last() {
            Some(file) => self.usings.borrow().get(file).cloned().unwrap_or_default(),
            None => Vec::new(),
        };
        for scope in imported {
            if let Some(symbol) = self.lookup_in(scope, path)? {
                return Ok(Some(symbol));
            }
        }
        Ok(None)
    }

    fn lookup_in(&mut self, scope: ScopeId, path: &[Identifier]) -> Result<Option<Symbol>> {
        let Some((first, rest)) = path.split_first() else {
            return Ok(None);
        };

        if self.tree.borrow().is_local(scope) {
            if !rest.is_empty() || first.is_templated() {
                return Ok(None);
            }
            return Ok(self.member(scope, first.name()));
        }

        if first.is_templated() {
            let Some(symbol) = self.member(scope, first.name()) else {
                return Ok(None);
            };
            let template = symbol.as_template().cloned().ok_or_else(|| {
                CompileError::type_mismatch(format!(
                    "'{}' is a {}, not a template",
                    first.name(),
                    symbol.kind_name()
                ))
            })?;
            let instance = template.instantiate(self, first.template_args().to_vec())?;
            let inner = instance.scope();
            if rest.is_empty() {
                return Ok(self.member(inner, first.name()));
            }
            let next = self
                .tree
                .borrow()
                .sub_scope(inner, first.name())
                .unwrap_or(inner);
            return self.lookup_in(next, rest);
        }

        if rest.is_empty() {
            return Ok(self.member(scope, first.name()));
        }
        let next = self.tree.borrow().sub_scope(scope, first.name());
        match next {
            Some(next) => self.lookup_in(next, rest),
            None => Ok(None),
        }
    }

    fn member(&self, scope: ScopeId, name: &str) -> Option<Symbol> {
        self.tree.borrow().get(scope, name).map(Symbol::settled)
    }

    // ========================================================================
    // Stack frame
    // ========================================================================

    fn frame(&self, operation: &str) -> Result<StackRef> {
        self.require_local(operation)?;
        self.tree
            .borrow()
            .scope(self.current())
            .stack()
            .cloned()
            .ok_or_else(|| CompileError::internal("local scope without a stack frame"))
    }

    /// Final size of the current frame.
    pub fn stack_size(&self) -> Result<u32> {
        self.require_pass(CompilationStep::Generate, "obtain the stack size")?;
        let stack = self.frame("obtain the stack size")?;
        let size = stack.borrow().size()?;
        Ok(size)
    }

    /// Finalize the current frame and release lines waiting for it.
    pub fn set_stack_size(&mut self, size: u32) -> Result<()> {
        self.require_pass(CompilationStep::Generate, "set the stack size")?;
        let stack = self.frame("set the stack size")?;
        stack.borrow_mut().set_size(size)?;
        log::trace!("stack size of '{}' set to {size}", self.current_path().join("."));
        for (_, section) in &mut self.sections {
            section.fire_event(CompilerEvent::StackSizeSet)?;
        }
        Ok(())
    }

    /// Largest extent of the current frame so far.
    pub fn max_stack_size(&self) -> Result<u32> {
        let stack = self.frame("obtain the max stack size")?;
        let max = stack.borrow().max_size();
        Ok(max)
    }

    /// Current stack pointer offset of the frame.
    pub fn stack_pointer(&self) -> Result<i64> {
        let stack = self.frame("obtain the stack pointer")?;
        let pointer = stack.borrow().pointer();
        Ok(pointer)
    }

    pub fn move_stack_pointer(&mut self, offset: i64) -> Result<()> {
        let stack = self.frame("move the stack pointer")?;
        self.require_pass(CompilationStep::Generate, "move the stack pointer")?;
        stack.borrow_mut().move_pointer(offset)
    }

    /// Record that the current function calls another. Ignored in global scopes.
    pub fn declare_call(&mut self) -> Result<()> {
        if !self.is_local() {
            return Ok(());
        }
        let stack = self.frame("declare a call")?;
        stack.borrow_mut().set_leaf(false)
    }

    /// Handle to the current frame, for text rendered once its size is set.
    pub fn current_frame(&self) -> Result<StackRef> {
        self.frame("obtain the current stack frame")
    }

    pub fn is_leaf(&self) -> Result<bool> {
        let stack = self.frame("test whether the function is a leaf")?;
        let leaf = stack.borrow().is_leaf();
        Ok(leaf)
    }

    // ========================================================================
    // Output
    // ========================================================================

    fn section_mut(&mut self, name: &str) -> Result<&mut Section> {
        self.sections
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, section)| section)
            .ok_or_else(|| {
                CompileError::language(format!(
                    "attempted to write to non-existent section '{name}'"
                ))
            })
    }

    /// Emit a line. Lines addressing the stack wait until the frame size is set.
    pub fn generate(&mut self, line: impl Into<SymbolString>, section: &str) -> Result<()> {
        let mut line = line.into();
        let section = self.section_mut(section)?;
        line.resolve_aliases();
        if line.is_stack_reference() {
            section.generate_deferred(line, CompilerEvent::StackSizeSet);
        } else if let Some(text) = line.render()? {
            section.generate(&text);
        }
        Ok(())
    }

    /// Emit a line once `event` fires.
    pub fn generate_deferred(
        &mut self,
        line: impl Into<SymbolString>,
        event: CompilerEvent,
        section: &str,
    ) -> Result<()> {
        let section = self.section_mut(section)?;
        section.generate_deferred(line.into(), event);
        Ok(())
    }

    /// Snapshot of the engine, used to instantiate templates later.
    pub fn state(&self) -> Result<CompilerState> {
        if self.is_local() {
            return Err(CompileError::internal(
                "attempted to snapshot the compiler state inside a local scope",
            ));
        }
        Ok(CompilerState::capture(self))
    }
}
