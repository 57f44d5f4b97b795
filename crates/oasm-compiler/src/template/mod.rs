//! Template instantiation.
//!
//! A [`Template`] is declared once and compiled lazily: nothing in its body
//! runs until a path names it with arguments. The first use of an argument
//! tuple creates a [`TemplateInstance`], an engine built from the state
//! captured at the declaration site, with the formal parameters bound in a
//! scope private to the instance. The instance is compiled up to the pass
//! the using engine is in, and the template's action replays the later
//! passes on every instance.
//!
//! ## Components
//!
//! - [`Template`]: declaration, arity check, memoization
//! - [`TemplateInstance`]: one instantiated body and its engine
//! - [`TemplateInstanceCache`]: instances by argument tuple

mod cache;

pub use cache::TemplateInstanceCache;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use xxhash_rust::xxh64::xxh64;

use oasm_core::{CompilationStep, CompileError, Result};

use crate::action::{CompilerAction, Program, action};
use crate::compiler::Compiler;
use crate::scope::ScopeId;
use crate::state::CompilerState;
use crate::symbol::Symbol;

/// A parameterized block of actions.
pub struct Template {
    name: String,
    parameters: Vec<String>,
    body: Box<dyn Fn() -> Program>,
    declaration: RefCell<Option<CompilerState>>,
    instances: RefCell<TemplateInstanceCache>,
}

impl Template {
    /// A template whose body is produced by `body` for every instance.
    pub fn new(
        name: impl Into<String>,
        parameters: Vec<String>,
        body: impl Fn() -> Program + 'static,
    ) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            parameters,
            body: Box::new(body),
            declaration: RefCell::new(None),
            instances: RefCell::new(TemplateInstanceCache::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Formal parameter names.
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    pub fn instance_count(&self) -> usize {
        self.instances.borrow().len()
    }

    /// The action declaring this template and driving its instances.
    pub fn action(self: &Rc<Self>) -> CompilerAction {
        let template = self.clone();
        action(move |compiler, pass| {
            if pass == CompilationStep::Declare {
                compiler.declare_template(&template.name, template.clone())?;
                *template.declaration.borrow_mut() = Some(compiler.state()?);
            }

            let instances = template.instances.borrow().instances().to_vec();
            for instance in instances {
                instance.compile_to(pass)?;
            }
            Ok(())
        })
    }

    /// The instance for `arguments`, created and compiled up to the pass
    /// `compiler` is in if it doesn't exist yet.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn instantiate(
        self: &Rc<Self>,
        compiler: &Compiler,
        arguments: Vec<Symbol>,
    ) -> Result<Rc<TemplateInstance>> {
        if arguments.len() != self.parameters.len() {
            return Err(CompileError::TemplateArity {
                name: self.name.clone(),
                expected: self.parameters.len(),
                found: arguments.len(),
            });
        }
        if let Some(existing) = self.instances.borrow().get(&arguments) {
            return Ok(existing);
        }

        let state = self.declaration.borrow().clone().ok_or_else(|| {
            CompileError::internal(format!(
                "template '{}' was instantiated before it was declared",
                self.name
            ))
        })?;
        let (mut engine, scope) = state.instantiate();
        for (formal, argument) in self.parameters.iter().zip(&arguments) {
            engine.declare_symbol(formal, argument.clone())?;
        }

        let instance = Rc::new(TemplateInstance::new(
            &self.name,
            arguments.clone(),
            scope,
            engine,
            (self.body)(),
        ));
        log::trace!(
            "instantiating template '{}' as '{}'",
            instance,
            instance.mangled_name()
        );

        self.instances.borrow_mut().insert(arguments, instance.clone());
        instance.compile_to(compiler.current_pass())?;
        Ok(instance)
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("instances", &self.instance_count())
            .finish()
    }
}

/// Whether every argument of an instance is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Some argument is a placeholder that hasn't resolved yet.
    PendingArguments,
    Ready,
}

/// One instantiated template body.
pub struct TemplateInstance {
    template: String,
    arguments: Vec<Symbol>,
    scope: ScopeId,
    engine: RefCell<Compiler>,
    program: Program,
    mangled: String,
}

impl TemplateInstance {
    pub(crate) fn new(
        template: &str,
        arguments: Vec<Symbol>,
        scope: ScopeId,
        engine: Compiler,
        program: Program,
    ) -> Self {
        let key = arguments
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let mangled = format!("{template}_{:016x}", xxh64(key.as_bytes(), 0));
        Self {
            template: template.to_string(),
            arguments,
            scope,
            engine: RefCell::new(engine),
            program,
            mangled,
        }
    }

    pub fn template_name(&self) -> &str {
        &self.template
    }

    pub fn arguments(&self) -> &[Symbol] {
        &self.arguments
    }

    /// Scope holding the parameter bindings and everything the body declares.
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// Name usable in labels, stable for a given argument tuple.
    pub fn mangled_name(&self) -> &str {
        &self.mangled
    }

    pub fn state(&self) -> InstanceState {
        let pending = self.arguments.iter().any(|argument| {
            argument
                .as_placeholder()
                .is_some_and(|placeholder| !placeholder.is_resolved())
        });
        if pending {
            InstanceState::PendingArguments
        } else {
            InstanceState::Ready
        }
    }

    /// Compile the body up to and including `pass`.
    pub fn compile_to(&self, pass: CompilationStep) -> Result<()> {
        let mut engine = self.engine.try_borrow_mut().map_err(|_| {
            CompileError::internal(format!(
                "template instance '{self}' was compiled while it was already compiling"
            ))
        })?;
        engine.compile(&self.program, pass)
    }

    /// Whether the instance's engine already ran `pass`.
    pub fn has_completed(&self, pass: CompilationStep) -> bool {
        self.engine
            .try_borrow()
            .is_ok_and(|engine| engine.has_completed(pass))
    }
}

impl fmt::Display for TemplateInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<", self.template)?;
        for (i, argument) in self.arguments.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{argument}")?;
        }
        f.write_str(">")
    }
}

impl fmt::Debug for TemplateInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TemplateInstance({self})")
    }
}
