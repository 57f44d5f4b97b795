//! Symbols bound to names in scopes.
//!
//! Every entry of a scope is a [`Symbol`]. Operand-like symbols render to
//! NASM text; types, templates and unresolved placeholders don't.

mod placeholder;
mod types;

pub use placeholder::{Placeholder, ResolveFn};
pub use types::{TypeKind, TypeSymbol};

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use oasm_core::{CompileError, Result, SizeSpecifier};

use crate::operand::Register;
use crate::stack::StackRef;
use crate::template::Template;
use crate::value_type::ValueType;

// ============================================================================
// Symbol variants
// ============================================================================

/// A literal piece of assembly text, optionally typed.
#[derive(Debug, Clone)]
pub struct ConstantSymbol {
    text: String,
    value_type: Option<ValueType>,
}

impl ConstantSymbol {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            value_type: None,
        }
    }

    pub fn typed(text: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            text: text.into(),
            value_type: Some(value_type),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn value_type(&self) -> Option<&ValueType> {
        self.value_type.as_ref()
    }
}

/// A variable living at a fixed offset in a function's stack frame.
#[derive(Debug, Clone)]
pub struct StackSymbol {
    stack: StackRef,
    offset: i64,
    value_type: ValueType,
}

impl StackSymbol {
    pub fn new(stack: StackRef, offset: i64, value_type: ValueType) -> Self {
        Self {
            stack,
            offset,
            value_type,
        }
    }

    pub fn stack(&self) -> &StackRef {
        &self.stack
    }

    /// Offset from the stack pointer at function entry.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn value_type(&self) -> &ValueType {
        &self.value_type
    }

    /// Address expression relative to `rsp` once the frame size is final.
    pub fn address(&self) -> Result<String> {
        let size = self.stack.borrow().size()?;
        let offset = self.offset + i64::from(size);
        Ok(if offset >= 0 {
            format!("rsp + {offset}")
        } else {
            format!("rsp - {}", offset.unsigned_abs())
        })
    }
}

/// A register, or an alias that can be re-pointed at another register.
#[derive(Debug, Clone)]
pub struct RegisterSymbol {
    register: Rc<RefCell<Register>>,
    assignable: bool,
}

impl RegisterSymbol {
    /// A fixed register.
    pub fn new(register: Register) -> Self {
        Self {
            register: Rc::new(RefCell::new(register)),
            assignable: false,
        }
    }

    /// A register alias.
    pub fn alias(register: Register) -> Self {
        Self {
            register: Rc::new(RefCell::new(register)),
            assignable: true,
        }
    }

    pub fn is_alias(&self) -> bool {
        self.assignable
    }

    /// The register currently designated.
    pub fn register(&self) -> Register {
        self.register.borrow().clone()
    }

    /// Re-point an alias at another register.
    pub fn assign(&self, register: Register) -> Result<()> {
        if !self.assignable {
            return Err(CompileError::language(format!(
                "attempted to assign to register '{}' which is not an alias",
                self.register.borrow().name()
            )));
        }
        *self.register.borrow_mut() = register;
        Ok(())
    }
}

/// A parameter of a function.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value_type: ValueType,
}

/// Signature information backends need to generate calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionMetadata {
    pub parameters: Vec<Parameter>,
}

/// A function with its label.
#[derive(Debug, Clone)]
pub struct FunctionSymbol {
    label: String,
    metadata: Option<Rc<FunctionMetadata>>,
}

impl FunctionSymbol {
    /// A function without known parameters, such as an external import.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(label: impl Into<String>, metadata: FunctionMetadata) -> Self {
        Self {
            label: label.into(),
            metadata: Some(Rc::new(metadata)),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn metadata(&self) -> Option<&Rc<FunctionMetadata>> {
        self.metadata.as_ref()
    }
}

/// Text computed when a line is rendered. Producing `None` drops the line.
#[derive(Clone)]
pub struct DeferredSymbol(Rc<dyn Fn() -> Result<Option<String>>>);

impl DeferredSymbol {
    pub fn new(render: impl Fn() -> Result<Option<String>> + 'static) -> Self {
        DeferredSymbol(Rc::new(render))
    }

    pub fn render(&self) -> Result<Option<String>> {
        (self.0)()
    }
}

impl fmt::Debug for DeferredSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeferredSymbol")
    }
}

// ============================================================================
// Symbol
// ============================================================================

/// Anything that can be bound to a name.
#[derive(Clone)]
pub enum Symbol {
    Constant(ConstantSymbol),
    Stack(StackSymbol),
    Register(RegisterSymbol),
    Function(FunctionSymbol),
    Type(Rc<TypeSymbol>),
    Placeholder(Placeholder),
    Template(Rc<Template>),
    Deferred(DeferredSymbol),
}

impl Symbol {
    /// Short description of the variant, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Symbol::Constant(_) => "constant",
            Symbol::Stack(_) => "variable",
            Symbol::Register(_) => "register",
            Symbol::Function(_) => "function",
            Symbol::Type(_) => "type",
            Symbol::Placeholder(_) => "placeholder",
            Symbol::Template(_) => "template",
            Symbol::Deferred(_) => "deferred text",
        }
    }

    /// Render to NASM text. Deferred symbols may produce `None`.
    pub fn render(&self) -> Result<Option<String>> {
        match self {
            Symbol::Constant(c) => Ok(Some(c.text.clone())),
            Symbol::Stack(s) => s.address().map(Some),
            Symbol::Register(r) => Ok(Some(r.register.borrow().name().to_string())),
            Symbol::Function(f) => Ok(Some(f.label.clone())),
            Symbol::Deferred(d) => d.render(),
            Symbol::Placeholder(p) => match p.result() {
                Some(result) => result.render(),
                None => Err(CompileError::internal(format!(
                    "attempted to render unresolved placeholder {p}"
                ))),
            },
            Symbol::Type(t) => Err(CompileError::type_mismatch(format!(
                "type '{t}' can't be used as an operand"
            ))),
            Symbol::Template(t) => Err(CompileError::type_mismatch(format!(
                "template '{}' can't be used as an operand",
                t.name()
            ))),
        }
    }

    /// Render to NASM text, with dropped deferred text as an empty string.
    pub fn nasm(&self) -> Result<String> {
        Ok(self.render()?.unwrap_or_default())
    }

    /// Operand size of the symbol.
    pub fn size(&self) -> SizeSpecifier {
        match self {
            Symbol::Constant(c) => c
                .value_type
                .as_ref()
                .map(ValueType::size)
                .unwrap_or_default(),
            Symbol::Stack(s) => s.value_type.size(),
            Symbol::Register(r) => r.register.borrow().size(),
            Symbol::Function(_) => SizeSpecifier::Qword,
            Symbol::Placeholder(p) => p.result().map(|r| r.size()).unwrap_or_default(),
            Symbol::Type(_) | Symbol::Template(_) | Symbol::Deferred(_) => SizeSpecifier::None,
        }
    }

    /// Type of the value this symbol denotes, if it denotes one.
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Symbol::Constant(c) => c.value_type.clone(),
            Symbol::Stack(s) => Some(s.value_type.clone()),
            Symbol::Register(r) => Some(ValueType::sized(r.register.borrow().size())),
            Symbol::Function(_) => Some(ValueType::sized(SizeSpecifier::Qword)),
            Symbol::Placeholder(p) => p.result().and_then(|r| r.value_type()),
            Symbol::Type(_) | Symbol::Template(_) | Symbol::Deferred(_) => None,
        }
    }

    /// Follow a resolved placeholder to its result.
    pub fn settled(self) -> Symbol {
        match self {
            Symbol::Placeholder(p) => p.result().unwrap_or(Symbol::Placeholder(p)),
            other => other,
        }
    }

    pub fn as_type(&self) -> Option<&Rc<TypeSymbol>> {
        match self {
            Symbol::Type(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_template(&self) -> Option<&Rc<Template>> {
        match self {
            Symbol::Template(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_placeholder(&self) -> Option<&Placeholder> {
        match self {
            Symbol::Placeholder(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionSymbol> {
        match self {
            Symbol::Function(f) => Some(f),
            _ => None,
        }
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Symbol::Constant(a), Symbol::Constant(b)) => {
                a.text == b.text && a.value_type == b.value_type
            }
            (Symbol::Stack(a), Symbol::Stack(b)) => {
                Rc::ptr_eq(&a.stack, &b.stack) && a.offset == b.offset
            }
            (Symbol::Register(a), Symbol::Register(b)) => {
                a.register.borrow().name() == b.register.borrow().name()
            }
            (Symbol::Function(a), Symbol::Function(b)) => a.label == b.label,
            (Symbol::Type(a), Symbol::Type(b)) => TypeSymbol::same_type(a, b),
            (Symbol::Placeholder(a), Symbol::Placeholder(b)) => a == b,
            (Symbol::Template(a), Symbol::Template(b)) => Rc::ptr_eq(a, b),
            (Symbol::Deferred(a), Symbol::Deferred(b)) => Rc::ptr_eq(&a.0, &b.0),
            _ => false,
        }
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Symbol::Constant(c) => c.text.hash(state),
            Symbol::Stack(s) => {
                (Rc::as_ptr(&s.stack) as usize).hash(state);
                s.offset.hash(state);
            }
            Symbol::Register(r) => r.register.borrow().name().hash(state),
            Symbol::Function(f) => f.label.hash(state),
            Symbol::Type(t) => TypeSymbol::hash_type(t, state),
            Symbol::Placeholder(p) => p.hash(state),
            Symbol::Template(t) => (Rc::as_ptr(t) as usize).hash(state),
            Symbol::Deferred(d) => (Rc::as_ptr(&d.0) as *const () as usize).hash(state),
        }
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Constant(c) => write!(f, "Constant({:?})", c.text),
            Symbol::Stack(s) => write!(f, "Stack({})", s.offset),
            Symbol::Register(r) => write!(f, "Register({})", r.register.borrow().name()),
            Symbol::Function(func) => write!(f, "Function({})", func.label),
            Symbol::Type(t) => write!(f, "Type({t})"),
            Symbol::Placeholder(p) => write!(f, "Placeholder({p})"),
            Symbol::Template(t) => write!(f, "Template({})", t.name()),
            Symbol::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Constant(c) => f.write_str(&c.text),
            Symbol::Function(func) => f.write_str(&func.label),
            Symbol::Register(r) => f.write_str(r.register.borrow().name()),
            Symbol::Type(t) => write!(f, "{t}"),
            Symbol::Placeholder(p) => write!(f, "{p}"),
            Symbol::Template(t) => f.write_str(t.name()),
            Symbol::Stack(s) => write!(f, "[stack {}]", s.offset),
            Symbol::Deferred(_) => f.write_str("<deferred>"),
        }
    }
}

impl From<ConstantSymbol> for Symbol {
    fn from(value: ConstantSymbol) -> Self {
        Symbol::Constant(value)
    }
}

impl From<StackSymbol> for Symbol {
    fn from(value: StackSymbol) -> Self {
        Symbol::Stack(value)
    }
}

impl From<RegisterSymbol> for Symbol {
    fn from(value: RegisterSymbol) -> Self {
        Symbol::Register(value)
    }
}

impl From<FunctionSymbol> for Symbol {
    fn from(value: FunctionSymbol) -> Self {
        Symbol::Function(value)
    }
}

impl From<Rc<TypeSymbol>> for Symbol {
    fn from(value: Rc<TypeSymbol>) -> Self {
        Symbol::Type(value)
    }
}

impl From<Placeholder> for Symbol {
    fn from(value: Placeholder) -> Self {
        Symbol::Placeholder(value)
    }
}

impl From<Rc<Template>> for Symbol {
    fn from(value: Rc<Template>) -> Self {
        Symbol::Template(value)
    }
}

impl From<DeferredSymbol> for Symbol {
    fn from(value: DeferredSymbol) -> Self {
        Symbol::Deferred(value)
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Symbol::Constant(ConstantSymbol::new(value))
    }
}

impl From<String> for Symbol {
    fn from(value: String) -> Self {
        Symbol::Constant(ConstantSymbol::new(value))
    }
}
