//! Value types and type references.
//!
//! A [`ValueType`] is a fully known type of a value: its operand size, its
//! byte size and the type symbol it came from. A [`TypeRef`] is a type as
//! written in source. Named types may not be known during the declare pass,
//! so a `TypeRef` can register a dependency on the placeholder it waits for
//! and settle into a `ValueType` when that placeholder resolves.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use oasm_core::{CompileError, Result, SizeSpecifier};

use crate::compiler::Compiler;
use crate::identifier::{Identifier, display_path};
use crate::symbol::{Placeholder, Symbol, TypeSymbol};

/// The known type of a value.
#[derive(Debug, Clone)]
pub struct ValueType {
    size: SizeSpecifier,
    byte_size: u32,
    type_symbol: Option<Rc<TypeSymbol>>,
}

impl ValueType {
    /// An untyped value of the given operand size.
    pub fn sized(size: SizeSpecifier) -> Self {
        Self {
            size,
            byte_size: size.bytes(),
            type_symbol: None,
        }
    }

    /// An untyped blob of `byte_size` bytes.
    pub fn bytes(byte_size: u32) -> Self {
        Self {
            size: SizeSpecifier::from_bytes(byte_size).unwrap_or_default(),
            byte_size,
            type_symbol: None,
        }
    }

    /// A value of a type symbol. Fails if the instance size isn't known yet.
    pub fn of(type_symbol: &Rc<TypeSymbol>) -> Result<Self> {
        Ok(Self {
            size: type_symbol.size(),
            byte_size: type_symbol.value_size()?,
            type_symbol: Some(type_symbol.clone()),
        })
    }

    /// Operand size.
    pub fn size(&self) -> SizeSpecifier {
        self.size
    }

    /// Number of bytes the value occupies.
    pub fn byte_size(&self) -> u32 {
        self.byte_size
    }

    pub fn type_symbol(&self) -> Option<&Rc<TypeSymbol>> {
        self.type_symbol.as_ref()
    }

    pub fn is_reference(&self) -> bool {
        self.type_symbol.as_ref().is_some_and(|t| t.is_reference())
    }
}

impl PartialEq for ValueType {
    fn eq(&self, other: &Self) -> bool {
        let same_symbol = match (&self.type_symbol, &other.type_symbol) {
            (Some(a), Some(b)) => TypeSymbol::same_type(a, b),
            (None, None) => true,
            _ => false,
        };
        self.size == other.size && self.byte_size == other.byte_size && same_symbol
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.type_symbol {
            Some(t) => write!(f, "{t}"),
            None if self.size.is_defined() => write!(f, "{}", self.size),
            None => write!(f, "{} bytes", self.byte_size),
        }
    }
}

// ============================================================================
// Type references
// ============================================================================

/// How a type is written.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    /// A size keyword.
    Sized(SizeSpecifier),
    /// A raw byte count.
    Bytes(u32),
    /// A named type, taken as is.
    Named(Vec<Identifier>),
    /// The value a named reference type points to, stored inline.
    Value(Vec<Identifier>),
    /// A pointer to a named type.
    Reference(Vec<Identifier>),
}

#[derive(Debug, Clone)]
enum Dependency {
    /// Waiting for the placeholder a name is bound to.
    Symbol(Placeholder),
    /// Waiting for the layout of an inline structure.
    Layout(Rc<TypeSymbol>),
}

/// A type as written in source, resolved during the passes.
#[derive(Debug)]
pub struct TypeRef {
    expr: TypeExpr,
    solved: RefCell<Option<ValueType>>,
    dependency: RefCell<Option<Dependency>>,
}

impl TypeRef {
    fn new(expr: TypeExpr, solved: Option<ValueType>) -> Rc<Self> {
        Rc::new(Self {
            expr,
            solved: RefCell::new(solved),
            dependency: RefCell::new(None),
        })
    }

    pub fn sized(size: SizeSpecifier) -> Rc<Self> {
        Self::new(TypeExpr::Sized(size), Some(ValueType::sized(size)))
    }

    pub fn bytes(byte_size: u32) -> Rc<Self> {
        Self::new(TypeExpr::Bytes(byte_size), Some(ValueType::bytes(byte_size)))
    }

    pub fn named(path: Vec<Identifier>) -> Rc<Self> {
        Self::new(TypeExpr::Named(path), None)
    }

    pub fn value(path: Vec<Identifier>) -> Rc<Self> {
        Self::new(TypeExpr::Value(path), None)
    }

    pub fn reference(path: Vec<Identifier>) -> Rc<Self> {
        Self::new(TypeExpr::Reference(path), None)
    }

    pub fn expr(&self) -> &TypeExpr {
        &self.expr
    }

    /// Whether the value type is known.
    pub fn is_defined(&self) -> bool {
        self.solved.borrow().is_some()
    }

    /// The resolved value type.
    pub fn get(&self) -> Result<ValueType> {
        self.solved.borrow().clone().ok_or_else(|| {
            CompileError::internal(format!("type '{self}' was used before it was resolved"))
        })
    }

    /// Make `dependent` wait for this type, if it isn't known yet.
    ///
    /// Must run during the resolve-dependencies pass. A type that can be
    /// looked up right away is settled immediately.
    pub fn declare_dependency(&self, compiler: &mut Compiler, dependent: &Placeholder) -> Result<()> {
        if self.is_defined() {
            return Ok(());
        }

        let symbol = compiler.resolve_symbol(self.path())?;
        let dependency = match symbol {
            Symbol::Placeholder(p) if !p.is_resolved() => Dependency::Symbol(p),
            other => match self.apply(other.settled())? {
                Settled::Known(value_type) => {
                    *self.solved.borrow_mut() = Some(value_type);
                    return Ok(());
                }
                Settled::AwaitingLayout(ty) => Dependency::Layout(ty),
            },
        };

        let awaited = match &dependency {
            Dependency::Symbol(p) => p.clone(),
            Dependency::Layout(ty) => ty.layout_placeholder().cloned().ok_or_else(|| {
                CompileError::internal(format!("structure '{ty}' has no layout to wait for"))
            })?,
        };
        compiler.declare_dependency(&awaited, dependent)?;
        *self.dependency.borrow_mut() = Some(dependency);
        Ok(())
    }

    /// Settle the type once the awaited placeholder resolved.
    pub fn resolve_dependency(&self) -> Result<()> {
        if self.is_defined() {
            return Ok(());
        }
        let dependency = self.dependency.borrow_mut().take().ok_or_else(|| {
            CompileError::internal(format!("type '{self}' has no pending dependency"))
        })?;

        let value_type = match dependency {
            Dependency::Symbol(p) => match self.apply(p.expect_result()?)? {
                Settled::Known(value_type) => value_type,
                Settled::AwaitingLayout(ty) => {
                    return Err(CompileError::internal(format!(
                        "layout of '{ty}' is still unresolved while settling '{self}'"
                    )));
                }
            },
            Dependency::Layout(ty) => ValueType::of(&ty)?,
        };
        *self.solved.borrow_mut() = Some(value_type);
        Ok(())
    }

    /// Look the type up and settle it right away.
    ///
    /// Used where every placeholder is already resolved, such as local
    /// variable declarations during generation.
    pub fn solve(&self, compiler: &mut Compiler) -> Result<ValueType> {
        if let Some(value_type) = self.solved.borrow().clone() {
            return Ok(value_type);
        }
        let symbol = compiler.resolve_symbol(self.path())?.settled();
        match self.apply(symbol)? {
            Settled::Known(value_type) => {
                *self.solved.borrow_mut() = Some(value_type.clone());
                Ok(value_type)
            }
            Settled::AwaitingLayout(ty) => Err(CompileError::internal(format!(
                "layout of '{ty}' is not resolved yet"
            ))),
        }
    }

    fn path(&self) -> &[Identifier] {
        match &self.expr {
            TypeExpr::Named(p) | TypeExpr::Value(p) | TypeExpr::Reference(p) => p,
            TypeExpr::Sized(_) | TypeExpr::Bytes(_) => &[],
        }
    }

    fn apply(&self, symbol: Symbol) -> Result<Settled> {
        let ty = match symbol {
            Symbol::Type(ty) => ty,
            other => {
                return Err(CompileError::type_mismatch(format!(
                    "'{}' is a {}, not a type",
                    display_path(self.path()),
                    other.kind_name()
                )));
            }
        };

        let target = match &self.expr {
            TypeExpr::Named(_) => ty,
            TypeExpr::Reference(_) => {
                return ValueType::of(&TypeSymbol::reference_to(&ty)).map(Settled::Known);
            }
            TypeExpr::Value(_) => ty.dereferenced().cloned().ok_or_else(|| {
                CompileError::type_mismatch(format!(
                    "'{ty}' is not a reference type and has no value type"
                ))
            })?,
            TypeExpr::Sized(_) | TypeExpr::Bytes(_) => {
                return Err(CompileError::internal("sized types are settled on creation"));
            }
        };

        if target.size().is_defined() || target.is_size_known() {
            ValueType::of(&target).map(Settled::Known)
        } else {
            Ok(Settled::AwaitingLayout(target))
        }
    }
}

enum Settled {
    Known(ValueType),
    AwaitingLayout(Rc<TypeSymbol>),
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.expr {
            TypeExpr::Sized(size) => write!(f, "{size}"),
            TypeExpr::Bytes(n) => write!(f, "{n} bytes"),
            TypeExpr::Named(p) => f.write_str(&display_path(p)),
            TypeExpr::Value(p) => write!(f, "value {}", display_path(p)),
            TypeExpr::Reference(p) => write!(f, "${}", display_path(p)),
        }
    }
}
