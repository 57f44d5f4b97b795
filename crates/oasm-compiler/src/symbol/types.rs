//! Type symbols.

use std::cell::Cell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use oasm_core::{CompileError, Result, SizeSpecifier};

use super::{ConstantSymbol, Placeholder};
use crate::scope::ScopeId;

/// What kind of type a [`TypeSymbol`] describes.
#[derive(Debug)]
pub enum TypeKind {
    /// A plain sized value with no members.
    Primitive,
    /// A structure. `layout` computes the instance size when present.
    Struct { layout: Option<Placeholder> },
    /// A pointer to `target`.
    Reference { target: Rc<TypeSymbol> },
}

/// A named type.
///
/// `size` is the operand size of a value of this type. `size_of` is the
/// number of bytes an instance occupies, which for structures is only known
/// once the layout placeholder resolved.
#[derive(Debug)]
pub struct TypeSymbol {
    name: String,
    size: SizeSpecifier,
    size_of: Rc<Cell<Option<u32>>>,
    member_scope: Rc<Cell<Option<ScopeId>>>,
    kind: TypeKind,
}

impl TypeSymbol {
    /// A primitive type of the given size.
    pub fn primitive(size: SizeSpecifier) -> Rc<Self> {
        Rc::new(Self {
            name: size.to_string(),
            size,
            size_of: Rc::new(Cell::new(Some(size.bytes()))),
            member_scope: Rc::new(Cell::new(None)),
            kind: TypeKind::Primitive,
        })
    }

    /// A structure whose instance size is already known.
    pub fn sized_struct(name: impl Into<String>, size_of: u32) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            size: SizeSpecifier::None,
            size_of: Rc::new(Cell::new(Some(size_of))),
            member_scope: Rc::new(Cell::new(None)),
            kind: TypeKind::Struct { layout: None },
        })
    }

    /// A structure whose instance size is computed by `layout`.
    ///
    /// The returned placeholder must be registered with the engine; the
    /// structure's size becomes available once it resolved.
    pub fn structure(
        name: impl Into<String>,
        layout: impl FnOnce() -> Result<u32> + 'static,
    ) -> Rc<Self> {
        let size_of = Rc::new(Cell::new(None));
        let cell = size_of.clone();
        let placeholder = Placeholder::anonymous(move |_| {
            let size = layout()?;
            cell.set(Some(size));
            Ok(ConstantSymbol::new(size.to_string()).into())
        });

        Rc::new(Self {
            name: name.into(),
            size: SizeSpecifier::None,
            size_of,
            member_scope: Rc::new(Cell::new(None)),
            kind: TypeKind::Struct {
                layout: Some(placeholder),
            },
        })
    }

    /// A pointer to `target`.
    ///
    /// The reference shares the instance size and member scope of its target.
    pub fn reference_to(target: &Rc<TypeSymbol>) -> Rc<Self> {
        Rc::new(Self {
            name: format!("${}", target.name),
            size: SizeSpecifier::Qword,
            size_of: target.size_of.clone(),
            member_scope: target.member_scope.clone(),
            kind: TypeKind::Reference {
                target: target.clone(),
            },
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    /// Operand size of a value of this type.
    pub fn size(&self) -> SizeSpecifier {
        self.size
    }

    /// Whether the instance size is known.
    pub fn is_size_known(&self) -> bool {
        self.size_of.get().is_some()
    }

    /// Number of bytes an instance occupies.
    pub fn size_of(&self) -> Result<u32> {
        self.size_of.get().ok_or_else(|| {
            CompileError::internal(format!(
                "attempted to obtain the size of type '{}' before its layout was resolved",
                self.name
            ))
        })
    }

    /// Number of bytes a value of this type occupies when stored.
    pub fn value_size(&self) -> Result<u32> {
        if self.size.is_defined() {
            Ok(self.size.bytes())
        } else {
            self.size_of()
        }
    }

    /// Scope holding the members of this type.
    pub fn member_scope(&self) -> Option<ScopeId> {
        self.member_scope.get()
    }

    pub fn set_member_scope(&self, scope: ScopeId) {
        self.member_scope.set(Some(scope));
    }

    /// Placeholder computing the layout of a structure.
    pub fn layout_placeholder(&self) -> Option<&Placeholder> {
        match &self.kind {
            TypeKind::Struct { layout } => layout.as_ref(),
            _ => None,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.kind, TypeKind::Reference { .. })
    }

    /// The pointed-to type of a reference.
    pub fn dereferenced(&self) -> Option<&Rc<TypeSymbol>> {
        match &self.kind {
            TypeKind::Reference { target } => Some(target),
            _ => None,
        }
    }

    /// Number of reference levels wrapping a non-reference type.
    pub fn referenceness(&self) -> u32 {
        match &self.kind {
            TypeKind::Reference { target } => 1 + target.referenceness(),
            _ => 0,
        }
    }

    /// Structural type identity.
    ///
    /// Primitives compare by size and references by target; structures are
    /// only equal to themselves.
    pub fn same_type(a: &Rc<TypeSymbol>, b: &Rc<TypeSymbol>) -> bool {
        if Rc::ptr_eq(a, b) {
            return true;
        }
        match (&a.kind, &b.kind) {
            (TypeKind::Primitive, TypeKind::Primitive) => a.size == b.size,
            (TypeKind::Reference { target: x }, TypeKind::Reference { target: y }) => {
                TypeSymbol::same_type(x, y)
            }
            _ => false,
        }
    }

    /// Hash consistent with [`TypeSymbol::same_type`].
    pub fn hash_type<H: Hasher>(ty: &Rc<TypeSymbol>, state: &mut H) {
        match &ty.kind {
            TypeKind::Primitive => {
                0u8.hash(state);
                ty.size.hash(state);
            }
            TypeKind::Reference { target } => {
                1u8.hash(state);
                TypeSymbol::hash_type(target, state);
            }
            TypeKind::Struct { .. } => {
                2u8.hash(state);
                (Rc::as_ptr(ty) as usize).hash(state);
            }
        }
    }
}

impl fmt::Display for TypeSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_sizes() {
        let ty = TypeSymbol::primitive(SizeSpecifier::Dword);
        assert_eq!(ty.size(), SizeSpecifier::Dword);
        assert_eq!(ty.size_of().unwrap(), 4);
        assert_eq!(ty.value_size().unwrap(), 4);
        assert_eq!(ty.referenceness(), 0);
    }

    #[test]
    fn structure_size_known_after_layout() {
        let ty = TypeSymbol::structure("Point", || Ok(12));
        assert!(!ty.is_size_known());
        assert!(ty.size_of().unwrap_err().is_internal());

        let reference = TypeSymbol::reference_to(&ty);
        ty.layout_placeholder().unwrap().resolve().unwrap();

        assert_eq!(ty.size_of().unwrap(), 12);
        assert_eq!(reference.size_of().unwrap(), 12);
        assert_eq!(reference.value_size().unwrap(), 8);
    }

    #[test]
    fn references_compare_structurally() {
        let dword = TypeSymbol::primitive(SizeSpecifier::Dword);
        let other_dword = TypeSymbol::primitive(SizeSpecifier::Dword);
        let qword = TypeSymbol::primitive(SizeSpecifier::Qword);

        assert!(TypeSymbol::same_type(&dword, &other_dword));
        assert!(!TypeSymbol::same_type(&dword, &qword));

        let a = TypeSymbol::reference_to(&dword);
        let b = TypeSymbol::reference_to(&other_dword);
        assert!(TypeSymbol::same_type(&a, &b));
        assert_eq!(TypeSymbol::reference_to(&a).referenceness(), 2);
    }

    #[test]
    fn structures_compare_by_identity() {
        let a = TypeSymbol::sized_struct("A", 4);
        let b = TypeSymbol::sized_struct("A", 4);
        assert!(TypeSymbol::same_type(&a, &a.clone()));
        assert!(!TypeSymbol::same_type(&a, &b));
    }
}
