//! Structure declarations and layout.
//!
//! A structure name denotes a pointer to the structure; the structure itself
//! is reached with a value type. Field offsets are constants in the
//! structure's scope.
//!
//! Leading fields whose sizes are known up front get their offsets during
//! the declare pass. From the first field whose type has to be looked up,
//! fields become placeholders chained one after the other:
//!
//! ```text
//! field type -> field[k] -> field[k+1] -> ... -> field[n-1] -> layout
//! ```
//!
//! Each placeholder takes the running offset when it resolves and advances
//! it; the layout placeholder publishes the final size. A structure that
//! embeds itself by value, directly or through others, closes a cycle and
//! fails with a cyclic dependency.

use std::cell::Cell;
use std::rc::Rc;

use oasm_core::{CompilationStep, CompileError, Result};

use crate::action::{CompilerAction, Program, action};
use crate::compiler::Compiler;
use crate::identifier::Identifier;
use crate::symbol::{ConstantSymbol, Placeholder, TypeSymbol};
use crate::value_type::TypeRef;

/// A field as declared in source.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub type_ref: Rc<TypeRef>,
}

impl Field {
    pub fn new(name: impl Into<String>, type_ref: Rc<TypeRef>) -> Self {
        Self {
            name: name.into(),
            type_ref,
        }
    }
}

/// Program declaring structure `name`, with `members` compiled inside its scope.
pub fn structure(name: &str, fields: Vec<Field>, members: Program) -> Program {
    let name = name.to_string();
    let fields = Rc::new(fields);

    // offsets of the leading fields known without a lookup
    let mut offsets = Vec::new();
    let mut size = 0;
    for field in fields.iter() {
        match field.type_ref.get() {
            Ok(value_type) => {
                offsets.push(size);
                size += value_type.byte_size();
            }
            Err(_) => break,
        }
    }
    let independent_size = size;

    let enter = {
        let name = name.clone();
        action(move |compiler, pass| {
            if pass == CompilationStep::Declare {
                // the dependent fields hold the other end of this cell
                let running = Rc::new(Cell::new(independent_size));
                let total = running.clone();
                let target = TypeSymbol::structure(name.clone(), move || Ok(total.get()));
                let layout = target.layout_placeholder().cloned().ok_or_else(|| {
                    CompileError::internal(format!("structure '{name}' has no layout placeholder"))
                })?;
                compiler.declare_type(&name, TypeSymbol::reference_to(&target))?;
                compiler.add_anonymous_placeholder(&layout)?;
                compiler.enter_global(&[Identifier::new(name.as_str())])?;
                return declare_fields(compiler, &fields, &offsets, running);
            }

            compiler.enter_global(&[Identifier::new(name.as_str())])?;
            if pass == CompilationStep::ResolveDependencies {
                chain_fields(compiler, &name, &fields[offsets.len()..])?;
            }
            Ok(())
        })
    };

    let exit: CompilerAction = action(|compiler, _| compiler.exit_global());
    members.wrapped(enter, exit)
}

fn declare_fields(
    compiler: &mut Compiler,
    fields: &[Field],
    offsets: &[u32],
    running: Rc<Cell<u32>>,
) -> Result<()> {
    for (field, offset) in fields.iter().zip(offsets) {
        compiler.declare_constant(&field.name, offset.to_string(), Some(field.type_ref.get()?))?;
    }

    for field in &fields[offsets.len()..] {
        let type_ref = field.type_ref.clone();
        let running = running.clone();
        compiler.declare_placeholder(&field.name, move |_| {
            type_ref.resolve_dependency()?;
            let value_type = type_ref.get()?;
            let offset = running.get();
            running.set(offset + value_type.byte_size());
            Ok(ConstantSymbol::typed(offset.to_string(), value_type).into())
        })?;
    }
    Ok(())
}

fn chain_fields(compiler: &mut Compiler, name: &str, dependent: &[Field]) -> Result<()> {
    let layout = compiler
        .current_associated_type()?
        .and_then(|reference| reference.dereferenced().cloned())
        .and_then(|target| target.layout_placeholder().cloned())
        .ok_or_else(|| {
            CompileError::internal(format!("scope of structure '{name}' lost its layout"))
        })?;

    let mut previous: Option<Placeholder> = None;
    for field in dependent {
        let placeholder = compiler
            .resolve_symbol(&[Identifier::new(field.name.as_str())])?
            .as_placeholder()
            .cloned()
            .ok_or_else(|| {
                CompileError::internal(format!(
                    "field '{}' of '{name}' is not a placeholder",
                    field.name
                ))
            })?;
        field.type_ref.declare_dependency(compiler, &placeholder)?;
        if let Some(previous) = &previous {
            compiler.declare_dependency(previous, &placeholder)?;
        }
        previous = Some(placeholder);
    }

    if let Some(last) = previous {
        compiler.declare_dependency(&last, &layout)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::in_pass;
    use crate::compiler::DEFAULT_SECTIONS;
    use crate::identifier::path;
    use crate::value_type::ValueType;
    use oasm_core::SizeSpecifier;
    use std::cell::RefCell;

    fn offsets_of(
        program: Program,
        names: &'static [&'static str],
    ) -> Result<Vec<String>> {
        let found = Rc::new(RefCell::new(Vec::new()));
        let out = found.clone();
        let program = program.concat(&Program::new(vec![in_pass(
            CompilationStep::Generate,
            move |c| {
                for name in names {
                    out.borrow_mut().push(c.resolve_symbol(&path(name))?.nasm()?);
                }
                Ok(())
            },
        )]));
        Compiler::new(&DEFAULT_SECTIONS).compile(&program, CompilationStep::Generate)?;
        let offsets = found.borrow().clone();
        Ok(offsets)
    }

    #[test]
    fn independent_fields() {
        let point = structure(
            "Point",
            vec![
                Field::new("x", TypeRef::sized(SizeSpecifier::Dword)),
                Field::new("y", TypeRef::sized(SizeSpecifier::Dword)),
                Field::new("tag", TypeRef::bytes(3)),
            ],
            Program::default(),
        );
        let offsets = offsets_of(point, &["Point.x", "Point.y", "Point.tag"]).unwrap();
        assert_eq!(offsets, vec!["0", "4", "8"]);
    }

    #[test]
    fn embedded_struct_waits_for_layout() {
        // Line is declared before Point and embeds two of them by value
        let line = structure(
            "Line",
            vec![
                Field::new("id", TypeRef::sized(SizeSpecifier::Word)),
                Field::new("from", TypeRef::value(path("Point"))),
                Field::new("to", TypeRef::value(path("Point"))),
                Field::new("width", TypeRef::sized(SizeSpecifier::Byte)),
            ],
            Program::default(),
        );
        let point = structure(
            "Point",
            vec![
                Field::new("x", TypeRef::sized(SizeSpecifier::Qword)),
                Field::new("y", TypeRef::sized(SizeSpecifier::Qword)),
            ],
            Program::default(),
        );

        let offsets = offsets_of(
            line.concat(&point),
            &["Line.id", "Line.from", "Line.to", "Line.width"],
        )
        .unwrap();
        assert_eq!(offsets, vec!["0", "2", "18", "34"]);
    }

    #[test]
    fn struct_size_becomes_known() {
        let observed = Rc::new(RefCell::new(None));
        let out = observed.clone();
        let pair = structure(
            "Pair",
            vec![
                Field::new("a", TypeRef::sized(SizeSpecifier::Qword)),
                Field::new("b", TypeRef::named(path("Pair"))),
            ],
            Program::default(),
        );
        let program = pair.concat(&Program::new(vec![in_pass(
            CompilationStep::Generate,
            move |c| {
                let ty = c.resolve_symbol(&path("Pair"))?;
                let reference = ty.as_type().cloned().unwrap();
                *out.borrow_mut() = Some(ValueType::of(reference.dereferenced().unwrap())?);
                Ok(())
            },
        )]));
        Compiler::new(&DEFAULT_SECTIONS)
            .compile(&program, CompilationStep::Generate)
            .unwrap();

        // a pointer to itself is fine: 8 + 8 bytes
        assert_eq!(observed.borrow().as_ref().unwrap().byte_size(), 16);
    }

    #[test]
    fn self_embedding_is_a_cycle() {
        let node = structure(
            "Node",
            vec![Field::new("next", TypeRef::value(path("Node")))],
            Program::default(),
        );
        let err = offsets_of(node, &[]).unwrap_err();
        assert!(matches!(err.kind(), CompileError::CyclicDependency { .. }));
    }

    #[test]
    fn mutual_embedding_is_a_cycle() {
        let a = structure(
            "A",
            vec![Field::new("b", TypeRef::value(path("B")))],
            Program::default(),
        );
        let b = structure(
            "B",
            vec![Field::new("a", TypeRef::value(path("A")))],
            Program::default(),
        );
        let err = offsets_of(a.concat(&b), &[]).unwrap_err();
        assert!(matches!(err.kind(), CompileError::CyclicDependency { .. }));
    }

    #[test]
    fn members_live_in_the_struct_scope() {
        let members = Program::new(vec![in_pass(CompilationStep::Declare, |c| {
            c.declare_constant("Origin", "0", None)
        })]);
        let point = structure(
            "Point",
            vec![Field::new("x", TypeRef::sized(SizeSpecifier::Dword))],
            members,
        );
        let offsets = offsets_of(point, &["Point.Origin"]).unwrap();
        assert_eq!(offsets, vec!["0"]);
    }
}
