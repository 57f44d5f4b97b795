//! Builtin types and data helpers.
//!
//! ## Components
//!
//! - [`declare_builtin_types`]: the `String` type
//! - [`declare_array_fields`]: `count` and `data` members of an array type
//! - [`string_literal`] / [`c_string_literal`]: emit literal data and
//!   return a reference operand to it
//! - [`nasm_string`]: escape handling for literal contents

use oasm_core::{CompilationStep, CompileError, CompilerSettings, Result, SizeSpecifier};

use crate::action::{CompilerAction, in_pass};
use crate::compiler::{Compiler, DATA_SECTION};
use crate::identifier::Identifier;
use crate::operand::Operand;
use crate::symbol::TypeSymbol;
use crate::value_type::ValueType;

/// Declare the builtin types in the current scope.
///
/// `String` names a pointer to a structure that starts with a length field;
/// the characters follow it at `String.c_str`.
pub fn declare_builtin_types(compiler: &mut Compiler) -> Result<()> {
    let length = compiler.settings().string_length_size;
    let target = TypeSymbol::sized_struct("String", length.bytes());
    compiler.declare_type("String", TypeSymbol::reference_to(&target))?;

    compiler.enter_global(&[Identifier::new("String")])?;
    compiler.declare_constant("length", "0", Some(ValueType::sized(length)))?;
    compiler.declare_constant("c_str", length.bytes().to_string(), None)?;
    compiler.exit_global()
}

/// Action declaring the builtin types during the declare pass.
pub fn builtins() -> CompilerAction {
    in_pass(CompilationStep::Declare, declare_builtin_types)
}

/// Offset of the data buffer of an array whose elements take `instance_size` bytes.
///
/// A power of two no smaller than the length field, grown towards the
/// element size but never past the maximum array alignment.
pub fn array_data_offset(settings: &CompilerSettings, instance_size: u32) -> u32 {
    let mut offset = settings.array_length_size.bytes();
    if instance_size > offset {
        while offset < instance_size && offset < settings.max_array_alignment {
            offset <<= 1;
        }
    }
    offset
}

/// Declare the members of an array type in the current scope.
pub fn declare_array_fields(compiler: &mut Compiler, instance_size: u32) -> Result<()> {
    let settings = compiler.settings().clone();
    let offset = array_data_offset(&settings, instance_size);
    compiler.declare_constant("count", "0", Some(ValueType::sized(settings.array_length_size)))?;
    compiler.declare_constant("data", offset.to_string(), None)
}

// ============================================================================
// String literals
// ============================================================================

/// NASM data operands for the contents of a literal, without the terminator.
///
/// Supports the escapes `\\`, `\n`, `\r`, `\t` and `\u(<hex codepoint>)`.
pub fn nasm_string(contents: &str) -> Result<String> {
    let mut parts = Vec::new();
    let mut plain = String::new();
    let mut chars = contents.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            plain.push(c);
            continue;
        }
        let special = chars.next().ok_or_else(|| {
            CompileError::language(format!("string '{contents}' ends in an escape character"))
        })?;
        if !plain.is_empty() {
            parts.push(quote(&std::mem::take(&mut plain))?);
        }
        match special {
            '\\' => parts.push("'\\'".to_string()),
            'n' => parts.push("0ah".to_string()),
            'r' => parts.push("0dh".to_string()),
            't' => parts.push("09h".to_string()),
            'u' => parts.push(unicode_escape(&mut chars)?),
            other => {
                return Err(CompileError::language(format!(
                    "unknown escape character '\\{other}' in '{contents}'"
                )));
            }
        }
    }
    if !plain.is_empty() {
        parts.push(quote(&plain)?);
    }
    Ok(parts.join(", "))
}

fn quote(text: &str) -> Result<String> {
    if !text.contains('"') {
        Ok(format!("\"{text}\""))
    } else if !text.contains('\'') {
        Ok(format!("'{text}'"))
    } else {
        Err(CompileError::language(format!(
            "string segment '{text}' mixes both quote characters"
        )))
    }
}

fn unicode_escape(chars: &mut std::str::Chars<'_>) -> Result<String> {
    let bad = || CompileError::language("bad unicode escape character sequence");
    if chars.next() != Some('(') {
        return Err(bad());
    }
    let mut codepoint = String::new();
    loop {
        match chars.next() {
            Some(')') => break,
            Some(c) if c.is_ascii_hexdigit() => codepoint.push(c),
            _ => return Err(bad()),
        }
    }
    if codepoint.is_empty() || codepoint.len() > 8 {
        return Err(bad());
    }
    Ok(format!("`\\U{codepoint:0>8}`"))
}

/// Emit a length-prefixed string into the data section and return its address.
pub fn string_literal(compiler: &mut Compiler, contents: &str) -> Result<Operand> {
    let length = compiler.settings().string_length_size;
    let data = nasm_string(contents)?;
    let label = compiler.label("anonymous_string");
    let end = compiler.label("end_of_string");

    // the length excludes the length field and the terminating zero
    compiler.generate(format!("{label}:"), DATA_SECTION)?;
    compiler.generate(
        format!("\t{} {end} - {label} - {}", define(length)?, length.bytes() + 1),
        DATA_SECTION,
    )?;
    compiler.generate(zero_terminated(&data), DATA_SECTION)?;
    compiler.generate(format!("{end}:"), DATA_SECTION)?;
    Ok(Operand::reference(format!("[{label}]")))
}

/// Emit a zero-terminated string into the data section and return its address.
pub fn c_string_literal(compiler: &mut Compiler, contents: &str) -> Result<Operand> {
    let data = nasm_string(contents)?;
    let label = compiler.label("anonymous_c_string");
    compiler.generate(format!("{label}:"), DATA_SECTION)?;
    compiler.generate(zero_terminated(&data), DATA_SECTION)?;
    Ok(Operand::reference(format!("[{label}]")))
}

fn zero_terminated(data: &str) -> String {
    if data.is_empty() {
        "\tdb 0".to_string()
    } else {
        format!("\tdb {data}, 0")
    }
}

fn define(size: SizeSpecifier) -> Result<&'static str> {
    match size {
        SizeSpecifier::Byte => Ok("db"),
        SizeSpecifier::Word => Ok("dw"),
        SizeSpecifier::Dword => Ok("dd"),
        SizeSpecifier::Qword => Ok("dq"),
        SizeSpecifier::None => Err(CompileError::internal(
            "string length field has no size",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Program, every_pass};
    use crate::compiler::DEFAULT_SECTIONS;
    use crate::identifier::path;
    use crate::operand::OperandKind;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn resolve_names(settings: CompilerSettings, names: &'static [&'static str]) -> Vec<String> {
        let found = Rc::new(RefCell::new(Vec::new()));
        let out = found.clone();
        let program = Program::new(vec![
            builtins(),
            in_pass(CompilationStep::Declare, |c| {
                c.enter_global(&path("Bytes"))?;
                declare_array_fields(c, 1)?;
                c.exit_global()?;
                c.enter_global(&path("Points"))?;
                declare_array_fields(c, 24)?;
                c.exit_global()
            }),
            in_pass(CompilationStep::Generate, move |c| {
                for name in names {
                    out.borrow_mut().push(c.resolve_symbol(&path(name))?.nasm()?);
                }
                Ok(())
            }),
        ]);
        Compiler::with_settings(&DEFAULT_SECTIONS, settings)
            .compile(&program, CompilationStep::Generate)
            .unwrap();
        let values = found.borrow().clone();
        values
    }

    #[test]
    fn string_type_members() {
        let values = resolve_names(CompilerSettings::default(), &["String.length", "String.c_str"]);
        assert_eq!(values, vec!["0", "4"]);

        let wide = CompilerSettings::default().with_string_length_size(SizeSpecifier::Qword);
        assert_eq!(resolve_names(wide, &["String.c_str"]), vec!["8"]);
    }

    #[test]
    fn string_is_a_pointer() {
        let seen = Rc::new(RefCell::new(None));
        let out = seen.clone();
        let program = Program::new(vec![
            builtins(),
            every_pass(move |c| {
                if c.current_pass() == CompilationStep::Generate {
                    let ty = c.resolve_symbol(&path("String"))?;
                    *out.borrow_mut() = ty.as_type().cloned();
                }
                Ok(())
            }),
        ]);
        Compiler::new(&DEFAULT_SECTIONS)
            .compile(&program, CompilationStep::Generate)
            .unwrap();

        let ty = seen.borrow().clone().unwrap();
        assert!(ty.is_reference());
        assert_eq!(ty.size(), SizeSpecifier::Qword);
        assert_eq!(ty.size_of().unwrap(), 4);
    }

    #[test]
    fn array_offsets() {
        let settings = CompilerSettings::default();
        assert_eq!(array_data_offset(&settings, 1), 8);
        assert_eq!(array_data_offset(&settings, 8), 8);
        assert_eq!(array_data_offset(&settings, 12), 16);
        assert_eq!(array_data_offset(&settings, 24), 32);
        assert_eq!(array_data_offset(&settings, 1000), 64);

        let narrow = settings.with_max_array_alignment(16);
        assert_eq!(array_data_offset(&narrow, 24), 16);
    }

    #[test]
    fn array_fields() {
        let values = resolve_names(
            CompilerSettings::default(),
            &["Bytes.count", "Bytes.data", "Points.data"],
        );
        assert_eq!(values, vec!["0", "8", "32"]);
    }

    #[test]
    fn escapes() {
        assert_eq!(nasm_string("hi").unwrap(), "\"hi\"");
        assert_eq!(nasm_string("a\\nb").unwrap(), "\"a\", 0ah, \"b\"");
        assert_eq!(nasm_string("\\t\\\\").unwrap(), "09h, '\\'");
        assert_eq!(nasm_string("say \"x\"").unwrap(), "'say \"x\"'");
        assert_eq!(nasm_string("\\u(e9)").unwrap(), "`\\U000000e9`");
        assert_eq!(nasm_string("").unwrap(), "");
    }

    #[test]
    fn bad_escapes() {
        assert!(nasm_string("oops\\").is_err());
        assert!(nasm_string("\\q").is_err());
        assert!(nasm_string("\\u(zz)").is_err());
        assert!(nasm_string("\\u()").is_err());
        assert!(nasm_string("\\u(123456789)").is_err());
        assert!(nasm_string("\\u12").is_err());
    }

    #[test]
    fn literals_go_to_data() {
        let mut compiler = Compiler::new(&DEFAULT_SECTIONS);
        let string = string_literal(&mut compiler, "ok\\n").unwrap();
        let c_string = c_string_literal(&mut compiler, "ok").unwrap();
        assert_eq!(string.kind(), OperandKind::Reference);
        assert_eq!(string.text().to_string(), "[L0__anonymous_string]");
        assert_eq!(c_string.text().to_string(), "[L2__anonymous_c_string]");

        compiler
            .compile(&Program::default(), CompilationStep::Generate)
            .unwrap();
        assert_eq!(
            compiler.section_output(DATA_SECTION).unwrap(),
            "L0__anonymous_string:\n\
             \tdd L1__end_of_string - L0__anonymous_string - 5\n\
             \tdb \"ok\", 0ah, 0\n\
             L1__end_of_string:\n\
             L2__anonymous_c_string:\n\
             \tdb \"ok\", 0\n"
        );
    }

    #[test]
    fn empty_literals_are_just_the_terminator() {
        let mut compiler = Compiler::new(&DEFAULT_SECTIONS);
        string_literal(&mut compiler, "").unwrap();
        c_string_literal(&mut compiler, "").unwrap();
        compiler
            .compile(&Program::default(), CompilationStep::Generate)
            .unwrap();

        let data = compiler.section_output(DATA_SECTION).unwrap();
        assert!(!data.contains("db ,"), "{data}");
        assert_eq!(
            data,
            "L0__anonymous_string:\n\
             \tdd L1__end_of_string - L0__anonymous_string - 5\n\
             \tdb 0\n\
             L1__end_of_string:\n\
             L2__anonymous_c_string:\n\
             \tdb 0\n"
        );
    }
}
