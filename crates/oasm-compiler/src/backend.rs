//! Calling-convention backends.
//!
//! A [`Backend`] knows how functions are entered, called and left on one
//! platform. The core hands it fully resolved [`CallSite`]s; translators
//! wire calls and returns into programs with [`call_action`] and
//! [`return_action`], which only do work during generation.

use std::rc::Rc;

use oasm_core::{CompilationStep, CompileError, Result, SizeSpecifier};

use crate::action::{CompilerAction, Program, action, in_pass};
use crate::compiler::Compiler;
use crate::identifier::{Identifier, display_path};
use crate::line::SymbolString;
use crate::operand::{Operand, OperandKind, Register};
use crate::symbol::FunctionMetadata;
use crate::value_type::{TypeRef, ValueType};

/// A platform calling convention.
pub trait Backend {
    /// Wrap `body` with the prologue and epilogue of function `name`.
    fn function(&self, name: &str, parameters: Vec<(Rc<TypeRef>, String)>, body: Program) -> Program;

    /// Generate a call.
    fn call(&self, compiler: &mut Compiler, call: &CallSite) -> Result<()>;

    /// Generate a return, moving `value` into place first.
    fn ret(&self, compiler: &mut Compiler, value: Option<&Operand>) -> Result<()>;
}

// ============================================================================
// Arguments
// ============================================================================

/// An argument or return target as written in source.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    /// A register by name.
    Register(String),
    /// A literal value.
    Immediate(String),
    /// The value stored at a symbol, `[path]`.
    Memory {
        path: Vec<Identifier>,
        size: Option<SizeSpecifier>,
    },
    /// The address of a symbol.
    Address(Vec<Identifier>),
}

impl Argument {
    pub fn register(name: impl Into<String>) -> Self {
        Argument::Register(name.into())
    }

    pub fn immediate(text: impl Into<String>) -> Self {
        Argument::Immediate(text.into())
    }

    pub fn memory(path: Vec<Identifier>) -> Self {
        Argument::Memory { path, size: None }
    }

    /// Turn the argument into an operand, checking it against `expected`.
    pub fn to_operand(
        &self,
        compiler: &mut Compiler,
        name: &str,
        expected: Option<&ValueType>,
    ) -> Result<Operand> {
        let expected_size = expected.map(ValueType::size).filter(|s| s.is_defined());
        let mismatch = |found: SizeSpecifier, wanted: SizeSpecifier| {
            CompileError::type_mismatch(format!(
                "operand size mismatch for '{name}': expected {wanted}, got {found}"
            ))
        };

        match self {
            Argument::Register(register) => {
                let register = Register::parse(register)?;
                if let Some(wanted) = expected_size.filter(|w| *w != register.size()) {
                    return Err(mismatch(register.size(), wanted));
                }
                Ok(Operand::register(register))
            }
            Argument::Immediate(text) => {
                Operand::immediate(expected_size.unwrap_or(SizeSpecifier::Qword), text.as_str())
            }
            Argument::Memory { path, size } => {
                let symbol = compiler.resolve_symbol(path)?;
                if let (Some(explicit), Some(wanted)) = (size, expected_size) {
                    if *explicit != wanted {
                        return Err(mismatch(*explicit, wanted));
                    }
                }
                let size = size
                    .or(expected_size)
                    .or_else(|| Some(symbol.size()).filter(|s| s.is_defined()))
                    .ok_or_else(|| {
                        CompileError::type_mismatch(format!(
                            "size of '{}' is unknown for '{name}'",
                            display_path(path)
                        ))
                    })?;
                Operand::memory(size, SymbolString::from("[") + symbol + "]")
            }
            Argument::Address(path) => {
                if let Some(wanted) = expected_size.filter(|w| *w != SizeSpecifier::Qword) {
                    return Err(mismatch(SizeSpecifier::Qword, wanted));
                }
                let symbol = compiler.resolve_symbol(path)?;
                Ok(Operand::reference(SymbolString::from("[") + symbol + "]"))
            }
        }
    }
}

// ============================================================================
// Call sites
// ============================================================================

/// A call with every operand resolved.
#[derive(Debug, Clone)]
pub struct CallSite {
    callee: Operand,
    metadata: Option<Rc<FunctionMetadata>>,
    arguments: Vec<Operand>,
    return_targets: Vec<Operand>,
}

impl CallSite {
    /// Check the operands against the callee's signature, if it has one.
    pub fn new(
        callee: Operand,
        metadata: Option<Rc<FunctionMetadata>>,
        arguments: Vec<Operand>,
        return_targets: Vec<Operand>,
    ) -> Result<Self> {
        if let Some(metadata) = &metadata {
            check_count(&callee.text().to_string(), metadata, arguments.len())?;
            for (parameter, argument) in metadata.parameters.iter().zip(&arguments) {
                let wanted = parameter.value_type.size();
                if argument.kind() != OperandKind::Reference
                    && wanted.is_defined()
                    && argument.size() != wanted
                {
                    return Err(CompileError::type_mismatch(format!(
                        "operand size mismatch for '{}': expected {wanted}, got {}",
                        parameter.name,
                        argument.size()
                    )));
                }
            }
        }
        Ok(Self {
            callee,
            metadata,
            arguments,
            return_targets,
        })
    }

    /// Resolve `target` and every argument in the current scope.
    pub fn resolve(
        compiler: &mut Compiler,
        target: &[Identifier],
        arguments: &[Argument],
        return_targets: &[Argument],
    ) -> Result<Self> {
        let function = compiler.resolve_symbol(target)?;
        let metadata = function.as_function().and_then(|f| f.metadata()).cloned();
        if let Some(metadata) = &metadata {
            check_count(&display_path(target), metadata, arguments.len())?;
        }

        let mut operands = Vec::with_capacity(arguments.len());
        for (i, argument) in arguments.iter().enumerate() {
            let parameter = metadata.as_ref().map(|m| &m.parameters[i]);
            let name = parameter.map_or("unnamed parameter", |p| p.name.as_str());
            operands.push(argument.to_operand(compiler, name, parameter.map(|p| &p.value_type))?);
        }
        let targets = return_targets
            .iter()
            .map(|target| target.to_operand(compiler, "return target", None))
            .collect::<Result<Vec<_>>>()?;

        let callee = Operand::immediate(SizeSpecifier::Qword, function)?;
        Self::new(callee, metadata, operands, targets)
    }

    pub fn callee(&self) -> &Operand {
        &self.callee
    }

    pub fn metadata(&self) -> Option<&Rc<FunctionMetadata>> {
        self.metadata.as_ref()
    }

    pub fn arguments(&self) -> &[Operand] {
        &self.arguments
    }

    pub fn return_targets(&self) -> &[Operand] {
        &self.return_targets
    }
}

fn check_count(callee: &str, metadata: &FunctionMetadata, found: usize) -> Result<()> {
    let expected = metadata.parameters.len();
    if expected != found {
        return Err(CompileError::type_mismatch(format!(
            "parameter count mismatch: '{callee}()' expects {expected} parameter(s), got {found}"
        )));
    }
    Ok(())
}

// ============================================================================
// Actions
// ============================================================================

/// An action generating a call to `target` through `backend`.
pub fn call_action(
    backend: Rc<dyn Backend>,
    target: Vec<Identifier>,
    arguments: Vec<Argument>,
    return_targets: Vec<Argument>,
) -> CompilerAction {
    in_pass(CompilationStep::Generate, move |compiler| {
        let call = CallSite::resolve(compiler, &target, &arguments, &return_targets)?;
        backend.call(compiler, &call)?;
        compiler.declare_call()
    })
}

/// An action generating a return through `backend`.
pub fn return_action(backend: Rc<dyn Backend>, value: Option<Argument>) -> CompilerAction {
    action(move |compiler, pass| {
        if !compiler.is_local() {
            return Err(CompileError::language("return statement in a global scope"));
        }
        if pass != CompilationStep::Generate {
            return Ok(());
        }
        let operand = value
            .as_ref()
            .map(|v| v.to_operand(compiler, "return value", None))
            .transpose()?;
        backend.ret(compiler, operand.as_ref())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::every_pass;
    use crate::compiler::{DEFAULT_SECTIONS, PROGRAM_SECTION};
    use crate::identifier::path;
    use crate::symbol::Parameter;
    use std::cell::RefCell;

    /// Records call sites and emits one line per call.
    #[derive(Default)]
    struct Recording {
        calls: RefCell<Vec<String>>,
    }

    impl Backend for Recording {
        fn function(&self, name: &str, _: Vec<(Rc<TypeRef>, String)>, body: Program) -> Program {
            let name = name.to_string();
            body.wrapped(
                every_pass(move |c| c.enter_local(&name)),
                every_pass(|c| c.exit_local()),
            )
        }

        fn call(&self, compiler: &mut Compiler, call: &CallSite) -> Result<()> {
            let mut line = SymbolString::from("call") + call.callee().text().clone();
            for argument in call.arguments() {
                if let Some(text) = argument.nasm()? {
                    line = line + "," + text;
                }
            }
            self.calls.borrow_mut().push(line.render()?.unwrap_or_default());
            compiler.generate(line, PROGRAM_SECTION)
        }

        fn ret(&self, compiler: &mut Compiler, value: Option<&Operand>) -> Result<()> {
            if let Some(value) = value.and_then(|v| v.nasm().transpose()) {
                compiler.generate(SymbolString::from("mov rax,") + value?, PROGRAM_SECTION)?;
            }
            compiler.generate("ret", PROGRAM_SECTION)
        }
    }

    fn exit_process() -> FunctionMetadata {
        FunctionMetadata {
            parameters: vec![Parameter {
                name: "exitCode".into(),
                value_type: ValueType::sized(SizeSpecifier::Dword),
            }],
        }
    }

    fn declare_exit(c: &mut Compiler) -> Result<()> {
        c.enter_global(&path("Kernel32"))?;
        c.declare_function("ExitProcess", "ExitProcess", exit_process())?;
        c.exit_global()
    }

    #[test]
    fn call_sizes_immediates_from_signature() {
        let backend = Rc::new(Recording::default());
        let program = Program::new(vec![
            in_pass(CompilationStep::Declare, declare_exit),
            every_pass(|c| c.enter_local("main")),
            call_action(
                backend.clone(),
                path("Kernel32.ExitProcess"),
                vec![Argument::immediate("0")],
                vec![],
            ),
            in_pass(CompilationStep::Generate, |c| {
                assert!(!c.is_leaf()?);
                c.set_stack_size(0)
            }),
            every_pass(|c| c.exit_local()),
        ]);

        let mut compiler = Compiler::new(&DEFAULT_SECTIONS);
        compiler.compile(&program, CompilationStep::Generate).unwrap();
        assert_eq!(*backend.calls.borrow(), vec!["call ExitProcess, dword 0"]);
    }

    #[test]
    fn argument_count_mismatch() {
        let backend = Rc::new(Recording::default());
        let program = Program::new(vec![
            in_pass(CompilationStep::Declare, declare_exit),
            every_pass(|c| c.enter_local("main")),
            call_action(backend, path("Kernel32.ExitProcess"), vec![], vec![]),
            every_pass(|c| c.exit_local()),
        ]);

        let err = Compiler::new(&DEFAULT_SECTIONS)
            .compile(&program, CompilationStep::Generate)
            .unwrap_err();
        assert!(matches!(err.kind(), CompileError::TypeMismatch { .. }));
    }

    #[test]
    fn register_size_mismatch() {
        let backend = Rc::new(Recording::default());
        let program = Program::new(vec![
            in_pass(CompilationStep::Declare, declare_exit),
            every_pass(|c| c.enter_local("main")),
            call_action(
                backend,
                path("Kernel32.ExitProcess"),
                vec![Argument::register("rax")],
                vec![],
            ),
            every_pass(|c| c.exit_local()),
        ]);

        let err = Compiler::new(&DEFAULT_SECTIONS)
            .compile(&program, CompilationStep::Generate)
            .unwrap_err();
        assert!(err.to_string().contains("operand size mismatch for 'exitCode'"));
    }

    #[test]
    fn memory_arguments_take_the_symbol_size() {
        let mut compiler = Compiler::new(&DEFAULT_SECTIONS);
        let program = Program::new(vec![
            in_pass(CompilationStep::Declare, |c| {
                c.declare_constant("counter", "counter", Some(ValueType::sized(SizeSpecifier::Word)))
            }),
            in_pass(CompilationStep::Generate, |c| {
                let operand = Argument::memory(path("counter")).to_operand(c, "x", None)?;
                assert_eq!(operand.size(), SizeSpecifier::Word);
                assert_eq!(operand.nasm()?.unwrap().render()?.unwrap(), "word [counter]");

                let address = Argument::Address(path("counter")).to_operand(c, "x", None)?;
                assert!(address.nasm()?.is_none());
                Ok(())
            }),
        ]);
        compiler.compile(&program, CompilationStep::Generate).unwrap();
    }

    #[test]
    fn return_outside_function() {
        let backend = Rc::new(Recording::default());
        let program = Program::new(vec![return_action(backend, None)]);
        let err = Compiler::new(&DEFAULT_SECTIONS)
            .compile(&program, CompilationStep::Generate)
            .unwrap_err();
        assert!(matches!(err.kind(), CompileError::Language(_)));
    }

    #[test]
    fn return_moves_value() {
        let backend = Rc::new(Recording::default());
        let program = backend.function(
            "f",
            vec![],
            Program::new(vec![return_action(backend.clone(), Some(Argument::register("rbx")))]),
        );
        let mut compiler = Compiler::new(&DEFAULT_SECTIONS);
        compiler.compile(&program, CompilationStep::Generate).unwrap();
        assert_eq!(compiler.section_output(PROGRAM_SECTION).unwrap(), "mov rax, rbx\nret\n");
    }
}
