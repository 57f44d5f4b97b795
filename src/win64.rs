//! Win64 calling convention.
//!
//! The first four arguments travel in `rcx`, `rdx`, `r8` and `r9`, the rest
//! on the stack above a 32 byte shadow area. Results come back in `rax`.
//!
//! A function frame is allocated once in the prologue with `sub rsp, N`
//! and released by every return with `add rsp, N`. `N` is only known after
//! the body was generated, so both lines wait for the frame size. Frames of
//! functions that call others are padded to the stack alignment.
//!
//! ## Components
//!
//! - [`Win64`]: the [`Backend`] implementation
//! - [`kernel32`]: declarations of the Kernel32 imports
//! - [`entry_point`]: the process entry stub
//! - [`assemble`]: compile a program into one NASM listing

use std::rc::Rc;

use oasm_compiler::{
    Backend, CallSite, CompilationStep, CompileError, Compiler, CompilerAction, CompilerEvent,
    CompilerSettings, DATA_SECTION, DEFAULT_SECTIONS, FunctionMetadata, FunctionSymbol,
    Identifier, Operand, OperandKind, PROGRAM_SECTION, Parameter, Placeholder, Program,
    Register, Result, SizeSpecifier, Symbol, SymbolString, TypeRef, UNINITIALISED_SECTION,
    ValueType, action, builtins::builtins, in_pass,
};
use oasm_compiler::stack::StackRef;
use oasm_compiler::symbol::DeferredSymbol;

/// Argument registers, in parameter order.
const PARAMETER_REGISTERS: [&str; 4] = ["rcx", "rdx", "r8", "r9"];

/// Minimum stack area reserved for the arguments of a call.
const SHADOW_SPACE: i64 = 32;

/// Size of a return address on the stack.
const RETURN_ADDRESS: i64 = 8;

/// The Win64 backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct Win64;

impl Win64 {
    pub fn new() -> Self {
        Self
    }

    /// The backend as a shared trait object, for call and return actions.
    pub fn shared() -> Rc<dyn Backend> {
        Rc::new(Self)
    }
}

impl Backend for Win64 {
    fn function(&self, name: &str, parameters: Vec<(Rc<TypeRef>, String)>, body: Program) -> Program {
        body.wrapped(prologue(name, parameters), epilogue())
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    fn call(&self, compiler: &mut Compiler, call: &CallSite) -> Result<()> {
        let return_target = match call.return_targets() {
            [] => None,
            [target] => Some(target),
            _ => {
                return Err(CompileError::language(
                    "the Win64 ABI only supports a single return target",
                ));
            }
        };

        let arguments = call.arguments();
        let argument_stack = (arguments.len() as i64 * 8).max(SHADOW_SPACE);
        compiler.move_stack_pointer(-argument_stack)?;

        // registers and immediates past the fourth argument, before the
        // shuffle overwrites any of the parameter registers
        for (i, argument) in arguments.iter().enumerate().skip(PARAMETER_REGISTERS.len()) {
            if matches!(argument.kind(), OperandKind::Register | OperandKind::Immediate) {
                let line = SymbolString::from(format!(
                    "mov {} [rsp + {}],",
                    argument.size().to_nasm()?,
                    i * 8
                )) + nasm(argument)?;
                compiler.generate(line, PROGRAM_SECTION)?;
            }
        }

        let mut moves = Vec::new();
        for (i, argument) in arguments.iter().take(PARAMETER_REGISTERS.len()).enumerate() {
            if let Some(register) = argument.as_register() {
                let source = match register.size() {
                    SizeSpecifier::Byte => register.resized(SizeSpecifier::Word)?,
                    _ => register.clone(),
                };
                let destination = Register::sized(PARAMETER_REGISTERS[i], source.size())?;
                moves.push((source, destination));
            }
        }
        generate_shuffle(compiler, moves)?;

        let mut lines: Vec<SymbolString> = Vec::new();

        // a high byte register was moved as a word; bring the byte down
        for (i, argument) in arguments.iter().take(PARAMETER_REGISTERS.len()).enumerate() {
            if let Some(register) = argument.as_register() {
                if register.size() == SizeSpecifier::Byte && register.name().ends_with('h') {
                    let word = Register::sized(PARAMETER_REGISTERS[i], SizeSpecifier::Word)?;
                    lines.push(format!("shr {word}, 8").into());
                }
            }
        }

        for (i, argument) in arguments.iter().take(PARAMETER_REGISTERS.len()).enumerate() {
            match argument.kind() {
                OperandKind::Register => {}
                OperandKind::Reference => {
                    lines.push(
                        SymbolString::from(format!("lea {},", PARAMETER_REGISTERS[i]))
                            + argument.text().clone(),
                    );
                }
                OperandKind::Immediate | OperandKind::Memory => {
                    let destination =
                        Operand::register_sized(PARAMETER_REGISTERS[i], argument.size(), true)?;
                    lines.push(
                        SymbolString::from(format!("mov {},", nasm(&destination)?))
                            + nasm(&argument.resize(destination.size())?)?,
                    );
                }
            }
        }

        // memory past the fourth argument goes through rax, which is volatile
        for (i, argument) in arguments.iter().enumerate().skip(PARAMETER_REGISTERS.len()) {
            match argument.kind() {
                OperandKind::Memory => {
                    let rax = Register::sized("rax", argument.size())?;
                    lines.push(SymbolString::from(format!("mov {rax},")) + nasm(argument)?);
                    lines.push(format!("mov [rsp + {}], {rax}", i * 8).into());
                }
                OperandKind::Reference => {
                    lines.push(SymbolString::from("lea rax,") + argument.text().clone());
                    lines.push(format!("mov [rsp + {}], rax", i * 8).into());
                }
                OperandKind::Register | OperandKind::Immediate => {}
            }
        }

        for line in lines {
            compiler.generate(line, PROGRAM_SECTION)?;
        }

        compiler.generate(
            SymbolString::from("call") + call.callee().text().clone(),
            PROGRAM_SECTION,
        )?;
        compiler.move_stack_pointer(argument_stack)?;

        if let Some(target) = return_target {
            store_result(compiler, target)?;
        }
        Ok(())
    }

    fn ret(&self, compiler: &mut Compiler, value: Option<&Operand>) -> Result<()> {
        if let Some(value) = value {
            match value.kind() {
                OperandKind::Reference => {
                    compiler.generate(
                        SymbolString::from("lea rax,") + value.text().clone(),
                        PROGRAM_SECTION,
                    )?;
                }
                _ if is_rax(value) => {}
                _ => {
                    let rax = Register::sized("rax", value.size())?;
                    compiler.generate(
                        SymbolString::from(format!("mov {rax},")) + nasm(value)?,
                        PROGRAM_SECTION,
                    )?;
                }
            }
        }

        let frame = compiler.current_frame()?;
        compiler.generate_deferred(
            frame_adjustment(frame, "add", false),
            CompilerEvent::StackSizeSet,
            PROGRAM_SECTION,
        )?;
        compiler.generate("ret", PROGRAM_SECTION)
    }
}

// ============================================================================
// Function frames
// ============================================================================

fn prologue(name: &str, parameters: Vec<(Rc<TypeRef>, String)>) -> CompilerAction {
    let name = name.to_string();
    action(move |compiler, pass| {
        let path = [Identifier::new(name.as_str())];
        match pass {
            CompilationStep::Declare => {
                let label = compiler.label(&name);
                if parameters.is_empty() {
                    compiler.declare_function(&name, label, FunctionMetadata::default())?;
                } else {
                    compiler.declare_function_placeholder(&name, parameters.clone(), move |p| {
                        Ok(FunctionSymbol::with_metadata(label, signature(p)?).into())
                    })?;
                }
                compiler.enter_local(&name)
            }
            CompilationStep::ResolveDependencies => {
                let symbol = compiler.resolve_symbol(&path)?;
                if let Some(placeholder) = symbol.as_placeholder() {
                    for (type_ref, _) in placeholder.parameters().unwrap_or_default() {
                        type_ref.declare_dependency(compiler, placeholder)?;
                    }
                }
                compiler.enter_local(&name)
            }
            CompilationStep::Generate => {
                let symbol = compiler.resolve_symbol(&path)?;
                let metadata = match &symbol {
                    Symbol::Function(function) => function.metadata().cloned(),
                    other => {
                        return Err(CompileError::internal(format!(
                            "function '{name}' resolved to a {} while generating its prologue",
                            other.kind_name()
                        )));
                    }
                };

                compiler.generate(SymbolString::from(symbol) + ":", PROGRAM_SECTION)?;
                compiler.enter_local(&name)?;
                compiler.move_stack_pointer(-RETURN_ADDRESS)?;

                let parameters = metadata.map(|m| m.parameters.clone()).unwrap_or_default();
                for (i, parameter) in parameters.iter().enumerate() {
                    let offset = RETURN_ADDRESS + i as i64 * 8;
                    compiler.declare_existing_stack_variable(
                        parameter.value_type.clone(),
                        &parameter.name,
                        offset,
                    )?;
                    // spill register parameters into their shadow slots
                    if let Some(register) = PARAMETER_REGISTERS.get(i) {
                        compiler.generate(format!("mov [rsp + {offset}], {register}"), PROGRAM_SECTION)?;
                    }
                }

                let frame = compiler.current_frame()?;
                compiler.generate_deferred(
                    frame_adjustment(frame, "sub", true),
                    CompilerEvent::StackSizeSet,
                    PROGRAM_SECTION,
                )
            }
        }
    })
}

fn epilogue() -> CompilerAction {
    action(|compiler, pass| {
        if pass == CompilationStep::Generate {
            let mut size = compiler.max_stack_size()?;
            let alignment = compiler.settings().stack_alignment;
            if !compiler.is_leaf()? && alignment > 0 && size % alignment != 0 {
                // padding stays allocated until the function returns
                let padding = alignment - size % alignment;
                compiler.allocate_dummy_variable(padding)?;
                size += padding;
            }
            compiler.move_stack_pointer(RETURN_ADDRESS)?;
            compiler.set_stack_size(size)?;
        }
        compiler.exit_local()
    })
}

fn signature(placeholder: &Placeholder) -> Result<FunctionMetadata> {
    let parameters = placeholder.parameters().ok_or_else(|| {
        CompileError::internal(format!("function placeholder {placeholder} has no parameters"))
    })?;
    let mut metadata = FunctionMetadata::default();
    for (type_ref, name) in parameters {
        type_ref.resolve_dependency()?;
        metadata.parameters.push(Parameter {
            name: name.clone(),
            value_type: type_ref.get()?,
        });
    }
    Ok(metadata)
}

/// `sub rsp, N` or `add rsp, N` for the part of the frame below the return address.
fn frame_adjustment(frame: StackRef, instruction: &'static str, user_error: bool) -> SymbolString {
    let deferred = DeferredSymbol::new(move || {
        let size = i64::from(frame.borrow().size()?) - RETURN_ADDRESS;
        if size > 0 {
            Ok(Some(format!("{instruction} rsp, {size}")))
        } else if size == 0 {
            Ok(None)
        } else if user_error {
            Err(CompileError::language("encountered a negative stack size"))
        } else {
            Err(CompileError::internal(format!(
                "attempted to return while the stack size ({size}) is negative"
            )))
        }
    });
    SymbolString::from(Symbol::from(deferred))
}

// ============================================================================
// Operand moves
// ============================================================================

fn nasm(operand: &Operand) -> Result<SymbolString> {
    operand.nasm()?.ok_or_else(|| {
        CompileError::internal(format!(
            "operand '{}' has no direct form and needs 'lea'",
            operand.text()
        ))
    })
}

fn is_rax(operand: &Operand) -> bool {
    operand
        .as_register()
        .is_some_and(|r| r.base() == "rax" && r.name() != "ah")
}

fn store_result(compiler: &mut Compiler, target: &Operand) -> Result<()> {
    if target.kind() == OperandKind::Reference {
        return Err(CompileError::type_mismatch(
            "a return value can't be stored into an address",
        ));
    }
    if target.as_register().is_some_and(|r| r.name() == "ah") {
        return compiler.generate("shl ax, 8", PROGRAM_SECTION);
    }
    if is_rax(target) {
        return Ok(());
    }
    let rax = Register::sized("rax", target.size())?;
    compiler.generate(
        SymbolString::from("mov") + nasm(target)? + "," + rax.name(),
        PROGRAM_SECTION,
    )
}

/// Emit register moves so that every destination receives its source's
/// original value. Cycles are broken with `xchg`.
fn generate_shuffle(compiler: &mut Compiler, mut moves: Vec<(Register, Register)>) -> Result<()> {
    while !moves.is_empty() {
        let free = moves
            .iter()
            .position(|(_, dst)| !moves.iter().any(|(src, _)| src.base() == dst.base()));

        if let Some(i) = free {
            let (source, destination) = moves.remove(i);
            compiler.generate(format!("mov {destination}, {source}"), PROGRAM_SECTION)?;
            continue;
        }

        // only cycles are left
        let (mut source, mut destination) = moves.remove(0);
        if source.base() == destination.base() {
            continue;
        }
        let reader = moves
            .iter()
            .position(|(src, _)| src.base() == destination.base())
            .ok_or_else(|| CompileError::internal("register shuffle lost track of a cycle"))?;

        let wanted = moves[reader].0.size();
        if wanted.bytes() > source.size().bytes() {
            source = source.resized(wanted)?;
            destination = destination.resized(wanted)?;
        }
        moves[reader].0 = source.resized(wanted)?;
        compiler.generate(format!("xchg {destination}, {source}"), PROGRAM_SECTION)?;
    }
    Ok(())
}

// ============================================================================
// Platform declarations
// ============================================================================

/// Declare the Kernel32 imports inside global scope `Kernel32`.
pub fn kernel32() -> CompilerAction {
    const IMPORTS: [(&str, &str, &[(SizeSpecifier, &str)]); 7] = [
        ("ExitProcess", "ExitProcess", &[(SizeSpecifier::Dword, "exitCode")]),
        ("GetStdHandle", "GetStdHandle", &[(SizeSpecifier::Dword, "stdHandle")]),
        (
            "WriteFile",
            "WriteFile",
            &[
                (SizeSpecifier::Dword, "file"),
                (SizeSpecifier::Qword, "buffer"),
                (SizeSpecifier::Dword, "numberOfBytesToWrite"),
                (SizeSpecifier::Qword, "numberOfBytesWritten"),
                (SizeSpecifier::Qword, "overlapped"),
            ],
        ),
        (
            "ReadFile",
            "ReadFile",
            &[
                (SizeSpecifier::Dword, "file"),
                (SizeSpecifier::Qword, "buffer"),
                (SizeSpecifier::Dword, "numberOfBytesToRead"),
                (SizeSpecifier::Qword, "numberOfBytesRead"),
                (SizeSpecifier::Qword, "overlapped"),
            ],
        ),
        (
            "WriteConsole",
            "WriteConsoleA",
            &[
                (SizeSpecifier::Dword, "console"),
                (SizeSpecifier::Qword, "buffer"),
                (SizeSpecifier::Dword, "numberOfBytesToWrite"),
                (SizeSpecifier::Qword, "numberOfBytesWritten"),
                (SizeSpecifier::Qword, "reserved"),
            ],
        ),
        (
            "ReadConsole",
            "ReadConsoleA",
            &[
                (SizeSpecifier::Dword, "console"),
                (SizeSpecifier::Qword, "buffer"),
                (SizeSpecifier::Dword, "numberOfBytesToRead"),
                (SizeSpecifier::Qword, "numberOfBytesRead"),
                (SizeSpecifier::Qword, "inputControl"),
            ],
        ),
        ("SetConsoleOutputCP", "SetConsoleOutputCP", &[(SizeSpecifier::Dword, "codepage")]),
    ];

    in_pass(CompilationStep::Declare, |compiler| {
        compiler.enter_file("Kernel32.dll")?;
        compiler.enter_global(&[Identifier::new("Kernel32")])?;
        for (name, label, parameters) in IMPORTS {
            let metadata = FunctionMetadata {
                parameters: parameters
                    .iter()
                    .map(|(size, name)| Parameter {
                        name: name.to_string(),
                        value_type: ValueType::sized(*size),
                    })
                    .collect(),
            };
            compiler.declare_function(name, label, metadata)?;
        }
        compiler.exit_global()?;
        compiler.exit_file()
    })
}

/// The process entry stub calling `main`, after `init` when given.
pub fn entry_point(init: Option<Vec<Identifier>>) -> CompilerAction {
    in_pass(CompilationStep::Generate, move |compiler| {
        let entry = compiler.resolve_symbol(&[Identifier::new("main")])?.nasm()?;
        // shadow space plus alignment
        compiler.generate("main:", PROGRAM_SECTION)?;
        compiler.generate("sub rsp, 40", PROGRAM_SECTION)?;
        if let Some(init) = &init {
            let init = compiler.resolve_symbol(init)?.nasm()?;
            compiler.generate(format!("call {init}"), PROGRAM_SECTION)?;
        }
        compiler.generate(format!("call {entry}"), PROGRAM_SECTION)?;
        compiler.generate("xor ecx, ecx", PROGRAM_SECTION)?;
        compiler.generate("jmp ExitProcess", PROGRAM_SECTION)
    })
}

/// Compile `program` with the builtins and Kernel32 imports into one listing.
///
/// The listing holds the text, data and bss sections in that order.
pub fn assemble(program: &Program, settings: CompilerSettings) -> Result<String> {
    let platform = Program::new(vec![builtins(), kernel32()]);
    let mut compiler = Compiler::with_settings(&DEFAULT_SECTIONS, settings);
    compiler.compile(&platform.concat(program), CompilationStep::Generate)?;

    let mut listing = String::new();
    for (section, header) in [
        (PROGRAM_SECTION, "section .text"),
        (DATA_SECTION, "section .data"),
        (UNINITIALISED_SECTION, "section .bss"),
    ] {
        listing.push_str(header);
        listing.push('\n');
        listing.push_str(&compiler.section_output(section).unwrap_or_default());
    }
    log::debug!("assembled listing of {} byte(s)", listing.len());
    Ok(listing)
}
