//! Building blocks translators assemble programs from.
//!
//! Every helper returns actions or programs that behave the same in all three
//! passes, so they can be concatenated freely.
//!
//! Control flow opens anonymous scopes for its bodies. The labels a
//! construct jumps to are created during generation and kept in the
//! persistent data of the enclosing scope until the construct closes.

use oasm_compiler::{
    CompilationStep, CompileError, Compiler, CompilerAction, DATA_SECTION, Identifier,
    PROGRAM_SECTION, Program, Result, SymbolString, action, every_pass, in_pass,
};

/// Wrap the program of one source file.
pub fn file(name: &str, body: Program) -> Program {
    let name = name.to_string();
    body.wrapped(
        every_pass(move |compiler| compiler.enter_file(&name)),
        every_pass(|compiler| compiler.exit_file()),
    )
}

/// Import global scope `path` into the current file.
pub fn using(path: Vec<Identifier>) -> CompilerAction {
    action(move |compiler, pass| match pass {
        CompilationStep::Declare => Ok(()),
        _ => compiler.using_scope(&path),
    })
}

/// Wrap `body` in global scope `path`.
pub fn namespace(path: Vec<Identifier>, body: Program) -> Program {
    body.wrapped(
        every_pass(move |compiler| compiler.enter_global(&path)),
        every_pass(|compiler| compiler.exit_global()),
    )
}

/// Declare a constant during the declare pass.
pub fn constant(name: &str, value: &str) -> CompilerAction {
    let name = name.to_string();
    let value = value.to_string();
    in_pass(CompilationStep::Declare, move |compiler| {
        compiler.declare_constant(&name, value.as_str(), None)
    })
}

/// Emit one line of code.
pub fn instruction(line: &str) -> CompilerAction {
    emit(line, PROGRAM_SECTION)
}

/// Emit one line of data.
pub fn data(line: &str) -> CompilerAction {
    emit(line, DATA_SECTION)
}

fn emit(line: &str, section: &'static str) -> CompilerAction {
    let line = line.to_string();
    in_pass(CompilationStep::Generate, move |compiler| {
        compiler.generate(line.as_str(), section)
    })
}

/// Emit a line built from resolved symbols.
pub fn generate_with(
    build: impl Fn(&mut Compiler) -> Result<SymbolString> + 'static,
) -> CompilerAction {
    in_pass(CompilationStep::Generate, move |compiler| {
        let line = build(compiler)?;
        compiler.generate(line, PROGRAM_SECTION)
    })
}

// ============================================================================
// Control flow
// ============================================================================

/// The condition code with the opposite meaning, `z` <-> `nz`.
pub fn invert_condition(condition: &str) -> String {
    match condition.strip_prefix('n') {
        Some(rest) => rest.to_string(),
        None => format!("n{condition}"),
    }
}

fn anonymous(body: &Program) -> Program {
    body.wrapped(
        every_pass(|compiler| compiler.enter_anonymous()),
        every_pass(|compiler| compiler.exit_anonymous()),
    )
}

/// Create a label and remember it in the current scope.
fn remember_label(compiler: &mut Compiler, key: &str) -> String {
    let label = compiler.label(key);
    compiler.set_persistent(key, label.as_str());
    label
}

fn recall_label(compiler: &Compiler, key: &str) -> Result<String> {
    compiler.persistent(key).ok_or_else(|| {
        CompileError::internal(format!("no '{key}' label in the current scope"))
    })
}

/// `if` with an optional `else`.
///
/// `condition` sets the flags; `body` runs when condition code `code` holds.
pub fn if_statement(
    code: &str,
    condition: Program,
    body: Program,
    else_body: Option<Program>,
) -> Program {
    let inverted = invert_condition(code);
    let has_else = else_body.is_some();

    let skip = in_pass(CompilationStep::Generate, move |compiler| {
        let end = remember_label(compiler, "end_of_if");
        compiler.generate(format!("j{inverted} {end}"), PROGRAM_SECTION)
    });
    let end_of_if = in_pass(CompilationStep::Generate, move |compiler| {
        if has_else {
            let end = remember_label(compiler, "end_of_else");
            compiler.generate(format!("jmp {end}"), PROGRAM_SECTION)?;
        }
        let end = recall_label(compiler, "end_of_if")?;
        compiler.generate(format!("{end}:"), PROGRAM_SECTION)
    });

    let mut actions: Vec<CompilerAction> = condition.iter().cloned().collect();
    actions.push(skip);
    actions.extend(anonymous(&body).iter().cloned());
    actions.push(end_of_if);

    if let Some(else_body) = else_body {
        actions.extend(anonymous(&else_body).iter().cloned());
        actions.push(in_pass(CompilationStep::Generate, |compiler| {
            let end = recall_label(compiler, "end_of_else")?;
            compiler.generate(format!("{end}:"), PROGRAM_SECTION)
        }));
    }
    Program::new(actions)
}

/// A loop checking its condition after each iteration.
///
/// `init` runs once inside the loop scope, `advance` after every iteration.
pub fn do_loop(
    init: Option<Program>,
    body: Program,
    advance: Option<Program>,
    code: &str,
    condition: Program,
) -> Program {
    let code = code.to_string();

    let mut inner: Vec<CompilerAction> = init.map(|p| p.iter().cloned().collect()).unwrap_or_default();
    inner.push(in_pass(CompilationStep::Generate, |compiler| {
        let start = remember_label(compiler, "start_of_loop");
        compiler.generate(format!("{start}:"), PROGRAM_SECTION)
    }));
    inner.extend(body.iter().cloned());
    if let Some(advance) = advance {
        inner.extend(advance.iter().cloned());
    }
    inner.extend(condition.iter().cloned());
    inner.push(in_pass(CompilationStep::Generate, move |compiler| {
        let start = recall_label(compiler, "start_of_loop")?;
        compiler.generate(format!("j{code} {start}"), PROGRAM_SECTION)
    }));

    anonymous(&Program::new(inner))
}

/// A loop checking its condition before each iteration.
pub fn for_loop(
    init: Option<Program>,
    code: &str,
    condition: Program,
    advance: Option<Program>,
    body: Program,
) -> Program {
    let inverted = invert_condition(code);

    let mut outer: Vec<CompilerAction> = init.map(|p| p.iter().cloned().collect()).unwrap_or_default();
    outer.extend(condition.iter().cloned());
    outer.push(in_pass(CompilationStep::Generate, move |compiler| {
        let end = remember_label(compiler, "end_of_loop");
        compiler.generate(format!("j{inverted} {end}"), PROGRAM_SECTION)
    }));
    outer.extend(do_loop(None, body, advance, code, condition).iter().cloned());
    outer.push(in_pass(CompilationStep::Generate, |compiler| {
        let end = recall_label(compiler, "end_of_loop")?;
        compiler.generate(format!("{end}:"), PROGRAM_SECTION)
    }));

    anonymous(&Program::new(outer))
}

/// `while` loop: [`for_loop`] without initialisation or advance step.
pub fn while_loop(code: &str, condition: Program, body: Program) -> Program {
    for_loop(None, code, condition, None, body)
}

/// Program running `actions` in order.
pub fn sequence(actions: impl IntoIterator<Item = CompilerAction>) -> Program {
    actions.into_iter().collect()
}

/// Concatenate programs.
pub fn concat(programs: impl IntoIterator<Item = Program>) -> Program {
    programs
        .into_iter()
        .flat_map(|p| p.iter().cloned().collect::<Vec<_>>())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use oasm_compiler::{DEFAULT_SECTIONS, path};

    fn emit_in_function(body: Program) -> String {
        let program = body.wrapped(
            every_pass(|c| c.enter_local("f")),
            action(|c, pass| {
                if pass == CompilationStep::Generate {
                    c.set_stack_size(0)?;
                }
                c.exit_local()
            }),
        );
        let mut compiler = Compiler::new(&DEFAULT_SECTIONS);
        compiler.compile(&program, CompilationStep::Generate).unwrap();
        compiler.section_output(PROGRAM_SECTION).unwrap()
    }

    #[test]
    fn inverted_conditions() {
        assert_eq!(invert_condition("z"), "nz");
        assert_eq!(invert_condition("nz"), "z");
        assert_eq!(invert_condition("ge"), "nge");
    }

    #[test]
    fn if_without_else() {
        let out = emit_in_function(if_statement(
            "z",
            sequence([instruction("test rax, rax")]),
            sequence([instruction("inc rbx")]),
            None,
        ));
        assert_eq!(
            out,
            "test rax, rax\njnz L0_f_end_of_if\ninc rbx\nL0_f_end_of_if:\n"
        );
    }

    #[test]
    fn if_with_else() {
        let out = emit_in_function(if_statement(
            "e",
            sequence([instruction("cmp rax, 1")]),
            sequence([instruction("inc rbx")]),
            Some(sequence([instruction("dec rbx")])),
        ));
        assert_eq!(
            out,
            "cmp rax, 1\njne L0_f_end_of_if\ninc rbx\njmp L1_f_end_of_else\n\
             L0_f_end_of_if:\ndec rbx\nL1_f_end_of_else:\n"
        );
    }

    #[test]
    fn while_checks_before_and_after() {
        let out = emit_in_function(while_loop(
            "nz",
            sequence([instruction("test rcx, rcx")]),
            sequence([instruction("dec rcx")]),
        ));
        assert_eq!(
            out,
            "test rcx, rcx\njz L0_f_end_of_loop\nL1_f_start_of_loop:\ndec rcx\n\
             test rcx, rcx\njnz L1_f_start_of_loop\nL0_f_end_of_loop:\n"
        );
    }

    #[test]
    fn nested_ifs_keep_their_labels() {
        let inner = if_statement(
            "z",
            sequence([instruction("test rdx, rdx")]),
            sequence([instruction("nop")]),
            None,
        );
        let out = emit_in_function(if_statement(
            "z",
            sequence([instruction("test rax, rax")]),
            inner,
            None,
        ));
        assert_eq!(
            out,
            "test rax, rax\njnz L0_f_end_of_if\ntest rdx, rdx\njnz L1_f_end_of_if\nnop\n\
             L1_f_end_of_if:\nL0_f_end_of_if:\n"
        );
    }

    #[test]
    fn files_and_usings() {
        let program = concat([
            file(
                "lib.oasm",
                namespace(
                    path("Lib"),
                    sequence([constant("answer", "42")]),
                ),
            ),
            file(
                "main.oasm",
                sequence([
                    using(path("Lib")),
                    generate_with(|c| {
                        let answer = c.resolve_symbol(&path("answer"))?;
                        Ok(SymbolString::from("mov rax,") + answer)
                    }),
                ]),
            ),
        ]);
        let mut compiler = Compiler::new(&DEFAULT_SECTIONS);
        compiler.compile(&program, CompilationStep::Generate).unwrap();
        assert_eq!(compiler.section_output(PROGRAM_SECTION).unwrap(), "mov rax, 42\n");
    }
}
