//! Whole listings produced through the Win64 backend.

mod common;

use common::{code, compile_error, lines, listing};
use oasm::builtins::string_literal;
use oasm::prelude::*;
use oasm::program::{file, if_statement, instruction, sequence};
use oasm::win64::entry_point;
use oasm::{CallSite, Operand, in_pass};

fn qword() -> std::rc::Rc<TypeRef> {
    TypeRef::sized(SizeSpecifier::Qword)
}

#[test]
fn minimal_program() {
    let backend = Win64::shared();
    let seven = Win64.function(
        "seven",
        Vec::new(),
        sequence([return_action(backend.clone(), Some(Argument::immediate("7")))]),
    );
    let main = Win64.function(
        "main",
        Vec::new(),
        sequence([
            call_action(
                backend.clone(),
                path("seven"),
                Vec::new(),
                vec![Argument::register("rax")],
            ),
            return_action(backend, None),
        ]),
    );

    let out = listing(&file("main.oasm", seven.concat(&main)));
    assert_eq!(
        out,
        "section .text\n\
         L0__seven:\n\
         mov rax, qword 7\n\
         ret\n\
         L1__main:\n\
         sub rsp, 40\n\
         call L0__seven\n\
         add rsp, 40\n\
         ret\n\
         section .data\n\
         section .bss\n"
    );
}

#[test]
fn parameters_are_spilled_to_the_shadow_space() {
    let backend = Win64::shared();
    let add = Win64.function(
        "add",
        vec![(qword(), "a".to_string()), (qword(), "b".to_string())],
        sequence([
            instruction("mov rax, rcx"),
            instruction("add rax, rdx"),
            return_action(backend, None),
        ]),
    );
    let out = code(&add);
    assert_eq!(
        lines(&out),
        vec![
            "L0__add:",
            "mov [rsp + 8], rcx",
            "mov [rsp + 16], rdx",
            "mov rax, rcx",
            "add rax, rdx",
            "ret",
        ]
    );
}

#[test]
fn fifth_argument_goes_on_the_stack() {
    let backend = Win64::shared();
    let parameters = ["a", "b", "c", "d", "e"]
        .into_iter()
        .map(|name| (qword(), name.to_string()))
        .collect();
    let sum = Win64.function(
        "sum",
        parameters,
        sequence([return_action(backend.clone(), None)]),
    );
    let main = Win64.function(
        "main",
        Vec::new(),
        sequence([
            call_action(
                backend.clone(),
                path("sum"),
                ["1", "2", "3", "4", "5"].into_iter().map(Argument::immediate).collect(),
                Vec::new(),
            ),
            return_action(backend, None),
        ]),
    );
    let out = code(&sum.concat(&main));

    assert!(out.contains("mov qword [rsp + 32], qword 5"), "{out}");
    assert!(out.contains("mov rcx, qword 1"), "{out}");
    assert!(out.contains("mov r9, qword 4"), "{out}");
    // five slots of eight bytes plus the return address fill a whole number of
    // alignment units, so the frame needs no padding
    assert!(out.contains("sub rsp, 40"), "{out}");

    let stack = out.find("[rsp + 32], qword 5").unwrap();
    let registers = out.find("mov rcx, qword 1").unwrap();
    let call = out.find("call L0__sum").unwrap();
    assert!(stack < registers && registers < call);
}

#[test]
fn register_arguments_are_shuffled() {
    let backend = Win64::shared();
    let swap = Win64.function(
        "swap",
        vec![(qword(), "a".to_string()), (qword(), "b".to_string())],
        sequence([return_action(backend.clone(), None)]),
    );
    let main = Win64.function(
        "main",
        Vec::new(),
        sequence([
            call_action(
                backend.clone(),
                path("swap"),
                vec![Argument::register("rdx"), Argument::register("rcx")],
                Vec::new(),
            ),
            return_action(backend, None),
        ]),
    );
    let out = code(&swap.concat(&main));
    assert!(out.contains("xchg rcx, rdx"), "{out}");
    assert!(!out.contains("mov rcx, rdx"), "{out}");
}

#[test]
fn argument_count_is_checked() {
    let backend = Win64::shared();
    let one = Win64.function(
        "one",
        vec![(qword(), "a".to_string())],
        sequence([return_action(backend.clone(), None)]),
    );
    let main = Win64.function(
        "main",
        Vec::new(),
        sequence([call_action(backend, path("one"), Vec::new(), Vec::new())]),
    );
    let err = compile_error(&one.concat(&main));
    assert!(matches!(err.kind(), CompileError::TypeMismatch { .. }));
}

#[test]
fn kernel32_imports_are_callable() {
    let backend = Win64::shared();
    let main = Win64.function(
        "main",
        Vec::new(),
        sequence([call_action(
            backend,
            path("Kernel32.ExitProcess"),
            vec![Argument::immediate("0")],
            Vec::new(),
        )]),
    );
    let out = listing(&main);
    assert!(out.contains("mov ecx, dword 0"), "{out}");
    assert!(out.contains("call ExitProcess"), "{out}");
}

#[test]
fn entry_point_calls_main() {
    let main = Win64.function("main", Vec::new(), sequence([instruction("xor eax, eax")]));
    let program = main.concat(&Program::new(vec![entry_point(None)]));
    let out = listing(&program);
    let out = lines(&out);

    let entry = out.iter().position(|l| *l == "main:").unwrap();
    assert_eq!(
        out[entry..entry + 5],
        ["main:", "sub rsp, 40", "call L0__main", "xor ecx, ecx", "jmp ExitProcess"]
    );
}

#[test]
fn string_literal_is_passed_by_address() {
    let body = Program::new(vec![in_pass(CompilationStep::Generate, |c| {
        let text = string_literal(c, "hi\\n")?;
        let callee = Operand::immediate(SizeSpecifier::Qword, "print")?;
        let call = CallSite::new(callee, None, vec![text], Vec::new())?;
        Win64.call(c, &call)?;
        c.declare_call()
    })]);
    let out = listing(&Win64.function("main", Vec::new(), body));

    let text = out.split("section .data\n").next().unwrap();
    assert!(text.contains("lea rcx, [L1_main_anonymous_string]"), "{text}");
    assert!(text.contains("call print"), "{text}");

    let data = out
        .split("section .data\n")
        .nth(1)
        .and_then(|rest| rest.split("section .bss\n").next())
        .unwrap();
    assert_eq!(
        data,
        "L1_main_anonymous_string:\n\
         \tdd L2_main_end_of_string - L1_main_anonymous_string - 5\n\
         \tdb \"hi\", 0ah, 0\n\
         L2_main_end_of_string:\n"
    );
}

#[test]
fn conditional_return() {
    let backend = Win64::shared();
    let sign = Win64.function(
        "sign",
        vec![(qword(), "value".to_string())],
        sequence([
            instruction("xor eax, eax"),
            instruction("test rcx, rcx"),
        ])
        .concat(&if_statement(
            "s",
            Program::default(),
            sequence([instruction("dec rax")]),
            None,
        ))
        .concat(&sequence([return_action(backend, None)])),
    );
    let out = lines(&code(&sign)).join("\n");
    assert!(out.contains("jns L1_sign_end_of_if\ndec rax\nL1_sign_end_of_if:\nret"), "{out}");
}

#[test]
fn frames_with_calls_stay_aligned() {
    let backend = Win64::shared();
    let callee = Win64.function("callee", Vec::new(), Program::default());
    let main = Win64.function(
        "main",
        Vec::new(),
        sequence([
            in_pass(CompilationStep::Generate, |c| {
                c.declare_variable(oasm::ValueType::sized(SizeSpecifier::Qword), "x")
            }),
            call_action(backend.clone(), path("callee"), Vec::new(), Vec::new()),
            return_action(backend, None),
        ]),
    );
    let out = code(&callee.concat(&main));
    // return address, one variable and the shadow space: 48 bytes, aligned
    assert!(out.contains("sub rsp, 40"), "{out}");
    assert!(out.contains("add rsp, 40"), "{out}");
}
