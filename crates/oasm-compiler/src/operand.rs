//! Registers and instruction operands.

use std::fmt;

use oasm_core::{CompileError, Result, SizeSpecifier};

use crate::line::SymbolString;

/// 64-bit general purpose registers, in encoding order.
pub const GENERAL_PURPOSE: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15",
];

const CONTROL: [&str; 5] = ["cr0", "cr2", "cr3", "cr4", "cr8"];
const BYTE_ADDRESSABLE: [&str; 4] = ["rax", "rbx", "rcx", "rdx"];

/// Name of `base` when accessed with `size`.
fn sized_name(base: &str, size: SizeSpecifier) -> Option<String> {
    if !GENERAL_PURPOSE.contains(&base) {
        return None;
    }
    let numbered = base.starts_with("r") && base[1..].chars().all(|c| c.is_ascii_digit());
    let stem = &base[1..];

    match size {
        SizeSpecifier::Qword => Some(base.to_string()),
        SizeSpecifier::Dword if numbered => Some(format!("{base}d")),
        SizeSpecifier::Dword => Some(format!("e{stem}")),
        SizeSpecifier::Word if numbered => Some(format!("{base}w")),
        SizeSpecifier::Word => Some(stem.to_string()),
        SizeSpecifier::Byte if BYTE_ADDRESSABLE.contains(&base) => {
            Some(format!("{}l", &stem[..1]))
        }
        SizeSpecifier::Byte | SizeSpecifier::None => None,
    }
}

/// A physical register at a particular access size.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Register {
    name: String,
    base: String,
    size: SizeSpecifier,
}

impl Register {
    /// Parse a register name such as `rax`, `r9d`, `si` or `bl`.
    pub fn parse(name: &str) -> Result<Self> {
        if GENERAL_PURPOSE.contains(&name) || CONTROL.contains(&name) {
            return Ok(Self::new(name, name, SizeSpecifier::Qword));
        }

        for base in GENERAL_PURPOSE {
            for size in [SizeSpecifier::Dword, SizeSpecifier::Word] {
                if sized_name(base, size).as_deref() == Some(name) {
                    return Ok(Self::new(name, base, size));
                }
            }
        }

        if let [c @ (b'a' | b'b' | b'c' | b'd'), b'l' | b'h'] = name.as_bytes() {
            let base = format!("r{}x", *c as char);
            return Ok(Self::new(name, &base, SizeSpecifier::Byte));
        }

        Err(CompileError::language(format!(
            "{name} is not recognised as a register"
        )))
    }

    fn new(name: &str, base: &str, size: SizeSpecifier) -> Self {
        Self {
            name: name.to_string(),
            base: base.to_string(),
            size,
        }
    }

    /// Access `base` (a 64-bit register name) with `size`.
    pub fn sized(base: &str, size: SizeSpecifier) -> Result<Self> {
        let name = sized_name(base, size).ok_or_else(|| {
            CompileError::language(format!("can't resize '{base}' to size {size}"))
        })?;
        Ok(Self::new(&name, base, size))
    }

    /// Name as written in assembly.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the full 64-bit register.
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn size(&self) -> SizeSpecifier {
        self.size
    }

    /// Whether the low byte of this register can be addressed.
    pub fn supports_byte_access(&self) -> bool {
        BYTE_ADDRESSABLE.contains(&self.base.as_str())
    }

    /// The same register at another size.
    pub fn resized(&self, size: SizeSpecifier) -> Result<Self> {
        Self::sized(&self.base, size)
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// ============================================================================
// Operands
// ============================================================================

/// How an operand is accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandKind {
    /// A constant value.
    Immediate,
    /// A value in memory; the text is a bracketed address.
    Memory,
    /// The address of a value; needs `lea` to materialise.
    Reference,
    /// A register.
    Register,
}

/// An operand handed to a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Operand {
    size: SizeSpecifier,
    text: SymbolString,
    kind: OperandKind,
    register: Option<Register>,
}

impl Operand {
    /// A register operand.
    pub fn register(register: Register) -> Self {
        Self {
            size: register.size(),
            text: SymbolString::from(register.base()),
            kind: OperandKind::Register,
            register: Some(register),
        }
    }

    /// A register operand accessed with `size`.
    ///
    /// With `upgrade_byte_registers`, a byte access to a register without an
    /// addressable low byte becomes a word access.
    pub fn register_sized(
        base: &str,
        size: SizeSpecifier,
        upgrade_byte_registers: bool,
    ) -> Result<Self> {
        let mut size = size;
        if upgrade_byte_registers
            && size == SizeSpecifier::Byte
            && !BYTE_ADDRESSABLE.contains(&base)
        {
            size = SizeSpecifier::Word;
        }
        Ok(Self::register(Register::sized(base, size)?))
    }

    /// An immediate operand.
    pub fn immediate(size: SizeSpecifier, text: impl Into<SymbolString>) -> Result<Self> {
        Self::sized(size, text.into(), OperandKind::Immediate)
    }

    /// A memory operand; `address` includes the brackets.
    pub fn memory(size: SizeSpecifier, address: impl Into<SymbolString>) -> Result<Self> {
        Self::sized(size, address.into(), OperandKind::Memory)
    }

    /// The address of a value.
    pub fn reference(address: impl Into<SymbolString>) -> Self {
        Self {
            size: SizeSpecifier::None,
            text: address.into(),
            kind: OperandKind::Reference,
            register: None,
        }
    }

    fn sized(size: SizeSpecifier, text: SymbolString, kind: OperandKind) -> Result<Self> {
        if !size.is_defined() {
            return Err(CompileError::internal(format!(
                "attempted to construct {kind:?} operand '{text}' with undefined size"
            )));
        }
        Ok(Self {
            size,
            text,
            kind,
            register: None,
        })
    }

    pub fn size(&self) -> SizeSpecifier {
        self.size
    }

    pub fn kind(&self) -> OperandKind {
        self.kind
    }

    /// Address or value text without a size keyword.
    pub fn text(&self) -> &SymbolString {
        &self.text
    }

    pub fn as_register(&self) -> Option<&Register> {
        self.register.as_ref()
    }

    /// Whether the operand addresses the stack frame.
    pub fn is_stack_reference(&self) -> bool {
        self.text.is_stack_reference()
    }

    /// NASM form of the operand. `None` for references, which need `lea`.
    pub fn nasm(&self) -> Result<Option<SymbolString>> {
        Ok(match self.kind {
            OperandKind::Register => self
                .register
                .as_ref()
                .map(|r| SymbolString::from(r.name())),
            OperandKind::Reference => None,
            OperandKind::Immediate | OperandKind::Memory => {
                Some(SymbolString::from(self.size.to_nasm()?) + self.text.clone())
            }
        })
    }

    /// The same operand accessed with another size.
    pub fn resize(&self, size: SizeSpecifier) -> Result<Self> {
        match (&self.register, self.kind) {
            (Some(register), _) => Ok(Self::register(register.resized(size)?)),
            (None, OperandKind::Reference) => Ok(self.clone()),
            (None, kind) => Self::sized(size, self.text.clone(), kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_widths() {
        let r = Register::parse("r9d").unwrap();
        assert_eq!(r.base(), "r9");
        assert_eq!(r.size(), SizeSpecifier::Dword);

        let r = Register::parse("si").unwrap();
        assert_eq!(r.base(), "rsi");
        assert_eq!(r.size(), SizeSpecifier::Word);

        let r = Register::parse("bh").unwrap();
        assert_eq!(r.base(), "rbx");
        assert_eq!(r.size(), SizeSpecifier::Byte);

        assert_eq!(Register::parse("esp").unwrap().base(), "rsp");
        assert_eq!(Register::parse("cr3").unwrap().size(), SizeSpecifier::Qword);
        assert!(Register::parse("xmm0").is_err());
    }

    #[test]
    fn resizing() {
        let rax = Register::parse("rax").unwrap();
        assert_eq!(rax.resized(SizeSpecifier::Dword).unwrap().name(), "eax");
        assert_eq!(rax.resized(SizeSpecifier::Byte).unwrap().name(), "al");

        let r12 = Register::parse("r12").unwrap();
        assert_eq!(r12.resized(SizeSpecifier::Word).unwrap().name(), "r12w");
        assert!(r12.resized(SizeSpecifier::Byte).is_err());
        assert!(!r12.supports_byte_access());
    }

    #[test]
    fn byte_upgrade() {
        let op = Operand::register_sized("rsi", SizeSpecifier::Byte, true).unwrap();
        assert_eq!(op.size(), SizeSpecifier::Word);
        assert!(Operand::register_sized("rsi", SizeSpecifier::Byte, false).is_err());
    }

    #[test]
    fn operand_nasm() {
        let mem = Operand::memory(SizeSpecifier::Dword, "[rbx]").unwrap();
        assert_eq!(mem.nasm().unwrap().unwrap().to_string(), "dword [rbx]");

        let reg = Operand::register(Register::parse("ecx").unwrap());
        assert_eq!(reg.nasm().unwrap().unwrap().to_string(), "ecx");

        assert!(Operand::reference("[rsp + 8]").nasm().unwrap().is_none());
        assert!(Operand::immediate(SizeSpecifier::None, "5").unwrap_err().is_internal());
    }
}
