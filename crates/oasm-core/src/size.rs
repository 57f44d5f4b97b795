//! Operand size specifiers.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;

use crate::CompileError;

/// Size of a value in memory or in a register.
///
/// `None` is used for constants, which don't represent a value in memory
/// and therefore don't have a size.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive,
)]
#[repr(u8)]
pub enum SizeSpecifier {
    None = 0,
    Byte = 1,
    Word = 2,
    Dword = 4,
    Qword = 8,
}

impl Default for SizeSpecifier {
    fn default() -> Self {
        SizeSpecifier::None
    }
}

impl SizeSpecifier {
    /// All defined sizes, smallest first.
    pub const ALL: [SizeSpecifier; 4] = [
        SizeSpecifier::Byte,
        SizeSpecifier::Word,
        SizeSpecifier::Dword,
        SizeSpecifier::Qword,
    ];

    /// Number of bytes occupied by a value of this size.
    #[inline]
    pub fn bytes(self) -> u32 {
        u8::from(self) as u32
    }

    /// Whether this is an actual size (not `None`).
    #[inline]
    pub fn is_defined(self) -> bool {
        self != SizeSpecifier::None
    }

    /// Parse a NASM size keyword (`byte`, `word`, `dword`, `qword`).
    pub fn parse(keyword: &str) -> Result<Self, CompileError> {
        match keyword {
            "byte" => Ok(SizeSpecifier::Byte),
            "word" => Ok(SizeSpecifier::Word),
            "dword" => Ok(SizeSpecifier::Dword),
            "qword" => Ok(SizeSpecifier::Qword),
            other => Err(CompileError::language(format!(
                "bad size specifier: '{other}'"
            ))),
        }
    }

    /// Look up the size matching an exact byte count.
    pub fn from_bytes(bytes: u32) -> Option<Self> {
        u8::try_from(bytes)
            .ok()
            .and_then(|b| SizeSpecifier::try_from(b).ok())
            .filter(|s| s.is_defined())
    }

    /// NASM keyword for this size.
    pub fn to_nasm(self) -> Result<&'static str, CompileError> {
        match self {
            SizeSpecifier::Byte => Ok("byte"),
            SizeSpecifier::Word => Ok("word"),
            SizeSpecifier::Dword => Ok("dword"),
            SizeSpecifier::Qword => Ok("qword"),
            SizeSpecifier::None => Err(CompileError::internal(
                "attempted to convert undefined size specifier to its nasm representation",
            )),
        }
    }

    /// Suffix used by data directives (`db`, `dw`, `dd`, `dq`).
    pub fn data_suffix(self) -> Option<char> {
        match self {
            SizeSpecifier::Byte => Some('b'),
            SizeSpecifier::Word => Some('w'),
            SizeSpecifier::Dword => Some('d'),
            SizeSpecifier::Qword => Some('q'),
            SizeSpecifier::None => None,
        }
    }
}

impl fmt::Display for SizeSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeSpecifier::None => write!(f, "undefined size"),
            SizeSpecifier::Byte => write!(f, "byte"),
            SizeSpecifier::Word => write!(f, "word"),
            SizeSpecifier::Dword => write!(f, "dword"),
            SizeSpecifier::Qword => write!(f, "qword"),
        }
    }
}
