//! Compiler configuration.

use crate::SizeSpecifier;

/// Settings shared by an engine and every template instance derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerSettings {
    /// Size of the length field that prefixes string data.
    pub string_length_size: SizeSpecifier,
    /// Size of the element count field that prefixes array data.
    pub array_length_size: SizeSpecifier,
    /// Upper bound for the alignment of array data buffers.
    pub max_array_alignment: u32,
    /// Alignment of stack frames of non-leaf functions.
    pub stack_alignment: u32,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            string_length_size: SizeSpecifier::Dword,
            array_length_size: SizeSpecifier::Qword,
            max_array_alignment: 64,
            stack_alignment: 16,
        }
    }
}

impl CompilerSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_string_length_size(mut self, size: SizeSpecifier) -> Self {
        self.string_length_size = size;
        self
    }

    pub fn with_array_length_size(mut self, size: SizeSpecifier) -> Self {
        self.array_length_size = size;
        self
    }

    pub fn with_max_array_alignment(mut self, alignment: u32) -> Self {
        self.max_array_alignment = alignment;
        self
    }

    pub fn with_stack_alignment(mut self, alignment: u32) -> Self {
        self.stack_alignment = alignment;
        self
    }
}
