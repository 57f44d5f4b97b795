//! Per-function stack frame bookkeeping.
//!
//! The stack tracks the distance between the stack pointer and its value at
//! function entry. Variables are addressed relative to the final frame size,
//! which is only known once the function body has been generated.

use std::cell::RefCell;
use std::rc::Rc;

use oasm_core::{CompilationStep, CompileError, Result};

/// Shared handle to a stack frame.
pub type StackRef = Rc<RefCell<Stack>>;

/// Stack frame of one function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stack {
    /// Offset of the stack pointer from its value at function entry.
    pointer: i64,
    /// Final frame size. Set once, after which the pointer is frozen.
    size: Option<u32>,
    /// Largest frame extent seen so far.
    max_size: u32,
    /// Whether the function performs no calls.
    is_leaf: bool,
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}

impl Stack {
    /// Create an empty leaf frame.
    pub fn new() -> Self {
        Self {
            pointer: 0,
            size: None,
            max_size: 0,
            is_leaf: true,
        }
    }

    /// Create a shared handle to a new frame.
    pub fn shared() -> StackRef {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Current stack pointer offset.
    pub fn pointer(&self) -> i64 {
        self.pointer
    }

    /// Move the stack pointer to `pointer`.
    ///
    /// Fails once the frame size has been set. Grows the high-water mark
    /// when the pointer moves below it.
    pub fn set_pointer(&mut self, pointer: i64) -> Result<()> {
        if self.size.is_some() {
            return Err(CompileError::pass_ordering(
                "move the stack pointer after the stack size was set",
                CompilationStep::Generate,
            ));
        }
        self.pointer = pointer;
        if pointer < 0 {
            self.max_size = self.max_size.max(pointer.unsigned_abs() as u32);
        }
        Ok(())
    }

    /// Move the stack pointer by `delta` bytes.
    pub fn move_pointer(&mut self, delta: i64) -> Result<()> {
        self.set_pointer(self.pointer + delta)
    }

    /// Largest frame extent seen so far.
    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    /// Whether the size has been set.
    pub fn is_size_set(&self) -> bool {
        self.size.is_some()
    }

    /// Final frame size.
    pub fn size(&self) -> Result<u32> {
        self.size.ok_or_else(|| {
            CompileError::pass_ordering(
                "obtain the stack size before it was set",
                CompilationStep::Generate,
            )
        })
    }

    /// Freeze the frame at `size` bytes. Can only be done once.
    pub fn set_size(&mut self, size: u32) -> Result<()> {
        if self.size.is_some() {
            return Err(CompileError::internal("attempted to set the stack size twice"));
        }
        self.size = Some(size);
        Ok(())
    }

    /// Whether the function performs no calls.
    pub fn is_leaf(&self) -> bool {
        self.is_leaf
    }

    /// Mark the function as leaf or non-leaf. A non-leaf function can't become leaf again.
    pub fn set_leaf(&mut self, is_leaf: bool) -> Result<()> {
        if is_leaf && !self.is_leaf {
            return Err(CompileError::internal(
                "attempted to turn a non-leaf function back into a leaf function",
            ));
        }
        self.is_leaf = is_leaf;
        Ok(())
    }
}
