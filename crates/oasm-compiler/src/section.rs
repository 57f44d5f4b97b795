//! Output sections with deferred lines.
//!
//! A [`Section`] buffers the text generated for one output section. Lines
//! that can't be rendered yet wait in a backlog for a [`CompilerEvent`];
//! lines generated after them queue behind them so output order matches
//! generation order. When the event fires, waiting lines are rendered and
//! written out, or merged into an earlier entry that is still waiting.
//!
//! ```text
//! generate(A)             buffer: A
//! generate_deferred(B, E) buffer: A      backlog: [B (waits E)]
//! generate(C)             buffer: A      backlog: [B + C]
//! fire_event(E)           buffer: A B C  backlog: []
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use oasm_core::{CompileError, Result};

use crate::line::SymbolString;

/// Events deferred lines can wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompilerEvent {
    /// The current function's stack frame size was finalized.
    StackSizeSet,
}

/// Shared destination of a section's text.
#[derive(Debug, Clone, Default)]
pub struct SectionSink(Rc<RefCell<String>>);

impl SectionSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text flushed into the sink so far.
    pub fn contents(&self) -> String {
        self.0.borrow().clone()
    }

    fn write(&self, text: &str) {
        self.0.borrow_mut().push_str(text);
    }

    /// Whether two handles share one destination.
    pub fn ptr_eq(&self, other: &SectionSink) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

struct BacklogItem {
    event: CompilerEvent,
    line: SymbolString,
    tail: Vec<String>,
}

impl BacklogItem {
    fn merge(&mut self, next: BacklogItem) -> Result<()> {
        if let Some(text) = next.line.render()? {
            self.tail.push(text);
        }
        self.tail.extend(next.tail);
        Ok(())
    }

    fn write(self, buffer: &mut String) -> Result<()> {
        if let Some(text) = self.line.render()? {
            push_line(buffer, &text);
        }
        for text in &self.tail {
            push_line(buffer, text);
        }
        Ok(())
    }
}

fn push_line(buffer: &mut String, line: &str) {
    buffer.push_str(line);
    buffer.push('\n');
}

/// Buffered text of one output section.
pub struct Section {
    sink: SectionSink,
    buffer: String,
    backlog: Vec<BacklogItem>,
}

impl Section {
    /// A section writing to `sink` when closed.
    pub fn new(sink: SectionSink) -> Self {
        Self {
            sink,
            buffer: String::new(),
            backlog: Vec::new(),
        }
    }

    pub fn sink(&self) -> &SectionSink {
        &self.sink
    }

    /// Number of entries waiting for an event.
    pub fn pending(&self) -> usize {
        self.backlog.len()
    }

    /// Append a rendered line, behind any waiting entries.
    pub fn generate(&mut self, line: &str) {
        match self.backlog.last_mut() {
            Some(last) => last.tail.push(line.to_string()),
            None => push_line(&mut self.buffer, line),
        }
    }

    /// Queue a line that is rendered once `event` fires.
    pub fn generate_deferred(&mut self, line: SymbolString, event: CompilerEvent) {
        self.backlog.push(BacklogItem {
            event,
            line,
            tail: Vec::new(),
        });
    }

    /// Render every entry waiting for `event`.
    pub fn fire_event(&mut self, event: CompilerEvent) -> Result<()> {
        if self.backlog.is_empty() {
            return Ok(());
        }

        let mut kept: Vec<BacklogItem> = Vec::with_capacity(self.backlog.len());
        for item in std::mem::take(&mut self.backlog) {
            if item.event != event {
                kept.push(item);
                continue;
            }
            match kept.last_mut() {
                Some(waiting) => waiting.merge(item)?,
                None => item.write(&mut self.buffer)?,
            }
        }
        self.backlog = kept;
        Ok(())
    }

    /// Flush the buffer into the sink. Fails if entries are still waiting.
    pub fn close(&mut self) -> Result<()> {
        if !self.backlog.is_empty() {
            return Err(CompileError::internal(format!(
                "attempted to close a section with {} line(s) still waiting for an event",
                self.backlog.len()
            )));
        }
        self.sink.write(&self.buffer);
        self.buffer.clear();
        Ok(())
    }
}

impl fmt::Debug for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Section")
            .field("buffered", &self.buffer.len())
            .field("pending", &self.backlog.len())
            .finish()
    }
}
