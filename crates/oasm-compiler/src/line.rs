//! Lines of assembly made of symbols.
//!
//! A [`SymbolString`] keeps the symbols of a line until it is rendered, so
//! stack offsets, labels of resolved placeholders and deferred text can be
//! filled in late. Rendering joins the symbols with NASM-friendly spacing:
//!
//! ```text
//! "mov" "[" "rsp + 8" "]" "," "rax"   =>   mov [rsp + 8], rax
//! ```

use std::fmt;
use std::ops::Add;

use oasm_core::Result;

use crate::symbol::{ConstantSymbol, Symbol};

const PARENTHESES: [&str; 8] = ["(", "[", "{", "<", ")", "]", "}", ">"];
const BINARY_OPERATORS: [&str; 7] = ["+", "-", "*", "/", "^", "&", "|"];
const SEPARATORS: [&str; 2] = [",", ":"];

/// An ordered sequence of symbols forming one line of output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolString {
    symbols: Vec<Symbol>,
}

impl SymbolString {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn push(&mut self, symbol: impl Into<Symbol>) {
        self.symbols.push(symbol.into());
    }

    /// Append a symbol, builder style.
    pub fn then(mut self, symbol: impl Into<Symbol>) -> Self {
        self.push(symbol);
        self
    }

    /// Whether any symbol addresses the stack frame.
    pub fn is_stack_reference(&self) -> bool {
        self.symbols.iter().any(|s| matches!(s, Symbol::Stack(_)))
    }

    /// Pin every register alias to the register it currently designates.
    pub fn resolve_aliases(&mut self) {
        for symbol in &mut self.symbols {
            let pinned = match symbol {
                Symbol::Register(alias) if alias.is_alias() => {
                    ConstantSymbol::new(alias.register().name())
                }
                _ => continue,
            };
            *symbol = pinned.into();
        }
    }

    /// Render the line. `None` if a deferred symbol dropped it.
    pub fn render(&self) -> Result<Option<String>> {
        let mut out = String::new();
        let mut space = false;
        let mut no_space = true;

        for symbol in &self.symbols {
            let Some(text) = symbol.render()? else {
                return Ok(None);
            };
            let text = text.as_str();

            if SEPARATORS.contains(&text) {
                out.push_str(text);
                space = true;
                no_space = false;
            } else if PARENTHESES.contains(&text) {
                if space || (text == "[" && !no_space) {
                    out.push(' ');
                }
                out.push_str(text);
                space = false;
                no_space = true;
            } else if BINARY_OPERATORS.contains(&text) {
                if !no_space {
                    out.push(' ');
                }
                out.push_str(text);
                space = true;
                no_space = false;
            } else {
                if !no_space {
                    out.push(' ');
                }
                out.push_str(text);
                space = false;
                no_space = false;
            }
        }

        Ok(Some(out))
    }
}

impl fmt::Display for SymbolString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.render() {
            Ok(Some(text)) => f.write_str(&text),
            Ok(None) => Ok(()),
            Err(_) => {
                let parts: Vec<String> = self.symbols.iter().map(ToString::to_string).collect();
                f.write_str(&parts.join(" "))
            }
        }
    }
}

impl From<Symbol> for SymbolString {
    fn from(value: Symbol) -> Self {
        Self {
            symbols: vec![value],
        }
    }
}

impl From<&str> for SymbolString {
    fn from(value: &str) -> Self {
        Symbol::from(value).into()
    }
}

impl From<String> for SymbolString {
    fn from(value: String) -> Self {
        Symbol::from(value).into()
    }
}

impl From<Vec<Symbol>> for SymbolString {
    fn from(symbols: Vec<Symbol>) -> Self {
        Self { symbols }
    }
}

impl Add for SymbolString {
    type Output = SymbolString;

    fn add(mut self, rhs: SymbolString) -> SymbolString {
        self.symbols.extend(rhs.symbols);
        self
    }
}

impl Add<Symbol> for SymbolString {
    type Output = SymbolString;

    fn add(self, rhs: Symbol) -> SymbolString {
        self.then(rhs)
    }
}

impl Add<&str> for SymbolString {
    type Output = SymbolString;

    fn add(self, rhs: &str) -> SymbolString {
        self.then(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::Register;
    use crate::symbol::{DeferredSymbol, RegisterSymbol, StackSymbol};
    use crate::stack::Stack;
    use crate::value_type::ValueType;
    use oasm_core::SizeSpecifier;

    fn line(parts: &[&str]) -> SymbolString {
        parts.iter().fold(SymbolString::new(), |acc, p| acc + *p)
    }

    #[test]
    fn memory_operand_spacing() {
        let l = line(&["mov", "qword", "[", "rsp + 8", "]", ",", "rax"]);
        assert_eq!(l.render().unwrap().unwrap(), "mov qword [rsp + 8], rax");
    }

    #[test]
    fn binary_operators_are_spaced() {
        let l = line(&["lea", "rax", ",", "[", "rbx", "+", "8", "]"]);
        assert_eq!(l.render().unwrap().unwrap(), "lea rax, [rbx + 8]");
    }

    #[test]
    fn label_colon_is_attached() {
        let l = line(&["L1_main", ":"]);
        assert_eq!(l.render().unwrap().unwrap(), "L1_main:");
    }

    #[test]
    fn deferred_drop_removes_line() {
        let l = SymbolString::from("sub rsp,") + Symbol::from(DeferredSymbol::new(|| Ok(None)));
        assert_eq!(l.render().unwrap(), None);
    }

    #[test]
    fn stack_reference_detection() {
        let stack = Stack::shared();
        let var = StackSymbol::new(stack, -8, ValueType::sized(SizeSpecifier::Qword));
        assert!(!line(&["ret"]).is_stack_reference());
        assert!((SymbolString::from("push") + Symbol::from(var)).is_stack_reference());
    }

    #[test]
    fn aliases_are_pinned() {
        let alias = RegisterSymbol::alias(Register::parse("rax").unwrap());
        let mut l = SymbolString::from("push") + Symbol::from(alias.clone());
        l.resolve_aliases();
        alias.assign(Register::parse("rbx").unwrap()).unwrap();
        assert_eq!(l.render().unwrap().unwrap(), "push rax");
    }
}
