//! Identifiers and symbol paths.

use std::fmt;

use crate::symbol::Symbol;

/// One segment of a symbol path, optionally carrying template arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier {
    name: String,
    template_args: Vec<Symbol>,
}

impl Identifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template_args: Vec::new(),
        }
    }

    /// A segment naming a template instance.
    pub fn templated(name: impl Into<String>, template_args: Vec<Symbol>) -> Self {
        Self {
            name: name.into(),
            template_args,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template_args(&self) -> &[Symbol] {
        &self.template_args
    }

    pub fn is_templated(&self) -> bool {
        !self.template_args.is_empty()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.is_templated() {
            f.write_str("<")?;
            for (i, arg) in self.template_args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{arg}")?;
            }
            f.write_str(">")?;
        }
        Ok(())
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Identifier::new(value)
    }
}

/// Split a dotted path of plain names into identifiers.
pub fn path(dotted: &str) -> Vec<Identifier> {
    dotted.split('.').map(Identifier::new).collect()
}

/// Render a path with dots between segments.
pub fn display_path(path: &[Identifier]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(".")
}
