//! In-process runtime for a subset of R
//!
//! Covers literals, assignment in all its spellings, arithmetic, comparison
//! and logical operators, `:` ranges, `$`, `[` and `[[`, braces, `if`/`else`
//! and a small set of base functions. Programs are parsed completely before
//! anything runs, so a syntax error never leaves partial effects.

mod eval;
mod format;
mod lexer;
mod parser;

use crate::errors::BridgeError;
use crate::robject::RObject;
use crate::runtime::Runtime;
use crate::sink::OutputSink;
use eval::{Globals, Interpreter};

#[derive(Debug, Default)]
pub struct ReferenceRuntime {
    globals: Globals,
}

impl ReferenceRuntime {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Runtime for ReferenceRuntime {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn eval(&mut self, code: &str, out: &mut dyn OutputSink) -> Result<RObject, BridgeError> {
        let program = parser::parse_program(code)?;
        Interpreter::new(&mut self.globals, out).run(&program)
    }

    fn assign(
        &mut self,
        name: &str,
        value: RObject,
        _out: &mut dyn OutputSink,
    ) -> Result<(), BridgeError> {
        self.globals.insert(name.to_string(), value);
        Ok(())
    }

    fn get(
        &mut self,
        name: &str,
        _out: &mut dyn OutputSink,
    ) -> Result<Option<RObject>, BridgeError> {
        Ok(self.globals.get(name).cloned())
    }

    fn shutdown(&mut self) -> Result<(), BridgeError> {
        self.globals.clear();
        Ok(())
    }
}
