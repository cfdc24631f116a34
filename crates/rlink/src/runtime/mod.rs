//! Runtime backends behind a session
//!
//! A `Runtime` owns one R interpreter instance and its global environment.
//! Sessions hold exactly one runtime and serialize every call into it, so
//! implementations never see concurrent entry.

pub mod process;
pub mod reference;

use crate::errors::BridgeError;
use crate::robject::RObject;
use crate::sink::OutputSink;

pub use process::ProcessRuntime;
pub use reference::ReferenceRuntime;

pub trait Runtime: Send {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Parse and evaluate `code` in the global environment, returning the
    /// value of the last top-level expression
    fn eval(&mut self, code: &str, out: &mut dyn OutputSink) -> Result<RObject, BridgeError>;

    /// Like `eval`, but the result never leaves the runtime
    fn execute(&mut self, code: &str, out: &mut dyn OutputSink) -> Result<(), BridgeError> {
        self.eval(code, out).map(|_| ())
    }

    /// Bind `name` in the global environment; `name` is already validated
    fn assign(
        &mut self,
        name: &str,
        value: RObject,
        out: &mut dyn OutputSink,
    ) -> Result<(), BridgeError>;

    /// Look `name` up in the global environment (no enclosing frames)
    fn get(&mut self, name: &str, out: &mut dyn OutputSink)
        -> Result<Option<RObject>, BridgeError>;

    /// False once the interpreter has died underneath the session
    fn is_alive(&self) -> bool {
        true
    }

    /// Release the interpreter; called once, when the session closes
    fn shutdown(&mut self) -> Result<(), BridgeError>;
}
