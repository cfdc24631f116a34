//! Typed embedding bridge for an R runtime
//!
//! The bridge manages the single R runtime a process may host:
//! 1. `Session::open` starts the runtime and takes the process-wide guard
//! 2. `evaluate`, `execute`, `assign` and `fetch` move data across as `Value`s
//! 3. Console output goes to the session's `OutputSink`, never into results
//! 4. `close` (or dropping the session) releases the runtime
//!
//! ```no_run
//! use rlink::{Session, Value};
//!
//! # fn main() -> Result<(), rlink::BridgeError> {
//! let session = Session::open()?;
//! session.assign("X", &Value::from(vec![1.0, 2.0, 3.0]))?;
//! let doubled = session.evaluate("X * 2")?;
//! assert_eq!(doubled.numbers(), Some(vec![2.0, 4.0, 6.0]));
//! session.close()?;
//! # Ok(())
//! # }
//! ```

pub mod errors;
pub mod executor;
pub mod identifier;
pub mod marshal;
pub mod robject;
pub mod runtime;
pub mod session;
pub mod sink;
pub mod value;

pub use errors::BridgeError;
pub use executor::{Pending, SessionWorker};
pub use rlink_config::{Backend, Config};
pub use robject::RObject;
pub use runtime::{ProcessRuntime, ReferenceRuntime, Runtime};
pub use session::{is_session_live, Session, SessionBuilder};
pub use sink::{CaptureSink, OutputSink, OutputStream, StdoutSink};
pub use value::{Value, Vector};
