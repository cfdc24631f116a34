//! Session lifecycle and the evaluate/assign/fetch operations
//!
//! A process hosts at most one live R runtime. The guard below is taken when
//! a session opens and released when it closes (explicitly or on drop), so a
//! second `open` while one is live fails with `AlreadyInitialized` instead of
//! handing out a second handle to shared interpreter state.
//!
//! ## Backend selection
//!
//! `Backend::Process` is the default and requires an R installation; without
//! one, `open` fails with `RuntimeNotFound`. `Backend::Reference` (a small
//! in-process R subset used by tests) is only used when asked for, and
//! `Backend::Auto` opts into falling back to it with a warning.
//!
//! If the interpreter dies mid-call the session closes itself: the call fails
//! with `RuntimeExited`, a notice goes to the sink's `Message` stream, the
//! guard is released and later calls fail with `SessionClosed`.

use crate::errors::BridgeError;
use crate::identifier;
use crate::marshal;
use crate::runtime::{ProcessRuntime, ReferenceRuntime, Runtime};
use crate::sink::{OutputSink, OutputStream, StdoutSink, Tee};
use crate::value::Value;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rlink_config::{Backend, Config};
use rlink_logger as logger;
use std::sync::atomic::{AtomicU64, Ordering};

/// Id of the live session, if any
static LIVE_SESSION: Lazy<Mutex<Option<u64>>> = Lazy::new(|| Mutex::new(None));

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Whether some session currently holds the runtime
pub fn is_session_live() -> bool {
    LIVE_SESSION.lock().is_some()
}

fn acquire_guard() -> Result<u64, BridgeError> {
    let mut live = LIVE_SESSION.lock();
    if let Some(id) = *live {
        logger::debug(&format!("Refusing to open a session: session {} is live", id));
        return Err(BridgeError::AlreadyInitialized);
    }
    let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
    *live = Some(id);
    Ok(id)
}

fn release_guard(id: u64) {
    let mut live = LIVE_SESSION.lock();
    if *live == Some(id) {
        *live = None;
    }
}

enum SessionState {
    Live {
        runtime: Box<dyn Runtime>,
        sink: Box<dyn OutputSink>,
    },
    Closed,
}

/// Handle to the process's R runtime
///
/// Every operation holds the session lock for its whole duration, so calls
/// from several threads queue rather than interleave.
pub struct Session {
    id: u64,
    backend: &'static str,
    max_depth: usize,
    state: Mutex<SessionState>,
}

/// Options for opening a session
#[derive(Default)]
pub struct SessionBuilder {
    backend: Option<Backend>,
    runtime: Option<Box<dyn Runtime>>,
    sink: Option<Box<dyn OutputSink>>,
    max_depth: Option<usize>,
    config: Option<Config>,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the configured backend
    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Use an already constructed runtime instead of a configured backend
    pub fn runtime(mut self, runtime: impl Runtime + 'static) -> Self {
        self.runtime = Some(Box::new(runtime));
        self
    }

    /// Where console output goes; defaults to `StdoutSink`
    pub fn sink(mut self, sink: impl OutputSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Nesting bound for marshaling in both directions
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    /// Use this configuration instead of loading the config file
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn open(self) -> Result<Session, BridgeError> {
        let id = acquire_guard()?;
        match self.start(id) {
            Ok(session) => Ok(session),
            Err(e) => {
                release_guard(id);
                Err(e)
            }
        }
    }

    fn start(self, id: u64) -> Result<Session, BridgeError> {
        let start_time = std::time::Instant::now();

        let mut config = match self.config {
            Some(config) => config,
            None => Config::load()?,
        };
        if let Some(enabled) = config.log_runtime_output {
            logger::set_log_runtime_output(enabled);
        }
        let max_depth = self.max_depth.unwrap_or_else(|| config.get_max_depth());
        if max_depth == 0 {
            return Err(BridgeError::Initialization(
                "max-depth must be at least 1".to_string(),
            ));
        }

        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => {
                let backend = match self.backend {
                    Some(backend) => backend,
                    None => config.get_backend()?,
                };
                start_backend(backend, &mut config)?
            }
        };
        let backend = runtime.name();

        logger::info(&format!(
            "Opened session {} on the {} runtime in {:?}",
            id,
            backend,
            start_time.elapsed()
        ));

        Ok(Session {
            id,
            backend,
            max_depth,
            state: Mutex::new(SessionState::Live {
                runtime,
                sink: self.sink.unwrap_or_else(|| Box::new(StdoutSink)),
            }),
        })
    }
}

fn start_backend(backend: Backend, config: &mut Config) -> Result<Box<dyn Runtime>, BridgeError> {
    match backend {
        Backend::Reference => Ok(Box::new(ReferenceRuntime::new())),
        Backend::Process => {
            let executable = config.ensure_r_executable()?;
            Ok(Box::new(ProcessRuntime::spawn(&executable)?))
        }
        Backend::Auto => match config.ensure_r_executable() {
            Ok(executable) => Ok(Box::new(ProcessRuntime::spawn(&executable)?)),
            Err(e) => {
                logger::warn(&format!(
                    "{}; using the built-in reference runtime",
                    BridgeError::from(e)
                ));
                Ok(Box::new(ReferenceRuntime::new()))
            }
        },
    }
}

impl Session {
    /// Open a session configured from the config file
    pub fn open() -> Result<Self, BridgeError> {
        SessionBuilder::new().open()
    }

    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Name of the runtime backend serving this session
    pub fn backend(&self) -> &'static str {
        self.backend
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn is_live(&self) -> bool {
        matches!(*self.state.lock(), SessionState::Live { .. })
    }

    /// Release the runtime and the process-wide guard
    ///
    /// Closing an already closed session does nothing.
    pub fn close(&self) -> Result<(), BridgeError> {
        let previous = std::mem::replace(&mut *self.state.lock(), SessionState::Closed);
        let SessionState::Live { mut runtime, .. } = previous else {
            return Ok(());
        };
        let result = runtime.shutdown();
        release_guard(self.id);
        match &result {
            Ok(()) => logger::info(&format!("Closed session {}", self.id)),
            Err(e) => logger::warn(&format!("Session {} closed with error: {}", self.id, e)),
        }
        result
    }

    fn with_live<T>(
        &self,
        call: impl FnOnce(&mut dyn Runtime, &mut dyn OutputSink) -> Result<T, BridgeError>,
    ) -> Result<T, BridgeError> {
        let mut state = self.state.lock();
        let SessionState::Live { runtime, sink } = &mut *state else {
            return Err(BridgeError::SessionClosed);
        };
        let result = call(runtime.as_mut(), &mut Tee { inner: sink.as_mut() });
        if !runtime.is_alive() {
            logger::error(&format!("Session {}: the R runtime died", self.id));
            sink.write(
                &format!("R runtime exited; session {} is closed\n", self.id),
                OutputStream::Message,
            );
            *state = SessionState::Closed;
            release_guard(self.id);
        }
        result
    }

    /// Run `code` for its side effects; the result is discarded inside the
    /// runtime instead of being marshaled
    pub fn execute(&self, code: &str) -> Result<(), BridgeError> {
        logger::debug(&format!("Session {}: execute {:?}", self.id, code));
        self.with_live(|runtime, out| runtime.execute(code, out))
    }

    /// Parse and run `code`, returning the value of its last expression
    ///
    /// Results the bridge cannot represent come back as `Value::Opaque`
    /// naming their class.
    pub fn evaluate(&self, code: &str) -> Result<Value, BridgeError> {
        logger::debug(&format!("Session {}: evaluate {:?}", self.id, code));
        let object = self.with_live(|runtime, out| runtime.eval(code, out))?;
        Ok(marshal::from_embedded(&object, self.max_depth)
            .unwrap_or_else(|_| Value::Opaque(object.class_name())))
    }

    /// Bind `name` in the global environment
    ///
    /// The value is converted completely before the runtime is touched, so a
    /// conversion failure leaves existing bindings as they were.
    pub fn assign(&self, name: &str, value: &Value) -> Result<(), BridgeError> {
        self.with_live(|runtime, out| {
            identifier::validate(name)?;
            let object = marshal::to_embedded(value, self.max_depth)?;
            logger::debug(&format!(
                "Session {}: assign {} ({})",
                self.id,
                name,
                value.type_name()
            ));
            runtime.assign(name, object, out)
        })
    }

    /// Bind `name` to a JSON document converted with `Value::from_json`
    pub fn assign_json(&self, name: &str, json: &serde_json::Value) -> Result<(), BridgeError> {
        if !self.is_live() {
            return Err(BridgeError::SessionClosed);
        }
        let value = Value::from_json(json, self.max_depth)?;
        self.assign(name, &value)
    }

    /// Copy the binding of `name` out of the global environment
    pub fn fetch(&self, name: &str) -> Result<Value, BridgeError> {
        let object = self.with_live(|runtime, out| {
            identifier::validate(name)?;
            runtime
                .get(name, out)?
                .ok_or_else(|| BridgeError::UndefinedSymbol(name.to_string()))
        })?;
        marshal::from_embedded(&object, self.max_depth)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            logger::warn(&format!("Failed to close session {} on drop: {}", self.id, e));
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("backend", &self.backend)
            .field("live", &self.is_live())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robject::RObject;
    use crate::sink::CaptureSink;

    /// Sessions share the process-wide guard
    static SERIAL: Mutex<()> = Mutex::new(());

    fn reference_session(sink: &CaptureSink) -> Session {
        SessionBuilder::new()
            .config(Config::default())
            .backend(Backend::Reference)
            .sink(sink.clone())
            .open()
            .unwrap()
    }

    #[test]
    fn test_guard_released_on_close() {
        let _serial = SERIAL.lock();
        let sink = CaptureSink::new();
        let session = reference_session(&sink);
        assert!(is_session_live());
        assert!(matches!(
            SessionBuilder::new()
                .config(Config::default())
                .backend(Backend::Reference)
                .open(),
            Err(BridgeError::AlreadyInitialized)
        ));
        session.close().unwrap();
        assert!(!is_session_live());
        session.close().unwrap();
    }

    #[test]
    fn test_failed_start_releases_guard() {
        let _serial = SERIAL.lock();
        let mut config = Config::default();
        config.r_executable = Some("/nonexistent/R".to_string());
        config.r_home = Some("/nonexistent".to_string());
        let result = SessionBuilder::new()
            .config(config)
            .backend(Backend::Process)
            .open();
        assert!(matches!(result, Err(BridgeError::RuntimeNotFound(_))));
        assert!(!is_session_live());
    }

    #[test]
    fn test_default_backend_needs_an_installed_r() {
        let _serial = SERIAL.lock();
        let mut config = Config::default();
        config.r_executable = Some("/nonexistent/R".to_string());
        config.r_home = Some("/nonexistent".to_string());
        let result = SessionBuilder::new().config(config).open();
        assert!(matches!(result, Err(BridgeError::RuntimeNotFound(_))));
        assert!(!is_session_live());
    }

    /// Answers one call, then behaves like an interpreter that crashed
    struct DyingRuntime {
        calls: usize,
        alive: bool,
    }

    impl Runtime for DyingRuntime {
        fn name(&self) -> &'static str {
            "dying"
        }

        fn eval(&mut self, _code: &str, out: &mut dyn OutputSink) -> Result<RObject, BridgeError> {
            self.calls += 1;
            if self.calls > 1 {
                self.alive = false;
                return Err(BridgeError::RuntimeExited("killed by signal 9".to_string()));
            }
            out.write("[1] 1\n", OutputStream::Stdout);
            Ok(RObject::double(vec![1.0]))
        }

        fn assign(&mut self, _: &str, _: RObject, _: &mut dyn OutputSink) -> Result<(), BridgeError> {
            Ok(())
        }

        fn get(&mut self, _: &str, _: &mut dyn OutputSink) -> Result<Option<RObject>, BridgeError> {
            Ok(None)
        }

        fn is_alive(&self) -> bool {
            self.alive
        }

        fn shutdown(&mut self) -> Result<(), BridgeError> {
            Ok(())
        }
    }

    #[test]
    fn test_dead_runtime_closes_the_session() {
        let _serial = SERIAL.lock();
        let sink = CaptureSink::new();
        let session = SessionBuilder::new()
            .config(Config::default())
            .runtime(DyingRuntime {
                calls: 0,
                alive: true,
            })
            .sink(sink.clone())
            .open()
            .unwrap();
        assert_eq!(session.backend(), "dying");
        assert_eq!(session.evaluate("1").unwrap(), Value::from(1.0));

        assert!(matches!(
            session.evaluate("quit()"),
            Err(BridgeError::RuntimeExited(_))
        ));
        assert!(sink.messages().contains("R runtime exited"));
        assert!(!session.is_live());
        assert!(!is_session_live());
        assert!(matches!(session.execute("1"), Err(BridgeError::SessionClosed)));
        session.close().unwrap();
    }

    #[test]
    fn test_execute_keeps_output_and_bindings() {
        let _serial = SERIAL.lock();
        let sink = CaptureSink::new();
        let session = reference_session(&sink);
        session.execute("x <- 41; print(x + 1)").unwrap();
        assert_eq!(sink.stdout(), "[1] 42\n");
        assert_eq!(session.fetch("x").unwrap(), Value::from(41.0));
        assert!(matches!(
            session.execute("stop('nope')"),
            Err(BridgeError::Eval(_))
        ));
        assert!(session.is_live());
        session.close().unwrap();
    }

    #[test]
    fn test_evaluate_unrepresentable_is_opaque() {
        let _serial = SERIAL.lock();
        let sink = CaptureSink::new();
        let session = reference_session(&sink);
        assert_eq!(
            session.evaluate("matrix(1:4, 2)").unwrap(),
            Value::Opaque("matrix".to_string())
        );
        session.evaluate("m <- matrix(1:4, 2)").unwrap();
        assert!(matches!(
            session.fetch("m"),
            Err(BridgeError::UnrepresentableType(_))
        ));
    }

    #[test]
    fn test_zero_depth_is_rejected() {
        let _serial = SERIAL.lock();
        let result = SessionBuilder::new()
            .config(Config::default())
            .backend(Backend::Reference)
            .max_depth(0)
            .open();
        assert!(matches!(result, Err(BridgeError::Initialization(_))));
        assert!(!is_session_live());
    }
}
