//! A session owned by one dedicated thread
//!
//! `SessionWorker` opens its session on a worker thread and runs every
//! request there in submission order. Callers get a `Pending` handle back
//! immediately and block only when they ask for the result, which keeps a
//! long evaluation off the caller's thread.

use crate::errors::BridgeError;
use crate::session::{Session, SessionBuilder};
use crate::value::Value;
use rlink_logger as logger;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

type Job = Box<dyn FnOnce(&Session) + Send>;

/// Result of a submitted request, delivered when the worker gets to it
#[derive(Debug)]
pub struct Pending<T> {
    receiver: Receiver<Result<T, BridgeError>>,
}

impl<T> Pending<T> {
    /// Block until the request has run
    pub fn wait(self) -> Result<T, BridgeError> {
        self.receiver
            .recv()
            .unwrap_or(Err(BridgeError::SessionClosed))
    }

    /// The result if the request has already run
    pub fn try_wait(&self) -> Option<Result<T, BridgeError>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(BridgeError::SessionClosed)),
        }
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, BridgeError>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(BridgeError::SessionClosed)),
        }
    }
}

pub struct SessionWorker {
    jobs: Option<Sender<Job>>,
    handle: Option<JoinHandle<Result<(), BridgeError>>>,
}

impl SessionWorker {
    /// Open a session from `builder` on a new worker thread
    ///
    /// Fails with the session's own open error, e.g. `AlreadyInitialized`.
    pub fn spawn(builder: SessionBuilder) -> Result<Self, BridgeError> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), BridgeError>>();
        let (jobs_tx, jobs_rx) = mpsc::channel::<Job>();

        let handle = thread::Builder::new()
            .name("rlink-session".to_string())
            .spawn(move || {
                let session = match builder.open() {
                    Ok(session) => {
                        let _ = ready_tx.send(Ok(()));
                        session
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return Ok(());
                    }
                };
                for job in jobs_rx {
                    job(&session);
                }
                session.close()
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                jobs: Some(jobs_tx),
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(BridgeError::Initialization(
                    "session worker exited during startup".to_string(),
                ))
            }
        }
    }

    /// Run `call` against the session on the worker thread
    pub fn submit<T, F>(&self, call: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(&Session) -> Result<T, BridgeError> + Send + 'static,
    {
        let (reply_tx, reply_rx) = mpsc::channel();
        let job: Job = Box::new(move |session| {
            let _ = reply_tx.send(call(session));
        });
        // A rejected job drops its reply sender, so the caller sees SessionClosed
        if let Some(jobs) = &self.jobs {
            let _ = jobs.send(job);
        }
        Pending { receiver: reply_rx }
    }

    pub fn execute(&self, code: impl Into<String>) -> Pending<()> {
        let code = code.into();
        self.submit(move |session| session.execute(&code))
    }

    pub fn evaluate(&self, code: impl Into<String>) -> Pending<Value> {
        let code = code.into();
        self.submit(move |session| session.evaluate(&code))
    }

    pub fn assign(&self, name: impl Into<String>, value: Value) -> Pending<()> {
        let name = name.into();
        self.submit(move |session| session.assign(&name, &value))
    }

    pub fn fetch(&self, name: impl Into<String>) -> Pending<Value> {
        let name = name.into();
        self.submit(move |session| session.fetch(&name))
    }

    /// Let queued requests finish, close the session and join the thread
    ///
    /// Returns the error the session closed with, if any.
    pub fn close(mut self) -> Result<(), BridgeError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), BridgeError> {
        self.jobs = None;
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        handle
            .join()
            .map_err(|_| BridgeError::Protocol("session worker panicked".to_string()))
            .and_then(|closed| closed)
    }
}

impl Drop for SessionWorker {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            logger::warn(&format!("Session worker failed to close its session: {}", e));
        }
    }
}
