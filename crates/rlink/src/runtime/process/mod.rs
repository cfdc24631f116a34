//! Backend driving an installed R interpreter over pipes
//!
//! The child runs `R --vanilla --slave` for the lifetime of the session. A
//! prelude attaches the `rlink:bridge` helper environment to the search path,
//! out of reach of `rm()` in the global environment. Every request is a single
//! line calling one helper with a request id, and every reply is a frame
//! tagged with a per-session token and that id (see [`wire`]). Whatever R
//! prints before the frame is streamed to the sink.

mod wire;

use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use rlink_logger as logger;

use crate::errors::BridgeError;
use crate::marshal;
use crate::robject::RObject;
use crate::runtime::Runtime;
use crate::sink::{OutputSink, OutputStream};
use wire::{Frame, FrameReader};

const PRELUDE: &str = include_str!("prelude.R");

/// Search path entry holding the helpers
const BRIDGE_ENV: &str = "rlink:bridge";

/// How long `quit()` may take before the child is killed
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

pub struct ProcessRuntime {
    executable: PathBuf,
    child: Child,
    stdin: Option<ChildStdin>,
    reader: FrameReader<BufReader<ChildStdout>>,
    stderr_drain: Option<JoinHandle<()>>,
    version: String,
    next_id: u64,
    alive: bool,
}

/// Token R prefixes its replies with; unknown to anything user code prints
fn session_token() -> String {
    let seed = RandomState::new().hash_one((std::process::id(), SystemTime::now()));
    format!("{:016x}", seed)
}

impl ProcessRuntime {
    /// Start R from `executable` and install the helper prelude
    pub fn spawn(executable: &Path) -> Result<Self, BridgeError> {
        logger::debug(&format!("Starting R process: {}", executable.display()));

        let mut command = Command::new(executable);
        if let Some(r_home) = rlink_config::resolve_r_home(executable) {
            logger::debug(&format!("Using R_HOME={}", r_home.display()));
            command.env("R_HOME", r_home);
        }
        let mut child = command
            .args(["--vanilla", "--slave"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                BridgeError::Initialization(format!(
                    "Failed to start '{}': {}",
                    executable.display(),
                    e
                ))
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (Some(stdin), Some(stdout), Some(stderr)) = (stdin, stdout, stderr) else {
            let _ = child.kill();
            return Err(BridgeError::Initialization(
                "R process pipes are unavailable".to_string(),
            ));
        };

        let stderr_drain = thread::Builder::new()
            .name("rlink-r-stderr".to_string())
            .spawn(move || {
                use std::io::BufRead;
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    logger::runtime_diagnostic(&line);
                }
            })?;

        let mut runtime = Self {
            executable: executable.to_path_buf(),
            child,
            stdin: Some(stdin),
            reader: FrameReader::new(BufReader::new(stdout), session_token()),
            stderr_drain: Some(stderr_drain),
            version: String::new(),
            next_id: 0,
            alive: true,
        };

        runtime.handshake().map_err(|e| {
            runtime.kill();
            BridgeError::Initialization(format!("R did not start cleanly: {}", e))
        })?;
        logger::info(&format!("R process ready: {}", runtime.version));
        Ok(runtime)
    }

    /// `R.version.string` reported by the child
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    fn handshake(&mut self) -> Result<(), BridgeError> {
        self.send(PRELUDE)?;
        let mut startup = |chunk: &str, _stream: OutputStream| {
            logger::debug(&format!("R startup output: {}", chunk.trim_end()));
        };
        let token = format!("\"{}\"", self.reader.token());
        match self.request("hello", &token, &mut startup)? {
            Frame::Ok {
                version: Some(version),
                ..
            } => {
                self.version = wire::decode_hex(&version)?;
                Ok(())
            }
            other => Err(BridgeError::Protocol(format!(
                "unexpected handshake reply: {:?}",
                other
            ))),
        }
    }

    fn send(&mut self, text: &str) -> Result<(), BridgeError> {
        let stdin = self.stdin.as_mut().ok_or(BridgeError::SessionClosed)?;
        stdin.write_all(text.as_bytes())?;
        if !text.ends_with('\n') {
            stdin.write_all(b"\n")?;
        }
        stdin.flush()?;
        Ok(())
    }

    /// Call helper `name` with `args` under a fresh request id and read until
    /// its reply arrives
    fn request(
        &mut self,
        name: &str,
        args: &str,
        out: &mut dyn OutputSink,
    ) -> Result<Frame, BridgeError> {
        self.next_id += 1;
        let id = self.next_id;
        let line = format!(
            "invisible(as.environment(\"{}\")${}(\"{}\", {}))",
            BRIDGE_ENV, name, id, args
        );
        let reply = match self.send(&line) {
            Ok(()) => self.reader.read_reply(id, out),
            Err(e) => Err(e),
        };
        match reply {
            Ok(frame) => frame.into_result(),
            Err(BridgeError::RuntimeExited(_)) => Err(self.died()),
            Err(BridgeError::Io(e)) if matches!(self.child.try_wait(), Ok(Some(_))) => {
                logger::debug(&format!("Pipe to R failed: {}", e));
                Err(self.died())
            }
            Err(e) => Err(e),
        }
    }

    /// Reap a child that went away on its own
    fn died(&mut self) -> BridgeError {
        self.alive = false;
        self.kill();
        let detail = match self.child.try_wait() {
            Ok(Some(status)) => format!("R process exited with {}", status),
            _ => "R process closed its output".to_string(),
        };
        logger::error(&detail);
        BridgeError::RuntimeExited(detail)
    }

    fn kill(&mut self) {
        self.stdin = None;
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
        if let Some(handle) = self.stderr_drain.take() {
            let _ = handle.join();
        }
    }
}

fn value_of(frame: Frame) -> Result<RObject, BridgeError> {
    match frame {
        Frame::Ok {
            value: Some(value), ..
        } => value.into_robject(),
        other => Err(BridgeError::Protocol(format!(
            "expected a value frame, got {:?}",
            other
        ))),
    }
}

fn expect_ok(frame: Frame, what: &str) -> Result<(), BridgeError> {
    match frame {
        Frame::Ok { .. } => Ok(()),
        other => Err(BridgeError::Protocol(format!(
            "unexpected {} reply: {:?}",
            what, other
        ))),
    }
}

impl Runtime for ProcessRuntime {
    fn name(&self) -> &'static str {
        "process"
    }

    fn eval(&mut self, code: &str, out: &mut dyn OutputSink) -> Result<RObject, BridgeError> {
        let args = format!("\"{}\", FALSE", wire::encode_hex(code));
        value_of(self.request("eval_code", &args, out)?)
    }

    fn execute(&mut self, code: &str, out: &mut dyn OutputSink) -> Result<(), BridgeError> {
        let args = format!("\"{}\", TRUE", wire::encode_hex(code));
        expect_ok(self.request("eval_code", &args, out)?, "execute")
    }

    fn assign(
        &mut self,
        name: &str,
        value: RObject,
        out: &mut dyn OutputSink,
    ) -> Result<(), BridgeError> {
        let args = format!(
            "\"{}\", {}",
            wire::encode_hex(name),
            marshal::to_r_source(&value)?
        );
        expect_ok(self.request("assign_value", &args, out)?, "assign")
    }

    fn get(&mut self, name: &str, out: &mut dyn OutputSink) -> Result<Option<RObject>, BridgeError> {
        let args = format!("\"{}\"", wire::encode_hex(name));
        match self.request("get_value", &args, out)? {
            Frame::Missing => Ok(None),
            frame => value_of(frame).map(Some),
        }
    }

    fn is_alive(&self) -> bool {
        self.alive
    }

    fn shutdown(&mut self) -> Result<(), BridgeError> {
        if self.stdin.is_none() {
            return Ok(());
        }
        // A child that already died cannot take the quit request
        let _ = self.send("quit(save = \"no\")");
        self.stdin = None;

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        loop {
            match self.child.try_wait()? {
                Some(status) => {
                    logger::debug(&format!("R process exited with {}", status));
                    break;
                }
                None if Instant::now() >= deadline => {
                    logger::warn("R process did not exit after quit(); killing it");
                    break;
                }
                None => thread::sleep(Duration::from_millis(20)),
            }
        }
        self.kill();
        Ok(())
    }
}

impl Drop for ProcessRuntime {
    fn drop(&mut self) {
        self.kill();
    }
}
