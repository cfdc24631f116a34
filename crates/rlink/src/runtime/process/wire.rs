//! Frames exchanged with the R child process
//!
//! A reply is `FRAME_MARKER`, the session token, `:`, the request id, a space
//! and one JSON document, all on a single line. Condition text (messages,
//! warnings) is `CONDITION_MARKER`, the token, a space and one hex line.
//! Marker bytes not followed by the token are console output like any other
//! text, so nothing user code prints can be mistaken for a reply.
//!
//! Strings inside frames are hex encoded UTF-8; doubles are `%.17g` text so
//! NaN and infinities survive.

use std::io::BufRead;

use rlink_logger as logger;
use serde::Deserialize;

use crate::errors::BridgeError;
use crate::robject::{Attributes, RData, RObject};
use crate::sink::{OutputSink, OutputStream};

pub const FRAME_MARKER: u8 = 0x1e;
pub const CONDITION_MARKER: u8 = 0x1f;

fn is_marker(byte: u8) -> bool {
    byte == FRAME_MARKER || byte == CONDITION_MARKER
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Frame {
    Ok {
        #[serde(default)]
        value: Option<WireObject>,
        #[serde(default)]
        version: Option<String>,
    },
    Missing,
    Error {
        kind: ErrorKind,
        message: String,
    },
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Parse,
    Eval,
}

impl Frame {
    /// Turn an error frame into the matching bridge error
    pub fn into_result(self) -> Result<Frame, BridgeError> {
        match self {
            Frame::Error { kind, message } => {
                let message = decode_hex(&message)?;
                Err(match kind {
                    ErrorKind::Parse => BridgeError::Parse(message),
                    ErrorKind::Eval => BridgeError::Eval(message),
                })
            }
            other => Ok(other),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireObject {
    Null,
    Logical {
        values: Vec<bool>,
        names: Option<Vec<String>>,
        dim: Option<Vec<usize>>,
    },
    Double {
        values: Vec<String>,
        names: Option<Vec<String>>,
        dim: Option<Vec<usize>>,
    },
    Character {
        values: Vec<String>,
        names: Option<Vec<String>>,
        dim: Option<Vec<usize>>,
    },
    List {
        values: Vec<WireObject>,
        names: Option<Vec<String>>,
    },
    Opaque {
        class: String,
    },
}

impl WireObject {
    pub fn into_robject(self) -> Result<RObject, BridgeError> {
        let (data, names, dim) = match self {
            WireObject::Null => return Ok(RObject::null()),
            WireObject::Opaque { class } => return Ok(RObject::opaque(decode_hex(&class)?)),
            WireObject::Logical { values, names, dim } => (RData::Logical(values), names, dim),
            WireObject::Double { values, names, dim } => {
                let values = values
                    .iter()
                    .map(|text| parse_double(text))
                    .collect::<Result<Vec<_>, _>>()?;
                (RData::Double(values), names, dim)
            }
            WireObject::Character { values, names, dim } => {
                let values = values
                    .iter()
                    .map(|h| decode_hex(h))
                    .collect::<Result<Vec<_>, _>>()?;
                (RData::Character(values), names, dim)
            }
            WireObject::List { values, names } => {
                let values = values
                    .into_iter()
                    .map(WireObject::into_robject)
                    .collect::<Result<Vec<_>, _>>()?;
                (RData::List(values), names, None)
            }
        };
        let names = names
            .map(|names| names.iter().map(|h| decode_hex(h)).collect::<Result<Vec<_>, _>>())
            .transpose()?;
        Ok(RObject {
            data,
            attrs: Attributes { names, dim },
        })
    }
}

fn parse_double(text: &str) -> Result<f64, BridgeError> {
    text.parse::<f64>()
        .map_err(|_| BridgeError::Protocol(format!("invalid double '{}' in frame", text)))
}

/// Decode lowercase or uppercase hex into a UTF-8 string
pub fn decode_hex(hex: &str) -> Result<String, BridgeError> {
    if hex.len() % 2 != 0 {
        return Err(BridgeError::Protocol(format!(
            "odd-length hex string in frame: {}",
            hex
        )));
    }
    let bytes = (0..hex.len())
        .step_by(2)
        .map(|i| {
            hex.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| BridgeError::Protocol(format!("invalid hex string in frame: {}", hex)))
        })
        .collect::<Result<Vec<u8>, _>>()?;
    String::from_utf8(bytes)
        .map_err(|e| BridgeError::Protocol(format!("string from R is not UTF-8: {}", e)))
}

/// Encode a string as lowercase hex for the request line
pub fn encode_hex(text: &str) -> String {
    text.bytes().map(|b| format!("{:02x}", b)).collect()
}

/// What a marker byte and the rest of its line turned out to be
enum Tagged<'a> {
    Reply { id: u64, json: &'a [u8] },
    Condition(&'a [u8]),
    Console,
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn classify<'a>(token: &str, marker: u8, rest: &'a [u8]) -> Tagged<'a> {
    let Some(tail) = trim_line_end(rest).strip_prefix(token.as_bytes()) else {
        return Tagged::Console;
    };
    if marker == CONDITION_MARKER {
        return tail
            .strip_prefix(b" ")
            .map_or(Tagged::Console, Tagged::Condition);
    }
    let Some(tail) = tail.strip_prefix(b":") else {
        return Tagged::Console;
    };
    let Some(space) = tail.iter().position(|b| *b == b' ') else {
        return Tagged::Console;
    };
    std::str::from_utf8(&tail[..space])
        .ok()
        .and_then(|id| id.parse().ok())
        .map_or(Tagged::Console, |id| Tagged::Reply {
            id,
            json: &tail[space + 1..],
        })
}

/// Reads replies off R's stdout for one session token
pub struct FrameReader<R> {
    inner: R,
    token: String,
}

impl<R: BufRead> FrameReader<R> {
    pub fn new(inner: R, token: impl Into<String>) -> Self {
        Self {
            inner,
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Read until the reply to request `id` arrives
    ///
    /// Console text is forwarded to `out` as it is read, conditions go to the
    /// `Message` stream and replies to earlier requests are dropped. End of
    /// stream means R is gone and yields `RuntimeExited`.
    pub fn read_reply(&mut self, id: u64, out: &mut dyn OutputSink) -> Result<Frame, BridgeError> {
        let mut pending: Vec<u8> = Vec::new();
        loop {
            let available = self.inner.fill_buf()?;
            if available.is_empty() {
                flush_text(&mut pending, out, true);
                return Err(BridgeError::RuntimeExited(
                    "R closed its output stream".to_string(),
                ));
            }

            let Some(at) = available.iter().position(|b| is_marker(*b)) else {
                let len = available.len();
                pending.extend_from_slice(available);
                self.inner.consume(len);
                flush_text(&mut pending, out, false);
                continue;
            };

            let mut marker = available[at];
            pending.extend_from_slice(&available[..at]);
            self.inner.consume(at + 1);

            let mut line = Vec::new();
            self.inner.read_until(b'\n', &mut line)?;
            let mut start = 0;
            loop {
                let rest = &line[start..];
                match classify(&self.token, marker, rest) {
                    Tagged::Reply { id: reply, json } if reply == id => {
                        flush_text(&mut pending, out, true);
                        return Ok(serde_json::from_slice(json)?);
                    }
                    Tagged::Reply { id: stale, .. } => {
                        logger::debug(&format!("Dropping stale reply to request {}", stale));
                        break;
                    }
                    Tagged::Condition(hex) => {
                        flush_text(&mut pending, out, true);
                        let hex = std::str::from_utf8(hex).map_err(|_| {
                            BridgeError::Protocol("condition line is not hex".to_string())
                        })?;
                        out.write(&decode_hex(hex)?, OutputStream::Message);
                        break;
                    }
                    Tagged::Console => {
                        pending.push(marker);
                        match rest.iter().position(|b| is_marker(*b)) {
                            Some(next) => {
                                pending.extend_from_slice(&rest[..next]);
                                marker = rest[next];
                                start += next + 1;
                            }
                            None => {
                                pending.extend_from_slice(rest);
                                flush_text(&mut pending, out, false);
                                break;
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Forward buffered console bytes; unless `all`, keep an incomplete UTF-8
/// sequence at the end for the next read
pub fn flush_text(pending: &mut Vec<u8>, out: &mut dyn OutputSink, all: bool) {
    if pending.is_empty() {
        return;
    }
    let valid = match std::str::from_utf8(pending) {
        Ok(_) => pending.len(),
        Err(e) if !all => e.valid_up_to(),
        Err(_) => pending.len(),
    };
    let text = String::from_utf8_lossy(&pending[..valid]).into_owned();
    pending.drain(..valid);
    if !text.is_empty() {
        out.write(&text, OutputStream::Stdout);
    }
}
