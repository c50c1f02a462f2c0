//! Purpose: Request decoding and response encoding for the JSON wire contract.
//! Exports: `decode_input`, `error_body`, `send`.
//! Role: Shared by the dispatcher and the failure handler so both write alike.
//! Invariants: Every response is one JSON object on one line carrying `Err`.
//! Invariants: A missing, malformed or non-object body decodes to no input.
//! Invariants: Size warnings are observational; nothing is truncated.

use std::io::Write;

use serde_json::{Map, Value};

use crate::config::{Config, DeploymentMode};
use crate::core::error::ErrorCode;
use crate::log::{LogSink, Severity};

pub const ERR_KEY: &str = "Err";

pub fn decode_input(body: Option<&[u8]>) -> Option<Map<String, Value>> {
    let body = body?;
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

pub fn error_body(code: ErrorCode) -> Map<String, Value> {
    let mut body = Map::new();
    body.insert(ERR_KEY.to_string(), Value::from(code));
    body
}

/// Encodes and writes `body`, returning the encoded size in bytes.
pub fn send(
    out: &mut dyn Write,
    body: &Map<String, Value>,
    config: &Config,
    sink: &dyn LogSink,
) -> usize {
    let encoded = serde_json::to_string(body).unwrap_or_else(|_| {
        format!("{{\"{ERR_KEY}\":{}}}", ErrorCode::SYSTEM)
    });
    let size = encoded.len();

    if config.mode != DeploymentMode::Live && size > config.output_warn_bytes {
        let mut ctx = Map::new();
        ctx.insert("size".to_string(), Value::from(format!("{size}(bytes)")));
        sink.log(Severity::Warning, "Too large output", &ctx);
    }

    let written = writeln!(out, "{encoded}").and_then(|_| out.flush());
    if let Err(err) = written {
        let mut ctx = Map::new();
        ctx.insert("err".to_string(), Value::from(err.to_string()));
        sink.log(Severity::Error, "failed to write response", &ctx);
    }
    size
}
