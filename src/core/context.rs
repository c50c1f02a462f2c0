// Per-call request state: input, output, message bag, identity and log helpers.
use std::panic::Location;
use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::config::DeploymentMode;
use crate::core::error::{ErrorCode, Failure, ServiceResult};
use crate::core::lifecycle::Stage;
use crate::log::{LogSink, Severity};

pub const INVALID_ID: i64 = -1;

/// Mutable state of exactly one in-flight call.
///
/// Owned by the dispatcher; services and the failure handler only ever
/// borrow it.
pub struct RequestContext {
    name: String,
    input: Option<Map<String, Value>>,
    output: Map<String, Value>,
    message: Map<String, Value>,
    service_logs: Map<String, Value>,
    id: i64,
    service_id: u64,
    mode: DeploymentMode,
    verbose: bool,
    debug: bool,
    ignore_log: bool,
    stage: Stage,
    recovered: bool,
    sink: Arc<dyn LogSink>,
}

impl RequestContext {
    pub fn new(
        input: Option<Map<String, Value>>,
        mode: DeploymentMode,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            name: String::new(),
            input,
            output: Map::new(),
            message: Map::new(),
            service_logs: Map::new(),
            id: INVALID_ID,
            service_id: 0,
            mode,
            verbose: mode.is_verbose(),
            debug: mode.is_debug(),
            ignore_log: false,
            stage: Stage::Created,
            recovered: false,
            sink,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn mode(&self) -> DeploymentMode {
        self.mode
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub(crate) fn advance(&mut self, stage: Stage) {
        self.stage = stage;
    }

    pub(crate) fn is_recovered(&self) -> bool {
        self.recovered
    }

    pub(crate) fn mark_recovered(&mut self) {
        self.recovered = true;
    }

    pub fn sink(&self) -> &dyn LogSink {
        self.sink.as_ref()
    }

    // ---- identity ----

    pub fn id(&self) -> i64 {
        self.id
    }

    /// Composite identity: unix seconds in the high 32 bits, id in the low 32.
    pub fn service_id(&self) -> u64 {
        self.service_id
    }

    pub fn set_id(&mut self, id: i64) {
        self.id = id;
        self.service_id = compose_service_id(OffsetDateTime::now_utc().unix_timestamp(), id);
    }

    // ---- input ----

    pub fn input(&self) -> Option<&Map<String, Value>> {
        self.input.as_ref()
    }

    /// Value for `key`; absent input, absent key and JSON null all fail with
    /// `INVALID_INPUT`.
    #[track_caller]
    pub fn get_input(&self, key: &str) -> ServiceResult<&Value> {
        match self.input.as_ref().and_then(|input| input.get(key)) {
            Some(value) if !value.is_null() => Ok(value),
            _ => Err(self.error(
                ErrorCode::INVALID_INPUT,
                "Not found input",
                serde_json::json!({ "key": key }),
            )),
        }
    }

    /// Like `get_input`, but an explicit "unset" marker equal to `not` is
    /// rejected as well.
    #[track_caller]
    pub fn get_input_not(&self, key: &str, not: &Value) -> ServiceResult<&Value> {
        let value = self.get_input(key)?;
        if value == not {
            return Err(self.invalid_input(key, value));
        }
        Ok(value)
    }

    #[track_caller]
    pub fn get_input_with<F>(&self, key: &str, checker: F) -> ServiceResult<&Value>
    where
        F: FnOnce(&Value) -> bool,
    {
        let value = self.get_input(key)?;
        if !checker(value) {
            return Err(self.invalid_input(key, value));
        }
        Ok(value)
    }

    #[track_caller]
    pub fn get_input_as<T: DeserializeOwned>(&self, key: &str) -> ServiceResult<T> {
        let value = self.get_input(key)?;
        serde_json::from_value(value.clone()).map_err(|err| self.invalid_input(key, value).with_source(err))
    }

    #[track_caller]
    fn invalid_input(&self, key: &str, value: &Value) -> Failure {
        self.error(
            ErrorCode::INVALID_INPUT,
            "Invalid input",
            serde_json::json!({ "key": key, "value": value }),
        )
    }

    // ---- output and message bag ----

    pub fn set_output(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.output.insert(key.into(), value.into());
    }

    pub fn output(&self) -> &Map<String, Value> {
        &self.output
    }

    pub(crate) fn take_output(&mut self) -> Map<String, Value> {
        std::mem::take(&mut self.output)
    }

    pub(crate) fn clear_output(&mut self) {
        self.output.clear();
    }

    /// Merges into the bag; later keys win.
    pub fn set_message(&mut self, message: Map<String, Value>) {
        self.message.extend(message);
    }

    pub fn add_message(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.message.insert(key.into(), value.into());
    }

    pub fn message(&self) -> &Map<String, Value> {
        &self.message
    }

    pub fn ignore_log(&self) -> bool {
        self.ignore_log
    }

    pub fn set_ignore_log(&mut self, ignore: bool) {
        self.ignore_log = ignore;
    }

    // ---- service diagnostics ----

    pub fn add_service_log(&mut self, data: Map<String, Value>) {
        self.service_logs = data;
    }

    pub fn add_sub_service_log(&mut self, key: impl Into<String>, data: Map<String, Value>) {
        let slot = self
            .service_logs
            .entry("data")
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        if let Value::Object(sub) = slot {
            sub.insert(key.into(), Value::Object(data));
        }
    }

    pub fn service_logs(&self) -> &Map<String, Value> {
        &self.service_logs
    }

    // ---- logging ----

    /// Only emitted in local mode.
    pub fn debug(&self, message: &str, fields: Value) {
        if !self.debug {
            return;
        }
        let message = format!("{} ({}): {message}", self.name, self.id);
        self.sink.log(Severity::Debug, &message, &fields_of(fields));
    }

    pub fn warn(&self, message: &str, fields: Value) {
        let mut ctx = self.caller_fields();
        ctx.extend(fields_of(fields));
        self.sink.log(Severity::Warning, message, &ctx);
    }

    /// Logs the failure with its call site and returns it for the caller to
    /// propagate. `NO_ERR` is promoted to `SYSTEM`.
    #[track_caller]
    pub fn error(&self, code: ErrorCode, message: &str, fields: Value) -> Failure {
        let location = call_site(Location::caller());
        let code = if code == ErrorCode::NO_ERR {
            ErrorCode::SYSTEM
        } else {
            code
        };
        let fields = fields_of(fields);

        let mut ctx = self.caller_fields();
        ctx.insert("err".to_string(), Value::from(code));
        ctx.extend(fields.clone());
        self.sink
            .log(Severity::Error, &format!("{message}: {location}"), &ctx);

        Failure::new(code)
            .with_message(message)
            .with_location(location)
            .with_fields(fields)
    }

    #[track_caller]
    pub fn fail(&self, message: &str, fields: Value) -> Failure {
        self.error(ErrorCode::FAIL, message, fields)
    }

    fn caller_fields(&self) -> Map<String, Value> {
        let mut ctx = Map::new();
        ctx.insert("service".to_string(), Value::from(self.name.as_str()));
        ctx.insert("id".to_string(), Value::from(self.id));
        ctx
    }
}

/// Only the low 32 bits of `id` are kept: ids above `u32::MAX` alias smaller
/// ids and negative ids (such as `INVALID_ID`) wrap to their two's-complement
/// low word, so `-1` yields `0xffff_ffff`.
pub fn compose_service_id(unix_secs: i64, id: i64) -> u64 {
    ((unix_secs as u64 & 0xffff_ffff) << 32) | (id as u64 & 0xffff_ffff)
}

/// `file.rs(line)` with the directory stripped.
pub fn call_site(location: &Location<'_>) -> String {
    let file = Path::new(location.file())
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_else(|| location.file());
    format!("{file}({})", location.line())
}

pub(crate) fn fields_of(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}
