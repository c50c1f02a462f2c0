//! Purpose: Translate failed calls into exactly one error response.
//! Exports: `FailureHandler`, `install_panic_hook`, `panic_failure`.
//! Role: The failure path of the dispatcher; mutually exclusive with the success path.
//! Invariants: The transmitted code is always coerced; output never leaks on failure.
//! Invariants: `recover` runs at most once per call, and a panic inside it is contained.
//! Invariants: The only process-wide state is the panic hook and its per-thread report slot.

use std::any::Any;
use std::cell::RefCell;
use std::io::Write;
use std::panic;
use std::sync::{Arc, Once};

use serde_json::{Map, Value};

use crate::config::Config;
use crate::core::context::{RequestContext, call_site};
use crate::core::error::{Band, ErrorCode, Failure, classify, coerce};
use crate::core::lifecycle::{Service, recover_once};
use crate::log::{LogSink, Severity};
use crate::wire::{error_body, send};

#[derive(Clone, Debug)]
struct PanicReport {
    message: String,
    location: Option<String>,
}

thread_local! {
    static LAST_PANIC: RefCell<Option<PanicReport>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// Records panic message and location for the handler, then defers to the
/// previous hook (stderr only; stdout carries the response).
pub fn install_panic_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let report = PanicReport {
                message: payload_message(info.payload()),
                location: info.location().map(call_site),
            };
            LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(report));
            previous(info);
        }));
    });
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "panic".to_string()
}

/// Converts a caught panic into a failure carrying `NO_ERR` as its raw code.
pub fn panic_failure(payload: Box<dyn Any + Send>) -> Failure {
    let report = LAST_PANIC.with(|slot| slot.borrow_mut().take());
    let (message, location) = match report {
        Some(report) => (report.message, report.location),
        None => (payload_message(payload.as_ref()), None),
    };
    let failure = Failure::new(ErrorCode::NO_ERR).with_message(message);
    match location {
        Some(location) => failure.with_location(location),
        None => failure,
    }
}

pub struct FailureHandler {
    config: Config,
    sink: Arc<dyn LogSink>,
}

impl FailureHandler {
    pub fn new(config: Config, sink: Arc<dyn LogSink>) -> Self {
        Self { config, sink }
    }

    /// Recovers the current instance, writes `{Err: code}` and logs by the
    /// raw code. Returns the transmitted code.
    pub fn handle<S>(
        &self,
        service: &mut S,
        ctx: &mut RequestContext,
        failure: Failure,
        out: &mut dyn Write,
    ) -> ErrorCode
    where
        S: Service + ?Sized,
    {
        if self.config.mode.is_debug() {
            self.dump(ctx, &failure);
        }

        recover_once(service, ctx);

        let raw = failure.code();
        let code = coerce(raw);
        ctx.clear_output();
        send(out, &error_body(code), &self.config, self.sink.as_ref());

        match classify(raw) {
            Band::NoErr => {
                let message = format!(
                    "Exception({raw}): {} {}",
                    failure.message().unwrap_or_default(),
                    failure.location().unwrap_or_default()
                );
                let mut fields = self.call_fields(ctx);
                fields.extend(failure.fields().clone());
                self.sink.log(Severity::Error, message.trim_end(), &fields);
            }
            // Already logged at the point of failure, or expected noise.
            Band::InvalidInput | Band::Fail | Band::Retry => {}
            Band::OutOfRange | Band::System => {
                let message = format!("Error({raw}): {}", failure.message().unwrap_or_default());
                self.sink
                    .log(Severity::Error, message.trim_end(), &self.call_fields(ctx));
            }
        }
        code
    }

    /// No service instance exists to recover. Writes a best-effort
    /// `{Err: SYSTEM}`.
    pub fn fatal(&self, failure: &Failure, out: &mut dyn Write) -> ErrorCode {
        let mut fields = Map::new();
        fields.insert("err".to_string(), Value::from(failure.code()));
        fields.insert("failure".to_string(), Value::from(failure.to_string()));
        self.sink.log(
            Severity::Critical,
            "failure before service construction",
            &fields,
        );
        send(
            out,
            &error_body(ErrorCode::SYSTEM),
            &self.config,
            self.sink.as_ref(),
        );
        ErrorCode::SYSTEM
    }

    fn dump(&self, ctx: &RequestContext, failure: &Failure) {
        let mut fields = self.call_fields(ctx);
        fields.insert("failure".to_string(), Value::from(format!("{failure:#?}")));
        if let Some(input) = ctx.input() {
            fields.insert("input".to_string(), Value::Object(input.clone()));
        }
        fields.insert(
            "service_logs".to_string(),
            Value::Object(ctx.service_logs().clone()),
        );
        self.sink.log(Severity::Debug, "failure dump", &fields);
    }

    fn call_fields(&self, ctx: &RequestContext) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("service".to_string(), Value::from(ctx.name()));
        fields.insert("id".to_string(), Value::from(ctx.id()));
        fields.insert("stage".to_string(), Value::from(ctx.stage().as_str()));
        fields
    }
}
