//! Purpose: Process entry point for one call: decode, run the lifecycle, respond, log.
//! Exports: `Dispatcher`, `Response`.
//! Role: Owns the `RequestContext` and hands it to the failure handler by reference.
//! Invariants: Exactly one response is written per call; success and failure paths never both run.
//! Invariants: The success response carries `Err = NO_ERR`, injected last.
//! Invariants: At most one access-log record per call, skipped when `ignore_log` is set.

use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::config::Config;
use crate::core::context::RequestContext;
use crate::core::error::{ErrorCode, Failure, Outcome, ServiceResult};
use crate::core::lifecycle::{Service, Stage, work};
use crate::core::timer::Stopwatch;
use crate::failure::{FailureHandler, install_panic_hook, panic_failure};
use crate::log::{LogSink, Severity};
use crate::wire::{ERR_KEY, decode_input, send};

/// What was written for a call.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub body: Map<String, Value>,
    pub code: ErrorCode,
    pub outcome: Outcome,
    pub elapsed: f64,
}

pub struct Dispatcher {
    config: Config,
    sink: Arc<dyn LogSink>,
    handler: FailureHandler,
}

impl Dispatcher {
    /// Also installs the process panic hook (once per process).
    pub fn new(config: Config, sink: Arc<dyn LogSink>) -> Self {
        install_panic_hook();
        let handler = FailureHandler::new(config.clone(), sink.clone());
        Self {
            config,
            sink,
            handler,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs one call. `factory` builds the service; if it fails or panics no
    /// instance exists and the call ends fatally.
    pub fn main<S, F>(&self, body: Option<&[u8]>, factory: F, out: &mut dyn Write) -> Response
    where
        S: Service,
        F: FnOnce(&RequestContext) -> ServiceResult<S>,
    {
        let input = decode_input(body);
        let mut ctx = RequestContext::new(input.clone(), self.config.mode, self.sink.clone());

        let created = panic::catch_unwind(AssertUnwindSafe(|| factory(&ctx)));
        let mut service = match created {
            Ok(Ok(service)) => service,
            Ok(Err(failure)) => return self.fatal(&failure, out),
            Err(payload) => return self.fatal(&panic_failure(payload), out),
        };
        ctx.set_name(service.name());

        let mut watch = Stopwatch::new();
        watch.start();

        let result = panic::catch_unwind(AssertUnwindSafe(|| work(&mut service, &mut ctx)));
        let failure = match result {
            Ok(Ok(output)) => {
                return self.succeed(&mut service, &mut ctx, output, input, &mut watch, out);
            }
            Ok(Err(failure)) => failure,
            Err(payload) => {
                if ctx.stage() == Stage::Running {
                    ctx.advance(Stage::Failed);
                    ctx.clear_output();
                }
                panic_failure(payload)
            }
        };

        let code = self.handler.handle(&mut service, &mut ctx, failure, out);
        Response {
            body: crate::wire::error_body(code),
            code,
            outcome: Outcome::Recovered,
            elapsed: watch.end(),
        }
    }

    fn succeed<S>(
        &self,
        service: &mut S,
        ctx: &mut RequestContext,
        mut output: Map<String, Value>,
        input: Option<Map<String, Value>>,
        watch: &mut Stopwatch,
        out: &mut dyn Write,
    ) -> Response
    where
        S: Service + ?Sized,
    {
        output.insert(ERR_KEY.to_string(), Value::from(ErrorCode::NO_ERR));
        send(out, &output, &self.config, self.sink.as_ref());

        let finished = panic::catch_unwind(AssertUnwindSafe(|| service.finish(ctx)));
        if let Err(payload) = finished {
            let failure = panic_failure(payload);
            let mut fields = Map::new();
            fields.insert("service".to_string(), Value::from(ctx.name()));
            fields.insert("id".to_string(), Value::from(ctx.id()));
            fields.insert("failure".to_string(), Value::from(failure.to_string()));
            self.sink.log(Severity::Error, "finish failed", &fields);
        }

        let elapsed = watch.end();
        if elapsed > self.config.slow_call_secs {
            self.sink.log(
                Severity::Warning,
                &format!("Took too long: {elapsed} s"),
                &Map::new(),
            );
        }

        if !ctx.ignore_log() {
            self.access_log(ctx, input, elapsed);
        }

        Response {
            body: output,
            code: ErrorCode::NO_ERR,
            outcome: Outcome::Success,
            elapsed,
        }
    }

    /// One record: service, id, then the message bag or the raw input.
    fn access_log(&self, ctx: &RequestContext, input: Option<Map<String, Value>>, elapsed: f64) {
        let message = if ctx.message().is_empty() {
            input.unwrap_or_default()
        } else {
            ctx.message().clone()
        };
        let mut fields = Map::new();
        fields.insert("service".to_string(), Value::from(ctx.name()));
        fields.insert("id".to_string(), Value::from(ctx.id()));
        fields.extend(message);
        self.sink
            .log(Severity::Info, &format!("{elapsed}(sec)"), &fields);
    }

    fn fatal(&self, failure: &Failure, out: &mut dyn Write) -> Response {
        let code = self.handler.fatal(failure, out);
        Response {
            body: crate::wire::error_body(code),
            code,
            outcome: Outcome::Fatal,
            elapsed: 0.0,
        }
    }
}
