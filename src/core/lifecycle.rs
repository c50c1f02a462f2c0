// Service capability trait and the ordered lifecycle that drives it.
use std::panic::{self, AssertUnwindSafe};

use serde_json::{Map, Value};

use crate::core::context::RequestContext;
use crate::core::error::ServiceResult;
use crate::failure::panic_failure;
use crate::log::Severity;

/// Lifecycle position of a call. Advances strictly forward; `Failed` is only
/// entered from `Running`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    Created,
    Init,
    Input,
    LoadSession,
    Locked,
    Running,
    Failed,
    Unlocked,
    PostRun,
    OutputBuilt,
    Done,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Created => "created",
            Stage::Init => "init",
            Stage::Input => "input",
            Stage::LoadSession => "load_session",
            Stage::Locked => "locked",
            Stage::Running => "running",
            Stage::Failed => "failed",
            Stage::Unlocked => "unlocked",
            Stage::PostRun => "post_run",
            Stage::OutputBuilt => "output_built",
            Stage::Done => "done",
        }
    }
}

/// A concrete single-call service.
///
/// `run`, `load_session`, `lock` and `unlock` are required. The remaining
/// hooks default to no-ops. Business failures are produced with
/// [`RequestContext::error`] or [`RequestContext::fail`], which log before
/// returning the `Failure`.
pub trait Service {
    /// Name used in logs; defaults to the unqualified type name.
    fn name(&self) -> &str {
        short_type_name(std::any::type_name::<Self>())
    }

    fn run(&mut self, ctx: &mut RequestContext) -> ServiceResult<()>;

    fn load_session(&mut self, ctx: &mut RequestContext) -> ServiceResult<()>;

    fn lock(&mut self, ctx: &mut RequestContext) -> ServiceResult<()>;

    /// Only called after `run` succeeded. A failed `run` leaves the lock to
    /// `recover`.
    fn unlock(&mut self, ctx: &mut RequestContext) -> ServiceResult<()>;

    fn init(&mut self, _ctx: &mut RequestContext) -> ServiceResult<()> {
        Ok(())
    }

    fn input(&mut self, _ctx: &mut RequestContext) -> ServiceResult<()> {
        Ok(())
    }

    fn post_run(&mut self, _ctx: &mut RequestContext) -> ServiceResult<()> {
        Ok(())
    }

    fn output(&mut self, _ctx: &mut RequestContext) -> ServiceResult<()> {
        Ok(())
    }

    /// Compensating action for a failed call. Runs at most once per call.
    fn recover(&mut self, _ctx: &mut RequestContext) {}

    /// Runs after a success response was written.
    fn finish(&mut self, _ctx: &mut RequestContext) {}
}

impl<S: Service + ?Sized> Service for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn run(&mut self, ctx: &mut RequestContext) -> ServiceResult<()> {
        (**self).run(ctx)
    }

    fn load_session(&mut self, ctx: &mut RequestContext) -> ServiceResult<()> {
        (**self).load_session(ctx)
    }

    fn lock(&mut self, ctx: &mut RequestContext) -> ServiceResult<()> {
        (**self).lock(ctx)
    }

    fn unlock(&mut self, ctx: &mut RequestContext) -> ServiceResult<()> {
        (**self).unlock(ctx)
    }

    fn init(&mut self, ctx: &mut RequestContext) -> ServiceResult<()> {
        (**self).init(ctx)
    }

    fn input(&mut self, ctx: &mut RequestContext) -> ServiceResult<()> {
        (**self).input(ctx)
    }

    fn post_run(&mut self, ctx: &mut RequestContext) -> ServiceResult<()> {
        (**self).post_run(ctx)
    }

    fn output(&mut self, ctx: &mut RequestContext) -> ServiceResult<()> {
        (**self).output(ctx)
    }

    fn recover(&mut self, ctx: &mut RequestContext) {
        (**self).recover(ctx);
    }

    fn finish(&mut self, ctx: &mut RequestContext) {
        (**self).finish(ctx);
    }
}

fn short_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Drives one call through the lifecycle and returns the output map.
///
/// On a `run` failure the output is discarded, `recover` runs and the failure
/// is returned without touching `unlock`, `post_run` or `output`. Failures in
/// other steps return immediately; the failure handler recovers those.
pub fn work<S>(service: &mut S, ctx: &mut RequestContext) -> ServiceResult<Map<String, Value>>
where
    S: Service + ?Sized,
{
    ctx.advance(Stage::Init);
    service.init(ctx)?;

    if ctx.is_verbose() {
        ctx.advance(Stage::LoadSession);
        service.load_session(ctx)?;
        ctx.advance(Stage::Input);
        service.input(ctx)?;
    } else {
        ctx.advance(Stage::Input);
        service.input(ctx)?;
        ctx.advance(Stage::LoadSession);
        service.load_session(ctx)?;
    }

    ctx.advance(Stage::Locked);
    service.lock(ctx)?;

    ctx.advance(Stage::Running);
    if let Err(failure) = service.run(ctx) {
        ctx.advance(Stage::Failed);
        ctx.clear_output();
        recover_once(service, ctx);
        return Err(failure);
    }

    ctx.advance(Stage::Unlocked);
    service.unlock(ctx)?;
    ctx.advance(Stage::PostRun);
    service.post_run(ctx)?;
    ctx.advance(Stage::OutputBuilt);
    service.output(ctx)?;
    ctx.advance(Stage::Done);

    Ok(ctx.take_output())
}

/// Runs `recover` unless it already ran for this call. A panic inside it is
/// contained and logged as `recover failed`; the carried failure stands.
pub(crate) fn recover_once<S>(service: &mut S, ctx: &mut RequestContext)
where
    S: Service + ?Sized,
{
    if ctx.is_recovered() {
        return;
    }
    ctx.mark_recovered();
    let recovered = panic::catch_unwind(AssertUnwindSafe(|| service.recover(ctx)));
    if let Err(payload) = recovered {
        let nested = panic_failure(payload);
        let mut fields = Map::new();
        fields.insert("service".to_string(), Value::from(ctx.name()));
        fields.insert("id".to_string(), Value::from(ctx.id()));
        fields.insert("stage".to_string(), Value::from(ctx.stage().as_str()));
        fields.insert("panic".to_string(), Value::from(nested.to_string()));
        ctx.sink().log(Severity::Error, "recover failed", &fields);
    }
}

#[cfg(test)]
mod tests {
    use super::{Service, Stage, short_type_name, work};
    use crate::config::DeploymentMode;
    use crate::core::context::RequestContext;
    use crate::core::error::{ErrorCode, ServiceResult};
    use crate::log::{MemorySink, Severity};
    use serde_json::{Value, json};
    use std::sync::Arc;

    #[derive(Default)]
    struct Probe {
        calls: Vec<&'static str>,
        fail_in: Option<&'static str>,
        panic_in_recover: bool,
    }

    impl Probe {
        fn step(&mut self, ctx: &RequestContext, name: &'static str) -> ServiceResult<()> {
            self.calls.push(name);
            if self.fail_in == Some(name) {
                return Err(ctx.fail(name, Value::Null));
            }
            Ok(())
        }
    }

    impl Service for Probe {
        fn run(&mut self, ctx: &mut RequestContext) -> ServiceResult<()> {
            ctx.set_output("partial", true);
            self.step(ctx, "run")
        }
        fn load_session(&mut self, ctx: &mut RequestContext) -> ServiceResult<()> {
            self.step(ctx, "load_session")
        }
        fn lock(&mut self, ctx: &mut RequestContext) -> ServiceResult<()> {
            self.step(ctx, "lock")
        }
        fn unlock(&mut self, ctx: &mut RequestContext) -> ServiceResult<()> {
            self.step(ctx, "unlock")
        }
        fn init(&mut self, ctx: &mut RequestContext) -> ServiceResult<()> {
            self.step(ctx, "init")
        }
        fn input(&mut self, ctx: &mut RequestContext) -> ServiceResult<()> {
            self.step(ctx, "input")
        }
        fn post_run(&mut self, ctx: &mut RequestContext) -> ServiceResult<()> {
            self.step(ctx, "post_run")
        }
        fn output(&mut self, ctx: &mut RequestContext) -> ServiceResult<()> {
            ctx.set_output("done", 1);
            self.step(ctx, "output")
        }
        fn recover(&mut self, _ctx: &mut RequestContext) {
            self.calls.push("recover");
            if self.panic_in_recover {
                panic!("recover blew up");
            }
        }
    }

    fn context(mode: DeploymentMode) -> RequestContext {
        RequestContext::new(Some(serde_json::Map::new()), mode, Arc::new(MemorySink::new()))
    }

    #[test]
    fn verbose_modes_load_session_first() {
        for mode in [DeploymentMode::Local, DeploymentMode::Staging] {
            let mut probe = Probe::default();
            let mut ctx = context(mode);
            let output = work(&mut probe, &mut ctx).expect("work");
            assert_eq!(
                probe.calls,
                ["init", "load_session", "input", "lock", "run", "unlock", "post_run", "output"]
            );
            assert_eq!(Value::Object(output), json!({"partial": true, "done": 1}));
            assert_eq!(ctx.stage(), Stage::Done);
        }
    }

    #[test]
    fn live_mode_validates_input_first() {
        let mut probe = Probe::default();
        let mut ctx = context(DeploymentMode::Live);
        work(&mut probe, &mut ctx).expect("work");
        assert_eq!(
            probe.calls,
            ["init", "input", "load_session", "lock", "run", "unlock", "post_run", "output"]
        );
    }

    #[test]
    fn run_failure_skips_unlock_and_recovers_once() {
        let mut probe = Probe {
            fail_in: Some("run"),
            ..Probe::default()
        };
        let mut ctx = context(DeploymentMode::Live);
        let err = work(&mut probe, &mut ctx).unwrap_err();
        assert_eq!(err.code(), ErrorCode::FAIL);
        assert_eq!(
            probe.calls,
            ["init", "input", "load_session", "lock", "run", "recover"]
        );
        assert!(ctx.output().is_empty());
        assert_eq!(ctx.stage(), Stage::Failed);
        assert!(ctx.is_recovered());
    }

    #[test]
    fn panicking_recover_after_run_failure_keeps_the_failure() {
        let sink = Arc::new(MemorySink::new());
        let mut probe = Probe {
            fail_in: Some("run"),
            panic_in_recover: true,
            ..Probe::default()
        };
        let mut ctx = RequestContext::new(
            Some(serde_json::Map::new()),
            DeploymentMode::Live,
            sink.clone(),
        );
        let err = work(&mut probe, &mut ctx).unwrap_err();
        assert_eq!(err.code(), ErrorCode::FAIL);
        assert!(ctx.is_recovered());
        let errors = sink.at(Severity::Error);
        let record = errors
            .iter()
            .find(|entry| entry.message == "recover failed")
            .expect("recover failed record");
        assert_eq!(record.context.get("stage"), Some(&json!("failed")));
    }

    #[test]
    fn input_failure_stops_before_lock_without_recover() {
        let mut probe = Probe {
            fail_in: Some("input"),
            ..Probe::default()
        };
        let mut ctx = context(DeploymentMode::Live);
        let err = work(&mut probe, &mut ctx).unwrap_err();
        assert_eq!(err.message(), Some("input"));
        assert_eq!(probe.calls, ["init", "input"]);
        assert_eq!(ctx.stage(), Stage::Input);
        assert!(!ctx.is_recovered());
    }

    #[test]
    fn session_failure_in_verbose_mode_precedes_input() {
        let mut probe = Probe {
            fail_in: Some("load_session"),
            ..Probe::default()
        };
        let mut ctx = context(DeploymentMode::Staging);
        work(&mut probe, &mut ctx).unwrap_err();
        assert_eq!(probe.calls, ["init", "load_session"]);
    }

    #[test]
    fn boxed_service_drives_the_same_lifecycle() {
        let mut boxed: Box<dyn Service> = Box::new(Probe::default());
        let mut ctx = context(DeploymentMode::Live);
        work(&mut boxed, &mut ctx).expect("work");
        assert_eq!(boxed.name(), "Probe");
        assert_eq!(ctx.stage(), Stage::Done);
    }

    #[test]
    fn default_name_is_unqualified() {
        let probe = Probe::default();
        assert_eq!(probe.name(), "Probe");
        assert_eq!(short_type_name("a::b::Thing<c::D>"), "Thing");
    }
}
