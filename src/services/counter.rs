// Stateful service: per-id counter in a file store, serialized by an identity lock.
use std::path::Path;

use lifecall::lock::IdentityLock;
use lifecall::store::{Connector, DataClient, FileStore, run_in_transaction};
use lifecall::{ErrorCode, RequestContext, Service, ServiceResult};
use serde_json::{Map, Value, json};

const SCOPE: &str = "counter";

#[derive(Debug)]
pub(crate) struct Counter {
    store: FileStore,
    lock: IdentityLock,
    id: i64,
    step: i64,
    fail: bool,
    crash: bool,
}

impl Counter {
    pub(crate) fn open(state_dir: &Path) -> Self {
        Self {
            store: FileStore::new(state_dir.join("counter.json")),
            lock: IdentityLock::new(state_dir.join("locks")),
            id: 0,
            step: 1,
            fail: false,
            crash: false,
        }
    }

    fn key(&self) -> String {
        format!("{SCOPE}:{}", self.id)
    }
}

impl Service for Counter {
    fn name(&self) -> &str {
        SCOPE
    }

    fn input(&mut self, ctx: &mut RequestContext) -> ServiceResult<()> {
        let id = ctx.get_input_with("id", |value| value.as_i64().is_some_and(|id| id > 0))?;
        self.id = id.as_i64().unwrap_or_default();
        ctx.set_id(self.id);

        let input = ctx.input().cloned().unwrap_or_default();
        if let Some(step) = input.get("step").filter(|value| !value.is_null()) {
            self.step = step.as_i64().ok_or_else(|| {
                ctx.error(
                    ErrorCode::INVALID_INPUT,
                    "Invalid input",
                    json!({ "key": "step", "value": step }),
                )
            })?;
        }
        self.fail = input.get("fail").and_then(Value::as_bool).unwrap_or(false);
        self.crash = input.get("crash").and_then(Value::as_bool).unwrap_or(false);
        ctx.add_message("id", self.id);
        ctx.add_message("step", self.step);
        Ok(())
    }

    fn load_session(&mut self, _ctx: &mut RequestContext) -> ServiceResult<()> {
        self.store.connect()
    }

    fn lock(&mut self, ctx: &mut RequestContext) -> ServiceResult<()> {
        self.lock.acquire(SCOPE, ctx.id())
    }

    fn unlock(&mut self, _ctx: &mut RequestContext) -> ServiceResult<()> {
        self.lock.release()
    }

    fn run(&mut self, ctx: &mut RequestContext) -> ServiceResult<()> {
        let key = self.key();
        let (step, fail, crash) = (self.step, self.fail, self.crash);
        let count = run_in_transaction(&mut self.store, |tx| {
            tx.execute("incr", &[Value::from(key.as_str()), Value::from(step)])?;
            if fail {
                return Err(ctx.fail("counter refused", json!({ "key": key })));
            }
            if crash {
                panic!("counter crashed at {key}");
            }
            tx.fetch_one("get", &[Value::from(key.as_str())])
        })?;

        ctx.set_output("id", self.id);
        ctx.set_output("count", count.unwrap_or(Value::from(0)));
        Ok(())
    }

    fn post_run(&mut self, ctx: &mut RequestContext) -> ServiceResult<()> {
        let mut store = Map::new();
        store.insert(
            "path".to_string(),
            Value::from(self.store.path().display().to_string()),
        );
        ctx.add_sub_service_log("store", store);
        Ok(())
    }

    /// Discards any staged writes. The identity lock is left to process exit
    /// so a crashed call stays visible to concurrent callers until then.
    fn recover(&mut self, ctx: &mut RequestContext) {
        if self.store.in_transaction() {
            let _ = self.store.rollback();
        }
        self.store.close();
        if self.lock.is_held() {
            ctx.warn(
                "identity lock still held",
                json!({ "path": self.lock.path_for(SCOPE, self.id).display().to_string() }),
            );
        }
    }

    fn finish(&mut self, _ctx: &mut RequestContext) {
        self.store.close();
    }
}
