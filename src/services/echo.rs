// Stateless service: validates `msg` and returns it.
use lifecall::{RequestContext, Service, ServiceResult};
use serde_json::{Value, json};

#[derive(Debug, Default)]
pub(crate) struct Echo {
    msg: String,
    upper: bool,
}

impl Service for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn input(&mut self, ctx: &mut RequestContext) -> ServiceResult<()> {
        let msg = ctx.get_input_with("msg", |value| {
            value.as_str().is_some_and(|text| !text.is_empty())
        })?;
        self.msg = msg.as_str().unwrap_or_default().to_string();

        let flag = |key: &str| {
            ctx.input()
                .and_then(|input| input.get(key))
                .and_then(Value::as_bool)
                .unwrap_or(false)
        };
        self.upper = flag("upper");
        let quiet = flag("quiet");
        ctx.set_ignore_log(quiet);
        Ok(())
    }

    fn load_session(&mut self, _ctx: &mut RequestContext) -> ServiceResult<()> {
        Ok(())
    }

    fn lock(&mut self, _ctx: &mut RequestContext) -> ServiceResult<()> {
        Ok(())
    }

    fn unlock(&mut self, _ctx: &mut RequestContext) -> ServiceResult<()> {
        Ok(())
    }

    fn run(&mut self, ctx: &mut RequestContext) -> ServiceResult<()> {
        let msg = if self.upper {
            self.msg.to_uppercase()
        } else {
            self.msg.clone()
        };
        ctx.debug("echoing", json!({ "len": msg.len() }));
        ctx.set_output("msg", msg);
        Ok(())
    }
}
