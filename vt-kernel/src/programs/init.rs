//! init: spawns and supervises the Pipeline Manager.

use std::sync::Arc;

use vt_abi::Value;

use crate::sandbox::{Program, Sandbox, program};

pub fn image() -> Arc<dyn Program> {
    program(run)
}

async fn run(ctx: Sandbox) -> i64 {
    loop {
        let mut env = Value::Map(Default::default());
        if let Some(drivers) = ctx.env().get("drivers") {
            env = Value::map([("drivers", Value::from(drivers.as_str()))]);
        }
        let pm = match ctx
            .sys(
                "process_spawn",
                vec![Value::from("/sys/pipeline"), Value::Float(1.0), env],
            )
            .await
        {
            Ok(Value::Int(pid)) => pid,
            _ => {
                log::warn!("init: no pipeline manager image");
                return 1;
            }
        };

        // Supervise: if the Pipeline Manager ever dies, respawn it.
        let _ = ctx.sys("process_wait", vec![Value::Int(pm)]).await;
        log::warn!("init: pipeline manager exited, restarting");
        ctx.checkpoint().await;
    }
}
