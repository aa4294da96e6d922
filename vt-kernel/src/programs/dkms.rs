//! DKMS: the driver supervisor.
//!
//! Receives load requests over `\Mqueue\dkms`, spawns each driver at
//! ring 2, and restarts drivers that die, up to a bounded number of
//! attempts. The kernel itself only observes driver deaths and fails
//! their in-flight IRPs; keeping them running is this process's job.

use std::sync::Arc;

use vt_abi::Value;

use crate::sandbox::{Program, Sandbox, program};

/// Restarts before a driver is declared failed.
const MAX_RESTARTS: u32 = 3;

pub fn image() -> Arc<dyn Program> {
    program(run)
}

async fn run(ctx: Sandbox) -> i64 {
    let queue = match ctx
        .sys("ke_create_mqueue", vec![Value::from("dkms"), Value::Int(16)])
        .await
    {
        Ok(Value::Str(token)) => token,
        _ => return 1,
    };

    loop {
        let message = match ctx
            .sys("ke_mq_receive", vec![Value::from(queue.as_str())])
            .await
        {
            Ok(message) => message,
            Err(_) => return 0,
        };
        let Some(path) = message
            .get("vPayload")
            .get("sPath")
            .as_str()
            .map(str::to_string)
        else {
            continue;
        };

        // One supervision task per driver: load, wait, restart on death.
        let supervised = ctx.spawn_task("dkms-worker", move |worker| async move {
            supervise(worker, path).await
        });
        if supervised.is_err() {
            log::warn!("dkms: failed to start supervision task");
        }
        ctx.checkpoint().await;
    }
}

async fn supervise(ctx: Sandbox, path: String) -> i64 {
    for attempt in 0..=MAX_RESTARTS {
        let pid = match ctx
            .sys(
                "process_spawn",
                vec![Value::from(path.as_str()), Value::Float(2.0)],
            )
            .await
        {
            Ok(Value::Int(pid)) => pid,
            _ => {
                log::warn!("dkms: no driver image at {path}");
                return 1;
            }
        };
        if attempt > 0 {
            log::info!("dkms: restarted {path} (attempt {attempt})");
        }

        let _ = ctx.sys("process_wait", vec![Value::Int(pid)]).await;
        ctx.checkpoint().await;
    }
    log::warn!("dkms: {path} exceeded restart budget");
    1
}
