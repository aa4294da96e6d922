//! Boot a VT-OS kernel on a simulated host, run a short demo session,
//! and print the machine state.

use vt_abi::{Ring, Value};
use vt_kernel::kernel::{SpawnSpec, StdioSpec};
use vt_kernel::sandbox::program;
use vt_kernel::{VirtHost, boot, programs, run_until};

fn main() {
    let (builder, _fs) = VirtHost::builder().echo_console().managed_fs([
        ("/boot/loader.cfg", b"log_level=1\n".to_vec()),
        (
            "/etc/drivers.cfg",
            b"/drivers/null.sys\n/drivers/vtty.sys\n".to_vec(),
        ),
    ]);
    let host = builder.build();

    let kernel = boot(host.clone(), programs::standard_images(), true);

    // A ring 3 session exercising the VFS path end to end.
    let demo = program(|ctx| async move {
        // Give the pipeline a moment to come up.
        for _ in 0..10 {
            ctx.yield_now().await;
        }
        let handle = loop {
            match ctx
                .sys("vfs_open", vec![Value::from("/dev/tty")])
                .await
            {
                Ok(Value::Str(handle)) => break handle,
                _ => ctx.sleep_ms(2).await,
            }
        };
        let _ = ctx
            .sys(
                "vfs_write",
                vec![
                    Value::from(handle.as_str()),
                    Value::Bytes(b"hello from ring 3\n".to_vec()),
                ],
            )
            .await;
        let _ = ctx
            .sys("vfs_close", vec![Value::from(handle.as_str())])
            .await;
        0
    });
    let demo_pid = kernel
        .spawn(
            SpawnSpec::new("demo", Ring::User, demo)
                .parent(vt_abi::Pid::INIT)
                .stdout(StdioSpec::Console),
        )
        .expect("spawn demo")
        .pid;

    let finished = run_until(&kernel, 5_000, |k| k.process_is_dead(demo_pid));

    let stats = kernel.sched_stats();
    println!();
    println!(
        "demo {}; {} iterations, {} context switches, {} syscalls",
        if finished { "completed" } else { "timed out" },
        stats.iterations,
        stats.context_switches,
        stats.syscalls
    );
}
