//! Preemption: tight loops cannot starve each other.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use vt_abi::Ring;

use common::{bare, seed_boot_processes, spawn};

/// Two ring 3 spinners with no voluntary yields both make progress, with
/// a bounded progress ratio, and the preemption counter moves.
#[test]
fn spinners_share_the_processor() {
    let (_host, kernel) = bare();
    seed_boot_processes(&kernel);

    let counters = [Arc::new(AtomicU64::new(0)), Arc::new(AtomicU64::new(0))];
    for (i, counter) in counters.iter().enumerate() {
        let counter = counter.clone();
        spawn(
            &kernel,
            &format!("spin{i}"),
            Ring::User,
            None,
            move |ctx| {
                let counter = counter.clone();
                async move {
                    loop {
                        counter.fetch_add(1, Ordering::Relaxed);
                        ctx.checkpoint().await;
                    }
                }
            },
        );
    }

    let start = kernel.uptime();
    vt_kernel::run_until(&kernel, 1_000_000, |k| k.uptime() - start >= 2.0);

    let a = counters[0].load(Ordering::Relaxed);
    let b = counters[1].load(Ordering::Relaxed);
    assert!(a > 0 && b > 0, "both spinners must progress (a={a}, b={b})");

    let ratio = a.max(b) as f64 / a.min(b).max(1) as f64;
    assert!(ratio < 10.0, "progress ratio {ratio:.1} breaches 10:1");

    assert!(kernel.preempt().preemptions() > 0);
    assert!(kernel.sched_stats().preemptions > 0);
}

/// A spinner yields within one quantum plus one check interval: a
/// same-ring observer gets the processor promptly.
#[test]
fn spinner_yields_within_quantum() {
    let (_host, kernel) = bare();
    seed_boot_processes(&kernel);

    let spinner_started = Arc::new(AtomicU64::new(0));
    {
        let spinner_started = spinner_started.clone();
        spawn(&kernel, "spinner", Ring::User, None, move |ctx| {
            let spinner_started = spinner_started.clone();
            async move {
                spinner_started.store(1, Ordering::Relaxed);
                loop {
                    ctx.checkpoint().await;
                }
            }
        });
    }

    let observer_ran = Arc::new(AtomicU64::new(0));
    {
        let observer_ran = observer_ran.clone();
        spawn(&kernel, "observer", Ring::User, None, move |ctx| {
            let observer_ran = observer_ran.clone();
            async move {
                loop {
                    observer_ran.fetch_add(1, Ordering::Relaxed);
                    ctx.checkpoint().await;
                }
            }
        });
    }

    let start = kernel.uptime();
    vt_kernel::run_until(&kernel, 1_000_000, |k| {
        observer_ran.load(Ordering::Relaxed) >= 2 || k.uptime() - start > 1.0
    });
    let elapsed = kernel.uptime() - start;

    assert!(observer_ran.load(Ordering::Relaxed) >= 2);
    // Generous bound: a handful of quanta, far below the watchdog.
    assert!(elapsed < 1.0, "observer starved for {elapsed:.3}s");
}
