//! End-to-end scenarios over the public engine API.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use simsched::{cond_schedule, finish, schedule, Engine, RunResult, SimError, ThreadConstructor};

#[test]
fn single_thread_two_steps() {
    let flags = Arc::new((AtomicBool::new(false), AtomicBool::new(false)));
    let flags2 = Arc::clone(&flags);

    let ctor: ThreadConstructor = Box::new(move || {
        let flags = Arc::clone(&flags2);
        Box::new(move || {
            flags.0.store(true, Ordering::SeqCst);
            schedule();
            flags.1.store(true, Ordering::SeqCst);
            Ok(())
        })
    });

    let mut engine = Engine::with_seed(42);
    let result = engine.run(&[ctor], 10);

    assert!(result.is_ok());
    assert!(flags.0.load(Ordering::SeqCst));
    assert!(flags.1.load(Ordering::SeqCst));
}

#[test]
fn nested_finish_short_circuits() {
    let outer_flag = Arc::new(AtomicBool::new(false));
    let outer_flag2 = Arc::clone(&outer_flag);

    let ctor: ThreadConstructor = Box::new(move || {
        let outer_flag = Arc::clone(&outer_flag2);
        Box::new(move || {
            fn inner() -> ! {
                finish()
            }
            inner();
            #[allow(unreachable_code)]
            {
                outer_flag.store(true, Ordering::SeqCst);
                Ok(())
            }
        })
    });

    let mut engine = Engine::with_seed(7);
    let result = engine.run(&[ctor], 10);

    assert!(result.is_ok());
    assert!(!outer_flag.load(Ordering::SeqCst));
}

#[test]
fn explicit_deadlock() {
    let ctor: ThreadConstructor = Box::new(|| {
        Box::new(|| {
            cond_schedule(|| false);
            Ok(())
        })
    });

    let mut engine = Engine::with_seed(3);
    let result = engine.run(&[ctor], 10);

    assert!(matches!(result, RunResult::Deadlock));
}

#[test]
fn runaway_loop_times_out() {
    let ctor: ThreadConstructor = Box::new(|| {
        Box::new(|| {
            loop {
                schedule();
            }
        })
    });

    let mut engine = Engine::with_seed(9);
    let result = engine.run(&[ctor], 50);

    assert!(matches!(result, RunResult::Timeout));
}

#[test]
fn step_panic_is_captured() {
    let ctor: ThreadConstructor = Box::new(|| {
        Box::new(|| {
            schedule();
            Err(SimError::new("testmsg"))
        })
    });

    let mut engine = Engine::with_seed(1);
    let result = engine.run(&[ctor], 10);

    match result {
        RunResult::Panic(e) => assert_eq!(e.message, "testmsg"),
        other => panic!("expected Panic, got {other:?}"),
    }
}

#[test]
fn zero_threads_is_ok() {
    let mut engine = Engine::with_seed(1);
    let result = engine.run(&[], 10);
    assert!(matches!(result, RunResult::Ok));
}

#[test]
fn try_run_rejects_zero_max_steps_instead_of_panicking() {
    let mut engine = Engine::with_seed(1);
    let err = engine
        .try_run(&[], 0)
        .expect_err("max_steps=0 should be a caller error, not a run outcome");
    assert!(err.to_string().contains("max_steps"));
}

#[test]
fn budget_of_one_step_times_out_a_multi_step_thread() {
    let ctor: ThreadConstructor = Box::new(|| {
        Box::new(|| {
            schedule();
            schedule();
            Ok(())
        })
    });

    let mut engine = Engine::with_seed(1);
    let result = engine.run(&[ctor], 1);

    assert!(matches!(result, RunResult::Timeout));
}

#[test]
fn fixed_seed_reproduces_identical_outcomes() {
    fn build() -> ThreadConstructor {
        let counter = Arc::new(AtomicUsize::new(0));
        Box::new(move || {
            let counter = Arc::clone(&counter);
            Box::new(move || {
                for _ in 0..5 {
                    counter.fetch_add(1, Ordering::SeqCst);
                    schedule();
                }
                Ok(())
            })
        })
    }

    let ctors = vec![build(), build(), build()];

    let mut first = Engine::with_seed(1234);
    let result_a = first.run(&ctors, 100);

    let mut second = Engine::with_seed(1234);
    let result_b = second.run(&ctors, 100);

    assert!(matches!(result_a, RunResult::Ok));
    assert!(matches!(result_b, RunResult::Ok));
}
