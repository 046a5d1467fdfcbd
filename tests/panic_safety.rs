use lockstep::{Counter, FnJob, Scheduler};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn test_panic_safety_counter_decrement() {
    let scheduler = Scheduler::new(1);
    scheduler.start().unwrap();
    let counter = Counter::new(1);

    let job = FnJob::with_counter(
        |_| {
            panic!("Intentional panic for testing");
        },
        counter.clone(),
    );
    scheduler.submit(job.into_ref()).unwrap();
    scheduler.dispatch().unwrap();

    assert!(counter.wait(TIMEOUT), "Counter should be zero even after panic");
    scheduler.stop(true).unwrap();
    scheduler.join().expect("worker thread must survive a panicking job");
}

#[test]
fn test_worker_recovery_after_panic() {
    let scheduler = Scheduler::new(1);
    scheduler.start().unwrap();

    let counter = Counter::new(1);
    scheduler
        .submit(FnJob::with_counter(|_| panic!("Boom"), counter.clone()).into_ref())
        .unwrap();
    scheduler.dispatch().unwrap();
    assert!(counter.wait(TIMEOUT));

    let success = Arc::new(AtomicBool::new(false));
    let success_clone = success.clone();
    let counter2 = Counter::new(1);
    scheduler
        .submit(
            FnJob::with_counter(move |_| success_clone.store(true, Ordering::SeqCst), counter2.clone())
                .into_ref(),
        )
        .unwrap();
    scheduler.dispatch().unwrap();

    assert!(counter2.wait(TIMEOUT), "Worker did not process subsequent job!");
    assert!(success.load(Ordering::SeqCst), "Subsequent job failed to run");
    scheduler.stop(true).unwrap();
    scheduler.join().unwrap();
}

#[test]
fn test_panic_does_not_skip_rest_of_group() {
    // All of these land in one group; the panicking job sits in the middle.
    let scheduler = Scheduler::new(1);
    scheduler.start().unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Counter::new(5);
    let jobs = (0..5).map(|i| {
        let hits = hits.clone();
        FnJob::with_counter(
            move |_| {
                if i == 2 {
                    panic!("job {i} failed");
                }
                hits.fetch_add(1, Ordering::SeqCst);
            },
            counter.clone(),
        )
        .into_ref()
    });
    scheduler.submit_all(jobs).unwrap();
    assert_eq!(scheduler.dispatch().unwrap(), 1);

    assert!(counter.wait(TIMEOUT));
    assert_eq!(hits.load(Ordering::SeqCst), 4);
    scheduler.stop(true).unwrap();
    scheduler.join().unwrap();
}
