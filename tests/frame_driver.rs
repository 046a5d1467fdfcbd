use lockstep::preset::{BlankGrid, GliderGun, RandomGrid};
use lockstep::{
    EngineConfig, EngineError, FrameDriver, Preset, Region, Scheduler, SchedulerConfig, UpdateRule,
    World,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(5);

fn driver(width: usize, height: usize, workers: usize) -> FrameDriver {
    FrameDriver::new(EngineConfig {
        width,
        height,
        scheduler: SchedulerConfig::with_workers(workers),
        ..Default::default()
    })
}

fn snapshot(driver: &FrameDriver) -> Vec<u8> {
    let engine = driver.lock();
    let mut cells = Vec::with_capacity(engine.width() * engine.height());
    for y in 0..engine.height() as i64 {
        for x in 0..engine.width() as i64 {
            cells.push(engine.get_cell(x, y).unwrap());
        }
    }
    cells
}

fn step(driver: &FrameDriver) {
    driver.step().unwrap();
    assert!(driver.wait_until_settled(TIMEOUT), "frame did not settle");
}

#[test]
fn test_blinker_oscillates() {
    let driver = driver(3, 3, 1);
    driver.start().unwrap();
    {
        let mut engine = driver.lock();
        engine.set_cell(0, 1, 1).unwrap();
        engine.set_cell(1, 1, 1).unwrap();
        engine.set_cell(2, 1, 1).unwrap();
    }

    step(&driver);
    {
        let engine = driver.lock();
        assert_eq!(engine.get_cell(1, 0).unwrap(), 1);
        assert_eq!(engine.get_cell(1, 1).unwrap(), 2);
        assert_eq!(engine.get_cell(1, 2).unwrap(), 1);
        assert_eq!(engine.population(), 3);
    }

    step(&driver);
    {
        let engine = driver.lock();
        assert_eq!(engine.get_cell(0, 1).unwrap(), 1);
        assert_eq!(engine.get_cell(1, 1).unwrap(), 3);
        assert_eq!(engine.get_cell(2, 1).unwrap(), 1);
        assert_eq!(engine.population(), 3);
        assert_eq!(engine.frames_completed(), 2);
    }
    driver.shutdown().unwrap();
}

#[test]
fn test_worker_count_does_not_change_result() {
    let run = |workers: usize| {
        let driver = driver(40, 30, workers);
        driver.start().unwrap();
        RandomGrid::seeded(1234).apply(&mut driver.lock()).unwrap();
        for _ in 0..10 {
            step(&driver);
        }
        let cells = snapshot(&driver);
        driver.shutdown().unwrap();
        cells
    };

    let single = run(1);
    assert_eq!(run(3), single);
    assert_eq!(run(7), single);
}

#[test]
fn test_glider_gun_stays_alive() {
    let driver = driver(64, 64, 4);
    driver.start().unwrap();
    World::new("Glider Gun", Box::new(GliderGun)).init_engine(&driver).unwrap();
    let initial = driver.lock().population();
    assert!(initial > 0);

    // Isolated gliders keep five cells each until they collide.
    for _ in 0..4 {
        step(&driver);
    }
    assert_eq!(driver.lock().population(), initial);
    driver.shutdown().unwrap();
}

/// Holds every cell update until the gate opens.
struct GateRule {
    open: AtomicBool,
}

impl UpdateRule for GateRule {
    fn next(&self, current: u8, _live_neighbours: u8) -> u8 {
        while !self.open.load(Ordering::Acquire) {
            std::thread::yield_now();
        }
        current
    }
}

fn gated_driver() -> (FrameDriver, Arc<GateRule>) {
    let gate = Arc::new(GateRule {
        open: AtomicBool::new(false),
    });
    let driver = FrameDriver::with_scheduler(4, 4, Arc::new(Scheduler::new(1)), gate.clone());
    driver.start().unwrap();
    (driver, gate)
}

#[test]
fn test_run_frame_is_noop_while_in_flight() {
    let (driver, gate) = gated_driver();

    driver.step().unwrap();
    assert!(!driver.previous_frame_complete());
    driver.step().unwrap();
    driver.toggle_pause(false, true);
    driver.toggle_pause(true, false);
    assert_eq!(driver.frames_completed(), 0);

    gate.open.store(true, Ordering::Release);
    assert!(driver.wait_until_settled(TIMEOUT));
    assert_eq!(driver.frames_completed(), 1);
    driver.shutdown().unwrap();
}

#[test]
fn test_set_cell_ignored_mid_frame() {
    let (driver, gate) = gated_driver();

    driver.step().unwrap();
    {
        let mut engine = driver.lock();
        assert!(engine.is_paused());
        assert!(!engine.previous_frame_complete());
        engine.set_cell(2, 2, 1).unwrap();
        assert_eq!(engine.get_cell(2, 2).unwrap(), 0);
    }

    gate.open.store(true, Ordering::Release);
    assert!(driver.wait_until_settled(TIMEOUT));
    assert_eq!(driver.lock().population(), 0);

    driver.lock().set_cell(2, 2, 1).unwrap();
    assert_eq!(driver.lock().get_cell(2, 2).unwrap(), 1);
    driver.shutdown().unwrap();
}

#[test]
fn test_set_cell_ignored_while_unpaused() {
    let driver = driver(16, 16, 2);
    driver.start().unwrap();
    driver.toggle_pause(false, false);

    driver.lock().set_cell(3, 3, 1).unwrap();
    assert_eq!(driver.lock().get_cell(3, 3).unwrap(), 0);

    driver.toggle_pause(true, false);
    driver.lock().set_cell(3, 3, 1).unwrap();
    assert_eq!(driver.lock().get_cell(3, 3).unwrap(), 1);
    driver.shutdown().unwrap();
}

#[test]
fn test_out_of_range_coordinates() {
    let driver = driver(10, 5, 1);
    let mut engine = driver.lock();
    assert!(engine.is_valid(9, 4));
    assert!(!engine.is_valid(10, 4));
    assert!(!engine.is_valid(-1, 0));
    assert_eq!(
        engine.set_cell(0, 5, 1),
        Err(EngineError::InvalidCoordinate { x: 0, y: 5 })
    );
    assert_eq!(
        engine.get_cell(-3, 2),
        Err(EngineError::InvalidCoordinate { x: -3, y: 2 })
    );
}

#[test]
fn test_unpause_runs_until_paused() {
    let driver = driver(32, 32, 3);
    driver.start().unwrap();
    World::new("Random", Box::new(RandomGrid::seeded(5))).init_engine(&driver).unwrap();

    driver.toggle_pause(false, true);
    let deadline = Instant::now() + TIMEOUT;
    while driver.frames_completed() < 10 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    driver.toggle_pause(true, false);
    assert!(driver.wait_until_settled(TIMEOUT));

    let frames = driver.frames_completed();
    assert!(frames >= 10);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(driver.frames_completed(), frames, "frames kept running while paused");
    driver.shutdown().unwrap();
}

#[test]
fn test_wait_until_settled_times_out_while_running() {
    let driver = driver(64, 64, 2);
    driver.start().unwrap();
    World::new("Blank", Box::new(BlankGrid)).init_engine(&driver).unwrap();

    driver.toggle_pause(false, true);
    assert!(!driver.wait_until_settled(Duration::from_millis(20)));
    driver.toggle_pause(true, false);
    assert!(driver.wait_until_settled(TIMEOUT));
    driver.shutdown().unwrap();
}

struct CountingRule {
    calls: AtomicUsize,
}

impl UpdateRule for CountingRule {
    fn next(&self, current: u8, _live_neighbours: u8) -> u8 {
        self.calls.fetch_add(1, Ordering::Relaxed);
        current
    }
}

#[test]
fn test_every_cell_updated_once_per_frame() {
    let rule = Arc::new(CountingRule {
        calls: AtomicUsize::new(0),
    });
    let scheduler = Arc::new(Scheduler::new(4));
    let driver = FrameDriver::with_scheduler(37, 11, scheduler, rule.clone());
    driver.start().unwrap();

    let cells = Region::partition(37, 11, 4)
        .iter()
        .map(Region::cell_count)
        .sum::<usize>();
    assert_eq!(cells, 37 * 11);

    step(&driver);
    step(&driver);
    assert_eq!(rule.calls.load(Ordering::Relaxed), 2 * 37 * 11);
    driver.shutdown().unwrap();
}

#[test]
fn test_completed_frame_is_readable_in_same_guard() {
    let driver = driver(3, 3, 2);
    driver.start().unwrap();
    {
        let mut engine = driver.lock();
        for x in 0..3 {
            engine.set_cell(x, 1, 1).unwrap();
        }
    }

    for frame in 1..=100u64 {
        driver.step().unwrap();
        let deadline = Instant::now() + TIMEOUT;
        loop {
            let engine = driver.lock();
            if engine.previous_frame_complete() {
                // Odd frames show the vertical phase, even frames the horizontal one.
                let vertical = frame % 2 == 1;
                assert_eq!(engine.frames_completed(), frame);
                assert_eq!(engine.get_cell(1, 0).unwrap() > 0, vertical, "frame {frame}");
                assert_eq!(engine.get_cell(0, 1).unwrap() > 0, !vertical, "frame {frame}");
                break;
            }
            drop(engine);
            assert!(Instant::now() < deadline, "frame {frame} did not complete");
            std::thread::yield_now();
        }
    }
    driver.shutdown().unwrap();
}

#[test]
fn test_pause_swaps_frame_retired_while_running() {
    let driver = driver(3, 3, 1);
    driver.start().unwrap();
    {
        let mut engine = driver.lock();
        for x in 0..3 {
            engine.set_cell(x, 1, 1).unwrap();
        }
    }

    driver.toggle_pause(false, true);
    std::thread::sleep(Duration::from_millis(5));
    driver.toggle_pause(true, false);
    assert!(driver.wait_until_settled(TIMEOUT));

    let engine = driver.lock();
    let vertical = engine.frames_completed() % 2 == 1;
    assert!(engine.frames_completed() > 0);
    assert_eq!(engine.get_cell(1, 0).unwrap() > 0, vertical);
    assert_eq!(engine.population(), 3);
    drop(engine);
    driver.shutdown().unwrap();
}
