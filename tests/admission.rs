//! Single-flight admission and backpressure, driven both by hand and through
//! a running pipeline.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use depthgrid::engine::InferenceError;
use depthgrid::perf::PerformanceTracker;
use depthgrid::pipeline::{Completion, CompletionHandler, InFlight, Job};
use depthgrid::postprocess::{DenseOutput, HeatmapPostProcessor, HeatmapResult};
use depthgrid::{Admission, Coordinator, Frame, Pipeline, PipelineConfig, PixelFormat};

fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with_test_writer()
        .try_init();
}

fn small_config() -> PipelineConfig {
    PipelineConfig {
        height: 2,
        width: 2,
        grid_rows: 1,
        grid_cols: 1,
        ..Default::default()
    }
}

fn frame(sequence: u64) -> Frame {
    Frame::new(sequence, 2, 2, 2, PixelFormat::Nv12, vec![0; 6])
}

fn completion(job: &Job, output: Result<DenseOutput, InferenceError>) -> Completion {
    let now = Instant::now();
    Completion {
        ticket: job.ticket,
        sequence: job.frame.sequence,
        captured_at: job.frame.captured_at,
        started_at: now,
        finished_at: now + Duration::from_millis(5),
        output,
    }
}

struct Harness {
    state: Arc<InFlight>,
    coordinator: Coordinator,
    jobs: Receiver<Job>,
    tracker: Arc<PerformanceTracker>,
}

impl Harness {
    fn new(timeout: Option<Duration>) -> Self {
        let state = Arc::new(InFlight::new());
        let (jobs_tx, jobs) = mpsc::sync_channel(1);
        Self {
            coordinator: Coordinator::new(state.clone(), jobs_tx, timeout),
            state,
            jobs,
            tracker: Arc::new(PerformanceTracker::new(10)),
        }
    }

    fn handler<'a>(
        &self,
        published: &'a mut Vec<u64>,
    ) -> CompletionHandler<impl FnMut(HeatmapResult) + 'a> {
        CompletionHandler::new(
            self.state.clone(),
            HeatmapPostProcessor::new(&small_config()),
            move |result: HeatmapResult| published.push(result.frame_sequence),
            self.tracker.clone(),
        )
    }
}

#[test]
fn busy_slot_drops_frames_until_completion() {
    let harness = Harness::new(None);
    let mut published = Vec::new();

    assert!(matches!(harness.coordinator.on_frame_captured(frame(0)), Admission::Admitted(_)));
    assert_eq!(harness.coordinator.on_frame_captured(frame(1)), Admission::Dropped);
    assert_eq!(harness.coordinator.on_frame_captured(frame(2)), Admission::Dropped);

    let job = harness.jobs.try_recv().unwrap();
    assert_eq!(job.frame.sequence, 0);
    assert!(harness.jobs.try_recv().is_err());

    let mut handler = harness.handler(&mut published);
    handler.on_inference_complete(completion(&job, Ok(vec![1.0; 4])));
    drop(handler);

    assert!(harness.state.is_idle());
    assert_eq!(published, vec![0]);
    assert!(matches!(harness.coordinator.on_frame_captured(frame(3)), Admission::Admitted(_)));

    let snapshot = harness.tracker.snapshot();
    assert_eq!((snapshot.completed, snapshot.failed), (1, 0));
}

#[test]
fn failed_inference_releases_the_slot() {
    let harness = Harness::new(None);
    let mut published = Vec::new();

    harness.coordinator.on_frame_captured(frame(0));
    let job = harness.jobs.try_recv().unwrap();

    let mut handler = harness.handler(&mut published);
    handler.on_inference_complete(completion(
        &job,
        Err(InferenceError::Model("out of memory".into())),
    ));
    drop(handler);

    assert!(harness.state.is_idle());
    assert!(published.is_empty());
    assert!(matches!(harness.coordinator.on_frame_captured(frame(1)), Admission::Admitted(_)));

    let snapshot = harness.tracker.snapshot();
    assert_eq!((snapshot.completed, snapshot.failed), (0, 1));
}

#[test]
fn shape_mismatch_is_a_failed_frame() {
    let harness = Harness::new(None);
    let mut published = Vec::new();

    harness.coordinator.on_frame_captured(frame(0));
    let job = harness.jobs.try_recv().unwrap();

    let mut handler = harness.handler(&mut published);
    handler.on_inference_complete(completion(&job, Ok(vec![1.0; 3])));
    drop(handler);

    assert!(harness.state.is_idle());
    assert!(published.is_empty());
    assert_eq!(harness.tracker.snapshot().failed, 1);
}

#[test]
fn timeout_queues_replacement_behind_stuck_job_and_discards_late_result() {
    init_test_tracing();
    let harness = Harness::new(Some(Duration::from_millis(10)));
    let mut published = Vec::new();

    assert!(matches!(harness.coordinator.on_frame_captured(frame(0)), Admission::Admitted(_)));
    // The worker takes the job before it hangs.
    let stuck = harness.jobs.try_recv().unwrap();
    thread::sleep(Duration::from_millis(20));

    let Admission::Admitted(fresh_ticket) = harness.coordinator.on_frame_captured(frame(1)) else {
        panic!("frame 1 should replace the timed-out frame");
    };
    assert_eq!(harness.coordinator.on_frame_captured(frame(2)), Admission::Dropped);

    let mut handler = harness.handler(&mut published);
    handler.on_inference_complete(completion(&stuck, Ok(vec![0.0; 4])));
    assert_eq!(harness.state.current(), Some(fresh_ticket));

    let fresh = harness.jobs.try_recv().unwrap();
    assert_eq!(fresh.frame.sequence, 1);
    handler.on_inference_complete(completion(&fresh, Ok(vec![0.0; 4])));
    drop(handler);

    assert!(harness.state.is_idle());
    assert_eq!(published, vec![1]);
    let snapshot = harness.tracker.snapshot();
    assert_eq!((snapshot.completed, snapshot.failed), (1, 0));
}

#[test]
fn timeout_drops_frame_when_queue_still_holds_a_job() {
    init_test_tracing();
    let harness = Harness::new(Some(Duration::from_millis(10)));

    // Frame 0 is never picked up: the worker is stuck on something older.
    assert!(matches!(harness.coordinator.on_frame_captured(frame(0)), Admission::Admitted(_)));
    thread::sleep(Duration::from_millis(20));

    assert_eq!(harness.coordinator.on_frame_captured(frame(1)), Admission::Dropped);
    assert!(harness.state.is_idle());
    assert_eq!(harness.jobs.try_recv().unwrap().frame.sequence, 0);
    assert!(harness.jobs.try_recv().is_err());
}

#[test]
fn hung_engine_is_timed_out_and_its_replacement_published() {
    init_test_tracing();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let engine = {
        let calls = calls.clone();
        move |frame: &Frame| -> Result<DenseOutput, InferenceError> {
            calls.lock().unwrap().push(frame.sequence);
            if frame.sequence == 0 {
                thread::sleep(Duration::from_millis(200));
            }
            Ok(vec![1.0; 4])
        }
    };
    let config = PipelineConfig {
        inference_timeout: Some(Duration::from_millis(20)),
        ..small_config()
    };
    let pipeline = Pipeline::start(config, engine).unwrap();
    let coordinator = pipeline.coordinator();

    assert!(matches!(coordinator.on_frame_captured(frame(0)), Admission::Admitted(_)));
    thread::sleep(Duration::from_millis(40));
    assert!(matches!(coordinator.on_frame_captured(frame(1)), Admission::Admitted(_)));
    // Frame 1 is fresh, so the slot is busy again.
    assert_eq!(coordinator.on_frame_captured(frame(2)), Admission::Dropped);

    let stop = Arc::new(AtomicBool::new(false));
    let mut published = Vec::new();
    let sink = {
        let stop = stop.clone();
        let published = &mut published;
        move |result: HeatmapResult| {
            published.push(result.frame_sequence);
            stop.store(true, Ordering::SeqCst);
        }
    };
    pipeline.run(sink, &stop);

    assert_eq!(*calls.lock().unwrap(), vec![0, 1]);
    assert_eq!(published, vec![1]);
    let snapshot = pipeline.snapshot();
    assert_eq!((snapshot.completed, snapshot.failed), (1, 0));

    drop(coordinator);
    pipeline.shutdown().unwrap();
}

#[test]
fn back_to_back_frames_submit_once() {
    init_test_tracing();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let engine = {
        let calls = calls.clone();
        move |frame: &Frame| -> Result<DenseOutput, InferenceError> {
            calls.lock().unwrap().push(frame.sequence);
            thread::sleep(Duration::from_millis(50));
            Ok(vec![1.0; 4])
        }
    };
    let pipeline = Pipeline::start(small_config(), engine).unwrap();
    let coordinator = pipeline.coordinator();

    assert!(matches!(coordinator.on_frame_captured(frame(0)), Admission::Admitted(_)));
    assert_eq!(coordinator.on_frame_captured(frame(1)), Admission::Dropped);

    let stop = Arc::new(AtomicBool::new(false));
    let mut published = Vec::new();
    let sink = {
        let stop = stop.clone();
        let published = &mut published;
        move |result: HeatmapResult| {
            published.push(result.frame_sequence);
            stop.store(true, Ordering::SeqCst);
        }
    };
    pipeline.run(sink, &stop);

    assert_eq!(*calls.lock().unwrap(), vec![0]);
    assert_eq!(published, vec![0]);
    let snapshot = pipeline.snapshot();
    assert_eq!(snapshot.completed + snapshot.failed, 1);
    assert!(snapshot.avg_inference_latency >= Duration::from_millis(50));

    drop(coordinator);
    pipeline.shutdown().unwrap();
}

#[test]
fn capture_flood_never_runs_two_inferences_at_once() {
    init_test_tracing();
    const INFERENCE: Duration = Duration::from_millis(10);
    const RUN_FOR: Duration = Duration::from_millis(300);

    let active = Arc::new(AtomicUsize::new(0));
    let max_active = Arc::new(AtomicUsize::new(0));
    let calls = Arc::new(AtomicUsize::new(0));
    let engine = {
        let (active, max_active, calls) = (active.clone(), max_active.clone(), calls.clone());
        move |_: &Frame| -> Result<DenseOutput, InferenceError> {
            let now_active = active.fetch_add(1, Ordering::SeqCst) + 1;
            max_active.fetch_max(now_active, Ordering::SeqCst);
            calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(INFERENCE);
            active.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![0.5; 4])
        }
    };

    let pipeline = Pipeline::start(small_config(), engine).unwrap();
    let stop = Arc::new(AtomicBool::new(false));
    let captured = Arc::new(AtomicUsize::new(0));

    let capture = {
        let (coordinator, stop, captured) = (pipeline.coordinator(), stop.clone(), captured.clone());
        thread::spawn(move || {
            let mut seq = 0;
            while !stop.load(Ordering::Relaxed) {
                coordinator.on_frame_captured(frame(seq));
                captured.fetch_add(1, Ordering::Relaxed);
                seq += 1;
            }
        })
    };
    let timer = {
        let stop = stop.clone();
        thread::spawn(move || {
            thread::sleep(RUN_FOR);
            stop.store(true, Ordering::SeqCst);
        })
    };

    let mut results = 0usize;
    pipeline.run(|_: HeatmapResult| results += 1, &stop);
    timer.join().unwrap();
    capture.join().unwrap();
    pipeline.shutdown().unwrap();

    let calls = calls.load(Ordering::SeqCst);
    let bound = (RUN_FOR.as_millis() / INFERENCE.as_millis()) as usize + 2;
    assert_eq!(max_active.load(Ordering::SeqCst), 1);
    assert!(calls >= 1);
    assert!(calls <= bound, "{calls} inferences exceeds {bound}");
    assert!(captured.load(Ordering::Relaxed) > calls * 10);
    assert!(results <= calls);
}
