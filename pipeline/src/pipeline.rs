use chrono::{DateTime, Utc};
use serde::Serialize;
use signstream_common::config::{CaptureConfig, ConfigError};
use signstream_common::frame::Frame;
use signstream_common::record::PredictionRecord;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::accumulator::WindowAccumulator;
use crate::camera::{Camera, CameraError, FrameFeed};
use crate::client::{PredictError, Prediction, Predictor};
use crate::pool::{DispatchSink, WorkerPool};
use crate::queue::{dispatch_queue, DispatchQueue, DispatchTask};
use crate::sink::ResultSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Capturing,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("could not access camera: {0}")]
    CameraUnavailable(#[from] CameraError),
    #[error("pipeline is already capturing")]
    AlreadyCapturing,
    #[error("pipeline is not capturing")]
    NotCapturing,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Point-in-time view of everything the pipeline exposes for feedback.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub state: PipelineState,
    pub generation: u64,
    pub session_started_at: Option<DateTime<Utc>>,
    /// Frames waiting for the current window to fill.
    pub buffered_frames: usize,
    pub frames_captured: u64,
    pub windows_sealed: u64,
    /// Sealed windows not yet picked up by a worker.
    pub pending_windows: usize,
    pub active_workers: usize,
    /// True while at least one request is in flight.
    pub loading: bool,
    pub windows_dispatched: u64,
    pub dispatch_failures: u64,
    pub latest: Option<PredictionRecord>,
    pub history_len: usize,
    pub last_error: Option<String>,
}

/// Continuous capture and bounded dispatch pipeline.
///
/// Cloning yields another handle to the same pipeline. All buffers, counters
/// and the session generation live behind the handle.
#[derive(Clone)]
pub struct Pipeline {
    shared: Arc<Shared>,
}

struct Shared {
    config: CaptureConfig,
    camera: Arc<dyn Camera>,
    predictor: Arc<dyn Predictor>,
    inner: Mutex<Inner>,
}

struct Inner {
    generation: u64,
    session: Option<Session>,
    sink: ResultSink,
}

/// Everything owned by one capture session. Dropping it cancels the timer,
/// releases the camera and closes the dispatch queue.
struct Session {
    generation: u64,
    started_at: DateTime<Utc>,
    feed: Box<dyn FrameFeed>,
    accumulator: WindowAccumulator,
    queue: DispatchQueue,
    pool: WorkerPool,
    ticker: Option<JoinHandle<()>>,
    frames_captured: u64,
}

impl Pipeline {
    pub fn new(
        config: CaptureConfig,
        camera: Arc<dyn Camera>,
        predictor: Arc<dyn Predictor>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                camera,
                predictor,
                inner: Mutex::new(Inner {
                    generation: 0,
                    session: None,
                    sink: ResultSink::default(),
                }),
            }),
        })
    }

    pub fn state(&self) -> PipelineState {
        if self.shared.lock().session.is_some() {
            PipelineState::Capturing
        } else {
            PipelineState::Idle
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.state() == PipelineState::Capturing
    }

    /// Idle → Capturing. Acquires the camera first; if that fails nothing
    /// else changes.
    pub async fn start(&self) -> Result<(), PipelineError> {
        if self.is_capturing() {
            return Err(PipelineError::AlreadyCapturing);
        }

        let feed = match self.shared.camera.open().await {
            Ok(feed) => feed,
            Err(e) => {
                error!(error = %e, "camera unavailable, staying idle");
                self.shared
                    .lock()
                    .sink
                    .record_error(format!("Could not access camera: {e}"));
                return Err(PipelineError::CameraUnavailable(e));
            }
        };

        let mut inner = self.shared.lock();
        if inner.session.is_some() {
            // Lost a race with a concurrent start; our feed is released on drop.
            return Err(PipelineError::AlreadyCapturing);
        }

        inner.generation += 1;
        let generation = inner.generation;
        inner.sink.reset();

        let config = &self.shared.config;
        let (queue, receiver) = dispatch_queue();
        let sink: Arc<dyn DispatchSink> = Arc::new(SessionSink {
            shared: Arc::downgrade(&self.shared),
        });
        let pool = WorkerPool::spawn(
            config.max_concurrent_requests,
            receiver,
            Arc::clone(&self.shared.predictor),
            sink,
        );
        let ticker = tokio::spawn(run_ticker(
            Arc::downgrade(&self.shared),
            generation,
            config.frame_interval(),
        ));

        info!(
            generation,
            feed = feed.name(),
            frame_rate = config.frame_rate,
            window_size = config.window_size,
            max_concurrent = config.max_concurrent_requests,
            "capture session started"
        );

        inner.session = Some(Session {
            generation,
            started_at: Utc::now(),
            feed,
            accumulator: WindowAccumulator::new(config.window_size),
            queue,
            pool,
            ticker: Some(ticker),
            frames_captured: 0,
        });
        Ok(())
    }

    /// Capturing → Idle. Returns `false` if the pipeline was already idle.
    ///
    /// Requests already in flight are left to finish; their results are
    /// discarded.
    pub fn stop(&self) -> bool {
        let session = {
            let mut inner = self.shared.lock();
            inner.sink.clear_latest();
            inner.session.take()
        };

        let Some(session) = session else {
            return false;
        };
        info!(
            generation = session.generation,
            frames = session.frames_captured,
            windows = session.accumulator.windows_sealed(),
            dropped_frames = session.accumulator.buffered(),
            dropped_windows = session.queue.len(),
            in_flight = session.pool.counters().active(),
            "capture session stopped"
        );
        drop(session);
        true
    }

    /// Feed a frame captured outside the pipeline's own timer.
    pub fn push(&self, frame: Frame) -> Result<(), PipelineError> {
        let mut inner = self.shared.lock();
        let session = inner.session.as_mut().ok_or(PipelineError::NotCapturing)?;
        session.ingest(frame);
        Ok(())
    }

    pub fn status(&self) -> PipelineStatus {
        let inner = self.shared.lock();
        let session = inner.session.as_ref();
        let counters = session.map(|s| s.pool.counters());
        let active_workers = counters.map(|c| c.active()).unwrap_or(0);

        PipelineStatus {
            state: if session.is_some() {
                PipelineState::Capturing
            } else {
                PipelineState::Idle
            },
            generation: inner.generation,
            session_started_at: session.map(|s| s.started_at),
            buffered_frames: session.map(|s| s.accumulator.buffered()).unwrap_or(0),
            frames_captured: session.map(|s| s.frames_captured).unwrap_or(0),
            windows_sealed: session.map(|s| s.accumulator.windows_sealed()).unwrap_or(0),
            pending_windows: session.map(|s| s.queue.len()).unwrap_or(0),
            active_workers,
            loading: active_workers > 0,
            windows_dispatched: counters.map(|c| c.dispatched()).unwrap_or(0),
            dispatch_failures: counters.map(|c| c.failed()).unwrap_or(0),
            latest: inner.sink.latest().cloned(),
            history_len: inner.sink.history().len(),
            last_error: inner.sink.last_error().map(str::to_string),
        }
    }

    pub fn latest(&self) -> Option<PredictionRecord> {
        self.shared.lock().sink.latest().cloned()
    }

    /// Predictions in arrival order.
    pub fn history(&self) -> Vec<PredictionRecord> {
        self.shared.lock().sink.history().to_vec()
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.lock().sink.last_error().map(str::to_string)
    }

    pub fn clear_history(&self) {
        self.shared.lock().sink.clear_history();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One timer tick. Returns `false` once the session it belongs to is gone.
    fn capture_tick(&self, generation: u64) -> bool {
        let mut inner = self.lock();
        let Some(session) = inner
            .session
            .as_mut()
            .filter(|s| s.generation == generation)
        else {
            return false;
        };

        if let Some(frame) = session.feed.grab() {
            session.ingest(frame);
        }
        true
    }
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.generation == generation)
    }
}

impl Session {
    fn ingest(&mut self, mut frame: Frame) {
        frame.seq = self.frames_captured;
        self.frames_captured += 1;

        let Some(window) = self.accumulator.push(frame) else {
            return;
        };
        let seq = window.seq;
        let task = DispatchTask {
            generation: self.generation,
            window,
        };
        if self.queue.enqueue(task) {
            debug!(window = seq, pending = self.queue.len(), "window sealed");
        } else {
            warn!(window = seq, "dispatch workers gone, dropping window");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

/// Routes worker results back into the pipeline without keeping it alive.
struct SessionSink {
    shared: Weak<Shared>,
}

impl DispatchSink for SessionSink {
    fn is_current(&self, generation: u64) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| shared.lock().is_current(generation))
    }

    fn complete(&self, task: &DispatchTask, outcome: Result<Prediction, PredictError>) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut inner = shared.lock();
        if !inner.is_current(task.generation) {
            debug!(
                window = task.window.seq,
                generation = task.generation,
                "discarding result from a finished session"
            );
            return;
        }

        match outcome {
            Ok(prediction) => {
                let record = PredictionRecord::new(
                    &prediction.label,
                    prediction.confidence,
                    task.window.seq,
                    task.window.captured_at_ms(),
                );
                info!(
                    window = task.window.seq,
                    label = record.label,
                    confidence = ?record.confidence,
                    "received prediction"
                );
                inner.sink.record(record);
            }
            Err(e) => {
                error!(error = %e, window = task.window.seq, "prediction failed");
                inner.sink.record_error(format!("Prediction failed: {e}"));
            }
        }
    }
}

async fn run_ticker(shared: Weak<Shared>, generation: u64, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else {
            break;
        };
        if !shared.capture_tick(generation) {
            break;
        }
    }
    debug!(generation, "capture timer stopped");
}
