//! Continuous capture and bounded dispatch of camera frames to a remote
//! sign classifier.
//!
//! A fixed-rate timer grabs frames from a [`camera::FrameFeed`], the
//! [`accumulator::WindowAccumulator`] seals them into fixed-size windows, and
//! a [`pool::WorkerPool`] drains the [`queue::DispatchQueue`] with at most K
//! requests in flight. Results land in a [`sink::ResultSink`]. The
//! [`pipeline::Pipeline`] handle owns one capture session at a time.

pub mod accumulator;
pub mod camera;
pub mod client;
pub mod pipeline;
pub mod pool;
pub mod queue;
pub mod sink;

pub use camera::{Camera, CameraError, FrameFeed};
pub use client::{HttpPredictor, PredictError, Prediction, Predictor};
pub use pipeline::{Pipeline, PipelineError, PipelineState, PipelineStatus};
