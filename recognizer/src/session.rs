use signstream_common::config::Config;
use signstream_common::record::{join_words, PredictionRecord};
use signstream_pipeline::{camera, HttpPredictor, Pipeline};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::RecognizerError;

const STATUS_INTERVAL: Duration = Duration::from_secs(5);

/// Run one capture session until Ctrl-C or the optional deadline, then
/// print what was recognized.
pub async fn run(
    config: &Config,
    duration_secs: Option<u64>,
    sentence: bool,
) -> Result<(), RecognizerError> {
    let camera = camera::from_config(&config.camera, config.capture.frame_interval())?;
    let predictor = Arc::new(HttpPredictor::new(&config.predictor)?);
    let pipeline = Pipeline::new(config.capture.clone(), camera, predictor.clone())?;

    pipeline.start().await?;

    let reason = wait_for_stop(tokio::signal::ctrl_c(), duration_secs, || {
        let status = pipeline.status();
        info!(
            buffered = status.buffered_frames,
            frames = status.frames_captured,
            pending = status.pending_windows,
            in_flight = status.active_workers,
            predictions = status.history_len,
            failures = status.dispatch_failures,
            "capturing"
        );
    })
    .await;
    info!(?reason, "stopping capture");

    pipeline.stop();

    let history = pipeline.history();
    if history.is_empty() {
        println!("No predictions recorded");
    }
    for record in &history {
        println!("{}", format_record(record));
    }

    if sentence && !history.is_empty() {
        let words = join_words(history.iter().map(|r| r.label.as_str()));
        let generated = predictor.generate_sentence(&words).await?;
        println!("Sentence: {generated}");
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Interrupted,
    Deadline,
}

/// Block until `interrupt` resolves or the optional deadline passes, calling
/// `on_status` every [`STATUS_INTERVAL`] meanwhile. `interrupt` is polled
/// across every iteration, so a signal during a status report is not lost.
pub async fn wait_for_stop<F>(
    interrupt: F,
    duration_secs: Option<u64>,
    mut on_status: impl FnMut(),
) -> StopReason
where
    F: Future<Output = std::io::Result<()>>,
{
    let deadline = async {
        match duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    tokio::pin!(interrupt);

    let mut status_ticker = tokio::time::interval(STATUS_INTERVAL);
    status_ticker.tick().await;

    loop {
        tokio::select! {
            result = &mut interrupt => {
                if let Err(e) = result {
                    warn!(error = %e, "failed to listen for Ctrl-C, stopping");
                }
                return StopReason::Interrupted;
            }
            _ = &mut deadline => {
                info!(?duration_secs, "capture duration reached");
                return StopReason::Deadline;
            }
            _ = status_ticker.tick() => on_status(),
        }
    }
}

/// One history line: local arrival time, label and confidence when known.
pub fn format_record(record: &PredictionRecord) -> String {
    let time = record
        .received_at
        .with_timezone(&chrono::Local)
        .format("%H:%M:%S");
    match record.confidence {
        Some(c) => format!("{time}  {} ({:.1}%)", record.label, c * 100.0),
        None => format!("{time}  {}", record.label),
    }
}
