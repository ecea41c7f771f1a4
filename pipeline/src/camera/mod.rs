pub mod directory;
pub mod mjpeg;
pub mod normalize;

use async_trait::async_trait;
use chrono::Utc;
use signstream_common::config::CameraConfig;
use signstream_common::frame::Frame;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use self::directory::DirectoryCamera;
use self::mjpeg::{MjpegCamera, PollingCamera};
use self::normalize::Normalizer;

/// A live feed that the capture timer pulls frames from.
///
/// `grab` must not block: it returns whatever frame is currently available,
/// or `None` when the feed has nothing to offer yet.
pub trait FrameFeed: Send {
    fn grab(&mut self) -> Option<Frame>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Source of frame feeds. Opening acquires the underlying device or
/// connection; dropping the returned feed releases it.
#[async_trait]
pub trait Camera: Send + Sync {
    async fn open(&self) -> Result<Box<dyn FrameFeed>, CameraError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("failed to build HTTP client: {0}")]
    HttpClient(reqwest::Error),
    #[error("HTTP connection failed: {0}")]
    HttpConnect(reqwest::Error),
    #[error("HTTP stream error: {0}")]
    HttpStream(reqwest::Error),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("failed to read frame directory {0}: {1}")]
    Directory(String, std::io::Error),
    #[error("frame preparation task failed: {0}")]
    Prepare(tokio::task::JoinError),
    #[error("no images found in {0}")]
    NoImages(String),
    #[error("unknown camera mode '{0}', expected 'mjpeg', 'polling' or 'directory'")]
    UnknownMode(String),
}

/// Build the camera described by `config`. `poll_interval` is only used by
/// the snapshot-polling backend.
pub fn from_config(
    config: &CameraConfig,
    poll_interval: Duration,
) -> Result<Arc<dyn Camera>, CameraError> {
    let normalizer = config
        .normalize
        .then(|| Normalizer::new(config.width, config.height, config.jpeg_quality));

    let camera: Arc<dyn Camera> = match config.mode.as_str() {
        "mjpeg" => Arc::new(MjpegCamera::new(&config.url, normalizer)?),
        "polling" => Arc::new(PollingCamera::new(&config.url, poll_interval, normalizer)?),
        "directory" => Arc::new(DirectoryCamera::new(&config.directory, normalizer)),
        other => return Err(CameraError::UnknownMode(other.to_string())),
    };
    Ok(camera)
}

/// Feed backed by a background reader that publishes the most recent frame.
///
/// Each `grab` returns the current frame stamped with the grab time, the way
/// a screen capture of a playing video would. The reader task is aborted when
/// the feed is dropped.
pub(crate) struct LatestFrameFeed {
    name: &'static str,
    latest: watch::Receiver<Option<Frame>>,
    reader: JoinHandle<()>,
}

impl LatestFrameFeed {
    pub(crate) fn new(
        name: &'static str,
        latest: watch::Receiver<Option<Frame>>,
        reader: JoinHandle<()>,
    ) -> Self {
        Self {
            name,
            latest,
            reader,
        }
    }
}

impl FrameFeed for LatestFrameFeed {
    fn grab(&mut self) -> Option<Frame> {
        let mut frame = self.latest.borrow().clone()?;
        frame.captured_at_ms = Utc::now().timestamp_millis();
        Some(frame)
    }

    fn name(&self) -> &str {
        self.name
    }
}

impl Drop for LatestFrameFeed {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
