use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use chrono::Utc;
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use signstream_common::frame::{Frame, FrameFormat};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::normalize::Normalizer;
use super::{Camera, CameraError, FrameFeed, LatestFrameFeed};

const DEFAULT_BOUNDARY: &str = "frame";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Parse state for the MJPEG multipart stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Looking for the boundary marker `--<boundary>\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of part headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental splitter for `multipart/x-mixed-replace` MJPEG bodies.
pub struct MjpegParser {
    boundary: Vec<u8>,
    buffer: BytesMut,
    state: ParseState,
    jpeg_start: usize,
}

impl MjpegParser {
    pub fn new(boundary: &str) -> Self {
        Self {
            boundary: format!("--{boundary}\r\n").into_bytes(),
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            jpeg_start: 0,
        }
    }

    /// Feed a chunk of the body and return every JPEG completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);
        let marker_len = self.boundary.len();
        let mut frames = Vec::new();

        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, &self.boundary) {
                        self.buffer.advance(pos + marker_len);
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep the tail in case the boundary spans chunks
                        if self.buffer.len() > marker_len {
                            let excess = self.buffer.len() - marker_len;
                            self.buffer.advance(excess);
                        }
                        break;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if let Some(pos) = find_subsequence(&self.buffer, HEADER_END) {
                        self.buffer.advance(pos + HEADER_END.len());
                        self.jpeg_start = 0;
                        self.state = ParseState::CollectingJpeg;
                    } else {
                        break;
                    }
                }
                ParseState::CollectingJpeg => {
                    let Some(pos) =
                        find_subsequence(&self.buffer[self.jpeg_start..], &self.boundary)
                    else {
                        // Avoid re-scanning what we already searched
                        self.jpeg_start = self.buffer.len().saturating_sub(marker_len);
                        break;
                    };

                    let jpeg_end = self.jpeg_start + pos;
                    // Part bodies end with \r\n before the next boundary
                    let end = if self.buffer[..jpeg_end].ends_with(b"\r\n") {
                        jpeg_end - 2
                    } else {
                        jpeg_end
                    };

                    let part = self.buffer.split_to(jpeg_end).freeze().slice(..end);
                    self.buffer.advance(marker_len);

                    if !part.is_empty() {
                        frames.push(part);
                    }
                    self.state = ParseState::SeekingHeaderEnd;
                }
            }
        }

        frames
    }
}

/// Extract the boundary parameter from a multipart `Content-Type` value.
pub fn boundary_from_content_type(value: &str) -> Option<String> {
    value.split(';').map(str::trim).find_map(|param| {
        let (key, val) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let val = val.trim().trim_matches('"');
        let val = val.strip_prefix("--").unwrap_or(val);
        (!val.is_empty()).then(|| val.to_string())
    })
}

/// Camera reading a continuous MJPEG stream over HTTP.
///
/// Opening performs the initial connection; after that a background task
/// keeps the latest frame and reconnects with exponential backoff.
pub struct MjpegCamera {
    url: String,
    client: reqwest::Client,
    normalizer: Option<Normalizer>,
}

impl MjpegCamera {
    pub fn new(url: &str, normalizer: Option<Normalizer>) -> Result<Self, CameraError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(CameraError::HttpClient)?;
        Ok(Self {
            url: url.to_string(),
            client,
            normalizer,
        })
    }
}

#[async_trait]
impl Camera for MjpegCamera {
    async fn open(&self) -> Result<Box<dyn FrameFeed>, CameraError> {
        let response = connect(&self.client, &self.url).await?;
        info!(url = self.url, status = %response.status(), "connected to MJPEG stream");

        let (tx, rx) = watch::channel(None);
        let reader = tokio::spawn(run_stream(
            self.client.clone(),
            self.url.clone(),
            response,
            tx,
            self.normalizer,
        ));
        Ok(Box::new(LatestFrameFeed::new("mjpeg", rx, reader)))
    }
}

async fn connect(client: &reqwest::Client, url: &str) -> Result<reqwest::Response, CameraError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(CameraError::HttpConnect)?;
    if !response.status().is_success() {
        return Err(CameraError::HttpStatus(response.status().as_u16()));
    }
    Ok(response)
}

async fn run_stream(
    client: reqwest::Client,
    url: String,
    first: reqwest::Response,
    tx: watch::Sender<Option<Frame>>,
    normalizer: Option<Normalizer>,
) {
    let mut backoff = Duration::from_secs(2);
    let max_backoff = Duration::from_secs(30);
    let mut pending = Some(first);

    loop {
        let result = match pending.take() {
            Some(response) => consume_stream(response, &tx, normalizer).await,
            None => match connect(&client, &url).await {
                Ok(response) => {
                    info!(url, "reconnected to MJPEG stream");
                    consume_stream(response, &tx, normalizer).await
                }
                Err(e) => Err(e),
            },
        };

        match result {
            Ok(()) => {
                info!(url, "stream ended cleanly, reconnecting");
                backoff = Duration::from_secs(2);
            }
            Err(e) => {
                error!(error = %e, url, "stream error, reconnecting in {:?}", backoff);
            }
        }

        // No frames while disconnected
        tx.send_replace(None);
        if tx.is_closed() {
            break;
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(max_backoff);
    }
}

async fn consume_stream(
    response: reqwest::Response,
    tx: &watch::Sender<Option<Frame>>,
    normalizer: Option<Normalizer>,
) -> Result<(), CameraError> {
    let boundary = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(boundary_from_content_type)
        .unwrap_or_else(|| DEFAULT_BOUNDARY.to_string());
    debug!(boundary, "parsing MJPEG stream");

    let mut parser = MjpegParser::new(&boundary);
    let mut byte_stream = response.bytes_stream();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.map_err(CameraError::HttpStream)?;
        // Only the newest frame of a chunk is ever visible to grab().
        if let Some(jpeg) = parser.push(&chunk).pop() {
            publish(tx, jpeg, normalizer).await;
        }
        if tx.is_closed() {
            break;
        }
    }
    Ok(())
}

/// Camera that fetches single snapshots from an HTTP endpoint on a fixed
/// interval. Fallback for cameras without a streaming endpoint.
pub struct PollingCamera {
    url: String,
    interval: Duration,
    client: reqwest::Client,
    normalizer: Option<Normalizer>,
}

impl PollingCamera {
    pub fn new(
        url: &str,
        interval: Duration,
        normalizer: Option<Normalizer>,
    ) -> Result<Self, CameraError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(CameraError::HttpClient)?;
        Ok(Self {
            url: url.to_string(),
            // tokio intervals panic on a zero period
            interval: interval.max(Duration::from_millis(1)),
            client,
            normalizer,
        })
    }
}

#[async_trait]
impl Camera for PollingCamera {
    async fn open(&self) -> Result<Box<dyn FrameFeed>, CameraError> {
        let first = fetch_snapshot(&self.client, &self.url).await?;
        info!(url = self.url, bytes = first.len(), "camera snapshot endpoint reachable");

        let (tx, rx) = watch::channel(None);
        publish(&tx, first, self.normalizer).await;
        let reader = tokio::spawn(run_polling(
            self.client.clone(),
            self.url.clone(),
            self.interval,
            tx,
            self.normalizer,
        ));
        Ok(Box::new(LatestFrameFeed::new("polling", rx, reader)))
    }
}

async fn fetch_snapshot(client: &reqwest::Client, url: &str) -> Result<Bytes, CameraError> {
    let response = connect(client, url).await?;
    response.bytes().await.map_err(CameraError::HttpStream)
}

async fn run_polling(
    client: reqwest::Client,
    url: String,
    interval: Duration,
    tx: watch::Sender<Option<Frame>>,
    normalizer: Option<Normalizer>,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; open() already fetched that frame.
    ticker.tick().await;

    while !tx.is_closed() {
        ticker.tick().await;
        match fetch_snapshot(&client, &url).await {
            Ok(data) => publish(&tx, data, normalizer).await,
            Err(e) => warn!(error = %e, url, "failed to fetch camera frame"),
        }
    }
}

async fn publish(
    tx: &watch::Sender<Option<Frame>>,
    data: Bytes,
    normalizer: Option<Normalizer>,
) {
    let data = match normalizer {
        Some(n) => {
            let bytes = data.len();
            match n.apply_blocking(data).await {
                Ok(d) => d,
                Err(e) => {
                    warn!(error = %e, bytes, "failed to normalize frame, dropping");
                    return;
                }
            }
        }
        None => data,
    };
    let format = FrameFormat::sniff(&data).unwrap_or(FrameFormat::Jpeg);
    tx.send_replace(Some(Frame::new(data, format, Utc::now().timestamp_millis())));
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;

    fn part(jpeg: &[u8]) -> Vec<u8> {
        let mut out = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        out.extend_from_slice(jpeg);
        out.extend_from_slice(b"\r\n");
        out
    }

    #[test]
    fn parses_frames_in_one_chunk() {
        let mut body = part(&[0xFF, 0xD8, 0x01]);
        body.extend(part(&[0xFF, 0xD8, 0x02]));
        body.extend_from_slice(b"--frame\r\n");

        let mut parser = MjpegParser::new("frame");
        let frames = parser.push(&body);
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..], &[0xFF, 0xD8, 0x01]);
        assert_eq!(&frames[1][..], &[0xFF, 0xD8, 0x02]);
    }

    #[test]
    fn parses_frames_split_across_chunks() {
        let mut body = part(&[0xFF, 0xD8, 0xAA, 0xBB, 0xCC]);
        body.extend_from_slice(b"--frame\r\n");

        let mut parser = MjpegParser::new("frame");
        let mut frames = Vec::new();
        for byte in &body {
            frames.extend(parser.push(std::slice::from_ref(byte)));
        }
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], &[0xFF, 0xD8, 0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn ignores_preamble_and_incomplete_tail() {
        let mut body = b"garbage before the first part".to_vec();
        body.extend(part(&[0xFF, 0xD8, 0x07]));
        body.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xFF\xD8");

        let mut parser = MjpegParser::new("frame");
        let frames = parser.push(&body);
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], &[0xFF, 0xD8, 0x07]);
    }

    #[test]
    fn boundary_parsing() {
        assert_eq!(
            boundary_from_content_type("multipart/x-mixed-replace; boundary=frame").as_deref(),
            Some("frame")
        );
        assert_eq!(
            boundary_from_content_type("multipart/x-mixed-replace;boundary=\"--myboundary\"")
                .as_deref(),
            Some("myboundary")
        );
        assert_eq!(boundary_from_content_type("image/jpeg"), None);
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn wait_for_frame(feed: &mut Box<dyn FrameFeed>) -> Frame {
        for _ in 0..200 {
            if let Some(frame) = feed.grab() {
                return frame;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no frame arrived from {}", feed.name());
    }

    #[tokio::test]
    async fn mjpeg_camera_publishes_latest_frame() {
        let app = Router::new().route(
            "/stream",
            get(|| async {
                let mut body = part(&[0xFF, 0xD8, 0xFF, 0x01]);
                body.extend_from_slice(b"--frame\r\n");
                // Keep the connection open like a live camera would
                let stream = futures_util::stream::iter(vec![Ok::<_, std::io::Error>(body)])
                    .chain(futures_util::stream::pending());
                (
                    [(header::CONTENT_TYPE, "multipart/x-mixed-replace; boundary=frame")],
                    Body::from_stream(stream),
                )
                    .into_response()
            }),
        );
        let base = serve(app).await;

        let camera = MjpegCamera::new(&format!("{base}/stream"), None).unwrap();
        let mut feed = camera.open().await.unwrap();
        let frame = wait_for_frame(&mut feed).await;
        assert_eq!(&frame.data[..], &[0xFF, 0xD8, 0xFF, 0x01]);
        assert_eq!(frame.format, FrameFormat::Jpeg);
    }

    #[tokio::test]
    async fn mjpeg_camera_open_fails_on_error_status() {
        let app = Router::new().route("/stream", get(|| async { StatusCode::NOT_FOUND }));
        let base = serve(app).await;

        let camera = MjpegCamera::new(&format!("{base}/stream"), None).unwrap();
        let result = camera.open().await;
        assert!(matches!(result, Err(CameraError::HttpStatus(404))));
    }

    #[tokio::test]
    async fn polling_camera_serves_first_snapshot_immediately() {
        let app = Router::new().route(
            "/frame",
            get(|| async { Body::from(vec![0xFF, 0xD8, 0xFF, 0x42]) }),
        );
        let base = serve(app).await;

        let camera =
            PollingCamera::new(&format!("{base}/frame"), Duration::from_millis(20), None).unwrap();
        let mut feed = camera.open().await.unwrap();
        let frame = feed.grab().expect("first snapshot is published on open");
        assert_eq!(&frame.data[..], &[0xFF, 0xD8, 0xFF, 0x42]);
    }

    #[tokio::test]
    async fn polling_camera_normalizes_snapshots() {
        let png = crate::camera::normalize::tests::png_bytes(64, 48);
        let app = Router::new().route("/frame", get(move || {
                let png = png.clone();
                async move { Body::from(png) }
            }));
        let base = serve(app).await;

        let camera = PollingCamera::new(
            &format!("{base}/frame"),
            Duration::from_millis(20),
            Some(Normalizer::new(32, 24, 80)),
        )
        .unwrap();
        let mut feed = camera.open().await.unwrap();
        let frame = feed.grab().expect("first snapshot is published on open");
        assert_eq!(frame.format, FrameFormat::Jpeg);
        let decoded = image::load_from_memory(&frame.data).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }

    #[test]
    fn polling_interval_is_never_zero() {
        let camera = PollingCamera::new("http://127.0.0.1:9/frame", Duration::ZERO, None).unwrap();
        assert_eq!(camera.interval, Duration::from_millis(1));
    }

    #[tokio::test]
    async fn polling_camera_unreachable() {
        let camera =
            PollingCamera::new("http://127.0.0.1:9/frame", Duration::from_millis(20), None)
                .unwrap();
        assert!(matches!(camera.open().await, Err(CameraError::HttpConnect(_))));
    }
}
