use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use signstream_common::frame::{Frame, FrameFormat};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::normalize::Normalizer;
use super::{Camera, CameraError, FrameFeed};

/// Replays still images from a directory, in file-name order, looping
/// forever. Lets the pipeline run against recorded material without a
/// camera attached.
pub struct DirectoryCamera {
    dir: PathBuf,
    normalizer: Option<Normalizer>,
}

impl DirectoryCamera {
    pub fn new(dir: impl AsRef<Path>, normalizer: Option<Normalizer>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            normalizer,
        }
    }
}

#[async_trait]
impl Camera for DirectoryCamera {
    async fn open(&self) -> Result<Box<dyn FrameFeed>, CameraError> {
        let dir_name = self.dir.display().to_string();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| CameraError::Directory(dir_name.clone(), e))?;

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CameraError::Directory(dir_name.clone(), e))?
        {
            let path = entry.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
                .unwrap_or(false);
            if is_image {
                paths.push(path);
            }
        }
        paths.sort();

        let mut raw = Vec::with_capacity(paths.len());
        for path in paths {
            let data = tokio::fs::read(&path)
                .await
                .map_err(|e| CameraError::Directory(path.display().to_string(), e))?;
            raw.push((path, data));
        }

        let normalizer = self.normalizer;
        let frames = tokio::task::spawn_blocking(move || prepare_frames(raw, normalizer))
            .await
            .map_err(CameraError::Prepare)?;

        if frames.is_empty() {
            return Err(CameraError::NoImages(dir_name));
        }

        info!(dir = dir_name, frames = frames.len(), "replaying frames from directory");
        Ok(Box::new(DirectoryFeed { frames, next: 0 }))
    }
}

/// Decode and normalize every file up front. CPU-bound, run on the blocking
/// pool.
fn prepare_frames(
    raw: Vec<(PathBuf, Vec<u8>)>,
    normalizer: Option<Normalizer>,
) -> Vec<(Bytes, FrameFormat)> {
    let mut frames = Vec::with_capacity(raw.len());
    for (path, raw) in raw {
        let data = match normalizer {
            Some(n) => match n.apply(&raw) {
                Ok(d) => d,
                Err(e) => {
                    warn!(path = path.display().to_string(), error = %e, "skipping undecodable image");
                    continue;
                }
            },
            None => Bytes::from(raw),
        };
        let Some(format) = FrameFormat::sniff(&data) else {
            warn!(path = path.display().to_string(), "skipping file with unknown image format");
            continue;
        };
        frames.push((data, format));
    }
    frames
}

struct DirectoryFeed {
    frames: Vec<(Bytes, FrameFormat)>,
    next: usize,
}

impl FrameFeed for DirectoryFeed {
    fn grab(&mut self) -> Option<Frame> {
        let (data, format) = self.frames.get(self.next)?.clone();
        self.next = (self.next + 1) % self.frames.len();
        Some(Frame::new(data, format, Utc::now().timestamp_millis()))
    }

    fn name(&self) -> &str {
        "directory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_images_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.jpg"), [0xFF, 0xD8, 0xFF, 0x02]).unwrap();
        std::fs::write(dir.path().join("a.jpg"), [0xFF, 0xD8, 0xFF, 0x01]).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let camera = DirectoryCamera::new(dir.path(), None);
        let mut feed = camera.open().await.unwrap();
        let firsts: Vec<u8> = (0..3).map(|_| feed.grab().unwrap().data[3]).collect();
        assert_eq!(firsts, vec![0x01, 0x02, 0x01]);
    }

    #[tokio::test]
    async fn normalizes_and_skips_undecodable_files() {
        let dir = tempfile::tempdir().unwrap();
        let png = crate::camera::normalize::tests::png_bytes(64, 48);
        std::fs::write(dir.path().join("a.png"), &png).unwrap();
        std::fs::write(dir.path().join("b.jpg"), b"corrupt").unwrap();

        let camera = DirectoryCamera::new(dir.path(), Some(Normalizer::new(32, 24, 80)));
        let mut feed = camera.open().await.unwrap();
        let first = feed.grab().unwrap();
        let second = feed.grab().unwrap();
        assert_eq!(first.format, FrameFormat::Jpeg);
        assert_eq!(first.data, second.data);
        let decoded = image::load_from_memory(&first.data).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }

    #[tokio::test]
    async fn empty_directory_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let camera = DirectoryCamera::new(dir.path(), None);
        assert!(matches!(camera.open().await, Err(CameraError::NoImages(_))));
    }

    #[tokio::test]
    async fn missing_directory_is_unavailable() {
        let camera = DirectoryCamera::new("/nonexistent/signstream/frames", None);
        assert!(matches!(camera.open().await, Err(CameraError::Directory(_, _))));
    }
}
