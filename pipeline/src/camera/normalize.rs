use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::ImageReader;
use std::io::Cursor;
use tokio::task::JoinError;

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("normalization task failed: {0}")]
    Task(#[from] JoinError),
}

/// Rescales incoming stills to the fixed capture geometry and re-encodes
/// them as JPEG, so every window the service sees has uniform frames.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    width: u32,
    height: u32,
    quality: u8,
}

impl Normalizer {
    pub fn new(width: u32, height: u32, quality: u8) -> Self {
        Self {
            width,
            height,
            quality: quality.clamp(1, 100),
        }
    }

    pub fn apply(&self, data: &[u8]) -> Result<Bytes, image::ImageError> {
        let img = ImageReader::new(Cursor::new(data))
            .with_guessed_format()?
            .decode()?;

        let rgb = img
            .resize_exact(self.width, self.height, FilterType::Triangle)
            .to_rgb8();

        let mut out = Vec::with_capacity((self.width * self.height) as usize / 4);
        JpegEncoder::new_with_quality(&mut out, self.quality).encode_image(&rgb)?;
        Ok(Bytes::from(out))
    }

    /// [`Normalizer::apply`] on the blocking pool. Decoding and encoding are
    /// CPU-bound and must stay off the runtime workers.
    pub async fn apply_blocking(self, data: Bytes) -> Result<Bytes, NormalizeError> {
        let out = tokio::task::spawn_blocking(move || self.apply(&data)).await??;
        Ok(out)
    }
}
