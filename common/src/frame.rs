use bytes::Bytes;

/// Encoding of a captured frame's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    Jpeg,
    Png,
}

const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G'];

impl FrameFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            FrameFormat::Jpeg => "image/jpeg",
            FrameFormat::Png => "image/png",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            FrameFormat::Jpeg => "jpg",
            FrameFormat::Png => "png",
        }
    }

    /// Detect the format from the payload's leading magic bytes.
    pub fn sniff(data: &[u8]) -> Option<Self> {
        if data.starts_with(JPEG_MAGIC) {
            Some(FrameFormat::Jpeg)
        } else if data.starts_with(PNG_MAGIC) {
            Some(FrameFormat::Png)
        } else {
            None
        }
    }
}

/// A single encoded still grabbed from the camera feed.
///
/// The payload is reference-counted so that a frame can be handed out by the
/// feed and moved into a window without copying the image bytes.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Bytes,
    pub format: FrameFormat,
    /// Wall-clock capture time, Unix millis.
    pub captured_at_ms: i64,
    /// Capture sequence number within the session. Zero until the pipeline
    /// assigns it.
    pub seq: u64,
}

impl Frame {
    pub fn new(data: impl Into<Bytes>, format: FrameFormat, captured_at_ms: i64) -> Self {
        Self {
            data: data.into(),
            format,
            captured_at_ms,
            seq: 0,
        }
    }

    pub fn jpeg(data: impl Into<Bytes>, captured_at_ms: i64) -> Self {
        Self::new(data, FrameFormat::Jpeg, captured_at_ms)
    }

    pub fn mime(&self) -> &'static str {
        self.format.mime()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A sealed, fixed-size batch of frames in capture order.
#[derive(Debug, Clone)]
pub struct Window {
    /// Position of this window in the session's submission order.
    pub seq: u64,
    pub frames: Vec<Frame>,
}

impl Window {
    pub fn new(seq: u64, frames: Vec<Frame>) -> Self {
        Self { seq, frames }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Capture time of the first frame, or 0 for an empty window.
    pub fn captured_at_ms(&self) -> i64 {
        self.frames.first().map(|f| f.captured_at_ms).unwrap_or_default()
    }

    /// Total payload size across all frames.
    pub fn payload_size(&self) -> usize {
        self.frames.iter().map(Frame::len).sum()
    }
}

/// Multipart field name for the frame at `index` in a window.
pub fn part_name(index: usize) -> String {
    format!("frame_{index}")
}

/// Upload file name for the frame at `index` in a window.
pub fn part_file_name(index: usize, format: FrameFormat) -> String {
    format!("frame_{index}.{}", format.extension())
}
