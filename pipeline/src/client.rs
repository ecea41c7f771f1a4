use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use signstream_common::config::PredictorConfig;
use signstream_common::frame::{part_file_name, part_name, Window};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Response of the window prediction endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Prediction {
    #[serde(rename = "predicted_label")]
    pub label: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub request_id: Option<i64>,
}

impl Prediction {
    pub fn new(label: &str, confidence: Option<f64>) -> Self {
        Self {
            label: label.to_string(),
            confidence,
            request_id: None,
        }
    }
}

/// Remote classifier that turns one window of frames into a prediction.
#[async_trait]
pub trait Predictor: Send + Sync {
    async fn predict(&self, window: &Window) -> Result<Prediction, PredictError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("request failed: {0}")]
    Transport(reqwest::Error),
    #[error("server responded with {0}")]
    Status(u16),
    #[error("invalid response body: {0}")]
    Decode(reqwest::Error),
    #[error("failed to read {0}: {1}")]
    ReadFile(String, std::io::Error),
}

#[derive(Debug, Deserialize)]
struct VideoLabel {
    label: String,
}

#[derive(Debug, Deserialize)]
struct GeneratedSentence {
    generated_sentence: String,
}

/// HTTP client for the prediction service.
#[derive(Debug, Clone)]
pub struct HttpPredictor {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPredictor {
    pub fn new(config: &PredictorConfig) -> Result<Self, PredictError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(PredictError::Client)?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    async fn post_form(&self, path: &str, form: Form) -> Result<reqwest::Response, PredictError> {
        let response = self
            .client
            .post(self.url(path))
            .multipart(form)
            .send()
            .await
            .map_err(PredictError::Transport)?;
        if !response.status().is_success() {
            return Err(PredictError::Status(response.status().as_u16()));
        }
        Ok(response)
    }

    /// Classify a recorded video clip. Returns the raw label.
    pub async fn predict_video(&self, path: &Path) -> Result<String, PredictError> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| PredictError::ReadFile(path.display().to_string(), e))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("video.mp4")
            .to_string();

        debug!(file = file_name, bytes = data.len(), "uploading video for prediction");
        let part = Part::bytes(data)
            .file_name(file_name)
            .mime_str(video_mime(path))
            .map_err(PredictError::Transport)?;
        let response = self
            .post_form("predict-sign", Form::new().part("video", part))
            .await?;
        let body: VideoLabel = response.json().await.map_err(PredictError::Decode)?;
        Ok(body.label)
    }

    /// Ask the service to turn a list of recognized words into a sentence.
    pub async fn generate_sentence(&self, words: &str) -> Result<String, PredictError> {
        let form = Form::new().text("words", words.to_string());
        let response = self.post_form("generate_context", form).await?;
        let body: GeneratedSentence = response.json().await.map_err(PredictError::Decode)?;
        Ok(body.generated_sentence)
    }
}

#[async_trait]
impl Predictor for HttpPredictor {
    async fn predict(&self, window: &Window) -> Result<Prediction, PredictError> {
        let mut form = Form::new();
        for (index, frame) in window.frames.iter().enumerate() {
            let part = Part::stream_with_length(frame.data.clone(), frame.len() as u64)
                .file_name(part_file_name(index, frame.format))
                .mime_str(frame.mime())
                .map_err(PredictError::Transport)?;
            form = form.part(part_name(index), part);
        }
        form = form.text("frame_count", window.len().to_string());

        info!(
            window = window.seq,
            frames = window.len(),
            bytes = window.payload_size(),
            "sending window for prediction"
        );

        let response = self.post_form("predict-frames", form).await?;
        let prediction: Prediction = response.json().await.map_err(PredictError::Decode)?;
        Ok(prediction)
    }

    fn name(&self) -> &str {
        "http"
    }
}

fn video_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("avi") => "video/x-msvideo",
        _ => "application/octet-stream",
    }
}
