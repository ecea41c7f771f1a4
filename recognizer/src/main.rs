mod session;
mod upload;

use clap::{Parser, Subcommand};
use signstream_common::config::Config;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Debug, thiserror::Error)]
pub enum RecognizerError {
    #[error("camera setup failed: {0}")]
    Camera(#[from] signstream_pipeline::CameraError),
    #[error(transparent)]
    Pipeline(#[from] signstream_pipeline::PipelineError),
    #[error(transparent)]
    Predict(#[from] signstream_pipeline::PredictError),
    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

#[derive(Debug, Parser)]
#[command(name = "recognizer", version, about = "Live sign-language recognition client")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Capture from the configured camera and stream windows to the
    /// prediction service until Ctrl-C.
    Run {
        /// Stop automatically after this many seconds.
        #[arg(long)]
        duration_secs: Option<u64>,
        /// Turn the recognized words into a sentence when the session ends.
        #[arg(long)]
        sentence: bool,
    },
    /// Classify recorded clips one after another.
    PredictVideo {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Turn the recognized words into a sentence.
        #[arg(long)]
        sentence: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", cli.config.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        predictor = config.predictor.base_url,
        camera_mode = config.camera.mode,
        window_size = config.capture.window_size,
        max_concurrent = config.capture.max_concurrent_requests,
        "starting signstream recognizer"
    );

    let result = match cli.command {
        Command::Run {
            duration_secs,
            sentence,
        } => session::run(&config, duration_secs, sentence).await,
        Command::PredictVideo { files, sentence } => {
            upload::predict_videos(&config, &files, sentence).await
        }
    };

    if let Err(e) = result {
        error!(error = %e, "recognizer failed");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_flags() {
        let cli = Cli::parse_from(["recognizer", "-c", "x.toml", "run", "--duration-secs", "30"]);
        assert_eq!(cli.config, PathBuf::from("x.toml"));
        assert!(matches!(
            cli.command,
            Command::Run {
                duration_secs: Some(30),
                sentence: false
            }
        ));
    }

    #[test]
    fn predict_video_requires_files() {
        assert!(Cli::try_parse_from(["recognizer", "predict-video"]).is_err());
        let cli =
            Cli::parse_from(["recognizer", "predict-video", "a.mp4", "b.mp4", "--sentence"]);
        match cli.command {
            Command::PredictVideo { files, sentence } => {
                assert_eq!(files.len(), 2);
                assert!(sentence);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
