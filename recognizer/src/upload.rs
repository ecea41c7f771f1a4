use signstream_common::config::Config;
use signstream_common::record::{clean_label, join_words};
use signstream_pipeline::{HttpPredictor, PredictError};
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info};

use crate::RecognizerError;

/// Classify each clip in order, print the words, and optionally have the
/// service compose them into a sentence.
pub async fn predict_videos(
    config: &Config,
    files: &[PathBuf],
    sentence: bool,
) -> Result<(), RecognizerError> {
    let predictor = HttpPredictor::new(&config.predictor)?;
    report(&mut std::io::stdout(), &predictor, files, sentence).await
}

/// Elapsed time is reported whether or not every clip succeeded.
async fn report(
    out: &mut impl Write,
    predictor: &HttpPredictor,
    files: &[PathBuf],
    sentence: bool,
) -> Result<(), RecognizerError> {
    let started = Instant::now();
    let outcome = classify(out, predictor, files, sentence).await;
    writeln!(out, "Elapsed: {:.2}s", started.elapsed().as_secs_f64())?;
    outcome
}

async fn classify(
    out: &mut impl Write,
    predictor: &HttpPredictor,
    files: &[PathBuf],
    sentence: bool,
) -> Result<(), RecognizerError> {
    let mut words = Vec::with_capacity(files.len());
    for path in files {
        let label = predictor
            .predict_video(path)
            .await
            .map(|label| clean_label(&label))
            .inspect_err(|e: &PredictError| {
                error!(file = path.display().to_string(), error = %e, "clip prediction failed");
            })?;
        info!(file = path.display().to_string(), label, "clip classified");
        writeln!(out, "{}: {label}", path.display())?;
        words.push(label);
    }

    let joined = join_words(words.iter().map(String::as_str));
    writeln!(out, "Words: {joined}")?;

    if sentence && !joined.is_empty() {
        let generated = predictor.generate_sentence(&joined).await?;
        writeln!(out, "Sentence: {generated}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use signstream_common::config::PredictorConfig;

    #[tokio::test]
    async fn elapsed_is_reported_when_a_clip_fails() {
        let predictor = HttpPredictor::new(&PredictorConfig::default()).unwrap();
        let files = vec![PathBuf::from("/nonexistent/signstream/clip.mp4")];

        let mut out = Vec::new();
        let result = report(&mut out, &predictor, &files, false).await;
        assert!(matches!(
            result,
            Err(RecognizerError::Predict(PredictError::ReadFile(_, _)))
        ));

        let printed = String::from_utf8(out).unwrap();
        assert!(printed.starts_with("Elapsed: "));
        assert!(!printed.contains("Words:"));
    }

    #[tokio::test]
    async fn empty_file_list_reports_no_words() {
        let predictor = HttpPredictor::new(&PredictorConfig::default()).unwrap();
        let mut out = Vec::new();
        report(&mut out, &predictor, &[], true).await.unwrap();

        let printed = String::from_utf8(out).unwrap();
        assert!(printed.starts_with("Words: \n"));
        assert!(printed.contains("Elapsed: "));
        assert!(!printed.contains("Sentence:"));
    }
}
