use signstream_common::record::PredictionRecord;

/// Latest result, ordered history and the last surfaced error.
#[derive(Debug, Default)]
pub struct ResultSink {
    latest: Option<PredictionRecord>,
    history: Vec<PredictionRecord>,
    last_error: Option<String>,
}

impl ResultSink {
    pub fn record(&mut self, record: PredictionRecord) {
        self.latest = Some(record.clone());
        self.history.push(record);
    }

    pub fn record_error(&mut self, message: String) {
        self.last_error = Some(message);
    }

    pub fn latest(&self) -> Option<&PredictionRecord> {
        self.latest.as_ref()
    }

    /// Records in arrival order.
    pub fn history(&self) -> &[PredictionRecord] {
        &self.history
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// History survives a stop; only the latest result goes.
    pub fn clear_latest(&mut self) {
        self.latest = None;
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Fresh slate for a new session.
    pub fn reset(&mut self) {
        self.latest = None;
        self.history.clear();
        self.last_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_append_in_arrival_order() {
        let mut sink = ResultSink::default();
        sink.record(PredictionRecord::new("B", Some(0.8), 1, 0));
        sink.record(PredictionRecord::new("A", None, 0, 0));

        assert_eq!(sink.latest().map(|r| r.label.as_str()), Some("A"));
        let labels: Vec<&str> = sink.history().iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["B", "A"]);
    }

    #[test]
    fn clear_latest_keeps_history() {
        let mut sink = ResultSink::default();
        sink.record(PredictionRecord::new("Hello", Some(0.5), 0, 0));
        sink.record_error("prediction failed".into());
        sink.clear_latest();

        assert!(sink.latest().is_none());
        assert_eq!(sink.history().len(), 1);
        assert_eq!(sink.last_error(), Some("prediction failed"));

        sink.reset();
        assert!(sink.history().is_empty());
        assert!(sink.last_error().is_none());
    }
}
