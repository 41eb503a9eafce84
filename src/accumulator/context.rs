/// Per-ingest request context, threaded explicitly as a parameter rather than
/// pulled from an ambient context map. Mirrors the header/context names
/// required at the ingress boundary: `accumulator-id` and
/// `stream-end-indicator`, plus an optional `start-timestamp`.
#[derive(Debug, Clone)]
pub struct IngestContext {
    pub accumulator_id: String,
    pub is_final_chunk: bool,
    pub start_timestamp_ms: Option<i64>,
}

impl IngestContext {
    pub fn new(accumulator_id: impl Into<String>, is_final_chunk: bool) -> Self {
        Self {
            accumulator_id: accumulator_id.into(),
            is_final_chunk,
            start_timestamp_ms: None,
        }
    }

    pub fn with_start_timestamp(mut self, start_timestamp_ms: i64) -> Self {
        self.start_timestamp_ms = Some(start_timestamp_ms);
        self
    }
}
