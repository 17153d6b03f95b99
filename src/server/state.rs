use crate::HandwritingAnalyzer;

/// Shared across requests; the analyzer and its OCR handle are read-only.
pub struct ServerState {
    pub analyzer: HandwritingAnalyzer,
}
