//! Seams to the external recognition and summary services.

use crate::types::{Frame, PersonProfile, RecognitionResult, RecognitionUnavailable, SummaryUnavailable};
use std::future::Future;

/// Stateless wrapper around the face-matching service.
///
/// Implementations never retry; the coordinator decides what a failure means.
pub trait RecognitionService: Send + Sync + 'static {
    fn recognize(
        &self,
        frame: Frame,
    ) -> impl Future<Output = Result<RecognitionResult, RecognitionUnavailable>> + Send;
}

/// Stateless wrapper around the summarization service.
pub trait SummaryService: Send + Sync + 'static {
    fn fetch_summary(
        &self,
        person_id: &str,
    ) -> impl Future<Output = Result<PersonProfile, SummaryUnavailable>> + Send;
}
