use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;

/// Opaque identifier assigned to a known person by the matching service.
pub type PersonId = String;

/// An encoded still image sampled from the live camera feed.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Encoded image bytes.
    pub data: Vec<u8>,
    /// MIME type of `data` (e.g., "image/jpeg").
    pub mime: &'static str,
    pub width: u32,
    pub height: u32,
    pub captured_at: Instant,
    /// Driver sequence number of the buffer this frame was encoded from.
    pub sequence: u32,
}

impl Frame {
    /// Build a JPEG frame stamped with the current instant.
    pub fn jpeg(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        Self {
            data,
            mime: "image/jpeg",
            width,
            height,
            captured_at: Instant::now(),
            sequence,
        }
    }
}

/// Outcome of matching one frame against the known people.
///
/// Wire shape: `{ "personId": string|null, "confidence"?: number, "message"?: string }`.
/// A missing `personId` is the same as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionResult {
    #[serde(default)]
    pub person_id: Option<PersonId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RecognitionResult {
    /// A result carrying no match.
    pub fn no_match() -> Self {
        Self::default()
    }

    /// A result matching `person_id`.
    pub fn matched(person_id: impl Into<PersonId>, confidence: Option<f64>) -> Self {
        Self {
            person_id: Some(person_id.into()),
            confidence,
            message: None,
        }
    }

    /// The matched id, treating an empty string as no match.
    pub fn person(&self) -> Option<&str> {
        self.person_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Human-readable profile of a recognized person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonProfile {
    /// Not part of the summary response body; filled in from the request.
    #[serde(default)]
    pub person_id: PersonId,
    pub name: String,
    pub relationship: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    pub summary: String,
}

/// Why the capture device could not be acquired.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "kebab-case")]
pub enum DeviceUnavailable {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("camera not found")]
    NotFound,
    #[error("camera unavailable: {0}")]
    Other(String),
}

impl DeviceUnavailable {
    /// Message shown full-screen next to the retry action.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::PermissionDenied => {
                "Camera access was denied. Please allow camera access to use this app."
            }
            Self::NotFound => "No camera found on this device.",
            Self::Other(_) => "Could not access the camera. Please try again.",
        }
    }
}

/// The face-matching service could not produce a result.
///
/// Transient: retried implicitly on the next sampling tick.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("recognition unavailable: {0}")]
pub struct RecognitionUnavailable(pub String);

/// The summary for a person could not be loaded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SummaryUnavailable {
    #[error("person not found: {0}")]
    NotFound(PersonId),
    #[error("summary service error: {0}")]
    Service(String),
}
