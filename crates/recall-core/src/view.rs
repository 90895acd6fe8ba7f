//! Projection of coordinator state into what the user sees.
//!
//! Exactly one view is visible at a time. The presentation side only ever
//! reads a [`View`] and forwards dismissals; it never holds recognition state.

use crate::coordinator::{Coordinator, Phase};
use crate::types::{DeviceUnavailable, PersonProfile};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum View {
    /// No session; the camera is off.
    Off,
    /// Full-screen device failure with a retry action.
    DeviceError {
        error: DeviceUnavailable,
        message: String,
    },
    /// Scanning indicator. `waiting` is set while re-detection is suppressed
    /// after a dismissal.
    Scanning { waiting: bool },
    /// Loading skeleton while the profile is fetched.
    Loading,
    /// Person profile card.
    Person { profile: PersonProfile },
    /// Dismissible error banner.
    Error { message: String },
}

impl View {
    pub fn project(coordinator: &Coordinator) -> Self {
        if let Some(error) = coordinator.error_message() {
            return View::Error {
                message: error.to_string(),
            };
        }
        match coordinator.phase() {
            Phase::Idle => match coordinator.device_error() {
                Some(error) => View::DeviceError {
                    message: error.user_message().to_string(),
                    error: error.clone(),
                },
                None => View::Off,
            },
            // An in-flight recognition is invisible: no UI change until a match.
            Phase::Scanning | Phase::Recognizing { .. } => View::Scanning {
                waiting: coordinator.cooldown_active(),
            },
            Phase::Loading { .. } => View::Loading,
            Phase::Showing { profile } => View::Person {
                profile: profile.clone(),
            },
            Phase::Error { message } => View::Error {
                message: message.clone(),
            },
        }
    }

    /// Whether the view offers a dismiss action.
    pub fn dismissible(&self) -> bool {
        matches!(self, View::Person { .. } | View::Error { .. })
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            View::Off => write!(
                f,
                "Camera is off. Point the camera at someone to help remember who they are."
            ),
            View::DeviceError { message, .. } => write!(f, "Camera Access Needed: {message}"),
            View::Scanning { waiting: false } => write!(f, "Looking for faces..."),
            View::Scanning { waiting: true } => write!(f, "Just a moment..."),
            View::Loading => write!(f, "Loading..."),
            View::Person { profile } => write!(
                f,
                "{}\nYour {}\n\n{}",
                profile.name,
                profile.relationship.to_lowercase(),
                profile.summary
            ),
            View::Error { message } => write!(f, "{message}"),
        }
    }
}
