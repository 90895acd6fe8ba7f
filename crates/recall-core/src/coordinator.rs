//! Recognition coordinator — the capture-recognize-display state machine.
//!
//! The coordinator is pure: every transition takes an event and returns at
//! most one [`Effect`] for the caller to carry out. Outbound requests and
//! cooldown timers carry a [`Ticket`]; an event whose ticket does not match
//! the current phase is ignored, which covers both out-of-phase results and
//! results that outlived their session.

use crate::types::{
    DeviceUnavailable, Frame, PersonId, PersonProfile, RecognitionResult, RecognitionUnavailable,
    SummaryUnavailable,
};
use serde::Serialize;
use std::time::Duration;

/// Window after a dismissal during which no frame is processed.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5);

/// Banner text shown when a profile could not be loaded.
pub const SUMMARY_ERROR_MESSAGE: &str = "Could not load information. Please try again.";

/// Tag attached to each outbound request or timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    /// Session generation the ticket was issued in.
    pub generation: u64,
    /// Monotonic within the coordinator.
    pub sequence: u64,
}

/// Current phase of the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    /// No session.
    Idle,
    /// Sampling, no request in flight.
    Scanning,
    /// A recognition request is in flight.
    Recognizing { ticket: Ticket },
    /// A summary request is in flight.
    Loading { ticket: Ticket, person_id: PersonId },
    /// A profile is displayed.
    Showing { profile: PersonProfile },
    /// The last summary request failed; still sampling.
    Error { message: String },
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Scanning => "scanning",
            Phase::Recognizing { .. } => "recognizing",
            Phase::Loading { .. } => "loading",
            Phase::Showing { .. } => "showing",
            Phase::Error { .. } => "error",
        }
    }
}

/// Work the caller must perform on behalf of the coordinator.
#[derive(Debug)]
pub enum Effect {
    /// Submit `frame` for recognition; report back via [`Coordinator::on_recognition`].
    Recognize { ticket: Ticket, frame: Frame },
    /// Fetch the profile; report back via [`Coordinator::on_summary`].
    FetchSummary { ticket: Ticket, person_id: PersonId },
    /// Call [`Coordinator::on_cooldown_elapsed`] once `after` has passed.
    StartCooldown { ticket: Ticket, after: Duration },
}

/// Serializable snapshot of the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinatorState {
    pub phase: &'static str,
    pub last_shown_person_id: Option<PersonId>,
    pub cooldown_active: bool,
    pub error_message: Option<String>,
}

pub struct Coordinator {
    phase: Phase,
    generation: u64,
    sequence: u64,
    last_shown: Option<PersonId>,
    /// Ticket of the running cooldown timer.
    cooldown: Option<Ticket>,
    /// Error banner carried through a recognition started from `Error`.
    held_error: Option<String>,
    device_error: Option<DeviceUnavailable>,
    cooldown_duration: Duration,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

impl Coordinator {
    pub fn new(cooldown_duration: Duration) -> Self {
        Self {
            phase: Phase::Idle,
            generation: 0,
            sequence: 0,
            last_shown: None,
            cooldown: None,
            held_error: None,
            device_error: None,
            cooldown_duration,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn last_shown_person_id(&self) -> Option<&str> {
        self.last_shown.as_deref()
    }

    pub fn cooldown_active(&self) -> bool {
        self.cooldown.is_some()
    }

    /// Error banner currently visible, if any.
    pub fn error_message(&self) -> Option<&str> {
        match &self.phase {
            Phase::Error { message } => Some(message),
            Phase::Recognizing { .. } => self.held_error.as_deref(),
            _ => None,
        }
    }

    pub fn device_error(&self) -> Option<&DeviceUnavailable> {
        self.device_error.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.phase != Phase::Idle
    }

    pub fn state(&self) -> CoordinatorState {
        CoordinatorState {
            phase: self.phase.name(),
            last_shown_person_id: self.last_shown.clone(),
            cooldown_active: self.cooldown_active(),
            error_message: self.error_message().map(str::to_string),
        }
    }

    /// Begin a session. Returns `false` if one is already running.
    pub fn start(&mut self) -> bool {
        if self.is_active() {
            return false;
        }
        self.generation += 1;
        self.clear_transient();
        self.device_error = None;
        self.phase = Phase::Scanning;
        tracing::info!(generation = self.generation, "session started");
        true
    }

    /// End the session from any state. Calling it on an idle coordinator
    /// only clears a pending device error.
    pub fn stop(&mut self) {
        self.device_error = None;
        if !self.is_active() {
            return;
        }
        self.generation += 1;
        self.clear_transient();
        self.phase = Phase::Idle;
        tracing::info!(generation = self.generation, "session stopped");
    }

    /// The capture device could not be acquired; the session cannot run.
    pub fn device_failed(&mut self, error: DeviceUnavailable) {
        tracing::warn!(error = %error, "capture device unavailable");
        if self.is_active() {
            self.generation += 1;
        }
        self.clear_transient();
        self.phase = Phase::Idle;
        self.device_error = Some(error);
    }

    /// A new frame was sampled. The sole admission-control point: at most one
    /// request in flight, nothing during cooldown, nothing while a person is shown.
    pub fn on_frame(&mut self, frame: Frame) -> Option<Effect> {
        if self.cooldown.is_some() {
            tracing::debug!(seq = frame.sequence, "frame dropped: cooldown active");
            return None;
        }
        let held = match &self.phase {
            Phase::Scanning => None,
            Phase::Error { message } => Some(message.clone()),
            other => {
                tracing::debug!(seq = frame.sequence, phase = other.name(), "frame dropped");
                return None;
            }
        };
        self.held_error = held;
        let ticket = self.issue();
        self.phase = Phase::Recognizing { ticket };
        tracing::debug!(seq = frame.sequence, bytes = frame.data.len(), "submitting frame");
        Some(Effect::Recognize { ticket, frame })
    }

    pub fn on_recognition(
        &mut self,
        ticket: Ticket,
        result: Result<RecognitionResult, RecognitionUnavailable>,
    ) -> Option<Effect> {
        if self.phase != (Phase::Recognizing { ticket }) {
            tracing::debug!(?ticket, phase = self.phase.name(), "stale recognition result ignored");
            return None;
        }

        let result = match result {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "recognition failed");
                self.settle();
                return None;
            }
        };

        let Some(person_id) = result.person() else {
            tracing::debug!(message = ?result.message, "no face matched");
            self.settle();
            return None;
        };

        if self.cooldown.is_some() || self.last_shown.as_deref() == Some(person_id) {
            tracing::debug!(person_id, "recognition discarded: person already handled");
            self.settle();
            return None;
        }

        let person_id = person_id.to_string();
        tracing::info!(person_id = %person_id, confidence = ?result.confidence, "person recognized");
        self.held_error = None;
        self.last_shown = Some(person_id.clone());
        let ticket = self.issue();
        self.phase = Phase::Loading {
            ticket,
            person_id: person_id.clone(),
        };
        Some(Effect::FetchSummary { ticket, person_id })
    }

    pub fn on_summary(&mut self, ticket: Ticket, result: Result<PersonProfile, SummaryUnavailable>) {
        let person_id = match &self.phase {
            Phase::Loading {
                ticket: current,
                person_id,
            } if *current == ticket => person_id.clone(),
            _ => {
                tracing::debug!(?ticket, phase = self.phase.name(), "stale summary ignored");
                return;
            }
        };

        match result {
            Ok(mut profile) => {
                if profile.person_id.is_empty() {
                    profile.person_id = person_id;
                }
                tracing::info!(person_id = %profile.person_id, name = %profile.name, "showing person");
                self.phase = Phase::Showing { profile };
            }
            Err(e) => {
                tracing::error!(person_id = %person_id, error = %e, "summary failed");
                self.phase = Phase::Error {
                    message: SUMMARY_ERROR_MESSAGE.to_string(),
                };
            }
        }
    }

    /// The user dismissed the profile card or error banner.
    ///
    /// Returns to `Scanning` immediately and starts the cooldown. A recognition
    /// started from `Error` stays in flight; only its banner is cleared.
    pub fn dismiss(&mut self) -> Option<Effect> {
        match self.phase {
            Phase::Showing { .. } | Phase::Error { .. } => self.phase = Phase::Scanning,
            Phase::Recognizing { .. } if self.held_error.is_some() => self.held_error = None,
            _ => {
                tracing::debug!(phase = self.phase.name(), "dismiss ignored: nothing shown");
                return None;
            }
        }
        let ticket = self.issue();
        self.cooldown = Some(ticket);
        tracing::debug!(after_ms = self.cooldown_duration.as_millis() as u64, "cooldown started");
        Some(Effect::StartCooldown {
            ticket,
            after: self.cooldown_duration,
        })
    }

    pub fn on_cooldown_elapsed(&mut self, ticket: Ticket) {
        if self.cooldown != Some(ticket) {
            return;
        }
        self.cooldown = None;
        self.last_shown = None;
        tracing::debug!("cooldown elapsed");
    }

    fn issue(&mut self) -> Ticket {
        self.sequence += 1;
        Ticket {
            generation: self.generation,
            sequence: self.sequence,
        }
    }

    /// Return from `Recognizing` to the phase it was entered from.
    fn settle(&mut self) {
        self.phase = match self.held_error.take() {
            Some(message) => Phase::Error { message },
            None => Phase::Scanning,
        };
    }

    fn clear_transient(&mut self) {
        self.last_shown = None;
        self.cooldown = None;
        self.held_error = None;
    }
}
