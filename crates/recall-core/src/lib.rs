//! recall-core — Capture-recognize-display coordination.
//!
//! Holds the data model shared by the daemon and the camera layer, the
//! recognition coordinator state machine, and the projection of its state
//! into what the user sees.

pub mod coordinator;
pub mod service;
pub mod types;
pub mod view;

pub use coordinator::{Coordinator, CoordinatorState, Effect, Phase, Ticket};
pub use service::{RecognitionService, SummaryService};
pub use types::{
    DeviceUnavailable, Frame, PersonId, PersonProfile, RecognitionResult, RecognitionUnavailable,
    SummaryUnavailable,
};
pub use view::View;
