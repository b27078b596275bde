//! Scan module - optical code capture and product verification.
//!
//! - **Reader**: [`QrReader`] decodes one code from a frame or an uploaded image
//! - **Capture**: [`CaptureSurface`] drives continuous decoding over a [`FrameSource`]
//! - **Session**: [`SessionState`] transitions, computed by a pure function
//! - **Orchestrator**: [`VerificationOrchestrator`] ties capture, reader and ledger together

pub mod capture;
pub mod orchestrator;
pub mod reader;
pub mod session;

pub use capture::{CaptureError, CaptureSurface, FrameSource, ReplaySource};
pub use orchestrator::{OrchestratorError, VerificationOrchestrator};
pub use reader::{DecodeError, QrReader};
pub use session::{FailureKind, SessionEvent, SessionState, TransitionError};
