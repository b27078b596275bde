//! Verification session state machine.
//!
//! The whole session is one [`SessionState`]; the only way to change it is
//! [`SessionState::apply`], which either returns the next state or a
//! [`TransitionError`] and leaves the current one untouched. There are no
//! independent loading/error/permission flags to fall out of sync.
//!
//! ```text
//! Idle ──activate──▶ Scanning ──code──▶ Verifying ──authentic──▶ Success
//!   ▲                   │                   │
//!   │                   └─capture/decode─┐  └─not found / failure─▶ Error
//!   │                                    ▼                          │
//!   └──────────────── reset ◀── Success | Error | Registering ◀─────┘ register
//!                                                   │
//!                         confirmed ──▶ Verifying ◀─┘   rejected ──▶ Error
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ProductRecord;

/// Why a session ended up in [`SessionState::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The ledger has no authentic record for the code
    NotRegistered,
    /// The lookup threw, timed out or never reached the node
    LedgerUnavailable,
    /// Registration was rejected, reverted, or no wallet was available
    RegistrationRejected,
    /// Camera permission denied
    CaptureDenied,
    /// Camera missing or busy
    CaptureUnavailable,
    /// A static image held no readable code
    NoCodeFound,
}

impl FailureKind {
    /// Ledger-side failures keep the scanned code and can escalate to registration.
    pub fn allows_registration(&self) -> bool {
        matches!(
            self,
            FailureKind::NotRegistered
                | FailureKind::LedgerUnavailable
                | FailureKind::RegistrationRejected
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Scanning,
    Verifying {
        code: String,
    },
    Success {
        code: String,
        product: ProductRecord,
    },
    Error {
        code: Option<String>,
        failure: FailureKind,
        message: String,
    },
    Registering {
        code: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SurfaceActivated,
    CodeDecoded(String),
    ProductVerified(ProductRecord),
    VerificationFailed { failure: FailureKind, message: String },
    RegistrationRequested,
    RegistrationConfirmed,
    RegistrationFailed { message: String },
    CaptureFailed { failure: FailureKind, message: String },
    DecodeFailed { message: String },
    Reset,
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::SurfaceActivated => "surface_activated",
            SessionEvent::CodeDecoded(_) => "code_decoded",
            SessionEvent::ProductVerified(_) => "product_verified",
            SessionEvent::VerificationFailed { .. } => "verification_failed",
            SessionEvent::RegistrationRequested => "registration_requested",
            SessionEvent::RegistrationConfirmed => "registration_confirmed",
            SessionEvent::RegistrationFailed { .. } => "registration_failed",
            SessionEvent::CaptureFailed { .. } => "capture_failed",
            SessionEvent::DecodeFailed { .. } => "decode_failed",
            SessionEvent::Reset => "reset",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Event '{event}' is not valid while {state}")]
pub struct TransitionError {
    pub state: &'static str,
    pub event: &'static str,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Idle
    }
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Scanning => "scanning",
            SessionState::Verifying { .. } => "verifying",
            SessionState::Success { .. } => "success",
            SessionState::Error { .. } => "error",
            SessionState::Registering { .. } => "registering",
        }
    }

    pub fn scanned_code(&self) -> Option<&str> {
        match self {
            SessionState::Idle | SessionState::Scanning => None,
            SessionState::Verifying { code }
            | SessionState::Success { code, .. }
            | SessionState::Registering { code } => Some(code),
            SessionState::Error { code, .. } => code.as_deref(),
        }
    }

    pub fn product(&self) -> Option<&ProductRecord> {
        match self {
            SessionState::Success { product, .. } => Some(product),
            _ => None,
        }
    }

    pub fn can_register(&self) -> bool {
        matches!(
            self,
            SessionState::Error { code: Some(_), failure, .. } if failure.allows_registration()
        )
    }

    /// Computes the state that follows `event`.
    pub fn apply(&self, event: SessionEvent) -> Result<SessionState, TransitionError> {
        use SessionEvent as E;
        use SessionState as S;

        let rejected = TransitionError {
            state: self.name(),
            event: event.name(),
        };

        let next = match (self, event) {
            (S::Idle, E::SurfaceActivated) => S::Scanning,
            (S::Idle | S::Scanning, E::CaptureFailed { failure, message }) => S::Error {
                code: None,
                failure,
                message,
            },
            (S::Scanning, E::CodeDecoded(code)) => S::Verifying { code },
            (S::Scanning, E::DecodeFailed { message }) => S::Error {
                code: None,
                failure: FailureKind::NoCodeFound,
                message,
            },
            // A record for another code is a stale answer
            (S::Verifying { code }, E::ProductVerified(product)) if product.qr_code_id != *code => {
                return Err(rejected)
            }
            (S::Verifying { code }, E::ProductVerified(product)) => {
                if product.is_authentic {
                    S::Success {
                        code: code.clone(),
                        product,
                    }
                } else {
                    S::Error {
                        code: Some(code.clone()),
                        failure: FailureKind::NotRegistered,
                        message: "Product not found on the ledger".to_string(),
                    }
                }
            }
            (S::Verifying { code }, E::VerificationFailed { failure, message }) => S::Error {
                code: Some(code.clone()),
                failure,
                message,
            },
            (S::Error { code: Some(code), failure, .. }, E::RegistrationRequested)
                if failure.allows_registration() =>
            {
                S::Registering { code: code.clone() }
            }
            (S::Registering { code }, E::RegistrationConfirmed) => S::Verifying { code: code.clone() },
            (S::Registering { code }, E::RegistrationFailed { message }) => S::Error {
                code: Some(code.clone()),
                failure: FailureKind::RegistrationRejected,
                message,
            },
            (S::Verifying { .. }, E::Reset) => return Err(rejected),
            (_, E::Reset) => S::Idle,
            _ => return Err(rejected),
        };

        Ok(next)
    }
}
