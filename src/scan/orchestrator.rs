//! Verification orchestrator: capture → decode → ledger lookup → result.
//!
//! [`VerificationOrchestrator`] owns the session state and is the only writer
//! of it. Every change goes through [`SessionState::apply`] inside a single
//! `watch::Sender::send_if_modified` call, so the check and the update are
//! atomic and every subscriber sees each committed state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{info, instrument, warn};

use super::capture::{CaptureError, CaptureSurface, FrameSource};
use super::reader::QrReader;
use super::session::{FailureKind, SessionEvent, SessionState, TransitionError};
use crate::ledger::{ConnectionStrategy, LedgerError, LedgerService};
use crate::model::RegistrationForm;

/// Errors returned to the caller rather than recorded in the session.
///
/// Ledger and capture failures are not errors here: they move the session
/// into [`SessionState::Error`] and the call returns `Ok` with that state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    /// The requested action is not valid in the current state
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Registration form is missing a required field
    #[error("Invalid registration form: {0}")]
    InvalidForm(String),

    /// Continuous scanning ended without a code (surface deactivated)
    #[error("Scanning was cancelled")]
    ScanCancelled,
}

pub struct VerificationOrchestrator<L: LedgerService + ?Sized> {
    ledger: Arc<L>,
    reader: QrReader,
    updates: watch::Sender<SessionState>,
    verify_timeout: Duration,
    register_timeout: Duration,
}

impl<L: LedgerService + ?Sized> VerificationOrchestrator<L> {
    /// Default configuration:
    /// - Lookup timeout: 30 seconds
    /// - Registration timeout: 5 minutes (includes waiting for the receipt)
    pub fn new(ledger: Arc<L>) -> Self {
        let (updates, _) = watch::channel(SessionState::Idle);
        Self {
            ledger,
            reader: QrReader::new(),
            updates,
            verify_timeout: Duration::from_secs(30),
            register_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_verify_timeout(mut self, timeout: Duration) -> Self {
        self.verify_timeout = timeout;
        self
    }

    pub fn with_register_timeout(mut self, timeout: Duration) -> Self {
        self.register_timeout = timeout;
        self
    }

    pub fn state(&self) -> SessionState {
        self.updates.borrow().clone()
    }

    /// Receiver that observes every committed state.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.updates.subscribe()
    }

    pub fn strategy(&self) -> &ConnectionStrategy {
        self.ledger.strategy()
    }

    fn transition(&self, event: SessionEvent) -> Result<SessionState, TransitionError> {
        commit(&self.updates, event)
    }

    // ========================================================================
    // Capture
    // ========================================================================

    /// Activates a live surface and moves `Idle → Scanning`.
    ///
    /// Permission and device failures end in [`SessionState::Error`].
    pub async fn activate<S: FrameSource>(
        &self,
        surface: &mut CaptureSurface<S>,
    ) -> Result<SessionState, OrchestratorError> {
        self.state().apply(SessionEvent::SurfaceActivated)?;

        match surface.activate().await {
            Ok(()) => Ok(self.transition(SessionEvent::SurfaceActivated)?),
            Err(e) => {
                warn!(error = %e, "Capture surface failed to activate");
                Ok(self.transition(capture_failed(&e))?)
            }
        }
    }

    /// Moves `Idle → Scanning` for a static image upload.
    pub fn activate_static(&self) -> Result<SessionState, OrchestratorError> {
        Ok(self.transition(SessionEvent::SurfaceActivated)?)
    }

    /// Samples the live surface until a code is found, then verifies it.
    ///
    /// The surface is deactivated as soon as a code is detected.
    pub async fn scan_continuous<S: FrameSource>(
        &self,
        surface: &mut CaptureSurface<S>,
    ) -> Result<SessionState, OrchestratorError> {
        if !matches!(self.state(), SessionState::Scanning) {
            return Err(TransitionError {
                state: self.state().name(),
                event: "scan_continuous",
            }
            .into());
        }

        let found = match surface.start_continuous() {
            Ok(found) => found,
            Err(e) => return Ok(self.transition(capture_failed(&e))?),
        };

        let code = found.await.map_err(|_| OrchestratorError::ScanCancelled)?;
        surface.deactivate().await;
        self.submit_code(code).await
    }

    /// Single-shot decode of an uploaded image (bytes or `data:` URI).
    pub async fn scan_image(&self, upload: &[u8]) -> Result<SessionState, OrchestratorError> {
        match self.reader.decode_upload(upload) {
            Ok(code) => self.submit_code(code).await,
            Err(e) => {
                info!(error = %e, "No code decoded from upload");
                Ok(self.transition(SessionEvent::DecodeFailed {
                    message: e.to_string(),
                })?)
            }
        }
    }

    // ========================================================================
    // Verification
    // ========================================================================

    /// Accepts a decoded code and looks it up, verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Transition`] unless the session is
    /// `Scanning`; in particular a second code is rejected while a lookup is
    /// in flight.
    pub async fn submit_code(&self, code: String) -> Result<SessionState, OrchestratorError> {
        self.transition(SessionEvent::CodeDecoded(code.clone()))?;
        Ok(self.run_verification(&code).await?)
    }

    #[instrument(skip(self))]
    async fn run_verification(&self, code: &str) -> Result<SessionState, TransitionError> {
        let guard = InFlight::new(
            &self.updates,
            SessionEvent::VerificationFailed {
                failure: FailureKind::LedgerUnavailable,
                message: "Verification was cancelled".to_string(),
            },
        );
        let start = Instant::now();
        let outcome = timeout(self.verify_timeout, self.ledger.verify_product(code)).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        guard.disarm();

        let event = match outcome {
            Ok(Ok(product)) => {
                info!(duration_ms, authentic = product.is_authentic, "Ledger lookup completed");
                SessionEvent::ProductVerified(product)
            }
            Ok(Err(e)) => {
                warn!(duration_ms, error = %e, "Ledger lookup failed");
                SessionEvent::VerificationFailed {
                    failure: FailureKind::LedgerUnavailable,
                    message: ledger_message("Verification failed", &e),
                }
            }
            Err(_) => {
                warn!(duration_ms, "Ledger lookup timed out");
                SessionEvent::VerificationFailed {
                    failure: FailureKind::LedgerUnavailable,
                    message: format!(
                        "Ledger lookup timed out after {}s",
                        self.verify_timeout.as_secs()
                    ),
                }
            }
        };

        match self.transition(event) {
            Err(e) if matches!(self.state(), SessionState::Verifying { .. }) => {
                warn!(error = %e, "Ledger answer rejected");
                self.transition(SessionEvent::VerificationFailed {
                    failure: FailureKind::LedgerUnavailable,
                    message: "Ledger returned a record for a different code".to_string(),
                })
            }
            other => other,
        }
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Moves `Error → Registering` for the code that failed verification.
    pub fn request_registration(&self) -> Result<SessionState, OrchestratorError> {
        Ok(self.transition(SessionEvent::RegistrationRequested)?)
    }

    /// Writes the scanned code to the ledger, then verifies it again.
    ///
    /// A form missing required fields is rejected without leaving
    /// `Registering`. Without a signing wallet the session moves to `Error`
    /// before anything is sent.
    #[instrument(skip(self, form))]
    pub async fn submit_registration(
        &self,
        form: &RegistrationForm,
    ) -> Result<SessionState, OrchestratorError> {
        let code = match self.state() {
            SessionState::Registering { code } => code,
            other => {
                return Err(TransitionError {
                    state: other.name(),
                    event: "submit_registration",
                }
                .into())
            }
        };
        let form = form
            .normalized()
            .map_err(|e| OrchestratorError::InvalidForm(e.to_string()))?;

        if !self.ledger.strategy().can_sign() {
            return Ok(self.transition(SessionEvent::RegistrationFailed {
                message: LedgerError::WalletUnavailable.to_string(),
            })?);
        }

        let start = Instant::now();
        let outcome = timeout(
            self.register_timeout,
            self.ledger.register_product(
                &code,
                &form.product_name,
                &form.manufacturer,
                &form.batch_number,
            ),
        )
        .await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(receipt)) => {
                info!(
                    duration_ms,
                    tx_hash = %receipt.tx_hash,
                    block = ?receipt.block_number,
                    "Registration confirmed"
                );
                self.transition(SessionEvent::RegistrationConfirmed)?;
                Ok(self.run_verification(&code).await?)
            }
            Ok(Err(e)) => {
                warn!(duration_ms, error = %e, "Registration failed");
                Ok(self.transition(SessionEvent::RegistrationFailed {
                    message: ledger_message("Registration failed", &e),
                })?)
            }
            Err(_) => {
                warn!(duration_ms, "Registration timed out");
                Ok(self.transition(SessionEvent::RegistrationFailed {
                    message: format!(
                        "Registration timed out after {}s",
                        self.register_timeout.as_secs()
                    ),
                })?)
            }
        }
    }

    // ========================================================================
    // Reset
    // ========================================================================

    pub fn reset(&self) -> Result<SessionState, OrchestratorError> {
        Ok(self.transition(SessionEvent::Reset)?)
    }

    /// Resets to `Idle` and immediately re-activates the live surface.
    pub async fn reset_and_reactivate<S: FrameSource>(
        &self,
        surface: &mut CaptureSurface<S>,
    ) -> Result<SessionState, OrchestratorError> {
        surface.deactivate().await;
        self.reset()?;
        self.activate(surface).await
    }
}

/// Applies `event` to the shared state; the check and the write are one step.
fn commit(
    updates: &watch::Sender<SessionState>,
    event: SessionEvent,
) -> Result<SessionState, TransitionError> {
    let mut outcome = Err(TransitionError {
        state: "unknown",
        event: event.name(),
    });
    updates.send_if_modified(|state| match state.apply(event) {
        Ok(next) => {
            info!(from = state.name(), to = next.name(), "Session transition");
            *state = next.clone();
            outcome = Ok(next);
            true
        }
        Err(e) => {
            outcome = Err(e);
            false
        }
    });
    outcome
}

/// Held across an in-flight ledger call. If the owning future is dropped
/// before `disarm`, the fallback event is committed so the session never
/// stays parked in `Verifying`.
struct InFlight<'a> {
    updates: &'a watch::Sender<SessionState>,
    on_drop: Option<SessionEvent>,
}

impl<'a> InFlight<'a> {
    fn new(updates: &'a watch::Sender<SessionState>, on_drop: SessionEvent) -> Self {
        Self {
            updates,
            on_drop: Some(on_drop),
        }
    }

    fn disarm(mut self) {
        self.on_drop = None;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(event) = self.on_drop.take() {
            warn!(event = event.name(), "Ledger call dropped before completion");
            let _ = commit(self.updates, event);
        }
    }
}

fn capture_failed(error: &CaptureError) -> SessionEvent {
    let failure = match error {
        CaptureError::PermissionDenied => FailureKind::CaptureDenied,
        CaptureError::Unavailable(_) | CaptureError::Inactive => FailureKind::CaptureUnavailable,
    };
    SessionEvent::CaptureFailed {
        failure,
        message: error.to_string(),
    }
}

fn ledger_message(context: &str, error: &LedgerError) -> String {
    match error.rejection_reason() {
        Some(reason) => format!("{}: {}", context, reason),
        None => format!("{}: {}", context, error),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use crate::scan::fixtures::{encode_png, qr_frame};
    use image::{Rgba, RgbaImage};

    async fn seeded_ledger() -> Arc<MemoryLedger> {
        let ledger = MemoryLedger::new();
        ledger
            .seed("GLS-1234", "GreenLife Seeds", "GreenLife Ltd", "B-001")
            .await;
        Arc::new(ledger)
    }

    fn form(name: &str, manufacturer: &str) -> RegistrationForm {
        RegistrationForm {
            product_name: name.to_string(),
            manufacturer: manufacturer.to_string(),
            batch_number: String::new(),
        }
    }

    #[tokio::test]
    async fn test_registered_code_reaches_success() {
        let orchestrator = VerificationOrchestrator::new(seeded_ledger().await);
        orchestrator.activate_static().unwrap();

        let state = orchestrator.submit_code("GLS-1234".into()).await.unwrap();
        let product = state.product().unwrap();
        assert_eq!(product.product_name, "GreenLife Seeds");
        assert_eq!(product.manufacturer, "GreenLife Ltd");
        assert_eq!(product.batch_number, "B-001");
    }

    #[tokio::test]
    async fn test_unknown_code_registers_then_verifies() {
        let orchestrator = VerificationOrchestrator::new(seeded_ledger().await);
        let mut updates = orchestrator.subscribe();
        orchestrator.activate_static().unwrap();

        let state = orchestrator.submit_code("UNKNOWN-999".into()).await.unwrap();
        assert!(matches!(
            state,
            SessionState::Error { failure: FailureKind::NotRegistered, .. }
        ));
        assert!(updates.has_changed().unwrap());
        assert_eq!(updates.borrow_and_update().name(), "error");

        orchestrator.request_registration().unwrap();
        let state = orchestrator
            .submit_registration(&form("NPK 20-20", "AgroChem"))
            .await
            .unwrap();

        let product = state.product().unwrap();
        assert_eq!(product.qr_code_id, "UNKNOWN-999");
        assert_eq!(product.batch_number, "BATCH-001");
    }

    #[tokio::test]
    async fn test_invalid_form_stays_registering() {
        let orchestrator = VerificationOrchestrator::new(seeded_ledger().await);
        orchestrator.activate_static().unwrap();
        orchestrator.submit_code("UNKNOWN-999".into()).await.unwrap();
        orchestrator.request_registration().unwrap();

        let err = orchestrator
            .submit_registration(&form("", "AgroChem"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidForm(_)));
        assert_eq!(orchestrator.state().name(), "registering");
    }

    #[tokio::test]
    async fn test_registration_without_wallet_fails_fast() {
        let orchestrator = VerificationOrchestrator::new(Arc::new(MemoryLedger::read_only()));
        orchestrator.activate_static().unwrap();
        orchestrator.submit_code("UNKNOWN-999".into()).await.unwrap();
        orchestrator.request_registration().unwrap();

        let state = orchestrator
            .submit_registration(&form("NPK", "AgroChem"))
            .await
            .unwrap();
        match state {
            SessionState::Error { code, failure, message } => {
                assert_eq!(code.as_deref(), Some("UNKNOWN-999"));
                assert_eq!(failure, FailureKind::RegistrationRejected);
                assert!(message.contains("wallet"));
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_duplicate_registration_surfaces_revert_reason() {
        let ledger = seeded_ledger().await;
        let orchestrator = VerificationOrchestrator::new(ledger.clone());
        orchestrator.activate_static().unwrap();
        orchestrator.submit_code("UNKNOWN-999".into()).await.unwrap();
        orchestrator.request_registration().unwrap();

        // Someone else registers the id while the form is open
        ledger.seed("UNKNOWN-999", "Other", "Other Co", "X").await;

        let state = orchestrator
            .submit_registration(&form("NPK", "AgroChem"))
            .await
            .unwrap();
        match state {
            SessionState::Error { message, .. } => {
                assert_eq!(message, "Registration failed: Product already registered")
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_lookup_timeout_is_ledger_failure() {
        let ledger = Arc::new(MemoryLedger::new().with_latency(Duration::from_millis(200)));
        let orchestrator =
            VerificationOrchestrator::new(ledger).with_verify_timeout(Duration::from_millis(20));
        orchestrator.activate_static().unwrap();

        let state = orchestrator.submit_code("GLS-1234".into()).await.unwrap();
        assert!(matches!(
            state,
            SessionState::Error { failure: FailureKind::LedgerUnavailable, .. }
        ));
        assert!(state.can_register());
    }

    #[tokio::test]
    async fn test_dropped_lookup_leaves_resettable_error() {
        let ledger = Arc::new(MemoryLedger::new().with_latency(Duration::from_millis(200)));
        ledger
            .seed("GLS-1234", "GreenLife Seeds", "GreenLife Ltd", "B-001")
            .await;
        let orchestrator = VerificationOrchestrator::new(ledger);
        orchestrator.activate_static().unwrap();

        let cancelled = timeout(
            Duration::from_millis(20),
            orchestrator.submit_code("GLS-1234".into()),
        )
        .await;
        assert!(cancelled.is_err());

        match orchestrator.state() {
            SessionState::Error { code, failure, .. } => {
                assert_eq!(code.as_deref(), Some("GLS-1234"));
                assert_eq!(failure, FailureKind::LedgerUnavailable);
            }
            other => panic!("unexpected state {:?}", other),
        }

        assert_eq!(orchestrator.reset().unwrap(), SessionState::Idle);
        orchestrator.activate_static().unwrap();
        let state = orchestrator.submit_code("GLS-1234".into()).await.unwrap();
        assert_eq!(state.name(), "success");
    }

    #[tokio::test]
    async fn test_reset_and_reactivate_scans_again() {
        let dir = tempfile::tempdir().unwrap();
        let frame = dir.path().join("frame.png");
        std::fs::write(&frame, encode_png(&qr_frame("GLS-1234", 5))).unwrap();

        let orchestrator = VerificationOrchestrator::new(seeded_ledger().await);
        let mut surface = CaptureSurface::new(
            crate::scan::ReplaySource::new(vec![frame]),
            Duration::from_millis(5),
        );

        assert_eq!(orchestrator.activate(&mut surface).await.unwrap(), SessionState::Scanning);
        let state = orchestrator.scan_continuous(&mut surface).await.unwrap();
        assert_eq!(state.name(), "success");
        assert!(!surface.is_active());

        let state = orchestrator.reset_and_reactivate(&mut surface).await.unwrap();
        assert_eq!(state, SessionState::Scanning);
        assert!(surface.is_active());

        let state = orchestrator.scan_continuous(&mut surface).await.unwrap();
        assert_eq!(state.scanned_code(), Some("GLS-1234"));
        assert_eq!(state.name(), "success");
    }

    /// Answers every lookup with the record of a fixed code.
    struct StaleLedger {
        strategy: ConnectionStrategy,
    }

    #[async_trait::async_trait]
    impl LedgerService for StaleLedger {
        async fn verify_product(&self, _qr_code_id: &str) -> Result<crate::model::ProductRecord, LedgerError> {
            Ok(crate::model::ProductRecord {
                qr_code_id: "GLS-1234".to_string(),
                product_name: "GreenLife Seeds".to_string(),
                manufacturer: "GreenLife Ltd".to_string(),
                batch_number: "B-001".to_string(),
                is_authentic: true,
            })
        }

        async fn register_product(
            &self,
            _qr_code_id: &str,
            _product_name: &str,
            _manufacturer: &str,
            _batch_number: &str,
        ) -> Result<crate::ledger::TxReceipt, LedgerError> {
            Err(LedgerError::WalletUnavailable)
        }

        fn strategy(&self) -> &ConnectionStrategy {
            &self.strategy
        }
    }

    #[tokio::test]
    async fn test_record_for_other_code_is_ledger_failure() {
        let orchestrator = VerificationOrchestrator::new(Arc::new(StaleLedger {
            strategy: ConnectionStrategy::PublicRpc,
        }));
        orchestrator.activate_static().unwrap();

        let state = orchestrator.submit_code("UNKNOWN-999".into()).await.unwrap();
        match state {
            SessionState::Error { code, failure, .. } => {
                assert_eq!(code.as_deref(), Some("UNKNOWN-999"));
                assert_eq!(failure, FailureKind::LedgerUnavailable);
            }
            other => panic!("unexpected state {:?}", other),
        }
        assert!(orchestrator.state().product().is_none());
    }

    #[tokio::test]
    async fn test_second_code_rejected_while_verifying() {
        let ledger = Arc::new(MemoryLedger::new().with_latency(Duration::from_millis(100)));
        let orchestrator = Arc::new(VerificationOrchestrator::new(ledger));
        orchestrator.activate_static().unwrap();

        let first = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.submit_code("A".into()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = orchestrator.submit_code("B".into()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Transition(_)));
        assert!(orchestrator.reset().is_err());

        let state = first.await.unwrap().unwrap();
        assert_eq!(state.scanned_code(), Some("A"));
    }

    #[tokio::test]
    async fn test_upload_without_code_is_explicit_error() {
        let orchestrator = VerificationOrchestrator::new(seeded_ledger().await);
        orchestrator.activate_static().unwrap();

        let blank = RgbaImage::from_pixel(120, 120, Rgba([255, 255, 255, 255]));
        let state = orchestrator.scan_image(&encode_png(&blank)).await.unwrap();
        assert!(matches!(
            state,
            SessionState::Error { code: None, failure: FailureKind::NoCodeFound, .. }
        ));
        assert!(!state.can_register());
        assert_eq!(orchestrator.reset().unwrap(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_upload_with_code_verifies() {
        let orchestrator = VerificationOrchestrator::new(seeded_ledger().await);
        orchestrator.activate_static().unwrap();

        let png = encode_png(&qr_frame("GLS-1234", 5));
        let state = orchestrator.scan_image(&png).await.unwrap();
        assert_eq!(state.name(), "success");
    }
}
