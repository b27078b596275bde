use crate::report::ExportError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Pdf,
    Image,
    Email,
    Share,
}

impl ExportKind {
    /// Message shown to the user when the action fails.
    pub fn failure_message(&self, error: &ExportError) -> String {
        let action = match self {
            ExportKind::Pdf => "Failed to generate PDF",
            ExportKind::Image => "Failed to download image",
            ExportKind::Email => "Failed to send email",
            ExportKind::Share => "Could not share via other apps",
        };
        format!("{}: {}", action, error)
    }
}

impl fmt::Display for ExportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExportKind::Pdf => "pdf",
            ExportKind::Image => "image",
            ExportKind::Email => "email",
            ExportKind::Share => "share",
        };
        f.write_str(name)
    }
}

/// Runs one export action at a time.
///
/// The permit is the processing indicator: it is held for the duration of the
/// action and released on every exit path, including errors and panics.
#[derive(Clone)]
pub struct ExportExecutor {
    semaphore: Arc<Semaphore>,
}

impl Default for ExportExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportExecutor {
    pub fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn is_processing(&self) -> bool {
        self.semaphore.available_permits() == 0
    }

    #[instrument(skip(self, action))]
    pub async fn execute<T, F>(&self, kind: ExportKind, action: F) -> Result<T, ExportError>
    where
        F: Future<Output = Result<T, ExportError>>,
    {
        let _permit = self
            .semaphore
            .try_acquire()
            .map_err(|_| ExportError::Busy)?;

        info!("Starting export: {}", kind);
        let result = action.await;

        match &result {
            Ok(_) => info!("Finished export: {}", kind),
            Err(e) => warn!(error = %e, "{}", kind.failure_message(e)),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_second_action_is_busy() {
        let executor = ExportExecutor::new();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let running = {
            let executor = executor.clone();
            tokio::spawn(async move {
                executor
                    .execute(ExportKind::Pdf, async move {
                        let _ = release_rx.await;
                        Ok::<_, ExportError>(1)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(executor.is_processing());

        let busy = executor
            .execute(ExportKind::Image, async { Ok::<_, ExportError>(2) })
            .await;
        assert!(matches!(busy, Err(ExportError::Busy)));

        release_tx.send(()).unwrap();
        assert_eq!(running.await.unwrap().unwrap(), 1);
        assert!(!executor.is_processing());
    }

    #[tokio::test]
    async fn test_processing_cleared_after_failure() {
        let executor = ExportExecutor::new();
        let result = executor
            .execute(ExportKind::Email, async {
                Err::<(), _>(ExportError::EmptySurface)
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(
            ExportKind::Email.failure_message(&err),
            "Failed to send email: Report surface is empty"
        );
        assert!(!executor.is_processing());
    }
}
