//! Signed-in user context, persisted as a small JSON file.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::model::CurrentUser;
use crate::traits::AuthSession;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt session file: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Current session; `None` when signed out.
#[derive(Debug)]
pub struct SessionContext {
    path: PathBuf,
    current: Option<AuthSession>,
}

impl SessionContext {
    /// Loads the session stored at `path`. A missing file means signed out.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let mut context = Self {
            path: path.into(),
            current: None,
        };
        context.refresh()?;
        Ok(context)
    }

    /// Re-reads the file, picking up sign-ins from other processes.
    pub fn refresh(&mut self) -> Result<(), SessionError> {
        self.current = match std::fs::read(&self.path) {
            Ok(bytes) => Some(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        debug!(path = %self.path.display(), signed_in = self.current.is_some(), "Session loaded");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session(&self) -> Option<&AuthSession> {
        self.current.as_ref()
    }

    pub fn user(&self) -> Option<&CurrentUser> {
        self.current.as_ref().map(|session| &session.user)
    }

    pub fn store(&mut self, session: AuthSession) -> Result<(), SessionError> {
        let json = serde_json::to_vec_pretty(&session)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;
        info!(user_id = %session.user.id, "Session stored");
        self.current = Some(session);
        Ok(())
    }

    pub fn clear(&mut self) -> Result<(), SessionError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.current = None;
        info!("Session cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;

    fn session() -> AuthSession {
        AuthSession {
            token: "jwt".into(),
            user: CurrentUser {
                id: "u1".into(),
                name: "Asha".into(),
                email: Some("asha@example.com".into()),
                phone: None,
                role: Role::Farmer,
            },
        }
    }

    #[test]
    fn test_store_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        let mut context = SessionContext::load(&path).unwrap();
        assert!(context.user().is_none());

        context.store(session()).unwrap();
        let reloaded = SessionContext::load(&path).unwrap();
        assert_eq!(reloaded.user().map(|u| u.name.as_str()), Some("Asha"));

        context.clear().unwrap();
        context.clear().unwrap();
        assert!(SessionContext::load(&path).unwrap().session().is_none());
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(SessionContext::load(&path), Err(SessionError::Corrupt(_))));
    }
}
