pub mod auth;
pub mod client;
pub mod config;
pub mod diagnosis;
pub mod executor;
pub mod history;
pub mod label;
pub mod ledger;
pub mod media;
pub mod model;
pub mod report;
pub mod scan;
pub mod session;
pub mod traits;

// Re-export common types for convenience
pub use auth::AuthClient;
pub use client::ApiClient;
pub use config::{Config, ConfigError};
pub use diagnosis::DiagnosisClient;
pub use executor::*;
pub use history::{HistoryClient, HistoryRecorder, HistoryView, ScanSaved};
pub use label::LabelClient;
pub use model::*;
pub use session::{SessionContext, SessionError};
pub use traits::*;
