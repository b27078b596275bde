//! Core traits and types for report export.
//!
//! - Rasterization via [`ReportSurface`]
//! - Delivery via [`MailRelay`] and [`SharePlatform`]
//! - Standardized error handling via [`ExportError`]

use async_trait::async_trait;
use image::RgbaImage;
use serde::Serialize;
use thiserror::Error;

use crate::traits::ServiceError;

// ============================================================================
// Surface Trait
// ============================================================================

/// Anything that can draw the report region into a pixel buffer.
///
/// `scale` is the supersampling factor: a surface laid out `W` units wide
/// produces a canvas `W * scale` pixels wide. The surface is rendered once per
/// export; pagination slices the result.
pub trait ReportSurface: Send + Sync {
    /// Renders the full report region.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::EmptySurface`] when there is nothing to draw.
    fn rasterize(&self, scale: u32) -> Result<RgbaImage, ExportError>;
}

// ============================================================================
// Delivery Traits
// ============================================================================

/// A file produced by an export action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportArtifact {
    pub filename: String,
    pub mime: &'static str,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

/// Email request for the mail relay.
#[derive(Debug, Clone)]
pub struct EmailReport {
    /// `None` lets the relay substitute its default recipient
    pub to: Option<String>,
    pub subject: String,
    pub body: String,
    pub attachment: ExportArtifact,
}

/// Server-side mail relay that emails a report with its attachment.
#[async_trait]
pub trait MailRelay: Send + Sync {
    async fn send(&self, email: &EmailReport) -> Result<(), ServiceError>;
}

/// Payload for native file sharing.
#[derive(Debug, Clone)]
pub struct SharePayload {
    pub title: String,
    pub text: String,
    pub file: ExportArtifact,
}

/// Errors reported by a share platform.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShareError {
    #[error("Not supported on this platform")]
    Unsupported,

    /// The user dismissed the share sheet
    #[error("Share was cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

/// Host capabilities used by the share action.
///
/// # Fallback
///
/// When [`SharePlatform::can_share_files`] is `false`, the exporter writes a
/// plain-text summary to the clipboard and opens a pre-filled messaging link.
/// The two calls are independent: a clipboard failure never prevents the link
/// from being opened.
#[async_trait]
pub trait SharePlatform: Send + Sync {
    /// Whether native sharing accepts files of `mime`.
    fn can_share_files(&self, mime: &str) -> bool;

    async fn share_files(&self, payload: &SharePayload) -> Result<(), ShareError>;

    async fn write_clipboard(&self, text: &str) -> Result<(), ShareError>;

    async fn open_link(&self, url: &str) -> Result<(), ShareError>;
}

/// What the share action ended up doing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "via", rename_all = "snake_case")]
pub enum ShareOutcome {
    /// Handed the image to the native share sheet
    Native,
    /// User dismissed the native share sheet
    Cancelled,
    /// Text fallback; each flag records whether that step succeeded
    Fallback {
        copied_to_clipboard: bool,
        link_opened: bool,
        link: String,
    },
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while exporting a report.
#[derive(Error, Debug)]
pub enum ExportError {
    /// Another export action is still processing
    #[error("Another export is already in progress")]
    Busy,

    /// Report region has no content or zero size
    #[error("Report surface is empty")]
    EmptySurface,

    /// Rasterization failed
    #[error("Render failed: {0}")]
    Render(String),

    /// JPEG/PNG encoding or decoding failed
    #[error("Image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    /// Document assembly failed
    #[error("PDF generation failed: {0}")]
    Pdf(#[from] lopdf::Error),

    /// Mail relay rejected the request or was unreachable
    #[error("Email failed: {0}")]
    Mail(#[from] ServiceError),

    /// Native share failed
    #[error("Share failed: {0}")]
    Share(#[from] ShareError),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
