//! Report module - rendering, pagination and multi-channel export.
//!
//! - **Traits**: [`ReportSurface`], [`MailRelay`], [`SharePlatform`] and [`ExportError`]
//! - **Render**: [`ReportLayout`], the raster report for a diagnosis or product
//! - **Paginate**: A4 strip slicing in [`paginate`]
//! - **PDF**: page assembly in [`pdf`]
//! - **Export**: [`ReportExporter`] producing PDF, JPEG, email and share actions

pub mod export;
pub mod mail;
pub mod paginate;
pub mod pdf;
pub mod render;
pub mod traits;

pub use export::{report_filename, share_link, ReportExporter, ReportSubject};
pub use mail::HttpMailRelay;
pub use paginate::{page_height_px, page_strips, PageStrip};
pub use render::ReportLayout;
pub use traits::{
    EmailReport, ExportArtifact, ExportError, MailRelay, ReportSurface, ShareError, ShareOutcome,
    SharePayload, SharePlatform,
};
