//! Export actions: PDF, JPEG, email and share.

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{info, instrument, warn};

use super::paginate::page_strips;
use super::pdf::{build_pdf, encode_jpeg};
use super::traits::{
    EmailReport, ExportArtifact, ExportError, MailRelay, ReportSurface, ShareError, SharePayload,
    ShareOutcome, SharePlatform,
};
use crate::model::{ProductRecord, ScanRecord, Severity};

const FALLBACK_LABEL: &str = "report";

/// What a report is about.
#[derive(Debug, Clone)]
pub enum ReportSubject {
    Diagnosis(ScanRecord),
    Product(ProductRecord),
}

impl ReportSubject {
    /// Disease, pest or product name; `"report"` when none is known.
    pub fn label(&self) -> &str {
        let label = match self {
            ReportSubject::Diagnosis(record) => record
                .result_payload
                .subject_name()
                .unwrap_or(record.subject_name.as_str()),
            ReportSubject::Product(product) => product.product_name.as_str(),
        };
        if label.trim().is_empty() {
            FALLBACK_LABEL
        } else {
            label
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            ReportSubject::Diagnosis(record) => record.severity,
            ReportSubject::Product(product) if product.is_authentic => Severity::Healthy,
            ReportSubject::Product(_) => Severity::Invalid,
        }
    }

    pub fn treatments(&self) -> &[String] {
        match self {
            ReportSubject::Diagnosis(record) => &record.result_payload.treatments,
            ReportSubject::Product(_) => &[],
        }
    }

    /// Second header line: the risk level, or the provenance verdict.
    pub fn headline(&self) -> String {
        match self {
            ReportSubject::Diagnosis(_) => format!("RISK: {}", self.severity_upper()),
            ReportSubject::Product(product) if product.is_authentic => "VERIFIED AUTHENTIC".to_string(),
            ReportSubject::Product(_) => "NOT VERIFIED".to_string(),
        }
    }

    /// Body lines printed under the header.
    pub fn details(&self) -> Vec<String> {
        match self {
            ReportSubject::Diagnosis(record) => {
                let diagnosis = &record.result_payload;
                let mut lines = Vec::new();
                if let Some(pathogen) = diagnosis.pathogen.as_deref().filter(|p| !p.trim().is_empty()) {
                    lines.push(format!("Pathogen: {}", pathogen));
                }
                if let Some(count) = diagnosis.count {
                    lines.push(format!("Count: {}", count));
                }
                lines.push(format!("Confidence: {:.0}%", record.confidence * 100.0));
                lines.push(format!("Scanned: {}", record.captured_at.format("%Y-%m-%d %H:%M UTC")));
                lines
            }
            ReportSubject::Product(product) => vec![
                format!("Manufacturer: {}", product.manufacturer),
                format!("Batch: {}", product.batch_number),
                format!("Code: {}", product.qr_code_id),
            ],
        }
    }

    fn severity_upper(&self) -> String {
        self.severity().as_str().to_uppercase()
    }

    pub fn email_subject(&self) -> String {
        format!("Agri-Sentry Report: {}", self.label())
    }

    pub fn email_body(&self) -> String {
        format!("Diagnosis: {}\nSeverity: {}", self.label(), self.severity_upper())
    }

    /// Plain-text summary used by the share fallback.
    pub fn share_summary(&self) -> String {
        let treatment = self
            .treatments()
            .first()
            .map(String::as_str)
            .unwrap_or("See app for details");
        format!(
            "Agri-Sentry Alert: {}\nRisk: {}\nTreatment: {}\n\nOpen the app for full analysis.",
            self.label(),
            self.severity_upper(),
            treatment
        )
    }

    fn share_payload(&self, file: ExportArtifact) -> SharePayload {
        SharePayload {
            title: format!("Agri-Sentry: {}", self.label()),
            text: format!("Detected: {}\nRisk: {}", self.label(), self.severity_upper()),
            file,
        }
    }
}

/// `<brand>_<label>_<timestamp>.<ext>`
///
/// Whitespace runs in the label become a single `_`; the timestamp is
/// ISO-8601 (millisecond precision, UTC) with `:` and `.` replaced by `-`.
pub fn report_filename(brand: &str, label: &str, ext: &str, at: DateTime<Utc>) -> String {
    let mut safe_label = String::with_capacity(label.len());
    let mut in_whitespace = false;
    for c in label.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                safe_label.push('_');
            }
            in_whitespace = true;
        } else {
            safe_label.push(c);
            in_whitespace = false;
        }
    }

    let timestamp = at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("{}_{}_{}.{}", brand, safe_label, timestamp, ext)
}

/// `https://wa.me/?text=<urlencoded text>`
pub fn share_link(text: &str) -> String {
    format!("https://wa.me/?text={}", urlencoding::encode(text))
}

/// Renders report surfaces and turns them into export artifacts.
#[derive(Debug, Clone)]
pub struct ReportExporter {
    brand: String,
    scale: u32,
    jpeg_quality: u8,
    pdf_jpeg_quality: u8,
}

impl Default for ReportExporter {
    fn default() -> Self {
        Self::new("AgriSentry")
    }
}

impl ReportExporter {
    /// Default configuration:
    /// - Supersampling: 2x
    /// - JPEG quality: 92 for images, 95 for PDF pages
    pub fn new(brand: impl Into<String>) -> Self {
        Self {
            brand: brand.into(),
            scale: 2,
            jpeg_quality: 92,
            pdf_jpeg_quality: 95,
        }
    }

    pub fn with_scale(mut self, scale: u32) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_quality(mut self, jpeg_quality: u8, pdf_jpeg_quality: u8) -> Self {
        self.jpeg_quality = jpeg_quality;
        self.pdf_jpeg_quality = pdf_jpeg_quality;
        self
    }

    pub fn filename(&self, subject: &ReportSubject, ext: &str, at: DateTime<Utc>) -> String {
        report_filename(&self.brand, subject.label(), ext, at)
    }

    fn render(&self, surface: &dyn ReportSurface) -> Result<image::RgbaImage, ExportError> {
        let canvas = surface.rasterize(self.scale)?;
        if canvas.width() == 0 || canvas.height() == 0 {
            return Err(ExportError::EmptySurface);
        }
        Ok(canvas)
    }

    /// Multi-page A4 document.
    #[instrument(skip_all, fields(label = subject.label()))]
    pub fn export_pdf(
        &self,
        surface: &dyn ReportSurface,
        subject: &ReportSubject,
        at: DateTime<Utc>,
    ) -> Result<ExportArtifact, ExportError> {
        let start = std::time::Instant::now();
        let canvas = self.render(surface)?;
        let strips = page_strips(canvas.width(), canvas.height());
        let bytes = build_pdf(&canvas, &strips, self.pdf_jpeg_quality, subject.label())?;

        info!(
            pages = strips.len(),
            bytes = bytes.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "PDF generated"
        );
        Ok(ExportArtifact {
            filename: self.filename(subject, "pdf", at),
            mime: "application/pdf",
            bytes,
        })
    }

    /// Single JPEG of the whole report.
    #[instrument(skip_all, fields(label = subject.label()))]
    pub fn export_image(
        &self,
        surface: &dyn ReportSurface,
        subject: &ReportSubject,
        at: DateTime<Utc>,
    ) -> Result<ExportArtifact, ExportError> {
        let canvas = self.render(surface)?;
        let bytes = encode_jpeg(&canvas, self.jpeg_quality)?;

        info!(width = canvas.width(), height = canvas.height(), "Image generated");
        Ok(ExportArtifact {
            filename: self.filename(subject, "jpg", at),
            mime: "image/jpeg",
            bytes,
        })
    }

    /// Emails the PDF through the relay. A blank recipient is omitted.
    pub async fn email(
        &self,
        relay: &dyn MailRelay,
        surface: &dyn ReportSurface,
        subject: &ReportSubject,
        to: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), ExportError> {
        let attachment = self.export_pdf(surface, subject, at)?;
        let email = EmailReport {
            to: to.map(str::trim).filter(|t| !t.is_empty()).map(str::to_string),
            subject: subject.email_subject(),
            body: subject.email_body(),
            attachment,
        };

        relay.send(&email).await?;
        info!(to = ?email.to, "Report emailed");
        Ok(())
    }

    /// Native image share when supported, otherwise clipboard + messaging link.
    pub async fn share(
        &self,
        platform: &dyn SharePlatform,
        surface: &dyn ReportSurface,
        subject: &ReportSubject,
        at: DateTime<Utc>,
    ) -> Result<ShareOutcome, ExportError> {
        let image = self.export_image(surface, subject, at)?;

        if platform.can_share_files(image.mime) {
            return match platform.share_files(&subject.share_payload(image)).await {
                Ok(()) => Ok(ShareOutcome::Native),
                Err(ShareError::Cancelled) => Ok(ShareOutcome::Cancelled),
                Err(e) => Err(e.into()),
            };
        }

        let summary = subject.share_summary();
        let link = share_link(&summary);

        let copied_to_clipboard = match platform.write_clipboard(&summary).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Clipboard write failed");
                false
            }
        };
        let link_opened = match platform.open_link(&link).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to open share link");
                false
            }
        };

        Ok(ShareOutcome::Fallback {
            copied_to_clipboard,
            link_opened,
            link,
        })
    }
}
