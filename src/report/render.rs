//! Raster layout of a report.
//!
//! The layout is laid out in abstract units (`REPORT_WIDTH` wide) and scaled
//! by the supersampling factor at render time:
//!
//! ```text
//! ┌───────────────────────────┐
//! │ header band (severity)    │
//! │   label, headline         │
//! ├───────────────────────────┤
//! │ detail lines              │
//! │ captured image, scaled to │
//! │ the report width          │
//! ├───────────────────────────┤
//! │ ▌treatment 1              │
//! │ ▌treatment 2              │
//! └───────────────────────────┘
//! ```

use font8x8::{UnicodeFonts, BASIC_FONTS, LATIN_FONTS};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

use super::export::ReportSubject;
use super::traits::{ExportError, ReportSurface};
use crate::model::Severity;

pub const REPORT_WIDTH: u32 = 600;
const PADDING: u32 = 24;
const BAND_PADDING: u32 = 14;
const BAND_GAP: u32 = 8;
const ACCENT_WIDTH: u32 = 6;

// Glyphs are 8x8 bitmaps magnified by a whole number of layout units
const GLYPH: u32 = 8;
const TITLE_SIZE: u32 = 3;
const TEXT_SIZE: u32 = 2;
const LINE_GAP: u32 = 4;

const TEXT_WIDTH: u32 = REPORT_WIDTH - 2 * PADDING;
const BAND_TEXT_X: u32 = PADDING + ACCENT_WIDTH + BAND_PADDING;
const BAND_TEXT_WIDTH: u32 = REPORT_WIDTH - PADDING - BAND_TEXT_X - BAND_PADDING;

// ~1 GiB of RGBA
const MAX_CANVAS_PIXELS: u64 = 1 << 28;

const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);
const BAND_FILL: Rgba<u8> = Rgba([241, 245, 249, 255]);
const HEADER_TEXT: Rgba<u8> = Rgba([255, 255, 255, 255]);
const BODY_TEXT: Rgba<u8> = Rgba([31, 41, 55, 255]);

pub fn severity_color(severity: Severity) -> Rgba<u8> {
    match severity {
        Severity::Healthy => Rgba([22, 163, 74, 255]),
        Severity::Low => Rgba([234, 179, 8, 255]),
        Severity::Medium => Rgba([249, 115, 22, 255]),
        Severity::High => Rgba([220, 38, 38, 255]),
        Severity::Invalid => Rgba([107, 114, 128, 255]),
    }
}

fn line_height(size: u32) -> u32 {
    GLYPH * size + LINE_GAP
}

fn columns(size: u32, width: u32) -> usize {
    (width / (GLYPH * size)) as usize
}

/// Greedy word wrap to at most `columns` characters per line. Words longer
/// than a line are split.
fn wrap(text: &str, columns: usize) -> Vec<String> {
    let columns = columns.max(1);
    let mut lines = Vec::new();
    let mut line = String::new();
    let mut line_len = 0;

    for word in text.split_whitespace() {
        let mut chars: Vec<char> = word.chars().collect();
        while chars.len() > columns {
            if line_len > 0 {
                lines.push(std::mem::take(&mut line));
                line_len = 0;
            }
            lines.push(chars.drain(..columns).collect());
        }
        if chars.is_empty() {
            continue;
        }
        if line_len > 0 && line_len + 1 + chars.len() > columns {
            lines.push(std::mem::take(&mut line));
            line_len = 0;
        }
        if line_len > 0 {
            line.push(' ');
            line_len += 1;
        }
        line_len += chars.len();
        line.extend(chars);
    }
    if line_len > 0 {
        lines.push(line);
    }
    lines
}

/// Report built from a diagnosis or a verified product.
#[derive(Debug, Clone)]
pub struct ReportLayout {
    severity: Severity,
    title: Vec<String>,
    subtitle: String,
    details: Vec<String>,
    image: Option<RgbaImage>,
    treatments: Vec<Vec<String>>,
}

impl ReportLayout {
    pub fn new(severity: Severity) -> Self {
        Self {
            severity,
            title: Vec::new(),
            subtitle: severity.as_str().to_uppercase(),
            details: Vec::new(),
            image: None,
            treatments: Vec::new(),
        }
    }

    /// Header, detail lines and treatment bands filled in from `subject`.
    pub fn for_subject(subject: &ReportSubject) -> Self {
        Self::new(subject.severity())
            .with_heading(subject.label(), &subject.headline())
            .with_details(subject.details())
            .with_treatments(subject.treatments())
    }

    pub fn with_heading(mut self, title: &str, subtitle: &str) -> Self {
        self.title = wrap(title, columns(TITLE_SIZE, TEXT_WIDTH));
        self.subtitle = subtitle.to_string();
        self
    }

    pub fn with_details<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let columns = columns(TEXT_SIZE, TEXT_WIDTH);
        self.details = lines
            .into_iter()
            .flat_map(|line| wrap(line.as_ref(), columns))
            .collect();
        self
    }

    pub fn with_image(mut self, image: RgbaImage) -> Self {
        self.image = Some(image).filter(|img| img.width() > 0 && img.height() > 0);
        self
    }

    /// One band per treatment; long text wraps inside its band.
    pub fn with_treatments<I, S>(mut self, treatments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let columns = columns(TEXT_SIZE, BAND_TEXT_WIDTH);
        self.treatments = treatments
            .into_iter()
            .map(|text| wrap(text.as_ref(), columns))
            .collect();
        self
    }

    pub fn header_height(&self) -> u32 {
        let title = (self.title.len() as u32).saturating_mul(line_height(TITLE_SIZE));
        let subtitle = if self.subtitle.is_empty() { 0 } else { line_height(TEXT_SIZE) };
        (2 * PADDING).saturating_add(title).saturating_add(subtitle)
    }

    fn details_height(&self) -> u32 {
        if self.details.is_empty() {
            return 0;
        }
        (self.details.len() as u32)
            .saturating_mul(line_height(TEXT_SIZE))
            .saturating_add(PADDING)
    }

    fn band_height(lines: &[String]) -> u32 {
        (lines.len().max(1) as u32)
            .saturating_mul(line_height(TEXT_SIZE))
            .saturating_add(2 * BAND_PADDING)
    }

    /// Height in layout units before scaling.
    pub fn height(&self) -> u32 {
        let image = self
            .image
            .as_ref()
            .map(|img| scaled_height(img, REPORT_WIDTH) + PADDING)
            .unwrap_or(0);
        let bands = self
            .treatments
            .iter()
            .fold(0u32, |acc, lines| acc.saturating_add(Self::band_height(lines) + BAND_GAP));
        [PADDING, self.details_height(), image, bands, PADDING]
            .into_iter()
            .fold(self.header_height(), u32::saturating_add)
    }
}

fn scaled_height(image: &RgbaImage, width: u32) -> u32 {
    let (w, h) = image.dimensions();
    ((h as u64 * width as u64) / w.max(1) as u64).clamp(1, u32::MAX as u64) as u32
}

impl ReportSurface for ReportLayout {
    fn rasterize(&self, scale: u32) -> Result<RgbaImage, ExportError> {
        if scale == 0 {
            return Err(ExportError::Render("scale must be at least 1".to_string()));
        }

        let too_large = || ExportError::Render(format!("report too large at scale {}", scale));
        let width = REPORT_WIDTH.checked_mul(scale).ok_or_else(too_large)?;
        let height = self.height().checked_mul(scale).ok_or_else(too_large)?;
        if width as u64 * height as u64 > MAX_CANVAS_PIXELS {
            return Err(too_large());
        }

        let mut canvas = RgbaImage::from_pixel(width, height, BACKGROUND);
        let accent = severity_color(self.severity);

        fill(&mut canvas, 0, 0, width, self.header_height() * scale, accent);
        let mut y = PADDING * scale;
        for line in &self.title {
            draw_text(&mut canvas, line, PADDING * scale, y, TITLE_SIZE * scale, HEADER_TEXT);
            y += line_height(TITLE_SIZE) * scale;
        }
        if !self.subtitle.is_empty() {
            draw_text(&mut canvas, &self.subtitle, PADDING * scale, y, TEXT_SIZE * scale, HEADER_TEXT);
        }
        y = (self.header_height() + PADDING) * scale;

        if !self.details.is_empty() {
            for line in &self.details {
                draw_text(&mut canvas, line, PADDING * scale, y, TEXT_SIZE * scale, BODY_TEXT);
                y += line_height(TEXT_SIZE) * scale;
            }
            y += PADDING * scale;
        }

        if let Some(image) = &self.image {
            let image_height = scaled_height(image, width);
            let resized = imageops::resize(image, width, image_height, FilterType::Triangle);
            imageops::overlay(&mut canvas, &resized, 0, y as i64);
            y += image_height + PADDING * scale;
        }

        for lines in &self.treatments {
            let band = Self::band_height(lines) * scale;
            let inset = PADDING * scale;
            fill(&mut canvas, inset, y, width - 2 * inset, band, BAND_FILL);
            fill(&mut canvas, inset, y, ACCENT_WIDTH * scale, band, accent);

            let mut text_y = y + (BAND_PADDING + LINE_GAP / 2) * scale;
            for line in lines {
                draw_text(&mut canvas, line, BAND_TEXT_X * scale, text_y, TEXT_SIZE * scale, BODY_TEXT);
                text_y += line_height(TEXT_SIZE) * scale;
            }
            y += band + BAND_GAP * scale;
        }

        Ok(canvas)
    }
}

/// Draws `text` with its top-left corner at (`x`, `y`), each glyph pixel
/// `pixel` canvas pixels wide. Characters without a glyph render as `?`.
fn draw_text(canvas: &mut RgbaImage, text: &str, x: u32, y: u32, pixel: u32, color: Rgba<u8>) {
    let mut cx = x;
    for c in text.chars() {
        let glyph = BASIC_FONTS
            .get(c)
            .or_else(|| LATIN_FONTS.get(c))
            .or_else(|| BASIC_FONTS.get('?'));
        if let Some(rows) = glyph {
            for (row, bits) in (0u32..).zip(rows) {
                for col in (0..GLYPH).filter(|col| bits & (1 << col) != 0) {
                    fill(canvas, cx + col * pixel, y + row * pixel, pixel, pixel, color);
                }
            }
        }
        cx = cx.saturating_add(GLYPH * pixel);
    }
}

fn fill(canvas: &mut RgbaImage, x: u32, y: u32, width: u32, height: u32, color: Rgba<u8>) {
    let x_end = x.saturating_add(width).min(canvas.width());
    let y_end = y.saturating_add(height).min(canvas.height());
    for py in y..y_end {
        for px in x..x_end {
            canvas.put_pixel(px, py, color);
        }
    }
}
