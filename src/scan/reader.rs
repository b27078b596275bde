//! Optical code reader.
//!
//! Feeds the pixel buffer straight into the `rqrr` detector (luma only, no
//! thresholding or inversion of our own) and returns the first grid that
//! decodes.

use image::RgbaImage;
use thiserror::Error;

use crate::media;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("No QR code found in image")]
    NoCodeFound,

    #[error("Invalid image: {0}")]
    InvalidImage(String),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QrReader;

impl QrReader {
    pub fn new() -> Self {
        Self
    }

    /// One continuous-mode attempt. `None` means keep sampling.
    ///
    /// Takes the frame by shared reference; the buffer is never modified.
    pub fn scan_frame(&self, frame: &RgbaImage) -> Option<String> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return None;
        }

        let mut prepared =
            rqrr::PreparedImage::prepare_from_greyscale(width as usize, height as usize, |x, y| {
                luma_over_white(frame.get_pixel(x as u32, y as u32).0)
            });

        prepared
            .detect_grids()
            .into_iter()
            .filter_map(|grid| grid.decode().ok())
            .map(|(_, content)| content)
            .find(|content| !content.is_empty())
    }

    /// Single-shot decode of an already loaded frame.
    pub fn decode_frame(&self, frame: &RgbaImage) -> Result<String, DecodeError> {
        self.scan_frame(frame).ok_or(DecodeError::NoCodeFound)
    }

    /// Single-shot decode of encoded image bytes (PNG, JPEG).
    pub fn decode_image(&self, bytes: &[u8]) -> Result<String, DecodeError> {
        let frame = image::load_from_memory(bytes)
            .map_err(|e| DecodeError::InvalidImage(e.to_string()))?
            .to_rgba8();
        self.decode_frame(&frame)
    }

    /// Single-shot decode of a `data:` URI or raw encoded bytes.
    pub fn decode_upload(&self, upload: &[u8]) -> Result<String, DecodeError> {
        match std::str::from_utf8(upload).ok().filter(|s| s.starts_with("data:")) {
            Some(uri) => {
                let (_, bytes) = media::decode_data_uri(uri.trim())
                    .map_err(|e| DecodeError::InvalidImage(e.to_string()))?;
                self.decode_image(&bytes)
            }
            None => self.decode_image(upload),
        }
    }
}

// Transparent pixels read as paper, not as ink
fn luma_over_white([r, g, b, a]: [u8; 4]) -> u8 {
    let luma = (299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000;
    let alpha = a as u32;
    ((luma * alpha + 255 * (255 - alpha)) / 255) as u8
}
