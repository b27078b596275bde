//! Slicing a tall canvas into A4 pages.

use image::imageops;
use image::RgbaImage;

pub const A4_WIDTH_MM: u32 = 210;
pub const A4_HEIGHT_MM: u32 = 297;

/// Horizontal slice of the canvas, in canvas pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageStrip {
    pub y: u32,
    pub height: u32,
}

/// Page height in pixels for a canvas `width` pixels wide:
/// `floor(297 * width / 210)`.
pub fn page_height_px(width: u32) -> u32 {
    ((width as u64 * A4_HEIGHT_MM as u64) / A4_WIDTH_MM as u64).max(1) as u32
}

/// Splits a `width` x `height` canvas into `ceil(height / page_height)`
/// strips, top to bottom. Only the last strip may be shorter.
pub fn page_strips(width: u32, height: u32) -> Vec<PageStrip> {
    if width == 0 || height == 0 {
        return Vec::new();
    }

    let page_height = page_height_px(width);
    let pages = height.div_ceil(page_height);

    (0..pages)
        .map(|page| {
            let y = page * page_height;
            PageStrip {
                y,
                height: page_height.min(height - y),
            }
        })
        .collect()
}

pub fn crop_strip(canvas: &RgbaImage, strip: PageStrip) -> RgbaImage {
    imageops::crop_imm(canvas, 0, strip.y, canvas.width(), strip.height).to_image()
}
