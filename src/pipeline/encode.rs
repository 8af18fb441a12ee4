//! Image encoding: `DynamicImage` → PNG bytes wrapped in [`PageImage`].
//!
//! PNG is lossless; JPEG artefacts around glyph edges measurably hurt OCR
//! accuracy, and the Read API accepts PNG up to 50 MB.

use crate::output::ImageInfo;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// One rasterised page, immutable once produced.
///
/// The page index travels with the image, so images may be processed in any
/// order and reassembled later.
#[derive(Debug, Clone, PartialEq)]
pub struct PageImage {
    /// 0-based page index in document order.
    pub index: usize,
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Scale factor the page was rendered at.
    pub scale: f32,
}

impl PageImage {
    /// PNG-encode a rendered page.
    pub fn encode(index: usize, img: &DynamicImage, scale: f32) -> Result<Self, image::ImageError> {
        let mut png = Vec::new();
        img.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)?;
        debug!(
            "Encoded page {} → {}x{} px, {} bytes PNG",
            index,
            img.width(),
            img.height(),
            png.len()
        );
        Ok(Self {
            index,
            png,
            width: img.width(),
            height: img.height(),
            scale,
        })
    }

    /// `data:image/png;base64,…` form used by the upload endpoint.
    pub fn to_data_uri(&self) -> String {
        format!("data:image/png;base64,{}", STANDARD.encode(&self.png))
    }

    pub fn info(&self, image_id: impl Into<String>) -> ImageInfo {
        ImageInfo {
            image_id: image_id.into(),
            width: self.width,
            height: self.height,
            scale: self.scale,
            png_bytes: self.png.len(),
        }
    }
}
