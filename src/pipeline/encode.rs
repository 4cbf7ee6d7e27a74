//! Image encoding: `DynamicImage` → base64 payload for the model request.
//!
//! The router endpoint takes images as `data:` URLs inside the JSON body;
//! edgequake-llm providers take an [`ImageData`]. Both are built from the same
//! [`EncodedImage`], so a page is compressed exactly once.

use crate::config::ImageEncoding;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// A page image serialised for transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// 1-indexed page number this image came from.
    pub page_num: usize,
    pub mime_type: &'static str,
    /// Standard base64, no line breaks.
    pub base64: String,
}

impl EncodedImage {
    /// `data:<mime>;base64,<payload>` for OpenAI-style `image_url` parts.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }

    /// Wrap for an edgequake-llm vision message.
    ///
    /// `detail: "high"` keeps small handwriting legible on tiling models.
    pub fn to_image_data(&self) -> ImageData {
        ImageData::new(self.base64.clone(), self.mime_type).with_detail("high")
    }
}

/// Encode a normalised page with the configured wire format.
pub fn encode_page(
    page_num: usize,
    img: &DynamicImage,
    encoding: ImageEncoding,
) -> Result<EncodedImage, image::ImageError> {
    let mut buf = Vec::new();
    match encoding {
        ImageEncoding::Png => {
            img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
        }
        ImageEncoding::Jpeg { quality } => {
            // JPEG has no alpha channel; normalised pages are RGB8 already.
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;
        }
    }

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded page {} → {} bytes base64", page_num, b64.len());

    Ok(EncodedImage {
        page_num,
        mime_type: encoding.mime_type(),
        base64: b64,
    })
}
