//! Image encoding: PNG bytes for rendered units, base64 `ImageData` for VLMs.
//!
//! PNG is lossless; JPEG artefacts on rendered text confuse vision models.
//! `detail: "high"` lets GPT-4-class models tile the image instead of
//! squashing it into one 512 px overview.

use super::render::RenderedImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// PNG-encode a rasterised page or region.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Wrap a rendered image for a multimodal request body.
pub fn to_image_data(image: &RenderedImage) -> ImageData {
    let b64 = STANDARD.encode(&image.png);
    debug!(
        "Encoded {}x{} image → {} bytes base64",
        image.width,
        image.height,
        b64.len()
    );
    ImageData::new(b64, "image/png").with_detail("high")
}
