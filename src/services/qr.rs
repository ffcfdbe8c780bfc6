use image::Luma;
use qrcode::{EcLevel, QrCode};
use std::io::Cursor;
use uuid::Uuid;

/// Rendered QR side length. Badge layouts downscale as needed; scanners
/// want the source comfortably above the printed size.
pub const QR_IMAGE_PX: u32 = 512;

#[derive(Debug, thiserror::Error)]
pub enum QrCodeError {
    #[error("QR encoding failed: {0}")]
    Encode(#[from] qrcode::types::QrError),

    #[error("PNG encoding failed: {0}")]
    Png(#[from] image::ImageError),
}

/// Mint a globally unique QR payload for a credential.
pub fn new_payload() -> String {
    format!("CRD-{}", Uuid::new_v4().as_simple())
}

/// Render a payload as a PNG at [`QR_IMAGE_PX`] with a quiet zone.
/// Error correction level M survives lamination scuffs without inflating
/// the module count.
pub fn render_png(payload: &str) -> Result<Vec<u8>, QrCodeError> {
    let code = QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::M)?;
    let rendered = code
        .render::<Luma<u8>>()
        .min_dimensions(QR_IMAGE_PX, QR_IMAGE_PX)
        .quiet_zone(true)
        .build();

    let mut bytes = Vec::new();
    image::DynamicImage::ImageLuma8(rendered)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
    Ok(bytes)
}
