//! Print-ready PDF assembly.
//!
//! Pages reproduce the credential artwork at its reference size: a
//! 1448x1018 px badge at 96 DPI comes out as a 383.08x269.33 mm landscape
//! page, full bleed, one credential per page. JPEG artwork is embedded
//! as-is (DCTDecode) so a batch of photographic badges stays compact.

use image::codecs::jpeg::JpegEncoder;
use image::ImageFormat;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use std::io::Cursor;

// ── Page geometry ────────────────────────────────────────────────────────

/// Credential artwork reference size in pixels.
pub const REFERENCE_WIDTH_PX: u32 = 1448;
pub const REFERENCE_HEIGHT_PX: u32 = 1018;

/// DPI at which templates are authored.
pub const REFERENCE_DPI: f64 = 96.0;

/// Quality for JPEG re-encoding when an artifact arrives in another format.
pub const JPEG_QUALITY: u8 = 90;

const MM_PER_INCH: f64 = 25.4;
const PT_PER_INCH: f64 = 72.0;

/// Physical page size in millimetres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSizeMm {
    pub width: f64,
    pub height: f64,
}

pub fn px_to_mm(px: u32, dpi: f64) -> f64 {
    f64::from(px) * MM_PER_INCH / dpi
}

pub fn mm_to_pt(mm: f64) -> f64 {
    mm / MM_PER_INCH * PT_PER_INCH
}

/// Page size for artwork of the given pixel dimensions.
pub fn page_size_for(width_px: u32, height_px: u32, dpi: f64) -> PageSizeMm {
    PageSizeMm {
        width: px_to_mm(width_px, dpi),
        height: px_to_mm(height_px, dpi),
    }
}

/// The standard landscape credential page.
pub fn credential_page_size() -> PageSizeMm {
    page_size_for(REFERENCE_WIDTH_PX, REFERENCE_HEIGHT_PX, REFERENCE_DPI)
}

/// Scale an image to the full page width, preserving aspect ratio.
/// Returns (width_pt, height_pt).
pub fn fitted_image_size(page_width_pt: f64, width_px: u32, height_px: u32) -> (f64, f64) {
    let height = page_width_pt * f64::from(height_px) / f64::from(width_px);
    (page_width_pt, height)
}

// ── Format normalization ─────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    #[error("PDF assembly failed: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pass JPEG bytes through untouched; re-encode anything else (PNG, WebP)
/// to JPEG. Returns the bytes plus pixel dimensions.
pub fn normalize_jpeg(bytes: &[u8]) -> Result<(Vec<u8>, u32, u32), PdfError> {
    if image::guess_format(bytes)? == ImageFormat::Jpeg {
        let (width, height) = image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()?
            .into_dimensions()?;
        return Ok((bytes.to_vec(), width, height));
    }

    let rgb = image::load_from_memory(bytes)?.into_rgb8();
    let (width, height) = rgb.dimensions();
    let mut out = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY))?;
    Ok((out, width, height))
}

// ── Document builder ─────────────────────────────────────────────────────

/// Incremental PDF builder: one JPEG per page, fixed page size, images
/// anchored to the top-left corner at full page width.
pub struct PdfBuilder {
    doc: Document,
    pages_id: ObjectId,
    page_ids: Vec<ObjectId>,
    page_width_pt: f64,
    page_height_pt: f64,
}

impl PdfBuilder {
    pub fn new(page: PageSizeMm) -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            page_ids: Vec::new(),
            page_width_pt: mm_to_pt(page.width),
            page_height_pt: mm_to_pt(page.height),
        }
    }

    pub fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    /// Append a page holding one JPEG. The stream carries the JPEG bytes
    /// verbatim under DCTDecode; nothing is recompressed.
    pub fn add_jpeg_page(
        &mut self,
        jpeg: &[u8],
        width_px: u32,
        height_px: u32,
    ) -> Result<(), PdfError> {
        let image_stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => Object::Integer(i64::from(width_px)),
                "Height" => Object::Integer(i64::from(height_px)),
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => Object::Integer(8),
                "Filter" => "DCTDecode",
            },
            jpeg.to_vec(),
        )
        .with_compression(false);
        let image_id = self.doc.add_object(image_stream);

        let (img_w_pt, img_h_pt) =
            fitted_image_size(self.page_width_pt, width_px, height_px);
        let top_y = self.page_height_pt - img_h_pt;

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        Object::Real(img_w_pt as f32),
                        Object::Real(0.0),
                        Object::Real(0.0),
                        Object::Real(img_h_pt as f32),
                        Object::Real(0.0),
                        Object::Real(top_y as f32),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = self
            .doc
            .add_object(Stream::new(dictionary! {}, content.encode()?));

        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
            "MediaBox" => vec![
                Object::Real(0.0),
                Object::Real(0.0),
                Object::Real(self.page_width_pt as f32),
                Object::Real(self.page_height_pt as f32),
            ],
        });
        self.page_ids.push(page_id);
        Ok(())
    }

    /// Close the document and serialize it. Content streams are
    /// flate-compressed; image streams stay DCT.
    pub fn finish(mut self, title: &str) -> Result<Vec<u8>, PdfError> {
        let kids: Vec<Object> = self.page_ids.iter().map(|&id| id.into()).collect();
        let count = self.page_ids.len() as i64;
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => Object::Integer(count),
            }),
        );

        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);

        let info_id = self.doc.add_object(dictionary! {
            "Title" => Object::string_literal(title),
            "Producer" => Object::string_literal("credential-pipeline"),
        });
        self.doc.trailer.set("Info", info_id);

        self.doc.compress();
        let mut bytes = Vec::new();
        self.doc.save_to(&mut bytes)?;
        Ok(bytes)
    }
}

/// One-page PDF for a single credential, page sized from the artwork's own
/// pixel dimensions at the reference DPI.
pub fn single_credential_pdf(
    jpeg: &[u8],
    width_px: u32,
    height_px: u32,
    title: &str,
) -> Result<Vec<u8>, PdfError> {
    let mut builder = PdfBuilder::new(page_size_for(width_px, height_px, REFERENCE_DPI));
    builder.add_jpeg_page(jpeg, width_px, height_px)?;
    builder.finish(title)
}
