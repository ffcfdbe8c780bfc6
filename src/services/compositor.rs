//! Credential image compositing.
//!
//! The template artwork is the canvas; the employee photo and QR code are
//! resized exactly into their layout rectangles and overlaid, then the text
//! blocks are drawn with their configured font, size and alignment. Output
//! is a JPEG at the pipeline's standard quality.
//!
//! Everything here is synchronous CPU work; callers run it under
//! `spawn_blocking`.

use ab_glyph::{FontVec, PxScale};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{imageops, DynamicImage, Rgba, RgbaImage};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::models::{
    EmployeeSnapshot, EventSnapshot, LayoutMeta, RectPx, TextAlign, TextBlock, ZonesSnapshot,
};
use crate::services::pdf::JPEG_QUALITY;

const TEXT_COLOR: Rgba<u8> = Rgba([0, 0, 0, 255]);

#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("font {0} not found in font directory")]
    FontNotFound(String),

    #[error("font {name} is not a usable TTF/OTF: {reason}")]
    FontInvalid { name: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fonts loaded by name from a configured directory, `.ttf` preferred over
/// `.otf`, parsed once and shared.
pub struct FontCache {
    dir: PathBuf,
    loaded: Mutex<HashMap<String, Arc<FontVec>>>,
}

impl FontCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<FontVec>, ComposeError> {
        if let Some(font) = self.loaded.lock().expect("lock poisoned").get(name) {
            return Ok(font.clone());
        }

        let bytes = ["ttf", "otf"]
            .iter()
            .map(|ext| self.dir.join(format!("{name}.{ext}")))
            .find(|p| p.is_file())
            .map(std::fs::read)
            .transpose()?
            .ok_or_else(|| ComposeError::FontNotFound(name.to_string()))?;

        let font = Arc::new(FontVec::try_from_vec(bytes).map_err(|e| {
            ComposeError::FontInvalid {
                name: name.to_string(),
                reason: e.to_string(),
            }
        })?);
        self.loaded
            .lock()
            .expect("lock poisoned")
            .insert(name.to_string(), font.clone());
        Ok(font)
    }
}

/// Owned inputs for one compositing run, so the whole job can move onto a
/// blocking thread.
pub struct ComposeJob {
    pub template_image: Vec<u8>,
    pub photo: Option<Vec<u8>>,
    pub qr_image: Vec<u8>,
    pub layout: LayoutMeta,
    pub employee: EmployeeSnapshot,
    pub event: EventSnapshot,
    pub zones: ZonesSnapshot,
}

pub struct Compositor {
    fonts: FontCache,
}

impl Compositor {
    pub fn new(font_dir: impl Into<PathBuf>) -> Self {
        Self {
            fonts: FontCache::new(font_dir),
        }
    }

    /// Render the personalized credential as JPEG bytes.
    pub fn compose(&self, job: &ComposeJob) -> Result<Vec<u8>, ComposeError> {
        let mut canvas = image::load_from_memory(&job.template_image)?.into_rgba8();

        if let (Some(photo), Some(rect)) = (&job.photo, job.layout.photo) {
            let photo = image::load_from_memory(photo)?;
            overlay_into_rect(&mut canvas, &photo, rect);
        }

        let qr = image::load_from_memory(&job.qr_image)?;
        overlay_into_rect(&mut canvas, &qr, job.layout.qr);

        for block in &job.layout.text_blocks {
            let Some(text) = resolve_block(block, &job.employee, &job.event, &job.zones) else {
                tracing::warn!(block_id = %block.id, "unknown text block id, skipping");
                continue;
            };
            self.draw_block(&mut canvas, block, &text)?;
        }

        let rgb = DynamicImage::ImageRgba8(canvas).into_rgb8();
        let mut jpeg = Vec::new();
        rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY))?;
        Ok(jpeg)
    }

    fn draw_block(
        &self,
        canvas: &mut RgbaImage,
        block: &TextBlock,
        text: &str,
    ) -> Result<(), ComposeError> {
        let font = self.fonts.get(&block.font)?;
        let scale = PxScale::from(block.font_size);
        let (text_w, _) = imageproc::drawing::text_size(scale, font.as_ref(), text);
        let x = anchored_x(block.align, block.x, text_w);
        imageproc::drawing::draw_text_mut(
            canvas,
            TEXT_COLOR,
            x,
            block.y as i32,
            scale,
            font.as_ref(),
            text,
        );
        Ok(())
    }
}

/// Resize into the rect exactly and overlay at its corner.
fn overlay_into_rect(canvas: &mut RgbaImage, source: &DynamicImage, rect: RectPx) {
    let resized = source.resize_exact(rect.width, rect.height, FilterType::Lanczos3);
    imageops::overlay(canvas, &resized, i64::from(rect.x), i64::from(rect.y));
}

/// Horizontal anchor for a text block: left anchors at `x`, center and
/// right shift back by the measured width.
pub fn anchored_x(align: TextAlign, x: u32, text_width: u32) -> i32 {
    let x = x as i64;
    let w = i64::from(text_width);
    let anchored = match align {
        TextAlign::Left => x,
        TextAlign::Center => x - w / 2,
        TextAlign::Right => x - w,
    };
    anchored.max(0) as i32
}

/// Block ids bind to snapshot fields; `None` means the id is unknown.
fn resolve_block(
    block: &TextBlock,
    employee: &EmployeeSnapshot,
    event: &EventSnapshot,
    zones: &ZonesSnapshot,
) -> Option<String> {
    match block.id.as_str() {
        "employee_name" => Some(employee.full_name.clone()),
        "document_number" => Some(employee.document_number.clone()),
        "job_title" => Some(employee.job_title.clone()),
        "provider_name" => Some(employee.provider_name.clone()),
        "event_name" => Some(event.name.clone()),
        "zones" => Some(zones.codes_line()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    fn job_without_text() -> ComposeJob {
        let now = Utc::now();
        ComposeJob {
            template_image: png_bytes(400, 280, [240, 240, 240]),
            photo: Some(png_bytes(90, 120, [60, 120, 60])),
            qr_image: png_bytes(64, 64, [0, 0, 0]),
            layout: LayoutMeta {
                fold_x_px: None,
                photo: Some(RectPx {
                    x: 20,
                    y: 40,
                    width: 80,
                    height: 100,
                }),
                qr: RectPx {
                    x: 300,
                    y: 180,
                    width: 80,
                    height: 80,
                },
                text_blocks: vec![],
            },
            employee: EmployeeSnapshot {
                schema_version: 1,
                employee_id: 1,
                full_name: "Test Person".into(),
                document_number: "D-1".into(),
                job_title: "Rigger".into(),
                provider_name: "Provider".into(),
                photo_path: None,
                captured_at: now,
            },
            event: EventSnapshot {
                schema_version: 1,
                event_id: 1,
                name: "Event".into(),
                starts_at: now,
                ends_at: now,
                captured_at: now,
            },
            zones: ZonesSnapshot {
                schema_version: 1,
                zones: vec![],
                captured_at: now,
            },
        }
    }

    #[test]
    fn composes_jpeg_at_template_dimensions() {
        let compositor = Compositor::new("fonts");
        let jpeg = compositor.compose(&job_without_text()).unwrap();

        assert_eq!(image::guess_format(&jpeg).unwrap(), ImageFormat::Jpeg);
        let out = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((out.width(), out.height()), (400, 280));

        // The black QR overlay darkens its rect relative to the canvas.
        let rgb = out.into_rgb8();
        let in_qr = rgb.get_pixel(340, 220);
        let outside = rgb.get_pixel(200, 10);
        assert!(in_qr.0[0] < 64);
        assert!(outside.0[0] > 200);
    }

    #[test]
    fn photo_is_optional() {
        let compositor = Compositor::new("fonts");
        let mut job = job_without_text();
        job.photo = None;
        compositor.compose(&job).unwrap();
    }

    #[test]
    fn unknown_block_ids_are_skipped_not_fatal() {
        let compositor = Compositor::new("fonts");
        let mut job = job_without_text();
        // An unknown binding never reaches font loading, so no font files
        // are needed for it to be skipped.
        job.layout.text_blocks.push(TextBlock {
            id: "badge_color".into(),
            x: 10,
            y: 10,
            font_size: 20.0,
            font: "DejaVuSans".into(),
            align: TextAlign::Left,
        });
        compositor.compose(&job).unwrap();
    }

    #[test]
    fn missing_font_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FontCache::new(dir.path());
        match cache.get("NoSuchFont") {
            Err(ComposeError::FontNotFound(name)) => assert_eq!(name, "NoSuchFont"),
            other => panic!("expected FontNotFound, got {other:?}"),
        }
    }

    #[test]
    fn anchoring_offsets_by_measured_width() {
        assert_eq!(anchored_x(TextAlign::Left, 100, 80), 100);
        assert_eq!(anchored_x(TextAlign::Center, 100, 80), 60);
        assert_eq!(anchored_x(TextAlign::Right, 100, 80), 20);
        // Never draws off-canvas to the left.
        assert_eq!(anchored_x(TextAlign::Right, 10, 80), 0);
    }

    #[test]
    fn block_ids_bind_to_snapshot_fields() {
        let job = job_without_text();
        let block = |id: &str| TextBlock {
            id: id.into(),
            x: 0,
            y: 0,
            font_size: 12.0,
            font: "X".into(),
            align: TextAlign::Left,
        };
        assert_eq!(
            resolve_block(&block("employee_name"), &job.employee, &job.event, &job.zones),
            Some("Test Person".into())
        );
        assert_eq!(
            resolve_block(&block("event_name"), &job.employee, &job.event, &job.zones),
            Some("Event".into())
        );
        assert_eq!(
            resolve_block(&block("mystery"), &job.employee, &job.event, &job.zones),
            None
        );
    }
}
