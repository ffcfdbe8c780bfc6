use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// A credential template: background artwork plus layout metadata telling
/// the compositor where the photo, QR and text blocks land.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: i64,
    pub name: String,
    pub file_path: String,
    pub layout: LayoutMeta,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Layout geometry in template pixel space.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LayoutMeta {
    /// Vertical fold line for two-sided stock; informational, never drawn.
    #[serde(default)]
    pub fold_x_px: Option<u32>,
    #[serde(default)]
    pub photo: Option<RectPx>,
    pub qr: RectPx,
    #[serde(default)]
    pub text_blocks: Vec<TextBlock>,
}

/// Axis-aligned placement rectangle, pixels from the top-left corner.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RectPx {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// One text slot on the template, bound by `id` to a snapshot field
/// (`employee_name`, `document_number`, `provider_name`, `job_title`,
/// `event_name`, `zones`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextBlock {
    pub id: String,
    pub x: u32,
    pub y: u32,
    pub font_size: f32,
    pub font: String,
    #[serde(default)]
    pub align: TextAlign,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, EnumString, Display, PartialEq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TextAlign {
    #[default]
    Left,
    Center,
    Right,
}
