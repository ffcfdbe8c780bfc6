use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::template::{LayoutMeta, Template};

pub(crate) fn default_schema_version() -> u32 {
    1
}

/// Employee identity as it stood when the request was approved.
///
/// Credentials render from these copies, never from live entities, so later
/// edits to an employee cannot silently change an issued badge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmployeeSnapshot {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub employee_id: i64,
    pub full_name: String,
    pub document_number: String,
    pub job_title: String,
    pub provider_name: String,
    pub photo_path: Option<String>,
    pub captured_at: DateTime<Utc>,
}

/// Event identity and window at approval time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventSnapshot {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub event_id: i64,
    pub name: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub captured_at: DateTime<Utc>,
}

/// One granted access zone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ZoneEntry {
    pub zone_id: i64,
    pub code: String,
    pub name: String,
}

/// Access zones granted to the credential holder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ZonesSnapshot {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub zones: Vec<ZoneEntry>,
    pub captured_at: DateTime<Utc>,
}

impl ZonesSnapshot {
    /// Zone codes joined for the badge's access line, e.g. `"1 3 5A"`.
    pub fn codes_line(&self) -> String {
        self.zones
            .iter()
            .map(|z| z.code.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Template artwork and layout at capture time.
///
/// Regeneration refreshes this snapshot; plain generation keeps rendering
/// from the one taken at approval even if the template has since changed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplateSnapshot {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub template_id: i64,
    pub name: String,
    pub file_path: String,
    pub layout: LayoutMeta,
    pub template_version: i32,
    pub captured_at: DateTime<Utc>,
}

impl TemplateSnapshot {
    pub fn capture(template: &Template, now: DateTime<Utc>) -> Self {
        Self {
            schema_version: 1,
            template_id: template.id,
            name: template.name.clone(),
            file_path: template.file_path.clone(),
            layout: template.layout.clone(),
            template_version: template.version,
            captured_at: now,
        }
    }
}
