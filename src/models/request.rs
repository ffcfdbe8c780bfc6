use super::snapshot::{EmployeeSnapshot, EventSnapshot, ZonesSnapshot};
use super::template::Template;

/// Everything the pipeline needs from an approved accreditation request,
/// read once by the caller and passed by value.
///
/// The pipeline never re-queries the approval side: the caller resolves the
/// employee, event, zones and template at approval time and hands over the
/// snapshots it built.
#[derive(Debug, Clone)]
pub struct ApprovedRequest {
    pub id: i64,
    pub employee: EmployeeSnapshot,
    pub event: EventSnapshot,
    pub zones: ZonesSnapshot,
    pub template: Template,
}
