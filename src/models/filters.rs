use uuid::Uuid;

use super::enums::{DisputePriority, DisputeStatus, RecordStatus, RecordType, Role};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Ownership clause applied to every listing. Derived from the caller's
/// principal, never from query parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Patient(Uuid),
    Hospital(Uuid),
    All,
}

#[derive(Debug, Default)]
pub struct RecordFilter {
    pub status: Option<RecordStatus>,
    pub record_type: Option<RecordType>,
    /// Case-insensitive substring over title and hospital name.
    pub search: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Default)]
pub struct DisputeFilter {
    pub status: Option<DisputeStatus>,
    pub priority: Option<DisputePriority>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Default)]
pub struct AuditFilter {
    pub actor_id: Option<Uuid>,
    pub limit: Option<u32>,
}

#[derive(Debug, Default)]
pub struct UserFilter {
    pub role: Option<Role>,
}

/// Resolve a requested page size against the default and the cap.
pub fn page_size(requested: Option<u32>, default: u32, max: u32) -> u32 {
    requested.unwrap_or(default).clamp(1, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_defaults_and_clamps() {
        assert_eq!(page_size(None, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE), 20);
        assert_eq!(page_size(Some(500), DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE), 100);
        assert_eq!(page_size(Some(0), DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE), 1);
        assert_eq!(page_size(Some(7), DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE), 7);
    }
}
