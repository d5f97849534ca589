use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern.
/// The serde representation matches the stored string.
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$(Self::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(Role {
    Patient => "patient",
    Hospital => "hospital",
    Admin => "admin",
});

str_enum!(RecordType {
    LabReport => "LAB_REPORT",
    Prescription => "PRESCRIPTION",
    Imaging => "IMAGING",
    DischargeSummary => "DISCHARGE_SUMMARY",
    Consultation => "CONSULTATION",
    Vaccination => "VACCINATION",
    Other => "OTHER",
});

str_enum!(RecordStatus {
    Pending => "PENDING",
    Approved => "APPROVED",
    Rejected => "REJECTED",
});

str_enum!(DisputeReason {
    PrivacyViolation => "PRIVACY_VIOLATION",
    DataBreach => "DATA_BREACH",
    UnauthorizedUpload => "UNAUTHORIZED_UPLOAD",
    IncorrectInformation => "INCORRECT_INFORMATION",
    MissingInformation => "MISSING_INFORMATION",
    Other => "OTHER",
});

str_enum!(DisputePriority {
    High => "HIGH",
    Medium => "MEDIUM",
});

str_enum!(DisputeStatus {
    PendingReview => "PENDING_REVIEW",
    Resolved => "RESOLVED",
    Dismissed => "DISMISSED",
});

str_enum!(TimelineAction {
    Created => "CREATED",
    Resolved => "RESOLVED",
    Dismissed => "DISMISSED",
});

str_enum!(AuditAction {
    RecordCreated => "RECORD_CREATED",
    RecordUpdated => "RECORD_UPDATED",
    RecordStatusChanged => "RECORD_STATUS_CHANGED",
    RecordDeleted => "RECORD_DELETED",
    DisputeCreated => "DISPUTE_CREATED",
    DisputeResolved => "DISPUTE_RESOLVED",
    UserRegistered => "USER_REGISTERED",
});

str_enum!(AuditResult {
    Success => "SUCCESS",
    Failed => "FAILED",
    Restricted => "RESTRICTED",
});

str_enum!(TargetType {
    Record => "RECORD",
    Dispute => "DISPUTE",
    User => "USER",
});

impl DisputeReason {
    /// Priority is derived from the reason, never supplied by a client.
    pub fn priority(self) -> DisputePriority {
        match self {
            Self::PrivacyViolation | Self::DataBreach | Self::UnauthorizedUpload => {
                DisputePriority::High
            }
            Self::IncorrectInformation | Self::MissingInformation | Self::Other => {
                DisputePriority::Medium
            }
        }
    }
}

impl DisputeStatus {
    /// Statuses an admin may resolve a dispute into.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Dismissed)
    }

    pub fn timeline_action(self) -> TimelineAction {
        match self {
            Self::PendingReview => TimelineAction::Created,
            Self::Resolved => TimelineAction::Resolved,
            Self::Dismissed => TimelineAction::Dismissed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn str_round_trip_for_every_variant() {
        for status in RecordStatus::ALL {
            assert_eq!(RecordStatus::from_str(status.as_str()).unwrap(), *status);
        }
        for reason in DisputeReason::ALL {
            assert_eq!(DisputeReason::from_str(reason.as_str()).unwrap(), *reason);
        }
        for role in Role::ALL {
            assert_eq!(Role::from_str(role.as_str()).unwrap(), *role);
        }
    }

    #[test]
    fn unknown_value_is_invalid_enum() {
        let err = RecordStatus::from_str("ARCHIVED").unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidEnum { .. }));
    }

    #[test]
    fn serde_uses_stored_strings() {
        let json = serde_json::to_string(&DisputeStatus::PendingReview).unwrap();
        assert_eq!(json, "\"PENDING_REVIEW\"");
        let role: Role = serde_json::from_str("\"hospital\"").unwrap();
        assert_eq!(role, Role::Hospital);
    }

    #[test]
    fn high_priority_reasons() {
        assert_eq!(DisputeReason::DataBreach.priority(), DisputePriority::High);
        assert_eq!(DisputeReason::PrivacyViolation.priority(), DisputePriority::High);
        assert_eq!(DisputeReason::UnauthorizedUpload.priority(), DisputePriority::High);
    }

    #[test]
    fn other_reasons_are_medium() {
        assert_eq!(DisputeReason::Other.priority(), DisputePriority::Medium);
        assert_eq!(DisputeReason::IncorrectInformation.priority(), DisputePriority::Medium);
        assert_eq!(DisputeReason::MissingInformation.priority(), DisputePriority::Medium);
    }

    #[test]
    fn only_resolved_and_dismissed_are_terminal() {
        assert!(!DisputeStatus::PendingReview.is_terminal());
        assert!(DisputeStatus::Resolved.is_terminal());
        assert!(DisputeStatus::Dismissed.is_terminal());
    }
}
