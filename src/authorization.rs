//! Authorization matrix for record, dispute and directory operations.
//!
//! `decide` is pure and total. Precedence, checked in order:
//! 1. Resource absent or soft-deleted → NOT FOUND (every role)
//! 2. Resource exists but the caller cannot read it → NOT FOUND
//! 3. Explicitly enumerated (operation, role, ownership) → ALLOW
//! 4. Default → FORBID
//!
//! Rule 2 before rule 4 keeps cross-tenant probing from telling "exists
//! but not yours" apart from "does not exist".

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::RequestMeta;
use crate::error::DomainError;
use crate::models::enums::Role;
use crate::models::Scope;

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// Identity handed over by the authentication collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: Uuid,
    pub role: Role,
}

impl Principal {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self { id, role }
    }

    /// Ownership clause for listings. Admins see everything.
    pub fn scope(&self) -> Scope {
        match self.role {
            Role::Patient => Scope::Patient(self.id),
            Role::Hospital => Scope::Hospital(self.id),
            Role::Admin => Scope::All,
        }
    }
}

/// Principal plus the requester metadata recorded in audit entries.
#[derive(Debug, Clone)]
pub struct Caller {
    pub principal: Principal,
    pub meta: RequestMeta,
}

impl Caller {
    pub fn new(principal: Principal, meta: RequestMeta) -> Self {
        Self { principal, meta }
    }

    pub fn id(&self) -> Uuid {
        self.principal.id
    }

    pub fn role(&self) -> Role {
        self.principal.role
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreateRecord,
    ListRecords,
    ReadRecord,
    TransitionRecord,
    EditRecord,
    DeleteRecord,
    CreateDispute,
    ListDisputes,
    ReadDispute,
    ResolveDispute,
    ReadAudit,
    RegisterUser,
    ListUsers,
    ReadUser,
}

/// What the caller is acting on, as seen by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// No existing resource is targeted (create, list).
    Collection,
    /// Target is absent or soft-deleted.
    Missing,
    Record { patient_id: Uuid, hospital_id: Uuid },
    Dispute { patient_id: Uuid, hospital_id: Uuid },
    User { id: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Forbid,
    NotFound,
}

// ═══════════════════════════════════════════════════════════
// Decision
// ═══════════════════════════════════════════════════════════

pub fn decide(role: Role, actor_id: Uuid, op: Operation, ownership: Ownership) -> Verdict {
    use Operation::*;

    match ownership {
        Ownership::Missing => Verdict::NotFound,

        Ownership::Collection => match (op, role) {
            (CreateRecord, Role::Hospital) => Verdict::Allow,
            (ListRecords | ListDisputes, _) => Verdict::Allow,
            (ReadAudit | RegisterUser | ListUsers, Role::Admin) => Verdict::Allow,
            _ => Verdict::Forbid,
        },

        Ownership::Record {
            patient_id,
            hospital_id,
        } => {
            if !can_read(role, actor_id, patient_id, hospital_id) {
                return Verdict::NotFound;
            }
            let owner_patient = role == Role::Patient && actor_id == patient_id;
            let owner_hospital = role == Role::Hospital && actor_id == hospital_id;
            match op {
                ReadRecord => Verdict::Allow,
                TransitionRecord if owner_patient => Verdict::Allow,
                EditRecord | DeleteRecord if owner_hospital || role == Role::Admin => Verdict::Allow,
                CreateDispute if owner_patient => Verdict::Allow,
                _ => Verdict::Forbid,
            }
        }

        Ownership::Dispute {
            patient_id,
            hospital_id,
        } => {
            if !can_read(role, actor_id, patient_id, hospital_id) {
                return Verdict::NotFound;
            }
            match (op, role) {
                (ReadDispute, _) => Verdict::Allow,
                (ResolveDispute, Role::Admin) => Verdict::Allow,
                _ => Verdict::Forbid,
            }
        }

        Ownership::User { id } => {
            if role != Role::Admin && actor_id != id {
                return Verdict::NotFound;
            }
            match op {
                ReadUser => Verdict::Allow,
                _ => Verdict::Forbid,
            }
        }
    }
}

/// `decide` for a principal, as a `Result` business modules can `?`.
pub fn authorize(
    principal: &Principal,
    op: Operation,
    ownership: Ownership,
) -> Result<(), DomainError> {
    match decide(principal.role, principal.id, op, ownership) {
        Verdict::Allow => Ok(()),
        Verdict::Forbid => Err(DomainError::Forbidden),
        Verdict::NotFound => Err(DomainError::NotFound),
    }
}

fn can_read(role: Role, actor_id: Uuid, patient_id: Uuid, hospital_id: Uuid) -> bool {
    match role {
        Role::Admin => true,
        Role::Patient => actor_id == patient_id,
        Role::Hospital => actor_id == hospital_id,
    }
}
