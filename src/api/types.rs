//! Shared types for the HTTP layer: the router context and the
//! bearer-token authentication adapter.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use uuid::Uuid;

use crate::authorization::Principal;
use crate::core_state::CoreState;
use crate::models::enums::Role;

// ═══════════════════════════════════════════════════════════
// API context
// ═══════════════════════════════════════════════════════════

/// Shared context for all API routes and middleware.
#[derive(Clone)]
pub struct ApiContext {
    pub core: Arc<CoreState>,
    pub authenticator: Arc<dyn Authenticator>,
}

impl ApiContext {
    pub fn new(core: Arc<CoreState>, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            core,
            authenticator,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Authentication adapter
// ═══════════════════════════════════════════════════════════

/// Boundary with the external Authentication service.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, bearer_token: &str) -> Option<Principal>;
}

#[derive(Debug, thiserror::Error)]
pub enum PrincipalsError {
    #[error("Cannot read principals file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed principals file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Empty token for principal {0}")]
    EmptyToken(Uuid),
}

#[derive(Deserialize)]
struct PrincipalEntry {
    token: String,
    id: Uuid,
    role: Role,
}

/// Static token → principal table. Only SHA-256 hashes of the tokens
/// are kept in memory.
#[derive(Default)]
pub struct TokenDirectory {
    principals: HashMap<[u8; 32], Principal>,
}

impl TokenDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, token: &str, principal: Principal) {
        self.principals.insert(hash_token(token), principal);
    }

    /// Parse `[{"token", "id", "role"}]`.
    pub fn from_json(raw: &str) -> Result<Self, PrincipalsError> {
        let entries: Vec<PrincipalEntry> = serde_json::from_str(raw)?;
        let mut directory = Self::new();
        for entry in entries {
            if entry.token.trim().is_empty() {
                return Err(PrincipalsError::EmptyToken(entry.id));
            }
            directory.insert(&entry.token, Principal::new(entry.id, entry.role));
        }
        Ok(directory)
    }

    /// Load from disk. A missing file yields an empty directory, so every
    /// protected request is rejected until principals are provisioned.
    pub fn load(path: &Path) -> Result<Self, PrincipalsError> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Principals file not found, no caller can authenticate");
            return Ok(Self::new());
        }
        let raw = std::fs::read_to_string(path)?;
        let directory = Self::from_json(&raw)?;
        tracing::info!(principals = directory.len(), "Principals loaded");
        Ok(directory)
    }

    pub fn len(&self) -> usize {
        self.principals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.principals.is_empty()
    }
}

impl Authenticator for TokenDirectory {
    fn authenticate(&self, bearer_token: &str) -> Option<Principal> {
        self.principals.get(&hash_token(bearer_token)).copied()
    }
}

/// Hash a bearer token string using SHA-256.
pub fn hash_token(token: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_token_is_deterministic() {
        assert_eq!(hash_token("test"), hash_token("test"));
        assert_ne!(hash_token("token-a"), hash_token("token-b"));
    }

    #[test]
    fn directory_resolves_known_tokens_only() {
        let id = Uuid::new_v4();
        let raw = format!(r#"[{{"token": "s3cret", "id": "{id}", "role": "hospital"}}]"#);
        let directory = TokenDirectory::from_json(&raw).unwrap();

        assert_eq!(directory.len(), 1);
        assert_eq!(
            directory.authenticate("s3cret"),
            Some(Principal::new(id, Role::Hospital))
        );
        assert_eq!(directory.authenticate("S3CRET"), None);
        assert_eq!(directory.authenticate(""), None);
    }

    #[test]
    fn empty_token_rejected() {
        let raw = format!(r#"[{{"token": " ", "id": "{}", "role": "admin"}}]"#, Uuid::new_v4());
        assert!(matches!(
            TokenDirectory::from_json(&raw),
            Err(PrincipalsError::EmptyToken(_))
        ));
    }

    #[test]
    fn unknown_role_rejected() {
        let raw = format!(r#"[{{"token": "t", "id": "{}", "role": "nurse"}}]"#, Uuid::new_v4());
        assert!(matches!(TokenDirectory::from_json(&raw), Err(PrincipalsError::Json(_))));
    }

    #[test]
    fn missing_file_is_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let directory = TokenDirectory::load(&dir.path().join("principals.json")).unwrap();
        assert!(directory.is_empty());
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("principals.json");
        let id = Uuid::new_v4();
        std::fs::write(&path, format!(r#"[{{"token": "abc", "id": "{id}", "role": "patient"}}]"#)).unwrap();
        let directory = TokenDirectory::load(&path).unwrap();
        assert_eq!(directory.authenticate("abc").map(|p| p.id), Some(id));
    }
}
